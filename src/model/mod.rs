//! Model kinds the registry can serve and the artifact format they load from.

mod linear;
#[cfg(feature = "torch")]
mod torch;
mod tree;

pub use linear::{LinearRegressor, SoftmaxClassifier};
#[cfg(feature = "torch")]
pub use torch::TorchRegressor;
pub use tree::{fit_forest, Aggregation, ForestParams, Node, Tree, TreeEnsemble};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModelKind {
    RandomForest,
    GradientBoosting,
    Linear,
    SoftmaxClassifier,
    TorchScript,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::RandomForest => "RandomForestRegressor",
            ModelKind::GradientBoosting => "GradientBoostingRegressor",
            ModelKind::Linear => "LinearRegression",
            ModelKind::SoftmaxClassifier => "SoftmaxClassifier",
            ModelKind::TorchScript => "TorchScript",
        }
    }
}

/// A trained position model. Implementations are immutable after load.
pub trait Regressor: Send + Sync {
    fn kind(&self) -> ModelKind;

    /// Input width, when the model declares one.
    fn n_features(&self) -> Option<usize>;

    fn predict(&self, x: &[f32]) -> Result<f64>;

    /// Class distribution for classifiers; `None` for plain regressors.
    fn predict_proba(&self, _x: &[f32]) -> Result<Option<Vec<f64>>> {
        Ok(None)
    }

    fn tree_ensemble(&self) -> Option<&TreeEnsemble> {
        None
    }

    /// Per-member outputs for bagged ensembles.
    fn member_predictions(&self, _x: &[f32]) -> Result<Option<Vec<f64>>> {
        Ok(None)
    }
}

/// On-disk encoding of every native model kind (`<name>.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelArtifact {
    RandomForest(TreeEnsemble),
    GradientBoosting(TreeEnsemble),
    Linear(LinearRegressor),
    SoftmaxClassifier(SoftmaxClassifier),
}

impl ModelArtifact {
    pub fn into_regressor(self) -> Result<Box<dyn Regressor>> {
        Ok(match self {
            ModelArtifact::RandomForest(mut e) => {
                e.aggregation = Aggregation::Mean;
                e.validate()?;
                Box::new(e)
            }
            ModelArtifact::GradientBoosting(mut e) => {
                e.aggregation = Aggregation::Sum;
                e.validate()?;
                Box::new(e)
            }
            ModelArtifact::Linear(m) => Box::new(m),
            ModelArtifact::SoftmaxClassifier(m) => {
                m.validate()?;
                Box::new(m)
            }
        })
    }
}

pub(crate) fn check_len(x: &[f32], expected: usize) -> Result<()> {
    if x.len() != expected {
        return Err(Error::FeatureLength {
            got: x.len(),
            expected,
        });
    }
    Ok(())
}
