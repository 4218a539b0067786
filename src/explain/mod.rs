//! Per-prediction feature attributions.
//!
//! Tree models get exact TreeSHAP; everything else gets sampled Shapley
//! values against the model's background rows. When neither can run the
//! caller receives a canned explanation tagged as degraded, never a silent
//! substitute.

mod kernel;
mod tree_shap;

pub use kernel::KernelExplainer;
pub use tree_shap::shap_values as tree_shap_values;

use crate::{
    config::ExplainConfig, features::FeatureVector, registry::RegisteredModel,
    types::FeatureContribution,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExplainError {
    #[error(transparent)]
    Model(#[from] crate::error::Error),
    #[error("explainer produced a non-finite contribution for {0}")]
    NonFinite(String),
    #[error("explainer returned {got} contributions for {expected} features")]
    Width { got: usize, expected: usize },
    #[error("no rows to explain")]
    NoRows,
    #[error("no explainer can run for {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplainMethod {
    Tree,
    Kernel,
    Fallback,
}

impl ExplainMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExplainMethod::Tree => "tree",
            ExplainMethod::Kernel => "kernel",
            ExplainMethod::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    /// Sorted by descending absolute contribution.
    pub contributions: Vec<FeatureContribution>,
    pub base_value: f64,
    pub method: ExplainMethod,
}

impl Explanation {
    fn sorted(names: &[String], phi: &[f64], base_value: f64, method: ExplainMethod) -> Self {
        let mut contributions: Vec<FeatureContribution> = phi
            .iter()
            .enumerate()
            .map(|(i, c)| FeatureContribution {
                feature: names
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("feature_{}", i)),
                contribution: *c,
            })
            .collect();
        contributions.sort_by(|a, b| b.contribution.abs().total_cmp(&a.contribution.abs()));
        Self {
            contributions,
            base_value,
            method,
        }
    }

    /// Fixed set served when no explainer can run. Values are illustrative.
    pub fn canned() -> Self {
        let names: Vec<String> = [
            "qualifying_position",
            "constructor_recent_form",
            "driver_experience_at_track",
            "last_3_laps_mean",
            "sector_delta_1",
            "weather_conditions",
            "tire_strategy_risk",
            "track_temperature",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let phi = [2.1, 1.5, 0.9, 0.7, 0.4, -0.3, -0.8, -1.1];
        Self::sorted(&names, &phi, 0.0, ExplainMethod::Fallback)
    }

    pub fn truncate(&mut self, top_k: Option<usize>) {
        if let Some(k) = top_k {
            self.contributions.truncate(k);
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExplanationOutcome {
    Computed(Explanation),
    /// Canned contributions; `reason` says why nothing was computed.
    Degraded {
        explanation: Explanation,
        reason: String,
    },
}

impl ExplanationOutcome {
    pub fn explanation(&self) -> &Explanation {
        match self {
            ExplanationOutcome::Computed(e) => e,
            ExplanationOutcome::Degraded { explanation, .. } => explanation,
        }
    }

    pub fn degraded_reason(&self) -> Option<&str> {
        match self {
            ExplanationOutcome::Computed(_) => None,
            ExplanationOutcome::Degraded { reason, .. } => Some(reason),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GlobalExplanation {
    /// Mean absolute contribution per feature, strongest first.
    pub feature_importance: Vec<FeatureContribution>,
    pub feature_names: Vec<String>,
    pub rows: usize,
    pub method: ExplainMethod,
}

/// Picks an attribution method per model and runs it.
#[derive(Debug, Clone)]
pub struct Explainer {
    cfg: ExplainConfig,
}

impl Explainer {
    pub fn new(cfg: ExplainConfig) -> Self {
        Self { cfg }
    }

    pub fn method_for(&self, entry: &RegisteredModel) -> Option<ExplainMethod> {
        if entry.model.tree_ensemble().is_some() {
            Some(ExplainMethod::Tree)
        } else if entry.background.is_some() {
            Some(ExplainMethod::Kernel)
        } else {
            None
        }
    }

    pub fn explain(
        &self,
        entry: &RegisteredModel,
        fv: &FeatureVector,
    ) -> Result<ExplanationOutcome, ExplainError> {
        let Some(method) = self.method_for(entry) else {
            let mut explanation = Explanation::canned();
            explanation.truncate(self.cfg.top_k);
            return Ok(ExplanationOutcome::Degraded {
                explanation,
                reason: format!(
                    "{} has no background data for sampling explanations",
                    entry.name
                ),
            });
        };

        let raw = entry.raw_input(fv)?;
        let names = entry.feature_names();
        let (phi, base) = self.attribute(entry, method, &raw)?;
        check(&names, &phi)?;

        let mut explanation = Explanation::sorted(&names, &phi, base, method);
        explanation.truncate(self.cfg.top_k);
        Ok(ExplanationOutcome::Computed(explanation))
    }

    /// Mean |contribution| over `rows` (unscaled model inputs).
    pub fn global_importance(
        &self,
        entry: &RegisteredModel,
        rows: &[Vec<f32>],
    ) -> Result<GlobalExplanation, ExplainError> {
        if rows.is_empty() {
            return Err(ExplainError::NoRows);
        }
        let method = self
            .method_for(entry)
            .ok_or_else(|| ExplainError::Unsupported(entry.name.clone()))?;
        let names = entry.feature_names();

        let mut acc = vec![0.0; names.len()];
        for row in rows {
            let (phi, _) = self.attribute(entry, method, row)?;
            check(&names, &phi)?;
            for (a, p) in acc.iter_mut().zip(&phi) {
                *a += p.abs();
            }
        }
        let n = rows.len() as f64;
        acc.iter_mut().for_each(|a| *a /= n);

        let mut feature_importance: Vec<FeatureContribution> = names
            .iter()
            .zip(acc)
            .map(|(name, v)| FeatureContribution {
                feature: name.clone(),
                contribution: v,
            })
            .collect();
        feature_importance.sort_by(|a, b| b.contribution.total_cmp(&a.contribution));

        Ok(GlobalExplanation {
            feature_importance,
            feature_names: names,
            rows: rows.len(),
            method,
        })
    }

    fn attribute(
        &self,
        entry: &RegisteredModel,
        method: ExplainMethod,
        raw: &[f32],
    ) -> Result<(Vec<f64>, f64), ExplainError> {
        match (method, entry.model.tree_ensemble(), entry.background.as_deref()) {
            (ExplainMethod::Tree, Some(ensemble), _) => {
                let x = entry.scale(raw)?;
                Ok((tree_shap_values(ensemble, &x), ensemble.expected_value()))
            }
            (ExplainMethod::Kernel, _, Some(background)) => {
                let k = KernelExplainer::new(self.cfg.kernel_samples, self.cfg.seed);
                let f = |row: &[f32]| entry.predict_raw(row);
                let phi = k.shap_values(&f, raw, background)?;
                let base = k.expected_value(&f, background)?;
                Ok((phi, base))
            }
            _ => Err(ExplainError::Unsupported(entry.name.clone())),
        }
    }
}

fn check(names: &[String], phi: &[f64]) -> Result<(), ExplainError> {
    if phi.len() != names.len() {
        return Err(ExplainError::Width {
            got: phi.len(),
            expected: names.len(),
        });
    }
    if let Some(i) = phi.iter().position(|v| !v.is_finite()) {
        return Err(ExplainError::NonFinite(names[i].clone()));
    }
    Ok(())
}
