use super::{check_len, ModelKind, Regressor};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// `y = coef . x + intercept`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinearRegressor {
    pub coef: Vec<f64>,
    #[serde(default)]
    pub intercept: f64,
}

impl Regressor for LinearRegressor {
    fn kind(&self) -> ModelKind {
        ModelKind::Linear
    }

    fn n_features(&self) -> Option<usize> {
        Some(self.coef.len())
    }

    fn predict(&self, x: &[f32]) -> Result<f64> {
        check_len(x, self.coef.len())?;
        Ok(self.intercept + self.coef.iter().zip(x).map(|(c, v)| c * *v as f64).sum::<f64>())
    }
}

/// Multinomial logistic model over finishing positions.
///
/// `weights[k]` and `bias[k]` score class `classes[k]`; the prediction is
/// the most probable class label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SoftmaxClassifier {
    pub classes: Vec<f64>,
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

impl SoftmaxClassifier {
    pub(crate) fn validate(&self) -> Result<()> {
        let k = self.classes.len();
        if k == 0 || self.weights.len() != k || self.bias.len() != k {
            return Err(Error::InvalidArtifact(format!(
                "softmax classifier has {} classes, {} weight rows, {} biases",
                k,
                self.weights.len(),
                self.bias.len()
            )));
        }
        let dim = self.weights[0].len();
        if self.weights.iter().any(|w| w.len() != dim) {
            return Err(Error::InvalidArtifact("ragged softmax weight matrix".into()));
        }
        // rank probabilities are served in class order
        if self.classes.iter().any(|c| !c.is_finite()) || self.classes.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::InvalidArtifact(
                "softmax classes must be finite and strictly increasing".into(),
            ));
        }
        Ok(())
    }

    fn dim(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }

    fn probabilities(&self, x: &[f32]) -> Result<Vec<f64>> {
        check_len(x, self.dim())?;
        let logits: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(w, b)| b + w.iter().zip(x).map(|(c, v)| c * *v as f64).sum::<f64>())
            .collect();
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exp: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
        let z: f64 = exp.iter().sum();
        Ok(exp.into_iter().map(|e| e / z).collect())
    }
}

impl Regressor for SoftmaxClassifier {
    fn kind(&self) -> ModelKind {
        ModelKind::SoftmaxClassifier
    }

    fn n_features(&self) -> Option<usize> {
        Some(self.dim())
    }

    fn predict(&self, x: &[f32]) -> Result<f64> {
        let p = self.probabilities(x)?;
        let best = p
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(0);
        Ok(self.classes[best])
    }

    fn predict_proba(&self, x: &[f32]) -> Result<Option<Vec<f64>>> {
        self.probabilities(x).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_way() -> SoftmaxClassifier {
        SoftmaxClassifier {
            classes: vec![1.0, 2.0, 3.0],
            weights: vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.0, 0.0]],
            bias: vec![0.0, 0.0, 0.0],
        }
    }

    #[test]
    fn probabilities_sum_to_one() {
        let m = three_way();
        m.validate().unwrap();
        let p = m.predict_proba(&[2.0, 0.5]).unwrap().unwrap();
        assert_eq!(p.len(), 3);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(m.predict(&[2.0, 0.5]).unwrap(), 1.0);
        assert_eq!(m.predict(&[-3.0, 4.0]).unwrap(), 2.0);
    }

    #[test]
    fn large_logits_stay_finite() {
        let m = three_way();
        let p = m.predict_proba(&[1.0e6, 0.0]).unwrap().unwrap();
        assert!(p.iter().all(|v| v.is_finite()));
        assert!((p[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn mismatched_shapes_rejected() {
        let mut m = three_way();
        m.bias.pop();
        assert!(matches!(m.validate(), Err(Error::InvalidArtifact(_))));
    }

    #[test]
    fn unordered_classes_rejected() {
        let mut m = three_way();
        m.classes = vec![3.0, 1.0, 2.0];
        assert!(matches!(m.validate(), Err(Error::InvalidArtifact(_))));
        m.classes = vec![1.0, 1.0, 2.0];
        assert!(matches!(m.validate(), Err(Error::InvalidArtifact(_))));
    }
}
