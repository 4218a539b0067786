//! Confidence scalar attached to each prediction.
//!
//! Only the class-probability rule has any statistical footing. The spread
//! rule is a rough proxy and the heuristic rule is a placeholder until real
//! uncertainty quantification (quantile models, conformal intervals) lands.

use crate::{config::ConfidenceConfig, error::Result, model::Regressor};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceMethod {
    /// Max class probability of a classifier.
    ClassProbability,
    /// Disagreement between members of a bagged ensemble.
    EnsembleSpread,
    /// Noise around a fixed center. Not a calibrated quantity.
    Heuristic,
}

impl ConfidenceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceMethod::ClassProbability => "class_probability",
            ConfidenceMethod::EnsembleSpread => "ensemble_spread",
            ConfidenceMethod::Heuristic => "heuristic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Confidence {
    pub value: f64,
    pub method: ConfidenceMethod,
}

#[derive(Debug, Clone)]
pub struct ConfidenceEstimator {
    cfg: ConfidenceConfig,
}

impl ConfidenceEstimator {
    pub fn new(cfg: ConfidenceConfig) -> Self {
        Self { cfg }
    }

    /// `x` is the scaled model input.
    pub fn estimate<R: Rng + ?Sized>(
        &self,
        model: &dyn Regressor,
        x: &[f32],
        rng: &mut R,
    ) -> Result<Confidence> {
        if let Some(proba) = model.predict_proba(x)? {
            let max = proba.iter().copied().fold(0.0, f64::max);
            return Ok(Confidence {
                value: max.clamp(0.0, 1.0),
                method: ConfidenceMethod::ClassProbability,
            });
        }

        if let Some(members) = model.member_predictions(x)? {
            if members.len() > 1 {
                return Ok(Confidence {
                    value: self.from_spread(&members),
                    method: ConfidenceMethod::EnsembleSpread,
                });
            }
        }

        Ok(Confidence {
            value: self.heuristic(rng),
            method: ConfidenceMethod::Heuristic,
        })
    }

    fn from_spread(&self, members: &[f64]) -> f64 {
        let n = members.len() as f64;
        let mean = members.iter().sum::<f64>() / n;
        let std = (members.iter().map(|m| (m - mean) * (m - mean)).sum::<f64>() / n).sqrt();
        let raw = 1.0 - std / self.cfg.spread_normalizer.max(f64::EPSILON);
        self.bound(raw)
    }

    fn heuristic<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let noise = Normal::new(0.0, self.cfg.heuristic_sd.max(0.0))
            .map(|n| n.sample(rng))
            .unwrap_or(0.0);
        self.bound(self.cfg.heuristic_center + noise)
    }

    // max/min rather than clamp: a config with min > max must not panic
    fn bound(&self, v: f64) -> f64 {
        v.max(self.cfg.min).min(self.cfg.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LinearRegressor, SoftmaxClassifier};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn estimator() -> ConfidenceEstimator {
        ConfidenceEstimator::new(ConfidenceConfig::default())
    }

    #[test]
    fn heuristic_stays_in_bounds() {
        let model = LinearRegressor {
            coef: vec![1.0],
            intercept: 0.0,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..2000 {
            let c = estimator().estimate(&model, &[4.0], &mut rng).unwrap();
            assert_eq!(c.method, ConfidenceMethod::Heuristic);
            assert!((0.3..=0.95).contains(&c.value), "out of bounds: {}", c.value);
        }
    }

    #[test]
    fn classifier_uses_max_probability() {
        let model = SoftmaxClassifier {
            classes: vec![1.0, 2.0],
            weights: vec![vec![0.0], vec![0.0]],
            bias: vec![(3.0f64).ln(), 0.0],
        };
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let c = estimator().estimate(&model, &[1.0], &mut rng).unwrap();
        assert_eq!(c.method, ConfidenceMethod::ClassProbability);
        assert!((c.value - 0.75).abs() < 1e-12);
    }

    #[test]
    fn tighter_ensembles_are_more_confident() {
        let e = estimator();
        let tight = e.from_spread(&[5.0, 5.1, 4.9, 5.0]);
        let loose = e.from_spread(&[1.0, 9.0, 3.0, 12.0]);
        assert!(tight > loose);
        assert_eq!(e.from_spread(&[2.0, 2.0]), 0.95);
        assert_eq!(e.from_spread(&[1.0, 20.0]), 0.3);
    }
}
