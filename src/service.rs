use crate::{
    config::{BatchConfig, PipelineConfig, RankConfig},
    confidence::ConfidenceEstimator,
    error::{Error, Result},
    explain::{ExplainError, Explainer, Explanation, ExplanationOutcome, GlobalExplanation},
    features::{FeatureEngineer, FeatureVector},
    rank_probs::{from_class_probs, gaussian_rank_probs},
    registry::{ModelRegistry, RegisteredModel},
    types::{ExplanationBlock, PredictionRequest, PredictionResponse},
};
use futures::future::join_all;
use std::sync::Arc;

/// Request -> features -> model -> confidence -> rank probabilities -> explanation.
pub struct PredictionService {
    registry: ModelRegistry,
    engineer: FeatureEngineer,
    confidence: ConfidenceEstimator,
    explainer: Explainer,
    rank: RankConfig,
    batch: BatchConfig,
    log_pred: bool,
}

impl PredictionService {
    pub fn new(registry: ModelRegistry, engineer: FeatureEngineer, cfg: &PipelineConfig) -> Self {
        Self {
            registry,
            engineer,
            confidence: ConfidenceEstimator::new(cfg.confidence.clone()),
            explainer: Explainer::new(cfg.explain.clone()),
            rank: cfg.rank.clone(),
            batch: cfg.batch.clone(),
            log_pred: false,
        }
    }

    /// Log summary statistics of every model input at info level.
    pub fn with_log_pred(mut self, on: bool) -> Self {
        self.log_pred = on;
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn engineer(&self) -> &FeatureEngineer {
        &self.engineer
    }

    pub fn predict_position(&self, req: &PredictionRequest, model_name: &str) -> Result<PredictionResponse> {
        let fv = self.engineer.build(req)?;
        let entry = self.registry.get(model_name)?;
        let x = entry.scale(&entry.raw_input(&fv)?)?;

        if self.log_pred {
            log_input(req, &entry.feature_names(), &x);
        }

        let predicted_position = entry.model.predict(&x)?;
        let confidence = self
            .confidence
            .estimate(entry.model.as_ref(), &x, &mut rand::rng())?;

        let predicted_rank_probs = match entry.model.predict_proba(&x) {
            Ok(Some(p)) => Some(from_class_probs(p)),
            Ok(None) => Some(gaussian_rank_probs(predicted_position, &self.rank)),
            Err(e) => {
                tracing::warn!("rank probability generation failed: {}", e);
                None
            }
        };

        let explanations = self.explanation_block(&entry, &fv);

        Ok(PredictionResponse {
            predicted_position,
            predicted_rank_probs,
            confidence: confidence.value,
            confidence_method: confidence.method.as_str().to_string(),
            explanations,
        })
    }

    fn explanation_block(&self, entry: &RegisteredModel, fv: &FeatureVector) -> ExplanationBlock {
        let (explanation, degraded) = match self.explainer.explain(entry, fv) {
            Ok(ExplanationOutcome::Computed(e)) => (e, None),
            Ok(ExplanationOutcome::Degraded { explanation, reason }) => {
                tracing::warn!("serving canned explanation for {}: {}", entry.name, reason);
                (explanation, Some(reason))
            }
            Err(e) => {
                tracing::error!("explainer failed for {}: {}", entry.name, e);
                (Explanation::canned(), Some(format!("explainer failed: {}", e)))
            }
        };
        ExplanationBlock {
            top_features: explanation.contributions,
            method: explanation.method.as_str().to_string(),
            degraded,
        }
    }

    /// Runs each request on the blocking pool; results keep request order.
    /// The outer error rejects the batch as a whole.
    pub async fn predict_batch(
        self: Arc<Self>,
        requests: Vec<PredictionRequest>,
        model_name: String,
    ) -> Result<Vec<Result<PredictionResponse>>> {
        if requests.len() > self.batch.max_requests {
            return Err(Error::BatchTooLarge {
                got: requests.len(),
                limit: self.batch.max_requests,
            });
        }
        self.registry.get(&model_name)?;

        let tasks = requests.into_iter().map(|req| {
            let svc = Arc::clone(&self);
            let model = model_name.clone();
            tokio::task::spawn_blocking(move || svc.predict_position(&req, &model))
        });
        Ok(join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap_or_else(|e| Err(Error::Worker(e.to_string()))))
            .collect())
    }

    /// Mean |contribution| per feature over the model's background rows.
    pub fn global_importance(&self, model_name: &str) -> std::result::Result<GlobalExplanation, ExplainError> {
        let entry = self.registry.get(model_name)?;
        let rows = entry.background.as_deref().ok_or(ExplainError::NoRows)?;
        self.explainer.global_importance(&entry, rows)
    }
}

// Debug signal so we can confirm we're not sending all-zeros
fn log_input(req: &PredictionRequest, names: &[String], x: &[f32]) {
    let nz = x.iter().filter(|v| **v != 0.0).count();
    let mean = if x.is_empty() { 0.0 } else { x.iter().sum::<f32>() / x.len() as f32 };
    let std = if x.len() < 2 {
        0.0
    } else {
        (x.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / x.len() as f32).sqrt()
    };
    let sample: Vec<String> = names
        .iter()
        .zip(x)
        .take(6)
        .map(|(n, v)| format!("{}={:.3}", n, v))
        .collect();
    tracing::info!(
        "recv race={} driver={} in_dim={} nonzero={} mean={:.3} std={:.3} sample=[{}]",
        req.race_id,
        req.driver_id,
        x.len(),
        nz,
        mean,
        std,
        sample.join(", ")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::FallbackConfig,
        features::LookupTables,
        model::{LinearRegressor, SoftmaxClassifier},
        types::DataSource,
    };

    fn service_with(entries: Vec<RegisteredModel>) -> PredictionService {
        let registry = ModelRegistry::empty("unused");
        for e in entries {
            registry.insert(e);
        }
        let cfg = PipelineConfig::default();
        let engineer = FeatureEngineer::new(LookupTables::synthetic(), cfg.features.clone());
        PredictionService::new(registry, engineer, &cfg)
    }

    fn request() -> PredictionRequest {
        PredictionRequest {
            race_id: 1050,
            driver_id: 1,
            constructor_id: 1,
            qualifying_position: Some(3),
            ..Default::default()
        }
    }

    #[test]
    fn classifier_response_uses_native_distribution() {
        let names = vec!["qualifying_position".to_string()];
        let clf = SoftmaxClassifier {
            classes: vec![1.0, 2.0, 3.0],
            weights: vec![vec![1.0], vec![0.5], vec![0.0]],
            bias: vec![0.0, 0.0, 0.0],
        };
        let svc = service_with(vec![RegisteredModel::new(
            "podium",
            Box::new(clf),
            None,
            Some(names),
            None,
            DataSource::Real,
        )]);

        let out = svc.predict_position(&request(), "podium").unwrap();
        assert_eq!(out.predicted_position, 1.0);
        assert_eq!(out.confidence_method, "class_probability");
        let probs = out.predicted_rank_probs.unwrap();
        assert_eq!(probs.len(), 3);
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        // no background: canned explanation, flagged
        assert_eq!(out.explanations.method, "fallback");
        assert!(out.explanations.degraded.is_some());
    }

    #[test]
    fn regressor_gets_twenty_gaussian_buckets() {
        let lin = LinearRegressor {
            coef: vec![1.0],
            intercept: 0.0,
        };
        let svc = service_with(vec![RegisteredModel::new(
            "quali_only",
            Box::new(lin),
            None,
            Some(vec!["qualifying_position".to_string()]),
            Some(vec![vec![10.0]]),
            DataSource::Real,
        )]);

        let out = svc.predict_position(&request(), "quali_only").unwrap();
        assert_eq!(out.predicted_position, 3.0);
        assert_eq!(out.confidence_method, "heuristic");
        assert!((0.3..=0.95).contains(&out.confidence));
        let probs = out.predicted_rank_probs.unwrap();
        assert_eq!(probs.len(), 20);
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert_eq!(out.explanations.method, "kernel");
        assert!(out.explanations.degraded.is_none());
        assert_eq!(out.explanations.top_features[0].feature, "qualifying_position");
        assert!((out.explanations.top_features[0].contribution + 7.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_surfaces_not_found() {
        let svc = service_with(vec![]);
        assert!(matches!(
            svc.predict_position(&request(), "nope"),
            Err(Error::ModelNotFound(_))
        ));
    }

    #[test]
    fn positional_model_of_wrong_width_is_rejected() {
        let lin = LinearRegressor {
            coef: vec![1.0, 1.0],
            intercept: 0.0,
        };
        let svc = service_with(vec![RegisteredModel::new(
            "narrow",
            Box::new(lin),
            None,
            None,
            None,
            DataSource::Real,
        )]);
        assert!(matches!(
            svc.predict_position(&request(), "narrow"),
            Err(Error::FeatureLength { got: 10, expected: 2 })
        ));
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let fallback = crate::registry::synthesize_fallback(&FallbackConfig {
            rows: 100,
            n_trees: 3,
            max_depth: 3,
            ..FallbackConfig::default()
        })
        .unwrap();
        let svc = Arc::new(service_with(vec![fallback]));

        let mut reqs = Vec::new();
        for driver in 1..=4 {
            reqs.push(PredictionRequest {
                driver_id: driver,
                ..request()
            });
        }
        let single: Vec<f64> = reqs
            .iter()
            .map(|r| svc.predict_position(r, "position_predictor").unwrap().predicted_position)
            .collect();

        let results = svc
            .clone()
            .predict_batch(reqs, "position_predictor".into())
            .await
            .unwrap();
        assert_eq!(results.len(), 4);
        for (r, expected) in results.into_iter().zip(single) {
            assert_eq!(r.unwrap().predicted_position, expected);
        }
    }

    #[tokio::test]
    async fn oversized_batch_is_refused_whole() {
        let cfg = PipelineConfig {
            batch: BatchConfig { max_requests: 2 },
            ..PipelineConfig::default()
        };
        let registry = ModelRegistry::empty("unused");
        registry.insert(RegisteredModel::new(
            "lin",
            Box::new(LinearRegressor {
                coef: vec![1.0],
                intercept: 0.0,
            }),
            None,
            Some(vec!["qualifying_position".to_string()]),
            None,
            DataSource::Real,
        ));
        let engineer = FeatureEngineer::new(LookupTables::synthetic(), cfg.features.clone());
        let svc = Arc::new(PredictionService::new(registry, engineer, &cfg));

        let out = svc
            .clone()
            .predict_batch(vec![request(); 3], "lin".into())
            .await;
        assert!(matches!(out, Err(Error::BatchTooLarge { got: 3, limit: 2 })));
        let out = svc.predict_batch(vec![request(); 2], "lin".into()).await.unwrap();
        assert_eq!(out.len(), 2);
    }
}
