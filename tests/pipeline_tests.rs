/// End-to-end tests for the prediction pipeline
///
/// Run with: cargo test --test pipeline_tests -- --nocapture

use race_predictor::{
    config::{FallbackConfig, PipelineConfig},
    model::{LinearRegressor, ModelArtifact},
    scaler::StandardScaler,
    DataSource, Error, FeatureEngineer, LookupTables, ModelRegistry, PredictionRequest,
    PredictionService,
};
use std::{collections::HashMap, fs};

fn small_pipeline() -> PipelineConfig {
    PipelineConfig {
        fallback: FallbackConfig {
            rows: 200,
            n_trees: 6,
            max_depth: 5,
            background_rows: 12,
            ..FallbackConfig::default()
        },
        ..PipelineConfig::default()
    }
}

fn service(dir: &std::path::Path) -> PredictionService {
    let cfg = small_pipeline();
    let registry = ModelRegistry::load(dir, &cfg.fallback);
    let engineer = FeatureEngineer::new(LookupTables::synthetic(), cfg.features.clone());
    PredictionService::new(registry, engineer, &cfg)
}

fn example_request() -> PredictionRequest {
    PredictionRequest {
        race_id: 1050,
        driver_id: 1,
        constructor_id: 1,
        qualifying_position: Some(3),
        live_last_3_laps_mean_ms: Some(91_250),
        live_last_3_sector_deltas_ms: Some(vec![-120, 40, 15]),
        precomputed_features: None,
    }
}

#[test]
fn test_example_request_through_fallback_model() {
    println!("\n=== Test: Example Request Through Fallback Model ===");
    let dir = tempfile::tempdir().unwrap();
    let svc = service(dir.path());
    assert_eq!(svc.registry().source(), DataSource::Synthetic);
    println!("✓ Empty models dir -> synthetic position_predictor");

    let fv = svc.engineer().build(&example_request()).unwrap();
    assert_eq!(fv.len(), FeatureEngineer::feature_names().len());
    assert_eq!(fv.values()[3], 3.0);
    println!("  feature vector: {:?}", fv.values());

    let out = svc
        .predict_position(&example_request(), "position_predictor")
        .unwrap();
    println!(
        "  predicted_position={:.3} confidence={:.3} ({})",
        out.predicted_position, out.confidence, out.confidence_method
    );

    let probs = out.predicted_rank_probs.as_ref().unwrap();
    assert_eq!(probs.len(), 20);
    assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    println!("✓ 20 rank probabilities summing to 1");

    assert!((0.3..=0.95).contains(&out.confidence));
    assert_eq!(out.confidence_method, "ensemble_spread");
    println!("✓ Confidence within bounds");

    assert_eq!(out.explanations.method, "tree");
    assert!(out.explanations.degraded.is_none());
    assert_eq!(out.explanations.top_features.len(), 10);
    for w in out.explanations.top_features.windows(2) {
        assert!(w[0].contribution.abs() >= w[1].contribution.abs());
    }
    println!(
        "  top feature: {} ({:+.3})",
        out.explanations.top_features[0].feature, out.explanations.top_features[0].contribution
    );
    println!("✓ All assertions passed");
}

#[test]
fn test_defaults_and_overrides() {
    println!("\n=== Test: Defaults And Overrides ===");
    let engineer = FeatureEngineer::new(LookupTables::synthetic(), Default::default());

    let bare = PredictionRequest {
        race_id: 1,
        driver_id: 99,
        constructor_id: 99,
        ..Default::default()
    };
    let fv = engineer.build(&bare).unwrap();
    assert_eq!(fv.values()[3], 10.0);
    assert_eq!(fv.values()[4], 90_000.0);
    println!("✓ Missing telemetry filled with defaults");

    let mut overrides = HashMap::new();
    overrides.insert("constructor_form".to_string(), 9.9);
    let with = PredictionRequest {
        precomputed_features: Some(overrides),
        ..bare.clone()
    };
    let fv2 = engineer.build(&with).unwrap();
    assert!((fv2.values()[9] - 9.9).abs() < 1e-6);
    assert_eq!(engineer.build(&bare).unwrap().values(), fv.values());
    println!("✓ Overrides applied by name; construction deterministic");
}

#[test]
fn test_unknown_model_is_not_found() {
    println!("\n=== Test: Unknown Model ===");
    let dir = tempfile::tempdir().unwrap();
    let svc = service(dir.path());
    match svc.predict_position(&example_request(), "podium_classifier") {
        Err(Error::ModelNotFound(name)) => {
            assert_eq!(name, "podium_classifier");
            println!("✓ ModelNotFound({})", name);
        }
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("prediction should fail for an unknown model"),
    }
}

#[test]
fn test_saved_model_serves_with_kernel_explanations() {
    println!("\n=== Test: Saved Model Serves With Kernel Explanations ===");
    let dir = tempfile::tempdir().unwrap();
    let names = vec!["qualifying_position".to_string(), "constructor_form".to_string()];

    let writer = ModelRegistry::empty(dir.path());
    writer
        .save_model(
            "quali_linear",
            ModelArtifact::Linear(LinearRegressor {
                coef: vec![1.0, -0.5],
                intercept: 0.0,
            }),
            Some(StandardScaler {
                mean: vec![0.0, 0.0],
                scale: vec![1.0, 1.0],
            }),
            Some(names),
        )
        .unwrap();
    fs::write(
        dir.path().join("quali_linear_background.json"),
        "[[10.0, 6.0], [12.0, 8.0]]",
    )
    .unwrap();
    println!("✓ Artifact, scaler, features and background written");

    let svc = service(dir.path());
    assert_eq!(svc.registry().names(), vec!["quali_linear".to_string()]);
    assert_eq!(svc.registry().source(), DataSource::Real);

    let out = svc.predict_position(&example_request(), "quali_linear").unwrap();
    // qualifying 3, constructor 1 form 9.2
    assert!((out.predicted_position - (3.0 - 4.6)).abs() < 1e-5);
    assert_eq!(out.confidence_method, "heuristic");
    assert_eq!(out.explanations.method, "kernel");
    assert_eq!(out.explanations.top_features.len(), 2);
    println!(
        "  predicted={:.3} explanations={:?}",
        out.predicted_position, out.explanations.top_features
    );
    println!("✓ All assertions passed");
}

#[test]
fn test_missing_background_is_flagged_degraded() {
    println!("\n=== Test: Missing Background Is Flagged ===");
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("bare.json"),
        r#"{"type": "linear", "coef": [0.1, 0.1, 0.1, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0], "intercept": 0.0}"#,
    )
    .unwrap();

    let svc = service(dir.path());
    let out = svc.predict_position(&example_request(), "bare").unwrap();
    assert_eq!(out.explanations.method, "fallback");
    let reason = out.explanations.degraded.unwrap();
    assert!(reason.contains("background"));
    assert_eq!(out.explanations.top_features[0].feature, "qualifying_position");
    println!("✓ Canned explanation returned with reason: {}", reason);
}
