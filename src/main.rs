use anyhow::Context;
use race_predictor::{
    config::{AppConfig, PipelineConfig},
    server::{self, AppState},
    LookupTables, ModelRegistry, PredictionRequest, PredictionService,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "race_predictor=info,tower_http=info".into()),
        )
        .init();

    let app_cfg = AppConfig::from_env()?;
    let pipeline = match &app_cfg.pipeline_config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    let tables = LookupTables::load_or_synthetic(app_cfg.lookup_tables.as_deref());
    let registry = ModelRegistry::load(&app_cfg.models_dir, &pipeline.fallback);
    tracing::info!(
        "models loaded from {}: {:?} (source={})",
        app_cfg.models_dir.display(),
        registry.names(),
        registry.source().as_str()
    );
    if registry.get(&app_cfg.default_model).is_err() {
        tracing::warn!(
            "default model {} is not loaded; requests without ?model= will 404",
            app_cfg.default_model
        );
    }

    let engineer = race_predictor::FeatureEngineer::new(tables, pipeline.features.clone());
    let svc = Arc::new(PredictionService::new(registry, engineer, &pipeline).with_log_pred(app_cfg.log_pred));

    // Warmup so the first real request doesn't pay for lazy init
    if let Ok(entry) = svc.registry().get(&app_cfg.default_model) {
        let warm = PredictionRequest {
            race_id: 0,
            driver_id: 1,
            constructor_id: 1,
            ..Default::default()
        };
        svc.predict_position(&warm, &entry.name)
            .with_context(|| format!("warmup prediction on {}", entry.name))?;
        tracing::info!("warmup prediction ok");
    }

    let app = server::router(AppState {
        svc,
        default_model: app_cfg.default_model.as_str().into(),
    });

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], app_cfg.port));
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
