use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {} not readable", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config file {} is not valid JSON", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {key}: {value}")]
    Env { key: &'static str, value: String },
}

/// Process-level settings, read from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub models_dir: PathBuf,
    pub default_model: String,
    pub lookup_tables: Option<PathBuf>,
    pub pipeline_config: Option<PathBuf>,
    pub log_pred: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match std::env::var("PORT") {
            Ok(s) => s.parse().map_err(|_| ConfigError::Env { key: "PORT", value: s })?,
            Err(_) => 8000,
        };

        Ok(Self {
            port,
            models_dir: std::env::var("MODELS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("models/saved")),
            default_model: std::env::var("DEFAULT_MODEL")
                .unwrap_or_else(|_| "position_predictor".to_string()),
            lookup_tables: std::env::var("LOOKUP_TABLES").ok().map(PathBuf::from),
            pipeline_config: std::env::var("PIPELINE_CONFIG").ok().map(PathBuf::from),
            log_pred: std::env::var("LOG_PRED").ok().as_deref() == Some("1"),
        })
    }
}

/// Substitutes used when a request leaves a telemetry field empty.
///
/// These are placeholders, not values derived from data.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct FeatureDefaults {
    pub qualifying_position: f32,
    pub last_3_laps_mean_ms: f32,
    pub sector_delta_ms: f32,
    pub driver_experience: f32,
    pub constructor_form: f32,
}

impl Default for FeatureDefaults {
    fn default() -> Self {
        Self {
            qualifying_position: 10.0,
            last_3_laps_mean_ms: 90_000.0,
            sector_delta_ms: 0.0,
            driver_experience: 5.0,
            constructor_form: 6.0,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ConfidenceConfig {
    pub heuristic_center: f64,
    pub heuristic_sd: f64,
    pub min: f64,
    pub max: f64,
    /// Member-prediction std (in positions) at which spread confidence hits zero.
    pub spread_normalizer: f64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            heuristic_center: 0.75,
            heuristic_sd: 0.1,
            min: 0.3,
            max: 0.95,
            spread_normalizer: 5.0,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RankConfig {
    pub buckets: usize,
    pub spread: f64,
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            buckets: 20,
            spread: 2.0,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ExplainConfig {
    pub kernel_samples: usize,
    pub seed: u64,
    /// Keep only the strongest contributions; `None` returns every feature.
    pub top_k: Option<usize>,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            kernel_samples: 64,
            seed: 7,
            top_k: None,
        }
    }
}

/// Shape of the forest synthesized when no artifacts load.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct FallbackConfig {
    pub rows: usize,
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub background_rows: usize,
    pub seed: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            rows: 1000,
            n_trees: 30,
            max_depth: 8,
            min_samples_leaf: 2,
            background_rows: 50,
            seed: 42,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct BatchConfig {
    /// Largest request list `/predict/batch` accepts.
    pub max_requests: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_requests: 256 }
    }
}

/// Tunables for the prediction pipeline. Every field has a default, so an
/// empty JSON object is a valid config.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub features: FeatureDefaults,
    pub confidence: ConfidenceConfig,
    pub rank: RankConfig,
    pub explain: ExplainConfig,
    pub fallback: FallbackConfig,
    pub batch: BatchConfig,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.features.qualifying_position, 10.0);
        assert_eq!(cfg.features.last_3_laps_mean_ms, 90_000.0);
        assert_eq!(cfg.rank.buckets, 20);
        assert_eq!(cfg.confidence.min, 0.3);
        assert_eq!(cfg.batch.max_requests, 256);
    }

    #[test]
    fn partial_override() {
        let cfg: PipelineConfig =
            serde_json::from_str(r#"{"rank": {"spread": 3.5}, "explain": {"top_k": 5}}"#).unwrap();
        assert_eq!(cfg.rank.spread, 3.5);
        assert_eq!(cfg.rank.buckets, 20);
        assert_eq!(cfg.explain.top_k, Some(5));
    }
}
