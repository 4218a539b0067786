use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct PredictionRequest {
    #[serde(rename = "raceId")]
    pub race_id: i64,
    #[serde(rename = "driverId")]
    pub driver_id: i64,
    #[serde(rename = "constructorId")]
    pub constructor_id: i64,
    // live aggregates (all optional; defaults come from FeatureDefaults):
    #[serde(default)]
    pub qualifying_position: Option<i32>,
    #[serde(default)]
    pub live_last_3_laps_mean_ms: Option<i64>,
    #[serde(default)]
    pub live_last_3_sector_deltas_ms: Option<Vec<i64>>,
    /// Named overrides applied on top of the engineered vector.
    #[serde(default)]
    pub precomputed_features: Option<HashMap<String, f64>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FeatureContribution {
    pub feature: String,
    pub contribution: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExplanationBlock {
    pub top_features: Vec<FeatureContribution>,
    /// "tree", "kernel" or "fallback"
    pub method: String,
    /// Set whenever the contributions are canned rather than computed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PredictionResponse {
    pub predicted_position: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_rank_probs: Option<Vec<f64>>,
    pub confidence: f64,
    pub confidence_method: String,
    pub explanations: ExplanationBlock,
}

/// Where a piece of serving state came from. `Synthetic` means the process
/// is running in demo mode for that component.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Real,
    Synthetic,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Real => "real",
            DataSource::Synthetic => "synthetic",
        }
    }
}
