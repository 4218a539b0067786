//! Race-outcome prediction: engineered features, model inference,
//! confidence, rank distribution and per-feature explanations.

pub mod config;
pub mod confidence;
pub mod error;
pub mod explain;
pub mod features;
pub mod model;
pub mod rank_probs;
pub mod registry;
pub mod scaler;
pub mod server;
pub mod service;
pub mod types;

pub use error::{Error, Result};
pub use features::{FeatureEngineer, FeatureVector, LookupTables};
pub use registry::{ModelRegistry, RegisteredModel};
pub use service::PredictionService;
pub use types::{DataSource, PredictionRequest, PredictionResponse};
