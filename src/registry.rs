use crate::{
    config::FallbackConfig,
    error::{Error, Result},
    features::{FeatureEngineer, FeatureVector},
    model::{fit_forest, ForestParams, ModelArtifact, Regressor},
    scaler::StandardScaler,
    types::DataSource,
};
use parking_lot::RwLock;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

pub const FALLBACK_MODEL: &str = "position_predictor";

const COMPANION_SUFFIXES: [&str; 4] = ["_scaler", "_features", "_background", "_meta"];

#[derive(Debug, Clone, Serialize)]
pub struct ModelMetadata {
    pub created_ms: i64,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub loaded: bool,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub features: usize,
    pub has_scaler: bool,
    pub has_background: bool,
    pub source: DataSource,
    pub metadata: ModelMetadata,
}

/// A model plus the companions it was saved with.
pub struct RegisteredModel {
    pub name: String,
    pub model: Box<dyn Regressor>,
    pub scaler: Option<StandardScaler>,
    feature_names: Option<Vec<String>>,
    /// Reference rows in unscaled feature space.
    pub background: Option<Vec<Vec<f32>>>,
    pub source: DataSource,
    pub metadata: ModelMetadata,
}

impl RegisteredModel {
    pub fn new(
        name: impl Into<String>,
        model: Box<dyn Regressor>,
        scaler: Option<StandardScaler>,
        feature_names: Option<Vec<String>>,
        background: Option<Vec<Vec<f32>>>,
        source: DataSource,
    ) -> Self {
        let name = name.into();
        let width = model
            .n_features()
            .or_else(|| scaler.as_ref().map(StandardScaler::dim));

        let scaler = scaler.filter(|s| {
            let ok = width.map_or(true, |w| s.dim() == w);
            if !ok {
                tracing::warn!("{}: scaler width {} does not match model; ignoring scaler", name, s.dim());
            }
            ok
        });
        let feature_names = feature_names.filter(|f| {
            let ok = width.map_or(true, |w| f.len() == w);
            if !ok {
                tracing::warn!("{}: {} feature names for a {:?}-wide model; using generic names", name, f.len(), width);
            }
            ok
        });
        let background = background.filter(|rows| {
            let ok = !rows.is_empty() && width.map_or(true, |w| rows.iter().all(|r| r.len() == w));
            if !ok {
                tracing::warn!("{}: background rows unusable; sampling explanations disabled", name);
            }
            ok
        });

        Self {
            name,
            model,
            scaler,
            feature_names,
            background,
            source,
            metadata: ModelMetadata {
                created_ms: now_ms(),
                target: "finishing_position".to_string(),
                artifact: None,
            },
        }
    }

    pub fn has_declared_names(&self) -> bool {
        self.feature_names.is_some()
    }

    /// Declared names, or `feature_{i}` when the artifact shipped none.
    pub fn feature_names(&self) -> Vec<String> {
        if let Some(names) = &self.feature_names {
            return names.clone();
        }
        let width = self
            .model
            .n_features()
            .or_else(|| self.scaler.as_ref().map(StandardScaler::dim))
            .unwrap_or(0);
        (0..width).map(|i| format!("feature_{}", i)).collect()
    }

    /// Unscaled model input for `fv`: re-ordered by name when the model
    /// declares names, positional otherwise.
    pub fn raw_input(&self, fv: &FeatureVector) -> Result<Vec<f32>> {
        match &self.feature_names {
            Some(names) => Ok(fv.align_to(names).values().to_vec()),
            None => {
                if let Some(w) = self.model.n_features() {
                    if w != fv.len() {
                        return Err(Error::FeatureLength {
                            got: fv.len(),
                            expected: w,
                        });
                    }
                }
                Ok(fv.values().to_vec())
            }
        }
    }

    pub fn scale(&self, raw: &[f32]) -> Result<Vec<f32>> {
        match &self.scaler {
            Some(s) => s.transform(raw),
            None => Ok(raw.to_vec()),
        }
    }

    /// Scale then predict, for callers that already hold a raw input row.
    pub fn predict_raw(&self, raw: &[f32]) -> Result<f64> {
        self.model.predict(&self.scale(raw)?)
    }

    pub fn predict(&self, fv: &FeatureVector) -> Result<f64> {
        self.predict_raw(&self.raw_input(fv)?)
    }

    pub fn status(&self) -> ModelStatus {
        ModelStatus {
            loaded: true,
            kind: self.model.kind().as_str(),
            features: self.feature_names().len(),
            has_scaler: self.scaler.is_some(),
            has_background: self.background.is_some(),
            source: self.source,
            metadata: self.metadata.clone(),
        }
    }
}

/// Named models loaded once at start-up. Entries are immutable; `save_model`
/// swaps an entry while readers keep the `Arc` they already hold.
pub struct ModelRegistry {
    dir: PathBuf,
    models: RwLock<BTreeMap<String, Arc<RegisteredModel>>>,
}

impl ModelRegistry {
    pub fn empty(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            models: RwLock::new(BTreeMap::new()),
        }
    }

    /// Loads every artifact under `dir`. Falls back to a synthetic forest
    /// when nothing loads; load failures are logged, never returned.
    pub fn load(dir: &Path, fallback: &FallbackConfig) -> Self {
        let registry = Self::empty(dir);

        match fs::read_dir(dir) {
            Ok(entries) => {
                let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
                paths.sort();
                for path in paths {
                    let Some(name) = model_name(&path) else { continue };
                    match registry.load_artifact(&name, &path) {
                        Ok(entry) => {
                            tracing::info!(
                                "loaded model {} ({}, {} features, scaler={})",
                                name,
                                entry.model.kind().as_str(),
                                entry.feature_names().len(),
                                entry.scaler.is_some()
                            );
                            registry.insert(entry);
                        }
                        Err(e) => tracing::error!("skipping model {}: {:#}", name, anyhow::Error::from(e)),
                    }
                }
            }
            Err(e) => tracing::warn!("models directory {} not readable: {}", dir.display(), e),
        }

        if registry.is_empty() {
            tracing::warn!("no model artifacts loaded; synthesizing {}", FALLBACK_MODEL);
            match synthesize_fallback(fallback) {
                Ok(entry) => registry.insert(entry),
                Err(e) => tracing::error!("failed to synthesize fallback model: {}", e),
            }
        }
        registry
    }

    fn load_artifact(&self, name: &str, path: &Path) -> Result<RegisteredModel> {
        #[cfg(feature = "torch")]
        if path.extension().and_then(|e| e.to_str()) == Some("pt") {
            return self.load_torch(name, path);
        }

        let artifact: ModelArtifact = read_json(path)?;
        let mut entry = RegisteredModel::new(
            name,
            artifact.into_regressor()?,
            self.companion(name, "scaler"),
            self.companion(name, "features"),
            self.companion(name, "background"),
            DataSource::Real,
        );
        entry.metadata.artifact = Some(path.to_path_buf());
        Ok(entry)
    }

    #[cfg(feature = "torch")]
    fn load_torch(&self, name: &str, path: &Path) -> Result<RegisteredModel> {
        let meta = self.dir.join(format!("{}_meta.json", name));
        let model = crate::model::TorchRegressor::load(path, &meta)
            .map_err(|e| Error::Torch(format!("{:#}", e)))?;
        let names = self
            .companion::<Vec<String>>(name, "features")
            .or_else(|| Some(model.feat_list.clone()));
        let mut entry = RegisteredModel::new(
            name,
            Box::new(model),
            self.companion(name, "scaler"),
            names,
            self.companion(name, "background"),
            DataSource::Real,
        );
        entry.metadata.artifact = Some(path.to_path_buf());
        Ok(entry)
    }

    /// Reads `<name>_<suffix>.json`; absence or a bad file means "no companion".
    fn companion<T: DeserializeOwned>(&self, name: &str, suffix: &str) -> Option<T> {
        let path = self.dir.join(format!("{}_{}.json", name, suffix));
        if !path.exists() {
            tracing::debug!("{}: no {} file", name, suffix);
            return None;
        }
        match read_json(&path) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("{}: ignoring {}: {:#}", name, suffix, anyhow::Error::from(e));
                None
            }
        }
    }

    pub fn insert(&self, entry: RegisteredModel) {
        self.models.write().insert(entry.name.clone(), Arc::new(entry));
    }

    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.models.read().keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Result<Arc<RegisteredModel>> {
        self.models
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ModelNotFound(name.to_string()))
    }

    pub fn predict(&self, name: &str, fv: &FeatureVector) -> Result<f64> {
        self.get(name)?.predict(fv)
    }

    pub fn status(&self) -> BTreeMap<String, ModelStatus> {
        self.models
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.status()))
            .collect()
    }

    /// `Real` only when every loaded model came from an artifact.
    pub fn source(&self) -> DataSource {
        let models = self.models.read();
        if !models.is_empty() && models.values().all(|m| m.source == DataSource::Real) {
            DataSource::Real
        } else {
            DataSource::Synthetic
        }
    }

    /// Persists `artifact` and its companions under the registry directory
    /// and replaces the in-memory entry. A `None` companion removes any file
    /// left by an earlier save, so a reload serves what memory serves.
    pub fn save_model(
        &self,
        name: &str,
        artifact: ModelArtifact,
        scaler: Option<StandardScaler>,
        feature_names: Option<Vec<String>>,
    ) -> Result<()> {
        if let Some(suffix) = COMPANION_SUFFIXES.iter().find(|s| name.ends_with(*s)) {
            return Err(Error::InvalidModelName(format!(
                "{} ends with reserved suffix {}",
                name, suffix
            )));
        }
        // nothing touches disk until the artifact is known to load
        let model = artifact.clone().into_regressor()?;
        fs::create_dir_all(&self.dir).map_err(|e| Error::io(&self.dir, e))?;

        self.sync_companion(name, "scaler", scaler.as_ref())?;
        self.sync_companion(name, "features", feature_names.as_ref())?;
        let model_path = self.dir.join(format!("{}.json", name));
        write_json(&model_path, &artifact)?;

        let background = self.get(name).ok().and_then(|old| old.background.clone());
        let mut entry = RegisteredModel::new(
            name,
            model,
            scaler,
            feature_names,
            background,
            DataSource::Real,
        );
        entry.metadata.artifact = Some(model_path);
        self.insert(entry);
        tracing::info!("saved model {}", name);
        Ok(())
    }

    fn sync_companion<T: Serialize>(&self, name: &str, suffix: &str, value: Option<&T>) -> Result<()> {
        let path = self.dir.join(format!("{}_{}.json", name, suffix));
        match value {
            Some(v) => write_json(&path, v),
            None => match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::info!("{}: removed stale {} file", name, suffix);
                    Ok(())
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(Error::io(&path, e)),
            },
        }
    }
}

/// Model name for an artifact path, or `None` for companions and other files.
/// A suffixed stem is a companion only when its base artifact is present.
fn model_name(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?;
    let accepted = ext == "json" || (cfg!(feature = "torch") && ext == "pt");
    if !accepted {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let is_companion = COMPANION_SUFFIXES
        .iter()
        .filter_map(|s| stem.strip_suffix(s))
        .any(|base| has_artifact(dir, base));
    if is_companion {
        return None;
    }
    Some(stem.to_string())
}

fn has_artifact(dir: &Path, name: &str) -> bool {
    dir.join(format!("{}.json", name)).is_file()
        || (cfg!(feature = "torch") && dir.join(format!("{}.pt", name)).is_file())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    serde_json::from_str(&data).map_err(|e| Error::json(path, e))
}

/// Writes beside the target then renames, so readers never see half a file.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_string_pretty(value).map_err(|e| Error::json(path, e))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, data).map_err(|e| Error::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| Error::io(path, e))
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Random forest fit on standard-normal rows against uniform positions.
/// Only meaningful as a demo stand-in.
pub fn synthesize_fallback(cfg: &FallbackConfig) -> Result<RegisteredModel> {
    let names = FeatureEngineer::feature_names();
    let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);

    let x: Vec<Vec<f32>> = (0..cfg.rows.max(1))
        .map(|_| {
            (0..names.len())
                .map(|_| rng.sample::<f32, _>(StandardNormal))
                .collect()
        })
        .collect();
    let y: Vec<f64> = x.iter().map(|_| rng.random_range(1..=20) as f64).collect();

    let scaler = StandardScaler::fit(&x)?;
    let scaled: Vec<Vec<f32>> = x.iter().map(|r| scaler.transform(r)).collect::<Result<_>>()?;
    let forest = fit_forest(
        &scaled,
        &y,
        &ForestParams {
            n_trees: cfg.n_trees,
            max_depth: cfg.max_depth,
            min_samples_leaf: cfg.min_samples_leaf,
            seed: cfg.seed,
        },
    )?;

    let background = x.iter().take(cfg.background_rows).cloned().collect();
    Ok(RegisteredModel::new(
        FALLBACK_MODEL,
        Box::new(forest),
        Some(scaler),
        Some(names),
        Some(background),
        DataSource::Synthetic,
    ))
}
