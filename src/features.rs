use crate::{
    config::FeatureDefaults,
    error::{Error, Result},
    types::{DataSource, PredictionRequest},
};
use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path};

pub const FEATURE_NAMES: [&str; 10] = [
    "race_id",
    "driver_id",
    "constructor_id",
    "qualifying_position",
    "last_3_laps_mean",
    "sector_delta_1",
    "sector_delta_2",
    "sector_delta_3",
    "driver_experience",
    "constructor_form",
];

/// Ordered feature values paired with the names they belong to.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    names: Vec<String>,
    values: Vec<f32>,
}

impl FeatureVector {
    pub fn new(names: Vec<String>, values: Vec<f32>) -> Result<Self> {
        if names.len() != values.len() {
            return Err(Error::FeatureLength {
                got: values.len(),
                expected: names.len(),
            });
        }
        Ok(Self { names, values })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Rejects NaN and infinite entries.
    pub fn validate(&self) -> Result<()> {
        match self.values.iter().position(|v| !v.is_finite()) {
            Some(index) => Err(Error::NonFiniteFeature {
                index,
                name: self.names[index].clone(),
            }),
            None => Ok(()),
        }
    }

    /// Re-order into `order`. Names this vector does not carry become 0.0.
    pub fn align_to(&self, order: &[String]) -> FeatureVector {
        let by_name: HashMap<&str, f32> = self
            .names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
            .collect();
        let mut v = Vec::with_capacity(order.len());
        for k in order {
            v.push(*by_name.get(k.as_str()).unwrap_or(&0.0));
        }
        FeatureVector {
            names: order.to_vec(),
            values: v,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
struct LookupFile {
    #[serde(default)]
    driver_experience: HashMap<i64, f32>,
    #[serde(default)]
    constructor_form: HashMap<i64, f32>,
}

/// Static per-driver and per-constructor scores used as derived features.
#[derive(Debug, Clone)]
pub struct LookupTables {
    driver_experience: HashMap<i64, f32>,
    constructor_form: HashMap<i64, f32>,
    source: DataSource,
}

impl LookupTables {
    /// Small built-in tables for demo mode.
    pub fn synthetic() -> Self {
        Self {
            driver_experience: HashMap::from([(1, 8.5), (2, 9.8), (3, 7.2), (4, 6.1), (5, 6.8)]),
            constructor_form: HashMap::from([(1, 9.2), (2, 7.8), (3, 8.1), (4, 7.5)]),
            source: DataSource::Synthetic,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let file: LookupFile = serde_json::from_str(&data).map_err(|e| Error::json(path, e))?;
        Ok(Self {
            driver_experience: file.driver_experience,
            constructor_form: file.constructor_form,
            source: DataSource::Real,
        })
    }

    /// Loads `path` when given, otherwise (or on failure) the synthetic tables.
    pub fn load_or_synthetic(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            tracing::warn!("no lookup tables configured; using synthetic tables");
            return Self::synthetic();
        };
        match Self::load(path) {
            Ok(t) => {
                tracing::info!(
                    "loaded lookup tables from {}: {} drivers, {} constructors",
                    path.display(),
                    t.driver_experience.len(),
                    t.constructor_form.len()
                );
                t
            }
            Err(e) => {
                tracing::warn!("lookup tables unavailable ({}); using synthetic tables", e);
                Self::synthetic()
            }
        }
    }

    pub fn source(&self) -> DataSource {
        self.source
    }

    pub fn driver_experience(&self, driver_id: i64) -> Option<f32> {
        self.driver_experience.get(&driver_id).copied()
    }

    pub fn constructor_form(&self, constructor_id: i64) -> Option<f32> {
        self.constructor_form.get(&constructor_id).copied()
    }
}

/// Turns a request into the fixed-order vector the position models consume.
#[derive(Debug, Clone)]
pub struct FeatureEngineer {
    tables: LookupTables,
    defaults: FeatureDefaults,
}

impl FeatureEngineer {
    pub fn new(tables: LookupTables, defaults: FeatureDefaults) -> Self {
        Self { tables, defaults }
    }

    pub fn feature_names() -> Vec<String> {
        FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
    }

    pub fn tables(&self) -> &LookupTables {
        &self.tables
    }

    pub fn build(&self, req: &PredictionRequest) -> Result<FeatureVector> {
        let d = &self.defaults;
        let sector = |i: usize| -> f32 {
            req.live_last_3_sector_deltas_ms
                .as_ref()
                .and_then(|s| s.get(i))
                .map(|v| *v as f32)
                .unwrap_or(d.sector_delta_ms)
        };

        let mut values = vec![
            req.race_id as f32,
            req.driver_id as f32,
            req.constructor_id as f32,
            req.qualifying_position
                .map(|q| q as f32)
                .unwrap_or(d.qualifying_position),
            req.live_last_3_laps_mean_ms
                .map(|ms| ms as f32)
                .unwrap_or(d.last_3_laps_mean_ms),
            sector(0),
            sector(1),
            sector(2),
            self.tables
                .driver_experience(req.driver_id)
                .unwrap_or(d.driver_experience),
            self.tables
                .constructor_form(req.constructor_id)
                .unwrap_or(d.constructor_form),
        ];

        if let Some(overrides) = &req.precomputed_features {
            for (i, name) in FEATURE_NAMES.iter().enumerate() {
                if let Some(v) = overrides.get(*name) {
                    values[i] = *v as f32;
                }
            }
        }

        let fv = FeatureVector::new(Self::feature_names(), values)?;
        fv.validate()?;
        Ok(fv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engineer() -> FeatureEngineer {
        FeatureEngineer::new(LookupTables::synthetic(), FeatureDefaults::default())
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
    fn qualifying_position_lands_in_fourth_slot() {
        let fv = engineer().build(&request()).unwrap();
        assert_eq!(fv.len(), FeatureEngineer::feature_names().len());
        assert_eq!(fv.values()[3], 3.0);
        assert_eq!(fv.values()[8], 8.5);
        assert_eq!(fv.values()[9], 9.2);
    }

    #[test]
    fn missing_inputs_use_defaults() {
        let mut req = request();
        req.qualifying_position = None;
        req.driver_id = 99;
        req.constructor_id = 99;
        let fv = engineer().build(&req).unwrap();
        assert_eq!(fv.values()[3], 10.0);
        assert_eq!(fv.values()[4], 90_000.0);
        assert_eq!(&fv.values()[5..8], &[0.0, 0.0, 0.0]);
        assert_eq!(fv.values()[8], 5.0);
        assert_eq!(fv.values()[9], 6.0);
    }

    #[test]
    fn short_sector_list_pads_with_default() {
        let mut req = request();
        req.live_last_3_sector_deltas_ms = Some(vec![120, -40]);
        let fv = engineer().build(&req).unwrap();
        assert_eq!(&fv.values()[5..8], &[120.0, -40.0, 0.0]);
    }

    #[test]
    fn build_is_deterministic() {
        let e = engineer();
        let mut req = request();
        req.live_last_3_laps_mean_ms = Some(78_432);
        req.live_last_3_sector_deltas_ms = Some(vec![10, 20, 30]);
        assert_eq!(e.build(&req).unwrap(), e.build(&req).unwrap());
    }

    #[test]
    fn precomputed_overrides_by_name() {
        let mut req = request();
        req.precomputed_features = Some(HashMap::from([
            ("driver_experience".to_string(), 1.5),
            ("not_a_feature".to_string(), 42.0),
        ]));
        let fv = engineer().build(&req).unwrap();
        assert_eq!(fv.values()[8], 1.5);
        assert_eq!(fv.len(), 10);
    }

    #[test]
    fn non_finite_override_is_rejected() {
        let mut req = request();
        req.precomputed_features =
            Some(HashMap::from([("sector_delta_2".to_string(), f64::NAN)]));
        match engineer().build(&req) {
            Err(Error::NonFiniteFeature { index, name }) => {
                assert_eq!(index, 6);
                assert_eq!(name, "sector_delta_2");
            }
            other => panic!("expected NonFiniteFeature, got {:?}", other),
        }
    }

    #[test]
    fn align_reorders_and_zero_fills() {
        let fv = engineer().build(&request()).unwrap();
        let order = vec![
            "qualifying_position".to_string(),
            "grid".to_string(),
            "race_id".to_string(),
        ];
        let aligned = fv.align_to(&order);
        assert_eq!(aligned.values(), &[3.0, 0.0, 1050.0]);
        assert_eq!(aligned.names(), order.as_slice());
    }

    #[test]
    fn lookup_file_marks_real_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lookup.json");
        fs::write(
            &path,
            r#"{"driver_experience": {"44": 9.9}, "constructor_form": {"6": 7.0}}"#,
        )
        .unwrap();
        let t = LookupTables::load_or_synthetic(Some(&path));
        assert_eq!(t.source(), DataSource::Real);
        assert_eq!(t.driver_experience(44), Some(9.9));
        assert_eq!(t.driver_experience(1), None);

        let missing = LookupTables::load_or_synthetic(Some(&dir.path().join("nope.json")));
        assert_eq!(missing.source(), DataSource::Synthetic);
    }
}
