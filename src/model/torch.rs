use super::{check_len, ModelKind, Regressor};
use crate::error::{Error, Result};
use anyhow::{bail, Context};
use parking_lot::Mutex;
use serde::Deserialize;
use std::{fs, path::Path};
use tch::{kind::Kind, CModule, Device, Tensor};

#[derive(Deserialize)]
struct MetaJson {
    feat_list: Vec<String>,
    in_dim: Option<usize>,
}

/// TorchScript module producing one position estimate per row.
pub struct TorchRegressor {
    model: Mutex<CModule>,
    device: Device,
    in_dim: usize,
    pub feat_list: Vec<String>,
}

impl TorchRegressor {
    pub fn load(model_path: &Path, meta_path: &Path) -> anyhow::Result<Self> {
        let device = Device::Cpu;

        // meta.json carries feature ordering and input dim
        let meta_txt = fs::read_to_string(meta_path)
            .with_context(|| format!("failed to read meta at {}", meta_path.display()))?;
        let meta: MetaJson =
            serde_json::from_str(&meta_txt).with_context(|| "failed to parse meta json")?;
        let in_dim = meta.in_dim.unwrap_or(meta.feat_list.len());
        if in_dim != meta.feat_list.len() {
            tracing::warn!(
                "meta.in_dim ({}) != feat_list.len() ({}) for {}",
                in_dim,
                meta.feat_list.len(),
                model_path.display()
            );
        }

        let model = CModule::load_on_device(model_path, device)
            .with_context(|| format!("failed to load TorchScript {}", model_path.display()))?;

        // Probe with a dummy forward: expect a single scalar per row
        let dummy = Tensor::zeros([1, in_dim as i64], (Kind::Float, device));
        let t = model.forward_ts(&[dummy])?;
        let numel: i64 = t.size().iter().product();
        if numel != 1 {
            bail!("unexpected model output size: {:?}", t.size());
        }

        Ok(Self {
            model: Mutex::new(model),
            device,
            in_dim,
            feat_list: meta.feat_list,
        })
    }
}

impl Regressor for TorchRegressor {
    fn kind(&self) -> ModelKind {
        ModelKind::TorchScript
    }

    fn n_features(&self) -> Option<usize> {
        Some(self.in_dim)
    }

    fn predict(&self, x: &[f32]) -> Result<f64> {
        check_len(x, self.in_dim)?;
        let input = Tensor::from_slice(x)
            .reshape([1, self.in_dim as i64])
            .to_device(self.device);
        let out = self
            .model
            .lock()
            .forward_ts(&[input])
            .map_err(|e| Error::Torch(e.to_string()))?;
        Ok(out.flatten(0, -1).double_value(&[0]))
    }
}
