use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Per-feature standardization: `(x - mean) / scale`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Fits on row-major samples. Columns with zero variance get scale 1.
    pub fn fit(rows: &[Vec<f32>]) -> Result<Self> {
        let Some(first) = rows.first() else {
            return Err(Error::InvalidArtifact("cannot fit scaler on zero rows".into()));
        };
        let dim = first.len();
        let n = rows.len() as f64;

        let mut mean = vec![0.0; dim];
        for row in rows {
            if row.len() != dim {
                return Err(Error::FeatureLength {
                    got: row.len(),
                    expected: dim,
                });
            }
            for (m, x) in mean.iter_mut().zip(row) {
                *m += *x as f64;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut var = vec![0.0; dim];
        for row in rows {
            for ((v, x), m) in var.iter_mut().zip(row).zip(&mean) {
                let d = *x as f64 - m;
                *v += d * d;
            }
        }
        let scale = var
            .into_iter()
            .map(|v| {
                let sd = (v / n).sqrt();
                if sd > 0.0 {
                    sd
                } else {
                    1.0
                }
            })
            .collect();

        Ok(Self { mean, scale })
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, x: &[f32]) -> Result<Vec<f32>> {
        if x.len() != self.mean.len() || self.scale.len() != self.mean.len() {
            return Err(Error::FeatureLength {
                got: x.len(),
                expected: self.mean.len(),
            });
        }
        Ok(x.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| {
                let s = if *s == 0.0 { 1.0 } else { *s };
                ((*v as f64 - m) / s) as f32
            })
            .collect())
    }
}
