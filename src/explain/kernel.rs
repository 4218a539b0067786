use crate::error::Result;
use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Model-agnostic Shapley estimates by permutation sampling.
///
/// Each sample draws a feature ordering and a background row, then walks
/// the ordering switching features from the background value to the
/// explained value; the change in output at each step is credited to the
/// feature just switched.
#[derive(Debug, Clone)]
pub struct KernelExplainer {
    samples: usize,
    seed: u64,
}

impl KernelExplainer {
    pub fn new(samples: usize, seed: u64) -> Self {
        Self {
            samples: samples.max(1),
            seed,
        }
    }

    /// Mean model output over the background rows.
    pub fn expected_value<F>(&self, f: &F, background: &[Vec<f32>]) -> Result<f64>
    where
        F: Fn(&[f32]) -> Result<f64>,
    {
        let mut total = 0.0;
        for row in background {
            total += f(row)?;
        }
        Ok(total / background.len().max(1) as f64)
    }

    pub fn shap_values<F>(&self, f: &F, x: &[f32], background: &[Vec<f32>]) -> Result<Vec<f64>>
    where
        F: Fn(&[f32]) -> Result<f64>,
    {
        let d = x.len();
        let mut phi = vec![0.0; d];
        if background.is_empty() {
            return Ok(phi);
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut order: Vec<usize> = (0..d).collect();
        for _ in 0..self.samples {
            order.shuffle(&mut rng);
            let mut z = background[rng.random_range(0..background.len())].clone();
            let mut prev = f(&z)?;
            for &j in &order {
                z[j] = x[j];
                let cur = f(&z)?;
                phi[j] += cur - prev;
                prev = cur;
            }
        }

        let n = self.samples as f64;
        phi.iter_mut().for_each(|p| *p /= n);
        Ok(phi)
    }
}
