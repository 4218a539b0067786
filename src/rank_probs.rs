use crate::config::RankConfig;

/// Probability for finishing positions `1..=buckets`, built as a Gaussian
/// bump of width `spread` around the point prediction. Not calibrated.
pub fn gaussian_rank_probs(prediction: f64, cfg: &RankConfig) -> Vec<f64> {
    let spread = if cfg.spread > 0.0 { cfg.spread } else { 1.0 };
    let log_w: Vec<f64> = (0..cfg.buckets)
        .map(|i| {
            let z = (i as f64 + 1.0 - prediction) / spread;
            -0.5 * z * z
        })
        .collect();
    // shift by the max so a prediction far outside 1..=buckets cannot
    // underflow every weight to zero
    let max = log_w.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut probs: Vec<f64> = log_w.iter().map(|w| (w - max).exp()).collect();
    normalize(&mut probs);
    probs
}

/// Native class distribution, renormalized so it sums to one.
pub fn from_class_probs(mut probs: Vec<f64>) -> Vec<f64> {
    normalize(&mut probs);
    probs
}

fn normalize(probs: &mut [f64]) {
    let total: f64 = probs.iter().sum();
    if total > 0.0 && total.is_finite() {
        probs.iter_mut().for_each(|p| *p /= total);
    } else if !probs.is_empty() {
        let uniform = 1.0 / probs.len() as f64;
        probs.iter_mut().for_each(|p| *p = uniform);
    }
}
