//! Exact path-dependent TreeSHAP (Lundberg et al., "Consistent
//! Individualized Feature Attribution for Tree Ensembles", algorithm 2).
//!
//! Missing features are integrated out using node covers, so
//! `expected_value() + sum(phi) == predict(x)` for every input.

use crate::model::{Node, Tree, TreeEnsemble};

#[derive(Debug, Clone, Copy)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    weight: f64,
}

/// Per-feature contributions for `x` (already scaled).
pub fn shap_values(ensemble: &TreeEnsemble, x: &[f32]) -> Vec<f64> {
    let mut phi = vec![0.0; ensemble.n_features];
    let scale = ensemble.tree_weight();
    for tree in &ensemble.trees {
        let walker = Walker {
            tree,
            x,
            scale,
        };
        walker.recurse(&mut phi, 0, Vec::new(), 1.0, 1.0, None);
    }
    phi
}

struct Walker<'a> {
    tree: &'a Tree,
    x: &'a [f32],
    scale: f64,
}

impl Walker<'_> {
    fn recurse(
        &self,
        phi: &mut [f64],
        node: usize,
        mut path: Vec<PathElement>,
        zero_fraction: f64,
        one_fraction: f64,
        feature: Option<usize>,
    ) {
        extend(&mut path, zero_fraction, one_fraction, feature);
        let depth = path.len() - 1;

        match &self.tree.nodes[node] {
            Node::Leaf { value, .. } => {
                for i in 1..=depth {
                    let w = unwound_sum(&path, i);
                    let el = path[i];
                    if let Some(f) = el.feature {
                        phi[f] += w * (el.one_fraction - el.zero_fraction) * value * self.scale;
                    }
                }
            }
            Node::Split {
                feature: split,
                threshold,
                left,
                right,
                cover,
            } => {
                let (hot, cold) = if self.x[*split] <= *threshold {
                    (*left, *right)
                } else {
                    (*right, *left)
                };
                let hot_zero = self.tree.nodes[hot].cover() / cover;
                let cold_zero = self.tree.nodes[cold].cover() / cover;

                // a feature seen higher up the path is folded back in
                let mut incoming_zero = 1.0;
                let mut incoming_one = 1.0;
                if let Some(k) = path.iter().position(|e| e.feature == Some(*split)) {
                    incoming_zero = path[k].zero_fraction;
                    incoming_one = path[k].one_fraction;
                    unwind(&mut path, k);
                }

                self.recurse(
                    phi,
                    hot,
                    path.clone(),
                    hot_zero * incoming_zero,
                    incoming_one,
                    Some(*split),
                );
                self.recurse(
                    phi,
                    cold,
                    path,
                    cold_zero * incoming_zero,
                    0.0,
                    Some(*split),
                );
            }
        }
    }
}

fn extend(path: &mut Vec<PathElement>, zero_fraction: f64, one_fraction: f64, feature: Option<usize>) {
    let l = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        weight: if l == 0 { 1.0 } else { 0.0 },
    });
    let denom = (l + 1) as f64;
    for i in (0..l).rev() {
        path[i + 1].weight += one_fraction * path[i].weight * (i + 1) as f64 / denom;
        path[i].weight = zero_fraction * path[i].weight * (l - i) as f64 / denom;
    }
}

fn unwind(path: &mut Vec<PathElement>, k: usize) {
    let d = path.len() - 1;
    let one = path[k].one_fraction;
    let zero = path[k].zero_fraction;
    let denom = (d + 1) as f64;
    let mut next_one_portion = path[d].weight;

    for i in (0..d).rev() {
        if one != 0.0 {
            let tmp = path[i].weight;
            path[i].weight = next_one_portion * denom / ((i + 1) as f64 * one);
            next_one_portion = tmp - path[i].weight * zero * (d - i) as f64 / denom;
        } else {
            path[i].weight = path[i].weight * denom / (zero * (d - i) as f64);
        }
    }
    for i in k..d {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.pop();
}

fn unwound_sum(path: &[PathElement], k: usize) -> f64 {
    let d = path.len() - 1;
    let one = path[k].one_fraction;
    let zero = path[k].zero_fraction;
    let denom = (d + 1) as f64;
    let mut next_one_portion = path[d].weight;
    let mut total = 0.0;

    for i in (0..d).rev() {
        if one != 0.0 {
            let tmp = next_one_portion * denom / ((i + 1) as f64 * one);
            total += tmp;
            next_one_portion = path[i].weight - tmp * zero * (d - i) as f64 / denom;
        } else {
            total += path[i].weight / zero * denom / (d - i) as f64;
        }
    }
    total
}
