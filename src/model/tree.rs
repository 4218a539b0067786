use super::{check_len, ModelKind, Regressor};
use crate::error::{Error, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Tree node. Splits send `x[feature] <= threshold` left. `cover` is the
/// training weight that reached the node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
        cover: f64,
    },
    Leaf {
        value: f64,
        cover: f64,
    },
}

impl Node {
    pub fn cover(&self) -> f64 {
        match self {
            Node::Split { cover, .. } | Node::Leaf { cover, .. } => *cover,
        }
    }
}

/// Flat tree, root at index 0. Children always sit after their parent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    fn validate(&self, n_features: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::InvalidArtifact("empty tree".into()));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            let cover = node.cover();
            if !(cover.is_finite() && cover > 0.0) {
                return Err(Error::InvalidArtifact(format!("node {} has cover {}", i, cover)));
            }
            if let Node::Leaf { value, .. } = node {
                if !value.is_finite() {
                    return Err(Error::InvalidArtifact(format!("leaf {} is not finite", i)));
                }
            }
            if let Node::Split {
                feature,
                left,
                right,
                ..
            } = node
            {
                if *feature >= n_features {
                    return Err(Error::InvalidArtifact(format!(
                        "node {} splits on feature {} but model has {}",
                        i, feature, n_features
                    )));
                }
                for child in [*left, *right] {
                    if child <= i || child >= self.nodes.len() {
                        return Err(Error::InvalidArtifact(format!(
                            "node {} has out-of-order child {}",
                            i, child
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn predict(&self, x: &[f32]) -> f64 {
        let mut i = 0;
        loop {
            match &self.nodes[i] {
                Node::Leaf { value, .. } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    i = if x[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    /// Cover-weighted mean leaf value.
    pub fn expected_value(&self) -> f64 {
        let root = self.nodes[0].cover();
        if root <= 0.0 {
            return 0.0;
        }
        self.nodes
            .iter()
            .filter_map(|n| match n {
                Node::Leaf { value, cover } => Some(value * cover),
                Node::Split { .. } => None,
            })
            .sum::<f64>()
            / root
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Aggregation {
    /// Bagged forest: average of trees.
    #[default]
    Mean,
    /// Boosted trees: base score plus the sum of trees.
    Sum,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TreeEnsemble {
    pub n_features: usize,
    #[serde(default)]
    pub base_score: f64,
    pub trees: Vec<Tree>,
    #[serde(skip)]
    pub aggregation: Aggregation,
}

impl TreeEnsemble {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.trees.is_empty() {
            return Err(Error::InvalidArtifact("ensemble has no trees".into()));
        }
        self.trees.iter().try_for_each(|t| t.validate(self.n_features))
    }

    /// Multiplier applied to each tree's output.
    pub fn tree_weight(&self) -> f64 {
        match self.aggregation {
            Aggregation::Mean => 1.0 / self.trees.len() as f64,
            Aggregation::Sum => 1.0,
        }
    }

    pub fn expected_value(&self) -> f64 {
        let w = self.tree_weight();
        self.base_score + self.trees.iter().map(|t| w * t.expected_value()).sum::<f64>()
    }
}

impl Regressor for TreeEnsemble {
    fn kind(&self) -> ModelKind {
        match self.aggregation {
            Aggregation::Mean => ModelKind::RandomForest,
            Aggregation::Sum => ModelKind::GradientBoosting,
        }
    }

    fn n_features(&self) -> Option<usize> {
        Some(self.n_features)
    }

    fn predict(&self, x: &[f32]) -> Result<f64> {
        check_len(x, self.n_features)?;
        let w = self.tree_weight();
        Ok(self.base_score + self.trees.iter().map(|t| w * t.predict(x)).sum::<f64>())
    }

    fn tree_ensemble(&self) -> Option<&TreeEnsemble> {
        Some(self)
    }

    fn member_predictions(&self, x: &[f32]) -> Result<Option<Vec<f64>>> {
        if self.aggregation != Aggregation::Mean {
            return Ok(None);
        }
        check_len(x, self.n_features)?;
        Ok(Some(
            self.trees
                .iter()
                .map(|t| self.base_score + t.predict(x))
                .collect(),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

/// Fits a bagged forest of variance-reduction regression trees.
pub fn fit_forest(x: &[Vec<f32>], y: &[f64], params: &ForestParams) -> Result<TreeEnsemble> {
    if x.is_empty() || x.len() != y.len() {
        return Err(Error::InvalidArtifact(format!(
            "cannot fit forest on {} rows and {} targets",
            x.len(),
            y.len()
        )));
    }
    let n_features = x[0].len();
    if let Some(bad) = x.iter().find(|r| r.len() != n_features) {
        return Err(Error::FeatureLength {
            got: bad.len(),
            expected: n_features,
        });
    }

    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
    let builder = TreeBuilder {
        x,
        y,
        n_features,
        max_depth: params.max_depth,
        min_leaf: params.min_samples_leaf.max(1),
    };

    let trees = (0..params.n_trees.max(1))
        .map(|_| {
            let mut sample: Vec<usize> = (0..x.len()).map(|_| rng.random_range(0..x.len())).collect();
            let mut nodes = Vec::new();
            builder.grow(&mut nodes, &mut sample, 0);
            Tree { nodes }
        })
        .collect();

    Ok(TreeEnsemble {
        n_features,
        base_score: 0.0,
        trees,
        aggregation: Aggregation::Mean,
    })
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f32>],
    y: &'a [f64],
    n_features: usize,
    max_depth: usize,
    min_leaf: usize,
}

struct SplitChoice {
    feature: usize,
    threshold: f32,
    score: f64,
}

impl TreeBuilder<'_> {
    /// Appends the subtree for `rows` and returns its root index.
    fn grow(&self, nodes: &mut Vec<Node>, rows: &mut [usize], depth: usize) -> usize {
        let n = rows.len();
        let mean = rows.iter().map(|&r| self.y[r]).sum::<f64>() / n as f64;
        let id = nodes.len();

        let split = if depth < self.max_depth && n >= 2 * self.min_leaf {
            self.best_split(rows)
        } else {
            None
        };

        let Some(split) = split else {
            nodes.push(Node::Leaf {
                value: mean,
                cover: n as f64,
            });
            return id;
        };

        // placeholder, patched once both children exist
        nodes.push(Node::Leaf {
            value: mean,
            cover: n as f64,
        });
        rows.sort_by_key(|&r| self.x[r][split.feature] > split.threshold);
        let n_left = rows
            .iter()
            .take_while(|&&r| self.x[r][split.feature] <= split.threshold)
            .count();
        let (l, r) = rows.split_at_mut(n_left);
        let left = self.grow(nodes, l, depth + 1);
        let right = self.grow(nodes, r, depth + 1);
        nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
            cover: n as f64,
        };
        id
    }

    fn best_split(&self, rows: &[usize]) -> Option<SplitChoice> {
        let n = rows.len();
        let total: f64 = rows.iter().map(|&r| self.y[r]).sum();
        // splitting must beat the parent's own sum^2/n term
        let parent_score = total * total / n as f64;
        let mut best: Option<SplitChoice> = None;
        let mut order: Vec<usize> = rows.to_vec();

        for f in 0..self.n_features {
            order.sort_by(|&a, &b| self.x[a][f].total_cmp(&self.x[b][f]));
            let mut left_sum = 0.0;
            for k in 1..n {
                left_sum += self.y[order[k - 1]];
                if k < self.min_leaf || n - k < self.min_leaf {
                    continue;
                }
                let lo = self.x[order[k - 1]][f];
                let hi = self.x[order[k]][f];
                if lo == hi {
                    continue;
                }
                let right_sum = total - left_sum;
                let score = left_sum * left_sum / k as f64 + right_sum * right_sum / (n - k) as f64;
                if score <= parent_score + 1e-12 {
                    continue;
                }
                if best.as_ref().map_or(true, |b| score > b.score) {
                    let mid = ((lo as f64 + hi as f64) / 2.0) as f32;
                    let threshold = if mid >= hi { lo } else { mid };
                    best = Some(SplitChoice {
                        feature: f,
                        threshold,
                        score,
                    });
                }
            }
        }
        best
    }
}
