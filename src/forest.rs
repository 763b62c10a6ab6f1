//! Random-forest regressor: bagged CART trees split on variance reduction.
//!
//! Trees are stored as flat node arenas so the whole forest serializes to
//! plain JSON with serde.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split; `None` means all.
    pub max_features: Option<usize>,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 12,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict_row(&self, row: &[f64]) -> Result<f64, ModelError> {
        let mut at = 0;
        loop {
            match self.nodes.get(at) {
                Some(Node::Leaf { value }) => return Ok(*value),
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let x = row.get(*feature).ok_or_else(|| {
                        ModelError::InvalidArtifact(format!("split on missing feature {feature}"))
                    })?;
                    let next = if *x <= *threshold { *left } else { *right };
                    if next <= at {
                        return Err(ModelError::InvalidArtifact(format!(
                            "node {at} points back to {next}"
                        )));
                    }
                    at = next;
                }
                None => {
                    return Err(ModelError::InvalidArtifact(format!("missing node {at}")));
                }
            }
        }
    }

    /// Splits must use known features and point strictly forward in the arena.
    fn check(&self, n_features: usize) -> Result<(), ModelError> {
        if self.nodes.is_empty() {
            return Err(ModelError::InvalidArtifact("empty tree".to_string()));
        }
        let len = self.nodes.len();
        for (id, node) in self.nodes.iter().enumerate() {
            let Node::Split {
                feature,
                left,
                right,
                ..
            } = node
            else {
                continue;
            };
            if *feature >= n_features {
                return Err(ModelError::InvalidArtifact(format!(
                    "node {id} splits on feature {feature}, model has {n_features}"
                )));
            }
            for child in [*left, *right] {
                if child <= id || child >= len {
                    return Err(ModelError::InvalidArtifact(format!(
                        "node {id} has child {child} outside {}..{len}",
                        id + 1
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], at: usize) -> usize {
            match nodes.get(at) {
                Some(Node::Split { left, right, .. }) => {
                    1 + walk(nodes, *left).max(walk(nodes, *right))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

/// Borrowed training data plus growth settings for one tree.
struct Grower<'a> {
    x: &'a [Vec<f64>],
    y: &'a [f64],
    params: &'a ForestParams,
    n_features: usize,
    rng: StdRng,
    nodes: Vec<Node>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    sse: f64,
}

impl Grower<'_> {
    fn grow(&mut self, idx: &mut [usize], depth: usize) -> usize {
        let id = self.nodes.len();
        let n = idx.len() as f64;
        let mean = idx.iter().map(|&i| self.y[i]).sum::<f64>() / n;
        self.nodes.push(Node::Leaf { value: mean });

        if depth >= self.params.max_depth || idx.len() < self.params.min_samples_split {
            return id;
        }
        let Some(best) = self.best_split(idx) else {
            return id;
        };

        // Partition in place: left part is `<= threshold`.
        let mut mid = 0;
        for k in 0..idx.len() {
            if self.x[idx[k]][best.feature] <= best.threshold {
                idx.swap(k, mid);
                mid += 1;
            }
        }
        let (l, r) = idx.split_at_mut(mid);
        let left = self.grow(l, depth + 1);
        let right = self.grow(r, depth + 1);
        self.nodes[id] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        id
    }

    fn candidate_features(&mut self) -> Vec<usize> {
        match self.params.max_features {
            Some(k) if k > 0 && k < self.n_features => {
                sample(&mut self.rng, self.n_features, k).into_vec()
            }
            _ => (0..self.n_features).collect(),
        }
    }

    fn best_split(&mut self, idx: &[usize]) -> Option<BestSplit> {
        let min_leaf = self.params.min_samples_leaf.max(1);
        let n = idx.len();
        if n < 2 * min_leaf {
            return None;
        }
        let total_sum: f64 = idx.iter().map(|&i| self.y[i]).sum();
        let total_sq: f64 = idx.iter().map(|&i| self.y[i] * self.y[i]).sum();
        let parent_sse = total_sq - total_sum * total_sum / n as f64;
        if parent_sse <= 1e-12 {
            return None;
        }

        let mut best: Option<BestSplit> = None;
        let mut order = idx.to_vec();
        for f in self.candidate_features() {
            order.sort_by(|&a, &b| self.x[a][f].total_cmp(&self.x[b][f]));
            let (mut sum_l, mut sq_l) = (0.0, 0.0);
            for k in 1..n {
                let yi = self.y[order[k - 1]];
                sum_l += yi;
                sq_l += yi * yi;
                if k < min_leaf || n - k < min_leaf {
                    continue;
                }
                let (lo, hi) = (self.x[order[k - 1]][f], self.x[order[k]][f]);
                if lo >= hi {
                    continue;
                }
                let (nl, nr) = (k as f64, (n - k) as f64);
                let sum_r = total_sum - sum_l;
                let sq_r = total_sq - sq_l;
                let sse = (sq_l - sum_l * sum_l / nl) + (sq_r - sum_r * sum_r / nr);
                if best.as_ref().map_or(true, |b| sse < b.sse) {
                    best = Some(BestSplit {
                        feature: f,
                        threshold: lo + (hi - lo) / 2.0,
                        sse,
                    });
                }
            }
        }
        best.filter(|b| b.sse < parent_sse)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    pub params: ForestParams,
    pub n_features: usize,
    trees: Vec<Tree>,
}

impl RandomForest {
    /// Fit on row-major `x` (all rows the same width) against `y`.
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: ForestParams) -> Result<Self, ModelError> {
        if x.is_empty() || x.len() != y.len() || params.n_trees == 0 {
            return Err(ModelError::Untrained);
        }
        let n_features = x[0].len();
        if let Some(bad) = x.iter().find(|r| r.len() != n_features) {
            return Err(ModelError::RowWidth {
                got: bad.len(),
                expected: n_features,
            });
        }

        let n = x.len();
        let trees = (0..params.n_trees)
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(t as u64));
                let mut idx: Vec<usize> = (0..n).map(|_| rng.random_range(0..n)).collect();
                let mut grower = Grower {
                    x,
                    y,
                    params: &params,
                    n_features,
                    rng,
                    nodes: Vec::new(),
                };
                grower.grow(&mut idx, 0);
                Tree {
                    nodes: grower.nodes,
                }
            })
            .collect();

        Ok(Self {
            params,
            n_features,
            trees,
        })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    /// Structural check for forests that did not come from [`RandomForest::fit`].
    pub fn check(&self) -> Result<(), ModelError> {
        if self.trees.is_empty() {
            return Err(ModelError::Untrained);
        }
        self.trees.iter().try_for_each(|t| t.check(self.n_features))
    }

    /// Mean of tree outputs, one value per input row.
    pub fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>, ModelError> {
        if self.trees.is_empty() {
            return Err(ModelError::Untrained);
        }
        rows.iter()
            .map(|row| {
                if row.len() != self.n_features {
                    return Err(ModelError::RowWidth {
                        got: row.len(),
                        expected: self.n_features,
                    });
                }
                let mut sum = 0.0;
                for t in &self.trees {
                    sum += t.predict_row(row)?;
                }
                Ok(sum / self.trees.len() as f64)
            })
            .collect()
    }
}
