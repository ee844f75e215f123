//! Random forest regressor.
//!
//! Trees are grown by recursive variance-reduction splits over bootstrap
//! samples and stored as flat node arrays, so a fitted forest serializes
//! directly into a model snapshot. Training is deterministic for a given
//! seed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::regression::{check_training_set, Regressor};
use crate::error::RegressionError;

/// Configuration for a random forest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    /// Number of trees in the ensemble
    pub n_trees: usize,
    /// Maximum tree depth
    pub max_depth: usize,
    /// Minimum samples on each side of a split
    pub min_samples_leaf: usize,
    /// Draw a bootstrap sample per tree instead of using every row
    pub bootstrap: bool,
    /// Random seed
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 12,
            min_samples_leaf: 1,
            bootstrap: true,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
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

/// A single regression tree; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn fit(
        features: &[Vec<f64>],
        targets: &[f64],
        mut indices: Vec<usize>,
        params: &ForestParams,
    ) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(features, targets, &mut indices, 0, params);
        tree
    }

    /// Grow the subtree for `indices`, returning its node index.
    fn grow(
        &mut self,
        features: &[Vec<f64>],
        targets: &[f64],
        indices: &mut [usize],
        depth: usize,
        params: &ForestParams,
    ) -> usize {
        // ---
        let node_index = self.nodes.len();
        let value = indices.iter().map(|&i| targets[i]).sum::<f64>() / indices.len() as f64;
        self.nodes.push(Node::Leaf { value });

        if depth >= params.max_depth || indices.len() < 2 * params.min_samples_leaf.max(1) {
            return node_index;
        }

        let Some((feature, threshold)) = best_split(features, targets, indices, params) else {
            return node_index;
        };

        indices.sort_by(|&a, &b| features[a][feature].total_cmp(&features[b][feature]));
        let split_at = indices.partition_point(|&i| features[i][feature] <= threshold);
        let (left_idx, right_idx) = indices.split_at_mut(split_at);

        let left = self.grow(features, targets, left_idx, depth + 1, params);
        let right = self.grow(features, targets, right_idx, depth + 1, params);
        self.nodes[node_index] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        node_index
    }

    fn predict(&self, row: &[f64]) -> f64 {
        // ---
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

/// Find the split with the largest reduction in squared error.
fn best_split(
    features: &[Vec<f64>],
    targets: &[f64],
    indices: &[usize],
    params: &ForestParams,
) -> Option<(usize, f64)> {
    // ---
    let n = indices.len();
    let min_leaf = params.min_samples_leaf.max(1);
    let total: f64 = indices.iter().map(|&i| targets[i]).sum();
    let baseline = total * total / n as f64;

    let mut best: Option<(usize, f64, f64)> = None;
    let mut order = indices.to_vec();

    for feature in 0..features[indices[0]].len() {
        order.sort_by(|&a, &b| features[a][feature].total_cmp(&features[b][feature]));

        let mut left_sum = 0.0;
        for k in 0..n - 1 {
            left_sum += targets[order[k]];
            let n_left = k + 1;
            let n_right = n - n_left;
            if n_left < min_leaf || n_right < min_leaf {
                continue;
            }

            let here = features[order[k]][feature];
            let next = features[order[k + 1]][feature];
            if here == next {
                continue;
            }

            let right_sum = total - left_sum;
            let score = left_sum * left_sum / n_left as f64 + right_sum * right_sum / n_right as f64;
            if best.map_or(true, |(_, _, s)| score > s) {
                best = Some((feature, (here + next) / 2.0, score));
            }
        }
    }

    best.filter(|&(_, _, score)| score - baseline > 1e-12)
        .map(|(feature, threshold, _)| (feature, threshold))
}

/// Bagged ensemble of [`RegressionTree`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    params: ForestParams,
    n_features: usize,
    trees: Vec<RegressionTree>,
}

impl RandomForestRegressor {
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            n_features: 0,
            trees: Vec::new(),
        }
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }
}

impl Regressor for RandomForestRegressor {
    fn fit(&mut self, features: &[Vec<f64>], targets: &[f64]) -> Result<(), RegressionError> {
        // ---
        let dim = check_training_set(features, targets)?;
        let n = features.len();
        let mut rng = StdRng::seed_from_u64(self.params.seed);

        self.trees = (0..self.params.n_trees.max(1))
            .map(|_| {
                let sample: Vec<usize> = if self.params.bootstrap {
                    (0..n).map(|_| rng.gen_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                RegressionTree::fit(features, targets, sample, &self.params)
            })
            .collect();
        self.n_features = dim;
        Ok(())
    }

    fn predict(&self, features: &[f64]) -> Result<f64, RegressionError> {
        // ---
        if self.trees.is_empty() {
            return Err(RegressionError::NotFitted);
        }
        if features.len() != self.n_features {
            return Err(RegressionError::DimensionMismatch {
                expected: self.n_features,
                got: features.len(),
            });
        }

        let sum: f64 = self.trees.iter().map(|t| t.predict(features)).sum();
        let y = sum / self.trees.len() as f64;
        if y.is_finite() {
            Ok(y)
        } else {
            Err(RegressionError::NonFinite)
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn create_step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        // ---
        let features: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64, (i % 3) as f64]).collect();
        let targets = features
            .iter()
            .map(|r| if r[0] < 20.0 { 10.0 } else { 50.0 })
            .collect();
        (features, targets)
    }

    #[test]
    fn test_single_tree_learns_step() {
        // ---
        let (features, targets) = create_step_data();
        let params = ForestParams {
            n_trees: 1,
            bootstrap: false,
            ..ForestParams::default()
        };
        let mut forest = RandomForestRegressor::new(params);
        forest.fit(&features, &targets).unwrap();

        assert_eq!(forest.tree_count(), 1);
        assert_eq!(forest.predict(&[5.0, 0.0]).unwrap(), 10.0);
        assert_eq!(forest.predict(&[35.0, 2.0]).unwrap(), 50.0);
    }

    #[test]
    fn test_forest_predictions_are_bounded_by_targets() {
        // ---
        let (features, targets) = create_step_data();
        let mut forest = RandomForestRegressor::new(ForestParams {
            n_trees: 25,
            ..ForestParams::default()
        });
        forest.fit(&features, &targets).unwrap();

        for row in &features {
            let y = forest.predict(row).unwrap();
            assert!((10.0..=50.0).contains(&y));
        }
        assert!(forest.predict(&[2.0, 1.0]).unwrap() < 30.0);
        assert!(forest.predict(&[38.0, 1.0]).unwrap() > 30.0);
    }

    #[test]
    fn test_same_seed_is_deterministic() {
        // ---
        let (features, targets) = create_step_data();
        let params = ForestParams {
            n_trees: 10,
            ..ForestParams::default()
        };

        let mut a = RandomForestRegressor::new(params);
        let mut b = RandomForestRegressor::new(params);
        a.fit(&features, &targets).unwrap();
        b.fit(&features, &targets).unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn test_predict_before_fit_and_wrong_dimension() {
        // ---
        let forest = RandomForestRegressor::new(ForestParams::default());
        assert_eq!(forest.predict(&[1.0]), Err(RegressionError::NotFitted));

        let (features, targets) = create_step_data();
        let mut forest = RandomForestRegressor::new(ForestParams {
            n_trees: 2,
            ..ForestParams::default()
        });
        forest.fit(&features, &targets).unwrap();
        assert!(matches!(
            forest.predict(&[1.0]),
            Err(RegressionError::DimensionMismatch { expected: 2, got: 1 })
        ));
    }
}
