//! Isolation Forest anomaly scoring
//!
//! Trees isolate samples with random axis-aligned splits; anomalies end up
//! on short paths. Scores follow the usual convention: `score_samples` is
//! `-2^(-E[h(x)] / c(max_samples))` and `decision_function` shifts it so
//! that the `contamination` fraction of training samples falls below zero.

use crate::ml::stats::score_at_percentile;
use crate::structs::{OutlierError, Result};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Seed used for reproducible forests
pub const DEFAULT_SEED: u64 = 123_456;

#[derive(Debug, Clone)]
pub struct IsolationForestParams {
    pub n_estimators: usize,
    /// Samples drawn (without replacement) per tree; `None` uses all rows
    pub max_samples: Option<usize>,
    pub contamination: f64,
    pub seed: u64,
}

impl Default for IsolationForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: None,
            contamination: 0.05,
            seed: DEFAULT_SEED,
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone)]
struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn grow(x: ArrayView2<'_, f64>, samples: &[usize], max_depth: usize, rng: &mut StdRng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        let mut samples = samples.to_vec();
        tree.build(x, &mut samples, 0, max_depth, rng);
        tree
    }

    fn build(
        &mut self,
        x: ArrayView2<'_, f64>,
        samples: &mut [usize],
        depth: usize,
        max_depth: usize,
        rng: &mut StdRng,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            size: samples.len(),
        });
        if depth >= max_depth || samples.len() <= 1 {
            return id;
        }

        let mut features: Vec<usize> = (0..x.ncols()).collect();
        features.shuffle(rng);
        let split = features.into_iter().find_map(|feature| {
            let (min, max) = samples.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                let v = x[[i, feature]];
                (lo.min(v), hi.max(v))
            });
            (max > min).then_some((feature, min, max))
        });
        let Some((feature, min, max)) = split else {
            return id;
        };

        let threshold = min + rng.gen::<f64>() * (max - min);
        let mut boundary = 0;
        for k in 0..samples.len() {
            if x[[samples[k], feature]] <= threshold {
                samples.swap(k, boundary);
                boundary += 1;
            }
        }

        let (lower, upper) = samples.split_at_mut(boundary);
        let left = self.build(x, lower, depth + 1, max_depth, rng);
        let right = self.build(x, upper, depth + 1, max_depth, rng);
        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    #[allow(clippy::cast_precision_loss)]
    fn path_length(&self, sample: ArrayView1<'_, f64>) -> f64 {
        let mut node = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[node] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if sample[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                    depth += 1.0;
                }
                Node::Leaf { size } => return depth + average_path_length(*size),
            }
        }
    }
}

/// Expected path length of an unsuccessful BST search among `n` samples
#[allow(clippy::cast_precision_loss)]
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// A fitted isolation forest
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    max_samples: usize,
    n_features: usize,
    offset: f64,
}

impl IsolationForest {
    /// Fit on a samples x features matrix
    ///
    /// # Errors
    /// Returns `Config` for invalid parameters or an empty matrix
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn fit(x: ArrayView2<'_, f64>, params: &IsolationForestParams) -> Result<Self> {
        let n_samples = x.nrows();
        if n_samples == 0 || x.ncols() == 0 {
            return Err(OutlierError::Config(
                "Isolation forest needs at least one sample and one feature".into(),
            ));
        }
        if params.n_estimators == 0 {
            return Err(OutlierError::Config("n_estimators must be at least 1".into()));
        }
        if !(params.contamination > 0.0 && params.contamination <= 0.5) {
            return Err(OutlierError::Config(format!(
                "Contamination must be in (0, 0.5], got {}",
                params.contamination
            )));
        }
        let max_samples = params.max_samples.unwrap_or(n_samples).clamp(1, n_samples);
        let max_depth = (max_samples.max(2) as f64).log2().ceil() as usize;

        let mut master = StdRng::seed_from_u64(params.seed);
        let seeds: Vec<u64> = (0..params.n_estimators).map(|_| master.gen()).collect();

        let trees = seeds
            .par_iter()
            .map(|&seed| {
                let mut rng = StdRng::seed_from_u64(seed);
                let samples = rand::seq::index::sample(&mut rng, n_samples, max_samples).into_vec();
                IsolationTree::grow(x, &samples, max_depth, &mut rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            max_samples,
            n_features: x.ncols(),
            offset: 0.0,
        };
        let scores = forest.score_samples(x)?.to_vec();
        forest.offset = score_at_percentile(&scores, 100.0 * params.contamination)?;
        Ok(forest)
    }

    /// Opposite of the anomaly score: lower is more abnormal
    ///
    /// # Errors
    /// Returns `Config` if the feature count differs from training
    #[allow(clippy::cast_precision_loss)]
    pub fn score_samples(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        if x.ncols() != self.n_features {
            return Err(OutlierError::Config(format!(
                "Expected {} features, got {}",
                self.n_features,
                x.ncols()
            )));
        }

        let denominator = self.trees.len() as f64 * average_path_length(self.max_samples);
        Ok(x.rows()
            .into_iter()
            .map(|row| {
                let depth: f64 = self.trees.iter().map(|t| t.path_length(row)).sum();
                let ratio = if denominator > 0.0 { depth / denominator } else { 0.0 };
                -(2f64.powf(-ratio))
            })
            .collect())
    }

    /// Shifted scores: negative values are outliers at the fitted contamination
    ///
    /// # Errors
    /// Returns `Config` if the feature count differs from training
    pub fn decision_function(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        Ok(self.score_samples(x)? - self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn clustered_with_outlier() -> Array2<f64> {
        let mut x = Array2::zeros((40, 2));
        for i in 0..39 {
            let t = i as f64;
            x[[i, 0]] = 10.0 + (t * 0.37).sin();
            x[[i, 1]] = 20.0 + (t * 0.53).cos();
        }
        x[[39, 0]] = 30.0;
        x[[39, 1]] = -5.0;
        x
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        let c256 = average_path_length(256);
        assert!((c256 - 10.244).abs() < 0.01);
    }

    #[test]
    fn test_outlier_scores_lowest() {
        let x = clustered_with_outlier();
        let forest = IsolationForest::fit(x.view(), &IsolationForestParams::default()).expect("fit");
        let scores = forest.decision_function(x.view()).expect("scores");

        let lowest = scores
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(lowest, Some(39));
        assert!(scores[39] < 0.0);
    }

    #[test]
    fn test_fixed_seed_is_deterministic() {
        let x = clustered_with_outlier();
        let params = IsolationForestParams::default();

        let first = IsolationForest::fit(x.view(), &params)
            .and_then(|f| f.decision_function(x.view()))
            .expect("first");
        let second = IsolationForest::fit(x.view(), &params)
            .and_then(|f| f.decision_function(x.view()))
            .expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn test_contamination_sets_offset() {
        let x = clustered_with_outlier();
        let forest = IsolationForest::fit(x.view(), &IsolationForestParams::default()).expect("fit");
        let scores = forest.decision_function(x.view()).expect("scores");

        // 5% of 40 samples: at most 2 strictly below zero
        let negative = scores.iter().filter(|&&s| s < 0.0).count();
        assert!((1..=2).contains(&negative));
    }

    #[test]
    fn test_constant_features_give_equal_scores() {
        let x = Array2::from_elem((10, 3), 1.5);
        let forest = IsolationForest::fit(x.view(), &IsolationForestParams::default()).expect("fit");
        let scores = forest.decision_function(x.view()).expect("scores");
        assert!(scores.iter().all(|&s| (s - scores[0]).abs() < 1e-12));
    }

    #[test]
    fn test_rejects_bad_parameters() {
        let x = clustered_with_outlier();
        let params = IsolationForestParams {
            contamination: 0.9,
            ..IsolationForestParams::default()
        };
        assert!(IsolationForest::fit(x.view(), &params).is_err());

        let forest = IsolationForest::fit(x.view(), &IsolationForestParams::default()).expect("fit");
        assert!(forest.score_samples(Array2::zeros((2, 3)).view()).is_err());
    }
}
