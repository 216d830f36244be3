//! Gradient-boosted regression trees with squared loss.
//!
//! Trees are grown depth-first with exhaustive threshold search and store the
//! training cover of every node, which the Shapley explainer needs.

use campaign_core::config::DriverConfig;
use ndarray::{Array1, Array2, ArrayView1};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GbtParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
}

impl GbtParams {
    pub fn from_config(config: &DriverConfig) -> Self {
        Self {
            n_estimators: config.n_estimators.max(1),
            learning_rate: config.learning_rate,
            max_depth: config.max_depth.clamp(1, 4),
            min_samples_leaf: config.min_samples_leaf.max(1),
        }
    }
}

impl Default for GbtParams {
    fn default() -> Self {
        Self::from_config(&DriverConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf {
        value: f64,
        cover: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        cover: f64,
    },
}

impl Node {
    pub fn cover(&self) -> f64 {
        match self {
            Node::Leaf { cover, .. } | Node::Split { cover, .. } => *cover,
        }
    }
}

/// A binary regression tree; the root is `nodes[0]`. Rows with
/// `x[feature] <= threshold` go left.
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    pub fn fit(x: &Array2<f64>, targets: &[f64], rows: &[usize], params: &GbtParams) -> Self {
        let mut builder = TreeBuilder {
            x,
            targets,
            params,
            nodes: Vec::new(),
        };
        builder.grow(rows.to_vec(), 0);
        Self {
            nodes: builder.nodes,
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { value, .. } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    index = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    /// Cover-weighted mean of the leaf values.
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

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], index: usize) -> usize {
            match &nodes[index] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

struct TreeBuilder<'a> {
    x: &'a Array2<f64>,
    targets: &'a [f64],
    params: &'a GbtParams,
    nodes: Vec<Node>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl TreeBuilder<'_> {
    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let cover = rows.len() as f64;
        let mean = rows.iter().map(|&i| self.targets[i]).sum::<f64>() / cover.max(1.0);
        let index = self.nodes.len();
        self.nodes.push(Node::Leaf { value: mean, cover });

        if depth >= self.params.max_depth || rows.len() < 2 * self.params.min_samples_leaf {
            return index;
        }
        let Some(best) = self.best_split(&rows) else {
            return index;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&i| self.x[[i, best.feature]] <= best.threshold);
        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[index] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
            cover,
        };
        index
    }

    /// Variance-reduction split; first feature and lowest threshold win ties.
    fn best_split(&self, rows: &[usize]) -> Option<BestSplit> {
        let min_leaf = self.params.min_samples_leaf;
        let n = rows.len();
        let total: f64 = rows.iter().map(|&i| self.targets[i]).sum();
        let parent_score = total * total / n as f64;

        let mut best: Option<BestSplit> = None;
        let mut sorted = rows.to_vec();
        for feature in 0..self.x.ncols() {
            sorted.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));
            let mut left_sum = 0.0;
            for k in 0..n - 1 {
                left_sum += self.targets[sorted[k]];
                let left_n = k + 1;
                let right_n = n - left_n;
                if left_n < min_leaf || right_n < min_leaf {
                    continue;
                }
                let here = self.x[[sorted[k], feature]];
                let next = self.x[[sorted[k + 1], feature]];
                if next <= here {
                    continue;
                }
                let right_sum = total - left_sum;
                let gain = left_sum * left_sum / left_n as f64
                    + right_sum * right_sum / right_n as f64
                    - parent_score;
                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(BestSplit {
                        feature,
                        threshold: here + (next - here) / 2.0,
                        gain,
                    });
                }
            }
        }
        best
    }
}

/// Additive ensemble: `base + learning_rate * Σ tree(x)`.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientBoostedTrees {
    base: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
}

impl GradientBoostedTrees {
    /// Fit on the rows of `x` listed in `rows`.
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>, rows: &[usize], params: &GbtParams) -> Self {
        let n = rows.len().max(1) as f64;
        let base = rows.iter().map(|&i| y[i]).sum::<f64>() / n;
        let mut predictions = vec![base; y.len()];
        let mut residuals = vec![0.0; y.len()];
        let mut trees = Vec::with_capacity(params.n_estimators);

        for _ in 0..params.n_estimators {
            for &i in rows {
                residuals[i] = y[i] - predictions[i];
            }
            let tree = RegressionTree::fit(x, &residuals, rows, params);
            for &i in rows {
                predictions[i] += params.learning_rate * tree.predict_row(x.row(i));
            }
            trees.push(tree);
        }

        Self {
            base,
            learning_rate: params.learning_rate,
            trees,
        }
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        self.base
            + self.learning_rate
                * self
                    .trees
                    .iter()
                    .map(|t| t.predict_row(row))
                    .sum::<f64>()
    }

    pub fn predict(&self, x: &Array2<f64>, rows: &[usize]) -> Vec<f64> {
        rows.iter().map(|&i| self.predict_row(x.row(i))).collect()
    }

    /// Model output with every feature marginalized out.
    pub fn expected_value(&self) -> f64 {
        self.base
            + self.learning_rate
                * self
                    .trees
                    .iter()
                    .map(RegressionTree::expected_value)
                    .sum::<f64>()
    }
}

/// Coefficient of determination. `None` when the observed values are constant.
pub fn r_squared(observed: &[f64], predicted: &[f64]) -> Option<f64> {
    if observed.is_empty() || observed.len() != predicted.len() {
        return None;
    }
    let mean = observed.iter().sum::<f64>() / observed.len() as f64;
    let ss_tot: f64 = observed.iter().map(|y| (y - mean).powi(2)).sum();
    if ss_tot <= 0.0 {
        return None;
    }
    let ss_res: f64 = observed
        .iter()
        .zip(predicted)
        .map(|(y, p)| (y - p).powi(2))
        .sum();
    Some(1.0 - ss_res / ss_tot)
}
