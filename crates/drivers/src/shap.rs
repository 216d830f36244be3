//! Tree Shapley values.
//!
//! Path-dependent TreeSHAP: the expectation of a tree given a feature subset
//! follows the row down splits on features in the subset and averages both
//! children by training cover otherwise. Values are exact for that
//! expectation and satisfy `expected_value + Σ φ = prediction`.

use crate::gbt::{GradientBoostedTrees, Node, RegressionTree};
use ndarray::{Array2, ArrayView1};

#[derive(Debug, Clone, Copy)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    weight: f64,
}

/// Shapley values of one tree for one row, accumulated into `phi`.
pub fn tree_shap(tree: &RegressionTree, row: ArrayView1<'_, f64>, phi: &mut [f64]) {
    if tree.nodes().is_empty() {
        return;
    }
    let mut walker = Walker {
        nodes: tree.nodes(),
        row,
        phi,
    };
    walker.recurse(0, Vec::new(), 1.0, 1.0, None);
}

/// Shapley values of the whole ensemble, one row per requested row.
pub fn ensemble_shap(model: &GradientBoostedTrees, x: &Array2<f64>, rows: &[usize]) -> Array2<f64> {
    let mut values = Array2::zeros((rows.len(), x.ncols()));
    let mut phi = vec![0.0; x.ncols()];
    for (out, &i) in rows.iter().enumerate() {
        phi.iter_mut().for_each(|v| *v = 0.0);
        for tree in model.trees() {
            tree_shap(tree, x.row(i), &mut phi);
        }
        for (j, v) in phi.iter().enumerate() {
            values[[out, j]] = model.learning_rate() * v;
        }
    }
    values
}

struct Walker<'a, 'r> {
    nodes: &'a [Node],
    row: ArrayView1<'r, f64>,
    phi: &'a mut [f64],
}

impl Walker<'_, '_> {
    fn recurse(
        &mut self,
        index: usize,
        mut path: Vec<PathElement>,
        zero_fraction: f64,
        one_fraction: f64,
        feature: Option<usize>,
    ) {
        extend(&mut path, zero_fraction, one_fraction, feature);

        match self.nodes[index] {
            Node::Leaf { value, .. } => {
                for i in 1..path.len() {
                    let weight = unwound_sum(&path, i);
                    let element = path[i];
                    if let Some(f) = element.feature {
                        self.phi[f] +=
                            weight * (element.one_fraction - element.zero_fraction) * value;
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
                let (hot, cold) = if self.row[split] <= threshold {
                    (left, right)
                } else {
                    (right, left)
                };
                let hot_zero = self.nodes[hot].cover() / cover;
                let cold_zero = self.nodes[cold].cover() / cover;

                let (mut incoming_zero, mut incoming_one) = (1.0, 1.0);
                if let Some(k) = path.iter().position(|e| e.feature == Some(split)) {
                    incoming_zero = path[k].zero_fraction;
                    incoming_one = path[k].one_fraction;
                    unwind(&mut path, k);
                }

                self.recurse(
                    hot,
                    path.clone(),
                    hot_zero * incoming_zero,
                    incoming_one,
                    Some(split),
                );
                self.recurse(cold, path, cold_zero * incoming_zero, 0.0, Some(split));
            }
        }
    }
}

fn extend(path: &mut Vec<PathElement>, zero_fraction: f64, one_fraction: f64, feature: Option<usize>) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        weight: if depth == 0 { 1.0 } else { 0.0 },
    });
    let scale = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].weight += one_fraction * path[i].weight * (i + 1) as f64 / scale;
        path[i].weight = zero_fraction * path[i].weight * (depth - i) as f64 / scale;
    }
}

fn unwind(path: &mut Vec<PathElement>, index: usize) {
    let depth = path.len() - 1;
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let scale = (depth + 1) as f64;
    let mut next = path[depth].weight;

    for i in (0..depth).rev() {
        if one != 0.0 {
            let current = path[i].weight;
            path[i].weight = next * scale / ((i + 1) as f64 * one);
            next = current - path[i].weight * zero * (depth - i) as f64 / scale;
        } else {
            path[i].weight = path[i].weight * scale / (zero * (depth - i) as f64);
        }
    }
    for i in index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.pop();
}

/// Total permutation weight if the element at `index` were unwound.
fn unwound_sum(path: &[PathElement], index: usize) -> f64 {
    let depth = path.len() - 1;
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let mut next = path[depth].weight;
    let mut total = 0.0;

    if one != 0.0 {
        for i in (0..depth).rev() {
            let share = next / ((i + 1) as f64 * one);
            total += share;
            next = path[i].weight - share * zero * (depth - i) as f64;
        }
    } else {
        for i in (0..depth).rev() {
            total += path[i].weight / (zero * (depth - i) as f64);
        }
    }
    total * (depth + 1) as f64
}
