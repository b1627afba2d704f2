//! Regression trees fitted to boosting residuals
//!
//! Leaves hold `Σr / (n + λ)` and a split is scored by the reduction of
//! `G² / (n + λ)`, which is the squared-loss special case of second-order
//! boosting with unit hessians.

use ndarray::{ArrayView1, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::VecDeque;

/// Below this many (row, feature) pairs the split search stays sequential
const PARALLEL_THRESHOLD: usize = 20_000;

/// How a tree chooses the next node to split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrowthPolicy {
    /// Level by level up to `max_depth`
    DepthWise,
    /// Best-first on the leaf with the highest gain, up to `max_leaves`
    LeafWise,
    /// One shared split per level, giving symmetric trees
    Oblivious,
}

/// Structural limits of a single tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    /// Maximum depth; `None` means unbounded
    pub max_depth: Option<usize>,
    /// Maximum number of leaves (leaf-wise growth only)
    pub max_leaves: usize,
    /// Minimum rows on each side of a split
    pub min_samples_leaf: usize,
    /// Minimum gain for a split to be kept
    pub min_split_gain: f64,
    /// L2 regularisation of leaf values
    pub reg_lambda: f64,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: Some(6),
            max_leaves: 31,
            min_samples_leaf: 1,
            min_split_gain: 0.0,
            reg_lambda: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
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

#[derive(Debug, Clone, Copy, PartialEq)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl SplitCandidate {
    /// Higher gain wins; ties go to the lower feature index, then threshold
    fn better(self, other: Self) -> Self {
        match self.gain.partial_cmp(&other.gain) {
            Some(Ordering::Greater) => self,
            Some(Ordering::Less) => other,
            _ => {
                if (other.feature, other.threshold) < (self.feature, self.threshold) {
                    other
                } else {
                    self
                }
            }
        }
    }
}

fn pick(best: Option<SplitCandidate>, next: Option<SplitCandidate>) -> Option<SplitCandidate> {
    match (best, next) {
        (Some(a), Some(b)) => Some(a.better(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

fn score_term(gradient: f64, count: usize, lambda: f64) -> f64 {
    if count == 0 {
        0.0
    } else {
        gradient * gradient / (count as f64 + lambda)
    }
}

fn leaf_value(residuals: &[f64], rows: &[usize], lambda: f64) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    let sum: f64 = rows.iter().map(|&r| residuals[r]).sum();
    sum / (rows.len() as f64 + lambda)
}

fn sorted_by_feature(x: ArrayView2<f64>, rows: &[usize], feature: usize) -> Vec<usize> {
    let mut order = rows.to_vec();
    order.sort_by(|&a, &b| {
        x[[a, feature]]
            .partial_cmp(&x[[b, feature]])
            .unwrap_or(Ordering::Equal)
    });
    order
}

/// A fitted regression tree; node 0 is the root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    /// Fit `residuals[rows]` using only the listed feature columns
    pub fn fit<'a>(
        x: ArrayView2<'a, f64>,
        residuals: &'a [f64],
        rows: &[usize],
        features: &'a [usize],
        policy: GrowthPolicy,
        params: &'a TreeParams,
    ) -> Self {
        let grower = Grower {
            x,
            residuals,
            features,
            params,
        };
        match policy {
            GrowthPolicy::DepthWise => grower.depth_wise(rows),
            GrowthPolicy::LeafWise => grower.leaf_wise(rows),
            GrowthPolicy::Oblivious => grower.oblivious(rows),
        }
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }
}

struct Grower<'a> {
    x: ArrayView2<'a, f64>,
    residuals: &'a [f64],
    features: &'a [usize],
    params: &'a TreeParams,
}

impl<'a> Grower<'a> {
    fn depth_allows(&self, depth: usize) -> bool {
        self.params.max_depth.map_or(true, |max| depth < max)
    }

    fn leaf(&self, rows: &[usize]) -> Node {
        Node::Leaf {
            value: leaf_value(self.residuals, rows, self.params.reg_lambda),
        }
    }

    fn partition(&self, rows: &[usize], split: &SplitCandidate) -> (Vec<usize>, Vec<usize>) {
        rows.iter()
            .copied()
            .partition(|&r| self.x[[r, split.feature]] <= split.threshold)
    }

    fn split_node(
        &self,
        nodes: &mut Vec<Node>,
        idx: usize,
        rows: &[usize],
        split: &SplitCandidate,
    ) -> ((usize, Vec<usize>), (usize, Vec<usize>)) {
        let (left_rows, right_rows) = self.partition(rows, split);
        let left = nodes.len();
        nodes.push(self.leaf(&left_rows));
        nodes.push(self.leaf(&right_rows));
        nodes[idx] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right: left + 1,
        };
        ((left, left_rows), (left + 1, right_rows))
    }

    fn depth_wise(&self, rows: &[usize]) -> RegressionTree {
        let mut nodes = vec![self.leaf(rows)];
        let mut frontier = VecDeque::from([(0usize, rows.to_vec(), 0usize)]);
        while let Some((idx, rows, depth)) = frontier.pop_front() {
            if !self.depth_allows(depth) {
                continue;
            }
            if let Some(split) = self.best_split(&rows) {
                let ((l, lr), (r, rr)) = self.split_node(&mut nodes, idx, &rows, &split);
                frontier.push_back((l, lr, depth + 1));
                frontier.push_back((r, rr, depth + 1));
            }
        }
        RegressionTree { nodes }
    }

    fn leaf_wise(&self, rows: &[usize]) -> RegressionTree {
        let mut nodes = vec![self.leaf(rows)];
        let mut open = vec![(0usize, rows.to_vec(), 0usize, self.candidate(rows, 0))];
        let mut leaves = 1;

        while leaves < self.params.max_leaves.max(1) {
            let best = open
                .iter()
                .enumerate()
                .filter_map(|(i, (_, _, _, split))| split.map(|s| (i, s.gain)))
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
            let Some((pos, _)) = best else {
                break;
            };
            let (idx, rows, depth, split) = open.swap_remove(pos);
            let Some(split) = split else {
                break;
            };
            let ((l, lr), (r, rr)) = self.split_node(&mut nodes, idx, &rows, &split);
            let left_split = self.candidate(&lr, depth + 1);
            let right_split = self.candidate(&rr, depth + 1);
            open.push((l, lr, depth + 1, left_split));
            open.push((r, rr, depth + 1, right_split));
            leaves += 1;
        }
        RegressionTree { nodes }
    }

    fn candidate(&self, rows: &[usize], depth: usize) -> Option<SplitCandidate> {
        if self.depth_allows(depth) {
            self.best_split(rows)
        } else {
            None
        }
    }

    fn oblivious(&self, rows: &[usize]) -> RegressionTree {
        let max_depth = self.params.max_depth.unwrap_or(6);
        let mut groups: Vec<Vec<usize>> = vec![rows.to_vec()];
        let mut levels: Vec<SplitCandidate> = Vec::new();

        for _ in 0..max_depth {
            let Some(split) = self.best_shared_split(&groups) else {
                break;
            };
            groups = groups
                .iter()
                .flat_map(|g| {
                    let (l, r) = self.partition(g, &split);
                    [l, r]
                })
                .collect();
            levels.push(split);
        }

        let values: Vec<f64> = groups
            .iter()
            .map(|g| leaf_value(self.residuals, g, self.params.reg_lambda))
            .collect();
        let mut nodes = Vec::with_capacity(2 * values.len());
        build_symmetric(&mut nodes, &levels, &values, 0, 0);
        RegressionTree { nodes }
    }

    fn best_split(&self, rows: &[usize]) -> Option<SplitCandidate> {
        if rows.len() < 2 * self.params.min_samples_leaf.max(1) {
            return None;
        }
        let search = |&feature: &usize| self.best_split_on(rows, feature);
        let best = if rows.len() * self.features.len() >= PARALLEL_THRESHOLD {
            self.features
                .par_iter()
                .map(search)
                .reduce(|| None, pick)
        } else {
            self.features.iter().map(search).fold(None, pick)
        };
        best.filter(|s| s.gain > self.params.min_split_gain && s.gain > 0.0)
    }

    fn best_split_on(&self, rows: &[usize], feature: usize) -> Option<SplitCandidate> {
        let lambda = self.params.reg_lambda;
        let min_leaf = self.params.min_samples_leaf.max(1);
        let order = sorted_by_feature(self.x, rows, feature);
        let n = order.len();
        let total: f64 = order.iter().map(|&r| self.residuals[r]).sum();
        let parent = score_term(total, n, lambda);

        let mut best = None;
        let mut left_sum = 0.0;
        for i in 0..n.saturating_sub(1) {
            left_sum += self.residuals[order[i]];
            let value = self.x[[order[i], feature]];
            let next = self.x[[order[i + 1], feature]];
            let left_n = i + 1;
            if next <= value || left_n < min_leaf || n - left_n < min_leaf {
                continue;
            }
            let gain = score_term(left_sum, left_n, lambda)
                + score_term(total - left_sum, n - left_n, lambda)
                - parent;
            best = pick(
                best,
                Some(SplitCandidate {
                    feature,
                    threshold: (value + next) / 2.0,
                    gain,
                }),
            );
        }
        best
    }

    fn best_shared_split(&self, groups: &[Vec<usize>]) -> Option<SplitCandidate> {
        let total_rows: usize = groups.iter().map(Vec::len).sum();
        if total_rows < 2 * self.params.min_samples_leaf.max(1) {
            return None;
        }
        let search = |&feature: &usize| self.best_shared_split_on(groups, feature);
        let best = if total_rows * self.features.len() >= PARALLEL_THRESHOLD {
            self.features
                .par_iter()
                .map(search)
                .reduce(|| None, pick)
        } else {
            self.features.iter().map(search).fold(None, pick)
        };
        best.filter(|s| s.gain > self.params.min_split_gain && s.gain > 0.0)
    }

    fn best_shared_split_on(&self, groups: &[Vec<usize>], feature: usize) -> Option<SplitCandidate> {
        let lambda = self.params.reg_lambda;
        let min_leaf = self.params.min_samples_leaf.max(1);

        let mut tagged: Vec<(f64, usize, f64)> = groups
            .iter()
            .enumerate()
            .flat_map(|(g, rows)| {
                rows.iter()
                    .map(move |&r| (self.x[[r, feature]], g, self.residuals[r]))
            })
            .collect();
        tagged.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

        let totals: Vec<(f64, usize)> = groups
            .iter()
            .map(|rows| (rows.iter().map(|&r| self.residuals[r]).sum(), rows.len()))
            .collect();
        let parent: f64 = totals.iter().map(|&(g, n)| score_term(g, n, lambda)).sum();

        let mut left: Vec<(f64, usize)> = vec![(0.0, 0); groups.len()];
        let mut current = parent;
        let n = tagged.len();
        let mut best = None;

        for i in 0..n.saturating_sub(1) {
            let (value, g, r) = tagged[i];
            let (total_g, total_n) = totals[g];
            let (lg, ln) = left[g];
            current -= score_term(lg, ln, lambda) + score_term(total_g - lg, total_n - ln, lambda);
            left[g] = (lg + r, ln + 1);
            let (lg, ln) = left[g];
            current += score_term(lg, ln, lambda) + score_term(total_g - lg, total_n - ln, lambda);

            let next = tagged[i + 1].0;
            let left_n = i + 1;
            if next <= value || left_n < min_leaf || n - left_n < min_leaf {
                continue;
            }
            best = pick(
                best,
                Some(SplitCandidate {
                    feature,
                    threshold: (value + next) / 2.0,
                    gain: current - parent,
                }),
            );
        }
        best
    }
}

fn build_symmetric(
    nodes: &mut Vec<Node>,
    levels: &[SplitCandidate],
    values: &[f64],
    level: usize,
    index: usize,
) -> usize {
    let id = nodes.len();
    if level == levels.len() {
        nodes.push(Node::Leaf {
            value: values[index],
        });
        return id;
    }
    nodes.push(Node::Leaf { value: 0.0 });
    let left = build_symmetric(nodes, levels, values, level + 1, 2 * index);
    let right = build_symmetric(nodes, levels, values, level + 1, 2 * index + 1);
    nodes[id] = Node::Split {
        feature: levels[level].feature,
        threshold: levels[level].threshold,
        left,
        right,
    };
    id
}
