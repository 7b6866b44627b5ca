//! Tile graph and global relaxation.
//!
//! Every node holds a model mapping its tile's bounding-box frame to the world.
//! Edges carry point correspondences between two tiles; [`TileGraph::minimize`]
//! refits free models until the correspondences agree, holding fixed nodes in
//! place.


use std::collections::{HashMap, HashSet, VecDeque};

use glam::{DAffine2, DVec2};

use crate::cancel::CancelToken;
use crate::config::OptimizerConfig;
use crate::error::Result;
use crate::model::{fit_with_fallback, ModelKind, PointMatch};
use crate::tile::TileId;

/// Correspondences from one node to another.
#[derive(Debug, Clone)]
pub struct Edge {
    /// Index of the connected node.
    pub other: usize,
    /// `p1` in this node's frame, `p2` in the connected node's frame.
    pub matches: Vec<PointMatch>,
}

#[derive(Debug, Clone)]
pub struct TileNode {
    pub id: TileId,
    pub model: DAffine2,
    pub fixed: bool,
    edges: Vec<Edge>,
}

impl TileNode {
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    fn edge_mut(&mut self, other: usize) -> &mut Edge {
        match self.edges.iter().position(|e| e.other == other) {
            Some(i) => &mut self.edges[i],
            None => {
                self.edges.push(Edge {
                    other,
                    matches: Vec::new(),
                });
                let last = self.edges.len() - 1;
                &mut self.edges[last]
            }
        }
    }
}

/// Outcome of a relaxation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizerReport {
    /// Sweeps performed by the last minimization.
    pub iterations: usize,
    /// Weighted mean match distance after the last sweep.
    pub mean_error: f64,
    /// Largest match distance after the last sweep.
    pub max_error: f64,
    /// Tiles with no path to a fixed tile; their models were left alone.
    pub unanchored: Vec<TileId>,
    /// Edges dropped by outlier removal, in removal order.
    pub removed_edges: Vec<(TileId, TileId)>,
    /// True when the error plateaued before the iteration limit.
    pub converged: bool,
}

/// Adjacency-list graph of tiles connected by point correspondences.
#[derive(Debug, Clone, Default)]
pub struct TileGraph {
    nodes: Vec<TileNode>,
    index: HashMap<TileId, usize>,
}

impl TileGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, or reset the model of an existing one.
    pub fn add_node(&mut self, id: TileId, model: DAffine2) -> usize {
        if let Some(&i) = self.index.get(&id) {
            self.nodes[i].model = model;
            return i;
        }
        let i = self.nodes.len();
        self.nodes.push(TileNode {
            id,
            model,
            fixed: false,
            edges: Vec::new(),
        });
        self.index.insert(id, i);
        i
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[TileNode] {
        &self.nodes
    }

    pub fn node(&self, id: TileId) -> Option<&TileNode> {
        self.index.get(&id).map(|&i| &self.nodes[i])
    }

    pub fn model(&self, id: TileId) -> Option<DAffine2> {
        self.node(id).map(|n| n.model)
    }

    /// Register that `b`'s origin sits at `(dx, dy)` in `a`'s frame.
    pub fn add_matches(&mut self, a: TileId, b: TileId, dx: f64, dy: f64, weight: f64) {
        let m = PointMatch::new(DVec2::new(dx, dy), DVec2::ZERO, weight);
        self.add_point_matches(a, b, &[m]);
    }

    /// Add correspondences with `p1` in `a`'s frame and `p2` in `b`'s frame.
    /// The mirrored matches are stored on `b`.
    pub fn add_point_matches(&mut self, a: TileId, b: TileId, matches: &[PointMatch]) {
        let (Some(&ia), Some(&ib)) = (self.index.get(&a), self.index.get(&b)) else {
            tracing::warn!(%a, %b, "Ignoring matches for a tile outside the graph");
            return;
        };
        if ia == ib || matches.is_empty() {
            return;
        }
        self.nodes[ia].edge_mut(ib).matches.extend_from_slice(matches);
        self.nodes[ib]
            .edge_mut(ia)
            .matches
            .extend(matches.iter().map(PointMatch::flipped));
    }

    /// Drop the edge between two nodes in both directions.
    pub fn remove_edge(&mut self, a: TileId, b: TileId) -> bool {
        let (Some(&ia), Some(&ib)) = (self.index.get(&a), self.index.get(&b)) else {
            return false;
        };
        let before = self.nodes[ia].edges.len();
        self.nodes[ia].edges.retain(|e| e.other != ib);
        self.nodes[ib].edges.retain(|e| e.other != ia);
        self.nodes[ia].edges.len() != before
    }

    /// Number of undirected edges.
    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|n| n.edges.len()).sum::<usize>() / 2
    }

    /// Groups of tiles connected through edges, each in insertion order.
    pub fn connected_components(&self) -> Vec<Vec<TileId>> {
        let mut seen = vec![false; self.nodes.len()];
        let mut components = Vec::new();
        for start in 0..self.nodes.len() {
            if seen[start] {
                continue;
            }
            let mut members = self.reachable_from(&[start], &mut seen);
            members.sort_unstable();
            components.push(members.into_iter().map(|i| self.nodes[i].id).collect());
        }
        components
    }

    fn reachable_from(&self, starts: &[usize], seen: &mut [bool]) -> Vec<usize> {
        let mut queue: VecDeque<usize> = VecDeque::new();
        let mut members = Vec::new();
        for &s in starts {
            if !seen[s] {
                seen[s] = true;
                queue.push_back(s);
            }
        }
        while let Some(i) = queue.pop_front() {
            members.push(i);
            for edge in &self.nodes[i].edges {
                if !seen[edge.other] {
                    seen[edge.other] = true;
                    queue.push_back(edge.other);
                }
            }
        }
        members
    }

    /// Gauss-Seidel relaxation of all free models.
    ///
    /// `fixed` tiles keep their models; when it names no tile of the graph the
    /// first node is fixed. Nodes without a path to a fixed node are reported
    /// as unanchored and left untouched.
    pub fn minimize(
        &mut self,
        fixed: &[TileId],
        config: &OptimizerConfig,
        kind: ModelKind,
        cancel: &CancelToken,
    ) -> Result<OptimizerReport> {
        if self.nodes.is_empty() {
            return Ok(OptimizerReport {
                converged: true,
                ..Default::default()
            });
        }

        let fixed_set: HashSet<usize> = fixed
            .iter()
            .filter_map(|id| self.index.get(id).copied())
            .collect();
        let mut fixed_indices: Vec<usize> = fixed_set.into_iter().collect();
        fixed_indices.sort_unstable();
        if fixed_indices.is_empty() {
            fixed_indices.push(0);
        }
        for node in &mut self.nodes {
            node.fixed = false;
        }
        for &i in &fixed_indices {
            self.nodes[i].fixed = true;
        }

        let mut anchored = vec![false; self.nodes.len()];
        let mut reached = self.reachable_from(&fixed_indices, &mut anchored);
        reached.sort_unstable();
        let free: Vec<usize> = reached
            .into_iter()
            .filter(|&i| !self.nodes[i].fixed)
            .collect();
        let unanchored: Vec<TileId> = self
            .nodes
            .iter()
            .zip(&anchored)
            .filter(|(_, &a)| !a)
            .map(|(n, _)| n.id)
            .collect();
        if !unanchored.is_empty() {
            tracing::debug!(count = unanchored.len(), "Tiles without a fixed anchor");
        }

        let mut report = OptimizerReport {
            unanchored,
            converged: true,
            ..Default::default()
        };
        if self.edge_count() == 0 {
            return Ok(report);
        }

        let mut sources = Vec::new();
        let mut targets = Vec::new();
        let mut weights = Vec::new();
        let mut previous = f64::MAX;
        let mut plateau = 0;
        report.converged = false;

        for iteration in 1..=config.max_iterations {
            cancel.check()?;

            for &i in &free {
                sources.clear();
                targets.clear();
                weights.clear();
                for edge in &self.nodes[i].edges {
                    let other = self.nodes[edge.other].model;
                    for m in &edge.matches {
                        sources.push(m.p1);
                        targets.push(other.transform_point2(m.p2));
                        weights.push(m.weight);
                    }
                }
                if let Some(model) = fit_with_fallback(kind, &sources, &targets, &weights) {
                    self.nodes[i].model = model;
                }
            }

            let (mean, max) = self.errors(&anchored);
            report.iterations = iteration;
            report.mean_error = mean;
            report.max_error = max;

            if (previous - mean).abs() < config.tolerance {
                plateau += 1;
                if plateau >= config.plateau_width {
                    report.converged = true;
                    break;
                }
            } else {
                plateau = 0;
            }
            previous = mean;
        }

        tracing::debug!(
            iterations = report.iterations,
            mean_error = report.mean_error,
            max_error = report.max_error,
            converged = report.converged,
            "Relaxation finished"
        );
        Ok(report)
    }

    /// Minimize, then repeatedly drop the edge holding the worst match while
    /// it stands out from the mean, re-minimizing after each removal.
    pub fn optimize_with_outlier_removal(
        &mut self,
        fixed: &[TileId],
        config: &OptimizerConfig,
        kind: ModelKind,
        cancel: &CancelToken,
    ) -> Result<OptimizerReport> {
        let mut removed = Vec::new();
        loop {
            let mut report = self.minimize(fixed, config, kind, cancel)?;
            let is_outlier = report.max_error > config.mean_factor * report.mean_error
                && report.max_error > config.min_outlier_distance;

            let worst = if is_outlier {
                self.worst_edge(&report.unanchored)
            } else {
                None
            };
            let Some((a, b)) = worst else {
                report.removed_edges = removed;
                return Ok(report);
            };

            tracing::debug!(
                %a,
                %b,
                max_error = report.max_error,
                mean_error = report.mean_error,
                "Removing inconsistent edge"
            );
            self.remove_edge(a, b);
            removed.push((a, b));
        }
    }

    // Weighted mean and max match distance over anchored nodes.
    fn errors(&self, anchored: &[bool]) -> (f64, f64) {
        let mut sum = 0.0;
        let mut total_weight = 0.0;
        let mut max = 0.0f64;
        for (node, _) in self.nodes.iter().zip(anchored).filter(|(_, &a)| a) {
            for edge in &node.edges {
                let other = &self.nodes[edge.other].model;
                for m in &edge.matches {
                    let d = m.distance(&node.model, other);
                    sum += d * m.weight;
                    total_weight += m.weight;
                    max = max.max(d);
                }
            }
        }
        let mean = if total_weight > 0.0 {
            sum / total_weight
        } else {
            0.0
        };
        (mean, max)
    }

    fn worst_edge(&self, unanchored: &[TileId]) -> Option<(TileId, TileId)> {
        let mut worst: Option<(f64, TileId, TileId)> = None;
        for node in self.nodes.iter().filter(|n| !unanchored.contains(&n.id)) {
            for edge in &node.edges {
                let other = &self.nodes[edge.other];
                for m in &edge.matches {
                    let d = m.distance(&node.model, &other.model);
                    if worst.is_none_or(|(w, _, _)| d > w) {
                        worst = Some((d, node.id, other.id));
                    }
                }
            }
        }
        worst.map(|(_, a, b)| (a, b))
    }
}
