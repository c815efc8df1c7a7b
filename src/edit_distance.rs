//! Exact graph edit distance between small topologies.
//!
//! Nodes are free to insert, delete or substitute. Edges carry a length and a
//! connection count and are priced by a [`CostModel`] normalised over the
//! candidate set. The search is a depth-first branch-and-bound over node
//! mappings. A greedy descent seeds the bound and the search prunes on a
//! lower bound for the edges still open. When the wall-clock deadline passes,
//! the best mapping found so far is reported as approximate.
use crate::graph::{NetworkTopologyInfo, TopologyGraph};
use petgraph::visit::EdgeRef;
use std::time::Instant;

/// Expansions between two deadline checks.
const DEADLINE_CHECK_INTERVAL: usize = 256;

/// Attributes of one (possibly aggregated) edge.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EdgeAttrs {
    pub length: f64,
    pub connections: usize,
}

impl EdgeAttrs {
    fn absorb(&mut self, other: EdgeAttrs) {
        self.length += other.length;
        self.connections += other.connections;
    }
}

/// Edge costs, normalised by the largest edge length and connection count of
/// the candidate set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel {
    max_length: f64,
    max_connections: usize,
}

impl CostModel {
    pub fn new(max_length: f64, max_connections: usize) -> Self {
        Self {
            max_length,
            max_connections,
        }
    }

    pub fn from_candidates<'a, I>(candidates: I) -> Self
    where
        I: IntoIterator<Item = &'a NetworkTopologyInfo>,
    {
        let mut model = Self::new(0.0, 0);
        for topology in candidates {
            model.max_length = model.max_length.max(topology.max_edge_length());
            model.max_connections = model.max_connections.max(topology.max_edge_connections());
        }
        model
    }

    pub fn max_length(&self) -> f64 {
        self.max_length
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Cost of inserting or deleting an edge.
    pub fn edge_insertion(&self, edge: EdgeAttrs) -> f64 {
        let length = if self.max_length > 0.0 {
            edge.length / self.max_length
        } else {
            0.0
        };
        let connections = if self.max_connections > 0 {
            edge.connections as f64 / self.max_connections as f64
        } else {
            0.0
        };
        length + connections
    }

    pub fn edge_substitution(&self, a: EdgeAttrs, b: EdgeAttrs) -> f64 {
        let min_length = a.length.min(b.length);
        let length = if min_length > 0.0 {
            (a.length - b.length).abs() / min_length
        } else if a.length == 0.0 && b.length == 0.0 {
            0.0
        } else {
            1.0
        };
        let connections = if a.connections == 0 || b.connections == 0 {
            1.0
        } else {
            a.connections.abs_diff(b.connections) as f64 / a.connections.min(b.connections) as f64
        };
        length + connections
    }

    /// Symmetric relative difference of the total connection counts.
    pub fn global_term(a: usize, b: usize) -> f64 {
        match (a, b) {
            (0, 0) => 0.0,
            (0, x) | (x, 0) => x as f64,
            _ => (a.max(b) - a.min(b)) as f64 / a.min(b) as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EditDistance {
    /// The search finished, the distance is minimal.
    Complete(f64),
    /// The deadline passed mid-search. The distance is an upper bound.
    Approximate(f64),
    /// The deadline had passed before any mapping was priced.
    TimedOut,
}

impl EditDistance {
    pub fn value(&self) -> Option<f64> {
        match self {
            EditDistance::Complete(d) | EditDistance::Approximate(d) => Some(*d),
            EditDistance::TimedOut => None,
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, EditDistance::Complete(_))
    }
}

/// Dense adjacency with parallel edges folded together.
struct CompactGraph {
    adjacency: Vec<Vec<Option<EdgeAttrs>>>,
    degrees: Vec<usize>,
}

impl CompactGraph {
    fn from_graph(graph: &TopologyGraph) -> Self {
        let n = graph.node_count();
        let mut adjacency = vec![vec![None; n]; n];
        for edge in graph.edge_references() {
            let (a, b) = (edge.source().index(), edge.target().index());
            let attrs = EdgeAttrs {
                length: edge.weight().length,
                connections: edge.weight().connections,
            };
            adjacency[a][b].get_or_insert_with(EdgeAttrs::default).absorb(attrs);
            if a != b {
                adjacency[b][a] = adjacency[a][b];
            }
        }
        let degrees = adjacency
            .iter()
            .map(|row| row.iter().filter(|e| e.is_some()).count())
            .collect();
        Self { adjacency, degrees }
    }

    fn len(&self) -> usize {
        self.adjacency.len()
    }

    fn edge(&self, a: usize, b: usize) -> Option<EdgeAttrs> {
        self.adjacency[a][b]
    }
}

struct Search<'a> {
    g1: &'a CompactGraph,
    g2: &'a CompactGraph,
    costs: &'a CostModel,
    order: Vec<usize>,
    // indexed by g1 node
    mapping: Vec<Option<usize>>,
    placed: Vec<bool>,
    used: Vec<bool>,
    best: f64,
    expansions: usize,
    deadline: Instant,
    timed_out: bool,
}

impl<'a> Search<'a> {
    fn new(g1: &'a CompactGraph, g2: &'a CompactGraph, costs: &'a CostModel, deadline: Instant) -> Self {
        let mut order: Vec<usize> = (0..g1.len()).collect();
        order.sort_by(|&a, &b| g1.degrees[b].cmp(&g1.degrees[a]).then(a.cmp(&b)));
        Self {
            g1,
            g2,
            costs,
            order,
            mapping: vec![None; g1.len()],
            placed: vec![false; g1.len()],
            used: vec![false; g2.len()],
            best: f64::INFINITY,
            expansions: 0,
            deadline,
            timed_out: false,
        }
    }

    fn pair_cost(&self, e1: Option<EdgeAttrs>, e2: Option<EdgeAttrs>) -> f64 {
        match (e1, e2) {
            (Some(a), Some(b)) => self.costs.edge_substitution(a, b),
            (Some(a), None) => self.costs.edge_insertion(a),
            (None, Some(b)) => self.costs.edge_insertion(b),
            (None, None) => 0.0,
        }
    }

    /// Edge cost added by mapping the `depth`-th node of the order to `target`.
    fn step_cost(&self, depth: usize, target: Option<usize>) -> f64 {
        let u = self.order[depth];
        let mut cost = self.pair_cost(
            self.g1.edge(u, u),
            target.and_then(|v| self.g2.edge(v, v)),
        );
        for &prev in &self.order[..depth] {
            let e2 = match (target, self.mapping[prev]) {
                (Some(v), Some(w)) => self.g2.edge(v, w),
                _ => None,
            };
            cost += self.pair_cost(self.g1.edge(u, prev), e2);
        }
        cost
    }

    /// Insertion cost of every g2 edge with an endpoint nothing mapped onto.
    fn leftover_cost(&self) -> f64 {
        let n = self.g2.len();
        let mut cost = 0.0;
        for a in 0..n {
            for b in a..n {
                if self.used[a] && self.used[b] {
                    continue;
                }
                if let Some(edge) = self.g2.edge(a, b) {
                    cost += self.costs.edge_insertion(edge);
                }
            }
        }
        cost
    }

    /// Lower bound on the cost of the edges not yet priced.
    ///
    /// An open g1 edge is substituted by an open g2 edge or deleted, and the
    /// other way round, so at least the surplus of the larger side is
    /// inserted or deleted.
    fn remaining_bound(&self) -> f64 {
        let open1 = self.open_insertions(self.g1, &self.placed);
        let open2 = self.open_insertions(self.g2, &self.used);
        let (mut larger, smaller) = if open1.len() >= open2.len() {
            (open1, open2.len())
        } else {
            (open2, open1.len())
        };
        let surplus = larger.len() - smaller;
        larger.sort_by(f64::total_cmp);
        larger[..surplus].iter().sum()
    }

    fn open_insertions(&self, graph: &CompactGraph, settled: &[bool]) -> Vec<f64> {
        let n = graph.len();
        let mut costs = Vec::new();
        for a in 0..n {
            for b in a..n {
                if settled[a] && settled[b] {
                    continue;
                }
                if let Some(edge) = graph.edge(a, b) {
                    costs.push(self.costs.edge_insertion(edge));
                }
            }
        }
        costs
    }

    fn options(&self, depth: usize) -> Vec<(f64, Option<usize>)> {
        let mut options: Vec<(f64, Option<usize>)> = (0..self.g2.len())
            .filter(|&v| !self.used[v])
            .map(Some)
            .chain(std::iter::once(None))
            .map(|target| (self.step_cost(depth, target), target))
            .collect();
        options.sort_by(|a, b| a.0.total_cmp(&b.0));
        options
    }

    fn assign(&mut self, u: usize, target: Option<usize>) {
        self.mapping[u] = target;
        self.placed[u] = true;
        if let Some(v) = target {
            self.used[v] = true;
        }
    }

    fn unassign(&mut self, u: usize, target: Option<usize>) {
        if let Some(v) = target {
            self.used[v] = false;
        }
        self.placed[u] = false;
        self.mapping[u] = None;
    }

    /// Takes the cheapest option at every depth and records the result as the
    /// first bound.
    fn seed(&mut self) {
        let mut cost = 0.0;
        let mut taken = Vec::with_capacity(self.order.len());
        for depth in 0..self.order.len() {
            let Some(&(step, target)) = self.options(depth).first() else {
                break;
            };
            let u = self.order[depth];
            self.assign(u, target);
            taken.push((u, target));
            cost += step;
        }
        self.best = cost + self.leftover_cost();
        for (u, target) in taken.into_iter().rev() {
            self.unassign(u, target);
        }
    }

    fn expand(&mut self, depth: usize, cost: f64) {
        if self.timed_out {
            return;
        }
        if self.expansions % DEADLINE_CHECK_INTERVAL == 0 && Instant::now() >= self.deadline {
            self.timed_out = true;
            return;
        }
        self.expansions += 1;
        if depth == self.order.len() {
            let total = cost + self.leftover_cost();
            if total < self.best {
                self.best = total;
            }
            return;
        }
        if cost + self.remaining_bound() >= self.best {
            return;
        }

        let u = self.order[depth];
        for (step, target) in self.options(depth) {
            let next = cost + step;
            if next >= self.best {
                // options are sorted, nothing cheaper follows
                break;
            }
            self.assign(u, target);
            self.expand(depth + 1, next);
            self.unassign(u, target);
            if self.timed_out {
                return;
            }
        }
    }
}

/// Edit distance between the edge structures of `g1` and `g2`.
///
/// Does not include the global connection term, see [`CostModel::global_term`].
/// Returns [`EditDistance::TimedOut`] only when `deadline` has already passed
/// on entry.
pub fn edit_distance(
    g1: &TopologyGraph,
    g2: &TopologyGraph,
    costs: &CostModel,
    deadline: Instant,
) -> EditDistance {
    if Instant::now() >= deadline {
        return EditDistance::TimedOut;
    }
    let (c1, c2) = (CompactGraph::from_graph(g1), CompactGraph::from_graph(g2));
    let mut search = Search::new(&c1, &c2, costs, deadline);
    search.seed();
    search.expand(0, 0.0);
    if search.timed_out {
        log::debug!(
            "Edit distance search stopped at the deadline after {} expansions, keeping {}.",
            search.expansions,
            search.best
        );
        return EditDistance::Approximate(search.best);
    }
    EditDistance::Complete(search.best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgePayload, NodeKind, NodePayload};
    use crate::test_utils::path_graph;
    use approx::assert_relative_eq;
    use geo::coord;
    use petgraph::graph::NodeIndex;
    use std::time::Duration;

    fn later() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[test]
    fn test_cost_model_guards() {
        let costs = CostModel::new(10.0, 4);
        let a = EdgeAttrs { length: 5.0, connections: 2 };
        assert_relative_eq!(costs.edge_insertion(a), 1.0);
        assert_relative_eq!(CostModel::new(0.0, 0).edge_insertion(a), 0.0);

        let b = EdgeAttrs { length: 10.0, connections: 3 };
        assert_relative_eq!(costs.edge_substitution(a, b), 1.5);
        assert_relative_eq!(costs.edge_substitution(a, a), 0.0);
        let empty = EdgeAttrs::default();
        assert_relative_eq!(costs.edge_substitution(empty, empty), 1.0);
        assert_relative_eq!(costs.edge_substitution(empty, a), 2.0);

        assert_relative_eq!(CostModel::global_term(0, 0), 0.0);
        assert_relative_eq!(CostModel::global_term(0, 3), 3.0);
        assert_relative_eq!(CostModel::global_term(4, 2), 1.0);
    }

    #[test]
    fn test_identical_graphs_cost_nothing() {
        let g = path_graph(&[(2.0, 1), (3.0, 2), (1.0, 4)]);
        let costs = CostModel::new(3.0, 4);
        assert_eq!(edit_distance(&g, &g, &costs, later()), EditDistance::Complete(0.0));
    }

    #[test]
    fn test_extra_edge_costs_an_insertion() {
        let short = path_graph(&[(2.0, 1)]);
        let long = path_graph(&[(2.0, 1), (4.0, 2)]);
        let costs = CostModel::new(4.0, 2);
        let forward = edit_distance(&short, &long, &costs, later()).value().unwrap();
        let backward = edit_distance(&long, &short, &costs, later()).value().unwrap();
        assert_relative_eq!(forward, 2.0);
        assert_relative_eq!(backward, 2.0);
    }

    #[test]
    fn test_parallel_edges_are_aggregated() {
        let mut doubled = path_graph(&[(1.0, 1)]);
        let mut payload = EdgePayload::from_lines(Vec::new());
        payload.length = 2.0;
        payload.connections = 2;
        doubled.add_edge(NodeIndex::new(0), NodeIndex::new(1), payload);
        let merged = path_graph(&[(3.0, 3)]);
        let costs = CostModel::new(3.0, 3);
        assert_eq!(
            edit_distance(&doubled, &merged, &costs, later()),
            EditDistance::Complete(0.0)
        );
    }

    /// A feeder of `spurs` branches of `depth` edges off one trunk.
    fn feeder(spurs: usize, depth: usize, offset: usize) -> TopologyGraph {
        let mut graph = path_graph(&[(4.0, 2), (3.0, 1)]);
        let trunk = NodeIndex::new(2);
        for s in 0..spurs {
            let mut prev = trunk;
            for d in 0..depth {
                let next = graph.add_node(NodePayload::new(
                    coord! { x: s as f64, y: d as f64 + 1.0 },
                    NodeKind::Junction,
                ));
                let mut payload = EdgePayload::from_lines(Vec::new());
                payload.length = (s + d + offset) as f64 + 1.0;
                payload.connections = (s * d + offset) % 4 + 1;
                graph.add_edge(prev, next, payload);
                prev = next;
            }
        }
        graph
    }

    #[test]
    fn test_seed_bounds_the_exact_distance() {
        let g1 = CompactGraph::from_graph(&feeder(2, 2, 0));
        let g2 = CompactGraph::from_graph(&feeder(2, 2, 1));
        let costs = CostModel::new(8.0, 4);
        let mut search = Search::new(&g1, &g2, &costs, later());
        search.seed();
        assert!(search.best.is_finite());
        assert!(search.remaining_bound() <= search.best);

        let exact = edit_distance(&feeder(2, 2, 0), &feeder(2, 2, 1), &costs, later());
        assert!(exact.is_exact());
        assert!(exact.value().unwrap() <= search.best);
    }

    #[test]
    fn test_surplus_edges_bound_the_remaining_cost() {
        let g1 = CompactGraph::from_graph(&path_graph(&[(2.0, 1), (4.0, 2), (1.0, 1)]));
        let g2 = CompactGraph::from_graph(&path_graph(&[(2.0, 1)]));
        let costs = CostModel::new(4.0, 2);
        let search = Search::new(&g1, &g2, &costs, later());
        // the two cheapest g1 edges are (1, 1) and (2, 1)
        assert_relative_eq!(search.remaining_bound(), 0.25 + 0.5 + 0.5 + 0.5);
    }

    #[test]
    fn test_larger_feeders_finish_with_a_distance() {
        let g1 = feeder(3, 4, 0);
        let g2 = feeder(3, 3, 1);
        assert!(g1.edge_count() >= 10 && g2.edge_count() >= 10);
        let costs = CostModel::new(10.0, 4);
        let deadline = Instant::now() + Duration::from_secs(2);
        let distance = edit_distance(&g1, &g2, &costs, deadline);
        let value = distance.value().unwrap();
        assert!(value.is_finite());
        // three edges have no counterpart, each costs at least 1 / 4
        assert!(value >= 0.75);
    }

    #[test]
    fn test_passed_deadline_times_out() {
        let edges: Vec<(f64, usize)> = (1..12).map(|i| (i as f64, i)).collect();
        let g1 = path_graph(&edges);
        let g2 = path_graph(&edges[1..]);
        let costs = CostModel::new(12.0, 12);
        let deadline = Instant::now();
        assert_eq!(edit_distance(&g1, &g2, &costs, deadline), EditDistance::TimedOut);
    }
}
