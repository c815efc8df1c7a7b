use crate::line_index::NavigationLine;
use geo::geometry::{Coord, LineString, Polygon};
use petgraph::graph::{EdgeIndex, NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

/// Role of a node in an extracted topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// The station a run starts from.
    Station,
    /// A branch point where several cables meet.
    Junction,
    /// A dead end.
    Terminal,
    /// A station discovered mid-traversal in a ring.
    Transformer,
}

/// Payload for a topology node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePayload {
    pub position: Coord<f64>,
    pub kind: NodeKind,
    pub commissioned: Option<i32>,
}

impl NodePayload {
    pub fn new(position: Coord<f64>, kind: NodeKind) -> Self {
        Self {
            position,
            kind,
            commissioned: None,
        }
    }

    pub fn with_year(mut self, year: Option<i32>) -> Self {
        self.commissioned = year;
        self
    }

    /// Stations and transformers delimit the cable runs that share a cable type.
    pub fn is_asset(&self) -> bool {
        matches!(self.kind, NodeKind::Station | NodeKind::Transformer)
    }
}

/// Aggregated cable run between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgePayload {
    pub length: f64,
    pub connections: usize,
    pub buildings: Vec<Polygon<f64>>,
    pub lines: Vec<NavigationLine>,
    pub cable_type: Option<String>,
    pub commissioned: Option<i32>,
}

impl EdgePayload {
    pub fn from_lines(lines: Vec<NavigationLine>) -> Self {
        let length = lines.iter().map(|l| l.length()).sum();
        Self {
            length,
            connections: 0,
            buildings: Vec::new(),
            lines,
            cable_type: None,
            commissioned: None,
        }
    }
}

pub type TopologyGraph = UnGraph<NodePayload, EdgePayload>;

/// Finished result of one extraction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkTopologyInfo {
    graph: TopologyGraph,
    lines: Vec<LineString<f64>>,
    starting_line: NavigationLine,
    total_connections: usize,
    total_length: f64,
    buildings: Vec<Polygon<f64>>,
}

impl NetworkTopologyInfo {
    pub fn new(graph: TopologyGraph, starting_line: NavigationLine) -> Self {
        let mut lines = Vec::new();
        let mut buildings = Vec::new();
        let mut total_connections = 0;
        let mut total_length = 0.0;
        for edge in graph.edge_references() {
            let payload = edge.weight();
            total_connections += payload.connections;
            total_length += payload.length;
            lines.extend(payload.lines.iter().map(|l| l.line().clone()));
            buildings.extend(payload.buildings.iter().cloned());
        }
        Self {
            graph,
            lines,
            starting_line,
            total_connections,
            total_length,
            buildings,
        }
    }

    pub fn graph(&self) -> &TopologyGraph {
        &self.graph
    }

    pub fn lines(&self) -> &[LineString<f64>] {
        &self.lines
    }

    pub fn starting_line(&self) -> &NavigationLine {
        &self.starting_line
    }

    pub fn total_connections(&self) -> usize {
        self.total_connections
    }

    pub fn total_length(&self) -> f64 {
        self.total_length
    }

    pub fn buildings(&self) -> &[Polygon<f64>] {
        &self.buildings
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn has_cycle(&self) -> bool {
        petgraph::algo::is_cyclic_undirected(&self.graph)
    }

    pub fn max_edge_length(&self) -> f64 {
        self.graph
            .edge_weights()
            .map(|e| e.length)
            .fold(0.0, f64::max)
    }

    pub fn max_edge_connections(&self) -> usize {
        self.graph
            .edge_weights()
            .map(|e| e.connections)
            .max()
            .unwrap_or(0)
    }

    /// `(smaller node, larger node, length, connections)` for each edge in insertion order.
    pub fn edge_summary(&self) -> Vec<(usize, usize, f64, usize)> {
        self.graph
            .edge_references()
            .map(|e| {
                let (a, b) = (e.source().index(), e.target().index());
                (a.min(b), a.max(b), e.weight().length, e.weight().connections)
            })
            .collect()
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&n| self.graph[n].kind == kind)
            .collect()
    }

    pub fn edge(&self, edge: EdgeIndex) -> Option<&EdgePayload> {
        self.graph.edge_weight(edge)
    }
}

impl AsRef<NetworkTopologyInfo> for NetworkTopologyInfo {
    fn as_ref(&self) -> &NetworkTopologyInfo {
        self
    }
}
