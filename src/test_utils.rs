//! Shared fixtures for the unit tests.
use crate::config::ExtractionConfig;
use crate::graph::{EdgePayload, NetworkTopologyInfo, NodeKind, NodePayload, TopologyGraph};
use crate::line_index::LineIndex;
use crate::source::{Building, GridLayers, Station};
use geo::geometry::{Coord, LineString, Polygon};
use geo::polygon;

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub(crate) fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
    polygon![
        (x: x0, y: y0),
        (x: x1, y: y0),
        (x: x1, y: y1),
        (x: x0, y: y1),
        (x: x0, y: y0),
    ]
}

/// The 2x2 station footprint most LV fixtures start from.
pub(crate) fn station_square() -> Polygon<f64> {
    rect(0.0, 0.0, 2.0, 2.0)
}

pub(crate) fn ls(coords: &[(f64, f64)]) -> LineString<f64> {
    LineString::from(
        coords
            .iter()
            .map(|&(x, y)| Coord { x, y })
            .collect::<Vec<_>>(),
    )
}

/// LV layers with one square station at the origin.
pub(crate) fn lv_layers(lines: Vec<LineString<f64>>, buildings: Vec<Building>) -> GridLayers {
    GridLayers::new(ExtractionConfig::default())
        .with_lv_lines(lines)
        .with_lv_mv_stations(vec![Station::with_footprint(station_square())])
        .with_buildings(buildings)
}

/// MV layers around an HV station at (1, 1) housed in a 2003 building.
pub(crate) fn mv_layers(
    lines: Vec<LineString<f64>>,
    lv_mv_stations: Vec<Coord<f64>>,
    extra_buildings: Vec<Building>,
) -> GridLayers {
    let mut buildings = vec![Building::new(rect(0.0, 0.0, 2.0, 2.0), None, Some(2003))];
    buildings.extend(extra_buildings);
    GridLayers::new(ExtractionConfig::default())
        .with_mv_lines(lines)
        .with_hv_stations(vec![Station::at(Coord { x: 1.0, y: 1.0 })])
        .with_lv_mv_stations(lv_mv_stations.into_iter().map(Station::at).collect())
        .with_buildings(buildings)
}

/// A chain of edges given as `(length, connections)`, starting at a station node.
pub(crate) fn path_graph(edges: &[(f64, usize)]) -> TopologyGraph {
    let mut graph = TopologyGraph::default();
    let mut prev = graph.add_node(NodePayload::new(Coord { x: 0.0, y: 0.0 }, NodeKind::Station));
    for (i, &(length, connections)) in edges.iter().enumerate() {
        let next = graph.add_node(NodePayload::new(
            Coord { x: i as f64 + 1.0, y: 0.0 },
            NodeKind::Junction,
        ));
        let mut payload = EdgePayload::from_lines(Vec::new());
        payload.length = length;
        payload.connections = connections;
        graph.add_edge(prev, next, payload);
        prev = next;
    }
    graph
}

pub(crate) fn topology(graph: TopologyGraph) -> NetworkTopologyInfo {
    let index = LineIndex::build(vec![ls(&[(0.0, 0.0), (1.0, 0.0)])], 0.12, 1e-6);
    let start = index.orient_at(0, Coord { x: 0.0, y: 0.0 }, 0.0).unwrap();
    NetworkTopologyInfo::new(graph, start)
}

pub(crate) fn path_topology(edges: &[(f64, usize)]) -> NetworkTopologyInfo {
    topology(path_graph(edges))
}

/// An MV ring leaving the HV station at (1, 1) and returning through (20, 20).
pub(crate) fn ring_lines() -> Vec<LineString<f64>> {
    vec![
        ls(&[(2.0, 1.0), (22.0, 1.0)]),
        ls(&[(22.0, 1.0), (50.0, 1.0)]),
        ls(&[(50.0, 1.1), (40.0, 1.1)]),
        ls(&[(40.0, 1.1), (40.0, 30.0)]),
        ls(&[(38.0, 30.0), (20.0, 20.0)]),
        ls(&[(20.0, 20.0), (1.0, 2.0)]),
    ]
}

/// An MV ring with a single gap at (50, 1).
pub(crate) fn short_ring_lines() -> Vec<LineString<f64>> {
    vec![
        ls(&[(2.0, 1.0), (22.0, 1.0)]),
        ls(&[(22.0, 1.0), (50.0, 1.0)]),
        ls(&[(50.0, 1.1), (40.0, 1.1)]),
        ls(&[(40.0, 1.1), (1.0, 1.1)]),
    ]
}
