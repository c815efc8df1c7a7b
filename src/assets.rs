//! Turns an extracted topology into a flat list of grid assets.
use crate::graph::{NetworkTopologyInfo, NodeKind};
use geo::geometry::{Coord, LineString};
use serde::{Deserialize, Serialize};

pub type AssetId = usize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Asset {
    Joint {
        id: AssetId,
        position: Coord<f64>,
    },
    Transformer {
        id: AssetId,
        joint: AssetId,
        position: Coord<f64>,
        commissioned: Option<i32>,
    },
    Cable {
        id: AssetId,
        geometry: LineString<f64>,
        length: f64,
        cable_type: Option<String>,
        commissioned: Option<i32>,
        from: AssetId,
        to: AssetId,
    },
}

impl Asset {
    pub fn id(&self) -> AssetId {
        match self {
            Asset::Joint { id, .. } | Asset::Transformer { id, .. } | Asset::Cable { id, .. } => *id,
        }
    }

    pub fn is_cable(&self) -> bool {
        matches!(self, Asset::Cable { .. })
    }

    pub fn is_transformer(&self) -> bool {
        matches!(self, Asset::Transformer { .. })
    }
}

#[derive(Default)]
struct AssetSink {
    assets: Vec<Asset>,
}

impl AssetSink {
    fn next_id(&self) -> AssetId {
        self.assets.len()
    }

    fn joint(&mut self, position: Coord<f64>) -> AssetId {
        let id = self.next_id();
        self.assets.push(Asset::Joint { id, position });
        id
    }

    fn transformer(&mut self, joint: AssetId, position: Coord<f64>, commissioned: Option<i32>) {
        let id = self.next_id();
        self.assets.push(Asset::Transformer {
            id,
            joint,
            position,
            commissioned,
        });
    }
}

/// Emits joints, transformers and cables for `topology`.
///
/// The root station's joint comes first and its transformer last. Every
/// other node gets a joint, transformer nodes a transformer as well. Each
/// line becomes a cable, with joints between consecutive lines of an edge.
pub fn emit_assets(topology: &NetworkTopologyInfo) -> Vec<Asset> {
    let graph = topology.graph();
    let mut sink = AssetSink::default();
    let Some(root) = graph
        .node_indices()
        .find(|&n| graph[n].kind == NodeKind::Station)
        .or_else(|| graph.node_indices().next())
    else {
        return Vec::new();
    };

    let mut joints = vec![0; graph.node_count()];
    joints[root.index()] = sink.joint(graph[root].position);
    for node in graph.node_indices().filter(|&n| n != root) {
        let payload = &graph[node];
        let joint = sink.joint(payload.position);
        joints[node.index()] = joint;
        if payload.kind == NodeKind::Transformer {
            sink.transformer(joint, payload.position, payload.commissioned);
        }
    }

    for edge in graph.edge_indices() {
        let Some((source, target)) = graph.edge_endpoints(edge) else {
            continue;
        };
        let payload = &graph[edge];
        let mut from = joints[source.index()];
        for (i, nav) in payload.lines.iter().enumerate() {
            let cable = sink.next_id();
            let to = if i + 1 == payload.lines.len() {
                joints[target.index()]
            } else {
                // the intermediate joint follows its incoming cable
                cable + 1
            };
            sink.assets.push(Asset::Cable {
                id: cable,
                geometry: nav.line().clone(),
                length: nav.length(),
                cable_type: payload.cable_type.clone(),
                commissioned: payload.commissioned,
                from,
                to,
            });
            if i + 1 < payload.lines.len() {
                sink.joint(nav.open_end());
            }
            from = to;
        }
    }

    let station = &graph[root];
    sink.transformer(joints[root.index()], station.position, station.commissioned);
    log::debug!(
        "Emitted {} assets for a topology with {} edges.",
        sink.assets.len(),
        graph.edge_count()
    );
    sink.assets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::RingExtractor;
    use crate::source::Building;
    use crate::test_utils::{mv_layers, path_topology, rect, ring_lines, short_ring_lines};
    use geo::{coord, Rect};

    fn bounds(size: f64) -> Option<Rect<f64>> {
        Some(Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: size, y: size }))
    }

    fn counts(assets: &[Asset]) -> (usize, usize) {
        (
            assets.iter().filter(|a| a.is_cable()).count(),
            assets.iter().filter(|a| a.is_transformer()).count(),
        )
    }

    fn transformer_years(assets: &[Asset]) -> Vec<Option<i32>> {
        assets
            .iter()
            .filter_map(|a| match a {
                Asset::Transformer { commissioned, .. } => Some(*commissioned),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_ring_with_mid_station() {
        let layers = mv_layers(
            ring_lines(),
            vec![coord! { x: 39.0, y: 30.0 }],
            vec![Building::new(rect(38.0, 29.0, 40.0, 31.0), None, Some(1984))],
        );
        let ring = RingExtractor::for_layers(&layers, bounds(50.0)).next_ring().unwrap();
        let assets = emit_assets(&ring);
        assert_eq!(counts(&assets), (6, 3));
        for asset in &assets {
            if let Asset::Cable { cable_type, .. } = asset {
                let cable_type = cable_type.as_deref().unwrap();
                assert!(["GPLK-Cu-70", "GPLK-Al-150", "XLPE-Al-150"].contains(&cable_type));
            }
        }
    }

    #[test]
    fn test_ring_through_fallback_point() {
        let layers = mv_layers(short_ring_lines(), vec![], vec![]);
        let ring = RingExtractor::for_layers(&layers, bounds(50.0)).next_ring().unwrap();
        assert_eq!(counts(&emit_assets(&ring)), (4, 2));
    }

    #[test]
    fn test_transformer_years_end_with_the_station() {
        let layers = mv_layers(
            short_ring_lines(),
            vec![coord! { x: 50.0, y: 1.0 }],
            vec![Building::new(rect(49.0, 0.0, 51.0, 2.0), None, Some(1984))],
        );
        let ring = RingExtractor::for_layers(&layers, bounds(52.0)).next_ring().unwrap();
        let assets = emit_assets(&ring);
        assert_eq!(transformer_years(&assets), vec![Some(1984), Some(2003)]);
        assert!(matches!(assets.first(), Some(Asset::Joint { id: 0, .. })));
        assert!(assets.last().is_some_and(|a| a.is_transformer()));
    }

    #[test]
    fn test_ids_are_sequential_and_cables_link_joints() {
        let layers = mv_layers(
            ring_lines(),
            vec![coord! { x: 39.0, y: 30.0 }],
            vec![Building::new(rect(38.0, 29.0, 40.0, 31.0), None, Some(1984))],
        );
        let ring = RingExtractor::for_layers(&layers, bounds(50.0)).next_ring().unwrap();
        let assets = emit_assets(&ring);
        for (i, asset) in assets.iter().enumerate() {
            assert_eq!(asset.id(), i);
        }
        for asset in &assets {
            if let Asset::Cable { from, to, .. } = asset {
                assert!(matches!(assets[*from], Asset::Joint { .. }));
                assert!(matches!(assets[*to], Asset::Joint { .. }));
                assert_ne!(from, to);
            }
        }
    }

    #[test]
    fn test_edges_without_lines_emit_no_cables() {
        let assets = emit_assets(&path_topology(&[(2.0, 1)]));
        assert_eq!(counts(&assets), (0, 1));
        assert_eq!(assets.len(), 3);
    }
}
