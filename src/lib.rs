//! gridtopo: extracts electrical grid topologies from line, station and
//! building layers, and matches them against reference topologies by graph
//! edit distance.

// Module declarations (alphabetical)
pub mod archetype;
pub mod assets;
pub mod builder;
pub mod cable;
pub mod common;
pub mod config;
pub mod connections;
pub mod edit_distance;
pub mod error;
pub mod graph;
pub mod line_index;
pub mod matcher;
pub mod source;

#[cfg(test)]
mod test_utils;

pub use archetype::{ArchetypeLibrary, CollectionMatch, ReferenceCollection, ReferenceTopology};
pub use assets::{emit_assets, Asset, AssetId};
pub use builder::{extract_lv_topologies, RingExtractor, TopologyBuilder, TraversalMode};
pub use cable::{CableCase, CableTypeResolver, YearBasedCableTypes};
pub use config::{ExtractionConfig, MatchConfig, MAX_MATCH_TIMEOUT};
pub use error::{Error, Result};
pub use graph::{NetworkTopologyInfo, NodeKind, TopologyGraph};
pub use line_index::{LineIndex, NavigationLine};
pub use matcher::{find_best_match, MatchResult, TopologyMatcher};
pub use source::{Building, GridData, GridLayers, Station, StationStart, VoltageTier};
