use crate::config::MatchConfig;
use crate::error::{Error, Result};
use crate::graph::NetworkTopologyInfo;
use crate::matcher::TopologyMatcher;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};

/// A reference topology with the real-world assets its starting edge maps to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceTopology {
    pub topology: NetworkTopologyInfo,
    pub starting_transformer: Option<String>,
    pub starting_cable: Option<String>,
    /// Where the topology was extracted from, e.g. a dataset or area name.
    pub source: Option<String>,
}

impl ReferenceTopology {
    pub fn new(topology: NetworkTopologyInfo) -> Self {
        Self {
            topology,
            starting_transformer: None,
            starting_cable: None,
            source: None,
        }
    }

    pub fn with_assets(mut self, transformer: &str, cable: &str) -> Self {
        self.starting_transformer = Some(transformer.to_string());
        self.starting_cable = Some(cable.to_string());
        self
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }
}

impl AsRef<NetworkTopologyInfo> for ReferenceTopology {
    fn as_ref(&self) -> &NetworkTopologyInfo {
        &self.topology
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceCollection {
    pub name: String,
    pub topologies: Vec<ReferenceTopology>,
}

impl ReferenceCollection {
    pub fn new(name: &str, topologies: Vec<ReferenceTopology>) -> Self {
        Self {
            name: name.to_string(),
            topologies,
        }
    }
}

/// Best reference for one target topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetMatch {
    pub target: usize,
    pub reference: usize,
    pub distance: f64,
    pub starting_transformer: Option<String>,
    pub starting_cable: Option<String>,
}

/// The collection that best explains a set of targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMatch {
    pub collection: usize,
    pub name: String,
    pub total_distance: f64,
    pub matches: Vec<TargetMatch>,
    pub target_length: f64,
    pub target_connections: usize,
    pub reference_length: f64,
    pub reference_connections: usize,
}

/// Reference collections grouped by archetype id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchetypeLibrary {
    collections: BTreeMap<u32, Vec<ReferenceCollection>>,
}

impl ArchetypeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, archetype: u32, collection: ReferenceCollection) {
        self.collections.entry(archetype).or_default().push(collection);
    }

    pub fn collections(&self, archetype: u32) -> Result<&[ReferenceCollection]> {
        self.collections
            .get(&archetype)
            .map(Vec::as_slice)
            .ok_or(Error::UnknownArchetype(archetype))
    }

    pub fn archetypes(&self) -> Vec<u32> {
        self.collections.keys().copied().collect()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        Ok(serde_json::to_writer(writer, self)?)
    }

    /// Matches every target against each collection of `archetype` and
    /// returns the collection with the lowest summed distance. Later
    /// collections win ties.
    pub fn match_collections(
        &self,
        archetype: u32,
        targets: &[NetworkTopologyInfo],
        config: &MatchConfig,
    ) -> Result<CollectionMatch> {
        let collections = self.collections(archetype)?;
        let matcher = TopologyMatcher::new(config);
        let target_length = targets.iter().map(|t| t.total_length()).sum();
        let target_connections = targets.iter().map(|t| t.total_connections()).sum();

        let mut best: Option<CollectionMatch> = None;
        for (idx, collection) in collections.iter().enumerate() {
            let mut matches = Vec::with_capacity(targets.len());
            let (mut total_distance, mut reference_length, mut reference_connections) = (0.0, 0.0, 0);
            for (t, target) in targets.iter().enumerate() {
                let result = matcher.find_best_match(target, &collection.topologies)?;
                let reference = &collection.topologies[result.index];
                total_distance += result.distance;
                reference_length += reference.topology.total_length();
                reference_connections += reference.topology.total_connections();
                matches.push(TargetMatch {
                    target: t,
                    reference: result.index,
                    distance: result.distance,
                    starting_transformer: reference.starting_transformer.clone(),
                    starting_cable: reference.starting_cable.clone(),
                });
            }
            log::info!(
                "Collection {} scored {} over {} targets.",
                collection.name,
                total_distance,
                targets.len()
            );
            if best.as_ref().map_or(true, |b| total_distance <= b.total_distance) {
                best = Some(CollectionMatch {
                    collection: idx,
                    name: collection.name.clone(),
                    total_distance,
                    matches,
                    target_length,
                    target_connections,
                    reference_length,
                    reference_connections,
                });
            }
        }
        best.ok_or(Error::NoCandidateEvaluated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::path_topology;
    use approx::assert_relative_eq;

    fn library() -> ArchetypeLibrary {
        let mut library = ArchetypeLibrary::new();
        library.insert(
            3,
            ReferenceCollection::new(
                "short",
                vec![ReferenceTopology::new(path_topology(&[(2.0, 1)])).with_assets("T-1", "C-1")],
            ),
        );
        library.insert(
            3,
            ReferenceCollection::new(
                "forked",
                vec![
                    ReferenceTopology::new(path_topology(&[(5.0, 1)])),
                    ReferenceTopology::new(path_topology(&[(2.0, 1), (3.0, 2)]))
                        .with_assets("T-2", "C-2")
                        .with_source("reference area"),
                ],
            ),
        );
        library.insert(7, ReferenceCollection::new("empty", Vec::new()));
        library
    }

    #[test]
    fn test_lookup() {
        let library = library();
        assert_eq!(library.archetypes(), vec![3, 7]);
        assert_eq!(library.collections(3).unwrap().len(), 2);
        assert!(matches!(library.collections(4), Err(Error::UnknownArchetype(4))));
    }

    #[test]
    fn test_json_persistence() {
        let library = library();
        let json = library.to_json().unwrap();
        let loaded = ArchetypeLibrary::from_json(&json).unwrap();
        assert_eq!(loaded.archetypes(), library.archetypes());
        let forked = &loaded.collections(3).unwrap()[1];
        assert_eq!(forked.name, "forked");
        assert_eq!(forked.topologies[1].topology.edge_count(), 2);
        assert_eq!(forked.topologies[1].source.as_deref(), Some("reference area"));

        let mut buffer = Vec::new();
        library.to_writer(&mut buffer).unwrap();
        let from_reader = ArchetypeLibrary::from_reader(buffer.as_slice()).unwrap();
        assert_eq!(from_reader.collections(7).unwrap().len(), 1);
        assert!(ArchetypeLibrary::from_json("[]").is_err());
    }

    #[test]
    fn test_library_with_a_pointless_line_fails_to_load() {
        let library = library();
        let start = library.collections(3).unwrap()[1].topologies[1]
            .topology
            .starting_line()
            .clone();
        let stored = serde_json::to_string(&start).unwrap();
        let json = library.to_json().unwrap();
        assert!(json.contains(&stored));
        let broken = json.replace(
            &stored,
            &format!(r#"{{"index":{},"line":[],"open_at_first":false}}"#, start.index()),
        );
        assert!(matches!(
            ArchetypeLibrary::from_json(&broken),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn test_match_collections_picks_lowest_total() {
        let library = library();
        let targets = vec![path_topology(&[(2.0, 1), (3.0, 2)]), path_topology(&[(2.0, 1)])];
        let found = library
            .match_collections(3, &targets, &MatchConfig::default())
            .unwrap();
        assert_eq!(found.name, "forked");
        assert_eq!(found.collection, 1);
        assert_eq!(found.matches.len(), 2);
        assert_eq!(found.matches[0].reference, 1);
        assert_eq!(found.matches[0].starting_transformer.as_deref(), Some("T-2"));
        assert_relative_eq!(found.matches[0].distance, 0.0);
        assert_relative_eq!(found.target_length, 7.0);
        assert_eq!(found.target_connections, 4);
        assert!(found.reference_length > 0.0);
    }

    #[test]
    fn test_match_collections_errors() {
        let library = library();
        let targets = vec![path_topology(&[(2.0, 1)])];
        assert!(matches!(
            library.match_collections(9, &targets, &MatchConfig::default()),
            Err(Error::UnknownArchetype(9))
        ));
        assert!(matches!(
            library.match_collections(7, &targets, &MatchConfig::default()),
            Err(Error::NoCandidateEvaluated)
        ));
    }
}
