use crate::line_index::NavigationLine;
use crate::source::{ConsumerHit, GridData};
use geo::geometry::Polygon;
use std::collections::BTreeSet;

/// Consumers newly attributed to one edge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionTally {
    pub count: usize,
    pub buildings: Vec<Polygon<f64>>,
}

/// Attributes nearby consumers to edges, each consumer at most once per pass.
#[derive(Debug, Clone)]
pub struct ConnectionCounter {
    distance: f64,
    filter: fn(&ConsumerHit) -> bool,
    counted: BTreeSet<usize>,
}

impl ConnectionCounter {
    /// Counts residential consumers within `distance` of a cable.
    pub fn new(distance: f64) -> Self {
        Self::with_filter(distance, ConsumerHit::is_residential)
    }

    pub fn with_filter(distance: f64, filter: fn(&ConsumerHit) -> bool) -> Self {
        Self {
            distance,
            filter,
            counted: BTreeSet::new(),
        }
    }

    /// Number of consumers attributed so far in this pass.
    pub fn counted(&self) -> usize {
        self.counted.len()
    }

    pub fn is_counted(&self, consumer: usize) -> bool {
        self.counted.contains(&consumer)
    }

    pub fn count_connections<G: GridData + ?Sized>(
        &mut self,
        grid: &G,
        lines: &[NavigationLine],
    ) -> ConnectionTally {
        let mut tally = ConnectionTally::default();
        for nav in lines {
            for hit in grid.consumers_near(nav.line(), self.distance) {
                if !(self.filter)(&hit) || !self.counted.insert(hit.index) {
                    continue;
                }
                tally.count += 1;
                tally.buildings.push(hit.footprint);
            }
        }
        tally
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Building, ConsumerKind, VoltageTier};
    use crate::test_utils::{ls, lv_layers, rect};

    #[test]
    fn test_consumer_counted_once_across_edges() {
        let layers = lv_layers(
            vec![
                ls(&[(2.0, 1.0), (3.0, 1.0)]),
                ls(&[(3.0, 1.0), (3.0, 3.0)]),
            ],
            vec![
                Building::new(rect(3.2, 1.2, 3.8, 1.8), Some("woonfunctie"), Some(1990)),
                Building::new(rect(2.2, 1.2, 2.8, 1.8), Some("winkelfunctie"), None),
            ],
        );
        let lv = layers.tier(VoltageTier::Low);
        let starts = layers.lv_starting_lines();
        let first = starts[0].lines[0].clone();
        let second = lv.lines().get_next_lines(&first);

        let mut counter = ConnectionCounter::new(20.0);
        let a = counter.count_connections(&lv, &[first.clone()]);
        assert_eq!(a.count, 1);
        assert_eq!(a.buildings.len(), 1);
        let b = counter.count_connections(&lv, &second);
        assert_eq!(b, ConnectionTally::default());
        // the same line twice within one edge still counts once
        let mut fresh = ConnectionCounter::new(20.0);
        assert_eq!(fresh.count_connections(&lv, &[first.clone(), first]).count, 1);
        assert_eq!(counter.counted(), 1);
        assert!(counter.is_counted(0));
    }

    #[test]
    fn test_custom_filter() {
        let layers = lv_layers(
            vec![ls(&[(2.0, 1.0), (3.0, 1.0)])],
            vec![Building::new(rect(3.2, 1.2, 3.8, 1.8), Some("industriefunctie"), None)],
        );
        let lv = layers.tier(VoltageTier::Low);
        let line = layers.lv_starting_lines()[0].lines.clone();
        assert_eq!(ConnectionCounter::new(20.0).count_connections(&lv, &line).count, 0);
        let mut industrial =
            ConnectionCounter::with_filter(20.0, |hit| hit.kind == ConsumerKind::Industrial);
        assert_eq!(industrial.count_connections(&lv, &line).count, 1);
    }
}
