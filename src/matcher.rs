use crate::common::PROGRESS_UPDATE_INTERVAL;
use crate::config::{MatchConfig, MAX_MATCH_TIMEOUT};
use crate::edit_distance::{edit_distance, CostModel, EditDistance};
use crate::error::{Error, Result};
use crate::graph::NetworkTopologyInfo;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Best candidate for one target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Position of the winning candidate in the candidate slice.
    pub index: usize,
    pub distance: f64,
    /// Whether `distance` is minimal, rather than the best found before the deadline.
    pub exact: bool,
    pub evaluated: usize,
    /// Evaluated candidates whose search stopped at the deadline.
    pub approximate: usize,
    pub skipped: usize,
    pub timed_out: usize,
}

enum Evaluation {
    Skipped,
    TimedOut,
    Distance { distance: f64, exact: bool },
}

/// Scores candidate topologies against a target by graph edit distance.
pub struct TopologyMatcher {
    size_ceiling: usize,
    timeout: Duration,
    progress: Arc<AtomicUsize>,
}

impl TopologyMatcher {
    pub fn new(config: &MatchConfig) -> Self {
        Self::with_limits(config.size_ceiling, config.timeout())
    }

    /// `timeout` is capped at [`MAX_MATCH_TIMEOUT`].
    pub fn with_limits(size_ceiling: usize, timeout: Duration) -> Self {
        Self {
            size_ceiling,
            timeout: timeout.min(MAX_MATCH_TIMEOUT),
            progress: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn progress_init(&self) {
        self.progress.store(0, AtomicOrdering::Relaxed);
    }

    /// Candidates evaluated or skipped since the last [`Self::progress_init`].
    pub fn progress(&self) -> usize {
        self.progress.load(AtomicOrdering::Relaxed)
    }

    fn evaluate(
        &self,
        target: &NetworkTopologyInfo,
        candidate: &NetworkTopologyInfo,
        costs: &CostModel,
    ) -> Evaluation {
        if candidate.edge_count() >= self.size_ceiling {
            return Evaluation::Skipped;
        }
        let deadline = Instant::now() + self.timeout;
        let global = CostModel::global_term(target.total_connections(), candidate.total_connections());
        match edit_distance(target.graph(), candidate.graph(), costs, deadline) {
            EditDistance::Complete(d) => Evaluation::Distance {
                distance: d + global,
                exact: true,
            },
            EditDistance::Approximate(d) => Evaluation::Distance {
                distance: d + global,
                exact: false,
            },
            EditDistance::TimedOut => Evaluation::TimedOut,
        }
    }

    /// Finds the candidate closest to `target`. Later candidates win ties.
    pub fn find_best_match<T>(&self, target: &NetworkTopologyInfo, candidates: &[T]) -> Result<MatchResult>
    where
        T: AsRef<NetworkTopologyInfo> + Sync,
    {
        self.progress_init();
        let costs = CostModel::from_candidates(candidates.iter().map(|c| c.as_ref()));
        log::debug!(
            "Matching a topology with {} edges against {} candidates (max edge length {}, max connections {}).",
            target.edge_count(),
            candidates.len(),
            costs.max_length(),
            costs.max_connections()
        );

        let evaluations: Vec<Evaluation> = candidates
            .par_iter()
            .map(|candidate| {
                let evaluation = self.evaluate(target, candidate.as_ref(), &costs);
                let done = self.progress.fetch_add(1, AtomicOrdering::Relaxed) + 1;
                if done % PROGRESS_UPDATE_INTERVAL == 0 {
                    log::info!("Evaluated {} of {} candidates.", done, candidates.len());
                }
                evaluation
            })
            .collect();

        let (mut evaluated, mut approximate, mut skipped, mut timed_out) = (0, 0, 0, 0);
        let mut best: Option<(usize, f64, bool)> = None;
        for (index, evaluation) in evaluations.into_iter().enumerate() {
            match evaluation {
                Evaluation::Skipped => skipped += 1,
                Evaluation::TimedOut => {
                    timed_out += 1;
                    log::warn!("Candidate {} timed out after {:?}, skipping.", index, self.timeout);
                }
                Evaluation::Distance { distance, exact } => {
                    evaluated += 1;
                    if !exact {
                        approximate += 1;
                        log::warn!(
                            "Candidate {} hit the {:?} deadline, using the best distance found ({}).",
                            index,
                            self.timeout,
                            distance
                        );
                    }
                    if best.map_or(true, |(_, d, _)| distance <= d) {
                        best = Some((index, distance, exact));
                    }
                }
            }
        }
        if skipped > 0 {
            log::debug!(
                "Skipped {} candidates with {} or more edges.",
                skipped,
                self.size_ceiling
            );
        }
        let (index, distance, exact) = best.ok_or(Error::NoCandidateEvaluated)?;
        Ok(MatchResult {
            index,
            distance,
            exact,
            evaluated,
            approximate,
            skipped,
            timed_out,
        })
    }
}

impl Default for TopologyMatcher {
    fn default() -> Self {
        Self::new(&MatchConfig::default())
    }
}

/// One-shot form of [`TopologyMatcher::find_best_match`].
pub fn find_best_match<T>(
    target: &NetworkTopologyInfo,
    candidates: &[T],
    size_ceiling: usize,
    timeout: Duration,
) -> Result<MatchResult>
where
    T: AsRef<NetworkTopologyInfo> + Sync,
{
    TopologyMatcher::with_limits(size_ceiling, timeout).find_best_match(target, candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgePayload, NodeKind, NodePayload};
    use crate::test_utils::{path_graph, path_topology, topology};
    use geo::coord;
    use petgraph::graph::NodeIndex;
    use approx::assert_relative_eq;

    const LONG: Duration = Duration::from_secs(30);

    #[test]
    fn test_identical_candidate_wins_with_zero_distance() {
        let target = path_topology(&[(2.0, 1), (3.0, 2)]);
        let candidates = vec![
            path_topology(&[(2.0, 1)]),
            path_topology(&[(2.0, 1), (3.0, 2)]),
            path_topology(&[(5.0, 4), (3.0, 2), (1.0, 1)]),
        ];
        let matcher = TopologyMatcher::with_limits(20, LONG);
        let result = matcher.find_best_match(&target, &candidates).unwrap();
        assert_eq!(result.index, 1);
        assert_relative_eq!(result.distance, 0.0);
        assert_eq!(result.evaluated, 3);
        assert!(result.exact);
        assert_eq!(result.approximate, 0);
        assert_eq!(matcher.progress(), 3);

        let again = matcher.find_best_match(&target, &candidates).unwrap();
        assert_eq!(again, result);
    }

    #[test]
    fn test_distances_are_positive_for_different_graphs() {
        let target = path_topology(&[(2.0, 1), (3.0, 2)]);
        let candidates = [path_topology(&[(2.0, 1)]), path_topology(&[(2.0, 3), (3.0, 2)])];
        for candidate in &candidates {
            let result = find_best_match(&target, std::slice::from_ref(candidate), 20, LONG).unwrap();
            assert!(result.distance > 0.0);
        }
    }

    #[test]
    fn test_edges_without_connections_never_match_exactly() {
        let target = path_topology(&[(2.0, 0)]);
        let result = find_best_match(&target, &[path_topology(&[(2.0, 0)])], 20, LONG).unwrap();
        assert_relative_eq!(result.distance, 1.0);
    }

    #[test]
    fn test_later_candidate_wins_ties() {
        let target = path_topology(&[(2.0, 1)]);
        let candidates = vec![path_topology(&[(2.0, 1)]), path_topology(&[(2.0, 1)])];
        let result = find_best_match(&target, &candidates, 20, LONG).unwrap();
        assert_eq!(result.index, 1);
    }

    #[test]
    fn test_size_ceiling_skips_large_candidates() {
        let target = path_topology(&[(2.0, 1), (3.0, 2)]);
        let candidates = vec![
            path_topology(&[(2.0, 1), (3.0, 2)]),
            path_topology(&[(4.0, 1)]),
        ];
        let result = find_best_match(&target, &candidates, 2, LONG).unwrap();
        assert_eq!(result.index, 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.evaluated, 1);

        assert!(matches!(
            find_best_match(&target, &candidates[..1], 2, LONG),
            Err(Error::NoCandidateEvaluated)
        ));
        let none: [NetworkTopologyInfo; 0] = [];
        assert!(matches!(
            find_best_match(&target, &none, 20, LONG),
            Err(Error::NoCandidateEvaluated)
        ));
    }

    /// A trunk of `trunk` edges with `spurs` single-edge spurs off its far end.
    fn feeder_topology(trunk: usize, spurs: usize) -> NetworkTopologyInfo {
        let edges: Vec<(f64, usize)> = (0..trunk).map(|i| (i as f64 + 1.0, i % 3 + 1)).collect();
        let mut graph = path_graph(&edges);
        let end = NodeIndex::new(trunk);
        for s in 0..spurs {
            let tip = graph.add_node(NodePayload::new(
                coord! { x: trunk as f64, y: s as f64 + 1.0 },
                NodeKind::Terminal,
            ));
            let mut payload = EdgePayload::from_lines(Vec::new());
            payload.length = 2.0;
            payload.connections = s + 1;
            graph.add_edge(end, tip, payload);
        }
        topology(graph)
    }

    #[test]
    fn test_feeders_of_ten_edges_or_more_get_a_distance() {
        let target = feeder_topology(8, 4);
        let candidates = vec![feeder_topology(7, 3), feeder_topology(9, 2)];
        assert!(candidates.iter().all(|c| c.edge_count() >= 10));
        let result = find_best_match(&target, &candidates, 20, Duration::from_secs(2)).unwrap();
        assert_eq!(result.evaluated, 2);
        assert_eq!(result.timed_out, 0);
        assert!(result.distance.is_finite() && result.distance > 0.0);
        assert!(result.approximate <= 2);
        if result.approximate == 0 {
            assert!(result.exact);
        }
    }

    #[test]
    fn test_huge_timeouts_are_capped() {
        let matcher = TopologyMatcher::with_limits(20, Duration::MAX);
        let target = path_topology(&[(2.0, 1)]);
        let result = matcher.find_best_match(&target, &[path_topology(&[(2.0, 1)])]).unwrap();
        assert!(result.exact);

        let config = MatchConfig {
            timeout_secs: 1e300,
            ..MatchConfig::default()
        };
        let result = TopologyMatcher::new(&config)
            .find_best_match(&target, &[path_topology(&[(3.0, 1)])])
            .unwrap();
        assert_eq!(result.evaluated, 1);
    }

    #[test]
    fn test_timed_out_candidates_are_skipped() {
        let target = path_topology(&[(2.0, 1), (3.0, 2)]);
        let candidates = vec![path_topology(&[(2.0, 1)])];
        assert!(matches!(
            find_best_match(&target, &candidates, 20, Duration::ZERO),
            Err(Error::NoCandidateEvaluated)
        ));
    }
}
