use crate::cable::{CableTypeResolver, YearBasedCableTypes};
use crate::common::rect_contains;
use crate::config::ExtractionConfig;
use crate::connections::ConnectionCounter;
use crate::error::{Error, Result};
use crate::graph::{EdgePayload, NetworkTopologyInfo, NodeKind, NodePayload, TopologyGraph};
use crate::line_index::NavigationLine;
use crate::source::{GridData, GridLayers, StationStart, TierView, VoltageTier};
use geo::geometry::{Coord, Rect};
use petgraph::graph::{EdgeIndex, NodeIndex};
use rstar::primitives::GeomWithData;
use rstar::RTree;
use std::collections::BTreeSet;

/// How dead ends and station hits are treated during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalMode {
    /// Low voltage: every branch is kept, dead ends become terminal nodes.
    Radial,
    /// Medium voltage: only branches that reach a station or close a loop are kept.
    Ring,
}

/// Maps branch and station coordinates to the node created for them.
#[derive(Debug, Clone)]
pub struct LoopMapping {
    tree: RTree<GeomWithData<[f64; 2], NodeIndex>>,
    tolerance: f64,
}

impl LoopMapping {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tree: RTree::new(),
            tolerance,
        }
    }

    pub fn get(&self, point: Coord<f64>) -> Option<NodeIndex> {
        self.tree
            .locate_within_distance([point.x, point.y], self.tolerance * self.tolerance)
            .map(|item| item.data)
            .min()
    }

    /// Maps `point` to `node` unless it is already mapped. Returns the node the
    /// point resolves to afterwards.
    pub fn insert(&mut self, point: Coord<f64>, node: NodeIndex) -> NodeIndex {
        if let Some(existing) = self.get(point) {
            return existing;
        }
        self.tree.insert(GeomWithData::new([point.x, point.y], node));
        node
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

/// Line indices consumed by a traversal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisitedLineSet(BTreeSet<usize>);

impl VisitedLineSet {
    pub fn contains(&self, index: usize) -> bool {
        self.0.contains(&index)
    }

    /// `false` when the index was already present.
    pub fn insert(&mut self, index: usize) -> bool {
        self.0.insert(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }
}

impl Extend<usize> for VisitedLineSet {
    fn extend<I: IntoIterator<Item = usize>>(&mut self, iter: I) {
        self.0.extend(iter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContinuationSource {
    Geometric,
    Station,
}

struct Continuations {
    source: ContinuationSource,
    lines: Vec<NavigationLine>,
}

/// A line waiting to be followed from `from`.
struct Pending {
    line: NavigationLine,
    from: NodeIndex,
    parent: Option<EdgeIndex>,
}

/// Lines folded into the edge that is currently open.
struct EdgeAccumulator {
    from: NodeIndex,
    parent: Option<EdgeIndex>,
    lines: Vec<NavigationLine>,
}

/// State owned by a single run.
struct TraversalContext {
    graph: TopologyGraph,
    root: NodeIndex,
    loops: LoopMapping,
    visited: VisitedLineSet,
    consumed: VisitedLineSet,
    // indexed by edge index
    parents: Vec<Option<EdgeIndex>>,
    retained: Vec<bool>,
    pending: Vec<Pending>,
    discarded: usize,
}

impl TraversalContext {
    fn new(tolerance: f64, seed: VisitedLineSet, root: NodePayload) -> Self {
        let mut graph = TopologyGraph::default();
        let root = graph.add_node(root);
        Self {
            graph,
            root,
            loops: LoopMapping::new(tolerance),
            visited: seed,
            consumed: VisitedLineSet::default(),
            parents: Vec::new(),
            retained: Vec::new(),
            pending: Vec::new(),
            discarded: 0,
        }
    }

    fn mark_visited(&mut self, index: usize) -> bool {
        if !self.visited.insert(index) {
            return false;
        }
        self.consumed.insert(index);
        true
    }

    fn close_edge(&mut self, acc: EdgeAccumulator, to: NodeIndex) -> EdgeIndex {
        let edge = self
            .graph
            .add_edge(acc.from, to, EdgePayload::from_lines(acc.lines));
        self.parents.push(acc.parent);
        self.retained.push(false);
        edge
    }

    /// Marks `edge` and every edge leading up to it as part of a ring.
    fn retain_chain(&mut self, edge: EdgeIndex) {
        let mut current = Some(edge);
        while let Some(e) = current {
            if self.retained[e.index()] {
                break;
            }
            self.retained[e.index()] = true;
            current = self.parents[e.index()];
        }
    }

    /// Nearest commissioning year walking back from `node` towards the root.
    fn upstream_year(&self, node: NodeIndex, parent: Option<EdgeIndex>) -> Option<i32> {
        let (mut node, mut parent) = (node, parent);
        loop {
            if let Some(year) = self.graph[node].commissioned {
                return Some(year);
            }
            let edge = parent?;
            let (source, _) = self.graph.edge_endpoints(edge)?;
            node = source;
            parent = self.parents[edge.index()];
        }
    }

    /// Sets cable type and year on `edge` and the edges before it, back to the
    /// previous station or transformer.
    fn reclassify(&mut self, edge: EdgeIndex, cable_type: &str, commissioned: i32) {
        let mut current = Some(edge);
        while let Some(e) = current {
            let Some((source, _)) = self.graph.edge_endpoints(e) else {
                break;
            };
            if let Some(payload) = self.graph.edge_weight_mut(e) {
                payload.cable_type = Some(cable_type.to_string());
                payload.commissioned = Some(commissioned);
            }
            if self.graph[source].is_asset() {
                break;
            }
            current = self.parents[e.index()];
        }
    }
}

/// Builds topologies by following lines away from stations.
pub struct TopologyBuilder<G: GridData> {
    grid: G,
    mode: TraversalMode,
    touch_tolerance: f64,
    bounds: Option<Rect<f64>>,
    resolver: Box<dyn CableTypeResolver>,
    counter: ConnectionCounter,
    explored: VisitedLineSet,
    retained: VisitedLineSet,
    discarded: usize,
}

impl<G: GridData> TopologyBuilder<G> {
    pub fn new(grid: G, mode: TraversalMode, config: &ExtractionConfig) -> Self {
        Self {
            grid,
            mode,
            touch_tolerance: config.touch_tolerance,
            bounds: None,
            resolver: Box::new(YearBasedCableTypes::new(config.cable_case)),
            counter: ConnectionCounter::new(config.consumer_distance),
            explored: VisitedLineSet::default(),
            retained: VisitedLineSet::default(),
            discarded: 0,
        }
    }

    pub fn radial(grid: G, config: &ExtractionConfig) -> Self {
        Self::new(grid, TraversalMode::Radial, config)
    }

    pub fn ring(grid: G, config: &ExtractionConfig) -> Self {
        Self::new(grid, TraversalMode::Ring, config)
    }

    /// Prunes continuations whose open end lies outside `bounds`. Only used in ring mode.
    pub fn with_bounds(mut self, bounds: Rect<f64>) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn with_resolver(mut self, resolver: impl CableTypeResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    pub fn with_counter(mut self, counter: ConnectionCounter) -> Self {
        self.counter = counter;
        self
    }

    pub fn mode(&self) -> TraversalMode {
        self.mode
    }

    /// True when any earlier run of this builder visited the line.
    pub fn is_explored(&self, index: usize) -> bool {
        self.explored.contains(index)
    }

    /// Consumers attributed across all runs so far.
    pub fn counted_connections(&self) -> usize {
        self.counter.counted()
    }

    /// Degenerate runs discarded across all runs so far.
    pub fn discarded_runs(&self) -> usize {
        self.discarded
    }

    /// Follows every starting line of every station, skipping lines an earlier
    /// run already explored.
    pub fn extract_radial(&mut self, starts: &[StationStart]) -> Result<Vec<NetworkTopologyInfo>> {
        let mut topologies = Vec::new();
        for station in starts {
            for line in &station.lines {
                if self.is_explored(line.index()) {
                    log::debug!("Starting line {} already explored, skipping.", line.index());
                    continue;
                }
                if let Some(topology) = self.extract(station, line)? {
                    topologies.push(topology);
                }
            }
        }
        log::info!(
            "Extracted {} topologies from {} stations.",
            topologies.len(),
            starts.len()
        );
        Ok(topologies)
    }

    /// Runs one traversal starting with `line`, one of the starting lines of `station`.
    ///
    /// Returns `None` when the run yields no edge, when it was discarded, or
    /// in ring mode when no branch closes back onto a station.
    pub fn extract(
        &mut self,
        station: &StationStart,
        line: &NavigationLine,
    ) -> Result<Option<NetworkTopologyInfo>> {
        let root = NodePayload::new(station.position, NodeKind::Station).with_year(station.built_year);
        let mut ctx = TraversalContext::new(self.touch_tolerance, self.retained.clone(), root);
        let root = ctx.root;
        for start in &station.lines {
            ctx.loops.insert(start.connected_end(), root);
        }
        ctx.loops.insert(line.connected_end(), root);
        ctx.pending.push(Pending {
            line: line.clone(),
            from: root,
            parent: None,
        });

        let outcome = self.drain(&mut ctx);
        self.explored.extend(ctx.consumed.iter());
        self.discarded += ctx.discarded;
        outcome?;
        Ok(self.finish(ctx, line))
    }

    fn drain(&mut self, ctx: &mut TraversalContext) -> Result<()> {
        while let Some(item) = ctx.pending.pop() {
            if !ctx.mark_visited(item.line.index()) {
                continue;
            }
            self.follow(ctx, item)?;
            if ctx.discarded > 0 {
                break;
            }
        }
        Ok(())
    }

    fn follow(&mut self, ctx: &mut TraversalContext, item: Pending) -> Result<()> {
        let mut acc = EdgeAccumulator {
            from: item.from,
            parent: item.parent,
            lines: vec![item.line],
        };
        loop {
            let Some(current) = acc.lines.last().cloned() else {
                return Ok(());
            };
            let open = current.open_end();
            if let Some(target) = ctx.loops.get(open) {
                return self.close_loop(ctx, acc, target);
            }
            let next = self.continuations(ctx, &current);
            match next.lines.as_slice() {
                [] => {
                    self.dead_end(ctx, acc, open);
                    return Ok(());
                }
                [single] => {
                    if !ctx.mark_visited(single.index()) {
                        discard(ctx, open, single.index());
                        return Ok(());
                    }
                    match next.source {
                        ContinuationSource::Geometric => acc.lines.push(single.clone()),
                        ContinuationSource::Station => {
                            let (node, edge) = self.close_into_transformer(ctx, acc, open)?;
                            acc = EdgeAccumulator {
                                from: node,
                                parent: Some(edge),
                                lines: vec![single.clone()],
                            };
                        }
                    }
                }
                branches => {
                    if let Some(seen) = branches.iter().find(|l| ctx.visited.contains(l.index())) {
                        discard(ctx, open, seen.index());
                        return Ok(());
                    }
                    let (node, edge) = match next.source {
                        ContinuationSource::Geometric => {
                            let node = ctx
                                .graph
                                .add_node(NodePayload::new(open, NodeKind::Junction));
                            (node, ctx.close_edge(acc, node))
                        }
                        ContinuationSource::Station => self.close_into_transformer(ctx, acc, open)?,
                    };
                    ctx.loops.insert(open, node);
                    for nav in branches.iter().rev() {
                        ctx.pending.push(Pending {
                            line: nav.clone(),
                            from: node,
                            parent: Some(edge),
                        });
                    }
                    return Ok(());
                }
            }
        }
    }

    fn in_bounds(&self, point: Coord<f64>) -> bool {
        self.bounds.map_or(true, |b| rect_contains(&b, point))
    }

    fn continuations(&self, ctx: &TraversalContext, current: &NavigationLine) -> Continuations {
        let geometric = self.grid.lines().get_next_lines(current);
        if self.mode == TraversalMode::Radial {
            return Continuations {
                source: ContinuationSource::Geometric,
                lines: geometric,
            };
        }
        let open = current.open_end();
        let (source, mut lines) = if !geometric.is_empty() {
            (ContinuationSource::Geometric, geometric)
        } else {
            let mut found = self.grid.station_continuations(open);
            if found.is_empty() {
                found = self.grid.fallback_continuations(open);
            }
            (ContinuationSource::Station, found)
        };
        lines.retain(|nav| {
            nav.index() != current.index()
                && self.in_bounds(nav.open_end())
                && !ctx.visited.contains(nav.index())
        });
        Continuations { source, lines }
    }

    fn dead_end(&mut self, ctx: &mut TraversalContext, acc: EdgeAccumulator, open: Coord<f64>) {
        match self.mode {
            TraversalMode::Radial => {
                let node = ctx
                    .graph
                    .add_node(NodePayload::new(open, NodeKind::Terminal));
                ctx.close_edge(acc, node);
            }
            TraversalMode::Ring => log::debug!(
                "Dropping dead end at ({}, {}) after {} lines.",
                open.x,
                open.y,
                acc.lines.len()
            ),
        }
    }

    fn close_loop(
        &mut self,
        ctx: &mut TraversalContext,
        acc: EdgeAccumulator,
        target: NodeIndex,
    ) -> Result<()> {
        if self.mode == TraversalMode::Radial {
            ctx.close_edge(acc, target);
            return Ok(());
        }
        let upstream = ctx.upstream_year(acc.from, acc.parent);
        let at = ctx.graph[target].position;
        let year = ctx.graph[target]
            .commissioned
            .max(upstream)
            .ok_or(Error::MissingBuildingYear { x: at.x, y: at.y })?;
        let edge = ctx.close_edge(acc, target);
        let cable_type = self.resolver.cable_type(year);
        ctx.reclassify(edge, &cable_type, year);
        ctx.retain_chain(edge);
        if target == ctx.root {
            log::info!("Ring closed back at the station at ({}, {}).", at.x, at.y);
        } else {
            log::debug!("Ring closed at ({}, {}).", at.x, at.y);
        }
        Ok(())
    }

    /// Inserts a transformer at `at`, closes the open edge into it and
    /// reclassifies the cables since the previous asset.
    fn close_into_transformer(
        &mut self,
        ctx: &mut TraversalContext,
        acc: EdgeAccumulator,
        at: Coord<f64>,
    ) -> Result<(NodeIndex, EdgeIndex)> {
        let upstream = ctx.upstream_year(acc.from, acc.parent);
        let year = self
            .grid
            .station_year_at(at)
            .or(upstream)
            .ok_or(Error::MissingBuildingYear { x: at.x, y: at.y })?;
        let node = ctx
            .graph
            .add_node(NodePayload::new(at, NodeKind::Transformer).with_year(Some(year)));
        ctx.loops.insert(at, node);
        let edge = ctx.close_edge(acc, node);
        let cable_type = self.resolver.cable_type(year);
        ctx.reclassify(edge, &cable_type, upstream.map_or(year, |u| u.max(year)));
        log::debug!(
            "Transformer from {} inserted at ({}, {}), cables set to {}.",
            year,
            at.x,
            at.y,
            cable_type
        );
        Ok((node, edge))
    }

    fn finish(&mut self, ctx: TraversalContext, start: &NavigationLine) -> Option<NetworkTopologyInfo> {
        let TraversalContext {
            graph,
            retained,
            discarded,
            ..
        } = ctx;
        if discarded > 0 {
            return None;
        }
        let mut graph = match self.mode {
            TraversalMode::Radial => graph,
            TraversalMode::Ring => {
                if !retained.iter().any(|&kept| kept) {
                    log::info!(
                        "No ring found from line {}, discarding the run.",
                        start.index()
                    );
                    return None;
                }
                retain_edges(graph, &retained)
            }
        };
        if graph.edge_count() == 0 {
            return None;
        }
        for edge in graph.edge_indices() {
            let tally = self.counter.count_connections(&self.grid, &graph[edge].lines);
            let payload = &mut graph[edge];
            payload.connections = tally.count;
            payload.buildings = tally.buildings;
        }
        for payload in graph.edge_weights() {
            self.retained.extend(payload.lines.iter().map(|l| l.index()));
        }
        Some(NetworkTopologyInfo::new(graph, start.clone()))
    }
}

fn discard(ctx: &mut TraversalContext, at: Coord<f64>, line: usize) {
    ctx.discarded += 1;
    log::warn!(
        "Discarding run at ({}, {}): line {} was already consumed and the point is not a known node.",
        at.x,
        at.y,
        line
    );
}

/// Keeps the flagged edges and the nodes they touch, preserving order.
fn retain_edges(graph: TopologyGraph, keep: &[bool]) -> TopologyGraph {
    let mut used = vec![false; graph.node_count()];
    for edge in graph.edge_indices() {
        if !keep[edge.index()] {
            continue;
        }
        if let Some((a, b)) = graph.edge_endpoints(edge) {
            used[a.index()] = true;
            used[b.index()] = true;
        }
    }
    let (nodes, edges) = graph.into_nodes_edges();
    let mut pruned = TopologyGraph::default();
    let mut remap: Vec<Option<NodeIndex>> = vec![None; nodes.len()];
    for (idx, node) in nodes.into_iter().enumerate() {
        if used[idx] {
            remap[idx] = Some(pruned.add_node(node.weight));
        }
    }
    for (idx, edge) in edges.into_iter().enumerate() {
        if !keep[idx] {
            continue;
        }
        if let (Some(a), Some(b)) = (remap[edge.source().index()], remap[edge.target().index()]) {
            pruned.add_edge(a, b, edge.weight);
        }
    }
    pruned
}

/// Radial extraction of the low voltage tier from every LV/MV station.
pub fn extract_lv_topologies(layers: &GridLayers) -> Result<Vec<NetworkTopologyInfo>> {
    let starts = layers.lv_starting_lines();
    TopologyBuilder::radial(layers.tier(VoltageTier::Low), layers.config()).extract_radial(&starts)
}

/// Hands out medium voltage rings one at a time.
pub struct RingExtractor<G: GridData> {
    builder: TopologyBuilder<G>,
    starts: Vec<StationStart>,
    station: usize,
    line: usize,
}

impl<G: GridData> RingExtractor<G> {
    pub fn new(builder: TopologyBuilder<G>, starts: Vec<StationStart>) -> Self {
        Self {
            builder,
            starts,
            station: 0,
            line: 0,
        }
    }

    fn advance(&mut self) -> Option<(usize, usize)> {
        while self.station < self.starts.len() {
            if self.line < self.starts[self.station].lines.len() {
                let position = (self.station, self.line);
                self.line += 1;
                return Some(position);
            }
            self.station += 1;
            self.line = 0;
        }
        None
    }

    /// The next ring that does not reuse lines of earlier rings.
    pub fn next_ring(&mut self) -> Result<NetworkTopologyInfo> {
        while let Some((s, l)) = self.advance() {
            let station = &self.starts[s];
            let line = &station.lines[l];
            if self.builder.is_explored(line.index()) {
                continue;
            }
            if let Some(ring) = self.builder.extract(station, line)? {
                return Ok(ring);
            }
        }
        Err(Error::NoTopologyRemains)
    }

    /// Every remaining ring. Fails with [`Error::NoTopologyRemains`] only when there is none.
    pub fn rings(&mut self) -> Result<Vec<NetworkTopologyInfo>> {
        let mut rings = Vec::new();
        loop {
            match self.next_ring() {
                Ok(ring) => rings.push(ring),
                Err(Error::NoTopologyRemains) if !rings.is_empty() => return Ok(rings),
                Err(e) => return Err(e),
            }
        }
    }

    pub fn builder(&self) -> &TopologyBuilder<G> {
        &self.builder
    }
}

impl<'a> RingExtractor<TierView<'a>> {
    /// Ring extraction over the medium voltage tier from every HV station.
    pub fn for_layers(layers: &'a GridLayers, bounds: Option<Rect<f64>>) -> Self {
        let mut builder = TopologyBuilder::ring(layers.tier(VoltageTier::Medium), layers.config());
        if let Some(bounds) = bounds {
            builder = builder.with_bounds(bounds);
        }
        Self::new(builder, layers.mv_starting_lines())
    }
}
