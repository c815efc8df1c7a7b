use crate::common::{line_envelope, line_polygon_distance, point_envelope, point_polygon_distance};
use crate::common::{coord_distance, endpoints};
use crate::config::ExtractionConfig;
use crate::line_index::{LineIndex, NavigationLine};
use geo::geometry::{Coord, LineString, Polygon};
use geo::{BoundingRect, Centroid};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};
use std::cmp::Ordering;

type BuildingRtreeItem = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// Capabilities the topology builder needs from a data provider.
pub trait GridData {
    /// Line layer of the tier being traversed.
    fn lines(&self) -> &LineIndex;

    /// Lines leaving a station located at `point`, empty when no station is there.
    fn station_continuations(&self, point: Coord<f64>) -> Vec<NavigationLine>;

    /// Wider-radius lookup for lines that end near `point` without touching it exactly.
    fn fallback_continuations(&self, point: Coord<f64>) -> Vec<NavigationLine>;

    /// Construction year of the station building at `point`.
    fn station_year_at(&self, point: Coord<f64>) -> Option<i32>;

    /// Consumers within `distance` of `line`, ordered by consumer index.
    fn consumers_near(&self, line: &LineString<f64>, distance: f64) -> Vec<ConsumerHit>;
}

impl<T: GridData + ?Sized> GridData for &T {
    fn lines(&self) -> &LineIndex {
        (**self).lines()
    }

    fn station_continuations(&self, point: Coord<f64>) -> Vec<NavigationLine> {
        (**self).station_continuations(point)
    }

    fn fallback_continuations(&self, point: Coord<f64>) -> Vec<NavigationLine> {
        (**self).fallback_continuations(point)
    }

    fn station_year_at(&self, point: Coord<f64>) -> Option<i32> {
        (**self).station_year_at(point)
    }

    fn consumers_near(&self, line: &LineString<f64>, distance: f64) -> Vec<ConsumerHit> {
        (**self).consumers_near(line, distance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoltageTier {
    Low,
    Medium,
}

/// A station anchor, either a bare point or a footprint.
#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub position: Coord<f64>,
    pub footprint: Option<Polygon<f64>>,
}

impl Station {
    pub fn at(position: Coord<f64>) -> Self {
        Self {
            position,
            footprint: None,
        }
    }

    /// Anchors the station at the footprint centroid.
    pub fn with_footprint(footprint: Polygon<f64>) -> Self {
        let position = footprint
            .centroid()
            .map(|p| p.0)
            .or_else(|| footprint.exterior().0.first().copied())
            .unwrap_or_default();
        Self {
            position,
            footprint: Some(footprint),
        }
    }

    pub fn distance_to(&self, point: Coord<f64>) -> f64 {
        match &self.footprint {
            Some(polygon) => point_polygon_distance(point, polygon),
            None => coord_distance(self.position, point),
        }
    }

    fn envelope(&self, margin: f64) -> AABB<[f64; 2]> {
        match self.footprint.as_ref().and_then(|p| p.bounding_rect()) {
            Some(rect) => AABB::from_corners(
                [rect.min().x - margin, rect.min().y - margin],
                [rect.max().x + margin, rect.max().y + margin],
            ),
            None => point_envelope(self.position, margin),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Building {
    pub footprint: Polygon<f64>,
    pub purpose: Option<String>,
    pub built_year: Option<i32>,
}

impl Building {
    pub fn new(footprint: Polygon<f64>, purpose: Option<&str>, built_year: Option<i32>) -> Self {
        Self {
            footprint,
            purpose: purpose.map(str::to_string),
            built_year,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerKind {
    Residential,
    Industrial,
    Other,
}

/// A building returned by a consumer lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerHit {
    pub index: usize,
    pub footprint: Polygon<f64>,
    pub kind: ConsumerKind,
}

impl ConsumerHit {
    pub fn is_residential(&self) -> bool {
        self.kind == ConsumerKind::Residential
    }
}

/// Starting lines found at one station.
#[derive(Debug, Clone)]
pub struct StationStart {
    pub position: Coord<f64>,
    pub built_year: Option<i32>,
    pub lines: Vec<NavigationLine>,
}

/// In-memory line, station and building layers of one grid area.
#[derive(Debug, Clone)]
pub struct GridLayers {
    config: ExtractionConfig,
    lv_lines: LineIndex,
    mv_lines: LineIndex,
    lv_mv_stations: Vec<Station>,
    hv_stations: Vec<Station>,
    buildings: Vec<Building>,
    building_rtree: RTree<BuildingRtreeItem>,
}

impl GridLayers {
    pub fn new(config: ExtractionConfig) -> Self {
        let lv_lines = LineIndex::build(Vec::new(), config.duplicate_margin, config.touch_tolerance);
        let mv_lines = lv_lines.clone();
        Self {
            config,
            lv_lines,
            mv_lines,
            lv_mv_stations: Vec::new(),
            hv_stations: Vec::new(),
            buildings: Vec::new(),
            building_rtree: RTree::new(),
        }
    }

    pub fn with_lv_lines(mut self, lines: Vec<LineString<f64>>) -> Self {
        self.lv_lines = LineIndex::build(
            lines,
            self.config.duplicate_margin,
            self.config.touch_tolerance,
        );
        self
    }

    pub fn with_mv_lines(mut self, lines: Vec<LineString<f64>>) -> Self {
        self.mv_lines = LineIndex::build(
            lines,
            self.config.duplicate_margin,
            self.config.touch_tolerance,
        );
        self
    }

    pub fn with_lv_mv_stations(mut self, stations: Vec<Station>) -> Self {
        self.lv_mv_stations = stations;
        self
    }

    pub fn with_hv_stations(mut self, stations: Vec<Station>) -> Self {
        self.hv_stations = stations;
        self
    }

    pub fn with_buildings(mut self, buildings: Vec<Building>) -> Self {
        let items: Vec<BuildingRtreeItem> = buildings
            .iter()
            .enumerate()
            .filter_map(|(idx, b)| {
                let rect = b.footprint.bounding_rect()?;
                Some(GeomWithData::new(
                    Rectangle::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
                    idx,
                ))
            })
            .collect();
        if items.len() < buildings.len() {
            log::warn!(
                "{} buildings have an empty footprint and are not indexed.",
                buildings.len() - items.len()
            );
        }
        self.building_rtree = RTree::bulk_load(items);
        self.buildings = buildings;
        self
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn tier(&self, tier: VoltageTier) -> TierView<'_> {
        TierView { layers: self, tier }
    }

    pub fn line_index(&self, tier: VoltageTier) -> &LineIndex {
        match tier {
            VoltageTier::Low => &self.lv_lines,
            VoltageTier::Medium => &self.mv_lines,
        }
    }

    /// First building whose bounding box contains `point`.
    pub fn building_at(&self, point: Coord<f64>) -> Option<&Building> {
        self.building_rtree
            .locate_all_at_point(&[point.x, point.y])
            .map(|item| item.data)
            .min()
            .map(|idx| &self.buildings[idx])
    }

    pub fn building_year_at(&self, point: Coord<f64>) -> Option<i32> {
        self.building_at(point).and_then(|b| b.built_year)
    }

    /// Year of the building housing the LV/MV station near `point`.
    pub fn station_year_at(&self, point: Coord<f64>) -> Option<i32> {
        self.lv_mv_stations
            .iter()
            .find(|s| s.distance_to(point) <= self.config.mv_station_radius)
            .and_then(|s| self.building_year_at(s.position))
    }

    fn classify(&self, building: &Building) -> ConsumerKind {
        match building.purpose.as_deref() {
            Some(p) if p.contains(self.config.residential_marker.as_str()) => ConsumerKind::Residential,
            Some(p) if p.contains(self.config.industrial_marker.as_str()) => ConsumerKind::Industrial,
            _ => ConsumerKind::Other,
        }
    }

    pub fn consumers_near(&self, line: &LineString<f64>, distance: f64) -> Vec<ConsumerHit> {
        let Some(envelope) = line_envelope(line, distance) else {
            return Vec::new();
        };
        let mut hits: Vec<ConsumerHit> = self
            .building_rtree
            .locate_in_envelope_intersecting(&envelope)
            .map(|item| item.data)
            .filter(|&idx| line_polygon_distance(line, &self.buildings[idx].footprint) <= distance)
            .map(|idx| ConsumerHit {
                index: idx,
                footprint: self.buildings[idx].footprint.clone(),
                kind: self.classify(&self.buildings[idx]),
            })
            .collect();
        hits.sort_by_key(|h| h.index);
        hits
    }

    /// Lines whose endpoint lies within `margin` of the station shape. The
    /// touching endpoint, or the nearer one when both touch, is the connected end.
    fn lines_touching_station(&self, lines: &LineIndex, station: &Station, margin: f64) -> Vec<NavigationLine> {
        let mut found = Vec::new();
        for idx in lines.query_envelope(&station.envelope(margin)) {
            let Some((first, last)) = lines.line(idx).and_then(endpoints) else {
                continue;
            };
            let (d_first, d_last) = (station.distance_to(first), station.distance_to(last));
            let connected = match (d_first <= margin, d_last <= margin) {
                (true, true) if d_last < d_first => last,
                (true, _) => first,
                (false, true) => last,
                (false, false) => continue,
            };
            match lines.orient_at(idx, connected, 0.0) {
                Ok(nav) => found.push(nav),
                Err(e) => log::debug!("Skipping station line {}: {}", idx, e),
            }
        }
        found
    }

    /// Starting lines of every LV/MV station on the low voltage tier.
    pub fn lv_starting_lines(&self) -> Vec<StationStart> {
        self.lv_mv_stations
            .iter()
            .map(|station| {
                let mut lines =
                    self.lines_touching_station(&self.lv_lines, station, self.config.lv_station_margin);
                sort_by_position(&mut lines);
                StationStart {
                    position: station.position,
                    built_year: self.building_year_at(station.position),
                    lines,
                }
            })
            .collect()
    }

    fn mv_station_lines_at(&self, point: Coord<f64>) -> Vec<NavigationLine> {
        let radius = self.config.mv_station_radius;
        self.lv_mv_stations
            .iter()
            .find(|s| s.distance_to(point) <= radius)
            .map(|s| self.mv_lines.one_side_connected_within(s.position, radius))
            .unwrap_or_default()
    }

    /// Starting lines of every HV station on the medium voltage tier.
    ///
    /// The search margin grows until lines are found. Lines without a building
    /// at either end, or that end at an LV/MV station, are dropped.
    pub fn mv_starting_lines(&self) -> Vec<StationStart> {
        let cfg = &self.config;
        self.hv_stations
            .iter()
            .map(|station| {
                let mut lines = Vec::new();
                for attempt in 0..cfg.hv_start_attempts {
                    let margin = cfg.hv_start_margin + attempt as f64 * cfg.hv_start_margin_step;
                    log::debug!(
                        "Searching lines at HV station ({}, {}) with margin {}",
                        station.position.x,
                        station.position.y,
                        margin
                    );
                    lines = self.mv_lines.one_side_connected_within(station.position, margin);
                    if !lines.is_empty() {
                        break;
                    }
                }
                lines.retain(|nav| {
                    let (a, b) = (nav.connected_end(), nav.open_end());
                    let near_building =
                        self.building_at(a).is_some() || self.building_at(b).is_some();
                    let at_mv_station = !self.mv_station_lines_at(a).is_empty()
                        || !self.mv_station_lines_at(b).is_empty();
                    near_building && !at_mv_station
                });
                sort_by_position(&mut lines);
                StationStart {
                    position: station.position,
                    built_year: self.building_year_at(station.position),
                    lines,
                }
            })
            .collect()
    }
}

fn cmp_coord(a: Coord<f64>, b: Coord<f64>) -> Ordering {
    a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y))
}

/// Orders starting lines by geometry so results do not depend on input order.
fn sort_by_position(lines: &mut [NavigationLine]) {
    lines.sort_by(|a, b| {
        cmp_coord(a.connected_end(), b.connected_end()).then(cmp_coord(a.open_end(), b.open_end()))
    });
}

/// One voltage tier of a [`GridLayers`] as seen by the builder.
#[derive(Debug, Clone, Copy)]
pub struct TierView<'a> {
    layers: &'a GridLayers,
    tier: VoltageTier,
}

impl GridData for TierView<'_> {
    fn lines(&self) -> &LineIndex {
        self.layers.line_index(self.tier)
    }

    fn station_continuations(&self, point: Coord<f64>) -> Vec<NavigationLine> {
        let cfg = &self.layers.config;
        let lines = self.lines();
        if let Some(station) = self
            .layers
            .lv_mv_stations
            .iter()
            .find(|s| s.distance_to(point) <= cfg.mv_station_radius)
        {
            return lines.one_side_connected_within(station.position, cfg.mv_station_radius);
        }
        if let Some(station) = self
            .layers
            .hv_stations
            .iter()
            .find(|s| s.distance_to(point) <= cfg.hv_station_radius)
        {
            return lines.one_side_connected_within(station.position, cfg.hv_station_radius);
        }
        Vec::new()
    }

    fn fallback_continuations(&self, point: Coord<f64>) -> Vec<NavigationLine> {
        self.lines()
            .loose_lines_within(point, self.layers.config.fallback_radius)
    }

    fn station_year_at(&self, point: Coord<f64>) -> Option<i32> {
        self.layers.station_year_at(point)
    }

    fn consumers_near(&self, line: &LineString<f64>, distance: f64) -> Vec<ConsumerHit> {
        self.layers.consumers_near(line, distance)
    }
}
