use crate::common::{
    coord_distance, endpoints, line_envelope, line_length, point_envelope, point_line_distance,
    points_are_close,
};
use crate::error::{Error, Result};
use geo::geometry::{Coord, Geometry, LineString};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

type LineRtreeItem = GeomWithData<Rectangle<[f64; 2]>, usize>;
type EndpointRtreeItem = GeomWithData<[f64; 2], usize>;

/// A stored polyline oriented for traversal.
///
/// The connected end is the side the traversal arrived from, the open end is
/// the side it continues from. The wrapped line always has at least two
/// coordinates: a [`LineIndex`] only stores such lines and deserialising
/// rejects anything shorter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredNavigationLine")]
pub struct NavigationLine {
    index: usize,
    line: LineString<f64>,
    open_at_first: bool,
}

#[derive(Deserialize)]
struct StoredNavigationLine {
    index: usize,
    line: LineString<f64>,
    open_at_first: bool,
}

impl TryFrom<StoredNavigationLine> for NavigationLine {
    type Error = Error;

    fn try_from(stored: StoredNavigationLine) -> Result<Self> {
        let points = stored.line.0.len();
        if points < 2 {
            return Err(Error::DegenerateLine {
                index: stored.index,
                points,
            });
        }
        Ok(Self::new(stored.index, stored.line, stored.open_at_first))
    }
}

impl NavigationLine {
    fn new(index: usize, line: LineString<f64>, open_at_first: bool) -> Self {
        Self {
            index,
            line,
            open_at_first,
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn line(&self) -> &LineString<f64> {
        &self.line
    }

    #[inline]
    pub fn open_at_first(&self) -> bool {
        self.open_at_first
    }

    pub fn open_end(&self) -> Coord<f64> {
        let coords = &self.line.0;
        if self.open_at_first {
            coords[0]
        } else {
            coords[coords.len() - 1]
        }
    }

    pub fn connected_end(&self) -> Coord<f64> {
        let coords = &self.line.0;
        if self.open_at_first {
            coords[coords.len() - 1]
        } else {
            coords[0]
        }
    }

    pub fn length(&self) -> f64 {
        line_length(&self.line)
    }

    /// The same line traversed the other way.
    pub fn reversed(&self) -> Self {
        Self::new(self.index, self.line.clone(), !self.open_at_first)
    }
}

/// Deduplicated polylines of one voltage tier with proximity and touch queries.
#[derive(Debug, Clone)]
pub struct LineIndex {
    lines: Vec<LineString<f64>>,
    rtree: RTree<LineRtreeItem>,
    endpoint_rtree: RTree<EndpointRtreeItem>,
    touch_tolerance: f64,
}

impl LineIndex {
    /// Builds the index, dropping lines whose endpoints match an already kept
    /// line (in either order) within `duplicate_margin`. Survivors keep their
    /// input order as index.
    pub fn build<I>(lines: I, duplicate_margin: f64, touch_tolerance: f64) -> Self
    where
        I: IntoIterator<Item = LineString<f64>>,
    {
        let mut kept: Vec<LineString<f64>> = Vec::new();
        let mut seen_endpoints: RTree<EndpointRtreeItem> = RTree::new();
        let mut skipped_short = 0;
        let mut skipped_dupes = 0;

        for line in lines {
            let Some((first, last)) = endpoints(&line) else {
                skipped_short += 1;
                continue;
            };
            let is_duplicate = seen_endpoints
                .locate_in_envelope(&point_envelope(first, duplicate_margin))
                .any(|item| match endpoints(&kept[item.data]) {
                    Some((f, l)) => {
                        (points_are_close(f, first, duplicate_margin)
                            && points_are_close(l, last, duplicate_margin))
                            || (points_are_close(f, last, duplicate_margin)
                                && points_are_close(l, first, duplicate_margin))
                    }
                    None => false,
                });
            if is_duplicate {
                log::debug!(
                    "Skipping duplicate line between ({}, {}) and ({}, {})",
                    first.x,
                    first.y,
                    last.x,
                    last.y
                );
                skipped_dupes += 1;
                continue;
            }
            let idx = kept.len();
            seen_endpoints.insert(GeomWithData::new([first.x, first.y], idx));
            seen_endpoints.insert(GeomWithData::new([last.x, last.y], idx));
            kept.push(line);
        }

        if skipped_short > 0 {
            log::warn!(
                "Skipped {} lines with fewer than two coordinates.",
                skipped_short
            );
        }

        let mut rtree_items: Vec<LineRtreeItem> = Vec::with_capacity(kept.len());
        let mut endpoint_items: Vec<EndpointRtreeItem> = Vec::with_capacity(kept.len() * 2);
        for (idx, line) in kept.iter().enumerate() {
            if let (Some(env), Some((first, last))) = (line_envelope(line, 0.0), endpoints(line)) {
                rtree_items.push(GeomWithData::new(
                    Rectangle::from_corners(env.lower(), env.upper()),
                    idx,
                ));
                endpoint_items.push(GeomWithData::new([first.x, first.y], idx));
                endpoint_items.push(GeomWithData::new([last.x, last.y], idx));
            }
        }
        log::info!(
            "Line index built with {} lines. {} lines were skipped ({} due to duplication).",
            kept.len(),
            skipped_short + skipped_dupes,
            skipped_dupes
        );

        Self {
            lines: kept,
            rtree: RTree::bulk_load(rtree_items),
            endpoint_rtree: RTree::bulk_load(endpoint_items),
            touch_tolerance,
        }
    }

    /// Builds from mixed geometries: multi-lines are flattened, non-linear
    /// geometries are skipped.
    pub fn from_geometries<I>(geometries: I, duplicate_margin: f64, touch_tolerance: f64) -> Self
    where
        I: IntoIterator<Item = Geometry<f64>>,
    {
        let mut lines = Vec::new();
        let mut ignored = 0;
        for geom in geometries {
            match geom {
                Geometry::LineString(ls) => lines.push(ls),
                Geometry::MultiLineString(mls) => lines.extend(mls.0),
                Geometry::Line(l) => lines.push(LineString::from(vec![l.start, l.end])),
                _ => ignored += 1,
            }
        }
        if ignored > 0 {
            log::warn!("Ignored {} non-linear geometries in line layer.", ignored);
        }
        Self::build(lines, duplicate_margin, touch_tolerance)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line(&self, index: usize) -> Option<&LineString<f64>> {
        self.lines.get(index)
    }

    pub fn lines(&self) -> &[LineString<f64>] {
        &self.lines
    }

    pub fn touch_tolerance(&self) -> f64 {
        self.touch_tolerance
    }

    /// Lines with any part within `radius` of `point`.
    pub fn query_within(&self, point: Coord<f64>, radius: f64) -> BTreeSet<usize> {
        self.rtree
            .locate_in_envelope_intersecting(&point_envelope(point, radius))
            .map(|item| item.data)
            .filter(|&idx| point_line_distance(point, &self.lines[idx]) <= radius)
            .collect()
    }

    /// Lines whose bounding box intersects `envelope`.
    pub fn query_envelope(&self, envelope: &AABB<[f64; 2]>) -> BTreeSet<usize> {
        self.rtree
            .locate_in_envelope_intersecting(envelope)
            .map(|item| item.data)
            .collect()
    }

    /// Lines having an endpoint within the touch tolerance of `point`.
    pub fn query_touching(&self, point: Coord<f64>) -> BTreeSet<usize> {
        self.endpoint_rtree
            .locate_in_envelope(&point_envelope(point, self.touch_tolerance))
            .map(|item| item.data)
            .collect()
    }

    pub fn touch_count(&self, point: Coord<f64>) -> usize {
        self.query_touching(point).len()
    }

    /// Orients line `index` so its connected end is the endpoint touching `point`.
    fn orient_touching(&self, index: usize, point: Coord<f64>) -> Option<NavigationLine> {
        let line = self.lines.get(index)?;
        let (first, last) = endpoints(line)?;
        if points_are_close(first, point, self.touch_tolerance) {
            Some(NavigationLine::new(index, line.clone(), false))
        } else if points_are_close(last, point, self.touch_tolerance) {
            Some(NavigationLine::new(index, line.clone(), true))
        } else {
            None
        }
    }

    /// Candidate continuations from the open end of `nav`, oriented so their
    /// connected end is that open end.
    pub fn get_next_lines(&self, nav: &NavigationLine) -> Vec<NavigationLine> {
        let open = nav.open_end();
        self.query_touching(open)
            .into_iter()
            .filter(|&idx| idx != nav.index)
            .filter_map(|idx| self.orient_touching(idx, open))
            .collect()
    }

    /// Orients line `index` so its connected end is the endpoint nearest
    /// `point`, requiring that endpoint to lie within `margin`.
    pub fn orient_at(&self, index: usize, point: Coord<f64>, margin: f64) -> Result<NavigationLine> {
        let line = self.lines.get(index).ok_or(Error::UnknownLine(index))?;
        let (first, last) = endpoints(line).ok_or(Error::UnknownLine(index))?;
        let first_close = points_are_close(first, point, margin);
        let last_close = points_are_close(last, point, margin);
        let open_at_first = match (first_close, last_close) {
            (true, true) => coord_distance(first, point) > coord_distance(last, point),
            (true, false) => false,
            (false, true) => true,
            (false, false) => {
                return Err(Error::NoConnectionFound {
                    x: point.x,
                    y: point.y,
                })
            }
        };
        Ok(NavigationLine::new(index, line.clone(), open_at_first))
    }

    /// Lines near `point` with exactly one free end. The shared end becomes
    /// the open end, the free end the connected end.
    pub fn one_side_connected_within(&self, point: Coord<f64>, radius: f64) -> Vec<NavigationLine> {
        let mut found = Vec::new();
        for idx in self.query_within(point, radius) {
            let line = &self.lines[idx];
            let Some((first, last)) = endpoints(line) else {
                continue;
            };
            let first_free = self.touch_count(first) == 1;
            let last_free = self.touch_count(last) == 1;
            if first_free == last_free {
                continue;
            }
            found.push(NavigationLine::new(idx, line.clone(), !first_free));
        }
        found
    }

    /// Lines near `point` that are not shared at both ends and that have an
    /// endpoint within `margin` of it. The nearer endpoint becomes the connected end.
    pub fn loose_lines_within(&self, point: Coord<f64>, margin: f64) -> Vec<NavigationLine> {
        let mut found = Vec::new();
        for idx in self.query_within(point, margin) {
            let Some((first, last)) = endpoints(&self.lines[idx]) else {
                continue;
            };
            if self.touch_count(first) > 1 && self.touch_count(last) > 1 {
                continue;
            }
            if let Ok(nav) = self.orient_at(idx, point, margin) {
                found.push(nav);
            }
        }
        found
    }
}
