use geo::algorithm::Euclidean;
use geo::geometry::{Coord, LineString, Point, Polygon, Rect};
use geo::{BoundingRect, Distance, Length};
use rstar::AABB;

/// Log a matcher progress line every this many evaluated candidates.
pub static PROGRESS_UPDATE_INTERVAL: usize = 100;

/// Box comparison: both axes differ by at most `margin`.
#[inline]
pub fn points_are_close(a: Coord<f64>, b: Coord<f64>, margin: f64) -> bool {
    (a.x - b.x).abs() <= margin && (a.y - b.y).abs() <= margin
}

#[inline]
pub fn coord_distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

#[inline]
pub fn line_length(line: &LineString<f64>) -> f64 {
    Euclidean.length(line)
}

/// First and last coordinate of a polyline, `None` for fewer than two coordinates.
pub fn endpoints(line: &LineString<f64>) -> Option<(Coord<f64>, Coord<f64>)> {
    if line.0.len() < 2 {
        return None;
    }
    Some((*line.0.first()?, *line.0.last()?))
}

pub fn point_line_distance(point: Coord<f64>, line: &LineString<f64>) -> f64 {
    Euclidean.distance(&Point::from(point), line)
}

/// Zero when the point lies inside the polygon.
pub fn point_polygon_distance(point: Coord<f64>, polygon: &Polygon<f64>) -> f64 {
    Euclidean.distance(&Point::from(point), polygon)
}

pub fn line_polygon_distance(line: &LineString<f64>, polygon: &Polygon<f64>) -> f64 {
    Euclidean.distance(line, polygon)
}

/// Inclusive containment test against a rectangle.
#[inline]
pub fn rect_contains(rect: &Rect<f64>, point: Coord<f64>) -> bool {
    let (min, max) = (rect.min(), rect.max());
    point.x >= min.x && point.x <= max.x && point.y >= min.y && point.y <= max.y
}

/// Envelope around a point grown by `margin` on every side.
pub fn point_envelope(point: Coord<f64>, margin: f64) -> AABB<[f64; 2]> {
    AABB::from_corners(
        [point.x - margin, point.y - margin],
        [point.x + margin, point.y + margin],
    )
}

/// Bounding envelope of a line grown by `margin`, `None` for an empty line.
pub fn line_envelope(line: &LineString<f64>, margin: f64) -> Option<AABB<[f64; 2]>> {
    let rect = line.bounding_rect()?;
    Some(AABB::from_corners(
        [rect.min().x - margin, rect.min().y - margin],
        [rect.max().x + margin, rect.max().y + margin],
    ))
}
