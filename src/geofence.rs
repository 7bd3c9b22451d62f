//! Harbor geofence containment

use crate::errors::HarborError;

/// A WGS84 position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub lat: f64,
    pub long: f64,
}

impl Coordinate {
    /// Parse a coordinate from the decimal strings devices send.
    pub fn parse(lat: &str, long: &str) -> Result<Self, HarborError> {
        Ok(Self {
            lat: parse_degrees(lat, "latitude")?,
            long: parse_degrees(long, "longitude")?,
        })
    }
}

fn parse_degrees(value: &str, axis: &str) -> Result<f64, HarborError> {
    let parsed = value
        .trim()
        .parse::<f64>()
        .map_err(|_| HarborError::Validation(format!("{axis} {value:?} is not a number")))?;
    if !parsed.is_finite() {
        return Err(HarborError::Validation(format!(
            "{axis} {value:?} is not finite"
        )));
    }
    Ok(parsed)
}

/// Harbor boundary: ordered vertices, implicitly closed from last to first.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Polygon {
    vertices: Vec<Coordinate>,
}

impl Polygon {
    pub fn new(vertices: Vec<Coordinate>) -> Self {
        Self { vertices }
    }

    /// Build from stored `(lat, long)` string pairs, in stored order.
    pub fn from_vertices<S: AsRef<str>>(vertices: &[(S, S)]) -> Result<Self, HarborError> {
        let vertices = vertices
            .iter()
            .map(|(lat, long)| Coordinate::parse(lat.as_ref(), long.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { vertices })
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Fewer than three vertices enclose nothing.
    pub fn is_degenerate(&self) -> bool {
        self.vertices.len() < 3
    }

    /// Even-odd ray casting along the latitude axis.
    ///
    /// Points exactly on an edge get whatever the crossing arithmetic yields;
    /// the result is deterministic but not geometrically meaningful.
    pub fn contains(&self, point: Coordinate) -> bool {
        if self.is_degenerate() {
            return false;
        }

        let (x, y) = (point.lat, point.long);
        let mut inside = false;
        let mut j = self.vertices.len() - 1;

        for (i, vi) in self.vertices.iter().enumerate() {
            let vj = self.vertices[j];
            let (xi, yi) = (vi.lat, vi.long);
            let (xj, yj) = (vj.lat, vj.long);

            // (yi > y) != (yj > y) rules out horizontal edges, so the division is safe
            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }

        inside
    }
}

/// Parse the reported point and test it against the polygon.
pub fn contains_point(lat: &str, long: &str, polygon: &Polygon) -> Result<bool, HarborError> {
    let point = Coordinate::parse(lat, long)?;
    Ok(polygon.contains(point))
}
