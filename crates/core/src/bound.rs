//! Coordinate units and bounding-box arithmetic
//!
//! Two integer coordinate spaces are used throughout the crate:
//!
//! - **map units**: degrees scaled by `2^24 / 360`, so the full circle spans 24 bits.
//! - **raw units**: map units shifted down to a level's bit resolution. Tile-local
//!   raw values are always measured relative to the tile's center.
//!
//! [`Bound`] is unit-agnostic: the same type holds map-unit and raw-unit boxes,
//! and [`Bound::as_raw`] converts between them.

use serde::{Deserialize, Serialize};

/// Bit resolution of map units.
pub const MAP_UNIT_BITS: u8 = 24;

/// Smallest supported level resolution.
pub const MIN_COORD_BITS: u8 = 10;

/// Clamp a level resolution to the supported `10..=24` range.
pub fn clamp_coord_bits(bits: u8) -> u8 {
    bits.clamp(MIN_COORD_BITS, MAP_UNIT_BITS)
}

fn shift_for(bits: u8) -> u32 {
    (MAP_UNIT_BITS - clamp_coord_bits(bits)) as u32
}

/// Convert degrees to map units (rounded to nearest).
pub fn degrees_to_map_units(degrees: f64) -> i32 {
    (degrees * (1u32 << MAP_UNIT_BITS) as f64 / 360.0).round() as i32
}

/// Convert map units to degrees.
pub fn map_units_to_degrees(units: i32) -> f64 {
    units as f64 * 360.0 / (1u32 << MAP_UNIT_BITS) as f64
}

/// Convert map units to raw units at `bits` resolution, rounding half away from -inf.
pub fn map_units_to_raw(units: i32, bits: u8) -> i32 {
    let shift = shift_for(bits);
    if shift == 0 {
        return units;
    }
    ((units as i64 + (1i64 << (shift - 1))) >> shift) as i32
}

/// Convert raw units at `bits` resolution back to map units.
pub fn raw_to_map_units(raw: i32, bits: u8) -> i32 {
    ((raw as i64) << shift_for(bits)) as i32
}

/// A point in map units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MapPoint {
    pub lon: i32,
    pub lat: i32,
}

impl MapPoint {
    pub fn new(lon: i32, lat: i32) -> Self {
        Self { lon, lat }
    }

    pub fn from_degrees(lon: f64, lat: f64) -> Self {
        Self::new(degrees_to_map_units(lon), degrees_to_map_units(lat))
    }

    /// `(lon, lat)` in degrees.
    pub fn to_degrees(self) -> (f64, f64) {
        (map_units_to_degrees(self.lon), map_units_to_degrees(self.lat))
    }

    /// Point halfway to `other`, truncated toward `self`.
    pub fn midpoint(self, other: MapPoint) -> MapPoint {
        MapPoint::new(
            self.lon + (other.lon - self.lon) / 2,
            self.lat + (other.lat - self.lat) / 2,
        )
    }
}

/// Integer coordinate pair in raw units.
///
/// Depending on context this is either an offset from a tile center or a delta
/// between two consecutive points of a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RawPoint {
    pub lon: i32,
    pub lat: i32,
}

impl RawPoint {
    pub fn new(lon: i32, lat: i32) -> Self {
        Self { lon, lat }
    }

    /// Offset of `point` from `center`, in raw units at `bits` resolution.
    pub fn from_map(point: MapPoint, center: MapPoint, bits: u8) -> Self {
        Self::new(
            map_units_to_raw(point.lon - center.lon, bits),
            map_units_to_raw(point.lat - center.lat, bits),
        )
    }

    /// Inverse of [`RawPoint::from_map`].
    pub fn to_map(self, center: MapPoint, bits: u8) -> MapPoint {
        MapPoint::new(
            center.lon + raw_to_map_units(self.lon, bits),
            center.lat + raw_to_map_units(self.lat, bits),
        )
    }

    pub fn delta_to(self, next: RawPoint) -> RawPoint {
        RawPoint::new(next.lon - self.lon, next.lat - self.lat)
    }
}

/// Axis-aligned bounding box, edges inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bound {
    pub left: i32,
    pub bottom: i32,
    pub right: i32,
    pub top: i32,
}

impl Bound {
    /// Create a bound; edges are reordered if given reversed.
    pub fn new(left: i32, bottom: i32, right: i32, top: i32) -> Self {
        Self {
            left: left.min(right),
            bottom: bottom.min(top),
            right: left.max(right),
            top: bottom.max(top),
        }
    }

    /// Zero-sized bound at a point.
    pub fn from_point(point: MapPoint) -> Self {
        Self::new(point.lon, point.lat, point.lon, point.lat)
    }

    /// Bound of a degree box `(west, south, east, north)`.
    pub fn from_degrees(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self::new(
            degrees_to_map_units(west),
            degrees_to_map_units(south),
            degrees_to_map_units(east),
            degrees_to_map_units(north),
        )
    }

    /// Smallest bound holding every point, `None` for an empty iterator.
    pub fn of_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = MapPoint>,
    {
        let mut iter = points.into_iter();
        let mut bound = Self::from_point(iter.next()?);
        for p in iter {
            bound.embed_point(p);
        }
        Some(bound)
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.top - self.bottom
    }

    /// Center, truncated toward the bottom-left corner.
    pub fn center(&self) -> MapPoint {
        MapPoint::new(
            self.left + self.width() / 2,
            self.bottom + self.height() / 2,
        )
    }

    /// Grow to include a point.
    pub fn embed_point(&mut self, point: MapPoint) {
        self.left = self.left.min(point.lon);
        self.right = self.right.max(point.lon);
        self.bottom = self.bottom.min(point.lat);
        self.top = self.top.max(point.lat);
    }

    /// Grow to include another bound.
    pub fn embed(&mut self, other: &Bound) {
        self.left = self.left.min(other.left);
        self.right = self.right.max(other.right);
        self.bottom = self.bottom.min(other.bottom);
        self.top = self.top.max(other.top);
    }

    /// Overlap of two bounds; touching edges count as a zero-width overlap.
    pub fn intersection(&self, other: &Bound) -> Option<Bound> {
        let left = self.left.max(other.left);
        let right = self.right.min(other.right);
        let bottom = self.bottom.max(other.bottom);
        let top = self.top.min(other.top);
        (left <= right && bottom <= top).then_some(Bound {
            left,
            bottom,
            right,
            top,
        })
    }

    pub fn intersects(&self, other: &Bound) -> bool {
        self.intersection(other).is_some()
    }

    pub fn is_point_enclosed(&self, point: MapPoint) -> bool {
        self.left <= point.lon
            && point.lon <= self.right
            && self.bottom <= point.lat
            && point.lat <= self.top
    }

    /// True if `other` lies completely inside this bound.
    pub fn is_enclosed(&self, other: &Bound) -> bool {
        self.left <= other.left
            && other.right <= self.right
            && self.bottom <= other.bottom
            && other.top <= self.top
    }

    /// This map-unit bound expressed in raw units at `bits` resolution.
    pub fn as_raw(&self, bits: u8) -> Bound {
        Bound {
            left: map_units_to_raw(self.left, bits),
            bottom: map_units_to_raw(self.bottom, bits),
            right: map_units_to_raw(self.right, bits),
            top: map_units_to_raw(self.top, bits),
        }
    }

    /// This raw-unit bound expressed in map units.
    pub fn raw_to_map(&self, bits: u8) -> Bound {
        Bound {
            left: raw_to_map_units(self.left, bits),
            bottom: raw_to_map_units(self.bottom, bits),
            right: raw_to_map_units(self.right, bits),
            top: raw_to_map_units(self.top, bits),
        }
    }

    pub fn width_raw(&self, bits: u8) -> i32 {
        self.as_raw(bits).width()
    }

    pub fn height_raw(&self, bits: u8) -> i32 {
        self.as_raw(bits).height()
    }

    /// Largest raw offset of an edge from [`Bound::center`], as (lon, lat).
    ///
    /// Every point inside the bound has a tile-relative raw offset within
    /// these limits. With an odd map width the right and top edges sit one
    /// unit further from the center than the left and bottom edges.
    pub fn half_size_raw(&self, bits: u8) -> (i32, i32) {
        let center = self.center();
        let low = RawPoint::from_map(MapPoint::new(self.left, self.bottom), center, bits);
        let high = RawPoint::from_map(MapPoint::new(self.right, self.top), center, bits);
        (
            low.lon.abs().max(high.lon.abs()),
            low.lat.abs().max(high.lat.abs()),
        )
    }

    pub fn to_rect(&self) -> geo::Rect<f64> {
        geo::Rect::new(
            geo::coord! { x: self.left as f64, y: self.bottom as f64 },
            geo::coord! { x: self.right as f64, y: self.top as f64 },
        )
    }
}
