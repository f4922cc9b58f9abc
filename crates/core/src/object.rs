//! Geographic objects and the master object set
//!
//! Objects carry their geometry in map units. Types use the packed form
//! `0x1MMSS`: bit 16 marks an extended type, bits 8..15 hold the main type and
//! bits 0..4 the subtype.

use std::fmt;

use geo::algorithm::winding_order::{Winding, WindingOrder};
use geo::LineString;
use serde::{Deserialize, Serialize};

use crate::bound::{Bound, MapPoint};
use crate::{Error, Result};

const TYPE_MASK: u32 = 0x1FF1F;
const EXTENDED_FLAG: u32 = 0x10000;

/// Packed object type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectType(u32);

impl ObjectType {
    /// Wrap a full type value, dropping bits outside the type layout.
    pub fn new(full: u32) -> Self {
        Self(full & TYPE_MASK)
    }

    pub fn from_parts(main: u8, sub: u8, extended: bool) -> Self {
        let ext = if extended { EXTENDED_FLAG } else { 0 };
        Self::new(ext | (main as u32) << 8 | sub as u32)
    }

    pub fn code(self) -> u32 {
        self.0
    }

    pub fn is_extended(self) -> bool {
        self.0 & EXTENDED_FLAG != 0
    }

    pub fn main_type(self) -> u8 {
        (self.0 >> 8 & 0xFF) as u8
    }

    pub fn sub_type(self) -> u8 {
        (self.0 & 0xFF) as u8
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:05x}", self.0)
    }
}

/// Object category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Point,
    Line,
    Area,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ObjectKind::Point => "point",
            ObjectKind::Line => "line",
            ObjectKind::Area => "area",
        })
    }
}

/// Attributes shared by every object kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Caller-assigned id, reported in errors.
    pub id: u64,
    pub object_type: ObjectType,
    /// Label reference into external text storage.
    pub label: Option<u32>,
    /// Trailing payload of extended objects.
    pub extra_bytes: Vec<u8>,
}

impl ObjectMeta {
    pub fn new(id: u64, object_type: ObjectType) -> Self {
        Self {
            id,
            object_type,
            label: None,
            extra_bytes: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: u32) -> Self {
        self.label = Some(label);
        self
    }

    pub fn with_extra_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.extra_bytes = bytes;
        self
    }

    pub fn is_extended(&self) -> bool {
        self.object_type.is_extended()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointObject {
    pub meta: ObjectMeta,
    pub position: MapPoint,
}

impl PointObject {
    pub fn new(meta: ObjectMeta, position: MapPoint) -> Self {
        Self { meta, position }
    }
}

/// A polyline. `extra_bits`, when present, holds one flag per point.
#[derive(Debug, Clone, PartialEq)]
pub struct LineObject {
    pub meta: ObjectMeta,
    pub points: Vec<MapPoint>,
    /// One-way flag.
    pub direction: bool,
    pub extra_bits: Option<Vec<bool>>,
}

impl LineObject {
    pub fn new(meta: ObjectMeta, points: Vec<MapPoint>) -> Result<Self> {
        if points.len() < 2 {
            return Err(Error::DegenerateGeometry(format!(
                "line {} has {} point(s)",
                meta.id,
                points.len()
            )));
        }
        Ok(Self {
            meta,
            points,
            direction: false,
            extra_bits: None,
        })
    }

    pub fn with_direction(mut self, direction: bool) -> Self {
        self.direction = direction;
        self
    }

    /// Attach per-point extra bits; the flag count must match the point count.
    pub fn with_extra_bits(mut self, flags: Vec<bool>) -> Result<Self> {
        if flags.len() != self.points.len() {
            return Err(Error::ExtraBitsMismatch {
                points: self.points.len(),
                flags: flags.len(),
            });
        }
        self.extra_bits = Some(flags);
        Ok(self)
    }

    pub fn bound(&self) -> Bound {
        poly_bound(&self.points)
    }

    /// Insert a point before `index`, keeping extra bits aligned.
    pub(crate) fn insert_point(&mut self, index: usize, point: MapPoint) {
        self.points.insert(index, point);
        if let Some(flags) = self.extra_bits.as_mut() {
            flags.insert(index, false);
        }
    }

    /// Cut at `index`: `self` keeps `0..=index`, the returned tail starts at
    /// `index`, so both share that point.
    pub(crate) fn split_off_at(&mut self, index: usize) -> LineObject {
        let tail_points = self.points.split_off(index);
        self.points.push(tail_points[0]);
        let tail_flags = self.extra_bits.as_mut().map(|flags| {
            let tail = flags.split_off(index);
            flags.push(tail[0]);
            tail
        });
        LineObject {
            meta: self.meta.clone(),
            points: tail_points,
            direction: self.direction,
            extra_bits: tail_flags,
        }
    }
}

/// A polygon outer ring, stored without a closing point.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaObject {
    pub meta: ObjectMeta,
    pub points: Vec<MapPoint>,
    pub winding: WindingOrder,
}

impl AreaObject {
    /// Create an area, dropping a repeated closing point and recording the
    /// ring's winding. Collinear rings count as counter-clockwise.
    pub fn new(meta: ObjectMeta, mut points: Vec<MapPoint>) -> Result<Self> {
        if points.len() > 1 && points.first() == points.last() {
            points.pop();
        }
        if points.len() < 3 {
            return Err(Error::DegenerateGeometry(format!(
                "area {} has {} point(s)",
                meta.id,
                points.len()
            )));
        }
        let winding = winding_of(&points).unwrap_or(WindingOrder::CounterClockwise);
        Ok(Self {
            meta,
            points,
            winding,
        })
    }

    pub fn bound(&self) -> Bound {
        poly_bound(&self.points)
    }

    /// Closed ring as a geo line string.
    pub fn ring(&self) -> LineString<f64> {
        ring_of(&self.points)
    }
}

pub(crate) fn ring_of(points: &[MapPoint]) -> LineString<f64> {
    let mut coords: Vec<geo::Coord<f64>> = points
        .iter()
        .map(|p| geo::coord! { x: p.lon as f64, y: p.lat as f64 })
        .collect();
    if let Some(&first) = coords.first() {
        coords.push(first);
    }
    LineString::new(coords)
}

/// Winding of an open ring, `None` when it encloses no area.
pub fn winding_of(points: &[MapPoint]) -> Option<WindingOrder> {
    ring_of(points).winding_order()
}

fn poly_bound(points: &[MapPoint]) -> Bound {
    // constructors guarantee a non-empty point list
    Bound::of_points(points.iter().copied()).unwrap_or_else(|| Bound::from_point(MapPoint::default()))
}

/// One object of any kind.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoObject {
    Point(PointObject),
    Line(LineObject),
    Area(AreaObject),
}

impl GeoObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            GeoObject::Point(_) => ObjectKind::Point,
            GeoObject::Line(_) => ObjectKind::Line,
            GeoObject::Area(_) => ObjectKind::Area,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            GeoObject::Point(p) => &p.meta,
            GeoObject::Line(l) => &l.meta,
            GeoObject::Area(a) => &a.meta,
        }
    }

    pub fn bound(&self) -> Bound {
        match self {
            GeoObject::Point(p) => Bound::from_point(p.position),
            GeoObject::Line(l) => l.bound(),
            GeoObject::Area(a) => a.bound(),
        }
    }
}

/// Objects grouped by category.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectSet {
    pub points: Vec<PointObject>,
    pub lines: Vec<LineObject>,
    pub areas: Vec<AreaObject>,
}

impl ObjectSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, object: GeoObject) {
        match object {
            GeoObject::Point(p) => self.points.push(p),
            GeoObject::Line(l) => self.lines.push(l),
            GeoObject::Area(a) => self.areas.push(a),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len() + self.lines.len() + self.areas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of points with plain (`extended == false`) or extended types.
    pub fn point_count(&self, extended: bool) -> usize {
        self.points
            .iter()
            .filter(|p| p.meta.is_extended() == extended)
            .count()
    }

    pub fn line_count(&self, extended: bool) -> usize {
        self.lines
            .iter()
            .filter(|l| l.meta.is_extended() == extended)
            .count()
    }

    pub fn area_count(&self, extended: bool) -> usize {
        self.areas
            .iter()
            .filter(|a| a.meta.is_extended() == extended)
            .count()
    }

    /// Bound of all geometry, `None` for an empty set.
    pub fn bound(&self) -> Option<Bound> {
        let mut bounds = self
            .points
            .iter()
            .map(|p| Bound::from_point(p.position))
            .chain(self.lines.iter().map(LineObject::bound))
            .chain(self.areas.iter().map(AreaObject::bound));
        let mut total = bounds.next()?;
        for b in bounds {
            total.embed(&b);
        }
        Some(total)
    }
}

impl FromIterator<GeoObject> for ObjectSet {
    fn from_iter<T: IntoIterator<Item = GeoObject>>(iter: T) -> Self {
        let mut set = ObjectSet::new();
        for object in iter {
            set.push(object);
        }
        set
    }
}
