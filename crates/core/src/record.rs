//! Region records and their encoded sizes.
//!
//! A tile's region data holds six record lists: points, lines and areas, each
//! with plain and extended types. This module builds those records from a
//! tile's objects and computes their on-disk sizes, which also drive the
//! split decisions of the subdivision builder.

use log::warn;

use crate::bound::{Bound, MapPoint, RawPoint};
use crate::codec::{self, EncodedStream};
use crate::object::{AreaObject, LineObject, ObjectMeta, ObjectSet, ObjectType, PointObject};
use crate::{Error, Result};

/// Fixed part of a plain record: type, label offset, start deltas.
const PLAIN_RECORD_BYTES: usize = 8;
/// Fixed part of an extended record: type, subtype, start deltas.
const EXT_RECORD_BYTES: usize = 6;
const LABEL_BYTES: usize = 3;
/// Plain poly streams longer than this need a two-byte length.
const PLAIN_ONE_BYTE_STREAM: usize = 0xFF;
/// Extended poly streams (plus info byte) below this use a one-byte length.
const EXT_ONE_BYTE_STREAM: usize = 0x7F;

/// Size of a point record.
pub fn point_data_length(meta: &ObjectMeta) -> usize {
    if meta.is_extended() {
        EXT_RECORD_BYTES + extended_payload(meta)
    } else {
        PLAIN_RECORD_BYTES + usize::from(meta.object_type.sub_type() != 0)
    }
}

/// Size of a line or area record carrying a stream of `stream_len` bytes.
pub fn poly_data_length(meta: &ObjectMeta, stream_len: usize) -> usize {
    if meta.is_extended() {
        let length_bytes = if stream_len + 1 < EXT_ONE_BYTE_STREAM { 1 } else { 2 };
        EXT_RECORD_BYTES + extended_payload(meta) + length_bytes + 1 + stream_len
    } else {
        let length_bytes = if stream_len > PLAIN_ONE_BYTE_STREAM { 2 } else { 1 };
        PLAIN_RECORD_BYTES + length_bytes + 1 + stream_len
    }
}

fn extended_payload(meta: &ObjectMeta) -> usize {
    meta.label.map_or(0, |_| LABEL_BYTES) + meta.extra_bytes.len()
}

/// A point stored as an offset from the tile center.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointRecord {
    pub object_type: ObjectType,
    pub label: Option<u32>,
    pub offset: RawPoint,
    pub extra_bytes: Vec<u8>,
}

impl PointRecord {
    pub fn is_extended(&self) -> bool {
        self.object_type.is_extended()
    }

    pub fn data_length(&self) -> usize {
        if self.is_extended() {
            EXT_RECORD_BYTES + self.label.map_or(0, |_| LABEL_BYTES) + self.extra_bytes.len()
        } else {
            PLAIN_RECORD_BYTES + usize::from(self.object_type.sub_type() != 0)
        }
    }
}

/// A line or area: start offset from the tile center plus a delta stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolyRecord {
    pub object_type: ObjectType,
    pub label: Option<u32>,
    /// One-way flag, lines only.
    pub direction: bool,
    pub start: RawPoint,
    pub stream: EncodedStream,
    /// The stream carries one extra bit per point.
    pub with_extra_bits: bool,
    pub extra_bytes: Vec<u8>,
}

impl PolyRecord {
    pub fn is_extended(&self) -> bool {
        self.object_type.is_extended()
    }

    /// Plain records switch to a two-byte stream length above 255 bytes.
    pub fn two_byte_length(&self) -> bool {
        !self.is_extended() && self.stream.bytes.len() > PLAIN_ONE_BYTE_STREAM
    }

    pub fn data_length(&self) -> usize {
        let stream_len = self.stream.bytes.len();
        if self.is_extended() {
            let length_bytes = if stream_len + 1 < EXT_ONE_BYTE_STREAM { 1 } else { 2 };
            EXT_RECORD_BYTES
                + self.label.map_or(0, |_| LABEL_BYTES)
                + self.extra_bytes.len()
                + length_bytes
                + 1
                + stream_len
        } else {
            let length_bytes = if self.two_byte_length() { 2 } else { 1 };
            PLAIN_RECORD_BYTES + length_bytes + 1 + stream_len
        }
    }

    /// Decode the stored stream back into tile-relative raw points.
    pub fn raw_points(&self) -> Result<Vec<RawPoint>> {
        let decoded = codec::decode(
            &self.stream.bytes,
            self.stream.base_lon,
            self.stream.base_lat,
            self.start,
            self.with_extra_bits,
            self.is_extended(),
        )?;
        Ok(decoded.points)
    }
}

/// Estimated byte sizes of a tile's six record lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionSizes {
    pub points: usize,
    pub ext_points: usize,
    pub lines: usize,
    pub ext_lines: usize,
    pub areas: usize,
    pub ext_areas: usize,
}

impl SectionSizes {
    pub fn total(&self) -> usize {
        self.points + self.ext_points + self.lines + self.ext_lines + self.areas + self.ext_areas
    }
}

fn raw_points(points: &[MapPoint], center: MapPoint, bits: u8) -> Vec<RawPoint> {
    points
        .iter()
        .map(|p| RawPoint::from_map(*p, center, bits))
        .collect()
}

/// Estimate record sizes of `objects` in a tile centered at `center`.
///
/// Streams are sized at their initial widths; lines with fewer than two and
/// areas with fewer than three points are not counted.
pub fn estimate_sizes(objects: &ObjectSet, center: MapPoint, bits: u8) -> Result<SectionSizes> {
    let mut sizes = SectionSizes::default();

    for point in &objects.points {
        let len = point_data_length(&point.meta);
        if point.meta.is_extended() {
            sizes.ext_points += len;
        } else {
            sizes.points += len;
        }
    }

    for line in objects.lines.iter().filter(|l| l.points.len() > 1) {
        let raw = raw_points(&line.points, center, bits);
        let stream_len = codec::encoded_len(&raw, line.extra_bits.is_some(), line.meta.is_extended())?;
        let len = poly_data_length(&line.meta, stream_len);
        if line.meta.is_extended() {
            sizes.ext_lines += len;
        } else {
            sizes.lines += len;
        }
    }

    for area in objects.areas.iter().filter(|a| a.points.len() > 2) {
        let raw = raw_points(&area.points, center, bits);
        let stream_len = codec::encoded_len(&raw, false, area.meta.is_extended())?;
        let len = poly_data_length(&area.meta, stream_len);
        if area.meta.is_extended() {
            sizes.ext_areas += len;
        } else {
            sizes.areas += len;
        }
    }

    Ok(sizes)
}

// ============================================================================
// Tile encoding
// ============================================================================

/// Descriptor of a tile for the external container writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileHeader {
    pub center: MapPoint,
    /// Half width in raw units.
    pub half_width: u16,
    /// Half height in raw units.
    pub half_height: u16,
    pub has_points: bool,
    pub has_lines: bool,
    pub has_areas: bool,
}

/// All records of one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedTile {
    pub header: TileHeader,
    pub points: Vec<PointRecord>,
    pub ext_points: Vec<PointRecord>,
    pub lines: Vec<PolyRecord>,
    pub ext_lines: Vec<PolyRecord>,
    pub areas: Vec<PolyRecord>,
    pub ext_areas: Vec<PolyRecord>,
}

impl EncodedTile {
    pub fn sizes(&self) -> SectionSizes {
        let points = |r: &[PointRecord]| -> usize { r.iter().map(PointRecord::data_length).sum() };
        let polys = |r: &[PolyRecord]| -> usize { r.iter().map(PolyRecord::data_length).sum() };
        SectionSizes {
            points: points(&self.points),
            ext_points: points(&self.ext_points),
            lines: polys(&self.lines),
            ext_lines: polys(&self.ext_lines),
            areas: polys(&self.areas),
            ext_areas: polys(&self.ext_areas),
        }
    }

    /// Size of the plain region data, including the section pointers that
    /// precede every non-empty plain section after the first.
    pub fn plain_data_length(&self) -> usize {
        let sizes = self.sizes();
        let lens = [sizes.points, sizes.lines, sizes.areas];
        let sections = lens.iter().filter(|&&l| l > 0).count();
        let data: usize = lens.iter().sum();
        data + sections.saturating_sub(1) * 2
    }

    pub fn record_count(&self) -> usize {
        self.points.len()
            + self.ext_points.len()
            + self.lines.len()
            + self.ext_lines.len()
            + self.areas.len()
            + self.ext_areas.len()
    }
}

fn to_half_size(half: i32) -> Result<u16> {
    u16::try_from(half).map_err(|_| Error::CoordinateOutOfRange {
        value: half as i64,
        limit: u16::MAX as i64,
    })
}

fn encode_point(point: &PointObject, center: MapPoint, bits: u8) -> Result<PointRecord> {
    let offset = RawPoint::from_map(point.position, center, bits);
    for value in [offset.lon, offset.lat] {
        if i16::try_from(value).is_err() {
            return Err(Error::CoordinateOutOfRange {
                value: value as i64,
                limit: i16::MAX as i64,
            });
        }
    }
    Ok(PointRecord {
        object_type: point.meta.object_type,
        label: point.meta.label,
        offset,
        extra_bytes: point.meta.extra_bytes.clone(),
    })
}

/// Raw points with consecutive repeats collapsed. Extra bits of collapsed
/// points are merged into the surviving one.
fn collapse(raw: Vec<RawPoint>, flags: Option<&[bool]>) -> (Vec<RawPoint>, Option<Vec<bool>>) {
    let mut points: Vec<RawPoint> = Vec::with_capacity(raw.len());
    let mut merged: Option<Vec<bool>> = flags.map(|_| Vec::with_capacity(raw.len()));
    for (i, p) in raw.into_iter().enumerate() {
        let flag = flags.is_some_and(|f| f[i]);
        if points.last() == Some(&p) {
            if let Some(last) = merged.as_mut().and_then(|m| m.last_mut()) {
                *last |= flag;
            }
            continue;
        }
        points.push(p);
        if let Some(m) = merged.as_mut() {
            m.push(flag);
        }
    }
    (points, merged)
}

fn encode_line(line: &LineObject, center: MapPoint, bits: u8) -> Result<Option<PolyRecord>> {
    let raw = raw_points(&line.points, center, bits);
    let (points, flags) = collapse(raw, line.extra_bits.as_deref());
    let extent = raw_extent(&points);
    if points.len() < 2 || (extent.width() == 0 && extent.height() == 0) {
        warn!(
            "dropping line {} (type {}): no extent at {} bits",
            line.meta.id, line.meta.object_type, bits
        );
        return Ok(None);
    }
    let stream = codec::encode(&points, flags.as_deref(), line.meta.is_extended())?;
    Ok(Some(PolyRecord {
        object_type: line.meta.object_type,
        label: line.meta.label,
        direction: line.direction,
        start: points[0],
        stream,
        with_extra_bits: flags.is_some(),
        extra_bytes: line.meta.extra_bytes.clone(),
    }))
}

fn encode_area(area: &AreaObject, center: MapPoint, bits: u8) -> Result<Option<PolyRecord>> {
    let raw = raw_points(&area.points, center, bits);
    let (mut points, _) = collapse(raw, None);
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    let extent = raw_extent(&points);
    if points.len() < 3 || extent.width() == 0 || extent.height() == 0 {
        warn!(
            "dropping area {} (type {}): collapses to a line or point at {} bits",
            area.meta.id, area.meta.object_type, bits
        );
        return Ok(None);
    }
    let stream = codec::encode(&points, None, area.meta.is_extended())?;
    Ok(Some(PolyRecord {
        object_type: area.meta.object_type,
        label: area.meta.label,
        direction: false,
        start: points[0],
        stream,
        with_extra_bits: false,
        extra_bytes: area.meta.extra_bytes.clone(),
    }))
}

fn raw_extent(points: &[RawPoint]) -> Bound {
    Bound::of_points(points.iter().map(|p| MapPoint::new(p.lon, p.lat)))
        .unwrap_or_else(|| Bound::from_point(MapPoint::default()))
}

/// Encode every object of a tile with the given bound at `bits` resolution.
///
/// Objects that collapse to nothing at this resolution are dropped with a
/// warning.
pub fn encode_tile(objects: &ObjectSet, bound: &Bound, bits: u8) -> Result<EncodedTile> {
    let center = bound.center();
    let (half_width, half_height) = bound.half_size_raw(bits);
    let mut tile = EncodedTile {
        header: TileHeader {
            center,
            half_width: to_half_size(half_width)?,
            half_height: to_half_size(half_height)?,
            has_points: objects.point_count(false) > 0,
            has_lines: objects.line_count(false) > 0,
            has_areas: objects.area_count(false) > 0,
        },
        points: Vec::new(),
        ext_points: Vec::new(),
        lines: Vec::new(),
        ext_lines: Vec::new(),
        areas: Vec::new(),
        ext_areas: Vec::new(),
    };

    for point in &objects.points {
        let record = encode_point(point, center, bits)?;
        if record.is_extended() {
            tile.ext_points.push(record);
        } else {
            tile.points.push(record);
        }
    }
    for line in &objects.lines {
        if let Some(record) = encode_line(line, center, bits)? {
            if record.is_extended() {
                tile.ext_lines.push(record);
            } else {
                tile.lines.push(record);
            }
        }
    }
    for area in &objects.areas {
        if let Some(record) = encode_area(area, center, bits)? {
            if record.is_extended() {
                tile.ext_areas.push(record);
            } else {
                tile.areas.push(record);
            }
        }
    }

    Ok(tile)
}
