//! Point-delta bitstream codec
//!
//! Polylines and polygons are stored as a start point (relative to the tile
//! center) followed by a packed bitstream of per-point coordinate deltas.
//!
//! # Layout
//!
//! Bits are written low bit first within each byte, bytes low to high.
//!
//! ```text
//! header:  lon sign-known [lon sign]  lat sign-known [lat sign]  [ext]  [extra0]
//! records: lon field, lat field, [extra bit]   repeated for points 1..n
//! ```
//!
//! Field widths come from a 4-bit "base bits" code per axis (see [`real_bits`]).
//! Axes whose deltas all share one sign store plain magnitudes; mixed-sign axes
//! get one extra bit and use sign-magnitude fields with an escape chain for
//! values that do not fit.
//!
//! The start point's extra bit slot is reserved in the header but never
//! written; decoders always see it as `false`.

use std::fmt::Write as _;

use log::{trace, warn};

use crate::bound::RawPoint;
use crate::{Error, Result};

/// Largest start-point magnitude an encoded stream can be anchored at.
pub const MAX_START_OFFSET: i32 = 0xFFFF;

/// Largest base-bits code that fits the 4-bit field of the stream info byte.
pub const MAX_BASE_BITS: u8 = 15;

/// Number of bits needed for `value` in sign-magnitude form.
///
/// Zero needs no bits; negative values need one more than their magnitude.
pub fn bits_needed(value: i32) -> u32 {
    let sign = u32::from(value < 0);
    let magnitude = value.unsigned_abs();
    sign + (u32::BITS - magnitude.leading_zeros())
}

/// Compress a real field width into its base-bits code.
pub fn base_bits(real: u32) -> u32 {
    match real {
        0..=2 => 0,
        3..=11 => real - 2,
        _ => real / 2 + 4,
    }
}

/// Expand a base-bits code into the real field width.
pub fn real_bits(base: u32) -> u32 {
    if base <= 9 {
        base + 2
    } else {
        2 * base - 7
    }
}

/// Sign treatment of one axis over all deltas of a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignMode {
    /// Every delta is `>= 0`.
    UniformNonNegative,
    /// Every delta is `< 0`.
    UniformNegative,
    /// Signs vary; fields are sign-magnitude with escapes.
    Mixed,
}

impl SignMode {
    /// Mode implied by a single delta.
    fn of(delta: i32) -> Self {
        if delta >= 0 {
            SignMode::UniformNonNegative
        } else {
            SignMode::UniformNegative
        }
    }

    /// Fold the next delta into the mode. Once mixed, always mixed.
    fn observe(self, delta: i32) -> Self {
        match self {
            SignMode::UniformNonNegative if delta < 0 => SignMode::Mixed,
            SignMode::UniformNegative if delta >= 0 => SignMode::Mixed,
            mode => mode,
        }
    }

    /// Detect the mode of one axis over a delta sequence. `None` when empty.
    pub fn detect<I: IntoIterator<Item = i32>>(deltas: I) -> Option<Self> {
        let mut iter = deltas.into_iter();
        let first = SignMode::of(iter.next()?);
        Some(iter.fold(first, SignMode::observe))
    }

    fn header_bits(self) -> usize {
        match self {
            SignMode::Mixed => 1,
            _ => 2,
        }
    }

    /// Actual field width for a base-bits code under this mode.
    pub fn field_bits(self, base: u8) -> u32 {
        let real = real_bits(base as u32);
        match self {
            SignMode::Mixed => real + 1,
            _ => real,
        }
    }
}

/// An encoded point sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedStream {
    pub bytes: Vec<u8>,
    pub base_lon: u8,
    pub base_lat: u8,
}

impl EncodedStream {
    /// The packed stream info byte: latitude code high nibble, longitude low.
    pub fn bitstream_info(&self) -> u8 {
        (self.base_lat << 4) | (self.base_lon & 0x0F)
    }
}

/// Result of decoding a bitstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// Absolute points, starting with the supplied start point.
    pub points: Vec<RawPoint>,
    /// One flag per point when extra bits were requested.
    pub extra_bits: Option<Vec<bool>>,
    /// False when any bit after the last complete record was set.
    pub clean_tail: bool,
}

// ============================================================================
// Bit I/O
// ============================================================================

/// Appends little-endian bit fields to a growing byte buffer.
#[derive(Debug, Default)]
struct BitWriter {
    bytes: Vec<u8>,
    pos: usize,
}

impl BitWriter {
    fn with_capacity_bits(bits: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(bits.div_ceil(8)),
            pos: 0,
        }
    }

    /// Write the low `count` bits of `value`.
    fn write(&mut self, value: u32, count: u32) {
        for i in 0..count {
            self.write_bit((value >> i) & 1 != 0);
        }
    }

    fn write_bit(&mut self, bit: bool) {
        let byte = self.pos / 8;
        if byte >= self.bytes.len() {
            self.bytes.push(0);
        }
        if bit {
            self.bytes[byte] |= 1 << (self.pos % 8);
        }
        self.pos += 1;
    }

    /// Reserve bits without setting them.
    fn skip(&mut self, count: usize) {
        for _ in 0..count {
            self.write_bit(false);
        }
    }

    fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

struct BitReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn total_bits(&self) -> usize {
        self.bytes.len() * 8
    }

    fn remaining(&self) -> usize {
        self.total_bits().saturating_sub(self.pos)
    }

    fn read_bit(&mut self) -> Result<bool> {
        let byte = self.bytes.get(self.pos / 8).ok_or_else(|| Error::MalformedStream {
            bit_offset: self.pos,
            reason: "read past end of stream".to_string(),
        })?;
        let bit = (*byte >> (self.pos % 8)) & 1 != 0;
        self.pos += 1;
        Ok(bit)
    }

    fn read(&mut self, count: u32) -> Result<u32> {
        if self.remaining() < count as usize {
            return Err(Error::MalformedStream {
                bit_offset: self.pos,
                reason: format!("field of {} bits runs past end of stream", count),
            });
        }
        let mut value = 0u32;
        for i in 0..count {
            if self.read_bit()? {
                value |= 1 << i;
            }
        }
        Ok(value)
    }
}

// ============================================================================
// Field encoding
// ============================================================================

fn write_signed(writer: &mut BitWriter, value: i32, width: u32) {
    let top = 1u32 << (width - 1);
    let mask = top - 1;
    let mut rest = value.unsigned_abs();
    while rest > mask {
        writer.write(top, width);
        rest -= mask;
    }
    if value < 0 {
        writer.write((top - rest) | top, width);
    } else {
        writer.write(rest, width);
    }
}

fn read_signed(reader: &mut BitReader<'_>, width: u32) -> Result<i32> {
    let top = 1u32 << (width - 1);
    let mask = top - 1;
    let start = reader.pos;
    let mut escaped: i64 = 0;
    loop {
        let raw = reader.read(width)?;
        let magnitude = (raw & mask) as i64;
        let value = if raw & top == 0 {
            escaped.checked_add(magnitude)
        } else if magnitude != 0 {
            (magnitude - top as i64).checked_sub(escaped)
        } else {
            escaped = escaped
                .checked_add(mask as i64)
                .filter(|e| *e <= i32::MAX as i64)
                .ok_or_else(|| overflow(start, "escape chain"))?;
            continue;
        };
        return value
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| overflow(start, "escaped value"));
    }
}

fn overflow(bit_offset: usize, what: &str) -> Error {
    Error::MalformedStream {
        bit_offset,
        reason: format!("{} overflows 32 bits", what),
    }
}

/// Number of fields a value occupies on a mixed-sign axis.
fn signed_field_count(value: i32, width: u32) -> usize {
    let mask = (1u32 << (width - 1)) - 1;
    let magnitude = value.unsigned_abs();
    if magnitude <= mask {
        1
    } else {
        magnitude.div_ceil(mask) as usize
    }
}

// ============================================================================
// Encoder
// ============================================================================

/// Width plan for one axis.
#[derive(Debug, Clone, Copy)]
struct Axis {
    mode: SignMode,
    base: u8,
}

impl Axis {
    fn width(&self) -> u32 {
        self.mode.field_bits(self.base)
    }

    fn value_bits(&self, value: i32) -> usize {
        let width = self.width();
        match self.mode {
            SignMode::Mixed => signed_field_count(value, width) * width as usize,
            _ => width as usize,
        }
    }

    fn write(&self, writer: &mut BitWriter, value: i32) {
        match self.mode {
            SignMode::Mixed => write_signed(writer, value, self.width()),
            _ => writer.write(value.unsigned_abs(), self.width()),
        }
    }

    fn write_header(&self, writer: &mut BitWriter) {
        match self.mode {
            SignMode::Mixed => writer.skip(1),
            SignMode::UniformNonNegative => {
                writer.write_bit(true);
                writer.skip(1);
            }
            SignMode::UniformNegative => {
                writer.write_bit(true);
                writer.write_bit(true);
            }
        }
    }
}

/// Deltas of a sequence with sign modes and initial widths.
struct Plan {
    deltas: Vec<RawPoint>,
    lon: Axis,
    lat: Axis,
    with_extra: bool,
    extended: bool,
}

impl Plan {
    fn new(points: &[RawPoint], with_extra: bool, extended: bool) -> Result<Self> {
        if points.len() < 2 {
            return Err(Error::DegenerateGeometry(format!(
                "point sequence needs at least 2 points, got {}",
                points.len()
            )));
        }
        let first = points[0];
        for value in [first.lon, first.lat] {
            if value.unsigned_abs() > MAX_START_OFFSET as u32 {
                return Err(Error::CoordinateOutOfRange {
                    value: value as i64,
                    limit: MAX_START_OFFSET as i64,
                });
            }
        }

        let deltas: Vec<RawPoint> = points.windows(2).map(|w| w[0].delta_to(w[1])).collect();
        let lon = Self::initial_axis(deltas.iter().map(|d| d.lon))?;
        let lat = Self::initial_axis(deltas.iter().map(|d| d.lat))?;

        Ok(Self {
            deltas,
            lon,
            lat,
            with_extra,
            extended,
        })
    }

    fn initial_axis<I>(values: I) -> Result<Axis>
    where
        I: Iterator<Item = i32> + Clone,
    {
        // non-empty: callers guarantee at least one delta
        let mode = SignMode::detect(values.clone()).unwrap_or(SignMode::UniformNonNegative);
        let (min, max) = values.fold((i32::MAX, i32::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
        let needed = bits_needed(min).max(bits_needed(max));
        let base = base_bits(needed);
        if base > MAX_BASE_BITS as u32 {
            return Err(Error::CoordinateOutOfRange {
                value: if min.unsigned_abs() > max.unsigned_abs() {
                    min as i64
                } else {
                    max as i64
                },
                limit: (1i64 << real_bits(MAX_BASE_BITS as u32)) - 1,
            });
        }
        Ok(Axis {
            mode,
            base: base as u8,
        })
    }

    fn header_bits(&self) -> usize {
        self.lon.mode.header_bits()
            + self.lat.mode.header_bits()
            + usize::from(self.extended)
            + usize::from(self.with_extra)
    }

    fn total_bits(&self, lon: Axis, lat: Axis) -> usize {
        let records: usize = self
            .deltas
            .iter()
            .map(|d| lon.value_bits(d.lon) + lat.value_bits(d.lat) + usize::from(self.with_extra))
            .sum();
        self.header_bits() + records
    }

    fn byte_len(&self, lon: Axis, lat: Axis) -> usize {
        self.total_bits(lon, lat).div_ceil(8)
    }

    /// Lower a mixed axis' width while the stream keeps getting shorter.
    fn optimise(&mut self) {
        if self.lon.mode == SignMode::Mixed {
            let mut best = self.byte_len(self.lon, self.lat);
            while self.lon.base > 0 {
                let candidate = Axis {
                    base: self.lon.base - 1,
                    ..self.lon
                };
                let len = self.byte_len(candidate, self.lat);
                if len >= best {
                    break;
                }
                best = len;
                self.lon = candidate;
            }
        }
        if self.lat.mode == SignMode::Mixed {
            let mut best = self.byte_len(self.lon, self.lat);
            while self.lat.base > 0 {
                let candidate = Axis {
                    base: self.lat.base - 1,
                    ..self.lat
                };
                let len = self.byte_len(self.lon, candidate);
                if len >= best {
                    break;
                }
                best = len;
                self.lat = candidate;
            }
        }
    }

    fn build(&self, extra: Option<&[bool]>) -> Vec<u8> {
        let mut writer = BitWriter::with_capacity_bits(self.total_bits(self.lon, self.lat));
        self.lon.write_header(&mut writer);
        self.lat.write_header(&mut writer);
        if self.extended {
            writer.skip(1);
        }
        if self.with_extra {
            // start point's slot, never written
            writer.skip(1);
        }
        for (i, delta) in self.deltas.iter().enumerate() {
            self.lon.write(&mut writer, delta.lon);
            self.lat.write(&mut writer, delta.lat);
            if let Some(flags) = extra {
                writer.write_bit(flags[i + 1]);
            }
        }
        writer.finish()
    }
}

fn check_extra(points: &[RawPoint], extra: Option<&[bool]>) -> Result<()> {
    match extra {
        Some(flags) if flags.len() != points.len() => Err(Error::ExtraBitsMismatch {
            points: points.len(),
            flags: flags.len(),
        }),
        _ => Ok(()),
    }
}

/// Encode an absolute point sequence (raw units, relative to the tile center).
///
/// `extra` must hold one flag per point; the first flag is never stored.
///
/// # Errors
///
/// - [`Error::DegenerateGeometry`] for fewer than 2 points
/// - [`Error::CoordinateOutOfRange`] if the first point exceeds `0xFFFF` on either
///   axis or a delta needs more than the widest base-bits code
/// - [`Error::ExtraBitsMismatch`] if `extra` has the wrong length
pub fn encode(points: &[RawPoint], extra: Option<&[bool]>, extended: bool) -> Result<EncodedStream> {
    check_extra(points, extra)?;
    let mut plan = Plan::new(points, extra.is_some(), extended)?;
    let initial = (plan.lon.base, plan.lat.base);
    plan.optimise();
    if (plan.lon.base, plan.lat.base) != initial {
        trace!(
            "narrowed base bits lon {}->{} lat {}->{} for {} points",
            initial.0,
            plan.lon.base,
            initial.1,
            plan.lat.base,
            points.len()
        );
    }
    Ok(EncodedStream {
        bytes: plan.build(extra),
        base_lon: plan.lon.base,
        base_lat: plan.lat.base,
    })
}

/// Byte length [`encode`] would produce before width narrowing.
///
/// Used for size estimates where the exact optimum is not needed.
pub fn encoded_len(points: &[RawPoint], with_extra: bool, extended: bool) -> Result<usize> {
    let plan = Plan::new(points, with_extra, extended)?;
    Ok(plan.byte_len(plan.lon, plan.lat))
}

// ============================================================================
// Decoder
// ============================================================================

fn read_sign_mode(reader: &mut BitReader<'_>) -> Result<SignMode> {
    if !reader.read_bit()? {
        return Ok(SignMode::Mixed);
    }
    Ok(if reader.read_bit()? {
        SignMode::UniformNegative
    } else {
        SignMode::UniformNonNegative
    })
}

fn read_value(reader: &mut BitReader<'_>, mode: SignMode, width: u32) -> Result<i32> {
    match mode {
        SignMode::Mixed => read_signed(reader, width),
        SignMode::UniformNonNegative => Ok(reader.read(width)? as i32),
        SignMode::UniformNegative => Ok(-(reader.read(width)? as i32)),
    }
}

/// Decode a bitstream back into absolute points.
///
/// Decoding stops once fewer bits remain than one minimal record needs. Set
/// bits in that tail are reported through [`Decoded::clean_tail`]. Trailing
/// padding long enough for a whole record decodes as zero deltas, so callers
/// may see repeats of the last point.
///
/// # Errors
///
/// [`Error::MalformedStream`] if an escape chain runs past the end of the data
/// or a decoded value overflows 32 bits.
pub fn decode(
    bytes: &[u8],
    base_lon: u8,
    base_lat: u8,
    start: RawPoint,
    with_extra: bool,
    extended: bool,
) -> Result<Decoded> {
    let mut points = vec![start];
    let mut extra_bits = with_extra.then(Vec::new);
    if bytes.is_empty() {
        return Ok(Decoded {
            points,
            extra_bits,
            clean_tail: true,
        });
    }

    let mut reader = BitReader::new(bytes);
    let lon_mode = read_sign_mode(&mut reader)?;
    let lat_mode = read_sign_mode(&mut reader)?;
    if extended {
        reader.read_bit()?;
    }
    if let Some(flags) = extra_bits.as_mut() {
        flags.push(reader.read_bit()?);
    }

    let lon_width = lon_mode.field_bits(base_lon);
    let lat_width = lat_mode.field_bits(base_lat);
    let record_bits = (lon_width + lat_width) as usize + usize::from(with_extra);

    while reader.remaining() >= record_bits {
        let lon = read_value(&mut reader, lon_mode, lon_width)?;
        let lat = read_value(&mut reader, lat_mode, lat_width)?;
        if let Some(flags) = extra_bits.as_mut() {
            flags.push(reader.read_bit()?);
        }
        let last = points[points.len() - 1];
        let (Some(next_lon), Some(next_lat)) = (last.lon.checked_add(lon), last.lat.checked_add(lat))
        else {
            return Err(overflow(reader.pos, "point coordinate"));
        };
        points.push(RawPoint::new(next_lon, next_lat));
    }

    let mut clean_tail = true;
    while reader.remaining() > 0 {
        if reader.read_bit()? {
            clean_tail = false;
        }
    }
    if !clean_tail {
        warn!(
            "bitstream has set bits after the last record: {}",
            describe(bytes, base_lon, base_lat, with_extra, extended)
        );
    }

    Ok(Decoded {
        points,
        extra_bits,
        clean_tail,
    })
}

/// Decode and reject streams with a dirty tail.
pub fn decode_strict(
    bytes: &[u8],
    base_lon: u8,
    base_lat: u8,
    start: RawPoint,
    with_extra: bool,
    extended: bool,
) -> Result<Decoded> {
    let decoded = decode(bytes, base_lon, base_lat, start, with_extra, extended)?;
    if !decoded.clean_tail {
        return Err(Error::MalformedStream {
            bit_offset: bytes.len() * 8,
            reason: "non-zero bits after the last record".to_string(),
        });
    }
    Ok(decoded)
}

/// Human-readable dump of a bitstream for diagnostics.
///
/// Header and records are separated by `:`, fields by spaces, records by
/// commas, extra bits in brackets. Bits are shown in stream order.
pub fn describe(bytes: &[u8], base_lon: u8, base_lat: u8, with_extra: bool, extended: bool) -> String {
    let bits: Vec<char> = bytes
        .iter()
        .flat_map(|&b| (0..8).map(move |i| if (b >> i) & 1 != 0 { '1' } else { '0' }))
        .collect();

    let mut reader = BitReader::new(bytes);
    let modes = read_sign_mode(&mut reader).and_then(|lon| Ok((lon, read_sign_mode(&mut reader)?)));
    let Ok((lon_mode, lat_mode)) = modes else {
        return format!("<{} bytes, truncated header>", bytes.len());
    };
    let lon_width = lon_mode.field_bits(base_lon) as usize;
    let lat_width = lat_mode.field_bits(base_lat) as usize;
    let symbol = |mode: SignMode| match mode {
        SignMode::Mixed => '*',
        SignMode::UniformNonNegative => '+',
        SignMode::UniformNegative => '-',
    };

    let mut out = String::new();
    let _ = write!(
        out,
        "lon {}->{} lat {}->{} signs {}{}, ",
        base_lon,
        lon_width,
        base_lat,
        lat_width,
        symbol(lon_mode),
        symbol(lat_mode)
    );

    let push = |out: &mut String, from: usize, len: usize| {
        let end = (from + len).min(bits.len());
        out.extend(&bits[from.min(end)..end]);
        end
    };

    let mut pos = push(&mut out, 0, reader.pos);
    if extended {
        pos = push(&mut out, pos, 1);
    }
    out.push(':');
    if with_extra {
        out.push('[');
        pos = push(&mut out, pos, 1);
        out.push(']');
    }
    let mut first = true;
    while pos < bits.len() {
        if !first {
            out.push(',');
        }
        first = false;
        pos = push(&mut out, pos, lon_width);
        out.push(' ');
        pos = push(&mut out, pos, lat_width);
        if with_extra && pos < bits.len() {
            out.push('[');
            pos = push(&mut out, pos, 1);
            out.push(']');
        }
    }
    out
}
