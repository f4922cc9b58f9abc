//! Splitting of oversized lines and areas.
//!
//! Before a level is partitioned every line and area is cut into pieces whose
//! bounding box fits a per-level threshold, so that any single object can live
//! in one subdivision.
//!
//! - **Lines** get midpoints inserted between distant neighbours, are cut once
//!   when they hold more than [`MAX_POINTS_IN_LINE`] points, and are finally
//!   cut wherever the running bound outgrows the threshold. Consecutive pieces
//!   share their cut point.
//! - **Areas** are clipped against the two halves of their bounding box,
//!   recursively, through a [`PolygonClipper`]. Pieces keep the winding of the
//!   input ring.

use geo::{BooleanOps, Coord, LineString, MultiPolygon, Polygon};
use log::trace;

use crate::bound::{Bound, MapPoint, MAP_UNIT_BITS};
use crate::object::{winding_of, AreaObject, LineObject};
use crate::{Error, Result};

/// Largest point count of a single line piece.
pub const MAX_POINTS_IN_LINE: usize = 250;

/// Lines shorter than this are cut into two near-equal halves instead.
const EVEN_SPLIT_BELOW: usize = 300;

/// Line threshold at 24 bits, in raw units.
pub const MAX_LINE_SPAN: i32 = 0x7FFF;

/// Area threshold at 24 bits, in raw units. One below 0xFFFF so a piece at
/// the limit still rounds to a half width of at most 0x7FFF.
pub const MAX_AREA_SPAN: i32 = 0xFFFE;

/// Lower bound for both thresholds, in map units.
const MIN_SPAN: i32 = 0x7FFF;

/// Upper bound for both thresholds, in map units.
const MAX_SPAN: i32 = (1 << 24) - 1;

/// Recursion limit for area bisection.
pub const MAX_BISECT_DEPTH: usize = 48;

fn threshold(span: i32, bits: u8) -> i32 {
    let shift = MAP_UNIT_BITS - crate::bound::clamp_coord_bits(bits);
    ((span as i64) << shift).clamp(MIN_SPAN as i64, MAX_SPAN as i64) as i32
}

/// Largest line bound (map units) per axis at `bits` resolution.
pub fn line_threshold(bits: u8) -> i32 {
    threshold(MAX_LINE_SPAN, bits)
}

/// Largest area bound (map units) per axis at `bits` resolution.
pub fn area_threshold(bits: u8) -> i32 {
    threshold(MAX_AREA_SPAN, bits)
}

fn exceeds(bound: &Bound, max: i32) -> bool {
    bound.width() > max || bound.height() > max
}

// ============================================================================
// Lines
// ============================================================================

/// Cut a line into pieces that each fit `max` map units per axis.
///
/// A line with more than [`MAX_POINTS_IN_LINE`] points is cut once by point
/// count; the tail of a very long line may still hold more points than that.
pub fn split_line(mut line: LineObject, max: i32) -> Vec<LineObject> {
    densify(&mut line, max);

    let count = line.points.len();
    let mut pieces = if count > MAX_POINTS_IN_LINE {
        let wanted = if count < EVEN_SPLIT_BELOW {
            count / 2 + 10
        } else {
            MAX_POINTS_IN_LINE
        };
        let tail = line.split_off_at(wanted - 1);
        vec![line, tail]
    } else {
        vec![line]
    };

    let mut i = 0;
    while i < pieces.len() {
        if exceeds(&pieces[i].bound(), max) {
            if let Some(cut) = first_oversized_prefix(&pieces[i].points, max) {
                let tail = pieces[i].split_off_at(cut);
                pieces.insert(i + 1, tail);
            }
        }
        i += 1;
    }

    if pieces.len() > 1 {
        trace!(
            "line {} split into {} pieces at span {:#x}",
            pieces[0].meta.id,
            pieces.len(),
            max
        );
    }
    pieces
}

/// Insert midpoints until no two neighbours are more than `max` apart per axis.
fn densify(line: &mut LineObject, max: i32) {
    let mut i = 0;
    while i + 1 < line.points.len() {
        let p1 = line.points[i];
        let p2 = line.points[i + 1];
        let far = (p2.lon as i64 - p1.lon as i64).abs() > max as i64
            || (p2.lat as i64 - p1.lat as i64).abs() > max as i64;
        if far {
            line.insert_point(i + 1, p1.midpoint(p2));
        } else {
            i += 1;
        }
    }
}

/// Index of the last point before the running bound outgrows `max`.
fn first_oversized_prefix(points: &[MapPoint], max: i32) -> Option<usize> {
    let mut running = Bound::from_point(*points.first()?);
    for (j, p) in points.iter().enumerate().skip(1) {
        running.embed_point(*p);
        if exceeds(&running, max) {
            // densified lines never exceed on their first segment
            return (j > 1).then_some(j - 1);
        }
    }
    None
}

// ============================================================================
// Areas
// ============================================================================

/// Rectangle clip capability used by area bisection.
///
/// Rings are open (no repeated closing point) and in map units.
pub trait PolygonClipper {
    /// Intersect `ring` with `rect`, returning zero or more open rings.
    fn clip(&self, ring: &[MapPoint], rect: &Bound) -> Vec<Vec<MapPoint>>;
}

/// Clipper backed by `geo`'s boolean operations.
///
/// Handles concave and self-touching rings and may return several pieces.
#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanClipper;

impl PolygonClipper for BooleanClipper {
    fn clip(&self, ring: &[MapPoint], rect: &Bound) -> Vec<Vec<MapPoint>> {
        let subject = Polygon::new(crate::object::ring_of(ring), vec![]);
        let result: MultiPolygon<f64> = subject.intersection(&rect.to_rect().to_polygon());
        result
            .0
            .iter()
            .map(|poly| ring_points(poly.exterior()))
            .filter(|points| points.len() >= 3)
            .collect()
    }
}

/// Sutherland-Hodgman clipper against an axis-aligned rectangle.
///
/// Fast but returns a single ring; concave inputs cut into several parts come
/// back joined along the rectangle edge.
#[derive(Debug, Clone, Copy, Default)]
pub struct SutherlandHodgmanClipper;

impl PolygonClipper for SutherlandHodgmanClipper {
    fn clip(&self, ring: &[MapPoint], rect: &Bound) -> Vec<Vec<MapPoint>> {
        let (left, right) = (rect.left as f64, rect.right as f64);
        let (bottom, top) = (rect.bottom as f64, rect.top as f64);
        let mut output: Vec<Coord<f64>> = ring
            .iter()
            .map(|p| Coord {
                x: p.lon as f64,
                y: p.lat as f64,
            })
            .collect();

        output = clip_against_edge(&output, |c| c.x >= left, |a, b| at_x(a, b, left));
        output = clip_against_edge(&output, |c| c.x <= right, |a, b| at_x(a, b, right));
        output = clip_against_edge(&output, |c| c.y >= bottom, |a, b| at_y(a, b, bottom));
        output = clip_against_edge(&output, |c| c.y <= top, |a, b| at_y(a, b, top));

        let points = ring_points(&LineString::new(output));
        if points.len() >= 3 {
            vec![points]
        } else {
            Vec::new()
        }
    }
}

fn at_x(a: &Coord<f64>, b: &Coord<f64>, x: f64) -> Coord<f64> {
    let t = (x - a.x) / (b.x - a.x);
    Coord {
        x,
        y: a.y + t * (b.y - a.y),
    }
}

fn at_y(a: &Coord<f64>, b: &Coord<f64>, y: f64) -> Coord<f64> {
    let t = (y - a.y) / (b.y - a.y);
    Coord {
        x: a.x + t * (b.x - a.x),
        y,
    }
}

/// Clip polygon vertices against a single edge.
fn clip_against_edge<F, I>(vertices: &[Coord<f64>], inside: F, intersect: I) -> Vec<Coord<f64>>
where
    F: Fn(&Coord<f64>) -> bool,
    I: Fn(&Coord<f64>, &Coord<f64>) -> Coord<f64>,
{
    let mut output = Vec::with_capacity(vertices.len());
    for (i, current) in vertices.iter().enumerate() {
        let next = &vertices[(i + 1) % vertices.len()];
        match (inside(current), inside(next)) {
            (true, true) => output.push(*current),
            (true, false) => {
                output.push(*current);
                output.push(intersect(current, next));
            }
            (false, true) => output.push(intersect(current, next)),
            (false, false) => {}
        }
    }
    output
}

/// Round a ring to map units, dropping the closing point and repeats.
fn ring_points(ring: &LineString<f64>) -> Vec<MapPoint> {
    let mut points: Vec<MapPoint> = Vec::with_capacity(ring.0.len());
    for c in &ring.0 {
        let p = MapPoint::new(c.x.round() as i32, c.y.round() as i32);
        if points.last() != Some(&p) {
            points.push(p);
        }
    }
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    points
}

/// Cut an area into pieces that each fit `max` map units per axis.
///
/// # Errors
///
/// [`Error::SplitDepthExceeded`] if bisection does not converge.
pub fn split_area<C>(area: AreaObject, max: i32, clipper: &C) -> Result<Vec<AreaObject>>
where
    C: PolygonClipper + ?Sized,
{
    if !exceeds(&area.bound(), max) {
        return Ok(vec![area]);
    }

    let mut rings = Vec::new();
    bisect_ring(&area.points, max, clipper, 0, area.meta.id, &mut rings)?;

    let pieces: Vec<AreaObject> = rings
        .into_iter()
        .filter_map(|mut points| {
            let winding = winding_of(&points)?;
            if winding != area.winding {
                points.reverse();
            }
            Some(AreaObject {
                meta: area.meta.clone(),
                points,
                winding: area.winding,
            })
        })
        .collect();

    trace!(
        "area {} bisected into {} pieces at span {:#x}",
        area.meta.id,
        pieces.len(),
        max
    );
    Ok(pieces)
}

fn bisect_ring<C>(
    ring: &[MapPoint],
    max: i32,
    clipper: &C,
    depth: usize,
    id: u64,
    out: &mut Vec<Vec<MapPoint>>,
) -> Result<()>
where
    C: PolygonClipper + ?Sized,
{
    let Some(bound) = Bound::of_points(ring.iter().copied()) else {
        return Ok(());
    };
    if !exceeds(&bound, max) {
        out.push(ring.to_vec());
        return Ok(());
    }
    if depth >= MAX_BISECT_DEPTH {
        return Err(Error::SplitDepthExceeded {
            limit: MAX_BISECT_DEPTH,
            at: format!("area {}", id),
        });
    }

    let (first, second) = halves(&bound);
    for half in [first, second] {
        for piece in clipper.clip(ring, &half) {
            bisect_ring(&piece, max, clipper, depth + 1, id, out)?;
        }
    }
    Ok(())
}

/// Halves of a bound, cut across its longer side.
fn halves(bound: &Bound) -> (Bound, Bound) {
    if bound.width() > bound.height() {
        let mid = bound.left + bound.width() / 2;
        (
            Bound::new(bound.left, bound.bottom, mid, bound.top),
            Bound::new(mid, bound.bottom, bound.right, bound.top),
        )
    } else {
        let mid = bound.bottom + bound.height() / 2;
        (
            Bound::new(bound.left, mid, bound.right, bound.top),
            Bound::new(bound.left, bound.bottom, bound.right, mid),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ObjectMeta, ObjectType};
    use geo::algorithm::winding_order::WindingOrder;

    fn mp(lon: i32, lat: i32) -> MapPoint {
        MapPoint::new(lon, lat)
    }

    fn line(points: Vec<MapPoint>) -> LineObject {
        LineObject::new(ObjectMeta::new(1, ObjectType::new(0x100)), points).unwrap()
    }

    fn area(points: Vec<MapPoint>) -> AreaObject {
        AreaObject::new(ObjectMeta::new(2, ObjectType::new(0x4a00)), points).unwrap()
    }

    fn assert_lines_chain(pieces: &[LineObject]) {
        for pair in pieces.windows(2) {
            assert_eq!(
                pair[0].points.last(),
                pair[1].points.first(),
                "consecutive pieces must share their cut point"
            );
        }
    }

    // ========================================================================
    // Thresholds
    // ========================================================================

    #[test]
    fn test_thresholds_scale_with_bits() {
        assert_eq!(line_threshold(24), 0x7FFF);
        assert_eq!(area_threshold(24), 0xFFFE);
        assert_eq!(line_threshold(22), 0x1FFFC);
        assert_eq!(line_threshold(15), 0xFFFE00);
        // clamped to 24 bits of map units
        assert_eq!(area_threshold(10), (1 << 24) - 1);
        assert!(area_threshold(20) > line_threshold(20));
    }

    // ========================================================================
    // Lines
    // ========================================================================

    #[test]
    fn test_short_line_unchanged() {
        let input = line(vec![mp(0, 0), mp(100, 100), mp(200, 50)]);
        let pieces = split_line(input.clone(), 0x7FFF);
        assert_eq!(pieces, vec![input]);
    }

    #[test]
    fn test_midpoints_inserted_for_long_segments() {
        let pieces = split_line(line(vec![mp(0, 0), mp(1000, 0)]), 300);
        for piece in &pieces {
            for pair in piece.points.windows(2) {
                assert!((pair[1].lon - pair[0].lon).abs() <= 300);
            }
            let b = piece.bound();
            assert!(b.width() <= 300, "piece bound {:?} too wide", b);
        }
        assert_lines_chain(&pieces);
        assert_eq!(pieces.first().unwrap().points[0], mp(0, 0));
        assert_eq!(*pieces.last().unwrap().points.last().unwrap(), mp(1000, 0));
    }

    #[test]
    fn test_point_count_split_near_even() {
        let points: Vec<MapPoint> = (0..280).map(|i| mp(i, 0)).collect();
        let pieces = split_line(line(points), 0x7FFF);
        assert_eq!(pieces.len(), 2);
        // 280 / 2 + 10 points in the head, the rest plus the shared point in the tail
        assert_eq!(pieces[0].points.len(), 150);
        assert_eq!(pieces[1].points.len(), 131);
        assert_lines_chain(&pieces);
    }

    #[test]
    fn test_point_count_split_cuts_once() {
        let points: Vec<MapPoint> = (0..700).map(|i| mp(i, i % 3)).collect();
        let pieces = split_line(line(points), 0x7FFF);
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].points.len(), 250);
        assert_eq!(pieces[1].points.len(), 451);
        assert_lines_chain(&pieces);
    }

    #[test]
    fn test_bound_driven_cut() {
        // a zig-zag whose segments are short but whose extent is large
        let points: Vec<MapPoint> = (0..20).map(|i| mp(i * 100, (i % 2) * 50)).collect();
        let pieces = split_line(line(points), 450);
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(!exceeds(&piece.bound(), 450), "bound {:?}", piece.bound());
            assert!(piece.points.len() >= 2);
        }
        assert_lines_chain(&pieces);
    }

    #[test]
    fn test_extra_bits_follow_points() {
        let input = line(vec![mp(0, 0), mp(1000, 0)])
            .with_extra_bits(vec![true, true])
            .unwrap();
        let pieces = split_line(input, 300);
        for piece in &pieces {
            let flags = piece.extra_bits.as_ref().unwrap();
            assert_eq!(flags.len(), piece.points.len());
        }
        // inserted midpoints carry no flag
        let first = &pieces[0];
        assert!(first.extra_bits.as_ref().unwrap()[0]);
        assert!(!first.extra_bits.as_ref().unwrap()[1]);
    }

    // ========================================================================
    // Areas
    // ========================================================================

    #[test]
    fn test_small_area_unchanged() {
        let input = area(vec![mp(0, 0), mp(10, 0), mp(10, 10), mp(0, 10)]);
        let pieces = split_area(input.clone(), 100, &BooleanClipper).unwrap();
        assert_eq!(pieces, vec![input]);
    }

    #[test]
    fn test_area_bisection_fits_and_keeps_winding() {
        for points in [
            vec![mp(0, 0), mp(1000, 0), mp(1000, 400), mp(0, 400)],
            vec![mp(0, 0), mp(0, 400), mp(1000, 400), mp(1000, 0)],
        ] {
            let input = area(points);
            let winding = input.winding;
            let pieces = split_area(input, 300, &BooleanClipper).unwrap();
            assert!(pieces.len() >= 4, "expected at least 4 pieces, got {}", pieces.len());
            for piece in &pieces {
                assert!(!exceeds(&piece.bound(), 300), "bound {:?}", piece.bound());
                assert_eq!(winding_of(&piece.points), Some(winding));
                assert_eq!(piece.winding, winding);
            }
        }
    }

    #[test]
    fn test_area_bisection_preserves_area() {
        use geo::Area;
        let input = area(vec![mp(0, 0), mp(1000, 0), mp(1000, 1000), mp(0, 1000)]);
        let pieces = split_area(input, 300, &BooleanClipper).unwrap();
        let total: f64 = pieces
            .iter()
            .map(|p| Polygon::new(p.ring(), vec![]).unsigned_area())
            .sum();
        assert!((total - 1_000_000.0).abs() < 1.0, "total area {}", total);
    }

    #[test]
    fn test_concave_area_split_into_separate_parts() {
        // U shape: cutting the bound horizontally at y=500 leaves two prongs on top
        let u = area(vec![
            mp(0, 0),
            mp(900, 0),
            mp(900, 1000),
            mp(600, 1000),
            mp(600, 300),
            mp(300, 300),
            mp(300, 1000),
            mp(0, 1000),
        ]);
        let pieces = split_area(u, 600, &BooleanClipper).unwrap();
        assert!(pieces.len() >= 3);
        for piece in &pieces {
            assert!(!exceeds(&piece.bound(), 600));
        }
    }

    #[test]
    fn test_sutherland_hodgman_clipper_rect() {
        let ring = vec![mp(0, 0), mp(100, 0), mp(100, 100), mp(0, 100)];
        let out = SutherlandHodgmanClipper.clip(&ring, &Bound::new(50, 0, 100, 100));
        assert_eq!(out.len(), 1);
        let b = Bound::of_points(out[0].iter().copied()).unwrap();
        assert_eq!(b, Bound::new(50, 0, 100, 100));
    }

    #[test]
    fn test_clippers_drop_disjoint_rings() {
        let ring = vec![mp(0, 0), mp(10, 0), mp(10, 10)];
        let rect = Bound::new(100, 100, 200, 200);
        assert!(BooleanClipper.clip(&ring, &rect).is_empty());
        assert!(SutherlandHodgmanClipper.clip(&ring, &rect).is_empty());
    }

    #[test]
    fn test_area_split_with_sutherland_hodgman() {
        let input = area(vec![mp(0, 0), mp(800, 0), mp(800, 800), mp(0, 800)]);
        assert_eq!(input.winding, WindingOrder::CounterClockwise);
        let pieces = split_area(input, 300, &SutherlandHodgmanClipper).unwrap();
        assert!(pieces.len() >= 4);
        assert!(pieces.iter().all(|p| !exceeds(&p.bound(), 300)));
    }

    #[test]
    fn test_halves_cut_longer_side() {
        let (a, b) = halves(&Bound::new(0, 0, 100, 10));
        assert_eq!(a, Bound::new(0, 0, 50, 10));
        assert_eq!(b, Bound::new(50, 0, 100, 10));

        let (a, b) = halves(&Bound::new(0, 0, 10, 100));
        assert_eq!(a, Bound::new(0, 50, 10, 100));
        assert_eq!(b, Bound::new(0, 0, 10, 50));
    }
}
