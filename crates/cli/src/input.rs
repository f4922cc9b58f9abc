//! GeoJSON features to map objects.
//!
//! Feature properties:
//! - `type`: object type, a number or a hex string such as `"0x10f01"` (required)
//! - `label`: label offset (optional)
//! - `direction`: one-way flag for lines (optional)
//! - `extra_bits`: one boolean per vertex for lines (optional); for a
//!   MultiLineString, one such array per member line

use std::path::Path;

use anyhow::{bail, Context, Result};
use geojson::feature::Id;
use geojson::{Feature, GeoJson, Value};
use log::warn;
use rgn_tiles_core::{
    AreaObject, GeoObject, LineObject, MapPoint, ObjectMeta, ObjectSet, ObjectType, PointObject,
};
use serde_json::Value as JsonValue;

/// Read a Feature or FeatureCollection file.
pub fn read_objects(path: &Path) -> Result<ObjectSet> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_objects(&text)
}

/// Parse GeoJSON text. Features that cannot be converted are skipped.
pub fn parse_objects(text: &str) -> Result<ObjectSet> {
    let geojson: GeoJson = text.parse().context("Failed to parse GeoJSON")?;
    let features = match geojson {
        GeoJson::FeatureCollection(collection) => collection.features,
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::Geometry(_) => bail!("Expected a Feature or FeatureCollection, got a geometry"),
    };

    let mut objects = ObjectSet::new();
    for (index, feature) in features.iter().enumerate() {
        match feature_objects(feature, index as u64) {
            Ok(converted) => converted.into_iter().for_each(|o| objects.push(o)),
            Err(e) => warn!("Skipping feature {}: {:#}", index, e),
        }
    }
    Ok(objects)
}

/// Parse a decimal or `0x` prefixed type code.
pub fn parse_type_code(code: &str) -> Result<ObjectType> {
    let code = code.trim();
    let value = match code
        .strip_prefix("0x")
        .or_else(|| code.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => code.parse::<u32>(),
    }
    .with_context(|| format!("Invalid type code {:?}", code))?;
    Ok(ObjectType::new(value))
}

fn feature_objects(feature: &Feature, index: u64) -> Result<Vec<GeoObject>> {
    let meta = feature_meta(feature, index)?;
    let geometry = feature.geometry.as_ref().context("Feature has no geometry")?;

    let objects = match &geometry.value {
        Value::Point(position) => vec![point(&meta, position)?],
        Value::MultiPoint(positions) => positions
            .iter()
            .map(|p| point(&meta, p))
            .collect::<Result<_>>()?,
        Value::LineString(positions) => {
            let flags = feature.property("extra_bits").map(bool_array).transpose()?;
            vec![line(feature, &meta, positions, flags)?]
        }
        Value::MultiLineString(lines) => {
            let flags = member_flags(feature, lines.len())?;
            lines
                .iter()
                .zip(flags)
                .map(|(l, f)| line(feature, &meta, l, f))
                .collect::<Result<_>>()?
        }
        Value::Polygon(rings) => vec![area(&meta, rings)?],
        Value::MultiPolygon(polygons) => polygons
            .iter()
            .map(|rings| area(&meta, rings))
            .collect::<Result<_>>()?,
        Value::GeometryCollection(_) => bail!("Geometry collections are not supported"),
    };
    Ok(objects)
}

fn feature_meta(feature: &Feature, index: u64) -> Result<ObjectMeta> {
    let object_type = match feature.property("type") {
        Some(JsonValue::Number(n)) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .map(ObjectType::new)
            .with_context(|| format!("Invalid type code {}", n))?,
        Some(JsonValue::String(s)) => parse_type_code(s)?,
        Some(other) => bail!("Unsupported type value {}", other),
        None => bail!("Missing type property"),
    };

    let id = match &feature.id {
        Some(Id::Number(n)) => n.as_u64().unwrap_or(index),
        _ => index,
    };

    let mut meta = ObjectMeta::new(id, object_type);
    if let Some(label) = feature.property("label") {
        let label = label
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .with_context(|| format!("Invalid label {}", label))?;
        meta = meta.with_label(label);
    }
    Ok(meta)
}

fn map_point(position: &[f64]) -> Result<MapPoint> {
    match position {
        [lon, lat, ..] => Ok(MapPoint::from_degrees(*lon, *lat)),
        _ => bail!("Position needs two coordinates, got {}", position.len()),
    }
}

fn map_points(positions: &[Vec<f64>]) -> Result<Vec<MapPoint>> {
    positions.iter().map(|p| map_point(p)).collect()
}

fn point(meta: &ObjectMeta, position: &[f64]) -> Result<GeoObject> {
    Ok(GeoObject::Point(PointObject::new(
        meta.clone(),
        map_point(position)?,
    )))
}

fn bool_array(value: &JsonValue) -> Result<Vec<bool>> {
    value
        .as_array()
        .and_then(|values| values.iter().map(JsonValue::as_bool).collect::<Option<Vec<_>>>())
        .context("extra_bits must be an array of booleans")
}

/// Per-member extra bits of a MultiLineString.
fn member_flags(feature: &Feature, members: usize) -> Result<Vec<Option<Vec<bool>>>> {
    let Some(value) = feature.property("extra_bits") else {
        return Ok(vec![None; members]);
    };
    let arrays = value
        .as_array()
        .filter(|arrays| arrays.iter().all(JsonValue::is_array))
        .context("extra_bits of a MultiLineString must be one array of booleans per line")?;
    if arrays.len() != members {
        bail!(
            "extra_bits has {} arrays for {} lines",
            arrays.len(),
            members
        );
    }
    arrays.iter().map(|a| bool_array(a).map(Some)).collect()
}

fn line(
    feature: &Feature,
    meta: &ObjectMeta,
    positions: &[Vec<f64>],
    flags: Option<Vec<bool>>,
) -> Result<GeoObject> {
    let mut line = LineObject::new(meta.clone(), map_points(positions)?)?;
    if let Some(direction) = feature.property("direction").and_then(JsonValue::as_bool) {
        line = line.with_direction(direction);
    }
    if let Some(flags) = flags {
        line = line.with_extra_bits(flags)?;
    }
    Ok(GeoObject::Line(line))
}

fn area(meta: &ObjectMeta, rings: &[Vec<Vec<f64>>]) -> Result<GeoObject> {
    let outer = rings.first().context("Polygon has no rings")?;
    if rings.len() > 1 {
        warn!(
            "object {}: ignoring {} inner rings",
            meta.id,
            rings.len() - 1
        );
    }
    Ok(GeoObject::Area(AreaObject::new(
        meta.clone(),
        map_points(outer)?,
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLLECTION: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "id": 42,
                "properties": {"type": "0x2a00", "label": 7},
                "geometry": {"type": "Point", "coordinates": [10.0, 50.0]}
            },
            {
                "type": "Feature",
                "properties": {"type": 256, "direction": true, "extra_bits": [false, true, false]},
                "geometry": {"type": "LineString", "coordinates": [[10.0, 50.0], [10.1, 50.1], [10.2, 50.0]]}
            },
            {
                "type": "Feature",
                "properties": {"type": "0x10f01"},
                "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]}
            },
            {
                "type": "Feature",
                "properties": {"name": "no type"},
                "geometry": {"type": "Point", "coordinates": [1.0, 1.0]}
            }
        ]
    }"#;

    #[test]
    fn test_parse_type_code() {
        assert_eq!(parse_type_code("0x2a00").unwrap().code(), 0x2a00);
        assert_eq!(parse_type_code("0X10F01").unwrap().code(), 0x10f01);
        assert_eq!(parse_type_code("256").unwrap().code(), 0x100);
        assert!(parse_type_code("0xzz").is_err());
    }

    #[test]
    fn test_parse_collection() {
        let objects = parse_objects(COLLECTION).unwrap();
        assert_eq!(objects.points.len(), 1);
        assert_eq!(objects.lines.len(), 1);
        assert_eq!(objects.areas.len(), 1);

        let point = &objects.points[0];
        assert_eq!(point.meta.id, 42);
        assert_eq!(point.meta.label, Some(7));
        assert_eq!(point.position, MapPoint::from_degrees(10.0, 50.0));

        let line = &objects.lines[0];
        assert_eq!(line.meta.id, 1);
        assert!(line.direction);
        assert_eq!(line.extra_bits, Some(vec![false, true, false]));

        assert!(objects.areas[0].meta.is_extended());
        assert_eq!(objects.areas[0].points.len(), 3);
    }

    #[test]
    fn test_mismatched_extra_bits_skip_feature() {
        let text = r#"{
            "type": "Feature",
            "properties": {"type": 256, "extra_bits": [true]},
            "geometry": {"type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]]}
        }"#;
        let objects = parse_objects(text).unwrap();
        assert!(objects.is_empty());
    }

    #[test]
    fn test_multi_line_takes_flags_per_member() {
        let text = r#"{
            "type": "Feature",
            "properties": {"type": 256, "extra_bits": [[true, false], [false, false, true]]},
            "geometry": {"type": "MultiLineString", "coordinates": [
                [[0.0, 0.0], [1.0, 1.0]],
                [[2.0, 2.0], [3.0, 3.0], [4.0, 2.0]]
            ]}
        }"#;
        let objects = parse_objects(text).unwrap();
        assert_eq!(objects.lines.len(), 2);
        assert_eq!(objects.lines[0].extra_bits, Some(vec![true, false]));
        assert_eq!(objects.lines[1].extra_bits, Some(vec![false, false, true]));
    }

    #[test]
    fn test_multi_line_rejects_flat_flags() {
        let text = r#"{
            "type": "Feature",
            "properties": {"type": 256, "extra_bits": [true, false]},
            "geometry": {"type": "MultiLineString", "coordinates": [
                [[0.0, 0.0], [1.0, 1.0]],
                [[2.0, 2.0], [3.0, 3.0]]
            ]}
        }"#;
        assert!(parse_objects(text).unwrap().is_empty());

        let feature: Feature = text.parse().unwrap();
        let err = feature_objects(&feature, 0).unwrap_err();
        assert!(err.to_string().contains("one array of booleans per line"), "{}", err);
    }

    #[test]
    fn test_multi_line_without_flags() {
        let text = r#"{
            "type": "Feature",
            "properties": {"type": 256},
            "geometry": {"type": "MultiLineString", "coordinates": [
                [[0.0, 0.0], [1.0, 1.0]],
                [[2.0, 2.0], [3.0, 3.0]]
            ]}
        }"#;
        let objects = parse_objects(text).unwrap();
        assert_eq!(objects.lines.len(), 2);
        assert!(objects.lines.iter().all(|l| l.extra_bits.is_none()));
    }

    #[test]
    fn test_bare_geometry_rejected() {
        let text = r#"{"type": "Point", "coordinates": [0.0, 0.0]}"#;
        assert!(parse_objects(text).is_err());
    }
}
