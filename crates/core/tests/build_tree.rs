//! End-to-end tests: build a multi-level tree over a synthetic map, then
//! encode every tile and read the streams back.

use rgn_tiles_core::bisect::{area_threshold, line_threshold};
use rgn_tiles_core::subdiv::split_is_needed;
use rgn_tiles_core::{
    AreaObject, BooleanClipper, Bound, BuildConfig, LevelFilter, LevelSpec, LineObject, MapPoint,
    ObjectMeta, ObjectSet, ObjectType, PointObject, RawPoint, Region, SubdivisionBuilder,
    SutherlandHodgmanClipper, TileTree, TypeFilter,
};

fn mp(lon: i32, lat: i32) -> MapPoint {
    MapPoint::new(lon, lat)
}

/// Streets on a grid, a few parks and many POIs around a town center.
fn synthetic_town() -> ObjectSet {
    let mut master = ObjectSet::new();
    let mut id = 0u64;
    let mut next_id = || {
        id += 1;
        id
    };

    for x in 0..60 {
        for y in 0..60 {
            let code = if (x + y) % 7 == 0 { 0x10f01 } else { 0x2a00 };
            let meta = ObjectMeta::new(next_id(), ObjectType::new(code));
            master
                .points
                .push(PointObject::new(meta, mp(x * 900 + 13, y * 900 + 29)));
        }
    }

    for row in 0..12 {
        let lat = row * 4500 + 100;
        let points: Vec<MapPoint> = (0..40).map(|i| mp(i * 1400, lat + (i % 3) * 70)).collect();
        let flags: Vec<bool> = (0..40).map(|i| i % 5 == 0).collect();
        let meta = ObjectMeta::new(next_id(), ObjectType::new(0x100));
        let street = LineObject::new(meta, points)
            .unwrap()
            .with_direction(row % 2 == 0)
            .with_extra_bits(flags)
            .unwrap();
        master.lines.push(street);
    }

    // one long road that needs cutting at every level
    let meta = ObjectMeta::new(next_id(), ObjectType::new(0x200));
    master
        .lines
        .push(LineObject::new(meta, vec![mp(0, 0), mp(54_000, 53_000)]).unwrap());

    for k in 0..4 {
        let base = k * 12_000 + 500;
        let ring = vec![
            mp(base, base),
            mp(base + 8_000, base),
            mp(base + 8_000, base + 5_000),
            mp(base, base + 5_000),
        ];
        let meta = ObjectMeta::new(next_id(), ObjectType::new(0x1700));
        master.areas.push(AreaObject::new(meta, ring).unwrap());
    }

    // a lake larger than the area threshold at 24 bits
    let lake = vec![mp(1_000, 20_000), mp(90_000, 21_000), mp(85_000, 95_000), mp(3_000, 90_000)];
    let meta = ObjectMeta::new(next_id(), ObjectType::new(0x3c00));
    master.areas.push(AreaObject::new(meta, lake).unwrap());

    master
}

fn town_config() -> BuildConfig {
    let coarse = LevelSpec::new(18).with_filter(LevelFilter::new(
        TypeFilter::Nothing,
        TypeFilter::include([0x200]),
        TypeFilter::include([0x3c00]),
    ));
    BuildConfig::new().with_levels(vec![coarse, LevelSpec::new(21), LevelSpec::new(24)])
}

fn build_town() -> TileTree {
    SubdivisionBuilder::new(town_config())
        .build(&synthetic_town())
        .unwrap()
}

#[test]
fn test_tree_is_balanced() {
    let tree = build_town();
    assert_eq!(tree.depth(), 3);
    assert!(tree.is_balanced());
    for root in tree.roots() {
        assert_eq!(tree[*root].level, 0);
        assert!(!tree[*root].children.is_empty());
    }
}

#[test]
fn test_no_tile_needs_a_split() {
    let config = town_config();
    let tree = SubdivisionBuilder::new(config.clone())
        .build(&synthetic_town())
        .unwrap();
    for (id, tile) in tree.iter() {
        let region = Region::new(tile.bound, tile.objects.clone());
        let split = split_is_needed(&region, tile.bits, &config.limits).unwrap();
        assert_eq!(split, None, "tile {} still needs a split", tree.path(id));
    }
}

#[test]
fn test_level_filters_and_thresholds_hold() {
    let tree = build_town();
    for (_, tile) in tree.iter() {
        if tile.level == 0 {
            assert!(tile.objects.points.is_empty());
            assert!(tile
                .objects
                .lines
                .iter()
                .all(|l| l.meta.object_type.code() == 0x200));
        }
        for line in &tile.objects.lines {
            let b = line.bound();
            assert!(b.width() <= line_threshold(tile.bits));
            assert!(b.height() <= line_threshold(tile.bits));
            assert!(line.points.len() <= 250);
            assert!(tile.bound.is_enclosed(&b));
        }
        for area in &tile.objects.areas {
            let b = area.bound();
            assert!(b.width() <= area_threshold(tile.bits));
            assert!(b.height() <= area_threshold(tile.bits));
        }
    }
}

#[test]
fn test_every_point_reaches_the_detail_level() {
    let master = synthetic_town();
    let tree = SubdivisionBuilder::new(town_config()).build(&master).unwrap();
    for point in &master.points {
        let found = tree.level(2).any(|id| {
            tree[id]
                .objects
                .points
                .iter()
                .any(|p| p.meta.id == point.meta.id)
        });
        assert!(found, "point {} missing at the detail level", point.meta.id);
    }
}

#[test]
fn test_encoded_lines_decode_to_tile_points() {
    let tree = build_town();
    for id in tree.level(2) {
        let tile = &tree[id];
        let center = tile.bound.center();
        let encoded = tree.encode_tile(id).unwrap();
        assert!(encoded.points.len() <= 255);
        assert!(encoded.sizes().total() <= 0xFFF8);

        let plain_lines: Vec<&LineObject> = tile
            .objects
            .lines
            .iter()
            .filter(|l| !l.meta.is_extended())
            .collect();
        assert_eq!(plain_lines.len(), encoded.lines.len());

        for (line, record) in plain_lines.iter().zip(&encoded.lines) {
            let mut expected: Vec<RawPoint> = line
                .points
                .iter()
                .map(|p| RawPoint::from_map(*p, center, tile.bits))
                .collect();
            expected.dedup();

            let decoded = record.raw_points().unwrap();
            assert_eq!(decoded[0], record.start);
            assert_eq!(&decoded[..expected.len()], &expected[..]);
            // byte padding may only repeat the last point
            let last = expected[expected.len() - 1];
            assert!(decoded[expected.len()..].iter().all(|p| *p == last));
            assert_eq!(record.direction, line.direction);
            assert_eq!(record.with_extra_bits, line.extra_bits.is_some());
        }
    }
}

#[test]
fn test_tile_headers_describe_contents() {
    let tree = build_town();
    for (id, tile) in tree.iter() {
        let encoded = tree.encode_tile(id).unwrap();
        let header = encoded.header;
        assert_eq!(header.center, tile.bound.center());
        assert!(header.half_width <= 0x7FFF);
        assert!(header.half_height <= 0x7FFF);
        assert_eq!(header.has_points, !encoded.points.is_empty());
        assert_eq!(header.has_lines, tile.objects.line_count(false) > 0);
    }
}

#[test]
fn test_clippers_agree_on_piece_limits() {
    let master = synthetic_town();
    let config = BuildConfig::new()
        .with_levels(vec![LevelSpec::new(24)])
        .with_bound(Bound::new(0, 0, 100_000, 100_000));
    let boolean = SubdivisionBuilder::new(config.clone())
        .with_clipper(BooleanClipper)
        .build(&master)
        .unwrap();
    let sutherland = SubdivisionBuilder::new(config)
        .with_clipper(SutherlandHodgmanClipper)
        .build(&master)
        .unwrap();

    for tree in [&boolean, &sutherland] {
        let lake_pieces: Vec<&AreaObject> = tree
            .iter()
            .flat_map(|(_, t)| t.objects.areas.iter())
            .filter(|a| a.meta.object_type.code() == 0x3c00)
            .collect();
        assert!(lake_pieces.len() > 1);
        for piece in lake_pieces {
            assert!(piece.bound().width() <= area_threshold(24));
            assert!(piece.bound().height() <= area_threshold(24));
        }
    }
}

#[test]
fn test_object_meta_serializes() {
    let meta = ObjectMeta::new(5, ObjectType::new(0x10f01)).with_label(12);
    let json = serde_json::to_value(&meta).unwrap();
    assert_eq!(json["id"], 5);
    assert_eq!(json["object_type"], 0x10f01);
    assert_eq!(json["label"], 12);

    let bound: Bound = serde_json::from_str(r#"{"left":1,"bottom":2,"right":3,"top":4}"#).unwrap();
    assert_eq!(bound, Bound::new(1, 2, 3, 4));
}
