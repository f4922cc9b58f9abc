//! Subdivision tree construction.
//!
//! Level 0 covers the whole map at the coarsest resolution. Every tile of
//! level `n` gets children at level `n + 1` that together cover its bound, so
//! every top-level subtree reaches the same depth.
//!
//! A level is filled in three steps:
//! 1. Select the objects of the parent bound that the level's filter allows,
//!    bisecting lines and areas that are too large for the level resolution.
//! 2. Check the selection against the [`SplitLimits`].
//! 3. Split into a grid of cells while a limit is exceeded.

use std::ops::Index;

use log::{debug, info};

use crate::bisect::{
    area_threshold, line_threshold, split_area, split_line, BooleanClipper, PolygonClipper,
};
use crate::bound::{clamp_coord_bits, Bound, MapPoint, MAP_UNIT_BITS};
use crate::filter::LevelFilter;
use crate::object::{GeoObject, ObjectKind, ObjectMeta, ObjectSet};
use crate::record::{encode_tile, estimate_sizes, EncodedTile};
use crate::{Error, Result};

/// Largest half width or half height of a tile, in raw units.
pub const MAX_SUBDIV_HALF_SIZE: i32 = 0x7FFF;

/// Record count limit for plain points and for plain lines.
pub const MAX_PLAIN_RECORDS: usize = 255;

/// Limit on the summed size of all six sections.
pub const MAX_REGION_BYTES: usize = 0xFFF8;

/// Limit on each extended section.
pub const MAX_EXTENDED_SECTION_BYTES: usize = 0xFF00;

/// Default nesting limit for recursive splits of one tile.
pub const DEFAULT_MAX_SPLIT_DEPTH: usize = 32;

// ============================================================================
// Configuration
// ============================================================================

/// Limits a tile must respect before it stops being split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitLimits {
    /// Half width and half height limit in raw units (default: 0x7FFF)
    pub max_half_size: i32,
    /// Plain point records per tile (default: 255)
    pub max_points: usize,
    /// Plain line records per tile (default: 255)
    pub max_lines: usize,
    /// Summed section sizes (default: 0xFFF8)
    pub max_total_bytes: usize,
    /// Each extended section (default: 0xFF00)
    pub max_extended_bytes: usize,
    /// Nesting limit for recursive splits (default: 32)
    pub max_depth: usize,
}

impl Default for SplitLimits {
    fn default() -> Self {
        Self {
            max_half_size: MAX_SUBDIV_HALF_SIZE,
            max_points: MAX_PLAIN_RECORDS,
            max_lines: MAX_PLAIN_RECORDS,
            max_total_bytes: MAX_REGION_BYTES,
            max_extended_bytes: MAX_EXTENDED_SECTION_BYTES,
            max_depth: DEFAULT_MAX_SPLIT_DEPTH,
        }
    }
}

impl SplitLimits {
    pub fn with_max_half_size(mut self, half_size: i32) -> Self {
        self.max_half_size = half_size;
        self
    }

    pub fn with_max_points(mut self, points: usize) -> Self {
        self.max_points = points;
        self
    }

    pub fn with_max_lines(mut self, lines: usize) -> Self {
        self.max_lines = lines;
        self
    }

    pub fn with_max_total_bytes(mut self, bytes: usize) -> Self {
        self.max_total_bytes = bytes;
        self
    }

    pub fn with_max_extended_bytes(mut self, bytes: usize) -> Self {
        self.max_extended_bytes = bytes;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }
}

/// Resolution and type selection of one tree level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelSpec {
    /// Coordinate bits, clamped to 10..=24
    pub bits: u8,
    pub filter: LevelFilter,
}

impl LevelSpec {
    pub fn new(bits: u8) -> Self {
        Self {
            bits: clamp_coord_bits(bits),
            filter: LevelFilter::default(),
        }
    }

    pub fn with_filter(mut self, filter: LevelFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Configuration for [`SubdivisionBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    /// Levels from the coarsest (tree top) to the most detailed
    pub levels: Vec<LevelSpec>,
    /// Map bound of the top level; derived from the objects when `None`
    pub bound: Option<Bound>,
    pub limits: SplitLimits,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            levels: vec![LevelSpec::new(24)],
            bound: None,
            limits: SplitLimits::default(),
        }
    }
}

impl BuildConfig {
    /// Create a configuration with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_levels(mut self, levels: Vec<LevelSpec>) -> Self {
        self.levels = levels;
        self
    }

    pub fn with_bound(mut self, bound: Bound) -> Self {
        self.bound = Some(bound);
        self
    }

    pub fn with_limits(mut self, limits: SplitLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.levels.is_empty() {
            return Err(Error::InvalidConfig("at least one level is required".into()));
        }
        if self.limits.max_half_size < 1 {
            return Err(Error::InvalidConfig(format!(
                "max_half_size must be positive, got {}",
                self.limits.max_half_size
            )));
        }
        if self.limits.max_depth == 0 {
            return Err(Error::InvalidConfig("max_depth must be positive".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Tree
// ============================================================================

/// Index of a tile in its [`TileTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(usize);

impl TileId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One subdivision.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    /// Map bound; children are built from the objects inside it
    pub bound: Bound,
    pub bits: u8,
    pub level: usize,
    pub parent: Option<TileId>,
    pub children: Vec<TileId>,
    pub objects: ObjectSet,
    /// Position among the siblings
    pub index: usize,
}

/// Arena of tiles; roots are the level 0 tiles.
#[derive(Debug, Clone, Default)]
pub struct TileTree {
    tiles: Vec<Tile>,
    roots: Vec<TileId>,
}

impl TileTree {
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn get(&self, id: TileId) -> Option<&Tile> {
        self.tiles.get(id.0)
    }

    pub fn roots(&self) -> &[TileId] {
        &self.roots
    }

    pub fn iter(&self) -> impl Iterator<Item = (TileId, &Tile)> {
        self.tiles.iter().enumerate().map(|(i, t)| (TileId(i), t))
    }

    /// Tiles of one level in creation order.
    pub fn level(&self, level: usize) -> impl Iterator<Item = TileId> + '_ {
        self.iter()
            .filter(move |(_, t)| t.level == level)
            .map(|(id, _)| id)
    }

    pub fn leaves(&self) -> impl Iterator<Item = TileId> + '_ {
        self.iter()
            .filter(|(_, t)| t.children.is_empty())
            .map(|(id, _)| id)
    }

    /// Number of levels present.
    pub fn depth(&self) -> usize {
        self.tiles.iter().map(|t| t.level + 1).max().unwrap_or(0)
    }

    /// True if every leaf sits on the deepest level.
    pub fn is_balanced(&self) -> bool {
        let depth = self.depth();
        self.tiles
            .iter()
            .all(|t| !t.children.is_empty() || t.level + 1 == depth)
    }

    /// Sibling indices from the root down, e.g. `"2/0/5"`.
    pub fn path(&self, id: TileId) -> String {
        let mut indices = Vec::new();
        let mut current = Some(id);
        while let Some(tile) = current.and_then(|id| self.get(id)) {
            indices.push(tile.index.to_string());
            current = tile.parent;
        }
        indices.reverse();
        indices.join("/")
    }

    /// Encode the records of one tile.
    pub fn encode_tile(&self, id: TileId) -> Result<EncodedTile> {
        let tile = &self[id];
        encode_tile(&tile.objects, &tile.bound, tile.bits)
    }

    fn push(&mut self, parent: Option<TileId>, level: usize, bits: u8, region: Region) -> TileId {
        let id = TileId(self.tiles.len());
        let siblings = match parent {
            Some(p) => &mut self.tiles[p.0].children,
            None => &mut self.roots,
        };
        let index = siblings.len();
        siblings.push(id);
        self.tiles.push(Tile {
            bound: region.bound,
            bits,
            level,
            parent,
            children: Vec::new(),
            objects: region.objects,
            index,
        });
        id
    }
}

impl Index<TileId> for TileTree {
    type Output = Tile;

    fn index(&self, id: TileId) -> &Tile {
        &self.tiles[id.0]
    }
}

// ============================================================================
// Splitting
// ============================================================================

/// Objects with the bound they are placed in; one tile before it joins a tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub bound: Bound,
    pub objects: ObjectSet,
}

impl Region {
    pub fn new(bound: Bound, objects: ObjectSet) -> Self {
        Self { bound, objects }
    }

    fn single(object: GeoObject) -> Self {
        let bound = object.bound();
        Self::new(bound, std::iter::once(object).collect())
    }
}

/// Decide whether a region violates a limit at `bits` resolution.
///
/// Returns the grid as `(columns, rows)`: one divider per axis when the bound
/// is too large, otherwise `(2, 2)` when a count or size limit is exceeded.
pub fn split_is_needed(
    region: &Region,
    bits: u8,
    limits: &SplitLimits,
) -> Result<Option<(u32, u32)>> {
    let (half_width, half_height) = region.bound.half_size_raw(bits);
    let columns = divider(half_width, limits.max_half_size);
    let rows = divider(half_height, limits.max_half_size);
    if columns > 1 || rows > 1 {
        return Ok(Some((columns, rows)));
    }

    let objects = &region.objects;
    if objects.point_count(false) > limits.max_points || objects.line_count(false) > limits.max_lines
    {
        return Ok(Some((2, 2)));
    }

    let sizes = estimate_sizes(objects, region.bound.center(), bits)?;
    let extended_too_large = [sizes.ext_points, sizes.ext_lines, sizes.ext_areas]
        .iter()
        .any(|&len| len > limits.max_extended_bytes);
    if sizes.total() > limits.max_total_bytes || extended_too_large {
        return Ok(Some((2, 2)));
    }

    Ok(None)
}

fn divider(half: i32, max_half: i32) -> u32 {
    if half <= max_half {
        1
    } else {
        ((half as i64 + max_half as i64 - 1) / max_half as i64) as u32
    }
}

/// Split a region into a `columns` x `rows` grid and keep splitting every
/// resulting region until none needs a split.
///
/// Points go to the cell that contains them. Lines and areas go to the cell
/// that contains the center of their bound; when that cell does not enclose
/// them they get a region of their own with their exact bound. `at` names the
/// parent tile in errors.
///
/// # Errors
///
/// - [`Error::ObjectTooLargeForResolution`] if an object lies partly outside
///   the region being split. [`SubdivisionBuilder`] widens each tile to enclose
///   its objects first, so only direct callers passing such a region see it.
/// - [`Error::SplitDepthExceeded`] if splitting does not converge within
///   `limits.max_depth` nested splits.
pub fn split(
    region: Region,
    bits: u8,
    columns: u32,
    rows: u32,
    limits: &SplitLimits,
    at: &str,
) -> Result<Vec<Region>> {
    split_nested(region, bits, columns, rows, limits, at, 0)
}

fn split_nested(
    region: Region,
    bits: u8,
    columns: u32,
    rows: u32,
    limits: &SplitLimits,
    at: &str,
    depth: usize,
) -> Result<Vec<Region>> {
    if depth >= limits.max_depth {
        return Err(Error::SplitDepthExceeded {
            limit: limits.max_depth,
            at: format!("tile {} at {} bits", at, bits),
        });
    }

    let Region { bound, objects } = region;
    let grid = Grid::new(&bound, bits, columns.max(1), rows.max(1));
    let mut cells: Vec<Region> = grid
        .cells()
        .map(|cell| Region::new(cell, ObjectSet::new()))
        .collect();
    let mut standalone = Vec::new();

    for point in objects.points {
        let cell = grid.cell_of(point.position);
        cells[cell].objects.points.push(point);
    }
    let polys = objects
        .lines
        .into_iter()
        .map(GeoObject::Line)
        .chain(objects.areas.into_iter().map(GeoObject::Area));
    for object in polys {
        let object_bound = object.bound();
        let cell = grid.cell_of(object_bound.center());
        if cells[cell].bound.is_enclosed(&object_bound) {
            cells[cell].objects.push(object);
        } else if bound.is_enclosed(&object_bound) {
            standalone.push(Region::single(object));
        } else {
            return Err(too_large(&object, bits, at));
        }
    }

    debug!(
        "tile {}: split {}x{} at {} bits ({} standalone)",
        at,
        columns,
        rows,
        bits,
        standalone.len()
    );

    let mut regions = Vec::with_capacity(cells.len() + standalone.len());
    for region in cells.into_iter().chain(standalone) {
        match split_is_needed(&region, bits, limits)? {
            None => regions.push(region),
            Some((c, r)) => {
                regions.extend(split_nested(region, bits, c, r, limits, at, depth + 1)?)
            }
        }
    }
    Ok(regions)
}

fn too_large(object: &GeoObject, bits: u8, at: &str) -> Error {
    let ObjectMeta {
        id, object_type, ..
    } = object.meta();
    Error::ObjectTooLargeForResolution {
        kind: object.kind(),
        id: *id,
        object_type: *object_type,
        bits,
        tile_path: at.to_string(),
    }
}

/// Equal cells covering a bound, laid out row by row from the bottom left.
///
/// Cell sizes are whole multiples of two raw units. The last column and row
/// are cut back to the bound.
#[derive(Debug, Clone, Copy)]
struct Grid {
    left: i64,
    bottom: i64,
    right: i64,
    top: i64,
    cell_width: i64,
    cell_height: i64,
    columns: u32,
    rows: u32,
}

impl Grid {
    fn new(bound: &Bound, bits: u8, columns: u32, rows: u32) -> Self {
        let unit = 1i64 << (MAP_UNIT_BITS - clamp_coord_bits(bits));
        Self {
            left: bound.left as i64,
            bottom: bound.bottom as i64,
            right: bound.right as i64,
            top: bound.top as i64,
            cell_width: cell_span(bound.width(), columns, unit),
            cell_height: cell_span(bound.height(), rows, unit),
            columns,
            rows,
        }
    }

    fn cells(&self) -> impl Iterator<Item = Bound> + '_ {
        (0..self.rows).flat_map(move |row| (0..self.columns).map(move |col| self.cell(col, row)))
    }

    fn cell(&self, col: u32, row: u32) -> Bound {
        let left = (self.left + self.cell_width * col as i64).min(self.right);
        let bottom = (self.bottom + self.cell_height * row as i64).min(self.top);
        Bound::new(
            left as i32,
            bottom as i32,
            (left + self.cell_width).min(self.right) as i32,
            (bottom + self.cell_height).min(self.top) as i32,
        )
    }

    fn cell_of(&self, point: MapPoint) -> usize {
        let col = (point.lon as i64 - self.left)
            .div_euclid(self.cell_width)
            .clamp(0, self.columns as i64 - 1);
        let row = (point.lat as i64 - self.bottom)
            .div_euclid(self.cell_height)
            .clamp(0, self.rows as i64 - 1);
        (row * self.columns as i64 + col) as usize
    }
}

/// Cell size covering `extent` in `parts`, rounded up to whole raw unit pairs.
fn cell_span(extent: i32, parts: u32, unit: i64) -> i64 {
    let step = 2 * unit;
    let per_part = (extent as i64 + parts as i64 - 1) / parts as i64;
    ((per_part + step - 1) / step).max(1) * step
}

// ============================================================================
// Object selection
// ============================================================================

/// Select the objects a level draws inside `bound`.
///
/// Points must lie inside the bound, lines and areas must intersect it. Lines
/// and areas larger than the level thresholds are bisected first and only the
/// pieces that still intersect the bound are kept.
pub fn prepare_objects<C>(
    master: &ObjectSet,
    bound: &Bound,
    bits: u8,
    filter: &LevelFilter,
    clipper: &C,
) -> Result<ObjectSet>
where
    C: PolygonClipper + ?Sized,
{
    let mut selected = ObjectSet::new();

    selected.points = master
        .points
        .iter()
        .filter(|p| filter.allows(ObjectKind::Point, p.meta.object_type))
        .filter(|p| bound.is_point_enclosed(p.position))
        .cloned()
        .collect();

    let line_max = line_threshold(bits);
    for line in master
        .lines
        .iter()
        .filter(|l| filter.allows(ObjectKind::Line, l.meta.object_type))
        .filter(|l| bound.intersects(&l.bound()))
    {
        selected.lines.extend(
            split_line(line.clone(), line_max)
                .into_iter()
                .filter(|piece| bound.intersects(&piece.bound())),
        );
    }

    let area_max = area_threshold(bits);
    for area in master
        .areas
        .iter()
        .filter(|a| filter.allows(ObjectKind::Area, a.meta.object_type))
        .filter(|a| bound.intersects(&a.bound()))
    {
        for piece in split_area(area.clone(), area_max, clipper)? {
            if bound.intersects(&piece.bound()) {
                selected.areas.push(piece);
            }
        }
    }

    Ok(selected)
}

// ============================================================================
// Builder
// ============================================================================

/// Builds a [`TileTree`] from a master object set.
pub struct SubdivisionBuilder {
    config: BuildConfig,
    clipper: Box<dyn PolygonClipper>,
}

impl SubdivisionBuilder {
    /// Create a builder that clips areas with [`BooleanClipper`].
    pub fn new(config: BuildConfig) -> Self {
        Self {
            config,
            clipper: Box::new(BooleanClipper),
        }
    }

    pub fn with_clipper<C: PolygonClipper + 'static>(mut self, clipper: C) -> Self {
        self.clipper = Box::new(clipper);
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Build all levels.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] for an invalid configuration, or when no
    ///   bound is configured and `master` is empty.
    /// - Any split, bisection or size estimation error.
    pub fn build(&self, master: &ObjectSet) -> Result<TileTree> {
        self.config.validate()?;
        let bound = self
            .config
            .bound
            .or_else(|| master.bound())
            .ok_or_else(|| {
                Error::InvalidConfig("no bound configured and no objects to derive one".into())
            })?;

        info!(
            "Building {} levels over {} objects ({} points, {} lines, {} areas)",
            self.config.levels.len(),
            master.len(),
            master.points.len(),
            master.lines.len(),
            master.areas.len()
        );

        let mut tree = TileTree::default();
        self.fill_level(&mut tree, master, None, bound, 0)?;

        for (level, spec) in self.config.levels.iter().enumerate() {
            info!(
                "Level {}: {} bits, {} tiles",
                level,
                spec.bits,
                tree.level(level).count()
            );
        }
        Ok(tree)
    }

    fn fill_level(
        &self,
        tree: &mut TileTree,
        master: &ObjectSet,
        parent: Option<TileId>,
        desired: Bound,
        level: usize,
    ) -> Result<()> {
        let spec = &self.config.levels[level];
        let objects = prepare_objects(
            master,
            &desired,
            spec.bits,
            &spec.filter,
            self.clipper.as_ref(),
        )?;

        // Pieces crossing the parent edge widen the working bound so that the
        // undivided tile encloses everything it holds.
        let mut working = desired;
        for b in objects
            .lines
            .iter()
            .map(|l| l.bound())
            .chain(objects.areas.iter().map(|a| a.bound()))
        {
            working.embed(&b);
        }

        let at = match parent {
            Some(id) => tree.path(id),
            None => "root".to_string(),
        };
        let region = Region::new(working, objects);
        let regions = match split_is_needed(&region, spec.bits, &self.config.limits)? {
            None => vec![region],
            Some((columns, rows)) => {
                split(region, spec.bits, columns, rows, &self.config.limits, &at)?
            }
        };
        debug!("tile {}: level {} holds {} tiles", at, level, regions.len());

        let ids: Vec<TileId> = regions
            .into_iter()
            .map(|region| tree.push(parent, level, spec.bits, region))
            .collect();

        if level + 1 < self.config.levels.len() {
            for id in ids {
                let bound = tree[id].bound;
                self.fill_level(tree, master, Some(id), bound, level + 1)?;
            }
        }
        Ok(())
    }
}
