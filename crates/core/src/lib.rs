//! Core library for building RGN subdivision trees.
//!
//! The crate turns a set of map objects (points, lines, areas in 24-bit map
//! units) into a tree of subdivisions, one tree level per zoom level, where
//! every subdivision respects the hard size and record-count limits of the
//! region format. Lines and areas are stored as variable-bit-width delta
//! streams produced by [`codec`].
//!
//! # Examples
//!
//! ```no_run
//! use rgn_tiles_core::{Bound, BuildConfig, LevelSpec, ObjectSet, SubdivisionBuilder};
//!
//! let master = ObjectSet::new();
//! let config = BuildConfig::default()
//!     .with_levels(vec![LevelSpec::new(18), LevelSpec::new(21), LevelSpec::new(24)])
//!     .with_bound(Bound::from_degrees(9.5, 46.0, 17.5, 49.0));
//!
//! let tree = SubdivisionBuilder::new(config).build(&master).unwrap();
//! for id in tree.level(2) {
//!     let encoded = tree.encode_tile(id).unwrap();
//!     println!("{}: {} bytes", tree.path(id), encoded.sizes().total());
//! }
//! ```

use thiserror::Error;

pub mod bisect;
pub mod bound;
pub mod codec;
pub mod filter;
pub mod object;
pub mod record;
pub mod subdiv;

pub use bisect::{BooleanClipper, PolygonClipper, SutherlandHodgmanClipper};
pub use bound::{Bound, MapPoint, RawPoint};
pub use codec::{Decoded, EncodedStream, SignMode};
pub use filter::{LevelFilter, TypeFilter};
pub use object::{
    AreaObject, GeoObject, LineObject, ObjectKind, ObjectMeta, ObjectSet, ObjectType, PointObject,
};
pub use record::{EncodedTile, PointRecord, PolyRecord, SectionSizes, TileHeader};
pub use subdiv::{
    BuildConfig, LevelSpec, Region, SplitLimits, SubdivisionBuilder, Tile, TileId, TileTree,
};

/// Errors raised while encoding streams or building subdivision trees
#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed bitstream at bit {bit_offset}: {reason}")]
    MalformedStream { bit_offset: usize, reason: String },

    #[error("Coordinate {value} out of range (limit {limit})")]
    CoordinateOutOfRange { value: i64, limit: i64 },

    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("Extra-bit flags do not match points: {flags} flags for {points} points")]
    ExtraBitsMismatch { points: usize, flags: usize },

    #[error(
        "{kind} {id} (type {object_type}) is too large for a subdivision at {bits} bits below tile {tile_path}"
    )]
    ObjectTooLargeForResolution {
        kind: ObjectKind,
        id: u64,
        object_type: ObjectType,
        bits: u8,
        tile_path: String,
    },

    #[error("Split depth limit {limit} exceeded at {at}")]
    SplitDepthExceeded { limit: usize, at: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
