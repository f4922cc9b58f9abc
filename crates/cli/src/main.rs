//! CLI for rgn-tiles - build RGN subdivision trees from GeoJSON
//!
//! This is a thin wrapper around the rgn-tiles-core library.

mod input;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rgn_tiles_core::subdiv::DEFAULT_MAX_SPLIT_DEPTH;
use rgn_tiles_core::{
    Bound, BuildConfig, LevelSpec, ObjectSet, SplitLimits, SubdivisionBuilder, TileTree,
};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "rgn-tiles",
    about = "Build RGN subdivision trees from GeoJSON",
    version
)]
struct Args {
    /// Input GeoJSON file (Feature or FeatureCollection)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Coordinate bits per level, coarsest first
    #[arg(long, value_delimiter = ',', default_value = "18,21,24")]
    bits: Vec<u8>,

    /// Overall bound in degrees: west,south,east,north
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    bounds: Option<Vec<f64>>,

    /// Nesting limit for recursive splits of one tile
    #[arg(long, default_value_t = DEFAULT_MAX_SPLIT_DEPTH)]
    max_depth: usize,

    /// Encode every tile and report section sizes
    #[arg(long)]
    encode: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn parse_bounds(&self) -> Result<Option<Bound>> {
        match self.bounds.as_deref() {
            None => Ok(None),
            Some([west, south, east, north]) => {
                Ok(Some(Bound::from_degrees(*west, *south, *east, *north)))
            }
            Some(other) => bail!("Expected 4 values for --bounds, got {}", other.len()),
        }
    }

    fn build_config(&self) -> Result<BuildConfig> {
        let mut config = BuildConfig::new()
            .with_levels(self.bits.iter().map(|&b| LevelSpec::new(b)).collect())
            .with_limits(SplitLimits::default().with_max_depth(self.max_depth));
        if let Some(bound) = self.parse_bounds().context("Failed to parse bounds")? {
            config = config.with_bound(bound);
        }
        Ok(config)
    }
}

#[derive(Debug, Serialize)]
struct Summary {
    input: String,
    points: usize,
    lines: usize,
    areas: usize,
    levels: Vec<LevelSummary>,
}

#[derive(Debug, Serialize)]
struct LevelSummary {
    level: usize,
    bits: u8,
    tiles: usize,
    points: usize,
    lines: usize,
    areas: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    encoded: Option<EncodedSummary>,
}

#[derive(Debug, Default, Serialize)]
struct EncodedSummary {
    records: usize,
    total_bytes: usize,
    plain_bytes: usize,
    largest_tile_bytes: usize,
}

fn summarize_level(tree: &TileTree, level: usize, bits: u8, encode: bool) -> Result<LevelSummary> {
    let ids: Vec<_> = tree.level(level).collect();
    let mut summary = LevelSummary {
        level,
        bits,
        tiles: ids.len(),
        points: 0,
        lines: 0,
        areas: 0,
        encoded: None,
    };
    for &id in &ids {
        let objects = &tree[id].objects;
        summary.points += objects.points.len();
        summary.lines += objects.lines.len();
        summary.areas += objects.areas.len();
    }

    if encode {
        let mut encoded = EncodedSummary::default();
        for &id in &ids {
            let tile = tree
                .encode_tile(id)
                .with_context(|| format!("Failed to encode tile {}", tree.path(id)))?;
            let total = tile.sizes().total();
            encoded.records += tile.record_count();
            encoded.total_bytes += total;
            encoded.plain_bytes += tile.plain_data_length();
            encoded.largest_tile_bytes = encoded.largest_tile_bytes.max(total);
        }
        summary.encoded = Some(encoded);
    }
    Ok(summary)
}

fn print_summary(summary: &Summary) {
    println!(
        "{}: {} points, {} lines, {} areas",
        summary.input, summary.points, summary.lines, summary.areas
    );
    for level in &summary.levels {
        print!(
            "  level {} ({} bits): {} tiles, {} points, {} lines, {} areas",
            level.level, level.bits, level.tiles, level.points, level.lines, level.areas
        );
        match &level.encoded {
            Some(e) => println!(
                ", {} records in {} bytes (largest tile {} bytes)",
                e.records, e.total_bytes, e.largest_tile_bytes
            ),
            None => println!(),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .init();

    let config = args.build_config()?;
    let master: ObjectSet = input::read_objects(&args.input)
        .with_context(|| format!("Failed to load {}", args.input.display()))?;
    log::info!("Loaded {} objects from {}", master.len(), args.input.display());

    let tree = SubdivisionBuilder::new(config.clone())
        .build(&master)
        .context("Failed to build subdivision tree")?;

    let levels = config
        .levels
        .iter()
        .enumerate()
        .map(|(level, spec)| summarize_level(&tree, level, spec.bits, args.encode))
        .collect::<Result<Vec<_>>>()?;

    let summary = Summary {
        input: args.input.display().to_string(),
        points: master.points.len(),
        lines: master.lines.len(),
        areas: master.areas.len(),
        levels,
    };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?
        );
    } else {
        print_summary(&summary);
        println!("✓ Built {} tiles over {} levels", tree.len(), tree.depth());
    }

    Ok(())
}
