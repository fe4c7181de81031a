//! Command-line tools for tile streaming.
//!
//! Inspects quadkeys and LOD tables, and fills the disk cache for an area
//! ahead of time so a viewer can start without waiting on the network.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tilestream::{CacheOutcome, Config, DiskCache, HttpNetwork, fetch_to_cache};
use tilestream_index::{GeoCoordinate, LodRangeTable, MAX_LEVEL_OF_DETAIL, QuadKey};

#[derive(Parser, Debug)]
#[command(name = "tilestream", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the tile containing a coordinate and its relatives.
    Quadkey {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        #[arg(long, default_value_t = 14)]
        lod: u8,
    },
    /// Print the LOD table for a globe, or resolve one distance.
    Lod {
        /// Globe radius in scene units.
        #[arg(long, default_value_t = 6371.0)]
        radius: f64,
        #[arg(long, default_value_t = 1)]
        min_lod: u8,
        #[arg(long, default_value_t = MAX_LEVEL_OF_DETAIL)]
        max_lod: u8,
        /// Distance from the globe centre to resolve.
        #[arg(long)]
        distance: Option<f64>,
    },
    /// Download the 3x3 block of tiles around a coordinate into the cache.
    Prefetch {
        /// JSON configuration file.
        #[arg(long)]
        config: PathBuf,
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        #[arg(long, default_value_t = 14)]
        lod: u8,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Quadkey { lat, lon, lod } => show_quadkey(GeoCoordinate::new(lat, lon), lod),
        Command::Lod {
            radius,
            min_lod,
            max_lod,
            distance,
        } => show_lod_table(radius, min_lod, max_lod, distance),
        Command::Prefetch {
            config,
            lat,
            lon,
            lod,
        } => prefetch(config, GeoCoordinate::new(lat, lon), lod).await,
    }
}

fn show_quadkey(coordinate: GeoCoordinate, lod: u8) -> Result<()> {
    let quadkey = QuadKey::from_coordinate(coordinate, lod)?;
    let bbox = quadkey.bounding_box();

    println!("quadkey:   {quadkey}");
    println!("tile:      {}, {}", quadkey.tile_x(), quadkey.tile_y());
    println!(
        "bounds:    {:.6},{:.6} .. {:.6},{:.6}",
        bbox.min.latitude, bbox.min.longitude, bbox.max.latitude, bbox.max.longitude
    );
    if let Some(parent) = quadkey.parent() {
        println!("parent:    {parent}");
    }
    let children: Vec<String> = quadkey.children().iter().map(ToString::to_string).collect();
    if !children.is_empty() {
        println!("children:  {}", children.join(" "));
    }
    let neighbors: Vec<String> = quadkey
        .neighbors()
        .iter()
        .map(ToString::to_string)
        .collect();
    println!("neighbors: {}", neighbors.join(" "));
    Ok(())
}

fn show_lod_table(radius: f64, min_lod: u8, max_lod: u8, distance: Option<f64>) -> Result<()> {
    let table = LodRangeTable::spherical(min_lod..=max_lod, radius)?;

    if let Some(distance) = distance {
        println!("{}", table.lookup(distance)?);
        return Ok(());
    }

    for interval in table.intervals() {
        println!(
            "{:>2}  [{:.3}, {:.3})",
            interval.level_of_detail, interval.start, interval.end
        );
    }
    Ok(())
}

async fn prefetch(config_path: PathBuf, coordinate: GeoCoordinate, lod: u8) -> Result<()> {
    let config = Config::from_path(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let cache = DiskCache::from_config(&config);
    let network = HttpNetwork::new()?;

    let center = QuadKey::from_coordinate(coordinate, lod)?;
    let mut downloaded = 0;
    let mut cached = 0;
    for quadkey in center.neighbors() {
        match fetch_to_cache(&config, &cache, &network, quadkey)
            .await
            .with_context(|| format!("failed to fetch {quadkey}"))?
        {
            CacheOutcome::Downloaded => downloaded += 1,
            CacheOutcome::Hit => cached += 1,
        }
    }

    tracing::info!(
        root = %cache.root().display(),
        downloaded,
        cached,
        "prefetch finished"
    );
    Ok(())
}
