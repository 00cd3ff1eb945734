use anyhow::Result;
use banyan::config::RunConfig;
use banyan::crs::Crs;
use banyan::observations::{read_observations_path, write_results_path};
use banyan::pipeline;
use banyan::road_sources::{read_geojson_path, read_osm_pbf};
use banyan::stats::write_statistics_path;
use clap::Parser;
use std::path::PathBuf;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// CSV of point observations with longitude/latitude columns
    #[arg(long, env = "OBSERVATIONS_CSV", default_value = "elephants.csv")]
    observations: PathBuf,

    /// Road extract: an OSM .pbf file, or .geojson / .json line features
    #[arg(long, env = "ROADS_PATH", default_value = "nepal-210101.osm.pbf")]
    roads: PathBuf,

    /// Optional JSON or RON run configuration
    #[arg(long, env = "PROXIMITY_CONFIG")]
    config: Option<PathBuf>,

    /// Override the working projected CRS, e.g. EPSG:32644
    #[arg(long, env = "TARGET_CRS")]
    target_crs: Option<Crs>,

    /// Where the joined table is written
    #[arg(
        long,
        env = "OUTPUT_CSV",
        default_value = "output/elephants_with_distances.csv"
    )]
    output_csv: PathBuf,

    /// Where per-subset statistics are written as JSON
    #[arg(long, env = "OUTPUT_STATS", default_value = "output/distance_stats.json")]
    output_stats: PathBuf,

    /// Resolve subsets one after another instead of on the thread pool
    #[arg(long)]
    sequential: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    if let Some(crs) = args.target_crs {
        config.target_crs = crs;
    }
    if args.sequential {
        config.parallel = false;
    }
    config.validate()?;

    println!(
        "Working CRS {}, {} road subsets",
        config.target_crs,
        config.categories.0.len()
    );

    let observations = read_observations_path(
        &args.observations,
        &config.longitude_column,
        &config.latitude_column,
    )?;

    let roads = match args.roads.extension().and_then(|e| e.to_str()) {
        Some("geojson") | Some("json") => {
            read_geojson_path(&args.roads, &config.tag_key, config.source_crs)?
        }
        _ => read_osm_pbf(&args.roads, &config.tag_key)?,
    };
    println!("Loaded {} highways", roads.lines.len());

    let output = pipeline::run(&observations, &roads, &config)?;

    write_results_path(&args.output_csv, &output.table)?;
    println!("\nSaved to: {}", args.output_csv.display());

    write_statistics_path(&args.output_stats, &output.statistics)?;
    println!("Statistics saved to {}", args.output_stats.display());

    println!("\n{}", output.drops);

    for stats in &output.statistics {
        println!("\n{}", stats);
    }

    Ok(())
}
