use clap::{Parser, Subcommand};

const DEFAULT_DATA_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data");

#[derive(Parser, Debug)]
#[command(name = "hospitrack")]
#[command(about = "ER finder backend (DuckDB cache + ranking API)", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build the Parquet facility cache from the transformed ER CSV.
    Build(BuildArgs),
    /// Serve the HTTP API (requires a completed build).
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct BuildArgs {
    /// Backend data directory (source CSV, GeoNames centroids, Parquet cache).
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: String,

    /// Path to the transformed ER CSV (defaults to <data-dir>/source/us_er_transformed.csv).
    #[arg(long)]
    pub source_csv: Option<String>,

    /// Download the source CSV from this URL when it is missing locally.
    #[arg(long)]
    pub source_url: Option<String>,

    /// Do not download missing inputs; error instead.
    #[arg(long)]
    pub offline: bool,

    /// Re-download inputs even if they already exist.
    #[arg(long)]
    pub force_download: bool,

    /// Use an already-downloaded ZIP centroid file (GeoNames tab-separated format).
    #[arg(long)]
    pub zip_centroids_file: Option<String>,

    /// Rebuild the Parquet cache even if it already exists.
    #[arg(long)]
    pub rebuild: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Backend data directory (Parquet cache and meta.json).
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: String,

    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, default_value_t = 8787)]
    pub port: u16,
}
