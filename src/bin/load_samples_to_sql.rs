// Load NDJSON files from samples_output/ (or another local path) into
// stg.product_usage.
//
// Usage:
//   load_samples_to_sql --source local --path samples_output

use std::error::Error;
use std::path::Path;

use clap::{Parser, ValueEnum};
use log::info;
use usage_etl::config::Settings;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Source {
    // only local directories are supported; blob-based loading is not
    // implemented
    Local,
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Where to read the NDJSON files from
    #[arg(long, value_enum, default_value = "local")]
    source: Source,
    /// Directory holding the *.ndjson files
    #[arg(long, default_value = "samples_output")]
    path: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();
    dotenvy::dotenv().ok();

    // fail before any work when the database path is not configured
    let settings = Settings::from_env();
    let archive = settings.staging_archive()?;

    archive.setup()?;
    let total = archive.load_dir(Path::new(&args.path))?;
    info!("Inserted {} rows total from {}", total, args.path);

    Ok(())
}
