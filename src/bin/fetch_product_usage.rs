// Fetch product usage from the API for a date range and write one NDJSON
// batch per date, to Azure blob when BLOB_CONN_STR is set, otherwise to the
// local output dir.
//
// Usage:
//   fetch_product_usage --start 2025-11-23 --end 2025-11-23
//   fetch_product_usage --start 2025-11-23 --end 2025-11-23 --mock

use std::error::Error;
use std::path::Path;

use clap::Parser;
use jiff::civil::Date;
use jiff::ToSpan;
use log::info;
use usage_etl::api::usage;
use usage_etl::config::Settings;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// First date of the range, e.g. 2025-11-23
    #[arg(long)]
    start: Date,
    /// Last date of the range, inclusive
    #[arg(long)]
    end: Date,
    /// Use the local sample JSON instead of calling the API
    #[arg(long)]
    mock: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();
    dotenvy::dotenv().ok();

    let settings = Settings::from_env();
    let api = settings.usage_api();
    let sink = settings.sink()?;

    for date in args.start.series(1.day()) {
        if date > args.end {
            break;
        }
        let records = if args.mock {
            usage::fetch_day_mock(date, Path::new(&settings.sample_path))?
        } else {
            api.fetch_day(date).await?
        };
        let dest = sink.write_day(date, &records).await?;
        info!("Wrote {} records to {}", records.len(), dest);
    }

    Ok(())
}
