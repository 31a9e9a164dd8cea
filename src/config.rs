// Environment-derived settings, read once up front and handed to the
// components explicitly.  `.env` files are loaded by the bins via dotenvy
// before this is constructed.

use std::env;
use std::error::Error;

use crate::api::usage::UsageApi;
use crate::db::product_usage::ProductUsageArchive;
use crate::sink::NdjsonSink;

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_url: String,
    pub api_key: Option<String>,
    /// Azure storage connection string; when unset the fetcher writes to
    /// the local output dir instead.
    pub blob_conn_str: Option<String>,
    pub blob_container: String,
    pub duckdb_path: Option<String>,
    pub out_dir: String,
    pub sample_path: String,
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

impl Settings {
    pub fn from_env() -> Settings {
        Settings {
            api_url: non_empty("API_URL")
                .unwrap_or_else(|| "http://localhost:4000/usage".to_string()),
            api_key: non_empty("API_KEY"),
            blob_conn_str: non_empty("BLOB_CONN_STR"),
            blob_container: non_empty("BLOB_CONTAINER")
                .unwrap_or_else(|| "product-api-raw".to_string()),
            duckdb_path: non_empty("DUCKDB_PATH"),
            out_dir: non_empty("OUT_DIR").unwrap_or_else(|| "samples_output".to_string()),
            sample_path: non_empty("SAMPLE_PATH")
                .unwrap_or_else(|| "samples/product_api_sample.json".to_string()),
        }
    }

    pub fn usage_api(&self) -> UsageApi {
        UsageApi::new(self.api_url.clone(), self.api_key.clone())
    }

    /// Blob sink when a connection string is configured, local otherwise.
    pub fn sink(&self) -> Result<NdjsonSink, Box<dyn Error>> {
        match &self.blob_conn_str {
            Some(conn_str) => NdjsonSink::blob(conn_str, &self.blob_container),
            None => Ok(NdjsonSink::local(&self.out_dir)),
        }
    }

    /// The loader refuses to start without a database path.
    pub fn staging_archive(&self) -> Result<ProductUsageArchive, Box<dyn Error>> {
        match &self.duckdb_path {
            Some(path) => Ok(ProductUsageArchive {
                duckdb_path: path.clone(),
            }),
            None => Err(Box::from(
                "DUCKDB_PATH missing in env. Fill .env or set env var.",
            )),
        }
    }
}
