// Staging table for raw product usage records.  The loader reads the NDJSON
// batches the fetcher wrote and inserts them into stg.product_usage, one
// transaction per file.

use duckdb::{params, Connection};
use jiff::civil::Date;
use jiff::Timestamp;
use log::info;
use serde_json::Value;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use crate::api::usage::UsageRecord;

/// One staged row: the normalized record plus capture-time provenance.
/// Immutable once inserted.
#[derive(Debug)]
pub struct StagingRow {
    pub record: UsageRecord,
    pub src_ingested_at: Timestamp,
    pub src_file_name: String,
    /// The original NDJSON line, kept verbatim in the raw column.
    pub raw_json: String,
}

impl StagingRow {
    fn company_id_sql(&self) -> Option<String> {
        match &self.record.company_id {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

pub struct ProductUsageArchive {
    pub duckdb_path: String,
}

#[derive(Debug, PartialEq)]
pub struct Row {
    pub company_id: Option<String>,
    pub date: Date,
    pub active_users: i64,
    pub events: i64,
    pub src_file_name: String,
}

impl ProductUsageArchive {
    /// Create the staging schema and table if they don't exist.
    pub fn setup(&self) -> Result<(), Box<dyn Error>> {
        if let Some(dir) = Path::new(&self.duckdb_path).parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let conn = Connection::open(&self.duckdb_path)?;
        conn.execute_batch(
            r"
    BEGIN;
    CREATE SCHEMA IF NOT EXISTS stg;
    CREATE TABLE IF NOT EXISTS stg.product_usage (
        company_id VARCHAR,
        date DATE NOT NULL,
        active_users BIGINT NOT NULL,
        events BIGINT NOT NULL,
        src_ingested_at TIMESTAMPTZ NOT NULL,
        src_file_name VARCHAR NOT NULL,
        raw_json JSON,
    );
    COMMENT ON TABLE stg.product_usage IS 'Raw product usage records pending further processing';
    COMMIT;
        ",
        )?;
        Ok(())
    }

    /// Insert every line of one NDJSON file inside a single transaction.
    /// A malformed line fails the whole file; nothing is committed for it.
    /// Returns the number of rows inserted.
    pub fn load_file(&self, conn: &mut Connection, path: &Path) -> Result<usize, Box<dyn Error>> {
        let file_name = match path.file_name() {
            Some(name) => name.to_string_lossy().to_string(),
            None => return Err(Box::from(format!("not a file: {}", path.display()))),
        };
        let text = fs::read_to_string(path)?;
        let ingested_at = Timestamp::now();

        let mut rows: Vec<StagingRow> = Vec::new();
        for line in text.lines() {
            let record: UsageRecord = serde_json::from_str(line)?;
            rows.push(StagingRow {
                record,
                src_ingested_at: ingested_at,
                src_file_name: file_name.clone(),
                raw_json: line.to_string(),
            });
        }
        if rows.is_empty() {
            return Ok(0);
        }

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r"
    INSERT INTO stg.product_usage
        (company_id, date, active_users, events, src_ingested_at, src_file_name, raw_json)
    VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
            )?;
            for row in &rows {
                stmt.execute(params![
                    row.company_id_sql(),
                    row.record.date.to_string(),
                    row.record.active_users,
                    row.record.events,
                    row.src_ingested_at.to_string(),
                    row.src_file_name,
                    row.raw_json,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Load every *.ndjson file from the directory over one connection.
    /// Returns the total row count across files.
    pub fn load_dir(&self, dir: &Path) -> Result<usize, Box<dyn Error>> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "ndjson"))
            .collect();
        files.sort();

        let mut conn = Connection::open(&self.duckdb_path)?;
        let mut total = 0;
        for file in &files {
            let n = self.load_file(&mut conn, file)?;
            if n > 0 {
                info!(
                    "Inserted {} rows from {}",
                    n,
                    file.file_name().unwrap_or_default().to_string_lossy()
                );
            }
            total += n;
        }
        Ok(total)
    }

    /// Read staged rows back for a date window, both ends inclusive.
    pub fn get_data(
        &self,
        conn: &Connection,
        start_date: Date,
        end_date: Date,
    ) -> Result<Vec<Row>, Box<dyn Error>> {
        let query = format!(
            r#"
    SELECT company_id, date::VARCHAR, active_users, events, src_file_name
    FROM stg.product_usage
    WHERE date >= '{}'
    AND date <= '{}'
    ORDER BY date, company_id, src_file_name;
        "#,
            start_date, end_date
        );
        let mut stmt = conn.prepare(&query)?;
        let row_iter = stmt.query_map([], |row| {
            let date: String = row.get(1)?;
            Ok(Row {
                company_id: row.get(0)?,
                date: date.parse().unwrap_or_default(),
                active_users: row.get(2)?,
                events: row.get(3)?,
                src_file_name: row.get(4)?,
            })
        })?;
        let rows = row_iter.collect::<Result<Vec<Row>, _>>()?;
        Ok(rows)
    }
}
