// NDJSON batch sink.  Each fetched day becomes exactly one object: a local
// file under the output dir, or a blob under a date= partition prefix.

use bytes::Bytes;
use jiff::civil::Date;
use jiff::Timestamp;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::api::usage::UsageRecord;

/// Serialize the day's batch, one JSON object per line.
pub fn to_ndjson(records: &[UsageRecord]) -> Result<String, serde_json::Error> {
    let lines = records
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<String>, _>>()?;
    Ok(lines.join("\n"))
}

pub enum NdjsonSink {
    Local {
        out_dir: PathBuf,
    },
    Blob {
        store: Arc<dyn ObjectStore>,
        container: String,
    },
}

impl NdjsonSink {
    pub fn local(out_dir: impl Into<PathBuf>) -> NdjsonSink {
        NdjsonSink::Local { out_dir: out_dir.into() }
    }

    /// Build an Azure blob sink from a storage connection string.  Only the
    /// `AccountName` and `AccountKey` pairs are consumed.
    pub fn blob(conn_str: &str, container: &str) -> Result<NdjsonSink, Box<dyn Error>> {
        let (account, key) = parse_connection_string(conn_str)?;
        let store = MicrosoftAzureBuilder::new()
            .with_account(account)
            .with_access_key(key)
            .with_container_name(container)
            .build()?;
        Ok(NdjsonSink::Blob {
            store: Arc::new(store),
            container: container.to_string(),
        })
    }

    /// Write the full batch for one date and return the destination written,
    /// for logging.  Local files are `usage_<date>.ndjson` and are replaced
    /// on collision; blob keys carry an epoch suffix and overwrite
    /// unconditionally.
    pub async fn write_day(
        &self,
        date: Date,
        records: &[UsageRecord],
    ) -> Result<String, Box<dyn Error>> {
        let body = to_ndjson(records)?;
        match self {
            NdjsonSink::Local { out_dir } => {
                fs::create_dir_all(out_dir)?;
                let path = out_dir.join(format!("usage_{}.ndjson", date));
                fs::write(&path, body)?;
                Ok(path.display().to_string())
            }
            NdjsonSink::Blob { store, container } => {
                let key = format!(
                    "date={}/usage_{}_{}.ndjson",
                    date,
                    date,
                    Timestamp::now().as_second()
                );
                let location = ObjectPath::from(key.clone());
                store.put(&location, Bytes::from(body).into()).await?;
                Ok(format!("blob://{}/{}", container, key))
            }
        }
    }
}

/// Pull `AccountName` and `AccountKey` out of an Azure storage connection
/// string (`;`-separated `Key=Value` pairs).
fn parse_connection_string(conn_str: &str) -> Result<(String, String), Box<dyn Error>> {
    let mut account: Option<String> = None;
    let mut key: Option<String> = None;
    for pair in conn_str.split(';') {
        if let Some((k, v)) = pair.split_once('=') {
            match k.trim() {
                "AccountName" => account = Some(v.trim().to_string()),
                // the base64 key may itself contain '=' padding
                "AccountKey" => key = Some(v.trim().to_string()),
                _ => {}
            }
        }
    }
    match (account, key) {
        (Some(a), Some(k)) => Ok((a, k)),
        _ => Err(Box::from(
            "BLOB_CONN_STR must contain AccountName and AccountKey",
        )),
    }
}

#[cfg(test)]
mod tests {
    use jiff::civil::date;
    use serde_json::{json, Value};

    use super::*;
    use crate::api::usage::UsageRecord;

    fn sample_records(d: Date) -> Vec<UsageRecord> {
        vec![
            UsageRecord::from_item(
                &json!({"company_id": "acme", "active_users": 42, "events": 1305, "ts": "t1"}),
                d,
            ),
            UsageRecord::from_item(&json!({"company_id": "globex", "events": 87}), d),
        ]
    }

    #[test]
    fn ndjson_one_line_per_record() {
        let d = date(2025, 11, 23);
        let body = to_ndjson(&sample_records(d)).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let v: Value = serde_json::from_str(line).unwrap();
            assert_eq!(v["date"], json!("2025-11-23"));
        }
    }

    #[tokio::test]
    async fn local_write_and_overwrite() {
        let d = date(2025, 11, 23);
        let dir = tempfile::tempdir().unwrap();
        let sink = NdjsonSink::local(dir.path());

        let dest = sink.write_day(d, &sample_records(d)).await.unwrap();
        assert!(dest.ends_with("usage_2025-11-23.ndjson"));
        let text = fs::read_to_string(&dest).unwrap();
        assert_eq!(text.lines().count(), 2);

        // a second run for the same date replaces the file
        let one = sample_records(d)[..1].to_vec();
        sink.write_day(d, &one).await.unwrap();
        let text = fs::read_to_string(&dest).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn connection_string_parsing() {
        let (account, key) = parse_connection_string(
            "DefaultEndpointsProtocol=https;AccountName=prodacct;AccountKey=c2VrcmV0a2V5PT0=;EndpointSuffix=core.windows.net",
        )
        .unwrap();
        assert_eq!(account, "prodacct");
        assert_eq!(key, "c2VrcmV0a2V5PT0=");

        assert!(parse_connection_string("AccountName=prodacct").is_err());
    }
}
