// Client for the product usage API.  Pages through one day of records at a
// time and normalizes each item into the shape the staging table expects.

use jiff::civil::Date;
use log::info;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// One normalized usage record.  Whatever day the source item claims,
/// `date` is always the day the fetch ran for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub company_id: Value,
    pub date: Date,
    pub active_users: i64,
    pub events: i64,
    pub raw_ts: Value,
}

impl UsageRecord {
    /// Normalize one API/sample item.  Missing or null counts become 0;
    /// the source timestamp is passed through untouched.
    pub fn from_item(item: &Value, date: Date) -> UsageRecord {
        UsageRecord {
            company_id: item.get("company_id").cloned().unwrap_or(Value::Null),
            date,
            active_users: as_count(item.get("active_users")),
            events: as_count(item.get("events")),
            raw_ts: item.get("ts").cloned().unwrap_or(Value::Null),
        }
    }
}

/// Coerce a JSON value to a count.  Numbers are truncated to i64, numeric
/// strings are parsed, everything else (null, absent, garbage) is 0.
fn as_count(v: Option<&Value>) -> i64 {
    match v {
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => i,
            None => n.as_f64().map(|f| f as i64).unwrap_or(0),
        },
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// One page of the API response body.
#[derive(Debug, Deserialize)]
pub struct UsagePage {
    #[serde(default)]
    pub items: Vec<Value>,
    #[serde(default)]
    pub next_page: Value,
}

impl UsagePage {
    /// The server signals the last page with a missing or falsy `next_page`
    /// (null, 0, false, empty string).
    pub fn has_next(&self) -> bool {
        match &self.next_page {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }
}

pub struct UsageApi {
    pub url: String,
    pub api_key: Option<String>,
    pub per_page: u32,
    /// Pause between page requests to bound the request rate.
    pub page_delay: Duration,
    client: Client,
}

impl UsageApi {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> UsageApi {
        UsageApi {
            url: url.into(),
            api_key,
            per_page: 1000,
            page_delay: Duration::from_millis(100),
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("failed to build http client"),
        }
    }

    /// Request a single page for the day.  Errors on any non-2xx status,
    /// no retries.
    pub async fn fetch_page(&self, date: Date, page: u32) -> Result<UsagePage, Box<dyn Error>> {
        let mut builder = self
            .client
            .get(&self.url)
            .header(ACCEPT, "application/json")
            .query(&[
                ("date", date.to_string()),
                ("page", page.to_string()),
                ("per_page", self.per_page.to_string()),
            ]);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?.error_for_status()?;
        Ok(response.json::<UsagePage>().await?)
    }

    /// Fetch every page for the day, in request order, starting at page 1.
    /// Stops after the first page without a truthy `next_page`.
    pub async fn fetch_day(&self, date: Date) -> Result<Vec<UsageRecord>, Box<dyn Error>> {
        let mut records: Vec<UsageRecord> = Vec::new();
        let mut page: u32 = 1;
        loop {
            let payload = self.fetch_page(date, page).await?;
            records.extend(payload.items.iter().map(|it| UsageRecord::from_item(it, date)));
            if !payload.has_next() {
                break;
            }
            page += 1;
            tokio::time::sleep(self.page_delay).await;
        }
        info!("fetched {} records for {}", records.len(), date);
        Ok(records)
    }
}

/// Mock mode: read the sample fixture instead of calling the API.  The file
/// holds an `items` list with the same shape as one API page.
pub fn fetch_day_mock(date: Date, sample_path: &Path) -> Result<Vec<UsageRecord>, Box<dyn Error>> {
    let text = fs::read_to_string(sample_path)?;
    let data: Value = serde_json::from_str(&text)?;
    let items = match data.get("items").and_then(|v| v.as_array()) {
        Some(xs) => xs.clone(),
        None => vec![],
    };
    Ok(items.iter().map(|it| UsageRecord::from_item(it, date)).collect())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use jiff::civil::date;
    use serde_json::json;
    use wiremock::matchers::{header, method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn normalize_item() {
        let d = date(2025, 11, 23);
        let item = json!({
            "company_id": "acme",
            "active_users": 42,
            "events": 1305,
            "ts": "2025-11-22T23:59:58Z",
            "date": "2019-01-01"
        });
        let rec = UsageRecord::from_item(&item, d);
        assert_eq!(rec.company_id, json!("acme"));
        // the source item's own date is ignored
        assert_eq!(rec.date, d);
        assert_eq!(rec.active_users, 42);
        assert_eq!(rec.events, 1305);
        assert_eq!(rec.raw_ts, json!("2025-11-22T23:59:58Z"));
    }

    #[test]
    fn normalize_missing_counts() {
        let d = date(2025, 11, 23);
        let rec = UsageRecord::from_item(&json!({"company_id": 17}), d);
        assert_eq!(rec.active_users, 0);
        assert_eq!(rec.events, 0);
        assert_eq!(rec.raw_ts, Value::Null);

        let rec = UsageRecord::from_item(
            &json!({"active_users": null, "events": "87", "ts": 1732320000}),
            d,
        );
        assert_eq!(rec.active_users, 0);
        assert_eq!(rec.events, 87);
        assert_eq!(rec.raw_ts, json!(1732320000));
    }

    #[test]
    fn next_page_truthiness() {
        let page = |v: Value| UsagePage { items: vec![], next_page: v };
        assert!(!page(Value::Null).has_next());
        assert!(!page(json!(0)).has_next());
        assert!(!page(json!(false)).has_next());
        assert!(!page(json!("")).has_next());
        assert!(page(json!(2)).has_next());
        assert!(page(json!("2")).has_next());
    }

    #[tokio::test]
    async fn follows_pages_until_next_page_is_null() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("page", "1"))
            .and(query_param("date", "2025-11-23"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"company_id": "acme", "active_users": 10, "events": 3, "ts": "t1"}],
                "next_page": 2
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"company_id": "globex", "events": 7, "ts": "t2"}],
                "next_page": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut api = UsageApi::new(server.uri(), None);
        api.page_delay = Duration::ZERO;
        let records = api.fetch_day(date(2025, 11, 23)).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.date == date(2025, 11, 23)));
        assert_eq!(records[1].active_users, 0);
        // MockServer verifies the .expect() call counts on drop
    }

    #[tokio::test]
    async fn sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer sekrit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [],
                "next_page": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = UsageApi::new(server.uri(), Some("sekrit".to_string()));
        let records = api.fetch_day(date(2025, 11, 23)).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn non_2xx_aborts_the_day() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let api = UsageApi::new(server.uri(), None);
        assert!(api.fetch_day(date(2025, 11, 23)).await.is_err());
    }

    #[test]
    fn mock_sample_file() {
        let records = fetch_day_mock(
            date(2025, 11, 23),
            Path::new("samples/product_api_sample.json"),
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.date == date(2025, 11, 23)));
        assert_eq!(records[0].company_id, json!("acme"));
        // second sample item has a null active_users on purpose
        assert_eq!(records[1].active_users, 0);
    }
}
