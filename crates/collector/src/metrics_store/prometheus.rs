use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use super::MetricsStore;
use crate::error::{Error, Result};

pub struct PrometheusMetricsStore {
    client: reqwest::Client,
    base_url: String,
    scrape_interval: Duration,
    rate_interval: Duration,
}

impl PrometheusMetricsStore {
    pub fn new(base_url: String, skip_tls_verify: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(skip_tls_verify)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Upstream(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            scrape_interval: Duration::from_secs(15),
            rate_interval: Duration::from_secs(60),
        })
    }
}

#[derive(Debug, Deserialize)]
struct InstantQueryResponse {
    status: String,
    data: InstantQueryData,
}

#[derive(Debug, Deserialize)]
struct InstantQueryData {
    result: Vec<InstantQuerySample>,
}

#[derive(Debug, Deserialize)]
struct InstantQuerySample {
    metric: HashMap<String, String>,
    /// `[timestamp, "value"]` — Prometheus returns the sample value as a string.
    value: (f64, String),
}

#[async_trait]
impl MetricsStore for PrometheusMetricsStore {
    fn is_available(&self) -> bool {
        true
    }

    async fn ping(&self) -> Result<()> {
        let url = format!("{}/-/healthy", self.base_url);
        self.client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::Upstream(e.to_string()))?;
        Ok(())
    }

    async fn query(&self, expr: &str, at: DateTime<Utc>) -> Result<HashMap<String, f64>> {
        let url = format!("{}/api/v1/query", self.base_url);
        let resp: InstantQueryResponse = self
            .client
            .get(&url)
            .query(&[("query", expr), ("time", &at.timestamp().to_string())])
            .send()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;

        if resp.status != "success" {
            return Err(Error::Upstream(format!("query failed: {expr}")));
        }

        let mut out = HashMap::new();
        for sample in resp.data.result {
            let Some(uuid) = sample.metric.get("uuid") else {
                continue;
            };
            if let Ok(value) = sample.value.1.parse::<f64>() {
                out.insert(uuid.clone(), value);
            }
        }
        Ok(out)
    }

    async fn delete(&self, start: DateTime<Utc>, end: DateTime<Utc>, matcher: &str) -> Result<()> {
        let url = format!("{}/api/v1/admin/tsdb/delete_series", self.base_url);
        self.client
            .post(&url)
            .query(&[
                ("match[]", matcher),
                ("start", &start.timestamp().to_string()),
                ("end", &end.timestamp().to_string()),
            ])
            .send()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::Upstream(e.to_string()))?;
        Ok(())
    }

    fn scrape_interval(&self) -> Duration {
        self.scrape_interval
    }

    fn rate_interval(&self) -> Duration {
        self.rate_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn query_keys_result_by_uuid_label() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {
                    "result": [
                        {"metric": {"uuid": "a"}, "value": [1700000000.0, "12.5"]},
                        {"metric": {"uuid": "b"}, "value": [1700000000.0, "7.25"]},
                    ]
                }
            })))
            .mount(&server)
            .await;

        let store = PrometheusMetricsStore::new(server.uri(), false).unwrap();
        let result = store.query("avg_over_time(cpu_usage[1h])", Utc::now()).await.unwrap();

        assert_eq!(result.get("a"), Some(&12.5));
        assert_eq!(result.get("b"), Some(&7.25));
    }

    #[tokio::test]
    async fn query_failure_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "error",
                "data": {"result": []}
            })))
            .mount(&server)
            .await;

        let store = PrometheusMetricsStore::new(server.uri(), false).unwrap();
        assert!(store.query("broken", Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn delete_posts_matcher_and_window() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/admin/tsdb/delete_series"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let store = PrometheusMetricsStore::new(server.uri(), false).unwrap();
        let now = Utc::now();
        store
            .delete(now - chrono::Duration::hours(1), now, "{uuid=~\"a|b\"}")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn is_available_and_interval_defaults() {
        let store = PrometheusMetricsStore::new("http://127.0.0.1:1".to_string(), false).unwrap();
        assert!(store.is_available());
        assert_eq!(store.scrape_interval(), Duration::from_secs(15));
        assert_eq!(store.rate_interval(), Duration::from_secs(60));
    }
}
