//! The metrics-store port: the abstract collaborator the enricher queries
//! for per-unit averages/totals, and later tells to forget ignored units'
//! series.
//!
//! The one adapter shipped here targets a Prometheus-compatible HTTP API
//! (instant query + admin series-delete), matching the shape
//! `basilica-api` uses for its own external HTTP collaborators.

mod prometheus;

pub use prometheus::PrometheusMetricsStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::Result;

#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// False disables enrichment entirely; checked once per collection pass.
    fn is_available(&self) -> bool;

    async fn ping(&self) -> Result<()>;

    /// Evaluate `expr` at instant `at`, keyed by the unit-identifying label
    /// in the result (conventionally `uuid`).
    async fn query(&self, expr: &str, at: DateTime<Utc>) -> Result<HashMap<String, f64>>;

    /// Delete all series matching `matcher` in `[start, end]`. Callers must
    /// not invoke this with a matcher that could be empty/unbounded.
    async fn delete(&self, start: DateTime<Utc>, end: DateTime<Utc>, matcher: &str) -> Result<()>;

    fn scrape_interval(&self) -> Duration;
    fn rate_interval(&self) -> Duration;
}

/// A port that was never configured (`tsdb.web_url` absent). Enrichment is
/// skipped entirely; this keeps the collector pipeline's happy path free
/// of `Option<Box<dyn MetricsStore>>` checks scattered through the code.
pub struct NullMetricsStore;

#[async_trait]
impl MetricsStore for NullMetricsStore {
    fn is_available(&self) -> bool {
        false
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn query(&self, _expr: &str, _at: DateTime<Utc>) -> Result<HashMap<String, f64>> {
        Ok(HashMap::new())
    }

    async fn delete(&self, _start: DateTime<Utc>, _end: DateTime<Utc>, _matcher: &str) -> Result<()> {
        Ok(())
    }

    fn scrape_interval(&self) -> Duration {
        Duration::from_secs(15)
    }

    fn rate_interval(&self) -> Duration {
        Duration::from_secs(60)
    }
}
