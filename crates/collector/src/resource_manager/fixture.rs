use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::path::PathBuf;

use super::ResourceManager;
use crate::domain::Unit;
use crate::error::{Error, Result};

/// Reads units from a newline-delimited JSON file, one `Unit` per line,
/// and serves `fetch` by filtering on `end_ts` falling in `[start, end)`.
///
/// Intended for local testing and demos, not production use — a real
/// deployment implements [`ResourceManager`] against its own batch system,
/// cloud API, or orchestrator.
pub struct FixtureResourceManager {
    units: Vec<Unit>,
}

impl FixtureResourceManager {
    pub fn new(path: Option<PathBuf>) -> Self {
        let units = match path {
            Some(p) => Self::read_ndjson(&p).unwrap_or_else(|e| {
                tracing::warn!(error = %e, path = %p.display(), "failed to read fixture file, starting empty");
                Vec::new()
            }),
            None => Vec::new(),
        };
        Self { units }
    }

    pub fn with_units(units: Vec<Unit>) -> Self {
        Self { units }
    }

    fn read_ndjson(path: &std::path::Path) -> Result<Vec<Unit>> {
        let contents = std::fs::read_to_string(path)?;
        contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(|e| Error::Upstream(e.to_string())))
            .collect()
    }
}

#[async_trait]
impl ResourceManager for FixtureResourceManager {
    async fn fetch(&self, start: NaiveDateTime, end: NaiveDateTime) -> Result<Vec<Unit>> {
        let start_ms = start.and_utc().timestamp_millis();
        let end_ms = end.and_utc().timestamp_millis();

        Ok(self
            .units
            .iter()
            .filter(|u| u.end_ts >= start_ms && u.end_ts < end_ms)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Unit;
    use chrono::NaiveDate;

    fn unit_with_end(end_ts: i64) -> Unit {
        Unit {
            uuid: format!("u-{end_ts}"),
            end_ts,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn filters_by_end_ts_window() {
        let rm = FixtureResourceManager::with_units(vec![
            unit_with_end(1_000),
            unit_with_end(2_000),
            unit_with_end(3_000),
        ]);
        let start = NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_milli_opt(0, 0, 1, 500)
            .unwrap();
        let end = NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_milli_opt(0, 0, 2, 500)
            .unwrap();
        let fetched = rm.fetch(start, end).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].end_ts, 2_000);
    }

    #[tokio::test]
    async fn empty_fixture_returns_empty() {
        let rm = FixtureResourceManager::new(None);
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert!(rm.fetch(start, end).await.unwrap().is_empty());
    }
}
