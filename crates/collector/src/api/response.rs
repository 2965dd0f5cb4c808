//! Shared request-parsing helpers for the HTTP handlers: time-window
//! parsing/defaulting and validation against `web.max_query_period`.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

use crate::error::{Error, Result};

/// Raw query parameters every units/usage endpoint accepts for the time
/// window plus unit-level filters.
#[derive(Debug, Deserialize, Default)]
pub struct TimeWindowParams {
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub jobuuid: Option<String>,
    pub jobid: Option<String>,
}

pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindowParams {
    /// Resolve `from`/`to`, defaulting to `[now - 2h, now]`, and reject
    /// windows wider than `max_query_period` unless a specific job is
    /// being looked up by id/uuid (in which case the window check is
    /// waived).
    pub fn resolve(&self, max_query_period: Duration) -> Result<TimeWindow> {
        let now = Utc::now();
        let to = self
            .to
            .and_then(DateTime::from_timestamp)
            .unwrap_or(now);
        let from = self
            .from
            .and_then(DateTime::from_timestamp)
            .unwrap_or_else(|| to - chrono::Duration::hours(2));

        if from > to {
            return Err(Error::BadData("from must not be after to".to_string()));
        }

        let waived = self.jobuuid.is_some() || self.jobid.is_some();
        if !waived {
            let span = (to - from)
                .to_std()
                .map_err(|_| Error::BadData("invalid time window".to_string()))?;
            if span > max_query_period {
                return Err(Error::BadData(
                    "maximum query window exceeded".to_string(),
                ));
            }
        }

        Ok(TimeWindow { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_last_two_hours() {
        let params = TimeWindowParams::default();
        let window = params.resolve(Duration::from_secs(3600)).unwrap();
        let span = window.to - window.from;
        assert!((span - chrono::Duration::hours(2)).num_seconds().abs() < 2);
    }

    #[test]
    fn rejects_window_wider_than_max() {
        let now = Utc::now().timestamp();
        let params = TimeWindowParams {
            from: Some(now - 10 * 3600),
            to: Some(now),
            jobuuid: None,
            jobid: None,
        };
        let err = params.resolve(Duration::from_secs(3600)).unwrap_err();
        assert_eq!(err.error_type(), "bad_data");
    }

    #[test]
    fn jobuuid_waives_window_check() {
        let now = Utc::now().timestamp();
        let params = TimeWindowParams {
            from: Some(now - 10 * 3600),
            to: Some(now),
            jobuuid: Some("abc".to_string()),
            jobid: None,
        };
        assert!(params.resolve(Duration::from_secs(3600)).is_ok());
    }
}
