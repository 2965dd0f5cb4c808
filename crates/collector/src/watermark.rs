//! The collection watermark: the end of the last successfully collected
//! window, persisted to a sidecar text file next to the database.

use chrono::{NaiveDate, NaiveDateTime};
use std::path::{Path, PathBuf};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct Watermark {
    path: PathBuf,
}

impl Watermark {
    pub fn new(data_path: &Path) -> Self {
        Self {
            path: data_path.join("lastupdatetime"),
        }
    }

    /// Read the sidecar file; on any read or parse failure, fall back to
    /// `update_from` (parsed as a date at local midnight) and persist that
    /// as the new watermark. Never fails the caller.
    pub fn load_or_init(&self, update_from: &str) -> NaiveDateTime {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => match NaiveDateTime::parse_from_str(contents.trim(), TIMESTAMP_FORMAT)
            {
                Ok(ts) => return ts,
                Err(e) => {
                    tracing::warn!(error = %e, path = %self.path.display(), "failed to parse watermark file, falling back to configured default");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no watermark file, using configured default");
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %self.path.display(), "failed to read watermark file, falling back to configured default");
            }
        }

        let default = NaiveDate::parse_from_str(update_from, DATE_FORMAT)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, update_from, "failed to parse storage.update_from, using unix epoch");
                NaiveDate::from_ymd_opt(1970, 1, 1).expect("valid date")
            })
            .and_hms_opt(0, 0, 0)
            .expect("valid time");

        if let Err(e) = self.persist(default) {
            tracing::warn!(error = %e, "failed to persist initial watermark");
        }

        default
    }

    pub fn persist(&self, at: NaiveDateTime) -> std::io::Result<()> {
        std::fs::write(&self.path, at.format(TIMESTAMP_FORMAT).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_update_from() {
        let dir = tempfile::tempdir().unwrap();
        let wm = Watermark::new(dir.path());
        let ts = wm.load_or_init("2024-03-15");
        assert_eq!(ts.format(TIMESTAMP_FORMAT).to_string(), "2024-03-15T00:00:00");
        assert!(dir.path().join("lastupdatetime").exists());
    }

    #[test]
    fn existing_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let wm = Watermark::new(dir.path());
        std::fs::write(dir.path().join("lastupdatetime"), "2024-06-01T12:30:00").unwrap();
        let ts = wm.load_or_init("2024-01-01");
        assert_eq!(ts.format(TIMESTAMP_FORMAT).to_string(), "2024-06-01T12:30:00");
    }

    #[test]
    fn corrupt_file_falls_back_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let wm = Watermark::new(dir.path());
        std::fs::write(dir.path().join("lastupdatetime"), "not-a-date").unwrap();
        let ts = wm.load_or_init("2024-02-02");
        assert_eq!(ts.format(TIMESTAMP_FORMAT).to_string(), "2024-02-02T00:00:00");
        let persisted = std::fs::read_to_string(dir.path().join("lastupdatetime")).unwrap();
        assert_eq!(persisted, "2024-02-02T00:00:00");
    }

    #[test]
    fn persist_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let wm = Watermark::new(dir.path());
        let at = NaiveDate::from_ymd_opt(2025, 7, 4)
            .unwrap()
            .and_hms_opt(9, 15, 0)
            .unwrap();
        wm.persist(at).unwrap();
        let loaded = wm.load_or_init("2020-01-01");
        assert_eq!(loaded, at);
    }
}
