//! The collector: computes the time window for each tick and either runs
//! the pipeline once or, after a restart with a stale watermark, replays
//! it in 24h increments until caught up.
//!
//! The tick/cancellation shape is grounded on the teacher's periodic
//! monitoring loop (`tokio::select!` over an `interval` and a
//! `CancellationToken`).

use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::enrich;
use crate::error::Result;
use crate::metrics_store::MetricsStore;
use crate::resource_manager::ResourceManager;
use crate::store::Store;
use crate::watermark::Watermark;
use crate::writer;

const CATCHUP_STEP: ChronoDuration = ChronoDuration::hours(24);
const CATCHUP_SLEEP: Duration = Duration::from_secs(1);

pub struct Collector {
    store: Store,
    resource_manager: Arc<dyn ResourceManager>,
    metrics_store: Arc<dyn MetricsStore>,
    watermark: Watermark,
    retention: Option<chrono::Duration>,
    cutoff_secs: i64,
    cutoff_duration: Duration,
    skip_retention: bool,
}

impl Collector {
    pub fn new(
        store: Store,
        resource_manager: Arc<dyn ResourceManager>,
        metrics_store: Arc<dyn MetricsStore>,
        watermark: Watermark,
        retention: Option<chrono::Duration>,
        cutoff_secs: i64,
        cutoff_duration: Duration,
        skip_retention: bool,
    ) -> Self {
        Self {
            store,
            resource_manager,
            metrics_store,
            watermark,
            retention,
            cutoff_secs,
            cutoff_duration,
            skip_retention,
        }
    }

    /// Run one collection pass: single-shot if caught up, incremental
    /// 24h-step catch-up otherwise. Advances the watermark only as each
    /// step commits successfully.
    pub async fn collect(&self, update_from: &str) -> Result<()> {
        let mut window_start = self.watermark.load_or_init(update_from);
        let now = Utc::now().naive_utc();

        if now - window_start < CATCHUP_STEP {
            self.run_step(window_start, now).await?;
            return Ok(());
        }

        loop {
            let window_end = (window_start + CATCHUP_STEP).min(now);
            self.run_step(window_start, window_end).await?;
            window_start = window_end;

            if window_start >= now {
                break;
            }

            tokio::time::sleep(CATCHUP_SLEEP).await;
        }

        Ok(())
    }

    async fn run_step(&self, start: NaiveDateTime, end: NaiveDateTime) -> Result<()> {
        let mut units = self.resource_manager.fetch(start, end).await?;
        metrics::counter!("unitledger_units_fetched_total").increment(units.len() as u64);

        let end_utc = chrono::DateTime::<Utc>::from_naive_utc_and_offset(end, Utc);
        enrich::enrich(&self.metrics_store, &mut units, end_utc, self.cutoff_secs).await;

        let retention_cutoff = self.retention.map(|r| end - r);
        let ignored = writer::write_batch(
            self.store.pool(),
            &units,
            retention_cutoff,
            self.skip_retention,
        )
        .await?;
        metrics::counter!("unitledger_units_ignored_total").increment(ignored.len() as u64);

        self.watermark.persist(end)?;

        enrich::reconcile_short_units(&self.metrics_store, &ignored, end_utc, self.cutoff_duration)
            .await;

        Ok(())
    }

    /// Tick forever on `interval` until `token` is cancelled. The first
    /// iteration runs immediately, matching the monitoring loop's
    /// no-wait-for-first-tick behavior.
    pub async fn run(self: Arc<Self>, interval: Duration, update_from: String, token: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("collector loop cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    match self.collect(&update_from).await {
                        Ok(()) => metrics::counter!("unitledger_collection_passes_total", "result" => "ok").increment(1),
                        Err(e) => {
                            metrics::counter!("unitledger_collection_passes_total", "result" => "error").increment(1);
                            tracing::error!(error = %e, "collection pass failed, watermark not advanced past last successful step");
                        }
                    }
                }
            }
        }
    }
}

/// Shared run-lock so `collect-now` (CLI) and the background ticker never
/// run the writer transaction concurrently against the same store.
pub type CollectorHandle = Arc<Mutex<Arc<Collector>>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Unit;
    use crate::metrics_store::NullMetricsStore;
    use crate::resource_manager::FixtureResourceManager;
    use crate::store::Store;

    async fn fresh_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.db"), 4).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn empty_fetch_with_no_prior_watermark_advances_cleanly() {
        let (store, dir) = fresh_store().await;
        let rm: Arc<dyn ResourceManager> = Arc::new(FixtureResourceManager::with_units(vec![]));
        let ms: Arc<dyn MetricsStore> = Arc::new(NullMetricsStore);
        let watermark = Watermark::new(dir.path());
        // Keep the window under 24h so `collect` takes the single-shot path
        // rather than the incremental catch-up loop.
        let recent = Utc::now().naive_utc() - chrono::Duration::hours(1);
        watermark.persist(recent).unwrap();

        let collector = Collector::new(store.clone(), rm, ms, watermark, None, 300, Duration::from_secs(60), true);
        collector.collect("2024-01-01").await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM units")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert!(dir.path().join("lastupdatetime").exists());
    }

    #[tokio::test]
    async fn short_unit_is_ignored_other_is_not() {
        let (store, dir) = fresh_store().await;
        let now = Utc::now().naive_utc();
        let short = Unit {
            uuid: "short".into(),
            project: "p".into(),
            usr: "alice".into(),
            start: "2024-01-01T00:00:00".into(),
            end: now.format("%Y-%m-%dT%H:%M:%S").to_string(),
            end_ts: now.and_utc().timestamp_millis(),
            elapsed_raw: 10,
            ..Default::default()
        };
        let long = Unit {
            uuid: "long".into(),
            project: "p".into(),
            usr: "alice".into(),
            start: "2024-01-01T01:00:00".into(),
            end: now.format("%Y-%m-%dT%H:%M:%S").to_string(),
            end_ts: now.and_utc().timestamp_millis(),
            elapsed_raw: 7200,
            ..Default::default()
        };

        let rm: Arc<dyn ResourceManager> = Arc::new(FixtureResourceManager::with_units(vec![short, long]));
        let ms: Arc<dyn MetricsStore> = Arc::new(NullMetricsStore);
        let watermark = Watermark::new(dir.path());
        watermark.persist(now - chrono::Duration::hours(3)).unwrap();

        let collector = Collector::new(store.clone(), rm, ms, watermark, None, 300, Duration::from_secs(60), true);
        collector.collect("2023-01-01").await.unwrap();

        let ignored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM units WHERE ignore = 1")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(ignored, 1);
    }

    #[tokio::test]
    async fn incremental_catchup_steps_in_24h_increments() {
        let (store, dir) = fresh_store().await;
        let now = Utc::now().naive_utc();
        let three_days_ago = now - ChronoDuration::days(3);

        let mut units = Vec::new();
        for day in 0..3 {
            let end = three_days_ago + ChronoDuration::hours(day * 24 + 12);
            units.push(Unit {
                uuid: format!("u{day}"),
                project: "p".into(),
                usr: "alice".into(),
                start: end.format("%Y-%m-%dT%H:%M:%S").to_string(),
                end: end.format("%Y-%m-%dT%H:%M:%S").to_string(),
                end_ts: end.and_utc().timestamp_millis(),
                elapsed_raw: 7200,
                ..Default::default()
            });
        }

        let rm: Arc<dyn ResourceManager> = Arc::new(FixtureResourceManager::with_units(units));
        let ms: Arc<dyn MetricsStore> = Arc::new(NullMetricsStore);
        let watermark = Watermark::new(dir.path());
        watermark.persist(three_days_ago).unwrap();

        let collector = Collector::new(store.clone(), rm, ms, watermark, None, 300, Duration::from_secs(60), true);
        collector.collect("2023-01-01").await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM units")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 3);

        let persisted = std::fs::read_to_string(dir.path().join("lastupdatetime")).unwrap();
        let persisted_ts = NaiveDateTime::parse_from_str(&persisted, "%Y-%m-%dT%H:%M:%S").unwrap();
        assert!((now - persisted_ts).num_seconds().abs() < 2);
    }
}
