//! The enricher: fills each unit's average/total metric fields from the
//! metrics store, then reconciles short-lived units out of it.
//!
//! Grounded on the concurrent fan-out/merge shape used for periodic
//! collaborator polling, and on the upsert-target field list the writer
//! (`writer.rs`) ultimately persists.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::domain::Unit;
use crate::metrics_store::MetricsStore;

/// One aggregate query: a PromQL-shaped expression template taking
/// `(uuid_regex, rate_interval, max_duration, scrape_interval,
/// scrape_interval_ms)` and a setter writing the per-uuid result back onto
/// a `Unit`.
struct MetricQuery {
    name: &'static str,
    template: &'static str,
    set: fn(&mut Unit, f64),
}

const QUERIES: &[MetricQuery] = &[
    MetricQuery {
        name: "avg_cpu_usage",
        template: "avg_over_time(cpu_usage{{uuid=~\"{uuid}\"}}[{max_duration}])",
        set: |u, v| u.avg_cpu_usage = v,
    },
    MetricQuery {
        name: "avg_cpu_mem_usage",
        template: "avg_over_time(cpu_mem_usage{{uuid=~\"{uuid}\"}}[{max_duration}])",
        set: |u, v| u.avg_cpu_mem_usage = v,
    },
    MetricQuery {
        name: "avg_gpu_usage",
        template: "avg_over_time(gpu_usage{{uuid=~\"{uuid}\"}}[{max_duration}])",
        set: |u, v| u.avg_gpu_usage = v,
    },
    MetricQuery {
        name: "avg_gpu_mem_usage",
        template: "avg_over_time(gpu_mem_usage{{uuid=~\"{uuid}\"}}[{max_duration}])",
        set: |u, v| u.avg_gpu_mem_usage = v,
    },
    MetricQuery {
        name: "total_cpu_energy_usage_kwh",
        template: "sum_over_time(rate(cpu_energy_joules_total{{uuid=~\"{uuid}\"}}[{rate_interval}])[{max_duration}:{scrape_interval}]) / 3600000",
        set: |u, v| u.total_cpu_energy_usage_kwh = v,
    },
    MetricQuery {
        name: "total_cpu_emissions_gms",
        template: "sum_over_time(rate(cpu_emissions_gms_total{{uuid=~\"{uuid}\"}}[{rate_interval}])[{max_duration}:{scrape_interval}])",
        set: |u, v| u.total_cpu_emissions_gms = v,
    },
    MetricQuery {
        name: "total_gpu_energy_usage_kwh",
        template: "sum_over_time(rate(gpu_energy_joules_total{{uuid=~\"{uuid}\"}}[{rate_interval}])[{max_duration}:{scrape_interval}]) / 3600000",
        set: |u, v| u.total_gpu_energy_usage_kwh = v,
    },
    MetricQuery {
        name: "total_gpu_emissions_gms",
        template: "sum_over_time(rate(gpu_emissions_gms_total{{uuid=~\"{uuid}\"}}[{rate_interval}])[{max_duration}:{scrape_interval}])",
        set: |u, v| u.total_gpu_emissions_gms = v,
    },
    MetricQuery {
        name: "total_io_read_hwm",
        template: "max_over_time(io_read_bytes_hwm{{uuid=~\"{uuid}\"}}[{max_duration}])",
        set: |u, v| u.total_io_read_hwm = v,
    },
    MetricQuery {
        name: "total_io_write_hwm",
        template: "max_over_time(io_write_bytes_hwm{{uuid=~\"{uuid}\"}}[{max_duration}])",
        set: |u, v| u.total_io_write_hwm = v,
    },
    MetricQuery {
        name: "total_io_read_stats",
        template: "sum_over_time(rate(io_read_bytes_total{{uuid=~\"{uuid}\"}}[{rate_interval}])[{max_duration}:{scrape_interval}])",
        set: |u, v| u.total_io_read_stats = v,
    },
    MetricQuery {
        name: "total_io_write_stats",
        template: "sum_over_time(rate(io_write_bytes_total{{uuid=~\"{uuid}\"}}[{rate_interval}])[{max_duration}:{scrape_interval}])",
        set: |u, v| u.total_io_write_stats = v,
    },
    MetricQuery {
        name: "total_ib_rx",
        template: "sum_over_time(rate(ib_rx_bytes_total{{uuid=~\"{uuid}\"}}[{rate_interval}])[{max_duration}:{scrape_interval}])",
        set: |u, v| u.total_ib_rx = v,
    },
    MetricQuery {
        name: "total_ib_tx",
        template: "sum_over_time(rate(ib_tx_bytes_total{{uuid=~\"{uuid}\"}}[{rate_interval}])[{max_duration}:{scrape_interval}])",
        set: |u, v| u.total_ib_tx = v,
    },
];

fn render(template: &str, uuid_regex: &str, rate_interval: &str, max_duration: &str, scrape_interval: &str) -> String {
    template
        .replace("{uuid}", uuid_regex)
        .replace("{rate_interval}", rate_interval)
        .replace("{max_duration}", max_duration)
        .replace("{scrape_interval}", scrape_interval)
}

/// Fill in average/total metric fields on `units` in place, then mark
/// (but not yet persist) units whose elapsed wall-time is below
/// `cutoff_secs` as ignored. Returns the uuids that should have their
/// time series deleted from the metrics store.
pub async fn enrich(
    metrics_store: &Arc<dyn MetricsStore>,
    units: &mut [Unit],
    end_time: DateTime<Utc>,
    cutoff_secs: i64,
) -> Vec<String> {
    if metrics_store.is_available() && !units.is_empty() {
        run_aggregate_queries(metrics_store, units, end_time).await;
    }

    let mut ignored = Vec::new();
    for unit in units.iter_mut() {
        if !unit.is_running() && unit.elapsed_raw < cutoff_secs {
            unit.ignore = true;
            ignored.push(unit.uuid.clone());
        }
    }
    ignored
}

async fn run_aggregate_queries(metrics_store: &Arc<dyn MetricsStore>, units: &mut [Unit], end_time: DateTime<Utc>) {
    let min_start_ms = units
        .iter()
        .filter(|u| u.start_ts > 0)
        .map(|u| u.start_ts)
        .min();

    let Some(min_start_ms) = min_start_ms else {
        return;
    };

    let min_start = (end_time.timestamp_millis()).min(min_start_ms);
    let max_duration_secs = ((end_time.timestamp_millis() - min_start) / 1000 / 60) * 60;

    let rate_interval = metrics_store.rate_interval();
    if max_duration_secs <= 0 || (max_duration_secs as u64) < rate_interval.as_secs() {
        return;
    }

    let uuid_regex = units
        .iter()
        .map(|u| regex::escape(&u.uuid))
        .collect::<Vec<_>>()
        .join("|");

    let max_duration = format!("{max_duration_secs}s");
    let rate_interval_str = format!("{}s", rate_interval.as_secs());
    let scrape_interval = metrics_store.scrape_interval();
    let scrape_interval_str = format!("{}s", scrape_interval.as_secs());

    let futures = QUERIES.iter().map(|q| {
        let expr = render(q.template, &uuid_regex, &rate_interval_str, &max_duration, &scrape_interval_str);
        let metrics_store = Arc::clone(metrics_store);
        let name = q.name;
        async move {
            match metrics_store.query(&expr, end_time).await {
                Ok(result) => Some((name, result)),
                Err(e) => {
                    tracing::warn!(error = %e, query = name, "aggregate query failed");
                    None
                }
            }
        }
    });

    let results = futures::future::join_all(futures).await;

    for (name, result) in results.into_iter().flatten() {
        let Some(query) = QUERIES.iter().find(|q| q.name == name) else {
            continue;
        };
        for unit in units.iter_mut() {
            if let Some(value) = result.get(&unit.uuid) {
                (query.set)(unit, *value);
            }
        }
    }
}

/// After a successful writer commit, delete the ignored units' series from
/// the metrics store. Best-effort: failures are logged, never propagated.
pub async fn reconcile_short_units(
    metrics_store: &Arc<dyn MetricsStore>,
    ignored_uuids: &[String],
    end_time: DateTime<Utc>,
    cutoff: std::time::Duration,
) {
    if ignored_uuids.is_empty() || !metrics_store.is_available() {
        return;
    }

    let start = end_time - chrono::Duration::from_std(cutoff).unwrap_or(chrono::Duration::zero());
    let matcher = format!(
        "{{uuid=~\"{}\"}}",
        ignored_uuids
            .iter()
            .map(|u| regex::escape(u))
            .collect::<Vec<_>>()
            .join("|")
    );

    if let Err(e) = metrics_store.delete(start, end_time, &matcher).await {
        tracing::warn!(error = %e, count = ignored_uuids.len(), "failed to delete ignored units' series");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics_store::NullMetricsStore;

    #[tokio::test]
    async fn unavailable_store_skips_enrichment_but_still_flags_ignored() {
        let store: Arc<dyn MetricsStore> = Arc::new(NullMetricsStore);
        let mut units = vec![Unit {
            uuid: "a".into(),
            end_ts: 1,
            elapsed_raw: 10,
            ..Default::default()
        }];
        let ignored = enrich(&store, &mut units, Utc::now(), 300).await;
        assert_eq!(ignored, vec!["a".to_string()]);
        assert!(units[0].ignore);
    }

    #[tokio::test]
    async fn running_unit_never_ignored() {
        let store: Arc<dyn MetricsStore> = Arc::new(NullMetricsStore);
        let mut units = vec![Unit {
            uuid: "running".into(),
            end_ts: 0,
            elapsed_raw: 1,
            ..Default::default()
        }];
        let ignored = enrich(&store, &mut units, Utc::now(), 300).await;
        assert!(ignored.is_empty());
        assert!(!units[0].ignore);
    }

    #[tokio::test]
    async fn reconcile_skips_empty_ignored_list() {
        let store: Arc<dyn MetricsStore> = Arc::new(NullMetricsStore);
        reconcile_short_units(&store, &[], Utc::now(), std::time::Duration::from_secs(60)).await;
    }
}
