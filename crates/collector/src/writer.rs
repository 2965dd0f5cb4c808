//! The writer: one transaction per collection step doing retention sweep,
//! unit upsert, and usage conflict-upsert.
//!
//! The running-average upsert is grounded directly on the
//! `ON CONFLICT ... DO UPDATE SET` weighted-average pattern used for
//! accumulating usage rows in the teacher's billing storage layer.

use chrono::NaiveDateTime;
use sqlx::SqlitePool;

use crate::domain::Unit;
use crate::error::Result;

/// Persist `units` inside one transaction: sweep retention-expired rows
/// (unless `skip_retention`), upsert every unit, and conflict-upsert the
/// usage row for every *finished* unit. Returns the uuids flagged
/// `ignore = 1` in this batch, for the caller to reconcile against the
/// metrics store after commit.
pub async fn write_batch(
    pool: &SqlitePool,
    units: &[Unit],
    retention_cutoff: Option<NaiveDateTime>,
    skip_retention: bool,
) -> Result<Vec<String>> {
    let mut tx = pool.begin().await?;

    if !skip_retention {
        if let Some(cutoff) = retention_cutoff {
            sqlx::query("DELETE FROM units WHERE start <= ?")
                .bind(cutoff.format("%Y-%m-%dT%H:%M:%S").to_string())
                .execute(&mut *tx)
                .await?;
        }
    }

    let mut ignored = Vec::new();

    for unit in units {
        upsert_unit(&mut tx, unit).await?;
        if unit.ignore {
            ignored.push(unit.uuid.clone());
        }
        if !unit.is_running() {
            upsert_usage(&mut tx, unit).await?;
        }
    }

    tx.commit().await?;

    Ok(ignored)
}

async fn upsert_unit(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, u: &Unit) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO units (
            uuid, project, usr, uid, grp, gid, partition, qos,
            submit, start, "end", submit_ts, start_ts, end_ts, elapsed, elapsed_raw,
            exitcode, state, alloc_nodes, alloc_cpus, alloc_gpus, alloc_mem,
            nodelist, nodelist_exp,
            total_cpu_billing, total_gpu_billing, total_misc_billing,
            avg_cpu_usage, avg_cpu_mem_usage, avg_gpu_usage, avg_gpu_mem_usage,
            total_cpu_energy_usage_kwh, total_cpu_emissions_gms,
            total_gpu_energy_usage_kwh, total_gpu_emissions_gms,
            total_io_read_hwm, total_io_write_hwm, total_io_read_stats, total_io_write_stats,
            total_ib_rx, total_ib_tx,
            name, workdir, comment, ignore
        ) VALUES (
            ?, ?, ?, ?, ?, ?, ?, ?,
            ?, ?, ?, ?, ?, ?, ?, ?,
            ?, ?, ?, ?, ?, ?,
            ?, ?,
            ?, ?, ?,
            ?, ?, ?, ?,
            ?, ?,
            ?, ?,
            ?, ?, ?, ?,
            ?, ?,
            ?, ?, ?, ?
        )
        ON CONFLICT(uuid, start) DO UPDATE SET
            project = excluded.project,
            usr = excluded.usr,
            uid = excluded.uid,
            grp = excluded.grp,
            gid = excluded.gid,
            partition = excluded.partition,
            qos = excluded.qos,
            submit = excluded.submit,
            "end" = excluded."end",
            submit_ts = excluded.submit_ts,
            start_ts = excluded.start_ts,
            end_ts = excluded.end_ts,
            elapsed = excluded.elapsed,
            elapsed_raw = excluded.elapsed_raw,
            exitcode = excluded.exitcode,
            state = excluded.state,
            alloc_nodes = excluded.alloc_nodes,
            alloc_cpus = excluded.alloc_cpus,
            alloc_gpus = excluded.alloc_gpus,
            alloc_mem = excluded.alloc_mem,
            nodelist = excluded.nodelist,
            nodelist_exp = excluded.nodelist_exp,
            total_cpu_billing = excluded.total_cpu_billing,
            total_gpu_billing = excluded.total_gpu_billing,
            total_misc_billing = excluded.total_misc_billing,
            avg_cpu_usage = excluded.avg_cpu_usage,
            avg_cpu_mem_usage = excluded.avg_cpu_mem_usage,
            avg_gpu_usage = excluded.avg_gpu_usage,
            avg_gpu_mem_usage = excluded.avg_gpu_mem_usage,
            total_cpu_energy_usage_kwh = excluded.total_cpu_energy_usage_kwh,
            total_cpu_emissions_gms = excluded.total_cpu_emissions_gms,
            total_gpu_energy_usage_kwh = excluded.total_gpu_energy_usage_kwh,
            total_gpu_emissions_gms = excluded.total_gpu_emissions_gms,
            total_io_read_hwm = excluded.total_io_read_hwm,
            total_io_write_hwm = excluded.total_io_write_hwm,
            total_io_read_stats = excluded.total_io_read_stats,
            total_io_write_stats = excluded.total_io_write_stats,
            total_ib_rx = excluded.total_ib_rx,
            total_ib_tx = excluded.total_ib_tx,
            name = excluded.name,
            workdir = excluded.workdir,
            comment = excluded.comment,
            ignore = excluded.ignore
        "#,
    )
    .bind(&u.uuid)
    .bind(&u.project)
    .bind(&u.usr)
    .bind(u.uid)
    .bind(&u.grp)
    .bind(u.gid)
    .bind(&u.partition)
    .bind(&u.qos)
    .bind(&u.submit)
    .bind(&u.start)
    .bind(&u.end)
    .bind(u.submit_ts)
    .bind(u.start_ts)
    .bind(u.end_ts)
    .bind(&u.elapsed)
    .bind(u.elapsed_raw)
    .bind(&u.exitcode)
    .bind(&u.state)
    .bind(u.alloc_nodes)
    .bind(u.alloc_cpus)
    .bind(u.alloc_gpus)
    .bind(&u.alloc_mem)
    .bind(&u.nodelist)
    .bind(&u.nodelist_exp)
    .bind(u.total_cpu_billing)
    .bind(u.total_gpu_billing)
    .bind(u.total_misc_billing)
    .bind(u.avg_cpu_usage)
    .bind(u.avg_cpu_mem_usage)
    .bind(u.avg_gpu_usage)
    .bind(u.avg_gpu_mem_usage)
    .bind(u.total_cpu_energy_usage_kwh)
    .bind(u.total_cpu_emissions_gms)
    .bind(u.total_gpu_energy_usage_kwh)
    .bind(u.total_gpu_emissions_gms)
    .bind(u.total_io_read_hwm)
    .bind(u.total_io_write_hwm)
    .bind(u.total_io_read_stats)
    .bind(u.total_io_write_stats)
    .bind(u.total_ib_rx)
    .bind(u.total_ib_tx)
    .bind(&u.name)
    .bind(&u.workdir)
    .bind(&u.comment)
    .bind(u.ignore)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Weighted running averages for `avg_*`, plain accumulation for
/// `total_*`/`num_units`, replace for `comment`. Mirrors the teacher's
/// billing-usage upsert arithmetic, adapted to SQLite's `excluded.*`
/// syntax.
async fn upsert_usage(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, u: &Unit) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO usage (
            project, usr, partition, qos, num_units,
            total_cpu_billing, total_gpu_billing, total_misc_billing,
            avg_cpu_usage, avg_cpu_mem_usage, avg_gpu_usage, avg_gpu_mem_usage,
            total_cpu_energy_usage_kwh, total_cpu_emissions_gms,
            total_gpu_energy_usage_kwh, total_gpu_emissions_gms,
            total_io_read_hwm, total_io_write_hwm, total_io_read_stats, total_io_write_stats,
            total_ib_rx, total_ib_tx, comment
        ) VALUES (
            ?, ?, ?, ?, 1,
            ?, ?, ?,
            ?, ?, ?, ?,
            ?, ?,
            ?, ?,
            ?, ?, ?, ?,
            ?, ?, ?
        )
        ON CONFLICT(project, usr, partition, qos) DO UPDATE SET
            num_units = usage.num_units + 1,
            total_cpu_billing = usage.total_cpu_billing + excluded.total_cpu_billing,
            total_gpu_billing = usage.total_gpu_billing + excluded.total_gpu_billing,
            total_misc_billing = usage.total_misc_billing + excluded.total_misc_billing,
            avg_cpu_usage = (usage.avg_cpu_usage * usage.num_units + excluded.avg_cpu_usage) / (usage.num_units + 1),
            avg_cpu_mem_usage = (usage.avg_cpu_mem_usage * usage.num_units + excluded.avg_cpu_mem_usage) / (usage.num_units + 1),
            avg_gpu_usage = (usage.avg_gpu_usage * usage.num_units + excluded.avg_gpu_usage) / (usage.num_units + 1),
            avg_gpu_mem_usage = (usage.avg_gpu_mem_usage * usage.num_units + excluded.avg_gpu_mem_usage) / (usage.num_units + 1),
            total_cpu_energy_usage_kwh = usage.total_cpu_energy_usage_kwh + excluded.total_cpu_energy_usage_kwh,
            total_cpu_emissions_gms = usage.total_cpu_emissions_gms + excluded.total_cpu_emissions_gms,
            total_gpu_energy_usage_kwh = usage.total_gpu_energy_usage_kwh + excluded.total_gpu_energy_usage_kwh,
            total_gpu_emissions_gms = usage.total_gpu_emissions_gms + excluded.total_gpu_emissions_gms,
            total_io_read_hwm = usage.total_io_read_hwm + excluded.total_io_read_hwm,
            total_io_write_hwm = usage.total_io_write_hwm + excluded.total_io_write_hwm,
            total_io_read_stats = usage.total_io_read_stats + excluded.total_io_read_stats,
            total_io_write_stats = usage.total_io_write_stats + excluded.total_io_write_stats,
            total_ib_rx = usage.total_ib_rx + excluded.total_ib_rx,
            total_ib_tx = usage.total_ib_tx + excluded.total_ib_tx,
            comment = excluded.comment
        "#,
    )
    .bind(&u.project)
    .bind(&u.usr)
    .bind(&u.partition)
    .bind(&u.qos)
    .bind(u.total_cpu_billing)
    .bind(u.total_gpu_billing)
    .bind(u.total_misc_billing)
    .bind(u.avg_cpu_usage)
    .bind(u.avg_cpu_mem_usage)
    .bind(u.avg_gpu_usage)
    .bind(u.avg_gpu_mem_usage)
    .bind(u.total_cpu_energy_usage_kwh)
    .bind(u.total_cpu_emissions_gms)
    .bind(u.total_gpu_energy_usage_kwh)
    .bind(u.total_gpu_emissions_gms)
    .bind(u.total_io_read_hwm)
    .bind(u.total_io_write_hwm)
    .bind(u.total_io_read_stats)
    .bind(u.total_io_write_stats)
    .bind(u.total_ib_rx)
    .bind(u.total_ib_tx)
    .bind(&u.comment)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use chrono::NaiveDate;

    async fn fresh_store() -> Store {
        let dir = tempfile::tempdir().unwrap();
        Store::open(&dir.path().join("test.db"), 4).await.unwrap()
    }

    fn sample_unit(uuid: &str, project: &str, usr: &str, end_ts: i64, avg: f64) -> Unit {
        Unit {
            uuid: uuid.into(),
            project: project.into(),
            usr: usr.into(),
            start: "2024-01-01T00:00:00".into(),
            end: "2024-01-01T01:00:00".into(),
            end_ts,
            elapsed_raw: 3600,
            avg_cpu_usage: avg,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_uuid_start() {
        let store = fresh_store().await;
        let unit = sample_unit("a", "proj", "alice", 1000, 50.0);
        write_batch(store.pool(), &[unit.clone()], None, true).await.unwrap();
        write_batch(store.pool(), &[unit], None, true).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM units")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn usage_accumulates_running_average() {
        let store = fresh_store().await;
        let u1 = sample_unit("a", "proj", "alice", 1000, 50.0);
        let mut u2 = sample_unit("b", "proj", "alice", 2000, 100.0);
        u2.start = "2024-01-01T02:00:00".into();

        write_batch(store.pool(), &[u1], None, true).await.unwrap();
        write_batch(store.pool(), &[u2], None, true).await.unwrap();

        let (num_units, avg): (i64, f64) =
            sqlx::query_as("SELECT num_units, avg_cpu_usage FROM usage WHERE project = 'proj' AND usr = 'alice'")
                .fetch_one(store.pool())
                .await
                .unwrap();

        assert_eq!(num_units, 2);
        assert!((avg - 75.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn running_units_never_touch_usage() {
        let store = fresh_store().await;
        let mut running = sample_unit("r", "proj", "bob", 0, 0.0);
        running.end_ts = 0;

        write_batch(store.pool(), &[running], None, true).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM usage")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn retention_sweep_deletes_old_units() {
        let store = fresh_store().await;
        let old = sample_unit("old", "proj", "alice", 1000, 1.0);
        write_batch(store.pool(), &[old], None, true).await.unwrap();

        let cutoff = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        write_batch(store.pool(), &[], Some(cutoff), false).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM units")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
