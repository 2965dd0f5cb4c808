//! The embedded store: schema, pragmas, and the shared pool handle.
//!
//! Modeled on `basilica-validator`'s persistence layer — a single
//! `SqlitePool` opened with WAL journaling and a busy timeout, schema
//! applied imperatively at startup with `CREATE TABLE IF NOT EXISTS` plus
//! guarded `ALTER TABLE` migrations for columns added after first release.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Result;

/// A handle to the embedded store. Cheap to clone (wraps an `Arc`d pool).
#[derive(Clone)]
pub struct Store {
    pub(crate) pool: SqlitePool,
}

impl Store {
    /// Open (creating if absent) the database file at `path` and apply the
    /// schema. `max_connections` should be small; this is a single-writer
    /// accounting store, not a high-concurrency OLTP one.
    pub async fn open(path: &Path, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!(
            "sqlite://{}?mode=rwc",
            path.display()
        ))?
        .busy_timeout(Duration::from_millis(5000))
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// A second, single-connection pool against the same file, used by the
    /// backup engine as its read source so it never contends with the
    /// collector's writer connection for a checked-out pool slot.
    pub async fn open_backup_source(path: &Path) -> Result<SqlitePool> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
            .read_only(true);
        Ok(SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS units (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL,
                project TEXT NOT NULL,
                usr TEXT NOT NULL,
                uid INTEGER NOT NULL,
                grp TEXT NOT NULL,
                gid INTEGER NOT NULL,
                partition TEXT NOT NULL DEFAULT '',
                qos TEXT NOT NULL DEFAULT '',
                submit TEXT NOT NULL DEFAULT '',
                start TEXT NOT NULL,
                "end" TEXT NOT NULL DEFAULT '',
                submit_ts INTEGER NOT NULL DEFAULT 0,
                start_ts INTEGER NOT NULL DEFAULT 0,
                end_ts INTEGER NOT NULL DEFAULT 0,
                elapsed TEXT NOT NULL DEFAULT '',
                elapsed_raw INTEGER NOT NULL DEFAULT 0,
                exitcode TEXT NOT NULL DEFAULT '',
                state TEXT NOT NULL DEFAULT '',
                alloc_nodes INTEGER NOT NULL DEFAULT 0,
                alloc_cpus INTEGER NOT NULL DEFAULT 0,
                alloc_gpus INTEGER NOT NULL DEFAULT 0,
                alloc_mem TEXT NOT NULL DEFAULT '',
                nodelist TEXT NOT NULL DEFAULT '',
                nodelist_exp TEXT NOT NULL DEFAULT '',
                total_cpu_billing INTEGER NOT NULL DEFAULT 0,
                total_gpu_billing INTEGER NOT NULL DEFAULT 0,
                total_misc_billing INTEGER NOT NULL DEFAULT 0,
                avg_cpu_usage REAL NOT NULL DEFAULT 0,
                avg_cpu_mem_usage REAL NOT NULL DEFAULT 0,
                avg_gpu_usage REAL NOT NULL DEFAULT 0,
                avg_gpu_mem_usage REAL NOT NULL DEFAULT 0,
                total_cpu_energy_usage_kwh REAL NOT NULL DEFAULT 0,
                total_cpu_emissions_gms REAL NOT NULL DEFAULT 0,
                total_gpu_energy_usage_kwh REAL NOT NULL DEFAULT 0,
                total_gpu_emissions_gms REAL NOT NULL DEFAULT 0,
                total_io_read_hwm REAL NOT NULL DEFAULT 0,
                total_io_write_hwm REAL NOT NULL DEFAULT 0,
                total_io_read_stats REAL NOT NULL DEFAULT 0,
                total_io_write_stats REAL NOT NULL DEFAULT 0,
                total_ib_rx REAL NOT NULL DEFAULT 0,
                total_ib_tx REAL NOT NULL DEFAULT 0,
                name TEXT NOT NULL DEFAULT '',
                workdir TEXT NOT NULL DEFAULT '',
                comment TEXT NOT NULL DEFAULT '',
                ignore INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS usage (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project TEXT NOT NULL,
                usr TEXT NOT NULL,
                partition TEXT NOT NULL DEFAULT '',
                qos TEXT NOT NULL DEFAULT '',
                num_units INTEGER NOT NULL DEFAULT 0,
                total_cpu_billing INTEGER NOT NULL DEFAULT 0,
                total_gpu_billing INTEGER NOT NULL DEFAULT 0,
                total_misc_billing INTEGER NOT NULL DEFAULT 0,
                avg_cpu_usage REAL NOT NULL DEFAULT 0,
                avg_cpu_mem_usage REAL NOT NULL DEFAULT 0,
                avg_gpu_usage REAL NOT NULL DEFAULT 0,
                avg_gpu_mem_usage REAL NOT NULL DEFAULT 0,
                total_cpu_energy_usage_kwh REAL NOT NULL DEFAULT 0,
                total_cpu_emissions_gms REAL NOT NULL DEFAULT 0,
                total_gpu_energy_usage_kwh REAL NOT NULL DEFAULT 0,
                total_gpu_emissions_gms REAL NOT NULL DEFAULT 0,
                total_io_read_hwm REAL NOT NULL DEFAULT 0,
                total_io_write_hwm REAL NOT NULL DEFAULT 0,
                total_io_read_stats REAL NOT NULL DEFAULT 0,
                total_io_write_stats REAL NOT NULL DEFAULT 0,
                total_ib_rx REAL NOT NULL DEFAULT 0,
                total_ib_tx REAL NOT NULL DEFAULT 0,
                comment TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_units_usr_project_start ON units(usr, project, start)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_units_usr_uuid ON units(usr, uuid)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_units_uuid_start ON units(uuid, start)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_usage_project_usr_partition_qos ON usage(project, usr, partition, qos)",
        )
        .execute(&self.pool)
        .await?;

        self.add_column_if_missing("units", "ignore", "INTEGER NOT NULL DEFAULT 0")
            .await?;

        Ok(())
    }

    /// Guarded `ALTER TABLE ADD COLUMN`, for columns introduced after a
    /// table's first release — running it against an already-migrated
    /// database is a no-op.
    async fn add_column_if_missing(&self, table: &str, column: &str, ddl: &str) -> Result<()> {
        let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
            .fetch_all(&self.pool)
            .await?;

        let exists = rows
            .iter()
            .any(|row| row.get::<String, _>("name") == column);

        if !exists {
            sqlx::query(&format!("ALTER TABLE {table} ADD COLUMN {column} {ddl}"))
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Used by `/api/health`.
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}
