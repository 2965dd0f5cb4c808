//! Core accounting types: [`Unit`], [`Usage`], and [`Project`].
//!
//! These mirror the `units` and `usage` table schemas 1:1 so that row
//! (de)serialization via `sqlx::FromRow` needs no manual mapping.

use serde::{Deserialize, Serialize};

/// One finished (or still-running) work-unit record.
///
/// `end_ts == 0` means the unit is still running. `ignore == true` means
/// the unit ran for less than the configured cutoff and is hidden from
/// user-facing queries (see `writer::ignore_short_units`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct Unit {
    pub uuid: String,
    pub project: String,
    pub usr: String,
    pub uid: i64,
    pub grp: String,
    pub gid: i64,

    pub partition: String,
    pub qos: String,

    pub submit: String,
    pub start: String,
    pub end: String,
    pub submit_ts: i64,
    pub start_ts: i64,
    pub end_ts: i64,
    pub elapsed: String,
    pub elapsed_raw: i64,

    pub exitcode: String,
    pub state: String,

    pub alloc_nodes: i64,
    pub alloc_cpus: i64,
    pub alloc_gpus: i64,
    pub alloc_mem: String,
    pub nodelist: String,
    pub nodelist_exp: String,

    pub total_cpu_billing: i64,
    pub total_gpu_billing: i64,
    pub total_misc_billing: i64,

    pub avg_cpu_usage: f64,
    pub avg_cpu_mem_usage: f64,
    pub avg_gpu_usage: f64,
    pub avg_gpu_mem_usage: f64,

    pub total_cpu_energy_usage_kwh: f64,
    pub total_cpu_emissions_gms: f64,
    pub total_gpu_energy_usage_kwh: f64,
    pub total_gpu_emissions_gms: f64,

    pub total_io_read_hwm: f64,
    pub total_io_write_hwm: f64,
    pub total_io_read_stats: f64,
    pub total_io_write_stats: f64,
    pub total_ib_rx: f64,
    pub total_ib_tx: f64,

    pub name: String,
    pub workdir: String,
    pub comment: String,

    pub ignore: bool,
}

impl Unit {
    /// A unit that has not yet finished.
    pub fn is_running(&self) -> bool {
        self.end_ts == 0
    }
}

/// One aggregate row per `(project, usr, partition, qos)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct Usage {
    pub project: String,
    pub usr: String,
    pub partition: String,
    pub qos: String,
    pub num_units: i64,

    pub total_cpu_billing: i64,
    pub total_gpu_billing: i64,
    pub total_misc_billing: i64,

    pub avg_cpu_usage: f64,
    pub avg_cpu_mem_usage: f64,
    pub avg_gpu_usage: f64,
    pub avg_gpu_mem_usage: f64,

    pub total_cpu_energy_usage_kwh: f64,
    pub total_cpu_emissions_gms: f64,
    pub total_gpu_energy_usage_kwh: f64,
    pub total_gpu_emissions_gms: f64,

    pub total_io_read_hwm: f64,
    pub total_io_write_hwm: f64,
    pub total_io_read_stats: f64,
    pub total_io_write_stats: f64,
    pub total_ib_rx: f64,
    pub total_ib_tx: f64,

    pub comment: String,
}

/// A distinct project name, derived from `SELECT DISTINCT project FROM units`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq, Eq)]
pub struct Project {
    pub name: String,
}
