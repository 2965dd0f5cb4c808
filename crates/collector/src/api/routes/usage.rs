//! `GET /api/usage/{current,global}` and their `/admin` variants.
//!
//! Both endpoints scope by *account*, not by the caller's own rows: the
//! caller's `usr` only resolves which accounts (`project`s) they
//! participate in via a `sub_query`, and the returned usage covers every
//! user's contribution within those accounts. *current* aggregates live
//! over the `units` table for the requested window; *global* reads the
//! pre-aggregated `usage` table directly, scoped by the same account
//! subquery.

use axum::extract::{Query, State};
use axum::{Extension, Json};
use serde::Deserialize;

use crate::api::query_builder::{bind_query_as, QueryBuilder};
use crate::api::response::TimeWindowParams;
use crate::app::AppState;
use crate::auth::{require_admin, AuthContext, DashboardUsers};
use crate::domain::Usage;
use crate::error::{Envelope, Error, Result};

#[derive(Debug, Deserialize, Default)]
pub struct UsageParams {
    #[serde(flatten)]
    pub window: TimeWindowParams,
    #[serde(default)]
    pub groupby: Vec<String>,
    #[serde(default)]
    pub user: Vec<String>,
}

pub async fn current_usage(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(params): Query<UsageParams>,
) -> Result<Json<Envelope<Vec<Usage>>>> {
    let users = scope(&ctx);
    fetch_current(state, params, users).await
}

pub async fn current_usage_admin(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(params): Query<UsageParams>,
) -> Result<Json<Envelope<Vec<Usage>>>> {
    require_admin(&ctx)?;
    let users = params.user.clone();
    fetch_current(state, params, users).await
}

pub async fn global_usage(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(params): Query<UsageParams>,
) -> Result<Json<Envelope<Vec<Usage>>>> {
    let users = scope(&ctx);
    fetch_global(state, params, users).await
}

pub async fn global_usage_admin(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(params): Query<UsageParams>,
) -> Result<Json<Envelope<Vec<Usage>>>> {
    require_admin(&ctx)?;
    let users = params.user.clone();
    fetch_global(state, params, users).await
}

fn scope(ctx: &AuthContext) -> Vec<String> {
    match &ctx.dashboard_users {
        DashboardUsers::All => Vec::new(),
        DashboardUsers::Single(u) => vec![u.clone()],
    }
}

/// `SELECT DISTINCT project FROM units WHERE usr IN (...)` — the accounts
/// `users` participates in. Inlined as a `sub_query` rather than resolved
/// to a `Vec<String>` up front so the scoping stays one round trip.
fn account_subquery(users: Vec<String>) -> QueryBuilder {
    QueryBuilder::new()
        .query("SELECT DISTINCT project FROM units WHERE usr IN ")
        .param(users)
}

async fn fetch_current(
    state: AppState,
    params: UsageParams,
    users: Vec<String>,
) -> Result<Json<Envelope<Vec<Usage>>>> {
    let window = params.window.resolve(state.config.web.max_query_period())?;

    let group_usr = params.groupby.iter().any(|g| g == "usr");
    let group_partition = params.groupby.iter().any(|g| g == "partition");
    let group_qos = params.groupby.iter().any(|g| g == "qos");

    let usr_col = if group_usr { "usr" } else { "'' AS usr" };
    let partition_col = if group_partition { "partition" } else { "'' AS partition" };
    let qos_col = if group_qos { "qos" } else { "'' AS qos" };

    let select = format!(
        "SELECT project, {usr_col}, {partition_col}, {qos_col}, \
         COUNT(id) AS num_units, \
         SUM(total_cpu_billing) AS total_cpu_billing, \
         SUM(total_gpu_billing) AS total_gpu_billing, \
         SUM(total_misc_billing) AS total_misc_billing, \
         AVG(avg_cpu_usage) AS avg_cpu_usage, \
         AVG(avg_cpu_mem_usage) AS avg_cpu_mem_usage, \
         AVG(avg_gpu_usage) AS avg_gpu_usage, \
         AVG(avg_gpu_mem_usage) AS avg_gpu_mem_usage, \
         SUM(total_cpu_energy_usage_kwh) AS total_cpu_energy_usage_kwh, \
         SUM(total_cpu_emissions_gms) AS total_cpu_emissions_gms, \
         SUM(total_gpu_energy_usage_kwh) AS total_gpu_energy_usage_kwh, \
         SUM(total_gpu_emissions_gms) AS total_gpu_emissions_gms, \
         SUM(total_io_read_hwm) AS total_io_read_hwm, \
         SUM(total_io_write_hwm) AS total_io_write_hwm, \
         SUM(total_io_read_stats) AS total_io_read_stats, \
         SUM(total_io_write_stats) AS total_io_write_stats, \
         SUM(total_ib_rx) AS total_ib_rx, \
         SUM(total_ib_tx) AS total_ib_tx, \
         '' AS comment \
         FROM units WHERE ignore = 0 AND end_ts >= "
    );

    let mut qb = QueryBuilder::new()
        .query(&select)
        .param_one(window.from.timestamp_millis())
        .query(" AND end_ts < ")
        .param_one(window.to.timestamp_millis());

    if !users.is_empty() {
        qb = qb
            .query(" AND project IN ")
            .sub_query(account_subquery(users));
    }

    qb = qb.query(" GROUP BY project");
    if group_usr {
        qb = qb.query(", usr");
    }
    if group_partition {
        qb = qb.query(", partition");
    }
    if group_qos {
        qb = qb.query(", qos");
    }

    let (sql, sql_params) = qb.build();
    let rows = bind_query_as::<Usage>(&sql, &sql_params)
        .fetch_all(state.store.pool())
        .await
        .map_err(Error::from)?;

    Ok(Json(Envelope::success(rows)))
}

async fn fetch_global(
    state: AppState,
    _params: UsageParams,
    users: Vec<String>,
) -> Result<Json<Envelope<Vec<Usage>>>> {
    let mut qb = QueryBuilder::new().query("SELECT * FROM usage WHERE 1 = 1");

    if !users.is_empty() {
        qb = qb
            .query(" AND project IN ")
            .sub_query(account_subquery(users));
    }

    let (sql, sql_params) = qb.build();
    let rows = bind_query_as::<Usage>(&sql, &sql_params)
        .fetch_all(state.store.pool())
        .await
        .map_err(Error::from)?;

    Ok(Json(Envelope::success(rows)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AdminList;
    use crate::config::Config;
    use crate::domain::Unit;
    use crate::store::Store;
    use crate::writer::write_batch;
    use std::sync::Arc;

    fn unit(uuid: &str, project: &str, usr: &str, end_ts_ms: i64) -> Unit {
        Unit {
            uuid: uuid.to_string(),
            project: project.to_string(),
            usr: usr.to_string(),
            start: "2024-01-01T00:00:00".into(),
            end: "2024-01-01T01:00:00".into(),
            end_ts: end_ts_ms,
            elapsed_raw: 3600,
            avg_cpu_usage: 10.0,
            ..Default::default()
        }
    }

    async fn state_with(units: &[Unit]) -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.db"), 4).await.unwrap();
        write_batch(store.pool(), units, None, true).await.unwrap();
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder();
        let state = AppState {
            config: Arc::new(Config::default()),
            store,
            admin_list: Arc::new(AdminList::new(vec![], None)),
            metrics_handle: Arc::new(recorder.handle()),
        };
        (state, dir)
    }

    #[tokio::test]
    async fn current_usage_covers_whole_account_not_just_caller() {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let (state, _dir) = state_with(&[
            unit("a", "acct1", "alice", now_ms),
            unit("b", "acct1", "bob", now_ms),
            unit("c", "acct2", "carol", now_ms),
        ])
        .await;

        let params = UsageParams::default();
        let Json(envelope) = fetch_current(state, params, vec!["alice".to_string()]).await.unwrap();
        let rows = envelope.data.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].project, "acct1");
        assert_eq!(rows[0].num_units, 2);
    }

    #[tokio::test]
    async fn global_usage_covers_whole_account_not_just_caller() {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let (state, _dir) = state_with(&[
            unit("a", "acct1", "alice", now_ms),
            unit("b", "acct1", "bob", now_ms),
            unit("c", "acct2", "carol", now_ms),
        ])
        .await;

        let params = UsageParams::default();
        let Json(envelope) = fetch_global(state, params, vec!["alice".to_string()]).await.unwrap();
        let rows = envelope.data.unwrap();

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.project == "acct1"));
    }

    #[tokio::test]
    async fn current_usage_groupby_usr_splits_the_account_total() {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let (state, _dir) = state_with(&[
            unit("a", "acct1", "alice", now_ms),
            unit("b", "acct1", "bob", now_ms),
        ])
        .await;

        let params = UsageParams {
            groupby: vec!["usr".to_string()],
            ..Default::default()
        };
        let Json(envelope) = fetch_current(state, params, vec![]).await.unwrap();
        let rows = envelope.data.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows.iter().filter(|r| r.num_units == 1).count(), 2);
    }

    #[tokio::test]
    async fn empty_user_scope_returns_all_accounts() {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let (state, _dir) = state_with(&[
            unit("a", "acct1", "alice", now_ms),
            unit("c", "acct2", "carol", now_ms),
        ])
        .await;

        let params = UsageParams::default();
        let Json(envelope) = fetch_current(state, params, vec![]).await.unwrap();
        let rows = envelope.data.unwrap();
        assert_eq!(rows.len(), 2);
    }
}
