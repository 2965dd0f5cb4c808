//! `GET /api/units` and `GET /api/units/admin`.

use axum::extract::{Query, State};
use axum::{Extension, Json};
use serde::Deserialize;

use crate::api::query_builder::{bind_query_as, QueryBuilder};
use crate::api::response::TimeWindowParams;
use crate::app::AppState;
use crate::auth::{require_admin, AuthContext, DashboardUsers};
use crate::domain::Unit;
use crate::error::{Envelope, Error, Result};

#[derive(Debug, Deserialize, Default)]
pub struct UnitsParams {
    #[serde(flatten)]
    pub window: TimeWindowParams,
    pub account: Option<String>,
    pub partition: Option<String>,
    pub qos: Option<String>,
    /// Admin-only: scope by these users instead of the caller's identity.
    #[serde(default)]
    pub user: Vec<String>,
}

pub async fn list_units(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(params): Query<UnitsParams>,
) -> Result<Json<Envelope<Vec<Unit>>>> {
    let users = match ctx.dashboard_users {
        DashboardUsers::All => Vec::new(),
        DashboardUsers::Single(u) => vec![u],
    };
    fetch_units(state, params, users).await
}

pub async fn list_units_admin(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(params): Query<UnitsParams>,
) -> Result<Json<Envelope<Vec<Unit>>>> {
    require_admin(&ctx)?;
    let users = params.user.clone();
    fetch_units(state, params, users).await
}

async fn fetch_units(
    state: AppState,
    params: UnitsParams,
    users: Vec<String>,
) -> Result<Json<Envelope<Vec<Unit>>>> {
    let window = params.window.resolve(state.config.web.max_query_period())?;

    let mut qb = QueryBuilder::new().query("SELECT * FROM units WHERE ignore = 0 AND end_ts >= ")
        .param_one(window.from.timestamp_millis())
        .query(" AND end_ts < ")
        .param_one(window.to.timestamp_millis());

    if !users.is_empty() {
        qb = qb
            .query(" AND usr IN ")
            .param(users);
    }
    if let Some(account) = &params.account {
        qb = qb.query(" AND project = ").param_one(account.clone());
    }
    if let Some(partition) = &params.partition {
        qb = qb.query(" AND partition = ").param_one(partition.clone());
    }
    if let Some(qos) = &params.qos {
        qb = qb.query(" AND qos = ").param_one(qos.clone());
    }
    if let Some(jobuuid) = &params.window.jobuuid {
        qb = qb.query(" AND uuid = ").param_one(jobuuid.clone());
    }
    if let Some(jobid) = &params.window.jobid {
        qb = qb.query(" AND uuid = ").param_one(jobid.clone());
    }

    let (sql, sql_params) = qb.build();
    let rows = bind_query_as::<Unit>(&sql, &sql_params)
        .fetch_all(state.store.pool())
        .await
        .map_err(Error::from)?;

    Ok(Json(Envelope::success(rows)))
}
