//! `GET /api/projects` — the distinct projects visible to the caller.

use axum::extract::State;
use axum::{Extension, Json};

use crate::api::query_builder::{bind_query_as, QueryBuilder};
use crate::app::AppState;
use crate::auth::{AuthContext, DashboardUsers};
use crate::domain::Project;
use crate::error::{Envelope, Error, Result};

pub async fn list_projects(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Envelope<Vec<Project>>>> {
    let mut qb = QueryBuilder::new().query("SELECT DISTINCT project AS name FROM units WHERE 1 = 1");

    if let DashboardUsers::Single(user) = &ctx.dashboard_users {
        qb = qb.query(" AND usr = ").param_one(user.clone());
    }

    let (sql, sql_params) = qb.build();
    let rows = bind_query_as::<Project>(&sql, &sql_params)
        .fetch_all(state.store.pool())
        .await
        .map_err(Error::from)?;

    Ok(Json(Envelope::success(rows)))
}
