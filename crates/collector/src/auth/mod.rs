//! Trusted-header authentication: the service never verifies credentials
//! itself, it trusts `X-Grafana-User`/`X-Dashboard-User` set by an
//! upstream reverse proxy. Grounded on the header-extraction-and-decision
//! shape of the teacher's auth middleware — not its signature
//! verification, which has no counterpart here.

mod http_admin_source;

pub use http_admin_source::HttpAdminListSource;

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::Error;

pub const GRAFANA_USER_HEADER: &str = "x-grafana-user";
pub const DASHBOARD_USER_HEADER: &str = "x-dashboard-user";
pub const ALL_USERS: &str = "all";

const ADMIN_LIST_REFRESH_INTERVAL: Duration = Duration::from_secs(3600);

/// External collaborator that knows the current admin usernames. When
/// absent, the admin list is static (loaded once from config at startup).
#[async_trait]
pub trait AdminListSource: Send + Sync {
    async fn admins(&self) -> crate::error::Result<Vec<String>>;
}

struct AdminListState {
    admins: Vec<String>,
    loaded_at: Option<Instant>,
}

pub struct AdminList {
    source: Option<Arc<dyn AdminListSource>>,
    state: RwLock<AdminListState>,
}

impl AdminList {
    pub fn new(static_admins: Vec<String>, source: Option<Arc<dyn AdminListSource>>) -> Self {
        Self {
            source,
            state: RwLock::new(AdminListState {
                admins: static_admins,
                loaded_at: None,
            }),
        }
    }

    /// Refresh from the external source if more than an hour has passed
    /// since the last load (or it was never loaded). Best-effort: a
    /// refresh failure logs and keeps serving the previous list.
    pub async fn refresh_if_stale(&self) {
        let Some(source) = &self.source else {
            return;
        };

        let stale = {
            let state = self.state.read().await;
            match state.loaded_at {
                None => true,
                Some(t) => t.elapsed() > ADMIN_LIST_REFRESH_INTERVAL,
            }
        };

        if !stale {
            return;
        }

        match source.admins().await {
            Ok(admins) => {
                let mut state = self.state.write().await;
                state.admins = admins;
                state.loaded_at = Some(Instant::now());
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to refresh admin list, reusing previous list");
            }
        }
    }

    pub async fn is_admin(&self, user: &str) -> bool {
        self.state.read().await.admins.iter().any(|a| a == user)
    }
}

/// The resolved identity for one request: the logged-in user, the
/// effective dashboard user(s) to scope data queries by, and whether the
/// logged-in user is an admin.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub logged_user: String,
    pub dashboard_users: DashboardUsers,
    pub is_admin: bool,
}

#[derive(Debug, Clone)]
pub enum DashboardUsers {
    /// Scoped to exactly this user (the common case).
    Single(String),
    /// An admin impersonating the literal `"all"` — no user filter applied.
    All,
}

pub async fn auth_middleware(
    State(admin_list): State<Arc<AdminList>>,
    mut request: Request,
    next: Next,
) -> Result<Response, Error> {
    admin_list.refresh_if_stale().await;

    let headers = request.headers();
    let logged_user = header_value(headers, GRAFANA_USER_HEADER)
        .ok_or_else(|| Error::Auth("missing X-Grafana-User header".to_string()))?;

    let is_admin = admin_list.is_admin(&logged_user).await;
    let dashboard_header = header_value(headers, DASHBOARD_USER_HEADER);

    let dashboard_users = match (&dashboard_header, is_admin) {
        (Some(dashboard_user), true) if dashboard_user == ALL_USERS => DashboardUsers::All,
        (Some(dashboard_user), true) if !dashboard_user.is_empty() => {
            DashboardUsers::Single(dashboard_user.clone())
        }
        _ => DashboardUsers::Single(logged_user.clone()),
    };

    request.extensions_mut().insert(AuthContext {
        logged_user,
        dashboard_users,
        is_admin,
    });

    Ok(next.run(request).await)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

/// Require the caller to be an admin; used by `/admin`-suffixed routes.
pub fn require_admin(ctx: &AuthContext) -> crate::error::Result<()> {
    if ctx.is_admin {
        Ok(())
    } else {
        Err(Error::Auth(format!(
            "{} is not an admin",
            ctx.logged_user
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSource(Vec<String>);

    #[async_trait]
    impl AdminListSource for FakeSource {
        async fn admins(&self) -> crate::error::Result<Vec<String>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn static_list_used_without_source() {
        let list = AdminList::new(vec!["alice".to_string()], None);
        assert!(list.is_admin("alice").await);
        assert!(!list.is_admin("bob").await);
    }

    #[tokio::test]
    async fn refresh_loads_from_source_when_never_loaded() {
        let source = Arc::new(FakeSource(vec!["carol".to_string()]));
        let list = AdminList::new(vec![], Some(source));
        list.refresh_if_stale().await;
        assert!(list.is_admin("carol").await);
    }

    #[tokio::test]
    async fn refresh_is_noop_when_fresh() {
        let source = Arc::new(FakeSource(vec!["carol".to_string()]));
        let list = AdminList::new(vec![], Some(source));
        list.refresh_if_stale().await;
        list.refresh_if_stale().await; // second call should be a no-op, not erroring
        assert!(list.is_admin("carol").await);
    }
}
