//! Wires every component together: opens the store, builds the
//! collaborator adapters, and runs the three long-lived tasks (collector
//! ticker, backup ticker, HTTP server) until a shutdown signal arrives.
//!
//! Grounded on `basilica-api/src/server.rs`'s `Server`/`AppState` split
//! and `basilica-validator/src/rental/monitoring.rs`'s
//! `tokio::select!` + `CancellationToken` ticker shape, generalized here
//! to coordinate three tasks instead of one.

use std::sync::Arc;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::auth::{AdminList, HttpAdminListSource};
use crate::backup::BackupEngine;
use crate::collector::Collector;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::metrics_store::{MetricsStore, NullMetricsStore, PrometheusMetricsStore};
use crate::resource_manager;
use crate::store::Store;
use crate::watermark::Watermark;

/// Shared, cheaply-cloned state handed to every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Store,
    pub admin_list: Arc<AdminList>,
    pub metrics_handle: Arc<PrometheusHandle>,
}

/// The fully-wired service: everything needed to run the collector
/// ticker, the backup ticker, and the HTTP listener.
pub struct App {
    config: Arc<Config>,
    store: Store,
    admin_list: Arc<AdminList>,
    metrics_handle: Arc<PrometheusHandle>,
    collector: Arc<Collector>,
    backup: Option<BackupEngine>,
}

impl App {
    /// Open the store, build every collaborator adapter from `config`,
    /// and apply directory/clamp normalization. Fails fast (exit-code
    /// non-zero territory, per spec §6) on any startup error.
    pub async fn bootstrap(mut config: Config) -> Result<Self> {
        config.validate_and_prepare()?;

        let metrics_handle = Arc::new(install_metrics_recorder()?);

        let db_path = config.storage.data_path.join(format!("{}.db", config.app_name));
        let store = Store::open(&db_path, 8).await?;

        let watermark = Watermark::new(&config.storage.data_path);

        let resource_manager = resource_manager::build(
            &config.resource_manager.kind,
            config.resource_manager.fixture_path.as_deref(),
        )?;

        let metrics_store: Arc<dyn MetricsStore> = match &config.tsdb.web_url {
            Some(url) => Arc::new(PrometheusMetricsStore::new(
                url.clone(),
                config.tsdb.skip_tls_verify,
            )?),
            None => Arc::new(NullMetricsStore),
        };

        let admin_source = match &config.web.admin_source_url {
            Some(url) => Some(Arc::new(HttpAdminListSource::new(url.clone())?) as Arc<_>),
            None => None,
        };
        let admin_list = Arc::new(AdminList::new(config.web.admin_users.clone(), admin_source));

        let retention = chrono::Duration::from_std(config.storage.retention_period()).ok();

        let collector = Arc::new(Collector::new(
            store.clone(),
            Arc::from(resource_manager),
            metrics_store.clone(),
            watermark,
            retention,
            config.storage.job_duration_cutoff().as_secs() as i64,
            config.tsdb.cutoff_duration(),
            config.storage.skip_delete_old_units,
        ));

        let backup = config.storage.backup_path.as_ref().map(|backup_dir| {
            BackupEngine::new(db_path.clone(), backup_dir.clone(), config.app_name.clone())
        });

        Ok(Self {
            config: Arc::new(config),
            store,
            admin_list,
            metrics_handle,
            collector,
            backup,
        })
    }

    pub fn state(&self) -> AppState {
        AppState {
            config: self.config.clone(),
            store: self.store.clone(),
            admin_list: self.admin_list.clone(),
            metrics_handle: self.metrics_handle.clone(),
        }
    }

    /// Run one collection pass immediately and return, without starting
    /// any of the long-lived tasks. Used by the `collect-now` CLI path.
    pub async fn collect_once(&self) -> Result<()> {
        self.collector.collect(&self.config.storage.update_from).await
    }

    /// Run one backup pass immediately and return, without starting any
    /// of the long-lived tasks. Used by the `backup-now` CLI path.
    pub async fn backup_now(&self) -> Result<()> {
        match &self.backup {
            Some(engine) => {
                engine.backup(self.store.pool()).await?;
                Ok(())
            }
            None => Err(Error::Config(
                "storage.backup_path is not configured, backups are disabled".to_string(),
            )),
        }
    }

    /// Run the collector ticker, the (optional) backup ticker, and the
    /// HTTP listener until `token` is cancelled or an OS interrupt
    /// signal arrives, whichever comes first. Shutdown order: stop
    /// tickers, drain in-flight collector/backup work, close the store,
    /// then shut the HTTP server down with a 5s deadline.
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        // Pull out everything the spawned tasks need up front: `self` is
        // consumed by value here, and an `async move` block that referenced
        // `self.config` directly would capture all of `self`, leaving
        // nothing behind for the HTTP-listener setup below.
        let update_interval = self.config.storage.update_interval();
        let update_from = self.config.storage.update_from.clone();
        let backup_interval = self.config.storage.backup_interval();
        let listen_address = self.config.web.listen_address.clone();
        let pool = self.store.pool().clone();

        let collector_token = token.clone();
        let collector = self.collector.clone();
        let collector_handle = tokio::spawn(async move {
            collector.run(update_interval, update_from, collector_token).await;
        });

        let backup_handle = self.backup.map(|engine| {
            let backup_token = token.clone();
            tokio::spawn(async move {
                run_backup_loop(engine, pool, backup_interval, backup_token).await;
            })
        });

        let state = AppState {
            config: self.config.clone(),
            store: self.store.clone(),
            admin_list: self.admin_list.clone(),
            metrics_handle: self.metrics_handle.clone(),
        };
        let router = axum::Router::new()
            .nest("/api", crate::api::router(state.clone()))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(&listen_address)
            .await
            .map_err(crate::error::Error::Io)?;
        tracing::info!(addr = %listen_address, "listening");

        let server_token = token.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = server_token.cancelled() => {}
                    _ = shutdown_signal() => {}
                }
            })
            .await
            .map_err(crate::error::Error::Io)?;

        token.cancel();
        collector_handle.await.ok();
        if let Some(h) = backup_handle {
            h.await.ok();
        }

        self.store.pool().close().await;

        Ok(())
    }
}

/// First run only after the first tick: production databases may be
/// huge, so we never back up immediately on process start.
async fn run_backup_loop(
    engine: BackupEngine,
    pool: sqlx::SqlitePool,
    interval: std::time::Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                tracing::info!("backup loop cancelled");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = engine.backup(&pool).await {
                    tracing::error!(error = %e, "backup failed, will retry next tick");
                }
            }
        }
    }
}

/// Install the process-wide Prometheus metrics recorder. No HTTP listener
/// of its own: exposition happens at `GET /api/metrics`, see
/// `api::routes::metrics`.
///
/// Builds the recorder first and keeps its handle regardless of whether
/// the global install succeeds: a process that bootstraps more than one
/// `App` (every integration test in this workspace does) only gets to
/// set the global recorder once, but each `App` still renders its own
/// registry through the handle it was given.
fn install_metrics_recorder() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    let _ = metrics::set_global_recorder(recorder);
    Ok(handle)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::warn!("received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::warn!("received terminate signal, shutting down");
        }
    }
}
