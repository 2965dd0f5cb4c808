//! Command-line surface: argument parsing and top-level dispatch.
//!
//! Shaped like the teacher's `basilica-validator/src/cli/args.rs`
//! (`Args { #[command(subcommand)] command: Command, ...global flags }`
//! dispatched from a flat `match`), generalized to this service's four
//! one-shot/long-running modes instead of the teacher's fleet-management
//! surface.

use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use unitledger_common::ConfigLoader;

use crate::app::App;
use crate::config::{Config, ConfigFile};

#[derive(Parser, Debug)]
#[command(name = "unitledger")]
#[command(about = "Compute-accounting pipeline: collect, enrich, store, and serve finished work-unit records")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to a TOML configuration file; overrides layer on top of
    /// built-in defaults, `UNITLEDGER_*` environment variables layer on
    /// top of that.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,

    /// Validate configuration and exit without starting any task.
    /// Only meaningful with `serve` (the default command).
    #[arg(long, global = true)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug, Default)]
pub enum Command {
    /// Run the collector ticker, the backup ticker, and the HTTP server
    /// until a shutdown signal arrives. The default when no subcommand is
    /// given.
    #[default]
    Serve,
    /// Print the default configuration as TOML and exit.
    GenConfig,
    /// Run one backup pass immediately and exit, without starting the
    /// tickers or the HTTP server.
    BackupNow,
    /// Run one collection pass immediately and exit, without starting the
    /// tickers or the HTTP server. Useful for cron-driven deployments and
    /// for tests.
    CollectNow,
}

impl Args {
    pub async fn run(self) -> anyhow::Result<()> {
        let command = self.command.unwrap_or_default();

        if let Command::GenConfig = command {
            let config = Config::default();
            println!("{}", toml::to_string_pretty(&config)?);
            return Ok(());
        }

        let config: Config = ConfigFile::load(self.config.as_deref())?;

        tracing::info!(app = %config.app_name, "starting unitledger");

        if self.dry_run {
            let mut config = config;
            config.validate_and_prepare()?;
            tracing::info!("configuration validated successfully (dry-run)");
            return Ok(());
        }

        let app = App::bootstrap(config).await?;

        match command {
            Command::Serve => {
                let token = CancellationToken::new();
                app.run(token).await?;
            }
            Command::CollectNow => app.collect_once().await?,
            Command::BackupNow => app.backup_now().await?,
            Command::GenConfig => unreachable!("handled above"),
        }

        Ok(())
    }
}
