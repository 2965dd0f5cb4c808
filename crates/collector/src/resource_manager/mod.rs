//! The resource-manager port: the abstract collaborator the collector
//! pulls finished (and running) units from.
//!
//! Exactly one adapter is selected at startup via `resource_manager.kind`.
//! The only adapter shipped in this crate is [`FixtureResourceManager`], a
//! newline-delimited-JSON reader useful for local testing and demos; a
//! production deployment supplies its own adapter behind the same trait.

mod fixture;

pub use fixture::FixtureResourceManager;

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::domain::Unit;
use crate::error::Result;

/// A collaborator capable of reporting units that fall within a time
/// window, keyed by `end` (see `SPEC_FULL.md` window-semantics decision).
#[async_trait]
pub trait ResourceManager: Send + Sync {
    async fn fetch(&self, start: NaiveDateTime, end: NaiveDateTime) -> Result<Vec<Unit>>;
}

/// Construct the configured adapter. Only `"fixture"` is built in; any
/// other `kind` is a configuration error since this crate carries no
/// other adapter.
pub fn build(kind: &str, fixture_path: Option<&std::path::Path>) -> Result<Box<dyn ResourceManager>> {
    match kind {
        "fixture" => Ok(Box::new(FixtureResourceManager::new(
            fixture_path.map(|p| p.to_path_buf()),
        ))),
        other => Err(crate::error::Error::Config(format!(
            "unknown resource_manager.kind {other:?}"
        ))),
    }
}
