//! Error kinds shared across components: `config` (startup, fatal), `io`
//! (file or network, transient), `upstream` (best-effort external
//! collaborator, logged not failed). Component-specific error enums
//! (store, API, ...) wrap or convert into this where they cross a module
//! boundary that doesn't need a richer variant set.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upstream collaborator error: {0}")]
    Upstream(String),
}
