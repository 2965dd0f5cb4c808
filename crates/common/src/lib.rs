//! Shared utilities used by the unitledger binary: logging initialization,
//! a generic figment-based config loader, and a small set of error helpers
//! that every component's own error enum converts into.

pub mod config;
pub mod error;
pub mod logging;

pub use config::ConfigLoader;
pub use error::CommonError;
