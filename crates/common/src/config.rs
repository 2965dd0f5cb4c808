//! Generic figment-backed configuration loading.
//!
//! Any `Deserialize + Serialize + Default` config struct gets file+env
//! loading for free by implementing this trait (it only needs an env
//! prefix). Precedence, low to high: struct `Default`, TOML file (if
//! present), `UNITLEDGER_*` environment variables.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;

use crate::error::CommonError;

pub trait ConfigLoader<T: DeserializeOwned + Serialize + Default> {
    /// Environment variable prefix, e.g. `"UNITLEDGER_"`.
    fn env_prefix() -> &'static str;

    /// Load configuration from an optional TOML file plus environment
    /// overrides. A missing file is not an error; a malformed one is.
    fn load(config_path: Option<&Path>) -> Result<T, CommonError> {
        let mut figment = Figment::new().merge(Serialized::defaults(T::default()));

        if let Some(path) = config_path {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed(Self::env_prefix()).split("__"));

        figment
            .extract()
            .map_err(|e| CommonError::Config(e.to_string()))
    }

    fn load_from_file(path: &Path) -> Result<T, CommonError> {
        Self::load(Some(path))
    }
}
