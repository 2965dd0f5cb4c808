//! Route handlers, one module per resource. Wired into a [`axum::Router`]
//! by [`crate::api::router`].

pub mod health;
pub mod metrics;
pub mod projects;
pub mod units;
pub mod usage;
