//! HTTP surface for the media bucket: public object serving and a health check.

pub mod handlers;
pub mod setup;
pub mod state;
pub mod telemetry;
