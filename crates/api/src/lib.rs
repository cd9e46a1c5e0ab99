//! HTTP API: job endpoints, the live event stream and process wiring.

pub mod app;
pub mod shutdown;
