//! Image Syncer binary support: arguments, HTTP endpoints and wiring.

pub mod app;
pub mod args;
pub mod server;
