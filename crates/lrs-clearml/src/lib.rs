//! # lrs-clearml
//!
//! Runs sweep trials on a ClearML-compatible experiment tracking server.
//!
//! [`ClearMlClient`] implements [`lrs_optimizer::JobBackend`] over the
//! server's JSON API: trials are cloned from a template task, the learning
//! rate is written into the clone's hyperparameters, and the clone is
//! enqueued on a worker queue. [`ClearMlReporter`] streams sweep telemetry
//! into a parent task without blocking the search.

mod backend;
mod client;
mod config;
mod reporter;
pub mod responses;
#[cfg(test)]
mod test_support;

pub use client::ClearMlClient;
pub use config::{ClearMlConfig, ACCESS_KEY_VAR, API_HOST_VAR, SECRET_KEY_VAR};
pub use reporter::ClearMlReporter;
