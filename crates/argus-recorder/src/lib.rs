//! Recorder side of the capture pipeline: the listening supervisor, its
//! bounded recorder-thread pool and the traced-child watchdog. The
//! `argus-record` binary wires these to a CLI.

mod config;
mod error;
mod server;
mod watchdog;

pub use crate::config::{RecorderConfig, Verbosity, DEFAULT_LISTEN_PORT, DEFAULT_MAX_WORKERS};
pub use crate::error::{RecorderError, Result};
pub use crate::server::Supervisor;
pub use crate::watchdog::Watchdog;
