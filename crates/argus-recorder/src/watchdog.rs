//! Traced-child liveness watchdog.

use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Polls the child until it exits, then raises the shutdown flag so the
/// recorder threads wind down on their next timeout. Never blocks the
/// pipeline.
pub struct Watchdog {
    handle: JoinHandle<Option<ExitStatus>>,
}

impl Watchdog {
    pub fn spawn(mut child: Child, shutdown: Arc<AtomicBool>) -> Self {
        let handle = thread::Builder::new()
            .name("argus-watchdog".to_owned())
            .spawn(move || {
                loop {
                    if shutdown.load(Ordering::SeqCst) {
                        // Someone else decided to stop; reap if possible.
                        return child.try_wait().ok().flatten();
                    }
                    match child.try_wait() {
                        Ok(Some(status)) => {
                            info!(%status, "traced process exited");
                            shutdown.store(true, Ordering::SeqCst);
                            return Some(status);
                        }
                        Ok(None) => thread::sleep(POLL_INTERVAL),
                        Err(e) => {
                            warn!(error = %e, "cannot poll traced process");
                            shutdown.store(true, Ordering::SeqCst);
                            return None;
                        }
                    }
                }
            })
            .expect("spawn watchdog thread");
        Self { handle }
    }

    /// Waits for the child to exit.
    pub fn join(self) -> Option<ExitStatus> {
        self.handle.join().unwrap_or(None)
    }
}
