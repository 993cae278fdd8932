//! Capture configuration, resolved once from the environment.
//!
//! The recorder launcher exports these variables to the traced child; the
//! capture layer reads them at startup and never again.

use argus_trace::{FileHeader, TraceFlags};

use crate::error::{CaptureError, Result};
use crate::trim::TrimTrigger;

pub const ENV_RECORDER_PORT: &str = "ARGUS_PORT";
pub const ENV_TRIM_TRIGGER: &str = "ARGUS_TRIM_TRIGGER";
pub const ENV_MAX_TRIM_BATCH: &str = "ARGUS_TRIM_MAX_BATCH";
pub const ENV_VERBOSITY: &str = "ARGUS_VERBOSITY";

pub const DEFAULT_MAX_TRIM_BATCH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOptions {
    pub trigger: TrimTrigger,
    /// Baseline packets are handed to the sink in bursts of at most this many.
    pub max_trim_batch: usize,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            trigger: TrimTrigger::None,
            max_trim_batch: DEFAULT_MAX_TRIM_BATCH,
        }
    }
}

impl CaptureOptions {
    pub fn from_env() -> Result<Self> {
        let mut options = Self::default();
        if let Some(raw) = read_var(ENV_TRIM_TRIGGER) {
            options.trigger = raw.parse()?;
        }
        if let Some(raw) = read_var(ENV_MAX_TRIM_BATCH) {
            let batch: usize = raw.parse().map_err(|_| CaptureError::InvalidOption {
                var: ENV_MAX_TRIM_BATCH,
                reason: format!("not a count: {raw:?}"),
            })?;
            if batch == 0 {
                return Err(CaptureError::InvalidOption {
                    var: ENV_MAX_TRIM_BATCH,
                    reason: "must be at least 1".to_owned(),
                });
            }
            options.max_trim_batch = batch;
        }
        Ok(options)
    }

    /// Channel header announcing this capture's feature bits to the recorder.
    pub fn channel_header(&self, gpu_count: u64) -> FileHeader {
        let mut header = FileHeader::for_capture(gpu_count);
        if self.trigger != TrimTrigger::None {
            header.flags |= TraceFlags::TRIMMED;
        }
        header
    }
}

fn read_var(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => Some(v),
        _ => None,
    }
}
