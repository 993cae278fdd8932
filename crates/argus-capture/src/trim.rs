//! Trim gate modes and triggers.

use std::str::FromStr;

use crate::error::CaptureError;

/// The four dispositions a finalized packet can meet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimMode {
    /// No trimming configured: every packet streams immediately.
    Disabled,
    /// Before the trigger fires: only latest object state is retained.
    PreTrim,
    /// Inside the trimmed range: stream immediately.
    Trimming,
    /// After the range: everything is discarded.
    PostTrim,
}

/// When the trimmed range starts and stops. Resolved once at process start
/// and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TrimTrigger {
    #[default]
    None,
    /// Toggled by a named hotkey, checked at each presentation call.
    Hotkey(String),
    /// Frame-number range, inclusive start, exclusive end.
    Frames { start: u64, end: u64 },
}

impl TrimTrigger {
    fn invalid(reason: &str) -> CaptureError {
        CaptureError::InvalidOption {
            var: crate::options::ENV_TRIM_TRIGGER,
            reason: reason.to_owned(),
        }
    }
}

impl FromStr for TrimTrigger {
    type Err = CaptureError;

    /// `none`, `hotkey-<name>` or `frames-<start>-<end>`.
    fn from_str(s: &str) -> Result<Self, CaptureError> {
        if s.eq_ignore_ascii_case("none") || s.is_empty() {
            return Ok(TrimTrigger::None);
        }
        if let Some(name) = s.strip_prefix("hotkey-") {
            if name.is_empty() {
                return Err(TrimTrigger::invalid("hotkey name is empty"));
            }
            return Ok(TrimTrigger::Hotkey(name.to_owned()));
        }
        if let Some(range) = s.strip_prefix("frames-") {
            let (start, end) = range
                .split_once('-')
                .ok_or_else(|| TrimTrigger::invalid("expected frames-<start>-<end>"))?;
            let start: u64 = start
                .parse()
                .map_err(|_| TrimTrigger::invalid("start frame is not a number"))?;
            let end: u64 = end
                .parse()
                .map_err(|_| TrimTrigger::invalid("end frame is not a number"))?;
            if end <= start {
                return Err(TrimTrigger::invalid("end frame must be after start"));
            }
            return Ok(TrimTrigger::Frames { start, end });
        }
        Err(TrimTrigger::invalid("unknown trigger form"))
    }
}
