//! Producer-side capture layer.
//!
//! The interception glue finalizes packets and hands them to an injected
//! [`CaptureState`], which applies the trim gate, tracks live objects for the
//! baseline, assigns the global sequence index and forwards streamed packets
//! to the recorder over TCP.

mod client;
mod error;
mod objects;
mod options;
mod state;
mod trim;

pub use crate::client::RecorderClient;
pub use crate::error::{CaptureError, Result};
pub use crate::objects::{LiveObject, ObjectHandle, ObjectKind, ObjectTable};
pub use crate::options::{
    CaptureOptions, DEFAULT_MAX_TRIM_BATCH, ENV_MAX_TRIM_BATCH, ENV_RECORDER_PORT,
    ENV_TRIM_TRIGGER, ENV_VERBOSITY,
};
pub use crate::state::{CaptureState, Disposition, MemorySink, ObjectEffect, PacketSink};
pub use crate::trim::{TrimMode, TrimTrigger};
