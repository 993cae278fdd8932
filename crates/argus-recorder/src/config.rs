//! Recorder configuration.

use std::path::PathBuf;
use std::str::FromStr;

use argus_trace::{Compression, PortabilitySet, WriterOptions, DEFAULT_COMPRESSION_THRESHOLD};

pub const DEFAULT_LISTEN_PORT: u16 = 34_201;
pub const DEFAULT_MAX_WORKERS: usize = 15;

/// Log volume of the recorder and the traced child, mapped onto a
/// `tracing_subscriber` level filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    Errors,
    #[default]
    Warnings,
    Verbose,
    Debug,
}

impl Verbosity {
    pub fn filter(self) -> &'static str {
        match self {
            Verbosity::Quiet => "off",
            Verbosity::Errors => "error",
            Verbosity::Warnings => "warn",
            Verbosity::Verbose => "info",
            Verbosity::Debug => "debug",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Verbosity::Quiet => "quiet",
            Verbosity::Errors => "errors",
            Verbosity::Warnings => "warnings",
            Verbosity::Verbose => "verbose",
            Verbosity::Debug => "debug",
        }
    }
}

impl FromStr for Verbosity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s.to_ascii_lowercase().as_str() {
            "quiet" => Ok(Verbosity::Quiet),
            "errors" => Ok(Verbosity::Errors),
            "warnings" => Ok(Verbosity::Warnings),
            "verbose" | "full" => Ok(Verbosity::Verbose),
            "debug" | "max" => Ok(Verbosity::Debug),
            other => Err(format!("unknown verbosity {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Trace file path; additional channels get a `-N` suffix.
    pub output: PathBuf,
    pub listen_port: u16,
    /// Recorder thread ceiling.
    pub max_workers: usize,
    pub compression: Compression,
    pub compression_threshold: u64,
    /// Echo producer `Message` packets through the recorder's logs.
    pub print_messages: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("argus_trace.argt"),
            listen_port: DEFAULT_LISTEN_PORT,
            max_workers: DEFAULT_MAX_WORKERS,
            compression: Compression::default(),
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            print_messages: false,
        }
    }
}

impl RecorderConfig {
    pub fn writer_options(&self) -> WriterOptions {
        WriterOptions {
            compression: self.compression,
            compression_threshold: self.compression_threshold,
            portability: PortabilitySet::default(),
        }
    }

    /// Path for channel `index` (0-based). The first keeps the configured
    /// name; later ones insert `-N` before the extension.
    pub fn channel_path(&self, index: usize) -> PathBuf {
        if index == 0 {
            return self.output.clone();
        }
        let stem = self
            .output
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("argus_trace");
        let name = match self.output.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{stem}-{index}.{ext}"),
            None => format!("{stem}-{index}"),
        };
        self.output.with_file_name(name)
    }
}
