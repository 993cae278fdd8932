#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use argus_capture::{
    TrimTrigger, ENV_MAX_TRIM_BATCH, ENV_RECORDER_PORT, ENV_TRIM_TRIGGER, ENV_VERBOSITY,
};
use argus_recorder::{
    RecorderConfig, Supervisor, Verbosity, Watchdog, DEFAULT_LISTEN_PORT, DEFAULT_MAX_WORKERS,
};
use argus_trace::{Compression, DEFAULT_COMPRESSION_THRESHOLD};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "argus-record", about = "Launch a program and record its API-call trace")]
struct Args {
    /// Program to launch and trace, followed by its arguments.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    program: Vec<String>,

    /// Trace file path. Additional capture channels get a -N suffix.
    #[arg(short, long, default_value = "argus_trace.argt")]
    output: PathBuf,

    /// quiet, errors, warnings, verbose or debug.
    #[arg(short, long, default_value = "warnings")]
    verbosity: Verbosity,

    /// Packet body codec: none, lz4 or snappy.
    #[arg(long, default_value = "lz4")]
    compression: Compression,

    /// Bodies at or below this many bytes stay uncompressed.
    #[arg(long, default_value_t = DEFAULT_COMPRESSION_THRESHOLD)]
    compression_threshold: u64,

    /// Trim trigger: none, hotkey-<name> or frames-<start>-<end>.
    #[arg(long)]
    trim_trigger: Option<String>,

    /// Largest baseline burst the capture layer sends at once.
    #[arg(long, default_value_t = argus_capture::DEFAULT_MAX_TRIM_BATCH)]
    trim_max_batch: usize,

    /// Recorder thread ceiling.
    #[arg(long, default_value_t = DEFAULT_MAX_WORKERS)]
    max_threads: usize,

    /// Listen port for capture channels.
    #[arg(long, default_value_t = DEFAULT_LISTEN_PORT)]
    port: u16,

    /// Echo producer message packets through the recorder's own logs.
    #[arg(long)]
    print_messages: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.verbosity.filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Configuration problems surface here, before anything is traced.
    let trigger = args.trim_trigger.clone().unwrap_or_default();
    trigger
        .parse::<TrimTrigger>()
        .context("--trim-trigger is invalid")?;
    anyhow::ensure!(args.max_threads >= 1, "--max-threads must be at least 1");
    anyhow::ensure!(args.trim_max_batch >= 1, "--trim-max-batch must be at least 1");

    let config = RecorderConfig {
        output: args.output,
        listen_port: args.port,
        max_workers: args.max_threads,
        compression: args.compression,
        compression_threshold: args.compression_threshold,
        print_messages: args.print_messages,
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let supervisor =
        Supervisor::bind(config, shutdown.clone()).context("cannot bind recorder port")?;
    let port = supervisor.local_addr()?.port();
    supervisor.start().context("cannot start recorder pool")?;

    let mut command = Command::new(&args.program[0]);
    command
        .args(&args.program[1..])
        .env(ENV_RECORDER_PORT, port.to_string())
        .env(ENV_TRIM_TRIGGER, &trigger)
        .env(ENV_MAX_TRIM_BATCH, args.trim_max_batch.to_string())
        .env(ENV_VERBOSITY, args.verbosity.name());
    let child = command
        .spawn()
        .with_context(|| format!("cannot launch {:?}", args.program[0]))?;
    tracing::info!(program = %args.program[0], pid = child.id(), "traced process launched");

    // From here on failures are logged, never turned into exit codes: the
    // trace on disk is worth keeping whatever happened around it.
    let watchdog = Watchdog::spawn(child, shutdown);
    let status = watchdog.join();
    tracing::info!(?status, "winding down");
    supervisor.shutdown();
    Ok(())
}
