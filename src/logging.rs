//! Structured logging: compact stderr output plus a daily rolling file.
//!
//! stdout carries IPC, so nothing here writes to it.

use std::fs;

use anyhow::Context;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::paths::get_log_dir;

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info,reqwest=warn,hyper=warn,mio=warn,tungstenite=warn,tokio_tungstenite=warn";

/// Install the global subscriber. Fails if one is already set.
pub fn init() -> anyhow::Result<()> {
    let log_dir = get_log_dir();
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("live-voice")
        .filename_suffix("log")
        .max_log_files(5)
        .build(&log_dir)
        .context("Failed to create log file appender")?;

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Tracing subscriber already initialized")?;

    tracing::info!(log_dir = %log_dir.display(), "Logger initialized");
    Ok(())
}

/// Stderr-only fallback when the log directory is unusable.
pub fn init_stderr_only() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)))
        .with_writer(std::io::stderr)
        .try_init();
}
