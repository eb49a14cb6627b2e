//! Log subscriber setup

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

use crate::config::LogFormat;

const DEFAULT_FILTER: &str = "info";
const DEBUG_FILTER: &str = "debug";

/// Runtime control over the installed filter
pub struct LogHandle {
    handle: reload::Handle<EnvFilter, Registry>,
    base: String,
    debug: AtomicBool,
}

impl LogHandle {
    pub fn is_debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    /// Switch between the configured filter and `debug`; returns whether
    /// debug logging is now on
    pub fn toggle_debug(&self) -> Result<bool> {
        let debug = !self.debug.load(Ordering::Relaxed);
        let directives = if debug { DEBUG_FILTER } else { self.base.as_str() };
        let filter = EnvFilter::try_new(directives)?;
        self.handle.reload(filter)?;
        self.debug.store(debug, Ordering::Relaxed);
        Ok(debug)
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default `info`.
pub fn init(format: LogFormat) -> Result<LogHandle> {
    let base = std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|value| EnvFilter::try_new(value).is_ok())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string());
    let (filter, handle) = reload::Layer::new(EnvFilter::try_new(&base)?);

    tracing_subscriber::registry()
        .with(filter)
        .with((format == LogFormat::Text).then(fmt::layer))
        .with((format == LogFormat::Json).then(|| fmt::layer().json()))
        .try_init()
        .map_err(|e| anyhow!("Failed to install log subscriber: {e}"))?;

    Ok(LogHandle {
        handle,
        base,
        debug: AtomicBool::new(false),
    })
}
