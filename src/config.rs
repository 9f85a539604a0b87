//! Runtime configuration.
//!
//! A [`RuntimeConfig`] is plain data: build it in code, deserialize it from
//! JSON, or start from [`RuntimeConfig::from_env`]. Nothing reads it globally;
//! it is handed to [`Runtime::new`](crate::Runtime::new).

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::barrier::BarrierKind;
use crate::error::{Error, Result};
use crate::worklist::Discipline;

/// Upper bound on threads per host. Barrier arenas are sized to this.
pub const MAX_THREADS: usize = 256;

/// Environment variable overriding [`RuntimeConfig::threads`].
pub const THREADS_ENV: &str = "PARSYNC_THREADS";

/// Environment variable toggling network event tracing.
pub const TRACE_ENV: &str = "PARSYNC_TRACE";

/// Tunables for one runtime instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Active threads on this host.
    pub threads: usize,
    /// Items per worklist chunk.
    pub chunk_capacity: usize,
    /// Intra-chunk consumption order.
    pub discipline: Discipline,
    /// Priority shift for bucketed scheduling (`bucket = priority >> shift`).
    pub bucket_shift: u32,
    /// Local barrier flavour.
    pub barrier: BarrierKind,
    /// Threads per package, overriding topology detection.
    pub packages: Option<Vec<usize>>,
    /// Log every send, receive and broadcast.
    pub trace_network: bool,
    /// Dirty fraction of a peer's shared node list above which sync messages
    /// switch to the dense bitmap encoding.
    pub dense_threshold: f64,
    /// Drained chunks kept for reuse per worklist.
    pub chunk_cache: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(MAX_THREADS);
        Self {
            threads,
            chunk_capacity: 64,
            discipline: Discipline::Fifo,
            bucket_shift: 0,
            barrier: BarrierKind::Auto,
            packages: None,
            trace_network: false,
            dense_threshold: 0.25,
            chunk_cache: 64,
        }
    }
}

impl RuntimeConfig {
    /// Config with `threads` active threads and defaults elsewhere.
    pub fn with_threads(threads: usize) -> Self {
        Self {
            threads,
            ..Self::default()
        }
    }

    /// Defaults overlaid with `PARSYNC_THREADS` and `PARSYNC_TRACE`.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    /// Overlays environment-style settings read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(raw) = lookup(THREADS_ENV) {
            self.threads = raw
                .trim()
                .parse()
                .map_err(|_| Error::InvalidConfig(format!("{THREADS_ENV}={raw:?} is not a count")))?;
        }
        if let Some(raw) = lookup(TRACE_ENV) {
            self.trace_network = parse_flag(&raw)
                .ok_or_else(|| Error::InvalidConfig(format!("{TRACE_ENV}={raw:?} is not a flag")))?;
        }
        Ok(())
    }

    /// Parses and validates a JSON document.
    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads, parses and validates a JSON file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading runtime config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parsing runtime config {}", path.display()))
    }

    /// Rejects values the runtime cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 || self.threads > MAX_THREADS {
            return Err(Error::InvalidConfig(format!(
                "threads must be in 1..={MAX_THREADS}, got {}",
                self.threads
            )));
        }
        if self.chunk_capacity == 0 {
            return Err(Error::InvalidConfig("chunk_capacity must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.dense_threshold) {
            return Err(Error::InvalidConfig(format!(
                "dense_threshold must be within [0, 1], got {}",
                self.dense_threshold
            )));
        }
        if let Some(sizes) = &self.packages {
            if sizes.is_empty() || sizes.iter().any(|&s| s == 0) {
                return Err(Error::InvalidConfig("package sizes must be non-empty and > 0".into()));
            }
        }
        Ok(())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" | "" => Some(false),
        _ => None,
    }
}
