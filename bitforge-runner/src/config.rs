//! Runner configuration
//!
//! Defines the tunables of a pipeline run: the global deadline, where
//! workspaces live, where the injected toolchain assets are read from, and
//! how process output is chunked and buffered.

use std::path::PathBuf;
use std::time::Duration;

/// Maximum time a whole compilation may take
pub const DEFAULT_COMPILATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Size of one read from a process output stream
pub const DEFAULT_READ_CHUNK_SIZE: usize = 1024;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Deadline shared by every command of one run
    pub compilation_timeout: Duration,

    /// Directory under which per-run workspaces are created
    pub workspace_base: PathBuf,

    /// Directory holding `tt_fpga_top.v` and `tt_fpga_fabricfox.pcf`
    pub assets_dir: PathBuf,

    /// Bytes requested per read from stdout/stderr
    pub read_chunk_size: usize,

    /// How long to wait for output readers after a process has exited
    pub drain_grace: Duration,

    /// Capacity of the event channel between a run and its consumer
    pub event_buffer: usize,
}

impl RunnerConfig {
    /// Creates a new configuration with defaults
    pub fn new(workspace_base: PathBuf, assets_dir: PathBuf) -> Self {
        Self {
            compilation_timeout: DEFAULT_COMPILATION_TIMEOUT,
            workspace_base,
            assets_dir,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            drain_grace: Duration::from_secs(5),
            event_buffer: 64,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Every variable is optional:
    /// - COMPILATION_TIMEOUT (seconds, default: 120)
    /// - WORKSPACE_BASE (default: system temp dir)
    /// - ASSETS_DIR (default: /app/verilog)
    /// - READ_CHUNK_SIZE (bytes, default: 1024)
    /// - DRAIN_GRACE (seconds, default: 5)
    /// - EVENT_BUFFER (default: 64)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let compilation_timeout = parse_env::<u64>("COMPILATION_TIMEOUT")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.compilation_timeout);

        let workspace_base = std::env::var("WORKSPACE_BASE")
            .ok()
            .map(PathBuf::from)
            .unwrap_or(defaults.workspace_base);

        let assets_dir = std::env::var("ASSETS_DIR")
            .ok()
            .map(PathBuf::from)
            .unwrap_or(defaults.assets_dir);

        let read_chunk_size =
            parse_env::<usize>("READ_CHUNK_SIZE")?.unwrap_or(defaults.read_chunk_size);

        let drain_grace = parse_env::<u64>("DRAIN_GRACE")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.drain_grace);

        let event_buffer = parse_env::<usize>("EVENT_BUFFER")?.unwrap_or(defaults.event_buffer);

        Ok(Self {
            compilation_timeout,
            workspace_base,
            assets_dir,
            read_chunk_size,
            drain_grace,
            event_buffer,
        })
    }

    /// Sets the compilation timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.compilation_timeout = timeout;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.compilation_timeout.is_zero() {
            anyhow::bail!("compilation_timeout must be greater than 0");
        }

        if self.read_chunk_size == 0 {
            anyhow::bail!("read_chunk_size must be greater than 0");
        }

        if self.event_buffer == 0 {
            anyhow::bail!("event_buffer must be greater than 0");
        }

        if self.workspace_base.as_os_str().is_empty() {
            anyhow::bail!("workspace_base cannot be empty");
        }

        Ok(())
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::new(std::env::temp_dir(), PathBuf::from("/app/verilog"))
    }
}

/// Reads an optional numeric variable; a present but malformed value is an error
fn parse_env<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid value for {}: {}", key, e)),
        Err(_) => Ok(None),
    }
}
