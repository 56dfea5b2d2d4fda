//! Loader configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::infrastructure::image::KeyStrategy;
use crate::infrastructure::image::disk_cache::{DEFAULT_MAX_CACHE_SIZE, default_cache_dir};
use crate::infrastructure::image::dispatcher::PoolSize;
use crate::infrastructure::image::http::DEFAULT_TIMEOUT_SECS;
use crate::infrastructure::image::memory_cache::DEFAULT_HEAP_DIVISOR;

pub(crate) const APP_NAME: &str = "imgcache";
pub(crate) const APP_QUALIFIER: &str = "com";
pub(crate) const APP_ORGANIZATION: &str = "linuxmobile";

const DEFAULT_HEAP_CEILING_BYTES: u64 = 512 * 1024 * 1024;

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Loader configuration, read from TOML and overridden by CLI flags.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[serde(skip)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Cache key derivation strategy.
    #[serde(default)]
    pub key_strategy: KeyStrategy,

    /// Memory tier configuration.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Disk tier configuration.
    #[serde(default)]
    pub disk: DiskConfig,

    /// Worker pool configuration.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Network configuration.
    #[serde(default)]
    pub network: NetworkConfig,
}

/// Memory tier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Heap ceiling the memory budget is carved from.
    #[serde(default = "default_heap_ceiling")]
    pub heap_ceiling_bytes: u64,

    /// Fraction of the ceiling given to the cache, as a divisor.
    #[serde(default = "default_divisor")]
    pub divisor: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            heap_ceiling_bytes: DEFAULT_HEAP_CEILING_BYTES,
            divisor: DEFAULT_HEAP_DIVISOR,
        }
    }
}

/// Disk tier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskConfig {
    /// Open the disk tier at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum stored bytes.
    #[serde(default = "default_disk_capacity")]
    pub capacity_bytes: u64,

    /// Cache directory. Defaults to the platform cache directory.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl DiskConfig {
    /// Returns the configured directory or the platform default.
    #[must_use]
    pub fn effective_directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(default_cache_dir)
    }
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity_bytes: DEFAULT_MAX_CACHE_SIZE,
            directory: None,
        }
    }
}

/// Worker pool configuration. Unset values are derived from the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Core worker threads.
    #[serde(default)]
    pub core_threads: Option<usize>,

    /// Maximum concurrent loads.
    #[serde(default)]
    pub max_threads: Option<usize>,
}

impl PoolConfig {
    /// Resolves the pool bounds against the host defaults.
    #[must_use]
    pub fn resolve(&self) -> PoolSize {
        let host = PoolSize::for_host();
        PoolSize::new(
            self.core_threads.unwrap_or(host.core),
            self.max_threads.unwrap_or(host.max),
        )
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

const fn default_true() -> bool {
    true
}

const fn default_heap_ceiling() -> u64 {
    DEFAULT_HEAP_CEILING_BYTES
}

const fn default_divisor() -> u64 {
    DEFAULT_HEAP_DIVISOR
}

const fn default_disk_capacity() -> u64 {
    DEFAULT_MAX_CACHE_SIZE
}

const fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

use super::args::CliArgs;

impl LoaderConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(config_path) = &args.config {
            self.config = Some(config_path.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(directory) = &args.cache_dir {
            self.disk.directory = Some(directory.clone());
        }
        if let Some(capacity) = args.disk_capacity {
            self.disk.capacity_bytes = capacity;
        }
        if args.no_disk_cache {
            self.disk.enabled = false;
        }
        if let Some(timeout) = args.timeout_secs {
            self.network.timeout_secs = timeout;
        }
        if args.weak_keys {
            self.key_strategy = KeyStrategy::Weak;
        }
    }

    /// Returns default config directory.
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Returns default log file path.
    #[must_use]
    pub fn default_log_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.data_dir().join("imgcache.log"))
    }

    /// Returns effective log path.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone().or_else(Self::default_log_path)
    }

    /// Memory cache capacity in KiB.
    #[must_use]
    pub fn memory_capacity_kib(&self) -> u64 {
        crate::infrastructure::image::memory_cache::capacity_from_heap(
            self.memory.heap_ceiling_bytes,
            self.memory.divisor,
        )
    }
}
