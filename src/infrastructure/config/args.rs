use super::app_config::LogLevel;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "imgcache",
    version,
    about = "Load an image through the memory, disk and network tiers",
    long_about = None
)]
pub struct CliArgs {
    /// Image URI to load.
    #[arg(value_name = "URI")]
    pub uri: String,

    /// Requested width; 0 decodes at full size.
    #[arg(long, default_value_t = 0)]
    pub width: u32,

    /// Requested height; 0 decodes at full size.
    #[arg(long, default_value_t = 0)]
    pub height: u32,

    /// Load through the dispatcher and wait for the completion callback.
    #[arg(long = "async")]
    pub async_mode: bool,

    /// Clear both cache tiers before loading.
    #[arg(long)]
    pub clear: bool,

    /// Write the effective configuration back to the config file.
    #[arg(long)]
    pub save_config: bool,

    /// Configuration file path.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Disk cache directory.
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Disk cache capacity in bytes.
    #[arg(long, value_name = "BYTES")]
    pub disk_capacity: Option<u64>,

    /// Skip the disk tier entirely.
    #[arg(long)]
    pub no_disk_cache: bool,

    /// Network timeout in seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    /// Derive keys with the weak string hash instead of a digest.
    #[arg(long)]
    pub weak_keys: bool,
}
