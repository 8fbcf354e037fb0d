//! Command Line Interface (CLI) arguments.

use byte_unit::Byte;
use clap::Parser;

/// SigPlot data service command line interface
#[derive(Clone, Debug, Parser)]
pub struct CommandLineArgs {
    /// The IP address on which the server should listen
    #[arg(long, default_value = "0.0.0.0", env = "SDS_HOST")]
    pub host: String,
    /// The port to which the server should bind
    #[arg(long, default_value_t = 5055, env = "SDS_PORT")]
    pub port: u16,
    /// Flag indicating whether HTTPS should be used
    #[arg(long, default_value_t = false, env = "SDS_HTTPS")]
    pub https: bool,
    /// Path to the certificate file to be used for HTTPS encryption
    #[arg(long, default_value = "~/.config/sds/certs/cert.pem", env = "SDS_CERT_FILE")]
    pub cert_file: String,
    /// Path to the key file to be used for HTTPS encryption
    #[arg(long, default_value = "~/.config/sds/certs/key.pem", env = "SDS_KEY_FILE")]
    pub key_file: String,
    /// Maximum time in seconds to wait for requests to complete upon receiving `ctrl+c` signal.
    #[arg(long, default_value_t = 60, env = "SDS_SHUTDOWN_TIMEOUT")]
    pub graceful_shutdown_timeout: u64,
    /// Path to the JSON file describing data locations
    #[arg(
        long,
        default_value = "~/.config/sds/locations.json",
        env = "SDS_LOCATIONS_FILE"
    )]
    pub locations_file: String,
    /// Whether rendered output and remote objects are cached on disk
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "SDS_USE_CACHE")]
    pub use_cache: bool,
    /// Root directory of the disk cache
    #[arg(long, default_value = "/tmp/sds", env = "SDS_CACHE_LOCATION")]
    pub cache_location: String,
    /// Byte budget of each cache subdirectory, e.g. "1GB"
    #[arg(long, default_value = "1GB", value_parser = parse_byte_size, env = "SDS_CACHE_MAX_BYTES")]
    pub cache_max_bytes: u64,
    /// Seconds between cache eviction sweeps
    #[arg(long, default_value_t = 60, env = "SDS_CACHE_CHECK_INTERVAL")]
    pub cache_check_interval: u64,
    /// Byte budget for reading a file to estimate its value range, e.g. "1MB"
    #[arg(long, default_value = "1MB", value_parser = parse_byte_size, env = "SDS_MAX_BYTES_ZMINZMAX")]
    pub max_bytes_zminzmax: u64,
    /// Whether to use Rayon for execution of CPU-bound tasks.
    #[arg(long, default_value_t = false, env = "SDS_USE_RAYON")]
    pub use_rayon: bool,
    /// Maximum number of concurrent render tasks. Defaults to one less than the number of CPUs.
    #[arg(long, env = "SDS_THREAD_LIMIT")]
    pub thread_limit: Option<usize>,
    /// Memory limit for render output buffers, e.g. "512MB". Unlimited by default.
    #[arg(long, value_parser = parse_byte_size, env = "SDS_MEMORY_LIMIT")]
    pub memory_limit: Option<u64>,
    /// Maximum number of concurrent remote object downloads
    #[arg(long, env = "SDS_CONNECTION_LIMIT_REMOTE")]
    pub connection_limit_remote: Option<usize>,
}

/// Parse a human readable byte size such as "1GB" or "512 KiB".
pub fn parse_byte_size(size: &str) -> Result<u64, String> {
    Byte::parse_str(size, /* ignore case */ true)
        .map(|bytes| bytes.as_u64())
        .map_err(|err| err.to_string())
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}
