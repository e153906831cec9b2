//! Configuration management for pictor.
//!
//! This module provides the command-line interface and the settings shared by
//! every subcommand:
//! - Command-line arguments via clap
//! - Environment variables with `PICTOR_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Example
//!
//! ```ignore
//! use pictor::config::{Cli, Command};
//!
//! let cli = Cli::parse();
//! match cli.command {
//!     Command::Serve(config) => println!("Listening on {}", config.bind_address()),
//!     Command::Fetch(config) => println!("Fetching {}", config.uri),
//!     Command::Cache(args) => println!("Cache directory {}", args.cache_dir.display()),
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `PICTOR_HOST` - Server bind address (default: 0.0.0.0)
//! - `PICTOR_PORT` - Server port (default: 3000)
//! - `PICTOR_CACHE_DIR` - Root directory of the disk caches (disk tiers off when unset)
//! - `PICTOR_MEMORY_CACHE` - Memory cache capacity (default: 64MB)
//! - `PICTOR_DOWNLOAD_CACHE` - Download cache capacity (default: 256MB, 0 disables)
//! - `PICTOR_RESULT_CACHE` - Result cache capacity (default: 128MB, 0 disables)
//! - `PICTOR_HTTP_TIMEOUT_MS` - Connect/header/chunk timeout (default: 7000)
//! - `PICTOR_USER_AGENT` - User agent sent to origins
//! - `PICTOR_ASSET_ROOT` - Directory served for `asset://` URIs
//! - `PICTOR_IO_CONCURRENCY` / `PICTOR_DECODE_CONCURRENCY` - Worker limits
//! - `PICTOR_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 3600)
//! - `PICTOR_CORS_ORIGINS` - Allowed CORS origins, comma-separated
//! - `PICTOR_ALLOWED_SCHEMES` - URI schemes the server loads (default: http,https,asset,data)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::http::{HttpStackOptions, ReqwestHttpStack};
use crate::pipeline::EngineBuilder;
use crate::request::CachePolicy;
use crate::server::DEFAULT_ALLOWED_SCHEMES;

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default memory cache capacity.
pub const DEFAULT_MEMORY_CACHE: &str = "64MB";

/// Default download cache capacity.
pub const DEFAULT_DOWNLOAD_CACHE: &str = "256MB";

/// Default result cache capacity.
pub const DEFAULT_RESULT_CACHE: &str = "128MB";

/// Default HTTP timeout in milliseconds.
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 7000;

/// Default HTTP cache max-age in seconds (1 hour).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

/// Upper bound for either worker pool.
pub const MAX_CONCURRENCY: usize = 1024;

// =============================================================================
// CLI Arguments
// =============================================================================

/// pictor - An image loading engine.
///
/// Fetches images from the network, local files and data URIs, decodes and
/// resizes them, and caches downloads, results and bitmaps.
#[derive(Parser, Debug, Clone)]
#[command(name = "pictor")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve images over HTTP.
    Serve(ServeConfig),

    /// Load one image and write it as PNG.
    Fetch(FetchConfig),

    /// Inspect or wipe the disk caches.
    Cache(CacheArgs),
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Settings for the image engine, shared by `serve` and `fetch`.
#[derive(Args, Debug, Clone)]
pub struct EngineConfig {
    /// Root directory for the download and result caches.
    ///
    /// If not specified, only the memory cache is used.
    #[arg(long, env = "PICTOR_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Memory cache capacity (e.g. "64MB", "1GiB", or bytes).
    #[arg(long, default_value = DEFAULT_MEMORY_CACHE, env = "PICTOR_MEMORY_CACHE")]
    pub memory_cache: String,

    /// Download cache capacity; "0" disables the tier.
    #[arg(long, default_value = DEFAULT_DOWNLOAD_CACHE, env = "PICTOR_DOWNLOAD_CACHE")]
    pub download_cache: String,

    /// Result cache capacity; "0" disables the tier.
    #[arg(long, default_value = DEFAULT_RESULT_CACHE, env = "PICTOR_RESULT_CACHE")]
    pub result_cache: String,

    /// Timeout in milliseconds for connecting, headers and each body chunk.
    #[arg(long, default_value_t = DEFAULT_HTTP_TIMEOUT_MS, env = "PICTOR_HTTP_TIMEOUT_MS")]
    pub http_timeout_ms: u64,

    /// User agent sent with network requests.
    #[arg(long, env = "PICTOR_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Directory served for `asset://` URIs.
    #[arg(long, env = "PICTOR_ASSET_ROOT")]
    pub asset_root: Option<PathBuf>,

    /// Concurrent fetches and disk reads (defaults to a multiple of the CPU count).
    #[arg(long, env = "PICTOR_IO_CONCURRENCY")]
    pub io_concurrency: Option<usize>,

    /// Concurrent decodes (defaults to the CPU count).
    #[arg(long, env = "PICTOR_DECODE_CONCURRENCY")]
    pub decode_concurrency: Option<usize>,
}

impl EngineConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        let memory = self.memory_cache_bytes()?;
        if memory == 0 {
            return Err("memory_cache must be greater than 0".to_string());
        }
        self.download_cache_bytes()?;
        self.result_cache_bytes()?;

        if self.http_timeout_ms == 0 {
            return Err("http_timeout_ms must be greater than 0".to_string());
        }

        for (name, value) in [
            ("io_concurrency", self.io_concurrency),
            ("decode_concurrency", self.decode_concurrency),
        ] {
            if let Some(permits) = value {
                if permits == 0 || permits > MAX_CONCURRENCY {
                    return Err(format!(
                        "{name} must be between 1 and {MAX_CONCURRENCY}, got {permits}"
                    ));
                }
            }
        }

        if let Some(root) = &self.asset_root {
            if !root.is_dir() {
                return Err(format!(
                    "asset_root {} is not a directory",
                    root.display()
                ));
            }
        }

        Ok(())
    }

    pub fn memory_cache_bytes(&self) -> Result<usize, String> {
        let bytes = parse_size(&self.memory_cache).map_err(|e| format!("memory_cache: {e}"))?;
        usize::try_from(bytes).map_err(|_| format!("memory_cache: {bytes} bytes is too large"))
    }

    pub fn download_cache_bytes(&self) -> Result<u64, String> {
        parse_size(&self.download_cache).map_err(|e| format!("download_cache: {e}"))
    }

    pub fn result_cache_bytes(&self) -> Result<u64, String> {
        parse_size(&self.result_cache).map_err(|e| format!("result_cache: {e}"))
    }

    /// Options for the reqwest client.
    pub fn http_options(&self) -> HttpStackOptions {
        let mut options = HttpStackOptions {
            timeout: Duration::from_millis(self.http_timeout_ms),
            ..Default::default()
        };
        if let Some(user_agent) = &self.user_agent {
            options.user_agent = Some(user_agent.clone());
        }
        options
    }

    /// An engine builder carrying every setting. Call [`validate`](Self::validate) first.
    pub fn engine_builder(&self) -> Result<EngineBuilder, String> {
        let stack = ReqwestHttpStack::with_options(self.http_options())
            .map_err(|e| format!("HTTP client: {e}"))?;

        let mut builder = EngineBuilder::default()
            .memory_capacity(self.memory_cache_bytes()?)
            .download_cache_capacity(self.download_cache_bytes()?)
            .result_cache_capacity(self.result_cache_bytes()?)
            .http_stack(Arc::new(stack));

        if let Some(dir) = &self.cache_dir {
            builder = builder.cache_dir(dir);
        }
        if let Some(root) = &self.asset_root {
            builder = builder.asset_root(root);
        }
        if let Some(permits) = self.io_concurrency {
            builder = builder.io_concurrency(permits);
        }
        if let Some(permits) = self.decode_concurrency {
            builder = builder.decode_concurrency(permits);
        }
        Ok(builder)
    }
}

// =============================================================================
// Serve Configuration
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "PICTOR_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "PICTOR_PORT")]
    pub port: u16,

    #[command(flatten)]
    pub engine: EngineConfig,

    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "PICTOR_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "PICTOR_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// URI schemes clients may request (comma-separated).
    ///
    /// `file` and `content` are off unless listed here.
    #[arg(
        long,
        env = "PICTOR_ALLOWED_SCHEMES",
        value_delimiter = ',',
        default_values = DEFAULT_ALLOWED_SCHEMES
    )]
    pub allowed_schemes: Vec<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("host must not be empty".to_string());
        }
        if self.port == 0 {
            return Err("port must be greater than 0".to_string());
        }
        if self.allowed_schemes.is_empty() {
            return Err("allowed_schemes must not be empty".to_string());
        }
        if let Some(bad) = self.allowed_schemes.iter().find(|s| !is_scheme_name(s)) {
            return Err(format!("invalid scheme '{bad}' in allowed_schemes"));
        }
        self.engine.validate()
    }

    /// Get the socket address string for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// Fetch Configuration
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct FetchConfig {
    /// Image URI (http(s)://, file://, asset://, data: or an absolute path).
    pub uri: String,

    /// Where to write the decoded image as PNG.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Target width in pixels.
    #[arg(long)]
    pub width: Option<u32>,

    /// Target height in pixels.
    #[arg(long)]
    pub height: Option<u32>,

    /// Resize precision: exactly, same_aspect_ratio or less_pixels.
    #[arg(long, default_value = "exactly")]
    pub precision: String,

    /// Crop anchor: start_crop, center_crop, end_crop or fill.
    #[arg(long, default_value = "center_crop")]
    pub scale: String,

    /// Cache policy for every tier: enabled, read_only, write_only or disabled.
    #[arg(long, default_value = "enabled")]
    pub cache_policy: String,

    /// Skip cache reads and store the fresh result.
    #[arg(long, default_value_t = false)]
    pub refresh: bool,

    #[command(flatten)]
    pub engine: EngineConfig,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl FetchConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.uri.trim().is_empty() {
            return Err("uri must not be empty".to_string());
        }
        match (self.width, self.height) {
            (Some(0), _) | (_, Some(0)) => {
                return Err("width and height must be greater than 0".to_string())
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err("width and height must be given together".to_string())
            }
            _ => {}
        }
        self.cache_policy()?;
        self.engine.validate()
    }

    pub fn cache_policy(&self) -> Result<CachePolicy, String> {
        CachePolicy::parse(&self.cache_policy)
            .ok_or_else(|| format!("unknown cache policy '{}'", self.cache_policy))
    }
}

// =============================================================================
// Cache Maintenance
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct CacheArgs {
    /// Root directory of the disk caches.
    #[arg(long, env = "PICTOR_CACHE_DIR")]
    pub cache_dir: PathBuf,

    #[command(subcommand)]
    pub action: CacheAction,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    /// Print entry counts and sizes as JSON.
    Stats,

    /// Delete every cached entry.
    Clear,
}

/// Letters, digits, `+`, `-` and `.`, starting with a letter.
fn is_scheme_name(value: &str) -> bool {
    let mut chars = value.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

// =============================================================================
// Size Parsing
// =============================================================================

/// Parse a byte size such as `"1048576"`, `"512KB"`, `"256MB"` or `"1GiB"`.
///
/// Decimal units (`KB`, `MB`, `GB`) and binary units (`KiB`, `MiB`, `GiB`)
/// are both 1024-based; units are case-insensitive and may be separated from
/// the number by whitespace.
pub fn parse_size(value: &str) -> Result<u64, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("size must not be empty".to_string());
    }

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    if number.is_empty() {
        return Err(format!("invalid size '{value}'"));
    }
    let number: u64 = number
        .parse()
        .map_err(|_| format!("invalid size '{value}'"))?;

    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1024,
        "m" | "mb" | "mib" => 1024 * 1024,
        "g" | "gb" | "gib" => 1024 * 1024 * 1024,
        other => return Err(format!("unknown size unit '{other}' in '{value}'")),
    };

    number
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{value}' overflows"))
}

// =============================================================================
// Tests
// =============================================================================
