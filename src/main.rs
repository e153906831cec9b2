//! pictor - An image loading engine.
//!
//! This binary serves images over HTTP, loads single images from the command
//! line, and maintains the disk caches.

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pictor::{
    cache::DiskCache,
    config::{CacheAction, CacheArgs, Cli, Command, FetchConfig, ServeConfig},
    request::{ImageRequest, Precision, Resize, Scale},
    server::{create_router, RouterConfig},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Fetch(config) => run_fetch(config).await,
        Command::Cache(args) => run_cache(args),
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    print_banner();

    let engine_config = &config.engine;
    info!("Configuration:");
    info!("  Memory cache: {}", engine_config.memory_cache);
    match engine_config.cache_dir {
        Some(ref dir) => {
            info!("  Cache directory: {}", dir.display());
            info!(
                "  Download cache: {}, result cache: {}",
                engine_config.download_cache, engine_config.result_cache
            );
        }
        None => warn!("  No --cache-dir: disk caches disabled"),
    }
    info!("  HTTP timeout: {} ms", engine_config.http_timeout_ms);

    let engine = match engine_config.engine_builder() {
        Ok(builder) => builder.build(),
        Err(e) => {
            error!("Failed to configure engine: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let router = create_router(engine, build_router_config(&config));
    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!("    curl http://{}/cache/stats", addr);
    info!("    curl -o out.png 'http://{}/image?uri=<url>&width=256&height=256'", addr);
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Print the startup banner.
fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    info!("");
    info!("██████╗ ██╗ ██████╗████████╗ ██████╗ ██████╗ ");
    info!("██╔══██╗██║██╔════╝╚══██╔══╝██╔═══██╗██╔══██╗");
    info!("██████╔╝██║██║        ██║   ██║   ██║██████╔╝");
    info!("██╔═══╝ ██║██║        ██║   ██║   ██║██╔══██╗");
    info!("██║     ██║╚██████╗   ██║   ╚██████╔╝██║  ██║");
    info!("╚═╝     ╚═╝ ╚═════╝   ╚═╝    ╚═════╝ ╚═╝  ╚═╝");
    info!("");
    info!("                  v{}", version);
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "pictor=debug,tower_http=debug"
    } else {
        "pictor=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application ServeConfig.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new().with_cache_max_age(config.cache_max_age);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config
        .with_allowed_schemes(config.allowed_schemes.clone())
        .with_tracing(!config.no_tracing)
}

// =============================================================================
// Fetch Command
// =============================================================================

async fn run_fetch(config: FetchConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let request = match build_fetch_request(&config) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let engine = match config.engine.engine_builder() {
        Ok(builder) => builder.build(),
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match engine.execute(request).await {
        Ok(result) => result,
        Err(e) => {
            eprintln!("✗ {}", e);
            if e.is_retryable() {
                eprintln!("  (this failure may succeed on retry)");
            }
            return ExitCode::FAILURE;
        }
    };

    let bitmap = result.bitmap();
    if let Err(e) = write_png(bitmap.encode_png(), &config.output) {
        eprintln!("✗ {}", e);
        return ExitCode::FAILURE;
    }

    println!("✓ {}", config.output.display());
    println!("  Size: {}x{}", bitmap.width(), bitmap.height());
    println!(
        "  Source: {}x{} {}",
        result.image_info().width,
        result.image_info().height,
        result.image_info().mime_type
    );
    println!("  Loaded from: {}", result.data_from());
    if !result.transformations().is_empty() {
        println!("  Transformations: {}", result.transformations().join(", "));
    }

    ExitCode::SUCCESS
}

fn build_fetch_request(config: &FetchConfig) -> Result<ImageRequest, String> {
    let policy = config.cache_policy()?;
    let mut builder = ImageRequest::builder(config.uri.as_str())
        .memory_cache_policy(policy)
        .result_cache_policy(policy)
        .download_cache_policy(policy);

    if let (Some(width), Some(height)) = (config.width, config.height) {
        let precision = Precision::parse(&config.precision)
            .ok_or_else(|| format!("unknown precision '{}'", config.precision))?;
        let scale = Scale::parse(&config.scale)
            .ok_or_else(|| format!("unknown scale '{}'", config.scale))?;
        builder = builder.resize(
            Resize::new(width, height)
                .with_precision(precision)
                .with_scale(scale),
        );
    }

    if config.refresh {
        builder = builder.force_refresh();
    }
    Ok(builder.build())
}

fn write_png(encoded: Result<Vec<u8>, pictor::LoadError>, output: &Path) -> Result<(), String> {
    let png = encoded.map_err(|e| e.to_string())?;
    std::fs::write(output, png).map_err(|e| format!("failed to write {}: {}", output.display(), e))
}

// =============================================================================
// Cache Command
// =============================================================================

const TIERS: [&str; 2] = ["download", "result"];

fn run_cache(args: CacheArgs) -> ExitCode {
    let mut report = serde_json::Map::new();

    for tier in TIERS {
        let dir = args.cache_dir.join(tier);
        if !dir.is_dir() {
            report.insert(tier.to_string(), serde_json::Value::Null);
            continue;
        }

        // No eviction: the capacity only matters to a running engine.
        let cache = match DiskCache::open(&dir, u64::MAX) {
            Ok(cache) => cache,
            Err(e) => {
                eprintln!("✗ {} cache at {}: {}", tier, dir.display(), e);
                return ExitCode::FAILURE;
            }
        };

        match args.action {
            CacheAction::Stats => {
                let stats = cache.stats();
                report.insert(
                    tier.to_string(),
                    serde_json::json!({
                        "dir": dir.display().to_string(),
                        "entries": stats.entries,
                        "size": stats.size,
                        "journal_records": stats.journal_records,
                    }),
                );
            }
            CacheAction::Clear => match cache.clear() {
                Ok(removed) => {
                    report.insert(tier.to_string(), serde_json::json!({ "removed": removed }));
                }
                Err(e) => {
                    eprintln!("✗ Failed to clear {} cache: {}", tier, e);
                    return ExitCode::FAILURE;
                }
            },
        }
    }

    match serde_json::to_string_pretty(&report) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
