//! offline-worker - serve a static site through the offline cache worker.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use url::Url;

use offline_worker::{
    AppConfig, CacheBackend, DiskCacheStorage, MemoryCacheStorage, ReqwestFetcher, StorageBackend,
    WorkerHost,
};

fn print_usage() {
    eprintln!("Usage: offline-worker [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <PATH>   Config file (default: {})", AppConfig::default_path().display());
    eprintln!("  --origin <URL>        Site origin to serve");
    eprintln!("  --cache-name <NAME>   Cache generation identifier");
    eprintln!("  --host <HOST>         Bind address (default: 127.0.0.1)");
    eprintln!("  --port <PORT>         Bind port (default: 9723)");
    eprintln!("  --cache-dir <PATH>    Directory for the on-disk cache");
    eprintln!("  --memory              Keep the cache in memory only");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Set RUST_LOG=debug to log every strategy decision.");
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {message}");
    std::process::exit(1);
}

fn value(args: &[String], i: usize, flag: &str) -> String {
    args.get(i)
        .cloned()
        .unwrap_or_else(|| fail(&format!("{flag} requires a value")))
}

/// Loads the config file, then applies command-line overrides.
fn parse_args() -> offline_worker::Result<AppConfig> {
    let args: Vec<String> = env::args().skip(1).collect();

    let mut config_path = AppConfig::default_path();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            "-c" | "--config" => {
                i += 1;
                config_path = PathBuf::from(value(&args, i, "--config"));
            }
            _ => {}
        }
        i += 1;
    }

    let mut config = AppConfig::load_or_default(&config_path)?;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--config" => i += 1,
            "--origin" => {
                i += 1;
                config.worker.origin = Url::parse(&value(&args, i, "--origin"))?;
            }
            "--cache-name" => {
                i += 1;
                config.worker.cache_name = value(&args, i, "--cache-name");
            }
            "--host" => {
                i += 1;
                config.server.host = value(&args, i, "--host");
            }
            "--port" => {
                i += 1;
                config.server.port = value(&args, i, "--port")
                    .parse()
                    .unwrap_or_else(|_| fail("--port must be a number between 0 and 65535"));
            }
            "--cache-dir" => {
                i += 1;
                config.storage.dir = PathBuf::from(value(&args, i, "--cache-dir"));
                config.storage.backend = StorageBackend::Disk;
            }
            "--memory" => config.storage.backend = StorageBackend::Memory,
            other => {
                print_usage();
                fail(&format!("unknown argument: {other}"));
            }
        }
        i += 1;
    }

    config.worker.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> offline_worker::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = parse_args()?;

    let caches = match config.storage.backend {
        StorageBackend::Memory => {
            log::info!("Using in-memory cache");
            CacheBackend::Memory(MemoryCacheStorage::new())
        }
        StorageBackend::Disk => {
            log::info!("Using on-disk cache at {}", config.storage.dir.display());
            CacheBackend::Disk(DiskCacheStorage::new(&config.storage.dir))
        }
    };
    let network = ReqwestFetcher::new(config.worker.origin.clone());
    let host = Arc::new(WorkerHost::new(Arc::new(caches), Arc::new(network)));

    let origin = config.worker.origin.clone();
    if let Err(e) = host.register(config.worker.clone()).await {
        log::error!("Worker not installed: {e}");
        if let Err(e) = host.resume(config.worker).await {
            log::warn!("Nothing cached to serve, passing requests through: {e}");
        }
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Received SIGINT");
        }
        signal.cancel();
    });

    offline_worker::server::run_server(
        host,
        origin,
        &config.server.host,
        config.server.port,
        shutdown,
    )
    .await
}
