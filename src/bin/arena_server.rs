//! Arena Server
//!
//! Runs the reference arena with in-memory storage and a TCP observer feed.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use log::{error, info, warn};

use arena_core::arena::{Arena, ArenaConfig, BuiltinLoader};
use arena_core::orchestrator::ShutdownHandle;
use arena_core::schedule::MonotonicClock;
use arena_core::storage::InMemoryStorage;
use arena_core::transport::TcpTransport;
use arena_core::{Orchestrator, ServerConfig};

fn parse_args(mut config: ServerConfig) -> ServerConfig {
    let args: Vec<String> = std::env::args().collect();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    config.port = args[i + 1].parse().unwrap_or_else(|_| {
                        eprintln!("error: invalid port number: {}", args[i + 1]);
                        std::process::exit(1);
                    });
                    i += 2;
                } else {
                    eprintln!("error: --port requires a value");
                    std::process::exit(1);
                }
            }
            "--fps" | "-f" => {
                if i + 1 < args.len() {
                    config.frames_per_second = args[i + 1].parse().unwrap_or_else(|_| {
                        eprintln!("error: invalid frame rate: {}", args[i + 1]);
                        std::process::exit(1);
                    });
                    i += 2;
                } else {
                    eprintln!("error: --fps requires a value");
                    std::process::exit(1);
                }
            }
            "--seed" | "-s" => {
                if i + 1 < args.len() {
                    config.seed_path = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    eprintln!("error: --seed requires a value");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                println!("arena-server - Real-time simulation server");
                println!();
                println!("USAGE:");
                println!("    arena-server [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -p, --port <PORT>     Observer port [default: 9010]");
                println!("    -f, --fps <FPS>       Frames per second [default: 60]");
                println!("    -s, --seed <FILE>     JSON seed for the in-memory storage");
                println!("    -h, --help            Print help information");
                println!();
                println!("ENVIRONMENT:");
                println!("    ARENA_PORT, ARENA_FPS, ARENA_STARTUP_WORKERS, ARENA_SEED,");
                println!("    ARENA_STREAM_STATS_MS, ARENA_STORAGE_STATS_MS, ARENA_RECONCILE_MS");
                std::process::exit(0);
            }
            arg => {
                eprintln!("error: unknown argument: {}", arg);
                std::process::exit(1);
            }
        }
    }

    config
}

/// Requests a graceful shutdown on the first Ctrl+C.
fn watch_ctrl_c(handle: ShutdownHandle) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    thread::Builder::new().name("arena-signal".to_string()).spawn(move || {
        runtime.block_on(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Ctrl+C received, draining entities");
                    handle.request();
                }
                Err(e) => warn!("could not listen for Ctrl+C: {e}"),
            }
        });
    })?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = parse_args(ServerConfig::from_env()?);
    config.validate()?;

    info!("Arena Server v{}", env!("CARGO_PKG_VERSION"));

    let storage = match &config.seed_path {
        Some(path) => {
            info!("Seeding storage from {}", path.display());
            InMemoryStorage::from_seed_file(path)?
        }
        None => InMemoryStorage::new(),
    };

    let arena_config = ArenaConfig {
        frames_per_second: config.frames_per_second,
        ..ArenaConfig::default()
    };
    let arena = Arena::new(arena_config, &config.pipeline(), BuiltinLoader)?;

    let mut server = Orchestrator::new(config, arena, Arc::new(storage), TcpTransport::new(), MonotonicClock);
    watch_ctrl_c(server.shutdown_handle())?;

    info!("Press Ctrl+C to stop");
    if let Err(e) = server.run() {
        error!("server failed: {e}");
        return Err(e.into());
    }

    info!("Shut down");
    Ok(())
}
