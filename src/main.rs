//! # HTTP Bridge - Entry Point
//! src/main.rs
//!
//! Lee la configuración, inicializa el logging, abre el puerto y corre el
//! event loop hasta recibir SIGINT o SIGTERM.

use http_bridge::backend::{Backend, MockBackend, TcpBackend};
use http_bridge::config::{BackendKind, Config};
use http_bridge::server::Server;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::process;
use std::thread;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    let config = Config::new();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "http bridge starting");

    if let Err(e) = config.validate() {
        error!(error = %e, "invalid configuration");
        process::exit(1);
    }
    config.log_summary();

    let result = match config.backend {
        BackendKind::Tcp => {
            let backend = TcpBackend::new(config.connect_timeout(), config.write_timeout())
                .with_inbox_capacity(config.backend_buffer);
            run_bridge(config, backend)
        }
        BackendKind::Mock => run_bridge(config, MockBackend::new()),
    };

    if let Err(e) = result {
        error!(error = %e, "fatal error");
        process::exit(1);
    }
}

/// Abre el servidor, instala el manejo de señales y bloquea hasta el apagado
fn run_bridge<B: Backend>(config: Config, backend: B) -> Result<(), Box<dyn std::error::Error>> {
    let mut server = Server::bind(config, backend)?;
    let handle = server.shutdown_handle();

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::Builder::new()
        .name("signal-listener".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!(signal, "shutdown requested");
                handle.shutdown();
            }
        })?;

    server.run()?;
    Ok(())
}
