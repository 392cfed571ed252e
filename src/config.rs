//! # Configuración del Puente
//! src/config.rs
//!
//! Configuración por argumentos CLI y variables de entorno.
//!
//! ## Ejemplos de uso
//!
//! ### CLI
//! ```bash
//! ./http_bridge --port 8443 \
//!   --backend-host beep.local \
//!   --backend-port 602 \
//!   --connect-timeout-ms 2000
//! ```
//!
//! ### Variables de entorno
//! ```bash
//! BRIDGE_PORT=8443 BRIDGE_BACKEND=mock ./http_bridge
//! ```

use clap::{Parser, ValueEnum};
use std::time::Duration;
use tracing::info;

/// Tipo de backend al que se conectan las sesiones
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Conexiones TCP reales
    Tcp,
    /// Backend en memoria con eco (desarrollo y pruebas)
    Mock,
}

/// Configuración del puente HTTP
#[derive(Debug, Clone, Parser)]
#[command(name = "http_bridge")]
#[command(about = "Puente HTTP/1.x hacia sesiones de un protocolo de backend")]
#[command(version)]
pub struct Config {
    /// Host/IP en el que escucha
    #[arg(long, default_value = "127.0.0.1", env = "BRIDGE_HOST")]
    pub host: String,

    /// Puerto en el que escucha el puente
    #[arg(short, long, default_value = "443", env = "BRIDGE_PORT")]
    pub port: u16,

    /// Backlog del socket de escucha
    #[arg(long, default_value = "5", env = "BRIDGE_BACKLOG")]
    pub backlog: i32,

    // === Lectura de requests ===

    /// Bytes por llamada a read
    #[arg(long = "read-chunk", default_value = "1024", env = "BRIDGE_READ_CHUNK")]
    pub read_chunk: usize,

    /// Máximo de bytes acumulados por request antes de cerrar la conexión
    #[arg(long = "max-request", default_value = "65536", env = "BRIDGE_MAX_REQUEST")]
    pub max_request: usize,

    // === Backend ===

    /// Tipo de backend
    #[arg(long, value_enum, default_value = "tcp", env = "BRIDGE_BACKEND")]
    pub backend: BackendKind,

    /// Host del backend cuando `new connection` no trae destino
    #[arg(long = "backend-host", default_value = "localhost", env = "BRIDGE_BACKEND_HOST")]
    pub backend_host: String,

    /// Puerto del backend cuando el destino no trae puerto
    #[arg(long = "backend-port", default_value = "602", env = "BRIDGE_BACKEND_PORT")]
    pub backend_port: u16,

    /// Timeout para abrir una sesión (milisegundos)
    #[arg(long = "connect-timeout-ms", default_value = "5000", env = "BRIDGE_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: u64,

    /// Timeout de escritura, hacia el backend y hacia el cliente (milisegundos)
    #[arg(long = "write-timeout-ms", default_value = "5000", env = "BRIDGE_WRITE_TIMEOUT_MS")]
    pub write_timeout_ms: u64,

    /// Máximo de bytes devueltos por cada `poll data`
    #[arg(long = "max-poll", default_value = "65536", env = "BRIDGE_MAX_POLL")]
    pub max_poll: usize,

    /// Bytes que una sesión TCP acumula sin leer antes de frenar al backend
    #[arg(long = "backend-buffer", default_value = "1048576", env = "BRIDGE_BACKEND_BUFFER")]
    pub backend_buffer: usize,

    // === Logging ===

    /// Filtro de tracing cuando RUST_LOG no está definido
    #[arg(long = "log-level", default_value = "info", env = "BRIDGE_LOG")]
    pub log_level: String,
}

impl Config {
    /// Crea una nueva configuración parseando argumentos CLI y entorno
    pub fn new() -> Self {
        Config::parse()
    }

    /// Obtiene la dirección completa para bind (host:port)
    ///
    /// # Ejemplo
    /// ```rust
    /// use http_bridge::config::Config;
    ///
    /// let config = Config::default();
    /// assert_eq!(config.address(), "127.0.0.1:443");
    /// ```
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Valida la configuración
    ///
    /// Retorna errores si hay valores inválidos
    pub fn validate(&self) -> Result<(), String> {
        if self.backlog <= 0 {
            return Err("Backlog must be >= 1".to_string());
        }
        if self.read_chunk == 0 {
            return Err("Read chunk must be >= 1".to_string());
        }
        if self.max_request < self.read_chunk {
            return Err("Max request must be >= read chunk".to_string());
        }
        if self.backend_port == 0 {
            return Err("Backend port must be > 0".to_string());
        }
        if self.connect_timeout_ms == 0 {
            return Err("Connect timeout must be > 0".to_string());
        }
        if self.write_timeout_ms == 0 {
            return Err("Write timeout must be > 0".to_string());
        }
        if self.max_poll == 0 {
            return Err("Max poll must be >= 1".to_string());
        }
        if self.backend_buffer < self.max_poll {
            return Err("Backend buffer must be >= max poll".to_string());
        }

        Ok(())
    }

    /// Registra un resumen de la configuración
    pub fn log_summary(&self) {
        info!(
            address = %self.address(),
            backlog = self.backlog,
            read_chunk = self.read_chunk,
            max_request = self.max_request,
            "listener configuration"
        );
        info!(
            kind = ?self.backend,
            default_target = %format!("{}:{}", self.backend_host, self.backend_port),
            connect_timeout_ms = self.connect_timeout_ms,
            write_timeout_ms = self.write_timeout_ms,
            max_poll = self.max_poll,
            backend_buffer = self.backend_buffer,
            "backend configuration"
        );
    }
}

impl Default for Config {
    /// Configuración por defecto
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 443,
            backlog: 5,
            read_chunk: 1024,
            max_request: 65_536,
            backend: BackendKind::Tcp,
            backend_host: "localhost".to_string(),
            backend_port: 602,
            connect_timeout_ms: 5_000,
            write_timeout_ms: 5_000,
            max_poll: 65_536,
            backend_buffer: 1_048_576,
            log_level: "info".to_string(),
        }
    }
}
