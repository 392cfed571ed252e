//! # Colaborador de Backend
//! src/backend/mod.rs
//!
//! El puente no conoce el protocolo del backend; solo necesita abrir una
//! sesión, enviarle datos, leer lo pendiente, etiquetarla y cerrarla.
//!
//! ```text
//! Dispatcher ──open_session──▶ Backend
//!     │                           │
//!     └──send / poll / close ──▶ Session
//! ```
//!
//! Implementaciones:
//! - [`tcp::TcpBackend`]: cada sesión es una conexión TCP
//! - [`mock::MockBackend`]: sesiones en memoria que registran cada llamada

pub mod mock;
pub mod tcp;

pub use mock::MockBackend;
pub use tcp::TcpBackend;

use std::io;
use thiserror::Error;

/// Errores del backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// No se pudo resolver el destino
    #[error("unable to resolve {target}: {source}")]
    Resolve {
        target: String,
        #[source]
        source: io::Error,
    },

    /// Ninguna dirección del destino aceptó la conexión
    #[error("unable to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },

    /// Falla de I/O sobre una sesión abierta
    #[error("session I/O failed: {0}")]
    Io(#[from] io::Error),

    /// La sesión ya fue cerrada (por nosotros o por el peer)
    #[error("session is closed")]
    Closed,

    /// El backend rechazó la operación
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Una sesión abierta en el backend
///
/// `Send` porque el servidor completo puede moverse a otro thread.
pub trait Session: Send {
    /// Envía bytes por la sesión
    fn send(&mut self, data: &[u8]) -> Result<(), BackendError>;

    /// Retorna (y consume) hasta `limit` bytes pendientes, sin bloquear
    ///
    /// Lo que exceda `limit` queda para el próximo `poll`.
    fn poll(&mut self, limit: usize) -> Result<Vec<u8>, BackendError>;

    /// Cierra la sesión; llamar dos veces no tiene efecto
    fn close(&mut self);

    /// Asocia un dato de diagnóstico a la sesión
    fn tag(&mut self, key: &str, value: &str);
}

/// Referencia opaca a una sesión del backend
pub type SessionHandle = Box<dyn Session>;

/// Fábrica de sesiones
pub trait Backend {
    /// Abre una sesión contra `host:port`
    fn open_session(&mut self, host: &str, port: u16) -> Result<SessionHandle, BackendError>;
}
