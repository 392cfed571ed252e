//! Errores del servidor y motivos de cierre de una conexión.

use crate::http::ParseError;
use std::io;
use thiserror::Error;

/// Fallas de transporte de una conexión cliente
///
/// Ninguna es fatal para el proceso: a lo sumo cierran esa conexión.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] io::Error),

    #[error("read failed: {0}")]
    ReadFailed(#[source] io::Error),

    #[error("write failed: {0}")]
    WriteFailed(#[source] io::Error),

    #[error("peer closed the connection")]
    PeerClosed,
}

/// Errores al arrancar el servidor
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unable to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Por qué se cierra una conexión
#[derive(Debug, Error)]
pub(crate) enum CloseReason {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("socket reported an error condition")]
    SocketError,

    #[error("invalid request: {0}")]
    InvalidRequest(#[from] ParseError),

    #[error("request incomplete when the peer closed")]
    IncompleteAtEof,

    #[error("request exceeds the size limit")]
    Oversized,

    #[error("server shutting down")]
    Shutdown,
}
