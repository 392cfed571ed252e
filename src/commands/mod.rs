//! # Comandos del Puente
//! src/commands/mod.rs
//!
//! El body de cada request lleva, como texto, uno de cuatro comandos:
//!
//! | Prefijo | Comando | Argumento |
//! |---|---|---|
//! | `new connection ` | [`Command::NewConnection`] | destino `host[:port]` |
//! | `close connection ` | [`Command::CloseConnection`] | (ignorado) |
//! | `push data ` | [`Command::PushData`] | bytes a enviar |
//! | `poll data ` | [`Command::PollData`] | (ignorado) |
//!
//! Los prefijos se prueban en ese orden y gana el primero que coincide.

pub mod dispatcher;

pub use dispatcher::{ClientContext, DispatchError, Dispatcher};

const NEW_CONNECTION: &[u8] = b"new connection ";
const CLOSE_CONNECTION: &[u8] = b"close connection ";
const PUSH_DATA: &[u8] = b"push data ";
const POLL_DATA: &[u8] = b"poll data ";

/// Comando reconocido en el body, con su argumento
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// Abrir una sesión en el backend
    NewConnection(&'a [u8]),

    /// Cerrar la sesión asociada
    CloseConnection,

    /// Enviar datos por la sesión asociada
    PushData(&'a [u8]),

    /// Traer los datos pendientes de la sesión asociada
    PollData,

    /// Ningún prefijo coincidió
    Unknown,
}

impl<'a> Command<'a> {
    /// Reconoce el comando por prefijo
    ///
    /// # Ejemplo
    /// ```
    /// use http_bridge::commands::Command;
    ///
    /// assert_eq!(Command::parse(b"push data hola"), Command::PushData(b"hola"));
    /// assert_eq!(Command::parse(b"poll data "), Command::PollData);
    /// assert_eq!(Command::parse(b"hello"), Command::Unknown);
    /// ```
    pub fn parse(body: &'a [u8]) -> Self {
        if let Some(target) = body.strip_prefix(NEW_CONNECTION) {
            Command::NewConnection(target)
        } else if body.starts_with(CLOSE_CONNECTION) {
            Command::CloseConnection
        } else if let Some(data) = body.strip_prefix(PUSH_DATA) {
            Command::PushData(data)
        } else if body.starts_with(POLL_DATA) {
            Command::PollData
        } else {
            Command::Unknown
        }
    }

    /// Nombre corto para logs y métricas
    pub fn kind(&self) -> &'static str {
        match self {
            Command::NewConnection(_) => "new_connection",
            Command::CloseConnection => "close_connection",
            Command::PushData(_) => "push_data",
            Command::PollData => "poll_data",
            Command::Unknown => "unknown",
        }
    }

    /// Indica si el comando opera sobre una sesión ya abierta
    pub fn requires_session(&self) -> bool {
        matches!(
            self,
            Command::CloseConnection | Command::PushData(_) | Command::PollData
        )
    }
}
