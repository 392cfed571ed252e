//! # Módulo del Servidor
//! src/server/mod.rs
//!
//! Capa de red del puente:
//! 1. Escucha en un puerto (socket no bloqueante, SO_REUSEADDR)
//! 2. Multiplexa todas las conexiones en un solo thread con `mio`
//! 3. Acumula y parsea requests HTTP
//! 4. Despacha cada request y escribe la respuesta
//! 5. Cierra transporte y sesión de backend juntos

pub mod connection;
mod error;
pub mod multiplexer;

pub use error::{ServerError, TransportError};
pub use multiplexer::{Server, ShutdownHandle};
