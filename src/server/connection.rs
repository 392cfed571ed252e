//! # Conexión Cliente
//! src/server/connection.rs
//!
//! Un socket aceptado, su dirección remota, el buffer donde se acumula el
//! request en curso y el [`ClientContext`] con la sesión de backend.
//!
//! Un request HTTP no tiene por qué llegar en una sola lectura: los bytes
//! se acumulan hasta que el parser encuentra un request completo.
//!
//! Las respuestas se escriben sobre el socket no bloqueante; si el kernel
//! no acepta todo de una vez, el resto se escribe en modo bloqueante con
//! el timeout de escritura como tope.

use super::error::TransportError;
use crate::commands::ClientContext;
use crate::http::{ParseError, Request, Response};
use mio::net::TcpStream;
use mio::Registry;
use socket2::SockRef;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;
use tracing::debug;

/// Resultado de vaciar el socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Bytes leídos en esta pasada
    pub bytes: usize,

    /// El peer cerró su lado (lectura de cero bytes)
    pub peer_closed: bool,
}

/// Estado del buffer acumulado
#[derive(Debug)]
pub enum RequestState {
    /// Faltan bytes
    Incomplete,

    /// Hay un request completo; el buffer quedó vacío
    Ready(Request),

    /// El parser rechazó el request
    Invalid(ParseError),

    /// Se superó el límite sin completar un request
    Oversized,
}

/// Conexión cliente activa
pub struct ClientConnection {
    stream: TcpStream,
    buffer: Vec<u8>,
    context: ClientContext,
}

impl ClientConnection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            context: ClientContext::new(peer),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.context.peer()
    }

    pub fn context(&self) -> &ClientContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ClientContext {
        &mut self.context
    }

    /// Indica si hay bytes de un request sin completar
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Lee en bloques de `chunk` bytes hasta `WouldBlock`, EOF o `limit`
    ///
    /// El socket es no bloqueante y la notificación es por flanco, así que
    /// hay que vaciarlo en cada evento.
    pub fn fill_buffer(&mut self, chunk: usize, limit: usize) -> Result<ReadOutcome, TransportError> {
        let mut outcome = ReadOutcome {
            bytes: 0,
            peer_closed: false,
        };
        let mut block = vec![0u8; chunk];

        while self.buffer.len() <= limit {
            match self.stream.read(&mut block) {
                Ok(0) => {
                    outcome.peer_closed = true;
                    break;
                }
                Ok(n) => {
                    self.buffer.extend_from_slice(&block[..n]);
                    outcome.bytes += n;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::ReadFailed(e)),
            }
        }

        Ok(outcome)
    }

    /// Intenta sacar un request completo del buffer
    ///
    /// Pasado `limit` el buffer puede estar truncado (`fill_buffer` deja de
    /// leer ahí), así que nunca se despacha aunque parsee.
    pub fn take_request(&mut self, limit: usize) -> RequestState {
        if self.buffer.is_empty() {
            return RequestState::Incomplete;
        }
        if self.buffer.len() > limit {
            return RequestState::Oversized;
        }

        match Request::parse(&self.buffer) {
            Ok(request) if request.is_body_incomplete() => RequestState::Incomplete,
            Ok(request) => {
                self.buffer.clear();
                RequestState::Ready(request)
            }
            Err(e) if e.is_incomplete() => RequestState::Incomplete,
            Err(e) => RequestState::Invalid(e),
        }
    }

    /// Escribe una respuesta completa, esperando a lo sumo `timeout` si el
    /// socket se llena
    pub fn send(&mut self, response: &Response, timeout: Duration) -> Result<(), TransportError> {
        let mut writer = ReplyWriter {
            stream: &mut self.stream,
            timeout,
            blocking: false,
        };
        response
            .write_to(&mut writer)
            .map_err(TransportError::WriteFailed)
    }

    /// Cierra el transporte y la sesión asociada
    ///
    /// Retorna si había una sesión de backend abierta.
    pub fn close(mut self, registry: &Registry) -> bool {
        let peer = self.peer();
        if let Err(e) = registry.deregister(&mut self.stream) {
            debug!(%peer, error = %e, "deregister failed");
        }
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!(%peer, error = %e, "client shutdown failed");
        }
        self.context.close_session()
    }
}

/// Escritor de respuestas sobre el socket no bloqueante
///
/// Ante el primer `WouldBlock` pasa el socket a modo bloqueante con
/// `SO_SNDTIMEO = timeout`; al soltarse lo devuelve a no bloqueante.
struct ReplyWriter<'a> {
    stream: &'a mut TcpStream,
    timeout: Duration,
    blocking: bool,
}

impl ReplyWriter<'_> {
    fn switch_to_blocking(&mut self) -> io::Result<()> {
        let socket = SockRef::from(&*self.stream);
        socket.set_write_timeout(Some(self.timeout))?;
        socket.set_nonblocking(false)?;
        self.blocking = true;
        Ok(())
    }
}

impl Write for ReplyWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match self.stream.write(buf) {
                Err(e) if e.kind() == ErrorKind::WouldBlock && !self.blocking => {
                    self.switch_to_blocking()?;
                }
                other => return other,
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Drop for ReplyWriter<'_> {
    fn drop(&mut self) {
        if self.blocking {
            if let Err(e) = SockRef::from(&*self.stream).set_nonblocking(true) {
                debug!(error = %e, "failed to restore non-blocking mode");
            }
        }
    }
}
