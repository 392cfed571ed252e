//! # Backend TCP
//! src/backend/tcp.rs
//!
//! Cada sesión es una conexión TCP hacia el backend. El framing del
//! protocolo queda del lado del cliente HTTP: el puente solo mueve bytes.
//!
//! ## Thread lector
//!
//! El event loop del servidor es de un solo thread. Si `poll` leyera del
//! socket directamente, un backend lento lo dejaría colgado para todos.
//! El lector corre aparte, acumula lo recibido en un buzón y `poll`
//! solo vacía ese buzón.
//!
//! Las operaciones que sí corren en el loop están acotadas:
//! - conexión con `connect_timeout`
//! - escrituras con `write_timeout`
//! - `poll` entrega a lo sumo el `limit` pedido
//!
//! El buzón también tiene tope: pasado `inbox_capacity` el lector deja de
//! leer hasta que un `poll` lo vacíe, y el backend queda frenado por el
//! control de flujo de TCP.

use super::{Backend, BackendError, Session, SessionHandle};
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Tamaño de lectura del thread lector
const READ_BUFFER_SIZE: usize = 4096;

/// Bytes que el buzón acumula antes de frenar al lector
pub const DEFAULT_INBOX_CAPACITY: usize = 1024 * 1024;

/// Fábrica de sesiones TCP
#[derive(Debug, Clone)]
pub struct TcpBackend {
    connect_timeout: Duration,
    write_timeout: Duration,
    inbox_capacity: usize,
}

impl TcpBackend {
    pub fn new(connect_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            write_timeout,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
        }
    }

    /// Tope del buzón de cada sesión; el lector puede pasarlo en a lo sumo
    /// una lectura
    pub fn with_inbox_capacity(mut self, bytes: usize) -> Self {
        self.inbox_capacity = bytes.max(1);
        self
    }

    /// Prueba cada dirección resuelta hasta que una acepte
    fn connect(&self, target: &str, addrs: Vec<SocketAddr>) -> Result<TcpStream, BackendError> {
        let mut last_error = std::io::Error::new(ErrorKind::NotFound, "no addresses resolved");

        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(%addr, error = %e, "backend address refused");
                    last_error = e;
                }
            }
        }

        Err(BackendError::Connect {
            target: target.to_string(),
            source: last_error,
        })
    }
}

impl Backend for TcpBackend {
    fn open_session(&mut self, host: &str, port: u16) -> Result<SessionHandle, BackendError> {
        Ok(Box::new(self.open(host, port)?))
    }
}

impl TcpBackend {
    fn open(&self, host: &str, port: u16) -> Result<TcpSession, BackendError> {
        let target = format!("{}:{}", host, port);
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|source| BackendError::Resolve {
                target: target.clone(),
                source,
            })?
            .collect();

        let stream = self.connect(&target, addrs)?;
        stream.set_write_timeout(Some(self.write_timeout))?;
        stream.set_nodelay(true)?;

        let mailbox = Arc::new(Mailbox::default());
        let reader = spawn_reader(
            stream.try_clone()?,
            Arc::clone(&mailbox),
            self.inbox_capacity,
            &target,
        )?;

        debug!(backend = %target, "backend session connected");
        Ok(TcpSession {
            target,
            stream,
            mailbox,
            reader: Some(reader),
            tags: HashMap::new(),
            closed: false,
        })
    }
}

/// Datos recibidos del backend que todavía nadie pidió
#[derive(Debug, Default)]
struct Inbox {
    data: Vec<u8>,

    /// El peer cerró o la lectura falló
    finished: bool,

    /// Último error de lectura, si lo hubo
    error: Option<String>,

    /// La sesión se está cerrando; el lector debe terminar
    stopped: bool,
}

/// Buzón compartido entre la sesión y su lector
#[derive(Debug, Default)]
struct Mailbox {
    inbox: Mutex<Inbox>,

    /// Se avisa cuando `poll` libera espacio o la sesión se cierra
    drained: Condvar,
}

impl Mailbox {
    fn lock(&self) -> MutexGuard<'_, Inbox> {
        self.inbox.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bloquea al lector mientras el buzón esté lleno
    ///
    /// Retorna false si la sesión se cerró mientras tanto.
    fn wait_for_room(&self, capacity: usize) -> bool {
        let mut inbox = self.lock();
        while inbox.data.len() >= capacity && !inbox.stopped {
            inbox = self
                .drained
                .wait(inbox)
                .unwrap_or_else(|e| e.into_inner());
        }
        !inbox.stopped
    }
}

/// Lanza el thread que copia el socket al buzón hasta EOF, error o cierre
fn spawn_reader(
    mut stream: TcpStream,
    mailbox: Arc<Mailbox>,
    capacity: usize,
    target: &str,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("backend-reader-{}", target))
        .spawn(move || {
            let mut buffer = [0u8; READ_BUFFER_SIZE];
            while mailbox.wait_for_room(capacity) {
                match stream.read(&mut buffer) {
                    Ok(0) => {
                        mailbox.lock().finished = true;
                        break;
                    }
                    Ok(n) => mailbox.lock().data.extend_from_slice(&buffer[..n]),
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        let mut inbox = mailbox.lock();
                        inbox.finished = true;
                        inbox.error = Some(e.to_string());
                        break;
                    }
                }
            }
        })
}

/// Sesión TCP con su thread lector
pub struct TcpSession {
    target: String,
    stream: TcpStream,
    mailbox: Arc<Mailbox>,
    reader: Option<JoinHandle<()>>,
    tags: HashMap<String, String>,
    closed: bool,
}

impl TcpSession {
    /// Etiquetas asociadas a la sesión
    pub fn tags(&self) -> &HashMap<String, String> {
        &self.tags
    }

    /// Bytes recibidos que esperan un `poll`
    pub fn buffered(&self) -> usize {
        self.mailbox.lock().data.len()
    }
}

impl Session for TcpSession {
    fn send(&mut self, data: &[u8]) -> Result<(), BackendError> {
        if self.closed {
            return Err(BackendError::Closed);
        }
        self.stream.write_all(data)?;
        self.stream.flush()?;
        Ok(())
    }

    fn poll(&mut self, limit: usize) -> Result<Vec<u8>, BackendError> {
        if self.closed {
            return Err(BackendError::Closed);
        }

        let mut inbox = self.mailbox.lock();
        if !inbox.data.is_empty() {
            let take = inbox.data.len().min(limit);
            let chunk: Vec<u8> = inbox.data.drain(..take).collect();
            self.mailbox.drained.notify_one();
            return Ok(chunk);
        }
        if inbox.finished {
            return match inbox.error.take() {
                Some(message) => Err(BackendError::Unavailable(message)),
                None => Err(BackendError::Closed),
            };
        }
        Ok(Vec::new())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.mailbox.lock().stopped = true;
        self.mailbox.drained.notify_all();

        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            if e.kind() != ErrorKind::NotConnected {
                warn!(backend = %self.target, error = %e, "backend shutdown failed");
            }
        }
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!(backend = %self.target, "backend reader panicked");
            }
        }
        debug!(backend = %self.target, tags = ?self.tags, "backend session closed");
    }

    fn tag(&mut self, key: &str, value: &str) {
        debug!(backend = %self.target, key, value, "backend session tagged");
        self.tags.insert(key.to_string(), value.to_string());
    }
}

impl Drop for TcpSession {
    fn drop(&mut self) {
        self.close();
    }
}
