//! # Multiplexor de Conexiones
//! src/server/multiplexer.rs
//!
//! Event loop de un solo thread dirigido por readiness (`mio`):
//!
//! ```text
//! poll ──▶ listener listo ──▶ accept (no bloqueante) ──▶ tabla de conexiones
//!   │
//!   ├──▶ cliente listo ──▶ read ──▶ Request::parse ──▶ Dispatcher ──▶ Response ──▶ write
//!   │
//!   └──▶ error / EOF ──▶ cerrar transporte + sesión, quitar de la tabla
//! ```
//!
//! Todo lo que no es la espera de `poll` (parsing, dispatch, llamadas al
//! backend, escritura de la respuesta) corre hasta terminar antes de la
//! siguiente espera. Un backend lento frena a todos los clientes: por eso
//! las operaciones del backend TCP tienen timeouts y las lecturas del
//! backend ocurren en otro thread.
//!
//! La tabla de conexiones es la única estructura mutable compartida y solo
//! la tocan `accept_pending` (alta) y `close_connection` (baja).

use super::connection::{ClientConnection, RequestState};
use super::error::{CloseReason, ServerError, TransportError};
use crate::backend::Backend;
use crate::commands::{Command, Dispatcher};
use crate::config::Config;
use crate::http::Request;
use crate::metrics::BridgeMetrics;
use mio::event::Event;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Token del socket de escucha
const LISTENER: Token = Token(0);

/// Token del waker de apagado
const WAKER: Token = Token(1);

/// Primer token para clientes; los tokens nunca se reutilizan
const FIRST_CLIENT: usize = 2;

/// Eventos procesados por pasada
const EVENTS_CAPACITY: usize = 256;

/// Pide el apagado del servidor desde cualquier thread
#[derive(Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Marca el apagado y despierta al loop
    pub fn shutdown(&self) {
        self.requested.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            error!(error = %e, "failed to wake the event loop");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Puente HTTP: socket de escucha + conexiones cliente + dispatcher
pub struct Server<B> {
    config: Config,
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    connections: HashMap<Token, ClientConnection>,
    next_token: usize,
    dispatcher: Dispatcher<B>,
    metrics: BridgeMetrics,
    shutdown: ShutdownHandle,
}

impl<B: Backend> Server<B> {
    /// Valida la configuración, abre el socket de escucha y lo registra
    pub fn bind(config: Config, backend: B) -> Result<Self, ServerError> {
        config.validate().map_err(ServerError::InvalidConfig)?;

        let mut listener = TcpListener::from_std(bind_listener(&config)?);
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        let dispatcher = Dispatcher::new(backend, &config.backend_host, config.backend_port)
            .with_poll_limit(config.max_poll);

        Ok(Self {
            config,
            poll,
            listener,
            local_addr,
            connections: HashMap::new(),
            next_token: FIRST_CLIENT,
            dispatcher,
            metrics: BridgeMetrics::new(),
            shutdown: ShutdownHandle {
                requested: Arc::new(AtomicBool::new(false)),
                waker,
            },
        })
    }

    /// Dirección real de escucha (útil con puerto 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn metrics(&self) -> BridgeMetrics {
        self.metrics.clone()
    }

    pub fn dispatcher(&self) -> &Dispatcher<B> {
        &self.dispatcher
    }

    /// Conexiones cliente activas
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Corre el event loop hasta que se pida el apagado
    ///
    /// Ningún error de una conexión individual detiene el loop; solo una
    /// falla de `poll` en sí misma se propaga.
    pub fn run(&mut self) -> Result<(), ServerError> {
        info!(address = %self.local_addr, "bridge listening");
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        while !self.shutdown.is_shutdown() {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                self.close_all();
                return Err(e.into());
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept_pending(),
                    WAKER => debug!("event loop woken"),
                    token => self.service_client(token, event),
                }
            }
        }

        self.close_all();
        info!(metrics = %self.metrics.to_json(), "bridge stopped");
        Ok(())
    }

    /// Acepta todas las conexiones pendientes
    ///
    /// La notificación es por flanco: si quedara alguna en la cola de
    /// accept no llegaría otro evento para ella. Los sockets aceptados por
    /// `mio` ya son no bloqueantes; no se leen en esta misma pasada.
    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;

                    if let Err(e) =
                        self.poll
                            .registry()
                            .register(&mut stream, token, Interest::READABLE)
                    {
                        warn!(%peer, error = %e, "failed to register connection");
                        continue;
                    }

                    self.connections
                        .insert(token, ClientConnection::new(stream, peer));
                    self.metrics.record_accept();
                    info!(%peer, active = self.connections.len(), "connection accepted");
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %TransportError::AcceptFailed(e), "accept loop interrupted");
                    break;
                }
            }
        }
    }

    /// Atiende un socket cliente reportado como listo
    fn service_client(&mut self, token: Token, event: &Event) {
        if event.is_error() {
            self.close_connection(token, CloseReason::SocketError);
            return;
        }
        if !event.is_readable() && !event.is_read_closed() {
            return;
        }

        let chunk = self.config.read_chunk;
        let limit = self.config.max_request;
        let Some(connection) = self.connections.get_mut(&token) else {
            return;
        };

        let outcome = match connection.fill_buffer(chunk, limit) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.close_connection(token, e.into());
                return;
            }
        };
        debug!(peer = %connection.peer(), bytes = outcome.bytes, "data received");

        if let Err(reason) = self.process_buffer(token, outcome.peer_closed) {
            self.close_connection(token, reason);
            return;
        }
        if outcome.peer_closed {
            self.close_connection(token, TransportError::PeerClosed.into());
        }
    }

    /// Parsea lo acumulado y, si hay un request completo, lo despacha
    fn process_buffer(&mut self, token: Token, at_eof: bool) -> Result<(), CloseReason> {
        let Some(connection) = self.connections.get_mut(&token) else {
            return Ok(());
        };

        let request = match connection.take_request(self.config.max_request) {
            RequestState::Ready(request) => request,
            RequestState::Incomplete if at_eof && connection.has_pending() => {
                self.metrics.record_parse_error();
                return Err(CloseReason::IncompleteAtEof);
            }
            RequestState::Incomplete => return Ok(()),
            RequestState::Oversized => {
                self.metrics.record_parse_error();
                return Err(CloseReason::Oversized);
            }
            RequestState::Invalid(e) => {
                self.metrics.record_parse_error();
                error!(peer = %connection.peer(), error = %e, "failed to parse incoming data");
                return Err(e.into());
            }
        };

        let started = Instant::now();
        let had_session = connection.context().has_session();
        let response = self.dispatcher.dispatch(connection.context_mut(), &request);
        let has_session = connection.context().has_session();

        let command = command_kind(&request);
        if command == "new_connection" && response.status().is_success() {
            self.metrics.record_session_opened();
            if had_session {
                self.metrics.record_session_closed();
            }
        } else if had_session && !has_session {
            self.metrics.record_session_closed();
        }
        self.metrics
            .record_request(command, response.status().as_u16(), started.elapsed());

        connection
            .send(&response, self.config.write_timeout())
            .map_err(CloseReason::from)
    }

    /// Cierra el transporte, la sesión y quita la conexión de la tabla
    fn close_connection(&mut self, token: Token, reason: CloseReason) {
        let Some(connection) = self.connections.remove(&token) else {
            return;
        };

        let peer = connection.peer();
        let had_session = connection.close(self.poll.registry());

        if had_session {
            self.metrics.record_session_closed();
        }
        self.metrics.record_close();
        info!(%peer, %reason, had_session, "connection closed");
    }

    fn close_all(&mut self) {
        let tokens: Vec<Token> = self.connections.keys().copied().collect();
        for token in tokens {
            self.close_connection(token, CloseReason::Shutdown);
        }
    }
}

/// Tipo de comando para métricas
fn command_kind(request: &Request) -> &'static str {
    if request.body().is_empty() {
        "greeting"
    } else {
        Command::parse(request.body()).kind()
    }
}

/// Crea el socket de escucha con SO_REUSEADDR y el backlog configurado
fn bind_listener(config: &Config) -> Result<std::net::TcpListener, ServerError> {
    let address = config.address();
    let bind_error = |source| ServerError::Bind {
        address: address.clone(),
        source,
    };

    let addr = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(bind_error)?
        .next()
        .ok_or_else(|| bind_error(std::io::Error::new(ErrorKind::NotFound, "no address resolved")))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_error)?;
    socket.set_reuse_address(true).map_err(bind_error)?;
    socket.set_nonblocking(true).map_err(bind_error)?;
    socket.bind(&addr.into()).map_err(bind_error)?;
    socket.listen(config.backlog).map_err(bind_error)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::config::BackendKind;
    use std::io::{Read, Write};
    use std::net::{Shutdown, TcpStream};
    use std::thread;
    use std::time::Duration;

    fn test_config() -> Config {
        Config {
            port: 0,
            backend: BackendKind::Mock,
            ..Config::default()
        }
    }

    fn exchange(addr: SocketAddr, raw: &[u8]) -> String {
        let mut client = TcpStream::connect(addr).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        client.write_all(raw).unwrap();
        client.shutdown(Shutdown::Write).unwrap();

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).unwrap();
        String::from_utf8_lossy(&buf).into_owned()
    }

    #[test]
    fn test_bind_rejects_invalid_config() {
        let mut config = test_config();
        config.read_chunk = 0;

        let result = Server::bind(config, MockBackend::new());
        assert!(matches!(result, Err(ServerError::InvalidConfig(_))));
    }

    #[test]
    fn test_bind_reports_local_addr() {
        let server = Server::bind(test_config(), MockBackend::new()).unwrap();

        assert!(server.local_addr().ip().is_loopback());
        assert_ne!(server.local_addr().port(), 0);
        assert_eq!(server.connection_count(), 0);
    }

    #[test]
    fn test_shutdown_before_run_returns() {
        let mut server = Server::bind(test_config(), MockBackend::new()).unwrap();
        server.shutdown_handle().shutdown();

        assert!(server.run().is_ok());
    }

    #[test]
    fn test_greeting_roundtrip_and_shutdown() {
        let mut server = Server::bind(test_config(), MockBackend::new()).unwrap();
        let addr = server.local_addr();
        let handle = server.shutdown_handle();
        let metrics = server.metrics();

        let t = thread::spawn(move || server.run());

        let text = exchange(addr, b"GET /\r\nHost: x\r\n\r\n");
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("Hello there"));

        handle.shutdown();
        t.join().unwrap().unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_accepted, 1);
        assert_eq!(snapshot.connections_closed, 1);
        assert_eq!(snapshot.commands.get("greeting"), Some(&1));
    }

    #[test]
    fn test_invalid_method_closes_without_reply() {
        let mut server = Server::bind(test_config(), MockBackend::new()).unwrap();
        let addr = server.local_addr();
        let handle = server.shutdown_handle();
        let metrics = server.metrics();

        let t = thread::spawn(move || server.run());

        let text = exchange(addr, b"PUT / HTTP/1.1\r\n\r\n");
        assert!(text.is_empty());

        handle.shutdown();
        t.join().unwrap().unwrap();
        assert_eq!(metrics.snapshot().parse_errors, 1);
    }

    #[test]
    fn test_shutdown_closes_open_sessions() {
        let backend = MockBackend::new();
        let mut server = Server::bind(test_config(), backend.clone()).unwrap();
        let addr = server.local_addr();
        let handle = server.shutdown_handle();

        let t = thread::spawn(move || server.run());

        // Cliente que abre una sesión y se queda conectado
        let mut client = TcpStream::connect(addr).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        client
            .write_all(b"POST / HTTP/1.1\r\nContent-Length: 18\r\n\r\nnew connection bee")
            .unwrap();
        let mut buf = [0u8; 512];
        let n = client.read(&mut buf).unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("HTTP/1.1 200 OK"));

        handle.shutdown();
        t.join().unwrap().unwrap();

        assert_eq!(backend.opened(), vec![("bee".to_string(), 602)]);
        assert_eq!(backend.closes(0), 1);
    }
}
