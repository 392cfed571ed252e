//! # Dispatcher de Comandos
//! src/commands/dispatcher.rs
//!
//! Interpreta el body de un [`Request`] como un [`Command`] y lo ejecuta
//! contra el backend. Siempre produce una [`Response`]: incluso un comando
//! desconocido recibe el saludo, para no dejar al cliente esperando.
//!
//! ```text
//! Request → Command::parse → execute → Response
//!                                │
//!                                └── Backend / Session
//! ```

use super::Command;
use crate::backend::{Backend, BackendError, SessionHandle};
use crate::http::{Request, Response, StatusCode};
use std::net::SocketAddr;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Etiqueta con la que se marca la sesión con la dirección del cliente
pub const SOURCE_TAG: &str = "source_ip";

/// Máximo de bytes que devuelve un `poll data` si no se configura otro
pub const DEFAULT_POLL_LIMIT: usize = 64 * 1024;

/// Errores al ejecutar un comando
#[derive(Debug, Error)]
pub enum DispatchError {
    /// El comando necesita una sesión y la conexión no tiene
    #[error("no active backend session for this connection")]
    NoActiveSession,

    /// El backend falló al abrir o usar la sesión
    #[error("backend failure: {0}")]
    BackendFailure(#[from] BackendError),

    /// Ningún prefijo de comando coincidió
    #[error("no command request was received")]
    UnknownCommand,

    /// El destino de `new connection` no se pudo interpretar
    #[error("invalid connection target: {0}")]
    InvalidTarget(String),
}

impl DispatchError {
    /// Respuesta HTTP que ve el cliente para este error
    pub fn to_response(&self) -> Response {
        match self {
            DispatchError::NoActiveSession => Response::new(StatusCode::Conflict)
                .with_reason("No active session")
                .with_body(&self.to_string()),
            DispatchError::BackendFailure(_) => Response::new(StatusCode::NotFound)
                .with_reason("Connection failed")
                .with_body(&format!("Unable to use backend session: {}", self)),
            DispatchError::UnknownCommand => Response::greeting(),
            DispatchError::InvalidTarget(_) => {
                Response::new(StatusCode::BadRequest).with_body(&self.to_string())
            }
        }
    }
}

/// Estado del cliente que le importa al dispatcher
///
/// La sesión es propiedad de la conexión: el dispatcher solo la abre,
/// la usa y la cierra a pedido del cliente.
pub struct ClientContext {
    peer: SocketAddr,
    session: Option<SessionHandle>,
}

impl ClientContext {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            session: None,
        }
    }

    /// Dirección remota del cliente
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Indica si hay una sesión asociada
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Asocia una sesión, cerrando la anterior si existía
    pub fn attach(&mut self, session: SessionHandle) {
        self.close_session();
        self.session = Some(session);
    }

    /// Cierra y suelta la sesión; retorna si había una
    ///
    /// `take()` garantiza que una sesión se cierra una sola vez.
    pub fn close_session(&mut self) -> bool {
        match self.session.take() {
            Some(mut session) => {
                session.close();
                debug!(peer = %self.peer, "backend session closed");
                true
            }
            None => false,
        }
    }

    fn session_mut(&mut self) -> Result<&mut SessionHandle, DispatchError> {
        self.session.as_mut().ok_or(DispatchError::NoActiveSession)
    }
}

/// Ejecuta comandos contra un backend
pub struct Dispatcher<B> {
    backend: B,
    default_host: String,
    default_port: u16,
    poll_limit: usize,
}

impl<B: Backend> Dispatcher<B> {
    /// Crea un dispatcher; `default_host`/`default_port` se usan cuando
    /// `new connection` no trae destino completo
    pub fn new(backend: B, default_host: &str, default_port: u16) -> Self {
        Self {
            backend,
            default_host: default_host.to_string(),
            default_port,
            poll_limit: DEFAULT_POLL_LIMIT,
        }
    }

    /// Tope de bytes por respuesta a `poll data`; el resto queda en la sesión
    pub fn with_poll_limit(mut self, bytes: usize) -> Self {
        self.poll_limit = bytes.max(1);
        self
    }

    /// Acceso al backend (útil para inspeccionarlo en tests)
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Procesa un request y retorna la respuesta para el cliente
    pub fn dispatch(&mut self, client: &mut ClientContext, request: &Request) -> Response {
        if request.body().is_empty() {
            return Response::greeting();
        }

        let command = Command::parse(request.body());
        match self.execute(client, command) {
            Ok(response) => {
                info!(
                    peer = %client.peer(),
                    command = command.kind(),
                    status = response.status().as_u16(),
                    "command dispatched"
                );
                response
            }
            Err(DispatchError::UnknownCommand) => {
                warn!(peer = %client.peer(), "no command request was received");
                DispatchError::UnknownCommand.to_response()
            }
            Err(e) => {
                warn!(peer = %client.peer(), command = command.kind(), error = %e, "command failed");
                e.to_response()
            }
        }
    }

    /// Ejecuta un comando ya reconocido
    pub fn execute(
        &mut self,
        client: &mut ClientContext,
        command: Command<'_>,
    ) -> Result<Response, DispatchError> {
        if command.requires_session() && !client.has_session() {
            return Err(DispatchError::NoActiveSession);
        }

        match command {
            Command::NewConnection(target) => self.new_connection(client, target),
            Command::CloseConnection => {
                client.close_session();
                Ok(Response::ok_text("OK"))
            }
            Command::PushData(data) => {
                let result = client.session_mut()?.send(data);
                Self::check_session(client, result)?;
                Ok(Response::ok_text("OK"))
            }
            Command::PollData => {
                let result = client.session_mut()?.poll(self.poll_limit);
                let data = Self::check_session(client, result)?;
                Ok(Response::new(StatusCode::Ok).with_body_bytes(data))
            }
            Command::Unknown => Err(DispatchError::UnknownCommand),
        }
    }

    /// Abre una sesión y la asocia al cliente
    fn new_connection(
        &mut self,
        client: &mut ClientContext,
        target: &[u8],
    ) -> Result<Response, DispatchError> {
        let (host, port) = parse_target(target, &self.default_host, self.default_port)?;

        // La sesión anterior se cierra antes de abrir la nueva
        client.close_session();

        let mut session = self.backend.open_session(&host, port)?;
        session.tag(SOURCE_TAG, &client.peer().to_string());
        client.attach(session);

        info!(peer = %client.peer(), %host, port, "backend session opened");
        Ok(Response::ok_text("OK"))
    }

    /// Si la sesión falló se cierra y se suelta: ya no sirve
    fn check_session<T>(
        client: &mut ClientContext,
        result: Result<T, BackendError>,
    ) -> Result<T, DispatchError> {
        result.map_err(|e| {
            client.close_session();
            DispatchError::BackendFailure(e)
        })
    }
}

/// Interpreta `host[:port]`, con `[v6]:port` y valores por defecto
fn parse_target(
    raw: &[u8],
    default_host: &str,
    default_port: u16,
) -> Result<(String, u16), DispatchError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| DispatchError::InvalidTarget("target is not valid UTF-8".to_string()))?
        .trim();

    if text.is_empty() {
        return Ok((default_host.to_string(), default_port));
    }

    let (host, port) = if let Some(rest) = text.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| DispatchError::InvalidTarget(text.to_string()))?;
        match tail.strip_prefix(':') {
            Some(port) => (host, Some(port)),
            None if tail.is_empty() => (host, None),
            None => return Err(DispatchError::InvalidTarget(text.to_string())),
        }
    } else {
        match text.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (text, None),
        }
    };

    let host = if host.is_empty() { default_host } else { host };
    let port = match port {
        None | Some("") => default_port,
        Some(port) => port
            .parse::<u16>()
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| DispatchError::InvalidTarget(text.to_string()))?,
    };

    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn dispatcher() -> (Dispatcher<MockBackend>, MockBackend) {
        let backend = MockBackend::new();
        (Dispatcher::new(backend.clone(), "localhost", 602), backend)
    }

    fn post(body: &[u8]) -> Request {
        let mut raw = b"POST / HTTP/1.1\r\nHost: x\r\n\r\n".to_vec();
        raw.extend_from_slice(body);
        Request::parse(&raw).unwrap()
    }

    #[test]
    fn test_empty_body_greets() {
        let (mut dispatcher, backend) = dispatcher();
        let mut client = ClientContext::new(peer());
        let request = Request::parse(b"GET /\r\nHost: x\r\n\r\n").unwrap();

        let response = dispatcher.dispatch(&mut client, &request);

        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.body(), b"Hello there");
        assert_eq!(response.content_type(), "text/html");
        assert!(backend.opened().is_empty());
    }

    #[test]
    fn test_new_connection_attaches_session() {
        let (mut dispatcher, backend) = dispatcher();
        let mut client = ClientContext::new(peer());

        let response = dispatcher.dispatch(&mut client, &post(b"new connection somehost"));

        assert_eq!(response.status(), StatusCode::Ok);
        assert!(client.has_session());
        assert_eq!(backend.opened(), vec![("somehost".to_string(), 602)]);
        assert_eq!(
            backend.tags(),
            vec![(SOURCE_TAG.to_string(), "127.0.0.1:40000".to_string())]
        );
    }

    #[test]
    fn test_new_connection_failure() {
        let (mut dispatcher, backend) = dispatcher();
        backend.set_fail_open(true);
        let mut client = ClientContext::new(peer());

        let response = dispatcher.dispatch(&mut client, &post(b"new connection somehost"));

        assert_eq!(response.status(), StatusCode::NotFound);
        assert_eq!(response.status_line(), "404 Connection failed");
        assert_eq!(response.content_type(), "text/html");
        assert!(!client.has_session());
    }

    #[test]
    fn test_new_connection_replaces_session() {
        let (mut dispatcher, backend) = dispatcher();
        let mut client = ClientContext::new(peer());

        dispatcher.dispatch(&mut client, &post(b"new connection a"));
        dispatcher.dispatch(&mut client, &post(b"new connection b:700"));

        assert_eq!(backend.closes(0), 1);
        assert_eq!(backend.closes(1), 0);
        assert_eq!(backend.opened()[1], ("b".to_string(), 700));
    }

    #[test]
    fn test_invalid_target() {
        let (mut dispatcher, backend) = dispatcher();
        let mut client = ClientContext::new(peer());

        let response = dispatcher.dispatch(&mut client, &post(b"new connection host:abc"));

        assert_eq!(response.status(), StatusCode::BadRequest);
        assert!(backend.opened().is_empty());
    }

    #[test]
    fn test_push_without_session() {
        let (mut dispatcher, backend) = dispatcher();
        let mut client = ClientContext::new(peer());

        let response = dispatcher.dispatch(&mut client, &post(b"push data hello"));

        assert_eq!(response.status(), StatusCode::Conflict);
        assert_eq!(response.content_type(), "text/html");
        assert!(backend.sent().is_empty());
    }

    #[test]
    fn test_close_and_poll_without_session() {
        let (mut dispatcher, backend) = dispatcher();
        let mut client = ClientContext::new(peer());

        for body in [&b"close connection "[..], &b"poll data "[..]] {
            let result = dispatcher.execute(&mut client, Command::parse(body));
            assert!(matches!(result, Err(DispatchError::NoActiveSession)));
        }
        assert_eq!(backend.polls(), 0);
    }

    #[test]
    fn test_push_then_poll() {
        let (mut dispatcher, backend) = dispatcher();
        let mut client = ClientContext::new(peer());
        dispatcher.dispatch(&mut client, &post(b"new connection somehost"));

        let response = dispatcher.dispatch(&mut client, &post(b"push data hello"));
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(backend.sent(), vec![b"hello".to_vec()]);

        let response = dispatcher.dispatch(&mut client, &post(b"poll data "));
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.body(), b"hello");
        assert_eq!(response.content_type(), "application/octet-stream");
    }

    #[test]
    fn test_poll_is_capped() {
        let backend = MockBackend::new();
        let mut dispatcher = Dispatcher::new(backend.clone(), "localhost", 602).with_poll_limit(4);
        let mut client = ClientContext::new(peer());
        dispatcher.dispatch(&mut client, &post(b"new connection somehost"));
        backend.inject(0, b"abcdefghij");

        let bodies: Vec<Vec<u8>> = (0..4)
            .map(|_| {
                dispatcher
                    .dispatch(&mut client, &post(b"poll data "))
                    .body()
                    .to_vec()
            })
            .collect();

        assert_eq!(bodies, [&b"abcd"[..], b"efgh", b"ij", b""]);
        assert!(client.has_session());
    }

    #[test]
    fn test_close_connection() {
        let (mut dispatcher, backend) = dispatcher();
        let mut client = ClientContext::new(peer());
        dispatcher.dispatch(&mut client, &post(b"new connection somehost"));

        let response = dispatcher.dispatch(&mut client, &post(b"close connection "));

        assert_eq!(response.status(), StatusCode::Ok);
        assert!(!client.has_session());
        assert_eq!(backend.closes(0), 1);
    }

    #[test]
    fn test_backend_failure_detaches_session() {
        let (mut dispatcher, backend) = dispatcher();
        let mut client = ClientContext::new(peer());
        dispatcher.dispatch(&mut client, &post(b"new connection somehost"));
        backend.set_fail_io(true);

        let response = dispatcher.dispatch(&mut client, &post(b"push data hello"));

        assert_eq!(response.status(), StatusCode::NotFound);
        assert!(!client.has_session());
        assert_eq!(backend.closes(0), 1);
    }

    #[test]
    fn test_unknown_command_still_answers() {
        let (mut dispatcher, backend) = dispatcher();
        let mut client = ClientContext::new(peer());

        let response = dispatcher.dispatch(&mut client, &post(b"dance"));

        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.body(), b"Hello there");
        assert!(backend.opened().is_empty());
    }

    #[test]
    fn test_parse_target() {
        assert_eq!(parse_target(b"", "d", 1).unwrap(), ("d".to_string(), 1));
        assert_eq!(parse_target(b"  h  ", "d", 1).unwrap(), ("h".to_string(), 1));
        assert_eq!(parse_target(b"h:9", "d", 1).unwrap(), ("h".to_string(), 9));
        assert_eq!(parse_target(b":9", "d", 1).unwrap(), ("d".to_string(), 9));
        assert_eq!(parse_target(b"h:", "d", 1).unwrap(), ("h".to_string(), 1));
        assert_eq!(parse_target(b"[::1]:9", "d", 1).unwrap(), ("::1".to_string(), 9));
        assert_eq!(parse_target(b"[::1]", "d", 1).unwrap(), ("::1".to_string(), 1));
        assert!(parse_target(b"h:0", "d", 1).is_err());
        assert!(parse_target(b"h:70000", "d", 1).is_err());
        assert!(parse_target(b"[::1", "d", 1).is_err());
        assert!(parse_target(b"\xff", "d", 1).is_err());
    }

    #[test]
    fn test_close_session_once() {
        let backend = MockBackend::new();
        let mut opener = backend.clone();
        let mut client = ClientContext::new(peer());
        client.attach(opener.open_session("h", 1).unwrap());

        assert!(client.close_session());
        assert!(!client.close_session());
        assert_eq!(backend.closes(0), 1);
    }
}
