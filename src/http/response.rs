//! # Construcción de Respuestas HTTP
//!
//! Convierte status, content type y body en los bytes de una respuesta
//! HTTP/1.1. Los headers salen siempre en el mismo orden:
//!
//! ```text
//! HTTP/1.1 <status>\r\n
//! Content-Type: <tipo>\r\n
//! Content-Length: <bytes>\r\n
//! Server: HTTP bridge\r\n
//! Pragma: no-cache\r\n
//! Cache-Control: no-cache\r\n
//! \r\n
//! <body>
//! ```
//!
//! Si el status line empieza con `40` el content type se fuerza a
//! `text/html`: las páginas de error siempre son HTML.
//!
//! ## Ejemplo de uso
//!
//! ```
//! use http_bridge::http::{Response, StatusCode};
//!
//! let response = Response::new(StatusCode::NotFound)
//!     .with_reason("Connection failed")
//!     .with_content_type("application/json")
//!     .with_body("Unable to create backend session");
//!
//! let text = String::from_utf8(response.to_bytes()).unwrap();
//! assert!(text.starts_with("HTTP/1.1 404 Connection failed\r\n"));
//! assert!(text.contains("Content-Type: text/html\r\n"));
//! ```

use super::StatusCode;
use std::io::{self, Write};

/// Content type por defecto para datos del backend
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Header `Server` fijo de todas las respuestas
pub const SERVER_NAME: &str = "HTTP bridge";

/// Saludo para requests sin comando
pub const GREETING: &str = "Hello there";

/// Representa una respuesta HTTP completa
#[derive(Debug, Clone)]
pub struct Response {
    /// Código de estado
    status: StatusCode,

    /// Razón propia del status line (si no, la estándar del código)
    reason: Option<String>,

    /// Content type pedido por quien arma la respuesta
    content_type: String,

    /// Cuerpo de la respuesta (puede ser vacío)
    body: Vec<u8>,
}

impl Response {
    /// Crea una respuesta vacía con content type `application/octet-stream`
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: None,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            body: Vec::new(),
        }
    }

    /// Reemplaza la razón estándar del status line
    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    /// Establece el content type pedido
    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = content_type.to_string();
        self
    }

    /// Establece el cuerpo desde un string
    pub fn with_body(mut self, body: &str) -> Self {
        self.body = body.as_bytes().to_vec();
        self
    }

    /// Establece el cuerpo desde bytes (datos binarios del backend)
    pub fn with_body_bytes(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Respuesta `200 OK` con el saludo en HTML
    pub fn greeting() -> Self {
        Self::new(StatusCode::Ok)
            .with_content_type("text/html")
            .with_body(GREETING)
    }

    /// Respuesta `200 OK` de texto plano
    pub fn ok_text(body: &str) -> Self {
        Self::new(StatusCode::Ok)
            .with_content_type("text/plain")
            .with_body(body)
    }

    /// Status line sin el prefijo `HTTP/1.1`, ej: `404 Connection failed`
    pub fn status_line(&self) -> String {
        let reason = self
            .reason
            .as_deref()
            .unwrap_or_else(|| self.status.reason_phrase());
        format!("{} {}", self.status.as_u16(), reason)
    }

    /// Content type que realmente se envía
    pub fn content_type(&self) -> &str {
        if self.status_line().starts_with("40") {
            "text/html"
        } else {
            &self.content_type
        }
    }

    /// Convierte la respuesta a bytes listos para el socket
    pub fn to_bytes(&self) -> Vec<u8> {
        let head = format!(
            "HTTP/1.1 {}\r\n\
             Content-Type: {}\r\n\
             Content-Length: {}\r\n\
             Server: {}\r\n\
             Pragma: no-cache\r\n\
             Cache-Control: no-cache\r\n\
             \r\n",
            self.status_line(),
            self.content_type(),
            self.body.len(),
            SERVER_NAME,
        );

        let mut result = Vec::with_capacity(head.len() + self.body.len());
        result.extend_from_slice(head.as_bytes());
        result.extend_from_slice(&self.body);
        result
    }

    /// Escribe la respuesta completa con una sola llamada de escritura
    pub fn write_to<W: Write>(&self, transport: &mut W) -> io::Result<()> {
        transport.write_all(&self.to_bytes())?;
        transport.flush()
    }

    /// Obtiene el código de estado
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Obtiene una referencia al body
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_order() {
        let response = Response::ok_text("OK");
        let text = String::from_utf8(response.to_bytes()).unwrap();

        assert_eq!(
            text,
            "HTTP/1.1 200 OK\r\n\
             Content-Type: text/plain\r\n\
             Content-Length: 2\r\n\
             Server: HTTP bridge\r\n\
             Pragma: no-cache\r\n\
             Cache-Control: no-cache\r\n\
             \r\n\
             OK"
        );
    }

    #[test]
    fn test_default_content_type() {
        let response = Response::new(StatusCode::Ok).with_body_bytes(vec![0x00, 0xFF]);
        let text = String::from_utf8_lossy(&response.to_bytes()).into_owned();

        assert!(text.contains("Content-Type: application/octet-stream\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
    }

    #[test]
    fn test_client_error_forces_html() {
        for status in [StatusCode::BadRequest, StatusCode::NotFound, StatusCode::Conflict] {
            let response = Response::new(status).with_content_type("application/json");
            assert_eq!(response.content_type(), "text/html");
        }
    }

    #[test]
    fn test_custom_reason() {
        let response = Response::new(StatusCode::NotFound).with_reason("Connection failed");
        assert_eq!(response.status_line(), "404 Connection failed");
    }

    #[test]
    fn test_greeting() {
        let response = Response::greeting();
        let text = String::from_utf8(response.to_bytes()).unwrap();

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: text/html\r\n"));
        assert!(text.ends_with("\r\n\r\nHello there"));
    }

    #[test]
    fn test_content_length_counts_bytes() {
        let response = Response::ok_text("ñandú");
        let text = String::from_utf8(response.to_bytes()).unwrap();

        assert!(text.contains("Content-Length: 7\r\n"));
    }

    #[test]
    fn test_write_to_single_buffer() {
        let response = Response::greeting();
        let mut sink = Vec::new();
        response.write_to(&mut sink).unwrap();

        assert_eq!(sink, response.to_bytes());
    }

    #[test]
    fn test_empty_body_response() {
        let text = String::from_utf8(Response::new(StatusCode::Ok).to_bytes()).unwrap();

        assert!(text.contains("Content-Length: 0\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }
}
