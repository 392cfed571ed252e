//! # Parsing de Requests HTTP
//! src/http/request.rs
//!
//! Convierte un buffer de bytes crudo en un [`Request`] estructurado.
//! No hace I/O ni guarda estado.
//!
//! ## Reglas
//!
//! 1. Menos de [`MIN_REQUEST_LEN`] bytes → [`ParseError::TooShort`]
//! 2. El método sale del inicio del buffer: `GET` o `POST`
//! 3. El primer `\r\n\r\n` separa headers del body
//! 4. Cada línea del bloque de headers se parte en el primer `:`;
//!    las líneas que no producen `clave` y `valor` no vacíos se ignoran

use std::collections::HashMap;
use thiserror::Error;

/// Tamaño mínimo de un request viable
pub const MIN_REQUEST_LEN: usize = 10;

/// Separador entre headers y body
const SEPARATOR: &[u8] = b"\r\n\r\n";

/// Métodos HTTP soportados
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET - Usado por clientes que solo quieren el saludo
    GET,

    /// POST - Transporta los comandos del puente en el body
    POST,
}

impl Method {
    /// Detecta el método a partir de los primeros bytes del request
    ///
    /// `GET` se reconoce con 3 bytes y `POST` con 4.
    fn detect(raw: &[u8]) -> Result<Self, ParseError> {
        if raw.starts_with(b"POST") {
            return Ok(Method::POST);
        }
        if &raw[..3] == b"GET" {
            return Ok(Method::GET);
        }

        let token = raw
            .split(|b| b.is_ascii_whitespace())
            .next()
            .unwrap_or_default();
        Err(ParseError::UnsupportedMethod(
            String::from_utf8_lossy(token).into_owned(),
        ))
    }

    /// Convierte el método a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
        }
    }
}

/// Errores fatales del parsing
///
/// Un header malformado nunca es un error: simplemente se descarta.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Menos bytes de los necesarios para un request mínimo
    #[error("received less data than a minimal request")]
    TooShort,

    /// Método distinto de GET o POST
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    /// No aparece el separador `\r\n\r\n`
    #[error("no header/body separator found")]
    NoSeparator,
}

impl ParseError {
    /// Indica si más bytes del peer podrían completar el request
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ParseError::TooShort | ParseError::NoSeparator)
    }
}

/// Representa un request HTTP parseado
///
/// Inmutable una vez construido; vive solo durante un ciclo de request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Método HTTP (GET, POST)
    method: Method,

    /// Headers HTTP, claves tal como llegaron (la última repetida gana)
    headers: HashMap<String, String>,

    /// Todo lo que viene después del separador, byte a byte
    body: Vec<u8>,
}

impl Request {
    /// Parsea un request desde bytes
    ///
    /// # Ejemplo
    ///
    /// ```
    /// use http_bridge::http::{Method, Request};
    ///
    /// let raw = b"GET /\r\nHost: x\r\n\r\n";
    /// let request = Request::parse(raw).unwrap();
    ///
    /// assert_eq!(request.method(), Method::GET);
    /// assert_eq!(request.header("Host"), Some("x"));
    /// assert!(request.body().is_empty());
    /// ```
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        if raw.len() < MIN_REQUEST_LEN {
            return Err(ParseError::TooShort);
        }

        let method = Method::detect(raw)?;

        let separator = raw
            .windows(SEPARATOR.len())
            .position(|window| window == SEPARATOR)
            .ok_or(ParseError::NoSeparator)?;

        let headers = Self::parse_headers(&raw[..separator]);
        let body = raw[separator + SEPARATOR.len()..].to_vec();

        Ok(Request {
            method,
            headers,
            body,
        })
    }

    /// Parsea el bloque de headers
    ///
    /// La request line también pasa por aquí; como normalmente no tiene
    /// `:` termina descartada igual que cualquier otra línea inválida.
    fn parse_headers(block: &[u8]) -> HashMap<String, String> {
        let text = String::from_utf8_lossy(block);
        let mut headers = HashMap::new();

        for line in text.split('\n') {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some((key, value)) = Self::split_header(line) {
                headers.insert(key.to_string(), value.to_string());
            }
        }

        headers
    }

    /// Separa `Clave: valor` en el primer `:`
    ///
    /// El resto de la línea se conserva entero, así que un valor como
    /// `localhost:8080` no se pierde.
    fn split_header(line: &str) -> Option<(&str, &str)> {
        let (key, value) = line.split_once(':')?;
        let key = key.trim();
        let value = value.trim();

        if key.is_empty() || value.is_empty() {
            return None;
        }
        Some((key, value))
    }

    // === Métodos públicos para acceder a los campos ===

    /// Obtiene el método HTTP del request
    pub fn method(&self) -> Method {
        self.method
    }

    /// Obtiene todos los headers
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Obtiene un header específico (sensible a mayúsculas)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }

    /// Obtiene el body del request
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Valor numérico de `Content-Length`, si viene y es válido
    pub fn content_length(&self) -> Option<usize> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("Content-Length"))
            .and_then(|(_, value)| value.parse().ok())
    }

    /// Indica si el body declarado por `Content-Length` aún no llegó completo
    pub fn is_body_incomplete(&self) -> bool {
        self.content_length()
            .is_some_and(|expected| self.body.len() < expected)
    }
}
