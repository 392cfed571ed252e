//! # Módulo HTTP
//!
//! Este módulo implementa el subconjunto mínimo de HTTP/1.x que necesita el
//! puente, sin usar librerías de alto nivel:
//!
//! - Parsing de requests (método, headers, body)
//! - Construcción de responses con headers fijos
//! - Códigos de estado
//!
//! Sin chunked transfer ni pipelining: un request a la vez por conexión.
//!
//! ### Formato de Request
//!
//! ```text
//! POST / HTTP/1.1\r\n
//! Host: localhost\r\n
//! \r\n
//! push data hola
//! ```
//!
//! ### Formato de Response
//!
//! ```text
//! HTTP/1.1 200 OK\r\n
//! Content-Type: text/plain\r\n
//! Content-Length: 2\r\n
//! Server: HTTP bridge\r\n
//! Pragma: no-cache\r\n
//! Cache-Control: no-cache\r\n
//! \r\n
//! OK
//! ```

pub mod request;   // Parsing de HTTP requests
pub mod response;  // Construcción de HTTP responses
pub mod status;    // Códigos de estado HTTP

// Re-exportamos los tipos principales para facilitar su uso
pub use request::{Method, ParseError, Request};
pub use response::Response;
pub use status::StatusCode;
