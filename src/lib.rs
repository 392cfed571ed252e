//! # HTTP Bridge
//! src/lib.rs
//!
//! Puente que expone sesiones de un protocolo de backend orientado a
//! conexión a través de HTTP/1.x. Cada conexión HTTP puede tener a lo sumo
//! una sesión de backend; el cliente la controla con comandos de texto en
//! el body de cada request.
//!
//! ## Arquitectura
//!
//! - `http`: parsing de requests y armado de respuestas
//! - `commands`: comandos del body y dispatcher por conexión
//! - `backend`: trait de sesión + backends TCP y en memoria
//! - `server`: event loop de un solo thread sobre `mio`
//! - `config`: configuración CLI/entorno
//! - `metrics`: contadores y latencias
//!
//! ## Ejemplo de uso
//!
//! ```no_run
//! use http_bridge::backend::MockBackend;
//! use http_bridge::config::Config;
//! use http_bridge::server::Server;
//!
//! let mut config = Config::default();
//! config.port = 8443;
//!
//! let mut server = Server::bind(config, MockBackend::new()).unwrap();
//! server.run().unwrap();
//! ```

pub mod backend;
pub mod commands;
pub mod config;
pub mod http;
pub mod metrics;
pub mod server;
