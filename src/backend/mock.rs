//! # Backend en memoria
//! src/backend/mock.rs
//!
//! Sesiones que hacen eco: lo que se envía con `send` vuelve en el
//! siguiente `poll`. Cada llamada queda registrada en un estado compartido,
//! así los tests pueden inspeccionar lo que hizo el dispatcher.
//!
//! También sirve para desarrollo local con `--backend mock`.

use super::{Backend, BackendError, Session, SessionHandle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Registro compartido de todo lo que pasó en el backend
#[derive(Debug, Default)]
struct MockState {
    /// Si es true, `open_session` falla
    fail_open: bool,

    /// Si es true, `send` y `poll` fallan
    fail_io: bool,

    /// Destinos abiertos (host, port), en orden
    opened: Vec<(String, u16)>,

    /// Payloads enviados, en orden
    sent: Vec<Vec<u8>>,

    /// Cantidad de llamadas a poll
    polls: usize,

    /// Cantidad de cierres efectivos por sesión
    closes: HashMap<u64, usize>,

    /// Etiquetas (clave, valor) registradas
    tags: Vec<(String, String)>,

    /// Datos pendientes de cada sesión
    pending: HashMap<u64, Vec<u8>>,

    /// Próximo id de sesión
    next_id: u64,
}

/// Backend en memoria, clonable: todos los clones comparten el registro
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Hace que las próximas aperturas fallen (o vuelvan a funcionar)
    pub fn set_fail_open(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    /// Hace que `send`/`poll` de todas las sesiones fallen
    pub fn set_fail_io(&self, fail: bool) {
        self.lock().fail_io = fail;
    }

    /// Encola datos en una sesión como si hubieran llegado del backend
    pub fn inject(&self, session_id: u64, data: &[u8]) {
        self.lock()
            .pending
            .entry(session_id)
            .or_default()
            .extend_from_slice(data);
    }

    /// Destinos abiertos, en orden
    pub fn opened(&self) -> Vec<(String, u16)> {
        self.lock().opened.clone()
    }

    /// Payloads enviados, en orden
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    /// Cantidad de llamadas a poll
    pub fn polls(&self) -> usize {
        self.lock().polls
    }

    /// Cierres efectivos de una sesión
    pub fn closes(&self, session_id: u64) -> usize {
        self.lock().closes.get(&session_id).copied().unwrap_or(0)
    }

    /// Cierres efectivos de todas las sesiones
    pub fn total_closes(&self) -> usize {
        self.lock().closes.values().sum()
    }

    /// Etiquetas registradas
    pub fn tags(&self) -> Vec<(String, String)> {
        self.lock().tags.clone()
    }
}

impl Backend for MockBackend {
    fn open_session(&mut self, host: &str, port: u16) -> Result<SessionHandle, BackendError> {
        let mut state = self.lock();
        if state.fail_open {
            return Err(BackendError::Unavailable(format!(
                "mock refused {}:{}",
                host, port
            )));
        }

        let id = state.next_id;
        state.next_id += 1;
        state.opened.push((host.to_string(), port));
        debug!(session = id, host, port, "mock session opened");

        Ok(Box::new(MockSession {
            id,
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }
}

/// Sesión en memoria con eco
pub struct MockSession {
    id: u64,
    state: Arc<Mutex<MockState>>,
    closed: bool,
}

impl MockSession {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Session for MockSession {
    fn send(&mut self, data: &[u8]) -> Result<(), BackendError> {
        if self.closed {
            return Err(BackendError::Closed);
        }
        let id = self.id;
        let mut state = self.lock();
        if state.fail_io {
            return Err(BackendError::Unavailable("mock send failure".to_string()));
        }
        state.sent.push(data.to_vec());
        state.pending.entry(id).or_default().extend_from_slice(data);
        Ok(())
    }

    fn poll(&mut self, limit: usize) -> Result<Vec<u8>, BackendError> {
        if self.closed {
            return Err(BackendError::Closed);
        }
        let id = self.id;
        let mut state = self.lock();
        state.polls += 1;
        if state.fail_io {
            return Err(BackendError::Unavailable("mock poll failure".to_string()));
        }
        let Some(pending) = state.pending.get_mut(&id) else {
            return Ok(Vec::new());
        };
        let take = pending.len().min(limit);
        Ok(pending.drain(..take).collect())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let id = self.id;
        let mut state = self.lock();
        *state.closes.entry(id).or_insert(0) += 1;
        state.pending.remove(&id);
        debug!(session = id, "mock session closed");
    }

    fn tag(&mut self, key: &str, value: &str) {
        self.lock().tags.push((key.to_string(), value.to_string()));
    }
}
