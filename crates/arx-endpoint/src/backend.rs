//! Backend interface — where authenticated commands land.
//!
//! The endpoint owns authentication and the command envelope; business
//! logic lives behind this trait. The node wires in its local executor,
//! tests use [`NullBackend`].

use arx_core::codec::Dict;

/// Executes authenticated commands on behalf of the endpoint.
pub trait NodeBackend: Send + Sync {
    /// Execute `command` with its decrypted parameters.
    ///
    /// `Ok(None)` means the backend does not recognise the command; the
    /// envelope reports it as unknown. `Err` is reported as a command
    /// failure. Never called before the session is keyed.
    fn execute(&self, command: &str, params: &Dict) -> anyhow::Result<Option<Dict>>;
}

/// A backend that recognises nothing. Built-in commands still work.
pub struct NullBackend;

impl NodeBackend for NullBackend {
    fn execute(&self, _command: &str, _params: &Dict) -> anyhow::Result<Option<Dict>> {
        Ok(None)
    }
}
