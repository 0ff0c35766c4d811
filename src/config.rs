//! Ergonomic configuration layer over the raw `initialize`/`start`/`shutdown` lifecycle calls.
//! The `extern "C"` functions in `ffi.rs` remain the stable boundary for non-Rust hosts; this is
//! the surface for embedders linking this crate as an `rlib`.

use crate::engine::{Engine, RawCallback};
use crate::error::{Error, Result};

/// Bind address, port, and tuning knobs for an [`Engine`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub(crate) addr: String,
    pub(crate) port: u16,
    pub(crate) worker_count: Option<usize>,
}

impl ServerConfig {
    /// `addr` accepts an IPv4 or IPv6 literal; `port` is the TCP port to bind and listen on.
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
            worker_count: None,
        }
    }

    /// Overrides the worker pool size. Defaults to `min(2 × logical_cpus, 64)` when left unset.
    #[must_use]
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }
}

/// Builds and starts an [`Engine`] from a [`ServerConfig`] and a callback, combining
/// `initialize` and `start` into one call for embedders who have no state to install between
/// the two.
pub struct ServerBuilder {
    config: ServerConfig,
    callback: Option<RawCallback>,
}

impl ServerBuilder {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            callback: None,
        }
    }

    /// Sets the host callback. Required before [`ServerBuilder::build`].
    #[must_use]
    pub fn callback(mut self, callback: RawCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Initializes and starts the engine: `initialize` followed by `start`.
    pub fn build(self) -> Result<Engine> {
        let callback = self.callback.ok_or(Error::NullCallback)?;
        let engine = Engine::initialize(&self.config, callback)?;
        engine.start()?;
        Ok(engine)
    }
}
