//! Orchestrates `initialize` → `start` → `shutdown`, owns the global handles, and implements the
//! wake-and-join teardown protocol.

use crate::completion_port::{CompletionPort, Completion};
use crate::config::ServerConfig;
use crate::dispatcher;
use crate::error::{Error, Result};
use crate::listener::Listener;
use crate::winsock;
use std::ffi::c_void;
use std::os::raw::c_char;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{event, Level};

/// The host callback signature: `(conn_handle, data_ptr, data_len) -> int`. The return value is
/// the number of bytes (clamped to the bytes read) to echo back, or a negative value to close
/// the connection.
pub type RawCallback =
    unsafe extern "C" fn(conn_handle: *mut c_void, data_ptr: *const c_char, data_len: i32) -> i32;

/// State shared, read-only after construction, across every worker thread. The callback is
/// immutable after init; every allocated `Op` and `Conn` has exactly one logical owner at every
/// instant.
pub(crate) struct EngineShared {
    pub(crate) completion_port: Arc<CompletionPort>,
    pub(crate) listener: Listener,
    pub(crate) callback: RawCallback,
}

/// The running engine: the bound listener, the worker pool, and the shared state they dispatch
/// against. Obtained via [`Engine::initialize`], or via [`crate::ServerBuilder`] for the
/// combined initialize-then-start convenience.
pub struct Engine {
    shared: Arc<EngineShared>,
    workers: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Binds and listens on `config`'s address, spawns the worker pool, and returns before any
    /// I/O completions occur. Does not post the first Accept; see [`Engine::start`].
    ///
    /// On any failure after partial initialization, everything acquired so far is released
    /// before returning, since every intermediate value here owns its resource and is simply
    /// dropped on the early return.
    pub fn initialize(config: &ServerConfig, callback: RawCallback) -> Result<Self> {
        winsock::ensure_initialized()?;

        let completion_port = Arc::new(CompletionPort::new()?);
        let listener = Listener::bind(&config.addr, config.port, Arc::clone(&completion_port))?;

        let shared = Arc::new(EngineShared {
            completion_port,
            listener,
            callback,
        });

        let worker_count = config.worker_count.unwrap_or_else(default_worker_count);
        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let worker_shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("proactor-worker-{index}"))
                .spawn(move || worker_loop(&worker_shared))
                .map_err(Error::ThreadSpawn)?;
            workers.push(handle);
        }

        event!(
            Level::DEBUG,
            message = "engine initialized",
            addr = %config.addr,
            port = config.port,
            worker_count
        );

        Ok(Self { shared, workers })
    }

    /// Posts the first Accept. Separated from `initialize` so the host may install additional
    /// state between creation and first event.
    pub fn start(&self) -> Result<()> {
        self.shared.listener.post_accept()
    }

    /// Sets the shutdown protocol in motion by enqueueing one sentinel completion per worker,
    /// joins every worker thread, then drops the shared state (closing the listening socket and
    /// the completion port).
    ///
    /// Shutdown is not graceful: in-flight connections may be abruptly closed by the OS, and
    /// in-flight `Op` records may leak. This is accepted because the process is assumed to be
    /// terminating, or the host is rebinding immediately.
    pub fn shutdown(self) {
        for _ in 0..self.workers.len() {
            if let Err(e) = self.shared.completion_port.post_shutdown_sentinel() {
                event!(Level::ERROR, message = "failed to post shutdown sentinel", error = %e);
            }
        }

        for handle in self.workers {
            let name = handle
                .thread()
                .name()
                .unwrap_or("<unnamed>")
                .to_string();
            if handle.join().is_err() {
                event!(
                    Level::ERROR,
                    message = "worker thread panicked during shutdown",
                    worker = name
                );
            }
        }

        event!(Level::DEBUG, "engine shut down");
        // `self.shared` drops here. The listener's `Drop` closes the listening socket; the
        // completion port's `Drop` closes the queue handle once this, the last `Arc` clone
        // (every worker's clone was dropped when its thread returned above), goes away.
    }
}

/// One worker's main loop: block on the completion queue with no timeout; on a sentinel, exit;
/// otherwise dispatch.
fn worker_loop(shared: &EngineShared) {
    loop {
        match shared.completion_port.get() {
            Completion::Shutdown => {
                event!(Level::TRACE, "worker received shutdown sentinel");
                break;
            }
            completion => dispatcher::dispatch(shared, completion),
        }
    }
}

/// Default worker pool size: `min(2 × logical_cpus, 64)`.
fn default_worker_count() -> usize {
    let cpus = thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    (cpus * 2).min(64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_worker_count_is_bounded() {
        let count = default_worker_count();
        assert!(count >= 2);
        assert!(count <= 64);
    }
}
