//! The stable `extern "C"` embedding surface: `initialize_server`, `start_server`,
//! `shutdown_server`. This is the one process-wide [`Engine`], held behind a `Mutex` so
//! `shutdown_server` can hand the slot back to `None` and allow a later `initialize_server` to
//! rebind the same port.

use crate::config::ServerConfig;
use crate::engine::{Engine, RawCallback};
use crate::error::Error;
use std::ffi::CStr;
use std::os::raw::c_char;
use std::sync::Mutex;
use tracing::{event, Level};

static ENGINE: Mutex<Option<Engine>> = Mutex::new(None);

/// `initialize_server(addr, port, callback) -> i32`. Returns 0 on success, or one of the
/// numbered failure codes from [`Error::init_code`].
///
/// # Safety
/// `addr` must be a valid, NUL-terminated C string readable for the duration of this call.
#[no_mangle]
pub unsafe extern "C" fn initialize_server(
    addr: *const c_char,
    port: u16,
    callback: Option<RawCallback>,
) -> i32 {
    let Some(callback) = callback else {
        event!(Level::ERROR, "initialize_server called with a null callback");
        return Error::NullCallback.init_code();
    };

    if addr.is_null() {
        event!(Level::ERROR, "initialize_server called with a null addr");
        return Error::InvalidAddress(String::new()).init_code();
    }

    // SAFETY: caller guarantees `addr` is a valid NUL-terminated string for this call.
    let addr = match unsafe { CStr::from_ptr(addr) }.to_str() {
        Ok(s) => s.to_string(),
        Err(_) => return Error::InvalidAddress(String::new()).init_code(),
    };

    let mut slot = ENGINE.lock().expect("engine mutex poisoned");
    if slot.is_some() {
        event!(Level::ERROR, "initialize_server called while already initialized");
        return Error::AlreadyInitialized.init_code();
    }

    let config = ServerConfig::new(addr, port);
    match Engine::initialize(&config, callback) {
        Ok(engine) => {
            *slot = Some(engine);
            0
        }
        Err(e) => {
            event!(Level::ERROR, message = "initialize_server failed", error = %e);
            e.init_code()
        }
    }
}

/// `start_server()`. Posts the first Accept.
#[no_mangle]
pub extern "C" fn start_server() {
    let slot = ENGINE.lock().expect("engine mutex poisoned");
    match slot.as_ref() {
        Some(engine) => {
            if let Err(e) = engine.start() {
                event!(Level::ERROR, message = "start_server failed", error = %e);
            }
        }
        None => event!(Level::ERROR, error = %Error::NotInitialized, "start_server called"),
    }
}

/// `shutdown_server()`. Blocks until all workers have joined.
#[no_mangle]
pub extern "C" fn shutdown_server() {
    let engine = {
        let mut slot = ENGINE.lock().expect("engine mutex poisoned");
        slot.take()
    };

    match engine {
        Some(engine) => engine.shutdown(),
        None => event!(Level::ERROR, error = %Error::NotInitialized, "shutdown_server called"),
    }
}
