//! Error types for the proactor engine.
//!
//! Internal code always works with [`Error`]; it is converted to the numeric codes of the
//! embedding API (see `ffi.rs`) only at the FFI boundary.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while initializing or operating the engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error("callback pointer was null")]
    NullCallback,

    #[error("winsock subsystem failed to initialize: {0}")]
    WinsockInit(windows_result::Error),

    #[error("failed to create I/O completion port: {0}")]
    CompletionPortCreate(windows_result::Error),

    #[error("failed to create listening socket: {0}")]
    SocketCreate(windows_result::Error),

    #[error("failed to resolve extension function {name}: {source}")]
    ExtensionFunctionResolve {
        name: &'static str,
        source: windows_result::Error,
    },

    #[error("failed to bind to {addr}:{port}: {source}")]
    Bind {
        addr: String,
        port: u16,
        source: windows_result::Error,
    },

    #[error("failed to listen: {0}")]
    Listen(windows_result::Error),

    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(std::io::Error),

    #[error("invalid bind address {0:?}: not a valid IPv4 or IPv6 literal")]
    InvalidAddress(String),

    #[error("the engine has already been initialized")]
    AlreadyInitialized,

    #[error("the engine has not been initialized")]
    NotInitialized,

    #[error("I/O submission failed: {0}")]
    Io(windows_result::Error),
}

impl Error {
    /// Maps this error to the numeric initialization failure code returned across the embedding
    /// API. Only meaningful for errors returned from `initialize_server`.
    pub fn init_code(&self) -> i32 {
        match self {
            Error::NullCallback => 1,
            Error::WinsockInit(_) => 2,
            Error::CompletionPortCreate(_) => 3,
            Error::SocketCreate(_) => 4,
            Error::ExtensionFunctionResolve { .. } => 5,
            Error::Bind { .. } => 6,
            Error::Listen(_) => 7,
            // Everything else should not normally surface from `initialize_server`, but we must
            // still return a nonzero code rather than silently claiming success.
            _ => 7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_codes_are_stable() {
        assert_eq!(Error::NullCallback.init_code(), 1);
        assert_eq!(
            Error::WinsockInit(windows_result::Error::from_win32()).init_code(),
            2
        );
        assert_eq!(
            Error::CompletionPortCreate(windows_result::Error::from_win32()).init_code(),
            3
        );
        assert_eq!(Error::SocketCreate(windows_result::Error::from_win32()).init_code(), 4);
        assert_eq!(
            Error::ExtensionFunctionResolve {
                name: "AcceptEx",
                source: windows_result::Error::from_win32(),
            }
            .init_code(),
            5
        );
        assert_eq!(
            Error::Bind {
                addr: "127.0.0.1".to_string(),
                port: 0,
                source: windows_result::Error::from_win32(),
            }
            .init_code(),
            6
        );
        assert_eq!(Error::Listen(windows_result::Error::from_win32()).init_code(), 7);
    }
}
