//! One-time Winsock subsystem startup, isolated from the rest of the engine.

use crate::error::{Error, Result};
use std::sync::Once;
use windows::Win32::Networking::WinSock::{WSAStartup, WSADATA};

static WINSOCK_INIT: Once = Once::new();

/// Ensures `WSAStartup` has been called exactly once for this process.
///
/// Winsock reference-counts `WSAStartup`/`WSACleanup` internally, but since the engine is a
/// process-wide singleton we only ever want to pay the startup cost once and never tear it down
/// mid-process; `WSACleanup` is intentionally never called, consistent with shutdown elsewhere
/// in the engine not being graceful.
pub(crate) fn ensure_initialized() -> Result<()> {
    let mut result = Ok(());

    WINSOCK_INIT.call_once(|| {
        let mut data = WSADATA::default();
        // SAFETY: WSAStartup is always safe to call with a valid out-pointer.
        let code = unsafe { WSAStartup(0x0202, &mut data) };
        if code != 0 {
            result = Err(Error::WinsockInit(windows_result::Error::from_win32()));
        }
    });

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initializing_twice_is_harmless() {
        ensure_initialized().expect("first init");
        ensure_initialized().expect("second init is a no-op");
    }
}
