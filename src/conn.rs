//! The connection record: the unit passed to the host callback as an opaque handle.

use windows::Win32::Networking::WinSock::{closesocket, shutdown, SD_BOTH, SOCKET};

/// A per-socket heap object. Exactly one I/O (a read or a write) is ever outstanding against a
/// `Conn` at a time, which is what lets the engine avoid any locking around connection state.
#[repr(C)]
pub(crate) struct Conn {
    pub(crate) socket: SOCKET,
}

impl Conn {
    pub(crate) fn new(socket: SOCKET) -> Self {
        Self { socket }
    }

    /// Tears down the connection. Called by the dispatcher on clean close (zero-byte read),
    /// on unrecoverable I/O error, or by the sentinel-driven shutdown path.
    pub(crate) fn close(&self) {
        // SAFETY: `socket` is a valid, owned socket handle until this call; we never touch it
        // afterward (the `Conn` itself is dropped immediately by the caller).
        unsafe {
            let _ = shutdown(self.socket, SD_BOTH);
            let _ = closesocket(self.socket);
        }
    }
}

/// Opaque, non-owning reference to a [`Conn`] handed to the host callback. The engine remains
/// the sole owner of the `Conn`; the callback may not retain this handle beyond the call.
/// Crosses the FFI boundary only as the raw `*mut c_void` produced by [`ConnHandle::as_raw`];
/// the type itself never crosses it.
#[repr(transparent)]
pub(crate) struct ConnHandle(*mut Conn);

impl ConnHandle {
    pub(crate) fn from_conn(conn: *mut Conn) -> Self {
        Self(conn)
    }

    pub(crate) fn as_raw(&self) -> *mut std::ffi::c_void {
        self.0.cast()
    }
}
