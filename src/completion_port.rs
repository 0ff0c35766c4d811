//! A single process-wide kernel completion port binding all sockets: the rendezvous between
//! kernel-completed I/O and worker threads.
//!
//! [`CompletionPort`] is a single handle shared and drained concurrently by a fixed pool of
//! blocking OS threads, so it is `Send + Sync` and held behind an `Arc`.

use crate::error::{Error, Result};
use crate::op::Op;
use windows::core::Owned;
use windows::Win32::Foundation::{HANDLE, INVALID_HANDLE_VALUE};
use windows::Win32::Networking::WinSock::SOCKET;
use windows::Win32::Storage::FileSystem::SetFileCompletionNotificationModes;
use windows::Win32::System::IO::{
    CreateIoCompletionPort, GetQueuedCompletionStatus, PostQueuedCompletionStatus, OVERLAPPED,
};
use windows::Win32::System::WindowsProgramming::FILE_SKIP_SET_EVENT_ON_HANDLE;

pub(crate) struct CompletionPort {
    handle: Owned<HANDLE>,
}

/// Outcome of draining one completion from the queue.
pub(crate) enum Completion {
    /// A real I/O completion: the connection it belongs to (via the completion key), the `Op`
    /// that was submitted, the number of bytes transferred, and whether the kernel reported
    /// success.
    Io {
        conn_key: usize,
        op: Box<Op>,
        bytes_transferred: u32,
        success: bool,
    },
    /// A sentinel completion posted by `shutdown()` to wake and release a worker thread.
    /// Sentinels carry no `Op`.
    Shutdown,
}

impl CompletionPort {
    /// Creates a fresh, unassociated completion port.
    pub(crate) fn new() -> Result<Self> {
        // SAFETY: creating a brand new completion port has no preconditions beyond a valid
        // out-handle, which `Owned` provides on success.
        let handle = unsafe {
            CreateIoCompletionPort(INVALID_HANDLE_VALUE, None, 0, 0)
                .map_err(Error::CompletionPortCreate)?
        };

        Ok(Self {
            handle: unsafe { Owned::new(handle) },
        })
    }

    pub(crate) fn handle(&self) -> HANDLE {
        *self.handle
    }

    /// Associates a socket with this completion port, keyed by `key` (in this engine, the
    /// address of the socket's `Conn`). Completions for this socket will then be retrievable by
    /// workers draining the port.
    pub(crate) fn associate(&self, socket: SOCKET, key: usize) -> Result<()> {
        // SAFETY: `socket` must be a valid, open socket handle, which callers guarantee.
        unsafe {
            CreateIoCompletionPort(HANDLE(socket.0 as *mut _), Some(*self.handle), key, 0)
                .map_err(Error::Io)?;
        }

        // Skip posting a completion packet for operations that complete synchronously; we
        // always check the immediate return value ourselves. See
        // https://devblogs.microsoft.com/oldnewthing/20200221-00/?p=103466/ for the rationale.
        unsafe {
            let _ = SetFileCompletionNotificationModes(
                HANDLE(socket.0 as *mut _),
                FILE_SKIP_SET_EVENT_ON_HANDLE as u8,
            );
        }

        Ok(())
    }

    /// Enqueues a sentinel completion (no associated `Op`) to wake exactly one blocked worker
    /// thread, which will interpret it as a shutdown signal.
    pub(crate) fn post_shutdown_sentinel(&self) -> Result<()> {
        // SAFETY: posting with a null OVERLAPPED pointer and no associated handle is always
        // valid; it is the documented mechanism for out-of-band wakeups.
        unsafe {
            PostQueuedCompletionStatus(*self.handle, 0, 0, None).map_err(Error::Io)?;
        }
        Ok(())
    }

    /// Blocks the calling thread until a completion is available, with no timeout.
    pub(crate) fn get(&self) -> Completion {
        let mut bytes_transferred: u32 = 0;
        let mut completion_key: usize = 0;
        let mut overlapped: *mut OVERLAPPED = std::ptr::null_mut();

        // SAFETY: all out-parameters are valid local variables; INFINITE blocks with no
        // timeout as required.
        let result = unsafe {
            GetQueuedCompletionStatus(
                *self.handle,
                &mut bytes_transferred,
                &mut completion_key,
                &mut overlapped,
                windows::Win32::System::Threading::INFINITE,
            )
        };

        if overlapped.is_null() {
            // No Op was associated with this completion: either our own sentinel, or (should it
            // ever occur) a spurious wakeup with no completion packet we can act on. Both cases
            // are treated identically: as the shutdown sentinel, so a worker only ever exits
            // through this one path.
            return Completion::Shutdown;
        }

        // SAFETY: `overlapped` came from a submission built from `Op::into_raw`, and this is
        // the one and only place that reclaims it.
        let op = unsafe { Op::from_overlapped(overlapped) };

        Completion::Io {
            conn_key: completion_key,
            op,
            bytes_transferred,
            success: result.is_ok(),
        }
    }
}
