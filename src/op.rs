//! A per-I/O heap object whose lifetime spans a single kernel I/O submission.
//!
//! Every `Op` embeds a Win32 `OVERLAPPED` struct as its first field so that a raw pointer to an
//! `Op` is also a valid `*mut OVERLAPPED` to hand to `AcceptEx`/`WSARecv`/`WSASend`, and so that
//! the pointer IOCP hands back on completion (`lpOverlapped`) can be recovered as an `Op`
//! pointer without a side table. This is the standard IOCP "embed the OVERLAPPED" idiom.

use crate::conn::Conn;
use windows::Win32::Networking::WinSock::SOCKET;
use windows::Win32::System::IO::OVERLAPPED;

/// Accept scratch area: two `SOCKADDR_IN6` (the larger of the two families we support), each
/// padded by 16 bytes, per the `AcceptEx` convention of requiring room for the local and remote
/// address plus slack the kernel needs around each one.
pub(crate) const SOCKADDR_SLOT_LEN: usize = std::mem::size_of::<
    windows::Win32::Networking::WinSock::SOCKADDR_IN6,
>() + 16;
pub(crate) const ACCEPT_BUFFER_LEN: usize = SOCKADDR_SLOT_LEN * 2;

/// Default inline read buffer capacity.
pub const READ_BUFFER_LEN: usize = 4096;

/// Operation tag, immutable after construction.
pub(crate) enum OpBody {
    Accept {
        /// The pre-created socket the kernel will populate with the accepted connection; this
        /// handle becomes the new `Conn`'s socket once the accept completes successfully.
        accept_socket: SOCKET,
        /// Owned until the accept completes, at which point it becomes the new connection's
        /// `Conn`.
        conn: Box<Conn>,
        scratch: Box<[u8; ACCEPT_BUFFER_LEN]>,
    },
    Read {
        buf: Box<[u8; READ_BUFFER_LEN]>,
    },
    Write {
        /// Owned copy of the bytes being sent, independent of the read buffer they came from, so
        /// that buffer can be reused for the next read immediately.
        payload: Vec<u8>,
    },
}

/// A per-I/O heap object. `overlapped` MUST remain the first field: pointers to `Op` are cast
/// to `*mut OVERLAPPED` when submitted to the kernel, and recovered from `*mut OVERLAPPED` when
/// a completion is dequeued.
#[repr(C)]
pub(crate) struct Op {
    pub(crate) overlapped: OVERLAPPED,
    pub(crate) body: OpBody,
}

impl Op {
    pub(crate) fn new_accept(accept_socket: SOCKET, conn: Box<Conn>) -> Box<Op> {
        Box::new(Op {
            overlapped: OVERLAPPED::default(),
            body: OpBody::Accept {
                accept_socket,
                conn,
                scratch: Box::new([0u8; ACCEPT_BUFFER_LEN]),
            },
        })
    }

    pub(crate) fn new_read() -> Box<Op> {
        Box::new(Op {
            overlapped: OVERLAPPED::default(),
            body: OpBody::Read {
                buf: Box::new([0u8; READ_BUFFER_LEN]),
            },
        })
    }

    pub(crate) fn new_write(payload: Vec<u8>) -> Box<Op> {
        Box::new(Op {
            overlapped: OVERLAPPED::default(),
            body: OpBody::Write { payload },
        })
    }

    /// Converts an owned `Op` into the raw pointer submitted to the kernel. Ownership
    /// conceptually transfers to the kernel until the matching completion is dequeued.
    pub(crate) fn into_raw(self: Box<Op>) -> *mut Op {
        Box::into_raw(self)
    }

    /// Recovers ownership of an `Op` from the raw `OVERLAPPED` pointer IOCP returns on
    /// completion.
    ///
    /// # Safety
    /// `overlapped` must be a pointer previously produced by [`Op::into_raw`] and must not have
    /// already been reclaimed.
    pub(crate) unsafe fn from_overlapped(overlapped: *mut OVERLAPPED) -> Box<Op> {
        Box::from_raw(overlapped.cast::<Op>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_buffer_fits_two_address_slots() {
        assert_eq!(ACCEPT_BUFFER_LEN, SOCKADDR_SLOT_LEN * 2);
        assert!(SOCKADDR_SLOT_LEN >= std::mem::size_of::<
            windows::Win32::Networking::WinSock::SOCKADDR_IN,
        >() + 16);
    }

    #[test]
    fn overlapped_is_first_field() {
        let op = Op::new_read();
        let op_ptr: *const Op = &*op;
        let overlapped_ptr: *const OVERLAPPED = &op.overlapped;
        assert_eq!(op_ptr as usize, overlapped_ptr as usize);
    }
}
