//! Per-`Conn` I/O submission: `post_read`/`post_write`. Accept submission is `Listener`'s job
//! (it owns the listening socket and the `AcceptEx` extension pointer); these are the
//! counterparts that run against an already-accepted connection.

use crate::conn::Conn;
use crate::error::{Error, Result};
use crate::op::{Op, OpBody, READ_BUFFER_LEN};
use windows::core::PSTR;
use windows::Win32::Networking::WinSock::{WSARecv, WSASend, WSABUF};

/// `ERROR_IO_PENDING`: the expected "submitted, will complete later" status, not a failure.
const ERROR_IO_PENDING: u32 = 997;

fn is_pending(err: &windows_result::Error) -> bool {
    err.code() == windows_result::HRESULT::from_win32(ERROR_IO_PENDING)
}

/// Posts a Read on `conn`'s socket.
///
/// # Safety
/// `conn` must point to a live `Conn` that has no other I/O outstanding and must remain live
/// until this Read completes.
pub(crate) unsafe fn post_read(conn: *mut Conn) -> Result<()> {
    let socket = (*conn).socket;

    let mut op = Op::new_read();
    let op_ptr = op.as_mut() as *mut Op;
    let buf_ptr = match &mut op.body {
        OpBody::Read { buf } => buf.as_mut_ptr(),
        _ => unreachable!("post_read always constructs a Read Op"),
    };

    let wsabuf = WSABUF {
        len: READ_BUFFER_LEN as u32,
        buf: PSTR::from_raw(buf_ptr),
    };
    let mut flags: u32 = 0;

    // SAFETY: `op_ptr` is leaked via `into_raw` below, so the embedded OVERLAPPED (and the
    // buffer `wsabuf` points into) stays alive for as long as the kernel needs it.
    let submit_result =
        WSARecv(socket, &[wsabuf], None, &mut flags, Some(op_ptr.cast()), None);

    if submit_result == 0 {
        let _ = op.into_raw();
        return Ok(());
    }

    let err = windows_result::Error::from_win32();
    if is_pending(&err) {
        let _ = op.into_raw();
        return Ok(());
    }

    Err(Error::Io(err))
}

/// Posts a Write of `payload` on `conn`'s socket. The `Op` owns a private copy of the bytes to
/// send, independent of whatever buffer they were read from.
///
/// # Safety
/// `conn` must point to a live `Conn` that has no other I/O outstanding and must remain live
/// until this Write completes.
pub(crate) unsafe fn post_write(conn: *mut Conn, payload: Vec<u8>) -> Result<()> {
    let socket = (*conn).socket;

    let mut op = Op::new_write(payload);
    let op_ptr = op.as_mut() as *mut Op;
    let wsabuf = match &mut op.body {
        OpBody::Write { payload } => WSABUF {
            len: payload.len() as u32,
            buf: PSTR::from_raw(payload.as_mut_ptr()),
        },
        _ => unreachable!("post_write always constructs a Write Op"),
    };

    // SAFETY: same reasoning as `post_read`; the owned payload the `wsabuf` points into is
    // leaked alongside the `Op` and reclaimed on completion.
    let submit_result = WSASend(socket, &[wsabuf], None, 0, Some(op_ptr.cast()), None);

    if submit_result == 0 {
        let _ = op.into_raw();
        return Ok(());
    }

    let err = windows_result::Error::from_win32();
    if is_pending(&err) {
        let _ = op.into_raw();
        return Ok(());
    }

    Err(Error::Io(err))
}
