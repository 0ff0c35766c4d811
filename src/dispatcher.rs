//! Given a completed `Op`, advances the per-connection state machine. This is the hot path;
//! every completion drained by every worker thread passes through [`dispatch`].

use crate::completion_port::Completion;
use crate::conn::{Conn, ConnHandle};
use crate::engine::EngineShared;
use crate::op::{Op, OpBody, READ_BUFFER_LEN};
use crate::submit::{post_read, post_write};
use std::os::raw::c_char;
use tracing::{event, Level};
use windows::Win32::Networking::WinSock::SOCKET;

/// Dispatches one dequeued completion. Always called from a worker thread; the host callback is
/// never invoked from the thread driving initialization or shutdown.
pub(crate) fn dispatch(shared: &EngineShared, completion: Completion) {
    let Completion::Io {
        conn_key,
        op,
        bytes_transferred,
        success,
    } = completion
    else {
        unreachable!("the worker loop handles Completion::Shutdown before calling dispatch");
    };

    // Moves the Op's tag-specific payload out of the box; the now-empty shell (and its
    // `overlapped` field) is dropped at the end of this match, releasing the Op once its
    // completion has been fully handled.
    let Op { body, .. } = *op;
    match body {
        OpBody::Accept {
            accept_socket,
            conn,
            ..
        } => handle_accept(shared, accept_socket, conn, success),
        OpBody::Read { buf } => handle_read(shared, conn_key, buf, bytes_transferred, success),
        OpBody::Write { payload } => handle_write(conn_key, payload, success),
    }
}

/// Accept completed: bind the new socket to the completion queue, keep accepting in parallel,
/// and post the connection's first Read.
fn handle_accept(shared: &EngineShared, accept_socket: SOCKET, conn: Box<Conn>, success: bool) {
    if !success {
        // Accept path failures after startup are not retried: the engine stops accepting but
        // continues servicing existing connections until shutdown. We do not re-post an Accept
        // here; the accept loop has halted.
        event!(
            Level::ERROR,
            "Accept completed with failure; accept loop is halting"
        );
        unsafe {
            let _ = windows::Win32::Networking::WinSock::closesocket(accept_socket);
        }
        drop(conn);
        return;
    }

    let conn_ptr = Box::into_raw(conn);

    if let Err(e) = shared
        .completion_port
        .associate(accept_socket, conn_ptr as usize)
    {
        event!(
            Level::ERROR,
            message = "failed to associate accepted socket with completion queue",
            error = %e
        );
        close_conn(conn_ptr);

        if let Err(e) = shared.listener.post_accept() {
            event!(Level::ERROR, message = "failed to post next accept", error = %e);
        }
        return;
    }

    // Keep acceptance self-renewing before doing anything else with the new connection: each
    // Accept completion posts the next Accept before processing the connection it just handed
    // back.
    if let Err(e) = shared.listener.post_accept() {
        event!(
            Level::ERROR,
            message = "failed to post next accept; accept loop is halting",
            error = %e
        );
    }

    // SAFETY: `conn_ptr` points at the `Conn` we just associated; nothing else has touched it,
    // and no other I/O is outstanding against it yet.
    if let Err(e) = unsafe { post_read(conn_ptr) } {
        event!(
            Level::DEBUG,
            message = "failed to post initial read on accepted connection",
            error = %e
        );
        close_conn(conn_ptr);
    }
}

/// Read completed: zero bytes means the peer closed its write half; otherwise hand the bytes to
/// the host callback and post the response write.
fn handle_read(
    shared: &EngineShared,
    conn_key: usize,
    buf: Box<[u8; READ_BUFFER_LEN]>,
    bytes_transferred: u32,
    success: bool,
) {
    let conn_ptr = conn_key as *mut Conn;

    if !success || bytes_transferred == 0 {
        event!(Level::TRACE, "read completed with no data; closing connection");
        close_conn(conn_ptr);
        return;
    }

    let n = bytes_transferred as usize;
    let callback_result = invoke_callback(shared, conn_ptr, &buf, n);

    // The callback's return value selects how many of the `n` bytes just read are echoed back
    // (clamped to `n`), with a negative value closing the connection instead of writing.
    if callback_result < 0 {
        event!(Level::TRACE, "callback requested connection close");
        close_conn(conn_ptr);
        return;
    }

    let echo_len = (callback_result as usize).min(n);
    let payload = buf[..echo_len].to_vec();
    drop(buf);

    // SAFETY: `conn_ptr` is still the sole outstanding I/O's connection; we are about to post
    // exactly one Write against it, preserving the single-outstanding-I/O invariant.
    if let Err(e) = unsafe { post_write(conn_ptr, payload) } {
        event!(Level::DEBUG, message = "failed to post write", error = %e);
        close_conn(conn_ptr);
    }
}

/// Write completed: release the Write Op's owned payload and post a new Read.
fn handle_write(conn_key: usize, payload: Vec<u8>, success: bool) {
    let conn_ptr = conn_key as *mut Conn;
    drop(payload);

    if !success {
        event!(Level::TRACE, "write completed with failure; closing connection");
        close_conn(conn_ptr);
        return;
    }

    // SAFETY: the Write that just completed was the sole outstanding I/O on this Conn; posting
    // the next Read preserves the single-outstanding-I/O invariant.
    if let Err(e) = unsafe { post_read(conn_ptr) } {
        event!(Level::DEBUG, message = "failed to post read after write", error = %e);
        close_conn(conn_ptr);
    }
}

/// Reclaims and tears down a `Conn`: destroyed when a Read completes with zero bytes, a Read or
/// Write completes with failure, or the engine shuts down with the connection still open.
fn close_conn(conn: *mut Conn) {
    // SAFETY: callers only pass a `conn` pointer they are abandoning (no further I/O will be
    // posted against it going forward), and each `Conn` is closed at most once by construction
    // of the call graph above.
    let conn = unsafe { Box::from_raw(conn) };
    conn.close();
    drop(conn);
}

/// Invokes the host callback with the bytes just read. `conn_ptr` outlives the call: the `Conn`
/// is not reclaimed until a later, separate completion.
fn invoke_callback(
    shared: &EngineShared,
    conn_ptr: *mut Conn,
    buf: &[u8; READ_BUFFER_LEN],
    n: usize,
) -> i32 {
    let handle = ConnHandle::from_conn(conn_ptr);
    let data_ptr = buf.as_ptr() as *const c_char;

    // SAFETY: the callback is a host-supplied function pointer, validated non-null at
    // initialization; `data_ptr` is valid for `n` bytes for the duration of this call, and the
    // host must not retain `data_ptr` or `handle` beyond it.
    unsafe { (shared.callback)(handle.as_raw(), data_ptr, n as i32) }
}
