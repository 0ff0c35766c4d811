//! Owns the listening socket, performs one-time binding/listening, and posts the first accept.

use crate::completion_port::CompletionPort;
use crate::conn::Conn;
use crate::error::{Error, Result};
use crate::op::{Op, ACCEPT_BUFFER_LEN, SOCKADDR_SLOT_LEN};
use std::ffi::c_void;
use std::mem::size_of;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use windows::Win32::Networking::WinSock::{
    bind, listen, WSASocketW, AF_INET, AF_INET6, IN6_ADDR, IN_ADDR, IPPROTO_TCP, LPFN_ACCEPTEX,
    SIO_GET_EXTENSION_FUNCTION_POINTER, SOCKADDR, SOCKADDR_IN, SOCKADDR_IN6, SOCKET, SOCK_STREAM,
    SOMAXCONN, WSAID_ACCEPTEX, WSA_FLAG_OVERLAPPED,
};

/// Bound address family resolved from the host-supplied literal: either an IPv4 or an IPv6
/// dotted/colon literal, so the engine isn't limited to one address family.
enum BoundAddr {
    V4(SOCKADDR_IN),
    V6(SOCKADDR_IN6),
}

impl BoundAddr {
    fn parse(addr: &str, port: u16) -> Result<Self> {
        let ip = IpAddr::from_str(addr).map_err(|_| Error::InvalidAddress(addr.to_string()))?;
        Ok(match ip {
            IpAddr::V4(v4) => {
                let octets = v4.octets();
                BoundAddr::V4(SOCKADDR_IN {
                    sin_family: AF_INET,
                    sin_port: port.to_be(),
                    sin_addr: IN_ADDR {
                        S_un: windows::Win32::Networking::WinSock::IN_ADDR_0 {
                            S_addr: u32::from_ne_bytes(octets),
                        },
                    },
                    sin_zero: [0; 8],
                })
            }
            IpAddr::V6(v6) => BoundAddr::V6(SOCKADDR_IN6 {
                sin6_family: AF_INET6,
                sin6_port: port.to_be(),
                sin6_flowinfo: 0,
                sin6_addr: IN6_ADDR {
                    u: windows::Win32::Networking::WinSock::IN6_ADDR_0 {
                        Byte: v6.octets(),
                    },
                },
                Anonymous: windows::Win32::Networking::WinSock::SOCKADDR_IN6_0 { sin6_scope_id: 0 },
            }),
        })
    }

    fn family(&self) -> i32 {
        match self {
            BoundAddr::V4(_) => AF_INET.0 as i32,
            BoundAddr::V6(_) => AF_INET6.0 as i32,
        }
    }

    fn as_sockaddr(&self) -> (*const SOCKADDR, i32) {
        match self {
            BoundAddr::V4(a) => (
                (a as *const SOCKADDR_IN).cast(),
                size_of::<SOCKADDR_IN>() as i32,
            ),
            BoundAddr::V6(a) => (
                (a as *const SOCKADDR_IN6).cast(),
                size_of::<SOCKADDR_IN6>() as i32,
            ),
        }
    }
}

pub(crate) struct Listener {
    socket: SOCKET,
    family: i32,
    accept_ex: LPFN_ACCEPTEX,
}

impl Listener {
    /// Binds, listens, and associates the listening socket with `completion_port`. Does not post
    /// any accept; that is `post_accept`'s job, invoked separately so the caller can sequence
    /// initialization before the first event is allowed to occur.
    pub(crate) fn bind(
        addr: &str,
        port: u16,
        completion_port: Arc<CompletionPort>,
    ) -> Result<Self> {
        let bound_addr = BoundAddr::parse(addr, port)?;
        let family = bound_addr.family();

        // SAFETY: requesting an overlapped-capable TCP socket with no protocol info struct.
        let socket = unsafe {
            WSASocketW(
                bound_addr.family(),
                SOCK_STREAM.0,
                IPPROTO_TCP.0,
                None,
                0,
                WSA_FLAG_OVERLAPPED,
            )
            .map_err(Error::SocketCreate)?
        };

        let accept_ex = match Self::resolve_accept_ex(socket) {
            Ok(f) => f,
            Err(e) => {
                unsafe {
                    let _ = windows::Win32::Networking::WinSock::closesocket(socket);
                }
                return Err(e);
            }
        };

        let (sockaddr_ptr, sockaddr_len) = bound_addr.as_sockaddr();
        // SAFETY: `sockaddr_ptr` points at a live, correctly sized stack value for the
        // duration of this call.
        let bind_result = unsafe { bind(socket, sockaddr_ptr, sockaddr_len) };
        if bind_result != 0 {
            unsafe {
                let _ = windows::Win32::Networking::WinSock::closesocket(socket);
            }
            return Err(Error::Bind {
                addr: addr.to_string(),
                port,
                source: windows_result::Error::from_win32(),
            });
        }

        // SAFETY: socket is a valid, just-bound socket.
        let listen_result = unsafe { listen(socket, SOMAXCONN as i32) };
        if listen_result != 0 {
            unsafe {
                let _ = windows::Win32::Networking::WinSock::closesocket(socket);
            }
            return Err(Error::Listen(windows_result::Error::from_win32()));
        }

        completion_port.associate(socket, 0).map_err(|e| {
            unsafe {
                let _ = windows::Win32::Networking::WinSock::closesocket(socket);
            }
            e
        })?;

        Ok(Self {
            socket,
            family,
            accept_ex,
        })
    }

    /// Resolves `AcceptEx` via `WSAIoctl(SIO_GET_EXTENSION_FUNCTION_POINTER)`, the classic
    /// dynamic-resolution path for Winsock extension functions.
    fn resolve_accept_ex(socket: SOCKET) -> Result<LPFN_ACCEPTEX> {
        let mut fn_ptr: usize = 0;
        let mut bytes_returned: u32 = 0;

        // SAFETY: all pointers are to valid local storage sized for their use.
        let result = unsafe {
            windows::Win32::Networking::WinSock::WSAIoctl(
                socket,
                SIO_GET_EXTENSION_FUNCTION_POINTER,
                Some((&WSAID_ACCEPTEX as *const windows::core::GUID).cast::<c_void>()),
                size_of::<windows::core::GUID>() as u32,
                Some((&mut fn_ptr as *mut usize).cast::<c_void>()),
                size_of::<usize>() as u32,
                &mut bytes_returned,
                None,
                None,
            )
        };

        if result != 0 || fn_ptr == 0 {
            return Err(Error::ExtensionFunctionResolve {
                name: "AcceptEx",
                source: windows_result::Error::from_win32(),
            });
        }

        // SAFETY: WSAIoctl filled `fn_ptr` with a valid function pointer of the requested
        // extension function's type on success, which we just checked.
        Ok(unsafe { std::mem::transmute_copy::<usize, LPFN_ACCEPTEX>(&fn_ptr) })
    }

    pub(crate) fn accept_ex(&self) -> LPFN_ACCEPTEX {
        self.accept_ex
    }

    pub(crate) fn socket(&self) -> SOCKET {
        self.socket
    }

    /// Creates a fresh socket for an incoming connection to land on, and submits the accept.
    /// Self-renewing: every successful post here is expected to be followed (on completion) by
    /// another call to `post_accept`, keeping at least one accept outstanding at all times while
    /// the engine is running.
    pub(crate) fn post_accept(&self) -> Result<()> {
        // SAFETY: identical WSASocketW usage as in `bind`, using the same address family.
        let accept_socket = unsafe {
            WSASocketW(
                self.family,
                SOCK_STREAM.0,
                IPPROTO_TCP.0,
                None,
                0,
                WSA_FLAG_OVERLAPPED,
            )
            .map_err(Error::SocketCreate)?
        };

        let conn = Box::new(Conn::new(accept_socket));
        let mut op = Op::new_accept(accept_socket, conn);

        let mut bytes_received: u32 = 0;
        let op_ptr = op.as_mut() as *mut Op;

        let (accept_socket_for_call, scratch_ptr) = match &mut op.body {
            crate::op::OpBody::Accept {
                accept_socket,
                scratch,
                ..
            } => (*accept_socket, scratch.as_mut_ptr()),
            _ => unreachable!("post_accept always constructs an Accept Op"),
        };

        // SAFETY: `op_ptr` is about to be leaked via `into_raw` below, so the OVERLAPPED it
        // embeds stays alive for as long as the kernel needs it; `scratch_ptr` points into the
        // same leaked allocation.
        let submit_result = unsafe {
            (self.accept_ex)(
                self.socket,
                accept_socket_for_call,
                scratch_ptr.cast::<c_void>(),
                0,
                SOCKADDR_SLOT_LEN as u32,
                SOCKADDR_SLOT_LEN as u32,
                &mut bytes_received,
                op_ptr.cast(),
            )
        };

        if submit_result.as_bool() {
            // Completed synchronously; a completion packet will still be queued because we did
            // not disable that for the listening socket.
            let _ = op.into_raw();
            return Ok(());
        }

        let err = windows_result::Error::from_win32();
        if err.code() == windows_result::HRESULT::from_win32(997) {
            // ERROR_IO_PENDING: expected, not a failure.
            let _ = op.into_raw();
            return Ok(());
        }

        // Submission failed outright: release the Op and the scratch socket we created for it.
        unsafe {
            let _ = windows::Win32::Networking::WinSock::closesocket(accept_socket);
        }
        Err(Error::Io(err))
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        unsafe {
            let _ = windows::Win32::Networking::WinSock::closesocket(self.socket);
        }
    }
}

const _: () = assert!(ACCEPT_BUFFER_LEN > 0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipv4_literal() {
        let bound = BoundAddr::parse("127.0.0.1", 8080).expect("valid IPv4 literal");
        assert_eq!(bound.family(), AF_INET.0 as i32);
    }

    #[test]
    fn parses_ipv6_literal() {
        let bound = BoundAddr::parse("::1", 8080).expect("valid IPv6 literal");
        assert_eq!(bound.family(), AF_INET6.0 as i32);
    }

    #[test]
    fn rejects_non_ip_literal() {
        let err = BoundAddr::parse("not-an-address", 8080).unwrap_err();
        assert!(matches!(err, Error::InvalidAddress(_)));
    }

    #[test]
    fn sockaddr_len_matches_family() {
        let v4 = BoundAddr::parse("0.0.0.0", 0).unwrap();
        let (_, len) = v4.as_sockaddr();
        assert_eq!(len as usize, size_of::<SOCKADDR_IN>());

        let v6 = BoundAddr::parse("::", 0).unwrap();
        let (_, len) = v6.as_sockaddr();
        assert_eq!(len as usize, size_of::<SOCKADDR_IN6>());
    }
}
