//! Socket plumbing: libc-level control the standard library does not expose.
//!
//! The listener is built by hand so dual-stack behavior (`IPV6_V6ONLY`) can
//! be set before bind, and accepted descriptors carry `SOCK_CLOEXEC`.
//! Forwarders use `poll(2)` with bounded timeouts plus non-blocking
//! `recv`/`send` so stop flags are always checked within 100 ms.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::time::Duration;

use tracing::warn;

/// Outcome of one poll wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// The requested event is pending
    Ready,
    /// Timed out with no event
    Timeout,
    /// Peer hung up
    Hup,
    /// Poll itself failed
    Error,
}

fn last_error() -> io::Error {
    io::Error::last_os_error()
}

/// Build a listening socket on `host:port`.
///
/// `v6_only` controls `IPV6_V6ONLY` when the resolved address is IPv6;
/// dual-stack is requested otherwise. The descriptor is CLOEXEC and
/// `SO_REUSEADDR`.
pub fn listen_on(host: &str, port: u16, backlog: i32, v6_only: bool) -> io::Result<RawFd> {
    let addrs: Vec<_> = (host, port).to_socket_addrs()?.collect();
    let mut last_err = io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses resolved");

    for addr in addrs {
        let family = if addr.is_ipv6() {
            libc::AF_INET6
        } else {
            libc::AF_INET
        };
        let fd = unsafe {
            libc::socket(
                family,
                libc::SOCK_STREAM | libc::SOCK_CLOEXEC,
                libc::IPPROTO_TCP,
            )
        };
        if fd < 0 {
            last_err = last_error();
            continue;
        }

        unsafe {
            let yes: libc::c_int = 1;
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &yes as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
            if addr.is_ipv6() {
                let v6: libc::c_int = if v6_only { 1 } else { 0 };
                if libc::setsockopt(
                    fd,
                    libc::IPPROTO_IPV6,
                    libc::IPV6_V6ONLY,
                    &v6 as *const _ as *const libc::c_void,
                    std::mem::size_of::<libc::c_int>() as libc::socklen_t,
                ) != 0
                {
                    warn!("could not set IPV6_V6ONLY, continuing with system default");
                }
            }
        }

        let (storage, len) = sockaddr_from(addr);
        let bound = unsafe { libc::bind(fd, &storage as *const _ as *const libc::sockaddr, len) };
        if bound == 0 && unsafe { libc::listen(fd, backlog) } == 0 {
            return Ok(fd);
        }
        last_err = last_error();
        unsafe { libc::close(fd) };
    }
    Err(last_err)
}

fn sockaddr_from(addr: std::net::SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    match addr {
        std::net::SocketAddr::V4(v4) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                },
                sin_zero: [0; 8],
            };
            unsafe {
                std::ptr::copy_nonoverlapping(
                    &sin as *const _ as *const u8,
                    &mut storage as *mut _ as *mut u8,
                    std::mem::size_of::<libc::sockaddr_in>(),
                );
            }
            (
                storage,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        }
        std::net::SocketAddr::V6(v6) => {
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: v6.flowinfo(),
                sin6_addr: libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                },
                sin6_scope_id: v6.scope_id(),
            };
            unsafe {
                std::ptr::copy_nonoverlapping(
                    &sin6 as *const _ as *const u8,
                    &mut storage as *mut _ as *mut u8,
                    std::mem::size_of::<libc::sockaddr_in6>(),
                );
            }
            (
                storage,
                std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
            )
        }
    }
}

/// Accept one pending client as a `TcpStream` (CLOEXEC applied).
///
/// Call only after [`poll_fd`] reported the listener readable; the socket is
/// expected to be ready.
pub fn accept_client(listen_fd: RawFd) -> io::Result<TcpStream> {
    let fd = unsafe {
        libc::accept4(
            listen_fd,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            libc::SOCK_CLOEXEC,
        )
    };
    if fd < 0 {
        return Err(last_error());
    }
    Ok(unsafe { TcpStream::from_raw_fd(fd) })
}

/// Dial `host:port` with a bounded connect timeout.
pub fn dial(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses resolved");
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

/// Wait up to `timeout_ms` for `events` (`libc::POLLIN` / `libc::POLLOUT`).
pub fn poll_fd(fd: RawFd, events: libc::c_short, timeout_ms: i32) -> PollState {
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if rc < 0 {
        let errno = io::Error::last_os_error();
        if errno.kind() == io::ErrorKind::Interrupted {
            return PollState::Timeout;
        }
        return PollState::Error;
    }
    if rc == 0 {
        return PollState::Timeout;
    }
    if pfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
        return PollState::Error;
    }
    if pfd.revents & events != 0 {
        return PollState::Ready;
    }
    if pfd.revents & libc::POLLHUP != 0 {
        return PollState::Hup;
    }
    PollState::Timeout
}

/// Non-blocking receive.
pub fn recv_nonblocking(fd: RawFd, buf: &mut [u8]) -> isize {
    unsafe {
        libc::recv(
            fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            libc::MSG_DONTWAIT,
        )
    }
}

/// Non-blocking send with `SIGPIPE` suppressed.
pub fn send_nonblocking(fd: RawFd, buf: &[u8]) -> isize {
    unsafe {
        libc::send(
            fd,
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
            libc::MSG_NOSIGNAL | libc::MSG_DONTWAIT,
        )
    }
}

/// Peek up to `buf.len()` bytes without consuming them.
pub fn peek(fd: RawFd, buf: &mut [u8]) -> isize {
    unsafe {
        libc::recv(
            fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            libc::MSG_PEEK | libc::MSG_DONTWAIT,
        )
    }
}

/// Pending socket-level error, cleared by reading it.
pub fn socket_error(fd: RawFd) -> Option<io::Error> {
    let mut err: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc != 0 {
        return Some(last_error());
    }
    if err != 0 {
        return Some(io::Error::from_raw_os_error(err));
    }
    None
}

/// Arrange an RST on close by zeroing the linger interval.
pub fn set_linger_rst(stream: &TcpStream) {
    let lin = libc::linger {
        l_onoff: 1,
        l_linger: 0,
    };
    unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            &lin as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::linger>() as libc::socklen_t,
        );
    }
}

/// Shut down the write half; EOF propagation for half-close.
pub fn shutdown_write(fd: RawFd) {
    unsafe { libc::shutdown(fd, libc::SHUT_WR) };
}

/// Shut down both halves.
pub fn shutdown_both(fd: RawFd) {
    unsafe { libc::shutdown(fd, libc::SHUT_RDWR) };
}

/// Close a raw listener descriptor.
pub fn close_fd(fd: RawFd) {
    unsafe { libc::close(fd) };
}

/// True when the first bytes look like an HTTP request or response.
pub fn looks_like_http(data: &[u8]) -> bool {
    let trimmed: &[u8] = {
        let mut i = 0;
        while i < data.len() && matches!(data[i], b' ' | b'\t' | b'\r' | b'\n' | 0) {
            i += 1;
        }
        &data[i..]
    };
    if trimmed.len() < 3 {
        return false;
    }
    const TOKENS: [&[u8]; 10] = [
        b"GET ", b"POST ", b"PUT ", b"HEAD ", b"DELETE ", b"PATCH ", b"OPTIONS ", b"CONNECT ",
        b"TRACE ", b"HTTP/",
    ];
    TOKENS.iter().any(|token| {
        trimmed.len() >= token.len()
            && trimmed[..token.len()]
                .iter()
                .zip(token.iter())
                .all(|(a, b)| a.to_ascii_uppercase() == *b)
    })
}

/// Best-effort plain-text HTTP error reply.
pub fn send_http_error(fd: RawFd, status_line: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status_line}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    unsafe {
        libc::send(
            fd,
            response.as_ptr() as *const libc::c_void,
            response.len(),
            libc::MSG_NOSIGNAL,
        );
    }
}
