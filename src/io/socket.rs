// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Socket wrappers, with target-specific support where needed.
//!
//! The daemon binds a dedicated UDP socket and TCP listener to each
//! configured local address, so the standard library covers almost all
//! of its needs. (In particular, binding per address is what makes the
//! local address of every received datagram known without resorting to
//! the ancillary-data APIs that wildcard-bound UDP sockets would
//! require; those APIs are not portable and are avoided entirely.)
//!
//! The one feature that the standard library cannot provide is calling
//! `accept` with a timeout on a listening TCP socket, which graceful
//! shutdown requires: a listener thread must wake up periodically to
//! notice that shutdown has begun. Since a timed accept is not part of
//! the Berkeley sockets API either, what we actually implement, when
//! possible, is a `poll_accept` method with a timeout, built on the
//! `poll` system call. This is currently available on **Unix** targets;
//! elsewhere, `poll_accept` reports readiness immediately and accepts
//! block indefinitely, which [`TcpListenerApi::POLL_ACCEPT_WORKS`]
//! exposes so that providers can warn about the degraded shutdown
//! behavior.

use std::io;
use std::net::{self, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

/// The API that the concrete, target-specific [`TcpListener`] must
/// implement.
pub(crate) trait TcpListenerApi: Sized {
    /// Whether this implementation has a functional
    /// [`poll_accept`](TcpListenerApi::poll_accept) method.
    const POLL_ACCEPT_WORKS: bool;

    /// Creates a new listener bound to the provided address.
    fn bind(addr: SocketAddr) -> io::Result<Self>;

    /// Returns the local address the listener is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Sets whether the listener is in non-blocking mode.
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    /// When supported, blocks until a new connection is available, the
    /// provided timeout expires, or the call is interrupted. Returns
    /// whether a new connection is available.
    ///
    /// On targets that do not support this, this method should
    /// immediately return `Ok(true)` and
    /// [`POLL_ACCEPT_WORKS`](TcpListenerApi::POLL_ACCEPT_WORKS)
    /// should be `false`.
    fn poll_accept(&self, timeout: Duration) -> io::Result<bool>;

    /// Accepts a new connection.
    fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
}

#[cfg(unix)]
mod tcp_impl {
    use std::io;
    use std::net::{self, SocketAddr, TcpStream};
    use std::os::unix::io::AsRawFd;
    use std::time::Duration;

    use nix::errno::Errno;
    use nix::poll::{poll, PollFd, PollFlags};

    use super::TcpListenerApi;

    /// A TCP listener implementation wrapping
    /// [`poll_accept`](TcpListenerApi::poll_accept) support around the
    /// standard library [`TcpListener`](net::TcpListener) on Unix
    /// targets.
    pub struct TcpListener(net::TcpListener);

    impl TcpListenerApi for TcpListener {
        const POLL_ACCEPT_WORKS: bool = true;

        fn bind(addr: SocketAddr) -> io::Result<Self> {
            net::TcpListener::bind(addr).map(Self)
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            self.0.local_addr()
        }

        fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
            self.0.set_nonblocking(nonblocking)
        }

        fn poll_accept(&self, timeout: Duration) -> io::Result<bool> {
            let millis = timeout.as_millis().try_into().unwrap_or(i32::MAX);
            let mut poll_fds = [PollFd::new(self.0.as_raw_fd(), PollFlags::POLLIN)];
            poll(&mut poll_fds, millis).map(|n| n > 0).or_else(|e| {
                if e == Errno::EINTR {
                    Ok(false)
                } else {
                    Err(e.into())
                }
            })
        }

        fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
            self.0.accept()
        }
    }
}

#[cfg(not(unix))]
mod tcp_impl {
    use std::io;
    use std::net::{self, SocketAddr, TcpStream};
    use std::time::Duration;

    use super::TcpListenerApi;

    /// A TCP listener implementation using only the Rust standard
    /// library.
    pub struct TcpListener(net::TcpListener);

    impl TcpListenerApi for TcpListener {
        const POLL_ACCEPT_WORKS: bool = false;

        fn bind(addr: SocketAddr) -> io::Result<Self> {
            net::TcpListener::bind(addr).map(Self)
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            self.0.local_addr()
        }

        fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
            self.0.set_nonblocking(nonblocking)
        }

        fn poll_accept(&self, _timeout: Duration) -> io::Result<bool> {
            Ok(true)
        }

        fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
            self.0.accept()
        }
    }
}

pub(crate) use tcp_impl::TcpListener;

/// A UDP socket wrapper around the standard library socket.
///
/// Cloning shares the underlying socket, so a future multi-worker
/// receive loop could share one bound socket between threads the way
/// the kernel intends.
#[derive(Clone)]
pub(crate) struct UdpSocket(Arc<net::UdpSocket>);

impl UdpSocket {
    /// Creates a new UDP socket bound to the provided address.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        net::UdpSocket::bind(addr).map(Arc::new).map(Self)
    }

    /// Returns the local address the socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.0.local_addr()
    }

    /// Sets the read timeout of the socket.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.0.set_read_timeout(timeout)
    }

    /// Receives a datagram, returning its length and source address.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.0.recv_from(buf)
    }

    /// Sends a datagram to the provided destination.
    pub fn send(&self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
        self.0.send_to(buf, dest)
    }
}
