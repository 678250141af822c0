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

//! Implementation of the blocking I/O provider: the listener set and
//! its dispatch loops.

// NOTE: In this provider, I/O error handling is generally to exit the
// task. For the TCP accept loop and the UDP receive/send loop, this
// causes the thread to respawn, possibly after a delay (if the last
// respawn occurred too recently); this prevents us from using up all
// CPU time on I/O operations that repeatedly fail, while a single
// broken listener never takes down its siblings. For the TCP
// connection handler, an I/O error aborts just that connection.
//
// Per-message problems (undecodable data, reply serialization
// failures) are not I/O errors: they are logged at debug level and the
// loop simply continues with the next message.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error};

use super::socket::{TcpListener, TcpListenerApi, UdpSocket};
use crate::config::ListenerConfig;
use crate::message::Query;
use crate::server::{self, ConnectionInfo, QuerySink, Transport, REPLY_BUF_SIZE};
use crate::thread::ThreadGroup;

/// A blocking I/O provider.
///
/// This provider owns one bound UDP socket and one bound TCP listener
/// for every address in a [`ListenerConfig`], and serves each socket
/// from its own thread using blocking I/O. Binding happens in
/// [`BlockingIoProvider::bind`], so that any bind failure surfaces at
/// startup; [`BlockingIoProvider::start`] then launches the listener
/// threads in the provided [`ThreadGroup`].
///
/// Each listener thread handles one message (or one TCP connection) to
/// completion before taking the next. There is no cross-thread work
/// queue: a message is cheap to serve, and independence between
/// listeners is the property the daemon cares about.
///
/// # Graceful shutdown
///
/// The provider supports graceful shutdown on targets with
/// `poll_accept` support ([see here](super::socket)): simply shut down
/// the [`ThreadGroup`] in which the provider was started. Every
/// blocking operation the listener threads perform carries a timeout of
/// at most [`CHECK_FOR_SHUTDOWN_TIMEOUT`], so each thread notices the
/// shutdown within a bounded interval, stops accepting work, and
/// exits. Graceful shutdown support can be probed by checking
/// [`BlockingIoProvider::SUPPORTS_GRACEFUL_SHUTDOWN`]; it is currently
/// available on **Unix** targets.
pub struct BlockingIoProvider {
    udp_sockets: Vec<(UdpSocket, SocketAddr)>,
    tcp_listeners: Vec<(TcpListener, SocketAddr)>,
}

impl BlockingIoProvider {
    /// Whether the `BlockingIoProvider` supports graceful shutdown on
    /// the target system.
    pub const SUPPORTS_GRACEFUL_SHUTDOWN: bool = TcpListener::POLL_ACCEPT_WORKS;

    /// Binds a UDP socket and a TCP listener to every address of the
    /// provided [`ListenerConfig`]. Any failure to bind (port in use,
    /// address unavailable, insufficient privilege) is returned
    /// immediately and should be treated as fatal by the caller.
    pub fn bind(config: &ListenerConfig) -> io::Result<Self> {
        let mut udp_sockets = Vec::new();
        let mut tcp_listeners = Vec::new();
        for addr in config.socket_addrs() {
            let udp = UdpSocket::bind(addr)?;
            udp.set_read_timeout(Some(CHECK_FOR_SHUTDOWN_TIMEOUT))?;
            let udp_addr = udp.local_addr()?;
            udp_sockets.push((udp, udp_addr));

            let tcp = TcpListener::bind(addr)?;
            if TcpListener::POLL_ACCEPT_WORKS {
                tcp.set_nonblocking(true)?;
            }
            let tcp_addr = tcp.local_addr()?;
            tcp_listeners.push((tcp, tcp_addr));
        }
        Ok(Self {
            udp_sockets,
            tcp_listeners,
        })
    }

    /// Returns the local addresses of the bound UDP sockets. (These
    /// are resolved addresses: if the configuration requested port 0,
    /// the ports the system actually assigned appear here.)
    pub fn udp_addrs(&self) -> Vec<SocketAddr> {
        self.udp_sockets.iter().map(|(_, addr)| *addr).collect()
    }

    /// Returns the local addresses of the bound TCP listeners.
    pub fn tcp_addrs(&self) -> Vec<SocketAddr> {
        self.tcp_listeners.iter().map(|(_, addr)| *addr).collect()
    }

    /// Starts one listener thread per bound socket on the provided
    /// [`ThreadGroup`], submitting every query's record to `sink`
    /// before its reply is sent.
    ///
    /// On platforms with graceful shutdown support, the daemon can be
    /// stopped later simply by shutting down the [`ThreadGroup`]
    /// provided here.
    pub fn start<S>(
        self,
        sink: &Arc<S>,
        group: &Arc<ThreadGroup>,
    ) -> Result<(), crate::thread::Error>
    where
        S: QuerySink + 'static,
    {
        for (socket, local_addr) in self.udp_sockets {
            let name = format!("udp listener {}", local_addr);
            let group_clone = group.clone();
            let sink = sink.clone();
            let task = move || {
                log_io_errors(run_udp_listener(
                    &group_clone,
                    sink.as_ref(),
                    &socket,
                    local_addr,
                ));
            };
            group.start_respawnable(Some(name), task)?;
        }

        for (listener, local_addr) in self.tcp_listeners {
            let name = format!("tcp listener {}", local_addr);
            let group_clone = group.clone();
            let sink = sink.clone();
            let task = move || {
                log_io_errors(run_tcp_listener(
                    &group_clone,
                    sink.as_ref(),
                    &listener,
                    local_addr,
                ));
            };
            group.start_respawnable(Some(name), task)?;
        }

        Ok(())
    }
}

/// This defines the timeout on TCP accept and UDP receive operations.
/// Listener threads check for thread group shutdown between every
/// accept and receive, respectively, so this defines the *maximum*
/// interval between such checks. Consequently, it is the maximum amount
/// of time the shutdown procedure will have to wait for an idle
/// listener thread to finish up.
const CHECK_FOR_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// This defines the maximum amount of time a TCP client is allowed to
/// take to send us a full DNS message. If it takes longer, we close the
/// connection to defend against Slowloris-style denial-of-service
/// attacks.
const READ_MESSAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// The size of the receive buffer: the largest DNS message either
/// transport can deliver.
const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;

/// The UDP receive/handle/send loop.
fn run_udp_listener<S>(
    group: &Arc<ThreadGroup>,
    sink: &S,
    socket: &UdpSocket,
    local_addr: SocketAddr,
) -> io::Result<()>
where
    S: QuerySink,
{
    let mut received_buf = vec![0; MAX_MESSAGE_SIZE];
    let mut response_buf = vec![0; REPLY_BUF_SIZE];

    loop {
        if group.is_shutting_down() {
            return Ok(());
        }

        // Receive a DNS message. If interrupted, we skip the rest of
        // the loop body and check whether the group is shutting down
        // again before retrying. Otherwise, repeated interruptions
        // could in theory prevent the call from ever timing out.
        let (received_len, peer) = match socket.recv(&mut received_buf) {
            Ok(pair) => pair,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        let conn = ConnectionInfo::new(peer, local_addr, Transport::Udp);
        let response_len = match process_message(
            sink,
            &received_buf[0..received_len],
            &conn,
            &mut response_buf,
        ) {
            Some(len) => len,
            None => continue,
        };

        // Don't exit the task if the send fails. (See the note at the
        // beginning of the module.) We keep processing incoming
        // messages as long as the *receive* portion continues to work.
        log_io_errors(retry_if_interrupted(|| {
            socket.send(&response_buf[0..response_len], peer)
        }));
    }
}

/// The TCP accept/handle loop. Each accepted connection is served to
/// completion before the next accept.
fn run_tcp_listener<S>(
    group: &Arc<ThreadGroup>,
    sink: &S,
    listener: &TcpListener,
    local_addr: SocketAddr,
) -> io::Result<()>
where
    S: QuerySink,
{
    loop {
        if group.is_shutting_down() {
            return Ok(());
        }

        // Note that poll_accept returns false if interrupted. If
        // poll_accept doesn't work on this platform, then this always
        // returns true immediately.
        if !listener.poll_accept(CHECK_FOR_SHUTDOWN_TIMEOUT)? {
            continue;
        }
        let (stream, peer) = match retry_if_interrupted(|| listener.accept()) {
            Ok(pair) => pair,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        };
        log_io_errors(handle_tcp_connection(sink, stream, peer, local_addr));
    }
}

/// Handles one TCP connection: reads a single length-prefixed DNS
/// message (the DNS-over-TCP convention of [RFC 1035 § 4.2.2]), sends
/// the reply with the same framing, and closes the connection. No
/// pipelined or subsequent queries are served.
///
/// [RFC 1035 § 4.2.2]: https://datatracker.ietf.org/doc/html/rfc1035#section-4.2.2
fn handle_tcp_connection<S>(
    sink: &S,
    mut stream: TcpStream,
    peer: SocketAddr,
    local_addr: SocketAddr,
) -> io::Result<()>
where
    S: QuerySink,
{
    if TcpListener::POLL_ACCEPT_WORKS {
        // On some systems, the socket might inherit nonblocking status
        // from the listener.
        stream.set_nonblocking(false)?;
    }

    // The client gets READ_MESSAGE_TIMEOUT to deliver the length
    // prefix and the complete message.
    let deadline = Instant::now() + READ_MESSAGE_TIMEOUT;
    let mut len_buf = [0; 2];
    if !read_full(&mut stream, &mut len_buf, deadline)? {
        return Ok(());
    }
    let received_len = u16::from_be_bytes(len_buf) as usize;
    let mut received_buf = vec![0; received_len];
    if !read_full(&mut stream, &mut received_buf, deadline)? {
        return Ok(());
    }

    let conn = ConnectionInfo::new(peer, local_addr, Transport::Tcp);
    let mut response_buf = vec![0; 2 + REPLY_BUF_SIZE];
    if let Some(response_len) = process_message(sink, &received_buf, &conn, &mut response_buf[2..])
    {
        response_buf[0..2].copy_from_slice(&(response_len as u16).to_be_bytes());
        // Note that write_all retries if the write system calls are
        // interrupted.
        stream.write_all(&response_buf[0..2 + response_len])?;
    }
    Ok(())
}

/// Reads exactly `buf.len()` octets from `stream`, giving up at
/// `deadline`. Returns `Ok(false)` if the peer closed the connection or
/// the deadline passed first; these end the connection without being
/// errors.
fn read_full(stream: &mut TcpStream, buf: &mut [u8], deadline: Instant) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let timeout = match deadline.checked_duration_since(Instant::now()) {
            Some(timeout) if timeout > Duration::ZERO => timeout,
            _ => return Ok(false),
        };
        stream.set_read_timeout(Some(timeout))?;
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(false),
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// Processes one received DNS message: decode, handle, log, and
/// serialize the reply into `response_buf`. Returns the reply length,
/// or [`None`] if no reply should be sent. The query's log record is
/// always submitted to `sink` before this function returns, so logging
/// precedes the send that the caller performs.
fn process_message<S>(
    sink: &S,
    received: &[u8],
    conn: &ConnectionInfo,
    response_buf: &mut [u8],
) -> Option<usize>
where
    S: QuerySink,
{
    let query = match Query::decode(received) {
        Ok(query) => query,
        Err(e) => {
            debug!(
                "dropping undecodable message from {}: {}",
                conn.peer_addr, e
            );
            return None;
        }
    };

    let (record, policy) = server::handle_query(&query, conn);
    sink.record(&record);

    match server::write_reply(&query, policy, response_buf) {
        Ok(len) => Some(len),
        Err(e) => {
            debug!("failed to serialize reply to {}: {}", conn.peer_addr, e);
            None
        }
    }
}

/// Executes `f`, retrying the operation if it is interrupted.
fn retry_if_interrupted<F, R>(mut f: F) -> io::Result<R>
where
    F: FnMut() -> io::Result<R>,
{
    loop {
        match f() {
            Ok(r) => return Ok(r),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Logs errors if a task exits with an I/O error.
fn log_io_errors<T>(result: io::Result<T>) {
    if let Err(e) = result {
        let current_thread = thread::current();
        let thread_name = current_thread.name().unwrap_or("anonymous thread");
        error!("I/O error in thread {}: {}", thread_name, e);
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::net::{self, IpAddr};
    use std::sync::Mutex;

    use super::*;
    use crate::message::{Qclass, Qtype, Question, Rcode, Reader, Writer};
    use crate::server::LogRecord;

    /// A [`QuerySink`] that collects rendered records for inspection.
    struct CapturingSink(Mutex<Vec<String>>);

    impl CapturingSink {
        fn new() -> Self {
            Self(Mutex::new(Vec::new()))
        }

        fn lines(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl QuerySink for CapturingSink {
        fn record(&self, record: &LogRecord) {
            self.0.lock().unwrap().push(record.to_string());
        }
    }

    struct TestDaemon {
        group: Arc<ThreadGroup>,
        sink: Arc<CapturingSink>,
        udp_addr: SocketAddr,
        tcp_addr: SocketAddr,
    }

    impl TestDaemon {
        fn start() -> Self {
            let localhost: IpAddr = "127.0.0.1".parse().unwrap();
            let config = ListenerConfig::new(vec![localhost], 0);
            let provider = BlockingIoProvider::bind(&config).unwrap();
            let udp_addr = provider.udp_addrs()[0];
            let tcp_addr = provider.tcp_addrs()[0];
            let sink = Arc::new(CapturingSink::new());
            let group = ThreadGroup::new();
            provider.start(&sink, &group).unwrap();
            Self {
                group,
                sink,
                udp_addr,
                tcp_addr,
            }
        }
    }

    impl Drop for TestDaemon {
        fn drop(&mut self) {
            self.group.shut_down();
            if BlockingIoProvider::SUPPORTS_GRACEFUL_SHUTDOWN {
                self.group.await_shutdown();
            }
        }
    }

    fn example_com_a_query(id: u16) -> Vec<u8> {
        let mut buf = vec![0; 512];
        let mut writer = Writer::try_from(buf.as_mut_slice()).unwrap();
        writer.set_id(id);
        writer.set_rd(true);
        writer
            .add_question(&Question {
                qname: "example.com.".parse().unwrap(),
                qtype: Qtype::from(crate::rr::Type::A),
                qclass: Qclass::from(crate::class::Class::IN),
            })
            .unwrap();
        let len = writer.finish();
        buf.truncate(len);
        buf
    }

    #[test]
    fn udp_queries_are_logged_and_answered_with_truncation() {
        let daemon = TestDaemon::start();
        let query = example_com_a_query(0x1111);

        let client = net::UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client.send_to(&query, daemon.udp_addr).unwrap();

        let mut reply = [0; 512];
        let (reply_len, _) = client.recv_from(&mut reply).unwrap();
        let reader = Reader::try_from(&reply[0..reply_len]).unwrap();
        assert_eq!(reader.id(), 0x1111);
        assert!(reader.qr());
        assert!(reader.tc());
        assert_eq!(reader.rcode(), Rcode::NoError);
        assert_eq!(reader.ancount(), 0);
        assert_eq!(reader.nscount(), 0);
        assert_eq!(reader.arcount(), 0);

        // The reply has been received, and logging happens before the
        // reply is sent, so the record must be present by now.
        let lines = daemon.sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains(",17,"));
        assert!(lines[0].ends_with(",IN,A,example.com"));
    }

    #[test]
    fn tcp_queries_are_refused_and_the_connection_is_closed() {
        let daemon = TestDaemon::start();
        let query = example_com_a_query(0x2222);

        let mut client = TcpStream::connect(daemon.tcp_addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client
            .write_all(&(query.len() as u16).to_be_bytes())
            .unwrap();
        client.write_all(&query).unwrap();

        let mut len_buf = [0; 2];
        client.read_exact(&mut len_buf).unwrap();
        let reply_len = u16::from_be_bytes(len_buf) as usize;
        let mut reply = vec![0; reply_len];
        client.read_exact(&mut reply).unwrap();
        let reader = Reader::try_from(reply.as_slice()).unwrap();
        assert_eq!(reader.id(), 0x2222);
        assert!(reader.qr());
        assert!(!reader.tc());
        assert_eq!(reader.rcode(), Rcode::Refused);
        assert_eq!(reader.ancount(), 0);

        // The daemon closes the connection after one reply.
        let mut extra = [0; 1];
        assert_eq!(client.read(&mut extra).unwrap(), 0);

        let lines = daemon.sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains(",6,"));
    }

    #[test]
    fn malformed_datagrams_do_not_stop_the_listener() {
        let daemon = TestDaemon::start();

        let client = net::UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        // Too short to even be a header: dropped without a reply.
        client.send_to(b"xx", daemon.udp_addr).unwrap();

        // A well-formed query afterwards must still be served.
        let query = example_com_a_query(0x3333);
        client.send_to(&query, daemon.udp_addr).unwrap();
        let mut reply = [0; 512];
        let (reply_len, _) = client.recv_from(&mut reply).unwrap();
        let reader = Reader::try_from(&reply[0..reply_len]).unwrap();
        assert_eq!(reader.id(), 0x3333);

        // Only the decodable query was logged.
        assert_eq!(daemon.sink.lines().len(), 1);
    }

    #[test]
    fn shutdown_stops_all_listeners_within_a_bounded_time() {
        if !BlockingIoProvider::SUPPORTS_GRACEFUL_SHUTDOWN {
            return;
        }
        let daemon = TestDaemon::start();
        let start = Instant::now();
        daemon.group.shut_down();
        daemon.group.await_shutdown();
        // Idle listeners notice shutdown within the check interval,
        // plus scheduling slack.
        assert!(Instant::now().duration_since(start) < CHECK_FOR_SHUTDOWN_TIMEOUT * 3);
    }
}
