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

//! The query-handling logic of the daemon.
//!
//! This module is pure with respect to I/O: given a decoded
//! [`Query`] and the [`ConnectionInfo`] describing how it arrived,
//! [`handle_query`] produces the [`LogRecord`] to emit and the
//! [`ReplyPolicy`] to apply, and [`write_reply`] serializes the
//! corresponding response. The network side lives in
//! [`io`](crate::io); the seam between the two is deliberately narrow
//! so that the policy can be tested without sockets.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::message::{writer, Opcode, Query, Rcode, Writer};

mod log;

pub use self::log::{LogRecord, LogSink, QuerySink};

////////////////////////////////////////////////////////////////////////
// CONNECTION INFORMATION                                             //
////////////////////////////////////////////////////////////////////////

/// Indicates the transport through which a DNS message was received.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    /// Returns the IP protocol number of the transport (6 for TCP, 17
    /// for UDP). This is the form in which the transport appears in log
    /// records.
    pub fn protocol_number(self) -> u8 {
        match self {
            Self::Tcp => 6,
            Self::Udp => 17,
        }
    }
}

/// Describes how a DNS message arrived: the peer it came from, the
/// local socket it arrived on, and the transport used.
///
/// A `ConnectionInfo` is constructed fresh for each received message by
/// the listener that received it, and is read-only thereafter.
///
/// It is important for meaningful logs that IPv4-mapped IPv6 addresses
/// of the kind that dual-stack sockets produce (e.g. `::ffff:192.0.2.1`)
/// be reported as the IPv4 addresses they stand for. The constructor
/// performs that canonicalization on the peer and local addresses
/// alike; calling I/O code need not concern itself with this task.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ConnectionInfo {
    pub peer_addr: IpAddr,
    pub peer_port: u16,
    pub local_addr: IpAddr,
    pub local_port: u16,
    pub transport: Transport,
}

impl ConnectionInfo {
    /// Creates a new `ConnectionInfo` from the peer and local socket
    /// addresses of a received message.
    pub fn new(peer: SocketAddr, local: SocketAddr, transport: Transport) -> Self {
        Self {
            peer_addr: canonicalize_ip(peer.ip()),
            peer_port: peer.port(),
            local_addr: canonicalize_ip(local.ip()),
            local_port: local.port(),
            transport,
        }
    }
}

/// Rewrites an IPv4-mapped IPv6 address to its plain IPv4 form; any
/// other address is returned unchanged.
fn canonicalize_ip(addr: IpAddr) -> IpAddr {
    // TODO: just use IpAddr::to_canonical if/when it's stabilized.
    match addr {
        original @ IpAddr::V4(_) => original,
        original @ IpAddr::V6(ipv6) => {
            let octets = ipv6.octets();
            if octets[0..10].iter().all(|o| *o == 0) && octets[10] == 0xff && octets[11] == 0xff {
                IpAddr::V4(Ipv4Addr::new(
                    octets[12], octets[13], octets[14], octets[15],
                ))
            } else {
                original
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////
// REPLY POLICY                                                       //
////////////////////////////////////////////////////////////////////////

/// How the daemon answers a query.
///
/// The daemon never answers with data. Over UDP it claims truncation,
/// which sends a well-behaved querier to TCP; over TCP it refuses.
/// The pair makes the daemon useless as an amplifier while remaining a
/// well-formed DNS speaker.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ReplyPolicy {
    /// NOERROR with the TC bit set and no records: "retry over TCP."
    TruncatedOk,

    /// REFUSED with no records.
    Refused,
}

impl ReplyPolicy {
    /// Returns the policy for a query received over `transport`.
    pub fn for_transport(transport: Transport) -> Self {
        match transport {
            Transport::Udp => Self::TruncatedOk,
            Transport::Tcp => Self::Refused,
        }
    }

    /// The RCODE the reply carries.
    pub fn rcode(self) -> Rcode {
        match self {
            Self::TruncatedOk => Rcode::NoError,
            Self::Refused => Rcode::Refused,
        }
    }

    /// Whether the reply carries the TC bit.
    pub fn tc(self) -> bool {
        matches!(self, Self::TruncatedOk)
    }
}

////////////////////////////////////////////////////////////////////////
// QUERY HANDLING                                                     //
////////////////////////////////////////////////////////////////////////

/// Handles one decoded query: produces the record to log and the reply
/// policy to apply.
///
/// This function has no side effects and touches no shared state. A
/// query with no question still produces a log record (with empty
/// question fields) and still receives the transport-appropriate
/// reply.
pub fn handle_query(query: &Query, conn: &ConnectionInfo) -> (LogRecord, ReplyPolicy) {
    (
        LogRecord::new(query, conn),
        ReplyPolicy::for_transport(conn.transport),
    )
}

/// Serializes the reply to `query` under `policy` into `buf`, returning
/// the reply's length.
///
/// The reply echoes the query's ID and opcode, sets the QR bit, applies
/// the policy's RCODE and TC bit, and echoes the question if one was
/// decoded. All record sections are left empty. For opcode QUERY the RD
/// bit is copied from the query (RD is only defined for that opcode).
pub fn write_reply(query: &Query, policy: ReplyPolicy, buf: &mut [u8]) -> writer::Result<usize> {
    let mut response = Writer::try_from(buf)?;
    response.set_id(query.header.id);
    response.set_qr(true);
    response.set_opcode(query.header.opcode);
    if query.header.opcode == Opcode::Query {
        response.set_rd(query.header.rd);
    }
    response.set_rcode(policy.rcode());
    response.set_tc(policy.tc());
    if let Some(ref question) = query.question {
        response.add_question(question)?;
    }
    Ok(response.finish())
}

/// The size of buffer that [`write_reply`] requires: a header plus one
/// question of maximal size, rounded up to the classic 512-octet UDP
/// message limit.
pub const REPLY_BUF_SIZE: usize = 512;

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Qclass, Qtype, Question, Rcode, Reader};

    fn decoded(octets: &[u8]) -> Query {
        Query::decode(octets).unwrap()
    }

    fn example_query() -> Query {
        let mut buf = [0; 64];
        let mut writer = Writer::try_from(buf.as_mut_slice()).unwrap();
        writer.set_id(0x1234);
        writer.set_rd(true);
        writer
            .add_question(&Question {
                qname: "example.com.".parse().unwrap(),
                qtype: Qtype::from(crate::rr::Type::A),
                qclass: Qclass::from(crate::class::Class::IN),
            })
            .unwrap();
        let len = writer.finish();
        decoded(&buf[0..len])
    }

    fn udp_conn() -> ConnectionInfo {
        ConnectionInfo::new(
            "192.0.2.1:53549".parse().unwrap(),
            "198.51.100.1:53".parse().unwrap(),
            Transport::Udp,
        )
    }

    #[test]
    fn udp_queries_get_truncated_noerror_replies() {
        let query = example_query();
        let (_, policy) = handle_query(&query, &udp_conn());
        assert_eq!(policy, ReplyPolicy::TruncatedOk);

        let mut buf = [0; REPLY_BUF_SIZE];
        let len = write_reply(&query, policy, &mut buf).unwrap();
        let reader = Reader::try_from(&buf[0..len]).unwrap();
        assert_eq!(reader.id(), 0x1234);
        assert!(reader.qr());
        assert!(reader.tc());
        assert!(reader.rd());
        assert_eq!(reader.rcode(), Rcode::NoError);
        assert_eq!(reader.qdcount(), 1);
        assert_eq!(reader.ancount(), 0);
        assert_eq!(reader.nscount(), 0);
        assert_eq!(reader.arcount(), 0);
    }

    #[test]
    fn tcp_queries_get_refused_replies() {
        let query = example_query();
        let mut conn = udp_conn();
        conn.transport = Transport::Tcp;
        let (_, policy) = handle_query(&query, &conn);
        assert_eq!(policy, ReplyPolicy::Refused);

        let mut buf = [0; REPLY_BUF_SIZE];
        let len = write_reply(&query, policy, &mut buf).unwrap();
        let reader = Reader::try_from(&buf[0..len]).unwrap();
        assert_eq!(reader.id(), 0x1234);
        assert!(reader.qr());
        assert!(!reader.tc());
        assert_eq!(reader.rcode(), Rcode::Refused);
        assert_eq!(reader.ancount(), 0);
    }

    #[test]
    fn questionless_queries_are_still_handled() {
        let header_only = b"\xab\xcd\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00";
        let query = decoded(header_only.as_slice());
        let (record, policy) = handle_query(&query, &udp_conn());
        assert_eq!(policy, ReplyPolicy::TruncatedOk);
        assert!(record.to_string().ends_with(",,,"));

        let mut buf = [0; REPLY_BUF_SIZE];
        let len = write_reply(&query, policy, &mut buf).unwrap();
        let reader = Reader::try_from(&buf[0..len]).unwrap();
        assert_eq!(reader.id(), 0xabcd);
        assert_eq!(reader.qdcount(), 0);
    }

    #[test]
    fn connection_info_canonicalizes_both_addresses() {
        let conn = ConnectionInfo::new(
            "[::ffff:192.0.2.1]:1053".parse().unwrap(),
            "[::ffff:198.51.100.2]:53".parse().unwrap(),
            Transport::Tcp,
        );
        assert_eq!(conn.peer_addr, "192.0.2.1".parse::<IpAddr>().unwrap());
        assert_eq!(conn.local_addr, "198.51.100.2".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn plain_ipv6_addresses_are_left_alone() {
        let addr: IpAddr = "2001:db8::1".parse().unwrap();
        assert_eq!(canonicalize_ip(addr), addr);
    }

    #[test]
    fn protocol_numbers_match_the_ip_registry() {
        assert_eq!(Transport::Udp.protocol_number(), 17);
        assert_eq!(Transport::Tcp.protocol_number(), 6);
    }
}
