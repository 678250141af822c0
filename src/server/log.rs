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

//! Implementation of the per-query [`LogRecord`] and the [`QuerySink`]
//! seam through which records leave the daemon.

use std::fmt;
use std::net::IpAddr;

use log::info;

use super::{ConnectionInfo, Transport};
use crate::message::{Header, Query, Question};

////////////////////////////////////////////////////////////////////////
// LOG RECORDS                                                        //
////////////////////////////////////////////////////////////////////////

/// Everything the daemon records about one query.
///
/// A `LogRecord` is constructed once per received message and is
/// immutable thereafter. Its [`Display`](fmt::Display) implementation
/// renders the record's line format: the fields below, comma-joined,
/// with flag bits as `0`/`1`, opcode and RCODE numeric, the transport
/// as its IP protocol number, and the question in presentation format
/// (empty fields if the query had no question). The timestamp is left
/// to the sink, which for the stock [`LogSink`] means the logging
/// backend's own line prefix.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogRecord {
    pub peer_addr: IpAddr,
    pub peer_port: u16,
    pub local_addr: IpAddr,
    pub local_port: u16,
    pub transport: Transport,
    pub header: Header,
    pub edns_version: u8,
    pub edns_do: bool,
    pub edns_udp_size: u16,
    pub edns_option_count: usize,
    pub question: Option<Question>,
}

impl LogRecord {
    /// Builds the record for `query` as received over `conn`.
    pub fn new(query: &Query, conn: &ConnectionInfo) -> Self {
        Self {
            peer_addr: conn.peer_addr,
            peer_port: conn.peer_port,
            local_addr: conn.local_addr,
            local_port: conn.local_port,
            transport: conn.transport,
            header: query.header,
            edns_version: query.edns.version,
            edns_do: query.edns.dnssec_ok,
            edns_udp_size: query.edns.udp_payload_size,
            edns_option_count: query.edns.options.len(),
            question: query.question.clone(),
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let h = &self.header;
        write!(
            f,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},",
            self.peer_addr,
            self.peer_port,
            self.local_addr,
            self.transport.protocol_number(),
            h.id,
            u8::from(h.qr),
            u8::from(h.opcode),
            u8::from(h.aa),
            u8::from(h.tc),
            u8::from(h.rd),
            u8::from(h.ra),
            u8::from(h.z),
            u8::from(h.ad),
            u8::from(h.cd),
            u8::from(h.rcode),
            h.qdcount,
            h.ancount,
            h.nscount,
            h.arcount,
            self.edns_version,
            u8::from(self.edns_do),
            self.edns_udp_size,
            self.edns_option_count,
        )?;
        match self.question {
            Some(ref question) => write!(
                f,
                "{},{},{}",
                question.qclass, question.qtype, question.qname
            ),
            None => f.write_str(",,"),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// QUERY SINKS                                                        //
////////////////////////////////////////////////////////////////////////

/// The destination for query records.
///
/// This is the seam between query handling and whatever collects the
/// records. Implementations must tolerate concurrent calls from
/// independent listener threads; each call corresponds to exactly one
/// query, and the dispatch loops guarantee that a query's record is
/// submitted before its reply is sent.
pub trait QuerySink: Send + Sync {
    /// Accepts the record of one query.
    fn record(&self, record: &LogRecord);
}

/// The production [`QuerySink`]: emits each record as a single line
/// through the [`log`] facade under the `querylog::query` target, from
/// which the logging backend can forward to syslog or stderr. One
/// record is one `info!` call, so concurrent writers cannot interleave
/// within a line.
pub struct LogSink;

impl QuerySink for LogSink {
    fn record(&self, record: &LogRecord) {
        info!(target: "querylog::query", "{}", record);
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::super::{handle_query, ConnectionInfo};
    use super::*;
    use crate::class::Class;
    use crate::message::{Qclass, Qtype, Question, Writer};
    use crate::rr::Type;

    fn sample_query_bytes() -> Vec<u8> {
        let mut buf = vec![0; 512];
        let mut writer = Writer::try_from(buf.as_mut_slice()).unwrap();
        writer.set_id(4660);
        writer.set_rd(true);
        writer
            .add_question(&Question {
                qname: "example.com.".parse().unwrap(),
                qtype: Qtype::from(Type::A),
                qclass: Qclass::from(Class::IN),
            })
            .unwrap();
        let len = writer.finish();
        buf.truncate(len);
        buf
    }

    #[test]
    fn log_line_has_the_documented_format() {
        let octets = sample_query_bytes();
        let query = Query::decode(&octets).unwrap();
        let conn = ConnectionInfo::new(
            "192.0.2.1:53549".parse().unwrap(),
            "198.51.100.1:53".parse().unwrap(),
            Transport::Udp,
        );
        let (record, _) = handle_query(&query, &conn);
        assert_eq!(
            record.to_string(),
            "192.0.2.1,53549,198.51.100.1,17,4660,0,0,0,0,1,0,0,0,0,0,1,0,0,0,0,0,0,0,IN,A,example.com"
        );
    }

    #[test]
    fn log_line_over_tcp_carries_protocol_six() {
        let octets = sample_query_bytes();
        let query = Query::decode(&octets).unwrap();
        let conn = ConnectionInfo::new(
            "[2001:db8::2]:4242".parse().unwrap(),
            "[2001:db8::1]:53".parse().unwrap(),
            Transport::Tcp,
        );
        let (record, _) = handle_query(&query, &conn);
        let line = record.to_string();
        assert!(line.starts_with("2001:db8::2,4242,2001:db8::1,6,"));
    }

    #[test]
    fn log_line_with_no_question_leaves_the_fields_empty() {
        let header_only = b"\x00\x2a\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00";
        let query = Query::decode(header_only.as_slice()).unwrap();
        let conn = ConnectionInfo::new(
            "192.0.2.1:1024".parse().unwrap(),
            "192.0.2.2:53".parse().unwrap(),
            Transport::Udp,
        );
        let record = LogRecord::new(&query, &conn);
        assert!(record.to_string().ends_with(",0,0,0,0,,,"));
    }
}
