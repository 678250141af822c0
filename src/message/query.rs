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

//! Implementation of the [`Query`] type: the decoded view of a
//! received DNS message that the rest of the daemon works with.

use super::reader::{self, Reader};
use super::{EdnsInfo, Opcode, Question, Rcode};
use crate::rr::Type;

////////////////////////////////////////////////////////////////////////
// HEADER SNAPSHOT                                                    //
////////////////////////////////////////////////////////////////////////

/// A decoded copy of the full DNS message header.
///
/// [`Reader`] can answer each of these questions directly from the
/// buffer, but the daemon logs the complete header tuple of every query
/// after the buffer has been released, so an owned snapshot is taken
/// once at decode time.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Header {
    pub id: u16,
    pub qr: bool,
    pub opcode: Opcode,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: bool,
    pub ad: bool,
    pub cd: bool,
    pub rcode: Rcode,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl Header {
    /// Takes a snapshot of the header fields visible through `reader`.
    fn from_reader(reader: &Reader) -> Self {
        Self {
            id: reader.id(),
            qr: reader.qr(),
            opcode: reader.opcode(),
            aa: reader.aa(),
            tc: reader.tc(),
            rd: reader.rd(),
            ra: reader.ra(),
            z: reader.z(),
            ad: reader.ad(),
            cd: reader.cd(),
            rcode: reader.rcode(),
            qdcount: reader.qdcount(),
            ancount: reader.ancount(),
            nscount: reader.nscount(),
            arcount: reader.arcount(),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// DECODED QUERIES                                                    //
////////////////////////////////////////////////////////////////////////

/// A decoded DNS query: the header, the first question (if any), and
/// any EDNS information from the additional section.
///
/// This is everything the daemon extracts from a received message.
/// [`Query::decode`] is deliberately forgiving: beyond the header and
/// the first question, nothing in the message can make decoding fail,
/// since the daemon's job is to log what arrived, not to validate it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Query {
    pub header: Header,

    /// The first question of the message, or [`None`] if the message
    /// claimed no questions. Such messages are still logged (with
    /// empty question fields) and still answered.
    pub question: Option<Question>,

    /// EDNS information from the OPT pseudo-RR in the additional
    /// section, or [`EdnsInfo::default`] if there was none.
    pub edns: EdnsInfo,
}

impl Query {
    /// Decodes a received DNS message.
    ///
    /// This fails only when the message cannot be identified at all:
    /// the buffer is shorter than a DNS header, or the header claims a
    /// question whose bytes are truncated or malformed. Everything
    /// after the first question is read best-effort; if the trailing
    /// sections are garbage, the query decodes without EDNS
    /// information rather than erroring.
    pub fn decode(octets: &[u8]) -> reader::Result<Self> {
        let mut reader = Reader::try_from(octets)?;
        let header = Header::from_reader(&reader);

        let question = if header.qdcount >= 1 {
            Some(reader.read_question()?)
        } else {
            None
        };

        Ok(Self {
            question,
            edns: scan_for_edns(&mut reader, &header),
            header,
        })
    }
}

/// Walks the remainder of a message looking for an OPT pseudo-RR in
/// the additional section ([RFC 6891 § 6.1.1]). The first question has
/// already been consumed from `reader`. Any malformation encountered
/// here ends the scan with whatever was found so far.
///
/// [RFC 6891 § 6.1.1]: https://datatracker.ietf.org/doc/html/rfc6891#section-6.1.1
fn scan_for_edns(reader: &mut Reader, header: &Header) -> EdnsInfo {
    // Remaining questions beyond the first are not inspected, but they
    // must be stepped over to reach the resource records.
    for _ in 1..header.qdcount {
        if reader.skip_question().is_err() {
            return EdnsInfo::default();
        }
    }

    let an_plus_ns_count = header.ancount as usize + header.nscount as usize;
    for _ in 0..an_plus_ns_count {
        if reader.read_rr().is_err() {
            return EdnsInfo::default();
        }
    }

    for _ in 0..header.arcount {
        match reader.read_rr() {
            Ok(rr) if rr.rr_type == Type::OPT => {
                return EdnsInfo::from_opt(rr.class, rr.ttl, rr.rdata);
            }
            Ok(_) => (),
            Err(_) => return EdnsInfo::default(),
        }
    }
    EdnsInfo::default()
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::super::Qtype;
    use super::*;
    use crate::name::Name;

    /// A query for example.com. IN A with RD set and an OPT record
    /// declaring a 1,232-octet UDP payload size.
    const QUERY_WITH_OPT: &[u8] =
        b"\x04\xd2\x01\x00\x00\x01\x00\x00\x00\x00\x00\x01\x07\x65\x78\x61\
          \x6d\x70\x6c\x65\x03\x63\x6f\x6d\x00\x00\x01\x00\x01\x00\x00\x29\
          \x04\xd0\x00\x00\x00\x00\x00\x00";

    #[test]
    fn decode_reads_header_question_and_edns() {
        let query = Query::decode(QUERY_WITH_OPT).unwrap();
        assert_eq!(query.header.id, 0x04d2);
        assert_eq!(query.header.opcode, Opcode::Query);
        assert!(query.header.rd);
        assert_eq!(query.header.qdcount, 1);
        assert_eq!(query.header.arcount, 1);

        let question = query.question.unwrap();
        let expected_qname: Name = "example.com.".parse().unwrap();
        assert_eq!(question.qname, expected_qname);
        assert_eq!(question.qtype, Qtype::from(Type::A));

        assert_eq!(query.edns.udp_payload_size, 1232);
        assert_eq!(query.edns.version, 0);
        assert!(!query.edns.dnssec_ok);
    }

    #[test]
    fn decode_accepts_messages_with_no_question() {
        let header_only = b"\xab\xcd\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00";
        let query = Query::decode(header_only.as_slice()).unwrap();
        assert_eq!(query.header.id, 0xabcd);
        assert!(query.question.is_none());
        assert_eq!(query.edns, EdnsInfo::default());
    }

    #[test]
    fn decode_rejects_short_input() {
        for size in 0..12 {
            assert!(Query::decode(&QUERY_WITH_OPT[0..size]).is_err());
        }
    }

    #[test]
    fn decode_rejects_truncated_questions() {
        // qdcount says 1, but the message ends inside the QNAME.
        assert!(Query::decode(&QUERY_WITH_OPT[0..20]).is_err());
    }

    #[test]
    fn decode_survives_garbage_after_the_question() {
        // Truncate in the middle of the OPT record: the question still
        // decodes, and the EDNS information falls back to the default.
        let query = Query::decode(&QUERY_WITH_OPT[0..33]).unwrap();
        assert!(query.question.is_some());
        assert_eq!(query.edns, EdnsInfo::default());
    }

    #[test]
    fn decode_terminates_on_adversarial_pointer_chains() {
        // qdcount = 1 with a QNAME that is a pointer to itself.
        let message = b"\x00\x01\x00\x00\x00\x01\x00\x00\x00\x00\x00\x00\xc0\x0c";
        assert!(Query::decode(message.as_slice()).is_err());
    }

    #[test]
    fn decode_ignores_non_opt_additional_records() {
        // One additional A record (not OPT): no EDNS info results.
        let message = b"\x00\x01\x00\x00\x00\x00\x00\x00\x00\x00\x00\x01\
                        \x00\x00\x01\x00\x01\x00\x00\x00\x00\x00\x04\x7f\x00\x00\x01";
        let query = Query::decode(message.as_slice()).unwrap();
        assert!(query.question.is_none());
        assert_eq!(query.edns, EdnsInfo::default());
    }
}
