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

//! Implementation of the [`Reader`] type to read on-the-wire DNS
//! messages.

use std::convert::TryFrom;
use std::fmt;

use super::constants::*;
use super::{Opcode, Question, Rcode};
use crate::name::{self, Name};
use crate::rr::Type;

////////////////////////////////////////////////////////////////////////
// READER                                                             //
////////////////////////////////////////////////////////////////////////

/// A "frame" around a buffer containing a DNS message that enables
/// reading the message data.
///
/// A `Reader` is constructed using its [`TryFrom`] implementation. Any
/// underlying buffer for a reader must contain at least a full DNS
/// message header of 12 octets; otherwise the construction will fail.
///
/// Since header information is in a fixed position, it can be read
/// at any time through the appropriate `Reader` methods. Questions and
/// resource records are read using a cursor, which is initially set to
/// the first octet after the DNS header; the
/// [`read_question`](Reader::read_question),
/// [`skip_question`](Reader::skip_question), and
/// [`read_rr`](Reader::read_rr) methods must be called sequentially to
/// walk the sections in the order they appear in the message.
///
/// All reads are bounds-checked; a `Reader` never panics on malformed
/// input.
#[derive(Eq, PartialEq)]
pub struct Reader<'a> {
    octets: &'a [u8],
    cursor: usize,
}

impl<'a> Reader<'a> {
    /// Returns the 16-bit ID of the message.
    pub fn id(&self) -> u16 {
        u16::from_be_bytes(self.octets[ID_START..ID_END].try_into().unwrap())
    }

    /// Returns whether the QR (query response) bit is set.
    pub fn qr(&self) -> bool {
        (self.octets[QR_BYTE] & QR_MASK) != 0
    }

    /// Returns the message's opcode.
    pub fn opcode(&self) -> Opcode {
        let raw = (self.octets[OPCODE_BYTE] & OPCODE_MASK) >> OPCODE_SHIFT;
        raw.try_into().unwrap()
    }

    /// Returns whether the AA (authoritative answer) bit is set.
    pub fn aa(&self) -> bool {
        (self.octets[AA_BYTE] & AA_MASK) != 0
    }

    /// Returns whether the TC (truncation) bit is set.
    pub fn tc(&self) -> bool {
        (self.octets[TC_BYTE] & TC_MASK) != 0
    }

    /// Returns whether the RD (recursion desired) bit is set.
    pub fn rd(&self) -> bool {
        (self.octets[RD_BYTE] & RD_MASK) != 0
    }

    /// Returns whether the RA (recursion available) bit is set.
    pub fn ra(&self) -> bool {
        (self.octets[RA_BYTE] & RA_MASK) != 0
    }

    /// Returns whether the reserved Z bit is set.
    pub fn z(&self) -> bool {
        (self.octets[Z_BYTE] & Z_MASK) != 0
    }

    /// Returns whether the AD (authentic data) bit is set.
    pub fn ad(&self) -> bool {
        (self.octets[AD_BYTE] & AD_MASK) != 0
    }

    /// Returns whether the CD (checking disabled) bit is set.
    pub fn cd(&self) -> bool {
        (self.octets[CD_BYTE] & CD_MASK) != 0
    }

    /// Returns the RCODE of the message.
    pub fn rcode(&self) -> Rcode {
        let raw = self.octets[RCODE_BYTE] & RCODE_MASK;
        raw.try_into().unwrap()
    }

    /// Returns the number of questions in the message.
    pub fn qdcount(&self) -> u16 {
        u16::from_be_bytes(self.octets[QDCOUNT_START..QDCOUNT_END].try_into().unwrap())
    }

    /// Returns the number of answers in the message.
    pub fn ancount(&self) -> u16 {
        u16::from_be_bytes(self.octets[ANCOUNT_START..ANCOUNT_END].try_into().unwrap())
    }

    /// Returns the number of authority records in the message.
    pub fn nscount(&self) -> u16 {
        u16::from_be_bytes(self.octets[NSCOUNT_START..NSCOUNT_END].try_into().unwrap())
    }

    /// Returns the number of additional records in the message.
    pub fn arcount(&self) -> u16 {
        u16::from_be_bytes(self.octets[ARCOUNT_START..ARCOUNT_END].try_into().unwrap())
    }

    /// Reads a [`Question`] starting at the current cursor.
    ///
    /// This method is atomic, in that the cursor is not changed on
    /// failure.
    pub fn read_question(&mut self) -> Result<Question> {
        let (qname, qname_len) =
            Name::try_from_compressed(self.octets, self.cursor).map_err(Error::InvalidName)?;
        let qname_end = self.cursor + qname_len;
        let qtype = read_u16(self.octets.get(qname_end..).unwrap_or(&[]))?.into();
        let qclass = read_u16(self.octets.get(qname_end + 2..).unwrap_or(&[]))?.into();
        self.cursor = qname_end + 4;
        Ok(Question {
            qname,
            qtype,
            qclass,
        })
    }

    /// Skips a question starting at the current cursor, without
    /// constructing a [`Question`].
    ///
    /// This method is atomic, in that the cursor is not changed on
    /// failure.
    pub fn skip_question(&mut self) -> Result<()> {
        let octets_from_cursor = self.octets.get(self.cursor..).unwrap_or(&[]);
        let qname_len = Name::skip_compressed(octets_from_cursor).map_err(Error::InvalidName)?;
        if octets_from_cursor.len() < qname_len + 4 {
            Err(Error::UnexpectedEomInField)
        } else {
            self.cursor += qname_len + 4;
            Ok(())
        }
    }

    /// Reads a resource record at the current cursor. The owner name is
    /// skipped rather than parsed, since this daemon never inspects RR
    /// owners; the fixed fields and a borrow of the RDATA are returned.
    ///
    /// This method is atomic, in that the cursor is not changed on
    /// failure.
    pub fn read_rr(&mut self) -> Result<ReadRr<'a>> {
        let octets_from_cursor = self.octets.get(self.cursor..).unwrap_or(&[]);
        let owner_len = Name::skip_compressed(octets_from_cursor).map_err(Error::InvalidName)?;
        let rr_type = read_u16(octets_from_cursor.get(owner_len..).unwrap_or(&[]))?.into();
        let class = read_u16(octets_from_cursor.get(owner_len + 2..).unwrap_or(&[]))?;
        let ttl = read_u32(octets_from_cursor.get(owner_len + 4..).unwrap_or(&[]))?;
        let rdlength = read_u16(octets_from_cursor.get(owner_len + 8..).unwrap_or(&[]))? as usize;
        let rdata_start = owner_len + 10;
        let rdata = octets_from_cursor
            .get(rdata_start..rdata_start + rdlength)
            .ok_or(Error::UnexpectedEomInField)?;
        self.cursor += rdata_start + rdlength;
        Ok(ReadRr {
            rr_type,
            class,
            ttl,
            rdata,
        })
    }

    /// Returns whether the `Reader`'s cursor has reached the end of the
    /// message.
    pub fn at_eom(&self) -> bool {
        self.cursor >= self.octets.len()
    }
}

impl<'a> TryFrom<&'a [u8]> for Reader<'a> {
    type Error = Error;

    fn try_from(octets: &'a [u8]) -> Result<Self> {
        if octets.len() >= HEADER_SIZE {
            Ok(Self {
                octets,
                cursor: HEADER_SIZE,
            })
        } else {
            Err(Error::HeaderTooShort)
        }
    }
}

impl fmt::Debug for Reader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Reader")
            .field("id", &self.id())
            .field("qr", &self.qr())
            .field("opcode", &self.opcode())
            .field("aa", &self.aa())
            .field("tc", &self.tc())
            .field("rd", &self.rd())
            .field("ra", &self.ra())
            .field("rcode", &self.rcode())
            .field("qdcount", &self.qdcount())
            .field("ancount", &self.ancount())
            .field("nscount", &self.nscount())
            .field("arcount", &self.arcount())
            .field("cursor", &self.cursor)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////
// HELPERS FOR READING MULTI-BYTE INTEGERS                            //
////////////////////////////////////////////////////////////////////////

/// Reads a network-byte-order `u16` from the beginning of `octets`.
fn read_u16(octets: &[u8]) -> Result<u16> {
    let array = octets
        .get(0..2)
        .ok_or(Error::UnexpectedEomInField)?
        .try_into()
        .unwrap();
    Ok(u16::from_be_bytes(array))
}

/// Reads a network-byte-order `u32` from the beginning of `octets`.
fn read_u32(octets: &[u8]) -> Result<u32> {
    let array = octets
        .get(0..4)
        .ok_or(Error::UnexpectedEomInField)?
        .try_into()
        .unwrap();
    Ok(u32::from_be_bytes(array))
}

////////////////////////////////////////////////////////////////////////
// READ RR STRUCTURE                                                  //
////////////////////////////////////////////////////////////////////////

/// A structure containing RR data as returned by [`Reader::read_rr`].
///
/// The class is left as a raw [`u16`]: for the OPT pseudo-RR (the only
/// record this daemon looks at closely) the CLASS field is not a class
/// at all, but the requestor's maximum UDP payload size.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReadRr<'a> {
    pub rr_type: Type,
    pub class: u16,
    pub ttl: u32,
    pub rdata: &'a [u8],
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that a DNS message could not be decoded.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    HeaderTooShort,
    UnexpectedEomInField,
    InvalidName(name::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::HeaderTooShort => f.write_str("header too short"),
            Self::UnexpectedEomInField => f.write_str("unexpected end of message in field"),
            Self::InvalidName(err) => write!(f, "invalid name: {}", err),
        }
    }
}

impl std::error::Error for Error {}

/// The type returned by fallible [`Reader`] methods.
pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::super::{Qclass, Qtype};
    use super::*;
    use crate::class::Class;

    /// A query for example.com. IN A with an OPT record declaring a
    /// 4,096-octet UDP payload size and DO set.
    const EXAMPLE_COM_A_QUERY: &[u8] =
        b"\xe2\xd7\x01\x00\x00\x01\x00\x00\x00\x00\x00\x01\x07\x65\x78\x61\
          \x6d\x70\x6c\x65\x03\x63\x6f\x6d\x00\x00\x01\x00\x01\x00\x00\x29\
          \x10\x00\x00\x00\x80\x00\x00\x00";

    #[test]
    fn reader_works() {
        let mut reader = Reader::try_from(EXAMPLE_COM_A_QUERY).unwrap();
        let expected_qname: Name = "example.com.".parse().unwrap();

        // Check the header.
        assert_eq!(reader.id(), 0xe2d7);
        assert!(!reader.qr());
        assert_eq!(reader.opcode(), Opcode::Query);
        assert!(!reader.aa());
        assert!(!reader.tc());
        assert!(reader.rd());
        assert!(!reader.ra());
        assert!(!reader.z());
        assert!(!reader.ad());
        assert!(!reader.cd());
        assert_eq!(reader.rcode(), Rcode::NoError);
        assert_eq!(reader.qdcount(), 1);
        assert_eq!(reader.ancount(), 0);
        assert_eq!(reader.nscount(), 0);
        assert_eq!(reader.arcount(), 1);

        // Check the question.
        let question = reader.read_question().unwrap();
        assert_eq!(question.qname, expected_qname);
        assert_eq!(question.qtype, Qtype::from(Type::A));
        assert_eq!(question.qclass, Qclass::from(Class::IN));

        // Check the OPT record.
        let opt = reader.read_rr().unwrap();
        assert_eq!(opt.rr_type, Type::OPT);
        assert_eq!(opt.class, 4096);
        assert_eq!(opt.ttl, 0x8000);
        assert!(opt.rdata.is_empty());

        // And that should be it!
        assert!(reader.at_eom());
    }

    #[test]
    fn reader_constructor_rejects_short_message() {
        for size in 0..HEADER_SIZE {
            let buf = vec![0; size];
            assert_eq!(Reader::try_from(buf.as_slice()), Err(Error::HeaderTooShort));
        }
    }

    #[test]
    fn read_question_rejects_truncated_questions() {
        // Chop the fixture off in the middle of the QNAME, and then in
        // the middle of the fixed question fields.
        for end in [16, 26] {
            let mut reader = Reader::try_from(&EXAMPLE_COM_A_QUERY[0..end]).unwrap();
            assert!(reader.read_question().is_err());
        }
    }

    #[test]
    fn read_rr_rejects_truncated_rdata() {
        // An RR whose RDLENGTH promises four octets but delivers one.
        let message = b"\x00\x00\x00\x00\x00\x00\x00\x01\x00\x00\x00\x00\
                        \x00\x00\x01\x00\x01\x00\x00\x00\x00\x00\x04\xff";
        let mut reader = Reader::try_from(message.as_slice()).unwrap();
        assert_eq!(reader.read_rr(), Err(Error::UnexpectedEomInField));
    }

    #[test]
    fn skip_question_matches_read_question() {
        let mut reading = Reader::try_from(EXAMPLE_COM_A_QUERY).unwrap();
        let mut skipping = Reader::try_from(EXAMPLE_COM_A_QUERY).unwrap();
        reading.read_question().unwrap();
        skipping.skip_question().unwrap();
        assert_eq!(reading.cursor, skipping.cursor);
    }
}
