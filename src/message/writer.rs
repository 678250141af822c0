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

//! Implementation of the [`Writer`] type to write on-the-wire DNS
//! messages.

use std::fmt;

use super::constants::*;
use super::{Opcode, Question, Rcode};
use crate::class::Class;
use crate::name::Name;
use crate::rr::Type;

////////////////////////////////////////////////////////////////////////
// WRITER                                                             //
////////////////////////////////////////////////////////////////////////

/// A "frame" around a buffer that serializes a DNS message into it.
///
/// A `Writer` is constructed using [`Writer::new`] (to set an initial
/// message size limit different from the underlying buffer size) or
/// with its [`TryFrom`] implementation (which sets the message size
/// limit equal to the buffer length). The underlying buffer and initial
/// message size limit must be long enough to accommodate a full DNS
/// message header of 12 octets. The message header is initially zeroed.
///
/// Since header information is in a fixed position, it can be written
/// at any time through the appropriate `Writer` methods. Questions and
/// resource records are written sequentially into the buffer based on a
/// cursor, so [`Writer::add_question`], [`Writer::add_answer_rr`],
/// [`Writer::add_authority_rr`], and [`Writer::add_additional_rr`] must
/// be used in the proper section order; attempts to use them out of
/// order fail with [`Error::OutOfOrder`].
///
/// Names are always written uncompressed. This daemon's replies carry
/// at most the echoed question, so there is never a prior occurrence of
/// a name for a pointer to target.
///
/// When the message is complete, [`Writer::finish`] writes the section
/// counts into the header and returns the message length.
pub struct Writer<'a> {
    octets: &'a mut [u8],
    cursor: usize,
    limit: usize,
    section: Section,
    qdcount: u16,
    ancount: u16,
    nscount: u16,
    arcount: u16,
}

/// A type for recording which section of a DNS message a [`Writer`] is
/// currently serializing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Section {
    Question,
    Answer,
    Authority,
    Additional,
}

impl<'a> Writer<'a> {
    /// Creates a new `Writer` from the underlying buffer `octets`. The
    /// message size is initially limited to `limit` or `octets.len()`
    /// (whichever is smaller). If the smaller limit is too small to
    /// hold a full DNS message header of 12 octets, then this will
    /// fail.
    pub fn new(octets: &'a mut [u8], limit: usize) -> Result<Self> {
        let limit = limit.min(octets.len());
        if limit < HEADER_SIZE {
            Err(Error::Truncation)
        } else {
            octets[0..HEADER_SIZE].fill(0);
            Ok(Self {
                octets,
                cursor: HEADER_SIZE,
                limit,
                section: Section::Question,
                qdcount: 0,
                ancount: 0,
                nscount: 0,
                arcount: 0,
            })
        }
    }

    /// Returns the current 16-bit ID of the message.
    pub fn id(&self) -> u16 {
        u16::from_be_bytes(self.octets[ID_START..ID_END].try_into().unwrap())
    }

    /// Sets the 16-bit ID of the message.
    pub fn set_id(&mut self, id: u16) {
        self.octets[ID_START..ID_END].copy_from_slice(&id.to_be_bytes());
    }

    /// Returns the current value of the QR (query response) bit.
    pub fn qr(&self) -> bool {
        (self.octets[QR_BYTE] & QR_MASK) != 0
    }

    /// Sets or clears the QR (query response) bit.
    pub fn set_qr(&mut self, qr: bool) {
        self.set_flag(QR_BYTE, QR_MASK, qr);
    }

    /// Returns the message's current opcode.
    pub fn opcode(&self) -> Opcode {
        let raw = (self.octets[OPCODE_BYTE] & OPCODE_MASK) >> OPCODE_SHIFT;
        raw.try_into().unwrap()
    }

    /// Sets the message's opcode.
    pub fn set_opcode(&mut self, opcode: Opcode) {
        self.octets[OPCODE_BYTE] &= !OPCODE_MASK;
        self.octets[OPCODE_BYTE] |= u8::from(opcode) << OPCODE_SHIFT;
    }

    /// Sets or clears the AA (authoritative answer) bit.
    pub fn set_aa(&mut self, aa: bool) {
        self.set_flag(AA_BYTE, AA_MASK, aa);
    }

    /// Returns the current value of the TC (truncation) bit.
    pub fn tc(&self) -> bool {
        (self.octets[TC_BYTE] & TC_MASK) != 0
    }

    /// Sets or clears the TC (truncation) bit.
    pub fn set_tc(&mut self, tc: bool) {
        self.set_flag(TC_BYTE, TC_MASK, tc);
    }

    /// Returns the current value of the RD (recursion desired) bit.
    pub fn rd(&self) -> bool {
        (self.octets[RD_BYTE] & RD_MASK) != 0
    }

    /// Sets or clears the RD (recursion desired) bit.
    pub fn set_rd(&mut self, rd: bool) {
        self.set_flag(RD_BYTE, RD_MASK, rd);
    }

    /// Sets or clears the RA (recursion available) bit.
    pub fn set_ra(&mut self, ra: bool) {
        self.set_flag(RA_BYTE, RA_MASK, ra);
    }

    /// Returns the message's current RCODE.
    pub fn rcode(&self) -> Rcode {
        let raw = self.octets[RCODE_BYTE] & RCODE_MASK;
        raw.try_into().unwrap()
    }

    /// Sets the message's RCODE.
    pub fn set_rcode(&mut self, rcode: Rcode) {
        self.octets[RCODE_BYTE] &= !RCODE_MASK;
        self.octets[RCODE_BYTE] |= u8::from(rcode);
    }

    /// The common implementation of the flag-bit setters.
    fn set_flag(&mut self, byte: usize, mask: u8, value: bool) {
        if value {
            self.octets[byte] |= mask;
        } else {
            self.octets[byte] &= !mask;
        }
    }

    /// Adds a question to the message. This must be used before any
    /// resource records are added.
    pub fn add_question(&mut self, question: &Question) -> Result<()> {
        if self.section != Section::Question {
            return Err(Error::OutOfOrder);
        }
        let new_qdcount = self.qdcount.checked_add(1).ok_or(Error::CountOverflow)?;
        self.with_rollback(|this| {
            this.try_push(question.qname.wire_repr())?;
            this.try_push_u16(question.qtype.into())?;
            this.try_push_u16(question.qclass.into())
        })?;
        self.qdcount = new_qdcount;
        Ok(())
    }

    /// Adds a resource record to the answer section of the message.
    /// This must be used after any questions are added and before RRs
    /// are added to any other section.
    pub fn add_answer_rr(
        &mut self,
        owner: &Name,
        rr_type: Type,
        class: Class,
        ttl: u32,
        rdata: &[u8],
    ) -> Result<()> {
        self.change_section(Section::Answer)?;
        let new_ancount = self.ancount.checked_add(1).ok_or(Error::CountOverflow)?;
        self.add_rr(owner, rr_type, class, ttl, rdata)?;
        self.ancount = new_ancount;
        Ok(())
    }

    /// Adds a resource record to the authority section of the message.
    /// This must be used after any questions and answer RRs are added
    /// and before any additional RRs are added.
    pub fn add_authority_rr(
        &mut self,
        owner: &Name,
        rr_type: Type,
        class: Class,
        ttl: u32,
        rdata: &[u8],
    ) -> Result<()> {
        self.change_section(Section::Authority)?;
        let new_nscount = self.nscount.checked_add(1).ok_or(Error::CountOverflow)?;
        self.add_rr(owner, rr_type, class, ttl, rdata)?;
        self.nscount = new_nscount;
        Ok(())
    }

    /// Adds a resource record to the additional section of the message.
    /// This must be used after any questions and RRs in other sections
    /// are added.
    pub fn add_additional_rr(
        &mut self,
        owner: &Name,
        rr_type: Type,
        class: Class,
        ttl: u32,
        rdata: &[u8],
    ) -> Result<()> {
        self.change_section(Section::Additional)?;
        let new_arcount = self.arcount.checked_add(1).ok_or(Error::CountOverflow)?;
        self.add_rr(owner, rr_type, class, ttl, rdata)?;
        self.arcount = new_arcount;
        Ok(())
    }

    /// Writes out a resource record at the current cursor, atomically.
    fn add_rr(
        &mut self,
        owner: &Name,
        rr_type: Type,
        class: Class,
        ttl: u32,
        rdata: &[u8],
    ) -> Result<()> {
        if rdata.len() > u16::MAX as usize {
            return Err(Error::RdataTooLong);
        }
        self.with_rollback(|this| {
            this.try_push(owner.wire_repr())?;
            this.try_push_u16(rr_type.into())?;
            this.try_push_u16(class.into())?;
            this.try_push_u32(ttl)?;
            this.try_push_u16(rdata.len() as u16)?;
            this.try_push(rdata)
        })
    }

    /// Moves to `target` if the standard section order allows it.
    fn change_section(&mut self, target: Section) -> Result<()> {
        if (self.section as usize) <= (target as usize) {
            self.section = target;
            Ok(())
        } else {
            Err(Error::OutOfOrder)
        }
    }

    /// Runs `f`, restoring the cursor to its prior position if `f`
    /// fails. This makes multi-field writes atomic.
    fn with_rollback<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let saved_cursor = self.cursor;
        let result = f(self);
        if result.is_err() {
            self.cursor = saved_cursor;
        }
        result
    }

    /// Appends raw octets at the cursor, if the limit allows.
    fn try_push(&mut self, data: &[u8]) -> Result<()> {
        if self.cursor + data.len() > self.limit {
            Err(Error::Truncation)
        } else {
            self.octets[self.cursor..self.cursor + data.len()].copy_from_slice(data);
            self.cursor += data.len();
            Ok(())
        }
    }

    /// Appends a network-byte-order `u16` at the cursor.
    fn try_push_u16(&mut self, data: u16) -> Result<()> {
        self.try_push(&data.to_be_bytes())
    }

    /// Appends a network-byte-order `u32` at the cursor.
    fn try_push_u32(&mut self, data: u32) -> Result<()> {
        self.try_push(&data.to_be_bytes())
    }

    /// Completes the message: the section counts are written into the
    /// header, and the total message length is returned.
    pub fn finish(self) -> usize {
        self.octets[QDCOUNT_START..QDCOUNT_END].copy_from_slice(&self.qdcount.to_be_bytes());
        self.octets[ANCOUNT_START..ANCOUNT_END].copy_from_slice(&self.ancount.to_be_bytes());
        self.octets[NSCOUNT_START..NSCOUNT_END].copy_from_slice(&self.nscount.to_be_bytes());
        self.octets[ARCOUNT_START..ARCOUNT_END].copy_from_slice(&self.arcount.to_be_bytes());
        self.cursor
    }
}

impl<'a> TryFrom<&'a mut [u8]> for Writer<'a> {
    type Error = Error;

    fn try_from(octets: &'a mut [u8]) -> Result<Self> {
        let limit = octets.len();
        Self::new(octets, limit)
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that a [`Writer`] operation could not be
/// performed.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    /// Adding the question or resource record would overflow the
    /// corresponding 16-bit counter in the DNS header.
    CountOverflow,

    /// There is not enough room left in the buffer.
    Truncation,

    /// An attempt was made to serialize a question or resource record
    /// in the wrong place in the message (e.g., adding a question after
    /// an answer resource record has already been serialized).
    OutOfOrder,

    /// The provided RDATA is longer than 65,535 octets.
    RdataTooLong,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::CountOverflow => f.write_str("record count would overflow"),
            Self::Truncation => f.write_str("message would be truncated"),
            Self::OutOfOrder => f.write_str("question or record serialized out of order"),
            Self::RdataTooLong => f.write_str("RDATA is longer than 65,535 octets"),
        }
    }
}

impl std::error::Error for Error {}

/// The type returned by fallible [`Writer`] methods.
pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use lazy_static::lazy_static;

    use super::super::{Qclass, Qtype, Question, Reader};
    use super::*;

    lazy_static! {
        static ref NAME: Name = "querylog.test.".parse().unwrap();
        static ref QUESTION: Question = Question {
            qname: NAME.clone(),
            qtype: Type::A.into(),
            qclass: Class::IN.into(),
        };
    }

    #[test]
    fn writer_works() {
        // This is not meant to be exhaustive by any means. Rather, it's
        // just a check that the Writer works in a basic scenario.
        let mut buf = vec![0; 512];
        let mut writer = Writer::try_from(buf.as_mut_slice()).unwrap();
        writer.set_id(0x0703);
        writer.set_opcode(Opcode::Query);
        writer.set_qr(true);
        writer.set_tc(true);
        writer.set_rcode(Rcode::NoError);
        writer.add_question(&QUESTION).unwrap();
        let len = writer.finish();
        assert_eq!(
            &buf[0..len],
            b"\x07\x03\x82\x00\x00\x01\x00\x00\x00\x00\x00\x00\
              \x08querylog\x04test\x00\x00\x01\x00\x01"
        );
    }

    #[test]
    fn writer_writes_rrs_in_section_order() {
        let mut buf = vec![0; 512];
        let mut writer = Writer::try_from(buf.as_mut_slice()).unwrap();
        writer.add_question(&QUESTION).unwrap();
        writer
            .add_answer_rr(&NAME, Type::A, Class::IN, 3600, b"\x7f\x00\x00\x01")
            .unwrap();
        writer
            .add_additional_rr(&NAME, Type::A, Class::IN, 3600, b"\x7f\x00\x00\x02")
            .unwrap();
        assert_eq!(
            writer.add_answer_rr(&NAME, Type::A, Class::IN, 3600, b"\x7f\x00\x00\x03"),
            Err(Error::OutOfOrder),
        );
        assert_eq!(writer.add_question(&QUESTION), Err(Error::OutOfOrder));
        let len = writer.finish();
        let reader = Reader::try_from(&buf[0..len]).unwrap();
        assert_eq!(reader.qdcount(), 1);
        assert_eq!(reader.ancount(), 1);
        assert_eq!(reader.nscount(), 0);
        assert_eq!(reader.arcount(), 1);
    }

    #[test]
    fn writer_rejects_messages_over_the_limit() {
        let mut buf = vec![0; 512];
        let mut writer = Writer::new(buf.as_mut_slice(), 20).unwrap();
        assert_eq!(writer.add_question(&QUESTION), Err(Error::Truncation));
        // The failed write must not have left partial data behind.
        assert_eq!(writer.finish(), 12);
    }

    #[test]
    fn writer_constructor_rejects_short_buffers() {
        let mut buf = [0; 8];
        assert!(Writer::try_from(buf.as_mut_slice()).is_err());
    }

    #[test]
    fn header_round_trips_through_encode_and_decode() {
        let mut buf = [0; 64];
        let mut writer = Writer::try_from(buf.as_mut_slice()).unwrap();
        writer.set_id(0xbeef);
        writer.set_opcode(Opcode::Status);
        writer.set_qr(true);
        writer.set_tc(true);
        writer.set_rd(true);
        writer.set_rcode(Rcode::Refused);
        let len = writer.finish();

        let reader = Reader::try_from(&buf[0..len]).unwrap();
        assert_eq!(reader.id(), 0xbeef);
        assert_eq!(reader.opcode(), Opcode::Status);
        assert!(reader.qr());
        assert!(reader.tc());
        assert!(reader.rd());
        assert!(!reader.aa());
        assert_eq!(reader.rcode(), Rcode::Refused);
    }

    #[test]
    fn question_round_trips_through_encode_and_decode() {
        let mut buf = [0; 64];
        let mut writer = Writer::try_from(buf.as_mut_slice()).unwrap();
        writer.add_question(&QUESTION).unwrap();
        let len = writer.finish();

        let mut reader = Reader::try_from(&buf[0..len]).unwrap();
        let question = reader.read_question().unwrap();
        assert_eq!(question.qname, *NAME);
        assert_eq!(question.qtype, Qtype::from(Type::A));
        assert_eq!(question.qclass, Qclass::from(Class::IN));
    }
}
