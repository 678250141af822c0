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

//! Implementation of parsing and skipping of on-the-wire names.
//!
//! Everything here is written for untrusted input. Out-of-bounds
//! reads are impossible (all indexing goes through [`slice::get`]),
//! and the rule of [RFC 1035 § 4.1.4] that compression pointers refer
//! to a *prior* occurrence of a name is enforced, which bounds the
//! work done on any input: each chunk of a compressed name must start
//! strictly before the chunk that pointed to it.
//!
//! [RFC 1035 § 4.1.4]: https://datatracker.ietf.org/doc/html/rfc1035#section-4.1.4

use arrayvec::ArrayVec;

use super::{Error, Name, MAX_LABEL_LEN, MAX_WIRE_LEN};

////////////////////////////////////////////////////////////////////////
// PARSING OF COMPRESSED ON-THE-WIRE NAMES                            //
////////////////////////////////////////////////////////////////////////

/// Parses a (possibly compressed) name starting at index `start` of
/// `octets`. Pointers are followed. Indices given in pointers are
/// treated as indices of `octets`, so the intention is for an entire
/// DNS message to be passed in `octets`. This is the implementation of
/// [`Name::try_from_compressed`].
pub fn parse_compressed_name(octets: &[u8], start: usize) -> Result<(Name, usize), Error> {
    let mut next_chunk = Some(start);
    let mut wire_len_of_first_chunk = None;
    let mut wire_repr = ArrayVec::<u8, MAX_WIRE_LEN>::new();

    while let Some(chunk_start) = next_chunk {
        let mut finished_with_chunk = false;
        let mut index = chunk_start;

        while !finished_with_chunk {
            let len = *octets.get(index).ok_or(Error::UnexpectedEom)?;
            if len & 0xc0 == 0xc0 {
                next_chunk = Some(parse_pointer(octets, chunk_start, index)? as usize);
                index += 2;
                finished_with_chunk = true;
            } else if len > (MAX_LABEL_LEN as u8) {
                return Err(Error::LabelTooLong);
            } else {
                let end_of_label = index + len as usize + 1;
                if end_of_label > octets.len() {
                    return Err(Error::UnexpectedEom);
                }
                wire_repr
                    .try_extend_from_slice(&octets[index..end_of_label])
                    .or(Err(Error::NameTooLong))?;
                index = end_of_label;
                if len == 0 {
                    next_chunk = None;
                    finished_with_chunk = true;
                }
            }
        }

        wire_len_of_first_chunk.get_or_insert(index - chunk_start);
    }

    let name = Name::from_validated_wire(&wire_repr);
    Ok((name, wire_len_of_first_chunk.unwrap()))
}

/// Parses a pointer at `index` in `octets`. This also checks that the
/// pointer refers to an index *earlier* than the start of the chunk it
/// is in (`chunk_start`); this is what prevents pointer loops.
fn parse_pointer(octets: &[u8], chunk_start: usize, index: usize) -> Result<u16, Error> {
    if index + 1 < octets.len() {
        let pointer_bytes = [octets[index], octets[index + 1]];
        let pointer = u16::from_be_bytes(pointer_bytes) & (!0xc000);
        if (pointer as usize) >= chunk_start {
            Err(Error::InvalidPointer)
        } else {
            Ok(pointer)
        }
    } else {
        Err(Error::UnexpectedEom)
    }
}

////////////////////////////////////////////////////////////////////////
// SKIPPING OF COMPRESSED ON-THE-WIRE NAMES                           //
////////////////////////////////////////////////////////////////////////

/// Skips a compressed name starting at the beginning of `octets`. This
/// continues until the null label or the first pointer label, whichever
/// comes first, and returns the number of octets read. The pointer
/// target itself, if any, is not validated; this is for stepping over
/// names whose content does not matter (e.g. resource record owners).
pub fn skip_compressed_name(octets: &[u8]) -> Result<usize, Error> {
    let mut offset = 0;
    loop {
        let len = *octets.get(offset).ok_or(Error::UnexpectedEom)?;
        if len & 0xc0 == 0xc0 {
            if offset + 1 < octets.len() {
                return Ok(offset + 2);
            } else {
                return Err(Error::UnexpectedEom);
            }
        } else if len > (MAX_LABEL_LEN as u8) {
            return Err(Error::LabelTooLong);
        } else if len == 0 {
            return Ok(offset + 1);
        }
        offset += len as usize + 1;
        if offset > MAX_WIRE_LEN {
            return Err(Error::NameTooLong);
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_compressed_name_accepts_valid_uncompressed_names() {
        let octets = b"junk\x07example\x04test\x00junk";
        let target: Name = "example.test.".parse().unwrap();
        assert_eq!(parse_compressed_name(octets, 4), Ok((target, 14)));
    }

    #[test]
    fn parse_compressed_name_accepts_valid_compressed_names() {
        let octets = b"junk\x04test\x00junk\x07example\xc0\x04junk";
        let target: Name = "example.test.".parse().unwrap();
        assert_eq!(parse_compressed_name(octets, 14), Ok((target, 10)));
    }

    #[test]
    fn parse_compressed_name_rejects_long_label() {
        assert_eq!(
            parse_compressed_name(
                b"\x40xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx\x00",
                0
            ),
            Err(Error::LabelTooLong),
        );
    }

    #[test]
    fn parse_compressed_name_rejects_long_name_with_pointers() {
        // 127 one-octet labels plus the null label is fine on its own,
        // but a second chunk of 16 more labels pointing back at it
        // overflows the 255-octet limit when uncompressed.
        let mut octets = Vec::new();
        for _ in 0..127 {
            octets.extend_from_slice(b"\x01x");
        }
        octets.push(0);
        let second_chunk = octets.len();
        for _ in 0..16 {
            octets.extend_from_slice(b"\x01x");
        }
        octets.extend_from_slice(b"\xc0\x00");
        assert_eq!(
            parse_compressed_name(&octets, second_chunk),
            Err(Error::NameTooLong),
        );
    }

    #[test]
    fn parse_compressed_name_rejects_unexpected_eom() {
        assert_eq!(
            parse_compressed_name(b"\x07example\x04tes", 0),
            Err(Error::UnexpectedEom),
        );
        assert_eq!(parse_compressed_name(b"", 0), Err(Error::UnexpectedEom));
        // The start index may lie past the end of the buffer when a
        // truncated message claims more records than it carries.
        assert_eq!(
            parse_compressed_name(b"\x00", 5),
            Err(Error::UnexpectedEom),
        );
    }

    #[test]
    fn parse_compressed_name_rejects_pointer_loops() {
        assert_eq!(
            parse_compressed_name(b"\xc0\x00", 0),
            Err(Error::InvalidPointer),
        );
        assert_eq!(
            parse_compressed_name(b"\x01a\x01b\xc0\x00", 2),
            Err(Error::InvalidPointer),
        );
        // A two-pointer cycle must also terminate.
        assert_eq!(
            parse_compressed_name(b"\xc0\x02\xc0\x00", 0),
            Err(Error::InvalidPointer),
        );
    }

    #[test]
    fn parse_compressed_name_rejects_forward_pointers() {
        assert_eq!(
            parse_compressed_name(b"\x01x\xc0\x08junk\x00", 0),
            Err(Error::InvalidPointer),
        );
    }

    #[test]
    fn skip_compressed_name_accepts_valid_uncompressed_names() {
        let wire_repr_and_junk = b"\x07example\x04test\x00junk";
        assert_eq!(skip_compressed_name(wire_repr_and_junk), Ok(14));
    }

    #[test]
    fn skip_compressed_name_accepts_valid_compressed_first_chunks() {
        let wire_repr_and_junk = b"\x07example\xc0\x0cjunk";
        assert_eq!(skip_compressed_name(wire_repr_and_junk), Ok(10));
    }

    #[test]
    fn skip_compressed_name_rejects_unexpected_eom() {
        assert_eq!(
            skip_compressed_name(b"\x07example\x04tes"),
            Err(Error::UnexpectedEom),
        );
        assert_eq!(skip_compressed_name(b"\xc0"), Err(Error::UnexpectedEom));
    }
}
