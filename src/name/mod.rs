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

//! Implementation of data structures related to domain names.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

mod error;
mod wire;
pub use error::Error;

/// The maximum length of the uncompressed on-the-wire representation of
/// a domain name.
const MAX_WIRE_LEN: usize = 255;

/// The maximum length of a label in a domain name (not including the
/// octet that provides the length).
const MAX_LABEL_LEN: usize = 63;

////////////////////////////////////////////////////////////////////////
// NAME STRUCTURE                                                     //
////////////////////////////////////////////////////////////////////////

/// A structure to represent a domain name.
///
/// A `Name` owns the validated, uncompressed on-the-wire representation
/// of a domain name ([RFC 1035 § 3.1]): a sequence of length-prefixed
/// labels terminated by the null label. Since the representation is
/// validated at construction, accessors never fail.
///
/// `Name`s can be constructed in two ways:
///
/// * through the [`FromStr`] implementation, which accepts the usual
///   dotted presentation format (the trailing dot is optional; `.`
///   alone is the root); and
/// * from (possibly compressed) on-the-wire names through
///   [`Name::try_from_compressed`].
///
/// Comparison and hashing are ASCII-case-insensitive, following the
/// DNS's case rules for names.
///
/// [RFC 1035 § 3.1]: https://datatracker.ietf.org/doc/html/rfc1035#section-3.1
#[derive(Clone)]
pub struct Name {
    wire: Box<[u8]>,
}

impl Name {
    /// Returns a `Name` representing the DNS root, `.`.
    pub fn root() -> Self {
        Self { wire: Box::new([0]) }
    }

    /// Returns whether the `Name` is the DNS root `.`.
    pub fn is_root(&self) -> bool {
        self.wire.len() == 1
    }

    /// Returns an iterator over the labels of this `Name`, not
    /// including the terminal null label.
    pub fn labels(&self) -> Labels {
        Labels { rest: &self.wire }
    }

    /// Returns the uncompressed on-the-wire representation of the
    /// `Name`.
    pub fn wire_repr(&self) -> &[u8] {
        &self.wire
    }

    /// Tries to parse a (possibly compressed) name present at index
    /// `start` of the provided buffer. Pointers are followed; indices
    /// given in pointers are treated as indices of `octets`, so
    /// generally one will pass an entire DNS message in `octets`. Two
    /// things are returned on success:
    ///
    /// * the parsed `Name`; and
    /// * the number of contiguous octets read at `start`. Equivalently,
    ///   the number of octets to skip after `start` to reach the next
    ///   field when parsing a DNS message.
    ///
    /// This is safe to run on attacker-controlled input: pointers that
    /// do not point strictly backward are rejected, so parsing always
    /// terminates. See the [`wire`] module.
    pub fn try_from_compressed(octets: &[u8], start: usize) -> Result<(Self, usize), Error> {
        wire::parse_compressed_name(octets, start)
    }

    /// Tries to skip a compressed name at the beginning of `octets`.
    /// This continues until the end of the name or the first pointer
    /// label, whichever comes first, and returns the number of octets
    /// read. The pointer target itself, if any, is not validated.
    pub fn skip_compressed(octets: &[u8]) -> Result<usize, Error> {
        wire::skip_compressed_name(octets)
    }

    /// Constructs a `Name` from a wire representation that has already
    /// been validated by this module's parsing routines.
    fn from_validated_wire(wire_repr: &[u8]) -> Self {
        Self {
            wire: wire_repr.into(),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// ITERATION OVER A NAME'S LABELS                                     //
////////////////////////////////////////////////////////////////////////

/// An iterator over the labels in a [`Name`], as raw octet slices.
///
/// To use this iterator, construct one from a [`Name`] using
/// [`Name::labels`].
#[derive(Clone, Debug)]
pub struct Labels<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Labels<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let len = *self.rest.first()? as usize;
        if len == 0 {
            self.rest = &[];
            None
        } else {
            let label = &self.rest[1..1 + len];
            self.rest = &self.rest[1 + len..];
            Some(label)
        }
    }
}

////////////////////////////////////////////////////////////////////////
// CONVERSION FROM PRESENTATION FORMAT                                //
////////////////////////////////////////////////////////////////////////

impl FromStr for Name {
    type Err = Error;

    /// Parses a domain name from its textual presentation format.
    /// `\xyz` (literal character) and `\DDD` (decimal octet) escapes
    /// are recognized, per [RFC 1035 § 5.1].
    ///
    /// [RFC 1035 § 5.1]: https://datatracker.ietf.org/doc/html/rfc1035#section-5.1
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.is_empty() {
            return Err(Error::StrEmpty);
        } else if !text.is_ascii() {
            return Err(Error::StrNotAscii);
        } else if text == "." {
            return Ok(Self::root());
        }

        let mut wire = Vec::with_capacity(text.len() + 2);
        let mut label_start = wire.len();
        wire.push(0);

        let mut bytes = text.bytes();
        let mut terminated_by_dot = false;
        while let Some(byte) = bytes.next() {
            terminated_by_dot = false;
            let decoded = match byte {
                b'.' => {
                    finish_label(&mut wire, label_start)?;
                    label_start = wire.len();
                    wire.push(0);
                    terminated_by_dot = true;
                    continue;
                }
                b'\\' => parse_escape(&mut bytes)?,
                other => other,
            };
            if wire.len() - label_start > MAX_LABEL_LEN {
                return Err(Error::LabelTooLong);
            }
            wire.push(decoded);
        }

        if terminated_by_dot {
            // The trailing dot already closed the final label; the
            // empty label opened after it becomes the null label.
            wire.truncate(label_start);
        } else {
            finish_label(&mut wire, label_start)?;
        }
        wire.push(0);
        if wire.len() > MAX_WIRE_LEN {
            return Err(Error::NameTooLong);
        }
        Ok(Self { wire: wire.into() })
    }
}

/// Writes the length octet of a completed label at `label_start`,
/// rejecting empty labels (which arise from consecutive dots).
fn finish_label(wire: &mut [u8], label_start: usize) -> Result<(), Error> {
    let len = wire.len() - label_start - 1;
    if len == 0 {
        Err(Error::EmptyLabel)
    } else {
        wire[label_start] = len as u8;
        Ok(())
    }
}

/// Decodes the remainder of a `\`-escape from a presentation-format
/// name.
fn parse_escape(bytes: &mut std::str::Bytes<'_>) -> Result<u8, Error> {
    let first = bytes.next().ok_or(Error::InvalidEscape)?;
    if first.is_ascii_digit() {
        let second = bytes.next().ok_or(Error::InvalidEscape)?;
        let third = bytes.next().ok_or(Error::InvalidEscape)?;
        if !second.is_ascii_digit() || !third.is_ascii_digit() {
            return Err(Error::InvalidEscape);
        }
        let value =
            (first - b'0') as u16 * 100 + (second - b'0') as u16 * 10 + (third - b'0') as u16;
        u8::try_from(value).or(Err(Error::InvalidEscape))
    } else {
        Ok(first)
    }
}

////////////////////////////////////////////////////////////////////////
// CONVERSION TO PRESENTATION FORMAT                                  //
////////////////////////////////////////////////////////////////////////

impl fmt::Display for Name {
    /// Formats the `Name` in presentation format *without* the trailing
    /// dot (the root alone renders as `.`). Octets that are not
    /// printable ASCII are escaped as `\DDD`; dots and backslashes
    /// within labels are escaped with a backslash.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_root() {
            return f.write_str(".");
        }
        for (i, label) in self.labels().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            fmt_label(f, label)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

/// Writes a single label in escaped presentation format.
fn fmt_label(f: &mut fmt::Formatter, label: &[u8]) -> fmt::Result {
    for &octet in label {
        match octet {
            b'.' | b'\\' => write!(f, "\\{}", octet as char)?,
            0x21..=0x7e => write!(f, "{}", octet as char)?,
            _ => write!(f, "\\{:03}", octet)?,
        }
    }
    Ok(())
}

////////////////////////////////////////////////////////////////////////
// EQUALITY AND HASHING                                               //
////////////////////////////////////////////////////////////////////////

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        // Length octets are 0 through 63 and thus unaffected by ASCII
        // case folding, so the whole wire representation can be
        // compared in one pass.
        self.wire.eq_ignore_ascii_case(&other.wire)
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for octet in self.wire.iter() {
            state.write_u8(octet.to_ascii_lowercase());
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
    fn from_str_accepts_absolute_and_relative_forms() {
        let absolute: Name = "example.test.".parse().unwrap();
        let relative: Name = "example.test".parse().unwrap();
        assert_eq!(absolute, relative);
        assert_eq!(absolute.wire_repr(), b"\x07example\x04test\x00");
    }

    #[test]
    fn from_str_parses_root() {
        let root: Name = ".".parse().unwrap();
        assert!(root.is_root());
        assert_eq!(root.wire_repr(), b"\x00");
    }

    #[test]
    fn from_str_handles_escapes() {
        let name: Name = "an\\046odd\\000label.test.".parse().unwrap();
        assert_eq!(name.wire_repr(), b"\x0can.odd\x00label\x04test\x00");
        let literal: Name = "a\\.b.test.".parse().unwrap();
        assert_eq!(literal.wire_repr(), b"\x03a.b\x04test\x00");
    }

    #[test]
    fn from_str_rejects_bad_input() {
        assert_eq!("".parse::<Name>(), Err(Error::StrEmpty));
        assert_eq!("exämple.test.".parse::<Name>(), Err(Error::StrNotAscii));
        assert_eq!("example..test.".parse::<Name>(), Err(Error::EmptyLabel));
        assert_eq!("example.test\\".parse::<Name>(), Err(Error::InvalidEscape));
        assert_eq!("a\\31b.test.".parse::<Name>(), Err(Error::InvalidEscape));
        assert_eq!("a\\999b.test.".parse::<Name>(), Err(Error::InvalidEscape));
        let long_label = "x".repeat(64);
        assert_eq!(
            format!("{}.test.", long_label).parse::<Name>(),
            Err(Error::LabelTooLong),
        );
    }

    #[test]
    fn display_omits_the_trailing_dot() {
        let name: Name = "example.test.".parse().unwrap();
        assert_eq!(name.to_string(), "example.test");
        assert_eq!(Name::root().to_string(), ".");
    }

    #[test]
    fn display_escapes_unprintable_octets() {
        let name: Name = "a\\.b\\032c.test.".parse().unwrap();
        assert_eq!(name.to_string(), "a\\.b\\032c.test");
    }

    #[test]
    fn comparison_ignores_ascii_case() {
        let lower: Name = "example.test.".parse().unwrap();
        let upper: Name = "EXAMPLE.TEST.".parse().unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn labels_iterates_in_order() {
        let name: Name = "a.b.c.".parse().unwrap();
        let labels: Vec<&[u8]> = name.labels().collect();
        assert_eq!(labels, vec![b"a".as_slice(), b"b".as_slice(), b"c".as_slice()]);
        assert_eq!(Name::root().labels().count(), 0);
    }
}
