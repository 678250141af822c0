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

//! Provides the [`Type`] structure for DNS RR types.

use std::fmt;
use std::str::FromStr;

use crate::message::Qtype;
use crate::util::Caseless;

/// Represents the RR type of a DNS record.
///
/// An RR type is represented on the wire as an unsigned 16-bit integer.
/// Hence this is basically a wrapper around [`u16`] with nice
/// [`Debug`](fmt::Debug), [`Display`](fmt::Display), and [`FromStr`]
/// implementations for working with the common textual representations
/// of RR types. Types without a well-known mnemonic use the `TYPE`
/// notation of [RFC 3597 § 5] in both directions. Constants for the
/// types this daemon is likely to see in queries are provided.
///
/// [RFC 3597 § 5]: https://datatracker.ietf.org/doc/html/rfc3597#section-5
#[derive(Clone, Copy, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Type(u16);

impl Type {
    pub const A: Type = Type(1);
    pub const NS: Type = Type(2);
    pub const CNAME: Type = Type(5);
    pub const SOA: Type = Type(6);
    pub const PTR: Type = Type(12);
    pub const HINFO: Type = Type(13);
    pub const MX: Type = Type(15);
    pub const TXT: Type = Type(16);
    pub const AAAA: Type = Type(28);
    pub const SRV: Type = Type(33);
    pub const NAPTR: Type = Type(35);
    pub const OPT: Type = Type(41);
    pub const DS: Type = Type(43);
    pub const RRSIG: Type = Type(46);
    pub const NSEC: Type = Type(47);
    pub const DNSKEY: Type = Type(48);
    pub const SVCB: Type = Type(64);
    pub const HTTPS: Type = Type(65);
}

impl From<u16> for Type {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl From<Type> for u16 {
    fn from(rr_type: Type) -> Self {
        rr_type.0
    }
}

impl From<Qtype> for Type {
    fn from(qtype: Qtype) -> Self {
        Self(qtype.into())
    }
}

impl FromStr for Type {
    type Err = &'static str;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match Caseless(text) {
            Caseless("A") => Ok(Self::A),
            Caseless("NS") => Ok(Self::NS),
            Caseless("CNAME") => Ok(Self::CNAME),
            Caseless("SOA") => Ok(Self::SOA),
            Caseless("PTR") => Ok(Self::PTR),
            Caseless("HINFO") => Ok(Self::HINFO),
            Caseless("MX") => Ok(Self::MX),
            Caseless("TXT") => Ok(Self::TXT),
            Caseless("AAAA") => Ok(Self::AAAA),
            Caseless("SRV") => Ok(Self::SRV),
            Caseless("NAPTR") => Ok(Self::NAPTR),
            Caseless("OPT") => Ok(Self::OPT),
            Caseless("DS") => Ok(Self::DS),
            Caseless("RRSIG") => Ok(Self::RRSIG),
            Caseless("NSEC") => Ok(Self::NSEC),
            Caseless("DNSKEY") => Ok(Self::DNSKEY),
            Caseless("SVCB") => Ok(Self::SVCB),
            Caseless("HTTPS") => Ok(Self::HTTPS),
            _ => {
                if text
                    .get(0..4)
                    .map_or(false, |prefix| prefix.eq_ignore_ascii_case("TYPE"))
                {
                    text[4..]
                        .parse::<u16>()
                        .map(Self::from)
                        .or(Err("type value is not a valid unsigned 16-bit integer"))
                } else {
                    Err("unknown type")
                }
            }
        }
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", *self)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::A => write!(f, "A"),
            Self::NS => write!(f, "NS"),
            Self::CNAME => write!(f, "CNAME"),
            Self::SOA => write!(f, "SOA"),
            Self::PTR => write!(f, "PTR"),
            Self::HINFO => write!(f, "HINFO"),
            Self::MX => write!(f, "MX"),
            Self::TXT => write!(f, "TXT"),
            Self::AAAA => write!(f, "AAAA"),
            Self::SRV => write!(f, "SRV"),
            Self::NAPTR => write!(f, "NAPTR"),
            Self::OPT => write!(f, "OPT"),
            Self::DS => write!(f, "DS"),
            Self::RRSIG => write!(f, "RRSIG"),
            Self::NSEC => write!(f, "NSEC"),
            Self::DNSKEY => write!(f, "DNSKEY"),
            Self::SVCB => write!(f, "SVCB"),
            Self::HTTPS => write!(f, "HTTPS"),
            Self(value) => write!(f, "TYPE{}", value), // RFC 3597 § 5
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Type;

    #[test]
    fn displays_unknown_types_according_to_rfc3597() {
        let rr_type = Type::from(0xff00);
        assert_eq!(rr_type.to_string(), "TYPE65280");
    }

    #[test]
    fn parses_according_to_rfc3597() {
        let type_a: Type = "TYPE1".parse().unwrap();
        let type_65280: Type = "type65280".parse().unwrap();
        assert_eq!(type_a, Type::A);
        assert_eq!(u16::from(type_65280), 65280);
    }
}
