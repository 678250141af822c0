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

//! Implementation of the [`EdnsInfo`] type for the EDNS(0) OPT
//! pseudo-RR.
//!
//! This follows EDNS(0) as restated and refined by [RFC 6891]. The OPT
//! pseudo-RR overloads the standard RR fields: the CLASS field carries
//! the requestor's maximum UDP payload size, and the TTL field carries
//! the extended RCODE, the EDNS version, and the DO (DNSSEC OK) bit.
//! The RDATA is a sequence of attribute-value option pairs.
//!
//! [RFC 6891]: https://datatracker.ietf.org/doc/html/rfc6891

////////////////////////////////////////////////////////////////////////
// EDNS INFORMATION                                                   //
////////////////////////////////////////////////////////////////////////

/// EDNS(0) information carried by a query's OPT pseudo-RR.
///
/// A query that carries no OPT record is represented by
/// [`EdnsInfo::default`]: version 0, DO unset, declared payload size 0,
/// and no options. Thus the absence of EDNS is never a decoding error.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct EdnsInfo {
    /// The EDNS version declared by the requestor. Only version 0 is
    /// currently defined.
    pub version: u8,

    /// The DO ("DNSSEC OK") bit ([RFC 3225]).
    ///
    /// [RFC 3225]: https://datatracker.ietf.org/doc/html/rfc3225
    pub dnssec_ok: bool,

    /// The maximum UDP payload size the requestor declares it can
    /// reassemble.
    pub udp_payload_size: u16,

    /// The EDNS options carried in the OPT RDATA, in the order they
    /// appeared.
    pub options: Vec<EdnsOption>,
}

/// A single EDNS option: an opaque (code, data) attribute-value pair.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct EdnsOption {
    pub code: u16,
    pub data: Vec<u8>,
}

impl EdnsInfo {
    /// Extracts EDNS information from the overloaded fields of an OPT
    /// pseudo-RR ([RFC 6891 § 6.1.2 and § 6.1.3]).
    ///
    /// This is a best-effort reader for untrusted input: if the RDATA
    /// is cut short partway through an option, the options decoded up
    /// to that point are kept and the rest is ignored.
    ///
    /// [RFC 6891 § 6.1.2 and § 6.1.3]: https://datatracker.ietf.org/doc/html/rfc6891#section-6.1.2
    pub fn from_opt(class: u16, ttl: u32, rdata: &[u8]) -> Self {
        Self {
            version: (ttl >> 16) as u8,
            dnssec_ok: ttl & 0x8000 != 0,
            udp_payload_size: class,
            options: read_options(rdata),
        }
    }
}

/// Reads as many complete options from OPT RDATA as are present.
fn read_options(rdata: &[u8]) -> Vec<EdnsOption> {
    let mut options = Vec::new();
    let mut offset = 0;
    while let Some(header) = rdata.get(offset..offset + 4) {
        let code = u16::from_be_bytes([header[0], header[1]]);
        let len = u16::from_be_bytes([header[2], header[3]]) as usize;
        match rdata.get(offset + 4..offset + 4 + len) {
            Some(data) => options.push(EdnsOption {
                code,
                data: data.to_vec(),
            }),
            None => break,
        }
        offset += 4 + len;
    }
    options
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_opt_unpacks_the_overloaded_fields() {
        // Version 1, DO set, extended RCODE bits present (and ignored
        // here beyond the version/DO extraction).
        let info = EdnsInfo::from_opt(1232, 0x00_01_80_00, &[]);
        assert_eq!(info.version, 1);
        assert!(info.dnssec_ok);
        assert_eq!(info.udp_payload_size, 1232);
        assert!(info.options.is_empty());
    }

    #[test]
    fn from_opt_reads_options_in_order() {
        // A 4-octet padding option (RFC 7830) followed by an empty
        // EXPIRE option (RFC 7314).
        let rdata = b"\x00\x0c\x00\x04\x00\x00\x00\x00\x00\x09\x00\x00";
        let info = EdnsInfo::from_opt(4096, 0, rdata);
        assert_eq!(
            info.options,
            vec![
                EdnsOption {
                    code: 12,
                    data: vec![0; 4],
                },
                EdnsOption {
                    code: 9,
                    data: Vec::new(),
                },
            ],
        );
    }

    #[test]
    fn from_opt_keeps_complete_options_when_rdata_is_cut_short() {
        let rdata = b"\x00\x0c\x00\x02\x00\x00\x00\x09\x00\x04\x00";
        let info = EdnsInfo::from_opt(512, 0, rdata);
        assert_eq!(info.options.len(), 1);
        assert_eq!(info.options[0].code, 12);
    }

    #[test]
    fn default_means_no_edns() {
        let info = EdnsInfo::default();
        assert_eq!(info.version, 0);
        assert!(!info.dnssec_ok);
        assert_eq!(info.udp_payload_size, 0);
        assert!(info.options.is_empty());
    }
}
