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

//! The daemon's listener configuration.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use log::warn;

/// The maximum number of local addresses the daemon will bind
/// individually. Each address costs two sockets and two threads, so an
/// overlong address list falls back to wildcard binding instead (see
/// [`ListenerConfig::new`]).
pub const MAX_LISTENERS: usize = 32;

/// The resolved set of local addresses and the port to serve them on.
///
/// A `ListenerConfig` is built once at startup and is immutable
/// thereafter. Every address in the set gets its own UDP socket and
/// TCP listener, which is what lets the daemon log the local address
/// each query arrived on without OS-specific ancillary-data support.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ListenerConfig {
    addresses: Vec<IpAddr>,
    port: u16,
}

impl ListenerConfig {
    /// Builds the effective listener set from the requested addresses.
    ///
    /// Two fallbacks apply:
    ///
    /// * An empty request yields the IPv6 wildcard address `::`, i.e.
    ///   "listen everywhere" on dual-stack systems.
    /// * A request for more than [`MAX_LISTENERS`] addresses *also*
    ///   collapses to the wildcard. This trades away address-specific
    ///   logging fidelity to cap socket and thread usage; the
    ///   alternative (binding hundreds of listeners because an address
    ///   file said so) is worse.
    pub fn new(addresses: Vec<IpAddr>, port: u16) -> Self {
        let addresses = if addresses.is_empty() {
            vec![IpAddr::V6(Ipv6Addr::UNSPECIFIED)]
        } else if addresses.len() > MAX_LISTENERS {
            warn!(
                "{} listener addresses requested, which exceeds the limit of {}; \
                 listening on the wildcard address instead",
                addresses.len(),
                MAX_LISTENERS,
            );
            vec![IpAddr::V6(Ipv6Addr::UNSPECIFIED)]
        } else {
            addresses
        };
        Self { addresses, port }
    }

    /// Returns the effective local addresses.
    pub fn addresses(&self) -> &[IpAddr] {
        &self.addresses
    }

    /// Returns the configured port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the socket addresses to bind: each effective address
    /// paired with the configured port.
    pub fn socket_addrs(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.addresses
            .iter()
            .map(move |addr| SocketAddr::new(*addr, self.port))
    }
}

/// Parses the contents of a listener address file.
///
/// The format is one address per line. Blank lines and lines starting
/// with `#` are ignored, and a trailing `#` comment is stripped before
/// the remaining token is parsed as a single host address. Lines that
/// do not parse are skipped with a warning rather than treated as
/// fatal; a typo in one line should not take the daemon down.
pub fn parse_listener_addresses(text: &str) -> Vec<IpAddr> {
    let mut addresses = Vec::new();
    for (line_number, line) in text.lines().enumerate() {
        let token = line.split('#').next().unwrap_or("").trim();
        if token.is_empty() {
            continue;
        }
        match token.parse() {
            Ok(addr) => addresses.push(addr),
            Err(_) => warn!(
                "skipping invalid listener address {:?} on line {}",
                token,
                line_number + 1,
            ),
        }
    }
    addresses
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_config_passes_small_address_sets_through() {
        let addresses: Vec<IpAddr> = vec![
            "192.0.2.1".parse().unwrap(),
            "2001:db8::1".parse().unwrap(),
        ];
        let config = ListenerConfig::new(addresses.clone(), 53);
        assert_eq!(config.addresses(), addresses.as_slice());
        assert_eq!(config.port(), 53);
        let socket_addrs: Vec<SocketAddr> = config.socket_addrs().collect();
        assert_eq!(socket_addrs[0], "192.0.2.1:53".parse().unwrap());
        assert_eq!(socket_addrs[1], "[2001:db8::1]:53".parse().unwrap());
    }

    #[test]
    fn listener_config_collapses_oversized_sets_to_the_wildcard() {
        let addresses: Vec<IpAddr> = (0..=MAX_LISTENERS as u8)
            .map(|i| IpAddr::from([192, 0, 2, i]))
            .collect();
        assert_eq!(addresses.len(), MAX_LISTENERS + 1);
        let config = ListenerConfig::new(addresses, 53);
        assert_eq!(
            config.addresses(),
            &[IpAddr::V6(Ipv6Addr::UNSPECIFIED)][..]
        );
    }

    #[test]
    fn listener_config_keeps_a_maximal_address_set() {
        let addresses: Vec<IpAddr> = (0..MAX_LISTENERS as u8)
            .map(|i| IpAddr::from([192, 0, 2, i]))
            .collect();
        let config = ListenerConfig::new(addresses.clone(), 53);
        assert_eq!(config.addresses(), addresses.as_slice());
    }

    #[test]
    fn listener_config_defaults_to_the_wildcard_when_empty() {
        let config = ListenerConfig::new(Vec::new(), 53);
        assert_eq!(
            config.addresses(),
            &[IpAddr::V6(Ipv6Addr::UNSPECIFIED)][..]
        );
    }

    #[test]
    fn address_file_parsing_handles_comments_and_junk() {
        let text = "\
            # addresses to listen on\n\
            192.0.2.1\n\
            \n\
            2001:db8::1   # the router\n\
            not-an-address\n\
            192.0.2.0/24\n\
            \t 192.0.2.2 \n";
        let addresses = parse_listener_addresses(text);
        let expected: Vec<IpAddr> = vec![
            "192.0.2.1".parse().unwrap(),
            "2001:db8::1".parse().unwrap(),
            "192.0.2.2".parse().unwrap(),
        ];
        assert_eq!(addresses, expected);
    }

    #[test]
    fn address_file_parsing_accepts_an_empty_file() {
        assert!(parse_listener_addresses("").is_empty());
    }
}
