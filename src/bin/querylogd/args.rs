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

//! Implements command-line argument parsing.
//!
//! The file-path and port arguments go through validated value types
//! ([`ValidatedPath`], [`PortNumber`]) rather than raw strings: each is
//! constructed only by a fallible parse that enforces its constraints,
//! so code downstream of argument parsing never sees an unvetted
//! value.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::{Parser, Subcommand};

/// Parses the command line arguments.
pub fn parse() -> Args {
    Args::parse()
}

/// The querylog DNS query-logging daemon
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the daemon
    Run(RunArgs),
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Set the port to listen on (ports below 1024 require elevated
    /// privileges)
    #[clap(long, default_value_t = PortNumber::DNS)]
    pub port: PortNumber,

    /// Set the file listing local addresses to listen on (one per
    /// line; without it, the daemon listens on the wildcard address)
    #[clap(long, value_name = "FILE")]
    pub addresses: Option<ValidatedPath>,

    /// Write the daemon's process ID to this file on startup and
    /// remove it on shutdown
    #[clap(long, value_name = "FILE")]
    pub pid_file: Option<ValidatedPath>,

    /// Enable debug output
    #[clap(long)]
    pub debug: bool,
}

////////////////////////////////////////////////////////////////////////
// VALIDATED VALUE TYPES                                              //
////////////////////////////////////////////////////////////////////////

/// A TCP/UDP port number, guaranteed nonzero.
///
/// Port 0 means "let the system pick" to the sockets API, which is
/// never what an operator intends on a command line, so it is rejected
/// at parse time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PortNumber(u16);

impl PortNumber {
    /// The standard DNS port.
    pub const DNS: Self = Self(53);

    /// Returns the port as a plain integer.
    pub fn get(self) -> u16 {
        self.0
    }
}

impl FromStr for PortNumber {
    type Err = &'static str;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text.parse::<u16>() {
            Ok(0) => Err("port must be between 1 and 65535"),
            Ok(port) => Ok(Self(port)),
            Err(_) => Err("port must be between 1 and 65535"),
        }
    }
}

impl fmt::Display for PortNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A file path restricted to a conservative character set.
///
/// The daemon writes to (and later deletes) the path given for the PID
/// file while typically running with elevated privileges, so paths are
/// held to a strict allow-list: ASCII letters, digits, `.`, `_`, `-`,
/// and `/`, with no empty input. Anything outside that set is rejected
/// at parse time rather than quietly passed to the filesystem.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidatedPath(PathBuf);

impl ValidatedPath {
    /// Returns the validated path.
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl FromStr for ValidatedPath {
    type Err = &'static str;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.is_empty() {
            Err("path is empty")
        } else if text
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-' | b'/'))
        {
            Ok(Self(PathBuf::from(text)))
        } else {
            Err("path contains characters outside [A-Za-z0-9._/-]")
        }
    }
}

impl fmt::Display for ValidatedPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.display().fmt(f)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_number_rejects_zero_and_junk() {
        assert!("0".parse::<PortNumber>().is_err());
        assert!("65536".parse::<PortNumber>().is_err());
        assert!("dns".parse::<PortNumber>().is_err());
        assert_eq!("53".parse::<PortNumber>(), Ok(PortNumber::DNS));
    }

    #[test]
    fn validated_path_enforces_the_character_set() {
        assert!("/run/querylogd.pid".parse::<ValidatedPath>().is_ok());
        assert!("relative/path-1_2.txt".parse::<ValidatedPath>().is_ok());
        assert!("".parse::<ValidatedPath>().is_err());
        assert!("/tmp/with space".parse::<ValidatedPath>().is_err());
        assert!("/tmp/newline\n".parse::<ValidatedPath>().is_err());
        assert!("/tmp/sémaphore".parse::<ValidatedPath>().is_err());
    }
}
