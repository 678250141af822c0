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

//! The querylog DNS query-logging daemon.
//!
//! querylog listens for DNS queries on a configured set of local
//! addresses, logs structured metadata about every query it receives,
//! and answers with a deliberately unhelpful reply: truncated
//! (NOERROR with TC set) over UDP, and REFUSED over TCP. It is not a
//! resolver and serves no record data over any transport; it exists to
//! observe who is asking what.
//!
//! The crate is organized as follows:
//!
//! * [`message`] and [`name`] implement the DNS wire format
//!   ([RFC 1035 § 4] and the EDNS(0) extension of [RFC 6891]) from
//!   scratch: defensive decoding of untrusted queries, and encoding of
//!   the daemon's fixed reply shapes.
//! * [`server`] holds the transport-keyed reply policy, the per-query
//!   log record, and the sink seam through which records leave the
//!   daemon.
//! * [`io`] binds one UDP socket and one TCP listener per configured
//!   address and runs the per-listener dispatch loops.
//! * [`config`] resolves the listener address set.
//! * [`thread`] provides the thread-group lifecycle the listeners run
//!   under.
//!
//! The `querylogd` binary ties these together with command-line
//! parsing, signal handling, and PID-file management.
//!
//! [RFC 1035 § 4]: https://datatracker.ietf.org/doc/html/rfc1035#section-4
//! [RFC 6891]: https://datatracker.ietf.org/doc/html/rfc6891

pub mod class;
pub mod config;
pub mod io;
pub mod message;
pub mod name;
pub mod rr;
pub mod server;
pub mod thread;

mod util;
