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

//! Network I/O for the daemon.
//!
//! The [`blocking`] module provides the listener set and dispatch
//! loops; [`socket`] provides the underlying socket wrappers, with
//! target-specific support where the standard library falls short.

pub mod blocking;
pub mod socket;

pub use blocking::BlockingIoProvider;
