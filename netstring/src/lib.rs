// Copyright 2017 Amagicom AB.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The reference transport adapter for `jsonrpc-rs-core`: netstring framing
//! (`<length>:<payload>,`) over any `AsyncRead + AsyncWrite` stream.
//!
//! Dialing an actual socket (TCP, Unix, IPC) is left to the application —
//! [`transport::NetstringConnector`] takes a dial closure rather than
//! owning a listener/dialer itself.

#![deny(missing_docs)]

#[macro_use]
extern crate log;

pub mod codec;
pub mod transport;

pub use codec::{NetstringCodec, NetstringError};
pub use transport::{DialError, NetstringConnector, NetstringIncoming, NetstringSender};
