// Copyright 2017 Amagicom AB.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Transport adapter interface.
//!
//! The core never inspects raw bytes outside of a framed payload, and it
//! never dials a socket itself — both are the job of a concrete transport
//! adapter (e.g. the `jsonrpc-rs-netstring` crate). This module only pins
//! down the seam: a [`Sender`] that pushes one whole frame, and a
//! [`Connector`] that lazily produces one.
//!
//! A successful dial hands back both halves (a [`Sender`] plus an
//! [`Incoming`] frame stream), but pumping the stream is the
//! [`crate::connection::ConnectionManager`]'s job rather than the
//! application's — it owns the one read-pump task per live connection and
//! forwards each frame to whatever callback (typically a
//! [`crate::client::Client`]'s `route_response`) it was built with.

use std::future::Future;
use std::pin::Pin;

use futures::Stream;

/// A cloneable handle that can push one framed payload at a time.
///
/// Implementations are expected to be cheap to clone (e.g. an `Arc` around
/// the write half of a socket plus a framing encoder).
pub trait Sender: Send + Sync + 'static {
    /// The error a send can fail with.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends one complete frame. Resolves once the frame has been handed to
    /// the underlying transport (not necessarily once it reaches the peer).
    fn send(&self, payload: Vec<u8>) -> Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send + '_>>;
}

/// A stream of whole, already-deframed payloads read off a live connection.
/// Ends when the peer closes the connection or the stream hits an I/O fault
/// that a framing adapter considers fatal: receivers reject malformed
/// frames by closing the transport rather than trying to resynchronize.
pub trait Incoming: Stream<Item = Vec<u8>> + Send + Unpin + 'static {}

impl<T> Incoming for T where T: Stream<Item = Vec<u8>> + Send + Unpin + 'static {}

/// Lazily establishes a connection, producing a [`Sender`] handle and an
/// [`Incoming`] frame stream.
pub trait Connector: Send + Sync + 'static {
    /// The handle produced by a successful dial.
    type Handle: Sender + Clone + Send + 'static;
    /// The incoming frame stream produced by a successful dial.
    type Incoming: Incoming;
    /// The error a dial can fail with.
    type Error: std::error::Error + Send + Sync + Clone + 'static;

    /// Attempts to establish a connection.
    #[allow(clippy::type_complexity)]
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<(Self::Handle, Self::Incoming), Self::Error>> + Send>>;
}
