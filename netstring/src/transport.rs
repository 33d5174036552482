// Copyright 2017 Amagicom AB.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Wires the netstring codec onto any `AsyncRead + AsyncWrite` split pair,
//! implementing `jsonrpc-rs-core`'s `Sender`/`Connector`/`Incoming` traits.
//!
//! Producing the actual stream (dialing a socket) is left to the caller's
//! `dial` closure, since a TCP dialer is out of scope for this crate.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::codec::{FramedRead, FramedWrite};

use jsonrpc_rs_core::transport::{Connector, Sender};

use crate::codec::{NetstringCodec, NetstringError};

/// A [`Sender`] that frames each payload as a netstring over an
/// `AsyncWrite` half.
///
/// Wraps the writer in a `tokio::sync::Mutex` since `Sender::send` takes
/// `&self` (so the handle can be cloned and shared across concurrent
/// callers) but `FramedWrite` needs `&mut` access to flush.
pub struct NetstringSender<W> {
    sink: Arc<AsyncMutex<FramedWrite<W, NetstringCodec>>>,
}

impl<W> Clone for NetstringSender<W> {
    fn clone(&self) -> Self {
        NetstringSender {
            sink: self.sink.clone(),
        }
    }
}

impl<W> NetstringSender<W>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    fn new(writer: W) -> Self {
        NetstringSender {
            sink: Arc::new(AsyncMutex::new(FramedWrite::new(writer, NetstringCodec::default()))),
        }
    }
}

impl<W> Sender for NetstringSender<W>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    type Error = NetstringError;

    fn send(&self, payload: Vec<u8>) -> Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send + '_>> {
        Box::pin(async move {
            let mut sink = self.sink.lock().await;
            Pin::new(&mut *sink).send(Bytes::from(payload)).await
        })
    }
}

/// The [`jsonrpc_rs_core::transport::Incoming`] stream produced by framing
/// an `AsyncRead` half as netstrings. Ends the combined connection (spec
/// §4.6) if a frame is malformed — this stream simply stops rather than
/// yielding the fault, since [`jsonrpc_rs_core::connection::ConnectionManager`]
/// treats stream-end as connection loss either way.
pub struct NetstringIncoming<R> {
    inner: FramedRead<R, NetstringCodec>,
}

impl<R> Stream for NetstringIncoming<R>
where
    R: AsyncRead + Unpin,
{
    type Item = Vec<u8>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            std::task::Poll::Ready(Some(Ok(bytes))) => std::task::Poll::Ready(Some(bytes.to_vec())),
            std::task::Poll::Ready(Some(Err(e))) => {
                warn!("closing connection on a netstring framing fault: {}", e);
                std::task::Poll::Ready(None)
            }
            std::task::Poll::Ready(None) => std::task::Poll::Ready(None),
            std::task::Poll::Pending => std::task::Poll::Pending,
        }
    }
}

/// A dial fault: either the caller's `dial` closure failed, wrapped so it
/// can be shared across fanned-out waiters (`ConnectError` needs `Clone`).
#[derive(Debug, Clone)]
pub struct DialError(Arc<str>);

impl fmt::Display for DialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for DialError {}

impl DialError {
    /// Wraps any displayable dial fault.
    pub fn new(error: impl fmt::Display) -> Self {
        DialError(error.to_string().into())
    }
}

/// A [`Connector`] that dials via a user-supplied async closure producing a
/// fresh `AsyncRead + AsyncWrite` stream (e.g. `TcpStream::connect`, a Unix
/// socket, or — in tests — one end of a `tokio::io::duplex` pair), and
/// frames it as netstrings.
///
/// This crate deliberately stops short of dialing a socket itself (spec
/// §4.6 non-goal): `dial` is the seam where an application supplies that.
pub struct NetstringConnector<F> {
    dial: F,
}

impl<F> NetstringConnector<F> {
    /// Builds a connector around `dial`, a closure producing a fresh duplex
    /// stream on every call (one per dial attempt).
    pub fn new(dial: F) -> Self {
        NetstringConnector { dial }
    }
}

impl<F, Fut, S> Connector for NetstringConnector<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<S, String>> + Send + 'static,
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    type Handle = NetstringSender<tokio::io::WriteHalf<S>>;
    type Incoming = NetstringIncoming<tokio::io::ReadHalf<S>>;
    type Error = DialError;

    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<(Self::Handle, Self::Incoming), Self::Error>> + Send>> {
        let dial = (self.dial)();
        Box::pin(async move {
            let stream = dial.await.map_err(DialError::new)?;
            let (read_half, write_half) = tokio::io::split(stream);
            let sender = NetstringSender::new(write_half);
            let incoming = NetstringIncoming {
                inner: FramedRead::new(read_half, NetstringCodec::default()),
            };
            Ok((sender, incoming))
        })
    }
}
