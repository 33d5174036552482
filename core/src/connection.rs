// Copyright 2017 Amagicom AB.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The connection manager: a lazy, single-flight connector that maintains
//! at most one live transport.
//!
//! Dial coalescing itself is delegated to
//! [`jsonrpc_rs_utils::single_flight::SingleFlight`], a reusable "one dial,
//! many waiters" primitive. What remains here is connection-manager-
//! specific: owning the read-pump task per live connection, and
//! disconnect-notifier fan-out.

use std::sync::{Arc, Mutex};

use futures::StreamExt;
use jsonrpc_rs_utils::single_flight::{SingleFlight, SingleFlightError};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::error::{Error, ErrorKind, Result};
use crate::transport::Connector;

/// Callback invoked once per inbound frame read off the live connection.
pub type FrameSink = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// The connection manager's own fault type: either the dial failed (with
/// the connector's error) or this waiter was cancelled before the dial
/// resolved while waiting on a concurrent connect.
#[derive(Debug, Clone)]
pub enum ConnectError<E> {
    /// The dial attempt itself failed.
    Dial(E),
    /// This particular waiter was dropped before the shared dial resolved.
    Cancelled,
}

impl<E: std::fmt::Display> std::fmt::Display for ConnectError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectError::Dial(e) => write!(f, "connection failed: {}", e),
            ConnectError::Cancelled => write!(f, "connection attempt was cancelled"),
        }
    }
}

/// Maintains at most one live transport for a [`Connector`].
///
/// Concurrent `ensure_connected()` calls while a dial is in flight all join
/// the same dial and are fanned out its result (success or failure) —
/// "single-flight connect". If every waiter is cancelled before the dial
/// resolves, the in-flight dial task is aborted.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    on_frame: FrameSink,
    dial: Arc<SingleFlight<C::Handle, C::Error>>,
    pump_abort: Mutex<Option<AbortHandle>>,
    disconnect_notifiers: Mutex<Vec<oneshot::Sender<String>>>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Builds a new, initially idle connection manager around `connector`.
    ///
    /// `on_frame` is called once per inbound frame read off whatever
    /// connection is currently live; the read-pump task that drives it is
    /// owned by this connection manager, not by the caller.
    pub fn new(connector: C, on_frame: FrameSink) -> Arc<Self> {
        Arc::new(ConnectionManager {
            connector,
            on_frame,
            dial: SingleFlight::new(),
            pump_abort: Mutex::new(None),
            disconnect_notifiers: Mutex::new(Vec::new()),
        })
    }

    /// Returns the live transport handle, dialing if necessary.
    ///
    /// Fires immediately if already connected. Otherwise joins (or
    /// starts) the single in-flight dial attempt; the read-pump for the new
    /// connection is spawned exactly once, by whichever caller's attempt
    /// actually performed the dial.
    pub async fn ensure_connected(self: &Arc<Self>) -> std::result::Result<C::Handle, ConnectError<C::Error>> {
        let this = self.clone();
        self.dial
            .run(move || {
                Box::pin(async move {
                    match this.connector.connect().await {
                        Ok((handle, incoming)) => {
                            let pump_owner = this.clone();
                            let join = tokio::spawn(async move { pump_owner.pump(incoming).await });
                            *this.pump_abort.lock().unwrap() = Some(join.abort_handle());
                            Ok(handle)
                        }
                        Err(e) => Err(e),
                    }
                })
            })
            .await
            .map_err(|e| match e {
                SingleFlightError::Failed(e) => ConnectError::Dial(e),
                SingleFlightError::Cancelled => ConnectError::Cancelled,
            })
    }

    async fn pump(self: Arc<Self>, mut incoming: C::Incoming) {
        while let Some(frame) = incoming.next().await {
            (self.on_frame)(frame);
        }
        self.report_lost("transport stream ended");
    }

    /// Tears down the connection, if any: aborts an in-flight dial (or its
    /// read-pump, if the dial already landed), and reports the teardown to
    /// every registered disconnect-notifier with `reason`. A no-op if
    /// nothing was connecting or connected.
    fn teardown(&self, reason: String) {
        if let Some(abort) = self.pump_abort.lock().unwrap().take() {
            abort.abort();
        }
        if !self.dial.clear() {
            return;
        }
        let notifiers = {
            let mut notifiers = self.disconnect_notifiers.lock().unwrap();
            std::mem::take(&mut *notifiers)
        };
        for tx in notifiers {
            let _ = tx.send(reason.clone());
        }
    }

    /// Explicit disconnect: cancels an in-flight dial, or tears down the
    /// live transport. A no-op if idle.
    pub fn disconnect(&self) {
        self.teardown("disconnected".to_string());
    }

    /// Reports that the live transport was lost (peer close, local abort,
    /// or any I/O error detected while reading frames).
    pub fn report_lost(&self, reason: impl Into<String>) {
        self.teardown(reason.into());
    }

    /// Returns a one-shot completion that fires with the loss reason the
    /// next time the transport is lost. If called after a loss has already
    /// happened, it still waits for the *next* one.
    pub fn notify_disconnect(&self) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        self.disconnect_notifiers.lock().unwrap().push(tx);
        rx
    }

    /// Whether a transport is currently live.
    pub fn is_connected(&self) -> bool {
        self.dial.is_ready()
    }
}

impl<E> From<ConnectError<E>> for Error
where
    E: std::fmt::Display,
{
    fn from(err: ConnectError<E>) -> Error {
        match err {
            ConnectError::Dial(e) => ErrorKind::ConnectError(e.to_string()).into(),
            ConnectError::Cancelled => ErrorKind::Cancelled.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Sender;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use tokio::sync::mpsc;

    /// Wraps an unbounded channel receiver as a `Stream`, so it can stand in
    /// for `Connector::Incoming` without pulling in `tokio-stream`.
    struct ChannelStream(mpsc::UnboundedReceiver<Vec<u8>>);

    impl futures::Stream for ChannelStream {
        type Item = Vec<u8>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.0.poll_recv(cx)
        }
    }

    /// A minimal `Error`-implementing dial fault, mirroring
    /// `jsonrpc_rs_netstring::transport::DialError`'s shape.
    #[derive(Debug, Clone)]
    struct MockDialError(String);

    impl std::fmt::Display for MockDialError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for MockDialError {}

    #[derive(Clone)]
    struct MockSender;

    impl Sender for MockSender {
        type Error = std::convert::Infallible;

        fn send(&self, _payload: Vec<u8>) -> Pin<Box<dyn Future<Output = std::result::Result<(), Self::Error>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }
    }

    struct MockConnector {
        dial_count: Arc<AtomicUsize>,
        fail: bool,
        // The sender half of whichever channel the most recent successful
        // dial handed its `ChannelStream` receiver half to, so a test can
        // push frames into the live connection. An `Arc` so `connect`'s
        // `'static` future can hold a clone instead of borrowing `self`.
        last_tx: Arc<Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>>,
    }

    impl Connector for MockConnector {
        type Handle = MockSender;
        type Incoming = ChannelStream;
        type Error = MockDialError;

        fn connect(&self) -> Pin<Box<dyn Future<Output = std::result::Result<(Self::Handle, Self::Incoming), Self::Error>> + Send>> {
            self.dial_count.fetch_add(1, Ordering::SeqCst);
            let fail = self.fail;
            let last_tx = self.last_tx.clone();
            Box::pin(async move {
                if fail {
                    return Err(MockDialError("dial failed".to_string()));
                }
                let (tx, rx) = mpsc::unbounded_channel();
                *last_tx.lock().unwrap() = Some(tx);
                Ok((MockSender, ChannelStream(rx)))
            })
        }
    }

    fn connector(fail: bool) -> Arc<MockConnector> {
        Arc::new(MockConnector {
            dial_count: Arc::new(AtomicUsize::new(0)),
            fail,
            last_tx: Arc::new(Mutex::new(None)),
        })
    }

    #[tokio::test]
    async fn ensure_connected_fires_immediately_once_already_connected() {
        let connector = connector(false);
        let sink: FrameSink = Arc::new(|_| {});

        let manager = ConnectionManager::new(MockConnectorHandle(connector.clone()), sink);
        manager.ensure_connected().await.unwrap();
        manager.ensure_connected().await.unwrap();

        assert_eq!(connector.dial_count.load(Ordering::SeqCst), 1);
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn a_failed_dial_returns_to_idle_and_the_next_call_redials() {
        let connector = connector(true);
        let sink: FrameSink = Arc::new(|_| {});
        let manager = ConnectionManager::new(MockConnectorHandle(connector.clone()), sink);

        assert!(manager.ensure_connected().await.is_err());
        assert!(manager.ensure_connected().await.is_err());
        assert_eq!(connector.dial_count.load(Ordering::SeqCst), 2);
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn inbound_frames_reach_the_frame_sink() {
        let connector = connector(false);
        let frames: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let frames_for_sink = frames.clone();
        let sink: FrameSink = Arc::new(move |f| frames_for_sink.lock().unwrap().push(f));
        let manager = ConnectionManager::new(MockConnectorHandle(connector.clone()), sink);

        manager.ensure_connected().await.unwrap();
        let tx = connector.last_tx.lock().unwrap().clone().unwrap();
        tx.send(b"hello".to_vec()).unwrap();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(frames.lock().unwrap().as_slice(), &[b"hello".to_vec()]);
    }

    #[tokio::test]
    async fn disconnect_fires_every_registered_notifier() {
        let connector = connector(false);
        let sink: FrameSink = Arc::new(|_| {});
        let manager = ConnectionManager::new(MockConnectorHandle(connector), sink);
        manager.ensure_connected().await.unwrap();

        let notify_a = manager.notify_disconnect();
        let notify_b = manager.notify_disconnect();
        manager.disconnect();

        assert_eq!(notify_a.await.unwrap(), "disconnected");
        assert_eq!(notify_b.await.unwrap(), "disconnected");
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn notify_disconnect_called_after_a_loss_awaits_the_next_one() {
        let connector = connector(false);
        let sink: FrameSink = Arc::new(|_| {});
        let manager = ConnectionManager::new(MockConnectorHandle(connector), sink);
        manager.ensure_connected().await.unwrap();
        manager.disconnect();

        // subscribing after the loss above must not fire with that old loss
        let notify = manager.notify_disconnect();
        manager.ensure_connected().await.unwrap();
        manager.disconnect();
        assert_eq!(notify.await.unwrap(), "disconnected");
    }

    /// Thin `Connector` wrapper so `Arc<MockConnector>` itself can be handed
    /// to `ConnectionManager::new`, which expects an owned `Connector`.
    struct MockConnectorHandle(Arc<MockConnector>);

    impl Connector for MockConnectorHandle {
        type Handle = MockSender;
        type Incoming = ChannelStream;
        type Error = MockDialError;

        fn connect(&self) -> Pin<Box<dyn Future<Output = std::result::Result<(Self::Handle, Self::Incoming), Self::Error>> + Send>> {
            self.0.connect()
        }
    }
}
