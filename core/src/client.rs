// Copyright 2017 Amagicom AB.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The client correlator, wired together with a [`ConnectionManager`] into
//! the full application-facing client API.
//!
//! `Client` owns the id generator, the pending-call table and the
//! connection; `ClientHandle` is the cheap, cloneable facade application
//! code actually calls through.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::codec;
use crate::connection::ConnectionManager;
use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::id::Id;
use crate::params::{self, Params};
use crate::transport::{Connector, Sender};

/// Per-client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Default per-call timeout, overridable on individual calls.
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            timeout: Duration::from_secs(5),
        }
    }
}

struct PendingCall {
    sender: oneshot::Sender<Result<Value>>,
    timer: AbortHandle,
}

struct Inner {
    next_id: u32,
    pending: HashMap<u32, PendingCall>,
}

impl Inner {
    /// Monotonic id assignment wrapping at 1,000,000, refusing to hand out
    /// an id still occupied in the pending table.
    fn next_id(&mut self) -> u32 {
        loop {
            let candidate = self.next_id;
            self.next_id = if self.next_id >= 1_000_000 { 1 } else { self.next_id + 1 };
            if !self.pending.contains_key(&candidate) {
                return candidate;
            }
        }
    }
}

/// Owns the id generator, pending-call table and connection for one logical
/// JSON-RPC client. Constructed via [`Client::new`], which returns a
/// [`ClientHandle`] rather than the bare `Client` — application code only
/// ever touches the handle.
#[must_use]
pub struct Client<C: Connector> {
    connection: Arc<ConnectionManager<C>>,
    inner: Mutex<Inner>,
    config: ClientConfig,
}

impl<C: Connector> Client<C> {
    /// Builds a new client around `connector` and immediately returns a
    /// cloneable [`ClientHandle`]. A background task forwards every
    /// transport loss into `cancel_all`.
    pub fn new(connector: C, config: ClientConfig) -> ClientHandle<C> {
        let client = Arc::new_cyclic(|weak: &std::sync::Weak<Client<C>>| {
            let weak_for_frame = weak.clone();
            let on_frame: crate::connection::FrameSink = Arc::new(move |frame| {
                if let Some(client) = weak_for_frame.upgrade() {
                    client.route_response(&frame);
                }
            });
            Client {
                connection: ConnectionManager::new(connector, on_frame),
                inner: Mutex::new(Inner {
                    next_id: 1,
                    pending: HashMap::new(),
                }),
                config,
            }
        });

        // Weak: once every `ClientHandle` is dropped, this task should stop
        // holding the client (and its connection, pump task, etc.) alive.
        let watcher = Arc::downgrade(&client);
        tokio::spawn(async move {
            loop {
                let client = match watcher.upgrade() {
                    Some(client) => client,
                    None => break,
                };
                match client.connection.notify_disconnect().await {
                    Ok(reason) => client.cancel_all(&reason),
                    Err(_) => break,
                }
            }
        });

        ClientHandle { client }
    }

    /// Decodes and routes one incoming response frame to its pending call.
    /// A protocol violation is connection-fatal; an unknown id is reported
    /// but the connection is kept.
    fn route_response(&self, frame: &[u8]) {
        let value: Value = match serde_json::from_slice(frame) {
            Ok(v) => v,
            Err(e) => {
                let reason = format!("malformed response payload: {}", e);
                warn!("dropping connection: {}", reason);
                self.connection.report_lost(reason);
                return;
            }
        };

        let decoded = match codec::decode_client_response(&value) {
            Ok(d) => d,
            Err(msg) => {
                warn!("dropping connection: {}", msg);
                self.connection.report_lost(msg);
                return;
            }
        };

        let id = match &decoded.id {
            Id::Int(i) => u32::try_from(*i).ok(),
            _ => None,
        };

        let pending = id.and_then(|id| self.inner.lock().unwrap().pending.remove(&id));

        match pending {
            Some(call) => {
                call.timer.abort();
                let outcome = match decoded.outcome {
                    Ok(value) => Ok(value),
                    Err(rpc_error) => Err(ErrorKind::Remote(rpc_error).into()),
                };
                if call.sender.send(outcome).is_err() {
                    trace!("completion for response {:?} dropped already", decoded.id);
                }
            }
            None => trace!("received response with an id not in the pending table: {:?}", decoded.id),
        }
    }

    /// Cancels every pending call with `reason`. Used for both transport
    /// loss and an explicit `disconnect()`.
    fn cancel_all(&self, reason: &str) {
        let pending = std::mem::take(&mut self.inner.lock().unwrap().pending);
        for (_, call) in pending {
            call.timer.abort();
            let _ = call.sender.send(Err(ErrorKind::Cancelled.into()));
        }
        trace!("cancelled all pending calls: {}", reason);
    }

    fn time_out(&self, id: u32) {
        let call = self.inner.lock().unwrap().pending.remove(&id);
        if let Some(call) = call {
            let _ = call.sender.send(Err(ErrorKind::Timeout.into()));
        }
    }

    fn fail_pending(&self, id: u32, error: Error) {
        let call = self.inner.lock().unwrap().pending.remove(&id);
        if let Some(call) = call {
            call.timer.abort();
            let _ = call.sender.send(Err(error));
        }
    }
}

/// A cheap, cloneable handle used to issue calls and notifications and to
/// manage the connection lifecycle. This is the only type application code
/// constructs calls through.
#[derive(Clone)]
#[must_use]
pub struct ClientHandle<C: Connector> {
    client: Arc<Client<C>>,
}

impl<C: Connector> ClientHandle<C> {
    /// Issues a remote call and awaits its result.
    ///
    /// Exactly one of `positional`/`keyed` may be supplied; both present is
    /// a caller-side `ClientError`.
    pub async fn call_remote(
        &self,
        method: impl Into<String>,
        positional: Option<Vec<Value>>,
        keyed: Option<serde_json::Map<String, Value>>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let method = method.into();
        let params = params::build_params(positional, keyed)?;
        let timeout = timeout.unwrap_or(self.client.config.timeout);

        let handle = self.client.connection.ensure_connected().await.map_err(Error::from)?;

        let (id, payload, rx) = self.register_call(method, params, timeout);

        if let Err(e) = handle.send(payload).await {
            self.client.fail_pending(id, Error::with_chain(e, ErrorKind::TransportError));
            return rx.await.unwrap_or_else(|_| Err(ErrorKind::Shutdown.into()));
        }

        rx.await.unwrap_or_else(|_| Err(ErrorKind::Shutdown.into()))
    }

    /// Sends a notification and resolves once the frame has been handed to
    /// the transport. No id is assigned and no pending entry is created.
    pub async fn notify_remote(
        &self,
        method: impl Into<String>,
        positional: Option<Vec<Value>>,
        keyed: Option<serde_json::Map<String, Value>>,
    ) -> Result<()> {
        let params = params::build_params(positional, keyed)?;
        let payload = codec::encode_client_request(&method.into(), None, params);
        let bytes = serde_json::to_vec(&payload).chain_err(|| ErrorKind::SerializeError)?;

        let handle = self.client.connection.ensure_connected().await.map_err(Error::from)?;
        handle.send(bytes).await.chain_err(|| ErrorKind::TransportError)
    }

    /// Ensures a connection is established, dialing if necessary. Fires
    /// immediately if already connected.
    pub async fn connect(&self) -> Result<()> {
        self.client
            .connection
            .ensure_connected()
            .await
            .map(|_| ())
            .map_err(Error::from)
    }

    /// Tears down the live connection (or cancels an in-flight dial).
    /// Every pending call is cancelled as a consequence.
    pub fn disconnect(&self) {
        self.client.connection.disconnect();
    }

    /// Returns a completion that fires with the loss reason the next time
    /// the connection is lost.
    pub fn notify_disconnect(&self) -> oneshot::Receiver<String> {
        self.client.connection.notify_disconnect()
    }

    fn register_call(
        &self,
        method: String,
        params: Params,
        timeout: Duration,
    ) -> (u32, Vec<u8>, oneshot::Receiver<Result<Value>>) {
        let (tx, rx) = oneshot::channel();

        let id = {
            let mut inner = self.client.inner.lock().unwrap();
            let id = inner.next_id();
            let timer_client = self.client.clone();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                timer_client.time_out(id);
            });
            inner.pending.insert(
                id,
                PendingCall {
                    sender: tx,
                    timer: timer.abort_handle(),
                },
            );
            id
        };

        let payload = codec::encode_client_request(&method, Some(&Id::Int(id as i64)), params);
        let bytes = serde_json::to_vec(&payload).unwrap_or_default();
        (id, bytes, rx)
    }
}
