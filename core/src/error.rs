// Copyright 2017 Amagicom AB.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The JSON-RPC 2.0 error taxonomy.
//!
//! [`RpcError`] is the tagged `{code, message, data}` value that travels on
//! the wire inside an error response. [`RpcErrorKind`] enumerates the
//! pre-defined kinds with their fixed numeric codes. [`Error`]/[`ErrorKind`]
//! (generated by `error_chain!`) are the crate's own fault type, used for
//! faults that never reach the wire (caller misuse, transport faults,
//! protocol violations on the client side).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC 2.0 error value: `{code, message, data?}`.
///
/// This is what actually gets serialized into an error response. It is
/// deliberately decoupled from [`Error`] (the crate's own Rust-level fault
/// type) because a handler may want to raise an arbitrary application error
/// with its own code, not just one of the pre-defined [`RpcErrorKind`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code, per JSON-RPC 2.0 and this crate's reserved range.
    pub code: i32,
    /// Human readable, one-line error description.
    pub message: String,
    /// Optional structured error detail (e.g. which param failed validation).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Builds an `RpcError` from one of the pre-defined kinds, with no
    /// extra `data`.
    pub fn new(kind: RpcErrorKind) -> Self {
        RpcError {
            code: kind.code(),
            message: kind.message().to_string(),
            data: None,
        }
    }

    /// Builds an `RpcError` from one of the pre-defined kinds, attaching
    /// `data` (e.g. the faulting parameter name).
    pub fn with_data(kind: RpcErrorKind, data: Value) -> Self {
        RpcError {
            code: kind.code(),
            message: kind.message().to_string(),
            data: Some(data),
        }
    }

    /// Builds an `RpcError` from one of the pre-defined kinds but overrides
    /// the message, e.g. `InvalidParams("not enough arguments")`.
    pub fn with_message(kind: RpcErrorKind, message: impl Into<String>) -> Self {
        RpcError {
            code: kind.code(),
            message: message.into(),
            data: None,
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

/// The pre-defined error kinds, with their fixed wire codes.
///
/// `ServiceUnavailable`'s code is configurable at the call site:
/// [`crate::dispatcher::Dispatcher::stop_serving`] accepts an `RpcError` to
/// use in place of the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorKind {
    /// Payload is not valid JSON.
    ParseError,
    /// Structural mismatch: missing method, wrong types, empty batch.
    InvalidRequest,
    /// Method name not registered.
    MethodNotFound,
    /// Arity/type mismatch, or missing required keyed param.
    InvalidParams,
    /// Reserved; unused by default.
    InternalError,
    /// Keyed params supplied to a v1.0 request.
    KeywordError,
    /// Per-call timer fired, or `cancel_pending` was called.
    TimeoutError,
    /// Request arrived while the dispatcher is draining.
    ServiceUnavailable,
    /// Uncaught handler failure; the original panic/error is logged, not surfaced.
    ServerError,
}

impl RpcErrorKind {
    /// The wire code fixed for this kind.
    pub fn code(self) -> i32 {
        match self {
            RpcErrorKind::ParseError => -32700,
            RpcErrorKind::InvalidRequest => -32600,
            RpcErrorKind::MethodNotFound => -32601,
            RpcErrorKind::InvalidParams => -32602,
            RpcErrorKind::InternalError => -32603,
            RpcErrorKind::KeywordError => -32099,
            RpcErrorKind::TimeoutError => -32098,
            RpcErrorKind::ServiceUnavailable => -32097,
            RpcErrorKind::ServerError => -32000,
        }
    }

    /// The default human-readable message for this kind.
    pub fn message(self) -> &'static str {
        match self {
            RpcErrorKind::ParseError => "Parse error",
            RpcErrorKind::InvalidRequest => "Invalid request",
            RpcErrorKind::MethodNotFound => "Method not found",
            RpcErrorKind::InvalidParams => "Invalid params",
            RpcErrorKind::InternalError => "Internal error",
            RpcErrorKind::KeywordError => "Keyword arguments are not allowed for this JSON-RPC version",
            RpcErrorKind::TimeoutError => "Server Timeout",
            RpcErrorKind::ServiceUnavailable => "Service unavailable",
            RpcErrorKind::ServerError => "Server error",
        }
    }
}

impl From<RpcErrorKind> for RpcError {
    fn from(kind: RpcErrorKind) -> Self {
        RpcError::new(kind)
    }
}

error_chain! {
    errors {
        /// Error in the underlying transport layer.
        TransportError {
            description("unable to send or receive a JSON-RPC payload")
        }
        /// Error while serializing method parameters or a response.
        SerializeError {
            description("unable to serialize a JSON-RPC payload")
        }
        /// Error while deserializing an incoming payload.
        DeserializeError {
            description("unable to deserialize a JSON-RPC payload")
        }
        /// A response referenced a pending call id this client never sent.
        ///
        /// The connection is *kept* for this fault: an unrecognized id is
        /// reported but does not cast doubt on the rest of the stream.
        ClientError(msg: String) {
            description("invalid JSON-RPC client usage or unexpected response")
            display("JSON-RPC client error: {}", msg)
        }
        /// A response violated the wire contract (missing `jsonrpc`, missing
        /// `id`, neither/both of `result`/`error` present, malformed JSON).
        ///
        /// Connection-fatal: the caller is expected to drop the transport
        /// when this surfaces.
        ProtocolError(msg: String) {
            description("JSON-RPC protocol violation")
            display("JSON-RPC protocol error: {}", msg)
        }
        /// The peer answered with a JSON-RPC error object.
        Remote(error: RpcError) {
            description("the remote peer returned a JSON-RPC error")
            display("JSON-RPC error {}: {}", error.code, error.message)
        }
        /// The call was cancelled (client disconnect or explicit cancel).
        Cancelled {
            description("the call was cancelled before it completed")
        }
        /// The call's own per-request timer fired before a response arrived.
        Timeout {
            description("the call timed out before a response arrived")
        }
        /// The client (or dispatcher) has already shut down.
        Shutdown {
            description("JSON-RPC engine already shut down")
        }
        /// The connection dial failed.
        ConnectError(msg: String) {
            description("failed to establish a connection")
            display("connection error: {}", msg)
        }
    }
}
