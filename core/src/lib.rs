// Copyright 2017 Amagicom AB.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A transport agnostic JSON-RPC 2.0 engine pair.
//!
//! This crate provides the two halves of a JSON-RPC 2.0 conversation:
//!
//! - [`dispatcher::Dispatcher`], a server-side component that decodes incoming
//!   request payloads (single or batched), validates them against the
//!   JSON-RPC 2.0 wire format (and the legacy 1.x profile), routes them to
//!   registered handlers, and marshals the result back into response bytes.
//! - [`client::Client`], which assigns ids, builds request/notification
//!   payloads, and correlates incoming response bytes back to the caller
//!   that is waiting for them.
//!
//! Both halves are transport agnostic: they consume and produce plain byte
//! payloads. Framing a byte stream into discrete payloads (and dialing the
//! actual socket) is the job of a [`transport::Connector`] implementation —
//! see the `jsonrpc-rs-netstring` crate for the reference adapter.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use jsonrpc_rs_core::dispatcher::{Dispatcher, ServiceConfig};
//! use jsonrpc_rs_core::registry::MethodSpec;
//!
//! let dispatcher = Dispatcher::new(ServiceConfig::default());
//! dispatcher.add(
//!     "subtract",
//!     MethodSpec::positional_arity(2),
//!     Arc::new(|params| Box::pin(async move { /* ... */ Ok(serde_json::Value::Null) })),
//! );
//!
//! let response = dispatcher.call(&request_bytes).await;
//! ```

#![deny(missing_docs)]

#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate log;

pub mod client;
pub mod codec;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod id;
pub mod params;
pub mod registry;
pub mod transport;

pub use client::{Client, ClientHandle};
pub use codec::{Request, Response};
pub use connection::ConnectionManager;
pub use dispatcher::Dispatcher;
pub use error::{Error, ErrorKind, Result, RpcError};
pub use id::{Id, Version};
pub use params::Params;
pub use registry::Registry;
