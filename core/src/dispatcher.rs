// Copyright 2017 Amagicom AB.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The service dispatcher: decodes a request payload (single
//! or batch), validates it, invokes the registered handler, and marshals
//! the outcome back into response bytes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::Notify;
use tokio::task::AbortHandle;

use crate::codec::{self, Request, Response};
use crate::error::{RpcError, RpcErrorKind};
use crate::id::Version;
use crate::params::Params;
use crate::registry::{HandlerFn, MethodSpec, Registry};

/// Dispatcher-wide configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Per-call timeout applied to every invocation. `None` disables it.
    pub timeout: Option<Duration>,
    /// Separator used to join namespace segments in [`Dispatcher::add_namespaced`].
    pub separator: String,
    /// Wire version used for structural-fault responses (`ParseError`,
    /// `InvalidRequest`) whose own payload never decoded far enough to carry
    /// a version tag of its own.
    pub default_version: Version,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            timeout: None,
            separator: ".".to_string(),
            default_version: Version::V20,
        }
    }
}

/// The outcome of resolving a decoded request against the registry, before
/// any handler runs.
enum Resolution {
    /// Already final: a registry/validation/drain fault (`Some`), or a
    /// notification that hit one of those faults and produces nothing
    /// (`None`).
    Responded(Option<Response>),
    /// Accepted: ready to invoke.
    Invoke(Request, HandlerFn),
}

/// Decodes, validates, routes and invokes JSON-RPC requests against a
/// [`Registry`] of handlers.
///
/// `call()` never panics and never returns an `Err`: every fault, including
/// a handler panic, is converted into an encoded error response.
pub struct Dispatcher {
    registry: Mutex<Registry>,
    config: ServiceConfig,
    pending: Mutex<HashMap<u64, AbortHandle>>,
    next_invocation_id: AtomicU64,
    drain: Mutex<Option<RpcError>>,
    drain_notify: Notify,
}

impl Dispatcher {
    /// Builds an empty dispatcher under the given configuration.
    pub fn new(config: ServiceConfig) -> Self {
        Dispatcher {
            registry: Mutex::new(Registry::new()),
            config,
            pending: Mutex::new(HashMap::new()),
            next_invocation_id: AtomicU64::new(0),
            drain: Mutex::new(None),
            drain_notify: Notify::new(),
        }
    }

    /// Registers `handler` under `name`.
    pub fn add(&self, name: impl Into<String>, spec: MethodSpec, handler: HandlerFn) {
        self.registry.lock().unwrap().add(name, spec, handler);
    }

    /// Registers `handler` under a namespaced name, joined by this
    /// dispatcher's configured separator.
    pub fn add_namespaced(&self, segments: &[&str], name: impl Into<String>, spec: MethodSpec, handler: HandlerFn) {
        self.registry
            .lock()
            .unwrap()
            .add_namespaced(segments, &self.config.separator, name, spec, handler);
    }

    /// Decodes, validates, dispatches and encodes one payload.
    ///
    /// Returns `None` for a notification (or an all-notification batch);
    /// otherwise the encoded response bytes.
    pub async fn call(&self, payload: &[u8]) -> Option<Vec<u8>> {
        let value: Value = match serde_json::from_slice(payload) {
            Ok(v) => v,
            Err(_) => {
                return Some(self.encode(&Response::structural_error(
                    None,
                    self.config.default_version,
                    RpcError::new(RpcErrorKind::ParseError),
                )))
            }
        };

        match value {
            Value::Object(map) => self.dispatch_object(map).await.map(|r| self.encode(&r)),
            Value::Array(items) if !items.is_empty() => {
                let responses = self.dispatch_batch(items).await;
                if responses.is_empty() {
                    None
                } else {
                    let values: Vec<Value> = responses.iter().map(Response::to_value).collect();
                    Some(serde_json::to_vec(&Value::Array(values)).unwrap_or_default())
                }
            }
            _ => Some(self.encode(&Response::structural_error(
                None,
                self.config.default_version,
                RpcError::new(RpcErrorKind::InvalidRequest),
            ))),
        }
    }

    /// Cancels every in-flight invocation; each surfaces `TimeoutError` to
    /// its own `call()`.
    pub fn cancel_pending(&self) {
        let pending = std::mem::take(&mut *self.pending.lock().unwrap());
        for (_, abort) in pending {
            abort.abort();
        }
    }

    /// Enters drain mode: every subsequent request is answered with `error`
    /// (`ServiceUnavailable` by default) before invocation, and in-flight
    /// work is left to complete. Resolves once the pending set is empty
    /// (immediately, if it already is).
    pub async fn stop_serving(&self, error: Option<RpcError>) {
        *self.drain.lock().unwrap() = Some(error.unwrap_or_else(|| RpcError::new(RpcErrorKind::ServiceUnavailable)));
        loop {
            // Register as a waiter *before* checking emptiness: `notify_waiters`
            // wakes only already-registered waiters and stores no permit, so
            // checking first would let an `invoke` that empties `pending`
            // between the check and the registration notify nobody.
            let notified = self.drain_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.pending.lock().unwrap().is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Clears drain mode.
    pub fn start_serving(&self) {
        *self.drain.lock().unwrap() = None;
    }

    fn encode(&self, response: &Response) -> Vec<u8> {
        serde_json::to_vec(&response.to_value()).unwrap_or_default()
    }

    async fn dispatch_object(&self, map: Map<String, Value>) -> Option<Response> {
        match codec::decode_request_object(&map) {
            Ok(request) => match self.resolve(request) {
                Resolution::Responded(response) => response,
                Resolution::Invoke(request, handler) => self.run(request, handler).await,
            },
            Err((id, error)) => Some(Response::structural_error(id, self.config.default_version, error)),
        }
    }

    /// Splits a batch into its two passes: every decode/validation/
    /// method-not-found fault is resolved synchronously and collected in
    /// input order first, then every accepted request is invoked
    /// concurrently and its result collected, also in input order. The
    /// returned vector is the first group followed by the second — a batch
    /// response reports every rejection before any result, regardless of
    /// which request was invoked fastest.
    async fn dispatch_batch(&self, items: Vec<Value>) -> Vec<Response> {
        let mut rejected = Vec::new();
        let mut accepted = Vec::new();

        for item in items {
            match item {
                Value::Object(map) => match codec::decode_request_object(&map) {
                    Ok(request) => match self.resolve(request) {
                        Resolution::Responded(Some(response)) => rejected.push(response),
                        Resolution::Responded(None) => {}
                        Resolution::Invoke(request, handler) => accepted.push((request, handler)),
                    },
                    Err((id, error)) => rejected.push(Response::structural_error(id, self.config.default_version, error)),
                },
                _ => rejected.push(Response::structural_error(
                    None,
                    self.config.default_version,
                    RpcError::new(RpcErrorKind::InvalidRequest),
                )),
            }
        }

        let invocations = accepted.into_iter().map(|(request, handler)| self.run(request, handler));
        let results: Vec<Response> = futures::future::join_all(invocations).await.into_iter().flatten().collect();

        rejected.into_iter().chain(results).collect()
    }

    /// Resolves a decoded request against the registry: looks up the
    /// method, validates its params, and checks drain mode, in that order
    /// (a request for an unregistered method or with invalid params is
    /// rejected before drain gets a chance to reject it). Returns either an
    /// already-final response (possibly `None` for a notification) or the
    /// handler to invoke.
    fn resolve(&self, request: Request) -> Resolution {
        let method = match self.registry.lock().unwrap().get(&request.method).cloned() {
            Some(method) => method,
            None => {
                return Resolution::Responded(
                    request
                        .id
                        .clone()
                        .map(|id| Response::error(request.version, id, RpcError::new(RpcErrorKind::MethodNotFound))),
                )
            }
        };

        if let Err(error) = validate_params(&method.spec, request.version, &request.params) {
            return Resolution::Responded(request.id.clone().map(|id| Response::error(request.version, id, error)));
        }

        if let Some(drain_error) = self.drain.lock().unwrap().clone() {
            return Resolution::Responded(request.id.clone().map(|id| Response::error(request.version, id, drain_error)));
        }

        Resolution::Invoke(request, method.handler)
    }

    /// Invokes an already-resolved request's handler and builds its
    /// response (`None` for a notification).
    async fn run(&self, request: Request, handler: HandlerFn) -> Option<Response> {
        let Request { version, id, params, .. } = request;
        let outcome = self.invoke(handler, params).await;
        id.map(|id| match outcome {
            Ok(value) => Response::success(version, id, value),
            Err(error) => Response::error(version, id, error),
        })
    }

    async fn invoke(&self, handler: HandlerFn, params: Params) -> std::result::Result<Value, RpcError> {
        let invocation_id = self.next_invocation_id.fetch_add(1, Ordering::SeqCst);
        let join = tokio::spawn((handler)(params));
        let abort = join.abort_handle();
        self.pending.lock().unwrap().insert(invocation_id, abort.clone());

        let outcome = match self.config.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, join).await {
                Ok(join_result) => classify(join_result),
                Err(_elapsed) => {
                    abort.abort();
                    Err(RpcError::new(RpcErrorKind::TimeoutError))
                }
            },
            None => classify(join.await),
        };

        self.pending.lock().unwrap().remove(&invocation_id);
        self.drain_notify.notify_waiters();
        outcome
    }
}

fn classify(
    join_result: std::result::Result<std::result::Result<Value, RpcError>, tokio::task::JoinError>,
) -> std::result::Result<Value, RpcError> {
    match join_result {
        Ok(result) => result,
        Err(join_err) if join_err.is_cancelled() => Err(RpcError::new(RpcErrorKind::TimeoutError)),
        Err(join_err) => {
            error!("handler panicked: {}", join_err);
            Err(RpcError::new(RpcErrorKind::ServerError))
        }
    }
}

/// Validates `params` against `spec` for the given wire `version` (spec
/// §4.2 validation rules): arity and type checks for positional params,
/// required/unknown-key and type checks for keyed params, and rejection of
/// keyed params on a v10 request.
fn validate_params(spec: &MethodSpec, version: Version, params: &Params) -> std::result::Result<(), RpcError> {
    match params {
        Params::Keyed(map) => {
            if !version.allows_keyed_params() {
                return Err(RpcError::new(RpcErrorKind::KeywordError));
            }
            if let Some(required) = &spec.required_keys {
                for key in required {
                    if !map.contains_key(key) {
                        return Err(RpcError::with_data(
                            RpcErrorKind::InvalidParams,
                            Value::String(format!("missing required parameter: {}", key)),
                        ));
                    }
                }
            }
            if let Some(types) = &spec.keyed_types {
                for (key, value) in map {
                    match types.get(key) {
                        Some(ty) if ty.matches(value) => {}
                        Some(_) => {
                            return Err(RpcError::with_data(
                                RpcErrorKind::InvalidParams,
                                Value::String(format!("parameter {} has the wrong type", key)),
                            ))
                        }
                        None => {
                            return Err(RpcError::with_data(
                                RpcErrorKind::InvalidParams,
                                Value::String(format!("unknown parameter: {}", key)),
                            ))
                        }
                    }
                }
            }
            Ok(())
        }
        Params::Positional(items) => {
            if items.len() < spec.mandatory_arity {
                return Err(RpcError::with_message(RpcErrorKind::InvalidParams, "not enough arguments"));
            }
            if let Some(max) = spec.max_arity {
                if items.len() > max {
                    return Err(RpcError::with_message(RpcErrorKind::InvalidParams, "too many arguments"));
                }
            }
            if let Some(types) = &spec.positional_types {
                for (i, value) in items.iter().enumerate() {
                    if let Some(ty) = types.get(i) {
                        if !ty.matches(value) {
                            return Err(RpcError::with_data(
                                RpcErrorKind::InvalidParams,
                                Value::String(format!("parameter {} has the wrong type", i)),
                            ));
                        }
                    }
                }
            }
            Ok(())
        }
        Params::None => {
            if spec.mandatory_arity > 0 {
                return Err(RpcError::with_message(RpcErrorKind::InvalidParams, "not enough arguments"));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn subtract_dispatcher() -> Dispatcher {
        let dispatcher = Dispatcher::new(ServiceConfig::default());
        dispatcher.add(
            "subtract",
            MethodSpec::positional_arity(2),
            Arc::new(|params| {
                Box::pin(async move {
                    let items = match params {
                        Params::Positional(items) => items,
                        Params::Keyed(map) => vec![map["minuend"].clone(), map["subtrahend"].clone()],
                        Params::None => unreachable!(),
                    };
                    let minuend = items[0].as_i64().unwrap();
                    let subtrahend = items[1].as_i64().unwrap();
                    Ok(Value::from(minuend - subtrahend))
                })
            }),
        );
        dispatcher.add(
            "update",
            MethodSpec::unconstrained(),
            Arc::new(|_params| Box::pin(async { Ok(Value::Null) })),
        );
        dispatcher
    }

    async fn call_json(dispatcher: &Dispatcher, request: Value) -> Option<Value> {
        let bytes = serde_json::to_vec(&request).unwrap();
        let response = dispatcher.call(&bytes).await?;
        Some(serde_json::from_slice(&response).unwrap())
    }

    #[tokio::test]
    async fn positional_params() {
        let dispatcher = subtract_dispatcher();
        let request = json!({"jsonrpc": "2.0", "method": "subtract", "params": [42, 23], "id": 1});
        let response = call_json(&dispatcher, request).await.unwrap();
        assert_eq!(response, json!({"jsonrpc": "2.0", "result": 19, "id": 1}));
    }

    #[tokio::test]
    async fn named_params() {
        let dispatcher = subtract_dispatcher();
        let request = json!({
            "jsonrpc": "2.0",
            "method": "subtract",
            "params": {"subtrahend": 23, "minuend": 42},
            "id": 1,
        });
        let response = call_json(&dispatcher, request).await.unwrap();
        assert_eq!(response, json!({"jsonrpc": "2.0", "result": 19, "id": 1}));
    }

    #[tokio::test]
    async fn notification_produces_no_response() {
        let dispatcher = subtract_dispatcher();
        let request = json!({"jsonrpc": "2.0", "method": "update", "params": [1, 2, 3, 4, 5]});
        assert!(call_json(&dispatcher, request).await.is_none());
    }

    #[tokio::test]
    async fn unknown_method_is_reported() {
        let dispatcher = subtract_dispatcher();
        let request = json!({"jsonrpc": "2.0", "method": "foobar", "id": "1"});
        let response = call_json(&dispatcher, request).await.unwrap();
        assert_eq!(
            response,
            json!({"jsonrpc": "2.0", "error": {"code": -32601, "message": "Method not found"}, "id": "1"})
        );
    }

    #[tokio::test]
    async fn malformed_json_yields_a_null_id_parse_error() {
        let dispatcher = subtract_dispatcher();
        let response = dispatcher.call(br#"{"jsonrpc": "2.0", "method": "foobar, "params": "bar", "baz]"#).await.unwrap();
        let response: Value = serde_json::from_slice(&response).unwrap();
        assert_eq!(
            response,
            json!({"jsonrpc": "2.0", "error": {"code": -32700, "message": "Parse error"}, "id": null})
        );
    }

    #[tokio::test]
    async fn a_configured_default_version_is_used_for_structural_faults() {
        let dispatcher = Dispatcher::new(ServiceConfig {
            default_version: Version::V11,
            ..ServiceConfig::default()
        });
        let response = dispatcher.call(b"not json at all").await.unwrap();
        let response: Value = serde_json::from_slice(&response).unwrap();
        assert_eq!(
            response,
            json!({"version": "1.1", "error": {"code": -32700, "message": "Parse error"}, "id": null})
        );
    }

    #[tokio::test]
    async fn wrong_typed_method_field_is_invalid_request() {
        let dispatcher = subtract_dispatcher();
        let request = json!({"jsonrpc": "2.0", "method": 1, "id": "1"});
        let response = call_json(&dispatcher, request).await.unwrap();
        assert_eq!(
            response,
            json!({"jsonrpc": "2.0", "error": {"code": -32600, "message": "Invalid request"}, "id": "1"})
        );
    }

    #[tokio::test]
    async fn empty_batch_is_invalid_request() {
        let dispatcher = subtract_dispatcher();
        let response = call_json(&dispatcher, json!([])).await.unwrap();
        assert_eq!(
            response,
            json!({"jsonrpc": "2.0", "error": {"code": -32600, "message": "Invalid request"}, "id": null})
        );
    }

    #[tokio::test]
    async fn invalid_batch_elements_each_get_their_own_invalid_request() {
        let dispatcher = subtract_dispatcher();
        let response = call_json(&dispatcher, json!([1, 2, 3])).await.unwrap();
        let expected_item = json!({"jsonrpc": "2.0", "error": {"code": -32600, "message": "Invalid request"}, "id": null});
        assert_eq!(response, json!([expected_item, expected_item, expected_item]));
    }

    #[tokio::test]
    async fn batch_drops_notification_responses_and_orders_results_after_errors() {
        let dispatcher = subtract_dispatcher();
        let request = json!([
            {"jsonrpc": "2.0", "method": "subtract", "params": [42, 23], "id": 1},
            {"jsonrpc": "2.0", "method": "update", "params": [1, 2, 3, 4, 5]},
            {"foo": "bar"},
            {"jsonrpc": "2.0", "method": "subtract", "params": {"subtrahend": 23, "minuend": 42}, "id": 3},
        ]);
        let response = call_json(&dispatcher, request).await.unwrap();
        assert_eq!(
            response,
            json!([
                {"jsonrpc": "2.0", "error": {"code": -32600, "message": "Invalid request"}, "id": null},
                {"jsonrpc": "2.0", "result": 19, "id": 1},
                {"jsonrpc": "2.0", "result": 19, "id": 3},
            ])
        );
    }

    #[tokio::test]
    async fn a_mixed_batch_answers_with_every_rejection_before_any_result() {
        let dispatcher = subtract_dispatcher();
        let request = json!([
            {"jsonrpc": "2.0", "method": "subtract", "params": [42, 23], "id": 1},
            {"jsonrpc": "2.0", "method": "update", "params": [1, 2, 3, 4, 5]},
            {"foo": "bar"},
            {"jsonrpc": "2.0", "method": "foobar", "id": 2},
            {"jsonrpc": "2.0", "method": "subtract", "params": {"subtrahend": 23, "minuend": 42}, "id": 3},
        ]);
        let response = call_json(&dispatcher, request).await.unwrap();
        assert_eq!(
            response,
            json!([
                {"jsonrpc": "2.0", "error": {"code": -32600, "message": "Invalid request"}, "id": null},
                {"jsonrpc": "2.0", "error": {"code": -32601, "message": "Method not found"}, "id": 2},
                {"jsonrpc": "2.0", "result": 19, "id": 1},
                {"jsonrpc": "2.0", "result": 19, "id": 3},
            ])
        );
    }

    #[tokio::test]
    async fn an_all_notification_batch_produces_no_response() {
        let dispatcher = subtract_dispatcher();
        let request = json!([
            {"jsonrpc": "2.0", "method": "update", "params": [1, 2, 3, 4, 5]},
            {"jsonrpc": "2.0", "method": "update", "params": ["x", "y", "z"]},
        ]);
        assert!(call_json(&dispatcher, request).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn a_handler_past_its_timeout_reports_timeout_error() {
        let dispatcher = Dispatcher::new(ServiceConfig {
            timeout: Some(Duration::from_secs(1)),
            ..ServiceConfig::default()
        });
        dispatcher.add(
            "delay",
            MethodSpec::unconstrained(),
            Arc::new(|_params| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(Value::String("x".into()))
                })
            }),
        );

        let request = json!({"jsonrpc": "2.0", "method": "delay", "params": [10], "id": "1"});
        let bytes = serde_json::to_vec(&request).unwrap();
        let call = dispatcher.call(&bytes);
        tokio::pin!(call);

        tokio::time::advance(Duration::from_secs(5)).await;
        let response: Value = serde_json::from_slice(&call.await.unwrap()).unwrap();
        assert_eq!(
            response,
            json!({"jsonrpc": "2.0", "error": {"code": -32098, "message": "Server Timeout"}, "id": "1"})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_pending_times_out_every_in_flight_call() {
        let dispatcher = Arc::new(subtract_dispatcher());
        dispatcher.add(
            "delay",
            MethodSpec::unconstrained(),
            Arc::new(|_params| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(Value::Null)
                })
            }),
        );

        let make_call = |id: &'static str| {
            let dispatcher = dispatcher.clone();
            async move {
                let request = json!({"jsonrpc": "2.0", "method": "delay", "params": [10], "id": id});
                let bytes = serde_json::to_vec(&request).unwrap();
                dispatcher.call(&bytes).await
            }
        };

        let call1 = make_call("1");
        let call2 = make_call("2");
        tokio::pin!(call1);
        tokio::pin!(call2);

        // poll both once so each invocation registers itself in `pending`
        futures::poll!(&mut call1);
        futures::poll!(&mut call2);

        dispatcher.cancel_pending();

        let r1: Value = serde_json::from_slice(&call1.await.unwrap()).unwrap();
        let r2: Value = serde_json::from_slice(&call2.await.unwrap()).unwrap();
        assert_eq!(r1["error"]["code"], json!(-32098));
        assert_eq!(r2["error"]["code"], json!(-32098));
    }

    #[tokio::test]
    async fn draining_answers_new_requests_with_service_unavailable_and_lets_pending_work_finish() {
        let dispatcher = Arc::new(subtract_dispatcher());
        dispatcher.add(
            "delay",
            MethodSpec::unconstrained(),
            Arc::new(|_params| {
                Box::pin(async move {
                    tokio::task::yield_now().await;
                    Ok(Value::String("x".into()))
                })
            }),
        );

        let in_flight = {
            let request = json!({"jsonrpc": "2.0", "method": "delay", "params": [], "id": "1"});
            let bytes = serde_json::to_vec(&request).unwrap();
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.call(&bytes).await })
        };
        tokio::task::yield_now().await;

        let stop = dispatcher.stop_serving(None);
        tokio::pin!(stop);
        futures::poll!(&mut stop);

        let rejected = json!({"jsonrpc": "2.0", "method": "subtract", "params": [1, 1], "id": "2"});
        let rejected_bytes = serde_json::to_vec(&rejected).unwrap();
        let rejected_response: Value = serde_json::from_slice(&dispatcher.call(&rejected_bytes).await.unwrap()).unwrap();
        assert_eq!(rejected_response["error"]["code"], json!(-32097));

        stop.await;

        let in_flight_response: Value = serde_json::from_slice(&in_flight.await.unwrap().unwrap()).unwrap();
        assert_eq!(in_flight_response["result"], json!("x"));
    }

    #[tokio::test]
    async fn a_handler_panic_is_reported_as_a_server_error_not_propagated() {
        let dispatcher = subtract_dispatcher();
        dispatcher.add(
            "boom",
            MethodSpec::unconstrained(),
            Arc::new(|_params| Box::pin(async move { panic!("handler exploded") })),
        );

        let request = json!({"jsonrpc": "2.0", "method": "boom", "id": "1"});
        let response = call_json(&dispatcher, request).await.unwrap();
        assert_eq!(
            response,
            json!({"jsonrpc": "2.0", "error": {"code": -32000, "message": "Server error"}, "id": "1"})
        );
    }
}
