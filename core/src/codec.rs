// Copyright 2017 Amagicom AB.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Decoding and encoding of JSON-RPC request/response envelopes.

use serde_json::{Map, Value};

use crate::error::{RpcError, RpcErrorKind};
use crate::id::{Id, Version};
use crate::params::Params;

/// A single decoded request (or notification, when `id` is `None`).
#[derive(Debug, Clone)]
pub struct Request {
    /// Which wire profile this request was decoded under.
    pub version: Version,
    /// `None` marks a notification: no response is ever produced for it,
    /// except when its own validation fails.
    pub id: Option<Id>,
    /// The method name, not yet resolved against a [`crate::registry::Registry`].
    pub method: String,
    /// The decoded parameters.
    pub params: Params,
}

impl Request {
    /// Whether this is a notification (no `id`, so no response is ever sent).
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A fully built response envelope, ready to be serialized.
#[derive(Debug, Clone)]
pub struct Response {
    id: Id,
    version: Version,
    outcome: Result<Value, RpcError>,
}

impl Response {
    /// A successful response.
    pub fn success(version: Version, id: Id, result: Value) -> Self {
        Response {
            id,
            version,
            outcome: Ok(result),
        }
    }

    /// An error response.
    pub fn error(version: Version, id: Id, error: RpcError) -> Self {
        Response {
            id,
            version,
            outcome: Err(error),
        }
    }

    /// An `InvalidRequest`/`ParseError` response. These render under the
    /// dispatcher's configured `default_version` regardless of any version
    /// that could be inferred from the (partially or fully unparseable)
    /// payload: a structurally invalid envelope never decoded far enough to
    /// carry a reliable version tag of its own.
    pub fn structural_error(id: Option<Id>, version: Version, error: RpcError) -> Self {
        Response {
            id: id.unwrap_or(Id::Null),
            version,
            outcome: Err(error),
        }
    }

    /// The id this response answers.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Whether this response carries an error.
    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    /// Serializes this response to its wire `Value`: v2.0 and
    /// v1.1 both carry `{version-tag, id, result|error}`; v1.0 carries
    /// `{id, result, error}` where a successful call omits `error` and a
    /// failed call sets `result: null` and `error` to the plain message
    /// string.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        match self.version {
            Version::V20 => {
                map.insert("jsonrpc".into(), Value::String("2.0".into()));
                map.insert("id".into(), self.id.to_value());
                match &self.outcome {
                    Ok(result) => {
                        map.insert("result".into(), result.clone());
                    }
                    Err(err) => {
                        map.insert("error".into(), serde_json::to_value(err).unwrap_or(Value::Null));
                    }
                }
            }
            Version::V11 => {
                map.insert("version".into(), Value::String("1.1".into()));
                map.insert("id".into(), self.id.to_value());
                match &self.outcome {
                    Ok(result) => {
                        map.insert("result".into(), result.clone());
                    }
                    Err(err) => {
                        map.insert("error".into(), serde_json::to_value(err).unwrap_or(Value::Null));
                    }
                }
            }
            Version::V10 => {
                map.insert("id".into(), self.id.to_value());
                match &self.outcome {
                    Ok(result) => {
                        map.insert("result".into(), result.clone());
                    }
                    Err(err) => {
                        map.insert("result".into(), Value::Null);
                        map.insert("error".into(), Value::String(err.message.clone()));
                    }
                }
            }
        }
        Value::Object(map)
    }
}

/// Decodes one request object's fields, stopping at the first structural
/// fault and carrying forward whatever `id` had already been extracted in
/// field order (`jsonrpc`, then `id`, then `method`, then `params`), so
/// e.g. a request with a valid `id` but an invalid `method` type still
/// answers with that `id`.
///
/// Returns `Err((id_so_far, error))` on a structural fault; the caller is
/// expected to render that as [`Response::structural_error`]. Method
/// *existence* is not checked here — that needs the registry, and is the
/// dispatcher's job.
pub fn decode_request_object(map: &Map<String, Value>) -> Result<Request, (Option<Id>, RpcError)> {
    if let Some(Value::String(s)) = map.get("jsonrpc") {
        if s != "2.0" {
            return Err((None, RpcError::new(RpcErrorKind::InvalidRequest)));
        }
    }
    let version = Version::from_request_fields(map.get("jsonrpc"), map.get("version"));

    let id = match map.get("id") {
        None => None,
        Some(v) => match Id::from_value(v) {
            Some(id) => Some(id),
            None => return Err((None, RpcError::new(RpcErrorKind::InvalidRequest))),
        },
    };

    let method = match map.get("method") {
        Some(Value::String(s)) => s.clone(),
        _ => return Err((id, RpcError::new(RpcErrorKind::InvalidRequest))),
    };

    let params = match Params::from_value(map.get("params")) {
        Ok(p) => p,
        Err(_) => return Err((id, RpcError::new(RpcErrorKind::InvalidRequest))),
    };

    Ok(Request {
        version,
        id,
        method,
        params,
    })
}

/// Builds a client-side request payload: `{jsonrpc, method, params, id?}`.
/// The client only ever speaks v2.0 on the wire.
pub fn encode_client_request(method: &str, id: Option<&Id>, params: Params) -> Value {
    let mut map = Map::new();
    map.insert("jsonrpc".into(), Value::String("2.0".into()));
    map.insert("method".into(), Value::String(method.into()));
    map.insert("params".into(), params.into());
    if let Some(id) = id {
        map.insert("id".into(), id.to_value());
    }
    Value::Object(map)
}

/// The decoded shape of an incoming client-side response.
pub struct ClientResponse {
    /// The id this response answers.
    pub id: Id,
    /// `Ok` for a result response, `Err` for an error response.
    pub outcome: Result<Value, RpcError>,
}

/// Decodes and validates a response payload: it must parse as JSON, carry
/// `jsonrpc: "2.0"`, include an `id`, and contain exactly one of
/// `result`/`error`. Any violation is a connection-fatal protocol fault
/// (`ProtocolError`).
pub fn decode_client_response(value: &Value) -> Result<ClientResponse, String> {
    let map = value
        .as_object()
        .ok_or_else(|| "response is not a JSON object".to_string())?;

    match map.get("jsonrpc") {
        Some(Value::String(s)) if s == "2.0" => {}
        _ => return Err("not a valid jsonrpc response (no version)".to_string()),
    }

    let id_value = map
        .get("id")
        .ok_or_else(|| "not a valid jsonrpc response (no id)".to_string())?;
    let id = Id::from_value(id_value).ok_or_else(|| "response id has an invalid type".to_string())?;

    let has_result = map.contains_key("result");
    let has_error = map.contains_key("error");

    let outcome = match (has_result, has_error) {
        (true, false) => Ok(map.get("result").cloned().unwrap_or(Value::Null)),
        (false, true) => {
            let error_value = map.get("error").cloned().unwrap_or(Value::Null);
            let error: RpcError = serde_json::from_value(error_value)
                .map_err(|_| "error field is not a valid JSON-RPC error object".to_string())?;
            Err(error)
        }
        _ => return Err("response must contain exactly one of result/error".to_string()),
    };

    Ok(ClientResponse { id, outcome })
}
