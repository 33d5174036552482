// Copyright 2017 Amagicom AB.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Request/response id and protocol version tags.

use serde_json::Value;

/// A JSON-RPC request/response id.
///
/// Preserved bit-identically end to end: a string id comes back as the same
/// string, an integer never gets coerced to a float or vice versa. Whether
/// an id was *absent* (a notification) is modeled by wrapping this type in
/// `Option<Id>` at the call sites rather than folding it into this enum —
/// `None` is "absent", `Some(Id::Null)` is an explicit JSON `null` id.
#[derive(Debug, Clone, PartialEq)]
pub enum Id {
    /// A string id.
    Str(String),
    /// An integer id.
    Int(i64),
    /// A floating point id, even though no sane caller should generate one.
    Float(f64),
    /// An explicit JSON `null` id.
    Null,
}

impl Id {
    /// Decodes an id from a parsed `serde_json::Value`, returning `None` if
    /// `value` is not a valid id shape (string, integer, float or null).
    pub fn from_value(value: &Value) -> Option<Id> {
        match value {
            Value::String(s) => Some(Id::Str(s.clone())),
            Value::Null => Some(Id::Null),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Id::Int(i))
                } else {
                    n.as_f64().map(Id::Float)
                }
            }
            _ => None,
        }
    }

    /// Encodes this id back into a `serde_json::Value`, preserving the
    /// original representation.
    pub fn to_value(&self) -> Value {
        match self {
            Id::Str(s) => Value::String(s.clone()),
            Id::Int(i) => Value::from(*i),
            Id::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Id::Null => Value::Null,
        }
    }
}

/// The JSON-RPC protocol version a request/response was decoded under.
///
/// `V20` is the `jsonrpc:"2.0"` wire profile. `V11` is the legacy
/// `version:"1.1"` profile (keyed params allowed). `V10` is the original
/// JSON-RPC 1.0 profile (no `jsonrpc`/`version` field at all, no keyed
/// params, and a distinct `{result, error}` response shape).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    /// JSON-RPC 2.0 (`jsonrpc: "2.0"`).
    V20,
    /// The 1.1 compatibility profile (`version: "1.1"`).
    V11,
    /// The 1.0 profile (no version field).
    V10,
}

impl Version {
    /// Decodes the version tag from a request object's fields:
    /// `jsonrpc:"2.0"` → `V20`, `version:"1.1"` → `V11`, else `V10`.
    pub fn from_request_fields(jsonrpc: Option<&Value>, version: Option<&Value>) -> Version {
        if let Some(Value::String(s)) = jsonrpc {
            if s == "2.0" {
                return Version::V20;
            }
        }
        if let Some(Value::String(s)) = version {
            if s == "1.1" {
                return Version::V11;
            }
        }
        Version::V10
    }

    /// Whether this version accepts keyed (mapping) params. Only v1.1+.
    pub fn allows_keyed_params(self) -> bool {
        !matches!(self, Version::V10)
    }
}
