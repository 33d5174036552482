// Copyright 2017 Amagicom AB.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `params` field of a JSON-RPC request: positional, keyed, or absent.

use serde_json::{Map, Value};

use crate::error::{ErrorKind, Result};

/// A request's parameters: positional, keyed, or absent.
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    /// An ordered sequence of positional arguments.
    Positional(Vec<Value>),
    /// A keyed mapping of named arguments. Only legal for v1.1+.
    Keyed(Map<String, Value>),
    /// No `params` field at all.
    None,
}

impl Params {
    /// Decodes `params` from a parsed request object's `params` field.
    ///
    /// Returns `Ok(None)` shaped as `Params::None` when the field is absent
    /// or explicitly `null`. Any other non-array, non-object shape is
    /// rejected: `params`, when present, must be a sequence, mapping, or
    /// null.
    pub fn from_value(value: Option<&Value>) -> Result<Params> {
        match value {
            None => Ok(Params::None),
            Some(Value::Null) => Ok(Params::None),
            Some(Value::Array(items)) => Ok(Params::Positional(items.clone())),
            Some(Value::Object(map)) => Ok(Params::Keyed(map.clone())),
            Some(_) => Err(ErrorKind::ProtocolError("params must be an array, object or null".into()).into()),
        }
    }

    /// The number of positional arguments, or the number of keyed entries.
    /// `0` for `Params::None`.
    pub fn len(&self) -> usize {
        match self {
            Params::Positional(items) => items.len(),
            Params::Keyed(map) => map.len(),
            Params::None => 0,
        }
    }

    /// Whether there are no parameters at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds a request's `params` value from a caller-supplied positional list
/// or keyed map (but never both).
///
/// A lone positional argument that is itself a JSON object is promoted to
/// keyed params: a sole-mapping positional argument becomes a keyed call,
/// for compatibility with servers that expect a single keyed-argument call.
pub fn build_params(positional: Option<Vec<Value>>, keyed: Option<Map<String, Value>>) -> Result<Params> {
    match (positional, keyed) {
        (Some(_), Some(_)) => Err(ErrorKind::ClientError(
            "call accepts positional or keyed arguments, but not both".into(),
        )
        .into()),
        (None, Some(map)) => Ok(Params::Keyed(map)),
        (Some(mut items), None) => {
            if items.len() == 1 {
                if let Value::Object(map) = items.remove(0) {
                    return Ok(Params::Keyed(map));
                }
                return Ok(Params::Positional(items));
            }
            Ok(Params::Positional(items))
        }
        (None, None) => Ok(Params::Positional(Vec::new())),
    }
}

impl From<Params> for Value {
    fn from(params: Params) -> Value {
        match params {
            Params::Positional(items) => Value::Array(items),
            Params::Keyed(map) => Value::Object(map),
            Params::None => Value::Array(Vec::new()),
        }
    }
}
