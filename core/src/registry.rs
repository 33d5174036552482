// Copyright 2017 Amagicom AB.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The handler registry: maps exported callables to dotted names under an
//! optional namespace.
//!
//! Rust has no runtime method reflection, so arity and type information
//! must be supplied explicitly at registration time rather than discovered
//! by inspecting a handler's signature.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::RpcError;
use crate::params::Params;

/// A boxed, type-erased future, the common currency handlers resolve to.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send>>;

/// A type-erased RPC method body.
///
/// The dispatcher always treats the outcome as an asynchronous completion,
/// whether or not the handler itself ever actually suspends.
pub type HandlerFn = Arc<dyn Fn(Params) -> HandlerFuture + Send + Sync>;

/// Coarse value-kind used for optional parameter type-checking, applied
/// when a method registers a type table alongside its arity.
///
/// Rust has no single runtime "type" value to register per parameter, so
/// this enumerates the handful of JSON-level shapes a handler might want
/// to constrain a parameter to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Any JSON string.
    Str,
    /// Any JSON integer (rejects floats with a fractional part).
    Int,
    /// Any JSON number.
    Number,
    /// `true` or `false`.
    Bool,
    /// A JSON array.
    Array,
    /// A JSON object.
    Object,
    /// No constraint; matches anything.
    Any,
}

impl ValueType {
    /// Whether `value` satisfies this type constraint. A `null` value
    /// always satisfies any constraint, regardless of the declared type.
    pub fn matches(self, value: &Value) -> bool {
        if value.is_null() {
            return true;
        }
        match self {
            ValueType::Str => value.is_string(),
            ValueType::Int => value.is_i64() || value.is_u64(),
            ValueType::Number => value.is_number(),
            ValueType::Bool => value.is_boolean(),
            ValueType::Array => value.is_array(),
            ValueType::Object => value.is_object(),
            ValueType::Any => true,
        }
    }
}

/// Arity and (optional) type constraints for one registered method.
#[derive(Debug, Clone, Default)]
pub struct MethodSpec {
    /// Minimum number of positional arguments, excluding any
    /// implicit-self-like leading parameter.
    pub mandatory_arity: usize,
    /// Maximum number of positional arguments. `None` means variadic (no
    /// upper bound is enforced).
    pub max_arity: Option<usize>,
    /// Per-position type constraints for positional calls.
    pub positional_types: Option<Vec<ValueType>>,
    /// Per-key type constraints for keyed calls.
    pub keyed_types: Option<HashMap<String, ValueType>>,
    /// Keys that must be present in a keyed call.
    pub required_keys: Option<HashSet<String>>,
}

impl MethodSpec {
    /// A spec with no arity bound and no type table: any params are
    /// accepted and passed straight through to the handler.
    pub fn unconstrained() -> Self {
        MethodSpec {
            mandatory_arity: 0,
            max_arity: None,
            positional_types: None,
            keyed_types: None,
            required_keys: None,
        }
    }

    /// A spec requiring exactly `n` positional arguments of any type.
    pub fn positional_arity(n: usize) -> Self {
        MethodSpec {
            mandatory_arity: n,
            max_arity: Some(n),
            ..MethodSpec::unconstrained()
        }
    }
}

/// A method as stored in the [`Registry`]: its callable plus its spec.
#[derive(Clone)]
pub struct RegisteredMethod {
    pub(crate) handler: HandlerFn,
    pub(crate) spec: MethodSpec,
}

/// Maps fully-qualified method names to registered handlers.
#[derive(Clone, Default)]
pub struct Registry {
    methods: HashMap<String, RegisteredMethod>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Registry {
            methods: HashMap::new(),
        }
    }

    /// Registers `handler` under `name` with the given arity/type `spec`.
    ///
    /// Duplicate registrations are not rejected: the last registration for
    /// a given name wins.
    pub fn add(&mut self, name: impl Into<String>, spec: MethodSpec, handler: HandlerFn) {
        self.methods.insert(
            name.into(),
            RegisteredMethod { handler, spec },
        );
    }

    /// Registers `handler` under a namespaced name:
    /// `segments.join(separator) + separator + name` when `segments` is
    /// non-empty, or bare `name` when there is no namespace.
    pub fn add_namespaced(
        &mut self,
        segments: &[&str],
        separator: &str,
        name: impl Into<String>,
        spec: MethodSpec,
        handler: HandlerFn,
    ) {
        let name = name.into();
        let full_name = if segments.is_empty() {
            name
        } else {
            format!("{}{}{}", segments.join(separator), separator, name)
        };
        self.add(full_name, spec, handler);
    }

    /// Looks up a registered method by its fully qualified name.
    pub fn get(&self, name: &str) -> Option<&RegisteredMethod> {
        self.methods.get(name)
    }

    /// Whether a method is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn noop_handler() -> HandlerFn {
        Arc::new(|_params| Box::pin(async { Ok(Value::Null) }))
    }

    #[test]
    fn bare_registration_uses_the_name_verbatim() {
        let mut registry = Registry::new();
        registry.add("subtract", MethodSpec::unconstrained(), noop_handler());
        assert!(registry.contains("subtract"));
    }

    #[test]
    fn namespaced_registration_joins_segments_with_the_separator() {
        let mut registry = Registry::new();
        registry.add_namespaced(&["math", "basic"], ".", "subtract", MethodSpec::unconstrained(), noop_handler());
        assert!(registry.contains("math.basic.subtract"));
        assert!(!registry.contains("subtract"));
    }

    #[test]
    fn an_empty_namespace_is_the_same_as_a_bare_registration() {
        let mut registry = Registry::new();
        registry.add_namespaced(&[], ".", "subtract", MethodSpec::unconstrained(), noop_handler());
        assert!(registry.contains("subtract"));
    }

    #[test]
    fn the_last_registration_under_a_name_wins() {
        let mut registry = Registry::new();
        registry.add("ping", MethodSpec::positional_arity(1), noop_handler());
        registry.add("ping", MethodSpec::positional_arity(2), noop_handler());
        assert_eq!(registry.get("ping").unwrap().spec.mandatory_arity, 2);
    }

    #[test]
    fn value_type_matches_treats_null_as_satisfying_anything() {
        assert!(ValueType::Str.matches(&Value::Null));
        assert!(ValueType::Int.matches(&Value::Null));
    }

    #[test]
    fn value_type_int_rejects_strings() {
        assert!(!ValueType::Int.matches(&Value::String("1".into())));
        assert!(ValueType::Int.matches(&Value::from(1)));
    }
}
