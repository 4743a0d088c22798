//! Method registry: the default [`RpcHandler`].

use std::collections::{BTreeMap, HashMap};

use serde_json::{json, Value};

use crate::rpc::handler::RpcHandler;
use crate::rpc::types::{RpcError, RpcRequest};

type Method = Box<dyn Fn(&Value) -> Result<Value, RpcError> + Send + Sync>;

/// Maps method names to synchronous handlers.
pub struct MethodRegistry {
    methods: HashMap<String, Method>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    /// Registry with the informational methods every deployment answers:
    /// `web3_clientVersion`, `net_listening` and `rpc_modules`.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        let version = format!("{}/v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        registry.register("web3_clientVersion", move |_| Ok(Value::String(version.clone())));
        registry.register("net_listening", |_| Ok(Value::Bool(true)));

        // Module names are the method prefixes, reported with a fixed "1.0".
        let mut modules: BTreeMap<String, Value> = registry
            .methods()
            .iter()
            .filter_map(|name| name.split_once('_').map(|(module, _)| module.to_string()))
            .map(|module| (module, json!("1.0")))
            .collect();
        modules.insert("rpc".to_string(), json!("1.0"));
        let modules = Value::Object(modules.into_iter().collect());
        registry.register("rpc_modules", move |_| Ok(modules.clone()));

        registry
    }

    /// Register `method`, replacing any previous handler with the same name.
    pub fn register<F>(&mut self, method: &str, handler: F)
    where
        F: Fn(&Value) -> Result<Value, RpcError> + Send + Sync + 'static,
    {
        if self.methods.insert(method.to_owned(), Box::new(handler)).is_some() {
            tracing::debug!(method, "Replaced RPC method handler");
        }
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.methods())
            .finish()
    }
}

impl RpcHandler for MethodRegistry {
    fn handle(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        let Some(method) = self.methods.get(&request.method) else {
            return Err(RpcError::method_not_found(&request.method));
        };
        method(&request.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::types::{INVALID_PARAMS, METHOD_NOT_FOUND};

    #[test]
    fn dispatches_registered_method() {
        let mut registry = MethodRegistry::new();
        registry.register("math_add", |params| {
            let pair: (i64, i64) = serde_json::from_value(params.clone())
                .map_err(|e| RpcError::invalid_params(e.to_string()))?;
            Ok(json!(pair.0 + pair.1))
        });

        let result = registry.handle(&RpcRequest::new("math_add", json!([2, 3]), json!(1)));
        assert_eq!(result, Ok(json!(5)));

        let err = registry
            .handle(&RpcRequest::new("math_add", json!("x"), json!(1)))
            .unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);
    }

    #[test]
    fn unknown_method_not_found() {
        let registry = MethodRegistry::new();
        let err = registry
            .handle(&RpcRequest::new("eth_call", Value::Null, json!(1)))
            .unwrap_err();
        assert_eq!(err.code, METHOD_NOT_FOUND);
    }

    #[test]
    fn standard_methods() {
        let registry = MethodRegistry::standard();
        assert_eq!(
            registry.methods(),
            vec!["net_listening", "rpc_modules", "web3_clientVersion"]
        );

        let modules = registry
            .handle(&RpcRequest::new("rpc_modules", Value::Null, json!(1)))
            .unwrap();
        assert_eq!(modules, json!({"net": "1.0", "rpc": "1.0", "web3": "1.0"}));

        let version = registry
            .handle(&RpcRequest::new("web3_clientVersion", Value::Null, json!(1)))
            .unwrap();
        assert!(version.as_str().unwrap().starts_with("ws-rpc-server/v"));
    }
}
