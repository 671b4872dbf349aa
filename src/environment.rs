use std::collections::HashMap;
use std::sync::Arc;

use crate::builtins;
use crate::error::RuntimeError;
use crate::value::Value;

/// A host-registered function. Failures propagate as evaluation errors.
pub type HostFn = Arc<dyn Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync>;

/// Per-engine store of script-visible variables and host functions.
///
/// Variables are shared mutable state across invocations of the same
/// engine; concurrent writers must synchronize externally.
pub struct Environment {
    variables: HashMap<String, Value>,
    functions: HashMap<String, HostFn>,
}

impl Environment {
    /// A fresh environment with the default builtins installed.
    pub(crate) fn new() -> Self {
        let mut env = Self {
            variables: HashMap::new(),
            functions: HashMap::new(),
        };
        builtins::install(&mut env);
        env
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub(crate) fn set(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub(crate) fn function(&self, name: &str) -> Option<HostFn> {
        self.functions.get(name).cloned()
    }

    pub(crate) fn set_function(&mut self, name: impl Into<String>, f: HostFn) {
        self.functions.insert(name.into(), f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_installed_by_default() {
        let env = Environment::new();
        for name in ["len", "match", "trim", "print", "type", "string", "int", "float", "upper", "lower"] {
            assert!(env.function(name).is_some(), "missing builtin {}", name);
        }
    }

    #[test]
    fn variables_overwrite() {
        let mut env = Environment::new();
        env.set("x", Value::Int(1));
        env.set("x", Value::Int(2));
        assert_eq!(env.get("x"), Some(&Value::Int(2)));
    }
}
