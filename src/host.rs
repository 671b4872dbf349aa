use std::collections::HashMap;

use crate::value::Value;

/// The per-invocation object a script filters. The engine resolves
/// identifier lookups that miss the variable map through this trait;
/// `None` means the object has no such field (the script sees `null`).
///
/// Hosts typically map a record's scalar fields into [`Value`]
/// variants; nested records become hashes. `Value::from_json` builds a
/// ready-made host object from a JSON document.
pub trait HostObject {
    fn get_field(&self, name: &str) -> Option<Value>;
}

/// The fieldless object, for scripts that only use variables.
impl HostObject for () {
    fn get_field(&self, _name: &str) -> Option<Value> {
        None
    }
}

impl HostObject for HashMap<String, Value> {
    fn get_field(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

/// A hash value doubles as a host object; other variants are fieldless.
impl HostObject for Value {
    fn get_field(&self, name: &str) -> Option<Value> {
        match self {
            Value::Hash(pairs) => {
                let key = Value::Str(name.to_string()).hash_key()?;
                pairs.get(&key).map(|(_, v)| v.clone())
            }
            _ => None,
        }
    }
}
