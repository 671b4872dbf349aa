use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use crate::error::RuntimeError;

/// The type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Null,
    Bool,
    Int,
    Float,
    Str,
    Array,
    Hash,
    Void,
}

impl Kind {
    /// Uppercase tag, as shown in the disassembler's constants section.
    pub fn tag(self) -> &'static str {
        match self {
            Kind::Null => "NULL",
            Kind::Bool => "BOOLEAN",
            Kind::Int => "INTEGER",
            Kind::Float => "FLOAT",
            Kind::Str => "STRING",
            Kind::Array => "ARRAY",
            Kind::Hash => "HASH",
            Kind::Void => "VOID",
        }
    }
}

/// Map key derived from a hashable value: integers hash by value,
/// strings by FNV-1a over their bytes, booleans by 0/1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashKey {
    pub kind: Kind,
    pub value: u64,
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// A script value. The graph is a forest rooted at the VM stack and
/// the environment; there are no cycles.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Value>),
    /// Keys are stored alongside their values since the map is keyed
    /// by the derived [`HashKey`].
    Hash(HashMap<HashKey, (Value, Value)>),
    Void,
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Void, Value::Void) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Hash(a), Value::Hash(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, (_, av))| {
                        b.get(k).is_some_and(|(_, bv)| av == bv)
                    })
            }
            _ => false,
        }
    }
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Null => Kind::Null,
            Value::Bool(_) => Kind::Bool,
            Value::Int(_) => Kind::Int,
            Value::Float(_) => Kind::Float,
            Value::Str(_) => Kind::Str,
            Value::Array(_) => Kind::Array,
            Value::Hash(_) => Kind::Hash,
            Value::Void => Kind::Void,
        }
    }

    /// Human-readable form, used by the disassembler, `print`, and the
    /// CLI. Strings render without quotes.
    pub fn inspect(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Void => "void".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.clone(),
            Value::Array(items) => {
                let inner = items
                    .iter()
                    .map(|v| v.inspect())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("[{}]", inner)
            }
            Value::Hash(pairs) => {
                let mut rendered: Vec<String> = pairs
                    .values()
                    .map(|(k, v)| format!("{}: {}", k.inspect(), v.inspect()))
                    .collect();
                rendered.sort();
                format!("{{{}}}", rendered.join(", "))
            }
        }
    }

    /// Truthiness for use in conditions: integers and floats are true
    /// when positive, strings/arrays/hashes when non-empty.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null | Value::Void => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i > 0,
            Value::Float(f) => *f > 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Hash(pairs) => !pairs.is_empty(),
        }
    }

    /// Hashable capability. `None` for kinds that cannot key a hash.
    pub fn hash_key(&self) -> Option<HashKey> {
        match self {
            Value::Int(i) => Some(HashKey {
                kind: Kind::Int,
                value: *i as u64,
            }),
            Value::Str(s) => Some(HashKey {
                kind: Kind::Str,
                value: fnv1a(s.as_bytes()),
            }),
            Value::Bool(b) => Some(HashKey {
                kind: Kind::Bool,
                value: u64::from(*b),
            }),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub(crate) fn add(&self, other: &Value) -> Result<Value, RuntimeError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => Ok(Value::Float(a + b)),
                _ => Err(RuntimeError::type_mismatch(
                    "+",
                    self.kind().tag(),
                    other.kind().tag(),
                )),
            },
        }
    }

    pub(crate) fn sub(&self, other: &Value) -> Result<Value, RuntimeError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_sub(*b))),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => Ok(Value::Float(a - b)),
                _ => Err(RuntimeError::type_mismatch(
                    "-",
                    self.kind().tag(),
                    other.kind().tag(),
                )),
            },
        }
    }

    pub(crate) fn mul(&self, other: &Value) -> Result<Value, RuntimeError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_mul(*b))),
            (Value::Str(s), Value::Int(n)) => {
                if *n < 0 {
                    return Err(RuntimeError::new(format!(
                        "cannot repeat a string {} times",
                        n
                    )));
                }
                Ok(Value::Str(s.repeat(*n as usize)))
            }
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => Ok(Value::Float(a * b)),
                _ => Err(RuntimeError::type_mismatch(
                    "*",
                    self.kind().tag(),
                    other.kind().tag(),
                )),
            },
        }
    }

    pub(crate) fn div(&self, other: &Value) -> Result<Value, RuntimeError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => {
                if *b == 0 {
                    return Err(RuntimeError::division_by_zero());
                }
                Ok(Value::Int(a.wrapping_div(*b)))
            }
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => {
                    if b == 0.0 {
                        return Err(RuntimeError::division_by_zero());
                    }
                    Ok(Value::Float(a / b))
                }
                _ => Err(RuntimeError::type_mismatch(
                    "/",
                    self.kind().tag(),
                    other.kind().tag(),
                )),
            },
        }
    }

    pub(crate) fn modulo(&self, other: &Value) -> Result<Value, RuntimeError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => {
                if *b == 0 {
                    return Err(RuntimeError::division_by_zero());
                }
                Ok(Value::Int(a.wrapping_rem(*b)))
            }
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => {
                    if b == 0.0 {
                        return Err(RuntimeError::division_by_zero());
                    }
                    Ok(Value::Float(a % b))
                }
                _ => Err(RuntimeError::type_mismatch(
                    "%",
                    self.kind().tag(),
                    other.kind().tag(),
                )),
            },
        }
    }

    pub(crate) fn power(&self, other: &Value) -> Result<Value, RuntimeError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) if *b >= 0 => {
                Ok(Value::Int(a.wrapping_pow(*b as u32)))
            }
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => Ok(Value::Float(a.powf(b))),
                _ => Err(RuntimeError::type_mismatch(
                    "**",
                    self.kind().tag(),
                    other.kind().tag(),
                )),
            },
        }
    }

    pub(crate) fn neg(&self) -> Result<Value, RuntimeError> {
        match self {
            Value::Int(i) => Ok(Value::Int(i.wrapping_neg())),
            Value::Float(f) => Ok(Value::Float(-f)),
            _ => Err(RuntimeError::new(format!(
                "type mismatch: cannot negate {}",
                self.kind().tag()
            ))),
        }
    }

    /// Ordering for `< <= > >=`: numbers (with promotion) and strings.
    pub(crate) fn compare(&self, other: &Value) -> Result<Ordering, RuntimeError> {
        if let (Value::Int(a), Value::Int(b)) = (self, other) {
            return Ok(a.cmp(b));
        }
        if let (Value::Str(a), Value::Str(b)) = (self, other) {
            return Ok(a.cmp(b));
        }
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).ok_or_else(|| {
                RuntimeError::new("comparison is undefined for NaN")
            }),
            _ => Err(RuntimeError::type_mismatch(
                "comparison",
                self.kind().tag(),
                other.kind().tag(),
            )),
        }
    }

    /// JSON capability: convert into a `serde_json` value. Hash keys
    /// render via their `inspect` form.
    pub fn to_json(&self) -> Result<serde_json::Value, RuntimeError> {
        let out = match self {
            Value::Null | Value::Void => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or_else(|| {
                    RuntimeError::new("cannot represent a non-finite float as JSON")
                })?,
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(item.to_json()?);
                }
                serde_json::Value::Array(out)
            }
            Value::Hash(pairs) => {
                let mut map = serde_json::Map::new();
                let mut entries: Vec<&(Value, Value)> = pairs.values().collect();
                entries.sort_by_key(|(k, _)| k.inspect());
                for (k, v) in entries {
                    map.insert(k.inspect(), v.to_json()?);
                }
                serde_json::Value::Object(map)
            }
        };
        Ok(out)
    }

    /// Build a value from a JSON document. Objects become hashes with
    /// string keys, numbers become Int when integral.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                let mut pairs = HashMap::new();
                for (k, v) in map {
                    let key = Value::Str(k.clone());
                    let hk = key.hash_key().expect("string keys are hashable");
                    pairs.insert(hk, (key, Value::from_json(v)));
                }
                Value::Hash(pairs)
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inspect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_table() {
        assert!(!Value::Null.truthy());
        assert!(!Value::Void.truthy());
        assert!(Value::Bool(true).truthy());
        assert!(!Value::Bool(false).truthy());
        assert!(Value::Int(1).truthy());
        assert!(!Value::Int(0).truthy());
        assert!(!Value::Int(-3).truthy());
        assert!(Value::Float(0.5).truthy());
        assert!(!Value::Float(0.0).truthy());
        assert!(Value::Str("x".into()).truthy());
        assert!(!Value::Str(String::new()).truthy());
        assert!(Value::Array(vec![Value::Int(1)]).truthy());
        assert!(!Value::Array(vec![]).truthy());
    }

    #[test]
    fn int_and_float_compare_equal_after_promotion() {
        assert_eq!(Value::Int(3), Value::Float(3.0));
        assert_eq!(Value::Float(3.0), Value::Int(3));
        assert_ne!(Value::Int(3), Value::Str("3".into()));
    }

    #[test]
    fn hash_keys_agree_with_equality() {
        let cases = [
            (Value::Int(42), Value::Int(42)),
            (Value::Str("foo".into()), Value::Str("foo".into())),
            (Value::Bool(true), Value::Bool(true)),
        ];
        for (a, b) in &cases {
            assert_eq!(a, b);
            assert_eq!(a.hash_key().unwrap(), b.hash_key().unwrap());
        }
        assert_ne!(
            Value::Str("foo".into()).hash_key().unwrap(),
            Value::Str("bar".into()).hash_key().unwrap()
        );
        assert_ne!(
            Value::Int(1).hash_key().unwrap(),
            Value::Bool(true).hash_key().unwrap()
        );
        assert!(Value::Array(vec![]).hash_key().is_none());
    }

    #[test]
    fn arithmetic_promotes_to_float() {
        assert_eq!(
            Value::Int(1).add(&Value::Float(0.5)).unwrap(),
            Value::Float(1.5)
        );
        assert_eq!(
            Value::Int(7).div(&Value::Int(2)).unwrap(),
            Value::Int(3)
        );
    }

    #[test]
    fn string_concat_and_repeat() {
        assert_eq!(
            Value::Str("foo".into()).add(&Value::Str("bar".into())).unwrap(),
            Value::Str("foobar".into())
        );
        assert_eq!(
            Value::Str("ab".into()).mul(&Value::Int(3)).unwrap(),
            Value::Str("ababab".into())
        );
        assert!(Value::Str("ab".into()).mul(&Value::Int(-1)).is_err());
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert!(Value::Int(10).div(&Value::Int(0)).is_err());
        assert!(Value::Int(10).modulo(&Value::Int(0)).is_err());
        assert!(Value::Float(1.0).div(&Value::Int(0)).is_err());
    }

    #[test]
    fn inspect_forms() {
        assert_eq!(Value::Int(7).inspect(), "7");
        assert_eq!(Value::Str("hi".into()).inspect(), "hi");
        assert_eq!(
            Value::Array(vec![Value::Int(1), Value::Str("a".into())]).inspect(),
            "[1, a]"
        );
        assert_eq!(Value::Null.inspect(), "null");
    }

    #[test]
    fn json_round_trip() {
        let doc: serde_json::Value =
            serde_json::from_str(r#"{"name":"alice","age":30,"tags":["a","b"]}"#).unwrap();
        let value = Value::from_json(&doc);
        assert_eq!(value.to_json().unwrap(), doc);
    }
}
