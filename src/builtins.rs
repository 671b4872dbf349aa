//! The default host functions every engine starts with.
//!
//! `len`, `match`, `trim` and `print` carry the engine's original
//! semantics; the conversion helpers (`type`, `string`, `int`,
//! `float`, `upper`, `lower`) return `null` rather than failing when a
//! conversion makes no sense.

use std::sync::Arc;

use regex::Regex;

use crate::environment::Environment;
use crate::error::RuntimeError;
use crate::value::Value;

pub(crate) fn install(env: &mut Environment) {
    env.set_function("len", Arc::new(builtin_len));
    env.set_function("match", Arc::new(builtin_match));
    env.set_function("trim", Arc::new(builtin_trim));
    env.set_function("print", Arc::new(builtin_print));
    env.set_function("type", Arc::new(builtin_type));
    env.set_function("string", Arc::new(builtin_string));
    env.set_function("int", Arc::new(builtin_int));
    env.set_function("float", Arc::new(builtin_float));
    env.set_function("upper", Arc::new(builtin_upper));
    env.set_function("lower", Arc::new(builtin_lower));
}

/// Sum of the lengths of the arguments: codepoints for strings,
/// element counts for arrays and hashes.
fn builtin_len(args: &[Value]) -> Result<Value, RuntimeError> {
    let mut sum = 0i64;
    for arg in args {
        match arg {
            Value::Str(s) => sum += s.chars().count() as i64,
            Value::Array(items) => sum += items.len() as i64,
            Value::Hash(pairs) => sum += pairs.len() as i64,
            _ => {}
        }
    }
    Ok(Value::Int(sum))
}

/// `match(str, regex)`: try the pattern against each line of the
/// subject, trimmed of surrounding whitespace.
fn builtin_match(args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Ok(Value::Bool(false));
    }
    let subject = args[0].inspect();
    let pattern = args[1].inspect();
    let re = Regex::new(&pattern).map_err(|e| {
        RuntimeError::new(format!("invalid regular expression '{}': {}", pattern, e))
    })?;
    for line in subject.split('\n') {
        if re.is_match(line.trim()) {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

/// Concatenate the arguments and strip surrounding whitespace.
fn builtin_trim(args: &[Value]) -> Result<Value, RuntimeError> {
    let mut joined = String::new();
    for arg in args {
        joined.push_str(&arg.inspect());
    }
    Ok(Value::Str(joined.trim().to_string()))
}

/// Write each argument to stdout; returns 0.
fn builtin_print(args: &[Value]) -> Result<Value, RuntimeError> {
    for arg in args {
        print!("{}", arg.inspect());
    }
    Ok(Value::Int(0))
}

fn builtin_type(args: &[Value]) -> Result<Value, RuntimeError> {
    match args.first() {
        Some(arg) => Ok(Value::Str(arg.kind().tag().to_lowercase())),
        None => Ok(Value::Null),
    }
}

fn builtin_string(args: &[Value]) -> Result<Value, RuntimeError> {
    match args.first() {
        Some(arg) => Ok(Value::Str(arg.inspect())),
        None => Ok(Value::Null),
    }
}

fn builtin_int(args: &[Value]) -> Result<Value, RuntimeError> {
    let result = match args.first() {
        Some(Value::Int(i)) => Value::Int(*i),
        Some(Value::Float(f)) => Value::Int(*f as i64),
        Some(Value::Bool(b)) => Value::Int(i64::from(*b)),
        Some(Value::Str(s)) => match s.trim().parse::<i64>() {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Null,
        },
        _ => Value::Null,
    };
    Ok(result)
}

fn builtin_float(args: &[Value]) -> Result<Value, RuntimeError> {
    let result = match args.first() {
        Some(Value::Int(i)) => Value::Float(*i as f64),
        Some(Value::Float(f)) => Value::Float(*f),
        Some(Value::Str(s)) => match s.trim().parse::<f64>() {
            Ok(f) => Value::Float(f),
            Err(_) => Value::Null,
        },
        _ => Value::Null,
    };
    Ok(result)
}

fn builtin_upper(args: &[Value]) -> Result<Value, RuntimeError> {
    match args.first() {
        Some(arg) => Ok(Value::Str(arg.inspect().to_uppercase())),
        None => Ok(Value::Null),
    }
}

fn builtin_lower(args: &[Value]) -> Result<Value, RuntimeError> {
    match args.first() {
        Some(arg) => Ok(Value::Str(arg.inspect().to_lowercase())),
        None => Ok(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn len_counts_codepoints() {
        let out = builtin_len(&[Value::Str("héllo".into())]).unwrap();
        assert_eq!(out, Value::Int(5));
        let out = builtin_len(&[Value::Str("ab".into()), Value::Str("cd".into())]).unwrap();
        assert_eq!(out, Value::Int(4));
    }

    #[test]
    fn match_tries_each_trimmed_line() {
        let body = Value::Str("line one\n  fatal error here\nline three".into());
        let out = builtin_match(&[body.clone(), Value::Str("^fatal".into())]).unwrap();
        assert_eq!(out, Value::Bool(true));
        let out = builtin_match(&[body]).unwrap();
        assert_eq!(out, Value::Bool(false));
    }

    #[test]
    fn trim_concatenates_then_strips() {
        let out = builtin_trim(&[
            Value::Str("  a".into()),
            Value::Int(1),
            Value::Str("b  ".into()),
        ])
        .unwrap();
        assert_eq!(out, Value::Str("a1b".into()));
    }

    #[test]
    fn conversions_return_null_on_failure() {
        assert_eq!(
            builtin_int(&[Value::Str(" 42 ".into())]).unwrap(),
            Value::Int(42)
        );
        assert_eq!(builtin_int(&[Value::Str("nope".into())]).unwrap(), Value::Null);
        assert_eq!(
            builtin_float(&[Value::Str("2.5".into())]).unwrap(),
            Value::Float(2.5)
        );
        assert_eq!(
            builtin_type(&[Value::Int(1)]).unwrap(),
            Value::Str("integer".into())
        );
    }

    #[test]
    fn case_helpers() {
        assert_eq!(
            builtin_upper(&[Value::Str("abc".into())]).unwrap(),
            Value::Str("ABC".into())
        );
        assert_eq!(
            builtin_lower(&[Value::Str("AbC".into())]).unwrap(),
            Value::Str("abc".into())
        );
    }
}
