use std::collections::HashMap;

use regex::Regex;

use crate::environment::Environment;
use crate::error::RuntimeError;
use crate::host::HostObject;
use crate::opcode::{self, Op};
use crate::trace::trace_log;
use crate::value::Value;

/// Externalized iteration state, owned by the VM rather than the value
/// being iterated, so the same value can be iterated from several
/// invocations at once.
enum IterState {
    Str { chars: Vec<char>, pos: usize },
    Array { items: Vec<Value>, pos: usize },
    Hash { pairs: Vec<(Value, Value)>, pos: usize },
}

impl IterState {
    fn new(value: Value) -> Option<Self> {
        match value {
            Value::Str(s) => Some(IterState::Str {
                chars: s.chars().collect(),
                pos: 0,
            }),
            Value::Array(items) => Some(IterState::Array { items, pos: 0 }),
            Value::Hash(map) => {
                let mut pairs: Vec<(Value, Value)> = map.into_values().collect();
                pairs.sort_by_key(|(k, _)| k.inspect());
                Some(IterState::Hash { pairs, pos: 0 })
            }
            _ => None,
        }
    }

    /// The next `(value, index-or-key)` pair, or `None` when done.
    fn next(&mut self) -> Option<(Value, Value)> {
        match self {
            IterState::Str { chars, pos } => {
                let ch = chars.get(*pos)?;
                let item = (Value::Str(ch.to_string()), Value::Int(*pos as i64));
                *pos += 1;
                Some(item)
            }
            IterState::Array { items, pos } => {
                let item = items.get(*pos)?;
                let out = (item.clone(), Value::Int(*pos as i64));
                *pos += 1;
                Some(out)
            }
            IterState::Hash { pairs, pos } => {
                let (k, v) = pairs.get(*pos)?;
                let out = (v.clone(), k.clone());
                *pos += 1;
                Some(out)
            }
        }
    }
}

struct IterRecord {
    state: IterState,
    nvars: u16,
}

/// One invocation's worth of machine state. The bytecode, constants,
/// line table and compile-time regex cache are borrowed read-only; the
/// stack and iterator records live and die with the call.
pub(crate) struct Vm<'a> {
    code: &'a [u8],
    constants: &'a [Value],
    regexes: &'a HashMap<String, Regex>,
    lines: &'a [(usize, usize)],
    env: &'a mut Environment,
    host: &'a dyn HostObject,
    stack: Vec<Value>,
    iters: Vec<IterRecord>,
    /// Patterns assembled at runtime, compiled on first use.
    dynamic_regexes: HashMap<String, Regex>,
}

impl<'a> Vm<'a> {
    pub(crate) fn new(
        code: &'a [u8],
        constants: &'a [Value],
        regexes: &'a HashMap<String, Regex>,
        lines: &'a [(usize, usize)],
        env: &'a mut Environment,
        host: &'a dyn HostObject,
    ) -> Self {
        Self {
            code,
            constants,
            regexes,
            lines,
            env,
            host,
            stack: Vec::new(),
            iters: Vec::new(),
            dynamic_regexes: HashMap::new(),
        }
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::new("pop from an empty stack"))
    }

    fn constant(&self, idx: u16) -> Result<&Value, RuntimeError> {
        self.constants.get(usize::from(idx)).ok_or_else(|| {
            RuntimeError::new(format!("constant index {} out of range", idx))
        })
    }

    fn constant_str(&self, idx: u16) -> Result<String, RuntimeError> {
        match self.constant(idx)? {
            Value::Str(s) => Ok(s.clone()),
            other => Err(RuntimeError::new(format!(
                "malformed program: expected a string constant, found {}",
                other.kind().tag()
            ))),
        }
    }

    /// The source line owning the instruction at `offset`, from the
    /// compiler's statement table.
    fn line_at(&self, offset: usize) -> Option<usize> {
        match self.lines.binary_search_by(|&(at, _)| at.cmp(&offset)) {
            Ok(found) => Some(self.lines[found].1),
            Err(0) => None,
            Err(after) => Some(self.lines[after - 1].1),
        }
    }

    fn matches(&mut self, target: &Value, pattern: &Value) -> Result<bool, RuntimeError> {
        let pattern = pattern.inspect();
        let subject = target.inspect();
        if let Some(re) = self.regexes.get(&pattern) {
            return Ok(re.is_match(&subject));
        }
        if !self.dynamic_regexes.contains_key(&pattern) {
            let re = Regex::new(&pattern).map_err(|e| {
                RuntimeError::new(format!(
                    "invalid regular expression '{}': {}",
                    pattern, e
                ))
            })?;
            self.dynamic_regexes.insert(pattern.clone(), re);
        }
        Ok(self.dynamic_regexes[&pattern].is_match(&subject))
    }

    fn index(&self, container: Value, index: Value) -> Result<Value, RuntimeError> {
        match (&container, &index) {
            (Value::Array(items), Value::Int(i)) => {
                let at = usize::try_from(*i).ok().filter(|at| *at < items.len());
                match at {
                    Some(at) => Ok(items[at].clone()),
                    None => Err(RuntimeError::new(format!(
                        "index {} out of range for array of {} element(s)",
                        i,
                        items.len()
                    ))),
                }
            }
            (Value::Str(s), Value::Int(i)) => {
                let at = usize::try_from(*i).ok();
                match at.and_then(|at| s.chars().nth(at)) {
                    Some(ch) => Ok(Value::Str(ch.to_string())),
                    None => Err(RuntimeError::new(format!(
                        "index {} out of range for string of {} character(s)",
                        i,
                        s.chars().count()
                    ))),
                }
            }
            (Value::Hash(pairs), key) => {
                let hk = key.hash_key().ok_or_else(|| {
                    RuntimeError::new(format!("unusable as hash key: {}", key.kind().tag()))
                })?;
                Ok(pairs.get(&hk).map(|(_, v)| v.clone()).unwrap_or(Value::Null))
            }
            _ => Err(RuntimeError::type_mismatch(
                "index",
                container.kind().tag(),
                index.kind().tag(),
            )),
        }
    }

    pub(crate) fn run(mut self) -> Result<Value, RuntimeError> {
        trace_log!("vm", "run: {} bytes of bytecode", self.code.len());
        let mut ip = 0usize;
        while ip < self.code.len() {
            let offset = ip;
            match self.step(&mut ip) {
                Ok(None) => {}
                Ok(Some(result)) => {
                    trace_log!("vm", "halt: return {}", result.inspect());
                    return Ok(result);
                }
                Err(mut err) => {
                    if err.line.is_none() {
                        err.line = self.line_at(offset);
                    }
                    return Err(err);
                }
            }
        }
        // Ran off the end: the last expression statement's value is
        // the implicit result; an empty program yields Void.
        let result = self.stack.pop().unwrap_or(Value::Void);
        trace_log!("vm", "halt: end of code, result {}", result.inspect());
        Ok(result)
    }

    /// Execute the instruction at `*ip`, leaving `*ip` at the next
    /// instruction (or at a jump target). `Some` carries the script's
    /// result when the instruction halted the program.
    fn step(&mut self, ip: &mut usize) -> Result<Option<Value>, RuntimeError> {
        let offset = *ip;
        let byte = self.code[offset];
        let op = Op::from_byte(byte).ok_or_else(|| {
            RuntimeError::new(format!("unknown opcode 0x{:02x} at offset {}", byte, offset))
        })?;
        *ip += op.length();
        let arg = if op.has_arg() {
            Some(opcode::read_u16(self.code, offset + 1).ok_or_else(|| {
                RuntimeError::new(format!("truncated instruction at offset {}", offset))
            })?)
        } else {
            None
        };
        match op {
            Op::Constant => {
                let idx = arg.unwrap_or_default();
                let value = self.constant(idx)?.clone();
                self.push(value);
            }
            Op::Push => {
                self.push(Value::Int(i64::from(arg.unwrap_or_default())));
            }
            Op::True => self.push(Value::Bool(true)),
            Op::False => self.push(Value::Bool(false)),
            Op::Null => self.push(Value::Null),
            Op::Void => self.push(Value::Void),

            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod | Op::Power => {
                let right = self.pop()?;
                let left = self.pop()?;
                let result = match op {
                    Op::Add => left.add(&right),
                    Op::Sub => left.sub(&right),
                    Op::Mul => left.mul(&right),
                    Op::Div => left.div(&right),
                    Op::Mod => left.modulo(&right),
                    _ => left.power(&right),
                }?;
                self.push(result);
            }

            Op::Equal | Op::NotEqual => {
                let right = self.pop()?;
                let left = self.pop()?;
                let equal = left == right;
                self.push(Value::Bool(if op == Op::Equal { equal } else { !equal }));
            }
            Op::Less | Op::LessEq | Op::Greater | Op::GreaterEq => {
                let right = self.pop()?;
                let left = self.pop()?;
                let ordering = left.compare(&right)?;
                let outcome = match op {
                    Op::Less => ordering.is_lt(),
                    Op::LessEq => ordering.is_le(),
                    Op::Greater => ordering.is_gt(),
                    _ => ordering.is_ge(),
                };
                self.push(Value::Bool(outcome));
            }

            Op::And | Op::Or => {
                let right = self.pop()?;
                let left = self.pop()?;
                let outcome = if op == Op::And {
                    left.truthy() && right.truthy()
                } else {
                    left.truthy() || right.truthy()
                };
                self.push(Value::Bool(outcome));
            }
            Op::Bang => {
                let value = self.pop()?;
                self.push(Value::Bool(!value.truthy()));
            }
            Op::Minus => {
                let value = self.pop()?;
                self.push(value.neg()?);
            }

            Op::Matches | Op::NotMatches => {
                let pattern = self.pop()?;
                let target = self.pop()?;
                let matched = self.matches(&target, &pattern)?;
                self.push(Value::Bool(if op == Op::Matches {
                    matched
                } else {
                    !matched
                }));
            }

            Op::Lookup => {
                let name = self.constant_str(arg.unwrap_or_default())?;
                let value = match self.env.get(&name) {
                    Some(value) => value.clone(),
                    None => self.host.get_field(&name).unwrap_or(Value::Null),
                };
                self.push(value);
            }
            Op::Set => {
                let name = self.constant_str(arg.unwrap_or_default())?;
                let value = self.pop()?;
                self.env.set(name, value);
            }
            Op::Call => {
                let name = match self.pop()? {
                    Value::Str(name) => name,
                    other => {
                        return Err(RuntimeError::new(format!(
                            "malformed program: callee is {}, not a name",
                            other.kind().tag()
                        )));
                    }
                };
                let argc = usize::from(arg.unwrap_or_default());
                let mut args = Vec::with_capacity(argc);
                for _ in 0..argc {
                    args.push(self.pop()?);
                }
                args.reverse();
                let func = self.env.function(&name).ok_or_else(|| {
                    RuntimeError::new(format!("unknown function '{}'", name))
                })?;
                let result = func(&args)?;
                self.push(result);
            }

            Op::Array => {
                let n = usize::from(arg.unwrap_or_default());
                let mut items = Vec::with_capacity(n);
                for _ in 0..n {
                    items.push(self.pop()?);
                }
                items.reverse();
                self.push(Value::Array(items));
            }
            Op::Hash => {
                let n = usize::from(arg.unwrap_or_default());
                let mut pairs = HashMap::with_capacity(n);
                for _ in 0..n {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    let hk = key.hash_key().ok_or_else(|| {
                        RuntimeError::new(format!(
                            "unusable as hash key: {}",
                            key.kind().tag()
                        ))
                    })?;
                    pairs.insert(hk, (key, value));
                }
                self.push(Value::Hash(pairs));
            }
            Op::Index => {
                let index = self.pop()?;
                let container = self.pop()?;
                let value = self.index(container, index)?;
                self.push(value);
            }

            Op::Iter => {
                let iterable = self.pop()?;
                let kind = iterable.kind();
                let state = IterState::new(iterable).ok_or_else(|| {
                    RuntimeError::new(format!("{} is not iterable", kind.tag()))
                })?;
                self.iters.push(IterRecord {
                    state,
                    nvars: arg.unwrap_or(1),
                });
            }
            Op::Next => {
                let record = self.iters.last_mut().ok_or_else(|| {
                    RuntimeError::new("malformed program: no active iteration")
                })?;
                let nvars = record.nvars;
                match record.state.next() {
                    Some((value, key)) => {
                        if nvars == 2 {
                            self.push(key);
                        }
                        self.push(value);
                        self.push(Value::Bool(true));
                    }
                    None => {
                        self.iters.pop();
                        self.push(Value::Bool(false));
                    }
                }
            }

            Op::Jump => {
                *ip = usize::from(arg.unwrap_or_default());
            }
            Op::JumpIfFalse => {
                let cond = self.pop()?;
                if !cond.truthy() {
                    *ip = usize::from(arg.unwrap_or_default());
                }
            }

            Op::Return => {
                let result = self.pop().map_err(|_| {
                    RuntimeError::new("return with nothing on the stack")
                })?;
                return Ok(Some(result));
            }
            Op::Nop => {}
        }
        Ok(None)
    }
}
