//! An embeddable filter/scripting engine.
//!
//! A host hands the engine a short script and a target object; the
//! engine compiles the script once and then evaluates it repeatedly
//! against different objects, answering either with a truthy/falsy
//! verdict ([`Engine::run`]) or with the value the script produced
//! ([`Engine::execute`]).
//!
//! Compilation is a four-stage pipeline: a Pratt parser builds an
//! AST, the compiler lowers it to stack-machine bytecode with a
//! constant pool, a peephole optimizer rewrites the bytecode in place
//! (constant folding, branch simplification, NOP elision with jump
//! retargeting, dead-code truncation), and a stack VM executes it.
//!
//! ```
//! use sift::Engine;
//! use std::collections::HashMap;
//!
//! let mut engine = Engine::new(r#"return len(Name) > 0;"#);
//! engine.prepare(&[]).unwrap();
//!
//! let mut event = HashMap::new();
//! event.insert("Name".to_string(), sift::Value::Str("alice".into()));
//! assert!(engine.run(&event).unwrap());
//! ```
//!
//! A prepared engine allocates all mutable VM state per invocation;
//! the bytecode, constants and regex cache are read-only after
//! `prepare`. Variables set through [`Engine::set_variable`] (or by
//! the script itself) live in the engine's environment and are shared
//! mutable state across invocations; callers that write them from
//! several threads must synchronize externally.

mod ast;
mod builtins;
mod compiler;
mod disasm;
mod environment;
mod error;
mod host;
mod lexer;
mod opcode;
mod optimizer;
mod parser;
mod trace;
mod value;
mod vm;

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;

pub use crate::environment::HostFn;
pub use crate::error::{CompileError, ParseError, RuntimeError};
pub use crate::host::HostObject;
pub use crate::opcode::Op;
pub use crate::value::{HashKey, Kind, Value};

use crate::compiler::Compiler;
use crate::environment::Environment;
use crate::trace::trace_log;
use crate::vm::Vm;

/// Options accepted by [`Engine::prepare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareFlag {
    /// Skip the peephole optimizer; the bytecode runs as compiled.
    NoOptimize,
}

/// A script plus everything needed to evaluate it: environment,
/// bytecode, constants, and the compile-time regex cache.
pub struct Engine {
    script: String,
    env: Environment,
    instructions: Vec<u8>,
    constants: Vec<Value>,
    regexes: HashMap<String, Regex>,
    /// Sorted `(offset, source line)` marks, for runtime error reports.
    lines: Vec<(usize, usize)>,
    prepared: bool,
}

impl Engine {
    /// Wrap a script. Nothing is parsed until [`Engine::prepare`].
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            env: Environment::new(),
            instructions: Vec::new(),
            constants: Vec::new(),
            regexes: HashMap::new(),
            lines: Vec::new(),
            prepared: false,
        }
    }

    /// Lex, parse, compile and (unless [`PrepareFlag::NoOptimize`] is
    /// given) optimize the script. Parse errors are accumulated and
    /// reported together. Preparing twice is idempotent.
    pub fn prepare(&mut self, flags: &[PrepareFlag]) -> Result<(), CompileError> {
        let program = parser::parse(&self.script).map_err(CompileError::Parse)?;
        let compiled = Compiler::new().compile(&program)?;
        self.instructions = compiled.instructions;
        self.constants = compiled.constants;
        self.regexes = compiled.regexes;
        self.lines = compiled.lines;
        if !flags.contains(&PrepareFlag::NoOptimize) {
            optimizer::optimize(&mut self.instructions, &mut self.lines)?;
        }
        self.prepared = true;
        trace_log!(
            "compile",
            "prepared: {} bytes, {} constants",
            self.instructions.len(),
            self.constants.len()
        );
        Ok(())
    }

    /// Evaluate the script against `obj` and return the value it
    /// produced. Each call runs on a fresh stack.
    pub fn execute(&mut self, obj: &dyn HostObject) -> Result<Value, RuntimeError> {
        if !self.prepared {
            return Err(RuntimeError::new("script has not been prepared"));
        }
        Vm::new(
            &self.instructions,
            &self.constants,
            &self.regexes,
            &self.lines,
            &mut self.env,
            obj,
        )
        .run()
    }

    /// Evaluate the script against `obj` and reduce the result to its
    /// truthiness, which is the filter verdict.
    pub fn run(&mut self, obj: &dyn HostObject) -> Result<bool, RuntimeError> {
        Ok(self.execute(obj)?.truthy())
    }

    /// Add or update a variable visible to the script.
    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.env.set(name, value);
    }

    /// Read a variable, typically one the script wrote. `Null` when
    /// unset.
    pub fn get_variable(&self, name: &str) -> Value {
        self.env.get(name).cloned().unwrap_or(Value::Null)
    }

    /// Expose a host function to the script.
    pub fn add_function<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        self.env.set_function(name, Arc::new(f));
    }

    /// Disassemble the prepared bytecode.
    pub fn dump(&self) -> Result<String, RuntimeError> {
        disasm::dump(&self.instructions, &self.constants)
    }

    /// Visit every instruction as `(offset, opcode, argument)`. The
    /// visitor returns `Ok(false)` to stop early; its error aborts the
    /// walk.
    pub fn walk_bytecode<F>(&self, mut visitor: F) -> Result<(), RuntimeError>
    where
        F: FnMut(usize, Op, Option<u16>) -> Result<bool, RuntimeError>,
    {
        for item in opcode::walk(&self.instructions) {
            let (offset, op, arg) = item?;
            if !visitor(offset, op, arg)? {
                return Ok(());
            }
        }
        Ok(())
    }

    /// The prepared instruction stream. Empty before `prepare`.
    pub fn bytecode(&self) -> &[u8] {
        &self.instructions
    }

    /// The prepared constant pool.
    pub fn constants(&self) -> &[Value] {
        &self.constants
    }
}
