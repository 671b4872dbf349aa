use std::collections::HashMap;

use regex::Regex;

use crate::ast::{AssignOp, Block, Expr, Program, Stmt};
use crate::error::CompileError;
use crate::opcode::{self, Op};
use crate::trace::trace_log;
use crate::value::Value;

/// The output of compilation: a flat instruction stream, its constant
/// pool, the regex patterns pre-compiled from literals, and a sorted
/// `(offset, source line)` table mapping bytecode back to the
/// statement it came from.
pub(crate) struct Compiled {
    pub(crate) instructions: Vec<u8>,
    pub(crate) constants: Vec<Value>,
    pub(crate) regexes: HashMap<String, Regex>,
    pub(crate) lines: Vec<(usize, usize)>,
}

pub(crate) struct Compiler {
    code: Vec<u8>,
    constants: Vec<Value>,
    regexes: HashMap<String, Regex>,
    lines: Vec<(usize, usize)>,
}

/// Largest integer literal that fits an inline `OpPush` argument.
pub(crate) const MAX_INLINE_INT: i64 = 65534;

impl Compiler {
    pub(crate) fn new() -> Self {
        Self {
            code: Vec::new(),
            constants: Vec::new(),
            regexes: HashMap::new(),
            lines: Vec::new(),
        }
    }

    pub(crate) fn compile(mut self, program: &Program) -> Result<Compiled, CompileError> {
        for stmt in &program.statements {
            self.compile_stmt(stmt)?;
        }
        trace_log!(
            "compile",
            "emitted {} bytes, {} constants",
            self.code.len(),
            self.constants.len()
        );
        Ok(Compiled {
            instructions: self.code,
            constants: self.constants,
            regexes: self.regexes,
            lines: self.lines,
        })
    }

    fn emit(&mut self, op: Op, arg: Option<u16>) -> usize {
        opcode::emit(&mut self.code, op, arg)
    }

    /// Register a constant, reusing an existing slot for structurally
    /// equal scalars. Indices are stable once handed out.
    fn add_constant(&mut self, value: Value) -> Result<u16, CompileError> {
        let trivial = matches!(
            value,
            Value::Int(_) | Value::Float(_) | Value::Str(_) | Value::Bool(_)
        );
        if trivial
            && let Some(found) = self
                .constants
                .iter()
                .position(|c| c.kind() == value.kind() && *c == value)
        {
            return Ok(found as u16);
        }
        let idx = self.constants.len();
        if idx > usize::from(u16::MAX) {
            return Err(CompileError::Internal(
                "constant pool exceeds 65536 entries".to_string(),
            ));
        }
        self.constants.push(value);
        Ok(idx as u16)
    }

    fn string_constant(&mut self, text: &str) -> Result<u16, CompileError> {
        self.add_constant(Value::Str(text.to_string()))
    }

    /// The current end of the instruction stream, as a jump target.
    fn offset_here(&self) -> Result<u16, CompileError> {
        u16::try_from(self.code.len()).map_err(|_| {
            CompileError::Internal("program exceeds the 64 KiB bytecode limit".to_string())
        })
    }

    /// Back-patch the placeholder argument of the jump emitted at `at`
    /// to point at the current end of the stream.
    fn patch_jump(&mut self, at: usize) -> Result<(), CompileError> {
        let target = self.offset_here()?;
        opcode::write_u16(&mut self.code, at + 1, target);
        Ok(())
    }

    /// Record that code emitted from here on originates at `line`.
    /// Marks always sit on instruction boundaries, so the optimizer's
    /// offset rewriting can carry them along.
    fn mark_line(&mut self, line: usize) {
        if self.lines.last().map(|&(_, l)| l) != Some(line) {
            self.lines.push((self.code.len(), line));
        }
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Expr { expr } => {
                self.mark_line(expr.token().line);
                self.compile_expr(expr)
            }
            Stmt::Return { token, value } => {
                self.mark_line(token.line);
                self.compile_expr(value)?;
                self.emit(Op::Return, None);
                Ok(())
            }
        }
    }

    fn compile_block(&mut self, block: &Block) -> Result<(), CompileError> {
        for stmt in &block.statements {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Integer { value, .. } => {
                if (0..=MAX_INLINE_INT).contains(value) {
                    self.emit(Op::Push, Some(*value as u16));
                } else {
                    let idx = self.add_constant(Value::Int(*value))?;
                    self.emit(Op::Constant, Some(idx));
                }
                Ok(())
            }
            Expr::Float { value, .. } => {
                let idx = self.add_constant(Value::Float(*value))?;
                self.emit(Op::Constant, Some(idx));
                Ok(())
            }
            Expr::Str { value, .. } => {
                let idx = self.string_constant(value)?;
                self.emit(Op::Constant, Some(idx));
                Ok(())
            }
            Expr::Bool { value, .. } => {
                self.emit(if *value { Op::True } else { Op::False }, None);
                Ok(())
            }
            Expr::Null { .. } => {
                self.emit(Op::Null, None);
                Ok(())
            }
            Expr::Ident { name, .. } => {
                let idx = self.string_constant(name)?;
                self.emit(Op::Lookup, Some(idx));
                Ok(())
            }
            Expr::Array { elements, .. } => {
                for element in elements {
                    self.compile_expr(element)?;
                }
                let n = self.count_arg(elements.len())?;
                self.emit(Op::Array, Some(n));
                Ok(())
            }
            Expr::Hash { pairs, .. } => {
                for (key, value) in pairs {
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                }
                let n = self.count_arg(pairs.len())?;
                self.emit(Op::Hash, Some(n));
                Ok(())
            }
            Expr::Prefix { op, right, .. } => match op.as_str() {
                "!" => {
                    self.compile_expr(right)?;
                    self.emit(Op::Bang, None);
                    Ok(())
                }
                "-" => {
                    self.compile_expr(right)?;
                    self.emit(Op::Minus, None);
                    Ok(())
                }
                // ++x / --x: store first, the new value is the result.
                "++" | "--" => {
                    let name = Self::ident_name(right)?;
                    self.compile_step(&name, op == "++")?;
                    let idx = self.string_constant(&name)?;
                    self.emit(Op::Lookup, Some(idx));
                    Ok(())
                }
                other => Err(CompileError::Internal(format!(
                    "unknown prefix operator '{}'",
                    other
                ))),
            },
            Expr::Postfix { op, target, .. } => {
                // x++ / x--: the old value is the result.
                let name = Self::ident_name(target)?;
                let idx = self.string_constant(&name)?;
                self.emit(Op::Lookup, Some(idx));
                self.compile_step(&name, op == "++")?;
                Ok(())
            }
            Expr::Infix {
                op, left, right, ..
            } => self.compile_infix(op, left, right),
            Expr::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                self.compile_expr(cond)?;
                let jump_else = self.emit(Op::JumpIfFalse, Some(0));
                self.compile_block(then_block)?;
                match else_block {
                    None => self.patch_jump(jump_else)?,
                    Some(else_block) => {
                        let jump_end = self.emit(Op::Jump, Some(0));
                        self.patch_jump(jump_else)?;
                        self.compile_block(else_block)?;
                        self.patch_jump(jump_end)?;
                    }
                }
                Ok(())
            }
            Expr::While { cond, body, .. } => {
                let start = self.offset_here()?;
                self.compile_expr(cond)?;
                let jump_end = self.emit(Op::JumpIfFalse, Some(0));
                self.compile_block(body)?;
                self.emit(Op::Jump, Some(start));
                self.patch_jump(jump_end)?;
                Ok(())
            }
            Expr::Foreach {
                index,
                value,
                iterable,
                body,
                ..
            } => {
                self.compile_expr(iterable)?;
                let nvars: u16 = if index.is_some() { 2 } else { 1 };
                self.emit(Op::Iter, Some(nvars));
                let start = self.offset_here()?;
                self.emit(Op::Next, None);
                let jump_end = self.emit(Op::JumpIfFalse, Some(0));
                let value_idx = self.string_constant(value)?;
                self.emit(Op::Set, Some(value_idx));
                if let Some(index) = index {
                    let index_idx = self.string_constant(index)?;
                    self.emit(Op::Set, Some(index_idx));
                }
                self.compile_block(body)?;
                self.emit(Op::Jump, Some(start));
                self.patch_jump(jump_end)?;
                Ok(())
            }
            Expr::Assign {
                target, op, value, ..
            } => {
                match op {
                    AssignOp::Assign => self.compile_expr(value)?,
                    compound => {
                        // Compound assignment desugars to load-op-store.
                        let idx = self.string_constant(target)?;
                        self.emit(Op::Lookup, Some(idx));
                        self.compile_expr(value)?;
                        let op = match compound {
                            AssignOp::AddAssign => Op::Add,
                            AssignOp::SubAssign => Op::Sub,
                            AssignOp::MulAssign => Op::Mul,
                            _ => Op::Div,
                        };
                        self.emit(op, None);
                    }
                }
                let idx = self.string_constant(target)?;
                self.emit(Op::Set, Some(idx));
                Ok(())
            }
            Expr::Index {
                container, index, ..
            } => {
                self.compile_expr(container)?;
                self.compile_expr(index)?;
                self.emit(Op::Index, None);
                Ok(())
            }
            Expr::Call { callee, args, .. } => {
                let name = match callee.as_ref() {
                    Expr::Ident { name, .. } => name.clone(),
                    other => {
                        return Err(CompileError::Internal(format!(
                            "only named functions can be called, not '{}'",
                            other
                        )));
                    }
                };
                for arg in args {
                    self.compile_expr(arg)?;
                }
                let idx = self.string_constant(&name)?;
                self.emit(Op::Constant, Some(idx));
                let n = self.count_arg(args.len())?;
                self.emit(Op::Call, Some(n));
                Ok(())
            }
        }
    }

    fn compile_infix(&mut self, op: &str, left: &Expr, right: &Expr) -> Result<(), CompileError> {
        // Short-circuit forms lower to conditional jumps so the right
        // operand's side effects are skipped when the left decides.
        if op == "&&" {
            self.compile_expr(left)?;
            let jump_false_a = self.emit(Op::JumpIfFalse, Some(0));
            self.compile_expr(right)?;
            let jump_false_b = self.emit(Op::JumpIfFalse, Some(0));
            self.emit(Op::True, None);
            let jump_end = self.emit(Op::Jump, Some(0));
            self.patch_jump(jump_false_a)?;
            self.patch_jump(jump_false_b)?;
            self.emit(Op::False, None);
            self.patch_jump(jump_end)?;
            return Ok(());
        }
        if op == "||" {
            self.compile_expr(left)?;
            let jump_rhs = self.emit(Op::JumpIfFalse, Some(0));
            self.emit(Op::True, None);
            let jump_end_a = self.emit(Op::Jump, Some(0));
            self.patch_jump(jump_rhs)?;
            self.compile_expr(right)?;
            let jump_false = self.emit(Op::JumpIfFalse, Some(0));
            self.emit(Op::True, None);
            let jump_end_b = self.emit(Op::Jump, Some(0));
            self.patch_jump(jump_false)?;
            self.emit(Op::False, None);
            self.patch_jump(jump_end_a)?;
            self.patch_jump(jump_end_b)?;
            return Ok(());
        }
        if (op == "~=" || op == "!~")
            && let Expr::Str { value: pattern, .. } = right
            && let Ok(re) = Regex::new(pattern)
        {
            // Cache the compiled literal for the VM; an invalid
            // pattern is reported when the match runs.
            self.regexes.insert(pattern.clone(), re);
        }
        self.compile_expr(left)?;
        self.compile_expr(right)?;
        let opcode = match op {
            "+" => Op::Add,
            "-" => Op::Sub,
            "*" => Op::Mul,
            "/" => Op::Div,
            "%" => Op::Mod,
            "**" => Op::Power,
            "==" => Op::Equal,
            "!=" => Op::NotEqual,
            "<" => Op::Less,
            "<=" => Op::LessEq,
            ">" => Op::Greater,
            ">=" => Op::GreaterEq,
            "~=" => Op::Matches,
            "!~" => Op::NotMatches,
            other => {
                return Err(CompileError::Internal(format!(
                    "unknown infix operator '{}'",
                    other
                )));
            }
        };
        self.emit(opcode, None);
        Ok(())
    }

    /// Emit `name = name ± 1`.
    fn compile_step(&mut self, name: &str, increment: bool) -> Result<(), CompileError> {
        let idx = self.string_constant(name)?;
        self.emit(Op::Lookup, Some(idx));
        self.emit(Op::Push, Some(1));
        self.emit(if increment { Op::Add } else { Op::Sub }, None);
        let idx = self.string_constant(name)?;
        self.emit(Op::Set, Some(idx));
        Ok(())
    }

    fn ident_name(expr: &Expr) -> Result<String, CompileError> {
        match expr {
            Expr::Ident { name, .. } => Ok(name.clone()),
            other => Err(CompileError::Internal(format!(
                "increment target must be a variable, not '{}'",
                other
            ))),
        }
    }

    fn count_arg(&self, n: usize) -> Result<u16, CompileError> {
        u16::try_from(n)
            .map_err(|_| CompileError::Internal(format!("{} operands exceed the u16 limit", n)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn compile_source(src: &str) -> Compiled {
        let program = parse(src).expect("parse");
        Compiler::new().compile(&program).expect("compile")
    }

    fn decoded(compiled: &Compiled) -> Vec<(usize, Op, Option<u16>)> {
        opcode::walk(&compiled.instructions)
            .collect::<Result<_, _>>()
            .expect("decode")
    }

    #[test]
    fn small_integers_are_inline_pushes() {
        let compiled = compile_source("return 7;");
        let ops = decoded(&compiled);
        assert_eq!(
            ops,
            vec![(0, Op::Push, Some(7)), (3, Op::Return, None)]
        );
        assert!(compiled.constants.is_empty());
    }

    #[test]
    fn large_and_negative_integers_use_the_constant_pool() {
        let compiled = compile_source("return 65535;");
        let ops = decoded(&compiled);
        assert_eq!(ops[0], (0, Op::Constant, Some(0)));
        assert_eq!(compiled.constants[0], Value::Int(65535));

        let compiled = compile_source("return -5;");
        let ops = decoded(&compiled);
        assert_eq!(ops[0].1, Op::Push);
        assert_eq!(ops[1].1, Op::Minus);
    }

    #[test]
    fn boundary_push_value() {
        let compiled = compile_source("return 65534;");
        assert_eq!(decoded(&compiled)[0], (0, Op::Push, Some(65534)));
        assert!(compiled.constants.is_empty());
    }

    #[test]
    fn constants_are_deduplicated() {
        let compiled = compile_source(r#"a = "x"; b = "x";"#);
        let strings = compiled
            .constants
            .iter()
            .filter(|c| **c == Value::Str("x".into()))
            .count();
        assert_eq!(strings, 1);
    }

    #[test]
    fn short_circuit_and_lowers_to_jumps() {
        let compiled = compile_source("a && b;");
        let ops: Vec<Op> = decoded(&compiled).into_iter().map(|(_, op, _)| op).collect();
        assert_eq!(
            ops,
            vec![
                Op::Lookup,
                Op::JumpIfFalse,
                Op::Lookup,
                Op::JumpIfFalse,
                Op::True,
                Op::Jump,
                Op::False,
            ]
        );
        assert!(!ops.contains(&Op::And));
    }

    #[test]
    fn if_else_backpatches_both_jumps() {
        let compiled = compile_source("if (a) { 1; } else { 2; }");
        let ops = decoded(&compiled);
        // Lookup, JumpIfFalse → else, Push 1, Jump → end, Push 2.
        assert_eq!(ops[1].1, Op::JumpIfFalse);
        let else_target = ops[1].2.unwrap() as usize;
        assert_eq!(else_target, ops[4].0, "else branch lands after the jump");
        assert_eq!(ops[3].1, Op::Jump);
        assert_eq!(
            ops[3].2.unwrap() as usize,
            compiled.instructions.len(),
            "end label is the end of the stream"
        );
    }

    #[test]
    fn foreach_lowers_to_iter_next_loop() {
        let compiled = compile_source("foreach k, v in h { k; }");
        let ops: Vec<Op> = decoded(&compiled).into_iter().map(|(_, op, _)| op).collect();
        assert_eq!(
            ops,
            vec![
                Op::Lookup,
                Op::Iter,
                Op::Next,
                Op::JumpIfFalse,
                Op::Set,
                Op::Set,
                Op::Lookup,
                Op::Jump,
            ]
        );
        let pairs = decoded(&compiled);
        assert_eq!(pairs[1].2, Some(2), "two loop variables");
        // The back-edge returns to OpNext.
        assert_eq!(pairs[7].2.unwrap() as usize, pairs[2].0);
    }

    #[test]
    fn line_table_marks_each_statement() {
        let compiled = compile_source("a = 1;\nreturn a;");
        // `a = 1` is Push + Set; `return a` starts at offset 6.
        assert_eq!(compiled.lines, vec![(0, 1), (6, 2)]);
    }

    #[test]
    fn line_table_covers_loop_bodies() {
        let compiled = compile_source("foreach v in [1] {\n  a += v;\n}");
        assert!(compiled.lines.contains(&(0, 1)));
        assert!(compiled.lines.iter().any(|&(_, line)| line == 2));
    }

    #[test]
    fn regex_literal_operands_are_precompiled() {
        let compiled = compile_source("Body ~= /err.*/;");
        assert!(compiled.regexes.contains_key("err.*"));
    }

    #[test]
    fn call_pushes_name_then_arity() {
        let compiled = compile_source("len(Name);");
        let ops = decoded(&compiled);
        assert_eq!(ops[0].1, Op::Lookup);
        assert_eq!(ops[1].1, Op::Constant);
        assert_eq!(ops[2], (6, Op::Call, Some(1)));
        assert_eq!(compiled.constants[ops[1].2.unwrap() as usize], Value::Str("len".into()));
    }
}
