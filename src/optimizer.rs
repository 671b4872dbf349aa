//! Peephole optimization over compiled bytecode.
//!
//! Passes rewrite instruction bytes with `OpNop` padding rather than
//! shortening the buffer, so every offset stays valid until the
//! elision pass compacts the stream and retargets jumps. Run order:
//! constant folding and jump simplification to their own fixed points,
//! then NOP elision, then dead-code truncation, all repeated until a
//! full sweep changes nothing.

use std::collections::HashMap;

use crate::compiler::MAX_INLINE_INT;
use crate::error::CompileError;
use crate::opcode::{self, Op};
use crate::trace::trace_log;

/// Upper bound on full sweeps. The passes converge on any program the
/// compiler emits; the cap turns a convergence bug into a best-effort
/// result instead of a hang.
const MAX_SWEEPS: usize = 1024;

/// Optimize `code` in place. The compiler's `(offset, source line)`
/// table moves with the rewritten offsets so runtime errors keep
/// pointing at the right statement.
pub(crate) fn optimize(
    code: &mut Vec<u8>,
    lines: &mut Vec<(usize, usize)>,
) -> Result<(), CompileError> {
    for sweep in 0..MAX_SWEEPS {
        let before = code.clone();
        while fold_constants(code)? {}
        while simplify_jumps(code)? {}
        elide_nops(code, lines)?;
        truncate_dead_code(code, lines)?;
        if *code == before {
            trace_log!("optimize", "fixed point after {} sweep(s)", sweep + 1);
            break;
        }
    }
    Ok(())
}

fn decode(code: &[u8]) -> Result<Vec<(usize, Op, Option<u16>)>, CompileError> {
    opcode::walk(code)
        .collect::<Result<_, _>>()
        .map_err(CompileError::from)
}

fn fill_nops(code: &mut [u8], range: std::ops::Range<usize>) {
    for byte in &mut code[range] {
        *byte = Op::Nop as u8;
    }
}

/// Collapse arithmetic and comparisons over adjacent inline pushes.
///
/// `OpPush 2; OpPush 3; OpMul` becomes `OpPush 6` followed by four
/// NOP bytes. Makes at most one change per call; returns whether one
/// was made.
fn fold_constants(code: &mut Vec<u8>) -> Result<bool, CompileError> {
    // Adjacent constant pushes: (offset, value). Constants propagate
    // only across OpNop and other pushes.
    let mut window: Vec<(usize, u16)> = Vec::new();
    for (offset, op, arg) in decode(code)? {
        match op {
            Op::Push => {
                let arg = arg.expect("OpPush carries an argument");
                window.push((offset, arg));
            }
            // Leftovers of an earlier rewrite; invisible to the window.
            Op::Nop => {}
            Op::Equal | Op::NotEqual => {
                if window.len() >= 2 {
                    let (a_off, a) = window[window.len() - 1];
                    let (b_off, b) = window[window.len() - 2];
                    fill_nops(code, a_off..a_off + 3);
                    fill_nops(code, b_off..b_off + 3);
                    let outcome = if op == Op::Equal { a == b } else { a != b };
                    code[offset] = if outcome { Op::True as u8 } else { Op::False as u8 };
                    return Ok(true);
                }
                window.clear();
            }
            Op::Add | Op::Sub | Op::Mul | Op::Div => {
                if window.len() >= 2 {
                    let (a_off, a) = window[window.len() - 1];
                    let (b_off, b) = window[window.len() - 2];
                    let (first, second) = (i64::from(b), i64::from(a));
                    let result = match op {
                        Op::Add => first + second,
                        Op::Sub => first - second,
                        Op::Mul => first * second,
                        _ => {
                            if second == 0 {
                                return Err(CompileError::DivisionByZero);
                            }
                            first / second
                        }
                    };
                    if (0..=MAX_INLINE_INT).contains(&result) {
                        // The first push keeps the folded result; the
                        // second push and the operator become NOPs.
                        opcode::write_u16(code, b_off + 1, result as u16);
                        fill_nops(code, a_off..a_off + 3);
                        code[offset] = Op::Nop as u8;
                        return Ok(true);
                    }
                    // Out of inline range; leave the expression alone.
                }
                window.clear();
            }
            _ => {
                window.clear();
            }
        }
    }
    Ok(false)
}

/// Remove branches whose condition is a literal.
///
/// `OpTrue; OpJumpIfFalse` never jumps: both become NOPs. `OpFalse;
/// OpJumpIfFalse T` always jumps: everything from the `OpFalse` up to
/// `T` is unreachable and becomes NOPs.
fn simplify_jumps(code: &mut Vec<u8>) -> Result<bool, CompileError> {
    let mut prev = Op::Nop;
    for (offset, op, arg) in decode(code)? {
        if op == Op::JumpIfFalse {
            if prev == Op::True {
                fill_nops(code, offset - 1..offset + 3);
                return Ok(true);
            }
            if prev == Op::False {
                let target = usize::from(arg.expect("OpJumpIfFalse carries an argument"));
                // Conditional jumps the compiler emits are forward;
                // anything else is left for the generic passes.
                if target > offset {
                    let end = target.min(code.len());
                    fill_nops(code, offset - 1..end);
                    return Ok(true);
                }
            }
        }
        prev = op;
    }
    Ok(false)
}

/// Rebuild the stream without NOPs and retarget every jump through an
/// old-offset → new-offset map. The map carries an entry for *every*
/// old offset (eliminated NOPs included, so a jump aimed at a NOP
/// lands on the next live instruction) plus the end-of-code offset.
/// A jump argument missing from the map aborts the pass untouched.
fn elide_nops(
    code: &mut Vec<u8>,
    lines: &mut Vec<(usize, usize)>,
) -> Result<(), CompileError> {
    let mut tmp: Vec<u8> = Vec::with_capacity(code.len());
    let mut rewrite: HashMap<usize, usize> = HashMap::new();
    for (offset, op, arg) in decode(code)? {
        rewrite.insert(offset, tmp.len());
        if op != Op::Nop {
            opcode::emit(&mut tmp, op, arg);
        }
    }
    rewrite.insert(code.len(), tmp.len());

    if tmp.len() == code.len() {
        return Ok(());
    }

    for (offset, op, arg) in decode(&tmp.clone())? {
        if matches!(op, Op::Jump | Op::JumpIfFalse) {
            let old = usize::from(arg.expect("jumps carry an argument"));
            let Some(&new) = rewrite.get(&old) else {
                // A target off every instruction boundary would be a
                // bug upstream; keep the stream as it was.
                return Ok(());
            };
            let new = u16::try_from(new).map_err(|_| {
                CompileError::Internal("retargeted jump exceeds the u16 range".to_string())
            })?;
            opcode::write_u16(&mut tmp, offset + 1, new);
        }
    }

    // Line marks sit on instruction boundaries, so the same map moves
    // them. Marks whose code was entirely elided collapse onto the
    // next live instruction; that instruction's own mark wins.
    let mut remapped: Vec<(usize, usize)> = lines
        .iter()
        .filter_map(|&(offset, line)| rewrite.get(&offset).map(|&new| (new, line)))
        .collect();
    remapped.dedup_by(|entry, kept| {
        if entry.0 == kept.0 {
            kept.1 = entry.1;
            true
        } else {
            false
        }
    });
    *lines = remapped;

    trace_log!("optimize", "elided {} NOP bytes", code.len() - tmp.len());
    *code = tmp;
    Ok(())
}

/// Truncate everything after the first `OpReturn`, but only for
/// straight-line programs: any jump before it, forward or backward,
/// aborts the pass.
fn truncate_dead_code(
    code: &mut Vec<u8>,
    lines: &mut Vec<(usize, usize)>,
) -> Result<(), CompileError> {
    let mut tmp: Vec<u8> = Vec::with_capacity(code.len());
    for (_, op, arg) in decode(code)? {
        match op {
            Op::Jump | Op::JumpIfFalse => return Ok(()),
            Op::Return => {
                opcode::emit(&mut tmp, Op::Return, None);
                *code = tmp;
                lines.retain(|&(offset, _)| offset < code.len());
                return Ok(());
            }
            _ => {
                opcode::emit(&mut tmp, op, arg);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::parser::parse;

    fn compile_bytes(src: &str) -> Vec<u8> {
        let program = parse(src).expect("parse");
        Compiler::new()
            .compile(&program)
            .expect("compile")
            .instructions
    }

    fn ops_of(code: &[u8]) -> Vec<(usize, Op, Option<u16>)> {
        opcode::walk(code).collect::<Result<_, _>>().expect("decode")
    }

    #[test]
    fn folds_arithmetic_to_a_single_push() {
        let mut code = compile_bytes("return 1 + 2 * 3;");
        optimize(&mut code, &mut Vec::new()).unwrap();
        assert_eq!(
            ops_of(&code),
            vec![(0, Op::Push, Some(7)), (3, Op::Return, None)]
        );
    }

    #[test]
    fn folds_subtraction_and_division_operand_order() {
        let mut code = compile_bytes("return 10 - 4;");
        optimize(&mut code, &mut Vec::new()).unwrap();
        assert_eq!(ops_of(&code)[0], (0, Op::Push, Some(6)));

        let mut code = compile_bytes("return 10 / 2;");
        optimize(&mut code, &mut Vec::new()).unwrap();
        assert_eq!(ops_of(&code)[0], (0, Op::Push, Some(5)));
    }

    #[test]
    fn division_by_zero_is_a_compile_error() {
        let mut code = compile_bytes("return 10 / 0;");
        assert_eq!(optimize(&mut code, &mut Vec::new()), Err(CompileError::DivisionByZero));
    }

    #[test]
    fn negative_and_oversized_results_are_left_alone() {
        let mut code = compile_bytes("return 1 - 2;");
        optimize(&mut code, &mut Vec::new()).unwrap();
        let ops: Vec<Op> = ops_of(&code).into_iter().map(|(_, op, _)| op).collect();
        assert_eq!(ops, vec![Op::Push, Op::Push, Op::Sub, Op::Return]);

        let mut code = compile_bytes("return 60000 + 60000;");
        optimize(&mut code, &mut Vec::new()).unwrap();
        let ops: Vec<Op> = ops_of(&code).into_iter().map(|(_, op, _)| op).collect();
        assert_eq!(ops, vec![Op::Push, Op::Push, Op::Add, Op::Return]);
    }

    #[test]
    fn equality_of_constants_becomes_a_literal_bool() {
        let mut code = compile_bytes("return 3 == 3;");
        optimize(&mut code, &mut Vec::new()).unwrap();
        assert_eq!(
            ops_of(&code),
            vec![(0, Op::True, None), (1, Op::Return, None)]
        );

        let mut code = compile_bytes("return 3 != 3;");
        optimize(&mut code, &mut Vec::new()).unwrap();
        assert_eq!(ops_of(&code)[0].1, Op::False);
    }

    #[test]
    fn window_resets_on_intervening_instructions() {
        // The lookup between the pushes makes folding unsound.
        let mut code = compile_bytes("return 1 + x + 2;");
        optimize(&mut code, &mut Vec::new()).unwrap();
        let ops: Vec<Op> = ops_of(&code).into_iter().map(|(_, op, _)| op).collect();
        assert!(ops.contains(&Op::Add));
        assert!(ops.contains(&Op::Lookup));
    }

    #[test]
    fn no_nops_survive_elision() {
        let mut code = compile_bytes("return 1 + 2 * 3 - 4;");
        optimize(&mut code, &mut Vec::new()).unwrap();
        assert!(ops_of(&code).iter().all(|(_, op, _)| *op != Op::Nop));
    }

    #[test]
    fn jump_to_an_eliminated_nop_lands_on_the_next_live_instruction() {
        // Hand-build: Jump over a NOP onto a Push.
        let mut code = Vec::new();
        opcode::emit(&mut code, Op::Jump, Some(4));
        opcode::emit(&mut code, Op::Nop, None); // offset 3
        opcode::emit(&mut code, Op::Nop, None); // offset 4, the target
        opcode::emit(&mut code, Op::Push, Some(9)); // offset 5
        opcode::emit(&mut code, Op::Return, None);
        elide_nops(&mut code, &mut Vec::new()).unwrap();
        let ops = ops_of(&code);
        assert_eq!(ops[0], (0, Op::Jump, Some(3)));
        assert_eq!(ops[1], (3, Op::Push, Some(9)));
    }

    #[test]
    fn jump_targeting_the_code_end_survives_elision() {
        // A trailing loop's exit label is one past the last byte.
        let mut code = Vec::new();
        opcode::emit(&mut code, Op::Nop, None);
        opcode::emit(&mut code, Op::True, None);
        opcode::emit(&mut code, Op::JumpIfFalse, Some(5));
        assert_eq!(code.len(), 5);
        elide_nops(&mut code, &mut Vec::new()).unwrap();
        let ops = ops_of(&code);
        assert_eq!(ops[1], (1, Op::JumpIfFalse, Some(4)));
        assert_eq!(code.len(), 4);
    }

    #[test]
    fn true_before_conditional_jump_is_removed() {
        let mut code = Vec::new();
        opcode::emit(&mut code, Op::True, None);
        opcode::emit(&mut code, Op::JumpIfFalse, Some(9));
        opcode::emit(&mut code, Op::Push, Some(1));
        opcode::emit(&mut code, Op::Return, None);
        assert!(simplify_jumps(&mut code).unwrap());
        let ops = ops_of(&code);
        assert_eq!(ops[0].1, Op::Nop);
        assert_eq!(ops[1].1, Op::Nop);
    }

    #[test]
    fn false_before_conditional_jump_elides_the_skipped_range() {
        let mut code = Vec::new();
        opcode::emit(&mut code, Op::False, None); // 0
        opcode::emit(&mut code, Op::JumpIfFalse, Some(7)); // 1
        opcode::emit(&mut code, Op::Push, Some(1)); // 4, unreachable
        opcode::emit(&mut code, Op::Push, Some(2)); // 7, the target
        opcode::emit(&mut code, Op::Return, None);
        assert!(simplify_jumps(&mut code).unwrap());
        let ops = ops_of(&code);
        assert!(ops[..7].iter().all(|(_, op, _)| *op == Op::Nop));
        assert_eq!(ops[7], (7, Op::Push, Some(2)));
    }

    #[test]
    fn dead_code_after_return_is_truncated() {
        let mut code = compile_bytes("return 1; return 2;");
        optimize(&mut code, &mut Vec::new()).unwrap();
        assert_eq!(
            ops_of(&code),
            vec![(0, Op::Push, Some(1)), (3, Op::Return, None)]
        );
    }

    #[test]
    fn any_jump_blocks_dead_code_truncation() {
        // A forward jump over the return keeps the tail alive.
        let mut code = Vec::new();
        opcode::emit(&mut code, Op::Jump, Some(7)); // 0
        opcode::emit(&mut code, Op::Push, Some(1)); // 3
        opcode::emit(&mut code, Op::Return, None); // 6
        opcode::emit(&mut code, Op::Push, Some(2)); // 7
        opcode::emit(&mut code, Op::Return, None);
        let before = code.clone();
        truncate_dead_code(&mut code, &mut Vec::new()).unwrap();
        assert_eq!(code, before);
    }

    #[test]
    fn line_table_follows_the_rewritten_offsets() {
        let program = parse("1 + 2;\nreturn x;").expect("parse");
        let compiled = Compiler::new().compile(&program).expect("compile");
        let mut code = compiled.instructions;
        let mut lines = compiled.lines;
        assert_eq!(lines, vec![(0, 1), (7, 2)]);
        optimize(&mut code, &mut lines).unwrap();
        // `1 + 2` folds to a single push, pulling `return x` forward.
        assert_eq!(
            ops_of(&code),
            vec![
                (0, Op::Push, Some(3)),
                (3, Op::Lookup, Some(0)),
                (6, Op::Return, None),
            ]
        );
        assert_eq!(lines, vec![(0, 1), (3, 2)]);
    }

    #[test]
    fn optimizer_is_idempotent() {
        for src in [
            "return 1 + 2 * 3;",
            "if (x > 2) { return true; } return false;",
            "a = 0; foreach v in [1,2,3] { a += v; } return a;",
            "while (x < 10) { x++; }",
            "return 1 == 2;",
        ] {
            let mut once = compile_bytes(src);
            optimize(&mut once, &mut Vec::new()).unwrap();
            let mut twice = once.clone();
            optimize(&mut twice, &mut Vec::new()).unwrap();
            assert_eq!(once, twice, "optimizing twice changed {}", src);
        }
    }
}
