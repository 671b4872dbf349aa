use crate::error::RuntimeError;
use crate::opcode::{Op, walk};
use crate::value::Value;

/// Render a compiled program: one line per instruction, zero-padded
/// offset, right-aligned mnemonic, optional decimal argument, and a
/// contextual comment where one helps; then the constant pool.
pub(crate) fn dump(code: &[u8], constants: &[Value]) -> Result<String, RuntimeError> {
    let mut out = String::from("Bytecode:\n");
    for item in walk(code) {
        let (offset, op, arg) = item?;
        out.push_str(&format!("{:06}\t{:>14}", offset, op.name()));
        if let Some(arg) = arg {
            out.push_str(&format!("\t{}", arg));
        }
        match (op, arg) {
            (Op::Constant, Some(idx)) => {
                if let Some(value) = constants.get(usize::from(idx)) {
                    out.push_str(&format!(
                        "\t// load constant: \"{}\"",
                        escape_newlines(&value.inspect())
                    ));
                }
            }
            (Op::Lookup, Some(idx)) => {
                if let Some(value) = constants.get(usize::from(idx)) {
                    out.push_str(&format!(
                        "\t// lookup field/variable: {}",
                        value.inspect()
                    ));
                }
            }
            (Op::Call, Some(argc)) => {
                out.push_str(&format!("\t// call function with {} arg(s)", argc));
            }
            (Op::Push, Some(literal)) => {
                out.push_str(&format!("\t// Push {} to stack", literal));
            }
            _ => {}
        }
        out.push('\n');
    }
    if !constants.is_empty() {
        out.push_str("\n\nConstants:\n");
        for (i, constant) in constants.iter().enumerate() {
            out.push_str(&format!(
                "  {:06} Type:{} Value:\"{}\"\n",
                i,
                constant.kind().tag(),
                escape_newlines(&constant.inspect())
            ));
        }
    }
    Ok(out)
}

fn escape_newlines(text: &str) -> String {
    text.replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode;

    #[test]
    fn format_of_a_known_program() {
        let mut code = Vec::new();
        opcode::emit(&mut code, Op::Push, Some(7));
        opcode::emit(&mut code, Op::Constant, Some(0));
        opcode::emit(&mut code, Op::Return, None);
        let constants = vec![Value::Str("line one\nline two".into())];
        let text = dump(&code, &constants).unwrap();
        let expected = "Bytecode:\n\
                        000000\t        OpPush\t7\t// Push 7 to stack\n\
                        000003\t    OpConstant\t0\t// load constant: \"line one\\nline two\"\n\
                        000006\t      OpReturn\n\
                        \n\n\
                        Constants:\n  \
                        000000 Type:STRING Value:\"line one\\nline two\"\n";
        assert_eq!(text, expected);
    }
}
