use std::fmt;

/// A single syntax error, collected by the parser rather than thrown.
/// Lexer problems (unterminated strings, unknown punctuation) surface
/// here too, via the `Illegal` token.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
}

impl ParseError {
    pub(crate) fn new(message: impl Into<String>, line: usize) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// Error produced by `Engine::prepare`.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    /// One or more syntax errors, reported together.
    Parse(Vec<ParseError>),
    /// The optimizer proved a division by zero.
    DivisionByZero,
    /// Internal consistency failure: undefined jump target, malformed
    /// AST, unknown opcode byte.
    Internal(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Parse(errors) => {
                writeln!(f, "errors parsing script:")?;
                let joined = errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("\n");
                write!(f, "{}", joined)
            }
            CompileError::DivisionByZero => write!(f, "attempted division by zero"),
            CompileError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for CompileError {}

/// Error produced while the VM is running a prepared script.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub message: String,
    /// Source line, when the failing operation can be traced to one.
    pub line: Option<usize>,
}

impl RuntimeError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
        }
    }

    pub(crate) fn division_by_zero() -> Self {
        Self::new("division by zero")
    }

    pub(crate) fn type_mismatch(op: &str, left: &str, right: &str) -> Self {
        Self::new(format!(
            "type mismatch: unsupported operand types for {}: {} and {}",
            op, left, right
        ))
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {}: {}", line, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for RuntimeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_join_with_newlines() {
        let err = CompileError::Parse(vec![
            ParseError::new("unexpected token ')'", 1),
            ParseError::new("missing ']'", 3),
        ]);
        let text = err.to_string();
        assert!(text.contains("line 1: unexpected token ')'"));
        assert!(text.contains("line 3: missing ']'"));
    }

    #[test]
    fn runtime_error_display_includes_line_when_known() {
        let mut err = RuntimeError::new("boom");
        assert_eq!(err.to_string(), "boom");
        err.line = Some(7);
        assert_eq!(err.to_string(), "line 7: boom");
    }
}
