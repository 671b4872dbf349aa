use std::fmt;

use crate::lexer::Token;

/// Assignment flavors; compound forms desugar to load-op-store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AssignOp {
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
}

impl AssignOp {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            AssignOp::Assign => "=",
            AssignOp::AddAssign => "+=",
            AssignOp::SubAssign => "-=",
            AssignOp::MulAssign => "*=",
            AssignOp::DivAssign => "/=",
        }
    }
}

/// Expression nodes. Every node keeps its originating token so errors
/// can name the source line.
#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Integer {
        token: Token,
        value: i64,
    },
    Float {
        token: Token,
        value: f64,
    },
    Str {
        token: Token,
        value: String,
    },
    Bool {
        token: Token,
        value: bool,
    },
    Null {
        token: Token,
    },
    Ident {
        token: Token,
        name: String,
    },
    Array {
        token: Token,
        elements: Vec<Expr>,
    },
    Hash {
        token: Token,
        pairs: Vec<(Expr, Expr)>,
    },
    Prefix {
        token: Token,
        op: String,
        right: Box<Expr>,
    },
    Infix {
        token: Token,
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Postfix {
        token: Token,
        op: String,
        target: Box<Expr>,
    },
    If {
        token: Token,
        cond: Box<Expr>,
        then_block: Block,
        else_block: Option<Block>,
    },
    While {
        token: Token,
        cond: Box<Expr>,
        body: Block,
    },
    Foreach {
        token: Token,
        index: Option<String>,
        value: String,
        iterable: Box<Expr>,
        body: Block,
    },
    Assign {
        token: Token,
        target: String,
        op: AssignOp,
        value: Box<Expr>,
    },
    Index {
        token: Token,
        container: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        token: Token,
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub(crate) fn token(&self) -> &Token {
        match self {
            Expr::Integer { token, .. }
            | Expr::Float { token, .. }
            | Expr::Str { token, .. }
            | Expr::Bool { token, .. }
            | Expr::Null { token }
            | Expr::Ident { token, .. }
            | Expr::Array { token, .. }
            | Expr::Hash { token, .. }
            | Expr::Prefix { token, .. }
            | Expr::Infix { token, .. }
            | Expr::Postfix { token, .. }
            | Expr::If { token, .. }
            | Expr::While { token, .. }
            | Expr::Foreach { token, .. }
            | Expr::Assign { token, .. }
            | Expr::Index { token, .. }
            | Expr::Call { token, .. } => token,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Stmt {
    Expr { expr: Expr },
    Return { token: Token, value: Expr },
}

/// A braced statement list, the body of `if`/`while`/`foreach`.
#[derive(Debug, Clone)]
pub(crate) struct Block {
    pub(crate) statements: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub(crate) struct Program {
    pub(crate) statements: Vec<Stmt>,
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Integer { value, .. } => write!(f, "{}", value),
            Expr::Float { value, .. } => {
                if value.fract() == 0.0 && value.is_finite() {
                    write!(f, "{:.1}", value)
                } else {
                    write!(f, "{}", value)
                }
            }
            Expr::Str { value, .. } => write!(f, "\"{}\"", escape(value)),
            Expr::Bool { value, .. } => write!(f, "{}", value),
            Expr::Null { .. } => write!(f, "null"),
            Expr::Ident { name, .. } => write!(f, "{}", name),
            Expr::Array { elements, .. } => {
                let inner = elements
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "[{}]", inner)
            }
            Expr::Hash { pairs, .. } => {
                let inner = pairs
                    .iter()
                    .map(|(k, v)| format!("{}:{}", k, v))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{{{}}}", inner)
            }
            Expr::Prefix { op, right, .. } => write!(f, "({}{})", op, right),
            Expr::Infix {
                op, left, right, ..
            } => write!(f, "({} {} {})", left, op, right),
            Expr::Postfix { op, target, .. } => write!(f, "({}{})", target, op),
            Expr::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                write!(f, "if ({}) {}", cond, then_block)?;
                if let Some(else_block) = else_block {
                    write!(f, " else {}", else_block)?;
                }
                Ok(())
            }
            Expr::While { cond, body, .. } => write!(f, "while ({}) {}", cond, body),
            Expr::Foreach {
                index,
                value,
                iterable,
                body,
                ..
            } => {
                match index {
                    Some(index) => write!(f, "foreach {}, {} in {} {}", index, value, iterable, body),
                    None => write!(f, "foreach {} in {} {}", value, iterable, body),
                }
            }
            Expr::Assign {
                target, op, value, ..
            } => write!(f, "({} {} {})", target, op.as_str(), value),
            Expr::Index {
                container, index, ..
            } => write!(f, "({}[{}])", container, index),
            Expr::Call { callee, args, .. } => {
                let inner = args
                    .iter()
                    .map(|a| a.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{}({})", callee, inner)
            }
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Expr { expr } => write!(f, "{};", expr),
            Stmt::Return { value, .. } => write!(f, "return {};", value),
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self
            .statements
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        write!(f, "{{ {} }}", inner)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self
            .statements
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        write!(f, "{}", inner)
    }
}
