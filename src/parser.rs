use crate::ast::{AssignOp, Block, Expr, Program, Stmt};
use crate::error::ParseError;
use crate::lexer::{Lexer, Token, TokenKind};
use crate::trace::trace_log;

/// Binding power, low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Assign,
    Or,
    And,
    Equality,
    Comparison,
    Sum,
    Product,
    Power,
    Prefix,
    Call,
}

fn precedence_of(kind: &TokenKind) -> Precedence {
    match kind {
        TokenKind::Assign
        | TokenKind::PlusAssign
        | TokenKind::MinusAssign
        | TokenKind::StarAssign
        | TokenKind::SlashAssign => Precedence::Assign,
        TokenKind::OrOr => Precedence::Or,
        TokenKind::AndAnd => Precedence::And,
        TokenKind::Eq | TokenKind::NotEq => Precedence::Equality,
        TokenKind::Lt
        | TokenKind::LtEq
        | TokenKind::Gt
        | TokenKind::GtEq
        | TokenKind::Match
        | TokenKind::NotMatch => Precedence::Comparison,
        TokenKind::Plus | TokenKind::Minus => Precedence::Sum,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Precedence::Product,
        TokenKind::Power => Precedence::Power,
        TokenKind::LParen | TokenKind::LBracket | TokenKind::PlusPlus | TokenKind::MinusMinus => {
            Precedence::Call
        }
        _ => Precedence::Lowest,
    }
}

/// Parse a script into a program, or the full list of syntax errors.
pub(crate) fn parse(input: &str) -> Result<Program, Vec<ParseError>> {
    Parser::new(Lexer::new(input).tokenize()).parse_program()
}

pub(crate) struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<ParseError>,
}

impl Parser {
    pub(crate) fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            errors: Vec::new(),
        }
    }

    fn cur(&self) -> &Token {
        // The token stream always ends with Eof.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.cur().kind == kind
    }

    fn bump(&mut self) -> Token {
        let token = self.cur().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, ParseError> {
        if self.check(kind) {
            Ok(self.bump())
        } else {
            let cur = self.cur();
            Err(ParseError::new(
                format!("expected {}, found '{}'", what, cur.literal),
                cur.line,
            ))
        }
    }

    /// Parse every statement, accumulating errors instead of stopping
    /// at the first one.
    pub(crate) fn parse_program(mut self) -> Result<Program, Vec<ParseError>> {
        trace_log!("parse", "parse_program: {} tokens", self.tokens.len());
        let mut statements = Vec::new();
        while !self.check(TokenKind::Eof) {
            let start = self.pos;
            match self.parse_statement() {
                Ok(stmt) => statements.push(stmt),
                Err(e) => {
                    self.errors.push(e);
                    self.recover_to_statement();
                    if self.pos == start && !self.check(TokenKind::Eof) {
                        self.pos += 1;
                    }
                }
            }
        }
        if self.errors.is_empty() {
            Ok(Program { statements })
        } else {
            trace_log!("parse", "collected {} errors", self.errors.len());
            Err(self.errors)
        }
    }

    /// Skip past the next statement boundary after an error.
    fn recover_to_statement(&mut self) {
        while !self.check(TokenKind::Eof) {
            if self.check(TokenKind::Semicolon) {
                self.bump();
                return;
            }
            self.bump();
        }
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        if self.check(TokenKind::Return) {
            let token = self.bump();
            let value = self.parse_expression(Precedence::Lowest)?;
            if self.check(TokenKind::Semicolon) {
                self.bump();
            }
            return Ok(Stmt::Return { token, value });
        }
        let expr = self.parse_expression(Precedence::Lowest)?;
        if self.check(TokenKind::Semicolon) {
            self.bump();
        }
        Ok(Stmt::Expr { expr })
    }

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        self.expect(TokenKind::LBrace, "'{'")?;
        let mut statements = Vec::new();
        while !self.check(TokenKind::RBrace) {
            if self.check(TokenKind::Eof) {
                let cur = self.cur();
                return Err(ParseError::new("missing '}' to close block", cur.line));
            }
            statements.push(self.parse_statement()?);
        }
        self.bump();
        Ok(Block { statements })
    }

    fn parse_expression(&mut self, prec: Precedence) -> Result<Expr, ParseError> {
        let mut left = self.parse_prefix()?;
        while precedence_of(&self.cur().kind) > prec {
            left = self.parse_infix(left)?;
        }
        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Expr, ParseError> {
        let token = self.cur().clone();
        match token.kind {
            TokenKind::Int => {
                self.bump();
                let value = token.literal.parse::<i64>().map_err(|_| {
                    ParseError::new(
                        format!("integer literal '{}' out of range", token.literal),
                        token.line,
                    )
                })?;
                Ok(Expr::Integer { token, value })
            }
            TokenKind::Float => {
                self.bump();
                let value = token.literal.parse::<f64>().map_err(|_| {
                    ParseError::new(
                        format!("malformed float literal '{}'", token.literal),
                        token.line,
                    )
                })?;
                Ok(Expr::Float { token, value })
            }
            TokenKind::Str | TokenKind::Regex => {
                self.bump();
                let value = token.literal.clone();
                Ok(Expr::Str { token, value })
            }
            TokenKind::True | TokenKind::False => {
                self.bump();
                let value = token.kind == TokenKind::True;
                Ok(Expr::Bool { token, value })
            }
            TokenKind::Null => {
                self.bump();
                Ok(Expr::Null { token })
            }
            TokenKind::Ident => {
                self.bump();
                let name = token.literal.clone();
                Ok(Expr::Ident { token, name })
            }
            TokenKind::Bang | TokenKind::Minus => {
                self.bump();
                let right = self.parse_expression(Precedence::Prefix)?;
                Ok(Expr::Prefix {
                    op: token.literal.clone(),
                    token,
                    right: Box::new(right),
                })
            }
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                self.bump();
                let right = self.parse_expression(Precedence::Prefix)?;
                if !matches!(right, Expr::Ident { .. }) {
                    return Err(ParseError::new(
                        format!("'{}' needs a variable to operate on", token.literal),
                        token.line,
                    ));
                }
                Ok(Expr::Prefix {
                    op: token.literal.clone(),
                    token,
                    right: Box::new(right),
                })
            }
            TokenKind::LParen => {
                self.bump();
                let inner = self.parse_expression(Precedence::Lowest)?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::LBracket => {
                self.bump();
                let elements = self.parse_expression_list(TokenKind::RBracket, "']'")?;
                Ok(Expr::Array { token, elements })
            }
            TokenKind::LBrace => {
                self.bump();
                let mut pairs = Vec::new();
                while !self.check(TokenKind::RBrace) {
                    let key = self.parse_expression(Precedence::Lowest)?;
                    self.expect(TokenKind::Colon, "':'")?;
                    let value = self.parse_expression(Precedence::Lowest)?;
                    pairs.push((key, value));
                    if !self.check(TokenKind::RBrace) {
                        self.expect(TokenKind::Comma, "','")?;
                    }
                }
                self.bump();
                Ok(Expr::Hash { token, pairs })
            }
            TokenKind::If => self.parse_if(),
            TokenKind::While => {
                self.bump();
                self.expect(TokenKind::LParen, "'('")?;
                let cond = self.parse_expression(Precedence::Lowest)?;
                self.expect(TokenKind::RParen, "')'")?;
                let body = self.parse_block()?;
                Ok(Expr::While {
                    token,
                    cond: Box::new(cond),
                    body,
                })
            }
            TokenKind::Foreach => self.parse_foreach(),
            TokenKind::Function => Err(ParseError::new(
                "'function' is reserved and not yet available",
                token.line,
            )),
            TokenKind::Illegal => {
                self.bump();
                Err(ParseError::new(token.literal.clone(), token.line))
            }
            _ => Err(ParseError::new(
                format!("unexpected token '{}'", token.literal),
                token.line,
            )),
        }
    }

    fn parse_if(&mut self) -> Result<Expr, ParseError> {
        let token = self.bump();
        self.expect(TokenKind::LParen, "'('")?;
        let cond = self.parse_expression(Precedence::Lowest)?;
        self.expect(TokenKind::RParen, "')'")?;
        let then_block = self.parse_block()?;
        let else_block = if self.check(TokenKind::Else) {
            self.bump();
            if self.check(TokenKind::If) {
                // `else if` re-parses as a nested conditional wrapped
                // in a synthetic block.
                let nested = self.parse_if()?;
                Some(Block {
                    statements: vec![Stmt::Expr { expr: nested }],
                })
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Expr::If {
            token,
            cond: Box::new(cond),
            then_block,
            else_block,
        })
    }

    fn parse_foreach(&mut self) -> Result<Expr, ParseError> {
        let token = self.bump();
        let first = self.expect(TokenKind::Ident, "a loop variable")?;
        let (index, value) = if self.check(TokenKind::Comma) {
            self.bump();
            let second = self.expect(TokenKind::Ident, "a loop variable")?;
            (Some(first.literal), second.literal)
        } else {
            (None, first.literal)
        };
        self.expect(TokenKind::In, "'in'")?;
        let iterable = self.parse_expression(Precedence::Lowest)?;
        let body = self.parse_block()?;
        Ok(Expr::Foreach {
            token,
            index,
            value,
            iterable: Box::new(iterable),
            body,
        })
    }

    fn parse_expression_list(
        &mut self,
        end: TokenKind,
        end_name: &str,
    ) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        while !self.check(end.clone()) {
            items.push(self.parse_expression(Precedence::Lowest)?);
            if !self.check(end.clone()) {
                self.expect(TokenKind::Comma, "','")?;
            }
        }
        self.expect(end, end_name)?;
        Ok(items)
    }

    fn parse_infix(&mut self, left: Expr) -> Result<Expr, ParseError> {
        let token = self.cur().clone();
        match token.kind {
            TokenKind::LParen => {
                self.bump();
                let args = self.parse_expression_list(TokenKind::RParen, "')'")?;
                Ok(Expr::Call {
                    token,
                    callee: Box::new(left),
                    args,
                })
            }
            TokenKind::LBracket => {
                self.bump();
                let index = self.parse_expression(Precedence::Lowest)?;
                self.expect(TokenKind::RBracket, "']'")?;
                Ok(Expr::Index {
                    token,
                    container: Box::new(left),
                    index: Box::new(index),
                })
            }
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                self.bump();
                if !matches!(left, Expr::Ident { .. }) {
                    return Err(ParseError::new(
                        format!("'{}' needs a variable to operate on", token.literal),
                        token.line,
                    ));
                }
                Ok(Expr::Postfix {
                    op: token.literal.clone(),
                    token,
                    target: Box::new(left),
                })
            }
            TokenKind::Assign
            | TokenKind::PlusAssign
            | TokenKind::MinusAssign
            | TokenKind::StarAssign
            | TokenKind::SlashAssign => {
                self.bump();
                let Expr::Ident { name, .. } = left else {
                    return Err(ParseError::new(
                        "invalid assignment target",
                        token.line,
                    ));
                };
                let op = match token.kind {
                    TokenKind::Assign => AssignOp::Assign,
                    TokenKind::PlusAssign => AssignOp::AddAssign,
                    TokenKind::MinusAssign => AssignOp::SubAssign,
                    TokenKind::StarAssign => AssignOp::MulAssign,
                    _ => AssignOp::DivAssign,
                };
                // Right-associative: `a = b = c` assigns c to b first.
                let value = self.parse_expression(Precedence::Lowest)?;
                Ok(Expr::Assign {
                    token,
                    target: name,
                    op,
                    value: Box::new(value),
                })
            }
            TokenKind::Power => {
                self.bump();
                // Right-associative.
                let right = self.parse_expression(Precedence::Product)?;
                Ok(Expr::Infix {
                    op: token.literal.clone(),
                    token,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
            _ => {
                let prec = precedence_of(&token.kind);
                self.bump();
                let right = self.parse_expression(prec)?;
                Ok(Expr::Infix {
                    op: token.literal.clone(),
                    token,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(input: &str) -> String {
        parse(input).expect("parse").to_string()
    }

    #[test]
    fn precedence_ladder() {
        assert_eq!(parsed("1 + 2 * 3;"), "(1 + (2 * 3));");
        assert_eq!(parsed("(1 + 2) * 3;"), "((1 + 2) * 3);");
        assert_eq!(parsed("a || b && c;"), "(a || (b && c));");
        assert_eq!(parsed("a == b < c;"), "(a == (b < c));");
        assert_eq!(parsed("!a && b;"), "((!a) && b);");
        assert_eq!(parsed("-2 ** 3;"), "((-2) ** 3);");
        assert_eq!(parsed("2 ** 3 ** 2;"), "(2 ** (3 ** 2));");
    }

    #[test]
    fn assignment_is_right_associative_and_checked() {
        assert_eq!(parsed("a = b = 1;"), "(a = (b = 1));");
        assert_eq!(parsed("a += 2;"), "(a += 2);");
        let errors = parse("1 = 2;").unwrap_err();
        assert!(errors[0].message.contains("invalid assignment target"));
    }

    #[test]
    fn postfix_and_prefix_increment() {
        assert_eq!(parsed("i++;"), "(i++);");
        assert_eq!(parsed("--i;"), "(--i);");
        let errors = parse("3++;").unwrap_err();
        assert!(errors[0].message.contains("needs a variable"));
    }

    #[test]
    fn foreach_forms() {
        assert_eq!(
            parsed("foreach v in [1,2] { v; }"),
            "foreach v in [1, 2] { v; };"
        );
        assert_eq!(
            parsed("foreach k, v in h { k; }"),
            "foreach k, v in h { k; };"
        );
    }

    #[test]
    fn if_else_chain() {
        assert_eq!(
            parsed("if (a) { 1; } else if (b) { 2; } else { 3; }"),
            "if (a) { 1; } else { if (b) { 2; } else { 3; }; };"
        );
    }

    #[test]
    fn errors_accumulate_with_lines() {
        let errors = parse("1 +;\n@;\nreturn 3;").unwrap_err();
        assert!(errors.len() >= 2);
        assert_eq!(errors[0].line, 1);
        assert_eq!(errors[1].line, 2);
    }

    #[test]
    fn reserved_function_keyword_is_rejected() {
        let errors = parse("function f() { 1; }").unwrap_err();
        assert!(errors[0].message.contains("reserved"));
    }

    #[test]
    fn regex_literal_parses_as_pattern_constant() {
        assert_eq!(parsed("Body ~= /err/;"), "(Body ~= \"err\");");
    }

    #[test]
    fn hash_and_index() {
        assert_eq!(parsed(r#"{"a": 1}["a"];"#), "({\"a\":1}[\"a\"]);");
    }

    #[test]
    fn round_trip_reparses_to_the_same_form() {
        let sources = [
            "return 1 + 2 * 3;",
            "a = 0; foreach v in [10,20,30] { a += v; } return a;",
            "if ( len(Name) > 0 ) { return true; } return false;",
            "while (i < 10) { i++; }",
        ];
        for src in sources {
            let first = parse(src).expect("parse source").to_string();
            let second = parse(&first).expect("reparse rendering").to_string();
            assert_eq!(first, second);
        }
    }
}
