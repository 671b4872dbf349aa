use crate::trace::trace_log;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Int,
    Float,
    Str,
    Regex,
    Ident,

    // Keywords
    If,
    Else,
    While,
    Foreach,
    In,
    Return,
    True,
    False,
    Null,
    // Reserved for a future release; using it is a parse error.
    Function,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Power,
    Assign,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Bang,
    PlusPlus,
    MinusMinus,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    Match,
    NotMatch,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,

    /// Lexical error; the literal carries the message.
    Illegal,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub(crate) kind: TokenKind,
    pub(crate) literal: String,
    pub(crate) line: usize,
}

impl Token {
    fn new(kind: TokenKind, literal: impl Into<String>, line: usize) -> Self {
        Self {
            kind,
            literal: literal.into(),
            line,
        }
    }
}

fn keyword(ident: &str) -> Option<TokenKind> {
    match ident {
        "if" => Some(TokenKind::If),
        "else" => Some(TokenKind::Else),
        "while" => Some(TokenKind::While),
        "foreach" => Some(TokenKind::Foreach),
        "in" => Some(TokenKind::In),
        "return" => Some(TokenKind::Return),
        "true" => Some(TokenKind::True),
        "false" => Some(TokenKind::False),
        "null" => Some(TokenKind::Null),
        "function" => Some(TokenKind::Function),
        _ => None,
    }
}

pub(crate) struct Lexer {
    src: Vec<char>,
    pos: usize,
    line: usize,
    /// True when the last emitted token was a "term" (value or closing
    /// delimiter), meaning the next `/` is a division operator.
    /// False when it was an operator or opening delimiter, meaning the
    /// next `/` starts a regex literal.
    last_was_term: bool,
}

impl Lexer {
    pub(crate) fn new(input: &str) -> Self {
        Self {
            src: input.chars().collect(),
            pos: 0,
            line: 1,
            last_was_term: false,
        }
    }

    /// Lex the whole input. The stream always ends with an Eof token.
    pub(crate) fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        trace_log!("lex", "produced {} tokens", tokens.len());
        tokens
    }

    fn peek(&self) -> Option<char> {
        self.src.get(self.pos).copied()
    }

    fn bump(&mut self) -> char {
        let ch = self.src[self.pos];
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
        }
        ch
    }

    fn skip_ws_and_comments(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.bump();
            } else if ch == '/' && self.src.get(self.pos + 1) == Some(&'/') {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    pub(crate) fn next_token(&mut self) -> Token {
        self.skip_ws_and_comments();
        let line = self.line;
        if self.pos >= self.src.len() {
            return Token::new(TokenKind::Eof, "", line);
        }
        let ch = self.bump();
        let token = match ch {
            '(' => self.operator(TokenKind::LParen, "(", line),
            ')' => self.term(TokenKind::RParen, ")", line),
            '{' => self.operator(TokenKind::LBrace, "{", line),
            '}' => self.term(TokenKind::RBrace, "}", line),
            '[' => self.operator(TokenKind::LBracket, "[", line),
            ']' => self.term(TokenKind::RBracket, "]", line),
            ',' => self.operator(TokenKind::Comma, ",", line),
            ';' => self.operator(TokenKind::Semicolon, ";", line),
            ':' => self.operator(TokenKind::Colon, ":", line),
            '+' => {
                if self.peek() == Some('+') {
                    self.bump();
                    self.term(TokenKind::PlusPlus, "++", line)
                } else if self.peek() == Some('=') {
                    self.bump();
                    self.operator(TokenKind::PlusAssign, "+=", line)
                } else {
                    self.operator(TokenKind::Plus, "+", line)
                }
            }
            '-' => {
                if self.peek() == Some('-') {
                    self.bump();
                    self.term(TokenKind::MinusMinus, "--", line)
                } else if self.peek() == Some('=') {
                    self.bump();
                    self.operator(TokenKind::MinusAssign, "-=", line)
                } else {
                    self.operator(TokenKind::Minus, "-", line)
                }
            }
            '*' => {
                if self.peek() == Some('*') {
                    self.bump();
                    self.operator(TokenKind::Power, "**", line)
                } else if self.peek() == Some('=') {
                    self.bump();
                    self.operator(TokenKind::StarAssign, "*=", line)
                } else {
                    self.operator(TokenKind::Star, "*", line)
                }
            }
            '/' => {
                if self.last_was_term {
                    if self.peek() == Some('=') {
                        self.bump();
                        self.operator(TokenKind::SlashAssign, "/=", line)
                    } else {
                        self.operator(TokenKind::Slash, "/", line)
                    }
                } else {
                    self.read_regex(line)
                }
            }
            '%' => self.operator(TokenKind::Percent, "%", line),
            '=' => {
                if self.peek() == Some('=') {
                    self.bump();
                    self.operator(TokenKind::Eq, "==", line)
                } else {
                    self.operator(TokenKind::Assign, "=", line)
                }
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.bump();
                    self.operator(TokenKind::NotEq, "!=", line)
                } else if self.peek() == Some('~') {
                    self.bump();
                    self.operator(TokenKind::NotMatch, "!~", line)
                } else {
                    self.operator(TokenKind::Bang, "!", line)
                }
            }
            '~' => {
                if self.peek() == Some('=') {
                    self.bump();
                    self.operator(TokenKind::Match, "~=", line)
                } else {
                    self.operator(TokenKind::Illegal, "unexpected character '~'", line)
                }
            }
            '<' => {
                if self.peek() == Some('=') {
                    self.bump();
                    self.operator(TokenKind::LtEq, "<=", line)
                } else {
                    self.operator(TokenKind::Lt, "<", line)
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.bump();
                    self.operator(TokenKind::GtEq, ">=", line)
                } else {
                    self.operator(TokenKind::Gt, ">", line)
                }
            }
            '&' => {
                if self.peek() == Some('&') {
                    self.bump();
                    self.operator(TokenKind::AndAnd, "&&", line)
                } else {
                    self.operator(TokenKind::Illegal, "unexpected character '&'", line)
                }
            }
            '|' => {
                if self.peek() == Some('|') {
                    self.bump();
                    self.operator(TokenKind::OrOr, "||", line)
                } else {
                    self.operator(TokenKind::Illegal, "unexpected character '|'", line)
                }
            }
            '"' | '\'' => self.read_string(ch, line),
            c if c.is_ascii_digit() => self.read_number(c, line),
            c if c.is_alphabetic() || c == '_' => self.read_ident(c, line),
            c => self.operator(
                TokenKind::Illegal,
                format!("unexpected character '{}'", c),
                line,
            ),
        };
        token
    }

    fn operator(&mut self, kind: TokenKind, literal: impl Into<String>, line: usize) -> Token {
        self.last_was_term = false;
        Token::new(kind, literal, line)
    }

    fn term(&mut self, kind: TokenKind, literal: impl Into<String>, line: usize) -> Token {
        self.last_was_term = true;
        Token::new(kind, literal, line)
    }

    fn read_number(&mut self, first: char, line: usize) -> Token {
        let mut literal = String::from(first);
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                literal.push(self.bump());
            } else {
                break;
            }
        }
        // A float needs a digit after the dot; `1.` stays an integer
        // followed by an illegal dot.
        if self.peek() == Some('.')
            && self
                .src
                .get(self.pos + 1)
                .is_some_and(|c| c.is_ascii_digit())
        {
            literal.push(self.bump());
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    literal.push(self.bump());
                } else {
                    break;
                }
            }
            return self.term(TokenKind::Float, literal, line);
        }
        self.term(TokenKind::Int, literal, line)
    }

    fn read_ident(&mut self, first: char, line: usize) -> Token {
        let mut literal = String::from(first);
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                literal.push(self.bump());
            } else {
                break;
            }
        }
        match keyword(&literal) {
            Some(kind) => self.term(kind, literal, line),
            None => self.term(TokenKind::Ident, literal, line),
        }
    }

    fn read_string(&mut self, quote: char, line: usize) -> Token {
        let mut value = String::new();
        loop {
            let Some(c) = self.peek() else {
                return self.operator(TokenKind::Illegal, "unterminated string", line);
            };
            self.bump();
            if c == quote {
                break;
            }
            if c == '\\' {
                let Some(escaped) = self.peek() else {
                    return self.operator(TokenKind::Illegal, "unterminated string", line);
                };
                self.bump();
                match escaped {
                    'n' => value.push('\n'),
                    'r' => value.push('\r'),
                    't' => value.push('\t'),
                    '\\' => value.push('\\'),
                    '"' => value.push('"'),
                    '\'' => value.push('\''),
                    other => {
                        return self.operator(
                            TokenKind::Illegal,
                            format!("invalid escape sequence '\\{}'", other),
                            line,
                        );
                    }
                }
            } else {
                value.push(c);
            }
        }
        self.term(TokenKind::Str, value, line)
    }

    fn read_regex(&mut self, line: usize) -> Token {
        let mut pattern = String::new();
        loop {
            let Some(c) = self.peek() else {
                return self.operator(TokenKind::Illegal, "unterminated regex", line);
            };
            self.bump();
            if c == '/' {
                break;
            }
            if c == '\\' && self.peek() == Some('/') {
                self.bump();
                pattern.push('/');
            } else if c == '\\' {
                // Other escapes belong to the regex engine.
                pattern.push('\\');
            } else {
                pattern.push(c);
            }
        }
        self.term(TokenKind::Regex, pattern, line)
    }
}
