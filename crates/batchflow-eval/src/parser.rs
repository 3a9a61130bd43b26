use std::sync::atomic::{AtomicU64, Ordering};

use crate::eval::{EvalError, EvalResult};

/// Process-unique identity of a call node.
///
/// Aggregate state locks onto the node that first used it, so two textually identical calls in
/// one tree still count as different aggregates. Cloning a tree keeps the ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(u64);

impl CallId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        CallId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Text(String),
    /// A bare identifier; only `true` and `false` evaluate.
    Ident(String),
    Selector {
        alias: String,
        field: String,
    },
    Call {
        id: CallId,
        name: String,
        args: Vec<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Equals,
    NotEquals,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Remainder => "%",
            BinaryOp::Equals => "==",
            BinaryOp::NotEquals => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEquals => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEquals => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

impl Expr {
    /// Builds a call node with a fresh [`CallId`].
    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            id: CallId::next(),
            name: name.into(),
            args,
        }
    }

    pub fn selector(alias: impl Into<String>, field: impl Into<String>) -> Self {
        Expr::Selector {
            alias: alias.into(),
            field: field.into(),
        }
    }

    /// Every `alias.field` selector in the tree, in first-use order, without duplicates.
    ///
    /// Named constants such as `time.January` are selectors too; callers that validate aliases
    /// skip the aliases they do not own.
    pub fn used_fields(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut Vec<(String, String)>) {
        match self {
            Expr::Selector { alias, field } => {
                if !out.iter().any(|(a, f)| a == alias && f == field) {
                    out.push((alias.clone(), field.clone()));
                }
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_fields(out);
                }
            }
            Expr::UnaryOp { expr, .. } => expr.collect_fields(out),
            Expr::BinaryOp { left, right, .. } => {
                left.collect_fields(out);
                right.collect_fields(out);
            }
            Expr::Int(_) | Expr::Float(_) | Expr::Text(_) | Expr::Ident(_) => {}
        }
    }
}

pub fn parse(input: &str) -> EvalResult<Expr> {
    Parser::new(input)?.parse()
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Identifier(String),
    Int(i64),
    Float(f64),
    String(String),
    Dot,
    Comma,
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqualsEquals,
    NotEquals,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
    AndAnd,
    OrOr,
    Eof,
}

struct Lexer<'a> {
    input: &'a str,
    chars: std::str::Chars<'a>,
    peeked: Option<char>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        let mut chars = input.chars();
        let peeked = chars.next();
        Self {
            input,
            chars,
            peeked,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let current = self.peeked.take();
        self.peeked = self.chars.next();
        current
    }

    fn peek(&self) -> Option<char> {
        self.peeked
    }

    fn consume_while<F>(&mut self, mut predicate: F) -> String
    where
        F: FnMut(char) -> bool,
    {
        let mut buf = String::new();
        while let Some(ch) = self.peek() {
            if !predicate(ch) {
                break;
            }
            buf.push(ch);
            self.bump();
        }
        buf
    }

    fn single(&mut self, token: Token) -> EvalResult<Token> {
        self.bump();
        Ok(token)
    }

    /// Consumes the current char and returns `paired` if `second` follows, `alone` otherwise.
    fn pair(&mut self, second: char, paired: Token, alone: Token) -> EvalResult<Token> {
        self.bump();
        if self.peek() == Some(second) {
            self.bump();
            Ok(paired)
        } else {
            Ok(alone)
        }
    }

    fn next_token(&mut self) -> EvalResult<Token> {
        self.consume_while(char::is_whitespace);
        let Some(ch) = self.peek() else {
            return Ok(Token::Eof);
        };

        match ch {
            '(' => self.single(Token::LParen),
            ')' => self.single(Token::RParen),
            ',' => self.single(Token::Comma),
            '.' => self.single(Token::Dot),
            '+' => self.single(Token::Plus),
            '-' => self.single(Token::Minus),
            '*' => self.single(Token::Star),
            '/' => self.single(Token::Slash),
            '%' => self.single(Token::Percent),
            '<' => self.pair('=', Token::LessEquals, Token::Less),
            '>' => self.pair('=', Token::GreaterEquals, Token::Greater),
            '!' => self.pair('=', Token::NotEquals, Token::Bang),
            '=' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    Ok(Token::EqualsEquals)
                } else {
                    Err(EvalError::Parse(format!(
                        "unexpected '=' in {:?}, use '==' to compare",
                        self.input
                    )))
                }
            }
            '&' | '|' => {
                self.bump();
                if self.peek() == Some(ch) {
                    self.bump();
                    Ok(if ch == '&' { Token::AndAnd } else { Token::OrOr })
                } else {
                    Err(EvalError::Parse(format!(
                        "unexpected character {ch:?} in {:?}",
                        self.input
                    )))
                }
            }
            '"' => self.lex_quoted(),
            '`' => {
                self.bump();
                let raw = self.consume_while(|c| c != '`');
                if self.bump() != Some('`') {
                    return Err(EvalError::Parse("unterminated raw string".into()));
                }
                Ok(Token::String(raw))
            }
            c if c.is_ascii_digit() => self.lex_number(),
            c if is_ident_start(c) => Ok(Token::Identifier(self.consume_while(is_ident_part))),
            other => Err(EvalError::Parse(format!(
                "unexpected character {other:?} in {:?}",
                self.input
            ))),
        }
    }

    fn lex_quoted(&mut self) -> EvalResult<Token> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(EvalError::Parse("unterminated string".into())),
                Some('"') => break,
                Some('\\') => match self.bump() {
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    other => {
                        return Err(EvalError::Parse(format!(
                            "unsupported escape sequence \\{}",
                            other.map(String::from).unwrap_or_default()
                        )))
                    }
                },
                Some(c) => out.push(c),
            }
        }
        Ok(Token::String(out))
    }

    fn lex_number(&mut self) -> EvalResult<Token> {
        let mut num_str = self.consume_while(|c| c.is_ascii_digit());
        let mut is_float = false;
        if self.peek() == Some('.') {
            is_float = true;
            self.bump();
            num_str.push('.');
            num_str.push_str(&self.consume_while(|c| c.is_ascii_digit()));
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            is_float = true;
            self.bump();
            num_str.push('e');
            if let Some(sign @ ('+' | '-')) = self.peek() {
                self.bump();
                num_str.push(sign);
            }
            let exp_digits = self.consume_while(|c| c.is_ascii_digit());
            if exp_digits.is_empty() {
                return Err(EvalError::Parse(format!(
                    "invalid number {num_str:?} (expected exponent digits)"
                )));
            }
            num_str.push_str(&exp_digits);
        }
        if is_float {
            num_str
                .parse::<f64>()
                .map(Token::Float)
                .map_err(|_| EvalError::Parse(format!("invalid number {num_str:?}")))
        } else {
            num_str
                .parse::<i64>()
                .map(Token::Int)
                .map_err(|_| EvalError::Parse(format!("integer literal {num_str} out of range")))
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    lookahead: Token,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> EvalResult<Self> {
        let mut lexer = Lexer::new(input);
        let lookahead = lexer.next_token()?;
        Ok(Self { lexer, lookahead })
    }

    fn bump(&mut self) -> EvalResult<Token> {
        let current = std::mem::replace(&mut self.lookahead, Token::Eof);
        self.lookahead = self.lexer.next_token()?;
        Ok(current)
    }

    fn expect(&mut self, token: Token) -> EvalResult<()> {
        if self.lookahead == token {
            self.bump()?;
            Ok(())
        } else {
            Err(EvalError::Parse(format!(
                "expected {token:?}, found {:?}",
                self.lookahead
            )))
        }
    }

    fn parse(&mut self) -> EvalResult<Expr> {
        let expr = self.parse_expr(0)?;
        if self.lookahead != Token::Eof {
            return Err(EvalError::Parse(format!(
                "unexpected token {:?}",
                self.lookahead
            )));
        }
        Ok(expr)
    }

    fn parse_expr(&mut self, min_prec: u8) -> EvalResult<Expr> {
        let mut left = self.parse_prefix()?;
        while let Some((op, prec)) = self.infix_binding_power() {
            if prec < min_prec {
                break;
            }
            self.bump()?;
            let right = self.parse_expr(prec + 1)?;
            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_prefix(&mut self) -> EvalResult<Expr> {
        match &self.lookahead {
            Token::Minus | Token::Bang => {
                let op = if self.bump()? == Token::Minus {
                    UnaryOp::Negate
                } else {
                    UnaryOp::Not
                };
                let expr = self.parse_expr(6)?;
                Ok(Expr::UnaryOp {
                    op,
                    expr: Box::new(expr),
                })
            }
            Token::Int(v) => {
                let v = *v;
                self.bump()?;
                Ok(Expr::Int(v))
            }
            Token::Float(v) => {
                let v = *v;
                self.bump()?;
                Ok(Expr::Float(v))
            }
            Token::String(s) => {
                let s = s.clone();
                self.bump()?;
                Ok(Expr::Text(s))
            }
            Token::Identifier(_) => self.parse_ident_like(),
            Token::LParen => {
                self.bump()?;
                let inner = self.parse_expr(0)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            other => Err(EvalError::Parse(format!(
                "unexpected token in expression: {other:?}"
            ))),
        }
    }

    fn parse_ident_like(&mut self) -> EvalResult<Expr> {
        let Token::Identifier(first) = self.bump()? else {
            return Err(EvalError::Parse("expected identifier".into()));
        };

        if self.lookahead != Token::Dot {
            if self.lookahead == Token::LParen {
                return self.parse_call(first);
            }
            return Ok(Expr::Ident(first));
        }

        self.bump()?;
        let second = match self.bump()? {
            Token::Identifier(name) => name,
            other => {
                return Err(EvalError::Parse(format!(
                    "expected field name after '{first}.', found {other:?}"
                )))
            }
        };
        match self.lookahead {
            Token::LParen => self.parse_call(format!("{first}.{second}")),
            Token::Dot => Err(EvalError::Parse(format!(
                "unsupported selector expression {first}.{second}.<...>, only alias.field is allowed"
            ))),
            _ => Ok(Expr::Selector {
                alias: first,
                field: second,
            }),
        }
    }

    fn parse_call(&mut self, name: String) -> EvalResult<Expr> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        if self.lookahead != Token::RParen {
            loop {
                args.push(self.parse_expr(0)?);
                if self.lookahead == Token::Comma {
                    self.bump()?;
                    continue;
                }
                break;
            }
        }
        self.expect(Token::RParen)?;
        Ok(Expr::call(name, args))
    }

    fn infix_binding_power(&self) -> Option<(BinaryOp, u8)> {
        let op = match self.lookahead {
            Token::OrOr => (BinaryOp::Or, 1),
            Token::AndAnd => (BinaryOp::And, 2),
            Token::EqualsEquals => (BinaryOp::Equals, 3),
            Token::NotEquals => (BinaryOp::NotEquals, 3),
            Token::Less => (BinaryOp::Less, 3),
            Token::LessEquals => (BinaryOp::LessEquals, 3),
            Token::Greater => (BinaryOp::Greater, 3),
            Token::GreaterEquals => (BinaryOp::GreaterEquals, 3),
            Token::Plus => (BinaryOp::Add, 4),
            Token::Minus => (BinaryOp::Subtract, 4),
            Token::Star => (BinaryOp::Multiply, 5),
            Token::Slash => (BinaryOp::Divide, 5),
            Token::Percent => (BinaryOp::Remainder, 5),
            _ => return None,
        };
        Some(op)
    }
}
