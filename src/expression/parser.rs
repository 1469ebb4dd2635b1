//! Lexer and recursive-descent parser for match expressions.
//!
//! Precedence, lowest first: `?:`, `||`, `&&`, relations (`== != < <= > >= in`),
//! `+ -`, unary `! -`, then member access, indexing and calls.

use crate::error::CompileError;

use super::ast::{BinaryOp, Expr, Literal, UnaryOp};

/// Maximum accepted source length in bytes.
pub const MAX_EXPRESSION_LEN: usize = 16 * 1024;

/// Maximum nesting depth of the syntax tree.
pub const MAX_EXPRESSION_DEPTH: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Int(i64),
    Str(String),
    True,
    False,
    Null,
    In,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
    Question,
    Colon,
    Bang,
    Minus,
    Plus,
    AndAnd,
    OrOr,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Eof,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Ident(name) => format!("identifier '{name}'"),
            Self::Int(v) => format!("integer {v}"),
            Self::Str(_) => "string literal".to_string(),
            Self::Eof => "end of input".to_string(),
            other => format!("'{}'", other.symbol()),
        }
    }

    const fn symbol(&self) -> &'static str {
        match self {
            Self::True => "true",
            Self::False => "false",
            Self::Null => "null",
            Self::In => "in",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::Dot => ".",
            Self::Comma => ",",
            Self::Question => "?",
            Self::Colon => ":",
            Self::Bang => "!",
            Self::Minus => "-",
            Self::Plus => "+",
            Self::AndAnd => "&&",
            Self::OrOr => "||",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Ident(_) | Self::Int(_) | Self::Str(_) | Self::Eof => "",
        }
    }
}

fn syntax(offset: usize, message: impl Into<String>) -> CompileError {
    CompileError::Syntax {
        offset,
        message: message.into(),
    }
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, CompileError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    ident.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            let token = match ident.as_str() {
                "true" => Token::True,
                "false" => Token::False,
                "null" => Token::Null,
                "in" => Token::In,
                _ => Token::Ident(ident),
            };
            tokens.push((offset, token));
            continue;
        }

        if c.is_ascii_digit() {
            let mut digits = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if c.is_ascii_digit() {
                    digits.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            let value = digits
                .parse::<i64>()
                .map_err(|_| syntax(offset, format!("integer literal {digits} out of range")))?;
            tokens.push((offset, Token::Int(value)));
            continue;
        }

        if c == '\'' || c == '"' {
            let quote = c;
            chars.next();
            let mut value = String::new();
            let mut closed = false;
            while let Some((pos, c)) = chars.next() {
                match c {
                    _ if c == quote => {
                        closed = true;
                        break;
                    }
                    '\\' => {
                        let Some((_, escaped)) = chars.next() else {
                            return Err(syntax(pos, "unterminated escape sequence"));
                        };
                        match escaped {
                            '\\' => value.push('\\'),
                            '\'' => value.push('\''),
                            '"' => value.push('"'),
                            'n' => value.push('\n'),
                            't' => value.push('\t'),
                            other => {
                                let message = format!("unknown escape sequence '\\{other}'");
                                return Err(syntax(pos, message));
                            }
                        }
                    }
                    _ => value.push(c),
                }
            }
            if !closed {
                return Err(syntax(offset, "unterminated string literal"));
            }
            tokens.push((offset, Token::Str(value)));
            continue;
        }

        chars.next();
        let next_is = |chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>, want: char| {
            if chars.peek().map(|&(_, c)| c) == Some(want) {
                chars.next();
                true
            } else {
                false
            }
        };

        let token = match c {
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '.' => Token::Dot,
            ',' => Token::Comma,
            '?' => Token::Question,
            ':' => Token::Colon,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '!' => {
                if next_is(&mut chars, '=') {
                    Token::NotEq
                } else {
                    Token::Bang
                }
            }
            '=' => {
                if next_is(&mut chars, '=') {
                    Token::EqEq
                } else {
                    return Err(syntax(offset, "expected '==', found '='"));
                }
            }
            '<' => {
                if next_is(&mut chars, '=') {
                    Token::Le
                } else {
                    Token::Lt
                }
            }
            '>' => {
                if next_is(&mut chars, '=') {
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            '&' => {
                if next_is(&mut chars, '&') {
                    Token::AndAnd
                } else {
                    return Err(syntax(offset, "expected '&&', found '&'"));
                }
            }
            '|' => {
                if next_is(&mut chars, '|') {
                    Token::OrOr
                } else {
                    return Err(syntax(offset, "expected '||', found '|'"));
                }
            }
            other => return Err(syntax(offset, format!("unexpected character '{other}'"))),
        };
        tokens.push((offset, token));
    }

    tokens.push((source.len(), Token::Eof));
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].1
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].0
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, want: &Token) -> bool {
        if self.peek() == want {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, want: &Token) -> Result<(), CompileError> {
        if self.eat(want) {
            Ok(())
        } else {
            Err(syntax(
                self.offset(),
                format!("expected '{}', found {}", want.symbol(), self.peek().describe()),
            ))
        }
    }

    fn enter(&mut self) -> Result<(), CompileError> {
        self.depth += 1;
        if self.depth > MAX_EXPRESSION_DEPTH {
            return Err(CompileError::TooDeep {
                max_depth: MAX_EXPRESSION_DEPTH,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.leave_n(1);
    }

    /// Undoes `levels` calls to `enter`. Operator loops enter once per node they
    /// wrap, since a left-associative chain nests as deep as it is long.
    fn leave_n(&mut self, levels: usize) {
        self.depth -= levels;
    }

    fn expr(&mut self) -> Result<Expr, CompileError> {
        self.enter()?;
        let condition = self.or()?;
        let out = if self.eat(&Token::Question) {
            let then = self.expr()?;
            self.expect(&Token::Colon)?;
            let otherwise = self.expr()?;
            Expr::Conditional {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            }
        } else {
            condition
        };
        self.leave();
        Ok(out)
    }

    fn or(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.and()?;
        let mut wrapped = 0;
        while self.eat(&Token::OrOr) {
            self.enter()?;
            wrapped += 1;
            let rhs = self.and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        self.leave_n(wrapped);
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.relation()?;
        let mut wrapped = 0;
        while self.eat(&Token::AndAnd) {
            self.enter()?;
            wrapped += 1;
            let rhs = self.relation()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        self.leave_n(wrapped);
        Ok(lhs)
    }

    fn relation(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.additive()?;
        let mut wrapped = 0;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinaryOp::Eq,
                Token::NotEq => BinaryOp::Ne,
                Token::Lt => BinaryOp::Lt,
                Token::Le => BinaryOp::Le,
                Token::Gt => BinaryOp::Gt,
                Token::Ge => BinaryOp::Ge,
                Token::In => BinaryOp::In,
                _ => break,
            };
            self.advance();
            self.enter()?;
            wrapped += 1;
            let rhs = self.additive()?;
            lhs = binary(op, lhs, rhs);
        }
        self.leave_n(wrapped);
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.unary()?;
        let mut wrapped = 0;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            self.enter()?;
            wrapped += 1;
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
        self.leave_n(wrapped);
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, CompileError> {
        let op = match self.peek() {
            Token::Bang => UnaryOp::Not,
            Token::Minus => UnaryOp::Neg,
            _ => return self.member(),
        };
        self.advance();
        self.enter()?;
        let operand = self.unary()?;
        self.leave();
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn member(&mut self) -> Result<Expr, CompileError> {
        let mut operand = self.primary()?;
        let mut wrapped = 0;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    self.enter()?;
                    wrapped += 1;
                    let offset = self.offset();
                    let Token::Ident(field) = self.advance() else {
                        return Err(syntax(offset, "expected field name after '.'"));
                    };
                    if self.eat(&Token::LParen) {
                        let args = self.args()?;
                        operand = Expr::Call {
                            receiver: Some(Box::new(operand)),
                            function: field,
                            args,
                        };
                    } else {
                        operand = Expr::Select {
                            operand: Box::new(operand),
                            field,
                        };
                    }
                }
                Token::LBracket => {
                    self.advance();
                    self.enter()?;
                    wrapped += 1;
                    let index = self.expr()?;
                    self.expect(&Token::RBracket)?;
                    operand = Expr::Index {
                        operand: Box::new(operand),
                        index: Box::new(index),
                    };
                }
                _ => break,
            }
        }
        self.leave_n(wrapped);
        Ok(operand)
    }

    fn args(&mut self) -> Result<Vec<Expr>, CompileError> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RParen)?;
            return Ok(args);
        }
    }

    fn primary(&mut self) -> Result<Expr, CompileError> {
        let offset = self.offset();
        match self.advance() {
            Token::True => Ok(Expr::Literal(Literal::Bool(true))),
            Token::False => Ok(Expr::Literal(Literal::Bool(false))),
            Token::Null => Ok(Expr::Literal(Literal::Null)),
            Token::Int(v) => Ok(Expr::Literal(Literal::Int(v))),
            Token::Str(s) => Ok(Expr::Literal(Literal::String(s))),
            Token::Ident(name) => {
                if self.eat(&Token::LParen) {
                    let args = self.args()?;
                    Ok(Expr::Call {
                        receiver: None,
                        function: name,
                        args,
                    })
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.expr()?);
                        if self.eat(&Token::Comma) {
                            continue;
                        }
                        self.expect(&Token::RBracket)?;
                        break;
                    }
                }
                Ok(Expr::List(items))
            }
            other => Err(syntax(offset, format!("unexpected {}", other.describe()))),
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

/// Parses expression source into a syntax tree.
pub fn parse(source: &str) -> Result<Expr, CompileError> {
    if source.len() > MAX_EXPRESSION_LEN {
        return Err(CompileError::TooLong {
            max_length: MAX_EXPRESSION_LEN,
        });
    }
    if source.trim().is_empty() {
        return Err(syntax(0, "expression is empty"));
    }

    let mut parser = Parser {
        tokens: tokenize(source)?,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expr()?;
    if parser.peek() != &Token::Eof {
        return Err(syntax(
            parser.offset(),
            format!("unexpected {} after expression", parser.peek().describe()),
        ));
    }
    Ok(expr)
}
