use serde_json::Value;

use super::lexer::{tokenize, Spanned, Token};
use super::ExprError;

/// Parsed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// The root symbol `$`.
    Root,
    /// A named binding, or a field of the root when no binding matches.
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    /// `len(x)`, the only callable.
    Len(Box<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    StrictEq,
    NotEq,
    StrictNotEq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

pub fn parse(src: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: src.len(),
    };
    let expr = parser.or()?;
    match parser.peek() {
        None => Ok(expr),
        Some(tok) => Err(parser.error(format!("unexpected {:?}", tok))),
    }
}

/// Parse a dotted path such as `lead.priority`, `$.rows.0` or `$` into an
/// expression rooted at `$`.
pub fn parse_path(path: &str) -> Expr {
    let trimmed = path.trim();
    let rest = trimmed
        .strip_prefix("$.")
        .or_else(|| trimmed.strip_prefix('$'))
        .unwrap_or(trimmed);
    rest.split('.')
        .filter(|part| !part.is_empty())
        .fold(Expr::Root, |acc, part| Expr::Member(Box::new(acc), part.to_string()))
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        tok
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Token) -> Result<(), ExprError> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(self.error(format!("expected {:?}", tok)))
        }
    }

    fn error(&self, message: impl Into<String>) -> ExprError {
        let at = self.tokens.get(self.pos).map(|(p, _)| *p).unwrap_or(self.end);
        ExprError::parse(at, message)
    }

    fn or(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.and()?;
        while self.eat(&Token::Or) {
            let rhs = self.and()?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.equality()?;
        while self.eat(&Token::And) {
            let rhs = self.equality()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinaryOp::Eq,
                Some(Token::StrictEq) => BinaryOp::StrictEq,
                Some(Token::NotEq) => BinaryOp::NotEq,
                Some(Token::StrictNotEq) => BinaryOp::StrictNotEq,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.comparison()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn comparison(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.eat(&Token::Minus) {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                match self.advance() {
                    Some(Token::Ident(name)) => expr = Expr::Member(Box::new(expr), name),
                    Some(Token::Number(n)) if n.fract() == 0.0 && n >= 0.0 => {
                        expr = Expr::Member(Box::new(expr), (n as u64).to_string())
                    }
                    _ => {
                        self.pos = self.pos.saturating_sub(1);
                        return Err(self.error("expected property name after '.'"));
                    }
                }
            } else if self.eat(&Token::LBracket) {
                let index = self.or()?;
                self.expect(Token::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Literal(number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Dollar) => Ok(Expr::Root),
            Some(Token::PathRef(path)) => Ok(parse_path(&path)),
            Some(Token::LParen) => {
                let inner = self.or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "undefined" => Ok(Expr::Literal(Value::Null)),
                "len" if self.peek() == Some(&Token::LParen) => {
                    self.pos += 1;
                    let arg = self.or()?;
                    self.expect(Token::RParen)?;
                    Ok(Expr::Len(Box::new(arg)))
                }
                _ if self.peek() == Some(&Token::LParen) => {
                    Err(self.error(format!("unknown function '{}'", name)))
                }
                _ => Ok(Expr::Ident(name)),
            },
            Some(tok) => {
                self.pos -= 1;
                Err(self.error(format!("unexpected {:?}", tok)))
            }
            None => Err(self.error("unexpected end of expression")),
        }
    }
}

fn number(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
