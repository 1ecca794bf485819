use std::iter::Peekable;
use std::str::CharIndices;

use super::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    /// `$`, the root symbol.
    Dollar,
    /// `{{ path }}`, a path reference relative to the root.
    PathRef(String),
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
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
    Not,
    Minus,
}

/// A token and the byte offset it starts at.
pub(crate) type Spanned = (usize, Token);

pub(crate) fn tokenize(src: &str) -> Result<Vec<Spanned>, ExprError> {
    let mut lexer = Lexer {
        src,
        chars: src.char_indices().peekable(),
    };
    let mut tokens = Vec::new();
    while let Some(tok) = lexer.next_token()? {
        tokens.push(tok);
    }
    Ok(tokens)
}

struct Lexer<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn next_token(&mut self) -> Result<Option<Spanned>, ExprError> {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}

        let Some((pos, c)) = self.chars.next() else {
            return Ok(None);
        };

        let tok = match c {
            '$' => Token::Dollar,
            '.' => Token::Dot,
            ',' => Token::Comma,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '-' => Token::Minus,
            '=' => {
                self.expect('=', pos)?;
                if self.eat('=') {
                    Token::StrictEq
                } else {
                    Token::Eq
                }
            }
            '!' => {
                if self.eat('=') {
                    if self.eat('=') {
                        Token::StrictNotEq
                    } else {
                        Token::NotEq
                    }
                } else {
                    Token::Not
                }
            }
            '<' => {
                if self.eat('=') {
                    Token::Le
                } else {
                    Token::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            '&' => {
                self.expect('&', pos)?;
                Token::And
            }
            '|' => {
                self.expect('|', pos)?;
                Token::Or
            }
            '{' => {
                self.expect('{', pos)?;
                self.path_ref(pos)?
            }
            '\'' | '"' => self.string(c, pos)?,
            c if c.is_ascii_digit() => self.number(pos)?,
            c if is_ident_start(c) => self.ident(pos, c),
            other => {
                return Err(ExprError::parse(pos, format!("unexpected character '{}'", other)));
            }
        };

        Ok(Some((pos, tok)))
    }

    fn eat(&mut self, expected: char) -> bool {
        self.chars.next_if(|(_, c)| *c == expected).is_some()
    }

    fn expect(&mut self, expected: char, pos: usize) -> Result<(), ExprError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(ExprError::parse(pos, format!("expected '{}'", expected)))
        }
    }

    fn string(&mut self, quote: char, pos: usize) -> Result<Token, ExprError> {
        let mut out = String::new();
        loop {
            match self.chars.next() {
                None => return Err(ExprError::parse(pos, "unterminated string")),
                Some((_, c)) if c == quote => return Ok(Token::Str(out)),
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, c)) => out.push(c),
                    None => return Err(ExprError::parse(pos, "unterminated string")),
                },
                Some((_, c)) => out.push(c),
            }
        }
    }

    fn number(&mut self, start: usize) -> Result<Token, ExprError> {
        let mut end = start + 1;
        let mut seen_dot = false;
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                end = i + 1;
                self.chars.next();
            } else if c == '.' && !seen_dot && self.digit_follows(i) {
                seen_dot = true;
                end = i + 1;
                self.chars.next();
            } else {
                break;
            }
        }
        self.src[start..end]
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|e| ExprError::parse(start, e.to_string()))
    }

    fn digit_follows(&self, dot: usize) -> bool {
        self.src[dot + 1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit())
    }

    fn ident(&mut self, start: usize, first: char) -> Token {
        let mut end = start + first.len_utf8();
        while let Some(&(i, c)) = self.chars.peek() {
            if is_ident_continue(c) {
                end = i + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        Token::Ident(self.src[start..end].to_string())
    }

    fn path_ref(&mut self, pos: usize) -> Result<Token, ExprError> {
        let mut inner = String::new();
        loop {
            match self.chars.next() {
                None => return Err(ExprError::parse(pos, "unterminated '{{'")),
                Some((_, '}')) => {
                    self.expect('}', pos)?;
                    return Ok(Token::PathRef(inner.trim().to_string()));
                }
                Some((_, c)) => inner.push(c),
            }
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|(_, t)| t).collect()
    }

    #[test]
    fn tokenizes_comparison_chain() {
        assert_eq!(
            kinds("$.rows && $.rows.length > 0"),
            vec![
                Token::Dollar,
                Token::Dot,
                Token::Ident("rows".into()),
                Token::And,
                Token::Dollar,
                Token::Dot,
                Token::Ident("rows".into()),
                Token::Dot,
                Token::Ident("length".into()),
                Token::Gt,
                Token::Number(0.0),
            ]
        );
    }

    #[test]
    fn tokenizes_strings_and_refs() {
        assert_eq!(
            kinds(r#"{{ lead.priority }} === 'high' || x != "it\'s""#),
            vec![
                Token::PathRef("lead.priority".into()),
                Token::StrictEq,
                Token::Str("high".into()),
                Token::Or,
                Token::Ident("x".into()),
                Token::NotEq,
                Token::Str("it's".into()),
            ]
        );
    }

    #[test]
    fn number_then_member() {
        assert_eq!(kinds("1.5"), vec![Token::Number(1.5)]);
        assert_eq!(
            kinds("a[0].b"),
            vec![
                Token::Ident("a".into()),
                Token::LBracket,
                Token::Number(0.0),
                Token::RBracket,
                Token::Dot,
                Token::Ident("b".into()),
            ]
        );
    }

    #[test]
    fn tokenizes_multibyte_identifiers() {
        assert_eq!(
            kinds("é == 1"),
            vec![Token::Ident("é".into()), Token::Eq, Token::Number(1.0)]
        );
        assert_eq!(kinds("é"), vec![Token::Ident("é".into())]);
        assert_eq!(
            kinds("名前.é"),
            vec![
                Token::Ident("名前".into()),
                Token::Dot,
                Token::Ident("é".into()),
            ]
        );
    }

    #[test]
    fn rejects_unknown_characters() {
        assert!(tokenize("a = b").is_err());
        assert!(tokenize("a & b").is_err());
        assert!(tokenize("'open").is_err());
        assert!(tokenize("a + b").is_err());
        assert!(tokenize("{{ a").is_err());
    }
}
