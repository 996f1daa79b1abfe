//! Handwritten lexer for the subject language.

use crate::ast::Span;
use std::iter::Peekable;
use std::str::Chars;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Number(f64),
    Str(String),
    True,
    False,
    Null,
    Undefined,

    // Identifiers
    Ident(String),

    // Keywords
    Let,
    If,
    Else,
    While,
    Switch,
    Case,
    Default,
    Return,
    Break,
    Continue,
    Throw,
    Try,
    Catch,
    TypeOf,

    // Delimiters
    LParen,   // (
    RParen,   // )
    LBrace,   // {
    RBrace,   // }
    LBracket, // [
    RBracket, // ]
    Comma,    // ,
    Semicolon, // ;
    Colon,    // :
    Dot,      // .
    Question, // ?

    // Operators
    Eq,        // =
    EqEq,      // ==
    EqEqEq,    // ===
    Neq,       // !=
    NeqEq,     // !==
    Lt,        // <
    Gt,        // >
    Lte,       // <=
    Gte,       // >=
    Plus,      // +
    Minus,     // -
    Star,      // *
    Slash,     // /
    Percent,   // %
    Not,       // !
    AndAnd,    // &&
    OrOr,      // ||

    // Special
    Eof,
}

#[derive(Debug, Clone)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

#[derive(Error, Debug)]
pub enum LexError {
    #[error("unexpected character: {0}")]
    UnexpectedChar(char, Span),
    #[error("unterminated string")]
    UnterminatedString(Span),
    #[error("invalid escape sequence: \\{0}")]
    InvalidEscape(char, Span),
    #[error("invalid number: {0}")]
    InvalidNumber(String, Span),
    #[error("unterminated block comment")]
    UnterminatedComment(Span),
}

impl LexError {
    /// Get the source span where this error occurred
    pub fn span(&self) -> &Span {
        match self {
            LexError::UnexpectedChar(_, span) => span,
            LexError::UnterminatedString(span) => span,
            LexError::InvalidEscape(_, span) => span,
            LexError::InvalidNumber(_, span) => span,
            LexError::UnterminatedComment(span) => span,
        }
    }
}

pub struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            pos: 0,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<SpannedToken>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.token == Token::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.advance() {
            if c == '\n' {
                break;
            }
        }
    }

    fn skip_block_comment(&mut self, start: usize) -> Result<(), LexError> {
        loop {
            match self.advance() {
                Some('*') if self.peek() == Some('/') => {
                    self.advance();
                    return Ok(());
                }
                Some(_) => {}
                None => return Err(LexError::UnterminatedComment(Span::new(start, self.pos))),
            }
        }
    }

    fn next_token(&mut self) -> Result<SpannedToken, LexError> {
        loop {
            self.skip_whitespace();
            if self.peek() != Some('/') {
                break;
            }
            let start = self.pos;
            self.advance();
            if self.eat('/') {
                self.skip_line_comment();
            } else if self.eat('*') {
                self.skip_block_comment(start)?;
            } else {
                // A lone slash is the division operator.
                return Ok(SpannedToken {
                    token: Token::Slash,
                    span: Span::new(start, self.pos),
                });
            }
        }

        let start = self.pos;

        let Some(c) = self.advance() else {
            return Ok(SpannedToken {
                token: Token::Eof,
                span: Span::new(start, start),
            });
        };

        let token = match c {
            '(' => Token::LParen,
            ')' => Token::RParen,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            ',' => Token::Comma,
            ';' => Token::Semicolon,
            ':' => Token::Colon,
            '.' => Token::Dot,
            '?' => Token::Question,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '%' => Token::Percent,

            '=' => {
                if self.eat('=') {
                    if self.eat('=') {
                        Token::EqEqEq
                    } else {
                        Token::EqEq
                    }
                } else {
                    Token::Eq
                }
            }
            '!' => {
                if self.eat('=') {
                    if self.eat('=') {
                        Token::NeqEq
                    } else {
                        Token::Neq
                    }
                } else {
                    Token::Not
                }
            }
            '<' => {
                if self.eat('=') {
                    Token::Lte
                } else {
                    Token::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    Token::Gte
                } else {
                    Token::Gt
                }
            }
            '&' => {
                if self.eat('&') {
                    Token::AndAnd
                } else {
                    return Err(LexError::UnexpectedChar('&', Span::new(start, self.pos)));
                }
            }
            '|' => {
                if self.eat('|') {
                    Token::OrOr
                } else {
                    return Err(LexError::UnexpectedChar('|', Span::new(start, self.pos)));
                }
            }

            '"' | '\'' => self.lex_string(c, start)?,

            c if c.is_ascii_digit() => self.lex_number(c, start)?,

            c if c.is_alphabetic() || c == '_' || c == '$' => self.lex_ident(c),

            _ => return Err(LexError::UnexpectedChar(c, Span::new(start, self.pos))),
        };

        Ok(SpannedToken {
            token,
            span: Span::new(start, self.pos),
        })
    }

    fn lex_string(&mut self, quote: char, start: usize) -> Result<Token, LexError> {
        let mut s = String::new();
        loop {
            match self.advance() {
                Some(c) if c == quote => break,
                Some('\\') => {
                    let escaped = match self.advance() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('\\') => '\\',
                        Some('"') => '"',
                        Some('\'') => '\'',
                        Some('0') => '\0',
                        Some(c) => {
                            return Err(LexError::InvalidEscape(c, Span::new(start, self.pos)))
                        }
                        None => {
                            return Err(LexError::UnterminatedString(Span::new(start, self.pos)))
                        }
                    };
                    s.push(escaped);
                }
                Some('\n') | None => {
                    return Err(LexError::UnterminatedString(Span::new(start, self.pos)))
                }
                Some(c) => s.push(c),
            }
        }
        Ok(Token::Str(s))
    }

    fn lex_number(&mut self, first: char, start: usize) -> Result<Token, LexError> {
        let mut s = String::new();
        s.push(first);

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                s.push(c);
                self.advance();
            } else {
                break;
            }
        }

        if self.peek() == Some('.') {
            // Look ahead: `1.x` is a member access, `1.5` is a fraction.
            let mut chars = self.chars.clone();
            chars.next();
            if chars.peek().map_or(false, |c| c.is_ascii_digit()) {
                s.push('.');
                self.advance();
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        s.push(c);
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
        }

        if matches!(self.peek(), Some('e') | Some('E')) {
            let mut chars = self.chars.clone();
            chars.next();
            let next = chars.peek().copied();
            let digit_after_sign = matches!(next, Some('+') | Some('-')) && {
                chars.next();
                chars.peek().map_or(false, |c| c.is_ascii_digit())
            };
            if next.map_or(false, |c| c.is_ascii_digit()) || digit_after_sign {
                s.push('e');
                self.advance();
                if matches!(self.peek(), Some('+') | Some('-')) {
                    s.push(self.advance().unwrap());
                }
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        s.push(c);
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
        }

        let n: f64 = s
            .parse()
            .map_err(|_| LexError::InvalidNumber(s.clone(), Span::new(start, self.pos)))?;
        Ok(Token::Number(n))
    }

    fn lex_ident(&mut self, first: char) -> Token {
        let mut s = String::new();
        s.push(first);

        while let Some(c) = self.peek() {
            if is_ident_continue(c) {
                s.push(c);
                self.advance();
            } else {
                break;
            }
        }

        match s.as_str() {
            "let" => Token::Let,
            "if" => Token::If,
            "else" => Token::Else,
            "while" => Token::While,
            "switch" => Token::Switch,
            "case" => Token::Case,
            "default" => Token::Default,
            "return" => Token::Return,
            "break" => Token::Break,
            "continue" => Token::Continue,
            "throw" => Token::Throw,
            "try" => Token::Try,
            "catch" => Token::Catch,
            "typeof" => Token::TypeOf,
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            "undefined" => Token::Undefined,
            _ => Token::Ident(s),
        }
    }
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_basic() {
        assert_eq!(
            tokens("let x = 42;"),
            vec![
                Token::Let,
                Token::Ident("x".into()),
                Token::Eq,
                Token::Number(42.0),
                Token::Semicolon,
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_equality_family() {
        assert_eq!(
            tokens("a == b === c != d !== e"),
            vec![
                Token::Ident("a".into()),
                Token::EqEq,
                Token::Ident("b".into()),
                Token::EqEqEq,
                Token::Ident("c".into()),
                Token::Neq,
                Token::Ident("d".into()),
                Token::NeqEq,
                Token::Ident("e".into()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            tokens("x // comment\ny /* block */ z"),
            vec![
                Token::Ident("x".into()),
                Token::Ident("y".into()),
                Token::Ident("z".into()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_division_is_not_a_comment() {
        assert_eq!(
            tokens("a / b"),
            vec![
                Token::Ident("a".into()),
                Token::Slash,
                Token::Ident("b".into()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(tokens("1.5"), vec![Token::Number(1.5), Token::Eof]);
        assert_eq!(tokens("2e3"), vec![Token::Number(2000.0), Token::Eof]);
        // `1.x` lexes as a number followed by member access.
        assert_eq!(
            tokens("1.x"),
            vec![
                Token::Number(1.0),
                Token::Dot,
                Token::Ident("x".into()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_strings() {
        assert_eq!(tokens("\"hi\\n\""), vec![Token::Str("hi\n".into()), Token::Eof]);
        assert_eq!(tokens("'single'"), vec![Token::Str("single".into()), Token::Eof]);
    }

    #[test]
    fn test_keywords_vs_idents() {
        let toks = tokens("typeof undefined lettuce");
        assert_eq!(
            toks,
            vec![
                Token::TypeOf,
                Token::Undefined,
                Token::Ident("lettuce".into()),
                Token::Eof
            ]
        );
    }
}
