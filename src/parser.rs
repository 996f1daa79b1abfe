//! Recursive descent parser for the subject language.

use std::rc::Rc;

use thiserror::Error;

use crate::ast::{
    BinOp, Expr, ExprKind, Literal, LogicalOp, Program, Span, Stmt, StmtKind, SwitchCase, UnaryOp,
};
use crate::lexer::{SpannedToken, Token};

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("unexpected token: expected {expected}, found {found:?}")]
    UnexpectedToken {
        expected: String,
        found: Token,
        span: Span,
    },
    #[error("unexpected end of file")]
    UnexpectedEof { expected: String, last_span: Span },
    #[error("invalid assignment target")]
    InvalidAssignTarget { span: Span },
}

impl ParseError {
    pub fn span(&self) -> &Span {
        match self {
            ParseError::UnexpectedToken { span, .. } => span,
            ParseError::UnexpectedEof { last_span, .. } => last_span,
            ParseError::InvalidAssignTarget { span } => span,
        }
    }
}

pub struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<SpannedToken>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut body = Vec::new();
        while !self.is_at_end() {
            body.push(self.parse_stmt()?);
        }
        Ok(Program { body })
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn peek_ahead(&self, n: usize) -> &Token {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].token
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span.clone()
    }

    fn previous_span(&self) -> Span {
        self.tokens[self.pos.saturating_sub(1)].span.clone()
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos.min(self.tokens.len() - 1)].token.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    /// Consume the token if it matches; report whether it did.
    fn match_token(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, token: Token, expected: &str) -> Result<(), ParseError> {
        if self.check(&token) {
            self.advance();
            Ok(())
        } else if self.is_at_end() {
            Err(ParseError::UnexpectedEof {
                expected: expected.to_string(),
                last_span: self.current_span(),
            })
        } else {
            Err(ParseError::UnexpectedToken {
                expected: expected.to_string(),
                found: self.peek().clone(),
                span: self.current_span(),
            })
        }
    }

    fn parse_ident(&mut self, expected: &str) -> Result<String, ParseError> {
        match self.peek().clone() {
            Token::Ident(name) => {
                self.advance();
                Ok(name)
            }
            found => Err(ParseError::UnexpectedToken {
                expected: expected.to_string(),
                found,
                span: self.current_span(),
            }),
        }
    }

    /// Statement terminator, with a little slack: a closing brace or end of
    /// input also ends a statement.
    fn expect_semi(&mut self) -> Result<(), ParseError> {
        if self.match_token(&Token::Semicolon) {
            return Ok(());
        }
        if self.check(&Token::RBrace) || self.is_at_end() {
            return Ok(());
        }
        self.consume(Token::Semicolon, "`;`")
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        let start = self.current_span();
        match self.peek() {
            Token::Semicolon => {
                self.advance();
                Ok(Stmt::new(StmtKind::Empty, start))
            }
            Token::LBrace => self.parse_block(),
            Token::Let => self.parse_let(),
            Token::If => self.parse_if(),
            Token::While => self.parse_while(),
            Token::Switch => self.parse_switch(),
            Token::Try => self.parse_try(),
            Token::Return => {
                self.advance();
                let arg = if self.check(&Token::Semicolon)
                    || self.check(&Token::RBrace)
                    || self.is_at_end()
                {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect_semi()?;
                Ok(Stmt::new(
                    StmtKind::Return(arg),
                    start.merge(&self.previous_span()),
                ))
            }
            Token::Break => {
                self.advance();
                let label = self.parse_optional_label();
                self.expect_semi()?;
                Ok(Stmt::new(
                    StmtKind::Break(label),
                    start.merge(&self.previous_span()),
                ))
            }
            Token::Continue => {
                self.advance();
                let label = self.parse_optional_label();
                self.expect_semi()?;
                Ok(Stmt::new(
                    StmtKind::Continue(label),
                    start.merge(&self.previous_span()),
                ))
            }
            Token::Throw => {
                self.advance();
                let arg = self.parse_expr()?;
                self.expect_semi()?;
                Ok(Stmt::new(
                    StmtKind::Throw(arg),
                    start.merge(&self.previous_span()),
                ))
            }
            // `name:` introduces a label.
            Token::Ident(_) if matches!(self.peek_ahead(1), Token::Colon) => {
                let label = self.parse_ident("a label")?;
                self.consume(Token::Colon, "`:`")?;
                let body = self.parse_stmt()?;
                let span = start.merge(&body.span);
                Ok(Stmt::new(
                    StmtKind::Labeled {
                        label,
                        body: Rc::new(body),
                    },
                    span,
                ))
            }
            _ => {
                let expr = self.parse_expr()?;
                self.expect_semi()?;
                let span = start.merge(&self.previous_span());
                Ok(Stmt::new(StmtKind::Expression(expr), span))
            }
        }
    }

    fn parse_optional_label(&mut self) -> Option<String> {
        match self.peek().clone() {
            Token::Ident(name) => {
                self.advance();
                Some(name)
            }
            _ => None,
        }
    }

    fn parse_block(&mut self) -> Result<Stmt, ParseError> {
        let start = self.current_span();
        self.consume(Token::LBrace, "`{`")?;
        let mut body = Vec::new();
        while !self.check(&Token::RBrace) && !self.is_at_end() {
            body.push(self.parse_stmt()?);
        }
        self.consume(Token::RBrace, "`}`")?;
        Ok(Stmt::new(
            StmtKind::Block(body),
            start.merge(&self.previous_span()),
        ))
    }

    fn parse_let(&mut self) -> Result<Stmt, ParseError> {
        let start = self.current_span();
        self.consume(Token::Let, "`let`")?;
        let name = self.parse_ident("a variable name")?;
        let init = if self.match_token(&Token::Eq) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect_semi()?;
        Ok(Stmt::new(
            StmtKind::Let { name, init },
            start.merge(&self.previous_span()),
        ))
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let start = self.current_span();
        self.consume(Token::If, "`if`")?;
        self.consume(Token::LParen, "`(`")?;
        let test = self.parse_expr()?;
        self.consume(Token::RParen, "`)`")?;
        let consequent = self.parse_stmt()?;
        let alternate = if self.match_token(&Token::Else) {
            Some(Rc::new(self.parse_stmt()?))
        } else {
            None
        };
        let end = alternate
            .as_ref()
            .map(|a| a.span.clone())
            .unwrap_or_else(|| consequent.span.clone());
        Ok(Stmt::new(
            StmtKind::If {
                test,
                consequent: Rc::new(consequent),
                alternate,
            },
            start.merge(&end),
        ))
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        let start = self.current_span();
        self.consume(Token::While, "`while`")?;
        self.consume(Token::LParen, "`(`")?;
        let test = self.parse_expr()?;
        self.consume(Token::RParen, "`)`")?;
        let body = self.parse_stmt()?;
        let span = start.merge(&body.span);
        Ok(Stmt::new(
            StmtKind::While {
                test,
                body: Rc::new(body),
            },
            span,
        ))
    }

    fn parse_switch(&mut self) -> Result<Stmt, ParseError> {
        let start = self.current_span();
        self.consume(Token::Switch, "`switch`")?;
        self.consume(Token::LParen, "`(`")?;
        let discriminant = self.parse_expr()?;
        self.consume(Token::RParen, "`)`")?;
        self.consume(Token::LBrace, "`{`")?;

        let mut cases = Vec::new();
        while !self.check(&Token::RBrace) && !self.is_at_end() {
            let test = if self.match_token(&Token::Case) {
                let test = self.parse_expr()?;
                self.consume(Token::Colon, "`:`")?;
                Some(test)
            } else {
                self.consume(Token::Default, "`case` or `default`")?;
                self.consume(Token::Colon, "`:`")?;
                None
            };
            let mut body = Vec::new();
            while !self.check(&Token::Case)
                && !self.check(&Token::Default)
                && !self.check(&Token::RBrace)
                && !self.is_at_end()
            {
                body.push(self.parse_stmt()?);
            }
            cases.push(SwitchCase { test, body });
        }
        self.consume(Token::RBrace, "`}`")?;
        Ok(Stmt::new(
            StmtKind::Switch {
                discriminant,
                cases,
            },
            start.merge(&self.previous_span()),
        ))
    }

    fn parse_try(&mut self) -> Result<Stmt, ParseError> {
        let start = self.current_span();
        self.consume(Token::Try, "`try`")?;
        let block = self.parse_block()?;
        self.consume(Token::Catch, "`catch`")?;
        self.consume(Token::LParen, "`(`")?;
        let param = self.parse_ident("a catch parameter")?;
        self.consume(Token::RParen, "`)`")?;
        let handler = self.parse_block()?;
        Ok(Stmt::new(
            StmtKind::Try {
                block: Rc::new(block),
                param,
                handler: Rc::new(handler),
            },
            start.merge(&self.previous_span()),
        ))
    }

    // ------------------------------------------------------------------
    // Expressions (precedence climbing)
    // ------------------------------------------------------------------

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, ParseError> {
        let target = self.parse_conditional()?;
        if self.check(&Token::Eq) {
            if !matches!(target.node, ExprKind::Var(_) | ExprKind::Member { .. }) {
                return Err(ParseError::InvalidAssignTarget {
                    span: target.span.clone(),
                });
            }
            self.advance();
            // Right-associative.
            let value = self.parse_assignment()?;
            let span = target.span.merge(&value.span);
            return Ok(Expr::new(
                ExprKind::Assign {
                    target: Rc::new(target),
                    value: Rc::new(value),
                },
                span,
            ));
        }
        Ok(target)
    }

    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        let cond = self.parse_logical_or()?;
        if self.match_token(&Token::Question) {
            let consequent = self.parse_assignment()?;
            self.consume(Token::Colon, "`:`")?;
            let alternate = self.parse_assignment()?;
            let span = cond.span.merge(&alternate.span);
            return Ok(Expr::new(
                ExprKind::Conditional {
                    cond: Rc::new(cond),
                    consequent: Rc::new(consequent),
                    alternate: Rc::new(alternate),
                },
                span,
            ));
        }
        Ok(cond)
    }

    fn parse_logical_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_logical_and()?;
        while self.match_token(&Token::OrOr) {
            let right = self.parse_logical_and()?;
            let span = left.span.merge(&right.span);
            left = Expr::new(
                ExprKind::Logical {
                    op: LogicalOp::Or,
                    left: Rc::new(left),
                    right: Rc::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn parse_logical_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_equality()?;
        while self.match_token(&Token::AndAnd) {
            let right = self.parse_equality()?;
            let span = left.span.merge(&right.span);
            left = Expr::new(
                ExprKind::Logical {
                    op: LogicalOp::And,
                    left: Rc::new(left),
                    right: Rc::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Token::EqEqEq => BinOp::EqStrict,
                Token::NeqEq => BinOp::NeqStrict,
                Token::EqEq => BinOp::EqLoose,
                Token::Neq => BinOp::NeqLoose,
                _ => break,
            };
            self.advance();
            let right = self.parse_relational()?;
            let span = left.span.merge(&right.span);
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Rc::new(left),
                    right: Rc::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinOp::Lt,
                Token::Lte => BinOp::Lte,
                Token::Gt => BinOp::Gt,
                Token::Gte => BinOp::Gte,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            let span = left.span.merge(&right.span);
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Rc::new(left),
                    right: Rc::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            let span = left.span.merge(&right.span);
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Rc::new(left),
                    right: Rc::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Rem,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            let span = left.span.merge(&right.span);
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Rc::new(left),
                    right: Rc::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let start = self.current_span();
        let op = match self.peek() {
            Token::Not => Some(UnaryOp::Not),
            Token::Minus => Some(UnaryOp::Neg),
            Token::TypeOf => Some(UnaryOp::TypeOf),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            let span = start.merge(&operand.span);
            return Ok(Expr::new(
                ExprKind::Unary {
                    op,
                    operand: Rc::new(operand),
                },
                span,
            ));
        }
        self.parse_postfix()
    }

    /// Member access, computed access, and calls, all left-associative.
    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.match_token(&Token::Dot) {
                let prop_span = self.current_span();
                let name = self.parse_ident("a property name")?;
                let span = expr.span.merge(&self.previous_span());
                expr = Expr::new(
                    ExprKind::Member {
                        object: Rc::new(expr),
                        property: Rc::new(Expr::new(
                            ExprKind::Lit(Literal::Str(name)),
                            prop_span,
                        )),
                        dot: true,
                    },
                    span,
                );
            } else if self.match_token(&Token::LBracket) {
                let property = self.parse_expr()?;
                self.consume(Token::RBracket, "`]`")?;
                let span = expr.span.merge(&self.previous_span());
                expr = Expr::new(
                    ExprKind::Member {
                        object: Rc::new(expr),
                        property: Rc::new(property),
                        dot: false,
                    },
                    span,
                );
            } else if self.match_token(&Token::LParen) {
                let mut args = Vec::new();
                if !self.check(&Token::RParen) {
                    loop {
                        args.push(self.parse_expr()?);
                        if !self.match_token(&Token::Comma) {
                            break;
                        }
                    }
                }
                self.consume(Token::RParen, "`)`")?;
                let span = expr.span.merge(&self.previous_span());
                expr = Expr::new(
                    ExprKind::Call {
                        callee: Rc::new(expr),
                        args,
                    },
                    span,
                );
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let span = self.current_span();
        match self.peek().clone() {
            Token::Number(n) => {
                self.advance();
                Ok(Expr::new(ExprKind::Lit(Literal::Number(n)), span))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::new(ExprKind::Lit(Literal::Str(s)), span))
            }
            Token::True => {
                self.advance();
                Ok(Expr::new(ExprKind::Lit(Literal::Bool(true)), span))
            }
            Token::False => {
                self.advance();
                Ok(Expr::new(ExprKind::Lit(Literal::Bool(false)), span))
            }
            Token::Null => {
                self.advance();
                Ok(Expr::new(ExprKind::Lit(Literal::Null), span))
            }
            Token::Undefined => {
                self.advance();
                Ok(Expr::new(ExprKind::Lit(Literal::Undefined), span))
            }
            Token::Ident(name) => {
                self.advance();
                Ok(Expr::new(ExprKind::Var(name), span))
            }
            Token::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.consume(Token::RParen, "`)`")?;
                Ok(expr)
            }
            Token::LBrace => self.parse_object_literal(),
            found => {
                if self.is_at_end() {
                    Err(ParseError::UnexpectedEof {
                        expected: "an expression".to_string(),
                        last_span: span,
                    })
                } else {
                    Err(ParseError::UnexpectedToken {
                        expected: "an expression".to_string(),
                        found,
                        span,
                    })
                }
            }
        }
    }

    fn parse_object_literal(&mut self) -> Result<Expr, ParseError> {
        let start = self.current_span();
        self.consume(Token::LBrace, "`{`")?;
        let mut entries = Vec::new();
        if !self.check(&Token::RBrace) {
            loop {
                let key = match self.peek().clone() {
                    Token::Ident(name) => {
                        self.advance();
                        name
                    }
                    Token::Str(s) => {
                        self.advance();
                        s
                    }
                    found => {
                        return Err(ParseError::UnexpectedToken {
                            expected: "a property key".to_string(),
                            found,
                            span: self.current_span(),
                        })
                    }
                };
                self.consume(Token::Colon, "`:`")?;
                let value = self.parse_expr()?;
                entries.push((key, value));
                if !self.match_token(&Token::Comma) {
                    break;
                }
                // Trailing comma.
                if self.check(&Token::RBrace) {
                    break;
                }
            }
        }
        self.consume(Token::RBrace, "`}`")?;
        Ok(Expr::new(
            ExprKind::ObjectLit(entries),
            start.merge(&self.previous_span()),
        ))
    }
}

/// Lex and parse a complete program.
pub fn parse_source(source: &str) -> Result<Program, crate::SourceError> {
    let tokens = crate::lexer::Lexer::new(source).tokenize()?;
    let mut parser = Parser::new(tokens);
    Ok(parser.parse_program()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(input: &str) -> Program {
        let tokens = Lexer::new(input).tokenize().unwrap();
        Parser::new(tokens).parse_program().unwrap()
    }

    fn parse_err(input: &str) -> ParseError {
        let tokens = Lexer::new(input).tokenize().unwrap();
        Parser::new(tokens).parse_program().unwrap_err()
    }

    #[test]
    fn test_let_and_expression() {
        let p = parse("let x = 1 + 2 * 3;");
        assert_eq!(p.body.len(), 1);
        let StmtKind::Let { name, init } = &p.body[0].node else {
            panic!("expected let");
        };
        assert_eq!(name, "x");
        // Multiplication binds tighter than addition.
        let ExprKind::Binary { op: BinOp::Add, right, .. } = &init.as_ref().unwrap().node else {
            panic!("expected addition at the top");
        };
        assert!(matches!(right.node, ExprKind::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn test_if_else_chain() {
        let p = parse("if (a) { b; } else if (c) { d; }");
        let StmtKind::If { alternate, .. } = &p.body[0].node else {
            panic!("expected if");
        };
        assert!(matches!(
            alternate.as_ref().unwrap().node,
            StmtKind::If { .. }
        ));
    }

    #[test]
    fn test_assignment_is_right_associative() {
        let p = parse("a = b = 1;");
        let StmtKind::Expression(e) = &p.body[0].node else {
            panic!("expected expression statement");
        };
        let ExprKind::Assign { value, .. } = &e.node else {
            panic!("expected assignment");
        };
        assert!(matches!(value.node, ExprKind::Assign { .. }));
    }

    #[test]
    fn test_invalid_assignment_target() {
        let err = parse_err("1 = 2;");
        assert!(matches!(err, ParseError::InvalidAssignTarget { .. }));
    }

    #[test]
    fn test_member_and_call_chain() {
        let p = parse("o.a[b](1, 2);");
        let StmtKind::Expression(e) = &p.body[0].node else {
            panic!("expected expression statement");
        };
        let ExprKind::Call { callee, args } = &e.node else {
            panic!("expected call");
        };
        assert_eq!(args.len(), 2);
        let ExprKind::Member { dot, .. } = &callee.node else {
            panic!("expected member callee");
        };
        assert!(!dot);
    }

    #[test]
    fn test_object_literal_vs_block() {
        let p = parse("let o = { a: 1, b: 2 }; { o; }");
        assert!(matches!(p.body[0].node, StmtKind::Let { .. }));
        assert!(matches!(p.body[1].node, StmtKind::Block(_)));
        let StmtKind::Let { init, .. } = &p.body[0].node else {
            unreachable!()
        };
        let ExprKind::ObjectLit(entries) = &init.as_ref().unwrap().node else {
            panic!("expected object literal");
        };
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_switch_cases() {
        let p = parse("switch (x) { case 1: a; break; default: b; }");
        let StmtKind::Switch { cases, .. } = &p.body[0].node else {
            panic!("expected switch");
        };
        assert_eq!(cases.len(), 2);
        assert!(cases[0].test.is_some());
        assert!(cases[1].test.is_none());
        assert_eq!(cases[0].body.len(), 2);
    }

    #[test]
    fn test_try_catch() {
        let p = parse("try { risky(); } catch (e) { handle(e); }");
        let StmtKind::Try { param, .. } = &p.body[0].node else {
            panic!("expected try");
        };
        assert_eq!(param, "e");
    }

    #[test]
    fn test_labeled_loop() {
        let p = parse("outer: while (a) { break outer; }");
        let StmtKind::Labeled { label, body } = &p.body[0].node else {
            panic!("expected labeled statement");
        };
        assert_eq!(label, "outer");
        assert!(matches!(body.node, StmtKind::While { .. }));
    }

    #[test]
    fn test_ternary_and_logical() {
        let p = parse("let r = a && b ? c : d || e;");
        let StmtKind::Let { init, .. } = &p.body[0].node else {
            panic!("expected let");
        };
        let ExprKind::Conditional { cond, alternate, .. } = &init.as_ref().unwrap().node else {
            panic!("expected ternary");
        };
        assert!(matches!(cond.node, ExprKind::Logical { op: LogicalOp::And, .. }));
        assert!(matches!(alternate.node, ExprKind::Logical { op: LogicalOp::Or, .. }));
    }

    #[test]
    fn test_spans_cover_statements() {
        let src = "let abc = 1;";
        let p = parse(src);
        let span = &p.body[0].span;
        assert_eq!(span.start, 0);
        assert!(span.end >= src.len() - 1);
    }
}
