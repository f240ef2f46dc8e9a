//! Recursive-descent parser producing a flat statement list.

use chisel_core::errors::{ChiselError, ChiselResult};

use crate::token::{tokenize, Spanned, Token};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    None,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Expr>),
    Var(String),
    Attr(Box<Expr>, String),
    Call(Box<Expr>, Vec<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Stmt {
    Assign(String, Expr),
    Expr(Expr),
}

/// A statement plus its source line.
#[derive(Debug, Clone)]
pub(crate) struct SpannedStmt {
    pub stmt: Stmt,
    pub line: usize,
}

pub(crate) fn parse(source: &str) -> ChiselResult<Vec<SpannedStmt>> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut stmts = Vec::new();
    while !parser.at_end() {
        if parser.eat(&Token::Newline) {
            continue;
        }
        let line = parser.line();
        let stmt = parser.statement()?;
        parser.expect_newline()?;
        stmts.push(SpannedStmt { stmt, line });
    }
    Ok(stmts)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|t| t.line)
            .unwrap_or_else(|| self.tokens.last().map(|t| t.line).unwrap_or(1))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|t| t.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn fail<T>(&self, msg: impl Into<String>) -> ChiselResult<T> {
        Err(ChiselError::mutation(format!(
            "script line {}: {}",
            self.line(),
            msg.into()
        )))
    }

    fn expect(&mut self, token: &Token, what: &str) -> ChiselResult<()> {
        if self.eat(token) {
            Ok(())
        } else {
            self.fail(format!("expected {what}"))
        }
    }

    fn expect_newline(&mut self) -> ChiselResult<()> {
        if self.at_end() || self.eat(&Token::Newline) {
            Ok(())
        } else {
            self.fail("expected end of statement")
        }
    }

    fn statement(&mut self) -> ChiselResult<Stmt> {
        let is_assign = matches!(self.peek(), Some(Token::Ident(_)))
            && self.tokens.get(self.pos + 1).map(|t| &t.token) == Some(&Token::Assign);
        if is_assign {
            let name = match self.advance() {
                Some(Token::Ident(name)) => name,
                _ => unreachable!("checked above"),
            };
            self.pos += 1; // consume '='
            let value = self.expression()?;
            return Ok(Stmt::Assign(name, value));
        }
        Ok(Stmt::Expr(self.expression()?))
    }

    fn expression(&mut self) -> ChiselResult<Expr> {
        let left = self.additive()?;
        let op = match self.peek() {
            Some(Token::Eq) => Some(BinOp::Eq),
            Some(Token::Ne) => Some(BinOp::Ne),
            Some(Token::Lt) => Some(BinOp::Lt),
            Some(Token::Le) => Some(BinOp::Le),
            Some(Token::Gt) => Some(BinOp::Gt),
            Some(Token::Ge) => Some(BinOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let right = self.additive()?;
            return Ok(Expr::Binary(op, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn additive(&mut self) -> ChiselResult<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> ChiselResult<Expr> {
        if self.eat(&Token::Minus) {
            let inner = self.unary()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> ChiselResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let name = match self.advance() {
                    Some(Token::Ident(name)) => name,
                    _ => return self.fail("expected attribute name after '.'"),
                };
                expr = Expr::Attr(Box::new(expr), name);
            } else if self.eat(&Token::LeftParen) {
                let mut args = Vec::new();
                if !self.eat(&Token::RightParen) {
                    loop {
                        args.push(self.expression()?);
                        if self.eat(&Token::Comma) {
                            continue;
                        }
                        self.expect(&Token::RightParen, "')'")?;
                        break;
                    }
                }
                expr = Expr::Call(Box::new(expr), args);
            } else if self.eat(&Token::LeftBracket) {
                let index = self.expression()?;
                self.expect(&Token::RightBracket, "']'")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> ChiselResult<Expr> {
        let line = self.line();
        match self.advance() {
            Some(Token::Int(value)) => Ok(Expr::Int(value)),
            Some(Token::Str(text)) => Ok(Expr::Str(text)),
            Some(Token::Ident(name)) => match name.as_str() {
                "None" => Ok(Expr::None),
                "True" => Ok(Expr::Bool(true)),
                "False" => Ok(Expr::Bool(false)),
                _ => Ok(Expr::Var(name)),
            },
            Some(Token::LeftParen) => {
                let inner = self.expression()?;
                self.expect(&Token::RightParen, "')'")?;
                Ok(inner)
            }
            Some(Token::LeftBracket) => {
                let mut items = Vec::new();
                if !self.eat(&Token::RightBracket) {
                    loop {
                        items.push(self.expression()?);
                        if self.eat(&Token::Comma) {
                            if self.eat(&Token::RightBracket) {
                                break;
                            }
                            continue;
                        }
                        self.expect(&Token::RightBracket, "']'")?;
                        break;
                    }
                }
                Ok(Expr::List(items))
            }
            other => Err(ChiselError::mutation(format!(
                "script line {line}: unexpected token {other:?}"
            ))),
        }
    }
}
