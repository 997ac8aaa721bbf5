//! A hand-rolled recursive-descent/precedence-climbing parser over the
//! token stream [`crate::frontend::lexer::Lexer`] produces, building
//! [`crate::ast::Expr`] trees directly (no separate untyped parse tree —
//! `spec.md` §1 already treats that as an external collaborator this crate
//! doesn't own).

use std::fmt;

use crate::ast::{BinaryOp, Expr, Literal, Param, Stmt, TypeExpr, UnaryOp};
use crate::frontend::lexer::{Location, Token, TokenKind};
use crate::types::{Evaluation, Primitive};

#[derive(Debug)]
pub struct ParseError {
    pub location: Location,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}: {}", self.location.line, self.location.column, self.message)
    }
}

impl std::error::Error for ParseError {}

pub type ParseResult<T> = Result<T, ParseError>;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn location(&self) -> Location {
        self.tokens[self.pos].location
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.tokens[self.pos].kind.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        kind
    }

    fn expect(&mut self, expected: &TokenKind) -> ParseResult<()> {
        if self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {expected:?}, found {:?}", self.peek())))
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError { location: self.location(), message: message.into() }
    }

    fn expect_ident(&mut self) -> ParseResult<String> {
        match self.advance() {
            TokenKind::Ident(name) => Ok(name),
            other => Err(self.error(format!("expected an identifier, found {other:?}"))),
        }
    }

    /// Parses one expression and requires it consume every remaining token
    /// (besides the trailing `Eof`).
    pub fn parse_expr_to_end(mut self) -> ParseResult<Expr> {
        let expr = self.parse_expr()?;
        if *self.peek() != TokenKind::Eof {
            return Err(self.error(format!("unexpected trailing token {:?}", self.peek())));
        }
        Ok(expr)
    }

    pub fn parse_expr(&mut self) -> ParseResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_and()?;
        while *self.peek() == TokenKind::OrOr {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary { op: BinaryOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_equality()?;
        while *self.peek() == TokenKind::AndAnd {
            self.advance();
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary { op: BinaryOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::Ne,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_relational()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Ge => BinaryOp::Ge,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        match self.peek() {
            TokenKind::Minus => {
                self.advance();
                Ok(Expr::Unary { op: UnaryOp::Neg, operand: Box::new(self.parse_unary()?) })
            }
            TokenKind::Bang => {
                self.advance();
                Ok(Expr::Unary { op: UnaryOp::Not, operand: Box::new(self.parse_unary()?) })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                TokenKind::Dot => {
                    self.advance();
                    let field = self.expect_ident()?;
                    expr = Expr::Member { base: Box::new(expr), field };
                }
                TokenKind::As => {
                    self.advance();
                    let ty = self.parse_type()?;
                    expr = Expr::Cast { expr: Box::new(expr), ty };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        match self.peek().clone() {
            TokenKind::Integer(v) => {
                self.advance();
                Ok(Expr::Literal(Literal::Integer(v)))
            }
            TokenKind::Float(v) => {
                self.advance();
                Ok(Expr::Literal(Literal::float(v)))
            }
            TokenKind::Char(c) => {
                self.advance();
                Ok(Expr::Literal(Literal::Char(c)))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(true)))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(false)))
            }
            TokenKind::LParen => {
                self.advance();
                if *self.peek() == TokenKind::RParen {
                    self.advance();
                    return Ok(Expr::Literal(Literal::Unit));
                }
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::LBrace => self.parse_block(),
            TokenKind::If => self.parse_if(),
            TokenKind::Switch => self.parse_switch(),
            TokenKind::Fn => self.parse_function_literal(),
            TokenKind::Ident(name) => {
                self.advance();
                if *self.peek() == TokenKind::LParen {
                    self.advance();
                    let mut args = Vec::new();
                    if *self.peek() != TokenKind::RParen {
                        loop {
                            args.push(self.parse_expr()?);
                            if *self.peek() == TokenKind::Comma {
                                self.advance();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(&TokenKind::RParen)?;
                    Ok(Expr::Call { callee: name, args })
                } else {
                    Ok(Expr::Identifier(name))
                }
            }
            other => Err(self.error(format!("unexpected token {other:?}"))),
        }
    }

    fn parse_if(&mut self) -> ParseResult<Expr> {
        self.expect(&TokenKind::If)?;
        let cond = self.parse_expr()?;
        let then_branch = self.parse_block()?;
        self.expect(&TokenKind::Else)?;
        let else_branch = if *self.peek() == TokenKind::If { self.parse_if()? } else { self.parse_block()? };
        Ok(Expr::If { cond: Box::new(cond), then_branch: Box::new(then_branch), else_branch: Box::new(else_branch) })
    }

    fn parse_switch(&mut self) -> ParseResult<Expr> {
        self.expect(&TokenKind::Switch)?;
        let scrutinee = self.parse_expr()?;
        self.expect(&TokenKind::LBrace)?;
        let mut arms = Vec::new();
        let mut default = None;
        loop {
            match self.peek().clone() {
                TokenKind::RBrace => break,
                TokenKind::Ident(name) if name == "default" => {
                    self.advance();
                    self.expect(&TokenKind::FatArrow)?;
                    default = Some(self.parse_expr()?);
                }
                _ => {
                    let pattern = self.parse_literal()?;
                    self.expect(&TokenKind::FatArrow)?;
                    let body = self.parse_expr()?;
                    arms.push((pattern, body));
                }
            }
            if *self.peek() == TokenKind::Comma {
                self.advance();
            }
        }
        self.expect(&TokenKind::RBrace)?;
        let default = default.ok_or_else(|| self.error("switch expression requires a default arm"))?;
        Ok(Expr::Switch { scrutinee: Box::new(scrutinee), arms, default: Box::new(default) })
    }

    fn parse_literal(&mut self) -> ParseResult<Literal> {
        match self.advance() {
            TokenKind::Integer(v) => Ok(Literal::Integer(v)),
            TokenKind::Float(v) => Ok(Literal::float(v)),
            TokenKind::Char(c) => Ok(Literal::Char(c)),
            TokenKind::True => Ok(Literal::Bool(true)),
            TokenKind::False => Ok(Literal::Bool(false)),
            other => Err(self.error(format!("expected a literal switch pattern, found {other:?}"))),
        }
    }

    fn parse_block(&mut self) -> ParseResult<Expr> {
        self.expect(&TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        let mut tail = Expr::Literal(Literal::Unit);
        loop {
            if *self.peek() == TokenKind::RBrace {
                break;
            }
            if *self.peek() == TokenKind::Let {
                stmts.push(self.parse_let()?);
                continue;
            }
            let expr = self.parse_expr()?;
            if *self.peek() == TokenKind::Eq {
                self.advance();
                let value = self.parse_expr()?;
                self.expect(&TokenKind::Semicolon)?;
                stmts.push(Stmt::Assign { target: expr, value });
                continue;
            }
            if *self.peek() == TokenKind::Semicolon {
                self.advance();
                stmts.push(Stmt::Expr(expr));
                continue;
            }
            tail = expr;
            break;
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(Expr::Block(stmts, Box::new(tail)))
    }

    fn parse_let(&mut self) -> ParseResult<Stmt> {
        self.expect(&TokenKind::Let)?;
        let name = self.expect_ident()?;
        let ty = if *self.peek() == TokenKind::Colon {
            self.advance();
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect(&TokenKind::Eq)?;
        let init = self.parse_expr()?;
        self.expect(&TokenKind::Semicolon)?;
        Ok(Stmt::Let { name, ty, init })
    }

    fn parse_function_literal(&mut self) -> ParseResult<Expr> {
        self.expect(&TokenKind::Fn)?;
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        if *self.peek() != TokenKind::RParen {
            loop {
                let name = self.expect_ident()?;
                self.expect(&TokenKind::Colon)?;
                let ty = self.parse_type()?;
                params.push(Param { name, ty });
                if *self.peek() == TokenKind::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        let return_ty = if *self.peek() == TokenKind::Arrow {
            self.advance();
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect(&TokenKind::FatArrow)?;
        let body = self.parse_expr()?;
        Ok(Expr::FunctionLiteral { params, return_ty, evaluation: Evaluation::PreferRuntime, body: Box::new(body) })
    }

    fn parse_type(&mut self) -> ParseResult<TypeExpr> {
        let name = self.expect_ident()?;
        let ctor = match name.as_str() {
            "ptr" => Some(0),
            "bufptr" => Some(1),
            "slice" => Some(2),
            "array" => Some(3),
            _ => None,
        };
        if let Some(tag) = ctor {
            self.expect(&TokenKind::LParen)?;
            let result = match tag {
                0 => TypeExpr::Pointer(Box::new(self.parse_type()?)),
                1 => TypeExpr::BufferPointer(Box::new(self.parse_type()?)),
                2 => TypeExpr::Slice(Box::new(self.parse_type()?)),
                _ => {
                    let length = match self.advance() {
                        TokenKind::Integer(v) if v >= 0 => v as u64,
                        other => return Err(self.error(format!("expected an array length, found {other:?}"))),
                    };
                    self.expect(&TokenKind::Comma)?;
                    let element = self.parse_type()?;
                    TypeExpr::Array(length, Box::new(element))
                }
            };
            self.expect(&TokenKind::RParen)?;
            return Ok(result);
        }
        match primitive_from_name(&name) {
            Some(p) => Ok(TypeExpr::Primitive(p)),
            None => Ok(TypeExpr::Param(name)),
        }
    }
}

fn primitive_from_name(name: &str) -> Option<Primitive> {
    Some(match name {
        "bool" => Primitive::Bool,
        "char" => Primitive::Char,
        "byte" => Primitive::Byte,
        "i8" => Primitive::I8,
        "i16" => Primitive::I16,
        "i32" => Primitive::I32,
        "i64" => Primitive::I64,
        "u8" => Primitive::U8,
        "u16" => Primitive::U16,
        "u32" => Primitive::U32,
        "u64" => Primitive::U64,
        "f32" => Primitive::F32,
        "f64" => Primitive::F64,
        "type" => Primitive::Type_,
        "unit" => Primitive::Unit,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;

    fn parse(src: &str) -> Expr {
        let tokens = Lexer::new(src).tokenize().unwrap();
        Parser::new(tokens).parse_expr_to_end().unwrap()
    }

    #[test]
    fn parses_arithmetic_precedence() {
        let expr = parse("1 + 2 * 3");
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(Expr::Literal(Literal::Integer(1))),
                rhs: Box::new(Expr::Binary {
                    op: BinaryOp::Mul,
                    lhs: Box::new(Expr::Literal(Literal::Integer(2))),
                    rhs: Box::new(Expr::Literal(Literal::Integer(3))),
                }),
            }
        );
    }

    #[test]
    fn parses_if_else_block() {
        let expr = parse("if true { 1 } else { 2 }");
        match expr {
            Expr::If { .. } => {}
            other => panic!("expected If, got {other:?}"),
        }
    }

    #[test]
    fn parses_function_literal_with_typed_params() {
        let expr = parse("fn(x: i64, y: i64) -> i64 => x + y");
        match expr {
            Expr::FunctionLiteral { params, return_ty, .. } => {
                assert_eq!(params.len(), 2);
                assert_eq!(return_ty, Some(TypeExpr::Primitive(Primitive::I64)));
            }
            other => panic!("expected FunctionLiteral, got {other:?}"),
        }
    }

    #[test]
    fn parses_generic_type_parameter() {
        let expr = parse("fn(x: T) -> T => x");
        match expr {
            Expr::FunctionLiteral { params, .. } => {
                assert_eq!(params[0].ty, TypeExpr::Param("T".to_string()));
            }
            other => panic!("expected FunctionLiteral, got {other:?}"),
        }
    }

    #[test]
    fn parses_member_and_cast_postfix() {
        let expr = parse("x.field as i32");
        match expr {
            Expr::Cast { expr, ty } => {
                assert_eq!(ty, TypeExpr::Primitive(Primitive::I32));
                match *expr {
                    Expr::Member { field, .. } => assert_eq!(field, "field"),
                    other => panic!("expected Member, got {other:?}"),
                }
            }
            other => panic!("expected Cast, got {other:?}"),
        }
    }
}
