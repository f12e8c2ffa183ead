//! Recursive descent parser for custom indicator programs.
//!
//! Grammar (newline or `;` separates statements):
//!
//! ```text
//! program   := stmt*
//! stmt      := "import" NAME
//!            | "def" NAME "(" params? ")" block
//!            | "if" expr block ("elif" expr block)* ("else" block)?
//!            | "while" expr block
//!            | "for" NAME "in" expr block
//!            | "return" expr? | "break" | "continue"
//!            | NAME "=" expr | expr
//! block     := "{" stmt* "}"
//! expr      := or
//! or        := and ("or" and)*
//! and       := not ("and" not)*
//! not       := "not" not | compare
//! compare   := sum (("==" | "!=" | "<" | "<=" | ">" | ">=") sum)?
//! sum       := term (("+" | "-") term)*
//! term      := unary (("*" | "/" | "%") unary)*
//! unary     := "-" unary | power
//! power     := postfix ("**" unary)?
//! postfix   := primary ("(" args? ")" | "." NAME | "[" expr "]")*
//! primary   := NUMBER | STRING | "true" | "false" | "none" | NAME
//!            | "(" expr ")" | "[" (expr ("," expr)*)? "]"
//! ```

use crate::domain::error::ParseError;
use crate::domain::sandbox::ast::{
    BinaryOp, Expr, ExprKind, FunctionDef, Program, Stmt, UnaryOp,
};
use crate::domain::sandbox::lexer::{Token, TokenKind, tokenize};

/// Deepest expression tree accepted.
const MAX_EXPR_DEPTH: usize = 200;
/// Deepest recursion into nested sub-expressions and blocks.
const MAX_NESTING: usize = 64;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nesting: usize,
    in_function: bool,
    loops: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            nesting: 0,
            in_function: false,
            loops: 0,
        }
    }

    fn current(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek(&self) -> &TokenKind {
        &self.current().kind
    }

    fn position(&self) -> usize {
        self.current().position
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(kind)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: String) -> ParseError {
        ParseError {
            message,
            position: self.position(),
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<usize, ParseError> {
        if self.at(kind) {
            Ok(self.advance().position)
        } else {
            Err(self.error(format!("expected {}, found {}", kind, self.peek())))
        }
    }

    fn expect_name(&mut self, what: &str) -> Result<(String, usize), ParseError> {
        match self.peek().clone() {
            TokenKind::Name(name) => {
                let position = self.advance().position;
                Ok((name, position))
            }
            other => Err(self.error(format!("expected {}, found {}", what, other))),
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), TokenKind::Newline | TokenKind::Semicolon) {
            self.advance();
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), TokenKind::Newline) {
            self.advance();
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(self.error("program is nested too deeply".to_string()));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting -= 1;
    }

    fn node(&self, kind: ExprKind, position: usize, depth: usize) -> Result<Expr, ParseError> {
        if depth > MAX_EXPR_DEPTH {
            return Err(ParseError {
                message: "expression is nested too deeply".to_string(),
                position,
            });
        }
        Ok(Expr::new(kind, position, depth))
    }

    fn binary(&self, op: BinaryOp, left: Expr, right: Expr) -> Result<Expr, ParseError> {
        let position = left.position;
        let depth = 1 + left.depth.max(right.depth);
        self.node(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            position,
            depth,
        )
    }

    fn end_of_statement(&self) -> Result<(), ParseError> {
        match self.peek() {
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof => Ok(()),
            other => Err(self.error(format!(
                "expected newline or ';' after statement, found {}",
                other
            ))),
        }
    }

    fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut statements = Vec::new();
        loop {
            self.skip_separators();
            match self.peek() {
                TokenKind::Eof => break,
                TokenKind::RBrace => return Err(self.error("unexpected '}'".to_string())),
                _ => {}
            }
            statements.push(self.parse_statement(true)?);
            self.end_of_statement()?;
        }
        Ok(Program { statements })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(&TokenKind::LBrace)?;
        self.enter()?;
        let mut statements = Vec::new();
        loop {
            self.skip_separators();
            match self.peek() {
                TokenKind::RBrace => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => return Err(self.error("expected '}', found end of input".to_string())),
                _ => {}
            }
            statements.push(self.parse_statement(false)?);
            self.end_of_statement()?;
        }
        self.leave();
        Ok(statements)
    }

    fn parse_loop_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.loops += 1;
        let body = self.parse_block();
        self.loops -= 1;
        body
    }

    fn parse_statement(&mut self, top_level: bool) -> Result<Stmt, ParseError> {
        match self.peek() {
            TokenKind::Import => {
                if !top_level {
                    return Err(self.error("import is only allowed at top level".to_string()));
                }
                let position = self.advance().position;
                let (module, _) = self.expect_name("module name")?;
                Ok(Stmt::Import { module, position })
            }
            TokenKind::Def => {
                if !top_level {
                    return Err(self.error("functions can only be defined at top level".to_string()));
                }
                self.parse_def()
            }
            TokenKind::If => self.parse_if(),
            TokenKind::While => {
                self.advance();
                let condition = self.parse_expression()?;
                let body = self.parse_loop_body()?;
                Ok(Stmt::While { condition, body })
            }
            TokenKind::For => {
                self.advance();
                let (var, _) = self.expect_name("loop variable")?;
                self.expect(&TokenKind::In)?;
                let iterable = self.parse_expression()?;
                let body = self.parse_loop_body()?;
                Ok(Stmt::For {
                    var,
                    iterable,
                    body,
                })
            }
            TokenKind::Return => {
                if !self.in_function {
                    return Err(self.error("'return' outside function".to_string()));
                }
                let position = self.advance().position;
                let value = match self.peek() {
                    TokenKind::Newline | TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof => {
                        None
                    }
                    _ => Some(self.parse_expression()?),
                };
                Ok(Stmt::Return { value, position })
            }
            TokenKind::Break | TokenKind::Continue => {
                let is_break = matches!(self.peek(), TokenKind::Break);
                if self.loops == 0 {
                    let word = if is_break { "break" } else { "continue" };
                    return Err(self.error(format!("'{}' outside loop", word)));
                }
                let position = self.advance().position;
                Ok(if is_break {
                    Stmt::Break { position }
                } else {
                    Stmt::Continue { position }
                })
            }
            _ => {
                let expr = self.parse_expression()?;
                if self.at(&TokenKind::Assign) {
                    let ExprKind::Name(target) = &expr.kind else {
                        return Err(ParseError {
                            message: "can only assign to a name".to_string(),
                            position: expr.position,
                        });
                    };
                    let target = target.clone();
                    self.advance();
                    let value = self.parse_expression()?;
                    return Ok(Stmt::Assign {
                        target,
                        value,
                        position: expr.position,
                    });
                }
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn parse_def(&mut self) -> Result<Stmt, ParseError> {
        let position = self.advance().position;
        let (name, _) = self.expect_name("function name")?;
        self.expect(&TokenKind::LParen)?;

        let mut params: Vec<String> = Vec::new();
        if !self.at(&TokenKind::RParen) {
            loop {
                let (param, param_pos) = self.expect_name("parameter name")?;
                if params.contains(&param) {
                    return Err(ParseError {
                        message: format!("duplicate parameter '{}'", param),
                        position: param_pos,
                    });
                }
                params.push(param);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;

        self.in_function = true;
        let body = self.parse_block();
        self.in_function = false;

        Ok(Stmt::Def(FunctionDef {
            name,
            params,
            body: body?,
            position,
        }))
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        self.advance();
        let mut branches = Vec::new();
        let condition = self.parse_expression()?;
        branches.push((condition, self.parse_block()?));

        let mut otherwise = None;
        loop {
            let mark = self.pos;
            self.skip_newlines();
            match self.peek() {
                TokenKind::Elif => {
                    self.advance();
                    let condition = self.parse_expression()?;
                    branches.push((condition, self.parse_block()?));
                }
                TokenKind::Else => {
                    self.advance();
                    otherwise = Some(self.parse_block()?);
                    break;
                }
                _ => {
                    self.pos = mark;
                    break;
                }
            }
        }
        Ok(Stmt::If {
            branches,
            otherwise,
        })
    }

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let expr = self.parse_or();
        self.leave();
        expr
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.eat(&TokenKind::Or) {
            let right = self.parse_and()?;
            left = self.binary(BinaryOp::Or, left, right)?;
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_not()?;
        while self.eat(&TokenKind::And) {
            let right = self.parse_not()?;
            left = self.binary(BinaryOp::And, left, right)?;
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if self.at(&TokenKind::Not) {
            let position = self.advance().position;
            self.enter()?;
            let operand = self.parse_not();
            self.leave();
            let operand = operand?;
            let depth = operand.depth + 1;
            return self.node(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                position,
                depth,
            );
        }
        self.parse_comparison()
    }

    fn comparison_op(&self) -> Option<BinaryOp> {
        match self.peek() {
            TokenKind::EqEq => Some(BinaryOp::Eq),
            TokenKind::NotEq => Some(BinaryOp::NotEq),
            TokenKind::Lt => Some(BinaryOp::Lt),
            TokenKind::Le => Some(BinaryOp::Le),
            TokenKind::Gt => Some(BinaryOp::Gt),
            TokenKind::Ge => Some(BinaryOp::Ge),
            _ => None,
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_sum()?;
        let Some(op) = self.comparison_op() else {
            return Ok(left);
        };
        self.advance();
        let right = self.parse_sum()?;
        if self.comparison_op().is_some() {
            return Err(self.error("chained comparisons are not supported".to_string()));
        }
        self.binary(op, left, right)
    }

    fn parse_sum(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            left = self.binary(op, left, right)?;
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = self.binary(op, left, right)?;
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.at(&TokenKind::Minus) {
            let position = self.advance().position;
            self.enter()?;
            let operand = self.parse_unary();
            self.leave();
            let operand = operand?;
            let depth = operand.depth + 1;
            return self.node(
                ExprKind::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                },
                position,
                depth,
            );
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_postfix()?;
        if self.eat(&TokenKind::StarStar) {
            self.enter()?;
            let exponent = self.parse_unary();
            self.leave();
            return self.binary(BinaryOp::Pow, base, exponent?);
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                TokenKind::LParen => {
                    self.advance();
                    let args = self.parse_list_items(&TokenKind::RParen)?;
                    let position = expr.position;
                    let depth = 1 + args.iter().map(|a| a.depth).max().unwrap_or(0).max(expr.depth);
                    expr = self.node(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        position,
                        depth,
                    )?;
                }
                TokenKind::Dot => {
                    self.advance();
                    let (name, _) = self.expect_name("attribute name")?;
                    let position = expr.position;
                    let depth = expr.depth + 1;
                    expr = self.node(
                        ExprKind::Attribute {
                            object: Box::new(expr),
                            name,
                        },
                        position,
                        depth,
                    )?;
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(&TokenKind::RBracket)?;
                    let position = expr.position;
                    let depth = 1 + expr.depth.max(index.depth);
                    expr = self.node(
                        ExprKind::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                        },
                        position,
                        depth,
                    )?;
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// Comma-separated expressions up to and including `close`.
    fn parse_list_items(&mut self, close: &TokenKind) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_expression()?);
            if self.eat(close) {
                break;
            }
            self.expect(&TokenKind::Comma)?;
            if self.eat(close) {
                break;
            }
        }
        Ok(items)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.current().clone();
        let kind = match token.kind {
            TokenKind::Number(n) => ExprKind::Number(n),
            TokenKind::Str(s) => ExprKind::Str(s),
            TokenKind::True => ExprKind::Bool(true),
            TokenKind::False => ExprKind::Bool(false),
            TokenKind::None => ExprKind::None,
            TokenKind::Name(name) => ExprKind::Name(name),
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(&TokenKind::RParen)?;
                return Ok(inner);
            }
            TokenKind::LBracket => {
                self.advance();
                let items = self.parse_list_items(&TokenKind::RBracket)?;
                let depth = 1 + items.iter().map(|i| i.depth).max().unwrap_or(0);
                return self.node(ExprKind::List(items), token.position, depth);
            }
            other => return Err(self.error(format!("expected expression, found {}", other))),
        };
        self.advance();
        Ok(Expr::leaf(kind, token.position))
    }
}

/// Parse custom indicator source into a program.
pub fn parse(input: &str) -> Result<Program, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser::new(tokens);
    parser.parse_program()
}
