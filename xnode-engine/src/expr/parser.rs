//! Parser implementation

use super::ast::*;
use super::token::*;
use super::value::number_value;
use serde_json::Value;

/// Names that prefix builtin calls rather than values (`Math.floor(x)`).
const NAMESPACES: [&str; 6] = ["Math", "JSON", "console", "Object", "String", "Number"];

/// Parse error with source location.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Parse error at line {}, column {}: {}",
            self.line, self.column, self.message
        )
    }
}

impl std::error::Error for ParseError {}

/// Recursive-descent parser with a nesting limit.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>, max_depth: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            max_depth,
        }
    }

    /// Parse a `;`-separated statement list.
    pub fn parse_program(&mut self) -> Result<Program, ParseError> {
        self.check_lexer_errors()?;

        let mut statements = Vec::new();
        while !self.is_at_end() {
            if self.check(&TokenKind::Semicolon) {
                self.advance();
                continue;
            }
            statements.push(self.parse_statement()?);
            if self.check(&TokenKind::Semicolon) {
                self.advance();
            }
        }

        if statements.is_empty() {
            return Err(self.error("Empty program"));
        }
        Ok(Program { statements })
    }

    /// Parse exactly one expression and require end of input.
    pub fn parse_single(&mut self) -> Result<Expr, ParseError> {
        self.check_lexer_errors()?;
        let expr = self.parse_expr()?;
        if self.check(&TokenKind::Semicolon) {
            self.advance();
        }
        if !self.is_at_end() {
            return Err(self.error(&format!("Unexpected token {}", self.current().kind)));
        }
        Ok(expr)
    }

    fn check_lexer_errors(&self) -> Result<(), ParseError> {
        if let Some(token) = self
            .tokens
            .iter()
            .find(|t| matches!(t.kind, TokenKind::Error(_)))
        {
            let message = match &token.kind {
                TokenKind::Error(msg) => format!("Lexer error: {}", msg),
                _ => "Lexer error".to_string(),
            };
            return Err(ParseError {
                message,
                line: token.span.line,
                column: token.span.column,
            });
        }
        Ok(())
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        match &self.current().kind {
            TokenKind::Let => {
                self.advance();
                let name = self.expect_identifier()?;
                self.expect(TokenKind::Assign)?;
                let value = self.parse_expr()?;
                Ok(Stmt::Let(name, value))
            }
            TokenKind::Return => {
                self.advance();
                if self.check(&TokenKind::Semicolon) || self.is_at_end() {
                    Ok(Stmt::Return(None))
                } else {
                    Ok(Stmt::Return(Some(self.parse_expr()?)))
                }
            }
            _ => Ok(Stmt::Expr(self.parse_expr()?)),
        }
    }

    // ========================================================================
    // EXPRESSIONS (lowest to highest precedence)
    // ========================================================================

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let result = self.parse_conditional();
        self.depth -= 1;
        result
    }

    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        let condition = self.parse_or()?;
        if self.check(&TokenKind::Question) {
            self.advance();
            let then = self.parse_expr()?;
            self.expect(TokenKind::Colon)?;
            let otherwise = self.parse_expr()?;
            return Ok(Expr::Conditional(
                Box::new(condition),
                Box::new(then),
                Box::new(otherwise),
            ));
        }
        Ok(condition)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.check(&TokenKind::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_equality()?;
        while self.check(&TokenKind::And) {
            self.advance();
            let right = self.parse_equality()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Eq => BinaryOp::Eq,
                TokenKind::Ne => BinaryOp::Ne,
                _ => break,
            };
            self.advance();
            let right = self.parse_comparison()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Ge => BinaryOp::Ge,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Rem,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.current().kind {
            TokenKind::Not => Some(UnaryOp::Not),
            TokenKind::Minus => Some(UnaryOp::Neg),
            _ => None,
        };
        match op {
            Some(op) => {
                self.advance();
                self.enter()?;
                let operand = self.parse_unary();
                self.depth -= 1;
                Ok(Expr::Unary(op, Box::new(operand?)))
            }
            None => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match &self.current().kind {
                TokenKind::Dot => {
                    self.advance();
                    expr = match &self.current().kind {
                        TokenKind::Identifier(name) => {
                            let name = name.clone();
                            self.advance();
                            Expr::Member(Box::new(expr), name)
                        }
                        TokenKind::Number(n) if n.fract() == 0.0 => {
                            let index = Expr::Literal(Value::from(*n as i64));
                            self.advance();
                            Expr::Index(Box::new(expr), Box::new(index))
                        }
                        _ => return Err(self.error("Expected property name after '.'")),
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(TokenKind::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                TokenKind::LParen => {
                    self.advance();
                    let args = self.parse_list(TokenKind::RParen)?;
                    expr = self.to_call(expr, args)?;
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// Resolve a call target: `f(x)`, `Math.f(x)` or method style `x.f(y)`.
    fn to_call(&self, callee: Expr, args: Vec<Expr>) -> Result<Expr, ParseError> {
        match callee {
            Expr::Ident(name) => Ok(Expr::Call(name, args)),
            Expr::Member(object, method) => match *object {
                Expr::Ident(ref ns) if NAMESPACES.contains(&ns.as_str()) => {
                    Ok(Expr::Call(format!("{}.{}", ns, method), args))
                }
                receiver => {
                    let mut all = Vec::with_capacity(args.len() + 1);
                    all.push(receiver);
                    all.extend(args);
                    Ok(Expr::Call(method, all))
                }
            },
            _ => Err(self.error("Only builtin functions can be called")),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let kind = self.current().kind.clone();
        match kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Literal(number_value(n)))
            }
            TokenKind::String(s) => {
                self.advance();
                Ok(Expr::Literal(Value::String(s)))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(true)))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(false)))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Literal(Value::Null))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Expr::Ident(name))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.advance();
                Ok(Expr::Array(self.parse_list(TokenKind::RBracket)?))
            }
            TokenKind::LBrace => {
                self.advance();
                self.parse_object()
            }
            other => Err(self.error(&format!("Unexpected token {}", other))),
        }
    }

    /// Comma-separated expressions up to `close`, trailing comma allowed.
    fn parse_list(&mut self, close: TokenKind) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        while !self.check(&close) {
            items.push(self.parse_expr()?);
            if self.check(&TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(close)?;
        Ok(items)
    }

    fn parse_object(&mut self) -> Result<Expr, ParseError> {
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let key = match self.current().kind.clone() {
                TokenKind::Identifier(s) | TokenKind::String(s) => s,
                TokenKind::Number(n) => number_value(n).to_string(),
                _ => return Err(self.error("Expected object key")),
            };
            self.advance();
            let value = if self.check(&TokenKind::Colon) {
                self.advance();
                self.parse_expr()?
            } else {
                Expr::Ident(key.clone())
            };
            fields.push((key, value));
            if self.check(&TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Expr::Object(fields))
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn enter(&mut self) -> Result<(), ParseError> {
        if self.depth >= self.max_depth {
            return Err(self.error("Expression nested too deeply"));
        }
        self.depth += 1;
        Ok(())
    }

    fn current(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn advance(&mut self) {
        if !self.is_at_end() {
            self.pos += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        self.current().kind == TokenKind::Eof
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current().kind) == std::mem::discriminant(kind)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), ParseError> {
        if self.check(&kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(&format!(
                "Expected '{}', found '{}'",
                kind,
                self.current().kind
            )))
        }
    }

    fn expect_identifier(&mut self) -> Result<String, ParseError> {
        match &self.current().kind {
            TokenKind::Identifier(s) => {
                let s = s.clone();
                self.advance();
                Ok(s)
            }
            _ => Err(self.error("Expected identifier")),
        }
    }

    fn error(&self, msg: &str) -> ParseError {
        let span = self.current().span;
        ParseError {
            message: msg.to_string(),
            line: span.line,
            column: span.column,
        }
    }
}
