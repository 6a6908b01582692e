// src/expression.rs
use crate::parser::{ParseError, Parser};
use serde_json::Value;

/// Byte range of a node in the expression source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Concat,
    Eq,
    Ne,
    Identical,
    NotIdentical,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    Coalesce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Value),
    List(Vec<Expr>),
    Var(String),
    Index(Box<Expr>, Box<Expr>),
    Property(Box<Expr>, String),
    MethodCall {
        target: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Assign {
        name: String,
        op: Option<BinOp>,
        expr: Expr,
        span: Span,
    },
    Expr(Expr),
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        otherwise: Vec<Stmt>,
    },
    Return(Option<Expr>),
}

/// A parsed expression program.
#[derive(Debug, Clone)]
pub struct Program {
    pub stmts: Vec<Stmt>,
}

pub fn parse_program(input: &str, max_depth: usize) -> Result<Program, ParseError> {
    let mut p = EParser::new(input, max_depth);
    let mut stmts = Vec::new();
    p.skip_ws();
    while !p.parser.eof() {
        if let Some(stmt) = p.parse_stmt()? {
            stmts.push(stmt);
        }
        p.skip_ws();
    }
    Ok(Program { stmts })
}

struct EParser<'a> {
    parser: Parser<'a>,
    depth: usize,
    max_depth: usize,
}

impl<'a> EParser<'a> {
    fn new(s: &'a str, max_depth: usize) -> Self {
        Self {
            parser: Parser::new(s),
            depth: 0,
            max_depth,
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(self.parser.error("expression nested too deeply"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // Statements

    fn parse_stmt(&mut self) -> Result<Option<Stmt>, ParseError> {
        self.skip_ws();
        if self.parser.consume_char(';') {
            return Ok(None);
        }
        self.enter()?;
        let stmt = self.parse_stmt_inner();
        self.leave();
        stmt.map(Some)
    }

    fn parse_stmt_inner(&mut self) -> Result<Stmt, ParseError> {
        if self.parser.consume_keyword("if") {
            return self.parse_if();
        }
        if self.parser.consume_keyword("return") {
            self.skip_ws();
            let expr = if self.parser.peek_char() == Some(';') || self.parser.eof() {
                None
            } else {
                Some(self.parse_expr()?)
            };
            self.end_stmt()?;
            return Ok(Stmt::Return(expr));
        }
        if let Some(stmt) = self.try_assignment()? {
            self.end_stmt()?;
            return Ok(stmt);
        }
        let expr = self.parse_expr()?;
        self.end_stmt()?;
        Ok(Stmt::Expr(expr))
    }

    fn try_assignment(&mut self) -> Result<Option<Stmt>, ParseError> {
        let start = self.parser.pos();
        if !self.parser.consume_char('$') {
            return Ok(None);
        }
        let name = self.parser.parse_identifier()?;
        self.skip_ws();
        let op = if self.parser.consume_str("+=") {
            Some(Some(BinOp::Add))
        } else if self.parser.consume_str("-=") {
            Some(Some(BinOp::Sub))
        } else if self.parser.consume_str("*=") {
            Some(Some(BinOp::Mul))
        } else if self.parser.consume_str("/=") {
            Some(Some(BinOp::Div))
        } else if self.parser.consume_str(".=") {
            Some(Some(BinOp::Concat))
        } else if self.parser.peek_str("=") && !self.parser.peek_str("==") {
            self.parser.consume_char('=');
            Some(None)
        } else {
            None
        };
        let Some(op) = op else {
            self.parser.reset(start);
            return Ok(None);
        };
        let expr = self.parse_expr()?;
        let span = Span {
            start,
            end: self.parser.pos(),
        };
        Ok(Some(Stmt::Assign {
            name,
            op,
            expr,
            span,
        }))
    }

    fn end_stmt(&mut self) -> Result<(), ParseError> {
        self.skip_ws();
        if self.parser.consume_char(';') || self.parser.eof() || self.parser.peek_char() == Some('}')
        {
            return Ok(());
        }
        Err(self.parser.error("expected ';'"))
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let mut branches = Vec::new();
        let mut otherwise = Vec::new();
        loop {
            self.skip_ws();
            self.parser.expect('(')?;
            let cond = self.parse_expr()?;
            self.skip_ws();
            self.parser.expect(')')?;
            let body = self.parse_block()?;
            branches.push((cond, body));
            self.skip_ws();
            if self.parser.consume_keyword("elseif") {
                continue;
            }
            if self.parser.consume_keyword("else") {
                self.skip_ws();
                if self.parser.consume_keyword("if") {
                    continue;
                }
                otherwise = self.parse_block()?;
            }
            break;
        }
        Ok(Stmt::If {
            branches,
            otherwise,
        })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.skip_ws();
        let mut out = Vec::new();
        if !self.parser.consume_char('{') {
            if let Some(stmt) = self.parse_stmt()? {
                out.push(stmt);
            }
            return Ok(out);
        }
        loop {
            self.skip_ws();
            if self.parser.consume_char('}') {
                return Ok(out);
            }
            if self.parser.eof() {
                return Err(self.parser.error("expected '}'"));
            }
            if let Some(stmt) = self.parse_stmt()? {
                out.push(stmt);
            }
        }
    }

    // Expressions, lowest precedence first

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let e = self.parse_ternary();
        self.leave();
        e
    }

    fn parse_ternary(&mut self) -> Result<Expr, ParseError> {
        let start = self.start();
        let cond = self.parse_coalesce()?;
        self.skip_ws();
        if self.parser.peek_str("??") || !self.parser.consume_char('?') {
            return Ok(cond);
        }
        let then = self.parse_expr()?;
        self.skip_ws();
        self.parser.expect(':')?;
        let otherwise = self.parse_expr()?;
        Ok(self.node(
            start,
            ExprKind::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise)),
        ))
    }

    fn parse_coalesce(&mut self) -> Result<Expr, ParseError> {
        let start = self.start();
        let left = self.parse_or()?;
        self.skip_ws();
        if self.parser.consume_str("??") {
            self.enter()?;
            let right = self.parse_coalesce();
            self.leave();
            let right = right?;
            return Ok(self.node(
                start,
                ExprKind::Binary(BinOp::Coalesce, Box::new(left), Box::new(right)),
            ));
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(&[("||", BinOp::Or)], Self::parse_and)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(&[("&&", BinOp::And)], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[
                ("===", BinOp::Identical),
                ("!==", BinOp::NotIdentical),
                ("==", BinOp::Eq),
                ("!=", BinOp::Ne),
            ],
            Self::parse_comparison,
        )
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[
                ("<=", BinOp::Lte),
                (">=", BinOp::Gte),
                ("<", BinOp::Lt),
                (">", BinOp::Gt),
            ],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[("+", BinOp::Add), ("-", BinOp::Sub), (".", BinOp::Concat)],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Rem)],
            Self::parse_unary,
        )
    }

    /// Left-associative level; an operator followed by `=` is a compound
    /// assignment and ends the level. Every link counts as one level of
    /// nesting, so long chains are bounded like parentheses.
    fn binary_level(
        &mut self,
        ops: &[(&str, BinOp)],
        next: fn(&mut Self) -> Result<Expr, ParseError>,
    ) -> Result<Expr, ParseError> {
        let depth = self.depth;
        let out = self.binary_chain(ops, next);
        self.depth = depth;
        out
    }

    fn binary_chain(
        &mut self,
        ops: &[(&str, BinOp)],
        next: fn(&mut Self) -> Result<Expr, ParseError>,
    ) -> Result<Expr, ParseError> {
        let start = self.start();
        let mut left = next(self)?;
        'outer: loop {
            self.skip_ws();
            for (lit, op) in ops {
                if !self.parser.peek_str(lit) {
                    continue;
                }
                let rest = &self.parser.source()[self.parser.pos() + lit.len()..];
                let compound = rest.starts_with('=') && lit.len() == 1 && !matches!(*op, BinOp::Lt | BinOp::Gt);
                if compound {
                    break 'outer;
                }
                self.parser.consume_str(lit);
                self.enter()?;
                let right = next(self)?;
                left = self.node(start, ExprKind::Binary(*op, Box::new(left), Box::new(right)));
                continue 'outer;
            }
            break;
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        self.skip_ws();
        let start = self.start();
        let op = if self.parser.consume_char('!') {
            UnaryOp::Not
        } else if self.parser.consume_char('-') {
            UnaryOp::Neg
        } else if self.parser.consume_char('+') {
            UnaryOp::Plus
        } else {
            return self.parse_postfix();
        };
        self.enter()?;
        let inner = self.parse_unary();
        self.leave();
        Ok(self.node(start, ExprKind::Unary(op, Box::new(inner?))))
    }

    /// Index, property and method links; each one counts against the
    /// nesting bound.
    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let depth = self.depth;
        let out = self.postfix_chain();
        self.depth = depth;
        out
    }

    fn postfix_chain(&mut self) -> Result<Expr, ParseError> {
        let start = self.start();
        let mut e = self.parse_primary()?;
        loop {
            self.skip_ws();
            if self.parser.peek_char() == Some('[') || self.parser.peek_str("->") {
                self.enter()?;
            }
            if self.parser.consume_char('[') {
                let idx = self.parse_expr()?;
                self.skip_ws();
                self.parser.expect(']')?;
                e = self.node(start, ExprKind::Index(Box::new(e), Box::new(idx)));
            } else if self.parser.consume_str("->") {
                self.skip_ws();
                let name = self.parser.parse_identifier()?;
                self.skip_ws();
                if self.parser.consume_char('(') {
                    let args = self.parse_args(')')?;
                    e = self.node(
                        start,
                        ExprKind::MethodCall {
                            target: Box::new(e),
                            method: name,
                            args,
                        },
                    );
                } else {
                    e = self.node(start, ExprKind::Property(Box::new(e), name));
                }
            } else {
                return Ok(e);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        self.skip_ws();
        let start = self.start();
        match self.parser.peek_char() {
            Some('"') | Some('\'') => {
                let s = self.parser.parse_quoted_string()?;
                Ok(self.node(start, ExprKind::Literal(Value::String(s))))
            }
            Some(c) if c.is_ascii_digit() => {
                let n = self.parser.parse_number_literal()?;
                Ok(self.node(start, ExprKind::Literal(n)))
            }
            Some('$') => {
                self.parser.consume_char('$');
                let name = self.parser.parse_identifier()?;
                Ok(self.node(start, ExprKind::Var(name)))
            }
            Some('(') => {
                self.parser.consume_char('(');
                let inner = self.parse_expr()?;
                self.skip_ws();
                self.parser.expect(')')?;
                Ok(inner)
            }
            Some('[') => {
                self.parser.consume_char('[');
                let items = self.parse_args(']')?;
                Ok(self.node(start, ExprKind::List(items)))
            }
            Some(c) if c == '_' || c.is_ascii_alphabetic() => {
                let name = self.parser.parse_identifier()?;
                match name.to_ascii_lowercase().as_str() {
                    "true" => return Ok(self.node(start, ExprKind::Literal(Value::Bool(true)))),
                    "false" => return Ok(self.node(start, ExprKind::Literal(Value::Bool(false)))),
                    "null" => return Ok(self.node(start, ExprKind::Literal(Value::Null))),
                    _ => {}
                }
                self.skip_ws();
                if !self.parser.consume_char('(') {
                    return Err(ParseError {
                        message: format!("unknown bare word `{name}`"),
                        offset: start,
                    });
                }
                let args = self.parse_args(')')?;
                Ok(self.node(start, ExprKind::Call { name, args }))
            }
            Some(_) => Err(self.parser.error("unexpected character")),
            None => Err(self.parser.error("unexpected end of expression")),
        }
    }

    fn parse_args(&mut self, close: char) -> Result<Vec<Expr>, ParseError> {
        let mut out = Vec::new();
        self.skip_ws();
        if self.parser.consume_char(close) {
            return Ok(out);
        }
        loop {
            out.push(self.parse_expr()?);
            self.skip_ws();
            if self.parser.consume_char(',') {
                self.skip_ws();
                // trailing comma
                if self.parser.consume_char(close) {
                    return Ok(out);
                }
                continue;
            }
            self.parser.expect(close)?;
            return Ok(out);
        }
    }

    fn start(&mut self) -> usize {
        self.skip_ws();
        self.parser.pos()
    }

    fn node(&self, start: usize, kind: ExprKind) -> Expr {
        Expr {
            kind,
            span: Span {
                start,
                end: self.parser.pos(),
            },
        }
    }

    fn skip_ws(&mut self) {
        self.parser.skip_ws();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Program {
        parse_program(src, 64).unwrap()
    }

    #[test]
    fn assignment_with_field_lookup() {
        let p = parse("$value = $fields['field_a'][0]['value'] + $fields['field_b'][0]['value'];");
        assert_eq!(p.stmts.len(), 1);
        match &p.stmts[0] {
            Stmt::Assign { name, op, expr, .. } => {
                assert_eq!(name, "value");
                assert!(op.is_none());
                assert!(matches!(expr.kind, ExprKind::Binary(BinOp::Add, _, _)));
            }
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn precedence_multiplies_first() {
        let p = parse("$value = 1 + 2 * 3");
        let Stmt::Assign { expr, .. } = &p.stmts[0] else {
            panic!("expected assignment");
        };
        let ExprKind::Binary(BinOp::Add, _, right) = &expr.kind else {
            panic!("expected addition at the root");
        };
        assert!(matches!(right.kind, ExprKind::Binary(BinOp::Mul, _, _)));
    }

    #[test]
    fn compound_assignment_and_comparison() {
        let p = parse("$x = 1; $x += 2; if ($x >= 3) { $value = 'big'; } else { $value = 'small'; }");
        assert_eq!(p.stmts.len(), 3);
        assert!(matches!(
            p.stmts[1],
            Stmt::Assign {
                op: Some(BinOp::Add),
                ..
            }
        ));
        assert!(matches!(&p.stmts[2], Stmt::If { branches, otherwise } if branches.len() == 1 && otherwise.len() == 1));
    }

    #[test]
    fn entity_property_chain_and_method() {
        let p = parse("$value = $entity->field_a->value + $services->load('node', 1)->field_b->value;");
        let Stmt::Assign { expr, .. } = &p.stmts[0] else {
            panic!("expected assignment");
        };
        let ExprKind::Binary(_, left, right) = &expr.kind else {
            panic!("expected binary");
        };
        assert!(matches!(left.kind, ExprKind::Property(_, ref n) if n == "value"));
        assert!(matches!(right.kind, ExprKind::Property(_, _)));
    }

    #[test]
    fn spans_cover_source() {
        let src = "$value = strlen('abc');";
        let p = parse(src);
        let Stmt::Assign { expr, .. } = &p.stmts[0] else {
            panic!("expected assignment");
        };
        assert_eq!(&src[expr.span.start..expr.span.end], "strlen('abc')");
    }

    #[test]
    fn errors_carry_offsets() {
        let err = parse_program("$value = 1 +;", 64).unwrap_err();
        assert_eq!(err.offset, 12);
        assert!(parse_program("$value = foo;", 64).is_err());
        assert!(parse_program("$value = (1", 64).is_err());
    }

    #[test]
    fn depth_is_bounded() {
        let src = format!("$value = {}1{};", "(".repeat(100), ")".repeat(100));
        let err = parse_program(&src, 64).unwrap_err();
        assert!(err.message.contains("nested"));
    }

    #[test]
    fn operator_chains_are_bounded() {
        let short = format!("$value = {};", vec!["1"; 20].join(" + "));
        assert!(parse_program(&short, 64).is_ok());
        for src in [
            format!("$value = {};", vec!["1"; 20_000].join(" + ")),
            format!("$value = {};", vec!["$a"; 20_000].join(" ?? ")),
            format!("$value = $a{};", "[0]".repeat(20_000)),
            format!("$value = $entity{};", "->x".repeat(20_000)),
        ] {
            let err = parse_program(&src, 64).unwrap_err();
            assert!(err.message.contains("nested"), "{}", err.message);
        }
    }
}
