//! Sandboxed interpreter for computed-field expressions.
//!
//! A program only sees `$value` (the output slot), the context variables
//! `$fields`, `$entity`, `$delta` and `$services`, its own locals and the
//! functions in the [`Registry`]. Every run is bounded by the step, time,
//! depth and string-size limits of [`EngineConfig`].

use std::collections::HashMap;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, warn};

use crate::comparison::{compare, identical, loose_eq};
use crate::config::EngineConfig;
use crate::context::EvaluationContext;
use crate::errors::EvaluationError;
use crate::expression::{parse_program, BinOp, Expr, ExprKind, Span, Stmt, UnaryOp};
use crate::functions::Registry;
use crate::parser::ParseError;
use crate::value::{to_num, to_text, truthy, type_name, Num};

/// Variables owned by the context; expressions may read but never assign them.
pub const CONTEXT_VARS: [&str; 5] = ["fields", "entity", "delta", "services", "entity_type_manager"];

const OUTPUT_VAR: &str = "value";
const CLOCK_CHECK_EVERY: u64 = 128;
const NODES_PER_STEP: usize = 64;
const FRAGMENT_CHARS: usize = 60;

type EvalResult<T> = std::result::Result<T, EvaluationError>;

#[derive(Debug, Clone)]
pub struct Evaluator {
    registry: Registry,
    config: EngineConfig,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::with_builtins(EngineConfig::default())
    }
}

impl Evaluator {
    pub fn new(registry: Registry, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    pub fn with_builtins(config: EngineConfig) -> Self {
        Self::new(Registry::with_builtins(), config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs `expression` against `ctx` and returns the raw output. An
    /// expression that never assigns `$value` yields null.
    #[tracing::instrument(level = "debug", skip_all, fields(delta = ctx.delta))]
    pub fn evaluate(&self, expression: &str, ctx: &EvaluationContext) -> EvalResult<Value> {
        if expression.trim().is_empty() {
            debug!("empty expression, output is null");
            return Ok(Value::Null);
        }
        let program = parse_program(expression, self.config.max_depth)
            .map_err(|e| syntax_error(expression, e))?;

        let mut run = Run {
            src: expression,
            ctx,
            fields: Value::Object(ctx.fields.clone()),
            delta: Value::from(ctx.delta),
            registry: &self.registry,
            config: &self.config,
            locals: HashMap::new(),
            output: None,
            steps: 0,
            next_clock_check: CLOCK_CHECK_EVERY,
            started: Instant::now(),
        };
        run.exec_block(&program.stmts)?;
        debug!(steps = run.steps, "expression evaluated");
        if run.output.is_none() {
            warn!("expression did not assign $value");
        }
        Ok(run.output.unwrap_or(Value::Null))
    }
}

enum Flow {
    Next,
    Return,
}

enum Accessor {
    Index(Value),
    Property(String),
}

struct Run<'a> {
    src: &'a str,
    ctx: &'a EvaluationContext,
    fields: Value,
    delta: Value,
    registry: &'a Registry,
    config: &'a EngineConfig,
    locals: HashMap<String, Value>,
    output: Option<Value>,
    steps: u64,
    next_clock_check: u64,
    started: Instant,
}

impl<'a> Run<'a> {
    fn tick(&mut self) -> EvalResult<()> {
        self.spend(1)
    }

    fn spend(&mut self, cost: u64) -> EvalResult<()> {
        self.steps = self.steps.saturating_add(cost);
        if self.steps > self.config.max_steps {
            warn!(limit = self.config.max_steps, "expression step budget exhausted");
            return Err(EvaluationError::Timeout {
                limit: format!("{} steps", self.config.max_steps),
            });
        }
        if self.steps >= self.next_clock_check {
            self.next_clock_check = self.steps.saturating_add(CLOCK_CHECK_EVERY);
            if let Some(limit) = self.config.time_limit() {
                if self.started.elapsed() > limit {
                    warn!(?limit, "expression time budget exhausted");
                    return Err(EvaluationError::Timeout {
                        limit: format!("{} ms", limit.as_millis()),
                    });
                }
            }
        }
        Ok(())
    }

    fn exec_block(&mut self, stmts: &[Stmt]) -> EvalResult<Flow> {
        for stmt in stmts {
            if let Flow::Return = self.exec(stmt)? {
                return Ok(Flow::Return);
            }
        }
        Ok(Flow::Next)
    }

    fn exec(&mut self, stmt: &Stmt) -> EvalResult<Flow> {
        self.tick()?;
        match stmt {
            Stmt::Assign {
                name,
                op,
                expr,
                span,
            } => {
                if CONTEXT_VARS.contains(&name.as_str()) {
                    return Err(EvaluationError::ReadOnly { name: name.clone() });
                }
                let rhs = self.eval(expr)?;
                let value = match op {
                    None => rhs,
                    Some(op) => {
                        let current = self.current(name);
                        self.binary(*op, current, rhs, *span)?
                    }
                };
                if name == OUTPUT_VAR {
                    self.output = Some(value);
                } else {
                    self.locals.insert(name.clone(), value);
                }
                Ok(Flow::Next)
            }
            Stmt::Expr(expr) => {
                self.eval(expr)?;
                Ok(Flow::Next)
            }
            Stmt::If {
                branches,
                otherwise,
            } => {
                for (cond, body) in branches {
                    if truthy(&self.eval(cond)?) {
                        return self.exec_block(body);
                    }
                }
                self.exec_block(otherwise)
            }
            Stmt::Return(expr) => {
                if let Some(expr) = expr {
                    let v = self.eval(expr)?;
                    self.output = Some(v);
                }
                Ok(Flow::Return)
            }
        }
    }

    fn current(&self, name: &str) -> Value {
        if name == OUTPUT_VAR {
            self.output.clone().unwrap_or(Value::Null)
        } else {
            self.locals.get(name).cloned().unwrap_or(Value::Null)
        }
    }

    /// Borrow of a variable's value without cloning it.
    fn lookup(&self, name: &str, span: Span) -> EvalResult<&Value> {
        match name {
            OUTPUT_VAR => Ok(self.output.as_ref().unwrap_or(&NULL)),
            "fields" => Ok(&self.fields),
            "delta" => Ok(&self.delta),
            "entity" => Ok(&self.ctx.entity),
            "services" | "entity_type_manager" => Err(self.runtime(
                "the services handle only supports method calls such as ->load()",
                span,
            )),
            _ => self
                .locals
                .get(name)
                .ok_or_else(|| self.runtime(format!("undefined variable ${name}"), span)),
        }
    }

    fn eval(&mut self, expr: &Expr) -> EvalResult<Value> {
        self.tick()?;
        let v = match &expr.kind {
            ExprKind::Literal(v) => v.clone(),
            ExprKind::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                let mut nodes = 1;
                for item in items {
                    let v = self.eval(item)?;
                    nodes += node_count(&v, self.config.max_value_nodes);
                    self.check_nodes(nodes, expr.span)?;
                    out.push(v);
                }
                self.spend((nodes / NODES_PER_STEP) as u64)?;
                return Ok(Value::Array(out));
            }
            ExprKind::Var(name) => self.lookup(name, expr.span)?.clone(),
            ExprKind::Index(..) | ExprKind::Property(..) => self.eval_access(expr)?,
            ExprKind::MethodCall {
                target,
                method,
                args,
            } => self.eval_method(target, method, args, expr.span)?,
            ExprKind::Call { name, args } => self.eval_call(name, args, expr.span)?,
            ExprKind::Unary(op, inner) => {
                let v = self.eval(inner)?;
                self.unary(*op, v, expr.span)?
            }
            ExprKind::Binary(BinOp::And, l, r) => {
                Value::Bool(truthy(&self.eval(l)?) && truthy(&self.eval(r)?))
            }
            ExprKind::Binary(BinOp::Or, l, r) => {
                Value::Bool(truthy(&self.eval(l)?) || truthy(&self.eval(r)?))
            }
            ExprKind::Binary(BinOp::Coalesce, l, r) => {
                let left = self.eval_lenient(l)?;
                if left.is_null() {
                    self.eval(r)?
                } else {
                    left
                }
            }
            ExprKind::Binary(op, l, r) => {
                let (a, b) = (self.eval(l)?, self.eval(r)?);
                self.binary(*op, a, b, expr.span)?
            }
            ExprKind::Ternary(cond, then, otherwise) => {
                if truthy(&self.eval(cond)?) {
                    self.eval(then)?
                } else {
                    self.eval(otherwise)?
                }
            }
        };
        if v.is_array() || v.is_object() {
            let nodes = node_count(&v, self.config.max_value_nodes);
            self.check_nodes(nodes, expr.span)?;
            self.spend((nodes / NODES_PER_STEP) as u64)?;
        }
        Ok(v)
    }

    fn check_nodes(&self, nodes: usize, span: Span) -> EvalResult<()> {
        if nodes > self.config.max_value_nodes {
            warn!(limit = self.config.max_value_nodes, "expression value budget exhausted");
            return Err(self.runtime(
                format!("value exceeds {} nodes", self.config.max_value_nodes),
                span,
            ));
        }
        Ok(())
    }

    /// Left side of `??`: an undefined variable, or an index or property
    /// chain rooted at one, reads as null without evaluating its keys.
    fn eval_lenient(&mut self, expr: &Expr) -> EvalResult<Value> {
        let mut root = expr;
        while let ExprKind::Index(target, _) | ExprKind::Property(target, _) = &root.kind {
            root = target;
        }
        match &root.kind {
            ExprKind::Var(name)
                if !CONTEXT_VARS.contains(&name.as_str())
                    && name != OUTPUT_VAR
                    && !self.locals.contains_key(name) =>
            {
                self.tick()?;
                Ok(Value::Null)
            }
            _ => self.eval(expr),
        }
    }

    /// Index and property chains. Keys are evaluated first, then the chain
    /// is walked by reference so only the leaf is cloned.
    fn eval_access(&mut self, expr: &Expr) -> EvalResult<Value> {
        let mut accessors = Vec::new();
        let mut root = expr;
        loop {
            match &root.kind {
                ExprKind::Index(target, key) => {
                    accessors.push((Accessor::Index(self.eval(key)?), root.span));
                    root = target;
                }
                ExprKind::Property(target, name) => {
                    accessors.push((Accessor::Property(name.clone()), root.span));
                    root = target;
                }
                _ => break,
            }
        }
        accessors.reverse();

        let owned;
        let base: &Value = match &root.kind {
            ExprKind::Var(name) => {
                self.tick()?;
                self.lookup(name, root.span)?
            }
            _ => {
                owned = self.eval(root)?;
                &owned
            }
        };
        let mut cur = base;
        for (accessor, span) in &accessors {
            cur = match accessor {
                Accessor::Index(key) => index(cur, key).map_err(|m| self.runtime(m, *span))?,
                Accessor::Property(name) => property(cur, name),
            };
        }
        Ok(cur.clone())
    }

    fn eval_method(
        &mut self,
        target: &Expr,
        method: &str,
        args: &[Expr],
        span: Span,
    ) -> EvalResult<Value> {
        let is_services = matches!(
            &target.kind,
            ExprKind::Var(n) if n == "services" || n == "entity_type_manager"
        );
        if !is_services {
            return Err(self.runtime(format!("method ->{method}() is not available here"), span));
        }
        if method != "load" || args.len() != 2 {
            return Err(self.runtime(
                format!("unknown service method ->{method}() with {} arguments", args.len()),
                span,
            ));
        }
        let entity_type = self.eval(&args[0])?;
        let id = self.eval(&args[1])?;
        let Some(entity_type) = entity_type.as_str() else {
            return Err(self.runtime("->load() expects an entity type string", span));
        };
        let loader = self
            .ctx
            .services
            .loader()
            .ok_or_else(|| self.runtime("no entity loader is available", span))?;
        debug!(entity_type, %id, "loading related record");
        Ok(loader.load(entity_type, &id).unwrap_or(Value::Null))
    }

    fn eval_call(&mut self, name: &str, args: &[Expr], span: Span) -> EvalResult<Value> {
        let func = self
            .registry
            .get(name)
            .ok_or_else(|| self.runtime(format!("call to undefined function {name}()"), span))?;
        if !func.arity().contains(&args.len()) {
            return Err(self.runtime(
                format!("{name}() does not take {} arguments", args.len()),
                span,
            ));
        }
        let mut values = Vec::with_capacity(args.len());
        for a in args {
            values.push(self.eval(a)?);
        }
        let out = func.call(&values).map_err(|e| self.runtime(e.0, span))?;
        self.guard_size(out, span)
    }

    fn unary(&self, op: UnaryOp, v: Value, span: Span) -> EvalResult<Value> {
        match op {
            UnaryOp::Not => Ok(Value::Bool(!truthy(&v))),
            UnaryOp::Plus | UnaryOp::Neg => {
                let n = to_num(&v).ok_or_else(|| {
                    self.runtime(format!("unsupported operand type {}", type_name(&v)), span)
                })?;
                let n = match (op, n) {
                    (UnaryOp::Plus, n) => n,
                    (_, Num::Int(i)) => i.checked_neg().map(Num::Int).unwrap_or(Num::Float(-(i as f64))),
                    (_, Num::Float(f)) => Num::Float(-f),
                };
                self.number(n, span)
            }
        }
    }

    fn binary(&self, op: BinOp, a: Value, b: Value, span: Span) -> EvalResult<Value> {
        match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
                self.arith(op, &a, &b, span)
            }
            BinOp::Concat => {
                let (Some(x), Some(y)) = (to_text(&a), to_text(&b)) else {
                    return Err(self.runtime(
                        format!("cannot concatenate {} and {}", type_name(&a), type_name(&b)),
                        span,
                    ));
                };
                self.guard_size(Value::String(x + &y), span)
            }
            BinOp::Eq => Ok(Value::Bool(loose_eq(&a, &b))),
            BinOp::Ne => Ok(Value::Bool(!loose_eq(&a, &b))),
            BinOp::Identical => Ok(Value::Bool(identical(&a, &b))),
            BinOp::NotIdentical => Ok(Value::Bool(!identical(&a, &b))),
            BinOp::Lt | BinOp::Lte | BinOp::Gt | BinOp::Gte => {
                let ord = compare(&a, &b).ok_or_else(|| {
                    self.runtime(
                        format!("cannot compare {} with {}", type_name(&a), type_name(&b)),
                        span,
                    )
                })?;
                Ok(Value::Bool(match op {
                    BinOp::Lt => ord.is_lt(),
                    BinOp::Lte => ord.is_le(),
                    BinOp::Gt => ord.is_gt(),
                    _ => ord.is_ge(),
                }))
            }
            BinOp::And => Ok(Value::Bool(truthy(&a) && truthy(&b))),
            BinOp::Or => Ok(Value::Bool(truthy(&a) || truthy(&b))),
            BinOp::Coalesce => Ok(if a.is_null() { b } else { a }),
        }
    }

    fn arith(&self, op: BinOp, a: &Value, b: &Value, span: Span) -> EvalResult<Value> {
        let (Some(x), Some(y)) = (to_num(a), to_num(b)) else {
            return Err(self.runtime(
                format!("unsupported operand types {} and {}", type_name(a), type_name(b)),
                span,
            ));
        };
        let n = match (op, x, y) {
            (BinOp::Div, _, y) if y.as_f64() == 0.0 => {
                return Err(self.runtime("division by zero", span));
            }
            (BinOp::Rem, x, y) => {
                let (x, y) = (int_of(x), int_of(y));
                if y == 0 {
                    return Err(self.runtime("modulo by zero", span));
                }
                Num::Int(x.checked_rem(y).unwrap_or(0))
            }
            (BinOp::Div, Num::Int(x), Num::Int(y)) if x.checked_rem(y) == Some(0) => {
                x.checked_div(y).map(Num::Int).unwrap_or(Num::Float(x as f64 / y as f64))
            }
            (_, Num::Int(x), Num::Int(y)) => {
                let checked = match op {
                    BinOp::Add => x.checked_add(y),
                    BinOp::Sub => x.checked_sub(y),
                    BinOp::Mul => x.checked_mul(y),
                    _ => None,
                };
                checked
                    .map(Num::Int)
                    .unwrap_or_else(|| Num::Float(float_op(op, x as f64, y as f64)))
            }
            (_, x, y) => Num::Float(float_op(op, x.as_f64(), y.as_f64())),
        };
        self.number(n, span)
    }

    fn number(&self, n: Num, span: Span) -> EvalResult<Value> {
        n.into_value()
            .ok_or_else(|| self.runtime("numeric result is not finite", span))
    }

    fn guard_size(&self, v: Value, span: Span) -> EvalResult<Value> {
        match &v {
            Value::String(s) if s.len() > self.config.max_string_bytes => Err(self.runtime(
                format!("string exceeds {} bytes", self.config.max_string_bytes),
                span,
            )),
            _ => Ok(v),
        }
    }

    fn runtime(&self, message: impl Into<String>, span: Span) -> EvaluationError {
        EvaluationError::Runtime {
            message: message.into(),
            fragment: fragment(&self.src[span.start..span.end]),
        }
    }
}

fn float_op(op: BinOp, x: f64, y: f64) -> f64 {
    match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        _ => x / y,
    }
}

fn int_of(n: Num) -> i64 {
    match n {
        Num::Int(i) => i,
        Num::Float(f) => f.trunc() as i64,
    }
}

static NULL: Value = Value::Null;

/// Number of JSON nodes in `v`; stops counting just past `limit`.
fn node_count(v: &Value, limit: usize) -> usize {
    let mut count = 0;
    let mut stack = vec![v];
    while let Some(v) = stack.pop() {
        count += 1;
        if count > limit {
            break;
        }
        match v {
            Value::Array(items) => stack.extend(items),
            Value::Object(map) => stack.extend(map.values()),
            _ => {}
        }
    }
    count
}

fn index<'v>(target: &'v Value, key: &Value) -> Result<&'v Value, String> {
    match target {
        Value::Array(items) => match to_num(key) {
            Some(Num::Int(i)) if i >= 0 && !key.is_null() => {
                Ok(items.get(i as usize).unwrap_or(&NULL))
            }
            Some(Num::Int(_)) => Ok(&NULL),
            Some(Num::Float(f)) if f >= 0.0 => Ok(items.get(f as usize).unwrap_or(&NULL)),
            _ => Err(format!("list index must be an integer, got {}", type_name(key))),
        },
        Value::Object(map) => {
            let k = to_text(key)
                .ok_or_else(|| format!("object key must be a scalar, got {}", type_name(key)))?;
            Ok(map.get(&k).unwrap_or(&NULL))
        }
        _ => Ok(&NULL),
    }
}

/// `->name`: object member; on a list of field items, the member of the
/// first item.
fn property<'v>(target: &'v Value, name: &str) -> &'v Value {
    match target {
        Value::Object(map) => map.get(name).unwrap_or(&NULL),
        Value::Array(items) => items.first().map(|f| property(f, name)).unwrap_or(&NULL),
        _ => &NULL,
    }
}

fn fragment(s: &str) -> String {
    let s = s.trim();
    if s.chars().count() <= FRAGMENT_CHARS {
        s.to_string()
    } else {
        let head: String = s.chars().take(FRAGMENT_CHARS).collect();
        format!("{head}...")
    }
}

fn syntax_error(src: &str, e: ParseError) -> EvaluationError {
    let offset = e.offset.min(src.len());
    let rest = src.get(offset..).unwrap_or("");
    EvaluationError::Syntax {
        message: e.message,
        fragment: if rest.trim().is_empty() {
            "end of input".to_string()
        } else {
            fragment(rest)
        },
        offset,
    }
}
