//! Tree-walking evaluator for validated custom indicator programs.
//!
//! The interpreter can only reach what `builtins` exposes. Every statement
//! and expression costs one step; series operations cost one step per
//! element and count against the allocation budget.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::domain::sandbox::ast::{BinaryOp, Expr, ExprKind, FunctionDef, Program, Stmt, UnaryOp};
use crate::domain::sandbox::builtins::{self, BUILTINS};
use crate::domain::sandbox::value::{
    SeriesValue, Value, align_values, element_op, finite, loose_eq, scalar_op,
};
use crate::domain::sandbox::{ExecutionFailure, ExecutionLimits, line_of};

/// Steps between wall-clock checks.
const CLOCK_INTERVAL: u64 = 256;

/// Combined depth of nested calls, statements and expressions. Each level
/// costs a few native frames, so this must fit in [`crate::domain::sandbox::STACK_BYTES`].
pub(crate) const MAX_NESTING: usize = 2_000;

/// Fuel, allocation and deadline accounting for one execution.
pub(crate) struct Budget {
    steps: u64,
    max_steps: u64,
    next_clock_check: u64,
    elements: usize,
    max_elements: usize,
    started: Instant,
    timeout: Duration,
    nesting: usize,
}

impl Budget {
    pub(crate) fn new(limits: &ExecutionLimits) -> Self {
        Budget {
            steps: 0,
            max_steps: limits.max_steps,
            next_clock_check: CLOCK_INTERVAL,
            elements: 0,
            max_elements: limits.max_elements,
            started: Instant::now(),
            timeout: limits.timeout,
            nesting: 0,
        }
    }

    /// Descend one evaluation level; pair with [`Budget::leave`].
    fn enter(&mut self) -> Result<(), ExecutionFailure> {
        if self.nesting >= MAX_NESTING {
            return Err(ExecutionFailure::CallDepth { limit: MAX_NESTING });
        }
        self.nesting += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting = self.nesting.saturating_sub(1);
    }

    pub(crate) fn tick(&mut self, cost: u64) -> Result<(), ExecutionFailure> {
        self.steps = self.steps.saturating_add(cost.max(1));
        if self.steps > self.max_steps {
            return Err(ExecutionFailure::StepLimit {
                limit: self.max_steps,
            });
        }
        if self.steps >= self.next_clock_check {
            self.next_clock_check = self.steps.saturating_add(CLOCK_INTERVAL);
            if self.started.elapsed() > self.timeout {
                return Err(ExecutionFailure::Timeout {
                    limit_ms: self.timeout.as_millis() as u64,
                });
            }
        }
        Ok(())
    }

    pub(crate) fn alloc(&mut self, n: usize) -> Result<(), ExecutionFailure> {
        self.elements = self.elements.saturating_add(n);
        if self.elements > self.max_elements {
            return Err(ExecutionFailure::MemoryLimit {
                limit: self.max_elements,
            });
        }
        Ok(())
    }

    pub(crate) fn steps(&self) -> u64 {
        self.steps
    }
}

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

pub(crate) struct Interpreter<'p> {
    source: &'p str,
    functions: HashMap<&'p str, &'p FunctionDef>,
    globals: HashMap<String, Value>,
    frames: Vec<HashMap<String, Value>>,
    budget: Budget,
    max_depth: usize,
}

fn runtime(message: impl Into<String>) -> ExecutionFailure {
    ExecutionFailure::Runtime {
        message: message.into(),
        line: None,
    }
}

impl<'p> Interpreter<'p> {
    pub(crate) fn new(program: &'p Program, source: &'p str, limits: &ExecutionLimits) -> Self {
        let functions = program.functions().map(|f| (f.name.as_str(), f)).collect();
        Interpreter {
            source,
            functions,
            globals: HashMap::new(),
            frames: Vec::new(),
            budget: Budget::new(limits),
            max_depth: limits.max_call_depth,
        }
    }

    /// Run top-level statements: imports and module-level assignments.
    pub(crate) fn load(&mut self, program: &'p Program) -> Result<(), ExecutionFailure> {
        for stmt in &program.statements {
            if let Stmt::Def(_) = stmt {
                continue;
            }
            match self.exec(stmt)? {
                Flow::Normal => {}
                _ => return Err(runtime("control flow outside a function")),
            }
        }
        Ok(())
    }

    pub(crate) fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, ExecutionFailure> {
        let def = *self
            .functions
            .get(name)
            .ok_or_else(|| runtime(format!("function '{}' is not defined", name)))?;
        self.call_user(def, args)
    }

    pub(crate) fn steps_used(&self) -> u64 {
        self.budget.steps()
    }

    fn at(&self, position: usize, err: ExecutionFailure) -> ExecutionFailure {
        match err {
            ExecutionFailure::Runtime {
                message,
                line: None,
            } => ExecutionFailure::Runtime {
                message,
                line: Some(line_of(self.source, position)),
            },
            other => other,
        }
    }

    fn call_user(&mut self, def: &'p FunctionDef, args: Vec<Value>) -> Result<Value, ExecutionFailure> {
        if self.frames.len() >= self.max_depth {
            return Err(ExecutionFailure::CallDepth {
                limit: self.max_depth,
            });
        }
        if args.len() != def.params.len() {
            return Err(runtime(format!(
                "{}() takes {} argument(s), got {}",
                def.name,
                def.params.len(),
                args.len()
            )));
        }
        self.budget.enter()?;
        let frame = def.params.iter().cloned().zip(args).collect();
        self.frames.push(frame);
        let result = self.exec_block(&def.body);
        self.frames.pop();
        self.budget.leave();
        match result? {
            Flow::Return(v) => Ok(v),
            Flow::Normal => Ok(Value::None),
            Flow::Break | Flow::Continue => Err(runtime("loop control outside a loop")),
        }
    }

    fn exec_block(&mut self, stmts: &'p [Stmt]) -> Result<Flow, ExecutionFailure> {
        for stmt in stmts {
            match self.exec(stmt)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn assign(&mut self, name: &str, value: Value) {
        match self.frames.last_mut() {
            Some(frame) => frame.insert(name.to_string(), value),
            None => self.globals.insert(name.to_string(), value),
        };
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.frames
            .last()
            .and_then(|f| f.get(name))
            .or_else(|| self.globals.get(name))
    }

    fn condition(&mut self, expr: &'p Expr) -> Result<bool, ExecutionFailure> {
        let v = self.eval(expr)?;
        v.truthy().map_err(|m| self.at(expr.position, runtime(m)))
    }

    fn exec(&mut self, stmt: &'p Stmt) -> Result<Flow, ExecutionFailure> {
        self.budget.tick(1)?;
        self.budget.enter()?;
        let flow = self.exec_kind(stmt);
        self.budget.leave();
        flow
    }

    fn exec_kind(&mut self, stmt: &'p Stmt) -> Result<Flow, ExecutionFailure> {
        match stmt {
            Stmt::Import { module, .. } => {
                let name = builtins::ALLOWED_MODULES
                    .iter()
                    .find(|m| **m == module.as_str())
                    .copied()
                    .ok_or_else(|| runtime(format!("module '{}' is not available", module)))?;
                self.globals.insert(module.clone(), Value::Module(name));
                Ok(Flow::Normal)
            }
            Stmt::Def(_) => Err(runtime("nested function definitions are not supported")),
            Stmt::Assign { target, value, .. } => {
                let v = self.eval(value)?;
                self.assign(target, v);
                Ok(Flow::Normal)
            }
            Stmt::If {
                branches,
                otherwise,
            } => {
                for (cond, body) in branches {
                    if self.condition(cond)? {
                        return self.exec_block(body);
                    }
                }
                match otherwise {
                    Some(body) => self.exec_block(body),
                    None => Ok(Flow::Normal),
                }
            }
            Stmt::While { condition, body } => {
                while self.condition(condition)? {
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                var,
                iterable,
                body,
            } => {
                let items = self.iteration_items(iterable)?;
                for item in items {
                    self.budget.tick(1)?;
                    self.assign(var, item);
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Return { value, .. } => {
                let v = match value {
                    Some(e) => self.eval(e)?,
                    None => Value::None,
                };
                Ok(Flow::Return(v))
            }
            Stmt::Break { .. } => Ok(Flow::Break),
            Stmt::Continue { .. } => Ok(Flow::Continue),
            Stmt::Expr(e) => {
                self.eval(e)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn iteration_items(&mut self, iterable: &'p Expr) -> Result<Vec<Value>, ExecutionFailure> {
        let v = self.eval(iterable)?;
        let items = match v {
            Value::List(items) => items.as_ref().clone(),
            Value::Series(s) => s
                .values
                .iter()
                .map(|v| v.map(Value::Number).unwrap_or(Value::None))
                .collect(),
            Value::Map(m) => m.keys().map(|k| Value::str(k)).collect(),
            Value::Str(s) => s.chars().map(|c| Value::str(&c.to_string())).collect(),
            other => {
                return Err(self.at(
                    iterable.position,
                    runtime(format!("cannot iterate over {}", other.type_name())),
                ));
            }
        };
        Ok(items)
    }

    fn eval(&mut self, expr: &'p Expr) -> Result<Value, ExecutionFailure> {
        self.budget.tick(1)?;
        self.budget.enter()?;
        let value = self.eval_kind(expr);
        self.budget.leave();
        value.map_err(|e| self.at(expr.position, e))
    }

    fn eval_kind(&mut self, expr: &'p Expr) -> Result<Value, ExecutionFailure> {
        match &expr.kind {
            ExprKind::Number(n) => Ok(Value::Number(*n)),
            ExprKind::Str(s) => Ok(Value::str(s)),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::None => Ok(Value::None),
            ExprKind::Name(name) => self
                .lookup(name)
                .cloned()
                .ok_or_else(|| runtime(format!("name '{}' is not defined", name))),
            ExprKind::List(items) => {
                self.budget.alloc(items.len())?;
                let values = items
                    .iter()
                    .map(|e| self.eval(e))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::list(values))
            }
            ExprKind::Attribute { object, name } => {
                let obj = self.eval(object)?;
                attribute(&obj, name)
            }
            ExprKind::Index { object, index } => {
                let obj = self.eval(object)?;
                let idx = self.eval(index)?;
                index_value(&obj, &idx)
            }
            ExprKind::Call { callee, args } => self.eval_call(callee, args),
            ExprKind::Unary { op, operand } => {
                let v = self.eval(operand)?;
                self.unary(*op, v)
            }
            ExprKind::Binary { op, left, right } => {
                let l = self.eval(left)?;
                match op {
                    BinaryOp::And | BinaryOp::Or if !matches!(l, Value::Series(_)) => {
                        let truth = l.truthy().map_err(runtime)?;
                        let short = if *op == BinaryOp::And { !truth } else { truth };
                        if short { Ok(l) } else { self.eval(right) }
                    }
                    _ => {
                        let r = self.eval(right)?;
                        self.binary(*op, &l, &r)
                    }
                }
            }
        }
    }

    fn eval_call(&mut self, callee: &'p Expr, args: &'p [Expr]) -> Result<Value, ExecutionFailure> {
        let values = args
            .iter()
            .map(|e| self.eval(e))
            .collect::<Result<Vec<_>, _>>()?;
        match &callee.kind {
            ExprKind::Name(name) => {
                if let Some(def) = self.functions.get(name.as_str()).copied() {
                    return self.call_user(def, values);
                }
                if BUILTINS.contains(&name.as_str()) {
                    return builtins::call_builtin(name, &values, &mut self.budget);
                }
                Err(runtime(format!("function '{}' is not defined", name)))
            }
            ExprKind::Attribute { object, name } => match self.eval(object)? {
                Value::Module(module) => {
                    builtins::call_module(module, name, &values, &mut self.budget)
                }
                other => Err(runtime(format!(
                    "{}.{} is not callable",
                    other.type_name(),
                    name
                ))),
            },
            _ => Err(runtime("only named functions can be called")),
        }
    }

    fn unary(&mut self, op: UnaryOp, v: Value) -> Result<Value, ExecutionFailure> {
        match (op, v) {
            (UnaryOp::Neg, Value::Series(s)) => {
                self.budget.tick(s.len() as u64)?;
                self.budget.alloc(s.len())?;
                let values = s.values.iter().map(|v| v.map(|x| -x)).collect();
                Ok(Value::series(s.with_values(values)))
            }
            (UnaryOp::Not, Value::Series(s)) => {
                self.budget.tick(s.len() as u64)?;
                self.budget.alloc(s.len())?;
                let values = s
                    .values
                    .iter()
                    .map(|v| v.map(|x| if x == 0.0 { 1.0 } else { 0.0 }))
                    .collect();
                Ok(Value::series(s.with_values(values)))
            }
            (UnaryOp::Neg, other) => match other.as_number() {
                Some(n) => Ok(Value::Number(-n)),
                None => Err(runtime(format!("cannot negate {}", other.type_name()))),
            },
            (UnaryOp::Not, other) => Ok(Value::Bool(!other.truthy().map_err(runtime)?)),
        }
    }

    fn series_op(
        &mut self,
        op: BinaryOp,
        shape: &SeriesValue,
        left: &[Option<f64>],
        right: &[Option<f64>],
    ) -> Result<Value, ExecutionFailure> {
        self.budget.tick(shape.len() as u64)?;
        self.budget.alloc(shape.len())?;
        let values = left
            .iter()
            .zip(right.iter())
            .map(|(a, b)| element_op(op, *a, *b))
            .collect();
        Ok(Value::series(shape.with_values(values)))
    }

    fn binary(&mut self, op: BinaryOp, l: &Value, r: &Value) -> Result<Value, ExecutionFailure> {
        match (l, r) {
            (Value::Series(a), Value::Series(b)) => {
                let aligned = align_values(a, b).map_err(runtime)?;
                self.series_op(op, a, &a.values, &aligned)
            }
            (Value::Series(a), other) => {
                let b = broadcast(other, a.len(), op)?;
                self.series_op(op, a, &a.values, &b)
            }
            (other, Value::Series(b)) => {
                let a = broadcast(other, b.len(), op)?;
                self.series_op(op, b, &a, &b.values)
            }
            _ => {
                if let (Some(a), Some(b)) = (l.as_number(), r.as_number()) {
                    if matches!(op, BinaryOp::And | BinaryOp::Or) {
                        return Ok(Value::Number(element_op(op, Some(a), Some(b)).unwrap_or(0.0)));
                    }
                    return scalar_op(op, a, b).map_err(runtime);
                }
                match (op, l, r) {
                    (BinaryOp::Eq, _, _) => Ok(Value::Bool(loose_eq(l, r))),
                    (BinaryOp::NotEq, _, _) => Ok(Value::Bool(!loose_eq(l, r))),
                    (BinaryOp::Add, Value::Str(a), Value::Str(b)) => {
                        self.budget.alloc(a.len() + b.len())?;
                        Ok(Value::str(&format!("{}{}", a, b)))
                    }
                    (BinaryOp::Add, Value::List(a), Value::List(b)) => {
                        self.budget.alloc(a.len() + b.len())?;
                        let mut items = a.as_ref().clone();
                        items.extend(b.iter().cloned());
                        Ok(Value::list(items))
                    }
                    (BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge, Value::Str(a), Value::Str(b)) => {
                        let ord = a.cmp(b);
                        Ok(Value::Bool(match op {
                            BinaryOp::Lt => ord.is_lt(),
                            BinaryOp::Le => ord.is_le(),
                            BinaryOp::Gt => ord.is_gt(),
                            _ => ord.is_ge(),
                        }))
                    }
                    _ => Err(runtime(format!(
                        "unsupported operand types for {}: {} and {}",
                        op,
                        l.type_name(),
                        r.type_name()
                    ))),
                }
            }
        }
    }
}

/// A scalar operand stretched to a series length; `none` is all-missing.
fn broadcast(v: &Value, len: usize, op: BinaryOp) -> Result<Vec<Option<f64>>, ExecutionFailure> {
    match v {
        Value::None => Ok(vec![None; len]),
        other => match other.as_number() {
            Some(n) => Ok(vec![finite(n); len]),
            None => Err(runtime(format!(
                "unsupported operand types for {}: series and {}",
                op,
                other.type_name()
            ))),
        },
    }
}

fn attribute(obj: &Value, name: &str) -> Result<Value, ExecutionFailure> {
    match obj {
        Value::Module(module) => builtins::module_constant(module, name)
            .map(Value::Number)
            .ok_or_else(|| {
                if builtins::module_functions(module).contains(&name) {
                    runtime(format!("{}.{} must be called", module, name))
                } else {
                    runtime(format!("module '{}' has no member '{}'", module, name))
                }
            }),
        Value::Table(t) => t
            .columns
            .get(name)
            .map(|s| Value::Series(Rc::clone(s)))
            .ok_or_else(|| runtime(format!("data has no column '{}'", name))),
        Value::Map(m) => m
            .get(name)
            .cloned()
            .ok_or_else(|| runtime(format!("params has no key '{}'", name))),
        other => Err(runtime(format!(
            "{} has no attribute '{}'",
            other.type_name(),
            name
        ))),
    }
}

/// Python-style position: negative counts from the end.
fn position(idx: &Value, len: usize) -> Result<usize, ExecutionFailure> {
    let n = idx
        .as_number()
        .filter(|n| n.fract() == 0.0)
        .ok_or_else(|| runtime(format!("index must be an integer, got {}", idx)))?;
    let resolved = if n < 0.0 { len as f64 + n } else { n };
    if resolved < 0.0 || resolved >= len as f64 {
        return Err(runtime(format!("index {} out of range for length {}", n, len)));
    }
    Ok(resolved as usize)
}

fn index_value(obj: &Value, idx: &Value) -> Result<Value, ExecutionFailure> {
    match (obj, idx) {
        (Value::Table(_), Value::Str(name)) | (Value::Map(_), Value::Str(name)) => {
            attribute(obj, name)
        }
        (Value::List(items), _) => Ok(items[position(idx, items.len())?].clone()),
        (Value::Series(s), _) => {
            Ok(s.values[position(idx, s.len())?].map(Value::Number).unwrap_or(Value::None))
        }
        (Value::Str(s), _) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::str(&chars[position(idx, chars.len())?].to_string()))
        }
        _ => Err(runtime(format!(
            "{} cannot be indexed by {}",
            obj.type_name(),
            idx.type_name()
        ))),
    }
}

/// The params mapping as a read-only map value.
pub(crate) fn params_value(map: BTreeMap<String, Value>) -> Value {
    Value::Map(Rc::new(map))
}
