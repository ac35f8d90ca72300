use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Instant;

use crate::script::ast::{BinOp, CmpOp, Comprehension, Expr, FPart, Literal, Stmt, Target, UnaryOp};
use crate::script::value::{Builtin, Dict, Function, Module, Number, Value, range_len};
use crate::script::{ErrorKind, Limits, ScriptError};

/// Check the wall clock every this many operations
const DEADLINE_CHECK_INTERVAL: u64 = 256;

/// A variable scope
#[derive(Debug, Default)]
pub struct Env {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Weak<Env>>,
}

impl Env {
    fn child(parent: Option<Weak<Env>>) -> Rc<Env> {
        Rc::new(Env {
            vars: RefCell::new(HashMap::new()),
            parent,
        })
    }

    fn set(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.vars.borrow().get(name) {
            return Some(value.clone());
        }
        self.parent
            .as_ref()
            .and_then(Weak::upgrade)
            .and_then(|parent| parent.get(name))
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

type Exec = Result<Flow, ScriptError>;
pub(super) type Eval = Result<Value, ScriptError>;

/// Tree-walking evaluator with metered execution
pub struct Machine {
    limits: Limits,
    started: Instant,
    operations: u64,
    depth: usize,
    globals: Rc<Env>,
    /// Exceptions currently being handled, for bare `raise`
    handling: Vec<ScriptError>,
}

impl Machine {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            started: Instant::now(),
            operations: 0,
            depth: 0,
            globals: Env::child(None),
            handling: Vec::new(),
        }
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.set(name, value);
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.vars.borrow().get(name).cloned()
    }

    pub fn globals(&self) -> Vec<(String, Value)> {
        let mut bindings: Vec<(String, Value)> = self
            .globals
            .vars
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        bindings.sort_by(|a, b| a.0.cmp(&b.0));
        bindings
    }

    pub(super) fn run_module(&mut self, body: &[Stmt]) -> Result<(), ScriptError> {
        let globals = self.globals.clone();
        match self.exec_block(body, &globals)? {
            Flow::Normal => Ok(()),
            Flow::Return(_) => Err(ScriptError::new(
                ErrorKind::SyntaxError,
                "'return' outside function",
            )),
            Flow::Break | Flow::Continue => Err(ScriptError::new(
                ErrorKind::SyntaxError,
                "'break' or 'continue' outside loop",
            )),
        }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub(super) fn evaluate(&mut self, expr: &Expr) -> Eval {
        let globals = self.globals.clone();
        self.eval(expr, &globals)
    }

    /// Charge one operation against the budget and check the deadline
    pub(super) fn tick(&mut self) -> Result<(), ScriptError> {
        self.operations += 1;
        if self.operations > self.limits.max_operations {
            return Err(ScriptError::limit(format!(
                "Execution exceeded the limit of {} operations",
                self.limits.max_operations
            )));
        }
        if self.operations % DEADLINE_CHECK_INTERVAL == 0
            && self.started.elapsed() > self.limits.timeout
        {
            return Err(ScriptError::limit(format!(
                "Execution timed out after {} ms",
                self.limits.timeout.as_millis()
            )));
        }
        Ok(())
    }

    /// Reject collections that would grow past the size ceiling
    pub(super) fn check_len(&self, len: usize) -> Result<(), ScriptError> {
        if len > self.limits.max_collection_len {
            return Err(ScriptError::limit(format!(
                "Collection size exceeds the limit of {} elements",
                self.limits.max_collection_len
            )));
        }
        Ok(())
    }

    /// `str(value)` bounded by the collection ceiling
    pub(super) fn str_of(&self, value: &Value) -> Result<String, ScriptError> {
        value.to_str(self.limits.max_collection_len)
    }

    /// `repr(value)` bounded by the collection ceiling
    pub(super) fn repr_of(&self, value: &Value) -> Result<String, ScriptError> {
        value.repr(self.limits.max_collection_len)
    }

    // ---------------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------------

    fn exec_block(&mut self, body: &[Stmt], env: &Rc<Env>) -> Exec {
        for stmt in body {
            match self.exec(stmt, env)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, env: &Rc<Env>) -> Exec {
        self.tick()?;
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr, env)?;
            }
            Stmt::Assign(target, value) => {
                let value = self.eval(value, env)?;
                self.assign(target, value, env)?;
            }
            Stmt::AugAssign(target, op, value) => self.aug_assign(target, *op, value, env)?,
            Stmt::If { branches, orelse } => {
                for (test, body) in branches {
                    if self.eval(test, env)?.truthy() {
                        return self.exec_block(body, env);
                    }
                }
                return self.exec_block(orelse, env);
            }
            Stmt::For { target, iter, body } => {
                let iterable = self.eval(iter, env)?;
                for item in self.iterate(&iterable)? {
                    self.tick()?;
                    self.assign(target, item, env)?;
                    match self.exec_block(body, env)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            Stmt::While { test, body } => {
                while self.eval(test, env)?.truthy() {
                    match self.exec_block(body, env)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Continue => return Ok(Flow::Continue),
            Stmt::Pass => {}
            Stmt::Def(def) => {
                let defaults = def
                    .params
                    .iter()
                    .map(|p| p.default.as_ref().map(|d| self.eval(d, env)).transpose())
                    .collect::<Result<Vec<_>, _>>()?;
                let function = Function {
                    def: def.clone(),
                    defaults,
                    closure: self.closure_for(env),
                };
                env.set(&def.name, Value::Function(Rc::new(function)));
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::Raise(value) => return Err(self.raise(value.as_ref(), env)?),
            Stmt::Try {
                body,
                handlers,
                finally,
            } => {
                let outcome = match self.exec_block(body, env) {
                    Err(err) if err.kind.is_catchable() => {
                        let handler = handlers.iter().find(|h| {
                            h.kinds.is_empty() || h.kinds.iter().any(|k| err.kind.matches(k))
                        });
                        match handler {
                            Some(handler) => {
                                if let Some(name) = &handler.binding {
                                    env.set(name, Value::Exception(Rc::new(err.clone())));
                                }
                                self.handling.push(err);
                                let outcome = self.exec_block(&handler.body, env);
                                self.handling.pop();
                                outcome
                            }
                            None => Err(err),
                        }
                    }
                    other => other,
                };

                if finally.is_empty() {
                    return outcome;
                }
                // a limit abort skips cleanup blocks entirely
                if matches!(&outcome, Err(err) if !err.kind.is_catchable()) {
                    return outcome;
                }
                return match self.exec_block(finally, env)? {
                    Flow::Normal => outcome,
                    flow => Ok(flow),
                };
            }
            Stmt::Import(module) => {
                if module != "math" {
                    return Err(ScriptError::new(
                        ErrorKind::ImportError,
                        format!("Import of module '{module}' is not allowed"),
                    ));
                }
                env.set("math", Value::Module(Module::Math));
            }
        }
        Ok(Flow::Normal)
    }

    fn closure_for(&self, env: &Rc<Env>) -> Option<Weak<Env>> {
        if Rc::ptr_eq(env, &self.globals) {
            None
        } else {
            Some(Rc::downgrade(env))
        }
    }

    fn raise(&mut self, value: Option<&Expr>, env: &Rc<Env>) -> Result<ScriptError, ScriptError> {
        let Some(expr) = value else {
            return Ok(self.handling.last().cloned().unwrap_or_else(|| {
                ScriptError::new(ErrorKind::RuntimeError, "No active exception to reraise")
            }));
        };
        match self.eval(expr, env)? {
            Value::Exception(err) => Ok((*err).clone()),
            Value::Builtin(Builtin::ExceptionType(kind)) => Ok(ScriptError::new(kind, "")),
            other => Ok(ScriptError::new(
                ErrorKind::TypeError,
                format!(
                    "exceptions must derive from BaseException, not '{}'",
                    other.type_name()
                ),
            )),
        }
    }

    fn assign(&mut self, target: &Target, value: Value, env: &Rc<Env>) -> Result<(), ScriptError> {
        match target {
            Target::Name(name) => {
                env.set(name, value);
                Ok(())
            }
            Target::Subscript(object, index) => {
                let object = self.eval(object, env)?;
                let index = self.eval(index, env)?;
                self.set_item(&object, index, value)
            }
            Target::Tuple(targets) => {
                let items: Vec<Value> = self.iterate(&value)?.collect();
                if items.len() != targets.len() {
                    return Err(ScriptError::new(
                        ErrorKind::ValueError,
                        format!(
                            "expected {} values to unpack, got {}",
                            targets.len(),
                            items.len()
                        ),
                    ));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item, env)?;
                }
                Ok(())
            }
        }
    }

    fn aug_assign(
        &mut self,
        target: &Target,
        op: BinOp,
        value: &Expr,
        env: &Rc<Env>,
    ) -> Result<(), ScriptError> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(name, env)?;
                let rhs = self.eval(value, env)?;
                // `list += iterable` extends in place
                if let (BinOp::Add, Value::List(items)) = (op, &current) {
                    let extra: Vec<Value> = self.iterate(&rhs)?.collect();
                    self.check_len(items.borrow().len() + extra.len())?;
                    items.borrow_mut().extend(extra);
                    return Ok(());
                }
                let result = self.binary(op, current, rhs)?;
                env.set(name, result);
                Ok(())
            }
            Target::Subscript(object, index) => {
                let object = self.eval(object, env)?;
                let index = self.eval(index, env)?;
                let current = self.get_item(&object, &index)?;
                let rhs = self.eval(value, env)?;
                let result = self.binary(op, current, rhs)?;
                self.set_item(&object, index, result)
            }
            Target::Tuple(_) => Err(ScriptError::new(
                ErrorKind::SyntaxError,
                "illegal expression for augmented assignment",
            )),
        }
    }

    // ---------------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------------

    fn lookup(&self, name: &str, env: &Rc<Env>) -> Eval {
        if let Some(value) = env.get(name) {
            return Ok(value);
        }
        if let Some(value) = self.global(name) {
            return Ok(value);
        }
        Builtin::lookup(name).map(Value::Builtin).ok_or_else(|| {
            ScriptError::new(
                ErrorKind::NameError,
                format!("name '{name}' is not defined"),
            )
        })
    }

    pub(super) fn eval(&mut self, expr: &Expr, env: &Rc<Env>) -> Eval {
        self.tick()?;
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                Literal::None => Value::None,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::Str(s) => Value::str(s.as_str()),
            }),
            Expr::Name(name) => self.lookup(name, env),
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FPart::Text(text) => out.push_str(text),
                        FPart::Value { expr, repr, spec } => {
                            let value = self.eval(expr, env)?;
                            let text = if *repr {
                                self.repr_of(&value)?
                            } else {
                                self.str_of(&value)?
                            };
                            match spec {
                                Some(spec) => out.push_str(&format_spec(
                                    &value,
                                    &text,
                                    spec,
                                    self.limits.max_collection_len,
                                )?),
                                None => out.push_str(&text),
                            }
                        }
                    }
                    self.check_len(out.len())?;
                }
                Ok(Value::str(out))
            }
            Expr::List(items) => {
                let values = self.eval_all(items, env)?;
                Ok(Value::list(values))
            }
            Expr::Tuple(items) => {
                let values = self.eval_all(items, env)?;
                Ok(Value::tuple(values))
            }
            Expr::Dict(entries) => {
                let mut dict = Dict::new();
                for (key, value) in entries {
                    let key = self.eval(key, env)?;
                    let value = self.eval(value, env)?;
                    dict.insert(key, value)?;
                }
                Ok(Value::dict(dict))
            }
            Expr::ListComp(element, comp) => {
                let mut out = Vec::new();
                self.comprehend(comp, env, |machine, scope| {
                    out.push(machine.eval(element, scope)?);
                    machine.check_len(out.len())
                })?;
                Ok(Value::list(out))
            }
            Expr::DictComp(entry, comp) => {
                let mut dict = Dict::new();
                self.comprehend(comp, env, |machine, scope| {
                    let key = machine.eval(&entry.0, scope)?;
                    let value = machine.eval(&entry.1, scope)?;
                    dict.insert(key, value)?;
                    machine.check_len(dict.len())
                })?;
                Ok(Value::dict(dict))
            }
            Expr::Unary(op, operand) => {
                let value = self.eval(operand, env)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
                    UnaryOp::Pos => match value.as_number() {
                        Some(Number::Int(i)) => Ok(Value::Int(i)),
                        Some(Number::Float(f)) => Ok(Value::Float(f)),
                        None => Err(bad_operand("unary +", &value)),
                    },
                    UnaryOp::Neg => match value.as_number() {
                        Some(Number::Int(i)) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
                        Some(Number::Float(f)) => Ok(Value::Float(-f)),
                        None => Err(bad_operand("unary -", &value)),
                    },
                }
            }
            Expr::Binary(left, op, right) => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                self.binary(*op, left, right)
            }
            Expr::Compare(first, rest) => {
                let mut left = self.eval(first, env)?;
                for (op, right) in rest {
                    let right = self.eval(right, env)?;
                    if !self.compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::And(left, right) => {
                let left = self.eval(left, env)?;
                if !left.truthy() {
                    return Ok(left);
                }
                self.eval(right, env)
            }
            Expr::Or(left, right) => {
                let left = self.eval(left, env)?;
                if left.truthy() {
                    return Ok(left);
                }
                self.eval(right, env)
            }
            Expr::IfElse { test, body, orelse } => {
                if self.eval(test, env)?.truthy() {
                    self.eval(body, env)
                } else {
                    self.eval(orelse, env)
                }
            }
            Expr::Lambda(def) => {
                let defaults = def
                    .params
                    .iter()
                    .map(|p| p.default.as_ref().map(|d| self.eval(d, env)).transpose())
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Function(Rc::new(Function {
                    def: def.clone(),
                    defaults,
                    closure: self.closure_for(env),
                })))
            }
            Expr::Call { func, args, kwargs } => {
                if let Expr::Attribute(object, name) = func.as_ref() {
                    let object = self.eval(object, env)?;
                    let args = self.eval_all(args, env)?;
                    let kwargs = self.eval_kwargs(kwargs, env)?;
                    if let Value::Module(module) = object {
                        let callable = module_attribute(module, name)?;
                        return self.call_value(&callable, args, kwargs);
                    }
                    return self.call_method(&object, name, args, kwargs);
                }
                let callable = self.eval(func, env)?;
                let args = self.eval_all(args, env)?;
                let kwargs = self.eval_kwargs(kwargs, env)?;
                self.call_value(&callable, args, kwargs)
            }
            Expr::Attribute(object, name) => match self.eval(object, env)? {
                Value::Module(module) => module_attribute(module, name),
                other => Err(ScriptError::new(
                    ErrorKind::AttributeError,
                    format!("'{}' object has no attribute '{name}'", other.type_name()),
                )),
            },
            Expr::Subscript(object, index) => {
                let object = self.eval(object, env)?;
                if let Expr::Slice(lower, upper) = index.as_ref() {
                    let lower = lower.as_ref().map(|e| self.eval(e, env)).transpose()?;
                    let upper = upper.as_ref().map(|e| self.eval(e, env)).transpose()?;
                    return slice(&object, lower.as_ref(), upper.as_ref());
                }
                let index = self.eval(index, env)?;
                self.get_item(&object, &index)
            }
            Expr::Slice(..) => Err(ScriptError::new(ErrorKind::SyntaxError, "invalid syntax")),
        }
    }

    fn eval_all(&mut self, items: &[Expr], env: &Rc<Env>) -> Result<Vec<Value>, ScriptError> {
        let values = items
            .iter()
            .map(|item| self.eval(item, env))
            .collect::<Result<Vec<_>, _>>()?;
        self.check_len(values.len())?;
        Ok(values)
    }

    fn eval_kwargs(
        &mut self,
        kwargs: &[(String, Expr)],
        env: &Rc<Env>,
    ) -> Result<Vec<(String, Value)>, ScriptError> {
        kwargs
            .iter()
            .map(|(name, expr)| Ok((name.clone(), self.eval(expr, env)?)))
            .collect()
    }

    /// Run `body` once per element that passes every condition, in a fresh scope
    fn comprehend(
        &mut self,
        comp: &Comprehension,
        env: &Rc<Env>,
        mut body: impl FnMut(&mut Machine, &Rc<Env>) -> Result<(), ScriptError>,
    ) -> Result<(), ScriptError> {
        let iterable = self.eval(&comp.iter, env)?;
        let scope = Env::child(Some(Rc::downgrade(env)));
        'items: for item in self.iterate(&iterable)? {
            self.tick()?;
            self.assign(&comp.target, item, &scope)?;
            for condition in &comp.conditions {
                if !self.eval(condition, &scope)?.truthy() {
                    continue 'items;
                }
            }
            body(self, &scope)?;
        }
        Ok(())
    }

    pub(super) fn call_value(
        &mut self,
        callable: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Eval {
        match callable {
            Value::Function(function) => self.call_function(function, args, kwargs),
            Value::Builtin(builtin) => self.call_builtin(*builtin, args, kwargs),
            other => Err(ScriptError::new(
                ErrorKind::TypeError,
                format!("'{}' object is not callable", other.type_name()),
            )),
        }
    }

    fn call_function(
        &mut self,
        function: &Rc<Function>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Eval {
        let def = &function.def;
        if args.len() > def.params.len() {
            return Err(ScriptError::new(
                ErrorKind::TypeError,
                format!(
                    "{}() takes {} positional arguments but {} were given",
                    def.name,
                    def.params.len(),
                    args.len()
                ),
            ));
        }
        if self.depth >= self.limits.max_depth {
            return Err(ScriptError::limit("maximum recursion depth exceeded"));
        }

        let scope = Env::child(function.closure.clone());
        let mut bound = vec![None; def.params.len()];
        for (slot, arg) in bound.iter_mut().zip(args) {
            *slot = Some(arg);
        }
        for (name, value) in kwargs {
            let Some(position) = def.params.iter().position(|p| p.name == name) else {
                return Err(ScriptError::new(
                    ErrorKind::TypeError,
                    format!("{}() got an unexpected keyword argument '{name}'", def.name),
                ));
            };
            if bound[position].is_some() {
                return Err(ScriptError::new(
                    ErrorKind::TypeError,
                    format!("{}() got multiple values for argument '{name}'", def.name),
                ));
            }
            bound[position] = Some(value);
        }
        for ((param, slot), default) in def.params.iter().zip(bound).zip(&function.defaults) {
            let value = slot.or_else(|| default.clone()).ok_or_else(|| {
                ScriptError::new(
                    ErrorKind::TypeError,
                    format!(
                        "{}() missing required positional argument: '{}'",
                        def.name, param.name
                    ),
                )
            })?;
            scope.set(&param.name, value);
        }

        self.depth += 1;
        let outcome = self.exec_block(&def.body, &scope);
        self.depth -= 1;
        match outcome? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    pub(super) fn binary(&mut self, op: BinOp, left: Value, right: Value) -> Eval {
        match (op, &left, &right) {
            (BinOp::Add, Value::Str(a), Value::Str(b)) => {
                self.check_len(a.len() + b.len())?;
                return Ok(Value::str(format!("{a}{b}")));
            }
            (BinOp::Add, Value::List(a), Value::List(b)) => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                self.check_len(items.len())?;
                return Ok(Value::list(items));
            }
            (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
                let items: Vec<Value> = a.iter().chain(b.iter()).cloned().collect();
                self.check_len(items.len())?;
                return Ok(Value::tuple(items));
            }
            (BinOp::Mul, Value::Str(_) | Value::List(_), Value::Int(_) | Value::Bool(_)) => {
                return self.repeat(&left, &right);
            }
            (BinOp::Mul, Value::Int(_) | Value::Bool(_), Value::Str(_) | Value::List(_)) => {
                return self.repeat(&right, &left);
            }
            _ => {}
        }

        let (Some(a), Some(b)) = (left.as_number(), right.as_number()) else {
            return Err(ScriptError::new(
                ErrorKind::TypeError,
                format!(
                    "unsupported operand type(s) for {}: '{}' and '{}'",
                    op.symbol(),
                    left.type_name(),
                    right.type_name()
                ),
            ));
        };
        arithmetic(op, a, b)
    }

    fn repeat(&self, sequence: &Value, count: &Value) -> Eval {
        let count = match count.as_number() {
            Some(Number::Int(n)) => usize::try_from(n.max(0)).unwrap_or(usize::MAX),
            _ => 0,
        };
        match sequence {
            Value::Str(s) => {
                self.check_len(s.len().saturating_mul(count))?;
                Ok(Value::str(s.repeat(count)))
            }
            Value::List(items) => {
                let items = items.borrow();
                self.check_len(items.len().saturating_mul(count))?;
                let mut out = Vec::with_capacity(items.len() * count);
                for _ in 0..count {
                    out.extend(items.iter().cloned());
                }
                Ok(Value::list(out))
            }
            other => Err(bad_operand("*", other)),
        }
    }

    fn compare(&mut self, op: CmpOp, left: &Value, right: &Value) -> Result<bool, ScriptError> {
        use std::cmp::Ordering::{Greater, Less};
        Ok(match op {
            CmpOp::Eq => left.py_eq(right)?,
            CmpOp::NotEq => !left.py_eq(right)?,
            CmpOp::Lt => left.compare(right)? == Less,
            CmpOp::LtE => left.compare(right)? != Greater,
            CmpOp::Gt => left.compare(right)? == Greater,
            CmpOp::GtE => left.compare(right)? != Less,
            CmpOp::In => self.contains(right, left)?,
            CmpOp::NotIn => !self.contains(right, left)?,
            CmpOp::Is => left.is_same(right),
            CmpOp::IsNot => !left.is_same(right),
        })
    }

    pub(super) fn contains(&mut self, container: &Value, item: &Value) -> Result<bool, ScriptError> {
        match container {
            Value::Str(haystack) => match item {
                Value::Str(needle) => Ok(haystack.contains(needle.as_ref())),
                other => Err(ScriptError::new(
                    ErrorKind::TypeError,
                    format!(
                        "'in <string>' requires string as left operand, not {}",
                        other.type_name()
                    ),
                )),
            },
            Value::Dict(dict) => dict.borrow().contains(item),
            Value::List(_) | Value::Tuple(_) | Value::Range { .. } => {
                for candidate in self.iterate(container)? {
                    self.tick()?;
                    if candidate.py_eq(item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            other => Err(ScriptError::new(
                ErrorKind::TypeError,
                format!("argument of type '{}' is not iterable", other.type_name()),
            )),
        }
    }

    /// Snapshot the elements of an iterable
    pub(super) fn iterate(&self, value: &Value) -> Result<ValueIter, ScriptError> {
        let items = match value {
            Value::Range { start, stop, step } => {
                return Ok(ValueIter::Range {
                    next: *start,
                    stop: *stop,
                    step: *step,
                });
            }
            Value::List(items) => items.borrow().clone(),
            Value::Tuple(items) => items.to_vec(),
            Value::Dict(dict) => dict.borrow().keys(),
            Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
            other => {
                return Err(ScriptError::new(
                    ErrorKind::TypeError,
                    format!("'{}' object is not iterable", other.type_name()),
                ));
            }
        };
        Ok(ValueIter::Items(items.into_iter()))
    }

    pub(super) fn get_item(&self, object: &Value, index: &Value) -> Eval {
        match object {
            Value::Dict(dict) => match dict.borrow().get(index)? {
                Some(value) => Ok(value),
                None => Err(ScriptError::new(ErrorKind::KeyError, self.repr_of(index)?)),
            },
            Value::List(items) => {
                let items = items.borrow();
                let position = sequence_index(index, items.len(), "list")?;
                Ok(items[position].clone())
            }
            Value::Tuple(items) => {
                let position = sequence_index(index, items.len(), "tuple")?;
                Ok(items[position].clone())
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let position = sequence_index(index, chars.len(), "string")?;
                Ok(Value::str(chars[position].to_string()))
            }
            Value::Range { start, step, .. } => {
                let position = sequence_index(index, range_len(object), "range object")?;
                Ok(Value::Int(start + position as i64 * step))
            }
            other => Err(ScriptError::new(
                ErrorKind::TypeError,
                format!("'{}' object is not subscriptable", other.type_name()),
            )),
        }
    }

    fn set_item(&self, object: &Value, index: Value, value: Value) -> Result<(), ScriptError> {
        match object {
            Value::Dict(dict) => {
                let mut dict = dict.borrow_mut();
                dict.insert(index, value)?;
                self.check_len(dict.len())
            }
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let position = sequence_index(&index, items.len(), "list")?;
                items[position] = value;
                Ok(())
            }
            other => Err(ScriptError::new(
                ErrorKind::TypeError,
                format!(
                    "'{}' object does not support item assignment",
                    other.type_name()
                ),
            )),
        }
    }
}

/// Iterator over a snapshot of a collection or a lazy range
pub enum ValueIter {
    Range { next: i64, stop: i64, step: i64 },
    Items(std::vec::IntoIter<Value>),
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            ValueIter::Range { next, stop, step } => {
                let more = if *step > 0 { *next < *stop } else { *next > *stop };
                if !more {
                    return None;
                }
                let current = *next;
                *next = next.checked_add(*step).unwrap_or(*stop);
                Some(Value::Int(current))
            }
            ValueIter::Items(items) => items.next(),
        }
    }
}

fn module_attribute(module: Module, name: &str) -> Eval {
    let value = match (module, name) {
        (Module::Math, "pi") => Value::Float(std::f64::consts::PI),
        (Module::Math, "e") => Value::Float(std::f64::consts::E),
        (Module::Math, "sqrt") => Value::Builtin(Builtin::MathSqrt),
        (Module::Math, "floor") => Value::Builtin(Builtin::MathFloor),
        (Module::Math, "ceil") => Value::Builtin(Builtin::MathCeil),
        (Module::Math, "fabs") => Value::Builtin(Builtin::MathFabs),
        (Module::Math, "pow") => Value::Builtin(Builtin::MathPow),
        _ => {
            return Err(ScriptError::new(
                ErrorKind::AttributeError,
                format!("module 'math' has no attribute '{name}'"),
            ));
        }
    };
    Ok(value)
}

fn sequence_index(index: &Value, len: usize, what: &str) -> Result<usize, ScriptError> {
    let Some(Number::Int(i)) = index.as_number() else {
        return Err(ScriptError::new(
            ErrorKind::TypeError,
            format!("{what} indices must be integers, not {}", index.type_name()),
        ));
    };
    let len = len as i64;
    let position = if i < 0 { i + len } else { i };
    if position < 0 || position >= len {
        return Err(ScriptError::new(
            ErrorKind::IndexError,
            format!("{what} index out of range"),
        ));
    }
    Ok(position as usize)
}

fn slice(object: &Value, lower: Option<&Value>, upper: Option<&Value>) -> Eval {
    let bound = |value: Option<&Value>, default: i64, len: i64| -> Result<i64, ScriptError> {
        match value {
            None | Some(Value::None) => Ok(default),
            Some(v) => match v.as_number() {
                Some(Number::Int(i)) => Ok(if i < 0 { (i + len).max(0) } else { i.min(len) }),
                _ => Err(ScriptError::new(
                    ErrorKind::TypeError,
                    "slice indices must be integers or None",
                )),
            },
        }
    };
    let range = |len: usize| -> Result<std::ops::Range<usize>, ScriptError> {
        let len = len as i64;
        let start = bound(lower, 0, len)?;
        let end = bound(upper, len, len)?.max(start);
        Ok(start as usize..end as usize)
    };

    match object {
        Value::List(items) => {
            let items = items.borrow();
            Ok(Value::list(items[range(items.len())?].to_vec()))
        }
        Value::Tuple(items) => Ok(Value::tuple(items[range(items.len())?].to_vec())),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::str(chars[range(chars.len())?].iter().collect::<String>()))
        }
        other => Err(ScriptError::new(
            ErrorKind::TypeError,
            format!("'{}' object is not subscriptable", other.type_name()),
        )),
    }
}

fn arithmetic(op: BinOp, a: Number, b: Number) -> Eval {
    if let (Number::Int(x), Number::Int(y)) = (a, b) {
        return int_arithmetic(op, x, y);
    }
    let (x, y) = (a.as_f64(), b.as_f64());
    let result = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Err(zero_division("division by zero"));
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return Err(zero_division("float floor division by zero"));
            }
            (x / y).floor()
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Err(zero_division("float modulo"));
            }
            let r = x % y;
            if r != 0.0 && (r < 0.0) != (y < 0.0) { r + y } else { r }
        }
        BinOp::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err(zero_division("0.0 cannot be raised to a negative power"));
            }
            x.powf(y)
        }
    };
    Ok(Value::Float(result))
}

fn int_arithmetic(op: BinOp, x: i64, y: i64) -> Eval {
    let result = match op {
        BinOp::Add => x.checked_add(y),
        BinOp::Sub => x.checked_sub(y),
        BinOp::Mul => x.checked_mul(y),
        BinOp::Div => {
            if y == 0 {
                return Err(zero_division("division by zero"));
            }
            return Ok(Value::Float(x as f64 / y as f64));
        }
        BinOp::FloorDiv => {
            if y == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            x.checked_div(y).map(|q| {
                if x % y != 0 && ((x < 0) != (y < 0)) {
                    q - 1
                } else {
                    q
                }
            })
        }
        BinOp::Mod => {
            if y == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            x.checked_rem(y)
                .map(|r| if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r })
        }
        BinOp::Pow => {
            if y < 0 {
                if x == 0 {
                    return Err(zero_division("0.0 cannot be raised to a negative power"));
                }
                return Ok(Value::Float((x as f64).powf(y as f64)));
            }
            u32::try_from(y).ok().and_then(|e| x.checked_pow(e))
        }
    };
    result.map(Value::Int).ok_or_else(overflow)
}

/// Apply a `format_spec` such as `.2f`, `>8`, `,` or `.1%`
///
/// Width and precision above `max_len` are rejected before anything is allocated.
fn format_spec(value: &Value, text: &str, spec: &str, max_len: usize) -> Result<String, ScriptError> {
    let invalid = || {
        ScriptError::new(
            ErrorKind::ValueError,
            format!("Invalid format specifier '{spec}' for object of type '{}'", value.type_name()),
        )
    };
    let bounded = |n: usize| {
        if n > max_len {
            Err(ScriptError::limit(format!(
                "Format width or precision exceeds the limit of {max_len} characters"
            )))
        } else {
            Ok(n)
        }
    };

    let mut chars = spec.chars().peekable();
    let mut fill = ' ';
    let mut align = None;
    let rest: Vec<char> = spec.chars().collect();
    if rest.len() >= 2 && matches!(rest[1], '<' | '>' | '^') {
        fill = rest[0];
        align = Some(rest[1]);
        chars.next();
        chars.next();
    } else if matches!(rest.first(), Some('<' | '>' | '^')) {
        align = rest.first().copied();
        chars.next();
    }

    let mut width = String::new();
    let mut grouping = false;
    let mut precision: Option<usize> = None;
    let mut kind = None;
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            width.push(c);
            chars.next();
        } else {
            break;
        }
    }
    if chars.peek() == Some(&',') {
        grouping = true;
        chars.next();
    }
    if chars.peek() == Some(&'.') {
        chars.next();
        let mut digits = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() {
                digits.push(c);
                chars.next();
            } else {
                break;
            }
        }
        precision = Some(bounded(digits.parse().map_err(|_| invalid())?)?);
    }
    if let Some(c) = chars.next() {
        kind = Some(c);
    }
    if chars.next().is_some() {
        return Err(invalid());
    }

    let number = value.as_number();
    let mut body = match (kind, number) {
        (Some('f' | 'F'), Some(n)) => format!("{:.*}", precision.unwrap_or(6), n.as_f64()),
        (Some('%'), Some(n)) => format!("{:.*}%", precision.unwrap_or(6), n.as_f64() * 100.0),
        (Some('d'), Some(Number::Int(i))) => i.to_string(),
        (None, Some(n)) if precision.is_some() => {
            format!("{:.*}", precision.unwrap_or(6), n.as_f64())
        }
        (None | Some('s'), _) if number.is_none() || kind.is_none() => match precision {
            Some(p) if number.is_none() => text.chars().take(p).collect(),
            _ => text.to_string(),
        },
        _ => return Err(invalid()),
    };

    if grouping && number.is_some() {
        body = group_thousands(&body);
    }

    let width: usize = if width.is_empty() { 0 } else { width.parse().map_err(|_| invalid())? };
    let width = bounded(width)?;
    let len = body.chars().count();
    if len >= width {
        return Ok(body);
    }
    let pad = width - len;
    let align = align.unwrap_or(if number.is_some() { '>' } else { '<' });
    let fill_str = |n: usize| std::iter::repeat_n(fill, n).collect::<String>();
    Ok(match align {
        '<' => format!("{body}{}", fill_str(pad)),
        '^' => format!("{}{body}{}", fill_str(pad / 2), fill_str(pad - pad / 2)),
        _ => format!("{}{body}", fill_str(pad)),
    })
}

fn group_thousands(number: &str) -> String {
    let (sign, digits) = match number.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", number),
    };
    let (integer, fraction) = match digits.find(|c: char| !c.is_ascii_digit()) {
        Some(split) => digits.split_at(split),
        None => (digits, ""),
    };
    let mut grouped = String::new();
    for (i, c) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("{sign}{grouped}{fraction}")
}

fn zero_division(message: &str) -> ScriptError {
    ScriptError::new(ErrorKind::ZeroDivisionError, message)
}

fn overflow() -> ScriptError {
    ScriptError::new(ErrorKind::OverflowError, "integer overflow")
}

fn bad_operand(op: &str, value: &Value) -> ScriptError {
    ScriptError::new(
        ErrorKind::TypeError,
        format!("bad operand type for {op}: '{}'", value.type_name()),
    )
}
