use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use serde_json::Map;

use crate::script::ast::FunctionDef;
use crate::script::eval::Env;
use crate::script::{ErrorKind, Limits, MAX_NESTING, ScriptError};

/// Runtime value
///
/// Lists and dicts are shared references, so aliasing behaves as in Python.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<[Value]>),
    Dict(Rc<RefCell<Dict>>),
    Range { start: i64, stop: i64, step: i64 },
    Function(Rc<Function>),
    Builtin(Builtin),
    Module(Module),
    Exception(Rc<ScriptError>),
}

/// A user-defined function or lambda
#[derive(Debug)]
pub struct Function {
    pub def: Rc<FunctionDef>,
    pub defaults: Vec<Option<Value>>,
    /// Enclosing function scope; module-level functions resolve through globals
    pub closure: Option<Weak<Env>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    Math,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Len,
    Range,
    Str,
    Int,
    Float,
    Bool,
    List,
    Dict,
    Abs,
    Min,
    Max,
    Sum,
    Round,
    Sorted,
    Enumerate,
    Print,
    Any,
    All,
    Zip,
    ExceptionType(ErrorKind),
    MathSqrt,
    MathFloor,
    MathCeil,
    MathFabs,
    MathPow,
}

impl Builtin {
    pub fn lookup(name: &str) -> Option<Self> {
        let builtin = match name {
            "len" => Builtin::Len,
            "range" => Builtin::Range,
            "str" => Builtin::Str,
            "int" => Builtin::Int,
            "float" => Builtin::Float,
            "bool" => Builtin::Bool,
            "list" => Builtin::List,
            "dict" => Builtin::Dict,
            "abs" => Builtin::Abs,
            "min" => Builtin::Min,
            "max" => Builtin::Max,
            "sum" => Builtin::Sum,
            "round" => Builtin::Round,
            "sorted" => Builtin::Sorted,
            "enumerate" => Builtin::Enumerate,
            "print" => Builtin::Print,
            "any" => Builtin::Any,
            "all" => Builtin::All,
            "zip" => Builtin::Zip,
            other => return ErrorKind::from_name(other).map(Builtin::ExceptionType),
        };
        Some(builtin)
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Len => "len",
            Builtin::Range => "range",
            Builtin::Str => "str",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Bool => "bool",
            Builtin::List => "list",
            Builtin::Dict => "dict",
            Builtin::Abs => "abs",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Sum => "sum",
            Builtin::Round => "round",
            Builtin::Sorted => "sorted",
            Builtin::Enumerate => "enumerate",
            Builtin::Print => "print",
            Builtin::Any => "any",
            Builtin::All => "all",
            Builtin::Zip => "zip",
            Builtin::ExceptionType(kind) => kind.name(),
            Builtin::MathSqrt => "sqrt",
            Builtin::MathFloor => "floor",
            Builtin::MathCeil => "ceil",
            Builtin::MathFabs => "fabs",
            Builtin::MathPow => "pow",
        }
    }
}

/// Hashable projection of a dict key; `1`, `1.0` and `True` collide as in Python
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<HashKey>),
}

/// Insertion-ordered dict
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: IndexMap<HashKey, (Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &Value) -> Result<Option<Value>, ScriptError> {
        Ok(self.entries.get(&key.hash_key()?).map(|(_, v)| v.clone()))
    }

    pub fn contains(&self, key: &Value) -> Result<bool, ScriptError> {
        Ok(self.entries.contains_key(&key.hash_key()?))
    }

    pub fn insert(&mut self, key: Value, value: Value) -> Result<(), ScriptError> {
        let hash = key.hash_key()?;
        match self.entries.get_mut(&hash) {
            // the first-inserted key object is kept, as in Python
            Some(entry) => entry.1 = value,
            None => {
                self.entries.insert(hash, (key, value));
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> Result<Option<Value>, ScriptError> {
        Ok(self.entries.shift_remove(&key.hash_key()?).map(|(_, v)| v))
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.values().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.values().map(|(_, v)| v.clone()).collect()
    }

    pub fn items(&self) -> Vec<(Value, Value)> {
        self.entries.values().cloned().collect()
    }
}

impl Value {
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(items.into())
    }

    pub fn dict(dict: Dict) -> Self {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Range { .. } => "range",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Module(_) => "module",
            Value::Exception(_) => "Exception",
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Builtin(_))
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(dict) => dict.borrow().len() > 0,
            Value::Range { .. } => range_len(self) > 0,
            _ => true,
        }
    }

    pub fn hash_key(&self) -> Result<HashKey, ScriptError> {
        self.hash_key_at(0)
    }

    fn hash_key_at(&self, depth: usize) -> Result<HashKey, ScriptError> {
        match self {
            Value::None => Ok(HashKey::None),
            Value::Bool(b) => Ok(HashKey::Int(i64::from(*b))),
            Value::Int(i) => Ok(HashKey::Int(*i)),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 9.0e15 {
                    Ok(HashKey::Int(*f as i64))
                } else {
                    Ok(HashKey::Float(f.to_bits()))
                }
            }
            Value::Str(s) => Ok(HashKey::Str(s.clone())),
            Value::Tuple(items) => {
                if depth >= MAX_NESTING {
                    return Err(ScriptError::nesting());
                }
                Ok(HashKey::Tuple(
                    items
                        .iter()
                        .map(|item| item.hash_key_at(depth + 1))
                        .collect::<Result<_, _>>()?,
                ))
            }
            other => Err(ScriptError::new(
                ErrorKind::TypeError,
                format!("unhashable type: '{}'", other.type_name()),
            )),
        }
    }

    /// Python `==`
    ///
    /// Nesting deeper than [`MAX_NESTING`] raises `RecursionError`.
    pub fn py_eq(&self, other: &Value) -> Result<bool, ScriptError> {
        self.eq_at(other, 0)
    }

    fn eq_at(&self, other: &Value, depth: usize) -> Result<bool, ScriptError> {
        if depth > MAX_NESTING {
            return Err(ScriptError::nesting());
        }
        Ok(match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                Rc::ptr_eq(a, b) || seq_eq(&a.borrow(), &b.borrow(), depth)?
            }
            (Value::Tuple(a), Value::Tuple(b)) => seq_eq(a, b, depth)?,
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(true);
                }
                let (a, b) = (a.borrow(), b.borrow());
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (key, value) in a.items() {
                    match b.get(&key)? {
                        Some(other) if other.is_same(&value) || other.eq_at(&value, depth + 1)? => {}
                        _ => return Ok(false),
                    }
                }
                true
            }
            (Value::Range { .. }, Value::Range { .. }) => range_eq(self, other),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Module(a), Value::Module(b)) => a == b,
            (Value::Exception(a), Value::Exception(b)) => Rc::ptr_eq(a, b),
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(Number::Int(x)), Some(Number::Int(y))) => x == y,
                (Some(x), Some(y)) => x.as_f64() == y.as_f64(),
                _ => false,
            },
        })
    }

    /// Python `is`
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::None, Value::None) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Range { .. }, Value::Range { .. }) => range_eq(self, other),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Module(a), Value::Module(b)) => a == b,
            (Value::Exception(a), Value::Exception(b)) => Rc::ptr_eq(a, b),
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }

    /// Ordering used by `<`, `sorted`, `min` and `max`
    pub fn compare(&self, other: &Value) -> Result<Ordering, ScriptError> {
        self.compare_at(other, 0)
    }

    fn compare_at(&self, other: &Value, depth: usize) -> Result<Ordering, ScriptError> {
        if depth > MAX_NESTING {
            return Err(ScriptError::nesting());
        }
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::List(a), Value::List(b)) => seq_cmp(&a.borrow(), &b.borrow(), depth),
            (Value::Tuple(a), Value::Tuple(b)) => seq_cmp(a, b, depth),
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(Number::Int(x)), Some(Number::Int(y))) => Ok(x.cmp(&y)),
                (Some(x), Some(y)) => Ok(x
                    .as_f64()
                    .partial_cmp(&y.as_f64())
                    .unwrap_or(Ordering::Equal)),
                _ => Err(ScriptError::new(
                    ErrorKind::TypeError,
                    format!(
                        "'<' not supported between instances of '{}' and '{}'",
                        a.type_name(),
                        b.type_name()
                    ),
                )),
            },
        }
    }

    pub fn as_number(&self) -> Option<Number> {
        match self {
            Value::Bool(b) => Some(Number::Int(i64::from(*b))),
            Value::Int(i) => Some(Number::Int(*i)),
            Value::Float(f) => Some(Number::Float(*f)),
            _ => None,
        }
    }

    /// Python `str(value)`, refusing output longer than `max_len` bytes
    pub fn to_str(&self, max_len: usize) -> Result<String, ScriptError> {
        match self {
            Value::Str(s) => Render::new(max_len).finish_with(s),
            Value::Exception(err) => Render::new(max_len).finish_with(&err.message),
            other => other.repr(max_len),
        }
    }

    /// Python `repr(value)`, refusing output longer than `max_len` bytes
    ///
    /// A container met again while it is still being rendered prints as
    /// `[...]` or `{...}`.
    pub fn repr(&self, max_len: usize) -> Result<String, ScriptError> {
        let mut render = Render::new(max_len);
        render.value(self)?;
        Ok(render.out)
    }

    /// Convert to JSON the way `jsonify` would render the value
    ///
    /// Self-referencing containers raise `ValueError`; ranges and aliased
    /// containers count against the collection and result-size ceilings.
    pub fn to_json(&self, limits: &Limits) -> Result<serde_json::Value, ScriptError> {
        JsonWriter {
            limits,
            active: Vec::new(),
            size: 0,
        }
        .value(self)
    }

    pub fn from_json(value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::str(s.as_str()),
            serde_json::Value::Array(items) => Value::list(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => {
                let mut dict = Dict::new();
                for (k, v) in map {
                    // string keys are always hashable
                    let _ = dict.insert(Value::str(k.as_str()), Value::from_json(v));
                }
                Value::dict(dict)
            }
        }
    }
}

/// Numeric view of bool/int/float operands
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

pub fn range_len(value: &Value) -> usize {
    let Value::Range { start, stop, step } = *value else {
        return 0;
    };
    let span = if step > 0 {
        i128::from(stop) - i128::from(start)
    } else {
        i128::from(start) - i128::from(stop)
    };
    if span <= 0 {
        return 0;
    }
    let step = i128::from(step).abs();
    usize::try_from((span + step - 1) / step).unwrap_or(usize::MAX)
}

/// Ranges compare by the sequence they produce
fn range_eq(a: &Value, b: &Value) -> bool {
    let (
        Value::Range { start: a_start, step: a_step, .. },
        Value::Range { start: b_start, step: b_step, .. },
    ) = (a, b)
    else {
        return false;
    };
    let len = range_len(a);
    if len != range_len(b) {
        return false;
    }
    len == 0 || (a_start == b_start && (len == 1 || a_step == b_step))
}

fn seq_eq(a: &[Value], b: &[Value], depth: usize) -> Result<bool, ScriptError> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b) {
        if !x.is_same(y) && !x.eq_at(y, depth + 1)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn seq_cmp(a: &[Value], b: &[Value], depth: usize) -> Result<Ordering, ScriptError> {
    for (x, y) in a.iter().zip(b) {
        if !x.is_same(y) && !x.eq_at(y, depth + 1)? {
            return x.compare_at(y, depth + 1);
        }
    }
    Ok(a.len().cmp(&b.len()))
}

/// Identity of a shared container, used to spot cycles
fn container_id(value: &Value) -> Option<*const ()> {
    match value {
        Value::List(items) => Some(Rc::as_ptr(items) as *const ()),
        Value::Dict(dict) => Some(Rc::as_ptr(dict) as *const ()),
        Value::Tuple(items) => Some(Rc::as_ptr(items) as *const ()),
        _ => None,
    }
}

/// Length-bounded `repr` writer
struct Render {
    out: String,
    max_len: usize,
    /// Containers on the path from the root to the value being written
    active: Vec<*const ()>,
}

impl Render {
    fn new(max_len: usize) -> Self {
        Self {
            out: String::new(),
            max_len,
            active: Vec::new(),
        }
    }

    fn push(&mut self, text: &str) -> Result<(), ScriptError> {
        if self.out.len().saturating_add(text.len()) > self.max_len {
            return Err(ScriptError::limit(format!(
                "String length exceeds the limit of {} characters",
                self.max_len
            )));
        }
        self.out.push_str(text);
        Ok(())
    }

    fn finish_with(mut self, text: &str) -> Result<String, ScriptError> {
        self.push(text)?;
        Ok(self.out)
    }

    /// Returns false when `value` is already being written
    fn enter(&mut self, value: &Value) -> Result<bool, ScriptError> {
        let Some(id) = container_id(value) else {
            return Ok(true);
        };
        if self.active.contains(&id) {
            return Ok(false);
        }
        if self.active.len() >= MAX_NESTING {
            return Err(ScriptError::nesting());
        }
        self.active.push(id);
        Ok(true)
    }

    fn sequence(&mut self, items: &[Value], close: &str) -> Result<(), ScriptError> {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.push(", ")?;
            }
            self.value(item)?;
        }
        self.push(close)
    }

    fn value(&mut self, value: &Value) -> Result<(), ScriptError> {
        match value {
            Value::None => self.push("None"),
            Value::Bool(true) => self.push("True"),
            Value::Bool(false) => self.push("False"),
            Value::Int(i) => self.push(&i.to_string()),
            Value::Float(f) => self.push(&float_repr(*f)),
            Value::Str(s) => self.push(&str_repr(s)),
            Value::List(items) => {
                if !self.enter(value)? {
                    return self.push("[...]");
                }
                self.push("[")?;
                self.sequence(&items.borrow(), "]")?;
                self.active.pop();
                Ok(())
            }
            Value::Tuple(items) => {
                self.enter(value)?;
                self.push("(")?;
                if items.len() == 1 {
                    self.value(&items[0])?;
                    self.push(",)")?;
                } else {
                    self.sequence(items, ")")?;
                }
                self.active.pop();
                Ok(())
            }
            Value::Dict(dict) => {
                if !self.enter(value)? {
                    return self.push("{...}");
                }
                self.push("{")?;
                for (i, (key, item)) in dict.borrow().items().iter().enumerate() {
                    if i > 0 {
                        self.push(", ")?;
                    }
                    self.value(key)?;
                    self.push(": ")?;
                    self.value(item)?;
                }
                self.push("}")?;
                self.active.pop();
                Ok(())
            }
            Value::Range { start, stop, step } if *step == 1 => {
                self.push(&format!("range({start}, {stop})"))
            }
            Value::Range { start, stop, step } => {
                self.push(&format!("range({start}, {stop}, {step})"))
            }
            Value::Function(f) => self.push(&format!("<function {}>", f.def.name)),
            Value::Builtin(b) => self.push(&format!("<built-in function {}>", b.name())),
            Value::Module(Module::Math) => self.push("<module 'math'>"),
            Value::Exception(err) => {
                self.push(&format!("{}({})", err.kind.name(), str_repr(&err.message)))
            }
        }
    }
}

/// Budgeted JSON conversion
struct JsonWriter<'a> {
    limits: &'a Limits,
    active: Vec<*const ()>,
    /// Nodes emitted plus string bytes copied
    size: usize,
}

impl JsonWriter<'_> {
    fn charge(&mut self, units: usize) -> Result<(), ScriptError> {
        self.size = self.size.saturating_add(units);
        if self.size > self.limits.max_result_size {
            return Err(ScriptError::limit(format!(
                "Result size exceeds the limit of {} units",
                self.limits.max_result_size
            )));
        }
        Ok(())
    }

    fn enter(&mut self, value: &Value) -> Result<(), ScriptError> {
        let Some(id) = container_id(value) else {
            return Ok(());
        };
        if self.active.contains(&id) {
            return Err(ScriptError::new(
                ErrorKind::ValueError,
                "Circular reference detected",
            ));
        }
        if self.active.len() >= MAX_NESTING {
            return Err(ScriptError::nesting());
        }
        self.active.push(id);
        Ok(())
    }

    fn string(&mut self, text: String) -> Result<serde_json::Value, ScriptError> {
        self.charge(text.len())?;
        Ok(serde_json::Value::String(text))
    }

    fn array(&mut self, value: &Value, items: &[Value]) -> Result<serde_json::Value, ScriptError> {
        self.enter(value)?;
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(self.value(item)?);
        }
        self.active.pop();
        Ok(serde_json::Value::Array(out))
    }

    fn value(&mut self, value: &Value) -> Result<serde_json::Value, ScriptError> {
        self.charge(1)?;
        match value {
            Value::None => Ok(serde_json::Value::Null),
            Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
            Value::Int(i) => Ok(serde_json::Value::from(*i)),
            Value::Float(f) => Ok(serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null)),
            Value::Str(s) => self.string(s.to_string()),
            Value::List(items) => self.array(value, &items.borrow()),
            Value::Tuple(items) => self.array(value, items),
            Value::Range { start, step, .. } => {
                let len = range_len(value);
                if len > self.limits.max_collection_len {
                    return Err(ScriptError::limit(format!(
                        "Collection size exceeds the limit of {} elements",
                        self.limits.max_collection_len
                    )));
                }
                self.charge(len)?;
                Ok(serde_json::Value::Array(
                    (0..len as i64)
                        .map(|i| serde_json::Value::from(start + i * step))
                        .collect(),
                ))
            }
            Value::Dict(dict) => {
                self.enter(value)?;
                let mut map = Map::new();
                for (key, item) in dict.borrow().items() {
                    let key = self.key(&key)?;
                    self.charge(key.len())?;
                    map.insert(key, self.value(&item)?);
                }
                self.active.pop();
                Ok(serde_json::Value::Object(map))
            }
            other => {
                let text = other.to_str(self.limits.max_collection_len)?;
                self.string(text)
            }
        }
    }

    fn key(&self, key: &Value) -> Result<String, ScriptError> {
        match key {
            Value::None => Ok("null".to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => other.to_str(self.limits.max_collection_len),
        }
    }
}

/// Python's quoting rules for `repr(str)`
pub fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Python's `repr(float)`: shortest round-trip digits, `.0` on integral values,
/// exponent notation outside `[1e-4, 1e16)`
pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let formatted = format!("{f:e}");
        let (mantissa, exponent) = formatted.split_once('e').unwrap_or((&formatted, "0"));
        let exponent: i32 = exponent.parse().unwrap_or(0);
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!("{mantissa}e{sign}{:02}", exponent.abs());
    }
    if f.fract() == 0.0 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}
