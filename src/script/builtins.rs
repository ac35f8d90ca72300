use std::cmp::Ordering;

use crate::script::ast::BinOp;
use crate::script::eval::{Eval, Machine};
use crate::script::value::{Builtin, Dict, Number, Value, range_len, str_repr};
use crate::script::{ErrorKind, ScriptError};

type Kwargs = Vec<(String, Value)>;

fn type_error(message: impl Into<String>) -> ScriptError {
    ScriptError::new(ErrorKind::TypeError, message)
}

fn value_error(message: impl Into<String>) -> ScriptError {
    ScriptError::new(ErrorKind::ValueError, message)
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), ScriptError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("exactly {min}")
        } else {
            format!("{min} to {max}")
        };
        return Err(type_error(format!(
            "{name}() takes {expected} arguments ({} given)",
            args.len()
        )));
    }
    Ok(())
}

fn take_kwarg(kwargs: &mut Kwargs, name: &str) -> Option<Value> {
    let position = kwargs.iter().position(|(k, _)| k == name)?;
    Some(kwargs.remove(position).1)
}

fn reject_kwargs(function: &str, kwargs: &Kwargs) -> Result<(), ScriptError> {
    match kwargs.first() {
        Some((name, _)) => Err(type_error(format!(
            "{function}() got an unexpected keyword argument '{name}'"
        ))),
        None => Ok(()),
    }
}

fn expect_int(value: &Value, what: &str) -> Result<i64, ScriptError> {
    match value.as_number() {
        Some(Number::Int(i)) => Ok(i),
        _ => Err(type_error(format!(
            "'{}' object cannot be interpreted as an integer in {what}",
            value.type_name()
        ))),
    }
}

fn expect_float(value: &Value, function: &str) -> Result<f64, ScriptError> {
    value
        .as_number()
        .map(Number::as_f64)
        .ok_or_else(|| type_error(format!("{function}() requires a number, not '{}'", value.type_name())))
}

fn expect_str<'a>(value: &'a Value, what: &str) -> Result<&'a str, ScriptError> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(type_error(format!(
            "{what} must be str, not {}",
            other.type_name()
        ))),
    }
}

fn float_to_int(f: f64) -> Eval {
    if f.is_nan() {
        return Err(value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() || f.abs() >= 9.2e18 {
        return Err(ScriptError::new(
            ErrorKind::OverflowError,
            "cannot convert float infinity to integer",
        ));
    }
    Ok(Value::Int(f as i64))
}

impl Machine {
    pub(super) fn call_builtin(&mut self, builtin: Builtin, args: Vec<Value>, mut kwargs: Kwargs) -> Eval {
        let name = builtin.name();
        match builtin {
            Builtin::Len => {
                reject_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 1)?;
                let len = match &args[0] {
                    Value::Str(s) => s.chars().count(),
                    Value::List(items) => items.borrow().len(),
                    Value::Tuple(items) => items.len(),
                    Value::Dict(dict) => dict.borrow().len(),
                    range @ Value::Range { .. } => range_len(range),
                    other => {
                        return Err(type_error(format!(
                            "object of type '{}' has no len()",
                            other.type_name()
                        )));
                    }
                };
                Ok(Value::Int(len as i64))
            }
            Builtin::Range => {
                reject_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 3)?;
                let ints = args
                    .iter()
                    .map(|a| expect_int(a, "range()"))
                    .collect::<Result<Vec<_>, _>>()?;
                let (start, stop, step) = match ints.as_slice() {
                    [stop] => (0, *stop, 1),
                    [start, stop] => (*start, *stop, 1),
                    [start, stop, step] => (*start, *stop, *step),
                    _ => unreachable!("arity checked above"),
                };
                if step == 0 {
                    return Err(value_error("range() arg 3 must not be zero"));
                }
                Ok(Value::Range { start, stop, step })
            }
            Builtin::Str => {
                arity(name, &args, 0, 1)?;
                match args.first() {
                    Some(arg) => Ok(Value::str(self.str_of(arg)?)),
                    None => Ok(Value::str("")),
                }
            }
            Builtin::Int => {
                arity(name, &args, 0, 1)?;
                match args.first() {
                    None => Ok(Value::Int(0)),
                    Some(Value::Bool(b)) => Ok(Value::Int(i64::from(*b))),
                    Some(Value::Int(i)) => Ok(Value::Int(*i)),
                    Some(Value::Float(f)) => float_to_int(f.trunc()),
                    Some(Value::Str(s)) => s.trim().replace('_', "").parse::<i64>().map(Value::Int).map_err(|_| {
                        value_error(format!(
                            "invalid literal for int() with base 10: {}",
                            str_repr(s)
                        ))
                    }),
                    Some(other) => Err(type_error(format!(
                        "int() argument must be a string or a number, not '{}'",
                        other.type_name()
                    ))),
                }
            }
            Builtin::Float => {
                arity(name, &args, 0, 1)?;
                match args.first() {
                    None => Ok(Value::Float(0.0)),
                    Some(Value::Str(s)) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                        value_error(format!(
                            "could not convert string to float: {}",
                            str_repr(s)
                        ))
                    }),
                    Some(other) => Ok(Value::Float(expect_float(other, name)?)),
                }
            }
            Builtin::Bool => {
                arity(name, &args, 0, 1)?;
                Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
            }
            Builtin::List => {
                arity(name, &args, 0, 1)?;
                let items: Vec<Value> = match args.first() {
                    Some(iterable) => self.collect(iterable)?,
                    None => Vec::new(),
                };
                Ok(Value::list(items))
            }
            Builtin::Dict => {
                arity(name, &args, 0, 1)?;
                let mut dict = Dict::new();
                if let Some(source) = args.first() {
                    self.merge_into(&mut dict, source)?;
                }
                for (key, value) in kwargs {
                    dict.insert(Value::str(key), value)?;
                }
                self.check_len(dict.len())?;
                Ok(Value::dict(dict))
            }
            Builtin::Abs => {
                arity(name, &args, 1, 1)?;
                match args[0].as_number() {
                    Some(Number::Int(i)) => i.checked_abs().map(Value::Int).ok_or_else(|| {
                        ScriptError::new(ErrorKind::OverflowError, "integer overflow")
                    }),
                    Some(Number::Float(f)) => Ok(Value::Float(f.abs())),
                    None => Err(type_error(format!(
                        "bad operand type for abs(): '{}'",
                        args[0].type_name()
                    ))),
                }
            }
            Builtin::Min | Builtin::Max => {
                let key = take_kwarg(&mut kwargs, "key");
                let default = take_kwarg(&mut kwargs, "default");
                reject_kwargs(name, &kwargs)?;
                let candidates = match args.len() {
                    0 => return Err(type_error(format!("{name} expected at least 1 argument, got 0"))),
                    1 => self.collect(&args[0])?,
                    _ => args,
                };
                let wanted = if builtin == Builtin::Min {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                let mut best: Option<(Value, Value)> = None;
                for candidate in candidates {
                    self.tick()?;
                    let rank = match &key {
                        Some(key) => self.call_value(key, vec![candidate.clone()], Vec::new())?,
                        None => candidate.clone(),
                    };
                    let replace = match &best {
                        None => true,
                        Some((best_rank, _)) => rank.compare(best_rank)? == wanted,
                    };
                    if replace {
                        best = Some((rank, candidate));
                    }
                }
                match (best, default) {
                    (Some((_, value)), _) => Ok(value),
                    (None, Some(default)) => Ok(default),
                    (None, None) => Err(value_error(format!("{name}() arg is an empty sequence"))),
                }
            }
            Builtin::Sum => {
                let start = take_kwarg(&mut kwargs, "start");
                reject_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 2)?;
                let mut total = args.get(1).cloned().or(start).unwrap_or(Value::Int(0));
                for item in self.collect(&args[0])? {
                    self.tick()?;
                    total = self.binary(BinOp::Add, total, item)?;
                }
                Ok(total)
            }
            Builtin::Round => {
                let digits = take_kwarg(&mut kwargs, "ndigits");
                reject_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 2)?;
                let digits = args.get(1).cloned().or(digits).filter(|d| !matches!(d, Value::None));
                match (args[0].as_number(), digits) {
                    (Some(Number::Int(i)), _) => Ok(Value::Int(i)),
                    (Some(Number::Float(f)), None) => float_to_int(f.round_ties_even()),
                    (Some(Number::Float(f)), Some(digits)) => {
                        let digits = expect_int(&digits, "round()")?.clamp(-308, 308) as i32;
                        let scale = 10f64.powi(digits);
                        Ok(Value::Float((f * scale).round_ties_even() / scale))
                    }
                    (None, _) => Err(type_error(format!(
                        "type {} doesn't define __round__ method",
                        args[0].type_name()
                    ))),
                }
            }
            Builtin::Sorted => {
                let key = take_kwarg(&mut kwargs, "key");
                let reverse = take_kwarg(&mut kwargs, "reverse").is_some_and(|r| r.truthy());
                reject_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 1)?;
                let items = self.collect(&args[0])?;
                Ok(Value::list(self.sort_values(items, key.as_ref(), reverse)?))
            }
            Builtin::Enumerate => {
                let start = take_kwarg(&mut kwargs, "start");
                reject_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 2)?;
                let start = match args.get(1).or(start.as_ref()) {
                    Some(value) => expect_int(value, "enumerate()")?,
                    None => 0,
                };
                let items = self.collect(&args[0])?;
                Ok(Value::list(
                    items
                        .into_iter()
                        .enumerate()
                        .map(|(i, item)| Value::tuple(vec![Value::Int(start + i as i64), item]))
                        .collect(),
                ))
            }
            Builtin::Print => {
                let sep = match take_kwarg(&mut kwargs, "sep") {
                    Some(sep) => self.str_of(&sep)?,
                    None => " ".to_string(),
                };
                let pieces = args
                    .iter()
                    .map(|arg| self.str_of(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                self.check_len(joined_len(&pieces, &sep))?;
                let line = pieces.join(sep.as_str());
                tracing::debug!(target: "feature_forge::script", "{}", line);
                Ok(Value::None)
            }
            Builtin::Any | Builtin::All => {
                arity(name, &args, 1, 1)?;
                let want_any = builtin == Builtin::Any;
                for item in self.collect(&args[0])? {
                    if item.truthy() == want_any {
                        return Ok(Value::Bool(want_any));
                    }
                }
                Ok(Value::Bool(!want_any))
            }
            Builtin::Zip => {
                reject_kwargs(name, &kwargs)?;
                let columns = args
                    .iter()
                    .map(|a| self.collect(a))
                    .collect::<Result<Vec<_>, _>>()?;
                let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
                Ok(Value::list(
                    (0..rows)
                        .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
                        .collect(),
                ))
            }
            Builtin::ExceptionType(kind) => {
                let message = match (kind, args.first()) {
                    (_, None) => String::new(),
                    (ErrorKind::KeyError, Some(arg)) => self.repr_of(arg)?,
                    (_, Some(arg)) => self.str_of(arg)?,
                };
                Ok(Value::Exception(std::rc::Rc::new(ScriptError::new(kind, message))))
            }
            Builtin::MathSqrt => {
                arity(name, &args, 1, 1)?;
                let x = expect_float(&args[0], name)?;
                if x < 0.0 {
                    return Err(value_error("math domain error"));
                }
                Ok(Value::Float(x.sqrt()))
            }
            Builtin::MathFloor => {
                arity(name, &args, 1, 1)?;
                match args[0].as_number() {
                    Some(Number::Int(i)) => Ok(Value::Int(i)),
                    _ => float_to_int(expect_float(&args[0], name)?.floor()),
                }
            }
            Builtin::MathCeil => {
                arity(name, &args, 1, 1)?;
                match args[0].as_number() {
                    Some(Number::Int(i)) => Ok(Value::Int(i)),
                    _ => float_to_int(expect_float(&args[0], name)?.ceil()),
                }
            }
            Builtin::MathFabs => {
                arity(name, &args, 1, 1)?;
                Ok(Value::Float(expect_float(&args[0], name)?.abs()))
            }
            Builtin::MathPow => {
                arity(name, &args, 2, 2)?;
                let base = expect_float(&args[0], name)?;
                let exponent = expect_float(&args[1], name)?;
                Ok(Value::Float(base.powf(exponent)))
            }
        }
    }

    /// Dispatch `object.name(args)`
    pub(super) fn call_method(&mut self, object: &Value, name: &str, args: Vec<Value>, mut kwargs: Kwargs) -> Eval {
        match object {
            Value::Str(s) => {
                reject_kwargs(name, &kwargs)?;
                self.str_method(s, name, &args)
            }
            Value::List(items) => match name {
                "append" => {
                    arity(name, &args, 1, 1)?;
                    let mut items = items.borrow_mut();
                    self.check_len(items.len() + 1)?;
                    items.extend(args);
                    Ok(Value::None)
                }
                "extend" => {
                    arity(name, &args, 1, 1)?;
                    let extra = self.collect(&args[0])?;
                    let mut items = items.borrow_mut();
                    self.check_len(items.len() + extra.len())?;
                    items.extend(extra);
                    Ok(Value::None)
                }
                "insert" => {
                    arity(name, &args, 2, 2)?;
                    let mut items = items.borrow_mut();
                    self.check_len(items.len() + 1)?;
                    let len = items.len() as i64;
                    let index = expect_int(&args[0], "insert()")?;
                    let position = if index < 0 { (index + len).max(0) } else { index.min(len) };
                    items.insert(position as usize, args[1].clone());
                    Ok(Value::None)
                }
                "pop" => {
                    arity(name, &args, 0, 1)?;
                    let mut items = items.borrow_mut();
                    if items.is_empty() {
                        return Err(ScriptError::new(ErrorKind::IndexError, "pop from empty list"));
                    }
                    let len = items.len() as i64;
                    let index = match args.first() {
                        Some(index) => expect_int(index, "pop()")?,
                        None => -1,
                    };
                    let position = if index < 0 { index + len } else { index };
                    if !(0..len).contains(&position) {
                        return Err(ScriptError::new(ErrorKind::IndexError, "pop index out of range"));
                    }
                    Ok(items.remove(position as usize))
                }
                "sort" => {
                    let key = take_kwarg(&mut kwargs, "key");
                    let reverse = take_kwarg(&mut kwargs, "reverse").is_some_and(|r| r.truthy());
                    reject_kwargs(name, &kwargs)?;
                    let snapshot = items.borrow().clone();
                    let sorted = self.sort_values(snapshot, key.as_ref(), reverse)?;
                    *items.borrow_mut() = sorted;
                    Ok(Value::None)
                }
                "copy" => Ok(Value::list(items.borrow().clone())),
                _ => Err(no_attribute(object, name)),
            },
            Value::Dict(dict) => match name {
                "get" => {
                    arity(name, &args, 1, 2)?;
                    let found = dict.borrow().get(&args[0])?;
                    Ok(found.or_else(|| args.get(1).cloned()).unwrap_or(Value::None))
                }
                "keys" => Ok(Value::list(dict.borrow().keys())),
                "values" => Ok(Value::list(dict.borrow().values())),
                "items" => Ok(Value::list(
                    dict.borrow()
                        .items()
                        .into_iter()
                        .map(|(k, v)| Value::tuple(vec![k, v]))
                        .collect(),
                )),
                "update" => {
                    arity(name, &args, 0, 1)?;
                    let mut merged = dict.borrow().clone();
                    if let Some(source) = args.first() {
                        self.merge_into(&mut merged, source)?;
                    }
                    for (key, value) in kwargs {
                        merged.insert(Value::str(key), value)?;
                    }
                    self.check_len(merged.len())?;
                    *dict.borrow_mut() = merged;
                    Ok(Value::None)
                }
                "pop" => {
                    arity(name, &args, 1, 2)?;
                    let removed = dict.borrow_mut().remove(&args[0])?;
                    match (removed, args.get(1)) {
                        (Some(value), _) => Ok(value),
                        (None, Some(default)) => Ok(default.clone()),
                        (None, None) => Err(ScriptError::new(ErrorKind::KeyError, self.repr_of(&args[0])?)),
                    }
                }
                "setdefault" => {
                    arity(name, &args, 1, 2)?;
                    if let Some(existing) = dict.borrow().get(&args[0])? {
                        return Ok(existing);
                    }
                    let value = args.get(1).cloned().unwrap_or(Value::None);
                    dict.borrow_mut().insert(args[0].clone(), value.clone())?;
                    Ok(value)
                }
                "copy" => Ok(Value::dict(dict.borrow().clone())),
                _ => Err(no_attribute(object, name)),
            },
            _ => Err(no_attribute(object, name)),
        }
    }

    fn str_method(&mut self, s: &str, name: &str, args: &[Value]) -> Eval {
        match name {
            "upper" => Ok(Value::str(s.to_uppercase())),
            "lower" => Ok(Value::str(s.to_lowercase())),
            "strip" | "lstrip" | "rstrip" => {
                arity(name, args, 0, 1)?;
                let chars: Option<Vec<char>> = match args.first() {
                    None | Some(Value::None) => None,
                    Some(value) => Some(expect_str(value, "strip arg")?.chars().collect()),
                };
                let matcher = |c: char| match &chars {
                    Some(set) => set.contains(&c),
                    None => c.is_whitespace(),
                };
                let stripped = match name {
                    "lstrip" => s.trim_start_matches(matcher),
                    "rstrip" => s.trim_end_matches(matcher),
                    _ => s.trim_matches(matcher),
                };
                Ok(Value::str(stripped))
            }
            "split" => {
                arity(name, args, 0, 2)?;
                let limit = match args.get(1) {
                    Some(value) => expect_int(value, "split()")?,
                    None => -1,
                };
                let parts: Vec<Value> = match args.first() {
                    None | Some(Value::None) => {
                        let words = s.split_whitespace().map(Value::str);
                        if limit < 0 {
                            words.collect()
                        } else {
                            split_whitespace_n(s, usize::try_from(limit).unwrap_or(usize::MAX))
                        }
                    }
                    Some(sep) => {
                        let sep = expect_str(sep, "separator")?;
                        if sep.is_empty() {
                            return Err(value_error("empty separator"));
                        }
                        if limit < 0 {
                            s.split(sep).map(Value::str).collect()
                        } else {
                            let pieces = usize::try_from(limit).unwrap_or(usize::MAX).saturating_add(1);
                            s.splitn(pieces, sep).map(Value::str).collect()
                        }
                    }
                };
                self.check_len(parts.len())?;
                Ok(Value::list(parts))
            }
            "join" => {
                arity(name, args, 1, 1)?;
                let pieces = self
                    .collect(&args[0])?
                    .iter()
                    .map(|piece| expect_str(piece, "sequence item").map(str::to_string))
                    .collect::<Result<Vec<_>, _>>()?;
                self.check_len(joined_len(&pieces, s))?;
                Ok(Value::str(pieces.join(s)))
            }
            "startswith" | "endswith" => {
                arity(name, args, 1, 1)?;
                let candidates: Vec<Value> = match &args[0] {
                    Value::Tuple(options) => options.to_vec(),
                    other => vec![other.clone()],
                };
                for candidate in &candidates {
                    let candidate = expect_str(candidate, name)?;
                    let hit = if name == "startswith" {
                        s.starts_with(candidate)
                    } else {
                        s.ends_with(candidate)
                    };
                    if hit {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            "replace" => {
                arity(name, args, 2, 2)?;
                let from = expect_str(&args[0], "replace() argument 1")?;
                let to = expect_str(&args[1], "replace() argument 2")?;
                let occurrences = if from.is_empty() {
                    s.chars().count() + 1
                } else {
                    s.matches(from).count()
                };
                let len = (s.len() - occurrences * from.len())
                    .saturating_add(occurrences.saturating_mul(to.len()));
                self.check_len(len)?;
                Ok(Value::str(s.replace(from, to)))
            }
            "title" => Ok(Value::str(title_case(s))),
            _ => Err(no_attribute(&Value::str(s), name)),
        }
    }

    /// Materialise any iterable into a vector, charging one operation per element
    fn collect(&mut self, iterable: &Value) -> Result<Vec<Value>, ScriptError> {
        let mut items = Vec::new();
        for item in self.iterate(iterable)? {
            self.tick()?;
            items.push(item);
            self.check_len(items.len())?;
        }
        Ok(items)
    }

    fn merge_into(&mut self, dict: &mut Dict, source: &Value) -> Result<(), ScriptError> {
        if let Value::Dict(other) = source {
            for (key, value) in other.borrow().items() {
                dict.insert(key, value)?;
            }
            return Ok(());
        }
        for pair in self.collect(source)? {
            let entry = self.collect(&pair)?;
            let [key, value] = <[Value; 2]>::try_from(entry).map_err(|entry| {
                value_error(format!(
                    "dictionary update sequence element has length {}; 2 is required",
                    entry.len()
                ))
            })?;
            dict.insert(key, value)?;
        }
        Ok(())
    }

    /// Stable sort with an optional key function
    fn sort_values(&mut self, items: Vec<Value>, key: Option<&Value>, reverse: bool) -> Result<Vec<Value>, ScriptError> {
        let mut keyed = Vec::with_capacity(items.len());
        for item in items {
            self.tick()?;
            let rank = match key {
                Some(key) if !matches!(key, Value::None) => {
                    self.call_value(key, vec![item.clone()], Vec::new())?
                }
                _ => item.clone(),
            };
            keyed.push((rank, item));
        }

        let mut failure = None;
        keyed.sort_by(|a, b| {
            let ordering = a.0.compare(&b.0).unwrap_or_else(|err| {
                failure.get_or_insert(err);
                Ordering::Equal
            });
            if reverse { ordering.reverse() } else { ordering }
        });
        if let Some(err) = failure {
            return Err(err);
        }
        Ok(keyed.into_iter().map(|(_, item)| item).collect())
    }
}

/// Byte length of `pieces.join(sep)`, computed without building it
fn joined_len(pieces: &[String], sep: &str) -> usize {
    let separators = pieces.len().saturating_sub(1).saturating_mul(sep.len());
    pieces
        .iter()
        .fold(separators, |total, piece| total.saturating_add(piece.len()))
}

fn split_whitespace_n(s: &str, max_splits: usize) -> Vec<Value> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if parts.len() == max_splits {
            parts.push(Value::str(rest));
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                parts.push(Value::str(&rest[..end]));
                rest = rest[end..].trim_start();
            }
            None => {
                parts.push(Value::str(rest));
                break;
            }
        }
    }
    parts
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut previous_is_letter = false;
    for c in s.chars() {
        if previous_is_letter {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        previous_is_letter = c.is_alphabetic();
    }
    out
}

fn no_attribute(object: &Value, name: &str) -> ScriptError {
    ScriptError::new(
        ErrorKind::AttributeError,
        format!("'{}' object has no attribute '{name}'", object.type_name()),
    )
}
