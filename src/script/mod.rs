//! Restricted, Python-shaped script runtime
//!
//! Executes the `handler(input_data)` snippets attached to FUNCTIONS features
//! and evaluates the arithmetic left over from ANALYTICS expressions. Nothing
//! here touches the filesystem, network or process environment; the only
//! importable module is `math`.

mod ast;
mod builtins;
mod eval;
mod lexer;
mod parser;
mod value;

use std::fmt;
use std::time::Duration;

pub use eval::Machine;
pub use value::{Value, float_repr, str_repr};

/// Deepest syntactic or container nesting the parser and value walkers accept
pub const MAX_NESTING: usize = 200;

/// Stack reserved for the thread a script runs on
const SCRIPT_STACK_SIZE: usize = 256 * 1024 * 1024;

/// Resource ceilings for one script execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Evaluation steps before execution is aborted
    pub max_operations: u64,
    /// Wall-clock budget measured from the start of the execution
    pub timeout: Duration,
    /// Maximum nesting of user function calls
    pub max_depth: usize,
    /// Maximum element count of any list, dict or string
    pub max_collection_len: usize,
    /// Maximum size of a converted result, counted as JSON nodes plus string bytes
    pub max_result_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_operations: crate::constants::DEFAULT_FUNCTION_MAX_OPERATIONS,
            timeout: Duration::from_millis(crate::constants::DEFAULT_FUNCTION_TIMEOUT_MS),
            max_depth: 64,
            max_collection_len: 100_000,
            max_result_size: 1_000_000,
        }
    }
}

/// Python-style exception classes raised by scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SyntaxError,
    NameError,
    TypeError,
    ValueError,
    KeyError,
    IndexError,
    AttributeError,
    ZeroDivisionError,
    OverflowError,
    ImportError,
    RuntimeError,
    RecursionError,
    Exception,
    /// Operation budget, deadline, recursion or size ceiling exceeded
    LimitExceeded,
}

impl ErrorKind {
    pub const fn name(self) -> &'static str {
        match self {
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::NameError => "NameError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ValueError => "ValueError",
            ErrorKind::KeyError => "KeyError",
            ErrorKind::IndexError => "IndexError",
            ErrorKind::AttributeError => "AttributeError",
            ErrorKind::ZeroDivisionError => "ZeroDivisionError",
            ErrorKind::OverflowError => "OverflowError",
            ErrorKind::ImportError => "ImportError",
            ErrorKind::RuntimeError => "RuntimeError",
            ErrorKind::RecursionError => "RecursionError",
            ErrorKind::Exception => "Exception",
            ErrorKind::LimitExceeded => "LimitExceeded",
        }
    }

    /// Exception classes a script may raise or name in an `except` clause
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name {
            "NameError" => ErrorKind::NameError,
            "TypeError" => ErrorKind::TypeError,
            "ValueError" => ErrorKind::ValueError,
            "KeyError" => ErrorKind::KeyError,
            "IndexError" => ErrorKind::IndexError,
            "AttributeError" => ErrorKind::AttributeError,
            "ZeroDivisionError" => ErrorKind::ZeroDivisionError,
            "OverflowError" => ErrorKind::OverflowError,
            "ImportError" => ErrorKind::ImportError,
            "RuntimeError" => ErrorKind::RuntimeError,
            "RecursionError" => ErrorKind::RecursionError,
            "Exception" => ErrorKind::Exception,
            _ => return None,
        };
        Some(kind)
    }

    /// Whether an `except <name>` clause catches this kind
    pub fn matches(self, clause: &str) -> bool {
        if !self.is_catchable() {
            return false;
        }
        match clause {
            "Exception" | "BaseException" => true,
            "LookupError" => matches!(self, ErrorKind::KeyError | ErrorKind::IndexError),
            "ArithmeticError" => {
                matches!(self, ErrorKind::ZeroDivisionError | ErrorKind::OverflowError)
            }
            "RuntimeError" => {
                matches!(self, ErrorKind::RuntimeError | ErrorKind::RecursionError)
            }
            other => self.name() == other,
        }
    }

    /// Resource-limit aborts cannot be intercepted by `try`
    pub fn is_catchable(self) -> bool {
        !matches!(self, ErrorKind::LimitExceeded | ErrorKind::SyntaxError)
    }
}

/// A raised script exception
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ScriptError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn limit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LimitExceeded, message)
    }

    pub fn nesting() -> Self {
        Self::new(ErrorKind::RecursionError, "maximum recursion depth exceeded")
    }
}

/// Renders like Python's `str(exc)`
impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ScriptError {}

/// A module-level execution context: parse, run, then inspect or call globals
pub struct Runtime {
    machine: Machine,
}

impl Runtime {
    pub fn new(limits: Limits) -> Self {
        Self {
            machine: Machine::new(limits),
        }
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.machine.set_global(name, value);
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.machine.global(name)
    }

    /// Snapshot of every module-level binding
    pub fn globals(&self) -> Vec<(String, Value)> {
        self.machine.globals()
    }

    /// Parse and execute a module body
    pub fn run(&mut self, source: &str) -> Result<(), ScriptError> {
        let body = parser::parse_program(source)?;
        self.machine.run_module(&body)
    }

    /// Invoke a callable binding with positional arguments
    pub fn call(&mut self, callable: &Value, args: Vec<Value>) -> Result<Value, ScriptError> {
        self.machine.call_value(callable, args, Vec::new())
    }

    /// Convert a value to JSON under this runtime's limits
    pub fn to_json(&self, value: &Value) -> Result<serde_json::Value, ScriptError> {
        value.to_json(self.machine.limits())
    }
}

/// Run `task` on a dedicated thread with a stack deep enough for nested scripts
///
/// Values never leave the thread; callers hand in and take out plain data.
pub fn run_isolated<T, F>(task: F) -> Result<T, ScriptError>
where
    T: Send,
    F: FnOnce() -> Result<T, ScriptError> + Send,
{
    std::thread::scope(|scope| {
        let handle = std::thread::Builder::new()
            .name("script".to_string())
            .stack_size(SCRIPT_STACK_SIZE)
            .spawn_scoped(scope, task)
            .map_err(|err| {
                ScriptError::new(ErrorKind::RuntimeError, format!("cannot start script: {err}"))
            })?;
        handle.join().unwrap_or_else(|_| {
            Err(ScriptError::new(ErrorKind::RuntimeError, "script execution aborted"))
        })
    })
}

/// Evaluate one standalone expression with no bindings in scope
pub fn evaluate_expression(source: &str, limits: Limits) -> Result<serde_json::Value, ScriptError> {
    run_isolated(|| {
        let expr = parser::parse_expression(source)?;
        Machine::new(limits).evaluate(&expr)?.to_json(&limits)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(source: &str) -> Runtime {
        let mut runtime = Runtime::new(Limits::default());
        runtime.run(source).unwrap();
        runtime
    }

    fn result_of(source: &str) -> serde_json::Value {
        let runtime = run(source);
        runtime.to_json(&runtime.global("result").unwrap()).unwrap()
    }

    fn call_handler(source: &str, input: serde_json::Value) -> Result<serde_json::Value, ScriptError> {
        let mut runtime = Runtime::new(Limits::default());
        runtime.run(source)?;
        let handler = runtime.global("handler").unwrap();
        let value = runtime.call(&handler, vec![Value::from_json(&input)])?;
        runtime.to_json(&value)
    }

    #[test]
    fn test_handler_round_trip() {
        let source = "def handler(input_data):\n    a = input_data['a']\n    b = input_data.get('b', 10)\n    return {'sum': a + b, 'names': [n.upper() for n in input_data['names']]}\n";
        let out = call_handler(source, json!({"a": 5, "names": ["x", "y"]})).unwrap();
        assert_eq!(out, json!({"sum": 15, "names": ["X", "Y"]}));
    }

    #[test]
    fn test_missing_key_raises_key_error() {
        let err = call_handler("def handler(d):\n    return d['x']\n", json!({})).unwrap_err();
        assert_eq!(err.kind, ErrorKind::KeyError);
        assert_eq!(err.to_string(), "'x'");
    }

    #[test]
    fn test_python_arithmetic_semantics() {
        assert_eq!(result_of("result = [7 // -2, -7 % 3, 7 / 2, 2 ** 10, 2 ** -1]"), json!([-4, 2, 3.5, 1024, 0.5]));
        assert_eq!(result_of("result = round(2.5) + round(3.5)"), json!(6));
        assert_eq!(result_of("result = 1 + True"), json!(2));
    }

    #[test]
    fn test_control_flow() {
        let source = "total = 0\nfor i in range(10):\n    if i % 2 == 0:\n        continue\n    elif i > 7:\n        break\n    total += i\nn = 0\nwhile n < 3:\n    n += 1\nresult = (total, n)\n";
        assert_eq!(result_of(source), json!([16, 3]));
    }

    #[test]
    fn test_functions_defaults_and_recursion() {
        let source = "def fact(n, acc=1):\n    if n <= 1:\n        return acc\n    return fact(n - 1, acc * n)\nresult = fact(5)\n";
        assert_eq!(result_of(source), json!(120));
    }

    #[test]
    fn test_closure_sees_enclosing_scope() {
        let source = "def outer(k):\n    def inner(x):\n        return x * k\n    return [inner(i) for i in range(3)]\nresult = outer(3)\n";
        assert_eq!(result_of(source), json!([0, 3, 6]));
    }

    #[test]
    fn test_try_except_and_raise() {
        let source = "try:\n    x = 1 / 0\nexcept ZeroDivisionError as e:\n    x = str(e)\ntry:\n    raise ValueError('bad value')\nexcept Exception as e:\n    y = str(e)\nresult = [x, y]\n";
        assert_eq!(result_of(source), json!(["division by zero", "bad value"]));
    }

    #[test]
    fn test_fstrings_and_string_methods() {
        let source = "name = 'ada'\nprice = 3.14159\nresult = f\"{name.upper()}: {price:.2f} {'a,b'.split(',')!r}\"\n";
        assert_eq!(result_of(source), json!("ADA: 3.14 ['a', 'b']"));
    }

    #[test]
    fn test_sorted_with_key_and_reverse() {
        let source = "rows = [{'n': 2}, {'n': 3}, {'n': 1}]\nresult = [r['n'] for r in sorted(rows, key=lambda r: r['n'], reverse=True)]\n";
        assert_eq!(result_of(source), json!([3, 2, 1]));
    }

    #[test]
    fn test_math_is_the_only_module() {
        assert_eq!(result_of("import math\nresult = math.floor(math.sqrt(17))"), json!(4));

        let mut runtime = Runtime::new(Limits::default());
        let err = runtime.run("import os\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ImportError);
    }

    #[test]
    fn test_operation_budget_cannot_be_caught() {
        let limits = Limits {
            max_operations: 10_000,
            ..Limits::default()
        };
        let mut runtime = Runtime::new(limits);
        let err = runtime
            .run("try:\n    while True:\n        pass\nexcept Exception:\n    pass\n")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::LimitExceeded);
    }

    #[test]
    fn test_deadline_is_enforced() {
        let limits = Limits {
            max_operations: u64::MAX,
            timeout: Duration::from_millis(20),
            ..Limits::default()
        };
        let mut runtime = Runtime::new(limits);
        let err = runtime.run("while True:\n    x = 1\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::LimitExceeded);
    }

    #[test]
    fn test_recursion_limit() {
        let mut runtime = Runtime::new(Limits::default());
        let err = runtime.run("def f(n):\n    return f(n + 1)\nf(0)\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::LimitExceeded);
    }

    #[test]
    fn test_collection_limit() {
        let limits = Limits {
            max_collection_len: 100,
            ..Limits::default()
        };
        let mut runtime = Runtime::new(limits);
        let err = runtime.run("x = [0] * 1000\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::LimitExceeded);
    }

    #[test]
    fn test_evaluate_expression() {
        let limits = Limits::default();
        assert_eq!(evaluate_expression("(2 + 3) * 4", limits).unwrap(), json!(20));
        assert_eq!(evaluate_expression("10 / 4", limits).unwrap(), json!(2.5));
        let err = evaluate_expression("1 / 0", limits).unwrap_err();
        assert_eq!(err.to_string(), "division by zero");
    }

    #[test]
    fn test_evaluate_expression_rejects_deep_nesting() {
        let deep = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
        let err = evaluate_expression(&deep, Limits::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SyntaxError);

        let err = evaluate_expression("range(200000000)", Limits::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::LimitExceeded);
    }

    #[test]
    fn test_recursion_error_is_a_runtime_error() {
        let source = "a = []\na.append(a)\nb = []\nb.append(b)\ntry:\n    a < b\nexcept RuntimeError as e:\n    caught = str(e)\nresult = caught\n";
        assert_eq!(result_of(source), json!("maximum recursion depth exceeded"));
        assert!(ErrorKind::RecursionError.matches("Exception"));
    }

    #[test]
    fn test_run_isolated_reports_panics() {
        let err = run_isolated::<(), _>(|| panic!("boom")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::RuntimeError);
    }

    #[test]
    fn test_except_clause_matching() {
        assert!(ErrorKind::KeyError.matches("LookupError"));
        assert!(ErrorKind::ValueError.matches("Exception"));
        assert!(!ErrorKind::ValueError.matches("KeyError"));
        assert!(!ErrorKind::LimitExceeded.matches("Exception"));
    }
}
