use axum::http::StatusCode;
use serde_json::{Map, Value, json};

use crate::db::RecordTxn;
use crate::error::Result;
use crate::interpreter::{FeatureHandler, HandlerRequest, HandlerResponse, Settings};
use crate::models::FunctionConfig;
use crate::script::{self, ErrorKind, Limits, Runtime, ScriptError};

/// Runs a custom function's code in the script sandbox
pub struct FunctionHandler;

impl FunctionHandler {
    fn respond(&self, settings: &Settings, request: &HandlerRequest<'_>) -> Result<HandlerResponse> {
        let config: FunctionConfig = request.config()?;
        if config.code().trim().is_empty() {
            return Ok(HandlerResponse::new(
                StatusCode::BAD_REQUEST,
                json!({
                    "status": 400,
                    "error": "No code provided",
                    "message": "The function feature must have executable Python code",
                }),
            ));
        }

        let input = match request.body {
            Value::Null => Value::Object(Map::new()),
            body => body.clone(),
        };

        if let Some(field) = config
            .required_inputs()
            .into_iter()
            .find(|field| input.get(field).is_none())
        {
            return Ok(missing_input(&script::str_repr(&field)));
        }

        Ok(run_function(config.code(), &input, settings))
    }
}

impl FeatureHandler for FunctionHandler {
    fn kind(&self) -> &'static str {
        "FUNCTIONS"
    }

    fn handle(
        &self,
        _store: &RecordTxn<'_>,
        settings: &Settings,
        request: &HandlerRequest<'_>,
    ) -> Result<HandlerResponse> {
        self.respond(settings, request)
    }

    /// Function code never reaches the record store, so no transaction is held while it runs
    fn handle_detached(
        &self,
        settings: &Settings,
        request: &HandlerRequest<'_>,
    ) -> Option<Result<HandlerResponse>> {
        Some(self.respond(settings, request))
    }
}

/// Execute function code against an input body and build the response envelope
///
/// The code runs on its own thread; only JSON crosses back.
pub fn run_function(code: &str, input: &Value, settings: &Settings) -> HandlerResponse {
    let limits = settings.limits;
    script::run_isolated(|| Ok(execute(code, input, limits))).unwrap_or_else(|err| {
        tracing::warn!("Function sandbox failed: {}", err);
        failure(&err, "Execution error")
    })
}

fn execute(code: &str, input: &Value, limits: Limits) -> HandlerResponse {
    let mut runtime = Runtime::new(limits);
    runtime.set_global("input_data", script::Value::from_json(input));

    if let Err(err) = runtime.run(code) {
        tracing::debug!("Function code failed at module level: {}", err);
        return failure(&err, "Execution error");
    }

    let result = match runtime.global("handler").filter(script::Value::is_callable) {
        Some(handler) => match runtime.call(&handler, vec![script::Value::from_json(input)]) {
            Ok(value) => runtime.to_json(&value),
            Err(err) if err.kind == ErrorKind::KeyError => return missing_input(&err.message),
            Err(err) => {
                tracing::debug!("Function handler failed: {}", err);
                return failure(&err, "Error during function execution");
            }
        },
        None => match runtime.global("result") {
            Some(value) if !matches!(value, script::Value::None) => runtime.to_json(&value),
            _ => leftover_bindings(&runtime),
        },
    };

    match result {
        Ok(result) => HandlerResponse::ok(json!({ "success": true, "result": result })),
        Err(err) => {
            tracing::debug!("Function result could not be converted: {}", err);
            failure(&err, "Error during function execution")
        }
    }
}

/// Every plain data binding the code left behind
fn leftover_bindings(runtime: &Runtime) -> std::result::Result<Value, ScriptError> {
    let mut bindings = Map::new();
    for (name, value) in runtime.globals() {
        let is_data = !matches!(name.as_str(), "input_data" | "handler")
            && !value.is_callable()
            && !matches!(value, script::Value::Module(_));
        if is_data {
            bindings.insert(name, runtime.to_json(&value)?);
        }
    }
    Ok(Value::Object(bindings))
}

fn missing_input(key: &str) -> HandlerResponse {
    HandlerResponse::new(
        StatusCode::BAD_REQUEST,
        json!({
            "success": false,
            "error": key,
            "message": format!(
                "Missing required input field: {key}. Check your input body or function logic."
            ),
        }),
    )
}

fn failure(err: &ScriptError, message: &str) -> HandlerResponse {
    HandlerResponse::new(
        StatusCode::BAD_REQUEST,
        json!({
            "success": false,
            "error": err.to_string(),
            "message": message,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::interpreter::{Interpreter, test_settings};
    use crate::models::HandlerContext;
    use std::time::Duration;

    fn call(schema: Value, body: Value) -> HandlerResponse {
        let interpreter = Interpreter::new(open_in_memory().unwrap(), test_settings());
        let context = HandlerContext::default();
        let request = HandlerRequest {
            method: "POST",
            endpoint: "/api/fn",
            body: &body,
            schema: Some(&schema),
            context: &context,
        };
        interpreter.execute("FUNCTIONS", &request).unwrap()
    }

    #[test]
    fn test_handler_is_called_with_body() {
        let code = "def handler(input_data):\n    return {'total': input_data['a'] + input_data['b']}\n";
        let response = call(json!({"code": code}), json!({"a": 2, "b": 3}));
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, json!({"success": true, "result": {"total": 5}}));
    }

    #[test]
    fn test_missing_key_inside_handler() {
        let code = "def handler(data):\n    return data['x']\n";
        let response = call(json!({"function_code": code}), json!({}));
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.body["error"], "'x'");
        assert_eq!(
            response.body["message"],
            "Missing required input field: 'x'. Check your input body or function logic."
        );
    }

    #[test]
    fn test_declared_required_input() {
        let code = "def handler(data):\n    return data['name']\n";
        let schema = json!({"code": code, "input_schema": {"required": ["name"]}});
        let response = call(schema, json!({"other": 1}));
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.body["error"], "'name'");
    }

    #[test]
    fn test_result_binding_and_leftovers() {
        let response = call(json!({"code": "result = input_data['n'] * 2"}), json!({"n": 21}));
        assert_eq!(response.body["result"], 42);

        let response = call(
            json!({"code": "import math\nx = 1\ny = 'two'\ndef helper():\n    pass\n"}),
            Value::Null,
        );
        assert_eq!(response.body["result"], json!({"x": 1, "y": "two"}));
    }

    #[test]
    fn test_errors() {
        let response = call(json!({}), Value::Null);
        assert_eq!(response.body["error"], "No code provided");

        let response = call(json!({"code": "x = 1 / 0"}), Value::Null);
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.body["message"], "Execution error");
        assert_eq!(response.body["error"], "division by zero");

        let code = "def handler(data):\n    return int('abc')\n";
        let response = call(json!({"code": code}), Value::Null);
        assert_eq!(response.body["message"], "Error during function execution");
    }

    #[test]
    fn test_runaway_code_is_stopped() {
        let mut settings = test_settings();
        settings.limits.max_operations = 10_000;
        settings.limits.timeout = Duration::from_secs(5);
        let response = run_function("while True:\n    pass\n", &json!({}), &settings);
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.body["success"], false);
        assert_eq!(response.body["message"], "Execution error");
    }

    fn rejected(response: &HandlerResponse) -> String {
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.body["success"], false);
        response.body["error"].as_str().unwrap_or_default().to_string()
    }

    #[test]
    fn test_oversized_range_result_is_rejected() {
        let response = call(json!({"code": "result = range(200000000)"}), Value::Null);
        let error = rejected(&response);
        assert!(error.starts_with("Collection size exceeds the limit"), "{error}");
        assert_eq!(response.body["message"], "Error during function execution");

        let response = call(json!({"code": "result = range(3)"}), Value::Null);
        assert_eq!(response.body["result"], json!([0, 1, 2]));
    }

    #[test]
    fn test_self_referencing_result_is_rejected() {
        let response = call(json!({"code": "result = []\nresult.append(result)\n"}), Value::Null);
        assert_eq!(rejected(&response), "Circular reference detected");

        let code = "def handler(data):\n    d = {}\n    d['me'] = d\n    return d\n";
        let response = call(json!({"code": code}), Value::Null);
        assert_eq!(rejected(&response), "Circular reference detected");
    }

    #[test]
    fn test_cycles_can_be_printed_and_compared() {
        let code = "x = [1]\nx.append(x)\nprint(x)\nresult = {'text': str(x), 'same': x == x}\n";
        let response = call(json!({"code": code}), Value::Null);
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["result"], json!({"text": "[1, [...]]", "same": true}));

        let code = "a = []\na.append(a)\nb = []\nb.append(b)\ntry:\n    a == b\n    result = 'equal'\nexcept RecursionError:\n    result = 'too deep'\n";
        let response = call(json!({"code": code}), Value::Null);
        assert_eq!(response.body["result"], "too deep");
    }

    #[test]
    fn test_huge_format_width_is_rejected() {
        let response = call(json!({"code": "result = f\"{1:4000000000}\""}), Value::Null);
        let error = rejected(&response);
        assert!(error.starts_with("Format width or precision exceeds"), "{error}");

        let response = call(json!({"code": "result = f\"{1.5:.1000000000f}\""}), Value::Null);
        rejected(&response);
    }

    #[test]
    fn test_string_blowups_are_rejected_before_allocating() {
        let code = "s = 'x' * 50000\nresult = s.join([s, s, s])\n";
        let error = rejected(&call(json!({"code": code}), Value::Null));
        assert!(error.starts_with("Collection size exceeds the limit"), "{error}");

        let code = "s = 'x' * 50000\nresult = s.replace('x', 'xxxx')\n";
        rejected(&call(json!({"code": code}), Value::Null));

        let code = "result = 'a b'.split(' ', 9223372036854775807)";
        let response = call(json!({"code": code}), Value::Null);
        assert_eq!(response.body["result"], json!(["a", "b"]));
    }

    #[test]
    fn test_deeply_nested_code_is_a_syntax_error() {
        let code = format!("result = {}1{}", "(".repeat(100_000), ")".repeat(100_000));
        let error = rejected(&call(json!({"code": code}), Value::Null));
        assert!(error.starts_with("too many nested expressions"), "{error}");
    }

    #[test]
    fn test_deeply_nested_result_is_rejected() {
        let code = "x = []\nfor i in range(50000):\n    x = [x]\nresult = x\n";
        let response = call(json!({"code": code}), Value::Null);
        assert_eq!(rejected(&response), "maximum recursion depth exceeded");
    }

    #[test]
    fn test_aliased_result_counts_against_size_limit() {
        let code = "row = list(range(10000))\nresult = [row] * 10000\n";
        let error = rejected(&call(json!({"code": code}), Value::Null));
        assert!(error.starts_with("Result size exceeds the limit"), "{error}");
    }

    #[test]
    fn test_function_call_holds_no_write_transaction() {
        let db = open_in_memory().unwrap();
        let interpreter = Interpreter::new(db.clone(), test_settings());
        let held = db.begin_write().unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let context = HandlerContext::default();
            let schema = json!({"code": "result = 6 * 7"});
            let body = Value::Null;
            let request = HandlerRequest {
                method: "POST",
                endpoint: "/api/fn",
                body: &body,
                schema: Some(&schema),
                context: &context,
            };
            let _ = tx.send(interpreter.execute("FUNCTIONS", &request).unwrap());
        });

        let response = rx.recv_timeout(Duration::from_secs(10));
        held.abort().unwrap();
        let response = response.expect("function call waited on the write lock");
        assert_eq!(response.body["result"], 42);
    }
}
