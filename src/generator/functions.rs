//! One route per custom function

use crate::constants::FUNCTION_EPILOGUE_MARKER;
use crate::generator::Blueprint;
use crate::generator::python::{Source, indent, string_literal};

/// Route path under the `/api` blueprint: a leading `/api` is dropped
pub fn blueprint_path(path: &str) -> String {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    match path.strip_prefix("/api") {
        Some("") => "/".to_string(),
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        _ => path,
    }
}

pub fn routes(blueprint: &Blueprint<'_>) -> String {
    let mut source = Source::new();
    source
        .line("from flask import request, jsonify")
        .line("from app import db")
        .line("from app.routes import api_bp")
        .blank();

    for function in blueprint.functions() {
        let code = function.code.trim_end();
        let body = if code.trim().is_empty() {
            "    pass".to_string()
        } else {
            indent(code)
        };

        source
            .line(format!(
                "@api_bp.route({}, methods=[{}])",
                string_literal(&blueprint_path(&function.path)),
                string_literal(&function.method)
            ))
            .line(format!("def route_{}():", function.name))
            .line("    input_data = request.get_json() if request.is_json else {}")
            .line(body)
            .blank()
            .line(format!("    {FUNCTION_EPILOGUE_MARKER}"))
            .line("    if 'handler' in locals() and callable(locals()['handler']):")
            .line("        return jsonify(locals()['handler'](input_data))")
            .line("    if 'result' in locals():")
            .line("        return jsonify(locals()['result'])")
            .line("    return jsonify({'status': 'success'})")
            .blank();
    }
    source.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blueprint_path() {
        assert_eq!(blueprint_path("/api/double"), "/double");
        assert_eq!(blueprint_path("/api"), "/");
        assert_eq!(blueprint_path("/apiary"), "/apiary");
        assert_eq!(blueprint_path("double"), "/double");
    }
}
