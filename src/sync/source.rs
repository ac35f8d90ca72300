//! Narrow readers for the structures the generator emits
//!
//! Everything here works on the generator's own conventions: class headers,
//! `name = db.Column(...)` declarations and `def route_<name>():` blocks.
//! Anything that does not fit simply is not found.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::constants::FUNCTION_EPILOGUE_MARKER;
use crate::models::FieldType;
use crate::script::{self, Limits};

static MODEL_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"class\s+(?P<name>\w+)\s*\(\s*db\.Model\s*\)\s*:").expect("valid class regex")
});

static ANY_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"class\s+\w+\s*\(").expect("valid class regex"));

static COLUMN_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?P<name>\w+)\s*=\s*db\.Column\(").expect("valid column regex")
});

/// A `db.Column(...)` declaration recovered from a model block
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub default: Option<Value>,
}

/// Body of the first `db.Model` class accepted by `matches`, up to the next
/// model class or the end of the text
pub fn model_block<'t>(text: &'t str, mut matches: impl FnMut(&str) -> bool) -> Option<&'t str> {
    let headers: Vec<_> = MODEL_CLASS.captures_iter(text).collect();
    headers.iter().enumerate().find_map(|(i, caps)| {
        let name = caps.name("name")?.as_str();
        if !matches(name) {
            return None;
        }
        let start = caps.get(0)?.end();
        let end = headers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(text.len(), |m| m.start());
        Some(&text[start..end])
    })
}

/// Body of the `User` model, up to the next class of any kind
pub fn user_block(text: &str) -> Option<&str> {
    let body = model_block(text, |name| name == "User")?;
    let end = ANY_CLASS.find(body).map_or(body.len(), |m| m.start());
    Some(&body[..end])
}

/// Every column declaration in a block, in declaration order
pub fn columns(block: &str) -> Vec<Column> {
    COLUMN_START
        .captures_iter(block)
        .filter_map(|caps| {
            let name = caps.name("name")?.as_str();
            let open = caps.get(0)?.end();
            let args = call_arguments(&block[open..])?;
            Some(parse_column(name, &args))
        })
        .collect()
}

fn parse_column(name: &str, args: &[&str]) -> Column {
    let mut column = Column {
        name: name.to_string(),
        field_type: args.first().map_or(FieldType::String, |arg| type_token(arg)),
        required: false,
        default: None,
    };

    for arg in args.iter().skip(1) {
        let Some((key, value)) = arg.split_once('=') else {
            continue;
        };
        match (key.trim(), value.trim()) {
            ("nullable", "False") => column.required = true,
            ("default", literal) => column.default = recover_literal(literal),
            _ => {}
        }
    }
    column
}

fn type_token(arg: &str) -> FieldType {
    let arg = arg.trim();
    if arg.starts_with("db.Integer") {
        FieldType::Integer
    } else if arg.starts_with("db.Boolean") {
        FieldType::Boolean
    } else if arg.starts_with("db.DateTime") {
        FieldType::Datetime
    } else if arg.starts_with("db.Text") {
        FieldType::Text
    } else if arg.starts_with("db.Float") {
        FieldType::Float
    } else {
        FieldType::String
    }
}

/// Literal defaults only: anything that needs a name in scope is dropped
fn recover_literal(source: &str) -> Option<Value> {
    match script::evaluate_expression(source, Limits::default()) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::debug!("Ignoring non-literal column default '{}': {}", source, err);
            None
        }
    }
}

/// Split the text following an opening parenthesis into its top-level
/// arguments. Returns `None` when the call is never closed.
fn call_arguments(text: &str) -> Option<Vec<&str>> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut args = Vec::new();
    let mut start = 0;

    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' if depth > 0 => depth -= 1,
            ')' => {
                let last = text[start..i].trim();
                if !last.is_empty() {
                    args.push(last);
                }
                return Some(args);
            }
            ',' if depth == 0 => {
                args.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    None
}

/// Code of the generated `route_<name>` handler, de-indented and trimmed
pub fn function_body(text: &str, name: &str) -> Option<String> {
    let header = format!("def route_{name}():");
    let mut lines = text.lines().skip_while(|line| line.trim() != header);
    lines.next()?;

    let mut lines = lines.skip_while(|line| !line.trim_start().starts_with("input_data = "));
    lines.next()?;

    let body: Vec<&str> = lines
        .take_while(|line| {
            !line.starts_with("@api_bp.route") && line.trim() != FUNCTION_EPILOGUE_MARKER
        })
        .map(|line| {
            if let Some(rest) = line.strip_prefix("    ") {
                rest
            } else if line.trim().is_empty() {
                ""
            } else {
                line
            }
        })
        .collect();
    Some(body.join("\n").trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MODELS: &str = "\
from app import db

class Author(db.Model):
    __tablename__ = 'author'
    id = db.Column(db.Integer, primary_key=True)
    name = db.Column(db.String(120), nullable=False)

class Book( db.Model ):
    id = db.Column(db.Integer, primary_key=True)
    title = db.Column(db.String(120), nullable=False, default='a, (b)')
    pages = db.Column(
        db.Integer,
        default=100,
    )
    ratio = db.Column(db.Float, default=func.random())
    published = db.Column(db.DateTime, default=datetime.utcnow)
";

    #[test]
    fn test_model_block_selection() {
        let block = model_block(MODELS, |name| name.eq_ignore_ascii_case("book")).unwrap();
        assert!(block.contains("title"));
        assert!(!block.contains("class Author"));

        let author = model_block(MODELS, |name| name == "Author").unwrap();
        assert!(!author.contains("title"));
        assert!(model_block(MODELS, |name| name == "Missing").is_none());
    }

    #[test]
    fn test_columns_balanced_arguments() {
        let block = model_block(MODELS, |name| name == "Book").unwrap();
        let found = columns(block);
        let names: Vec<&str> = found.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["id", "title", "pages", "ratio", "published"]);

        assert_eq!(found[1].field_type, FieldType::String);
        assert!(found[1].required);
        assert_eq!(found[1].default, Some(json!("a, (b)")));

        assert_eq!(found[2].field_type, FieldType::Integer);
        assert!(!found[2].required);
        assert_eq!(found[2].default, Some(json!(100)));

        assert_eq!(found[3].field_type, FieldType::Float);
        assert_eq!(found[3].default, None);
        assert_eq!(found[4].field_type, FieldType::Datetime);
        assert_eq!(found[4].default, None);
    }

    #[test]
    fn test_literal_defaults() {
        assert_eq!(recover_literal("'x\\'y'"), Some(json!("x'y")));
        assert_eq!(recover_literal("-2.5"), Some(json!(-2.5)));
        assert_eq!(recover_literal("func.now()"), None);

        let deep = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
        assert_eq!(recover_literal(&deep), None);
        let line = format!("    n = db.Column(db.Integer, default={deep})\n");
        let found = columns(&line);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].default, None);
    }

    #[test]
    fn test_unclosed_column_is_skipped() {
        let found = columns("    broken = db.Column(db.Integer\n");
        assert!(found.is_empty());
    }

    #[test]
    fn test_function_body_extraction() {
        let text = "\
@api_bp.route('/a', methods=['POST'])
def route_a():
    input_data = request.get_json() if request.is_json else {}
    def handler(data):
        return 1

    # Handle execution results
    return jsonify({'status': 'success'})

@api_bp.route('/b', methods=['POST'])
def route_b():
    input_data = request.get_json() if request.is_json else {}
    result = 2
";
        assert_eq!(
            function_body(text, "a").as_deref(),
            Some("def handler(data):\n    return 1")
        );
        assert_eq!(function_body(text, "b").as_deref(), Some("result = 2"));
        assert_eq!(function_body(text, "c"), None);
    }
}
