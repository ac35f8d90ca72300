use crate::script::{ErrorKind, ScriptError};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// f-string: raw template text, `{…}` parts parsed later
    FStr(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

const OPERATORS: &[&str] = &[
    "**=", "//=", "->", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "+",
    "-", "*", "/", "%", "(", ")", "[", "]", "{", "}", ",", ":", ".", "=", "<", ">",
];

fn syntax_error(line: usize, message: impl Into<String>) -> ScriptError {
    ScriptError::new(
        ErrorKind::SyntaxError,
        format!("{} (line {line})", message.into()),
    )
}

/// Tokenize indentation-structured source into a flat token stream
pub fn tokenize(source: &str) -> Result<Vec<Token>, ScriptError> {
    let chars: Vec<char> = source.replace("\r\n", "\n").replace('\t', "    ").chars().collect();
    let mut tokens = Vec::new();
    let mut indents = vec![0usize];
    let mut depth = 0usize;
    let mut line = 1usize;
    let mut at_line_start = true;
    let mut i = 0usize;

    while i < chars.len() {
        if at_line_start && depth == 0 {
            let mut width = 0;
            while i < chars.len() && chars[i] == ' ' {
                width += 1;
                i += 1;
            }
            // blank and comment-only lines do not affect indentation
            if i >= chars.len() || chars[i] == '\n' || chars[i] == '#' {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                if i < chars.len() {
                    i += 1;
                    line += 1;
                }
                continue;
            }
            at_line_start = false;

            let current = *indents.last().unwrap_or(&0);
            if width > current {
                indents.push(width);
                tokens.push(Token { kind: TokenKind::Indent, line });
            } else {
                while width < *indents.last().unwrap_or(&0) {
                    indents.pop();
                    tokens.push(Token { kind: TokenKind::Dedent, line });
                }
                if width != *indents.last().unwrap_or(&0) {
                    return Err(syntax_error(line, "unindent does not match any outer level"));
                }
            }
        }

        let ch = chars[i];
        match ch {
            '\n' => {
                i += 1;
                if depth == 0 {
                    if !matches!(
                        tokens.last(),
                        Some(Token { kind: TokenKind::Newline, .. }) | None
                    ) {
                        tokens.push(Token { kind: TokenKind::Newline, line });
                    }
                    at_line_start = true;
                }
                line += 1;
            }
            ' ' => i += 1,
            '\\' if chars.get(i + 1) == Some(&'\n') => {
                i += 2;
                line += 1;
            }
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '"' | '\'' => {
                let (text, next, lines) = read_string(&chars, i, line)?;
                tokens.push(Token { kind: TokenKind::Str(text), line });
                i = next;
                line += lines;
            }
            c if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let (kind, next) = read_number(&chars, i, line)?;
                tokens.push(Token { kind, line });
                i = next;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let is_prefix = matches!(word.as_str(), "f" | "F" | "r" | "R" | "rf" | "fr");
                if is_prefix && matches!(chars.get(i), Some('"' | '\'')) {
                    let (text, next, lines) = read_string(&chars, i, line)?;
                    let kind = if word.to_ascii_lowercase().contains('f') {
                        TokenKind::FStr(text)
                    } else {
                        TokenKind::Str(text)
                    };
                    tokens.push(Token { kind, line });
                    i = next;
                    line += lines;
                } else {
                    tokens.push(Token { kind: TokenKind::Name(word), line });
                }
            }
            _ => {
                let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
                let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) else {
                    return Err(syntax_error(line, format!("invalid character '{ch}'")));
                };
                match *op {
                    "(" | "[" | "{" => depth += 1,
                    ")" | "]" | "}" => depth = depth.saturating_sub(1),
                    _ => {}
                }
                tokens.push(Token { kind: TokenKind::Op(op), line });
                i += op.len();
            }
        }
    }

    if !matches!(tokens.last(), Some(Token { kind: TokenKind::Newline, .. }) | None) {
        tokens.push(Token { kind: TokenKind::Newline, line });
    }
    while indents.len() > 1 {
        indents.pop();
        tokens.push(Token { kind: TokenKind::Dedent, line });
    }
    tokens.push(Token { kind: TokenKind::Eof, line });
    Ok(tokens)
}

fn read_number(chars: &[char], start: usize, line: usize) -> Result<(TokenKind, usize), ScriptError> {
    let mut i = start;
    let mut is_float = false;
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_digit() || c == '_' {
            i += 1;
        } else if c == '.' && !is_float && chars.get(i + 1).is_none_or(|n| n.is_ascii_digit() || !n.is_alphabetic()) {
            is_float = true;
            i += 1;
        } else if (c == 'e' || c == 'E')
            && chars
                .get(i + 1)
                .is_some_and(|n| n.is_ascii_digit() || *n == '-' || *n == '+')
        {
            is_float = true;
            i += 2;
        } else {
            break;
        }
    }
    let text: String = chars[start..i].iter().filter(|c| **c != '_').collect();
    let kind = if is_float {
        TokenKind::Float(
            text.parse()
                .map_err(|_| syntax_error(line, format!("invalid number '{text}'")))?,
        )
    } else {
        TokenKind::Int(
            text.parse()
                .map_err(|_| syntax_error(line, format!("integer literal too large '{text}'")))?,
        )
    };
    Ok((kind, i))
}

/// Read a quoted literal starting at `start`; returns (text, next index, newlines consumed)
fn read_string(
    chars: &[char],
    start: usize,
    line: usize,
) -> Result<(String, usize, usize), ScriptError> {
    let quote = chars[start];
    let triple = chars.get(start + 1) == Some(&quote) && chars.get(start + 2) == Some(&quote);
    let mut i = if triple { start + 3 } else { start + 1 };
    let mut text = String::new();
    let mut lines = 0;

    loop {
        let Some(&c) = chars.get(i) else {
            return Err(syntax_error(line, "unterminated string literal"));
        };
        if triple {
            if c == quote && chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote) {
                return Ok((text, i + 3, lines));
            }
        } else if c == quote {
            return Ok((text, i + 1, lines));
        } else if c == '\n' {
            return Err(syntax_error(line, "unterminated string literal"));
        }

        if c == '\\' {
            let escaped = chars
                .get(i + 1)
                .copied()
                .ok_or_else(|| syntax_error(line, "unterminated string literal"))?;
            match escaped {
                'n' => text.push('\n'),
                't' => text.push('\t'),
                'r' => text.push('\r'),
                '0' => text.push('\0'),
                '\\' => text.push('\\'),
                '\'' => text.push('\''),
                '"' => text.push('"'),
                '\n' => lines += 1,
                'x' => {
                    let hex: String = chars.iter().skip(i + 2).take(2).collect();
                    let code = u8::from_str_radix(&hex, 16)
                        .ok()
                        .filter(|_| hex.len() == 2)
                        .ok_or_else(|| syntax_error(line, "truncated \\xXX escape"))?;
                    text.push(char::from(code));
                    i += 4;
                    continue;
                }
                other => {
                    text.push('\\');
                    text.push(other);
                }
            }
            i += 2;
            continue;
        }

        if c == '\n' {
            lines += 1;
        }
        text.push(c);
        i += 1;
    }
}
