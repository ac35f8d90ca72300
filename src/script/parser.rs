use std::rc::Rc;

use crate::script::ast::{
    BinOp, CmpOp, Comprehension, ExceptClause, Expr, FPart, FunctionDef, Literal, Param, Stmt,
    Target, UnaryOp,
};
use crate::script::lexer::{Token, TokenKind, tokenize};
use crate::script::{ErrorKind, MAX_NESTING, ScriptError};

const KEYWORDS: &[&str] = &[
    "and", "as", "break", "continue", "def", "elif", "else", "except", "finally", "for", "if",
    "import", "in", "is", "lambda", "not", "or", "pass", "raise", "return", "try", "while",
];

/// Parse a module body
pub fn parse_program(source: &str) -> Result<Vec<Stmt>, ScriptError> {
    let mut parser = Parser::new(tokenize(source)?);
    let mut body = Vec::new();
    parser.skip_newlines();
    while !parser.at_eof() {
        body.push(parser.statement()?);
        parser.skip_newlines();
    }
    Ok(body)
}

/// Parse a single standalone expression
pub fn parse_expression(source: &str) -> Result<Expr, ScriptError> {
    let mut parser = Parser::new(tokenize(source)?);
    parser.skip_newlines();
    if parser.at_eof() {
        return Err(parser.error("unexpected EOF while parsing"));
    }
    let expr = parser.expression_list()?;
    parser.skip_newlines();
    if !parser.at_eof() {
        return Err(parser.error("invalid syntax"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Open expressions and blocks on the descent path
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Run one level of recursive descent, refusing to nest past [`MAX_NESTING`]
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ScriptError>,
    ) -> Result<T, ScriptError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("too many nested expressions"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Count one more link of a left-deep operator chain; the caller restores `depth`
    fn link(&mut self) -> Result<(), ScriptError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("too many nested expressions"));
        }
        self.depth += 1;
        Ok(())
    }

    fn peek(&self) -> &TokenKind {
        self.tokens
            .get(self.pos)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        self.tokens
            .get(self.pos + offset)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        kind
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    fn error(&self, message: &str) -> ScriptError {
        ScriptError::new(
            ErrorKind::SyntaxError,
            format!("{message} (line {})", self.line()),
        )
    }

    fn is_op(&self, op: &str) -> bool {
        matches!(self.peek(), TokenKind::Op(o) if *o == op)
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), TokenKind::Name(n) if n == word)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.is_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.is_keyword(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), ScriptError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{op}'")))
        }
    }

    fn expect_keyword(&mut self, word: &str) -> Result<(), ScriptError> {
        if self.eat_keyword(word) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{word}'")))
        }
    }

    fn identifier(&mut self) -> Result<String, ScriptError> {
        match self.peek() {
            TokenKind::Name(name) if !KEYWORDS.contains(&name.as_str()) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error("expected identifier")),
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), TokenKind::Newline) {
            self.pos += 1;
        }
    }

    fn end_of_statement(&mut self) -> Result<(), ScriptError> {
        match self.peek() {
            TokenKind::Newline => {
                self.pos += 1;
                Ok(())
            }
            TokenKind::Eof | TokenKind::Dedent => Ok(()),
            _ => Err(self.error("invalid syntax")),
        }
    }

    // ---------------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------------

    fn statement(&mut self) -> Result<Stmt, ScriptError> {
        let keyword = match self.peek() {
            TokenKind::Name(n) => n.clone(),
            TokenKind::Indent => return Err(self.error("unexpected indent")),
            _ => String::new(),
        };

        match keyword.as_str() {
            "if" => {
                self.pos += 1;
                self.if_statement()
            }
            "for" => {
                self.pos += 1;
                let target = self.target_list()?;
                self.expect_keyword("in")?;
                let iter = self.expression_list()?;
                let body = self.block()?;
                Ok(Stmt::For { target, iter, body })
            }
            "while" => {
                self.pos += 1;
                let test = self.expression()?;
                let body = self.block()?;
                Ok(Stmt::While { test, body })
            }
            "def" => {
                self.pos += 1;
                self.function_def()
            }
            "try" => {
                self.pos += 1;
                self.try_statement()
            }
            _ => {
                let stmt = self.simple_statement()?;
                self.end_of_statement()?;
                Ok(stmt)
            }
        }
    }

    fn simple_statement(&mut self) -> Result<Stmt, ScriptError> {
        if self.eat_keyword("pass") {
            return Ok(Stmt::Pass);
        }
        if self.eat_keyword("break") {
            return Ok(Stmt::Break);
        }
        if self.eat_keyword("continue") {
            return Ok(Stmt::Continue);
        }
        if self.eat_keyword("return") {
            if self.at_statement_end() {
                return Ok(Stmt::Return(None));
            }
            return Ok(Stmt::Return(Some(self.expression_list()?)));
        }
        if self.eat_keyword("raise") {
            if self.at_statement_end() {
                return Ok(Stmt::Raise(None));
            }
            return Ok(Stmt::Raise(Some(self.expression()?)));
        }
        if self.eat_keyword("import") {
            let module = self.identifier()?;
            return Ok(Stmt::Import(module));
        }
        if self.is_keyword("from") {
            return Err(self.error("only 'import math' is supported"));
        }

        let expr = self.expression_list()?;

        // annotated assignment: `x: int = 1`
        if matches!(expr, Expr::Name(_)) && self.eat_op(":") {
            self.expression()?;
            if !self.eat_op("=") {
                return Ok(Stmt::Pass);
            }
            let value = self.expression_list()?;
            return Ok(Stmt::Assign(self.to_target(expr)?, value));
        }

        if self.eat_op("=") {
            let target = self.to_target(expr)?;
            let value = self.expression_list()?;
            if self.is_op("=") {
                return Err(self.error("chained assignment is not supported"));
            }
            return Ok(Stmt::Assign(target, value));
        }

        let aug = match self.peek() {
            TokenKind::Op("+=") => Some(BinOp::Add),
            TokenKind::Op("-=") => Some(BinOp::Sub),
            TokenKind::Op("*=") => Some(BinOp::Mul),
            TokenKind::Op("/=") => Some(BinOp::Div),
            TokenKind::Op("//=") => Some(BinOp::FloorDiv),
            TokenKind::Op("%=") => Some(BinOp::Mod),
            TokenKind::Op("**=") => Some(BinOp::Pow),
            _ => None,
        };
        if let Some(op) = aug {
            self.pos += 1;
            let target = self.to_target(expr)?;
            if matches!(target, Target::Tuple(_)) {
                return Err(self.error("illegal expression for augmented assignment"));
            }
            let value = self.expression_list()?;
            return Ok(Stmt::AugAssign(target, op, value));
        }

        Ok(Stmt::Expr(expr))
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Newline | TokenKind::Eof | TokenKind::Dedent
        )
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.nested(Self::block_body)
    }

    fn block_body(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.expect_op(":")?;
        if !matches!(self.peek(), TokenKind::Newline) {
            let stmt = self.simple_statement()?;
            self.end_of_statement()?;
            return Ok(vec![stmt]);
        }
        self.skip_newlines();
        if !matches!(self.advance(), TokenKind::Indent) {
            return Err(self.error("expected an indented block"));
        }

        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek() {
                TokenKind::Dedent => {
                    self.pos += 1;
                    break;
                }
                TokenKind::Eof => break,
                _ => body.push(self.statement()?),
            }
        }
        Ok(body)
    }

    fn if_statement(&mut self) -> Result<Stmt, ScriptError> {
        let mut branches = Vec::new();
        let test = self.expression()?;
        branches.push((test, self.block()?));

        let mut orelse = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat_keyword("elif") {
                let test = self.expression()?;
                branches.push((test, self.block()?));
            } else if self.eat_keyword("else") {
                orelse = self.block()?;
                break;
            } else {
                break;
            }
        }
        Ok(Stmt::If { branches, orelse })
    }

    fn function_def(&mut self) -> Result<Stmt, ScriptError> {
        let name = self.identifier()?;
        self.expect_op("(")?;
        let params = self.parameters(")")?;
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.expression()?;
        }
        let body = self.block()?;
        Ok(Stmt::Def(Rc::new(FunctionDef { name, params, body })))
    }

    fn parameters(&mut self, close: &str) -> Result<Vec<Param>, ScriptError> {
        let mut params: Vec<Param> = Vec::new();
        while !self.is_op(close) {
            let name = self.identifier()?;
            if close == ")" && self.eat_op(":") {
                self.expression()?;
            }
            let default = if self.eat_op("=") {
                Some(self.expression()?)
            } else {
                None
            };
            if default.is_none() && params.iter().any(|p| p.default.is_some()) {
                return Err(self.error("non-default argument follows default argument"));
            }
            params.push(Param { name, default });
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(params)
    }

    fn try_statement(&mut self) -> Result<Stmt, ScriptError> {
        let body = self.block()?;
        let mut handlers = Vec::new();
        let mut finally = Vec::new();

        loop {
            self.skip_newlines();
            if !self.eat_keyword("except") {
                break;
            }
            let mut kinds = Vec::new();
            let mut binding = None;
            if !self.is_op(":") {
                if self.eat_op("(") {
                    while !self.is_op(")") {
                        kinds.push(self.identifier()?);
                        if !self.eat_op(",") {
                            break;
                        }
                    }
                    self.expect_op(")")?;
                } else {
                    kinds.push(self.identifier()?);
                }
                if self.eat_keyword("as") {
                    binding = Some(self.identifier()?);
                }
            }
            let body = self.block()?;
            handlers.push(ExceptClause {
                kinds,
                binding,
                body,
            });
        }

        self.skip_newlines();
        if self.eat_keyword("finally") {
            finally = self.block()?;
        }
        if handlers.is_empty() && finally.is_empty() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }
        Ok(Stmt::Try {
            body,
            handlers,
            finally,
        })
    }

    fn target_list(&mut self) -> Result<Target, ScriptError> {
        let mut targets = vec![self.postfix()?];
        let mut is_tuple = false;
        while self.eat_op(",") {
            is_tuple = true;
            if self.is_keyword("in") || self.is_op("=") {
                break;
            }
            targets.push(self.postfix()?);
        }
        if is_tuple {
            Ok(Target::Tuple(
                targets
                    .into_iter()
                    .map(|t| self.to_target(t))
                    .collect::<Result<_, _>>()?,
            ))
        } else {
            let first = targets.remove(0);
            self.to_target(first)
        }
    }

    fn to_target(&self, expr: Expr) -> Result<Target, ScriptError> {
        match expr {
            Expr::Name(name) => Ok(Target::Name(name)),
            Expr::Subscript(object, index) => Ok(Target::Subscript(*object, *index)),
            Expr::Tuple(items) | Expr::List(items) => Ok(Target::Tuple(
                items
                    .into_iter()
                    .map(|item| self.to_target(item))
                    .collect::<Result<_, _>>()?,
            )),
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    // ---------------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------------

    /// Comma-separated expressions; more than one (or a trailing comma) builds a tuple
    fn expression_list(&mut self) -> Result<Expr, ScriptError> {
        let first = self.expression()?;
        if !self.is_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_statement_end() || self.is_op("=") || self.is_op(")") {
                break;
            }
            items.push(self.expression()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn expression(&mut self) -> Result<Expr, ScriptError> {
        self.nested(Self::conditional_expression)
    }

    fn conditional_expression(&mut self) -> Result<Expr, ScriptError> {
        if self.eat_keyword("lambda") {
            let params = self.parameters(":")?;
            self.expect_op(":")?;
            let body = self.expression()?;
            return Ok(Expr::Lambda(Rc::new(FunctionDef {
                name: "<lambda>".to_string(),
                params,
                body: vec![Stmt::Return(Some(body))],
            })));
        }

        let body = self.or_test()?;
        if self.eat_keyword("if") {
            let test = self.or_test()?;
            self.expect_keyword("else")?;
            let orelse = self.expression()?;
            return Ok(Expr::IfElse {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            });
        }
        Ok(body)
    }

    fn or_test(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.and_test()?;
        let base = self.depth;
        while self.eat_keyword("or") {
            self.link()?;
            let right = self.and_test()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn and_test(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.not_test()?;
        let base = self.depth;
        while self.eat_keyword("and") {
            self.link()?;
            let right = self.not_test()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn not_test(&mut self) -> Result<Expr, ScriptError> {
        if self.eat_keyword("not") {
            let operand = self.nested(Self::not_test)?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ScriptError> {
        let left = self.arith()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                TokenKind::Op("==") => CmpOp::Eq,
                TokenKind::Op("!=") => CmpOp::NotEq,
                TokenKind::Op("<") => CmpOp::Lt,
                TokenKind::Op("<=") => CmpOp::LtE,
                TokenKind::Op(">") => CmpOp::Gt,
                TokenKind::Op(">=") => CmpOp::GtE,
                TokenKind::Name(n) if n == "in" => CmpOp::In,
                TokenKind::Name(n)
                    if n == "not" && matches!(self.peek_at(1), TokenKind::Name(m) if m == "in") =>
                {
                    self.pos += 1;
                    CmpOp::NotIn
                }
                TokenKind::Name(n) if n == "is" => {
                    if matches!(self.peek_at(1), TokenKind::Name(m) if m == "not") {
                        self.pos += 1;
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.pos += 1;
            rest.push((op, self.arith()?));
        }
        if rest.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare(Box::new(left), rest))
        }
    }

    fn arith(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.term()?;
        let base = self.depth;
        loop {
            let op = match self.peek() {
                TokenKind::Op("+") => BinOp::Add,
                TokenKind::Op("-") => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            self.link()?;
            let right = self.term()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.factor()?;
        let base = self.depth;
        loop {
            let op = match self.peek() {
                TokenKind::Op("*") => BinOp::Mul,
                TokenKind::Op("/") => BinOp::Div,
                TokenKind::Op("//") => BinOp::FloorDiv,
                TokenKind::Op("%") => BinOp::Mod,
                _ => break,
            };
            self.pos += 1;
            self.link()?;
            let right = self.factor()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr, ScriptError> {
        if self.eat_op("-") {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.nested(Self::factor)?)));
        }
        if self.eat_op("+") {
            return Ok(Expr::Unary(UnaryOp::Pos, Box::new(self.nested(Self::factor)?)));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, ScriptError> {
        let base = self.postfix()?;
        if self.eat_op("**") {
            // right-associative and binds tighter than unary minus on its left
            let exponent = self.nested(Self::factor)?;
            return Ok(Expr::Binary(Box::new(base), BinOp::Pow, Box::new(exponent)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op("(") {
                let (args, kwargs) = self.call_arguments()?;
                self.expect_op(")")?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    kwargs,
                };
            } else if self.eat_op("[") {
                let index = self.subscript()?;
                self.expect_op("]")?;
                expr = Expr::Subscript(Box::new(expr), Box::new(index));
            } else if self.eat_op(".") {
                let name = self.identifier()?;
                expr = Expr::Attribute(Box::new(expr), name);
            } else {
                return Ok(expr);
            }
        }
    }

    fn call_arguments(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), ScriptError> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while !self.is_op(")") {
            let is_keyword_arg = matches!(self.peek(), TokenKind::Name(_))
                && matches!(self.peek_at(1), TokenKind::Op("="));
            if is_keyword_arg {
                let name = self.identifier()?;
                self.expect_op("=")?;
                kwargs.push((name, self.expression()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let arg = self.expression()?;
                if self.is_keyword("for") {
                    // bare generator expression as the only argument
                    let comp = self.comprehension()?;
                    args.push(Expr::ListComp(Box::new(arg), Box::new(comp)));
                } else {
                    args.push(arg);
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        Ok((args, kwargs))
    }

    fn subscript(&mut self) -> Result<Expr, ScriptError> {
        let lower = if self.is_op(":") {
            None
        } else {
            Some(Box::new(self.expression()?))
        };
        if !self.eat_op(":") {
            return lower
                .map(|b| *b)
                .ok_or_else(|| self.error("invalid subscript"));
        }
        let upper = if self.is_op("]") {
            None
        } else {
            Some(Box::new(self.expression()?))
        };
        Ok(Expr::Slice(lower, upper))
    }

    fn comprehension(&mut self) -> Result<Comprehension, ScriptError> {
        self.expect_keyword("for")?;
        let target = self.target_list()?;
        self.expect_keyword("in")?;
        let iter = self.or_test()?;
        let mut conditions = Vec::new();
        while self.eat_keyword("if") {
            conditions.push(self.or_test()?);
        }
        if self.is_keyword("for") {
            return Err(self.error("nested comprehensions are not supported"));
        }
        Ok(Comprehension {
            target,
            iter,
            conditions,
        })
    }

    fn atom(&mut self) -> Result<Expr, ScriptError> {
        match self.advance() {
            TokenKind::Int(n) => Ok(Expr::Literal(Literal::Int(n))),
            TokenKind::Float(f) => Ok(Expr::Literal(Literal::Float(f))),
            TokenKind::Str(s) => self.string_concat(vec![FPart::Text(s)]),
            TokenKind::FStr(template) => {
                let parts = parse_fstring(&template).map_err(|e| self.error(&e))?;
                self.string_concat(parts)
            }
            TokenKind::Name(name) => match name.as_str() {
                "None" => Ok(Expr::Literal(Literal::None)),
                "True" => Ok(Expr::Literal(Literal::Bool(true))),
                "False" => Ok(Expr::Literal(Literal::Bool(false))),
                n if KEYWORDS.contains(&n) => {
                    self.pos -= 1;
                    Err(self.error("invalid syntax"))
                }
                _ => Ok(Expr::Name(name)),
            },
            TokenKind::Op("(") => {
                if self.eat_op(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.expression()?;
                if self.is_keyword("for") {
                    let comp = self.comprehension()?;
                    self.expect_op(")")?;
                    return Ok(Expr::ListComp(Box::new(first), Box::new(comp)));
                }
                if self.eat_op(")") {
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.is_op(")") {
                        break;
                    }
                    items.push(self.expression()?);
                }
                self.expect_op(")")?;
                Ok(Expr::Tuple(items))
            }
            TokenKind::Op("[") => {
                if self.eat_op("]") {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.expression()?;
                if self.is_keyword("for") {
                    let comp = self.comprehension()?;
                    self.expect_op("]")?;
                    return Ok(Expr::ListComp(Box::new(first), Box::new(comp)));
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.is_op("]") {
                        break;
                    }
                    items.push(self.expression()?);
                }
                self.expect_op("]")?;
                Ok(Expr::List(items))
            }
            TokenKind::Op("{") => {
                if self.eat_op("}") {
                    return Ok(Expr::Dict(Vec::new()));
                }
                let key = self.expression()?;
                self.expect_op(":")?;
                let value = self.expression()?;
                if self.is_keyword("for") {
                    let comp = self.comprehension()?;
                    self.expect_op("}")?;
                    return Ok(Expr::DictComp(Box::new((key, value)), Box::new(comp)));
                }
                let mut entries = vec![(key, value)];
                while self.eat_op(",") {
                    if self.is_op("}") {
                        break;
                    }
                    let key = self.expression()?;
                    self.expect_op(":")?;
                    entries.push((key, self.expression()?));
                }
                self.expect_op("}")?;
                Ok(Expr::Dict(entries))
            }
            TokenKind::Eof | TokenKind::Newline => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error("unexpected EOF while parsing"))
            }
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error("invalid syntax"))
            }
        }
    }

    /// Adjacent string literals concatenate
    fn string_concat(&mut self, mut parts: Vec<FPart>) -> Result<Expr, ScriptError> {
        loop {
            match self.peek().clone() {
                TokenKind::Str(s) => {
                    self.pos += 1;
                    parts.push(FPart::Text(s));
                }
                TokenKind::FStr(template) => {
                    self.pos += 1;
                    parts.extend(parse_fstring(&template).map_err(|e| self.error(&e))?);
                }
                _ => break,
            }
        }

        if parts.iter().all(|p| matches!(p, FPart::Text(_))) {
            let text = parts
                .into_iter()
                .map(|p| match p {
                    FPart::Text(t) => t,
                    FPart::Value { .. } => String::new(),
                })
                .collect();
            return Ok(Expr::Literal(Literal::Str(text)));
        }
        Ok(Expr::FString(parts))
    }
}

/// Split an f-string template into literal text and `{expr[!r][:spec]}` parts
fn parse_fstring(template: &str) -> Result<Vec<FPart>, String> {
    let chars: Vec<char> = template.chars().collect();
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                text.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                text.push('}');
                i += 2;
            }
            '}' => return Err("f-string: single '}' is not allowed".to_string()),
            '{' => {
                if !text.is_empty() {
                    parts.push(FPart::Text(std::mem::take(&mut text)));
                }
                let start = i + 1;
                let mut depth = 0usize;
                let mut quote: Option<char> = None;
                let mut expr_end = None;
                let mut conversion = None;
                let mut spec_start = None;
                let mut j = start;
                while j < chars.len() {
                    let c = chars[j];
                    if let Some(q) = quote {
                        if c == q {
                            quote = None;
                        }
                    } else {
                        match c {
                            '\'' | '"' => quote = Some(c),
                            '(' | '[' | '{' => depth += 1,
                            ')' | ']' => depth = depth.saturating_sub(1),
                            '}' if depth > 0 => depth -= 1,
                            '}' => break,
                            '!' if depth == 0 && chars.get(j + 1) != Some(&'=') => {
                                expr_end.get_or_insert(j);
                                conversion = chars.get(j + 1).copied();
                                j += 1;
                            }
                            ':' if depth == 0 && spec_start.is_none() => {
                                expr_end.get_or_insert(j);
                                spec_start = Some(j + 1);
                            }
                            _ => {}
                        }
                    }
                    j += 1;
                }
                if j >= chars.len() {
                    return Err("f-string: expecting '}'".to_string());
                }

                let expr_text: String = chars[start..expr_end.unwrap_or(j)].iter().collect();
                if expr_text.trim().is_empty() {
                    return Err("f-string: empty expression not allowed".to_string());
                }
                let expr = parse_expression(expr_text.trim()).map_err(|e| e.message)?;
                let spec = spec_start.map(|s| chars[s..j].iter().collect::<String>());
                parts.push(FPart::Value {
                    expr,
                    repr: conversion == Some('r'),
                    spec,
                });
                i = j + 1;
            }
            c => {
                text.push(c);
                i += 1;
            }
        }
    }
    if !text.is_empty() {
        parts.push(FPart::Text(text));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence() {
        let expr = parse_expression("1 + 2 * 3").unwrap();
        let Expr::Binary(_, BinOp::Add, right) = expr else {
            panic!("expected addition at the root");
        };
        assert!(matches!(*right, Expr::Binary(_, BinOp::Mul, _)));
    }

    #[test]
    fn test_power_binds_tighter_than_unary_minus() {
        let expr = parse_expression("-2 ** 2").unwrap();
        assert!(matches!(expr, Expr::Unary(UnaryOp::Neg, _)));
    }

    #[test]
    fn test_handler_definition() {
        let body = parse_program(
            "def handler(input_data: dict) -> dict:\n    x = input_data['a']\n    return {'x': x}\n",
        )
        .unwrap();
        assert_eq!(body.len(), 1);
        let Stmt::Def(def) = &body[0] else {
            panic!("expected a function definition");
        };
        assert_eq!(def.name, "handler");
        assert_eq!(def.params.len(), 1);
        assert_eq!(def.body.len(), 2);
    }

    #[test]
    fn test_tuple_unpacking_and_comprehension() {
        let body = parse_program("for k, v in d.items():\n    pass\nys = [x * 2 for x in xs if x]\n").unwrap();
        assert!(matches!(&body[0], Stmt::For { target: Target::Tuple(t), .. } if t.len() == 2));
        assert!(matches!(&body[1], Stmt::Assign(_, Expr::ListComp(..))));
    }

    #[test]
    fn test_fstring_parts() {
        let expr = parse_expression("f\"total: {a + b:.2f} {{raw}}\"").unwrap();
        let Expr::FString(parts) = expr else {
            panic!("expected an f-string");
        };
        assert_eq!(parts.len(), 3);
        assert!(matches!(&parts[1], FPart::Value { spec: Some(s), .. } if s == ".2f"));
        assert_eq!(parts[2], FPart::Text(" {raw}".to_string()));
    }

    #[test]
    fn test_try_except() {
        let body = parse_program(
            "try:\n    x = 1 / 0\nexcept (ZeroDivisionError, ValueError) as e:\n    x = 0\n",
        )
        .unwrap();
        let Stmt::Try { handlers, .. } = &body[0] else {
            panic!("expected try");
        };
        assert_eq!(handlers[0].kinds.len(), 2);
        assert_eq!(handlers[0].binding.as_deref(), Some("e"));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse_program("def (x):\n    pass\n").is_err());
        assert!(parse_program("x = \n").is_err());
        assert!(parse_program("if x\n    pass\n").is_err());
        assert!(parse_expression("2 3").is_err());
        assert!(parse_expression("").is_err());
    }

    #[test]
    fn test_nesting_is_bounded() {
        let parsed = crate::script::run_isolated(|| {
            let deep = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
            let err = parse_expression(&deep).unwrap_err();
            assert_eq!(err.kind, ErrorKind::SyntaxError);
            assert!(err.message.starts_with("too many nested expressions"));

            assert!(parse_expression(&format!("{}1", "-".repeat(100_000))).is_err());
            assert!(parse_expression(&format!("{}x", "not ".repeat(100_000))).is_err());
            assert!(parse_expression(&format!("1{}", " ** 2".repeat(100_000))).is_err());
            assert!(parse_expression(&format!("1{}", " + 1".repeat(100_000))).is_err());

            let mut program = String::new();
            for level in 0..300 {
                program.push_str(&" ".repeat(level * 4));
                program.push_str("if x:\n");
            }
            program.push_str(&" ".repeat(300 * 4));
            program.push_str("pass\n");
            assert!(parse_program(&program).is_err());

            parse_expression(&format!("{}1{}", "(".repeat(50), ")".repeat(50))).map(|_| ())
        });
        assert!(parsed.is_ok());
    }
}
