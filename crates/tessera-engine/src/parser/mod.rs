//! Configuration source parser built on `nom`.
//!
//! Transforms raw source text into a validated AST through lexing,
//! recursive-descent parsing, and static analysis phases.

pub mod ast;
pub mod lexer;
pub mod validator;

use tessera_common::constants::MAX_EVAL_DEPTH;
use tessera_common::error::{Result, TesseraError};

use self::ast::{
    Attribute, BinaryOp, BoundOp, Clause, Comprehension, Decl, Expr, Field, Label, ListElem,
    SourceFile, StrPart, UnaryOp,
};
use self::lexer::{Spanned, StrToken, Token};

/// A syntax error at a byte offset, before it is attributed to a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    /// Byte offset of the offending input.
    pub offset: usize,
    /// Description of the error.
    pub message: String,
}

impl SyntaxError {
    /// Creates a syntax error at the given offset.
    pub fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }

    /// Attributes the error to a file, resolving the offset to a line and column.
    #[must_use]
    pub fn into_error(self, file: &str, source: &str) -> TesseraError {
        let (line, column) = line_col(source, self.offset);
        TesseraError::Parse {
            file: file.to_string(),
            line,
            column,
            message: self.message,
        }
    }
}

type ParseResult<T> = std::result::Result<T, SyntaxError>;

fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let prefix = source.get(..offset).unwrap_or(source);
    let line = prefix.matches('\n').count() + 1;
    let column = prefix
        .rsplit_once('\n')
        .map_or(prefix, |(_, tail)| tail)
        .chars()
        .count()
        + 1;
    (line, column)
}

/// Cursor into a token stream for recursive-descent parsing.
struct TokenCursor<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    end: usize,
    depth: usize,
    max_depth: usize,
}

impl<'a> TokenCursor<'a> {
    const fn new(tokens: &'a [Spanned], end: usize, max_depth: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            end,
            depth: 0,
            max_depth,
        }
    }

    /// A cursor over an interpolation body that continues this one's nesting.
    const fn interpolation(&self, tokens: &'a [Spanned], end: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            end,
            depth: self.depth,
            max_depth: self.max_depth,
        }
    }

    /// Runs `parse` one nesting level deeper.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        if self.depth >= self.max_depth {
            return Err(self.error(format!("nesting deeper than {} levels", self.max_depth)));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, ahead: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + ahead).map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let tok = self.tokens.get(self.pos).map(|s| &s.token);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |s| s.offset)
    }

    /// Whether the next token starts on a new line.
    fn at_newline(&self) -> bool {
        self.tokens.get(self.pos).is_some_and(|s| s.newline_before)
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.offset(), message)
    }

    fn expect_token(&mut self, expected: &Token) -> ParseResult<()> {
        match self.peek() {
            Some(tok) if tok == expected => {
                let _ = self.advance();
                Ok(())
            }
            other => Err(self.error(format!(
                "expected {}, got {}",
                describe(Some(expected)),
                describe(other)
            ))),
        }
    }

    fn expect_ident(&mut self) -> ParseResult<String> {
        match self.peek() {
            Some(Token::Ident(s)) => {
                let _ = self.advance();
                Ok(s.clone())
            }
            other => Err(self.error(format!("expected identifier, got {}", describe(other)))),
        }
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            let _ = self.advance();
            true
        } else {
            false
        }
    }

    const fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }
}

fn describe(token: Option<&Token>) -> String {
    let Some(token) = token else {
        return "end of input".to_string();
    };
    let text = match token {
        Token::Ident(name) => return format!("identifier {name}"),
        Token::Str(_) => return "string literal".to_string(),
        Token::Int(n) => return format!("integer {n}"),
        Token::Float(f) => return format!("float {f}"),
        Token::Attribute { name, .. } => return format!("attribute @{name}"),
        Token::True => "true",
        Token::False => "false",
        Token::Null => "null",
        Token::Top => "_",
        Token::Bottom => "_|_",
        Token::BraceOpen => "{",
        Token::BraceClose => "}",
        Token::BracketOpen => "[",
        Token::BracketClose => "]",
        Token::ParenOpen => "(",
        Token::ParenClose => ")",
        Token::Colon => ":",
        Token::Comma => ",",
        Token::Dot => ".",
        Token::Ellipsis => "...",
        Token::Question => "?",
        Token::Amp => "&",
        Token::Pipe => "|",
        Token::Star => "*",
        Token::Plus => "+",
        Token::Minus => "-",
        Token::Slash => "/",
        Token::Bang => "!",
        Token::EqEq => "==",
        Token::NotEq => "!=",
        Token::Lt => "<",
        Token::Le => "<=",
        Token::Gt => ">",
        Token::Ge => ">=",
        Token::Match => "=~",
        Token::NotMatch => "!~",
        Token::AndAnd => "&&",
        Token::OrOr => "||",
    };
    format!("'{text}'")
}

/// Parses a source file from its text.
///
/// # Errors
///
/// Returns an error if the input contains syntax errors or fails validation.
pub fn parse_source(name: &str, input: &str) -> Result<SourceFile> {
    parse_source_nested(name, input, MAX_EVAL_DEPTH)
}

/// Parses a source file whose expressions nest at most `max_depth` levels.
///
/// # Errors
///
/// Returns an error if the input contains syntax errors, nests too deeply or
/// fails validation.
pub fn parse_source_nested(name: &str, input: &str, max_depth: usize) -> Result<SourceFile> {
    tracing::debug!(file = name, "parsing source");
    let tokens =
        lexer::tokenize_nested(input, max_depth).map_err(|e| e.into_error(name, input))?;
    let mut cursor = TokenCursor::new(&tokens, input.len(), max_depth);
    let mut file = parse_file(&mut cursor).map_err(|e| e.into_error(name, input))?;
    file.name = name.to_string();
    validator::validate(&file)?;
    Ok(file)
}

/// Parses a standalone expression, such as a value supplied on the command line.
///
/// # Errors
///
/// Returns an error if the input is not exactly one expression.
pub fn parse_expression(input: &str) -> Result<Expr> {
    let tokens = lexer::tokenize(input).map_err(|e| e.into_error("<expr>", input))?;
    let mut cursor = TokenCursor::new(&tokens, input.len(), MAX_EVAL_DEPTH);
    let expr = parse_expr(&mut cursor).map_err(|e| e.into_error("<expr>", input))?;
    if !cursor.at_end() {
        return Err(cursor
            .error(format!("unexpected {}", describe(cursor.peek())))
            .into_error("<expr>", input));
    }
    Ok(expr)
}

fn parse_file(cursor: &mut TokenCursor<'_>) -> ParseResult<SourceFile> {
    let mut file = SourceFile::default();

    if cursor.peek() == Some(&Token::Ident("package".into()))
        && matches!(cursor.peek_at(1), Some(Token::Ident(_)))
    {
        let _ = cursor.advance();
        file.package = Some(cursor.expect_ident()?);
    }

    while cursor.peek() == Some(&Token::Ident("import".into()))
        && !matches!(cursor.peek_at(1), Some(Token::Colon | Token::Question))
    {
        let _ = cursor.advance();
        if cursor.eat(&Token::ParenOpen) {
            while !cursor.eat(&Token::ParenClose) {
                file.imports.push(parse_import_path(cursor)?);
            }
        } else {
            file.imports.push(parse_import_path(cursor)?);
        }
    }

    file.decls = parse_decls(cursor, None)?;
    Ok(file)
}

fn parse_import_path(cursor: &mut TokenCursor<'_>) -> ParseResult<String> {
    match cursor.advance() {
        Some(Token::Str(parts)) => match parts.as_slice() {
            [StrToken::Lit(path)] => Ok(path.clone()),
            _ => Err(cursor.error("import path must be a plain string")),
        },
        other => Err(cursor.error(format!("expected import path, got {}", describe(other)))),
    }
}

/// Parses declarations until `terminator` (or end of input when `None`).
fn parse_decls(
    cursor: &mut TokenCursor<'_>,
    terminator: Option<&Token>,
) -> ParseResult<Vec<Decl>> {
    let mut decls = Vec::new();

    loop {
        while cursor.eat(&Token::Comma) {}
        match (cursor.peek(), terminator) {
            (None, None) => break,
            (None, Some(t)) => {
                return Err(cursor.error(format!(
                    "unexpected end of input, expected {}",
                    describe(Some(t))
                )));
            }
            (Some(tok), Some(t)) if tok == t => break,
            _ => {}
        }

        decls.push(parse_decl(cursor)?);

        let separated = cursor.at_end()
            || cursor.at_newline()
            || cursor.peek() == Some(&Token::Comma)
            || terminator.is_some_and(|t| cursor.peek() == Some(t));
        if !separated {
            return Err(cursor.error(format!(
                "expected ',' or newline after declaration, got {}",
                describe(cursor.peek())
            )));
        }
    }

    Ok(decls)
}

fn is_field_start(cursor: &TokenCursor<'_>) -> bool {
    matches!(cursor.peek(), Some(Token::Ident(_) | Token::Str(_)))
        && match cursor.peek_at(1) {
            Some(Token::Colon) => true,
            Some(Token::Question) => cursor.peek_at(2) == Some(&Token::Colon),
            _ => false,
        }
}

/// Whether the cursor is at `[label]:`, looking past the bracketed label.
fn is_pattern_start(cursor: &TokenCursor<'_>) -> bool {
    if cursor.peek() != Some(&Token::BracketOpen) {
        return false;
    }
    let mut depth = 0usize;
    let mut ahead = 0;
    while let Some(tok) = cursor.peek_at(ahead) {
        match tok {
            Token::BracketOpen => depth += 1,
            Token::BracketClose => {
                depth -= 1;
                if depth == 0 {
                    return cursor.peek_at(ahead + 1) == Some(&Token::Colon);
                }
            }
            _ => {}
        }
        ahead += 1;
    }
    false
}

fn is_comprehension_start(cursor: &TokenCursor<'_>) -> bool {
    matches!(cursor.peek(), Some(Token::Ident(kw)) if kw == "if" || kw == "for")
        && !matches!(cursor.peek_at(1), Some(Token::Colon | Token::Question))
}

fn parse_decl(cursor: &mut TokenCursor<'_>) -> ParseResult<Decl> {
    if cursor.eat(&Token::Ellipsis) {
        return Ok(Decl::Ellipsis);
    }
    if is_pattern_start(cursor) {
        let _ = cursor.advance();
        let label = parse_expr(cursor)?;
        cursor.expect_token(&Token::BracketClose)?;
        cursor.expect_token(&Token::Colon)?;
        let value = parse_field_value(cursor)?;
        return Ok(Decl::Pattern { label, value });
    }
    if is_comprehension_start(cursor) {
        return parse_comprehension(cursor).map(Decl::Comprehension);
    }
    if is_field_start(cursor) {
        return parse_field(cursor).map(Decl::Field);
    }
    parse_expr(cursor).map(Decl::Embed)
}

fn parse_label(cursor: &mut TokenCursor<'_>) -> ParseResult<Label> {
    match cursor.advance() {
        Some(Token::Ident(name)) => Ok(Label::Ident(name.clone())),
        Some(Token::Str(parts)) => match parts.as_slice() {
            [StrToken::Lit(text)] => Ok(Label::Quoted(text.clone())),
            _ => Ok(Label::Interpolated(convert_str_parts(parts, cursor)?)),
        },
        other => Err(cursor.error(format!("expected label, got {}", describe(other)))),
    }
}

fn parse_field(cursor: &mut TokenCursor<'_>) -> ParseResult<Field> {
    let label = parse_label(cursor)?;
    let optional = cursor.eat(&Token::Question);
    cursor.expect_token(&Token::Colon)?;
    let value = parse_field_value(cursor)?;

    let mut attributes = Vec::new();
    while let Some(Token::Attribute { name, body }) = cursor.peek() {
        attributes.push(Attribute {
            name: name.clone(),
            body: body.clone(),
        });
        let _ = cursor.advance();
    }

    Ok(Field {
        label,
        optional,
        value,
        attributes,
    })
}

fn parse_field_value(cursor: &mut TokenCursor<'_>) -> ParseResult<Expr> {
    if is_field_start(cursor) || is_pattern_start(cursor) {
        // `a: b: c` shorthand nests a single-declaration struct.
        Ok(Expr::Struct(vec![cursor.nested(parse_decl)?]))
    } else {
        parse_expr(cursor)
    }
}

fn parse_comprehension(cursor: &mut TokenCursor<'_>) -> ParseResult<Comprehension> {
    let mut clauses = Vec::new();

    loop {
        match cursor.peek() {
            Some(Token::Ident(kw)) if kw == "for" => {
                let _ = cursor.advance();
                let first = cursor.expect_ident()?;
                let (key, value) = if cursor.eat(&Token::Comma) {
                    (Some(first), cursor.expect_ident()?)
                } else {
                    (None, first)
                };
                cursor.expect_token(&Token::Ident("in".into()))?;
                let source = parse_expr(cursor)?;
                clauses.push(Clause::For { key, value, source });
            }
            Some(Token::Ident(kw)) if kw == "if" => {
                let _ = cursor.advance();
                clauses.push(Clause::If(parse_expr(cursor)?));
            }
            Some(Token::BraceOpen) if !clauses.is_empty() => break,
            other => {
                return Err(cursor.error(format!(
                    "expected comprehension clause or body, got {}",
                    describe(other)
                )));
            }
        }
    }

    cursor.expect_token(&Token::BraceOpen)?;
    let body = parse_decls(cursor, Some(&Token::BraceClose))?;
    cursor.expect_token(&Token::BraceClose)?;
    Ok(Comprehension { clauses, body })
}

fn parse_expr(cursor: &mut TokenCursor<'_>) -> ParseResult<Expr> {
    cursor.nested(parse_disjunction)
}

fn parse_disjunct(cursor: &mut TokenCursor<'_>) -> ParseResult<(Expr, bool)> {
    let default = cursor.eat(&Token::Star);
    Ok((parse_unify(cursor)?, default))
}

fn parse_disjunction(cursor: &mut TokenCursor<'_>) -> ParseResult<Expr> {
    let first = parse_disjunct(cursor)?;
    let mut terms = vec![first];
    while cursor.peek() == Some(&Token::Pipe) && !cursor.at_newline() {
        let _ = cursor.advance();
        terms.push(parse_disjunct(cursor)?);
    }

    if terms.len() == 1 && !terms[0].1 {
        return Ok(terms.remove(0).0);
    }
    Ok(Expr::Disjunction(terms))
}

fn parse_unify(cursor: &mut TokenCursor<'_>) -> ParseResult<Expr> {
    let mut lhs = parse_or(cursor)?;
    while cursor.peek() == Some(&Token::Amp) && !cursor.at_newline() {
        let _ = cursor.advance();
        let rhs = parse_or(cursor)?;
        lhs = Expr::Unify(Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
}

fn parse_binary_level(
    cursor: &mut TokenCursor<'_>,
    next: fn(&mut TokenCursor<'_>) -> ParseResult<Expr>,
    op_for: fn(&Token) -> Option<BinaryOp>,
) -> ParseResult<Expr> {
    let mut lhs = next(cursor)?;
    while let Some(op) = cursor.peek().and_then(op_for) {
        if cursor.at_newline() {
            break;
        }
        let _ = cursor.advance();
        let rhs = next(cursor)?;
        lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
}

fn parse_or(cursor: &mut TokenCursor<'_>) -> ParseResult<Expr> {
    parse_binary_level(cursor, parse_and, |t| {
        (t == &Token::OrOr).then_some(BinaryOp::Or)
    })
}

fn parse_and(cursor: &mut TokenCursor<'_>) -> ParseResult<Expr> {
    parse_binary_level(cursor, parse_comparison, |t| {
        (t == &Token::AndAnd).then_some(BinaryOp::And)
    })
}

fn parse_comparison(cursor: &mut TokenCursor<'_>) -> ParseResult<Expr> {
    parse_binary_level(cursor, parse_additive, |t| match t {
        Token::EqEq => Some(BinaryOp::Eq),
        Token::NotEq => Some(BinaryOp::Ne),
        Token::Lt => Some(BinaryOp::Lt),
        Token::Le => Some(BinaryOp::Le),
        Token::Gt => Some(BinaryOp::Gt),
        Token::Ge => Some(BinaryOp::Ge),
        Token::Match => Some(BinaryOp::Match),
        Token::NotMatch => Some(BinaryOp::NotMatch),
        _ => None,
    })
}

fn parse_additive(cursor: &mut TokenCursor<'_>) -> ParseResult<Expr> {
    parse_binary_level(cursor, parse_multiplicative, |t| match t {
        Token::Plus => Some(BinaryOp::Add),
        Token::Minus => Some(BinaryOp::Sub),
        _ => None,
    })
}

fn parse_multiplicative(cursor: &mut TokenCursor<'_>) -> ParseResult<Expr> {
    parse_binary_level(cursor, parse_unary, |t| match t {
        Token::Star => Some(BinaryOp::Mul),
        Token::Slash => Some(BinaryOp::Div),
        _ => None,
    })
}

fn parse_unary(cursor: &mut TokenCursor<'_>) -> ParseResult<Expr> {
    let op = match cursor.peek() {
        Some(Token::Minus) => UnaryOp::Neg,
        Some(Token::Bang) => UnaryOp::Not,
        Some(Token::Lt) => UnaryOp::Bound(BoundOp::Lt),
        Some(Token::Le) => UnaryOp::Bound(BoundOp::Le),
        Some(Token::Gt) => UnaryOp::Bound(BoundOp::Gt),
        Some(Token::Ge) => UnaryOp::Bound(BoundOp::Ge),
        Some(Token::NotEq) => UnaryOp::Bound(BoundOp::Ne),
        Some(Token::Match) => UnaryOp::Bound(BoundOp::Match),
        Some(Token::NotMatch) => UnaryOp::Bound(BoundOp::NotMatch),
        _ => return parse_postfix(cursor),
    };
    let _ = cursor.advance();
    let operand = cursor.nested(parse_unary)?;

    // Fold negative literals so data documents stay literal.
    Ok(match (op, operand) {
        (UnaryOp::Neg, Expr::Int(n)) => Expr::Int(-n),
        (UnaryOp::Neg, Expr::Float(f)) => Expr::Float(-f),
        (op, operand) => Expr::Unary(op, Box::new(operand)),
    })
}

fn parse_postfix(cursor: &mut TokenCursor<'_>) -> ParseResult<Expr> {
    let mut expr = parse_primary(cursor)?;
    loop {
        match cursor.peek() {
            Some(Token::Dot) => {
                let _ = cursor.advance();
                let field = match cursor.advance() {
                    Some(Token::Ident(name)) => name.clone(),
                    Some(Token::Str(parts)) => match parts.as_slice() {
                        [StrToken::Lit(text)] => text.clone(),
                        _ => return Err(cursor.error("selector must be a plain string")),
                    },
                    other => {
                        return Err(
                            cursor.error(format!("expected selector, got {}", describe(other)))
                        );
                    }
                };
                expr = Expr::Selector(Box::new(expr), field);
            }
            Some(Token::BracketOpen) if !cursor.at_newline() => {
                let _ = cursor.advance();
                let index = parse_expr(cursor)?;
                cursor.expect_token(&Token::BracketClose)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            }
            _ => return Ok(expr),
        }
    }
}

fn parse_primary(cursor: &mut TokenCursor<'_>) -> ParseResult<Expr> {
    let offset = cursor.offset();
    let Some(token) = cursor.advance() else {
        return Err(cursor.error("unexpected end of input, expected expression"));
    };
    match token {
        Token::Int(n) => Ok(Expr::Int(*n)),
        Token::Float(f) => Ok(Expr::Float(*f)),
        Token::True => Ok(Expr::Bool(true)),
        Token::False => Ok(Expr::Bool(false)),
        Token::Null => Ok(Expr::Null),
        Token::Top => Ok(Expr::Top),
        Token::Bottom => Ok(Expr::Bottom),
        Token::Ident(name) => Ok(Expr::Ident(name.clone())),
        Token::Str(parts) => match parts.as_slice() {
            [StrToken::Lit(text)] => Ok(Expr::String(text.clone())),
            _ => Ok(Expr::Interpolation(convert_str_parts(parts, cursor)?)),
        },
        Token::ParenOpen => {
            let expr = parse_expr(cursor)?;
            cursor.expect_token(&Token::ParenClose)?;
            Ok(expr)
        }
        Token::BraceOpen => {
            let decls = parse_decls(cursor, Some(&Token::BraceClose))?;
            cursor.expect_token(&Token::BraceClose)?;
            Ok(Expr::Struct(decls))
        }
        Token::BracketOpen => parse_list(cursor),
        other => Err(SyntaxError::new(
            offset,
            format!("expected expression, got {}", describe(Some(other))),
        )),
    }
}

fn parse_list(cursor: &mut TokenCursor<'_>) -> ParseResult<Expr> {
    let mut elems = Vec::new();

    loop {
        if cursor.eat(&Token::BracketClose) {
            break;
        }
        if cursor.peek() == Some(&Token::Ellipsis) {
            return Err(cursor.error("open lists are not supported"));
        }
        if is_comprehension_start(cursor) {
            elems.push(ListElem::Comprehension(parse_comprehension(cursor)?));
        } else {
            elems.push(ListElem::Expr(parse_expr(cursor)?));
        }

        if cursor.eat(&Token::Comma) || cursor.at_newline() {
            continue;
        }
        if cursor.peek() != Some(&Token::BracketClose) {
            return Err(cursor.error(format!(
                "expected ',' or ']' in list, got {}",
                describe(cursor.peek())
            )));
        }
    }

    Ok(Expr::List(elems))
}

fn convert_str_parts(parts: &[StrToken], cursor: &TokenCursor<'_>) -> ParseResult<Vec<StrPart>> {
    parts
        .iter()
        .map(|part| match part {
            StrToken::Lit(text) => Ok(StrPart::Lit(text.clone())),
            StrToken::Interp(tokens) => {
                let end = tokens.last().map_or(cursor.end, |t| t.offset + 1);
                let mut sub = cursor.interpolation(tokens, end);
                let expr = parse_expr(&mut sub)?;
                if !sub.at_end() {
                    return Err(sub.error(format!(
                        "unexpected {} in interpolation",
                        describe(sub.peek())
                    )));
                }
                Ok(StrPart::Expr(expr))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> SourceFile {
        parse_source("test.cue", input).expect("should parse")
    }

    fn field(decl: &Decl) -> &Field {
        match decl {
            Decl::Field(f) => f,
            other => panic!("expected field, got {other:?}"),
        }
    }

    #[test]
    fn parse_empty_input() {
        let file = parse("");
        assert!(file.package.is_none());
        assert!(file.decls.is_empty());
    }

    #[test]
    fn parse_package_clause() {
        let file = parse("package main\n\nvalues: {}");
        assert_eq!(file.package.as_deref(), Some("main"));
        assert_eq!(file.decls.len(), 1);
    }

    #[test]
    fn parse_field_named_package_is_not_a_clause() {
        let file = parse("package: \"x\"");
        assert!(file.package.is_none());
        assert_eq!(field(&file.decls[0]).label, Label::Ident("package".into()));
    }

    #[test]
    fn parse_nested_shorthand() {
        let file = parse("a: b: c: 1");
        let a = field(&file.decls[0]);
        let Expr::Struct(inner) = &a.value else {
            panic!("expected struct");
        };
        let b = field(&inner[0]);
        assert_eq!(b.label, Label::Ident("b".into()));
    }

    #[test]
    fn parse_pattern_shorthand_and_embedded_list() {
        let file = parse("instances: [string]: #Instance
ports: {[80, 443]}");
        let Expr::Struct(inner) = &field(&file.decls[0]).value else {
            panic!("expected struct");
        };
        assert!(matches!(&inner[0], Decl::Pattern { .. }));
        let Expr::Struct(ports) = &field(&file.decls[1]).value else {
            panic!("expected struct");
        };
        assert!(matches!(&ports[0], Decl::Embed(Expr::List(_))));
    }

    #[test]
    fn parse_optional_and_quoted_labels() {
        let file = parse("digest?: string\n\"my-app\": {}");
        let digest = field(&file.decls[0]);
        assert!(digest.optional);
        assert_eq!(field(&file.decls[1]).label, Label::Quoted("my-app".into()));
    }

    #[test]
    fn parse_default_disjunction() {
        let file = parse(r#"url: *"tcp://example.internal" | string"#);
        let Expr::Disjunction(terms) = &field(&file.decls[0]).value else {
            panic!("expected disjunction");
        };
        assert_eq!(terms.len(), 2);
        assert!(terms[0].1);
        assert!(!terms[1].1);
        assert_eq!(terms[1].0, Expr::Ident("string".into()));
    }

    #[test]
    fn parse_precedence_unify_binds_tighter_than_disjunction() {
        let file = parse("a: int & >0 | string");
        let Expr::Disjunction(terms) = &field(&file.decls[0]).value else {
            panic!("expected disjunction");
        };
        assert!(matches!(terms[0].0, Expr::Unify(..)));
    }

    #[test]
    fn parse_pattern_after_newline_is_not_index() {
        let file = parse("a: x\n[string]: int");
        assert_eq!(file.decls.len(), 2);
        assert!(matches!(file.decls[1], Decl::Pattern { .. }));
    }

    #[test]
    fn parse_selector_and_index() {
        let file = parse(r#"a: values.server["url"]"#);
        let Expr::Index(base, index) = &field(&file.decls[0]).value else {
            panic!("expected index");
        };
        assert_eq!(**index, Expr::String("url".into()));
        assert!(matches!(**base, Expr::Selector(_, ref f) if f == "server"));
    }

    #[test]
    fn parse_comprehensions() {
        let file = parse(
            r#"objects: {
    if values.server.enabled {
        server: {}
    }
    for k, v in values.extra {
        "\(k)": v
    }
}"#,
        );
        let Expr::Struct(body) = &field(&file.decls[0]).value else {
            panic!("expected struct");
        };
        assert_eq!(body.len(), 2);
        let Decl::Comprehension(second) = &body[1] else {
            panic!("expected comprehension");
        };
        assert!(matches!(
            &second.clauses[0],
            Clause::For { key: Some(k), value, .. } if k == "k" && value == "v"
        ));
        assert!(matches!(
            field(&second.body[0]).label,
            Label::Interpolated(_)
        ));
    }

    #[test]
    fn parse_list_with_comprehension() {
        let file = parse("a: [1, 2, for x in xs { x }]");
        let Expr::List(elems) = &field(&file.decls[0]).value else {
            panic!("expected list");
        };
        assert_eq!(elems.len(), 3);
        assert!(matches!(elems[2], ListElem::Comprehension(_)));
    }

    #[test]
    fn parse_json_document() {
        let file = parse(r#"{"a": [1, -2.5, true, null], "b": {"c": "d"}}"#);
        assert!(matches!(file.decls[0], Decl::Embed(Expr::Struct(_))));
    }

    #[test]
    fn parse_attributes_are_kept() {
        let file = parse("name: string @tessera(runtime:string:name) @go(Name)");
        let name = field(&file.decls[0]);
        assert_eq!(name.attributes.len(), 2);
        assert_eq!(name.attributes[0].body, "runtime:string:name");
    }

    #[test]
    fn parse_bounds_and_negative_literals() {
        let file = parse("replicas: >=1 & <=10\noffset: -3");
        assert!(matches!(
            field(&file.decls[0]).value,
            Expr::Unify(ref lhs, _) if matches!(**lhs, Expr::Unary(UnaryOp::Bound(BoundOp::Ge), _))
        ));
        assert_eq!(field(&file.decls[1]).value, Expr::Int(-3));
    }

    #[test]
    fn parse_error_reports_line_and_column() {
        let err = parse_source("bad.cue", "a: 1\nb: }").unwrap_err();
        match err {
            TesseraError::Parse { file, line, column, .. } => {
                assert_eq!(file, "bad.cue");
                assert_eq!(line, 2);
                assert_eq!(column, 4);
            }
            other => panic!("expected parse error, got {other}"),
        }
    }

    #[test]
    fn parse_error_missing_separator() {
        assert!(parse_source("bad.cue", "a: 1 b: 2").is_err());
    }

    #[test]
    fn parse_error_missing_brace() {
        assert!(parse_source("bad.cue", "a: {\n b: 1\n").is_err());
    }

    #[test]
    fn parse_expression_rejects_trailing_tokens() {
        assert!(parse_expression("1 + 2").is_ok());
        assert!(parse_expression("1 2").is_err());
    }

    #[test]
    fn parse_nesting_limit() {
        let shorthand = format!("{}1", "a: ".repeat(12));
        assert!(parse_source_nested("ok.cue", &shorthand, 12).is_ok());
        let err = parse_source_nested("deep.cue", &shorthand, 11).unwrap_err();
        assert!(
            matches!(&err, TesseraError::Parse { message, .. } if message.contains("nesting deeper than 11")),
            "got: {err}"
        );

        let structs = format!("a: {}1{}", "[".repeat(500), "]".repeat(500));
        assert!(parse_source_nested("deep.cue", &structs, 32).is_err());
        let negations = format!("a: {}true", "!".repeat(500));
        assert!(parse_source_nested("deep.cue", &negations, 32).is_err());
    }
}
