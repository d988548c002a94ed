//! Static analysis and validation of the parsed AST.
//!
//! Rejects constructs the evaluator does not support before any value is
//! built, so evaluation never sees them.

use tessera_common::error::{Result, TesseraError};

use super::ast::{Clause, Comprehension, Decl, Expr, ListElem, SourceFile, StrPart};

/// Validates a parsed source file for structural correctness.
///
/// # Checks performed
///
/// 1. No `import` declarations.
/// 2. `...` only appears as the last declaration of a struct.
/// 3. `for k, v` clauses bind two distinct names.
///
/// # Errors
///
/// Returns an error naming the file if any check fails.
pub fn validate(file: &SourceFile) -> Result<()> {
    tracing::debug!(file = %file.name, "validating source file");
    check_no_imports(file)
        .and_then(|()| check_decls(&file.decls))
        .map_err(|e| e.in_file(&file.name))
}

fn check_no_imports(file: &SourceFile) -> Result<()> {
    match file.imports.first() {
        Some(path) => Err(TesseraError::Config {
            message: format!("imports are not supported (import \"{path}\")"),
        }),
        None => Ok(()),
    }
}

fn check_decls(decls: &[Decl]) -> Result<()> {
    for (idx, decl) in decls.iter().enumerate() {
        match decl {
            Decl::Ellipsis if idx + 1 != decls.len() => {
                return Err(TesseraError::Config {
                    message: "'...' must be the last declaration of a struct".into(),
                });
            }
            Decl::Ellipsis => {}
            Decl::Field(field) => check_expr(&field.value)?,
            Decl::Pattern { label, value } => {
                check_expr(label)?;
                check_expr(value)?;
            }
            Decl::Comprehension(comp) => check_comprehension(comp)?,
            Decl::Embed(expr) => check_expr(expr)?,
        }
    }
    Ok(())
}

fn check_comprehension(comp: &Comprehension) -> Result<()> {
    for clause in &comp.clauses {
        match clause {
            Clause::For { key, value, source } => {
                if key.as_deref() == Some(value.as_str()) {
                    return Err(TesseraError::Config {
                        message: format!("for clause binds \"{value}\" twice"),
                    });
                }
                check_expr(source)?;
            }
            Clause::If(cond) => check_expr(cond)?,
        }
    }
    check_decls(&comp.body)
}

fn check_expr(expr: &Expr) -> Result<()> {
    match expr {
        Expr::Struct(decls) => check_decls(decls),
        Expr::List(elems) => elems.iter().try_for_each(|elem| match elem {
            ListElem::Expr(e) => check_expr(e),
            ListElem::Comprehension(c) => check_comprehension(c),
        }),
        Expr::Interpolation(parts) => parts.iter().try_for_each(|part| match part {
            StrPart::Expr(e) => check_expr(e),
            StrPart::Lit(_) => Ok(()),
        }),
        Expr::Selector(base, _) | Expr::Unary(_, base) => check_expr(base),
        Expr::Index(a, b) | Expr::Binary(_, a, b) | Expr::Unify(a, b) => {
            check_expr(a)?;
            check_expr(b)
        }
        Expr::Disjunction(terms) => terms.iter().try_for_each(|(e, _)| check_expr(e)),
        Expr::Top
        | Expr::Bottom
        | Expr::Null
        | Expr::Bool(_)
        | Expr::Int(_)
        | Expr::Float(_)
        | Expr::String(_)
        | Expr::Ident(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::parse_source;

    #[test]
    fn validate_accepts_plain_file() {
        assert!(parse_source("ok.cue", "a: {b: 1, ...}").is_ok());
    }

    #[test]
    fn validate_rejects_imports() {
        let err = parse_source("imp.cue", "import \"strings\"\na: 1").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("imports are not supported"), "got: {msg}");
        assert!(msg.starts_with("imp.cue"), "got: {msg}");
    }

    #[test]
    fn validate_rejects_ellipsis_before_fields() {
        let err = parse_source("open.cue", "a: {..., b: 1}").unwrap_err();
        assert!(err.to_string().contains("must be the last"));
    }

    #[test]
    fn validate_rejects_duplicate_for_bindings() {
        let err = parse_source("for.cue", "a: {for x, x in y {}}").unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    #[test]
    fn validate_walks_nested_comprehensions() {
        let src = "a: [for k, v in y { if true { b: {..., c: 1} } }]";
        assert!(parse_source("nested.cue", src).is_err());
    }
}
