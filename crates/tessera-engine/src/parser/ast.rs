//! Abstract Syntax Tree for configuration source files.

/// Root node of a parsed source file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceFile {
    /// File name, used in error messages.
    pub name: String,
    /// Package clause, if any.
    pub package: Option<String>,
    /// Import paths (rejected by the validator).
    pub imports: Vec<String>,
    /// Top-level declarations.
    pub decls: Vec<Decl>,
}

/// A declaration inside a struct body or at file level.
#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    /// `label: value`
    Field(Field),
    /// `[label]: value`, constraining every field whose label matches.
    Pattern {
        /// Expression the label must unify with.
        label: Expr,
        /// Constraint applied to matching fields.
        value: Expr,
    },
    /// `if`/`for` clauses producing declarations.
    Comprehension(Comprehension),
    /// An expression unified into the enclosing struct.
    Embed(Expr),
    /// `...`, leaving the enclosing struct open.
    Ellipsis,
}

/// A field declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Field label.
    pub label: Label,
    /// Whether the field was declared optional (`label?:`).
    pub optional: bool,
    /// Field value.
    pub value: Expr,
    /// Attributes attached after the value.
    pub attributes: Vec<Attribute>,
}

/// A field label.
#[derive(Debug, Clone, PartialEq)]
pub enum Label {
    /// An identifier; only these are visible to references.
    Ident(String),
    /// A quoted string.
    Quoted(String),
    /// An interpolated string, computed during evaluation.
    Interpolated(Vec<StrPart>),
}

impl Label {
    /// Returns the identifier when the label can be referenced.
    #[must_use]
    pub fn ident(&self) -> Option<&str> {
        match self {
            Self::Ident(name) => Some(name),
            _ => None,
        }
    }
}

/// An attribute `@name(body)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute name.
    pub name: String,
    /// Raw attribute body.
    pub body: String,
}

/// A comprehension: clauses followed by a struct body.
#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    /// `for` and `if` clauses, applied left to right.
    pub clauses: Vec<Clause>,
    /// Declarations produced for every iteration that passes all clauses.
    pub body: Vec<Decl>,
}

/// A comprehension clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// `for key, value in source`
    For {
        /// Optional key binding.
        key: Option<String>,
        /// Value binding.
        value: String,
        /// Struct or list to iterate.
        source: Expr,
    },
    /// `if condition`
    If(Expr),
}

/// A segment of an interpolated string.
#[derive(Debug, Clone, PartialEq)]
pub enum StrPart {
    /// Literal text.
    Lit(String),
    /// Interpolated expression.
    Expr(Expr),
}

/// A list element.
#[derive(Debug, Clone, PartialEq)]
pub enum ListElem {
    /// A plain element.
    Expr(Expr),
    /// A comprehension yielding zero or more elements.
    Comprehension(Comprehension),
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `!x`
    Not,
    /// A bound such as `>=x`.
    Bound(BoundOp),
}

/// Bound operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoundOp {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `!=`
    Ne,
    /// `=~`
    Match,
    /// `!~`
    NotMatch,
}

impl BoundOp {
    /// Returns the operator's source text.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Ne => "!=",
            Self::Match => "=~",
            Self::NotMatch => "!~",
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `=~`
    Match,
    /// `!~`
    NotMatch,
    /// `&&`
    And,
    /// `||`
    Or,
}

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `_`
    Top,
    /// `_|_`
    Bottom,
    /// `null`
    Null,
    /// `true` / `false`
    Bool(bool),
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// String literal without interpolation.
    String(String),
    /// Interpolated string.
    Interpolation(Vec<StrPart>),
    /// Identifier reference.
    Ident(String),
    /// `base.field`
    Selector(Box<Expr>, String),
    /// `base[index]`
    Index(Box<Expr>, Box<Expr>),
    /// Struct literal.
    Struct(Vec<Decl>),
    /// List literal.
    List(Vec<ListElem>),
    /// Unary expression.
    Unary(UnaryOp, Box<Expr>),
    /// Binary expression.
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `a & b`
    Unify(Box<Expr>, Box<Expr>),
    /// `a | *b | c`, each term flagged as default or not.
    Disjunction(Vec<(Expr, bool)>),
}

impl Expr {
    /// Returns `true` for expressions that name another value.
    #[must_use]
    pub const fn is_reference(&self) -> bool {
        matches!(self, Self::Ident(_) | Self::Selector(..) | Self::Index(..))
    }
}
