//! Evaluated value trees and their unification.
//!
//! A [`Value`] is the result of evaluating declarative sources. Values form a
//! lattice: [`Value::Top`] admits everything, kind constraints and bounds
//! narrow it, and concrete scalars, structs and lists sit at the bottom.
//! [`Value::unify`] computes the meet of two values or reports the path at
//! which they conflict.

use std::cmp::Ordering;
use std::fmt;

use tessera_common::error::{Result, TesseraError};

use crate::parser::ast::BoundOp;
use crate::selector::{Navigable, Segment, Selector};

/// A set of value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Kinds(u8);

impl Kinds {
    /// `null`
    pub const NULL: Self = Self(1);
    /// `bool`
    pub const BOOL: Self = Self(1 << 1);
    /// `int`
    pub const INT: Self = Self(1 << 2);
    /// `float`
    pub const FLOAT: Self = Self(1 << 3);
    /// `string`
    pub const STRING: Self = Self(1 << 4);
    /// Structs.
    pub const STRUCT: Self = Self(1 << 5);
    /// Lists.
    pub const LIST: Self = Self(1 << 6);
    /// `number`, either an int or a float.
    pub const NUMBER: Self = Self(Self::INT.0 | Self::FLOAT.0);
    /// Every kind.
    pub const ALL: Self = Self(0x7f);

    /// Returns the kinds present in both sets.
    #[must_use]
    pub const fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Whether every kind of `other` is in this set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether the set is empty.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Kinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Kinds, &str); 7] = [
            (Kinds::NULL, "null"),
            (Kinds::BOOL, "bool"),
            (Kinds::INT, "int"),
            (Kinds::FLOAT, "float"),
            (Kinds::STRING, "string"),
            (Kinds::STRUCT, "struct"),
            (Kinds::LIST, "list"),
        ];
        if *self == Self::ALL {
            return f.write_str("_");
        }
        if *self == Self::NUMBER {
            return f.write_str("number");
        }
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(kind, _)| self.contains(*kind))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join(" | "))
    }
}

/// A bound such as `>=1` or `=~"^oci://"`.
#[derive(Debug, Clone, PartialEq)]
pub struct Bound {
    /// Comparison operator.
    pub op: BoundOp,
    /// Concrete scalar the operator compares against.
    pub operand: Value,
}

impl Bound {
    /// Checks whether `value` satisfies the bound.
    fn admits(&self, value: &Value, path: &Selector) -> Result<bool> {
        match self.op {
            BoundOp::Ne => Ok(!scalar_equal(value, &self.operand)),
            BoundOp::Lt | BoundOp::Le | BoundOp::Gt | BoundOp::Ge => {
                let Some(ord) = compare(value, &self.operand) else {
                    return Ok(false);
                };
                Ok(match self.op {
                    BoundOp::Lt => ord == Ordering::Less,
                    BoundOp::Le => ord != Ordering::Greater,
                    BoundOp::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                })
            }
            BoundOp::Match | BoundOp::NotMatch => {
                let (Value::String(text), Value::String(pattern)) = (value, &self.operand) else {
                    return Ok(false);
                };
                let matched = regex_match(pattern, text, path)?;
                Ok(matched == (self.op == BoundOp::Match))
            }
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.symbol(), self.operand)
    }
}

/// A non-concrete scalar constraint: a kind set narrowed by bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    /// Kinds the value may take.
    pub kinds: Kinds,
    /// Bounds every value must satisfy.
    pub bounds: Vec<Bound>,
}

impl Constraint {
    /// Meet of two constraints, or `None` if no kind survives.
    fn intersect(&self, other: &Self) -> Option<Self> {
        let kinds = self.kinds.intersect(other.kinds);
        if kinds.is_empty() {
            return None;
        }
        let mut bounds = self.bounds.clone();
        for bound in &other.bounds {
            if !bounds.contains(bound) {
                bounds.push(bound.clone());
            }
        }
        Some(Self { kinds, bounds })
    }

    fn admit(&self, value: &Value, path: &Selector) -> Result<()> {
        let Some(kind) = value.kind() else {
            return Err(conflict(path, value, &Value::Constraint(self.clone())));
        };
        if !self.kinds.contains(kind) {
            return Err(TesseraError::Conflict {
                path: path.to_string(),
                message: format!(
                    "conflicting values {value} and {self} (mismatched types {kind} and {})",
                    self.kinds
                ),
            });
        }
        for bound in &self.bounds {
            if !bound.admits(value, path)? {
                return Err(TesseraError::Conflict {
                    path: path.to_string(),
                    message: format!("invalid value {value} (out of bound {bound})"),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::with_capacity(self.bounds.len() + 1);
        if self.bounds.is_empty() || self.kinds != Self::implied_kinds(&self.bounds) {
            parts.push(self.kinds.to_string());
        }
        parts.extend(self.bounds.iter().map(ToString::to_string));
        f.write_str(&parts.join(" & "))
    }
}

impl Constraint {
    fn implied_kinds(bounds: &[Bound]) -> Kinds {
        bounds
            .iter()
            .fold(Kinds::ALL, |acc, b| acc.intersect(bound_kinds(b.op, &b.operand)))
    }
}

/// How a struct field was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// A regular field, exported and validated.
    Regular,
    /// `label?:`, present only as a constraint.
    Optional,
    /// `#Label`, a definition.
    Definition,
    /// `_label`, a hidden field.
    Hidden,
}

impl FieldKind {
    /// Classifies a field from its label and optional marker.
    #[must_use]
    pub fn classify(label: &str, optional: bool) -> Self {
        if label.starts_with('#') || label.starts_with("_#") {
            Self::Definition
        } else if label.starts_with('_') {
            Self::Hidden
        } else if optional {
            Self::Optional
        } else {
            Self::Regular
        }
    }

    /// Whether closedness and pattern constraints apply to the field.
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(self, Self::Regular | Self::Optional)
    }

    pub(crate) const fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Optional, Self::Regular) | (Self::Regular, _) => Self::Regular,
            (kind, _) => kind,
        }
    }
}

/// A struct field.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// The field's value.
    pub value: Value,
    /// How the field was declared.
    pub kind: FieldKind,
}

/// A pattern constraint `[label]: value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    /// Value every matching label must unify with.
    pub label: Value,
    /// Constraint applied to matching fields.
    pub value: Value,
}

impl Pattern {
    /// Whether `label` matches this pattern.
    #[must_use]
    pub fn matches(&self, label: &str) -> bool {
        Value::String(label.to_string())
            .unify(&self.label, &Selector::root())
            .is_ok()
    }
}

/// An evaluated struct.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructValue {
    /// Fields in declaration order.
    pub fields: Vec<(String, Field)>,
    /// Whether fields not declared or matched by a pattern are rejected.
    pub closed: bool,
    /// Pattern constraints for fields added later.
    pub patterns: Vec<Pattern>,
    /// Reasons comprehensions could not be evaluated yet.
    pub pending: Vec<String>,
}

impl StructValue {
    /// Returns the field named `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    /// Iterates regular fields in order.
    pub fn regular(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields
            .iter()
            .filter(|(_, f)| f.kind == FieldKind::Regular)
            .map(|(n, f)| (n.as_str(), &f.value))
    }

    /// Admits a field coming from the other side of a unification.
    fn admit_field(&self, name: &str, field: &Field, path: &Selector) -> Result<Field> {
        if !field.kind.is_data() {
            return Ok(field.clone());
        }
        let child = path.child(name);
        let matching: Vec<&Pattern> = self.patterns.iter().filter(|p| p.matches(name)).collect();
        if self.closed && matching.is_empty() {
            return Err(TesseraError::Conflict {
                path: child.to_string(),
                message: "field not allowed".into(),
            });
        }
        let mut value = field.value.clone();
        for pattern in matching {
            value = value.unify(&pattern.value, &child)?;
        }
        Ok(Field {
            value,
            kind: field.kind,
        })
    }
}

/// One term of a disjunction.
#[derive(Debug, Clone, PartialEq)]
pub struct Disjunct {
    /// The term's value.
    pub value: Value,
    /// Whether the term is marked as a default with `*`.
    pub default: bool,
}

/// An evaluated value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `_`: any value.
    Top,
    /// `null`
    Null,
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A floating point number.
    Float(f64),
    /// A string.
    String(String),
    /// A kind constraint, possibly with bounds.
    Constraint(Constraint),
    /// A struct.
    Struct(StructValue),
    /// A list.
    List(Vec<Value>),
    /// A disjunction of at least two distinct terms.
    Disjunction(Vec<Disjunct>),
    /// A value that cannot be computed until its operands are concrete.
    Incomplete(String),
}

fn conflict(path: &Selector, a: &Value, b: &Value) -> TesseraError {
    TesseraError::Conflict {
        path: path.to_string(),
        message: format!("conflicting values {a} and {b}"),
    }
}

/// Kinds a bound can apply to.
pub(crate) fn bound_kinds(op: BoundOp, operand: &Value) -> Kinds {
    match op {
        BoundOp::Ne => Kinds::ALL,
        BoundOp::Match | BoundOp::NotMatch => Kinds::STRING,
        _ => match operand {
            Value::String(_) => Kinds::STRING,
            _ => Kinds::NUMBER,
        },
    }
}

/// Orders two numbers or two strings.
pub(crate) fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => a.as_float().zip(b.as_float()).and_then(|(x, y)| x.partial_cmp(&y)),
    }
}

/// Equality with ints and floats compared numerically.
pub(crate) fn scalar_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(_), Value::Float(_)) | (Value::Float(_), Value::Int(_)) => {
            compare(a, b) == Some(Ordering::Equal)
        }
        _ => a == b,
    }
}

pub(crate) fn regex_match(pattern: &str, text: &str, path: &Selector) -> Result<bool> {
    let re = regex::Regex::new(pattern).map_err(|e| TesseraError::Conflict {
        path: path.to_string(),
        message: format!("invalid regular expression {pattern:?}: {e}"),
    })?;
    Ok(re.is_match(text))
}

impl Value {
    /// A constraint admitting exactly the given kinds.
    #[must_use]
    pub const fn kind_constraint(kinds: Kinds) -> Self {
        Self::Constraint(Constraint {
            kinds,
            bounds: Vec::new(),
        })
    }

    /// A constraint holding a single bound.
    #[must_use]
    pub fn bound(op: BoundOp, operand: Self) -> Self {
        Self::Constraint(Constraint {
            kinds: bound_kinds(op, &operand),
            bounds: vec![Bound { op, operand }],
        })
    }

    /// Builds a disjunction, flattening nested terms and merging duplicates.
    ///
    /// A single surviving term collapses to its value.
    #[must_use]
    pub fn disjunction(terms: Vec<Disjunct>) -> Self {
        let mut flat: Vec<Disjunct> = Vec::with_capacity(terms.len());
        let mut push = |term: Disjunct| {
            if let Some(existing) = flat.iter_mut().find(|d| d.value == term.value) {
                existing.default |= term.default;
            } else {
                flat.push(term);
            }
        };
        for term in terms {
            if let Self::Disjunction(inner) = term.value {
                let inner_defaults = inner.iter().any(|d| d.default);
                for d in inner {
                    let default = term.default && (d.default || !inner_defaults);
                    push(Disjunct {
                        value: d.value,
                        default,
                    });
                }
            } else {
                push(term);
            }
        }

        match flat.len() {
            0 => Self::Incomplete("empty disjunction".into()),
            1 => flat.remove(0).value,
            _ => Self::Disjunction(flat),
        }
    }

    /// The kind of a concrete value.
    #[must_use]
    pub const fn kind(&self) -> Option<Kinds> {
        match self {
            Self::Null => Some(Kinds::NULL),
            Self::Bool(_) => Some(Kinds::BOOL),
            Self::Int(_) => Some(Kinds::INT),
            Self::Float(_) => Some(Kinds::FLOAT),
            Self::String(_) => Some(Kinds::STRING),
            Self::Struct(_) => Some(Kinds::STRUCT),
            Self::List(_) => Some(Kinds::LIST),
            Self::Top | Self::Constraint(_) | Self::Disjunction(_) | Self::Incomplete(_) => None,
        }
    }

    /// The default of a disjunction, or the value itself.
    ///
    /// Returns `None` for a disjunction without exactly one default.
    #[must_use]
    pub fn default_value(&self) -> Option<&Self> {
        match self {
            Self::Disjunction(terms) => {
                let mut defaults = terms.iter().filter(|d| d.default);
                match (defaults.next(), defaults.next()) {
                    (Some(only), None) => Some(&only.value),
                    _ => None,
                }
            }
            other => Some(other),
        }
    }

    /// The value with its disjunction default applied, when there is one.
    #[must_use]
    pub fn resolved(&self) -> &Self {
        self.default_value().unwrap_or(self)
    }

    /// Unifies two values.
    ///
    /// `path` locates `self` in the enclosing tree and prefixes conflict paths.
    ///
    /// # Errors
    ///
    /// Returns [`TesseraError::Conflict`] naming the deepest conflicting path.
    pub fn unify(&self, other: &Self, path: &Selector) -> Result<Self> {
        match (self, other) {
            (Self::Incomplete(_), _) => Ok(self.clone()),
            (_, Self::Incomplete(_)) => Ok(other.clone()),
            (Self::Top, v) | (v, Self::Top) => Ok(v.clone()),
            (Self::Disjunction(_), _) | (_, Self::Disjunction(_)) => {
                unify_disjunctions(self, other, path)
            }
            (Self::Constraint(a), Self::Constraint(b)) => a
                .intersect(b)
                .map(Self::Constraint)
                .ok_or_else(|| conflict(path, self, other)),
            (Self::Constraint(c), v) | (v, Self::Constraint(c)) => {
                c.admit(v, path)?;
                Ok(v.clone())
            }
            (Self::Struct(a), Self::Struct(b)) => unify_structs(a, b, path).map(Self::Struct),
            (Self::List(a), Self::List(b)) => {
                if a.len() != b.len() {
                    return Err(TesseraError::Conflict {
                        path: path.to_string(),
                        message: format!(
                            "incompatible list lengths ({} and {})",
                            a.len(),
                            b.len()
                        ),
                    });
                }
                a.iter()
                    .zip(b)
                    .enumerate()
                    .map(|(idx, (x, y))| x.unify(y, &path.index(idx)))
                    .collect::<Result<Vec<_>>>()
                    .map(Self::List)
            }
            (a, b) if a == b => Ok(a.clone()),
            _ => Err(conflict(path, self, other)),
        }
    }

    /// Checks the value for errors and, if `concrete`, for unresolved fields.
    ///
    /// Only regular fields are inspected; definitions, hidden and optional
    /// fields never need to be concrete.
    ///
    /// # Errors
    ///
    /// Returns [`TesseraError::Validation`] for the first unresolved path.
    pub fn validate(&self, concrete: bool) -> Result<()> {
        self.validate_at(&Selector::root(), concrete)
    }

    fn validate_at(&self, path: &Selector, concrete: bool) -> Result<()> {
        let incomplete = |message: String| {
            if concrete {
                Err(TesseraError::Validation {
                    path: path.to_string(),
                    message,
                })
            } else {
                Ok(())
            }
        };
        match self {
            Self::Top | Self::Constraint(_) => incomplete(format!("incomplete value {self}")),
            Self::Incomplete(reason) => incomplete(reason.clone()),
            Self::Disjunction(_) => match self.default_value() {
                Some(value) => value.validate_at(path, concrete),
                None => incomplete(format!("unresolved disjunction {self}")),
            },
            Self::Struct(s) => {
                if let Some(reason) = s.pending.first() {
                    incomplete(reason.clone())?;
                }
                for (name, value) in s.regular() {
                    value.validate_at(&path.child(name), concrete)?;
                }
                Ok(())
            }
            Self::List(items) => items
                .iter()
                .enumerate()
                .try_for_each(|(idx, item)| item.validate_at(&path.index(idx), concrete)),
            Self::Null | Self::Bool(_) | Self::Int(_) | Self::Float(_) | Self::String(_) => Ok(()),
        }
    }

    /// Whether the value and all its regular fields are concrete.
    #[must_use]
    pub fn is_concrete(&self) -> bool {
        self.validate(true).is_ok()
    }

    /// Exports the value as JSON, resolving disjunction defaults.
    ///
    /// # Errors
    ///
    /// Returns [`TesseraError::Validation`] if any regular field is not concrete.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        self.export_at(&Selector::root())
    }

    fn export_at(&self, path: &Selector) -> Result<serde_json::Value> {
        match self.resolved() {
            Self::Null => Ok(serde_json::Value::Null),
            Self::Bool(b) => Ok(serde_json::Value::Bool(*b)),
            Self::Int(n) => Ok(serde_json::Value::from(*n)),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or_else(|| TesseraError::Validation {
                    path: path.to_string(),
                    message: format!("cannot export non-finite number {f}"),
                }),
            Self::String(s) => Ok(serde_json::Value::String(s.clone())),
            Self::List(items) => items
                .iter()
                .enumerate()
                .map(|(idx, item)| item.export_at(&path.index(idx)))
                .collect::<Result<Vec<_>>>()
                .map(serde_json::Value::Array),
            Self::Struct(s) => {
                if let Some(reason) = s.pending.first() {
                    return Err(TesseraError::Validation {
                        path: path.to_string(),
                        message: reason.clone(),
                    });
                }
                let mut map = serde_json::Map::new();
                for (name, value) in s.regular() {
                    let _ = map.insert(name.to_string(), value.export_at(&path.child(name))?);
                }
                Ok(serde_json::Value::Object(map))
            }
            other => {
                other.validate_at(path, true)?;
                Err(TesseraError::Validation {
                    path: path.to_string(),
                    message: format!("incomplete value {other}"),
                })
            }
        }
    }

    /// Converts a YAML document, keeping mapping order.
    ///
    /// # Errors
    ///
    /// Returns an error if a mapping key is not a string.
    pub fn from_yaml(doc: serde_yaml::Value) -> Result<Self> {
        Ok(match doc {
            serde_yaml::Value::Null => Self::Null,
            serde_yaml::Value::Bool(b) => Self::Bool(b),
            serde_yaml::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            serde_yaml::Value::String(s) => Self::String(s),
            serde_yaml::Value::Sequence(items) => Self::List(
                items
                    .into_iter()
                    .map(Self::from_yaml)
                    .collect::<Result<_>>()?,
            ),
            serde_yaml::Value::Mapping(map) => {
                let mut fields = Vec::with_capacity(map.len());
                for (key, value) in map {
                    let name = match key {
                        serde_yaml::Value::String(name) => name,
                        other => {
                            return Err(TesseraError::Config {
                                message: format!("mapping key {other:?} is not a string"),
                            });
                        }
                    };
                    fields.push((
                        name,
                        Field {
                            value: Self::from_yaml(value)?,
                            kind: FieldKind::Regular,
                        },
                    ));
                }
                Self::Struct(StructValue {
                    fields,
                    ..StructValue::default()
                })
            }
            serde_yaml::Value::Tagged(tagged) => Self::from_yaml(tagged.value)?,
        })
    }

    /// Looks up the value at `selector`.
    ///
    /// # Errors
    ///
    /// Returns [`TesseraError::Lookup`] if any segment is missing.
    pub fn lookup(&self, selector: &Selector) -> Result<&Self> {
        selector.select(self)
    }

    /// Regular fields of a struct value, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`TesseraError::Validation`] if the value is not a struct.
    pub fn fields(&self) -> Result<Vec<(&str, &Self)>> {
        match self.resolved() {
            Self::Struct(s) => Ok(s.regular().collect()),
            other => Err(TesseraError::Validation {
                path: String::new(),
                message: format!("expected struct, found {other}"),
            }),
        }
    }

    /// The string, if the value resolves to one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self.resolved() {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The boolean, if the value resolves to one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self.resolved() {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer, if the value resolves to one.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self.resolved() {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// The number as a float, if the value resolves to an int or float.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self.resolved() {
            Self::Int(n) => Some(*n as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }
}

fn disjuncts(value: &Value) -> (Vec<Disjunct>, bool) {
    match value {
        Value::Disjunction(terms) => (terms.clone(), terms.iter().any(|d| d.default)),
        other => (
            vec![Disjunct {
                value: other.clone(),
                default: false,
            }],
            false,
        ),
    }
}

fn unify_disjunctions(a: &Value, b: &Value, path: &Selector) -> Result<Value> {
    let (left, left_defaults) = disjuncts(a);
    let (right, right_defaults) = disjuncts(b);

    let mut terms = Vec::with_capacity(left.len() * right.len());
    let mut first_error = None;
    for x in &left {
        for y in &right {
            match x.value.unify(&y.value, path) {
                Ok(value) => terms.push(Disjunct {
                    value,
                    default: (x.default || !left_defaults) && (y.default || !right_defaults),
                }),
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
    }

    if terms.is_empty() {
        return Err(first_error.unwrap_or_else(|| conflict(path, a, b)));
    }
    Ok(Value::disjunction(terms))
}

fn unify_structs(a: &StructValue, b: &StructValue, path: &Selector) -> Result<StructValue> {
    let mut fields = Vec::with_capacity(a.fields.len() + b.fields.len());

    for (name, left) in &a.fields {
        let field = match b.get(name) {
            Some(right) => Field {
                value: left.value.unify(&right.value, &path.child(name))?,
                kind: left.kind.merge(right.kind),
            },
            None => b.admit_field(name, left, path)?,
        };
        fields.push((name.clone(), field));
    }
    for (name, right) in &b.fields {
        if a.get(name).is_none() {
            fields.push((name.clone(), a.admit_field(name, right, path)?));
        }
    }

    let mut patterns = a.patterns.clone();
    for pattern in &b.patterns {
        if !patterns.contains(pattern) {
            patterns.push(pattern.clone());
        }
    }
    let mut pending = a.pending.clone();
    pending.extend(b.pending.iter().cloned());

    Ok(StructValue {
        fields,
        closed: a.closed || b.closed,
        patterns,
        pending,
    })
}

impl From<serde_json::Value> for Value {
    fn from(doc: serde_json::Value) -> Self {
        match doc {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => Self::Struct(StructValue {
                fields: map
                    .into_iter()
                    .map(|(name, value)| {
                        (
                            name,
                            Field {
                                value: Self::from(value),
                                kind: FieldKind::Regular,
                            },
                        )
                    })
                    .collect(),
                ..StructValue::default()
            }),
        }
    }
}

impl Navigable for Value {
    fn child(&self, name: &str) -> Option<&Self> {
        match self.resolved() {
            Self::Struct(s) => s.get(name).map(|f| &f.value),
            _ => None,
        }
    }

    fn element(&self, idx: usize) -> Option<&Self> {
        match self.resolved() {
            Self::List(items) => items.get(idx),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Top => f.write_str("_"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Constraint(c) => write!(f, "{c}"),
            Self::Struct(s) => {
                f.write_str("{")?;
                for (idx, (name, field)) in s.fields.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    let marker = if field.kind == FieldKind::Optional { "?" } else { "" };
                    write!(f, "{}{marker}: {}", Segment::Field(name.clone()), field.value)?;
                }
                f.write_str("}")
            }
            Self::List(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Disjunction(terms) => {
                for (idx, term) in terms.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(" | ")?;
                    }
                    if term.default {
                        f.write_str("*")?;
                    }
                    write!(f, "{}", term.value)?;
                }
                Ok(())
            }
            Self::Incomplete(reason) => write!(f, "_|_ ({reason})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> Selector {
        Selector::root()
    }

    fn string() -> Value {
        Value::kind_constraint(Kinds::STRING)
    }

    fn strukt(fields: &[(&str, Value)]) -> Value {
        Value::Struct(StructValue {
            fields: fields
                .iter()
                .map(|(n, v)| {
                    (
                        (*n).to_string(),
                        Field {
                            value: v.clone(),
                            kind: FieldKind::Regular,
                        },
                    )
                })
                .collect(),
            ..StructValue::default()
        })
    }

    #[test]
    fn unify_equal_scalars() {
        let v = Value::Int(1).unify(&Value::Int(1), &root()).expect("should unify");
        assert_eq!(v, Value::Int(1));
    }

    #[test]
    fn unify_conflicting_scalars_names_path() {
        let err = Value::Bool(true)
            .unify(&Value::Bool(false), &root().child("client").child("enabled"))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "client.enabled: conflicting values true and false"
        );
    }

    #[test]
    fn unify_int_and_float_conflict() {
        assert!(Value::Int(1).unify(&Value::Float(1.0), &root()).is_err());
    }

    #[test]
    fn unify_kind_constraint_with_value() {
        let v = string()
            .unify(&Value::String("x".into()), &root())
            .expect("should unify");
        assert_eq!(v, Value::String("x".into()));
        let err = string().unify(&Value::Int(3), &root()).unwrap_err();
        assert!(err.to_string().contains("mismatched types"), "got: {err}");
    }

    #[test]
    fn unify_number_admits_int_and_float() {
        let number = Value::kind_constraint(Kinds::NUMBER);
        assert!(number.unify(&Value::Int(2), &root()).is_ok());
        assert!(number.unify(&Value::Float(2.5), &root()).is_ok());
        let int = number
            .unify(&Value::kind_constraint(Kinds::INT), &root())
            .expect("should unify");
        assert_eq!(int, Value::kind_constraint(Kinds::INT));
    }

    #[test]
    fn unify_bounds() {
        let range = Value::bound(BoundOp::Ge, Value::Int(1))
            .unify(&Value::bound(BoundOp::Le, Value::Int(10)), &root())
            .expect("should unify");
        assert!(range.unify(&Value::Int(5), &root()).is_ok());
        let err = range.unify(&Value::Int(11), &root()).unwrap_err();
        assert!(err.to_string().contains("out of bound <=10"), "got: {err}");
    }

    #[test]
    fn unify_regex_bound() {
        let url = Value::bound(BoundOp::Match, Value::String("^(oci|file)://".into()));
        assert!(url.unify(&Value::String("oci://x".into()), &root()).is_ok());
        assert!(url.unify(&Value::String("http://x".into()), &root()).is_err());
    }

    #[test]
    fn unify_disjunction_keeps_default() {
        let d = Value::disjunction(vec![
            Disjunct {
                value: Value::String("latest".into()),
                default: true,
            },
            Disjunct {
                value: string(),
                default: false,
            },
        ]);
        assert_eq!(d.resolved(), &Value::String("latest".into()));

        let pinned = d
            .unify(&Value::String("1.0.0".into()), &root())
            .expect("should unify");
        assert_eq!(pinned, Value::String("1.0.0".into()));
    }

    #[test]
    fn unify_disjunction_all_terms_fail() {
        let d = Value::disjunction(vec![
            Disjunct {
                value: Value::Int(1),
                default: false,
            },
            Disjunct {
                value: Value::Int(2),
                default: false,
            },
        ]);
        assert!(d.unify(&Value::Int(3), &root()).is_err());
    }

    #[test]
    fn unify_structs_merges_keys_in_order() {
        let a = strukt(&[("a", Value::Int(1)), ("b", string())]);
        let b = strukt(&[("b", Value::String("x".into())), ("c", Value::Null)]);
        let v = a.unify(&b, &root()).expect("should unify");
        let names: Vec<&str> = v.fields().expect("struct").iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(v.is_concrete());
    }

    #[test]
    fn unify_nested_conflict_names_full_path() {
        let a = strukt(&[("server", strukt(&[("port", Value::Int(80))]))]);
        let b = strukt(&[("server", strukt(&[("port", Value::Int(81))]))]);
        let err = a.unify(&b, &root().child("values")).unwrap_err();
        assert_eq!(err.field_path(), Some("values.server.port"));
    }

    #[test]
    fn closed_struct_rejects_unknown_fields() {
        let Value::Struct(mut closed) = strukt(&[("name", string())]) else {
            unreachable!()
        };
        closed.closed = true;
        let closed = Value::Struct(closed);
        let err = closed
            .unify(&strukt(&[("extra", Value::Int(1))]), &root().child("bundle"))
            .unwrap_err();
        assert_eq!(err.to_string(), "bundle.extra: field not allowed");
    }

    #[test]
    fn patterns_constrain_new_fields() {
        let Value::Struct(mut instances) = strukt(&[]) else {
            unreachable!()
        };
        instances.closed = true;
        instances.patterns.push(Pattern {
            label: string(),
            value: strukt(&[("namespace", string())]),
        });
        let v = Value::Struct(instances)
            .unify(
                &strukt(&[("app", strukt(&[("namespace", Value::Int(1))]))]),
                &root().child("instances"),
            )
            .unwrap_err();
        assert_eq!(v.field_path(), Some("instances.app.namespace"));
    }

    #[test]
    fn lists_unify_element_wise() {
        let a = Value::List(vec![Value::Int(1), Value::kind_constraint(Kinds::INT)]);
        let b = Value::List(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(a.unify(&b, &root()).expect("should unify"), b);
        let short = Value::List(vec![Value::Int(1)]);
        let err = a.unify(&short, &root()).unwrap_err();
        assert!(err.to_string().contains("incompatible list lengths"));
    }

    #[test]
    fn validate_reports_first_incomplete_path() {
        let v = strukt(&[
            ("name", Value::String("x".into())),
            ("namespace", string()),
        ]);
        assert!(v.validate(false).is_ok());
        let err = v.validate(true).unwrap_err();
        assert_eq!(err.field_path(), Some("namespace"));
        assert!(err.to_string().contains("incomplete value string"));
    }

    #[test]
    fn validate_skips_optional_and_definitions() {
        let v = Value::Struct(StructValue {
            fields: vec![
                (
                    "digest".into(),
                    Field {
                        value: string(),
                        kind: FieldKind::Optional,
                    },
                ),
                (
                    "#Schema".into(),
                    Field {
                        value: string(),
                        kind: FieldKind::Definition,
                    },
                ),
            ],
            ..StructValue::default()
        });
        assert!(v.is_concrete());
        assert_eq!(v.to_json().expect("should export"), serde_json::json!({}));
    }

    #[test]
    fn export_resolves_defaults() {
        let d = Value::disjunction(vec![
            Disjunct {
                value: Value::Bool(true),
                default: true,
            },
            Disjunct {
                value: Value::kind_constraint(Kinds::BOOL),
                default: false,
            },
        ]);
        let v = strukt(&[("enabled", d), ("ratio", Value::Float(0.5))]);
        assert_eq!(
            v.to_json().expect("should export"),
            serde_json::json!({"enabled": true, "ratio": 0.5})
        );
    }

    #[test]
    fn from_yaml_preserves_key_order() {
        let doc: serde_yaml::Value =
            serde_yaml::from_str("zeta: 1\nalpha: [true, null]\n").expect("valid yaml");
        let v = Value::from_yaml(doc).expect("should convert");
        let names: Vec<&str> = v.fields().expect("struct").iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn lookup_and_scalars() {
        let v = Value::from(serde_json::json!({
            "module": {"url": "oci://x", "replicas": 2, "ratio": 1.5, "on": true}
        }));
        let url = v
            .lookup(&Selector::parse("module.url").expect("selector"))
            .expect("should find");
        assert_eq!(url.as_str(), Some("oci://x"));
        let module = v.lookup(&Selector::parse("module").expect("selector")).expect("found");
        assert_eq!(module.child("replicas").and_then(Value::as_int), Some(2));
        assert_eq!(module.child("replicas").and_then(Value::as_float), Some(2.0));
        assert_eq!(module.child("on").and_then(Value::as_bool), Some(true));
        assert!(v.lookup(&Selector::parse("module.digest").expect("selector")).is_err());
    }

    #[test]
    fn display_is_readable() {
        let c = Value::kind_constraint(Kinds::INT)
            .unify(&Value::bound(BoundOp::Gt, Value::Int(0)), &root())
            .expect("should unify");
        assert_eq!(c.to_string(), "int & >0");
        assert_eq!(Value::bound(BoundOp::Ge, Value::Int(1)).to_string(), ">=1");
        assert_eq!(strukt(&[("a-b", Value::Int(1))]).to_string(), r#"{"a-b": 1}"#);
    }
}
