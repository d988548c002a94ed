//! Path selectors such as `bundle.instances."my-app".values[0]`.
//!
//! A [`Selector`] is parsed once and evaluated over any tree implementing
//! [`Navigable`], so the same path works on engine values and on plain
//! `serde_json` documents.

use std::fmt;
use std::str::FromStr;

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, take_while, take_while1},
    character::complete::{char, digit1},
    combinator::{all_consuming, map, map_res, opt, recognize, value},
    multi::many0,
    sequence::{delimited, preceded},
};
use tessera_common::error::{Result, TesseraError};

/// One step of a selector path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// A struct field.
    Field(String),
    /// A list element.
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) if is_identifier(name) => f.write_str(name),
            Self::Field(name) => write!(f, "{}", quote(name)),
            Self::Index(idx) => write!(f, "[{idx}]"),
        }
    }
}

/// A parsed path into a value tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Selector {
    segments: Vec<Segment>,
}

impl Selector {
    /// The empty selector, addressing the root.
    #[must_use]
    pub const fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Parses a selector from its textual form.
    ///
    /// # Errors
    ///
    /// Returns [`TesseraError::Config`] if the text is not a valid path.
    pub fn parse(input: &str) -> Result<Self> {
        if input.is_empty() {
            return Ok(Self::root());
        }
        all_consuming(path)
            .parse(input)
            .map(|(_, segments)| Self { segments })
            .map_err(|_| TesseraError::Config {
                message: format!("invalid selector \"{input}\""),
            })
    }

    /// Returns a new selector with a field appended.
    #[must_use]
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.segments.push(Segment::Field(name.into()));
        next
    }

    /// Returns a new selector with a list index appended.
    #[must_use]
    pub fn index(&self, idx: usize) -> Self {
        let mut next = self.clone();
        next.segments.push(Segment::Index(idx));
        next
    }

    /// Returns a new selector with all segments of `other` appended.
    #[must_use]
    pub fn join(&self, other: &Self) -> Self {
        let mut next = self.clone();
        next.segments.extend(other.segments.iter().cloned());
        next
    }

    /// The selector's segments, outermost first.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether this selector addresses the root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Walks `root` along this selector.
    ///
    /// # Errors
    ///
    /// Returns [`TesseraError::Lookup`] naming this selector if any segment
    /// is missing.
    pub fn select<'t, T: Navigable>(&self, root: &'t T) -> Result<&'t T> {
        let mut current = root;
        for (depth, segment) in self.segments.iter().enumerate() {
            let next = match segment {
                Segment::Field(name) => current.child(name),
                Segment::Index(idx) => current.element(*idx),
            };
            current = next.ok_or_else(|| TesseraError::Lookup {
                path: self.to_string(),
                message: if depth == 0 {
                    format!("field {segment} not found")
                } else {
                    let parent = Self {
                        segments: self.segments[..depth].to_vec(),
                    };
                    format!("field {segment} not found in {parent}")
                },
            })?;
        }
        Ok(current)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, segment) in self.segments.iter().enumerate() {
            if idx > 0 && matches!(segment, Segment::Field(_)) {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for Selector {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A tree that selectors can walk.
pub trait Navigable {
    /// Returns the struct field `name`, if present.
    fn child(&self, name: &str) -> Option<&Self>;

    /// Returns the list element at `idx`, if present.
    fn element(&self, idx: usize) -> Option<&Self>;
}

impl Navigable for serde_json::Value {
    fn child(&self, name: &str) -> Option<&Self> {
        self.as_object().and_then(|map| map.get(name))
    }

    fn element(&self, idx: usize) -> Option<&Self> {
        self.as_array().and_then(|items| items.get(idx))
    }
}

fn is_identifier(name: &str) -> bool {
    let body = name.trim_start_matches(['#', '_']);
    body.starts_with(|c: char| c.is_ascii_alphabetic() || c == '$')
        && body.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn quote(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push('"');
    for c in name.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn identifier(input: &str) -> IResult<&str, String> {
    map(
        recognize((
            take_while(|c| c == '#' || c == '_'),
            take_while1(|c: char| c.is_ascii_alphabetic() || c == '$'),
            take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '$'),
        )),
        str::to_string,
    )
    .parse(input)
}

fn quoted(input: &str) -> IResult<&str, String> {
    let body = escaped_transform(
        is_not("\"\\"),
        '\\',
        alt((value("\"", tag("\"")), value("\\", tag("\\")))),
    );
    map(delimited(char('"'), opt(body), char('"')), Option::unwrap_or_default).parse(input)
}

fn field_name(input: &str) -> IResult<&str, String> {
    alt((identifier, quoted)).parse(input)
}

fn bracket(input: &str) -> IResult<&str, Segment> {
    delimited(
        char('['),
        alt((
            map_res(digit1, |d: &str| d.parse().map(Segment::Index)),
            map(quoted, Segment::Field),
        )),
        char(']'),
    )
    .parse(input)
}

fn path(input: &str) -> IResult<&str, Vec<Segment>> {
    let (input, first) = alt((map(field_name, Segment::Field), bracket)).parse(input)?;
    let (input, rest) = many0(alt((
        preceded(char('.'), map(field_name, Segment::Field)),
        bracket,
    )))
    .parse(input)?;

    let mut segments = Vec::with_capacity(rest.len() + 1);
    segments.push(first);
    segments.extend(rest);
    Ok((input, segments))
}
