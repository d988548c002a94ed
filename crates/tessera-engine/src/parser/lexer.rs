//! Tokenization of configuration source text using `nom`.
//!
//! Produces a stream of [`Spanned`] tokens from raw input for the parser to
//! consume. Whitespace and `//` line comments are discarded between tokens,
//! but each token remembers whether a newline preceded it: newlines terminate
//! expressions, so `a: x` followed by `[string]: int` on the next line is a
//! field and a pattern, not an index expression.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, multispace1, not_line_ending, one_of},
    combinator::{map, opt, recognize, value},
    multi::many0,
    sequence::preceded,
};

use tessera_common::constants::MAX_EVAL_DEPTH;

use super::SyntaxError;

/// A token of the configuration language.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// An identifier, including keywords such as `if`, `for` and `package`.
    Ident(String),
    /// A double-quoted string literal, possibly interpolated.
    Str(Vec<StrToken>),
    /// An integer literal.
    Int(i64),
    /// A floating point literal.
    Float(f64),
    /// `true`.
    True,
    /// `false`.
    False,
    /// `null`.
    Null,
    /// `_`, the value admitting everything.
    Top,
    /// `_|_`, the value admitting nothing.
    Bottom,
    /// An attribute such as `@tessera(env:string:KEY)`.
    Attribute {
        /// Attribute name.
        name: String,
        /// Raw text between the parentheses.
        body: String,
    },
    /// `{`
    BraceOpen,
    /// `}`
    BraceClose,
    /// `[`
    BracketOpen,
    /// `]`
    BracketClose,
    /// `(`
    ParenOpen,
    /// `)`
    ParenClose,
    /// `:`
    Colon,
    /// `,`
    Comma,
    /// `.`
    Dot,
    /// `...`
    Ellipsis,
    /// `?`
    Question,
    /// `&`
    Amp,
    /// `|`
    Pipe,
    /// `*`
    Star,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `/`
    Slash,
    /// `!`
    Bang,
    /// `==`
    EqEq,
    /// `!=`
    NotEq,
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
    AndAnd,
    /// `||`
    OrOr,
}

/// A segment of a string literal.
#[derive(Debug, Clone, PartialEq)]
pub enum StrToken {
    /// Literal text with escapes already decoded.
    Lit(String),
    /// Tokens of an interpolated `\(...)` expression.
    Interp(Vec<Spanned>),
}

/// A token with its byte offset in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    /// The token.
    pub token: Token,
    /// Byte offset of the token's first character.
    pub offset: usize,
    /// Whether a newline appeared between the previous token and this one.
    pub newline_before: bool,
}

/// Skippable items: whitespace or line comments. Reports whether a newline was skipped.
fn skip_trivia(input: &str) -> IResult<&str, bool> {
    let comment = value(false, preceded(tag("//"), not_line_ending));
    let ws = map(multispace1, |s: &str| s.contains('\n'));
    let (input, seen) = many0(alt((ws, comment))).parse(input)?;
    Ok((input, seen.into_iter().any(|newline| newline)))
}

/// Parses an integer or floating point literal.
fn number(input: &str) -> IResult<&str, Token> {
    let (rest, text) = recognize((
        digit1,
        opt((char('.'), digit1)),
        opt((one_of("eE"), opt(one_of("+-")), digit1)),
    ))
    .parse(input)?;

    let token = if text.contains(['.', 'e', 'E']) {
        text.parse::<f64>().map(Token::Float).map_err(|_| {
            nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Float))
        })?
    } else {
        text.parse::<i64>().map(Token::Int).map_err(|_| {
            nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit))
        })?
    };
    Ok((rest, token))
}

const fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '$'
}

const fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Parses an identifier (with optional `#` and `_` prefixes) or a literal keyword.
fn identifier_or_keyword(input: &str) -> IResult<&str, Token> {
    let (input, word) = recognize((
        take_while(|c| c == '#' || c == '_'),
        take_while1(is_ident_start),
        take_while(is_ident_continue),
    ))
    .parse(input)?;
    let token = match word {
        "true" => Token::True,
        "false" => Token::False,
        "null" => Token::Null,
        _ => Token::Ident(word.to_string()),
    };
    Ok((input, token))
}

/// Parses an attribute `@name(body)` with balanced parentheses in the body.
fn attribute(input: &str) -> IResult<&str, Token> {
    let (input, _) = char('@').parse(input)?;
    let (input, name) = take_while1(is_ident_continue).parse(input)?;
    let (input, _) = char('(').parse(input)?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, c) in input.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string && depth == 0 => {
                let token = Token::Attribute {
                    name: name.to_string(),
                    body: input[..idx].to_string(),
                };
                return Ok((&input[idx + 1..], token));
            }
            ')' if !in_string => depth -= 1,
            _ => {}
        }
    }
    Err(nom::Err::Failure(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}

/// Parses a symbol token, longest match first.
fn symbol(input: &str) -> IResult<&str, Token> {
    let compound = alt((
        value(Token::Ellipsis, tag("...")),
        value(Token::Bottom, tag("_|_")),
        value(Token::EqEq, tag("==")),
        value(Token::NotEq, tag("!=")),
        value(Token::Le, tag("<=")),
        value(Token::Ge, tag(">=")),
        value(Token::Match, tag("=~")),
        value(Token::NotMatch, tag("!~")),
        value(Token::AndAnd, tag("&&")),
        value(Token::OrOr, tag("||")),
    ));
    let single = alt((
        value(Token::BraceOpen, char('{')),
        value(Token::BraceClose, char('}')),
        value(Token::BracketOpen, char('[')),
        value(Token::BracketClose, char(']')),
        value(Token::ParenOpen, char('(')),
        value(Token::ParenClose, char(')')),
        value(Token::Colon, char(':')),
        value(Token::Comma, char(',')),
        value(Token::Dot, char('.')),
        value(Token::Question, char('?')),
        value(Token::Amp, char('&')),
        value(Token::Pipe, char('|')),
        value(Token::Star, char('*')),
        value(Token::Plus, char('+')),
        value(Token::Minus, char('-')),
        value(Token::Slash, char('/')),
        value(Token::Bang, char('!')),
        value(Token::Lt, char('<')),
        value(Token::Gt, char('>')),
    ));
    alt((compound, single)).parse(input)
}

/// Parses `_` when it is not the start of an identifier.
fn top(input: &str) -> IResult<&str, Token> {
    value(Token::Top, char('_')).parse(input)
}

/// Parses a single non-string token (after trivia has been skipped).
fn single_token(input: &str) -> IResult<&str, Token> {
    alt((symbol, number, identifier_or_keyword, attribute, top)).parse(input)
}

/// Finds the end of an interpolation body starting right after `\(`.
///
/// Returns the byte index of the closing parenthesis.
fn interpolation_end(input: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, c) in input.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string && depth == 0 => return Some(idx),
            ')' if !in_string => depth -= 1,
            '\n' if !in_string => return None,
            _ => {}
        }
    }
    None
}

/// Parses a double-quoted string literal with escapes and `\(expr)` interpolation.
///
/// `offset` is the absolute position of the opening quote, used to give
/// interpolated tokens absolute offsets.
fn string_literal(
    input: &str,
    offset: usize,
    depth_left: usize,
) -> Result<(&str, Token), SyntaxError> {
    let body = &input[1..];
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = body.char_indices();

    let unterminated = || SyntaxError::new(offset, "unterminated string literal");

    loop {
        let Some((idx, c)) = chars.next() else {
            return Err(unterminated());
        };
        match c {
            '"' => {
                if !current.is_empty() || parts.is_empty() {
                    parts.push(StrToken::Lit(current));
                }
                return Ok((&body[idx + 1..], Token::Str(parts)));
            }
            '\n' => return Err(unterminated()),
            '\\' => {
                let Some((esc_idx, esc)) = chars.next() else {
                    return Err(unterminated());
                };
                match esc {
                    'n' => current.push('\n'),
                    't' => current.push('\t'),
                    'r' => current.push('\r'),
                    '\\' => current.push('\\'),
                    '"' => current.push('"'),
                    '/' => current.push('/'),
                    'u' => {
                        let hex = body.get(esc_idx + 1..esc_idx + 5).ok_or_else(unterminated)?;
                        let code = u32::from_str_radix(hex, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or_else(|| {
                                SyntaxError::new(offset + 1 + esc_idx, "invalid unicode escape")
                            })?;
                        current.push(code);
                        for _ in 0..4 {
                            let _ = chars.next();
                        }
                    }
                    '(' => {
                        let start = esc_idx + 1;
                        let len = interpolation_end(&body[start..]).ok_or_else(|| {
                            SyntaxError::new(offset + 1 + idx, "unterminated interpolation")
                        })?;
                        let depth_left = depth_left.checked_sub(1).ok_or_else(|| {
                            SyntaxError::new(offset + 1 + idx, "interpolations nested too deeply")
                        })?;
                        let tokens = tokenize_at(
                            &body[start..start + len],
                            offset + 1 + start,
                            depth_left,
                        )?;
                        if tokens.is_empty() {
                            return Err(SyntaxError::new(
                                offset + 1 + idx,
                                "empty interpolation",
                            ));
                        }
                        if !current.is_empty() {
                            parts.push(StrToken::Lit(std::mem::take(&mut current)));
                        }
                        parts.push(StrToken::Interp(tokens));
                        // Skip the interpolation body and its closing parenthesis.
                        for (next_idx, _) in chars.by_ref() {
                            if next_idx == start + len {
                                break;
                            }
                        }
                    }
                    other => {
                        return Err(SyntaxError::new(
                            offset + 1 + idx,
                            format!("unknown escape sequence \\{other}"),
                        ));
                    }
                }
            }
            c => current.push(c),
        }
    }
}

/// Tokenizes source text into a vector of tokens.
///
/// Whitespace and `//` line comments are discarded.
///
/// # Errors
///
/// Returns an error if the input contains characters that cannot be tokenized.
pub fn tokenize(input: &str) -> Result<Vec<Spanned>, SyntaxError> {
    tokenize_nested(input, MAX_EVAL_DEPTH)
}

/// Tokenizes source text, allowing string interpolations to nest at most
/// `max_depth` levels.
///
/// # Errors
///
/// Returns an error for untokenizable input or interpolations nested deeper
/// than `max_depth`.
pub fn tokenize_nested(input: &str, max_depth: usize) -> Result<Vec<Spanned>, SyntaxError> {
    tokenize_at(input, 0, max_depth)
}

fn tokenize_at(input: &str, base: usize, depth_left: usize) -> Result<Vec<Spanned>, SyntaxError> {
    let mut tokens = Vec::new();
    let mut remaining = input;

    loop {
        let (rest, newline_before) = skip_trivia(remaining).map_err(|e| {
            SyntaxError::new(
                base + input.len() - remaining.len(),
                format!("lexer error skipping whitespace: {e}"),
            )
        })?;
        remaining = rest;

        if remaining.is_empty() {
            break;
        }

        let offset = base + input.len() - remaining.len();
        let (rest, token) = if remaining.starts_with('"') {
            string_literal(remaining, offset, depth_left)?
        } else {
            single_token(remaining).map_err(|_| {
                let preview: String = remaining.chars().take(20).collect();
                SyntaxError::new(offset, format!("unexpected character at: \"{preview}\""))
            })?
        };
        tokens.push(Spanned {
            token,
            offset,
            newline_before,
        });
        remaining = rest;
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input)
            .expect("should tokenize")
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    fn lit(s: &str) -> Token {
        Token::Str(vec![StrToken::Lit(s.into())])
    }

    #[test]
    fn tokenize_literals() {
        assert_eq!(
            kinds("true false null _ _|_ 42 1.5 2e3"),
            vec![
                Token::True,
                Token::False,
                Token::Null,
                Token::Top,
                Token::Bottom,
                Token::Int(42),
                Token::Float(1.5),
                Token::Float(2000.0),
            ]
        );
    }

    #[test]
    fn tokenize_identifiers_with_prefixes() {
        assert_eq!(
            kinds("name #Config _hidden _#private"),
            vec![
                Token::Ident("name".into()),
                Token::Ident("#Config".into()),
                Token::Ident("_hidden".into()),
                Token::Ident("_#private".into()),
            ]
        );
    }

    #[test]
    fn tokenize_operators_longest_first() {
        assert_eq!(
            kinds("... == != <= >= =~ !~ && || < > ! & | * + - /"),
            vec![
                Token::Ellipsis,
                Token::EqEq,
                Token::NotEq,
                Token::Le,
                Token::Ge,
                Token::Match,
                Token::NotMatch,
                Token::AndAnd,
                Token::OrOr,
                Token::Lt,
                Token::Gt,
                Token::Bang,
                Token::Amp,
                Token::Pipe,
                Token::Star,
                Token::Plus,
                Token::Minus,
                Token::Slash,
            ]
        );
    }

    #[test]
    fn tokenize_string_with_escapes() {
        assert_eq!(
            kinds(r#""line\nnew\ttab\\slash\"quoteA""#),
            vec![lit("line\nnew\ttab\\slash\"quoteA")]
        );
    }

    #[test]
    fn tokenize_empty_string() {
        assert_eq!(kinds(r#""""#), vec![lit("")]);
    }

    #[test]
    fn tokenize_interpolation() {
        let tokens = kinds(r#""\(name)-client""#);
        let Token::Str(parts) = &tokens[0] else {
            panic!("expected string token");
        };
        assert_eq!(parts.len(), 2);
        let StrToken::Interp(inner) = &parts[0] else {
            panic!("expected interpolation");
        };
        assert_eq!(inner[0].token, Token::Ident("name".into()));
        assert_eq!(inner[0].offset, 3);
        assert_eq!(parts[1], StrToken::Lit("-client".into()));
    }

    #[test]
    fn tokenize_attribute() {
        assert_eq!(
            kinds("name: string @tessera(env:string:USER)"),
            vec![
                Token::Ident("name".into()),
                Token::Colon,
                Token::Ident("string".into()),
                Token::Attribute {
                    name: "tessera".into(),
                    body: "env:string:USER".into(),
                },
            ]
        );
    }

    #[test]
    fn tokenize_tracks_newlines() {
        let tokens = tokenize("a: 1\n[string]: int").expect("should tokenize");
        assert!(!tokens[1].newline_before);
        assert!(tokens[3].newline_before);
        assert_eq!(tokens[3].token, Token::BracketOpen);
    }

    #[test]
    fn tokenize_skips_comments() {
        assert_eq!(
            kinds("a: 1 // trailing\n// full line\nb: 2"),
            vec![
                Token::Ident("a".into()),
                Token::Colon,
                Token::Int(1),
                Token::Ident("b".into()),
                Token::Colon,
                Token::Int(2),
            ]
        );
    }

    #[test]
    fn tokenize_selector_is_not_float() {
        assert_eq!(
            kinds("a.b[0]"),
            vec![
                Token::Ident("a".into()),
                Token::Dot,
                Token::Ident("b".into()),
                Token::BracketOpen,
                Token::Int(0),
                Token::BracketClose,
            ]
        );
    }

    #[test]
    fn tokenize_error_on_unterminated_string() {
        let err = tokenize("a: \"open").unwrap_err();
        assert_eq!(err.offset, 3);
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn tokenize_error_on_invalid_char() {
        assert!(tokenize("a: ~").is_err());
    }

    #[test]
    fn tokenize_limits_interpolation_nesting() {
        let input = r#"a: "\("\(x)")""#;
        assert!(tokenize_nested(input, 2).is_ok());
        let err = tokenize_nested(input, 1).unwrap_err();
        assert!(err.message.contains("nested too deeply"), "got: {err:?}");
    }

    #[test]
    fn tokenize_empty_input() {
        assert!(tokenize("").expect("should tokenize").is_empty());
    }
}
