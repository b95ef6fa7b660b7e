//! Parsing of the inline `<eval key="value" ... />` marker.

use std::collections::BTreeMap;
use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

const TAG: &str = "<eval";
const CLOSING_TAG: &str = "</eval>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerError {
    /// No `>` or `/>` before the end of the line.
    Unterminated,
    /// A quoted value was never closed.
    UnbalancedQuote { key: String },
    /// An attribute name without `=value`.
    MissingValue { key: String },
    /// A character that cannot start an attribute name.
    UnexpectedChar(char),
    /// Text after the closing `>`.
    TrailingText(String),
}

impl fmt::Display for MarkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerError::Unterminated => write!(f, "missing closing `/>`"),
            MarkerError::UnbalancedQuote { key } => {
                write!(f, "unbalanced quote in value of `{}`", key)
            }
            MarkerError::MissingValue { key } => write!(f, "attribute `{}` has no value", key),
            MarkerError::UnexpectedChar(c) => write!(f, "unexpected character `{}`", c),
            MarkerError::TrailingText(text) => write!(f, "unexpected text after marker: `{}`", text),
        }
    }
}

/// True if `line` (already trimmed) opens an eval marker.
pub fn is_marker(line: &str) -> bool {
    match line.strip_prefix(TAG) {
        Some(rest) => rest
            .chars()
            .next()
            .is_none_or(|c| c.is_whitespace() || c == '/' || c == '>'),
        None => false,
    }
}

/// Parse a trimmed marker line into its attributes. Later duplicates win.
pub fn parse_marker(line: &str) -> Result<BTreeMap<String, String>, MarkerError> {
    let body = line.strip_prefix(TAG).ok_or(MarkerError::Unterminated)?;
    let mut params = BTreeMap::new();
    let mut chars = body.char_indices().peekable();

    loop {
        skip_whitespace(&mut chars);
        let Some(&(pos, c)) = chars.peek() else {
            return Err(MarkerError::Unterminated);
        };

        let rest = &body[pos..];
        if let Some(after) = rest.strip_prefix("/>").or_else(|| rest.strip_prefix('>')) {
            let trailing = after.trim();
            if trailing.is_empty() || trailing == CLOSING_TAG {
                return Ok(params);
            }
            return Err(MarkerError::TrailingText(trailing.to_string()));
        }

        if !is_key_char(c) {
            return Err(MarkerError::UnexpectedChar(c));
        }
        let key = take_while(body, &mut chars, is_key_char);

        skip_whitespace(&mut chars);
        if chars.peek().map(|&(_, c)| c) != Some('=') {
            return Err(MarkerError::MissingValue { key });
        }
        chars.next();
        skip_whitespace(&mut chars);

        let value = match chars.peek().map(|&(_, c)| c) {
            Some(quote @ ('"' | '\'')) => {
                chars.next();
                read_quoted(body, &mut chars, quote).ok_or(MarkerError::UnbalancedQuote {
                    key: key.clone(),
                })?
            }
            Some(c) if c.is_whitespace() => return Err(MarkerError::MissingValue { key }),
            Some(_) => read_unquoted(body, &mut chars),
            None => return Err(MarkerError::MissingValue { key }),
        };

        params.insert(key, value);
    }
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn skip_whitespace(chars: &mut Peekable<CharIndices<'_>>) {
    while chars.next_if(|&(_, c)| c.is_whitespace()).is_some() {}
}

fn take_while(
    body: &str,
    chars: &mut Peekable<CharIndices<'_>>,
    pred: impl Fn(char) -> bool,
) -> String {
    let start = chars.peek().map(|&(i, _)| i).unwrap_or(body.len());
    let mut end = start;
    while let Some((i, c)) = chars.next_if(|&(_, c)| pred(c)) {
        end = i + c.len_utf8();
    }
    body[start..end].to_string()
}

fn read_quoted(body: &str, chars: &mut Peekable<CharIndices<'_>>, quote: char) -> Option<String> {
    let start = chars.peek().map(|&(i, _)| i).unwrap_or(body.len());
    for (i, c) in chars.by_ref() {
        if c == quote {
            return Some(body[start..i].to_string());
        }
    }
    None
}

fn read_unquoted(body: &str, chars: &mut Peekable<CharIndices<'_>>) -> String {
    let start = chars.peek().map(|&(i, _)| i).unwrap_or(body.len());
    let mut end = start;
    while let Some(&(i, c)) = chars.peek() {
        if c.is_whitespace() || c == '>' || body[i..].starts_with("/>") {
            break;
        }
        end = i + c.len_utf8();
        chars.next();
    }
    body[start..end].to_string()
}
