//! Extension column codec
//!
//! Fields that have no matching table column are stored in a single `hstore`
//! column. This module renders such fields as hstore text for writing and
//! parses the hstore text the server returns back into record fields.

use std::iter::Peekable;
use std::str::Chars;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Result, SyncError};

/// Marker hstore uses for a missing value
pub const NULL_MARKER: &str = "NULL";

/// Encode a field mapping as hstore text: `"key"=>"value", ...`
///
/// Booleans become `"true"`/`"false"`, arrays and objects are stored as JSON
/// text, numbers as their JSON text when finite, and null becomes `NULL`.
pub fn encode(fields: &Map<String, Value>) -> String {
    fields
        .iter()
        .map(|(key, value)| format!("{}=>{}", quote_and_escape(key), encode_value(value)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn encode_value(value: &Value) -> String {
    match value {
        Value::Null => NULL_MARKER.to_string(),
        Value::Bool(true) => quote_and_escape("true"),
        Value::Bool(false) => quote_and_escape("false"),
        Value::Number(n) => {
            if n.as_f64().is_none_or(f64::is_finite) {
                quote_and_escape(&n.to_string())
            } else {
                NULL_MARKER.to_string()
            }
        }
        Value::String(s) => quote_and_escape(s),
        structured @ (Value::Array(_) | Value::Object(_)) => {
            quote_and_escape(&structured.to_string())
        }
    }
}

/// Wrap in double quotes, backslash-escaping `"` and `\`
pub fn quote_and_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    for c in raw.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Parse hstore text output into `(key, value)` pairs, in textual order
pub fn parse(text: &str) -> Result<Vec<(String, Option<String>)>> {
    let mut chars = text.chars().peekable();
    let mut pairs = Vec::new();

    loop {
        skip_whitespace(&mut chars);
        if chars.peek().is_none() {
            break;
        }

        let (key, _) = read_token(&mut chars)?;

        skip_whitespace(&mut chars);
        if chars.next() != Some('=') || chars.next() != Some('>') {
            return Err(SyncError::decode(format!(
                "hstore: expected '=>' after key '{}'",
                key
            )));
        }
        skip_whitespace(&mut chars);

        let (value, quoted) = read_token(&mut chars)?;
        let value = if !quoted && value.eq_ignore_ascii_case(NULL_MARKER) {
            None
        } else {
            Some(value)
        };
        pairs.push((key, value));

        skip_whitespace(&mut chars);
        match chars.next() {
            None => break,
            Some(',') => continue,
            Some(c) => {
                return Err(SyncError::decode(format!(
                    "hstore: unexpected '{}' after pair",
                    c
                )));
            }
        }
    }

    Ok(pairs)
}

fn skip_whitespace(chars: &mut Peekable<Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

/// Read a quoted or bare token; the flag reports whether it was quoted
fn read_token(chars: &mut Peekable<Chars<'_>>) -> Result<(String, bool)> {
    let mut token = String::new();

    if chars.peek() == Some(&'"') {
        chars.next();
        loop {
            match chars.next() {
                Some('\\') => match chars.next() {
                    Some(c) => token.push(c),
                    None => return Err(SyncError::decode("hstore: dangling escape")),
                },
                Some('"') => return Ok((token, true)),
                Some(c) => token.push(c),
                None => return Err(SyncError::decode("hstore: unterminated quoted string")),
            }
        }
    }

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() || c == ',' || c == '=' {
            break;
        }
        if c == '\\' {
            chars.next();
            match chars.next() {
                Some(escaped) => token.push(escaped),
                None => return Err(SyncError::decode("hstore: dangling escape")),
            }
            continue;
        }
        token.push(c);
        chars.next();
    }

    if token.is_empty() {
        return Err(SyncError::decode("hstore: expected a key or value"));
    }
    Ok((token, false))
}

/// Turn parsed pairs into record fields; values stay textual
pub fn decode(pairs: Vec<(String, Option<String>)>) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(key, value)| (key, value.map(Value::String).unwrap_or(Value::Null)))
        .collect()
}

/// Merge decoded extension fields into a row; existing keys are kept
pub fn merge_into(target: &mut Map<String, Value>, decoded: Map<String, Value>) {
    for (key, value) in decoded {
        target.entry(key).or_insert(value);
    }
}

/// Parse stored hstore text and merge it into a row
///
/// A key equal to the extension column's own name is skipped, so the merged
/// record can be written back.
pub fn merge_text(target: &mut Map<String, Value>, text: &str, extension_column: &str) -> Result<()> {
    let mut decoded = decode(parse(text)?);
    if decoded.remove(extension_column).is_some() {
        debug!(
            key = extension_column,
            "ignoring extension key named like the extension column"
        );
    }
    merge_into(target, decoded);
    Ok(())
}
