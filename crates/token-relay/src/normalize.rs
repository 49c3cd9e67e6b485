//! Token endpoint response normalization
//!
//! Authorization servers disagree on response encoding: most return JSON,
//! some older ones return `application/x-www-form-urlencoded`. The declared
//! media type selects a parser from `PARSERS`; anything else is rejected.

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::grant::TokenSet;

type Parser = fn(&str) -> Result<TokenSet>;

/// Media type → body parser. Keys are lowercase, without parameters.
const PARSERS: &[(&str, Parser)] = &[
    ("application/json", parse_json),
    ("application/x-www-form-urlencoded", parse_form),
];

/// Strip parameters (`; charset=…`) and normalize case.
pub fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Parse a response body according to its declared content type.
pub fn normalize(content_type: Option<&str>, body: &str) -> Result<TokenSet> {
    let Some(content_type) = content_type else {
        return Err(Error::Parse("response has no content type".into()));
    };
    let media = media_type(content_type);
    match PARSERS.iter().find(|(name, _)| *name == media) {
        Some((_, parse)) => parse(body),
        None => Err(Error::Parse(format!("unsupported content type: {media}"))),
    }
}

fn parse_json(body: &str) -> Result<TokenSet> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(fields)) => Ok(TokenSet::new(fields)),
        Ok(other) => Err(Error::Parse(format!(
            "expected JSON object, got {}",
            json_type_name(&other)
        ))),
        Err(e) => Err(Error::Parse(format!("malformed JSON body: {e}"))),
    }
}

/// Repeated keys collect into an array, single keys stay strings.
fn parse_form(body: &str) -> Result<TokenSet> {
    let mut fields = Map::new();
    for (key, value) in url::form_urlencoded::parse(body.trim().as_bytes()) {
        let value = Value::String(value.into_owned());
        match fields.get_mut(&*key) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                fields.insert(key.into_owned(), value);
            }
        }
    }
    Ok(TokenSet::new(fields))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
