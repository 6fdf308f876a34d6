//! `[NAME]` placeholder resolution and response-to-parameter bindings.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::ScenarioError;

pub type Params = HashMap<String, String>;

/// Replace the placeholder in `template` with its value from `params`.
///
/// Only one placeholder name is supported per template, but every occurrence
/// of it is replaced. A template without brackets is returned unchanged.
pub fn resolve_placeholder(template: &str, params: &Params) -> Result<String, ScenarioError> {
    let Some(start) = template.find('[') else {
        return Ok(template.to_string());
    };
    let Some(len) = template[start..].find(']') else {
        return Ok(template.to_string());
    };
    let placeholder = &template[start..=start + len];
    let name = &placeholder[1..placeholder.len() - 1];

    match params.get(name) {
        Some(value) => Ok(template.replace(placeholder, value)),
        None => Err(ScenarioError::MissingParam(name.to_string())),
    }
}

pub fn resolve_map(
    templates: &HashMap<String, String>,
    params: &Params,
) -> Result<HashMap<String, String>, ScenarioError> {
    templates
        .iter()
        .map(|(key, template)| Ok((key.clone(), resolve_placeholder(template, params)?)))
        .collect()
}

/// A value read out of a JSON response.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedValue {
    Text(String),
    Number(f64),
    Integer(i64),
    Unsupported,
}

impl ExtractedValue {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::String(s) => ExtractedValue::Text(s.clone()),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ExtractedValue::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    ExtractedValue::Number(f)
                } else {
                    ExtractedValue::Unsupported
                }
            }
            _ => ExtractedValue::Unsupported,
        }
    }

    /// Parameter representation; floats are truncated to an integer.
    pub fn into_param(self) -> Option<String> {
        match self {
            ExtractedValue::Text(s) => Some(s),
            // `+ 0.0` folds -0 into 0
            ExtractedValue::Number(f) => Some(format!("{}", f.trunc() + 0.0)),
            ExtractedValue::Integer(i) => Some(i.to_string()),
            ExtractedValue::Unsupported => None,
        }
    }
}

/// Walk a dotted path. Every segment but the last must name a nested object.
pub fn extract<'a>(response: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut current = response;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let value = current.get(segment)?;
        if segments.peek().is_none() {
            return Some(value);
        }
        current = value.as_object()?;
    }
    None
}

/// Apply `"[DEST]" -> "dotted.path"` bindings. Paths that do not resolve to a
/// string or number leave the parameter untouched.
pub fn bind_response(
    bindings: &HashMap<String, String>,
    response: &Map<String, Value>,
    params: &mut Params,
) {
    for (dest, path) in bindings {
        let name = dest
            .strip_prefix('[')
            .and_then(|d| d.strip_suffix(']'))
            .unwrap_or(dest);

        if let Some(value) = extract(response, path)
            .map(ExtractedValue::from_json)
            .and_then(ExtractedValue::into_param)
        {
            params.insert(name.to_string(), value);
        }
    }
}
