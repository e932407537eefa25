//! Template rendering utilities using Tera
//!
//! Step configuration may embed `{{ field }}` placeholders that are filled in
//! from the execution's data bag at the moment the step runs.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tera::{Context, Tera};

use crate::{Error, Result};

lazy_static! {
    static ref TEMPLATE_MARKER: Regex = Regex::new(r"\{\{.*?\}\}|\{%.*?%\}").expect("static regex");
}

/// Whether a string contains Tera expressions or tags
pub fn is_template(s: &str) -> bool {
    TEMPLATE_MARKER.is_match(s)
}

/// Render a template string with the given context
pub fn render_template(template: &str, context: &Value) -> Result<String> {
    if !is_template(template) {
        return Ok(template.to_string());
    }

    let mut tera = Tera::default();
    tera.add_raw_template("template", template)
        .map_err(|e| Error::Internal(format!("Failed to parse template: {}", e)))?;

    let mut tera_context = Context::new();

    match context {
        Value::Object(map) => {
            for (key, value) in map {
                tera_context.insert(key, &value);
            }
        }
        _ => {
            // If not an object, make it available as "data"
            tera_context.insert("data", &context);
        }
    }

    tera.render("template", &tera_context)
        .map_err(|e| Error::Internal(format!("Failed to render template: {}", e)))
}

/// Render every string found inside a JSON value, leaving other values untouched.
pub fn render_value(value: &Value, context: &Value) -> Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(render_template(s, context)?)),
        Value::Array(items) => items
            .iter()
            .map(|item| render_value(item, context))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut rendered = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                rendered.insert(key.clone(), render_value(item, context)?);
            }
            Ok(Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}
