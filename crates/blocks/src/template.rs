//! `{{path}}` interpolation against the execution context.
//!
//! Rendering goes through Handlebars in non-strict mode with HTML escaping
//! turned off: missing paths render as an empty string and values are
//! inserted as-is. [`lookup`] resolves a bare dotted path (`items.0.name`)
//! without templating, for blocks that reference a field by name.

use std::sync::OnceLock;

use handlebars::Handlebars;
use serde_json::Value;

use crate::{BlockError, Context};

fn renderer() -> &'static Handlebars<'static> {
    static RENDERER: OnceLock<Handlebars<'static>> = OnceLock::new();
    RENDERER.get_or_init(|| {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars
    })
}

/// Resolve a dotted path inside the context.
pub fn lookup<'a>(context: &'a Context, path: &str) -> Option<&'a Value> {
    let mut segments = path.trim().split('.');
    let first = segments.next()?;
    let mut current = context.get(first)?;

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Render every `{{path}}` placeholder in `template`.
///
/// # Errors
/// `InvalidConfig` when the template does not parse.
pub fn render(template: &str, context: &Context) -> Result<String, BlockError> {
    if !template.contains("{{") {
        return Ok(template.to_string());
    }
    renderer()
        .render_template(template, context)
        .map_err(|e| BlockError::InvalidConfig(format!("cannot render template: {e}")))
}

/// Render templates inside an arbitrary JSON value.
///
/// A string consisting of exactly one placeholder keeps the referenced
/// value's type, so `"{{count}}"` stays a number.
pub fn render_value(value: &Value, context: &Context) -> Result<Value, BlockError> {
    Ok(match value {
        Value::String(s) => match lone_placeholder(s) {
            Some(path) => lookup(context, path).cloned().unwrap_or(Value::Null),
            None => Value::String(render(s, context)?),
        },
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| render_value(v, context))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), render_value(v, context)?)))
                .collect::<Result<_, BlockError>>()?,
        ),
        other => other.clone(),
    })
}

fn lone_placeholder(s: &str) -> Option<&str> {
    s.trim()
        .strip_prefix("{{")
        .and_then(|t| t.strip_suffix("}}"))
        .filter(|inner| !inner.contains("{{") && !inner.contains("}}"))
        .map(str::trim)
        .filter(|path| !path.is_empty() && !path.contains(char::is_whitespace))
}
