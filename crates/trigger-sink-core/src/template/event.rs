//! Substitution of event values into binding parameters.
//!
//! Expressions are gated by regexes: paths admit alphanumerics plus the
//! characters gjson selectors use (dots, escaped dots, slashes, `#(...)`
//! array filters, comparison operators); header names admit alphanumerics,
//! underscores, and dashes. Text that looks like an expression but does
//! not match the gate is reported as malformed rather than passed through.

use super::TemplateError;
use crate::interceptor::EventHeaders;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;

static BODY_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\$\(body(\.[[:alnum:]\\/_.#()=<>%!"*-]+)?\)"#).expect("body regex")
});

static HEADER_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\(header(\.[[:alnum:]_-]+)?\)").expect("header regex"));

static EXTENSIONS_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\$\(extensions(\.[[:alnum:]\\/_.#()=<>%!"*-]+)?\)"#).expect("extensions regex")
});

/// Evaluate every substitution expression in `value` against the event.
///
/// Body, header, and extensions expressions are applied in that order.
/// After substitution, any residual expression-like text means the value
/// contained an expression the gates rejected.
///
/// # Errors
///
/// - [`TemplateError::BodyPathNotFound`] / [`TemplateError::HeaderNotFound`] /
///   [`TemplateError::ExtensionsPathNotFound`] for references that do not
///   resolve against this event
/// - [`TemplateError::MalformedExpression`] for gate-rejected expressions
pub fn apply_event_values(
    value: &str,
    body: &[u8],
    header: &EventHeaders,
    extensions: &Map<String, Value>,
) -> Result<String, TemplateError> {
    let applied = replace_all(&BODY_VAR, value, |var| {
        body_path_value(body, &path_from_var(var, "$(body"))
    })?;

    let applied = replace_all(&HEADER_VAR, &applied, |var| {
        header_value(header, &path_from_var(var, "$(header"))
    })?;

    let extensions_json = serde_json::to_string(extensions).map_err(|err| {
        TemplateError::Encoding {
            message: err.to_string(),
        }
    })?;
    let applied = replace_all(&EXTENSIONS_VAR, &applied, |var| {
        extensions_path_value(&extensions_json, &path_from_var(var, "$(extensions"))
    })?;

    for prefix in ["$(body", "$(header", "$(extensions"] {
        if applied.contains(prefix) {
            return Err(TemplateError::MalformedExpression {
                value: value.to_string(),
            });
        }
    }

    Ok(applied)
}

/// Replace every match of `re` in `input` with the result of `lookup`.
fn replace_all(
    re: &Regex,
    input: &str,
    mut lookup: impl FnMut(&str) -> Result<String, TemplateError>,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for found in re.find_iter(input) {
        out.push_str(&input[last..found.start()]);
        out.push_str(&lookup(found.as_str())?);
        last = found.end();
    }
    out.push_str(&input[last..]);
    Ok(out)
}

/// Extract the path from a matched expression: `$(body.a.b)` with prefix
/// `$(body` yields `a.b`; `$(body)` yields the empty path.
///
/// Only the expression's own closing paren is stripped; a trailing paren
/// that belongs to a gjson array filter (`$(body.commits.#(id=="b"))`)
/// stays part of the path.
fn path_from_var(var: &str, prefix: &str) -> String {
    let rest = var.strip_prefix(prefix).unwrap_or(var);
    let rest = rest.strip_suffix(')').unwrap_or(rest);
    rest.trim_start_matches('.').to_string()
}

/// Resolve a body path.
///
/// The empty path yields the whole body. Objects and arrays substitute as
/// JSON literals with `"` escaped so they stay embeddable inside JSON
/// string values; string scalars substitute verbatim; a JSON `null`
/// substitutes the literal text `null`.
fn body_path_value(body: &[u8], path: &str) -> Result<String, TemplateError> {
    let json = std::str::from_utf8(body).map_err(|_| TemplateError::NonUtf8Body)?;

    if path.is_empty() {
        return Ok(escape_quotes(json));
    }

    let result = gjson::get(json, path);
    if !result.exists() {
        return Err(TemplateError::BodyPathNotFound {
            path: path.to_string(),
        });
    }

    Ok(render_gjson(&result))
}

fn extensions_path_value(extensions_json: &str, path: &str) -> Result<String, TemplateError> {
    if path.is_empty() {
        return Ok(escape_quotes(extensions_json));
    }

    let result = gjson::get(extensions_json, path);
    if !result.exists() {
        return Err(TemplateError::ExtensionsPathNotFound {
            path: path.to_string(),
        });
    }

    Ok(render_gjson(&result))
}

fn render_gjson(result: &gjson::Value) -> String {
    match result.kind() {
        gjson::Kind::String => result.str().to_string(),
        gjson::Kind::Null => "null".to_string(),
        gjson::Kind::Object | gjson::Kind::Array => escape_quotes(result.json()),
        // Numbers and booleans keep their literal JSON text.
        _ => result.json().to_string(),
    }
}

/// Resolve a header reference.
///
/// The empty name yields all headers as a JSON object with keys sorted
/// ascending; a named lookup is case-insensitive and joins multiple values
/// with a single space.
fn header_value(header: &EventHeaders, name: &str) -> Result<String, TemplateError> {
    if name.is_empty() {
        let canonical: BTreeMap<&str, &Vec<String>> = header
            .iter()
            .map(|(key, values)| (key.as_str(), values))
            .collect();
        let json = serde_json::to_string(&canonical).map_err(|err| TemplateError::Encoding {
            message: err.to_string(),
        })?;
        return Ok(escape_quotes(&json));
    }

    header
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, values)| values.join(" "))
        .ok_or_else(|| TemplateError::HeaderNotFound {
            name: name.to_string(),
        })
}

fn escape_quotes(s: &str) -> String {
    s.replace('"', "\\\"")
}
