//! CEL interceptor.
//!
//! Evaluates CEL expressions against the incoming event. A `filter`
//! expression must return boolean `true` for processing to continue;
//! `overlays` evaluate expressions and insert their results into the
//! extensions map under dotted-path keys.
//!
//! The evaluation environment exposes `body` (the JSON-parsed payload),
//! `header` (a string to list-of-strings map), and `requestURL`, plus a
//! small helper library: `match(header_key, value)` for case-insensitive
//! single-value header equality and a method-style string `truncate`.

use super::{Code, Interceptor, InterceptorRequest, InterceptorResponse};
use crate::config::Overlay;
use async_trait::async_trait;
use cel_interpreter::extractors::This;
use cel_interpreter::objects::{Key, Map as CelMap};
use cel_interpreter::{Context, Program, Value as CelValue};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

#[cfg(test)]
#[path = "cel_tests.rs"]
mod tests;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Params {
    #[serde(default)]
    filter: Option<String>,

    #[serde(default)]
    overlays: Vec<Overlay>,
}

#[derive(Debug, Default)]
pub struct CelEvaluator;

impl CelEvaluator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Interceptor for CelEvaluator {
    async fn process(&self, request: &InterceptorRequest) -> InterceptorResponse {
        let params: Params =
            match serde_json::from_value(Value::Object(request.interceptor_params.clone())) {
                Ok(params) => params,
                Err(err) => {
                    return InterceptorResponse::stop(
                        Code::InvalidArgument,
                        format!("invalid interceptor params: {}", err),
                    )
                }
            };

        let payload: &[u8] = if request.body.is_empty() {
            b"{}"
        } else {
            &request.body
        };
        let body: Value = match serde_json::from_slice(payload) {
            Ok(body) => body,
            Err(err) => {
                return InterceptorResponse::stop(
                    Code::InvalidArgument,
                    format!("failed to parse the body as JSON: {}", err),
                )
            }
        };

        let context = match make_context(request, &body) {
            Ok(context) => context,
            Err(message) => return InterceptorResponse::stop(Code::Internal, message),
        };

        if let Some(filter) = params.filter.as_deref().filter(|f| !f.is_empty()) {
            match evaluate(filter, &context) {
                Err(message) => {
                    return InterceptorResponse::stop(
                        Code::InvalidArgument,
                        format!("error evaluating cel expression: {}", message),
                    )
                }
                Ok(CelValue::Bool(true)) => {}
                Ok(_) => {
                    return InterceptorResponse::stop(
                        Code::FailedPrecondition,
                        format!("expression {} did not return true", filter),
                    )
                }
            }
        }

        let mut extensions = Map::new();
        for overlay in &params.overlays {
            let value = match evaluate(&overlay.expression, &context) {
                Ok(value) => value,
                Err(message) => {
                    return InterceptorResponse::stop(
                        Code::InvalidArgument,
                        format!("error evaluating cel expression: {}", message),
                    )
                }
            };

            let json = match cel_to_json(&value) {
                Ok(json) => json,
                Err(message) => {
                    return InterceptorResponse::stop(
                        Code::Internal,
                        format!(
                            "failed to convert overlay result for key {}: {}",
                            overlay.key, message
                        ),
                    )
                }
            };

            set_at_path(&mut extensions, &overlay.key, json);
        }

        if extensions.is_empty() {
            InterceptorResponse::proceed()
        } else {
            InterceptorResponse::proceed_with(extensions)
        }
    }
}

/// Build the evaluation context for one request.
///
/// The context is rebuilt per invocation: header contents differ per event
/// and the helper closures capture them.
fn make_context<'a>(
    request: &InterceptorRequest,
    body: &Value,
) -> Result<Context<'a>, String> {
    let mut context = Context::default();

    context.add_variable_from_value("body", json_to_cel(body));

    let header_json =
        serde_json::to_value(&request.header).map_err(|err| err.to_string())?;
    context.add_variable_from_value("header", json_to_cel(&header_json));
    context.add_variable_from_value(
        "requestURL",
        CelValue::String(Arc::new(request.context.event_url.clone())),
    );

    let headers = request.header.clone();
    context.add_function("match", move |key: Arc<String>, value: Arc<String>| -> bool {
        headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key.as_str()))
            .and_then(|(_, values)| values.first())
            .map(|found| found == value.as_str())
            .unwrap_or(false)
    });

    context.add_function("truncate", |This(s): This<Arc<String>>, max: i64| -> String {
        let max = max.max(0) as usize;
        s.chars().take(max).collect()
    });

    Ok(context)
}

fn evaluate(expression: &str, context: &Context) -> Result<CelValue, String> {
    let program = Program::compile(expression)
        .map_err(|err| format!("failed to parse expression {:?}: {}", expression, err))?;
    program
        .execute(context)
        .map_err(|err| format!("expression {:?} failed to evaluate: {}", expression, err))
}

/// Convert a JSON document into the evaluator's value space.
fn json_to_cel(value: &Value) -> CelValue {
    match value {
        Value::Null => CelValue::Null,
        Value::Bool(b) => CelValue::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                CelValue::Int(i)
            } else if let Some(u) = n.as_u64() {
                CelValue::UInt(u)
            } else {
                CelValue::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => CelValue::String(Arc::new(s.clone())),
        Value::Array(items) => CelValue::List(Arc::new(items.iter().map(json_to_cel).collect())),
        Value::Object(map) => CelValue::Map(CelMap {
            map: Arc::new(
                map.iter()
                    .map(|(key, value)| (Key::String(Arc::new(key.clone())), json_to_cel(value)))
                    .collect(),
            ),
        }),
    }
}

/// Serialize an overlay result to its canonical JSON form.
///
/// Bytes are treated as a raw JSON fragment; durations, timestamps, and
/// functions have no JSON form and are rejected.
fn cel_to_json(value: &CelValue) -> Result<Value, String> {
    match value {
        CelValue::Null => Ok(Value::Null),
        CelValue::Bool(b) => Ok(Value::Bool(*b)),
        CelValue::Int(i) => Ok(Value::Number((*i).into())),
        CelValue::UInt(u) => Ok(Value::Number((*u).into())),
        CelValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .ok_or_else(|| "number is not finite".to_string()),
        CelValue::String(s) => Ok(Value::String(s.as_ref().clone())),
        CelValue::Bytes(bytes) => serde_json::from_slice(bytes)
            .map_err(|err| format!("bytes are not valid JSON: {}", err)),
        CelValue::List(items) => items
            .iter()
            .map(cel_to_json)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        CelValue::Map(map) => {
            let mut object = Map::new();
            for (key, value) in map.map.iter() {
                object.insert(key_to_string(key), cel_to_json(value)?);
            }
            Ok(Value::Object(object))
        }
        other => Err(format!("unsupported overlay value: {:?}", other)),
    }
}

fn key_to_string(key: &Key) -> String {
    match key {
        Key::String(s) => s.as_ref().clone(),
        Key::Int(i) => i.to_string(),
        Key::Uint(u) => u.to_string(),
        Key::Bool(b) => b.to_string(),
    }
}

/// Set `value` at a dotted `path` inside `map`, creating intermediate
/// objects and overwriting non-object intermediates.
fn set_at_path(map: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(inner) = entry {
                set_at_path(inner, rest, value);
            }
        }
    }
}
