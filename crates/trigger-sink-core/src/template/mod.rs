//! # Template Resolver
//!
//! Turns `(body, headers, extensions, trigger)` into rendered JSON
//! documents ready for create calls, in three phases:
//!
//! 1. [`resolve_trigger`] fetches the referenced bindings and template;
//! 2. [`resolve_params`] evaluates binding values against the event and
//!    fills declared defaults;
//! 3. [`resolve_resources`] substitutes `$(params.NAME)` and `$(uid)` into
//!    each raw resource template.
//!
//! Binding values use the substitution language implemented in [`event`]:
//! `$(body…)`, `$(header…)`, and `$(extensions…)` expressions with
//! gjson-style path selection and content-aware quote escaping.

mod event;
mod resolve;

pub use event::apply_event_values;
pub use resolve::{
    resolve_params, resolve_resources, resolve_trigger, ResolveError, ResolvedBinding,
    ResolvedTrigger,
};

/// Failures while evaluating substitution expressions.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("body path {path} not found in the event body")]
    BodyPathNotFound { path: String },

    #[error("header {name} not found in the event")]
    HeaderNotFound { name: String },

    #[error("extensions path {path} not found")]
    ExtensionsPathNotFound { path: String },

    #[error("event body is not valid UTF-8")]
    NonUtf8Body,

    #[error("failed to encode value as JSON: {message}")]
    Encoding { message: String },

    #[error("malformed substitution expression in {value:?}")]
    MalformedExpression { value: String },
}
