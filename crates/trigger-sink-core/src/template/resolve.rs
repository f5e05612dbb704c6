//! Binding and template resolution.

use super::{apply_event_values, TemplateError};
use crate::config::{
    BindingKind, EventListenerTrigger, LookupError, Param, TriggerStore, TriggerTemplate,
};
use crate::interceptor::EventHeaders;
use crate::random_suffix;
use serde_json::{Map, Value};
use std::collections::HashMap;

#[cfg(test)]
#[path = "resolve_tests.rs"]
mod tests;

/// Failures while resolving a trigger into rendered resources.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("trigger {name} has no template reference")]
    MissingTemplate { name: String },

    #[error("param {name} is defined in more than one binding")]
    Conflict { name: String },

    #[error("undefined parameter reference $(params.{name})")]
    UndefinedParam { name: String },
}

/// A binding's parameters together with the binding's name, kept for
/// diagnostics.
#[derive(Debug, Clone)]
pub struct ResolvedBinding {
    pub name: String,
    pub params: Vec<Param>,
}

/// Bindings and template of one trigger, fetched from the store.
#[derive(Debug, Clone)]
pub struct ResolvedTrigger {
    pub bindings: Vec<ResolvedBinding>,
    pub template: TriggerTemplate,
}

/// Fetch every binding and the template referenced by `trigger`.
///
/// Binding order is preserved; parameters of earlier bindings are
/// evaluated before later ones in [`resolve_params`].
pub async fn resolve_trigger(
    trigger: &EventListenerTrigger,
    namespace: &str,
    store: &dyn TriggerStore,
) -> Result<ResolvedTrigger, ResolveError> {
    let mut bindings = Vec::with_capacity(trigger.bindings.len());
    for binding_ref in &trigger.bindings {
        let (name, params) = match binding_ref.kind {
            BindingKind::TriggerBinding => {
                let binding = store.trigger_binding(namespace, &binding_ref.name).await?;
                (binding.metadata.name, binding.spec.params)
            }
            BindingKind::ClusterTriggerBinding => {
                let binding = store.cluster_trigger_binding(&binding_ref.name).await?;
                (binding.metadata.name, binding.spec.params)
            }
        };
        bindings.push(ResolvedBinding { name, params });
    }

    let template_ref = trigger
        .template
        .as_ref()
        .ok_or_else(|| ResolveError::MissingTemplate {
            name: trigger.name.clone(),
        })?;
    let template = store
        .trigger_template(namespace, &template_ref.name)
        .await?;

    Ok(ResolvedTrigger { bindings, template })
}

/// Evaluate binding parameters against the event and fill template
/// defaults.
///
/// A param may be produced by at most one binding across the resolved
/// binding set.
///
/// # Errors
///
/// - substitution failures from [`apply_event_values`]
/// - [`ResolveError::Conflict`] when two bindings declare the same param
///   name
pub fn resolve_params(
    resolved: &ResolvedTrigger,
    body: &[u8],
    header: &EventHeaders,
    extensions: &Map<String, Value>,
) -> Result<HashMap<String, String>, ResolveError> {
    let mut params: HashMap<String, String> = HashMap::new();

    for binding in &resolved.bindings {
        for param in &binding.params {
            if params.contains_key(&param.name) {
                return Err(ResolveError::Conflict {
                    name: param.name.clone(),
                });
            }
            let value = apply_event_values(&param.value, body, header, extensions)?;
            params.insert(param.name.clone(), value);
        }
    }

    for declared in &resolved.template.spec.params {
        if !params.contains_key(&declared.name) {
            if let Some(default) = &declared.default {
                params.insert(declared.name.clone(), default.clone());
            }
        }
    }

    Ok(params)
}

/// Render every resource template with the resolved params.
///
/// Each document gets one fresh `$(uid)` value shared across all of its
/// occurrences; documents rendered from the same resolution get distinct
/// values.
///
/// # Errors
///
/// Returns [`ResolveError::UndefinedParam`] when a document references a
/// param that is neither bound nor defaulted.
pub fn resolve_resources(
    template: &TriggerTemplate,
    params: &HashMap<String, String>,
) -> Result<Vec<String>, ResolveError> {
    let mut rendered = Vec::with_capacity(template.spec.resource_templates.len());

    for resource_template in &template.spec.resource_templates {
        let mut text = resource_template.to_string();

        for (name, value) in params {
            text = text.replace(&format!("$(params.{})", name), value);
        }
        text = text.replace("$(uid)", &random_suffix());

        if let Some(position) = text.find("$(params.") {
            let rest = &text[position + "$(params.".len()..];
            let name = rest
                .split(')')
                .next()
                .unwrap_or(rest)
                .to_string();
            return Err(ResolveError::UndefinedParam { name });
        }

        rendered.push(text);
    }

    Ok(rendered)
}
