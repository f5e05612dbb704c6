//! # Configuration Model
//!
//! Declarative objects the sink reads: event listeners, triggers, bindings,
//! and templates, plus the feature-flag map and the [`TriggerStore`] lookup
//! trait.
//!
//! All objects are created out-of-band and are read-only to the sink; the
//! wire shapes use camelCase field names so definitions written as YAML or
//! JSON manifests deserialize directly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod feature_flags;

pub use feature_flags::{ApiFields, FeatureFlags};

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

/// Default port for interceptor service references without an explicit port.
pub const DEFAULT_SERVICE_PORT: u16 = 80;

// ============================================================================
// Error Types
// ============================================================================

/// Validation failures in declarative objects.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field: {field}")]
    Required { field: String },

    #[error("invalid value for {field}: {message}")]
    Invalid { field: String, message: String },
}

/// Failures while looking up declarative objects.
///
/// A lookup failure is per-trigger: the worker that needed the object
/// reports it, the rest of the event proceeds.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("{kind} \"{namespace}/{name}\" not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("lookup of {kind} \"{namespace}/{name}\" failed: {message}")]
    Failed {
        kind: String,
        namespace: String,
        name: String,
        message: String,
    },
}

impl LookupError {
    pub fn not_found(kind: &str, namespace: &str, name: &str) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

// ============================================================================
// Object metadata
// ============================================================================

/// Name and namespace of a declarative object.
///
/// Cluster-scoped objects leave `namespace` empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    #[serde(default)]
    pub namespace: String,
}

// ============================================================================
// EventListener
// ============================================================================

/// A named endpoint configuration owning an ordered list of triggers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventListener {
    pub metadata: ObjectMeta,
    pub spec: EventListenerSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventListenerSpec {
    #[serde(default)]
    pub triggers: Vec<EventListenerTrigger>,
}

impl EventListener {
    /// Validate the listener and all inline triggers.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] encountered; alpha-gated
    /// fields (the webhook interceptor) are rejected unless
    /// `flags.enable_api_fields` is [`ApiFields::Alpha`].
    pub fn validate(&self, flags: &FeatureFlags) -> Result<(), ValidationError> {
        if self.metadata.name.is_empty() {
            return Err(ValidationError::Required {
                field: "metadata.name".to_string(),
            });
        }
        for trigger in &self.spec.triggers {
            trigger.validate(flags)?;
        }
        Ok(())
    }
}

// ============================================================================
// Triggers
// ============================================================================

/// The unit of event processing: interceptors + bindings + template.
///
/// A trigger is either fully inline (`template` set) or a reference to a
/// standalone [`Trigger`] object (`trigger_ref` set); referenced triggers
/// are converted to the inline form at dispatch time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventListenerTrigger {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub interceptors: Vec<InterceptorSpec>,

    #[serde(default)]
    pub bindings: Vec<TriggerBindingRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<TriggerTemplateRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

impl EventListenerTrigger {
    pub fn validate(&self, flags: &FeatureFlags) -> Result<(), ValidationError> {
        if self.template.is_none() && self.trigger_ref.is_none() {
            return Err(ValidationError::Required {
                field: "template or triggerRef".to_string(),
            });
        }
        if let Some(template) = &self.template {
            if template.name.is_empty() {
                return Err(ValidationError::Required {
                    field: "template.name".to_string(),
                });
            }
        }
        for binding in &self.bindings {
            if binding.name.is_empty() {
                return Err(ValidationError::Required {
                    field: "bindings[].name".to_string(),
                });
            }
        }
        for interceptor in &self.interceptors {
            interceptor.validate(flags)?;
        }
        Ok(())
    }
}

/// Reference from a trigger to its template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerTemplateRef {
    pub name: String,
}

/// Scope of a referenced binding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingKind {
    #[default]
    TriggerBinding,
    ClusterTriggerBinding,
}

/// Reference from a trigger to a (cluster) trigger binding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerBindingRef {
    pub name: String,

    #[serde(default)]
    pub kind: BindingKind,
}

/// A standalone trigger object referenced by name from a listener.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    pub metadata: ObjectMeta,
    pub spec: TriggerSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSpec {
    #[serde(default)]
    pub interceptors: Vec<InterceptorSpec>,

    #[serde(default)]
    pub bindings: Vec<TriggerBindingRef>,

    pub template: TriggerTemplateRef,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

impl Trigger {
    /// Convert to the inline trigger form used by the dispatcher.
    pub fn into_listener_trigger(self) -> EventListenerTrigger {
        EventListenerTrigger {
            name: self.metadata.name,
            interceptors: self.spec.interceptors,
            bindings: self.spec.bindings,
            template: Some(self.spec.template),
            trigger_ref: None,
            service_account_name: self.spec.service_account_name,
        }
    }
}

// ============================================================================
// Bindings
// ============================================================================

/// One `name = value` pair; the value may contain substitution expressions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Param {
    pub name: String,

    #[serde(default)]
    pub value: String,
}

/// Namespaced list of binding parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerBinding {
    pub metadata: ObjectMeta,
    pub spec: TriggerBindingSpec,
}

/// Cluster-scoped list of binding parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTriggerBinding {
    pub metadata: ObjectMeta,
    pub spec: TriggerBindingSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerBindingSpec {
    #[serde(default)]
    pub params: Vec<Param>,
}

// ============================================================================
// Templates
// ============================================================================

/// Declared template parameter with an optional default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamDecl {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// A document with declared params and raw JSON resource templates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerTemplate {
    pub metadata: ObjectMeta,
    pub spec: TriggerTemplateSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerTemplateSpec {
    #[serde(default)]
    pub params: Vec<ParamDecl>,

    #[serde(default)]
    pub resource_templates: Vec<Value>,
}

// ============================================================================
// Interceptor specs
// ============================================================================

/// Tagged interceptor variant: exactly one field is set.
///
/// The field-per-variant wire shape (rather than an enum tag) keeps the
/// YAML form identical to the upstream CRDs and lets unknown variants fail
/// validation instead of deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterceptorSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<ProviderInterceptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitlab: Option<ProviderInterceptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitbucket: Option<ProviderInterceptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cel: Option<CelInterceptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookInterceptor>,
}

/// Borrowed view of the active variant of an [`InterceptorSpec`].
#[derive(Debug, Clone, Copy)]
pub enum InterceptorKind<'a> {
    GitHub(&'a ProviderInterceptor),
    GitLab(&'a ProviderInterceptor),
    Bitbucket(&'a ProviderInterceptor),
    Cel(&'a CelInterceptor),
    Webhook(&'a WebhookInterceptor),
}

impl InterceptorSpec {
    /// The active variant, or `None` when no variant field is set.
    pub fn kind(&self) -> Option<InterceptorKind<'_>> {
        if let Some(github) = &self.github {
            Some(InterceptorKind::GitHub(github))
        } else if let Some(gitlab) = &self.gitlab {
            Some(InterceptorKind::GitLab(gitlab))
        } else if let Some(bitbucket) = &self.bitbucket {
            Some(InterceptorKind::Bitbucket(bitbucket))
        } else if let Some(cel) = &self.cel {
            Some(InterceptorKind::Cel(cel))
        } else if let Some(webhook) = &self.webhook {
            Some(InterceptorKind::Webhook(webhook))
        } else {
            None
        }
    }

    pub fn validate(&self, flags: &FeatureFlags) -> Result<(), ValidationError> {
        let set = [
            self.github.is_some(),
            self.gitlab.is_some(),
            self.bitbucket.is_some(),
            self.cel.is_some(),
            self.webhook.is_some(),
        ]
        .iter()
        .filter(|s| **s)
        .count();

        if set != 1 {
            return Err(ValidationError::Invalid {
                field: "interceptors[]".to_string(),
                message: format!("exactly one interceptor variant must be set, found {}", set),
            });
        }

        if let Some(webhook) = &self.webhook {
            if flags.enable_api_fields != ApiFields::Alpha {
                return Err(ValidationError::Invalid {
                    field: "interceptors[].webhook".to_string(),
                    message: "webhook interceptors require enable-api-fields: alpha".to_string(),
                });
            }
            webhook.client_config.validate()?;
        }

        if let Some(cel) = &self.cel {
            for overlay in &cel.overlays {
                if overlay.key.is_empty() {
                    return Err(ValidationError::Required {
                        field: "cel.overlays[].key".to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Spec shared by the github, gitlab, and bitbucket variants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInterceptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_types: Option<Vec<String>>,
}

/// Name/key pair locating an HMAC secret in the resource store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    pub secret_name: String,
    pub secret_key: String,

    /// Overrides the trigger's namespace when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// CEL interceptor spec: a boolean filter and/or extension overlays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CelInterceptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    #[serde(default)]
    pub overlays: Vec<Overlay>,
}

/// One overlay: evaluate `expression` and set the result at `key` in the
/// extensions map (`key` may be a dotted path).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Overlay {
    pub key: String,
    pub expression: String,
}

/// Webhook interceptor spec: delegate to an external HTTP service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookInterceptor {
    pub client_config: ClientConfig,
}

/// How to reach an external interceptor service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceRef>,

    /// Base64-encoded PEM bundle anchoring TLS trust for the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.url.is_none() && self.service.is_none() {
            return Err(ValidationError::Required {
                field: "clientConfig.url or clientConfig.service".to_string(),
            });
        }
        if let Some(service) = &self.service {
            if service.name.is_empty() {
                return Err(ValidationError::Required {
                    field: "clientConfig.service.name".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Resolve the URL to call, defaulting the service namespace to
    /// `default_namespace` and the port to [`DEFAULT_SERVICE_PORT`].
    pub fn resolve_url(&self, default_namespace: &str) -> Result<String, ValidationError> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        let service = self.service.as_ref().ok_or(ValidationError::Required {
            field: "clientConfig.url or clientConfig.service".to_string(),
        })?;

        let namespace = service
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(default_namespace);
        let port = service.port.unwrap_or(DEFAULT_SERVICE_PORT);
        let path = service
            .path
            .as_deref()
            .map(|p| {
                if p.starts_with('/') {
                    p.to_string()
                } else {
                    format!("/{}", p)
                }
            })
            .unwrap_or_default();

        Ok(format!(
            "http://{}.{}.svc:{}{}",
            service.name, namespace, port, path
        ))
    }
}

/// In-cluster service reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRef {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

// ============================================================================
// TriggerStore
// ============================================================================

/// Lookup of declarative objects by namespace and name.
///
/// Implemented by the service's file-backed static store in this workspace
/// and by a cluster-backed store in a real deployment.
#[async_trait]
pub trait TriggerStore: Send + Sync {
    async fn event_listener(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<EventListener, LookupError>;

    async fn trigger(&self, namespace: &str, name: &str) -> Result<Trigger, LookupError>;

    async fn trigger_binding(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<TriggerBinding, LookupError>;

    async fn cluster_trigger_binding(
        &self,
        name: &str,
    ) -> Result<ClusterTriggerBinding, LookupError>;

    async fn trigger_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<TriggerTemplate, LookupError>;
}
