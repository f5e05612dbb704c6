//! # Interceptor Chain
//!
//! Interceptors authenticate, filter, and enrich an event before template
//! resolution. Each trigger carries an ordered list of interceptor specs;
//! the chain runs them in declaration order and stops at the first one that
//! does not continue.
//!
//! Two calling conventions exist:
//!
//! - the provider and CEL variants implement [`Interceptor::process`] and
//!   receive an [`InterceptorRequest`] carrying the event plus their
//!   canonicalized parameters;
//! - the webhook variant predates that contract and is called over HTTP:
//!   the event is POSTed to the configured service and the response
//!   replaces the chain's body and headers.

use crate::config::{EventListenerTrigger, InterceptorKind, InterceptorSpec};
use async_trait::async_trait;
use bytes::Bytes;
use resource_store::SecretReader;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

pub mod bitbucket;
pub mod cel;
pub mod github;
pub mod gitlab;
pub mod webhook;

pub use bitbucket::BitbucketInterceptor;
pub use cel::CelEvaluator;
pub use github::GithubInterceptor;
pub use gitlab::GitlabInterceptor;

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

/// HTTP headers of the incoming event, preserving multiple values per name.
pub type EventHeaders = HashMap<String, Vec<String>>;

/// First value of `name` in `headers`, looked up case-insensitively.
pub fn header_value<'a>(headers: &'a EventHeaders, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, values)| values.first())
        .map(String::as_str)
}

/// Constant-time byte comparison to prevent timing attacks.
///
/// Length differences return `false` immediately; token length is not
/// secret here.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

// ============================================================================
// Wire types
// ============================================================================

/// Identity of the event and trigger an interceptor runs for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerContext {
    /// URL the event arrived on.
    #[serde(rename = "eventURL")]
    pub event_url: String,

    /// Unique ID assigned to the event by the sink.
    #[serde(rename = "eventID")]
    pub event_id: String,

    /// `namespaces/<ns>/triggers/<name>` of the processing trigger.
    #[serde(rename = "triggerID")]
    pub trigger_id: String,
}

/// Request handed to each interceptor in the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterceptorRequest {
    /// The event body bytes; shared read-only across the chain.
    pub body: Bytes,

    /// Event headers as delivered, cloned per trigger.
    pub header: EventHeaders,

    /// Extensions accumulated from earlier interceptors in the chain.
    pub extensions: Map<String, Value>,

    /// Parameters of the interceptor currently being invoked.
    pub interceptor_params: Map<String, Value>,

    pub context: TriggerContext,
}

/// Status codes interceptors use to explain a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Code {
    /// The request is malformed for this interceptor.
    InvalidArgument,
    /// The event does not satisfy a configured precondition.
    FailedPrecondition,
    /// The event failed authentication (signature or token mismatch).
    Unauthenticated,
    /// The event is authenticated but not permitted.
    PermissionDenied,
    /// The interceptor itself failed.
    Internal,
}

/// Code plus human-readable message for a chain stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptorStatus {
    pub code: Code,
    pub message: String,
}

impl InterceptorStatus {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for InterceptorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

/// Outcome of one interceptor invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterceptorResponse {
    /// Whether the chain should keep processing the trigger.
    #[serde(rename = "continue")]
    pub continue_: bool,

    /// Extensions to merge into the chain accumulator, last write wins.
    #[serde(default)]
    pub extensions: Map<String, Value>,

    /// Present when `continue` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<InterceptorStatus>,
}

impl InterceptorResponse {
    /// Continue with no extensions.
    pub fn proceed() -> Self {
        Self {
            continue_: true,
            extensions: Map::new(),
            status: None,
        }
    }

    /// Continue and merge `extensions` into the chain.
    pub fn proceed_with(extensions: Map<String, Value>) -> Self {
        Self {
            continue_: true,
            extensions,
            status: None,
        }
    }

    /// Stop the chain with the given status.
    pub fn stop(code: Code, message: impl Into<String>) -> Self {
        Self {
            continue_: false,
            extensions: Map::new(),
            status: Some(InterceptorStatus::new(code, message)),
        }
    }
}

/// One stage of the chain.
///
/// Implementations read their configuration from
/// [`InterceptorRequest::interceptor_params`] and may perform I/O (secret
/// fetches); they never mutate the event body or headers.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn process(&self, request: &InterceptorRequest) -> InterceptorResponse;
}

// ============================================================================
// Parameter canonicalization
// ============================================================================

/// Flatten an interceptor spec into the parameter map its implementation
/// receives. Only non-empty fields are populated; the webhook variant gets
/// an empty map because it is called over the legacy HTTP path.
pub fn interceptor_params(spec: &InterceptorSpec) -> Map<String, Value> {
    let mut params = Map::new();

    let provider = match spec.kind() {
        Some(InterceptorKind::GitHub(p))
        | Some(InterceptorKind::GitLab(p))
        | Some(InterceptorKind::Bitbucket(p)) => Some(p),
        Some(InterceptorKind::Cel(cel)) => {
            if let Some(filter) = &cel.filter {
                if !filter.is_empty() {
                    params.insert("filter".to_string(), Value::String(filter.clone()));
                }
            }
            if !cel.overlays.is_empty() {
                if let Ok(overlays) = serde_json::to_value(&cel.overlays) {
                    params.insert("overlays".to_string(), overlays);
                }
            }
            None
        }
        Some(InterceptorKind::Webhook(_)) | None => None,
    };

    if let Some(provider) = provider {
        if let Some(event_types) = &provider.event_types {
            if let Ok(value) = serde_json::to_value(event_types) {
                params.insert("eventTypes".to_string(), value);
            }
        }
        if let Some(secret_ref) = &provider.secret_ref {
            if let Ok(value) = serde_json::to_value(secret_ref) {
                params.insert("secretRef".to_string(), value);
            }
        }
    }

    params
}

// ============================================================================
// Chain execution
// ============================================================================

/// Final event state after a chain ran to completion.
#[derive(Debug, Clone)]
pub struct ChainOutput {
    pub body: Bytes,
    pub header: EventHeaders,
    pub extensions: Map<String, Value>,
}

/// Failures that end a trigger's chain.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// An interceptor responded with `continue: false`.
    #[error("interceptor stopped the trigger: {0}")]
    Stopped(InterceptorStatus),

    /// A spec with no recognizable variant tag.
    #[error("unknown interceptor variant")]
    UnknownVariant,

    /// The legacy webhook call failed.
    #[error(transparent)]
    Webhook(#[from] webhook::WebhookError),
}

impl ChainError {
    /// The stop status, when the chain was stopped by an interceptor.
    pub fn status(&self) -> Option<&InterceptorStatus> {
        match self {
            Self::Stopped(status) => Some(status),
            _ => None,
        }
    }
}

/// Runs a trigger's interceptors in declaration order.
pub struct InterceptorChain {
    secrets: Arc<dyn SecretReader>,
    http_client: reqwest::Client,
    namespace: String,
}

impl InterceptorChain {
    /// `namespace` is the listener namespace; it scopes secret lookups and
    /// service references that do not name their own namespace.
    pub fn new(
        secrets: Arc<dyn SecretReader>,
        http_client: reqwest::Client,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            secrets,
            http_client,
            namespace: namespace.into(),
        }
    }

    /// Run the chain for `trigger` against the event.
    ///
    /// With no interceptors configured, the event passes through unchanged
    /// with empty extensions.
    ///
    /// # Errors
    ///
    /// - [`ChainError::Stopped`] when an interceptor rejects the event
    /// - [`ChainError::Webhook`] when a webhook interceptor call fails
    /// - [`ChainError::UnknownVariant`] for specs with no variant tag
    pub async fn execute(
        &self,
        trigger: &EventListenerTrigger,
        event_url: &str,
        event_id: &str,
        body: Bytes,
        header: &EventHeaders,
    ) -> Result<ChainOutput, ChainError> {
        if trigger.interceptors.is_empty() {
            return Ok(ChainOutput {
                body,
                header: header.clone(),
                extensions: Map::new(),
            });
        }

        let mut request = InterceptorRequest {
            body,
            header: header.clone(),
            extensions: Map::new(),
            interceptor_params: Map::new(),
            context: TriggerContext {
                event_url: event_url.to_string(),
                event_id: event_id.to_string(),
                trigger_id: crate::trigger_id(&self.namespace, &trigger.name),
            },
        };

        for spec in &trigger.interceptors {
            match spec.kind() {
                None => return Err(ChainError::UnknownVariant),

                // Legacy convention: the response becomes the next body and
                // headers, chaining requests through the external service.
                Some(InterceptorKind::Webhook(webhook_spec)) => {
                    let (body, header) = webhook::call(
                        &self.http_client,
                        &webhook_spec.client_config,
                        &self.namespace,
                        &request,
                    )
                    .await?;
                    request.body = body;
                    request.header = header;
                }

                Some(kind) => {
                    request.interceptor_params = interceptor_params(spec);

                    let response = match kind {
                        InterceptorKind::GitHub(_) => {
                            GithubInterceptor::new(self.secrets.clone())
                                .process(&request)
                                .await
                        }
                        InterceptorKind::GitLab(_) => {
                            GitlabInterceptor::new(self.secrets.clone())
                                .process(&request)
                                .await
                        }
                        InterceptorKind::Bitbucket(_) => {
                            BitbucketInterceptor::new(self.secrets.clone())
                                .process(&request)
                                .await
                        }
                        InterceptorKind::Cel(_) => {
                            CelEvaluator::new().process(&request).await
                        }
                        InterceptorKind::Webhook(_) => unreachable!("handled above"),
                    };

                    if !response.continue_ {
                        let status = response.status.unwrap_or_else(|| {
                            InterceptorStatus::new(
                                Code::Internal,
                                "interceptor stopped without a status",
                            )
                        });
                        info!(
                            trigger = %trigger.name,
                            status = %status,
                            "interceptor response not continue"
                        );
                        return Err(ChainError::Stopped(status));
                    }

                    for (key, value) in response.extensions {
                        request.extensions.insert(key, value);
                    }
                    request.interceptor_params = Map::new();
                }
            }
        }

        Ok(ChainOutput {
            body: request.body,
            header: request.header,
            extensions: request.extensions,
        })
    }
}
