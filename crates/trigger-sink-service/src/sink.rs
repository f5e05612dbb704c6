//! Event dispatch: fan-out to triggers and response aggregation.
//!
//! One accepted HTTP event spawns an independent worker per configured
//! trigger. Workers run the full pipeline (trigger-ref resolution,
//! interceptor chain, template resolution, resource creation) and report a
//! single status code each; the dispatcher reduces the codes into one HTTP
//! response.

use crate::resources::{create_resources, CreateError};
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use resource_store::{
    AuthOverride, CachingSecretReader, DiscoveryClient, ResourceClient, SecretReader,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use trigger_sink_core::config::{EventListenerTrigger, LookupError, TriggerStore};
use trigger_sink_core::interceptor::{ChainError, Code, EventHeaders, InterceptorChain};
use trigger_sink_core::template::{
    resolve_params, resolve_resources, resolve_trigger, ResolveError,
};
use trigger_sink_core::EventId;

#[cfg(test)]
#[path = "sink_tests.rs"]
mod tests;

/// Maximum event body size read into memory.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// JSON body of every sink response.
#[derive(Debug, Serialize)]
pub struct SinkResponse {
    #[serde(rename = "eventListener")]
    pub event_listener: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(rename = "eventID", skip_serializing_if = "String::is_empty")]
    pub event_id: String,
}

/// Processes incoming events for one event listener.
pub struct EventSink {
    pub trigger_store: Arc<dyn TriggerStore>,
    pub resource_client: Arc<dyn ResourceClient>,
    pub discovery: Arc<dyn DiscoveryClient>,
    pub secrets: Arc<dyn SecretReader>,
    pub auth: Arc<dyn AuthOverride>,
    pub http_client: reqwest::Client,
    pub listener_name: String,
    pub listener_namespace: String,
}

impl EventSink {
    /// Process one incoming HTTP event.
    ///
    /// Infrastructure failures (listener lookup, body read, response
    /// encoding) are the only paths that return 500; per-trigger failures
    /// degrade to 202 or surface as 401/403 through aggregation.
    pub async fn handle_event(self: Arc<Self>, request: Request) -> Response {
        let listener = match self
            .trigger_store
            .event_listener(&self.listener_namespace, &self.listener_name)
            .await
        {
            Ok(listener) => listener,
            Err(err) => {
                error!(
                    eventlistener = %self.listener_name,
                    namespace = %self.listener_namespace,
                    error = %err,
                    "error getting event listener"
                );
                return empty_response(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        let (parts, body) = request.into_parts();
        let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
            Ok(body) => body,
            Err(err) => {
                error!(error = %err, "error reading event body");
                return empty_response(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        let event_id = EventId::new();
        let event_url = parts.uri.to_string();
        let header = event_headers(&parts.headers);

        debug!(
            eventlistener = %self.listener_name,
            namespace = %self.listener_namespace,
            eventid = %event_id,
            "handling event"
        );

        let triggers = listener.spec.triggers;
        let capacity = triggers.len().max(1);
        let (tx, mut rx) = mpsc::channel::<StatusCode>(capacity);

        // One secret cache per event; every worker of this event shares it.
        let secrets: Arc<dyn SecretReader> =
            Arc::new(CachingSecretReader::new(self.secrets.clone()));
        let chain = Arc::new(InterceptorChain::new(
            secrets,
            self.http_client.clone(),
            self.listener_namespace.clone(),
        ));

        let trigger_count = triggers.len();
        for trigger in triggers {
            let sink = self.clone();
            let chain = chain.clone();
            let tx = tx.clone();
            let body = body.clone();
            let header = header.clone();
            let event_id = event_id.clone();
            let event_url = event_url.clone();

            tokio::spawn(async move {
                let code = sink
                    .process_trigger(trigger, &chain, &event_url, &event_id, body, &header)
                    .await;
                // The channel has a slot per worker; a send only fails when
                // aggregation short-circuited and dropped the receiver.
                let _ = tx.send(code).await;
            });
        }
        drop(tx);

        // At least one created resource wins 201 over 202; an authorization
        // failure is adopted immediately and the remaining outcomes are
        // discarded (their workers keep running in the background).
        let mut code = StatusCode::ACCEPTED;
        for _ in 0..trigger_count {
            let Some(this_code) = rx.recv().await else {
                break;
            };
            if this_code == StatusCode::UNAUTHORIZED || this_code == StatusCode::FORBIDDEN {
                code = this_code;
                break;
            }
            if this_code.as_u16() < code.as_u16() {
                code = this_code;
            }
        }

        let response_body = SinkResponse {
            event_listener: self.listener_name.clone(),
            namespace: self.listener_namespace.clone(),
            event_id: event_id.to_string(),
        };
        let encoded = match serde_json::to_vec(&response_body) {
            Ok(encoded) => encoded,
            Err(err) => {
                error!(eventid = %event_id, error = %err, "failed to encode sink response");
                return empty_response(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        match Response::builder()
            .status(code)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(encoded))
        {
            Ok(response) => response,
            Err(err) => {
                error!(eventid = %event_id, error = %err, "failed to write sink response");
                empty_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// Run the full pipeline for one trigger and map the outcome to the
    /// status code reported to the aggregator.
    async fn process_trigger(
        &self,
        trigger: EventListenerTrigger,
        chain: &InterceptorChain,
        event_url: &str,
        event_id: &EventId,
        body: Bytes,
        header: &EventHeaders,
    ) -> StatusCode {
        let trigger_name = trigger.name.clone();
        match self
            .run_trigger(trigger, chain, event_url, event_id, body, header)
            .await
        {
            Ok(()) => StatusCode::CREATED,
            Err(err) => {
                info!(
                    eventlistener = %self.listener_name,
                    eventid = %event_id,
                    trigger = %trigger_name,
                    error = %err,
                    "trigger processing failed"
                );
                err.status()
            }
        }
    }

    async fn run_trigger(
        &self,
        trigger: EventListenerTrigger,
        chain: &InterceptorChain,
        event_url: &str,
        event_id: &EventId,
        body: Bytes,
        header: &EventHeaders,
    ) -> Result<(), TriggerError> {
        // A referenced trigger is fetched and flattened into the inline form.
        let trigger = if trigger.template.is_none() && trigger.trigger_ref.is_some() {
            let name = trigger.trigger_ref.as_deref().unwrap_or_default();
            self.trigger_store
                .trigger(&self.listener_namespace, name)
                .await?
                .into_listener_trigger()
        } else {
            trigger
        };

        let output = chain
            .execute(&trigger, event_url, event_id.as_str(), body, header)
            .await?;

        let resolved = resolve_trigger(&trigger, &self.listener_namespace, &*self.trigger_store)
            .await?;
        let params = resolve_params(&resolved, &output.body, &output.header, &output.extensions)?;
        debug!(
            eventid = %event_id,
            trigger = %trigger.name,
            params = ?params,
            "resolved params"
        );
        let rendered = resolve_resources(&resolved.template, &params)?;

        create_resources(
            &*self.resource_client,
            &*self.discovery,
            &*self.auth,
            &self.listener_namespace,
            &self.listener_name,
            &trigger.name,
            event_id.as_str(),
            trigger.service_account_name.as_deref(),
            rendered,
        )
        .await?;
        Ok(())
    }
}

/// Per-trigger pipeline failures with their aggregation status codes.
#[derive(Debug, thiserror::Error)]
enum TriggerError {
    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Create(#[from] CreateError),
}

impl TriggerError {
    /// Authorization failures short-circuit aggregation; everything else
    /// means the event was accepted but produced nothing for this trigger.
    fn status(&self) -> StatusCode {
        match self {
            Self::Chain(err) => match err.status().map(|status| status.code) {
                Some(Code::Unauthenticated) => StatusCode::UNAUTHORIZED,
                Some(Code::PermissionDenied) => StatusCode::FORBIDDEN,
                _ => StatusCode::ACCEPTED,
            },
            Self::Create(err) => err.status(),
            Self::Lookup(_) | Self::Resolve(_) => StatusCode::ACCEPTED,
        }
    }
}

/// Collect HTTP headers into the multi-value map interceptors and the
/// resolver consume. Non-UTF-8 header values are dropped.
pub fn event_headers(headers: &HeaderMap) -> EventHeaders {
    let mut map = EventHeaders::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            map.entry(name.as_str().to_string())
                .or_default()
                .push(value.to_string());
        }
    }
    map
}

fn empty_response(code: StatusCode) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = code;
    response
}
