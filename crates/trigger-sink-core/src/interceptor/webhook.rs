//! Webhook interceptor: delegate to an external HTTP service.
//!
//! The oldest interceptor convention. The chain POSTs the current body and
//! headers to the configured URL; the response body and headers become the
//! chain's next body and headers, so external services can rewrite the
//! event wholesale.

use super::{EventHeaders, InterceptorRequest};
use crate::config::{ClientConfig, ValidationError};
use base64::Engine;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

#[cfg(test)]
#[path = "webhook_tests.rs"]
mod tests;

/// Failures of the webhook calling convention.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("invalid webhook interceptor config: {0}")]
    Config(#[from] ValidationError),

    #[error("invalid caBundle: {message}")]
    CaBundle { message: String },

    #[error("webhook interceptor request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook interceptor returned status {status}")]
    Failed { status: u16 },
}

/// POST the event to the interceptor service and return the replacement
/// body and headers.
///
/// A `ca_bundle` in the config pins TLS trust for this call to the bundled
/// certificates; such calls use a dedicated client instead of the shared
/// one.
pub(super) async fn call(
    client: &reqwest::Client,
    config: &ClientConfig,
    namespace: &str,
    request: &InterceptorRequest,
) -> Result<(Bytes, EventHeaders), WebhookError> {
    let url = config.resolve_url(namespace)?;

    let pinned;
    let client = match &config.ca_bundle {
        Some(bundle) => {
            pinned = pinned_client(bundle)?;
            &pinned
        }
        None => client,
    };

    debug!(url = %url, "calling webhook interceptor");

    let response = client
        .post(&url)
        .headers(to_header_map(&request.header))
        .body(request.body.clone())
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(WebhookError::Failed {
            status: status.as_u16(),
        });
    }

    let header = from_header_map(response.headers());
    let body = response.bytes().await?;
    Ok((body, header))
}

fn pinned_client(ca_bundle: &str) -> Result<reqwest::Client, WebhookError> {
    let pem = base64::engine::general_purpose::STANDARD
        .decode(ca_bundle)
        .map_err(|err| WebhookError::CaBundle {
            message: err.to_string(),
        })?;
    let certificate =
        reqwest::Certificate::from_pem(&pem).map_err(|err| WebhookError::CaBundle {
            message: err.to_string(),
        })?;

    reqwest::Client::builder()
        .add_root_certificate(certificate)
        .build()
        .map_err(WebhookError::Request)
}

/// Event headers carry arbitrary names and values; entries that are not
/// representable as HTTP headers are skipped rather than failing the call.
fn to_header_map(headers: &EventHeaders) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, values) in headers {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                map.append(name.clone(), value);
            }
        }
    }
    map
}

fn from_header_map(headers: &HeaderMap) -> EventHeaders {
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
