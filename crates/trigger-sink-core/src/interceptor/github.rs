//! GitHub provider interceptor.
//!
//! Verifies the `X-Hub-Signature` HMAC-SHA1 digest against a referenced
//! store secret and filters on the `X-GitHub-Event` type header.

use super::{
    header_value, Code, Interceptor, InterceptorRequest, InterceptorResponse,
};
use crate::config::SecretRef;
use crate::parse_trigger_id;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use resource_store::SecretReader;
use serde::Deserialize;
use serde_json::Value;
use sha1::Sha1;
use std::sync::Arc;

#[cfg(test)]
#[path = "github_tests.rs"]
mod tests;

/// Header carrying the HMAC-SHA1 signature of the body.
const SIGNATURE_HEADER: &str = "X-Hub-Signature";

/// Header carrying the event type.
const EVENT_TYPE_HEADER: &str = "X-GitHub-Event";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Params {
    #[serde(default)]
    secret_ref: Option<SecretRef>,

    #[serde(default)]
    event_types: Option<Vec<String>>,
}

pub struct GithubInterceptor {
    secrets: Arc<dyn SecretReader>,
}

impl GithubInterceptor {
    pub fn new(secrets: Arc<dyn SecretReader>) -> Self {
        Self { secrets }
    }
}

#[async_trait]
impl Interceptor for GithubInterceptor {
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

        if let Some(secret_ref) = &params.secret_ref {
            let signature = match header_value(&request.header, SIGNATURE_HEADER) {
                Some(value) if !value.is_empty() => value.to_string(),
                _ => {
                    return InterceptorResponse::stop(
                        Code::InvalidArgument,
                        format!("no {} header set", SIGNATURE_HEADER),
                    )
                }
            };

            let (trigger_namespace, _) =
                parse_trigger_id(&request.context.trigger_id).unwrap_or_default();
            let namespace = secret_ref.namespace.as_deref().unwrap_or(trigger_namespace);

            let secret = match self
                .secrets
                .secret(namespace, &secret_ref.secret_name, &secret_ref.secret_key)
                .await
            {
                Ok(secret) => secret,
                Err(err) => {
                    return InterceptorResponse::stop(
                        Code::Internal,
                        format!("error getting secret: {}", err),
                    )
                }
            };

            if let Err(response) =
                verify_hmac_sha1(&request.body, &signature, &secret, SIGNATURE_HEADER)
            {
                return response;
            }
        }

        if let Some(event_types) = &params.event_types {
            let actual = header_value(&request.header, EVENT_TYPE_HEADER).unwrap_or("");
            if !event_types.iter().any(|allowed| allowed == actual) {
                return InterceptorResponse::stop(
                    Code::FailedPrecondition,
                    format!("event type {} is not allowed", actual),
                );
            }
        }

        InterceptorResponse::proceed()
    }
}

/// Verify a `sha1=<hex>` HMAC-SHA1 signature over `body`.
///
/// The comparison runs in constant time via the MAC verification itself.
pub(super) fn verify_hmac_sha1(
    body: &[u8],
    signature: &str,
    secret: &[u8],
    header_name: &str,
) -> Result<(), InterceptorResponse> {
    type HmacSha1 = Hmac<Sha1>;

    let hex_sig = signature.strip_prefix("sha1=").unwrap_or(signature);
    let sig_bytes = hex::decode(hex_sig).map_err(|_| {
        InterceptorResponse::stop(
            Code::InvalidArgument,
            format!("{} is not valid hex", header_name),
        )
    })?;

    let mut mac = HmacSha1::new_from_slice(secret).map_err(|_| {
        InterceptorResponse::stop(Code::Internal, "secret cannot be used as an HMAC key")
    })?;
    mac.update(body);

    mac.verify_slice(&sig_bytes).map_err(|_| {
        InterceptorResponse::stop(
            Code::Unauthenticated,
            format!("{} does not match event body", header_name),
        )
    })
}
