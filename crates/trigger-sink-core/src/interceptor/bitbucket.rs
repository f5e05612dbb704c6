//! Bitbucket provider interceptor.
//!
//! Bitbucket signs the body with HMAC-SHA1 in `X-Hub-Signature` like GitHub
//! but reports the event type through `X-Event-Key`.

use super::github::verify_hmac_sha1;
use super::{header_value, Code, Interceptor, InterceptorRequest, InterceptorResponse};
use crate::config::SecretRef;
use crate::parse_trigger_id;
use async_trait::async_trait;
use resource_store::SecretReader;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[cfg(test)]
#[path = "bitbucket_tests.rs"]
mod tests;

/// Header carrying the HMAC-SHA1 signature of the body.
const SIGNATURE_HEADER: &str = "X-Hub-Signature";

/// Header carrying the event key.
const EVENT_TYPE_HEADER: &str = "X-Event-Key";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Params {
    #[serde(default)]
    secret_ref: Option<SecretRef>,

    #[serde(default)]
    event_types: Option<Vec<String>>,
}

pub struct BitbucketInterceptor {
    secrets: Arc<dyn SecretReader>,
}

impl BitbucketInterceptor {
    pub fn new(secrets: Arc<dyn SecretReader>) -> Self {
        Self { secrets }
    }
}

#[async_trait]
impl Interceptor for BitbucketInterceptor {
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
