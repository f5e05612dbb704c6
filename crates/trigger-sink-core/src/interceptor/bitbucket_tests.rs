//! Tests for the Bitbucket interceptor.

use super::*;
use crate::config::{InterceptorSpec, ProviderInterceptor};
use crate::interceptor::{interceptor_params, Code, EventHeaders, TriggerContext};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use resource_store::InMemoryStore;
use sha1::Sha1;

const SECRET: &[u8] = b"bitbucket-hook-secret";

fn sign(body: &[u8], secret: &[u8]) -> String {
    type HmacSha1 = Hmac<Sha1>;
    let mut mac = HmacSha1::new_from_slice(secret).unwrap();
    mac.update(body);
    format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
}

fn secrets() -> Arc<InMemoryStore> {
    let store = InMemoryStore::new();
    store.put_secret("default", "hook", "token", SECRET.to_vec());
    Arc::new(store)
}

fn spec(secret_ref: bool, event_types: Option<Vec<&str>>) -> InterceptorSpec {
    InterceptorSpec {
        bitbucket: Some(ProviderInterceptor {
            secret_ref: secret_ref.then(|| SecretRef {
                secret_name: "hook".to_string(),
                secret_key: "token".to_string(),
                namespace: None,
            }),
            event_types: event_types
                .map(|types| types.into_iter().map(str::to_string).collect()),
        }),
        ..Default::default()
    }
}

fn request(
    body: &[u8],
    headers: &[(&str, &str)],
    spec: &InterceptorSpec,
) -> InterceptorRequest {
    let header: EventHeaders = headers
        .iter()
        .map(|(name, value)| (name.to_string(), vec![value.to_string()]))
        .collect();
    InterceptorRequest {
        body: Bytes::copy_from_slice(body),
        header,
        extensions: serde_json::Map::new(),
        interceptor_params: interceptor_params(spec),
        context: TriggerContext {
            event_url: "http://sink.example.com/".to_string(),
            event_id: "abc12".to_string(),
            trigger_id: "namespaces/default/triggers/on-push".to_string(),
        },
    }
}

#[tokio::test]
async fn test_valid_signature_continues() {
    let body = br#"{"push": {}}"#;
    let spec = spec(true, None);
    let signature = sign(body, SECRET);

    let response = BitbucketInterceptor::new(secrets())
        .process(&request(body, &[("X-Hub-Signature", &signature)], &spec))
        .await;
    assert!(response.continue_);
}

#[tokio::test]
async fn test_signature_mismatch_is_unauthenticated() {
    let body = br#"{"push": {}}"#;
    let spec = spec(true, None);
    let signature = sign(body, b"not-the-secret");

    let response = BitbucketInterceptor::new(secrets())
        .process(&request(body, &[("X-Hub-Signature", &signature)], &spec))
        .await;

    assert!(!response.continue_);
    assert_eq!(response.status.unwrap().code, Code::Unauthenticated);
}

#[tokio::test]
async fn test_missing_signature_header_is_invalid_argument() {
    let spec = spec(true, None);
    let response = BitbucketInterceptor::new(secrets())
        .process(&request(b"{}", &[], &spec))
        .await;

    assert!(!response.continue_);
    assert_eq!(response.status.unwrap().code, Code::InvalidArgument);
}

#[tokio::test]
async fn test_event_key_filter() {
    let spec = spec(false, Some(vec!["repo:push"]));

    let allowed = BitbucketInterceptor::new(secrets())
        .process(&request(b"{}", &[("X-Event-Key", "repo:push")], &spec))
        .await;
    assert!(allowed.continue_);

    let rejected = BitbucketInterceptor::new(secrets())
        .process(&request(b"{}", &[("X-Event-Key", "pullrequest:created")], &spec))
        .await;
    assert!(!rejected.continue_);
    assert_eq!(rejected.status.unwrap().code, Code::FailedPrecondition);
}
