//! Tests for resource creation.

use super::*;
use resource_store::{AccessRule, ApiResource, InMemoryStore};
use serde_json::json;

fn store_with_pipeline_runs() -> InMemoryStore {
    let store = InMemoryStore::new();
    store.register_kind(
        "tekton.dev/v1beta1",
        "PipelineRun",
        ApiResource {
            group: "tekton.dev".to_string(),
            version: "v1beta1".to_string(),
            resource: "pipelineruns".to_string(),
            namespaced: true,
        },
    );
    store
}

fn document(value: serde_json::Value) -> String {
    value.to_string()
}

async fn create(
    store: &InMemoryStore,
    service_account: Option<&str>,
    documents: Vec<String>,
) -> Result<(), CreateError> {
    create_resources(
        store,
        store,
        store,
        "default",
        "listener",
        "on-push",
        "abc12",
        service_account,
        documents,
    )
    .await
}

#[tokio::test]
async fn test_create_adds_identity_labels() {
    let store = store_with_pipeline_runs();
    create(
        &store,
        None,
        vec![document(json!({
            "apiVersion": "tekton.dev/v1beta1",
            "kind": "PipelineRun",
            "metadata": {"name": "run-1", "labels": {"team": "ci"}},
        }))],
    )
    .await
    .unwrap();

    let created = store.created_objects();
    assert_eq!(created.len(), 1);
    let labels = &created[0].object["metadata"]["labels"];
    assert_eq!(labels["team"], "ci");
    assert_eq!(labels[LEGACY_LISTENER_LABEL], "listener");
    assert_eq!(labels[LISTENER_LABEL], "listener");
    assert_eq!(labels[TRIGGER_LABEL], "on-push");
    assert_eq!(labels[EVENT_ID_LABEL], "abc12");
}

#[tokio::test]
async fn test_generate_name_is_accepted() {
    let store = store_with_pipeline_runs();
    create(
        &store,
        None,
        vec![document(json!({
            "apiVersion": "tekton.dev/v1beta1",
            "kind": "PipelineRun",
            "metadata": {"generateName": "run-"},
        }))],
    )
    .await
    .unwrap();
    assert_eq!(store.created_objects().len(), 1);
}

#[tokio::test]
async fn test_missing_name_and_generate_name_is_invalid() {
    let store = store_with_pipeline_runs();
    let err = create(
        &store,
        None,
        vec![document(json!({
            "apiVersion": "tekton.dev/v1beta1",
            "kind": "PipelineRun",
            "metadata": {},
        }))],
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CreateError::Invalid { .. }));
    assert_eq!(err.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_missing_kind_is_invalid() {
    let store = store_with_pipeline_runs();
    let err = create(
        &store,
        None,
        vec![document(json!({
            "apiVersion": "tekton.dev/v1beta1",
            "metadata": {"name": "run-1"},
        }))],
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CreateError::Invalid { .. }));
}

#[tokio::test]
async fn test_non_json_document_is_invalid() {
    let store = store_with_pipeline_runs();
    let err = create(&store, None, vec!["{not json".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, CreateError::Invalid { .. }));
}

#[tokio::test]
async fn test_unregistered_kind_is_unknown() {
    let store = store_with_pipeline_runs();
    let err = create(
        &store,
        None,
        vec![document(json!({
            "apiVersion": "example.dev/v1",
            "kind": "Mystery",
            "metadata": {"name": "x"},
        }))],
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CreateError::UnknownKind { .. }));
    assert_eq!(err.status(), StatusCode::ACCEPTED);
    assert!(store.created_objects().is_empty());
}

#[tokio::test]
async fn test_service_account_scopes_the_create() {
    let store = store_with_pipeline_runs();
    store.register_service_account("default", "deployer", AccessRule::Allow);

    create(
        &store,
        Some("deployer"),
        vec![document(json!({
            "apiVersion": "tekton.dev/v1beta1",
            "kind": "PipelineRun",
            "metadata": {"name": "run-1"},
        }))],
    )
    .await
    .unwrap();

    let created = store.created_objects();
    assert_eq!(created[0].service_account.as_deref(), Some("deployer"));
}

#[tokio::test]
async fn test_forbidden_service_account_maps_to_403() {
    let store = store_with_pipeline_runs();
    store.register_service_account("default", "reader", AccessRule::Forbid);

    let err = create(
        &store,
        Some("reader"),
        vec![document(json!({
            "apiVersion": "tekton.dev/v1beta1",
            "kind": "PipelineRun",
            "metadata": {"name": "run-1"},
        }))],
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unknown_service_account_maps_to_401() {
    let store = store_with_pipeline_runs();

    let err = create(
        &store,
        Some("ghost"),
        vec![document(json!({
            "apiVersion": "tekton.dev/v1beta1",
            "kind": "PipelineRun",
            "metadata": {"name": "run-1"},
        }))],
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_empty_service_account_uses_sink_identity() {
    let store = store_with_pipeline_runs();
    create(
        &store,
        Some(""),
        vec![document(json!({
            "apiVersion": "tekton.dev/v1beta1",
            "kind": "PipelineRun",
            "metadata": {"name": "run-1"},
        }))],
    )
    .await
    .unwrap();
    assert_eq!(store.created_objects()[0].service_account, None);
}

#[tokio::test]
async fn test_first_failure_stops_the_batch() {
    let store = store_with_pipeline_runs();
    let err = create(
        &store,
        None,
        vec![
            document(json!({
                "apiVersion": "example.dev/v1",
                "kind": "Mystery",
                "metadata": {"name": "x"},
            })),
            document(json!({
                "apiVersion": "tekton.dev/v1beta1",
                "kind": "PipelineRun",
                "metadata": {"name": "run-1"},
            })),
        ],
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CreateError::UnknownKind { .. }));
    assert!(store.created_objects().is_empty());
}
