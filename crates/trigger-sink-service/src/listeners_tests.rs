//! Tests for the file-backed trigger store.

use super::*;
use std::io::Write;
use tempfile::NamedTempFile;
use trigger_sink_core::config::{BindingKind, ObjectMeta};

const YAML_DEFINITIONS: &str = r#"
listeners:
  - metadata:
      name: listener
      namespace: default
    spec:
      triggers:
        - name: on-push
          bindings:
            - name: push-binding
          template:
            name: push-template
bindings:
  - metadata:
      name: push-binding
      namespace: default
    spec:
      params:
        - name: revision
          value: $(body.head_commit.id)
clusterBindings:
  - metadata:
      name: shared-binding
    spec:
      params:
        - name: cluster
          value: production
templates:
  - metadata:
      name: push-template
      namespace: default
    spec:
      params:
        - name: revision
          default: main
      resourceTemplates:
        - apiVersion: tekton.dev/v1beta1
          kind: PipelineRun
          metadata:
            name: run-$(uid)
"#;

fn temp_file(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_load_yaml_definitions() {
    let file = temp_file(".yaml", YAML_DEFINITIONS);
    let store = StaticTriggerStore::load(file.path()).unwrap();

    let listener = store.event_listener("default", "listener").await.unwrap();
    assert_eq!(listener.spec.triggers.len(), 1);
    assert_eq!(listener.spec.triggers[0].bindings[0].kind, BindingKind::TriggerBinding);

    let binding = store.trigger_binding("default", "push-binding").await.unwrap();
    assert_eq!(binding.spec.params[0].name, "revision");

    let cluster = store.cluster_trigger_binding("shared-binding").await.unwrap();
    assert_eq!(cluster.spec.params[0].value, "production");

    let template = store.trigger_template("default", "push-template").await.unwrap();
    assert_eq!(template.spec.params[0].default.as_deref(), Some("main"));
}

#[tokio::test]
async fn test_load_json_definitions() {
    let json = serde_json::json!({
        "listeners": [{
            "metadata": {"name": "listener", "namespace": "default"},
            "spec": {"triggers": [{"name": "t", "template": {"name": "tt"}}]}
        }]
    });
    let file = temp_file(".json", &json.to_string());
    let store = StaticTriggerStore::load(file.path()).unwrap();

    assert!(store.event_listener("default", "listener").await.is_ok());
}

#[test]
fn test_missing_file_errors() {
    let err = StaticTriggerStore::load(Path::new("/nonexistent/defs.yaml")).unwrap_err();
    assert!(matches!(err, DefinitionsError::FileNotFound { .. }));
}

#[test]
fn test_invalid_yaml_errors() {
    let file = temp_file(".yaml", "listeners: [not: {valid");
    let err = StaticTriggerStore::load(file.path()).unwrap_err();
    assert!(matches!(err, DefinitionsError::Parse { .. }));
}

#[test]
fn test_invalid_feature_flag_value_errors() {
    let definitions = Definitions {
        feature_flags: [("enable-api-fields".to_string(), "beta".to_string())]
            .into_iter()
            .collect(),
        ..Default::default()
    };
    assert!(matches!(
        StaticTriggerStore::new(definitions),
        Err(DefinitionsError::Validation(_))
    ));
}

#[test]
fn test_webhook_interceptor_requires_alpha() {
    let yaml = r#"
listeners:
  - metadata:
      name: listener
      namespace: default
    spec:
      triggers:
        - name: t
          template:
            name: tt
          interceptors:
            - webhook:
                clientConfig:
                  url: http://enricher.example.com
"#;
    let stable = temp_file(".yaml", yaml);
    assert!(matches!(
        StaticTriggerStore::load(stable.path()),
        Err(DefinitionsError::Validation(_))
    ));

    let alpha = temp_file(
        ".yaml",
        &format!("featureFlags:\n  enable-api-fields: alpha\n{}", yaml),
    );
    assert!(StaticTriggerStore::load(alpha.path()).is_ok());
}

#[tokio::test]
async fn test_lookups_are_namespace_scoped() {
    let definitions = Definitions {
        listeners: vec![trigger_sink_core::config::EventListener {
            metadata: ObjectMeta {
                name: "listener".to_string(),
                namespace: "team-a".to_string(),
            },
            spec: Default::default(),
        }],
        ..Default::default()
    };
    let store = StaticTriggerStore::new(definitions).unwrap();

    assert!(store.event_listener("team-a", "listener").await.is_ok());
    assert!(store.event_listener("team-b", "listener").await.is_err());
}
