//! Tests for binding and template resolution.

use super::*;
use crate::config::{
    ClusterTriggerBinding, EventListener, ObjectMeta, ParamDecl, TriggerBinding,
    TriggerBindingRef, TriggerBindingSpec, TriggerTemplateRef, TriggerTemplateSpec,
};
use crate::config::Trigger;
use async_trait::async_trait;
use serde_json::json;

// ============================================================================
// Test store
// ============================================================================

/// Store serving the objects it was seeded with.
#[derive(Default)]
struct FixtureStore {
    bindings: Vec<TriggerBinding>,
    cluster_bindings: Vec<ClusterTriggerBinding>,
    templates: Vec<TriggerTemplate>,
}

#[async_trait]
impl TriggerStore for FixtureStore {
    async fn event_listener(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<EventListener, LookupError> {
        Err(LookupError::not_found("EventListener", namespace, name))
    }

    async fn trigger(&self, namespace: &str, name: &str) -> Result<Trigger, LookupError> {
        Err(LookupError::not_found("Trigger", namespace, name))
    }

    async fn trigger_binding(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<TriggerBinding, LookupError> {
        self.bindings
            .iter()
            .find(|b| b.metadata.name == name && b.metadata.namespace == namespace)
            .cloned()
            .ok_or_else(|| LookupError::not_found("TriggerBinding", namespace, name))
    }

    async fn cluster_trigger_binding(
        &self,
        name: &str,
    ) -> Result<ClusterTriggerBinding, LookupError> {
        self.cluster_bindings
            .iter()
            .find(|b| b.metadata.name == name)
            .cloned()
            .ok_or_else(|| LookupError::not_found("ClusterTriggerBinding", "", name))
    }

    async fn trigger_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<TriggerTemplate, LookupError> {
        self.templates
            .iter()
            .find(|t| t.metadata.name == name && t.metadata.namespace == namespace)
            .cloned()
            .ok_or_else(|| LookupError::not_found("TriggerTemplate", namespace, name))
    }
}

// ============================================================================
// Builders
// ============================================================================

fn binding(name: &str, params: &[(&str, &str)]) -> TriggerBinding {
    TriggerBinding {
        metadata: ObjectMeta {
            name: name.to_string(),
            namespace: "default".to_string(),
        },
        spec: TriggerBindingSpec {
            params: params
                .iter()
                .map(|(name, value)| Param {
                    name: name.to_string(),
                    value: value.to_string(),
                })
                .collect(),
        },
    }
}

fn template(name: &str, params: &[ParamDecl], resource_templates: &[Value]) -> TriggerTemplate {
    TriggerTemplate {
        metadata: ObjectMeta {
            name: name.to_string(),
            namespace: "default".to_string(),
        },
        spec: TriggerTemplateSpec {
            params: params.to_vec(),
            resource_templates: resource_templates.to_vec(),
        },
    }
}

fn decl(name: &str, default: Option<&str>) -> ParamDecl {
    ParamDecl {
        name: name.to_string(),
        description: None,
        default: default.map(str::to_string),
    }
}

fn resolved(bindings: Vec<ResolvedBinding>, template: TriggerTemplate) -> ResolvedTrigger {
    ResolvedTrigger { bindings, template }
}

fn resolved_binding(name: &str, params: &[(&str, &str)]) -> ResolvedBinding {
    ResolvedBinding {
        name: name.to_string(),
        params: params
            .iter()
            .map(|(name, value)| Param {
                name: name.to_string(),
                value: value.to_string(),
            })
            .collect(),
    }
}

fn no_headers() -> EventHeaders {
    EventHeaders::new()
}

fn no_extensions() -> Map<String, Value> {
    Map::new()
}

// ============================================================================
// resolve_trigger
// ============================================================================

mod resolve_trigger_tests {
    use super::*;

    fn trigger_with(bindings: Vec<TriggerBindingRef>, template: &str) -> EventListenerTrigger {
        EventListenerTrigger {
            name: "on-push".to_string(),
            bindings,
            template: Some(TriggerTemplateRef {
                name: template.to_string(),
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_resolves_bindings_in_order() {
        let store = FixtureStore {
            bindings: vec![
                binding("first", &[("param1", "$(body.foo)")]),
                binding("second", &[("param2", "$(header.one)")]),
            ],
            templates: vec![template("tt", &[], &[])],
            ..Default::default()
        };

        let trigger = trigger_with(
            vec![
                TriggerBindingRef {
                    name: "first".to_string(),
                    ..Default::default()
                },
                TriggerBindingRef {
                    name: "second".to_string(),
                    ..Default::default()
                },
            ],
            "tt",
        );

        let resolved = resolve_trigger(&trigger, "default", &store).await.unwrap();
        assert_eq!(resolved.bindings.len(), 2);
        assert_eq!(resolved.bindings[0].name, "first");
        assert_eq!(resolved.bindings[1].name, "second");
        assert_eq!(resolved.template.metadata.name, "tt");
    }

    #[tokio::test]
    async fn test_cluster_binding_lookup() {
        let store = FixtureStore {
            cluster_bindings: vec![ClusterTriggerBinding {
                metadata: ObjectMeta {
                    name: "shared".to_string(),
                    namespace: String::new(),
                },
                spec: TriggerBindingSpec {
                    params: vec![Param {
                        name: "param1".to_string(),
                        value: "static".to_string(),
                    }],
                },
            }],
            templates: vec![template("tt", &[], &[])],
            ..Default::default()
        };

        let trigger = trigger_with(
            vec![TriggerBindingRef {
                name: "shared".to_string(),
                kind: BindingKind::ClusterTriggerBinding,
            }],
            "tt",
        );

        let resolved = resolve_trigger(&trigger, "default", &store).await.unwrap();
        assert_eq!(resolved.bindings[0].params[0].value, "static");
    }

    #[tokio::test]
    async fn test_missing_binding_errors() {
        let store = FixtureStore {
            templates: vec![template("tt", &[], &[])],
            ..Default::default()
        };
        let trigger = trigger_with(
            vec![TriggerBindingRef {
                name: "absent".to_string(),
                ..Default::default()
            }],
            "tt",
        );

        let err = resolve_trigger(&trigger, "default", &store).await.unwrap_err();
        assert!(matches!(err, ResolveError::Lookup(_)));
    }

    #[tokio::test]
    async fn test_missing_template_reference_errors() {
        let store = FixtureStore::default();
        let trigger = EventListenerTrigger {
            name: "no-template".to_string(),
            ..Default::default()
        };

        let err = resolve_trigger(&trigger, "default", &store).await.unwrap_err();
        assert!(matches!(err, ResolveError::MissingTemplate { .. }));
    }
}

// ============================================================================
// resolve_params
// ============================================================================

mod resolve_params_tests {
    use super::*;

    #[test]
    fn test_evaluates_against_event() {
        let resolved = resolved(
            vec![resolved_binding(
                "tb",
                &[("param1", "$(body.foo)"), ("param2", "$(header.one)")],
            )],
            template("tt", &[], &[]),
        );

        let mut header = EventHeaders::new();
        header.insert("one".to_string(), vec!["1".to_string()]);

        let params = resolve_params(
            &resolved,
            br#"{"foo": "bar"}"#,
            &header,
            &no_extensions(),
        )
        .unwrap();
        assert_eq!(params["param1"], "bar");
        assert_eq!(params["param2"], "1");
    }

    #[test]
    fn test_conflicting_bindings_fail() {
        let resolved = resolved(
            vec![
                resolved_binding("tb", &[("param1", "foo")]),
                resolved_binding("tb2", &[("param1", "bar")]),
            ],
            template("tt", &[decl("param1", None)], &[]),
        );

        let err = resolve_params(&resolved, b"{}", &no_headers(), &no_extensions()).unwrap_err();
        assert!(matches!(err, ResolveError::Conflict { .. }));
    }

    #[test]
    fn test_duplicate_param_names_conflict_even_with_equal_values() {
        let resolved = resolved(
            vec![
                resolved_binding("tb", &[("param1", "same")]),
                resolved_binding("tb2", &[("param1", "same")]),
            ],
            template("tt", &[], &[]),
        );

        let err = resolve_params(&resolved, b"{}", &no_headers(), &no_extensions()).unwrap_err();
        match err {
            ResolveError::Conflict { name } => assert_eq!(name, "param1"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_template_default_fills_unbound_param() {
        let resolved = resolved(
            vec![resolved_binding("tb", &[("param1", "bound")])],
            template(
                "tt",
                &[decl("param1", Some("unused")), decl("param3", Some("default2"))],
                &[],
            ),
        );

        let params =
            resolve_params(&resolved, b"{}", &no_headers(), &no_extensions()).unwrap();
        assert_eq!(params["param1"], "bound");
        assert_eq!(params["param3"], "default2");
    }

    #[test]
    fn test_bogus_body_path_fails() {
        let resolved = resolved(
            vec![resolved_binding("tb", &[("param1", "$(body.bogusvalue)")])],
            template("tt", &[decl("param1", None)], &[]),
        );

        let err = resolve_params(
            &resolved,
            br#"{"foo": "bar"}"#,
            &no_headers(),
            &no_extensions(),
        )
        .unwrap_err();
        assert!(matches!(err, ResolveError::Template(_)));
    }

    #[test]
    fn test_extensions_are_visible_to_bindings() {
        let resolved = resolved(
            vec![resolved_binding("tb", &[("url", "$(extensions.pr.url)")])],
            template("tt", &[], &[]),
        );

        let mut pr = Map::new();
        pr.insert("url".to_string(), Value::String("testing!".to_string()));
        let mut extensions = Map::new();
        extensions.insert("pr".to_string(), Value::Object(pr));

        let params = resolve_params(&resolved, b"{}", &no_headers(), &extensions).unwrap();
        assert_eq!(params["url"], "testing!");
    }
}

// ============================================================================
// resolve_resources
// ============================================================================

mod resolve_resources_tests {
    use super::*;
    use std::collections::HashMap;

    fn params(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn test_substitutes_params() {
        let template = template(
            "tt",
            &[],
            &[json!({"rt1": "$(params.param1)-$(params.param2)"})],
        );
        let rendered = resolve_resources(
            &template,
            &params(&[("param1", "bar"), ("param2", "1")]),
        )
        .unwrap();

        let parsed: Value = serde_json::from_str(&rendered[0]).unwrap();
        assert_eq!(parsed, json!({"rt1": "bar-1"}));
    }

    #[test]
    fn test_renders_every_template() {
        let template = template(
            "tt",
            &[],
            &[
                json!({"rt1": "$(params.param1)"}),
                json!({"rt2": "$(params.param3)"}),
                json!({"rt3": "rt3"}),
            ],
        );
        let rendered = resolve_resources(
            &template,
            &params(&[("param1", "bar"), ("param3", "default2")]),
        )
        .unwrap();

        assert_eq!(rendered.len(), 3);
        let last: Value = serde_json::from_str(&rendered[2]).unwrap();
        assert_eq!(last, json!({"rt3": "rt3"}));
    }

    #[test]
    fn test_uid_is_shared_within_one_document() {
        let template = template(
            "tt",
            &[],
            &[json!({"rt1": "$(uid)-$(uid)", "rt2": "$(uid)"})],
        );
        let rendered = resolve_resources(&template, &params(&[])).unwrap();

        let parsed: Value = serde_json::from_str(&rendered[0]).unwrap();
        let rt1 = parsed["rt1"].as_str().unwrap();
        let rt2 = parsed["rt2"].as_str().unwrap();
        let (first, second) = rt1.split_once('-').unwrap();
        assert_eq!(first, second);
        assert_eq!(first, rt2);
        assert_eq!(first.len(), 5);
    }

    #[test]
    fn test_uid_differs_across_documents() {
        let template = template(
            "tt",
            &[],
            &[json!({"rt1": "$(uid)"}), json!({"rt2": "$(uid)"})],
        );
        let rendered = resolve_resources(&template, &params(&[])).unwrap();

        let first: Value = serde_json::from_str(&rendered[0]).unwrap();
        let second: Value = serde_json::from_str(&rendered[1]).unwrap();
        assert_ne!(first["rt1"], second["rt2"]);
    }

    #[test]
    fn test_uid_substitutes_in_key_position() {
        let template = template("tt", &[], &[json!({"$(uid)": "$(uid)"})]);
        let rendered = resolve_resources(&template, &params(&[])).unwrap();

        let parsed: Value = serde_json::from_str(&rendered[0]).unwrap();
        let object = parsed.as_object().unwrap();
        let (key, value) = object.iter().next().unwrap();
        assert_eq!(key, value.as_str().unwrap());
    }

    #[test]
    fn test_undefined_param_reference_errors() {
        let template = template("tt", &[], &[json!({"rt1": "$(params.never-bound)"})]);
        let err = resolve_resources(&template, &params(&[])).unwrap_err();
        match err {
            ResolveError::UndefinedParam { name } => assert_eq!(name, "never-bound"),
            other => panic!("unexpected error: {}", other),
        }
    }
}
