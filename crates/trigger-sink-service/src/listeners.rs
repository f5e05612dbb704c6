//! File-backed trigger store.
//!
//! Listener, trigger, binding, and template definitions are loaded from a
//! single YAML or JSON file at startup, validated against the feature
//! flags, and served read-only to the dispatcher. Deployments against a
//! real cluster store swap this for a cluster-backed [`TriggerStore`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;
use trigger_sink_core::config::{
    ClusterTriggerBinding, EventListener, FeatureFlags, LookupError, Trigger, TriggerBinding,
    TriggerStore, TriggerTemplate, ValidationError,
};

#[cfg(test)]
#[path = "listeners_tests.rs"]
mod tests;

/// Failures while loading the definitions file.
#[derive(Debug, thiserror::Error)]
pub enum DefinitionsError {
    #[error("definitions file not found: {path}")]
    FileNotFound { path: String },

    #[error("failed to parse definitions: {message}")]
    Parse { message: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// On-disk shape of the definitions file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Definitions {
    #[serde(default)]
    pub feature_flags: HashMap<String, String>,

    #[serde(default)]
    pub listeners: Vec<EventListener>,

    #[serde(default)]
    pub triggers: Vec<Trigger>,

    #[serde(default)]
    pub bindings: Vec<TriggerBinding>,

    #[serde(default)]
    pub cluster_bindings: Vec<ClusterTriggerBinding>,

    #[serde(default)]
    pub templates: Vec<TriggerTemplate>,
}

/// A [`TriggerStore`] serving definitions loaded at startup.
#[derive(Debug)]
pub struct StaticTriggerStore {
    definitions: Definitions,
}

impl StaticTriggerStore {
    /// Load and validate a definitions file.
    ///
    /// YAML and JSON are both accepted; the extension decides the parser,
    /// unknown extensions try JSON first and fall back to YAML.
    pub fn load(path: &Path) -> Result<Self, DefinitionsError> {
        if !path.exists() {
            return Err(DefinitionsError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let contents = std::fs::read_to_string(path).map_err(|err| DefinitionsError::Parse {
            message: format!("failed to read file: {}", err),
        })?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let definitions: Definitions = match extension.to_lowercase().as_str() {
            "yaml" | "yml" => {
                serde_yaml::from_str(&contents).map_err(|err| DefinitionsError::Parse {
                    message: format!("invalid YAML: {}", err),
                })?
            }
            "json" => serde_json::from_str(&contents).map_err(|err| DefinitionsError::Parse {
                message: format!("invalid JSON: {}", err),
            })?,
            _ => serde_json::from_str(&contents)
                .or_else(|_| serde_yaml::from_str(&contents))
                .map_err(|err| DefinitionsError::Parse {
                    message: format!("failed to parse as JSON or YAML: {}", err),
                })?,
        };

        Self::new(definitions)
    }

    /// Validate already-parsed definitions.
    pub fn new(definitions: Definitions) -> Result<Self, DefinitionsError> {
        let flags = FeatureFlags::from_map(&definitions.feature_flags)?;
        for listener in &definitions.listeners {
            listener.validate(&flags)?;
        }

        info!(
            listeners = definitions.listeners.len(),
            triggers = definitions.triggers.len(),
            bindings = definitions.bindings.len() + definitions.cluster_bindings.len(),
            templates = definitions.templates.len(),
            enable_api_fields = %flags.enable_api_fields,
            "loaded trigger definitions"
        );

        Ok(Self { definitions })
    }
}

#[async_trait]
impl TriggerStore for StaticTriggerStore {
    async fn event_listener(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<EventListener, LookupError> {
        self.definitions
            .listeners
            .iter()
            .find(|l| l.metadata.name == name && l.metadata.namespace == namespace)
            .cloned()
            .ok_or_else(|| LookupError::not_found("EventListener", namespace, name))
    }

    async fn trigger(&self, namespace: &str, name: &str) -> Result<Trigger, LookupError> {
        self.definitions
            .triggers
            .iter()
            .find(|t| t.metadata.name == name && t.metadata.namespace == namespace)
            .cloned()
            .ok_or_else(|| LookupError::not_found("Trigger", namespace, name))
    }

    async fn trigger_binding(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<TriggerBinding, LookupError> {
        self.definitions
            .bindings
            .iter()
            .find(|b| b.metadata.name == name && b.metadata.namespace == namespace)
            .cloned()
            .ok_or_else(|| LookupError::not_found("TriggerBinding", namespace, name))
    }

    async fn cluster_trigger_binding(
        &self,
        name: &str,
    ) -> Result<ClusterTriggerBinding, LookupError> {
        self.definitions
            .cluster_bindings
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
        self.definitions
            .templates
            .iter()
            .find(|t| t.metadata.name == name && t.metadata.namespace == namespace)
            .cloned()
            .ok_or_else(|| LookupError::not_found("TriggerTemplate", namespace, name))
    }
}
