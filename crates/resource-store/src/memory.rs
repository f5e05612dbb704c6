//! In-memory resource store for development and testing.
//!
//! Implements every client trait in this crate against process-local state:
//! registered kind mappings for discovery, secret material, per-service-account
//! access rules, and a record of every created object for assertions.

use crate::{ApiResource, AuthOverride, DiscoveryClient, ResourceClient, SecretReader, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Access behavior of one registered service account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessRule {
    /// Creates succeed.
    Allow,
    /// Creates fail as forbidden (authenticated, not permitted).
    Forbid,
    /// Creates fail as unauthorized (identity rejected).
    Reject,
}

/// One object recorded by a successful create call.
#[derive(Debug, Clone)]
pub struct CreatedObject {
    pub namespace: String,
    pub resource: ApiResource,
    pub object: Value,
    /// Service account the create ran under, `None` for the sink identity.
    pub service_account: Option<String>,
}

#[derive(Default)]
struct Inner {
    /// `(apiVersion, kind)` to resource mapping.
    kinds: HashMap<(String, String), ApiResource>,
    /// `(namespace, name, key)` to secret bytes.
    secrets: HashMap<(String, String, String), Vec<u8>>,
    /// `(namespace, service account)` to access rule.
    accounts: HashMap<(String, String), AccessRule>,
    created: Vec<CreatedObject>,
}

// ============================================================================
// InMemoryStore
// ============================================================================

/// Process-local resource store.
///
/// Cloning shares the underlying state, so a store handed to the sink and a
/// copy kept by a test observe the same created objects.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind mapping for discovery.
    pub fn register_kind(&self, api_version: &str, kind: &str, resource: ApiResource) {
        let mut inner = self.inner.write().unwrap();
        inner
            .kinds
            .insert((api_version.to_string(), kind.to_string()), resource);
    }

    /// Store secret material under `(namespace, name, key)`.
    pub fn put_secret(&self, namespace: &str, name: &str, key: &str, value: impl Into<Vec<u8>>) {
        let mut inner = self.inner.write().unwrap();
        inner.secrets.insert(
            (namespace.to_string(), name.to_string(), key.to_string()),
            value.into(),
        );
    }

    /// Register a service account with the given access rule.
    pub fn register_service_account(&self, namespace: &str, name: &str, rule: AccessRule) {
        let mut inner = self.inner.write().unwrap();
        inner
            .accounts
            .insert((namespace.to_string(), name.to_string()), rule);
    }

    /// Snapshot of every object created so far, in creation order.
    pub fn created_objects(&self) -> Vec<CreatedObject> {
        self.inner.read().unwrap().created.clone()
    }

    fn record_create(
        &self,
        namespace: &str,
        resource: &ApiResource,
        object: Value,
        service_account: Option<&str>,
    ) -> Result<Value, StoreError> {
        let name = object
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut inner = self.inner.write().unwrap();
        if let Some(ref name) = name {
            let collision = inner.created.iter().any(|c| {
                c.namespace == namespace
                    && c.resource == *resource
                    && c.object
                        .get("metadata")
                        .and_then(|m| m.get("name"))
                        .and_then(Value::as_str)
                        == Some(name)
            });
            if collision {
                return Err(StoreError::AlreadyExists {
                    kind: resource.resource.clone(),
                    name: name.clone(),
                });
            }
        }

        debug!(
            namespace,
            resource = %resource.resource,
            name = name.as_deref().unwrap_or("<generated>"),
            "recording created object"
        );

        inner.created.push(CreatedObject {
            namespace: namespace.to_string(),
            resource: resource.clone(),
            object: object.clone(),
            service_account: service_account.map(str::to_string),
        });
        Ok(object)
    }
}

#[async_trait]
impl ResourceClient for InMemoryStore {
    /// Create under the sink's own identity; always permitted.
    async fn create(
        &self,
        namespace: &str,
        resource: &ApiResource,
        object: Value,
    ) -> Result<Value, StoreError> {
        self.record_create(namespace, resource, object, None)
    }
}

#[async_trait]
impl DiscoveryClient for InMemoryStore {
    async fn resolve(&self, api_version: &str, kind: &str) -> Result<ApiResource, StoreError> {
        let inner = self.inner.read().unwrap();
        inner
            .kinds
            .get(&(api_version.to_string(), kind.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "resource mapping".to_string(),
                name: format!("{}/{}", api_version, kind),
            })
    }
}

#[async_trait]
impl SecretReader for InMemoryStore {
    async fn secret(&self, namespace: &str, name: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let inner = self.inner.read().unwrap();
        inner
            .secrets
            .get(&(namespace.to_string(), name.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "secret".to_string(),
                name: format!("{}/{}[{}]", namespace, name, key),
            })
    }
}

#[async_trait]
impl AuthOverride for InMemoryStore {
    async fn scoped_client(
        &self,
        service_account: &str,
        namespace: &str,
    ) -> Result<Arc<dyn ResourceClient>, StoreError> {
        let rule = {
            let inner = self.inner.read().unwrap();
            inner
                .accounts
                .get(&(namespace.to_string(), service_account.to_string()))
                .copied()
        };

        match rule {
            Some(rule) => Ok(Arc::new(ScopedClient {
                store: self.clone(),
                service_account: service_account.to_string(),
                rule,
            })),
            None => Err(StoreError::Unauthorized {
                message: format!(
                    "service account {}/{} is not known to the store",
                    namespace, service_account
                ),
            }),
        }
    }
}

// ============================================================================
// ScopedClient
// ============================================================================

/// A [`ResourceClient`] acting as a specific service account.
struct ScopedClient {
    store: InMemoryStore,
    service_account: String,
    rule: AccessRule,
}

#[async_trait]
impl ResourceClient for ScopedClient {
    async fn create(
        &self,
        namespace: &str,
        resource: &ApiResource,
        object: Value,
    ) -> Result<Value, StoreError> {
        match self.rule {
            AccessRule::Allow => {
                self.store
                    .record_create(namespace, resource, object, Some(&self.service_account))
            }
            AccessRule::Forbid => Err(StoreError::Forbidden {
                message: format!(
                    "service account {} may not create {}",
                    self.service_account, resource.resource
                ),
            }),
            AccessRule::Reject => Err(StoreError::Unauthorized {
                message: format!("service account {} rejected", self.service_account),
            }),
        }
    }
}
