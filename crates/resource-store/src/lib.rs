//! # Resource Store
//!
//! Client interfaces for the cluster-style resource store that the event
//! sink reads secrets from and creates rendered resource objects in.
//!
//! The real cluster client lives outside this workspace; this crate defines
//! the trait surface the sink programs against, the error taxonomy used to
//! classify store failures into HTTP outcomes, and an in-memory store for
//! development and testing.
//!
//! ## Architecture
//!
//! - Business logic depends only on the trait abstractions in this crate
//! - Concrete store implementations are injected at runtime
//! - Errors carry enough classification (`is_unauthorized`, `is_forbidden`,
//!   `is_transient`) for callers to map them without downcasting

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub mod memory;
pub mod secrets;

pub use memory::{AccessRule, CreatedObject, InMemoryStore};
pub use secrets::CachingSecretReader;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// ApiResource
// ============================================================================

/// A resolved resource-store mapping for one object kind.
///
/// Produced by [`DiscoveryClient::resolve`] from an `apiVersion`/`kind`
/// pair and consumed by [`ResourceClient::create`] to address the create
/// call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApiResource {
    /// API group, empty for the core group.
    pub group: String,

    /// API version within the group.
    pub version: String,

    /// Plural resource name used in store paths.
    pub resource: String,

    /// Whether objects of this resource live inside a namespace.
    pub namespaced: bool,
}

impl ApiResource {
    /// Store path for this resource within `namespace`.
    ///
    /// Cluster-scoped resources ignore the namespace component.
    pub fn path(&self, namespace: &str) -> String {
        let prefix = if self.group.is_empty() {
            format!("/api/{}", self.version)
        } else {
            format!("/apis/{}/{}", self.group, self.version)
        };

        if self.namespaced {
            format!("{}/namespaces/{}/{}", prefix, namespace, self.resource)
        } else {
            format!("{}/{}", prefix, self.resource)
        }
    }

    /// The `apiVersion` string (`group/version`, or bare version for the
    /// core group) this resource was resolved from.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors returned by resource-store operations.
///
/// The sink maps these onto per-trigger HTTP outcomes: `Unauthorized` and
/// `Forbidden` short-circuit event aggregation, everything else degrades to
/// an accepted-but-not-created response.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} \"{name}\" not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} \"{name}\" already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("forbidden: {message}")]
    Forbidden { message: String },

    #[error("invalid object: {message}")]
    Invalid { message: String },

    #[error("store connection failed: {message}")]
    Connection { message: String },
}

impl StoreError {
    /// The store rejected the caller as unauthenticated.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// The store rejected the caller as not permitted to act.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if the error is transient and a retry could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

// ============================================================================
// Client Traits
// ============================================================================

/// Write access to the resource store.
///
/// Implementations must be safe for concurrent use; the sink shares one
/// client across all trigger workers of an event.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Create `object` under `resource` in `namespace`.
    ///
    /// Returns the stored object as the store recorded it.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Unauthorized`] when the client identity is not
    ///   authenticated for the store
    /// - [`StoreError::Forbidden`] when the identity may not create this
    ///   resource
    /// - [`StoreError::AlreadyExists`] on name collisions
    async fn create(
        &self,
        namespace: &str,
        resource: &ApiResource,
        object: Value,
    ) -> Result<Value, StoreError>;
}

/// Resolution of object kinds to store resources.
#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    /// Resolve an `apiVersion`/`kind` pair to its [`ApiResource`] mapping.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for kinds the store does not serve.
    async fn resolve(&self, api_version: &str, kind: &str) -> Result<ApiResource, StoreError>;
}

/// Read access to secret material referenced by interceptor configs.
#[async_trait]
pub trait SecretReader: Send + Sync {
    /// Fetch the value stored under `key` in secret `name` of `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the secret or the key within
    /// it does not exist.
    async fn secret(&self, namespace: &str, name: &str, key: &str) -> Result<Vec<u8>, StoreError>;
}

/// Per-trigger credential override.
///
/// The sink process runs under its own store identity. Triggers that name a
/// service account create their resources through a scoped client obtained
/// here instead.
#[async_trait]
pub trait AuthOverride: Send + Sync {
    /// Build a client that acts as `service_account` within `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unauthorized`] when the service account cannot
    /// be authenticated.
    async fn scoped_client(
        &self,
        service_account: &str,
        namespace: &str,
    ) -> Result<Arc<dyn ResourceClient>, StoreError>;
}
