//! Resource creation from rendered template documents.
//!
//! Each rendered document is parsed, labeled with the listener, trigger,
//! and event identity, resolved to its store mapping through discovery,
//! and created under either the sink's identity or the trigger's service
//! account.

use axum::http::StatusCode;
use resource_store::{AuthOverride, DiscoveryClient, ResourceClient, StoreError};
use serde_json::{Map, Value};
use tracing::{debug, error};

#[cfg(test)]
#[path = "resources_tests.rs"]
mod tests;

/// Label recording the owning listener, kept for compatibility with older
/// consumers.
pub const LEGACY_LISTENER_LABEL: &str = "eventlistener";

/// Label recording the owning listener.
pub const LISTENER_LABEL: &str = "triggers.tekton.dev/eventlistener";

/// Label recording the trigger that created the object.
pub const TRIGGER_LABEL: &str = "triggers.tekton.dev/trigger";

/// Label recording the event the object was created for.
pub const EVENT_ID_LABEL: &str = "triggers.tekton.dev/eventid";

/// Failures while creating rendered documents.
#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    #[error("resource document is invalid: {message}")]
    Invalid { message: String },

    #[error("unknown kind {api_version}/{kind}")]
    UnknownKind { api_version: String, kind: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CreateError {
    /// Status code the owning worker reports for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Store(err) if err.is_unauthorized() => StatusCode::UNAUTHORIZED,
            Self::Store(err) if err.is_forbidden() => StatusCode::FORBIDDEN,
            _ => StatusCode::ACCEPTED,
        }
    }
}

/// Create every rendered document, in order, stopping at the first failure.
///
/// When `service_account` is set, creates run through a client scoped to
/// that account instead of the sink's own identity.
#[allow(clippy::too_many_arguments)]
pub async fn create_resources(
    client: &dyn ResourceClient,
    discovery: &dyn DiscoveryClient,
    auth: &dyn AuthOverride,
    namespace: &str,
    listener_name: &str,
    trigger_name: &str,
    event_id: &str,
    service_account: Option<&str>,
    documents: Vec<String>,
) -> Result<(), CreateError> {
    let scoped;
    let client: &dyn ResourceClient = match service_account.filter(|sa| !sa.is_empty()) {
        Some(service_account) => {
            scoped = auth.scoped_client(service_account, namespace).await?;
            scoped.as_ref()
        }
        None => client,
    };

    for document in documents {
        if let Err(err) = create_resource(
            client,
            discovery,
            namespace,
            listener_name,
            trigger_name,
            event_id,
            &document,
        )
        .await
        {
            error!(
                trigger = %trigger_name,
                eventid = %event_id,
                error = %err,
                "problem creating object"
            );
            return Err(err);
        }
    }
    Ok(())
}

async fn create_resource(
    client: &dyn ResourceClient,
    discovery: &dyn DiscoveryClient,
    namespace: &str,
    listener_name: &str,
    trigger_name: &str,
    event_id: &str,
    document: &str,
) -> Result<(), CreateError> {
    let mut object: Value = serde_json::from_str(document).map_err(|err| CreateError::Invalid {
        message: format!("not valid JSON: {}", err),
    })?;
    if !object.is_object() {
        return Err(CreateError::Invalid {
            message: "document is not a JSON object".to_string(),
        });
    }

    let api_version = string_field(&object, &["apiVersion"]).ok_or(CreateError::Invalid {
        message: "apiVersion is required".to_string(),
    })?;
    let kind = string_field(&object, &["kind"]).ok_or(CreateError::Invalid {
        message: "kind is required".to_string(),
    })?;

    let has_name = string_field(&object, &["metadata", "name"]).is_some();
    let has_generate_name = string_field(&object, &["metadata", "generateName"]).is_some();
    if !has_name && !has_generate_name {
        return Err(CreateError::Invalid {
            message: "metadata.name or metadata.generateName is required".to_string(),
        });
    }

    add_labels(&mut object, listener_name, trigger_name, event_id);

    let resource = discovery
        .resolve(&api_version, &kind)
        .await
        .map_err(|err| match err {
            StoreError::NotFound { .. } => CreateError::UnknownKind {
                api_version: api_version.clone(),
                kind: kind.clone(),
            },
            other => CreateError::Store(other),
        })?;

    debug!(
        kind = %kind,
        resource = %resource.resource,
        namespace = %namespace,
        "creating object"
    );
    client.create(namespace, &resource, object).await?;
    Ok(())
}

/// Merge the stable identity labels into `metadata.labels`, preserving any
/// labels the template already set.
fn add_labels(object: &mut Value, listener_name: &str, trigger_name: &str, event_id: &str) {
    let Some(root) = object.as_object_mut() else {
        return;
    };
    let metadata = root
        .entry("metadata".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    let Some(metadata) = metadata.as_object_mut() else {
        return;
    };
    let labels = metadata
        .entry("labels".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    let Some(labels) = labels.as_object_mut() else {
        return;
    };

    labels.insert(
        LEGACY_LISTENER_LABEL.to_string(),
        Value::String(listener_name.to_string()),
    );
    labels.insert(
        LISTENER_LABEL.to_string(),
        Value::String(listener_name.to_string()),
    );
    labels.insert(
        TRIGGER_LABEL.to_string(),
        Value::String(trigger_name.to_string()),
    );
    labels.insert(
        EVENT_ID_LABEL.to_string(),
        Value::String(event_id.to_string()),
    );
}

fn string_field(object: &Value, path: &[&str]) -> Option<String> {
    let mut current = object;
    for segment in path {
        current = current.get(segment)?;
    }
    current.as_str().map(str::to_string)
}
