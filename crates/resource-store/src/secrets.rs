//! Per-event secret caching.
//!
//! Secret lookups hit the store once per `(namespace, name, key)` tuple;
//! many triggers on one event frequently reference the same webhook secret.
//! The sink builds one cache per accepted event and drops it with the event,
//! so rotation takes effect on the next delivery.

use crate::{SecretReader, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[cfg(test)]
#[path = "secrets_tests.rs"]
mod tests;

/// A [`SecretReader`] that memoizes successful lookups.
///
/// Only successful reads are cached; a missing secret is retried on the
/// next reference in case it was created between lookups.
pub struct CachingSecretReader {
    inner: Arc<dyn SecretReader>,
    cache: Mutex<HashMap<(String, String, String), Vec<u8>>>,
}

impl CachingSecretReader {
    pub fn new(inner: Arc<dyn SecretReader>) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SecretReader for CachingSecretReader {
    async fn secret(&self, namespace: &str, name: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let cache_key = (namespace.to_string(), name.to_string(), key.to_string());

        if let Some(value) = self.cache.lock().unwrap().get(&cache_key) {
            return Ok(value.clone());
        }

        let value = self.inner.secret(namespace, name, key).await?;
        self.cache
            .lock()
            .unwrap()
            .insert(cache_key, value.clone());
        Ok(value)
    }
}
