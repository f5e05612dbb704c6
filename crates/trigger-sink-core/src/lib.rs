//! # Trigger-Sink Core
//!
//! Core logic for the event sink: the declarative configuration model
//! (event listeners, triggers, bindings, templates), the interceptor chain
//! that authenticates and filters incoming events, and the template
//! resolver that turns an event payload into concrete resource manifests.
//!
//! ## Architecture
//!
//! The crate is consumed by the HTTP service, which owns the fan-out and
//! response aggregation. All store access goes through the trait
//! abstractions in `resource-store` and [`config::TriggerStore`], so the
//! same logic runs against the real cluster store and the in-memory one
//! used in tests.
//!
//! ## Event flow
//!
//! For each trigger of an event: [`interceptor::InterceptorChain`] produces
//! the final body, headers, and extensions; [`template::resolve_trigger`] /
//! [`template::resolve_params`] / [`template::resolve_resources`] turn them
//! into rendered JSON documents ready for create calls.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod config;
pub mod interceptor;
pub mod template;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

/// Alphabet for generated suffixes: lowercase alphanumerics only, so the
/// values are safe inside object names.
const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of generated suffixes and event IDs.
const SUFFIX_LEN: usize = 5;

/// Generate a short random lowercase-alphanumeric string.
///
/// Used both for event IDs and for `$(uid)` expansion during template
/// rendering. Five characters over a 36-symbol alphabet give ~60M distinct
/// values, enough to avoid collisions across a day of cluster traffic.
pub fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}

// ============================================================================
// EventId
// ============================================================================

/// Unique identifier assigned to each accepted HTTP event.
///
/// The ID flows through every log line, interceptor context, and resource
/// label produced while processing the event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(String);

impl EventId {
    /// Mint a fresh event ID.
    pub fn new() -> Self {
        Self(random_suffix())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Trigger identifiers
// ============================================================================

/// Format the trigger identity carried in interceptor contexts.
pub fn trigger_id(namespace: &str, name: &str) -> String {
    format!("namespaces/{}/triggers/{}", namespace, name)
}

/// Parse a trigger identity back into `(namespace, name)`.
///
/// Returns `None` when the value does not have the
/// `namespaces/<ns>/triggers/<name>` shape.
pub fn parse_trigger_id(id: &str) -> Option<(&str, &str)> {
    let parts: Vec<&str> = id.split('/').collect();
    if parts.len() != 4 || parts[0] != "namespaces" || parts[2] != "triggers" {
        return None;
    }
    Some((parts[1], parts[3]))
}
