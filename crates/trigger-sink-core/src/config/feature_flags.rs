//! Feature-flag configuration.
//!
//! Alpha fields in the declarative objects are gated behind the
//! `enable-api-fields` flag, read from a config map alongside the listener
//! deployment.

use super::ValidationError;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[cfg(test)]
#[path = "feature_flags_tests.rs"]
mod tests;

/// Config-map key for the API-field gate.
pub const ENABLE_API_FIELDS: &str = "enable-api-fields";

/// Default config-map name holding feature flags.
pub const DEFAULT_FEATURE_FLAGS_CONFIG_NAME: &str = "feature-flags-triggers";

/// Default config-map name holding the logging configuration.
pub const DEFAULT_LOGGING_CONFIG_NAME: &str = "config-logging-triggers";

/// Name of the config map containing feature flags, overridable through
/// `CONFIG_FEATURE_FLAGS_NAME`.
pub fn feature_flags_config_name() -> String {
    std::env::var("CONFIG_FEATURE_FLAGS_NAME")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_FEATURE_FLAGS_CONFIG_NAME.to_string())
}

/// Name of the config map containing the logging configuration,
/// overridable through `CONFIG_LOGGING_NAME`.
pub fn logging_config_name() -> String {
    std::env::var("CONFIG_LOGGING_NAME")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_LOGGING_CONFIG_NAME.to_string())
}

/// Stability level accepted for declarative API fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ApiFields {
    #[default]
    Stable,
    Alpha,
}

impl fmt::Display for ApiFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::Alpha => write!(f, "alpha"),
        }
    }
}

impl FromStr for ApiFields {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stable" => Ok(Self::Stable),
            "alpha" => Ok(Self::Alpha),
            other => Err(ValidationError::Invalid {
                field: ENABLE_API_FIELDS.to_string(),
                message: format!("\"{}\" is not one of stable, alpha", other),
            }),
        }
    }
}

/// Parsed feature-flag configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    pub enable_api_fields: ApiFields,
}

impl FeatureFlags {
    /// Parse flags from config-map data.
    ///
    /// A missing key falls back to its default; an invalid value is an
    /// error rather than a silent fallback.
    pub fn from_map(data: &HashMap<String, String>) -> Result<Self, ValidationError> {
        let enable_api_fields = match data.get(ENABLE_API_FIELDS) {
            Some(value) => value.parse()?,
            None => ApiFields::default(),
        };
        Ok(Self { enable_api_fields })
    }
}
