//! # VALIDATOR CONFIGURATION
//!
//! Options recognized at construction time. Every key is optional; a document such as
//! `{"stopOnFirstFailure": true, "locale": "fr"}` leaves the remaining options at their defaults.

use crate::errors::{codes, FormError};
use serde::{Deserialize, Serialize};

/// Locale used when neither the configuration nor the caller names one.
pub const DEFAULT_LOCALE: &str = "en";

/// **VALIDATOR CONFIGURATION**
///
/// **PURPOSE**: Controls rule iteration, locale selection and error-bag ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidatorConfig {
    /// Stop iterating a field's rules at its first failure.
    pub stop_on_first_failure: bool,

    /// Active locale for message resolution.
    pub locale: String,

    /// Locale consulted when the active locale's table has no entry.
    pub fallback_locale: String,

    /// Run non-required rules against optional fields that hold no value.
    pub validate_empty_fields: bool,

    /// A recorded `required` failure supersedes every other failure of the same field.
    pub exclusive_required: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            stop_on_first_failure: false,
            locale: DEFAULT_LOCALE.to_string(),
            fallback_locale: DEFAULT_LOCALE.to_string(),
            validate_empty_fields: false,
            exclusive_required: true,
        }
    }
}

impl ValidatorConfig {
    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, FormError> {
        serde_json::from_str(json).map_err(|e| FormError::Config {
            code: codes::INVALID_CONFIG.to_string(),
            message: format!("Invalid configuration: {}", e),
        })
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    pub fn with_fallback_locale(mut self, locale: impl Into<String>) -> Self {
        self.fallback_locale = locale.into();
        self
    }

    pub fn stop_on_first_failure(mut self, stop: bool) -> Self {
        self.stop_on_first_failure = stop;
        self
    }

    pub fn validate_empty_fields(mut self, validate: bool) -> Self {
        self.validate_empty_fields = validate;
        self
    }

    pub fn exclusive_required(mut self, exclusive: bool) -> Self {
        self.exclusive_required = exclusive;
        self
    }
}
