use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormError {
    #[error("RULE ERROR: {code} - {message}")]
    Rule { code: String, message: String },

    #[error("DECLARATION ERROR: {code} - {message}")]
    Declaration { code: String, message: String },

    #[error("CONFIG ERROR: {code} - {message}")]
    Config { code: String, message: String },

    #[error("MESSAGES ERROR: {code} - {message}")]
    Messages { code: String, message: String },

    #[error("TIMEOUT ERROR: validation exceeded {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl FormError {
    /// **RULE FAULT** - A rule implementation failed to produce a verdict
    pub fn rule(message: impl Into<String>) -> Self {
        Self::Rule {
            code: codes::RULE_FAULT.to_string(),
            message: message.into(),
        }
    }

    /// **RULE PANIC** - A rule implementation panicked while validating
    pub fn panicked(kind: &str) -> Self {
        Self::Rule {
            code: codes::RULE_PANIC.to_string(),
            message: format!("rule '{}' panicked", kind),
        }
    }

    /// **BAD PARAMETERS** - A rule could not be built from its declared parameters
    pub fn bad_params(kind: &str, message: impl Into<String>) -> Self {
        Self::Declaration {
            code: codes::INVALID_PARAMS.to_string(),
            message: format!("rule '{}': {}", kind, message.into()),
        }
    }

    /// Stable error code carried by every variant except `Timeout`.
    pub fn code(&self) -> &str {
        match self {
            Self::Rule { code, .. }
            | Self::Declaration { code, .. }
            | Self::Config { code, .. }
            | Self::Messages { code, .. } => code,
            Self::Timeout { .. } => codes::TIMEOUT,
        }
    }
}

/// **ERROR CODES**
///
/// **MANDATE**: Use these standardized error codes for consistent error reporting.
pub mod codes {
    pub const RULE_FAULT: &str = "FORMCHECK_RULE_FAULT";
    pub const RULE_PANIC: &str = "FORMCHECK_RULE_PANIC";
    pub const UNKNOWN_RULE: &str = "FORMCHECK_UNKNOWN_RULE";
    pub const INVALID_PARAMS: &str = "FORMCHECK_INVALID_PARAMS";
    pub const INVALID_CONFIG: &str = "FORMCHECK_INVALID_CONFIG";
    pub const INVALID_MESSAGES: &str = "FORMCHECK_INVALID_MESSAGES";
    pub const TIMEOUT: &str = "FORMCHECK_TIMEOUT";
}
