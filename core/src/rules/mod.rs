//! # RULE SYSTEM
//!
//! **TRAIT-BASED RULE KINDS BEHIND ONE INTERFACE**
//!
//! A rule kind is looked up by identifier in the [`RuleRegistry`] and bound to its declared
//! parameters as a [`RuleInstance`]. All three declaration shapes (pipe string, ordered list,
//! object map) funnel through [`parser::normalize_declaration`] into the same representation.
//!
//! ## USAGE
//!
//! ```rust
//! use formcheck::rules::RuleRegistry;
//!
//! let registry = RuleRegistry::default();
//! let rules = registry.parse("required|min:5");
//! assert_eq!(rules.len(), 2);
//! ```

use crate::errors::FormError;
use crate::types::{display, FormData};
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub mod builtin;
pub mod parser;
pub mod registry;

pub use parser::{normalize_declaration, RuleDeclaration, RuleSpec};
pub use registry::{PredicateRule, RuleFactory, RuleRegistry};

/// Kind name of the rule that flags empty-but-expected fields.
pub const REQUIRED: &str = "required";

/// Placeholder name -> display text, used to interpolate message templates.
pub type MessageParams = HashMap<String, String>;

/// **RULE PARAMETERS**
///
/// Parameters bound to a rule at declaration time.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RuleParams {
    /// `required`, `{email: true}`
    #[default]
    None,
    /// `min:5`, `{min: 5}`
    Single(JsonValue),
    /// `between:1,10`, `{between: [1, 10]}`
    List(Vec<JsonValue>),
    /// `{custom: {threshold: 3}}`
    Named(Map<String, JsonValue>),
}

impl RuleParams {
    /// Wrap a declared parameter value: lists and maps keep their shape, `null` means none.
    pub fn from_value(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::None,
            JsonValue::Array(items) => Self::List(items),
            JsonValue::Object(map) => Self::Named(map),
            other => Self::Single(other),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::None => true,
            Self::Single(_) => false,
            Self::List(items) => items.is_empty(),
            Self::Named(map) => map.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Single(_) => 1,
            Self::List(items) => items.len(),
            Self::Named(map) => map.len(),
        }
    }

    /// Positional access. A single parameter sits at index 0.
    pub fn get(&self, index: usize) -> Option<&JsonValue> {
        match self {
            Self::Single(value) if index == 0 => Some(value),
            Self::List(items) => items.get(index),
            _ => None,
        }
    }

    pub fn named(&self, key: &str) -> Option<&JsonValue> {
        match self {
            Self::Named(map) => map.get(key),
            _ => None,
        }
    }

    /// Positional values in declaration order (named parameters yield their values).
    pub fn values(&self) -> Vec<&JsonValue> {
        match self {
            Self::None => Vec::new(),
            Self::Single(value) => vec![value],
            Self::List(items) => items.iter().collect(),
            Self::Named(map) => map.values().collect(),
        }
    }

    /// Placeholders every rule gets for free: the parameter under the rule's own kind name,
    /// list parameters by position, named parameters by key.
    pub fn placeholders(&self, kind: &str) -> MessageParams {
        let mut params = MessageParams::new();
        match self {
            Self::None => {}
            Self::Single(value) => {
                params.insert(kind.to_string(), display(value));
            }
            Self::List(items) => {
                params.insert(
                    kind.to_string(),
                    items.iter().map(display).collect::<Vec<_>>().join(", "),
                );
                for (i, item) in items.iter().enumerate() {
                    params.insert(i.to_string(), display(item));
                }
            }
            Self::Named(map) => {
                for (key, value) in map {
                    params.insert(key.clone(), display(value));
                }
            }
        }
        params
    }
}

/// What a rule sees besides the value under test.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub field: &'a str,
    /// Every value of the field's scope, unnormalized.
    pub data: &'a FormData,
}

/// **CORE RULE TRAIT**
///
/// **MANDATE**: ALL rule kinds MUST implement this trait.
/// **GUARANTEE**: `Ok(false)` is a validation failure; `Err` is a rule fault that the
/// orchestrator records as a generic failure.
#[async_trait]
pub trait Rule: Send + Sync {
    /// Verdict for a normalized value.
    async fn validate(&self, value: &JsonValue, ctx: &RuleContext<'_>) -> Result<bool, FormError>;

    /// Applicability predicate; a rule that does not apply is skipped.
    fn should_apply(&self, _value: &JsonValue, _ctx: &RuleContext<'_>) -> bool {
        true
    }

    /// Named placeholders on top of [`RuleParams::placeholders`].
    fn placeholders(&self) -> MessageParams {
        MessageParams::new()
    }
}

/// **RULE INSTANCE**
///
/// A rule kind bound to its parameters. Immutable once built; cloning shares the rule.
#[derive(Clone)]
pub struct RuleInstance {
    kind: String,
    params: RuleParams,
    fallback_message: Option<String>,
    rule: Arc<dyn Rule>,
}

impl RuleInstance {
    pub fn new(kind: impl Into<String>, params: RuleParams, rule: Box<dyn Rule>) -> Self {
        Self {
            kind: kind.into(),
            params,
            fallback_message: None,
            rule: Arc::from(rule),
        }
    }

    pub fn with_fallback_message(mut self, message: Option<String>) -> Self {
        self.fallback_message = message;
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn params(&self) -> &RuleParams {
        &self.params
    }

    pub fn fallback_message(&self) -> Option<&str> {
        self.fallback_message.as_deref()
    }

    pub fn is_required(&self) -> bool {
        self.kind == REQUIRED
    }

    pub fn should_apply(&self, value: &JsonValue, ctx: &RuleContext<'_>) -> bool {
        self.rule.should_apply(value, ctx)
    }

    pub async fn validate(&self, value: &JsonValue, ctx: &RuleContext<'_>) -> Result<bool, FormError> {
        self.rule.validate(value, ctx).await
    }

    pub fn message_params(&self) -> MessageParams {
        let mut params = self.params.placeholders(&self.kind);
        params.extend(self.rule.placeholders());
        params
    }
}

impl fmt::Debug for RuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleInstance")
            .field("kind", &self.kind)
            .field("params", &self.params)
            .field("fallback_message", &self.fallback_message)
            .finish()
    }
}
