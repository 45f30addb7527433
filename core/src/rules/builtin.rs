//! # BUILT-IN RULE KINDS
//!
//! **CRITICAL**: Every kind here has an English message under the same key in the bundled table.
//! **MANDATE**: Factories reject unusable parameters with `FormError::Declaration` so the registry
//! can drop the entry instead of failing at validation time.

use super::registry::RuleRegistry;
use super::{MessageParams, Rule, RuleContext, RuleParams};
use crate::errors::FormError;
use crate::messages::humanize;
use crate::types::{as_number, display, is_empty, normalize};
use async_trait::async_trait;
use email_address::EmailAddress;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;

static URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)(https?|ftp)://[^\s/$.?#][^\s]*$").expect("valid URL pattern"));

/// Register every built-in kind.
pub fn register_all(registry: &mut RuleRegistry) {
    // **FORMAT RULES** - no parameters
    register_format(registry, "required", |v| !is_empty(v));
    register_format(registry, "accepted", is_accepted);
    register_format(registry, "email", is_email);
    register_format(registry, "url", |v| v.as_str().map_or(false, |s| URL_PATTERN.is_match(s)));
    register_format(registry, "alpha", |v| text_matches(v, |c| c.is_alphabetic()));
    register_format(registry, "alpha_num", |v| text_matches(v, char::is_alphanumeric));
    register_format(registry, "alpha_dash", |v| {
        text_matches(v, |c| c.is_alphanumeric() || c == '-' || c == '_')
    });
    register_format(registry, "numeric", |v| as_number(v).is_some());
    register_format(registry, "integer", is_integer);

    // **SIZE RULES**
    registry.register(
        "min",
        |p: &RuleParams| Ok(Box::new(SizeRule::bounded("min", p, Some(0), None)?) as Box<dyn Rule>),
        None,
    );
    registry.register(
        "max",
        |p: &RuleParams| Ok(Box::new(SizeRule::bounded("max", p, None, Some(0))?) as Box<dyn Rule>),
        None,
    );
    registry.register(
        "between",
        |p: &RuleParams| Ok(Box::new(SizeRule::bounded("between", p, Some(0), Some(1))?) as Box<dyn Rule>),
        None,
    );
    registry.register(
        "min_value",
        |p: &RuleParams| Ok(Box::new(ValueRule::bounded("min_value", p, Some(0), None)?) as Box<dyn Rule>),
        None,
    );
    registry.register(
        "max_value",
        |p: &RuleParams| Ok(Box::new(ValueRule::bounded("max_value", p, None, Some(0))?) as Box<dyn Rule>),
        None,
    );
    registry.register(
        "digits",
        |p: &RuleParams| Ok(Box::new(DigitsRule::new(p)?) as Box<dyn Rule>),
        None,
    );

    // **MEMBERSHIP RULES**
    registry.register(
        "in",
        |p: &RuleParams| Ok(Box::new(MembershipRule::new("in", p, false)?) as Box<dyn Rule>),
        None,
    );
    registry.register(
        "not_in",
        |p: &RuleParams| Ok(Box::new(MembershipRule::new("not_in", p, true)?) as Box<dyn Rule>),
        None,
    );

    // **PATTERN RULE** - parameter text is never split
    registry.register_raw(
        "regex",
        |p: &RuleParams| Ok(Box::new(PatternRule::new(p)?) as Box<dyn Rule>),
        None,
    );

    // **CROSS-FIELD RULES**
    registry.register(
        "same",
        |p: &RuleParams| Ok(Box::new(FieldMatchRule::new("same", p, true)?) as Box<dyn Rule>),
        None,
    );
    registry.register(
        "different",
        |p: &RuleParams| Ok(Box::new(FieldMatchRule::new("different", p, false)?) as Box<dyn Rule>),
        None,
    );
    registry.register(
        "confirmed",
        |p: &RuleParams| Ok(Box::new(FieldMatchRule::confirmation(p)) as Box<dyn Rule>),
        None,
    );
}

fn register_format(registry: &mut RuleRegistry, kind: &str, check: fn(&JsonValue) -> bool) {
    registry.register(
        kind,
        move |_params: &RuleParams| Ok(Box::new(FormatRule { check }) as Box<dyn Rule>),
        None,
    );
}

fn is_accepted(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_i64() == Some(1),
        JsonValue::String(s) => matches!(s.to_lowercase().as_str(), "yes" | "on" | "1" | "true"),
        _ => false,
    }
}

fn is_email(value: &JsonValue) -> bool {
    value.as_str().map_or(false, EmailAddress::is_valid)
}

fn is_integer(value: &JsonValue) -> bool {
    match value {
        JsonValue::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().map_or(false, |f| f.fract() == 0.0),
        JsonValue::String(s) => s.parse::<i64>().is_ok(),
        _ => false,
    }
}

/// Non-empty text (strings or numbers) whose characters all satisfy `allowed`.
fn text_matches(value: &JsonValue, allowed: impl Fn(char) -> bool) -> bool {
    let text = match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        _ => return false,
    };
    !text.is_empty() && text.chars().all(allowed)
}

fn number_param(kind: &str, params: &RuleParams, index: usize) -> Result<(f64, String), FormError> {
    let raw = params
        .get(index)
        .ok_or_else(|| FormError::bad_params(kind, format!("missing parameter {}", index + 1)))?;
    let number = as_number(raw)
        .ok_or_else(|| FormError::bad_params(kind, format!("parameter '{}' is not a number", display(raw))))?;
    Ok((number, display(raw)))
}

fn text_param(kind: &str, params: &RuleParams, index: usize) -> Result<String, FormError> {
    params
        .get(index)
        .map(display)
        .filter(|text| !text.is_empty())
        .ok_or_else(|| FormError::bad_params(kind, format!("missing parameter {}", index + 1)))
}

// ================================================================================================
// FORMAT RULE - stateless checks
// ================================================================================================

struct FormatRule {
    check: fn(&JsonValue) -> bool,
}

#[async_trait]
impl Rule for FormatRule {
    async fn validate(&self, value: &JsonValue, _ctx: &RuleContext<'_>) -> Result<bool, FormError> {
        Ok((self.check)(value))
    }
}

// ================================================================================================
// SIZE RULES - length for text, magnitude for numbers, count for lists
// ================================================================================================

#[derive(Debug, Default)]
struct Bounds {
    min: Option<(f64, String)>,
    max: Option<(f64, String)>,
}

impl Bounds {
    fn from_params(
        kind: &str,
        params: &RuleParams,
        min_index: Option<usize>,
        max_index: Option<usize>,
    ) -> Result<Self, FormError> {
        let bounds = Self {
            min: min_index.map(|i| number_param(kind, params, i)).transpose()?,
            max: max_index.map(|i| number_param(kind, params, i)).transpose()?,
        };
        if let (Some((min, _)), Some((max, _))) = (&bounds.min, &bounds.max) {
            if min > max {
                return Err(FormError::bad_params(kind, format!("lower bound {} exceeds upper bound {}", min, max)));
            }
        }
        Ok(bounds)
    }

    fn contains(&self, measured: f64) -> bool {
        self.min.as_ref().map_or(true, |(min, _)| measured >= *min)
            && self.max.as_ref().map_or(true, |(max, _)| measured <= *max)
    }

    fn placeholders(&self) -> MessageParams {
        let mut params = MessageParams::new();
        if let Some((_, text)) = &self.min {
            params.insert("min".to_string(), text.clone());
        }
        if let Some((_, text)) = &self.max {
            params.insert("max".to_string(), text.clone());
        }
        params
    }
}

struct SizeRule {
    bounds: Bounds,
}

impl SizeRule {
    fn bounded(
        kind: &str,
        params: &RuleParams,
        min_index: Option<usize>,
        max_index: Option<usize>,
    ) -> Result<Self, FormError> {
        Ok(Self {
            bounds: Bounds::from_params(kind, params, min_index, max_index)?,
        })
    }

    fn measure(value: &JsonValue) -> Option<f64> {
        match value {
            JsonValue::String(s) => Some(s.chars().count() as f64),
            JsonValue::Number(n) => n.as_f64(),
            JsonValue::Array(items) => Some(items.len() as f64),
            JsonValue::Object(map) => Some(map.len() as f64),
            JsonValue::Null => Some(0.0),
            JsonValue::Bool(_) => None,
        }
    }
}

#[async_trait]
impl Rule for SizeRule {
    async fn validate(&self, value: &JsonValue, _ctx: &RuleContext<'_>) -> Result<bool, FormError> {
        Ok(Self::measure(value).map_or(false, |size| self.bounds.contains(size)))
    }

    fn placeholders(&self) -> MessageParams {
        self.bounds.placeholders()
    }
}

/// Numeric bounds on the value itself; numeric strings are compared as numbers.
struct ValueRule {
    bounds: Bounds,
}

impl ValueRule {
    fn bounded(
        kind: &str,
        params: &RuleParams,
        min_index: Option<usize>,
        max_index: Option<usize>,
    ) -> Result<Self, FormError> {
        Ok(Self {
            bounds: Bounds::from_params(kind, params, min_index, max_index)?,
        })
    }
}

#[async_trait]
impl Rule for ValueRule {
    async fn validate(&self, value: &JsonValue, _ctx: &RuleContext<'_>) -> Result<bool, FormError> {
        Ok(as_number(value).map_or(false, |n| self.bounds.contains(n)))
    }

    fn placeholders(&self) -> MessageParams {
        self.bounds.placeholders()
    }
}

struct DigitsRule {
    length: usize,
}

impl DigitsRule {
    fn new(params: &RuleParams) -> Result<Self, FormError> {
        let (length, _) = number_param("digits", params, 0)?;
        if length < 1.0 || length.fract() != 0.0 {
            return Err(FormError::bad_params("digits", "length must be a positive integer"));
        }
        Ok(Self {
            length: length as usize,
        })
    }
}

#[async_trait]
impl Rule for DigitsRule {
    async fn validate(&self, value: &JsonValue, _ctx: &RuleContext<'_>) -> Result<bool, FormError> {
        let text = match value {
            JsonValue::String(s) => s.clone(),
            JsonValue::Number(n) if n.is_u64() => n.to_string(),
            _ => return Ok(false),
        };
        Ok(text.len() == self.length && text.chars().all(|c| c.is_ascii_digit()))
    }

    fn placeholders(&self) -> MessageParams {
        MessageParams::from([("length".to_string(), self.length.to_string())])
    }
}

// ================================================================================================
// MEMBERSHIP RULES
// ================================================================================================

struct MembershipRule {
    values: Vec<String>,
    negate: bool,
}

impl MembershipRule {
    fn new(kind: &str, params: &RuleParams, negate: bool) -> Result<Self, FormError> {
        let values: Vec<String> = params.values().into_iter().map(display).collect();
        if values.is_empty() {
            return Err(FormError::bad_params(kind, "expected at least one value"));
        }
        Ok(Self { values, negate })
    }

    fn listed(&self, value: &JsonValue) -> bool {
        self.values.iter().any(|v| *v == display(value))
    }
}

#[async_trait]
impl Rule for MembershipRule {
    async fn validate(&self, value: &JsonValue, _ctx: &RuleContext<'_>) -> Result<bool, FormError> {
        // Multi-valued fields: every item is checked.
        let passes = match value {
            JsonValue::Array(items) => items.iter().all(|item| self.listed(item) != self.negate),
            other => self.listed(other) != self.negate,
        };
        Ok(passes)
    }

    fn placeholders(&self) -> MessageParams {
        MessageParams::from([("values".to_string(), self.values.join(", "))])
    }
}

// ================================================================================================
// PATTERN RULE
// ================================================================================================

struct PatternRule {
    pattern: Regex,
}

impl PatternRule {
    fn new(params: &RuleParams) -> Result<Self, FormError> {
        let source = text_param("regex", params, 0)?;
        let pattern = Regex::new(&source)
            .map_err(|e| FormError::bad_params("regex", format!("invalid pattern: {}", e)))?;
        Ok(Self { pattern })
    }
}

#[async_trait]
impl Rule for PatternRule {
    async fn validate(&self, value: &JsonValue, _ctx: &RuleContext<'_>) -> Result<bool, FormError> {
        Ok(match value {
            JsonValue::String(_) | JsonValue::Number(_) => self.pattern.is_match(&display(value)),
            _ => false,
        })
    }
}

// ================================================================================================
// CROSS-FIELD RULES
// ================================================================================================

struct FieldMatchRule {
    /// `None` compares against `<field>_confirmation`.
    other: Option<String>,
    equal: bool,
}

impl FieldMatchRule {
    fn new(kind: &str, params: &RuleParams, equal: bool) -> Result<Self, FormError> {
        Ok(Self {
            other: Some(text_param(kind, params, 0)?),
            equal,
        })
    }

    fn confirmation(params: &RuleParams) -> Self {
        Self {
            other: params.get(0).map(display).filter(|other| !other.is_empty()),
            equal: true,
        }
    }
}

#[async_trait]
impl Rule for FieldMatchRule {
    async fn validate(&self, value: &JsonValue, ctx: &RuleContext<'_>) -> Result<bool, FormError> {
        let other = self
            .other
            .clone()
            .unwrap_or_else(|| format!("{}_confirmation", ctx.field));
        let other_value = ctx.data.get(&other).map(normalize).unwrap_or(JsonValue::Null);
        Ok((display(value) == display(&other_value)) == self.equal)
    }

    fn placeholders(&self) -> MessageParams {
        self.other
            .as_deref()
            .map(|other| MessageParams::from([("other".to_string(), humanize(other))]))
            .unwrap_or_default()
    }
}
