use super::builtin;
use super::parser::{normalize_declaration, RuleDeclaration, RuleSpec};
use super::{Rule, RuleContext, RuleInstance, RuleParams};
use crate::errors::{codes, FormError};
use crate::types::FormData;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a rule from its declared parameters.
pub type RuleFactory = Arc<dyn Fn(&RuleParams) -> Result<Box<dyn Rule>, FormError> + Send + Sync>;

type Predicate = Arc<dyn Fn(&JsonValue, &str, &FormData) -> bool + Send + Sync>;

struct RegistryEntry {
    factory: RuleFactory,
    fallback_message: Option<String>,
    /// String-form parameter text is handed over unsplit.
    raw_params: bool,
}

/// **RULE REGISTRY**
///
/// **PURPOSE**: Maps rule-kind names to factories and turns declarations into rule instances.
/// **GUARANTEE**: Parsing never fails; unknown kinds and unusable parameters are dropped with a
/// diagnostic so the remaining rules of a declaration still run.
pub struct RuleRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl RuleRegistry {
    /// Registry without any rule kinds.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Registry preloaded with the built-in kinds.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        builtin::register_all(&mut registry);
        registry
    }

    /// **REGISTER RULE TYPE**
    ///
    /// Re-registering a kind replaces it.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F, fallback_message: Option<&str>)
    where
        F: Fn(&RuleParams) -> Result<Box<dyn Rule>, FormError> + Send + Sync + 'static,
    {
        self.insert(kind.into(), Arc::new(factory), fallback_message, false);
    }

    /// Like [`register`](Self::register), but string-form parameters arrive as one unsplit string.
    pub fn register_raw<F>(&mut self, kind: impl Into<String>, factory: F, fallback_message: Option<&str>)
    where
        F: Fn(&RuleParams) -> Result<Box<dyn Rule>, FormError> + Send + Sync + 'static,
    {
        self.insert(kind.into(), Arc::new(factory), fallback_message, true);
    }

    /// **REGISTER PREDICATE**
    ///
    /// Wraps a plain `(value, field, all_values) -> bool` function into a rule kind. Without a
    /// fallback message its failures use the generic template.
    pub fn register_predicate<P>(&mut self, kind: impl Into<String>, predicate: P, fallback_message: Option<&str>)
    where
        P: Fn(&JsonValue, &str, &FormData) -> bool + Send + Sync + 'static,
    {
        self.register_predicate_rule(kind, PredicateRule::new(predicate), fallback_message);
    }

    /// Register a prepared [`PredicateRule`], e.g. one carrying a [`PredicateRule::when`] condition.
    pub fn register_predicate_rule(
        &mut self,
        kind: impl Into<String>,
        rule: PredicateRule,
        fallback_message: Option<&str>,
    ) {
        self.register(
            kind,
            move |_params: &RuleParams| Ok(Box::new(rule.clone()) as Box<dyn Rule>),
            fallback_message,
        );
    }

    fn insert(&mut self, kind: String, factory: RuleFactory, fallback_message: Option<&str>, raw_params: bool) {
        if self.entries.contains_key(&kind) {
            log::debug!("Replacing rule kind '{}'", kind);
        }
        self.entries.insert(
            kind,
            RegistryEntry {
                factory,
                fallback_message: fallback_message.map(str::to_string),
                raw_params,
            },
        );
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.entries.contains_key(kind)
    }

    /// Registered kind names, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Bind one declared `(kind, params)` pair.
    pub fn build(&self, spec: &RuleSpec) -> Result<RuleInstance, FormError> {
        let entry = self
            .entries
            .get(&spec.kind)
            .ok_or_else(|| FormError::Declaration {
                code: codes::UNKNOWN_RULE.to_string(),
                message: format!("Rule kind '{}' is not registered", spec.kind),
            })?;

        let params = match (&spec.raw, entry.raw_params) {
            (Some(raw), true) => RuleParams::Single(JsonValue::String(raw.clone())),
            _ => spec.params.clone(),
        };

        let rule = (entry.factory)(&params)?;
        Ok(RuleInstance::new(spec.kind.clone(), params, rule)
            .with_fallback_message(entry.fallback_message.clone()))
    }

    /// **PARSE DECLARATION**
    ///
    /// Ordered rule instances for any declaration shape. Entries that cannot be built are
    /// logged and left out.
    pub fn parse(&self, declaration: impl Into<RuleDeclaration>) -> Vec<RuleInstance> {
        let declaration = declaration.into();
        normalize_declaration(&declaration)
            .iter()
            .filter_map(|spec| match self.build(spec) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    log::warn!("Dropping rule '{}': {}", spec.kind, e);
                    None
                }
            })
            .collect()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// **PREDICATE RULE**
///
/// A plain function wrapped as a rule, optionally gated by an applicability condition.
#[derive(Clone)]
pub struct PredicateRule {
    predicate: Predicate,
    condition: Option<Predicate>,
}

impl PredicateRule {
    pub fn new<P>(predicate: P) -> Self
    where
        P: Fn(&JsonValue, &str, &FormData) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            condition: None,
        }
    }

    /// Only run the predicate when `condition` holds.
    pub fn when<C>(mut self, condition: C) -> Self
    where
        C: Fn(&JsonValue, &str, &FormData) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }
}

#[async_trait]
impl Rule for PredicateRule {
    async fn validate(&self, value: &JsonValue, ctx: &RuleContext<'_>) -> Result<bool, FormError> {
        Ok((self.predicate)(value, ctx.field, ctx.data))
    }

    fn should_apply(&self, value: &JsonValue, ctx: &RuleContext<'_>) -> bool {
        self.condition
            .as_ref()
            .map_or(true, |condition| condition(value, ctx.field, ctx.data))
    }
}
