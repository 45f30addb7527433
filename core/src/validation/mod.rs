//! # VALIDATION ORCHESTRATOR
//!
//! **SCOPED FIELD VALIDATION WITH ORDERED, SHORT-CIRCUITING RULE EXECUTION**
//!
//! [`FormValidator`] owns per-scope field data and rule bindings, runs rules, resolves messages
//! and records failures in an [`ErrorBag`].
//!
//! ## PASS SEMANTICS
//!
//! 1. **NORMALIZE** - string values are trimmed
//! 2. **FILTER** - optional empty fields skip every non-required rule; rules whose applicability
//!    predicate fails are skipped
//! 3. **EXECUTE** - rules run in declared order; a `required` failure (or any failure with
//!    `stop_on_first_failure`) ends the pass
//! 4. **COMMIT** - failures are written only if no newer pass for the same key has started
//!
//! ## USAGE
//!
//! ```rust
//! use formcheck::validation::FormValidator;
//! use serde_json::json;
//!
//! # futures::executor::block_on(async {
//! let validator = FormValidator::default();
//! validator.set_rules("email", json!({"required": true, "email": true}), "login");
//! validator.set_value("email", "not-an-email", "login");
//!
//! assert!(!validator.validate_scope("login").await);
//! assert_eq!(
//!     validator.errors()["login.email"],
//!     vec!["The Email field must be a valid email address."]
//! );
//! # });
//! ```

use crate::bag::{ErrorBag, ErrorEntry, ListenerSet, Subscription};
use crate::config::ValidatorConfig;
use crate::errors::FormError;
use crate::messages::{MessageRequest, MessageStore};
use crate::rules::{PredicateRule, Rule, RuleContext, RuleDeclaration, RuleInstance, RuleParams, RuleRegistry};
use crate::types::{is_empty, normalize, FormData};
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

pub mod scope;

pub use scope::{scoped_key, Scope, ALL_SCOPES, DEFAULT_SCOPE};

struct ValidatorState {
    scopes: HashMap<String, Scope>,
    bag: ErrorBag,
    locale: String,
    /// Last handed-out pass generation. Generations are never reused.
    last_generation: u64,
    /// Newest unfinished pass per scoped key.
    in_flight: HashMap<String, u64>,
}

impl ValidatorState {
    fn scope_mut(&mut self, name: &str) -> &mut Scope {
        self.scopes.entry(name.to_string()).or_default()
    }

    fn start_pass(&mut self, key: &str) -> u64 {
        self.last_generation += 1;
        self.in_flight.insert(key.to_string(), self.last_generation);
        self.last_generation
    }

    /// `true` if `generation` is still the newest pass for `key`; the key is then settled.
    fn finish_pass(&mut self, key: &str, generation: u64) -> bool {
        if self.in_flight.get(key) == Some(&generation) {
            self.in_flight.remove(key);
            true
        } else {
            false
        }
    }

    /// Drop a key's errors and make any unfinished pass for it stale.
    fn discard(&mut self, key: &str) {
        self.in_flight.remove(key);
        if self.bag.has(key) {
            self.bag.remove(key);
        }
    }

    fn bind_rules(&mut self, scope: &str, field: String, rules: Vec<RuleInstance>) {
        if rules.is_empty() {
            self.discard(&scoped_key(scope, &field));
        }
        self.scope_mut(scope).rules.insert(field, rules);
    }
}

/// Snapshot taken when a field pass starts.
struct FieldPass {
    key: String,
    rules: Vec<RuleInstance>,
    value: JsonValue,
    data: FormData,
    label: Option<String>,
    locale: String,
    generation: u64,
}

/// **FORM VALIDATOR**
///
/// **PURPOSE**: Executes validation against scope state while keeping scopes isolated.
/// **GUARANTEE**: No validation entry point fails; rule faults and unknown rules degrade to
/// "this field is invalid" or "this rule is absent".
pub struct FormValidator {
    config: ValidatorConfig,
    registry: RwLock<RuleRegistry>,
    messages: RwLock<MessageStore>,
    state: Mutex<ValidatorState>,
    listeners: ListenerSet,
}

impl FormValidator {
    /// Validator with the built-in rule kinds and the bundled English messages.
    pub fn new(config: ValidatorConfig) -> Self {
        let messages = MessageStore::with_bundled(config.fallback_locale.clone());
        Self::with_parts(config, RuleRegistry::new(), messages)
    }

    pub fn with_parts(config: ValidatorConfig, registry: RuleRegistry, messages: MessageStore) -> Self {
        let state = ValidatorState {
            scopes: HashMap::new(),
            bag: ErrorBag::with_exclusive_required(config.exclusive_required),
            locale: config.locale.clone(),
            last_generation: 0,
            in_flight: HashMap::new(),
        };
        Self {
            config,
            registry: RwLock::new(registry),
            messages: RwLock::new(messages),
            state: Mutex::new(state),
            listeners: ListenerSet::default(),
        }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Apply `change` under the state lock. If it touched the error bag, listeners are handed a
    /// snapshot after the lock is released.
    fn mutate<R>(&self, change: impl FnOnce(&mut ValidatorState) -> R) -> R {
        let (result, snapshot) = {
            let mut state = self.state.lock();
            let revision = state.bag.revision();
            let result = change(&mut *state);
            let snapshot = (state.bag.revision() != revision && !self.listeners.is_empty())
                .then(|| state.bag.snapshot());
            (result, snapshot)
        };

        if let Some(bag) = snapshot {
            self.listeners.notify(&bag);
        }
        result
    }

    // ============================================================================================
    // RULE REGISTRATION
    // ============================================================================================

    pub fn register<F>(&self, kind: impl Into<String>, factory: F, fallback_message: Option<&str>)
    where
        F: Fn(&RuleParams) -> Result<Box<dyn Rule>, FormError> + Send + Sync + 'static,
    {
        self.registry.write().register(kind, factory, fallback_message);
    }

    pub fn register_predicate<P>(&self, kind: impl Into<String>, predicate: P, fallback_message: Option<&str>)
    where
        P: Fn(&JsonValue, &str, &FormData) -> bool + Send + Sync + 'static,
    {
        self.registry
            .write()
            .register_predicate(kind, predicate, fallback_message);
    }

    pub fn register_predicate_rule(&self, kind: impl Into<String>, rule: PredicateRule, fallback_message: Option<&str>) {
        self.registry
            .write()
            .register_predicate_rule(kind, rule, fallback_message);
    }

    // ============================================================================================
    // MESSAGES & LOCALE
    // ============================================================================================

    pub fn set_messages<I, K, V>(&self, locale: &str, table: I, merge: bool)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.messages.write().set_messages(locale, table, merge);
    }

    pub fn load_messages_json(&self, locale: &str, json: &str, merge: bool) -> Result<(), FormError> {
        self.messages.write().load_json(locale, json, merge)
    }

    pub fn locale(&self) -> String {
        self.state.lock().locale.clone()
    }

    /// **SWITCH LOCALE**
    ///
    /// Re-validates every field that currently holds an error, in every scope, so displayed
    /// messages follow the new locale. Switching to the active locale does nothing.
    pub async fn set_locale(&self, locale: &str) {
        let targets: Vec<(String, String)> = {
            let mut guard = self.state.lock();
            if guard.locale == locale {
                return;
            }
            log::debug!("Switching locale from '{}' to '{}'", guard.locale, locale);
            guard.locale = locale.to_string();

            let state = &*guard;
            state
                .scopes
                .iter()
                .flat_map(|(scope_name, scope)| {
                    scope
                        .rules
                        .keys()
                        .filter(|field| state.bag.has(&scoped_key(scope_name, field)))
                        .map(move |field| (scope_name.clone(), field.clone()))
                })
                .collect()
        };

        join_all(
            targets
                .iter()
                .map(|(scope, field)| self.validate_field(field, scope)),
        )
        .await;
    }

    // ============================================================================================
    // SCOPE STATE
    // ============================================================================================

    /// Bind rules to a field, replacing any previous binding. A binding that yields no usable
    /// rule also drops the field's errors.
    pub fn set_rules(&self, field: &str, declaration: impl Into<RuleDeclaration>, scope: &str) {
        let rules = self.registry.read().parse(declaration);
        self.mutate(|state| state.bind_rules(scope, field.to_string(), rules));
    }

    /// Bind several fields at once; a JSON object of `field -> declaration` works directly.
    pub fn set_multiple_rules<I, K, D>(&self, mapping: I, scope: &str)
    where
        I: IntoIterator<Item = (K, D)>,
        K: Into<String>,
        D: Into<RuleDeclaration>,
    {
        let parsed: Vec<(String, Vec<RuleInstance>)> = {
            let registry = self.registry.read();
            mapping
                .into_iter()
                .map(|(field, declaration)| (field.into(), registry.parse(declaration)))
                .collect()
        };
        self.mutate(|state| {
            for (field, rules) in parsed {
                state.bind_rules(scope, field, rules);
            }
        });
    }

    /// Unbind a field's rules and drop its errors.
    pub fn remove_rules(&self, field: &str, scope: &str) {
        self.mutate(|state| {
            if let Some(scope_state) = state.scopes.get_mut(scope) {
                scope_state.rules.remove(field);
            }
            state.discard(&scoped_key(scope, field));
        });
    }

    pub fn rules(&self, field: &str, scope: &str) -> Vec<RuleInstance> {
        self.state
            .lock()
            .scopes
            .get(scope)
            .map(|s| s.rules(field).to_vec())
            .unwrap_or_default()
    }

    /// Merge values into the scope's data. Never triggers validation.
    pub fn set_data<I, K, V>(&self, partial: I, scope: &str)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<JsonValue>,
    {
        let mut state = self.state.lock();
        state
            .scope_mut(scope)
            .data
            .extend(partial.into_iter().map(|(k, v)| (k.into(), v.into())));
    }

    pub fn set_value(&self, field: &str, value: impl Into<JsonValue>, scope: &str) {
        self.state
            .lock()
            .scope_mut(scope)
            .data
            .insert(field.to_string(), value.into());
    }

    pub fn value(&self, field: &str, scope: &str) -> Option<JsonValue> {
        self.state
            .lock()
            .scopes
            .get(scope)
            .and_then(|s| s.data.get(field).cloned())
    }

    pub fn data(&self, scope: &str) -> FormData {
        self.state
            .lock()
            .scopes
            .get(scope)
            .map(|s| s.data.clone())
            .unwrap_or_default()
    }

    /// Display name used for `{name}` instead of the humanized field name.
    pub fn set_label(&self, field: &str, label: impl Into<String>, scope: &str) {
        self.state
            .lock()
            .scope_mut(scope)
            .labels
            .insert(field.to_string(), label.into());
    }

    pub fn set_labels<I, K, V>(&self, labels: I, scope: &str)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut state = self.state.lock();
        state
            .scope_mut(scope)
            .labels
            .extend(labels.into_iter().map(|(k, v)| (k.into(), v.into())));
    }

    /// **RESET**
    ///
    /// Clears errors and data of one scope, or of every scope for [`ALL_SCOPES`]. Rule bindings
    /// and labels stay. Passes still in flight for the cleared keys will not write back.
    pub fn reset(&self, scope: &str) {
        self.mutate(|state| {
            if scope == ALL_SCOPES {
                for scope_state in state.scopes.values_mut() {
                    scope_state.data.clear();
                }
                state.in_flight.clear();
                state.bag.clear();
                log::debug!("Reset all scopes");
                return;
            }

            let Some(scope_state) = state.scopes.get_mut(scope) else {
                return;
            };
            let keys: Vec<String> = scope_state
                .known_fields()
                .into_iter()
                .map(|field| scoped_key(scope, field))
                .collect();
            scope_state.data.clear();

            for key in &keys {
                state.in_flight.remove(key);
            }
            state.bag.remove_all(keys.iter().map(String::as_str));
            log::debug!("Reset scope '{}'", scope);
        });
    }

    pub fn reset_all(&self) {
        self.reset(ALL_SCOPES);
    }

    // ============================================================================================
    // VALIDATION
    // ============================================================================================

    /// **VALIDATE FIELD**
    ///
    /// `true` iff the pass recorded no failure. The field's earlier errors are cleared first, so a
    /// field without rules ends up valid and error-free.
    pub async fn validate_field(&self, field: &str, scope: &str) -> bool {
        let Some(pass) = self.begin_pass(field, scope) else {
            return true;
        };

        let failures = self.run_rules(field, &pass).await;
        let valid = failures.is_empty();
        self.commit(pass, failures);
        valid
    }

    /// **VALIDATE SCOPE**
    ///
    /// Validates, concurrently, every field that has rules AND a value in the scope's data.
    /// Fields with rules but no value are left alone.
    pub async fn validate_scope(&self, scope: &str) -> bool {
        let fields = self.mutate(|state| {
            let fields = state.scope_mut(scope).eligible_fields();
            if !fields.is_empty() {
                let keys: Vec<String> = fields.iter().map(|f| scoped_key(scope, f)).collect();
                state.bag.remove_all(keys.iter().map(String::as_str));
            }
            fields
        });

        log::debug!("Validating {} field(s) in scope '{}'", fields.len(), scope);
        let results = join_all(fields.iter().map(|field| self.validate_field(field, scope))).await;
        results.into_iter().all(|valid| valid)
    }

    /// [`validate_scope`](Self::validate_scope) bounded by a timer. On timeout the unfinished
    /// field passes are dropped without writing errors. Needs a Tokio runtime with timers.
    pub async fn validate_scope_within(&self, scope: &str, limit: Duration) -> Result<bool, FormError> {
        tokio::time::timeout(limit, self.validate_scope(scope))
            .await
            .map_err(|_| {
                log::warn!("Validation of scope '{}' exceeded {:?}", scope, limit);
                FormError::Timeout {
                    timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                }
            })
    }

    fn begin_pass(&self, field: &str, scope: &str) -> Option<FieldPass> {
        self.mutate(|state| {
            let key = scoped_key(scope, field);
            let scope_state = state.scopes.entry(scope.to_string()).or_default();
            let Some(rules) = scope_state.rules.get(field).filter(|r| !r.is_empty()).cloned() else {
                state.discard(&key);
                return None;
            };
            let data = scope_state.data.clone();
            let value = data.get(field).map(normalize).unwrap_or(JsonValue::Null);
            let label = scope_state.labels.get(field).cloned();

            let generation = state.start_pass(&key);
            state.bag.remove(&key);

            Some(FieldPass {
                key,
                rules,
                value,
                data,
                label,
                locale: state.locale.clone(),
                generation,
            })
        })
    }

    async fn run_rules(&self, field: &str, pass: &FieldPass) -> Vec<ErrorEntry> {
        let ctx = RuleContext {
            field,
            data: &pass.data,
        };
        let has_required = pass.rules.iter().any(RuleInstance::is_required);
        let empty = is_empty(&pass.value);
        let mut failures = Vec::new();

        for rule in &pass.rules {
            // Optional and empty: only `required` could object.
            if !rule.is_required() && !has_required && empty && !self.config.validate_empty_fields {
                continue;
            }

            let applies = panic::catch_unwind(AssertUnwindSafe(|| rule.should_apply(&pass.value, &ctx)));
            let verdict = match applies {
                Ok(false) => continue,
                Ok(true) => AssertUnwindSafe(rule.validate(&pass.value, &ctx))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(FormError::panicked(rule.kind()))),
                Err(_) => Err(FormError::panicked(rule.kind())),
            };
            let message = match verdict {
                Ok(true) => continue,
                Ok(false) => self.failure_message(rule, field, pass),
                Err(e) => {
                    log::error!("Validation of '{}' faulted: {}", pass.key, e);
                    self.fault_message(field, pass)
                }
            };

            failures.push(ErrorEntry::new(pass.key.as_str(), message, rule.kind()));
            if self.config.stop_on_first_failure || rule.is_required() {
                break;
            }
        }

        failures
    }

    fn failure_message(&self, rule: &RuleInstance, field: &str, pass: &FieldPass) -> String {
        let params = rule.message_params();
        self.messages.read().resolve(&MessageRequest {
            kind: rule.kind(),
            field,
            label: pass.label.as_deref(),
            params: &params,
            locale: &pass.locale,
            fallback: rule.fallback_message(),
        })
    }

    fn fault_message(&self, field: &str, pass: &FieldPass) -> String {
        self.messages
            .read()
            .resolve_fault(field, pass.label.as_deref(), &pass.locale)
    }

    fn commit(&self, pass: FieldPass, failures: Vec<ErrorEntry>) {
        self.mutate(|state| {
            if !state.finish_pass(&pass.key, pass.generation) {
                log::debug!("Discarding superseded pass for '{}'", pass.key);
                return;
            }
            if !failures.is_empty() {
                state.bag.replace(&pass.key, failures);
            }
        });
    }

    // ============================================================================================
    // QUERIES
    // ============================================================================================

    /// Flattened error map keyed by scoped key.
    pub fn errors(&self) -> BTreeMap<String, Vec<String>> {
        self.state.lock().bag.all_by_field()
    }

    pub fn errors_json(&self) -> JsonValue {
        serde_json::to_value(self.errors()).unwrap_or(JsonValue::Null)
    }

    pub fn field_errors(&self, field: &str, scope: &str) -> Vec<String> {
        self.state
            .lock()
            .bag
            .get(&scoped_key(scope, field))
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn first_error(&self, field: &str, scope: &str) -> Option<String> {
        self.state
            .lock()
            .bag
            .first(&scoped_key(scope, field))
            .map(str::to_string)
    }

    pub fn has_errors(&self, field: &str, scope: &str) -> bool {
        self.state.lock().bag.has(&scoped_key(scope, field))
    }

    pub fn any_errors(&self) -> bool {
        self.state.lock().bag.any()
    }

    /// `true` when no field of the scope currently holds an error.
    pub fn is_valid(&self, scope: &str) -> bool {
        let state = self.state.lock();
        state.scopes.get(scope).map_or(true, |scope_state| {
            !scope_state
                .known_fields()
                .into_iter()
                .any(|field| state.bag.has(&scoped_key(scope, field)))
        })
    }

    /// Read the error bag directly.
    pub fn with_errors<R>(&self, read: impl FnOnce(&ErrorBag) -> R) -> R {
        read(&self.state.lock().bag)
    }

    /// **SUBSCRIBE**
    ///
    /// Listeners run synchronously, before the mutating call returns, with a snapshot of the
    /// error bag. The validator is unlocked by then, so a listener may query it freely.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ErrorBag) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }
}

impl Default for FormValidator {
    fn default() -> Self {
        Self::new(ValidatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn validator() -> FormValidator {
        FormValidator::default()
    }

    mod field_tests {
        use super::*;

        #[test]
        fn test_no_rules_is_valid_without_mutation() {
            let v = validator();
            v.set_value("name", "", DEFAULT_SCOPE);
            assert!(block_on(v.validate_field("name", DEFAULT_SCOPE)));
            assert!(!v.any_errors());
        }

        #[test]
        fn test_unknown_kind_is_ignored() {
            let v = validator();
            v.set_rules("name", "required|bogus:5", DEFAULT_SCOPE);
            v.set_value("name", "Ada", DEFAULT_SCOPE);
            assert_eq!(v.rules("name", DEFAULT_SCOPE).len(), 1);
            assert!(block_on(v.validate_field("name", DEFAULT_SCOPE)));
        }

        #[test]
        fn test_whitespace_fails_required_only() {
            let v = validator();
            v.set_rules("name", json!({"required": true, "min": 3}), DEFAULT_SCOPE);
            v.set_value("name", "   ", DEFAULT_SCOPE);

            assert!(!block_on(v.validate_field("name", DEFAULT_SCOPE)));
            assert_eq!(
                v.field_errors("name", DEFAULT_SCOPE),
                vec!["The Name field is required."]
            );
        }

        #[test]
        fn test_optional_empty_skips_format_rules() {
            let v = validator();
            v.set_rules("website", "url|min:10", DEFAULT_SCOPE);
            v.set_value("website", "", DEFAULT_SCOPE);
            assert!(block_on(v.validate_field("website", DEFAULT_SCOPE)));
            assert!(!v.has_errors("website", DEFAULT_SCOPE));
        }

        #[test]
        fn test_validate_empty_fields_option() {
            let v = FormValidator::new(ValidatorConfig::default().validate_empty_fields(true));
            v.set_rules("website", "min:10", DEFAULT_SCOPE);
            v.set_value("website", "", DEFAULT_SCOPE);
            assert!(!block_on(v.validate_field("website", DEFAULT_SCOPE)));
        }

        #[test]
        fn test_collects_all_failures_in_order() {
            let v = validator();
            v.set_rules("code", "alpha|min:5", DEFAULT_SCOPE);
            v.set_value("code", "ab1", DEFAULT_SCOPE);
            assert!(!block_on(v.validate_field("code", DEFAULT_SCOPE)));
            assert_eq!(
                v.field_errors("code", DEFAULT_SCOPE),
                vec![
                    "The Code field may only contain letters.",
                    "The Code field must be at least 5 characters.",
                ]
            );
        }

        #[test]
        fn test_stop_on_first_failure() {
            let v = FormValidator::new(ValidatorConfig::default().stop_on_first_failure(true));
            v.set_rules("code", "alpha|min:5", DEFAULT_SCOPE);
            v.set_value("code", "ab1", DEFAULT_SCOPE);
            block_on(v.validate_field("code", DEFAULT_SCOPE));
            assert_eq!(v.field_errors("code", DEFAULT_SCOPE).len(), 1);
        }

        #[test]
        fn test_required_first_even_when_declared_last() {
            let v = FormValidator::new(ValidatorConfig::default().exclusive_required(false));
            v.set_rules("email", "email|required", DEFAULT_SCOPE);
            v.set_value("email", "", DEFAULT_SCOPE);
            block_on(v.validate_field("email", DEFAULT_SCOPE));
            assert_eq!(
                v.first_error("email", DEFAULT_SCOPE).as_deref(),
                Some("The Email field is required.")
            );
        }

        #[test]
        fn test_label_used_in_message() {
            let v = validator();
            v.set_rules("dob", "required", DEFAULT_SCOPE);
            v.set_label("dob", "date of birth", DEFAULT_SCOPE);
            v.set_value("dob", "", DEFAULT_SCOPE);
            block_on(v.validate_field("dob", DEFAULT_SCOPE));
            assert_eq!(
                v.first_error("dob", DEFAULT_SCOPE).as_deref(),
                Some("The date of birth field is required.")
            );
        }

        #[test]
        fn test_rule_fault_becomes_generic_failure() {
            let v = validator();
            v.register(
                "remote",
                |_: &RuleParams| Ok(Box::new(FaultyRule) as Box<dyn Rule>),
                None,
            );
            v.set_rules("handle", "remote", DEFAULT_SCOPE);
            v.set_value("handle", "ada", DEFAULT_SCOPE);

            assert!(!block_on(v.validate_field("handle", DEFAULT_SCOPE)));
            assert_eq!(
                v.field_errors("handle", DEFAULT_SCOPE),
                vec!["The Handle field is invalid."]
            );
        }

        #[test]
        fn test_rule_panic_is_contained() {
            let v = validator();
            v.register_predicate("explode", |_, _, _| panic!("boom"), None);
            v.set_rules("handle", "explode|min:2", DEFAULT_SCOPE);
            v.set_value("handle", "ada", DEFAULT_SCOPE);

            assert!(!block_on(v.validate_field("handle", DEFAULT_SCOPE)));
            assert_eq!(v.field_errors("handle", DEFAULT_SCOPE).len(), 1);
        }

        #[test]
        fn test_panicking_condition_is_contained() {
            let v = validator();
            v.register_predicate_rule(
                "guarded",
                PredicateRule::new(|_, _, _| true).when(|_, _, _| panic!("condition blew up")),
                None,
            );
            v.set_rules("handle", "guarded|min:2", DEFAULT_SCOPE);
            v.set_value("handle", "ada", DEFAULT_SCOPE);

            assert!(!block_on(v.validate_scope(DEFAULT_SCOPE)));
            assert_eq!(
                v.field_errors("handle", DEFAULT_SCOPE),
                vec!["The Handle field is invalid."]
            );
        }

        #[test]
        fn test_optional_empty_never_runs_other_rules() {
            let v = validator();
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&calls);
            v.register_predicate(
                "counted",
                move |_, _, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    true
                },
                None,
            );
            v.set_rules("nickname", "counted|email", DEFAULT_SCOPE);

            v.set_value("nickname", "   ", DEFAULT_SCOPE);
            assert!(block_on(v.validate_field("nickname", DEFAULT_SCOPE)));
            assert_eq!(calls.load(Ordering::SeqCst), 0);

            v.set_value("nickname", "ada", DEFAULT_SCOPE);
            block_on(v.validate_field("nickname", DEFAULT_SCOPE));
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }

        #[test]
        fn test_rebinding_to_no_usable_rules_clears_errors() {
            let v = validator();
            v.set_rules("name", "required", DEFAULT_SCOPE);
            v.set_value("name", "", DEFAULT_SCOPE);
            assert!(!block_on(v.validate_field("name", DEFAULT_SCOPE)));

            v.set_rules("name", "bogus", DEFAULT_SCOPE);
            assert!(!v.has_errors("name", DEFAULT_SCOPE));
            assert!(block_on(v.validate_field("name", DEFAULT_SCOPE)));
            assert!(block_on(v.validate_scope(DEFAULT_SCOPE)));
            assert!(v.is_valid(DEFAULT_SCOPE));
            assert!(v.errors().is_empty());
        }

        #[test]
        fn test_empty_rule_map_clears_errors() {
            let v = validator();
            v.set_rules("name", "required", "profile");
            v.set_value("name", "", "profile");
            block_on(v.validate_scope("profile"));
            assert!(v.has_errors("name", "profile"));

            v.set_multiple_rules([("name", json!({}))], "profile");
            assert!(v.is_valid("profile"));
            assert!(!v.any_errors());
        }

        struct FaultyRule;

        #[async_trait::async_trait]
        impl Rule for FaultyRule {
            async fn validate(&self, _value: &JsonValue, _ctx: &RuleContext<'_>) -> Result<bool, FormError> {
                Err(FormError::rule("backend unavailable"))
            }
        }
    }

    mod scope_tests {
        use super::*;

        #[test]
        fn test_login_scenario() {
            let v = validator();
            v.set_rules("email", json!({"required": true, "email": true}), "login");
            v.set_data([("email", "not-an-email")], "login");

            assert!(!block_on(v.validate_scope("login")));
            let errors = v.errors();
            assert_eq!(errors.len(), 1);
            assert_eq!(
                errors["login.email"],
                vec!["The Email field must be a valid email address."]
            );
        }

        #[test]
        fn test_fields_without_data_pass_through() {
            let v = validator();
            v.set_multiple_rules([("name", "required"), ("email", "required|email")], "signup");
            v.set_value("name", "Ada", "signup");

            assert!(block_on(v.validate_scope("signup")));
            assert!(!v.has_errors("email", "signup"));
        }

        #[test]
        fn test_scopes_are_isolated() {
            let v = validator();
            v.set_rules("email", "required", "a");
            v.set_rules("email", "required", "b");
            v.set_value("email", "", "a");
            v.set_value("email", "", "b");

            block_on(v.validate_scope("a"));
            assert!(v.has_errors("email", "a"));
            assert!(!v.has_errors("email", "b"));
            assert!(v.is_valid("b"));

            v.reset("a");
            assert!(v.is_valid("a"));
            assert!(v.data("a").is_empty());
            assert_eq!(v.value("email", "b"), Some(json!("")));
        }

        #[test]
        fn test_idempotent_scope_validation() {
            let v = validator();
            v.set_multiple_rules(
                json!({"email": "required|email", "age": {"integer": true, "min_value": 18}})
                    .as_object()
                    .cloned()
                    .unwrap_or_default(),
                DEFAULT_SCOPE,
            );
            v.set_data(json!({"email": "x", "age": 12}).as_object().cloned().unwrap_or_default(), DEFAULT_SCOPE);

            block_on(v.validate_scope(DEFAULT_SCOPE));
            let first = v.errors();
            block_on(v.validate_scope(DEFAULT_SCOPE));
            assert_eq!(first, v.errors());
            assert_eq!(first.len(), 2);
        }

        #[test]
        fn test_reset_all_keeps_rules() {
            let v = validator();
            v.set_rules("name", "required", "x");
            v.set_value("name", "", "x");
            block_on(v.validate_scope("x"));
            assert!(v.any_errors());

            v.reset_all();
            assert!(!v.any_errors());
            assert_eq!(v.rules("name", "x").len(), 1);
        }

        #[test]
        fn test_remove_rules_drops_errors() {
            let v = validator();
            v.set_rules("name", "required", DEFAULT_SCOPE);
            v.set_value("name", "", DEFAULT_SCOPE);
            block_on(v.validate_scope(DEFAULT_SCOPE));
            v.remove_rules("name", DEFAULT_SCOPE);
            assert!(!v.any_errors());
            assert!(v.rules("name", DEFAULT_SCOPE).is_empty());
        }
    }

    mod bookkeeping_tests {
        use super::*;

        #[test]
        fn test_settled_passes_leave_no_pass_records() {
            let v = validator();
            v.set_multiple_rules([("name", "required"), ("email", "email")], "signup");
            v.set_data([("name", ""), ("email", "ada@example.com")], "signup");
            block_on(v.validate_scope("signup"));
            assert!(v.state.lock().in_flight.is_empty());

            v.reset("signup");
            v.remove_rules("name", "signup");
            assert!(v.state.lock().in_flight.is_empty());
        }

        #[test]
        fn test_listener_may_query_validator() {
            let v = Arc::new(validator());
            let seen = Arc::new(Mutex::new(Vec::new()));

            let weak = Arc::downgrade(&v);
            let sink = Arc::clone(&seen);
            let _subscription = v.subscribe(move |bag| {
                if let Some(v) = weak.upgrade() {
                    sink.lock().push((bag.count(), v.errors().len(), v.any_errors()));
                }
            });

            v.set_rules("name", "required", DEFAULT_SCOPE);
            v.set_value("name", "", DEFAULT_SCOPE);
            block_on(v.validate_scope(DEFAULT_SCOPE));

            let seen = seen.lock();
            assert!(!seen.is_empty());
            assert_eq!(seen.last(), Some(&(1, 1, true)));
        }

        #[test]
        fn test_listener_not_called_without_bag_change() {
            let v = validator();
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&calls);
            let _subscription = v.subscribe(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

            v.set_value("name", "Ada", DEFAULT_SCOPE);
            v.set_rules("name", "required", DEFAULT_SCOPE);
            assert_eq!(calls.load(Ordering::SeqCst), 0);
        }
    }

    mod locale_tests {
        use super::*;

        #[test]
        fn test_locale_switch_revalidates_errored_fields() {
            let v = validator();
            v.set_messages("fr", [("required", "Le champ {name} est obligatoire.")], false);
            v.set_rules("name", "required", DEFAULT_SCOPE);
            v.set_rules("email", "email", DEFAULT_SCOPE);
            v.set_data([("name", ""), ("email", "bad")], DEFAULT_SCOPE);
            block_on(v.validate_scope(DEFAULT_SCOPE));

            block_on(v.set_locale("fr"));
            assert_eq!(v.locale(), "fr");
            assert_eq!(
                v.first_error("name", DEFAULT_SCOPE).as_deref(),
                Some("Le champ Name est obligatoire.")
            );
            // No French entry: English fallback, not the generic template.
            assert_eq!(
                v.first_error("email", DEFAULT_SCOPE).as_deref(),
                Some("The Email field must be a valid email address.")
            );
        }
    }
}
