//! # MESSAGE RESOLUTION
//!
//! Turns a rule failure into display text. Templates are looked up in a fixed order:
//!
//! 1. `"<field>.<kind>"` in the target locale
//! 2. `"<kind>"` in the target locale
//! 3. `"<kind>"` in the fallback locale (when it differs from the target)
//! 4. the rule's registration-time fallback message
//! 5. [`GENERIC_TEMPLATE`]
//!
//! The winning template has `{name}` replaced by the field label (or the humanized field name)
//! and every other `{key}` replaced from the rule's parameters. Unknown placeholders stay as-is.

use crate::config::DEFAULT_LOCALE;
use crate::errors::{codes, FormError};
use crate::rules::MessageParams;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Last-resort template.
pub const GENERIC_TEMPLATE: &str = "The {name} field is invalid.";

/// Table key used for rule faults.
pub const INVALID_KEY: &str = "invalid";

const BUNDLED_EN: &str = include_str!("../../locales/en.json");

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("valid placeholder pattern"));

/// Lookup key -> template for one locale.
pub type MessageTable = HashMap<String, String>;

/// Everything needed to produce one message.
#[derive(Debug, Clone, Copy)]
pub struct MessageRequest<'a> {
    pub kind: &'a str,
    pub field: &'a str,
    /// Display name overriding the humanized field name.
    pub label: Option<&'a str>,
    pub params: &'a MessageParams,
    pub locale: &'a str,
    /// The rule's registration-time fallback message.
    pub fallback: Option<&'a str>,
}

/// **MESSAGE STORE**
///
/// **PURPOSE**: Holds per-locale message tables and resolves failures to text.
/// **GUARANTEE**: Resolution always yields a string; a missing table is never an error.
#[derive(Debug, Clone)]
pub struct MessageStore {
    tables: HashMap<String, MessageTable>,
    fallback_locale: String,
}

impl MessageStore {
    /// Store without any tables.
    pub fn new(fallback_locale: impl Into<String>) -> Self {
        Self {
            tables: HashMap::new(),
            fallback_locale: fallback_locale.into(),
        }
    }

    /// Store preloaded with the bundled English table.
    pub fn with_bundled(fallback_locale: impl Into<String>) -> Self {
        let mut store = Self::new(fallback_locale);
        match parse_table(BUNDLED_EN) {
            Ok(table) => store.set_messages(DEFAULT_LOCALE, table, false),
            Err(e) => log::error!("Bundled English messages unusable: {}", e),
        }
        store
    }

    pub fn fallback_locale(&self) -> &str {
        &self.fallback_locale
    }

    pub fn set_fallback_locale(&mut self, locale: impl Into<String>) {
        self.fallback_locale = locale.into();
    }

    /// **LOAD TABLE**
    ///
    /// Replaces the locale's table, or merges into it when `merge` is set (incoming keys win).
    pub fn set_messages<I, K, V>(&mut self, locale: &str, table: I, merge: bool)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let incoming = table.into_iter().map(|(k, v)| (k.into(), v.into()));
        if merge {
            self.tables.entry(locale.to_string()).or_default().extend(incoming);
        } else {
            self.tables.insert(locale.to_string(), incoming.collect());
        }
        log::debug!("Loaded messages for locale '{}' (merge: {})", locale, merge);
    }

    /// Load a JSON table. Nested objects flatten to dotted keys, so
    /// `{"email": {"required": "..."}}` provides `"email.required"`.
    pub fn load_json(&mut self, locale: &str, json: &str, merge: bool) -> Result<(), FormError> {
        let table = parse_table(json)?;
        self.set_messages(locale, table, merge);
        Ok(())
    }

    pub fn has_locale(&self, locale: &str) -> bool {
        self.tables.contains_key(locale)
    }

    pub fn get(&self, locale: &str, key: &str) -> Option<&str> {
        self.tables
            .get(locale)
            .and_then(|table| table.get(key))
            .map(String::as_str)
    }

    /// The template that wins the lookup order for `kind` on `field`.
    pub fn template<'a>(
        &'a self,
        kind: &str,
        field: &str,
        locale: &str,
        fallback: Option<&'a str>,
    ) -> &'a str {
        let qualified = format!("{}.{}", field, kind);
        self.get(locale, &qualified)
            .or_else(|| self.get(locale, kind))
            .or_else(|| self.from_fallback_locale(locale, kind))
            .or(fallback)
            .unwrap_or(GENERIC_TEMPLATE)
    }

    fn from_fallback_locale(&self, locale: &str, key: &str) -> Option<&str> {
        if locale == self.fallback_locale {
            None
        } else {
            self.get(&self.fallback_locale, key)
        }
    }

    /// **RESOLVE**
    pub fn resolve(&self, request: &MessageRequest<'_>) -> String {
        let template = self.template(request.kind, request.field, request.locale, request.fallback);
        let name = request
            .label
            .map(str::to_string)
            .unwrap_or_else(|| humanize(request.field));
        interpolate(template, &name, request.params)
    }

    /// Message for a rule that faulted instead of producing a verdict.
    pub fn resolve_fault(&self, field: &str, label: Option<&str>, locale: &str) -> String {
        let template = self
            .get(locale, INVALID_KEY)
            .or_else(|| self.from_fallback_locale(locale, INVALID_KEY))
            .unwrap_or(GENERIC_TEMPLATE);
        let name = label.map(str::to_string).unwrap_or_else(|| humanize(field));
        interpolate(template, &name, &MessageParams::new())
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::with_bundled(DEFAULT_LOCALE)
    }
}

fn parse_table(json: &str) -> Result<MessageTable, FormError> {
    let value: JsonValue = serde_json::from_str(json).map_err(|e| FormError::Messages {
        code: codes::INVALID_MESSAGES.to_string(),
        message: format!("Invalid message table: {}", e),
    })?;

    let mut table = MessageTable::new();
    flatten_into(&mut table, None, &value)?;
    Ok(table)
}

fn flatten_into(table: &mut MessageTable, prefix: Option<&str>, value: &JsonValue) -> Result<(), FormError> {
    match value {
        JsonValue::Object(map) => {
            for (key, nested) in map {
                let key = match prefix {
                    Some(prefix) => format!("{}.{}", prefix, key),
                    None => key.clone(),
                };
                flatten_into(table, Some(&key), nested)?;
            }
            Ok(())
        }
        JsonValue::String(template) => {
            if let Some(key) = prefix {
                table.insert(key.to_string(), template.clone());
            }
            Ok(())
        }
        other => Err(FormError::Messages {
            code: codes::INVALID_MESSAGES.to_string(),
            message: format!(
                "Message '{}' must be a string, found {}",
                prefix.unwrap_or("<root>"),
                other
            ),
        }),
    }
}

/// Display form of a field identifier: `firstName` -> `First Name`, `zip_code` -> `Zip code`,
/// `URLField` -> `URL Field`.
pub fn humanize(field: &str) -> String {
    let chars: Vec<char> = field.chars().collect();
    let mut words = String::with_capacity(field.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        let previous = i.checked_sub(1).map(|p| chars[p]);
        let next = chars.get(i + 1).copied();
        match c {
            '_' | '-' | '.' => words.push(' '),
            c if c.is_uppercase() && starts_word(previous, next) => {
                words.push(' ');
                words.push(c);
            }
            c => words.push(c),
        }
    }

    let trimmed = words.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// An uppercase letter opens a word after a lowercase letter or digit, or when it ends a run of
/// capitals and a lowercase letter follows.
fn starts_word(previous: Option<char>, next: Option<char>) -> bool {
    match previous {
        Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
        Some(p) if p.is_uppercase() => next.map_or(false, char::is_lowercase),
        _ => false,
    }
}

/// Substitute `{name}` and parameter placeholders; unknown placeholders stay verbatim.
pub fn interpolate(template: &str, name: &str, params: &MessageParams) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let key = &caps[1];
            if key == "name" {
                name.to_string()
            } else {
                params
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            }
        })
        .into_owned()
}
