//! Declaration tokenizer: pipe strings, ordered lists and object maps all normalize to an ordered
//! list of [`RuleSpec`]s. Nothing here knows which kinds exist; that is the registry's job.

use super::RuleParams;
use serde_json::{Map, Value as JsonValue};

/// **RULE DECLARATION**
///
/// The three accepted input shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleDeclaration {
    /// `"required|min:5"`
    Text(String),
    /// `["required", {"min": 5}]`
    List(Vec<JsonValue>),
    /// `{"required": true, "min": 5}`; entry order is insertion order.
    Map(Map<String, JsonValue>),
}

impl From<&str> for RuleDeclaration {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for RuleDeclaration {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<JsonValue>> for RuleDeclaration {
    fn from(items: Vec<JsonValue>) -> Self {
        Self::List(items)
    }
}

impl From<Map<String, JsonValue>> for RuleDeclaration {
    fn from(map: Map<String, JsonValue>) -> Self {
        Self::Map(map)
    }
}

impl From<JsonValue> for RuleDeclaration {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::String(text) => Self::Text(text),
            JsonValue::Array(items) => Self::List(items),
            JsonValue::Object(map) => Self::Map(map),
            other => {
                log::warn!("Ignoring malformed rule declaration: {}", other);
                Self::List(Vec::new())
            }
        }
    }
}

impl From<&JsonValue> for RuleDeclaration {
    fn from(value: &JsonValue) -> Self {
        Self::from(value.clone())
    }
}

/// One declared `(kind, params)` pair, before the kind is looked up.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSpec {
    pub kind: String,
    pub params: RuleParams,
    /// Unsplit parameter text of a string-form segment (`"regex:^a,b$"` keeps `^a,b$`).
    pub raw: Option<String>,
}

impl RuleSpec {
    pub fn new(kind: impl Into<String>, params: RuleParams) -> Self {
        Self {
            kind: kind.into(),
            params,
            raw: None,
        }
    }
}

/// Flatten any declaration shape into its ordered `(kind, params)` list.
pub fn normalize_declaration(declaration: &RuleDeclaration) -> Vec<RuleSpec> {
    match declaration {
        RuleDeclaration::Text(text) => parse_text(text),
        RuleDeclaration::List(items) => {
            let mut specs = Vec::new();
            for item in items {
                match item {
                    JsonValue::String(text) => specs.extend(parse_text(text)),
                    JsonValue::Object(map) => {
                        if map.len() != 1 {
                            log::warn!(
                                "Rule list entry should hold exactly one rule, found {} keys",
                                map.len()
                            );
                        }
                        specs.extend(parse_map(map));
                    }
                    other => log::warn!("Ignoring malformed rule list entry: {}", other),
                }
            }
            specs
        }
        RuleDeclaration::Map(map) => parse_map(map),
    }
}

fn parse_text(text: &str) -> Vec<RuleSpec> {
    text.split('|')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(parse_segment)
        .collect()
}

fn parse_segment(segment: &str) -> RuleSpec {
    match segment.split_once(':') {
        Some((kind, rest)) => RuleSpec {
            kind: kind.trim().to_string(),
            params: split_params(rest),
            raw: Some(rest.to_string()),
        },
        None => RuleSpec::new(segment, RuleParams::None),
    }
}

fn parse_map(map: &Map<String, JsonValue>) -> Vec<RuleSpec> {
    map.iter()
        .filter_map(|(kind, value)| match value {
            // **EXPLICITLY DISABLED**
            JsonValue::Bool(false) => None,
            JsonValue::Bool(true) => Some(RuleSpec::new(kind.trim(), RuleParams::None)),
            other => Some(RuleSpec::new(
                kind.trim(),
                RuleParams::from_value(other.clone()),
            )),
        })
        .collect()
}

/// Split parameter text: commas first, then colons, otherwise one token.
fn split_params(rest: &str) -> RuleParams {
    let rest = rest.trim();
    if rest.is_empty() {
        return RuleParams::None;
    }

    let tokens: Vec<&str> = if rest.contains(',') {
        rest.split(',').collect()
    } else if rest.contains(':') {
        rest.split(':').collect()
    } else {
        vec![rest]
    };

    let mut values: Vec<JsonValue> = tokens.into_iter().map(coerce_token).collect();
    if values.len() == 1 {
        RuleParams::Single(values.remove(0))
    } else {
        RuleParams::List(values)
    }
}

fn coerce_token(token: &str) -> JsonValue {
    let token = token.trim();
    if let Ok(int) = token.parse::<i64>() {
        return JsonValue::from(int);
    }
    match token.parse::<f64>() {
        Ok(float) if float.is_finite() => JsonValue::from(float),
        _ => JsonValue::String(token.to_string()),
    }
}
