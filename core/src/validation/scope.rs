use crate::rules::RuleInstance;
use crate::types::FormData;
use std::collections::{BTreeSet, HashMap};

/// Scope used when the caller does not name one.
pub const DEFAULT_SCOPE: &str = "default";

/// Reset target covering every scope.
pub const ALL_SCOPES: &str = "all";

/// External error-map key: `field` in the default scope, `scope.field` elsewhere.
pub fn scoped_key(scope: &str, field: &str) -> String {
    if scope == DEFAULT_SCOPE {
        field.to_string()
    } else {
        format!("{}.{}", scope, field)
    }
}

/// One isolated form: its values, rule bindings and display labels.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub(crate) data: FormData,
    pub(crate) rules: HashMap<String, Vec<RuleInstance>>,
    pub(crate) labels: HashMap<String, String>,
}

impl Scope {
    pub fn data(&self) -> &FormData {
        &self.data
    }

    pub fn rules(&self, field: &str) -> &[RuleInstance] {
        self.rules.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn label(&self, field: &str) -> Option<&str> {
        self.labels.get(field).map(String::as_str)
    }

    /// Fields with bound rules AND a value present, sorted.
    pub fn eligible_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self
            .rules
            .iter()
            .filter(|(field, rules)| !rules.is_empty() && self.data.contains_key(*field))
            .map(|(field, _)| field.clone())
            .collect();
        fields.sort_unstable();
        fields
    }

    /// Every field the scope knows about through rules or data.
    pub fn known_fields(&self) -> BTreeSet<&str> {
        self.rules
            .keys()
            .chain(self.data.keys())
            .map(String::as_str)
            .collect()
    }
}
