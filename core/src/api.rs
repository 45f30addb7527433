pub use crate::bag::{ErrorBag, ErrorEntry, ListenerSet, Subscription};
pub use crate::config::ValidatorConfig;
pub use crate::errors::FormError;
pub use crate::messages::{humanize, interpolate, MessageRequest, MessageStore};
pub use crate::rules::{PredicateRule, Rule, RuleContext, RuleDeclaration, RuleInstance, RuleParams, RuleRegistry};
pub use crate::types::FormData;
pub use crate::validation::{scoped_key, FormValidator, ALL_SCOPES, DEFAULT_SCOPE};
