use crate::domain::alerts::RuleType;
use serde::{Deserialize, Serialize};

/// Per-user notification preferences.
///
/// Mutated only by the external gateway; the pipeline reads these to decide
/// which user webhooks receive a given alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    pub user_id: String,
    pub selected_alerts: Vec<RuleType>,
    pub webhook_url: Option<String>,
    pub notification_enabled: bool,
}

impl UserSettings {
    /// Whether this user should be notified for the given rule
    pub fn wants(&self, rule_type: RuleType) -> bool {
        self.notification_enabled
            && self.webhook_url.is_some()
            && self.selected_alerts.contains(&rule_type)
    }
}
