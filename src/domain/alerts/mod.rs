mod alert;
mod rule;
mod user_settings;

pub use alert::Alert;
pub use rule::{AlertRule, Criteria, RuleFamily, RuleType};
pub use user_settings::UserSettings;
