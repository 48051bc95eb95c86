//! Stream names and subject conventions shared by every bus participant.

pub const BARS_STREAM: &str = "BARS";
pub const METRICS_STREAM: &str = "METRICS";
pub const ALERTS_STREAM: &str = "ALERTS";

pub const METRICS_SUBJECT: &str = "metrics.calculated";
pub const ALERT_SUBJECT: &str = "alerts.triggered";

/// Subject for one symbol's closed 1-minute bars
pub fn bar_subject(symbol: &str) -> String {
    format!("candles.1m.{}", symbol)
}

/// Token-wise subject matching: `*` matches exactly one token, `>` matches
/// the rest of the subject.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), _) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(subject_matches("metrics.calculated", "metrics.calculated"));
        assert!(!subject_matches("metrics.calculated", "alerts.triggered"));
    }

    #[test]
    fn test_single_token_wildcard() {
        assert!(subject_matches("candles.1m.*", "candles.1m.BTCUSDT"));
        assert!(!subject_matches("candles.1m.*", "candles.1m.BTCUSDT.extra"));
        assert!(!subject_matches("candles.1m.*", "candles.1m"));
    }

    #[test]
    fn test_tail_wildcard() {
        assert!(subject_matches("candles.>", "candles.1m.BTCUSDT"));
        assert!(subject_matches("candles.>", "candles.1m"));
        assert!(!subject_matches("candles.>", "candles"));
    }

    #[test]
    fn test_bar_subject_format() {
        assert_eq!(bar_subject("ETHUSDT"), "candles.1m.ETHUSDT");
    }
}
