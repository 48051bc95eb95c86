use thiserror::Error;

/// Errors surfaced when publishing onto the internal message bus
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("transient publish failure: {0}")]
    Transient(String),

    #[error("permanent publish failure: {0}")]
    Permanent(String),
}

impl PublishError {
    /// Whether the caller may retry the publish
    pub fn is_retryable(&self) -> bool {
        matches!(self, PublishError::Transient(_))
    }
}

/// Errors related to bus stream management
#[derive(Debug, Error)]
pub enum BusError {
    #[error("stream already declared: {name}")]
    DuplicateStream { name: String },

    #[error("unknown stream: {name}")]
    UnknownStream { name: String },
}

/// Errors raised while validating an incoming bar
#[derive(Debug, Error)]
pub enum BarValidationError {
    #[error("missing symbol")]
    MissingSymbol,

    #[error("empty field: {field}")]
    EmptyField { field: &'static str },

    #[error("field {field} is not a finite number: {raw}")]
    NotNumeric { field: &'static str, raw: String },

    #[error("field {field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: f64 },

    #[error("field {field} must be non-negative, got {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("OHLC range violation for {symbol}: low={low} open={open} close={close} high={high}")]
    RangeViolation {
        symbol: String,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },

    #[error("close_time must follow open_time")]
    InvertedTimes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_error_retryability() {
        assert!(PublishError::Transient("slow".into()).is_retryable());
        assert!(!PublishError::Permanent("no stream".into()).is_retryable());
    }

    #[test]
    fn test_validation_error_formatting() {
        let err = BarValidationError::RangeViolation {
            symbol: "BTCUSDT".to_string(),
            open: 10.0,
            high: 9.0,
            low: 8.0,
            close: 9.5,
        };
        let msg = err.to_string();
        assert!(msg.contains("BTCUSDT"));
        assert!(msg.contains("high=9"));
    }
}
