use anyhow::{Result, anyhow};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Aggregation timeframes derived from the 1-minute base stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timeframe {
    FiveMin,
    FifteenMin,
    OneHour,
    FourHour,
    EightHour,
    OneDay,
}

impl Timeframe {
    /// Number of 1-minute bars folded into one bar of this timeframe
    pub fn bar_count(&self) -> usize {
        match self {
            Timeframe::FiveMin => 5,
            Timeframe::FifteenMin => 15,
            Timeframe::OneHour => 60,
            Timeframe::FourHour => 240,
            Timeframe::EightHour => 480,
            Timeframe::OneDay => 1440,
        }
    }

    /// Duration of this timeframe in seconds
    pub fn to_seconds(&self) -> i64 {
        self.bar_count() as i64 * 60
    }

    /// Canonical short label used on the wire and in the metrics store
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::FiveMin => "5m",
            Timeframe::FifteenMin => "15m",
            Timeframe::OneHour => "1h",
            Timeframe::FourHour => "4h",
            Timeframe::EightHour => "8h",
            Timeframe::OneDay => "1d",
        }
    }

    /// All derived timeframes in ascending order
    pub fn all() -> [Timeframe; 6] {
        [
            Timeframe::FiveMin,
            Timeframe::FifteenMin,
            Timeframe::OneHour,
            Timeframe::FourHour,
            Timeframe::EightHour,
            Timeframe::OneDay,
        ]
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "5m" | "5min" => Ok(Timeframe::FiveMin),
            "15m" | "15min" => Ok(Timeframe::FifteenMin),
            "1h" | "60m" => Ok(Timeframe::OneHour),
            "4h" | "240m" => Ok(Timeframe::FourHour),
            "8h" | "480m" => Ok(Timeframe::EightHour),
            "1d" | "24h" => Ok(Timeframe::OneDay),
            _ => Err(anyhow!(
                "Invalid timeframe: '{}'. Valid options: 5m, 15m, 1h, 4h, 8h, 1d",
                s
            )),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Serialized as the short label so timeframe-keyed maps stay readable JSON.
impl Serialize for Timeframe {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Timeframe::from_str(&raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_counts() {
        assert_eq!(Timeframe::FiveMin.bar_count(), 5);
        assert_eq!(Timeframe::FifteenMin.bar_count(), 15);
        assert_eq!(Timeframe::OneHour.bar_count(), 60);
        assert_eq!(Timeframe::FourHour.bar_count(), 240);
        assert_eq!(Timeframe::EightHour.bar_count(), 480);
        assert_eq!(Timeframe::OneDay.bar_count(), 1440);
    }

    #[test]
    fn test_from_str() {
        assert_eq!(Timeframe::from_str("5m").unwrap(), Timeframe::FiveMin);
        assert_eq!(Timeframe::from_str("8H").unwrap(), Timeframe::EightHour);
        assert_eq!(Timeframe::from_str("1d").unwrap(), Timeframe::OneDay);
        assert!(Timeframe::from_str("3m").is_err());
    }

    #[test]
    fn test_serde_as_label() {
        let json = serde_json::to_string(&Timeframe::EightHour).unwrap();
        assert_eq!(json, "\"8h\"");
        let back: Timeframe = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Timeframe::EightHour);
    }

    #[test]
    fn test_all_ascending() {
        let all = Timeframe::all();
        for pair in all.windows(2) {
            assert!(pair[0].bar_count() < pair[1].bar_count());
        }
    }
}
