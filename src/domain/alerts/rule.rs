use crate::domain::market::{SymbolMetrics, Timeframe};
use anyhow::{Result, anyhow};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Direction family of a rule, used for notification severity colouring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleFamily {
    Bull,
    Bear,
    Neutral,
}

/// The fixed catalogue of market-pattern rules.
///
/// Predicates live here in code rather than being interpreted out of the
/// stored criteria document: the set is small and known, and a typed match
/// is both faster and testable. The stored criteria stays attached to the
/// rule as display metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleType {
    BigBull60,
    BigBear60,
    PioneerBull,
    PioneerBear,
    FiveBigBull,
    FiveBigBear,
    FifteenBigBull,
    FifteenBigBear,
    BottomHunter,
    TopHunter,
}

impl RuleType {
    /// Stable string identifier as stored in the metadata catalogue
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::BigBull60 => "futures_big_bull_60",
            RuleType::BigBear60 => "futures_big_bear_60",
            RuleType::PioneerBull => "futures_pioneer_bull",
            RuleType::PioneerBear => "futures_pioneer_bear",
            RuleType::FiveBigBull => "futures_5_big_bull",
            RuleType::FiveBigBear => "futures_5_big_bear",
            RuleType::FifteenBigBull => "futures_15_big_bull",
            RuleType::FifteenBigBear => "futures_15_big_bear",
            RuleType::BottomHunter => "futures_bottom_hunter",
            RuleType::TopHunter => "futures_top_hunter",
        }
    }

    pub fn all() -> [RuleType; 10] {
        [
            RuleType::BigBull60,
            RuleType::BigBear60,
            RuleType::PioneerBull,
            RuleType::PioneerBear,
            RuleType::FiveBigBull,
            RuleType::FiveBigBear,
            RuleType::FifteenBigBull,
            RuleType::FifteenBigBear,
            RuleType::BottomHunter,
            RuleType::TopHunter,
        ]
    }

    pub fn family(&self) -> RuleFamily {
        match self {
            RuleType::BigBull60
            | RuleType::PioneerBull
            | RuleType::FiveBigBull
            | RuleType::FifteenBigBull
            | RuleType::BottomHunter => RuleFamily::Bull,
            RuleType::BigBear60
            | RuleType::PioneerBear
            | RuleType::FiveBigBear
            | RuleType::FifteenBigBear
            | RuleType::TopHunter => RuleFamily::Bear,
        }
    }

    /// Emoji shown in notification titles
    pub fn emoji(&self) -> &'static str {
        match self {
            RuleType::BigBull60 => "\u{1F680}",      // rocket
            RuleType::BigBear60 => "\u{1F4C9}",      // chart down
            RuleType::PioneerBull => "\u{26A1}",     // zap
            RuleType::PioneerBear => "\u{1F9CA}",    // ice
            RuleType::FiveBigBull => "\u{1F525}",    // fire
            RuleType::FiveBigBear => "\u{2744}",     // snowflake
            RuleType::FifteenBigBull => "\u{1F4C8}", // chart up
            RuleType::FifteenBigBear => "\u{1F53B}", // red triangle down
            RuleType::BottomHunter => "\u{1F3AF}",   // dart
            RuleType::TopHunter => "\u{1F6A8}",      // rotating light
        }
    }

    /// Human-readable description used when seeding the catalogue
    pub fn default_description(&self) -> &'static str {
        match self {
            RuleType::BigBull60 => "1h momentum building across 8h and 1d with sustained volume",
            RuleType::BigBear60 => "1h sell-off deepening across 8h and 1d with sustained volume",
            RuleType::PioneerBull => "Fresh 5m breakout leading the 15m move on doubled volume",
            RuleType::PioneerBear => "Fresh 5m breakdown leading the 15m move on doubled volume",
            RuleType::FiveBigBull => "5m surge confirmed by rising 15m and 1h momentum",
            RuleType::FiveBigBear => "5m plunge confirmed by falling 15m and 1h momentum",
            RuleType::FifteenBigBull => "15m rally extending through 1h and 8h with heavy volume",
            RuleType::FifteenBigBear => "15m slide extending through 1h and 8h with heavy volume",
            RuleType::BottomHunter => "5m reversal up against a 1h downtrend on strong volume",
            RuleType::TopHunter => "5m reversal down against a 1h uptrend on strong volume",
        }
    }

    /// Evaluate this rule's predicate against a metrics snapshot.
    ///
    /// Any referenced value that is absent (insufficient history) makes the
    /// predicate false.
    pub fn evaluate(&self, m: &SymbolMetrics) -> bool {
        let c5 = m.change(Timeframe::FiveMin);
        let c15 = m.change(Timeframe::FifteenMin);
        let c1h = m.change(Timeframe::OneHour);
        let c8h = m.change(Timeframe::EightHour);
        let c1d = m.change(Timeframe::OneDay);
        let v5 = m.bar_volume(Timeframe::FiveMin);
        let v15 = m.bar_volume(Timeframe::FifteenMin);
        let v1h = m.bar_volume(Timeframe::OneHour);
        let v8h = m.bar_volume(Timeframe::EightHour);
        let v1d = m.bar_volume(Timeframe::OneDay);

        match self {
            RuleType::BigBull60 => match (c1h, c8h, c1d, v1h, v8h, v1d) {
                (Some(c1h), Some(c8h), Some(c1d), Some(v1h), Some(v8h), Some(v1d)) => {
                    c1h > 1.6
                        && c1d < 15.0
                        && c8h > c1h
                        && c1d > c8h
                        && v1h > 500_000.0
                        && v8h > 5_000_000.0
                        && 6.0 * v1h > v8h
                        && 16.0 * v1h > v1d
                }
                _ => false,
            },
            RuleType::BigBear60 => match (c1h, c8h, c1d, v1h, v8h, v1d) {
                (Some(c1h), Some(c8h), Some(c1d), Some(v1h), Some(v8h), Some(v1d)) => {
                    c1h < -1.6
                        && c1d > -15.0
                        && c8h < c1h
                        && c1d < c8h
                        && v1h > 500_000.0
                        && v8h > 5_000_000.0
                        && 6.0 * v1h > v8h
                        && 16.0 * v1h > v1d
                }
                _ => false,
            },
            RuleType::PioneerBull => match (c5, c15, v5, v15) {
                (Some(c5), Some(c15), Some(v5), Some(v15)) => {
                    c5 > 1.0 && c15 > 1.0 && 3.0 * c5 > c15 && 2.0 * v5 > v15
                }
                _ => false,
            },
            RuleType::PioneerBear => match (c5, c15, v5, v15) {
                (Some(c5), Some(c15), Some(v5), Some(v15)) => {
                    c5 < -1.0 && c15 < -1.0 && 3.0 * c5 < c15 && 2.0 * v5 > v15
                }
                _ => false,
            },
            RuleType::FiveBigBull => match (c5, c15, c1h, c1d, v5, v15, v1h, v8h) {
                (
                    Some(c5),
                    Some(c15),
                    Some(c1h),
                    Some(c1d),
                    Some(v5),
                    Some(v15),
                    Some(v1h),
                    Some(v8h),
                ) => {
                    c5 > 0.6
                        && c1d < 15.0
                        && c15 > c5
                        && c1h > c15
                        && v5 > 100_000.0
                        && v1h > 1_000_000.0
                        && v5 > v15 / 3.0
                        && v5 > v1h / 6.0
                        && v5 > v8h / 66.0
                }
                _ => false,
            },
            RuleType::FiveBigBear => match (c5, c15, c1h, c1d, v5, v15, v1h, v8h) {
                (
                    Some(c5),
                    Some(c15),
                    Some(c1h),
                    Some(c1d),
                    Some(v5),
                    Some(v15),
                    Some(v1h),
                    Some(v8h),
                ) => {
                    c5 < -0.6
                        && c1d > -15.0
                        && c15 < c5
                        && c1h < c15
                        && v5 > 100_000.0
                        && v1h > 1_000_000.0
                        && v5 > v15 / 3.0
                        && v5 > v1h / 6.0
                        && v5 > v8h / 66.0
                }
                _ => false,
            },
            RuleType::FifteenBigBull => match (c15, c1h, c8h, c1d, v15, v1h, v8h) {
                (Some(c15), Some(c1h), Some(c8h), Some(c1d), Some(v15), Some(v1h), Some(v8h)) => {
                    c15 > 1.0
                        && c1d < 15.0
                        && c1h > c15
                        && c8h > c1h
                        && v15 > 400_000.0
                        && v1h > 1_000_000.0
                        && v15 > v1h / 3.0
                        && v15 > v8h / 26.0
                }
                _ => false,
            },
            RuleType::FifteenBigBear => match (c15, c1h, c8h, c1d, v15, v1h, v8h) {
                (Some(c15), Some(c1h), Some(c8h), Some(c1d), Some(v15), Some(v1h), Some(v8h)) => {
                    c15 < -1.0
                        && c1d > -15.0
                        && c1h < c15
                        && c8h < c1h
                        && v15 > 400_000.0
                        && v1h > 1_000_000.0
                        && v15 > v1h / 3.0
                        && v15 > v8h / 26.0
                }
                _ => false,
            },
            RuleType::BottomHunter => match (c5, c15, c1h, v5, v15, v1h) {
                (Some(c5), Some(c15), Some(c1h), Some(v5), Some(v15), Some(v1h)) => {
                    c1h < -0.7
                        && c15 < -0.6
                        && c5 > 0.5
                        && v5 > v15 / 2.0
                        && v5 > v1h / 8.0
                }
                _ => false,
            },
            RuleType::TopHunter => match (c5, c15, c1h, v5, v15, v1h) {
                (Some(c5), Some(c15), Some(c1h), Some(v5), Some(v15), Some(v1h)) => {
                    c1h > 0.7
                        && c15 > 0.6
                        && c5 < -0.5
                        && v5 > v15 / 2.0
                        && v5 > v1h / 8.0
                }
                _ => false,
            },
        }
    }
}

impl FromStr for RuleType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        RuleType::all()
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| anyhow!("Unknown rule type: '{}'", s))
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for RuleType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RuleType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        RuleType::from_str(&raw).map_err(D::Error::custom)
    }
}

/// Threshold document stored alongside each rule in the metadata catalogue.
///
/// Permissive by design: every field optional, unknown fields ignored. The
/// market-cap bounds cannot be derived from bar data and are informational
/// unless an external market-cap source is wired in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Criteria {
    pub min_change_5m: Option<f64>,
    pub min_change_15m: Option<f64>,
    pub min_change_1h: Option<f64>,
    pub min_change_8h: Option<f64>,
    pub max_change_1d: Option<f64>,
    pub min_volume_5m: Option<f64>,
    pub min_volume_15m: Option<f64>,
    pub min_volume_1h: Option<f64>,
    pub min_volume_8h: Option<f64>,
    pub min_market_cap: Option<f64>,
    pub max_market_cap: Option<f64>,
}

/// One loaded catalogue entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub rule_type: RuleType,
    pub description: String,
    pub criteria: Criteria,
    pub enabled: bool,
}

impl AlertRule {
    /// The ten rules seeded into an empty catalogue
    pub fn defaults() -> Vec<AlertRule> {
        RuleType::all()
            .into_iter()
            .map(|rule_type| AlertRule {
                rule_type,
                description: rule_type.default_description().to_string(),
                criteria: Criteria::default(),
                enabled: true,
            })
            .collect()
    }
}
