//! Event-triggered importance
//!
//! Synaptic Tagging and Capture (Frey & Morris 1997): recently active
//! memories can become important retroactively when a significant event
//! follows them. `trigger_importance` tags every item accessed inside the
//! event window with the event's strength boost and stability-factor
//! multiplier.
//!
//! The multiplier adjusts the ranking-only `stability_factor`; the
//! scheduler's `stability` is never touched from here.

use serde::{Deserialize, Serialize};

/// Default lookback window for event tagging (minutes).
pub const DEFAULT_EVENT_WINDOW_MINUTES: i64 = 60;

/// Events the importance trigger recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportanceEvent {
    /// A problem was cracked after effort
    Breakthrough,
    /// A long-standing error got resolved
    ErrorResolved,
    /// The user corrected stored knowledge
    UserCorrection,
    /// A decision was committed to
    DecisionMade,
    /// The user explicitly flagged importance
    UserFlagged,
    /// Repeated exposure without an otherwise notable event
    Repetition,
}

impl ImportanceEvent {
    /// Additive storage-strength boost for this event.
    pub fn strength_boost(&self) -> f64 {
        match self {
            ImportanceEvent::Breakthrough => 0.30,
            ImportanceEvent::ErrorResolved => 0.25,
            ImportanceEvent::UserCorrection => 0.20,
            ImportanceEvent::DecisionMade => 0.15,
            ImportanceEvent::UserFlagged => 0.25,
            ImportanceEvent::Repetition => 0.10,
        }
    }

    /// Multiplier applied to the ranking `stability_factor`.
    pub fn stability_multiplier(&self) -> f64 {
        match self {
            ImportanceEvent::Breakthrough => 1.5,
            ImportanceEvent::ErrorResolved => 1.4,
            ImportanceEvent::UserCorrection => 1.3,
            ImportanceEvent::DecisionMade => 1.2,
            ImportanceEvent::UserFlagged => 1.4,
            ImportanceEvent::Repetition => 1.1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportanceEvent::Breakthrough => "breakthrough",
            ImportanceEvent::ErrorResolved => "error_resolved",
            ImportanceEvent::UserCorrection => "user_correction",
            ImportanceEvent::DecisionMade => "decision_made",
            ImportanceEvent::UserFlagged => "user_flagged",
            ImportanceEvent::Repetition => "repetition",
        }
    }
}

impl std::str::FromStr for ImportanceEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "breakthrough" => Ok(ImportanceEvent::Breakthrough),
            "error_resolved" => Ok(ImportanceEvent::ErrorResolved),
            "user_correction" => Ok(ImportanceEvent::UserCorrection),
            "decision_made" => Ok(ImportanceEvent::DecisionMade),
            "user_flagged" => Ok(ImportanceEvent::UserFlagged),
            "repetition" => Ok(ImportanceEvent::Repetition),
            _ => Err(format!("Unknown importance event: {}", s)),
        }
    }
}

/// What an importance trigger did.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerImportanceReport {
    pub event: ImportanceEvent,
    pub window_minutes: i64,
    pub tagged_item_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_event_table_monotone() {
        // Stronger events never carry weaker adjustments than repetition
        for event in [
            ImportanceEvent::Breakthrough,
            ImportanceEvent::ErrorResolved,
            ImportanceEvent::UserCorrection,
            ImportanceEvent::DecisionMade,
            ImportanceEvent::UserFlagged,
        ] {
            assert!(event.strength_boost() >= ImportanceEvent::Repetition.strength_boost());
            assert!(
                event.stability_multiplier() >= ImportanceEvent::Repetition.stability_multiplier()
            );
        }
        // All multipliers amplify
        assert!(ImportanceEvent::Repetition.stability_multiplier() > 1.0);
    }

    #[test]
    fn test_event_parse_roundtrip() {
        for event in [
            ImportanceEvent::Breakthrough,
            ImportanceEvent::ErrorResolved,
            ImportanceEvent::UserCorrection,
            ImportanceEvent::DecisionMade,
            ImportanceEvent::UserFlagged,
            ImportanceEvent::Repetition,
        ] {
            assert_eq!(ImportanceEvent::from_str(event.as_str()).unwrap(), event);
        }
        assert!(ImportanceEvent::from_str("nonsense").is_err());
    }
}
