//! Intentions (prospective memory)
//!
//! Future-directed reminders with trigger conditions, carried alongside the
//! knowledge store so agents can remember to *do* things, not just facts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Intention priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }

    /// Parse from the stored string form. Unknown values map to Normal.
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "low" => Priority::Low,
            "high" => Priority::High,
            "critical" => Priority::Critical,
            _ => Priority::Normal,
        }
    }
}

/// Intention lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IntentionStatus {
    #[default]
    Active,
    Snoozed,
    Fulfilled,
    Cancelled,
}

impl IntentionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentionStatus::Active => "active",
            IntentionStatus::Snoozed => "snoozed",
            IntentionStatus::Fulfilled => "fulfilled",
            IntentionStatus::Cancelled => "cancelled",
        }
    }

    /// Parse from the stored string form. Unknown values map to Active.
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "snoozed" => IntentionStatus::Snoozed,
            "fulfilled" => IntentionStatus::Fulfilled,
            "cancelled" => IntentionStatus::Cancelled,
            _ => IntentionStatus::Active,
        }
    }
}

/// A stored intention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intention {
    /// Unique id
    pub id: String,
    /// Owning tenant
    pub tenant_id: String,
    /// What to do
    pub content: String,
    /// Trigger kind (time, event, context, ...)
    pub trigger_type: String,
    /// Serialized trigger condition
    pub trigger_data: serde_json::Value,
    /// Priority
    pub priority: Priority,
    /// Lifecycle status
    pub status: IntentionStatus,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Optional deadline
    pub deadline: Option<DateTime<Utc>>,
    /// When it was fulfilled
    pub fulfilled_at: Option<DateTime<Utc>>,
    /// How many times the agent was reminded
    pub reminder_count: i32,
    /// Free-form tags
    pub tags: Vec<String>,
    /// When a snooze expires
    pub snoozed_until: Option<DateTime<Utc>>,
}

impl Intention {
    /// Create a new active intention.
    pub fn new(
        tenant_id: impl Into<String>,
        content: impl Into<String>,
        trigger_type: impl Into<String>,
        trigger_data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            content: content.into(),
            trigger_type: trigger_type.into(),
            trigger_data,
            priority: Priority::Normal,
            status: IntentionStatus::Active,
            created_at: Utc::now(),
            deadline: None,
            fulfilled_at: None,
            reminder_count: 0,
            tags: Vec::new(),
            snoozed_until: None,
        }
    }

    /// Whether the deadline has passed without fulfillment.
    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.status == IntentionStatus::Active && self.deadline.map(|d| d < now).unwrap_or(false)
    }
}
