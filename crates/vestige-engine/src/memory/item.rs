//! Knowledge Item - the fundamental unit of memory
//!
//! Each item carries:
//! - Content and extracted metadata
//! - FSRS-6 scheduling state (owned by the scheduler, written only through
//!   review and the consolidation tick)
//! - Dual-strength retention (Bjork & Bjork 1992)
//! - Provenance and contradiction tracking
//! - Tenant scoping: every item belongs to exactly one tenant

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fsrs::{FSRSState, LearningState};

// ============================================================================
// RETENTION MODEL
// ============================================================================

/// Weight of retrieval strength in the fused retention score
pub const RETENTION_RETRIEVAL_WEIGHT: f64 = 0.7;

/// Weight of (normalized) storage strength in the fused retention score
pub const RETENTION_STORAGE_WEIGHT: f64 = 0.3;

/// Fused retention score from the dual-strength model:
/// `0.7 * retrieval + 0.3 * clamp(storage / 10, 0, 1)`.
pub fn fuse_retention(storage_strength: f64, retrieval_strength: f64) -> f64 {
    RETENTION_RETRIEVAL_WEIGHT * retrieval_strength.clamp(0.0, 1.0)
        + RETENTION_STORAGE_WEIGHT * (storage_strength / 10.0).clamp(0.0, 1.0)
}

/// Accessibility bucket derived from retention strength.
///
/// | Bucket      | Retention    |
/// |-------------|--------------|
/// | Active      | >= 0.7       |
/// | Dormant     | [0.4, 0.7)   |
/// | Silent      | [0.1, 0.4)   |
/// | Unavailable | < 0.1        |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionBucket {
    /// Immediately accessible
    Active,
    /// Retrievable with partial cues
    Dormant,
    /// Needs strong, specific cues
    Silent,
    /// Effectively inaccessible
    Unavailable,
}

impl RetentionBucket {
    /// Classify a retention strength.
    pub fn classify(retention: f64) -> Self {
        if retention >= 0.7 {
            RetentionBucket::Active
        } else if retention >= 0.4 {
            RetentionBucket::Dormant
        } else if retention >= 0.1 {
            RetentionBucket::Silent
        } else {
            RetentionBucket::Unavailable
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionBucket::Active => "active",
            RetentionBucket::Dormant => "dormant",
            RetentionBucket::Silent => "silent",
            RetentionBucket::Unavailable => "unavailable",
        }
    }

    /// Parse from the stored string form. Unknown values map to Active.
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "dormant" => RetentionBucket::Dormant,
            "silent" => RetentionBucket::Silent,
            "unavailable" => RetentionBucket::Unavailable,
            _ => RetentionBucket::Active,
        }
    }
}

impl std::fmt::Display for RetentionBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// KNOWLEDGE ITEM
// ============================================================================

/// A knowledge item in the memory store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeItem {
    /// Opaque unique identifier (UUID v4), unique per tenant
    pub id: String,
    /// Owning tenant; every read and write is scoped by this
    pub tenant_id: String,
    /// The knowledge itself
    pub content: String,
    /// Optional condensed form
    pub summary: Option<String>,

    // ========== FSRS-6 scheduler state ==========
    /// Memory stability in days, [0.1, 36500]
    pub stability: f64,
    /// Inherent difficulty, [1, 10]
    pub difficulty: f64,
    /// Learning lifecycle state
    pub state: LearningState,
    /// Total reviews
    pub reps: i32,
    /// Total lapses
    pub lapses: i32,
    /// Last review timestamp
    pub last_review: Option<DateTime<Utc>>,
    /// Next scheduled review
    pub next_review: Option<DateTime<Utc>>,

    // ========== Dual-strength model (Bjork & Bjork 1992) ==========
    /// Accumulated with practice, never decays, >= 0
    pub storage_strength: f64,
    /// Current accessibility, decays over time, [0, 1]
    pub retrieval_strength: f64,
    /// Fused score the ranker consumes, [0, 1]
    pub retention_strength: f64,

    // ========== Access tracking ==========
    /// Times retrieved
    pub access_count: i64,
    /// Last retrieval timestamp
    pub last_accessed_at: DateTime<Utc>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,

    // ========== Salience & trust ==========
    /// Emotional intensity, [0, 1]
    pub sentiment_intensity: f64,
    /// Confidence in the content, [0, 1]
    pub confidence: f64,
    /// Importance used by consolidation selection, [0, 1]
    pub importance: f64,
    /// Synaptic-tagging multiplier used by ranking; distinct from the
    /// scheduler's `stability` and never fed back into FSRS growth
    pub stability_factor: f64,

    // ========== Contradictions ==========
    /// Set when another item contradicts this one
    pub is_contradicted: bool,
    /// Items contradicting this one
    pub contradiction_ids: Vec<String>,

    // ========== Provenance ==========
    /// Kind of origin (conversation, document, api, ...)
    pub source_type: String,
    /// Platform the item arrived from
    pub source_platform: String,
    /// Optional origin URL
    pub source_url: Option<String>,
    /// Chain of upstream item ids this was derived from
    pub source_chain: Vec<String>,

    // ========== Extracted sets ==========
    /// People mentioned
    pub people: Vec<String>,
    /// Concepts mentioned
    pub concepts: Vec<String>,
    /// Events mentioned
    pub events: Vec<String>,
    /// Free-form tags
    pub tags: Vec<String>,

    // ========== Semantic embedding ==========
    /// Optional embedding vector; length depends on the embedding strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Default for KnowledgeItem {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            tenant_id: String::new(),
            content: String::new(),
            summary: None,
            stability: 2.3065,
            difficulty: 5.0,
            state: LearningState::New,
            reps: 0,
            lapses: 0,
            last_review: None,
            next_review: None,
            storage_strength: 1.0,
            retrieval_strength: 1.0,
            retention_strength: fuse_retention(1.0, 1.0),
            access_count: 0,
            last_accessed_at: now,
            created_at: now,
            updated_at: now,
            sentiment_intensity: 0.0,
            confidence: 1.0,
            importance: 0.5,
            stability_factor: 1.0,
            is_contradicted: false,
            contradiction_ids: Vec::new(),
            source_type: "api".to_string(),
            source_platform: "unknown".to_string(),
            source_url: None,
            source_chain: Vec::new(),
            people: Vec::new(),
            concepts: Vec::new(),
            events: Vec::new(),
            tags: Vec::new(),
            embedding: None,
        }
    }
}

impl KnowledgeItem {
    /// Create a new item for a tenant with a fresh id.
    pub fn new(tenant_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    /// Current scheduler state as a value the scheduler can consume.
    pub fn fsrs_state(&self) -> FSRSState {
        FSRSState {
            stability: self.stability,
            difficulty: self.difficulty,
            state: self.state,
            reps: self.reps,
            lapses: self.lapses,
        }
    }

    /// Write back a scheduler state. The only sanctioned path for mutating
    /// scheduler-owned fields.
    pub fn apply_fsrs_state(&mut self, state: &FSRSState) {
        self.stability = state.stability;
        self.difficulty = state.difficulty;
        self.state = state.state;
        self.reps = state.reps;
        self.lapses = state.lapses;
    }

    /// Recompute the fused retention score from the current strengths.
    pub fn recompute_retention(&mut self) {
        self.retention_strength = fuse_retention(self.storage_strength, self.retrieval_strength);
    }

    /// Accessibility bucket for this item.
    pub fn retention_bucket(&self) -> RetentionBucket {
        RetentionBucket::classify(self.retention_strength)
    }

    /// Whether the item is due for review.
    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        self.next_review.map(|t| t <= now).unwrap_or(true)
    }

    /// Days since the item was last accessed.
    pub fn days_since_access(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_accessed_at).num_seconds().max(0) as f64 / 86_400.0
    }
}

// ============================================================================
// INGEST INPUT & PATCH
// ============================================================================

/// Input for creating a new memory.
///
/// `deny_unknown_fields` rejects payloads with unexpected keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct IngestInput {
    /// The content to memorize
    pub content: String,
    /// Optional condensed form
    pub summary: Option<String>,
    /// Emotional intensity, [0, 1]
    pub sentiment_intensity: f64,
    /// Confidence in the content, [0, 1]
    pub confidence: f64,
    /// Importance hint, [0, 1]
    pub importance: f64,
    /// Kind of origin
    pub source_type: String,
    /// Platform the item arrived from
    pub source_platform: String,
    /// Optional origin URL
    pub source_url: Option<String>,
    /// People mentioned
    pub people: Vec<String>,
    /// Concepts mentioned
    pub concepts: Vec<String>,
    /// Events mentioned
    pub events: Vec<String>,
    /// Free-form tags
    pub tags: Vec<String>,
    /// Optional embedding vector
    pub embedding: Option<Vec<f32>>,
}

impl Default for IngestInput {
    fn default() -> Self {
        Self {
            content: String::new(),
            summary: None,
            sentiment_intensity: 0.0,
            confidence: 1.0,
            importance: 0.5,
            source_type: "api".to_string(),
            source_platform: "unknown".to_string(),
            source_url: None,
            people: Vec::new(),
            concepts: Vec::new(),
            events: Vec::new(),
            tags: Vec::new(),
            embedding: None,
        }
    }
}

/// Partial update. Only fields present in the patch are written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ItemPatch {
    pub content: Option<String>,
    pub summary: Option<String>,
    pub sentiment_intensity: Option<f64>,
    pub confidence: Option<f64>,
    pub importance: Option<f64>,
    pub stability_factor: Option<f64>,
    pub storage_strength: Option<f64>,
    pub retrieval_strength: Option<f64>,
    pub retention_strength: Option<f64>,
    pub is_contradicted: Option<bool>,
    pub contradiction_ids: Option<Vec<String>>,
    pub source_url: Option<String>,
    pub source_chain: Option<Vec<String>>,
    pub people: Option<Vec<String>>,
    pub concepts: Option<Vec<String>>,
    pub events: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
}

impl ItemPatch {
    /// True when the patch writes nothing.
    pub fn is_empty(&self) -> bool {
        serde_json::to_value(self)
            .map(|v| {
                v.as_object()
                    .map(|m| m.values().all(|v| v.is_null()))
                    .unwrap_or(true)
            })
            .unwrap_or(true)
    }
}

// ============================================================================
// SEARCH & STATS
// ============================================================================

/// Options for repository search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchOptions {
    /// Maximum results (default 10, capped at 100)
    pub limit: i64,
    /// Minimum retention strength filter
    pub min_retention: f64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            min_retention: 0.0,
        }
    }
}

/// Search results with the total match count.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub items: Vec<KnowledgeItem>,
    pub total: i64,
}

/// Statistics about the memory store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    /// Total items
    pub total_items: i64,
    /// Items with retention >= 0.7
    pub active: i64,
    /// Items with retention in [0.4, 0.7)
    pub dormant: i64,
    /// Items with retention in [0.1, 0.4)
    pub silent: i64,
    /// Items with retention < 0.1
    pub unavailable: i64,
    /// Items due for review
    pub due_for_review: i64,
    /// Average stability
    pub average_stability: f64,
    /// Average retention strength
    pub average_retention: f64,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fuse_retention_invariant() {
        // retention = 0.7*retrieval + 0.3*clamp(storage/10, 0, 1)
        assert!((fuse_retention(10.0, 1.0) - 1.0).abs() < 1e-9);
        assert!((fuse_retention(0.0, 1.0) - 0.7).abs() < 1e-9);
        assert!((fuse_retention(10.0, 0.0) - 0.3).abs() < 1e-9);
        // Storage saturates at 10
        assert!((fuse_retention(100.0, 0.0) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_retention_bucket_boundaries() {
        assert_eq!(RetentionBucket::classify(0.7), RetentionBucket::Active);
        assert_eq!(RetentionBucket::classify(0.69), RetentionBucket::Dormant);
        assert_eq!(RetentionBucket::classify(0.4), RetentionBucket::Dormant);
        assert_eq!(RetentionBucket::classify(0.39), RetentionBucket::Silent);
        assert_eq!(RetentionBucket::classify(0.1), RetentionBucket::Silent);
        assert_eq!(RetentionBucket::classify(0.05), RetentionBucket::Unavailable);
    }

    #[test]
    fn test_new_item_defaults() {
        let item = KnowledgeItem::new("tenant-a", "the capital of France is Paris");
        assert!(!item.id.is_empty());
        assert_eq!(item.tenant_id, "tenant-a");
        assert_eq!(item.state, LearningState::New);
        assert!(item.is_due_at(Utc::now()));
        assert!((item.retention_strength - fuse_retention(1.0, 1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_fsrs_state_roundtrip() {
        let mut item = KnowledgeItem::new("t", "content");
        let mut state = item.fsrs_state();
        state.stability = 42.0;
        state.reps = 3;
        state.state = LearningState::Review;
        item.apply_fsrs_state(&state);
        assert!((item.stability - 42.0).abs() < 1e-9);
        assert_eq!(item.reps, 3);
        assert_eq!(item.state, LearningState::Review);
    }

    #[test]
    fn test_ingest_input_deny_unknown_fields() {
        let json = r#"{"content": "test", "tags": ["a"]}"#;
        assert!(serde_json::from_str::<IngestInput>(json).is_ok());

        let json_unknown = r#"{"content": "test", "bogus": 1}"#;
        assert!(serde_json::from_str::<IngestInput>(json_unknown).is_err());
    }

    #[test]
    fn test_patch_emptiness() {
        assert!(ItemPatch::default().is_empty());
        let patch = ItemPatch {
            content: Some("new".into()),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }

    #[test]
    fn test_item_serde_preserves_millis() {
        let mut item = KnowledgeItem::new("t", "x");
        item.created_at = DateTime::parse_from_rfc3339("2026-03-01T12:30:45.123Z")
            .unwrap()
            .with_timezone(&Utc);
        let json = serde_json::to_string(&item).unwrap();
        let back: KnowledgeItem = serde_json::from_str(&json).unwrap();
        assert_eq!(item.created_at, back.created_at);
    }
}
