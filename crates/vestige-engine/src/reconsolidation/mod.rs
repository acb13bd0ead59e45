//! Reconsolidation Manager
//!
//! Retrieval makes a memory temporarily modifiable (Nader, Schafe & LeDoux
//! 2000). On access, the engine registers a labile record with a snapshot of
//! the item's mutable surface; for the duration of the labile window the
//! memory accepts modifications, and when the window elapses (or the caller
//! reconsolidates explicitly) the modifications are folded into a change
//! summary the engine applies to the store.
//!
//! Entirely in-memory and synchronous. One instance per tenant; callers
//! serialize access.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default labile window (5 minutes).
pub const DEFAULT_LABILE_WINDOW_MS: i64 = 300_000;

/// Maximum modifications a single labile record accepts.
pub const MAX_MODIFICATIONS: usize = 10;

/// How long retrieval history is kept.
const HISTORY_RETENTION_DAYS: i64 = 30;

/// Hard bound on retrieval-history entries.
const HISTORY_MAX_ENTRIES: usize = 10_000;

/// Two retrievals this close together count as co-retrieved.
const CO_RETRIEVAL_WINDOW_SECS: i64 = 300;

// ============================================================================
// MODIFICATIONS
// ============================================================================

/// A modification applied to a labile memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Modification {
    /// Attach additional context text
    AddContext { context: String },
    /// Add a tag
    AddTag { tag: String },
    /// Remove a tag
    RemoveTag { tag: String },
    /// Strengthen the connection to another memory
    StrengthenConnection { target_id: String, boost: f64 },
    /// Update emotional intensity
    UpdateEmotion { intensity: f64 },
    /// Link to another memory with a named relationship
    LinkMemory {
        target_id: String,
        relationship: String,
    },
    /// Replace the content; corrections reset confidence differently
    UpdateContent { content: String, is_correction: bool },
    /// Record an additional source
    AddSource { source: String },
    /// Boost retrieval strength
    BoostRetrieval { boost: f64 },
}

/// Snapshot of an item's mutable surface, taken at retrieval time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    pub content: String,
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub sentiment_intensity: f64,
    pub retrieval_strength: f64,
    pub source_chain: Vec<String>,
}

/// A memory currently in its labile window.
#[derive(Debug, Clone)]
pub struct LabileRecord {
    pub item_id: String,
    pub accessed_at: DateTime<Utc>,
    pub snapshot: MemorySnapshot,
    pub modifications: Vec<Modification>,
    pub access_context: Option<String>,
    pub reconsolidated: bool,
}

/// What changed when a labile record was folded back together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSummary {
    pub content_changed: bool,
    pub was_correction: bool,
    pub tags_added: Vec<String>,
    pub tags_removed: Vec<String>,
    pub contexts_added: usize,
    pub sources_added: Vec<String>,
    pub links_added: Vec<(String, String)>,
    pub connections_strengthened: Vec<(String, f64)>,
    pub emotion_update: Option<f64>,
    pub retrieval_boost: f64,
    pub new_content: Option<String>,
}

/// Outcome of reconsolidating one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconsolidationResult {
    pub item_id: String,
    pub accessed_at: DateTime<Utc>,
    pub applied: Vec<Modification>,
    pub summary: ChangeSummary,
    pub window_expired: bool,
}

/// Counters over the manager's lifetime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconsolidationStats {
    pub marked_labile: u64,
    pub modifications_applied: u64,
    pub modifications_rejected: u64,
    pub reconsolidations: u64,
    pub currently_labile: usize,
}

#[derive(Debug, Clone)]
struct RetrievalRecord {
    item_id: String,
    at: DateTime<Utc>,
}

// ============================================================================
// MANAGER
// ============================================================================

/// Labile-window state machine. Single tenant per instance.
pub struct ReconsolidationManager {
    window: Duration,
    labile: HashMap<String, LabileRecord>,
    history: VecDeque<RetrievalRecord>,
    stats: ReconsolidationStats,
}

impl Default for ReconsolidationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconsolidationManager {
    pub fn new() -> Self {
        Self::with_window_ms(DEFAULT_LABILE_WINDOW_MS)
    }

    /// Custom labile window in milliseconds.
    pub fn with_window_ms(window_ms: i64) -> Self {
        Self {
            window: Duration::milliseconds(window_ms.max(0)),
            labile: HashMap::new(),
            history: VecDeque::new(),
            stats: ReconsolidationStats::default(),
        }
    }

    /// Register a retrieved memory as labile. A second retrieval inside the
    /// window restarts it with a fresh snapshot, dropping unapplied
    /// modifications from the earlier access.
    pub fn mark_labile(
        &mut self,
        item_id: impl Into<String>,
        snapshot: MemorySnapshot,
        access_context: Option<String>,
    ) {
        let item_id = item_id.into();
        let now = Utc::now();
        self.labile.insert(
            item_id.clone(),
            LabileRecord {
                item_id: item_id.clone(),
                accessed_at: now,
                snapshot,
                modifications: Vec::new(),
                access_context,
                reconsolidated: false,
            },
        );
        self.history.push_back(RetrievalRecord { item_id, at: now });
        self.trim_history(now);
        self.stats.marked_labile += 1;
        self.stats.currently_labile = self.labile.len();
    }

    /// Whether a non-expired labile record exists.
    pub fn is_labile(&self, item_id: &str) -> bool {
        self.labile
            .get(item_id)
            .map(|record| !self.expired(record, Utc::now()))
            .unwrap_or(false)
    }

    /// Apply a modification to a labile memory. Returns false when the
    /// memory is not labile (or expired) or the record is at capacity.
    pub fn apply_modification(&mut self, item_id: &str, modification: Modification) -> bool {
        let now = Utc::now();
        let window = self.window;
        let Some(record) = self.labile.get_mut(item_id) else {
            self.stats.modifications_rejected += 1;
            return false;
        };
        if now - record.accessed_at > window || record.modifications.len() >= MAX_MODIFICATIONS {
            self.stats.modifications_rejected += 1;
            return false;
        }
        record.modifications.push(modification);
        self.stats.modifications_applied += 1;
        true
    }

    /// Finalize one record: remove it and fold its modifications into a
    /// change summary. Idempotent: a second call returns None.
    pub fn reconsolidate(&mut self, item_id: &str) -> Option<ReconsolidationResult> {
        let record = self.labile.remove(item_id)?;
        self.stats.reconsolidations += 1;
        self.stats.currently_labile = self.labile.len();
        let window_expired = self.expired(&record, Utc::now());
        Some(fold(record, window_expired))
    }

    /// Finalize every record whose window has elapsed.
    pub fn reconsolidate_expired(&mut self) -> Vec<ReconsolidationResult> {
        let now = Utc::now();
        let expired_ids: Vec<String> = self
            .labile
            .values()
            .filter(|record| self.expired(record, now))
            .map(|record| record.item_id.clone())
            .collect();

        let mut results = Vec::with_capacity(expired_ids.len());
        for id in expired_ids {
            if let Some(record) = self.labile.remove(&id) {
                self.stats.reconsolidations += 1;
                results.push(fold(record, true));
            }
        }
        self.stats.currently_labile = self.labile.len();
        results
    }

    /// Memories retrieved close in time to this one, with co-access counts,
    /// most frequent first.
    pub fn co_retrieved(&self, item_id: &str) -> Vec<(String, usize)> {
        let anchors: Vec<DateTime<Utc>> = self
            .history
            .iter()
            .filter(|r| r.item_id == item_id)
            .map(|r| r.at)
            .collect();
        if anchors.is_empty() {
            return Vec::new();
        }

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for record in &self.history {
            if record.item_id == item_id {
                continue;
            }
            let close = anchors.iter().any(|anchor| {
                (record.at - *anchor).num_seconds().abs() <= CO_RETRIEVAL_WINDOW_SECS
            });
            if close {
                *counts.entry(record.item_id.as_str()).or_insert(0) += 1;
            }
        }

        let mut out: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(id, n)| (id.to_string(), n))
            .collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        out
    }

    /// Lifetime counters.
    pub fn stats(&self) -> ReconsolidationStats {
        let mut stats = self.stats.clone();
        stats.currently_labile = self.labile.len();
        stats
    }

    fn expired(&self, record: &LabileRecord, now: DateTime<Utc>) -> bool {
        now - record.accessed_at > self.window
    }

    fn trim_history(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::days(HISTORY_RETENTION_DAYS);
        while let Some(front) = self.history.front() {
            if front.at < cutoff || self.history.len() > HISTORY_MAX_ENTRIES {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    #[cfg(test)]
    fn backdate(&mut self, item_id: &str, by: Duration) {
        if let Some(record) = self.labile.get_mut(item_id) {
            record.accessed_at -= by;
        }
    }
}

/// Fold a record's modifications into a change summary.
fn fold(record: LabileRecord, window_expired: bool) -> ReconsolidationResult {
    let mut summary = ChangeSummary::default();
    let mut tags: Vec<String> = record.snapshot.tags.clone();

    for modification in &record.modifications {
        match modification {
            Modification::AddContext { .. } => summary.contexts_added += 1,
            Modification::AddTag { tag } => {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                    summary.tags_added.push(tag.clone());
                }
            }
            Modification::RemoveTag { tag } => {
                if let Some(pos) = tags.iter().position(|t| t == tag) {
                    tags.remove(pos);
                    summary.tags_removed.push(tag.clone());
                }
            }
            Modification::StrengthenConnection { target_id, boost } => summary
                .connections_strengthened
                .push((target_id.clone(), *boost)),
            Modification::UpdateEmotion { intensity } => {
                summary.emotion_update = Some(intensity.clamp(0.0, 1.0));
            }
            Modification::LinkMemory {
                target_id,
                relationship,
            } => summary
                .links_added
                .push((target_id.clone(), relationship.clone())),
            Modification::UpdateContent {
                content,
                is_correction,
            } => {
                summary.content_changed = true;
                summary.was_correction |= is_correction;
                summary.new_content = Some(content.clone());
            }
            Modification::AddSource { source } => summary.sources_added.push(source.clone()),
            Modification::BoostRetrieval { boost } => summary.retrieval_boost += boost,
        }
    }

    ReconsolidationResult {
        item_id: record.item_id,
        accessed_at: record.accessed_at,
        applied: record.modifications,
        summary,
        window_expired,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(tags: &[&str]) -> MemorySnapshot {
        MemorySnapshot {
            content: "original".to_string(),
            summary: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            sentiment_intensity: 0.2,
            retrieval_strength: 0.8,
            source_chain: vec![],
        }
    }

    #[test]
    fn test_mark_and_check_labile() {
        let mut manager = ReconsolidationManager::new();
        assert!(!manager.is_labile("a"));
        manager.mark_labile("a", snapshot(&[]), None);
        assert!(manager.is_labile("a"));
    }

    #[test]
    fn test_window_expiry() {
        let mut manager = ReconsolidationManager::with_window_ms(1_000);
        manager.mark_labile("a", snapshot(&[]), None);
        manager.backdate("a", Duration::seconds(5));
        assert!(!manager.is_labile("a"));
        // Expired records reject modifications
        assert!(!manager.apply_modification(
            "a",
            Modification::AddTag { tag: "late".into() }
        ));
    }

    #[test]
    fn test_modification_cap() {
        let mut manager = ReconsolidationManager::new();
        manager.mark_labile("a", snapshot(&[]), None);
        for i in 0..MAX_MODIFICATIONS {
            assert!(manager.apply_modification(
                "a",
                Modification::AddTag {
                    tag: format!("t{}", i)
                }
            ));
        }
        // The eleventh is refused
        assert!(!manager.apply_modification(
            "a",
            Modification::AddTag { tag: "over".into() }
        ));
        assert_eq!(manager.stats().modifications_rejected, 1);
    }

    #[test]
    fn test_not_labile_rejects() {
        let mut manager = ReconsolidationManager::new();
        assert!(!manager.apply_modification(
            "ghost",
            Modification::BoostRetrieval { boost: 0.1 }
        ));
    }

    #[test]
    fn test_reconsolidate_folds_modifications() {
        let mut manager = ReconsolidationManager::new();
        manager.mark_labile("a", snapshot(&["keep", "drop"]), Some("debugging".into()));
        manager.apply_modification("a", Modification::AddTag { tag: "new".into() });
        manager.apply_modification("a", Modification::RemoveTag { tag: "drop".into() });
        manager.apply_modification(
            "a",
            Modification::UpdateContent {
                content: "corrected".into(),
                is_correction: true,
            },
        );
        manager.apply_modification("a", Modification::BoostRetrieval { boost: 0.05 });
        manager.apply_modification("a", Modification::BoostRetrieval { boost: 0.10 });

        let result = manager.reconsolidate("a").unwrap();
        assert_eq!(result.applied.len(), 5);
        assert_eq!(result.summary.tags_added, vec!["new"]);
        assert_eq!(result.summary.tags_removed, vec!["drop"]);
        assert!(result.summary.content_changed);
        assert!(result.summary.was_correction);
        assert_eq!(result.summary.new_content.as_deref(), Some("corrected"));
        assert!((result.summary.retrieval_boost - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_reconsolidate_idempotent() {
        let mut manager = ReconsolidationManager::new();
        manager.mark_labile("a", snapshot(&[]), None);
        assert!(manager.reconsolidate("a").is_some());
        assert!(manager.reconsolidate("a").is_none());
    }

    #[test]
    fn test_reconsolidate_expired_only_touches_expired() {
        let mut manager = ReconsolidationManager::with_window_ms(60_000);
        manager.mark_labile("old", snapshot(&[]), None);
        manager.mark_labile("fresh", snapshot(&[]), None);
        manager.backdate("old", Duration::minutes(10));

        let results = manager.reconsolidate_expired();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].item_id, "old");
        assert!(results[0].window_expired);
        assert!(manager.is_labile("fresh"));
    }

    #[test]
    fn test_remark_restarts_window_with_fresh_snapshot() {
        let mut manager = ReconsolidationManager::new();
        manager.mark_labile("a", snapshot(&[]), None);
        manager.apply_modification("a", Modification::AddTag { tag: "x".into() });
        // Retrieved again: new window, unapplied modifications dropped
        manager.mark_labile("a", snapshot(&[]), None);
        let result = manager.reconsolidate("a").unwrap();
        assert!(result.applied.is_empty());
    }

    #[test]
    fn test_co_retrieved_counts() {
        let mut manager = ReconsolidationManager::new();
        manager.mark_labile("a", snapshot(&[]), None);
        manager.mark_labile("b", snapshot(&[]), None);
        manager.mark_labile("b", snapshot(&[]), None);
        manager.mark_labile("c", snapshot(&[]), None);

        let co = manager.co_retrieved("a");
        assert_eq!(co.len(), 2);
        assert_eq!(co[0].0, "b");
        assert_eq!(co[0].1, 2);
    }

    #[test]
    fn test_emotion_clamped() {
        let mut manager = ReconsolidationManager::new();
        manager.mark_labile("a", snapshot(&[]), None);
        manager.apply_modification("a", Modification::UpdateEmotion { intensity: 3.5 });
        let result = manager.reconsolidate("a").unwrap();
        assert_eq!(result.summary.emotion_update, Some(1.0));
    }
}
