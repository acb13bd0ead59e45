//! Consolidation cycles
//!
//! Sleep-inspired batch processing over stored items:
//!
//! 1. **Selection**: score candidates by importance, recency, and access
//!    frequency; take the top slice
//! 2. **Replay**: emit strengthening events for the selected items
//! 3. **Pattern detection**: tags shared across enough selected items
//!    become insights
//! 4. **Connection discovery**: content-similar pairs become insights
//!
//! Everything here is synchronous and storage-free; the engine feeds
//! candidates in and applies the resulting events.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::config::ConsolidationConfig;
use crate::gate::jaccard_similarity;
use crate::memory::KnowledgeItem;

/// Most connection insights emitted per cycle.
const MAX_CONNECTIONS_PER_CYCLE: usize = 10;

/// Fewest items sharing a tag before it counts as a pattern.
const MIN_ITEMS_FOR_PATTERN: usize = 3;

// ============================================================================
// PHASES
// ============================================================================

/// Which part of the simulated sleep cycle is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclePhase {
    /// Light sleep: triage and scoring
    Light,
    /// Deep sleep: replay and strengthening
    Deep,
    /// REM: pattern extraction and connection discovery
    Rem,
    /// Wake: bookkeeping between cycles
    Wake,
}

impl CyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CyclePhase::Light => "light",
            CyclePhase::Deep => "deep",
            CyclePhase::Rem => "rem",
            CyclePhase::Wake => "wake",
        }
    }
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// EVENTS & INSIGHTS
// ============================================================================

/// A replay event: add `boost` to the item's strength.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayEvent {
    pub item_id: String,
    pub boost: f64,
}

/// What kind of insight a cycle produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    /// A tag recurring across the selection
    PatternDetection,
    /// Two items whose content overlaps strongly
    ConnectionDiscovery,
}

/// An insight produced during a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleInsight {
    pub id: String,
    pub kind: InsightKind,
    pub description: String,
    pub item_ids: Vec<String>,
    pub confidence: f64,
}

/// Everything one cycle did.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub phase: CyclePhase,
    pub candidates_considered: usize,
    pub selected_ids: Vec<String>,
    pub replays: Vec<ReplayEvent>,
    pub insights: Vec<CycleInsight>,
    pub started_at: DateTime<Utc>,
}

// ============================================================================
// SELECTION
// ============================================================================

/// Recency component of the selection score. Peaks at 1-3 days since access
/// (the consolidation sweet spot), penalizes the very recent, and decays
/// linearly out to 37 days.
pub fn recency_score(days_since_access: f64) -> f64 {
    if days_since_access < 1.0 {
        0.5
    } else if days_since_access <= 3.0 {
        1.0
    } else if days_since_access <= 7.0 {
        0.8
    } else {
        (0.8 - 0.02 * (days_since_access - 7.0)).max(0.2)
    }
}

/// Access-frequency component: frequently accessed items need consolidation
/// less.
pub fn access_score(access_count: i64) -> f64 {
    1.0 / (1.0 + 0.1 * access_count.max(0) as f64)
}

/// Combined selection score.
pub fn selection_score(item: &KnowledgeItem, now: DateTime<Utc>) -> f64 {
    0.4 * item.importance
        + 0.3 * recency_score(item.days_since_access(now))
        + 0.3 * access_score(item.access_count)
}

/// Pick the consolidation slice: top `clamp(floor(0.1 * n), min, max)` by
/// score.
pub fn select_candidates<'a>(
    candidates: &'a [KnowledgeItem],
    config: &ConsolidationConfig,
    now: DateTime<Utc>,
) -> Vec<&'a KnowledgeItem> {
    let mut scored: Vec<(&KnowledgeItem, f64)> = candidates
        .iter()
        .map(|item| (item, selection_score(item, now)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let take = ((candidates.len() as f64 * 0.1).floor() as usize)
        .clamp(config.min_memories_per_cycle, config.max_memories_per_cycle)
        .min(candidates.len());

    scored.into_iter().take(take).map(|(item, _)| item).collect()
}

// ============================================================================
// CYCLE RUNNER
// ============================================================================

/// Run one consolidation cycle over the candidate set.
pub fn run_cycle(
    phase: CyclePhase,
    candidates: &[KnowledgeItem],
    config: &ConsolidationConfig,
    now: DateTime<Utc>,
) -> CycleReport {
    let selected = select_candidates(candidates, config, now);
    let selected_ids: Vec<String> = selected.iter().map(|item| item.id.clone()).collect();

    let replays: Vec<ReplayEvent> = selected
        .iter()
        .map(|item| ReplayEvent {
            item_id: item.id.clone(),
            boost: config.replay_strength_boost,
        })
        .collect();

    let mut insights = detect_patterns(&selected, config);
    insights.extend(discover_connections(&selected, config));
    insights.retain(|insight| insight.confidence >= config.insight_confidence_threshold);

    tracing::debug!(
        phase = phase.as_str(),
        selected = selected_ids.len(),
        insights = insights.len(),
        "consolidation cycle complete"
    );

    CycleReport {
        phase,
        candidates_considered: candidates.len(),
        selected_ids,
        replays,
        insights,
        started_at: now,
    }
}

/// Tags shared by enough selected items become pattern insights with
/// confidence `min(1, count/|selected| + 0.3)`.
fn detect_patterns(selected: &[&KnowledgeItem], _config: &ConsolidationConfig) -> Vec<CycleInsight> {
    if selected.is_empty() {
        return Vec::new();
    }

    let mut by_tag: HashMap<&str, Vec<&str>> = HashMap::new();
    for item in selected {
        for tag in &item.tags {
            by_tag.entry(tag.as_str()).or_default().push(item.id.as_str());
        }
    }

    let mut insights: Vec<CycleInsight> = by_tag
        .into_iter()
        .filter(|(_, ids)| ids.len() >= MIN_ITEMS_FOR_PATTERN)
        .map(|(tag, ids)| {
            let confidence = (ids.len() as f64 / selected.len() as f64 + 0.3).min(1.0);
            CycleInsight {
                id: format!("insight-{}", Uuid::new_v4()),
                kind: InsightKind::PatternDetection,
                description: format!("Recurring theme '{}' across {} memories", tag, ids.len()),
                item_ids: ids.into_iter().map(String::from).collect(),
                confidence,
            }
        })
        .collect();
    insights.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    insights
}

/// Content-similar pairs become connection insights with confidence equal to
/// the similarity. Capped per cycle, highest similarity first.
fn discover_connections(
    selected: &[&KnowledgeItem],
    config: &ConsolidationConfig,
) -> Vec<CycleInsight> {
    let mut connections: Vec<CycleInsight> = Vec::new();
    for i in 0..selected.len() {
        for j in (i + 1)..selected.len() {
            let similarity = jaccard_similarity(&selected[i].content, &selected[j].content);
            if similarity >= config.connection_threshold {
                connections.push(CycleInsight {
                    id: format!("insight-{}", Uuid::new_v4()),
                    kind: InsightKind::ConnectionDiscovery,
                    description: format!(
                        "Memories share {:.0}% of their vocabulary",
                        similarity * 100.0
                    ),
                    item_ids: vec![selected[i].id.clone(), selected[j].id.clone()],
                    confidence: similarity,
                });
            }
        }
    }
    connections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    connections.truncate(MAX_CONNECTIONS_PER_CYCLE);
    connections
}

// ============================================================================
// SCHEDULING
// ============================================================================

/// When the next cycle is worth running.
///
/// A backlog in the 1-7 day consolidation band means soon (one hour). A
/// too-fresh store waits for its oldest sub-day item to reach 24 hours.
/// Otherwise check back in 8 hours.
pub fn optimal_next_cycle(candidates: &[KnowledgeItem], now: DateTime<Utc>) -> DateTime<Utc> {
    let in_band = candidates
        .iter()
        .filter(|item| {
            let days = item.days_since_access(now);
            (1.0..=7.0).contains(&days)
        })
        .count();
    if in_band >= 5 {
        return now + Duration::hours(1);
    }

    let oldest_fresh = candidates
        .iter()
        .filter(|item| item.days_since_access(now) < 1.0)
        .min_by_key(|item| item.last_accessed_at);
    if let Some(item) = oldest_fresh {
        return item.last_accessed_at + Duration::hours(24);
    }

    now + Duration::hours(8)
}

// ============================================================================
// TESTS
// ============================================================================
