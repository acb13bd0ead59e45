//! Context-weighted ranking
//!
//! Encoding Specificity (Tulving & Thomson 1973): retrieval works best when
//! the retrieval context matches the encoding context. The `context`
//! operation ranks items by a weighted blend of temporal proximity, topic
//! overlap, project match, and mood alignment, scaled by the item's
//! synaptic-tagging factor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::memory::KnowledgeItem;

/// Weight of each component in the blended score.
const WEIGHT_TEMPORAL: f64 = 0.3;
const WEIGHT_TOPIC: f64 = 0.3;
const WEIGHT_PROJECT: f64 = 0.2;
const WEIGHT_MOOD: f64 = 0.2;

/// A component missing from the query scores neutrally.
const NEUTRAL: f64 = 0.5;

/// The retrieval context to rank against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextQuery {
    /// Topics active right now (matched against tags and concepts)
    pub topics: Vec<String>,
    /// Project the caller is working in
    pub project: Option<String>,
    /// Current mood intensity, [0, 1]
    pub mood: Option<f64>,
    /// Reference instant for temporal proximity (defaults to now)
    pub reference_time: Option<DateTime<Utc>>,
    /// Maximum results
    pub limit: usize,
}

/// Per-component breakdown of a ranked item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextScore {
    pub temporal: f64,
    pub topic: f64,
    pub project: f64,
    pub mood: f64,
    pub combined: f64,
}

/// A ranked result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRankedItem {
    pub item: KnowledgeItem,
    pub score: ContextScore,
}

/// Rank items against a retrieval context, best first.
pub fn rank_by_context(items: Vec<KnowledgeItem>, query: &ContextQuery) -> Vec<ContextRankedItem> {
    let reference = query.reference_time.unwrap_or_else(Utc::now);
    let limit = if query.limit == 0 { 10 } else { query.limit };

    let mut ranked: Vec<ContextRankedItem> = items
        .into_iter()
        .map(|item| {
            let score = score_item(&item, query, reference);
            ContextRankedItem { item, score }
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.score
            .combined
            .partial_cmp(&a.score.combined)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(limit);
    ranked
}

fn score_item(item: &KnowledgeItem, query: &ContextQuery, reference: DateTime<Utc>) -> ContextScore {
    let temporal = temporal_proximity(item, reference);
    let topic = if query.topics.is_empty() {
        NEUTRAL
    } else {
        topic_overlap(item, &query.topics)
    };
    let project = match &query.project {
        None => NEUTRAL,
        Some(project) => project_match(item, project),
    };
    let mood = match query.mood {
        None => NEUTRAL,
        Some(mood) => 1.0 - (item.sentiment_intensity - mood.clamp(0.0, 1.0)).abs(),
    };

    let blended = WEIGHT_TEMPORAL * temporal
        + WEIGHT_TOPIC * topic
        + WEIGHT_PROJECT * project
        + WEIGHT_MOOD * mood;
    // Synaptic tagging: retroactively important memories rank higher
    let combined = blended * item.stability_factor.clamp(0.5, 2.0);

    ContextScore {
        temporal,
        topic,
        project,
        mood,
        combined,
    }
}

/// Exponential decay over a one-week horizon from the more recent of last
/// access and creation.
fn temporal_proximity(item: &KnowledgeItem, reference: DateTime<Utc>) -> f64 {
    let anchor = item.last_accessed_at.max(item.created_at);
    let days = (reference - anchor).num_seconds().abs() as f64 / 86_400.0;
    (-days / 7.0).exp()
}

/// Jaccard overlap between the query's topics and the item's tags+concepts.
fn topic_overlap(item: &KnowledgeItem, topics: &[String]) -> f64 {
    let query_set: HashSet<String> = topics.iter().map(|t| t.to_lowercase()).collect();
    let item_set: HashSet<String> = item
        .tags
        .iter()
        .chain(item.concepts.iter())
        .map(|t| t.to_lowercase())
        .collect();
    if query_set.is_empty() || item_set.is_empty() {
        return 0.0;
    }
    let intersection = query_set.intersection(&item_set).count();
    let union = query_set.union(&item_set).count();
    intersection as f64 / union as f64
}

/// Whole-word project-name match in tags, concepts, or source platform.
fn project_match(item: &KnowledgeItem, project: &str) -> f64 {
    let project = project.to_lowercase();
    let hit = item
        .tags
        .iter()
        .chain(item.concepts.iter())
        .any(|t| t.to_lowercase() == project)
        || item.source_platform.to_lowercase() == project;
    if hit { 1.0 } else { 0.0 }
}

// ============================================================================
// TESTS
// ============================================================================
