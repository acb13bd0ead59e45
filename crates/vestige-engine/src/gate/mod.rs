//! Prediction-Error Gate
//!
//! The ingestion decision engine. Incoming content is compared against the
//! most similar existing memories; the resulting prediction error
//! (`1 - max_similarity`) drives whether the engine creates, updates,
//! merges, skips, or flags a contradiction. This is what keeps near-
//! duplicates from piling up while genuinely novel information still lands
//! as new memories.
//!
//! Pure with respect to the repository: callers fetch the candidate set,
//! `decide` only computes. The gate keeps a small bounded history for
//! statistics.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::config::GateConfig;

/// Bound on the decision history kept for stats.
const HISTORY_LIMIT: usize = 1000;

// ============================================================================
// INPUTS
// ============================================================================

/// The incoming content under evaluation.
#[derive(Debug, Clone)]
pub struct IncomingMemory {
    pub content: String,
    pub embedding: Option<Vec<f32>>,
}

/// An existing memory the incoming one is compared against.
#[derive(Debug, Clone)]
pub struct CandidateMemory {
    pub id: String,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub tags: Vec<String>,
    pub retention_strength: f64,
}

// ============================================================================
// OUTPUTS
// ============================================================================

/// What to do with the incoming content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GateDecision {
    /// Store as a new memory
    Create,
    /// Rewrite the most similar existing memory instead
    Update { target_id: String },
    /// Fold several near-identical memories together
    Merge { target_ids: Vec<String> },
    /// Duplicate; do nothing
    Skip { duplicate_of: String },
    /// The incoming content is meant to replace the target
    Supersede { target_id: String },
    /// The incoming content conflicts with an existing memory
    FlagContradiction { target_id: String },
}

impl GateDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateDecision::Create => "create",
            GateDecision::Update { .. } => "update",
            GateDecision::Merge { .. } => "merge",
            GateDecision::Skip { .. } => "skip",
            GateDecision::Supersede { .. } => "supersede",
            GateDecision::FlagContradiction { .. } => "contradiction",
        }
    }
}

/// How two memories contradict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionKind {
    /// One side negates what the other asserts
    DirectNegation,
    /// Same claim, different numbers
    ValueConflict,
    /// Mutually exclusive statements (reserved for stricter detectors)
    LogicalConflict,
    /// True at different times (reserved for stricter detectors)
    TemporalConflict,
}

/// Follow-up the caller should take, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    CreateMemory,
    AddContext,
    LinkMemories,
    MarkSuperseded,
    MergeMemories,
    AddContradictionFlag,
    Skip,
}

/// Full gate verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateResult {
    pub decision: GateDecision,
    /// `1 - max_similarity`: the novelty signal
    pub prediction_error: f64,
    /// Highest similarity found across candidates
    pub max_similarity: f64,
    /// Candidate ids relevant to the decision, most similar first
    pub target_memory_ids: Vec<String>,
    /// Ordered follow-ups
    pub suggested_actions: Vec<SuggestedAction>,
    /// Set when a contradiction was detected
    pub contradiction: Option<ContradictionKind>,
}

/// Aggregates over the bounded decision history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateStats {
    pub total_decisions: u64,
    pub creates: u64,
    pub updates: u64,
    pub merges: u64,
    pub skips: u64,
    pub contradictions: u64,
    pub average_prediction_error: f64,
}

// ============================================================================
// GATE
// ============================================================================

/// The prediction-error gate.
pub struct PredictionErrorGate {
    config: GateConfig,
    history: VecDeque<(String, f64)>,
}

impl Default for PredictionErrorGate {
    fn default() -> Self {
        Self::new(GateConfig::default())
    }
}

impl PredictionErrorGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            history: VecDeque::new(),
        }
    }

    /// Classify incoming content against the candidate set.
    pub fn decide(&mut self, incoming: &IncomingMemory, candidates: &[CandidateMemory]) -> GateResult {
        // Rank candidates by similarity, best first
        let mut ranked: Vec<(usize, f64)> = candidates
            .iter()
            .enumerate()
            .map(|(i, candidate)| (i, self.similarity(incoming, candidate)))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let max_similarity = ranked.first().map(|(_, s)| *s).unwrap_or(0.0);
        let prediction_error = 1.0 - max_similarity;

        let result = self.apply_decision_table(incoming, candidates, &ranked, max_similarity);

        self.history.push_back((
            result.decision.as_str().to_string(),
            result.prediction_error,
        ));
        if self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }

        tracing::debug!(
            decision = result.decision.as_str(),
            prediction_error,
            "gate decision"
        );
        result
    }

    fn apply_decision_table(
        &self,
        incoming: &IncomingMemory,
        candidates: &[CandidateMemory],
        ranked: &[(usize, f64)],
        max_similarity: f64,
    ) -> GateResult {
        let prediction_error = 1.0 - max_similarity;
        let most_similar = ranked.first().map(|(i, _)| &candidates[*i]);

        // 1. Duplicate
        if max_similarity >= self.config.duplicate_threshold {
            let duplicate = most_similar.expect("similarity implies a candidate");
            return GateResult {
                decision: GateDecision::Skip {
                    duplicate_of: duplicate.id.clone(),
                },
                prediction_error,
                max_similarity,
                target_memory_ids: vec![duplicate.id.clone()],
                suggested_actions: vec![SuggestedAction::Skip],
                contradiction: None,
            };
        }

        // 2. Contradiction with the most similar candidate
        if self.config.detect_contradictions {
            if let Some(candidate) = most_similar {
                if let Some(kind) =
                    detect_contradiction(&incoming.content, &candidate.content, max_similarity)
                {
                    return GateResult {
                        decision: GateDecision::FlagContradiction {
                            target_id: candidate.id.clone(),
                        },
                        prediction_error,
                        max_similarity,
                        target_memory_ids: vec![candidate.id.clone()],
                        suggested_actions: vec![
                            SuggestedAction::AddContradictionFlag,
                            SuggestedAction::CreateMemory,
                            SuggestedAction::LinkMemories,
                        ],
                        contradiction: Some(kind),
                    };
                }
            }
        }

        // 3. Close enough to rewrite in place
        if max_similarity >= self.config.update_threshold {
            let target = most_similar.expect("similarity implies a candidate");
            return GateResult {
                decision: GateDecision::Update {
                    target_id: target.id.clone(),
                },
                prediction_error,
                max_similarity,
                target_memory_ids: vec![target.id.clone()],
                suggested_actions: vec![SuggestedAction::AddContext, SuggestedAction::LinkMemories],
                contradiction: None,
            };
        }

        // 4. Enough cousins to merge
        let merge_set: Vec<String> = ranked
            .iter()
            .take_while(|(_, s)| *s >= self.config.merge_threshold)
            .map(|(i, _)| candidates[*i].id.clone())
            .collect();
        if merge_set.len() >= self.config.min_merge_count {
            return GateResult {
                decision: GateDecision::Merge {
                    target_ids: merge_set.clone(),
                },
                prediction_error,
                max_similarity,
                target_memory_ids: merge_set,
                suggested_actions: vec![
                    SuggestedAction::MergeMemories,
                    SuggestedAction::MarkSuperseded,
                ],
                contradiction: None,
            };
        }

        // 5. One borderline cousin, caller prefers updating
        if max_similarity >= self.config.merge_threshold && self.config.prefer_update {
            let target = most_similar.expect("similarity implies a candidate");
            return GateResult {
                decision: GateDecision::Update {
                    target_id: target.id.clone(),
                },
                prediction_error,
                max_similarity,
                target_memory_ids: vec![target.id.clone()],
                suggested_actions: vec![SuggestedAction::AddContext, SuggestedAction::LinkMemories],
                contradiction: None,
            };
        }

        // 6. Novel
        let related: Vec<String> = ranked
            .iter()
            .take_while(|(_, s)| *s >= 0.3)
            .map(|(i, _)| candidates[*i].id.clone())
            .collect();
        let mut suggested_actions = vec![SuggestedAction::CreateMemory];
        if !related.is_empty() {
            suggested_actions.push(SuggestedAction::LinkMemories);
        }
        GateResult {
            decision: GateDecision::Create,
            prediction_error,
            max_similarity,
            target_memory_ids: related,
            suggested_actions,
            contradiction: None,
        }
    }

    /// Similarity between incoming content and a candidate: cosine when both
    /// sides carry embeddings, word-set Jaccard otherwise.
    fn similarity(&self, incoming: &IncomingMemory, candidate: &CandidateMemory) -> f64 {
        if let (Some(a), Some(b)) = (&incoming.embedding, &candidate.embedding) {
            return cosine_similarity(a, b);
        }
        jaccard_similarity(&incoming.content, &candidate.content)
    }

    /// Aggregates over the bounded decision history.
    pub fn stats(&self) -> GateStats {
        let mut stats = GateStats {
            total_decisions: self.history.len() as u64,
            ..Default::default()
        };
        let mut error_sum = 0.0;
        for (decision, error) in &self.history {
            error_sum += error;
            match decision.as_str() {
                "create" => stats.creates += 1,
                "update" => stats.updates += 1,
                "merge" => stats.merges += 1,
                "skip" => stats.skips += 1,
                "contradiction" => stats.contradictions += 1,
                _ => {}
            }
        }
        if !self.history.is_empty() {
            stats.average_prediction_error = error_sum / self.history.len() as f64;
        }
        stats
    }
}

// ============================================================================
// SIMILARITY
// ============================================================================

/// Cosine similarity, clamped to [0, 1]. Zero on dimension mismatch or
/// zero-magnitude input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    ((dot / (mag_a * mag_b)) as f64).clamp(0.0, 1.0)
}

/// Jaccard similarity over case-folded word sets (words longer than 2
/// characters). Zero when either side is empty.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a = word_set(a);
    let set_b = word_set(b);
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| w.len() > 2)
        .collect()
}

// ============================================================================
// CONTRADICTION DETECTION
// ============================================================================

/// Negation pairs checked for crossings. The affirmative side must appear
/// without its negation, the other side must carry the negation.
const NEGATION_PAIRS: &[(&str, &str)] = &[
    ("is", "is not"),
    ("is", "isn't"),
    ("can", "cannot"),
    ("can", "can't"),
    ("will", "will not"),
    ("will", "won't"),
    ("does", "does not"),
    ("does", "doesn't"),
    ("should", "should not"),
    ("true", "false"),
    ("always", "never"),
    ("enabled", "disabled"),
];

/// Heuristic contradiction check between two statements.
pub fn detect_contradiction(a: &str, b: &str, similarity: f64) -> Option<ContradictionKind> {
    let a_norm = normalize(a);
    let b_norm = normalize(b);

    for (affirm, negate) in NEGATION_PAIRS {
        let a_affirms = contains_phrase(&a_norm, affirm) && !contains_phrase(&a_norm, negate);
        let a_negates = contains_phrase(&a_norm, negate);
        let b_affirms = contains_phrase(&b_norm, affirm) && !contains_phrase(&b_norm, negate);
        let b_negates = contains_phrase(&b_norm, negate);

        if (a_affirms && b_negates) || (b_affirms && a_negates) {
            // A crossing only counts when the statements are about the same
            // thing; require some lexical overlap
            if jaccard_similarity(a, b) >= 0.25 || similarity >= 0.5 {
                return Some(ContradictionKind::DirectNegation);
            }
        }
    }

    // Same claim with different numbers
    if similarity >= 0.5 {
        let nums_a = numerals(&a_norm);
        let nums_b = numerals(&b_norm);
        if !nums_a.is_empty() && !nums_b.is_empty() && nums_a != nums_b {
            return Some(ContradictionKind::ValueConflict);
        }
    }

    None
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '\'' || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect()
}

/// Whole-word phrase containment.
fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    let words: Vec<&str> = haystack.split_whitespace().collect();
    let needle: Vec<&str> = phrase.split_whitespace().collect();
    if needle.is_empty() || words.len() < needle.len() {
        return false;
    }
    words.windows(needle.len()).any(|window| window == needle)
}

fn numerals(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .filter(|w| !w.is_empty() && w.chars().all(|c| c.is_ascii_digit() || c == '.'))
        .filter(|w| w.chars().any(|c| c.is_ascii_digit()))
        .map(String::from)
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
