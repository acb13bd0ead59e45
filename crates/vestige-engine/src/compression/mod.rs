//! Compression engine
//!
//! Compresses old, unimportant memories while keeping their load-bearing
//! vocabulary. Compression never touches important memories (preservation
//! threshold) or anything too young or too short to be worth it.
//!
//! Strategies:
//! - **Summarize**: keep the highest-scoring sentences (keyword density
//!   weighted toward earlier positions), in original order
//! - **Generalize**: keep only sentences carrying preserved keywords,
//!   falling back to an aggressive summarize when none qualify
//! - **Deduplicate**: merge several memories' sentences, then summarize

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::config::CompressionConfig;

/// Bound on the advisory lost-information list.
const MAX_LOST_INFORMATION: usize = 20;

// ============================================================================
// LEVELS & STRATEGIES
// ============================================================================

/// How aggressively to compress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    None,
    Light,
    Moderate,
    Heavy,
    Maximum,
}

impl CompressionLevel {
    /// Target fraction of sentences to keep.
    pub fn target_ratio(&self) -> f64 {
        match self {
            CompressionLevel::None => 1.0,
            CompressionLevel::Light => 0.8,
            CompressionLevel::Moderate => 0.5,
            CompressionLevel::Heavy => 0.3,
            CompressionLevel::Maximum => 0.1,
        }
    }
}

/// Which algorithm to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionStrategy {
    Summarize,
    Generalize,
    Deduplicate,
}

/// Input memory, abstracted from storage.
#[derive(Debug, Clone)]
pub struct CompressionCandidate {
    pub id: String,
    pub content: String,
    pub importance: f64,
    pub access_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Output of one compression.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressedMemory {
    /// Source memory ids (one for summarize/generalize, many for dedupe)
    pub original_ids: Vec<String>,
    /// The compressed content
    pub compressed: String,
    pub level: CompressionLevel,
    pub strategy: CompressionStrategy,
    pub original_length: usize,
    pub compressed_length: usize,
    /// compressed / original character ratio
    pub achieved_ratio: f64,
    /// Keywords deliberately preserved
    pub preserved_keywords: Vec<String>,
    /// Advisory: notable words that did not survive (at most 20)
    pub lost_information: Vec<String>,
}

/// Running totals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionStats {
    pub operations: usize,
    pub bytes_saved: usize,
    pub average_ratio: f64,
}

// ============================================================================
// ENGINE
// ============================================================================

/// The compression engine.
pub struct CompressionEngine {
    config: CompressionConfig,
    stats: CompressionStats,
}

impl Default for CompressionEngine {
    fn default() -> Self {
        Self::new(CompressionConfig::default())
    }
}

impl CompressionEngine {
    pub fn new(config: CompressionConfig) -> Self {
        Self {
            config,
            stats: CompressionStats::default(),
        }
    }

    /// Whether a memory qualifies for compression at all: long enough, old
    /// enough, and not important enough to preserve verbatim.
    pub fn should_compress(&self, candidate: &CompressionCandidate, now: DateTime<Utc>) -> bool {
        let words = candidate.content.split_whitespace().count();
        let age_days = (now - candidate.created_at).num_days();
        words >= self.config.min_content_length
            && candidate.importance < self.config.min_importance_for_preservation
            && age_days >= self.config.age_days_for_compression
    }

    /// Pick a level from age and access frequency. Older and less-accessed
    /// memories compress harder; heavy access softens the level by one band.
    pub fn select_level(&self, candidate: &CompressionCandidate, now: DateTime<Utc>) -> CompressionLevel {
        let age_days = (now - candidate.created_at).num_days();
        let by_age = if age_days >= 365 {
            CompressionLevel::Maximum
        } else if age_days >= 180 {
            CompressionLevel::Heavy
        } else if age_days >= 90 {
            CompressionLevel::Moderate
        } else {
            CompressionLevel::Light
        };

        if candidate.access_count >= 20 {
            soften(by_age)
        } else {
            by_age
        }
    }

    /// Compress one memory. When `level` is None it is selected from age and
    /// access bands.
    pub fn compress(
        &mut self,
        candidate: &CompressionCandidate,
        level: Option<CompressionLevel>,
        strategy: CompressionStrategy,
    ) -> CompressedMemory {
        let now = Utc::now();
        let level = level.unwrap_or_else(|| self.select_level(candidate, now));
        let keywords = self.preserved_keywords(&candidate.content);

        let compressed = match strategy {
            CompressionStrategy::Summarize => {
                summarize(&candidate.content, level.target_ratio(), &keywords)
            }
            CompressionStrategy::Generalize => {
                let kept = generalize(&candidate.content, &keywords);
                if kept.is_empty() {
                    summarize(&candidate.content, 0.3, &keywords)
                } else {
                    kept
                }
            }
            CompressionStrategy::Deduplicate => {
                // Single-input dedupe degenerates to a half-ratio summarize
                summarize(&candidate.content, 0.5, &keywords)
            }
        };
        let compressed = self.cap_length(compressed);

        self.finish(
            vec![candidate.id.clone()],
            &candidate.content,
            compressed,
            level,
            strategy,
            keywords,
        )
    }

    /// Merge several memories into one compressed form: pairwise sentence
    /// union, then a half-ratio summarize.
    pub fn deduplicate(&mut self, candidates: &[CompressionCandidate]) -> Option<CompressedMemory> {
        if candidates.is_empty() {
            return None;
        }
        let merged = candidates
            .iter()
            .map(|c| c.content.as_str())
            .fold(String::new(), |acc, content| merge_contents(&acc, content));
        let keywords = self.preserved_keywords(&merged);
        let compressed = self.cap_length(summarize(&merged, 0.5, &keywords));

        Some(self.finish(
            candidates.iter().map(|c| c.id.clone()).collect(),
            &merged,
            compressed,
            CompressionLevel::Moderate,
            CompressionStrategy::Deduplicate,
            keywords,
        ))
    }

    /// Running totals.
    pub fn stats(&self) -> &CompressionStats {
        &self.stats
    }

    fn finish(
        &mut self,
        original_ids: Vec<String>,
        original: &str,
        compressed: String,
        level: CompressionLevel,
        strategy: CompressionStrategy,
        preserved_keywords: Vec<String>,
    ) -> CompressedMemory {
        let lost_information = lost_information(original, &compressed, &preserved_keywords);
        let original_length = original.len();
        let compressed_length = compressed.len();
        let achieved_ratio = if original_length > 0 {
            compressed_length as f64 / original_length as f64
        } else {
            1.0
        };

        self.stats.operations += 1;
        self.stats.bytes_saved += original_length.saturating_sub(compressed_length);
        let n = self.stats.operations as f64;
        self.stats.average_ratio = (self.stats.average_ratio * (n - 1.0) + achieved_ratio) / n;

        CompressedMemory {
            original_ids,
            compressed,
            level,
            strategy,
            original_length,
            compressed_length,
            achieved_ratio,
            preserved_keywords,
            lost_information,
        }
    }

    fn cap_length(&self, mut compressed: String) -> String {
        let cap = self.config.max_compressed_length;
        if compressed.len() > cap {
            let mut cut = cap.saturating_sub(3);
            while cut > 0 && !compressed.is_char_boundary(cut) {
                cut -= 1;
            }
            compressed.truncate(cut);
            compressed.push_str("...");
        }
        compressed
    }

    /// Top keywords, sized by the preservation ratio (at least 5).
    fn preserved_keywords(&self, content: &str) -> Vec<String> {
        let all = keywords_by_frequency(content);
        let take = ((all.len() as f64 * self.config.keyword_preservation_ratio).ceil() as usize)
            .clamp(5.min(all.len()), all.len());
        all.into_iter().take(take).collect()
    }
}

fn soften(level: CompressionLevel) -> CompressionLevel {
    match level {
        CompressionLevel::Maximum => CompressionLevel::Heavy,
        CompressionLevel::Heavy => CompressionLevel::Moderate,
        CompressionLevel::Moderate => CompressionLevel::Light,
        other => other,
    }
}

// ============================================================================
// TEXT PRIMITIVES
// ============================================================================

fn split_sentences(content: &str) -> Vec<&str> {
    content
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Sentence score: keyword density weighted by position (earlier is
/// heavier).
fn sentence_score(sentence: &str, index: usize, total: usize, keywords: &[String]) -> f64 {
    let words: Vec<String> = sentence
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .collect();
    if words.is_empty() {
        return 0.0;
    }
    let hits = words.iter().filter(|w| keywords.contains(w)).count();
    let density = hits as f64 / words.len() as f64;
    let position_weight = 1.0 - 0.5 * (index as f64 / total.max(1) as f64);
    density * position_weight
}

/// Keep the `ceil(ratio * N)` best sentences, in original order.
fn summarize(content: &str, ratio: f64, keywords: &[String]) -> String {
    let sentences = split_sentences(content);
    if sentences.is_empty() {
        return String::new();
    }
    let keep = ((sentences.len() as f64 * ratio).ceil() as usize).clamp(1, sentences.len());

    let mut scored: Vec<(usize, f64)> = sentences
        .iter()
        .enumerate()
        .map(|(i, s)| (i, sentence_score(s, i, sentences.len(), keywords)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut kept: Vec<usize> = scored.into_iter().take(keep).map(|(i, _)| i).collect();
    kept.sort_unstable();

    kept.into_iter()
        .map(|i| sentences[i])
        .collect::<Vec<_>>()
        .join(". ")
        + "."
}

/// Keep only sentences carrying preserved keywords.
fn generalize(content: &str, keywords: &[String]) -> String {
    let sentences = split_sentences(content);
    let kept: Vec<&str> = sentences
        .into_iter()
        .filter(|s| {
            let lower = s.to_lowercase();
            keywords.iter().any(|k| lower.contains(k))
        })
        .collect();
    if kept.is_empty() {
        String::new()
    } else {
        kept.join(". ") + "."
    }
}

/// Union of two contents' sentences, first occurrence wins.
fn merge_contents(a: &str, b: &str) -> String {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged: Vec<&str> = Vec::new();
    for sentence in split_sentences(a).into_iter().chain(split_sentences(b)) {
        if seen.insert(sentence.to_lowercase()) {
            merged.push(sentence);
        }
    }
    merged.join(". ")
}

/// Words of five or more characters present in the original but absent from
/// the compressed form and the preserved keywords. Advisory; capped.
fn lost_information(original: &str, compressed: &str, keywords: &[String]) -> Vec<String> {
    let compressed_lower = compressed.to_lowercase();
    let mut seen = HashSet::new();
    let mut lost = Vec::new();
    for word in original.split_whitespace() {
        let word = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if word.len() < 5 || STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        if keywords.contains(&word) || compressed_lower.contains(&word) {
            continue;
        }
        if seen.insert(word.clone()) {
            lost.push(word);
            if lost.len() >= MAX_LOST_INFORMATION {
                break;
            }
        }
    }
    lost
}

/// Lowercase tokens longer than four characters, stopword-filtered, by
/// descending frequency.
fn keywords_by_frequency(content: &str) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for word in content.split_whitespace() {
        let word = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if word.len() > 4 && !STOPWORDS.contains(&word.as_str()) {
            *counts.entry(word).or_insert(0) += 1;
        }
    }
    let mut keywords: Vec<(String, usize)> = counts.into_iter().collect();
    keywords.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    keywords.into_iter().map(|(w, _)| w).collect()
}

const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "because", "before", "being", "below",
    "between", "could", "during", "every", "further", "might", "other", "should", "their",
    "there", "these", "things", "those", "through", "under", "until", "where", "which", "while",
    "would",
];

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn candidate(content: &str, importance: f64, age_days: i64, access_count: i64) -> CompressionCandidate {
        CompressionCandidate {
            id: "m1".to_string(),
            content: content.to_string(),
            importance,
            access_count,
            created_at: Utc::now() - Duration::days(age_days),
        }
    }

    fn long_content() -> String {
        (0..60)
            .map(|i| format!("Sentence number {} discusses memory consolidation mechanisms", i))
            .collect::<Vec<_>>()
            .join(". ")
    }

    #[test]
    fn test_should_compress_gates() {
        let engine = CompressionEngine::default();
        let now = Utc::now();

        // Old, unimportant, long: yes
        assert!(engine.should_compress(&candidate(&long_content(), 0.3, 60, 1), now));
        // Too important
        assert!(!engine.should_compress(&candidate(&long_content(), 0.9, 60, 1), now));
        // Too young
        assert!(!engine.should_compress(&candidate(&long_content(), 0.3, 5, 1), now));
        // Too short
        assert!(!engine.should_compress(&candidate("short text", 0.3, 60, 1), now));
    }

    #[test]
    fn test_level_selection_monotone_in_age() {
        let engine = CompressionEngine::default();
        let now = Utc::now();
        let levels: Vec<CompressionLevel> = [30, 120, 200, 400]
            .iter()
            .map(|&age| engine.select_level(&candidate("x", 0.3, age, 0), now))
            .collect();
        assert_eq!(
            levels,
            vec![
                CompressionLevel::Light,
                CompressionLevel::Moderate,
                CompressionLevel::Heavy,
                CompressionLevel::Maximum
            ]
        );
        // Older never compresses lighter
        for pair in levels.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn test_heavy_access_softens_level() {
        let engine = CompressionEngine::default();
        let now = Utc::now();
        let rarely = engine.select_level(&candidate("x", 0.3, 400, 0), now);
        let often = engine.select_level(&candidate("x", 0.3, 400, 50), now);
        assert_eq!(rarely, CompressionLevel::Maximum);
        assert_eq!(often, CompressionLevel::Heavy);
    }

    #[test]
    fn test_summarize_respects_ratio_and_order() {
        let mut engine = CompressionEngine::default();
        let content = long_content();
        let result = engine.compress(
            &candidate(&content, 0.3, 60, 0),
            Some(CompressionLevel::Heavy),
            CompressionStrategy::Summarize,
        );
        // Heavy keeps ceil(0.3 * 60) = 18 sentences
        let kept = result.compressed.matches("Sentence number").count();
        assert_eq!(kept, 18);
        assert!(result.compressed_length < result.original_length);
        assert!(result.achieved_ratio < 1.0);

        // Original order: extract the sentence ordinals and check sorted
        let ordinals: Vec<usize> = result
            .compressed
            .split(". ")
            .filter_map(|s| {
                s.split_whitespace()
                    .nth(2)
                    .and_then(|n| n.trim_end_matches('.').parse().ok())
            })
            .collect();
        let mut sorted = ordinals.clone();
        sorted.sort_unstable();
        assert_eq!(ordinals, sorted);
    }

    #[test]
    fn test_none_level_keeps_everything() {
        let mut engine = CompressionEngine::default();
        let content = "First point here. Second point there. Third point everywhere.";
        let result = engine.compress(
            &candidate(content, 0.3, 60, 0),
            Some(CompressionLevel::None),
            CompressionStrategy::Summarize,
        );
        assert_eq!(result.compressed.matches("point").count(), 3);
    }

    #[test]
    fn test_generalize_keeps_keyword_sentences() {
        let mut engine = CompressionEngine::default();
        let content = "The database migration needs careful planning. \
                       Lunch was good. \
                       Database indexes speed up the migration path. \
                       The weather stayed mild.";
        let result = engine.compress(
            &candidate(content, 0.3, 60, 0),
            Some(CompressionLevel::Moderate),
            CompressionStrategy::Generalize,
        );
        assert!(result.compressed.to_lowercase().contains("database"));
        assert!(!result.compressed.contains("Lunch"));
    }

    #[test]
    fn test_generalize_falls_back_when_nothing_matches() {
        let mut engine = CompressionEngine::default();
        // All words too short to become keywords: generalize keeps nothing,
        // falls back to summarize at 0.3
        let content = "One two. Si no va. Up and down. He is ok.";
        let result = engine.compress(
            &candidate(content, 0.3, 60, 0),
            Some(CompressionLevel::Light),
            CompressionStrategy::Generalize,
        );
        assert!(!result.compressed.is_empty());
    }

    #[test]
    fn test_deduplicate_merges_and_halves() {
        let mut engine = CompressionEngine::default();
        let a = candidate("Shared fact about caching. Unique detail alpha.", 0.3, 60, 0);
        let mut b = candidate("Shared fact about caching. Unique detail beta.", 0.3, 60, 0);
        b.id = "m2".to_string();

        let result = engine.deduplicate(&[a, b]).unwrap();
        assert_eq!(result.original_ids, vec!["m1", "m2"]);
        assert_eq!(result.strategy, CompressionStrategy::Deduplicate);
        // The duplicated sentence appears once in the merged input
        assert!(result.compressed.matches("Shared fact").count() <= 1);
    }

    #[test]
    fn test_max_length_cap_with_ellipsis() {
        let config = CompressionConfig {
            max_compressed_length: 50,
            ..Default::default()
        };
        let mut engine = CompressionEngine::new(config);
        let result = engine.compress(
            &candidate(&long_content(), 0.3, 60, 0),
            Some(CompressionLevel::Light),
            CompressionStrategy::Summarize,
        );
        assert!(result.compressed.len() <= 50);
        assert!(result.compressed.ends_with("..."));
    }

    #[test]
    fn test_lost_information_bounded_and_typed() {
        let mut engine = CompressionEngine::default();
        let result = engine.compress(
            &candidate(&long_content(), 0.3, 60, 0),
            Some(CompressionLevel::Maximum),
            CompressionStrategy::Summarize,
        );
        assert!(result.lost_information.len() <= 20);
        for word in &result.lost_information {
            assert!(word.len() >= 5);
        }
    }

    #[test]
    fn test_stats_accumulate() {
        let mut engine = CompressionEngine::default();
        engine.compress(
            &candidate(&long_content(), 0.3, 60, 0),
            Some(CompressionLevel::Heavy),
            CompressionStrategy::Summarize,
        );
        engine.compress(
            &candidate(&long_content(), 0.3, 60, 0),
            Some(CompressionLevel::Maximum),
            CompressionStrategy::Summarize,
        );
        let stats = engine.stats();
        assert_eq!(stats.operations, 2);
        assert!(stats.bytes_saved > 0);
        assert!(stats.average_ratio > 0.0 && stats.average_ratio < 1.0);
    }
}
