//! Memory engine facade
//!
//! The callable surface transports wrap (MCP, HTTP, CLI live elsewhere and
//! call into this). One engine per tenant: the storage handle is bound to a
//! tenant, and every in-memory component (gate, reconsolidation, chains,
//! compression) is instantiated alongside it.
//!
//! Only storage calls suspend. The scheduler, gate, reconsolidation, chains,
//! and compression are synchronous and are used behind short non-await
//! critical sections.

mod context;
mod importance;

pub use context::{rank_by_context, ContextQuery, ContextRankedItem, ContextScore};
pub use importance::{ImportanceEvent, TriggerImportanceReport, DEFAULT_EVENT_WINDOW_MINUTES};

use std::sync::Arc;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::chains::ChainManager;
use crate::compression::{CompressedMemory, CompressionCandidate, CompressionEngine, CompressionStrategy};
use crate::config::EngineConfig;
use crate::consolidation::{
    compute_tick, optimal_next_cycle, run_cycle, CyclePhase, CycleReport, InsightKind,
    TickOutcome, TickReport,
};
use crate::error::{EngineError, Result};
use crate::fsrs::{FSRSScheduler, FSRSState, Rating};
use crate::gate::{
    CandidateMemory, GateDecision, GateResult, GateStats, IncomingMemory, PredictionErrorGate,
};
use crate::memory::{
    EdgeType, IngestInput, Intention, IntentionStatus, ItemPatch, KnowledgeEdge, KnowledgeItem,
    MemoryStats, Priority, RetentionBucket, SearchOptions, SearchResults,
};
use crate::reconsolidation::{MemorySnapshot, Modification, ReconsolidationManager};
use crate::repository::{item_from_ingest, KnowledgeRepository};
use crate::storage::Database;

/// How many candidates the gate sees per ingest.
const GATE_CANDIDATE_LIMIT: i64 = 10;

/// Page size for full-store sweeps.
const SCAN_BATCH: i64 = 500;

/// Upper bound on items one consolidation pass considers.
const SCAN_CAP: usize = 5_000;

// ============================================================================
// OUTCOME TYPES
// ============================================================================

/// What an ingest did.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    /// The item the caller should consider current (created, updated,
    /// merged, or the duplicate that made us skip)
    pub item: Option<KnowledgeItem>,
    /// The gate's full verdict
    pub gate: GateResult,
}

/// What a review did.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutcome {
    pub item_id: String,
    pub state: FSRSState,
    pub retrievability: f64,
    pub interval_days: i64,
    pub is_lapse: bool,
    pub next_review: DateTime<Utc>,
}

/// Accessibility report for one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStateInfo {
    pub item_id: String,
    pub bucket: RetentionBucket,
    pub retention_strength: f64,
    pub retrieval_strength: f64,
    pub storage_strength: f64,
    pub days_since_access: f64,
}

/// Bucket counts with percentages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateStats {
    pub total: i64,
    pub active: i64,
    pub dormant: i64,
    pub silent: i64,
    pub unavailable: i64,
    pub active_pct: f64,
    pub dormant_pct: f64,
    pub silent_pct: f64,
    pub unavailable_pct: f64,
}

/// Tag frequency entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

// ============================================================================
// ENGINE
// ============================================================================

/// Per-tenant cognitive memory engine.
pub struct MemoryEngine {
    repo: KnowledgeRepository,
    scheduler: FSRSScheduler,
    gate: Mutex<PredictionErrorGate>,
    reconsolidation: Mutex<ReconsolidationManager>,
    chains: Mutex<ChainManager>,
    compression: Mutex<CompressionEngine>,
    config: EngineConfig,
}

impl MemoryEngine {
    /// Build an engine over a tenant-bound database handle. The config is
    /// validated up front; a bad option rejects construction.
    pub fn new(db: Arc<dyn Database>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            repo: KnowledgeRepository::new(db),
            scheduler: FSRSScheduler::new(config.scheduler_params()),
            gate: Mutex::new(PredictionErrorGate::new(config.gate.clone())),
            reconsolidation: Mutex::new(ReconsolidationManager::with_window_ms(
                config.labile_window_ms,
            )),
            chains: Mutex::new(ChainManager::new()),
            compression: Mutex::new(CompressionEngine::new(config.compression.clone())),
            config,
        })
    }

    /// The tenant this engine serves.
    pub fn tenant_id(&self) -> &str {
        self.repo.tenant_id()
    }

    /// Direct repository access for callers composing their own flows.
    pub fn repository(&self) -> &KnowledgeRepository {
        &self.repo
    }

    /// The chain manager for this tenant.
    pub fn chains(&self) -> std::sync::MutexGuard<'_, ChainManager> {
        self.chains.lock().expect("chain manager lock poisoned")
    }

    // ========================================================================
    // INGEST
    // ========================================================================

    /// Ingest new content through the prediction-error gate.
    pub async fn ingest(&self, input: IngestInput) -> Result<IngestOutcome> {
        if input.content.trim().is_empty() {
            return Err(EngineError::validation("content", "must not be empty"));
        }

        let candidates = self.gate_candidates(&input).await?;
        let incoming = IncomingMemory {
            content: input.content.clone(),
            embedding: input.embedding.clone(),
        };
        let verdict = {
            let mut gate = self.gate.lock().expect("gate lock poisoned");
            gate.decide(&incoming, &candidates)
        };

        let item = match &verdict.decision {
            GateDecision::Create => Some(self.create_item(&input).await?),
            GateDecision::Skip { duplicate_of } => self.repo.peek(duplicate_of).await?,
            GateDecision::Update { target_id } | GateDecision::Supersede { target_id } => {
                Some(self.update_target(target_id, &input).await?)
            }
            GateDecision::Merge { target_ids } => {
                Some(self.merge_targets(target_ids, &input).await?)
            }
            GateDecision::FlagContradiction { target_id } => {
                Some(self.create_contradicting(target_id, &input).await?)
            }
        };

        tracing::info!(
            decision = verdict.decision.as_str(),
            prediction_error = verdict.prediction_error,
            "ingest"
        );
        Ok(IngestOutcome {
            item,
            gate: verdict,
        })
    }

    async fn gate_candidates(&self, input: &IngestInput) -> Result<Vec<CandidateMemory>> {
        // OR-join the content's words: candidate mining wants anything that
        // shares vocabulary, not only documents containing every word
        let mut seen = std::collections::HashSet::new();
        let or_query = input
            .content
            .split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|w| w.len() > 2 && seen.insert(w.clone()))
            .take(20)
            .collect::<Vec<_>>()
            .join(" OR ");

        let results = self
            .repo
            .search(
                &or_query,
                &SearchOptions {
                    limit: GATE_CANDIDATE_LIMIT,
                    min_retention: 0.0,
                },
            )
            .await?;
        Ok(results
            .items
            .into_iter()
            .map(|item| CandidateMemory {
                id: item.id,
                content: item.content,
                embedding: item.embedding,
                tags: item.tags,
                retention_strength: item.retention_strength,
            })
            .collect())
    }

    async fn create_item(&self, input: &IngestInput) -> Result<KnowledgeItem> {
        let now = Utc::now();
        let mut item = item_from_ingest(input, now);

        let card = self.scheduler.new_card();
        item.apply_fsrs_state(&card);
        if input.sentiment_intensity > 0.0 {
            item.stability = crate::fsrs::apply_sentiment_boost(
                item.stability,
                input.sentiment_intensity,
                self.config.max_sentiment_boost,
            );
        }
        let interval = self.scheduler.schedule_interval(item.stability, 0);
        item.next_review = Some(now + Duration::days(interval.max(0)));

        self.repo.insert(item).await
    }

    /// Fold incoming content into the most similar existing memory.
    async fn update_target(&self, target_id: &str, input: &IngestInput) -> Result<KnowledgeItem> {
        let target = self
            .repo
            .peek(target_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(target_id.to_string()))?;

        let patch = ItemPatch {
            content: Some(input.content.clone()),
            summary: input.summary.clone().or(target.summary.clone()),
            tags: Some(union(&target.tags, &input.tags)),
            concepts: Some(union(&target.concepts, &input.concepts)),
            people: Some(union(&target.people, &input.people)),
            events: Some(union(&target.events, &input.events)),
            confidence: Some(target.confidence.max(input.confidence)),
            sentiment_intensity: Some(
                target.sentiment_intensity.max(input.sentiment_intensity),
            ),
            ..Default::default()
        };
        self.repo.update(target_id, &patch).await?;
        self.repo
            .peek(target_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(target_id.to_string()))
    }

    /// Merge several near-identical memories plus the incoming content into
    /// one item that supersedes them.
    async fn merge_targets(&self, target_ids: &[String], input: &IngestInput) -> Result<KnowledgeItem> {
        let mut targets = Vec::with_capacity(target_ids.len());
        for id in target_ids {
            if let Some(item) = self.repo.peek(id).await? {
                targets.push(item);
            }
        }

        let mut merged_input = input.clone();
        for target in &targets {
            merged_input.tags = union(&merged_input.tags, &target.tags);
            merged_input.concepts = union(&merged_input.concepts, &target.concepts);
            merged_input.people = union(&merged_input.people, &target.people);
            merged_input.events = union(&merged_input.events, &target.events);
        }

        let now = Utc::now();
        let mut item = item_from_ingest(&merged_input, now);
        item.source_chain = target_ids.to_vec();

        // The merged memory inherits the strongest consolidation state of
        // its sources; scheduler fields are being set at creation, not
        // mutated afterward
        let card = self.scheduler.new_card();
        item.apply_fsrs_state(&card);
        for target in &targets {
            item.stability = item.stability.max(target.stability);
            item.storage_strength = item.storage_strength.max(target.storage_strength);
        }
        item.recompute_retention();
        let interval = self.scheduler.schedule_interval(item.stability, 0);
        item.next_review = Some(now + Duration::days(interval.max(0)));

        let item = self.repo.insert(item).await?;
        for target in &targets {
            self.repo.delete(&target.id).await?;
        }
        Ok(item)
    }

    /// Store contradicting content as a new memory and cross-flag both
    /// sides.
    async fn create_contradicting(
        &self,
        target_id: &str,
        input: &IngestInput,
    ) -> Result<KnowledgeItem> {
        let mut item = self.create_item(input).await?;

        if let Some(target) = self.repo.peek(target_id).await? {
            let mut contradiction_ids = target.contradiction_ids.clone();
            if !contradiction_ids.contains(&item.id) {
                contradiction_ids.push(item.id.clone());
            }
            self.repo
                .update(
                    target_id,
                    &ItemPatch {
                        is_contradicted: Some(true),
                        contradiction_ids: Some(contradiction_ids),
                        ..Default::default()
                    },
                )
                .await?;
        }

        self.repo
            .update(
                &item.id,
                &ItemPatch {
                    is_contradicted: Some(true),
                    contradiction_ids: Some(vec![target_id.to_string()]),
                    ..Default::default()
                },
            )
            .await?;
        item.is_contradicted = true;
        item.contradiction_ids = vec![target_id.to_string()];

        self.repo
            .insert_edge(KnowledgeEdge::new(
                "",
                item.id.clone(),
                target_id,
                EdgeType::Contradiction,
            ))
            .await?;
        Ok(item)
    }

    // ========================================================================
    // RETRIEVAL
    // ========================================================================

    /// Plain search, no side effects.
    pub async fn search(&self, query: &str, opts: &SearchOptions) -> Result<SearchResults> {
        self.repo.search(query, opts).await
    }

    /// Search with retrieval side effects: access tracking advances and
    /// every returned memory enters its labile window.
    pub async fn recall(&self, query: &str, opts: &SearchOptions) -> Result<SearchResults> {
        let mut results = self.repo.search(query, opts).await?;
        let ids: Vec<String> = results.items.iter().map(|item| item.id.clone()).collect();
        self.repo.touch_batch(&ids).await?;

        let now = Utc::now();
        let mut reconsolidation = self
            .reconsolidation
            .lock()
            .expect("reconsolidation lock poisoned");
        for item in &mut results.items {
            item.access_count += 1;
            item.last_accessed_at = now;
            reconsolidation.mark_labile(&item.id, snapshot_of(item), Some(query.to_string()));
        }
        Ok(results)
    }

    /// Fetch one memory by id; the retrieval makes it labile.
    pub async fn get(&self, id: &str) -> Result<Option<KnowledgeItem>> {
        let Some(item) = self.repo.get(id).await? else {
            return Ok(None);
        };
        self.reconsolidation
            .lock()
            .expect("reconsolidation lock poisoned")
            .mark_labile(&item.id, snapshot_of(&item), None);
        Ok(Some(item))
    }

    /// Delete a memory. Returns whether it existed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.repo.delete(id).await
    }

    /// Items due for review.
    pub async fn due(&self, limit: i64) -> Result<Vec<KnowledgeItem>> {
        self.repo.due(limit).await
    }

    /// Store-wide statistics.
    pub async fn stats(&self) -> Result<MemoryStats> {
        self.repo.stats().await
    }

    /// Context-weighted ranking over the store.
    pub async fn context(&self, query: &ContextQuery) -> Result<Vec<ContextRankedItem>> {
        let candidates = self.scan_all().await?;
        Ok(rank_by_context(candidates, query))
    }

    /// Gate statistics.
    pub fn gate_stats(&self) -> GateStats {
        self.gate.lock().expect("gate lock poisoned").stats()
    }

    // ========================================================================
    // REVIEW
    // ========================================================================

    /// Review a memory. The only external path that advances scheduler
    /// fields; they move atomically with `last_review`/`next_review`.
    pub async fn review(
        &self,
        id: &str,
        rating: Rating,
        sentiment: Option<f64>,
    ) -> Result<ReviewOutcome> {
        let item = self
            .repo
            .peek(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

        let now = Utc::now();
        let anchor = item.last_review.unwrap_or(item.created_at);
        let elapsed_days = (now - anchor).num_seconds().max(0) as f64 / 86_400.0;

        let result = self
            .scheduler
            .review(&item.fsrs_state(), rating, elapsed_days, sentiment);
        let next_review = now + Duration::days(result.interval_days.max(0));
        self.repo
            .apply_review(id, &result.state, now, next_review)
            .await?;

        Ok(ReviewOutcome {
            item_id: id.to_string(),
            state: result.state,
            retrievability: result.retrievability,
            interval_days: result.interval_days,
            is_lapse: result.is_lapse,
            next_review,
        })
    }

    /// Preview what each grade would do, without committing.
    pub async fn preview_review(&self, id: &str) -> Result<crate::fsrs::PreviewResults> {
        let item = self
            .repo
            .peek(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        let anchor = item.last_review.unwrap_or(item.created_at);
        let elapsed_days = (Utc::now() - anchor).num_seconds().max(0) as f64 / 86_400.0;
        Ok(self.scheduler.preview(&item.fsrs_state(), elapsed_days))
    }

    // ========================================================================
    // RECONSOLIDATION
    // ========================================================================

    /// Whether a memory is currently labile.
    pub fn is_labile(&self, id: &str) -> bool {
        self.reconsolidation
            .lock()
            .expect("reconsolidation lock poisoned")
            .is_labile(id)
    }

    /// Modify a labile memory. False when the window is closed or full.
    pub fn modify_labile(&self, id: &str, modification: Modification) -> bool {
        self.reconsolidation
            .lock()
            .expect("reconsolidation lock poisoned")
            .apply_modification(id, modification)
    }

    /// Explicitly reconsolidate one memory, applying its folded changes.
    pub async fn reconsolidate(&self, id: &str) -> Result<bool> {
        let result = self
            .reconsolidation
            .lock()
            .expect("reconsolidation lock poisoned")
            .reconsolidate(id);
        match result {
            Some(result) => {
                self.apply_reconsolidation(&result).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Finalize every expired labile window, applying folded changes to the
    /// store. Returns how many memories were reconsolidated.
    pub async fn reconsolidate_expired(&self) -> Result<usize> {
        let results = self
            .reconsolidation
            .lock()
            .expect("reconsolidation lock poisoned")
            .reconsolidate_expired();
        for result in &results {
            self.apply_reconsolidation(result).await?;
        }
        Ok(results.len())
    }

    async fn apply_reconsolidation(
        &self,
        result: &crate::reconsolidation::ReconsolidationResult,
    ) -> Result<()> {
        let Some(item) = self.repo.peek(&result.item_id).await? else {
            // Deleted while labile; nothing to fold into
            return Ok(());
        };
        let summary = &result.summary;

        let mut patch = ItemPatch::default();
        if let Some(content) = &summary.new_content {
            patch.content = Some(content.clone());
            if summary.was_correction {
                patch.confidence = Some(1.0);
            }
        }
        if !summary.tags_added.is_empty() || !summary.tags_removed.is_empty() {
            let mut tags = item.tags.clone();
            for tag in &summary.tags_added {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }
            tags.retain(|tag| !summary.tags_removed.contains(tag));
            patch.tags = Some(tags);
        }
        if let Some(intensity) = summary.emotion_update {
            patch.sentiment_intensity = Some(intensity);
        }
        if !summary.sources_added.is_empty() {
            let mut chain = item.source_chain.clone();
            for source in &summary.sources_added {
                if !chain.contains(source) {
                    chain.push(source.clone());
                }
            }
            patch.source_chain = Some(chain);
        }
        if !patch.is_empty() {
            self.repo.update(&result.item_id, &patch).await?;
        }

        if summary.retrieval_boost > 0.0 {
            let retrieval = (item.retrieval_strength + summary.retrieval_boost).clamp(0.0, 1.0);
            let retention =
                crate::memory::fuse_retention(item.storage_strength, retrieval);
            self.repo
                .apply_strengths(&result.item_id, item.storage_strength, retrieval, retention)
                .await?;
        }

        for (target, relationship) in &summary.links_added {
            let mut edge =
                KnowledgeEdge::new("", result.item_id.clone(), target, EdgeType::Custom);
            edge.metadata = Some(serde_json::json!({ "relationship": relationship }));
            self.repo.insert_edge(edge).await?;
        }
        for (target, boost) in &summary.connections_strengthened {
            let mut edge =
                KnowledgeEdge::new("", result.item_id.clone(), target, EdgeType::Semantic);
            edge.weight = boost.clamp(0.0, 1.0);
            self.repo.insert_edge(edge).await?;
        }
        Ok(())
    }

    // ========================================================================
    // CONSOLIDATION
    // ========================================================================

    /// Run one consolidation cycle: select, replay, extract patterns,
    /// discover connections. Replays strengthen storage; discovered
    /// connections become semantic edges.
    pub async fn consolidate(&self, phase: CyclePhase) -> Result<CycleReport> {
        let candidates = self.scan_all().await?;
        let report = run_cycle(phase, &candidates, &self.config.consolidation, Utc::now());

        for replay in &report.replays {
            if let Some(item) = self.repo.peek(&replay.item_id).await? {
                let storage = item.storage_strength + replay.boost;
                let retention =
                    crate::memory::fuse_retention(storage, item.retrieval_strength);
                self.repo
                    .apply_strengths(&replay.item_id, storage, item.retrieval_strength, retention)
                    .await?;
            }
        }

        for insight in &report.insights {
            if insight.kind == InsightKind::ConnectionDiscovery && insight.item_ids.len() == 2 {
                let mut edge = KnowledgeEdge::new(
                    "",
                    insight.item_ids[0].clone(),
                    insight.item_ids[1].clone(),
                    EdgeType::Semantic,
                );
                edge.weight = insight.confidence.clamp(0.0, 1.0);
                self.repo.insert_edge(edge).await?;
            }
        }

        self.repo
            .set_metadata(
                "last_consolidation",
                serde_json::json!({
                    "at": report.started_at.to_rfc3339(),
                    "phase": report.phase.as_str(),
                    "selected": report.selected_ids.len(),
                    "insights": report.insights.len(),
                    "replays": report.replays.len(),
                }),
            )
            .await?;

        Ok(report)
    }

    /// Decay/promotion/pruning sweep. Dry-run computes counts without
    /// writing. Per-item updates: a tick can interleave with ingest and
    /// review without breaking anything.
    pub async fn consolidate_tick(&self, dry_run: bool) -> Result<TickReport> {
        let items = self.scan_all().await?;
        let now = Utc::now();
        let threshold = self.config.consolidation.pruning_threshold;

        let mut report = TickReport {
            dry_run,
            ..Default::default()
        };
        for item in &items {
            let tick = compute_tick(item, now, threshold);
            report.record(&tick);
            if dry_run {
                continue;
            }
            match tick.outcome {
                TickOutcome::Pruned => {
                    self.repo.delete(&tick.item_id).await?;
                }
                TickOutcome::Promoted | TickOutcome::Decayed => {
                    self.repo
                        .apply_strengths(
                            &tick.item_id,
                            item.storage_strength,
                            tick.new_retrieval,
                            tick.new_retention,
                        )
                        .await?;
                }
                TickOutcome::Unchanged => {}
            }
        }
        tracing::info!(
            processed = report.processed,
            pruned = report.pruned,
            dry_run,
            "consolidation tick"
        );
        Ok(report)
    }

    /// When the next cycle is worth running.
    pub async fn next_cycle_time(&self) -> Result<DateTime<Utc>> {
        let candidates = self.scan_all().await?;
        Ok(optimal_next_cycle(&candidates, Utc::now()))
    }

    // ========================================================================
    // COMPRESSION
    // ========================================================================

    /// Compress an old memory into its summary field. Returns None when the
    /// memory does not qualify (too young, too short, too important).
    pub async fn compress_memory(
        &self,
        id: &str,
        strategy: CompressionStrategy,
    ) -> Result<Option<CompressedMemory>> {
        let item = self
            .repo
            .peek(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

        let candidate = CompressionCandidate {
            id: item.id.clone(),
            content: item.content.clone(),
            importance: item.importance,
            access_count: item.access_count,
            created_at: item.created_at,
        };
        let compressed = {
            let mut compression = self.compression.lock().expect("compression lock poisoned");
            if !compression.should_compress(&candidate, Utc::now()) {
                return Ok(None);
            }
            compression.compress(&candidate, None, strategy)
        };

        self.repo
            .update(
                id,
                &ItemPatch {
                    summary: Some(compressed.compressed.clone()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(Some(compressed))
    }

    // ========================================================================
    // MEMORY STATES
    // ========================================================================

    /// Accessibility report for one memory.
    pub async fn get_memory_state(&self, id: &str) -> Result<MemoryStateInfo> {
        let item = self
            .repo
            .peek(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        Ok(MemoryStateInfo {
            item_id: item.id.clone(),
            bucket: item.retention_bucket(),
            retention_strength: item.retention_strength,
            retrieval_strength: item.retrieval_strength,
            storage_strength: item.storage_strength,
            days_since_access: item.days_since_access(Utc::now()),
        })
    }

    /// Memories in an accessibility bucket.
    pub async fn list_by_state(
        &self,
        bucket: RetentionBucket,
        limit: i64,
    ) -> Result<Vec<KnowledgeItem>> {
        self.repo.list_by_bucket(bucket, limit).await
    }

    /// Bucket distribution with percentages.
    pub async fn state_stats(&self) -> Result<StateStats> {
        let stats = self.repo.stats().await?;
        let total = stats.total_items.max(0);
        let pct = |n: i64| {
            if total == 0 {
                0.0
            } else {
                n as f64 / total as f64 * 100.0
            }
        };
        Ok(StateStats {
            total,
            active: stats.active,
            dormant: stats.dormant,
            silent: stats.silent,
            unavailable: stats.unavailable,
            active_pct: pct(stats.active),
            dormant_pct: pct(stats.dormant),
            silent_pct: pct(stats.silent),
            unavailable_pct: pct(stats.unavailable),
        })
    }

    // ========================================================================
    // IMPORTANCE
    // ========================================================================

    /// Retroactively tag recently accessed memories with an event's
    /// importance. Adjusts storage strength and the ranking stability
    /// factor; never the scheduler's stability.
    pub async fn trigger_importance(
        &self,
        event: ImportanceEvent,
        window_minutes: Option<i64>,
    ) -> Result<TriggerImportanceReport> {
        let window_minutes = window_minutes.unwrap_or(DEFAULT_EVENT_WINDOW_MINUTES).max(1);
        let since = Utc::now() - Duration::minutes(window_minutes);
        let recent = self.repo.accessed_since(since, 200).await?;

        let mut tagged = Vec::with_capacity(recent.len());
        for item in &recent {
            let storage = item.storage_strength + event.strength_boost();
            let retention = crate::memory::fuse_retention(storage, item.retrieval_strength);
            self.repo
                .apply_strengths(&item.id, storage, item.retrieval_strength, retention)
                .await?;
            self.repo
                .update(
                    &item.id,
                    &ItemPatch {
                        stability_factor: Some(item.stability_factor * event.stability_multiplier()),
                        ..Default::default()
                    },
                )
                .await?;
            tagged.push(item.id.clone());
        }

        tracing::info!(event = event.as_str(), tagged = tagged.len(), "importance trigger");
        Ok(TriggerImportanceReport {
            event,
            window_minutes,
            tagged_item_ids: tagged,
        })
    }

    /// Items carrying a tag.
    pub async fn find_tagged(&self, tag: &str, limit: i64) -> Result<Vec<KnowledgeItem>> {
        self.repo.find_tagged(tag, limit).await
    }

    /// Tag frequencies across the store, most used first.
    pub async fn tag_stats(&self) -> Result<Vec<TagCount>> {
        let items = self.scan_all().await?;
        let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        for item in &items {
            for tag in &item.tags {
                *counts.entry(tag.clone()).or_insert(0) += 1;
            }
        }
        let mut out: Vec<TagCount> = counts
            .into_iter()
            .map(|(tag, count)| TagCount { tag, count })
            .collect();
        out.sort_by(|a, b| b.count.cmp(&a.count).then(a.tag.cmp(&b.tag)));
        Ok(out)
    }

    // ========================================================================
    // PROMOTE / DEMOTE
    // ========================================================================

    /// Deliberately raise a memory's accessibility. Clamps retention into
    /// [0.1, 1] and amplifies the ranking stability factor; scheduler
    /// stability is untouched.
    pub async fn promote_memory(&self, id: &str) -> Result<KnowledgeItem> {
        self.adjust_memory(id, 0.15, 1.2).await
    }

    /// Deliberately lower a memory's accessibility.
    pub async fn demote_memory(&self, id: &str) -> Result<KnowledgeItem> {
        self.adjust_memory(id, -0.25, 0.8).await
    }

    async fn adjust_memory(&self, id: &str, delta: f64, factor: f64) -> Result<KnowledgeItem> {
        let item = self
            .repo
            .peek(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

        let retention = (item.retention_strength + delta).clamp(0.1, 1.0);
        self.repo
            .update(
                id,
                &ItemPatch {
                    retention_strength: Some(retention),
                    stability_factor: Some((item.stability_factor * factor).max(0.1)),
                    ..Default::default()
                },
            )
            .await?;
        self.repo
            .peek(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    // ========================================================================
    // INTENTIONS
    // ========================================================================

    /// Create an intention.
    pub async fn create_intention(
        &self,
        content: &str,
        trigger_type: &str,
        trigger_data: serde_json::Value,
        priority: Priority,
        deadline: Option<DateTime<Utc>>,
        tags: Vec<String>,
    ) -> Result<Intention> {
        let mut intention = Intention::new("", content, trigger_type, trigger_data);
        intention.priority = priority;
        intention.deadline = deadline;
        intention.tags = tags;
        self.repo.insert_intention(intention).await
    }

    /// List intentions, optionally by status.
    pub async fn list_intentions(&self, status: Option<IntentionStatus>) -> Result<Vec<Intention>> {
        self.repo.list_intentions(status).await
    }

    /// Mark an intention fulfilled.
    pub async fn complete_intention(&self, id: &str) -> Result<()> {
        self.repo
            .set_intention_status(id, IntentionStatus::Fulfilled, Some(Utc::now()), None)
            .await
    }

    /// Cancel an intention.
    pub async fn cancel_intention(&self, id: &str) -> Result<()> {
        self.repo
            .set_intention_status(id, IntentionStatus::Cancelled, None, None)
            .await
    }

    /// Snooze an intention until a wake time.
    pub async fn snooze_intention(&self, id: &str, until: DateTime<Utc>) -> Result<()> {
        self.repo
            .set_intention_status(id, IntentionStatus::Snoozed, None, Some(until))
            .await
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    /// Page through the whole store, capped.
    async fn scan_all(&self) -> Result<Vec<KnowledgeItem>> {
        let mut items = Vec::new();
        let mut offset = 0i64;
        loop {
            let page = self.repo.scan(offset, SCAN_BATCH).await?;
            let page_len = page.len();
            items.extend(page);
            if page_len < SCAN_BATCH as usize || items.len() >= SCAN_CAP {
                break;
            }
            offset += SCAN_BATCH;
        }
        items.truncate(SCAN_CAP);
        Ok(items)
    }
}

fn snapshot_of(item: &KnowledgeItem) -> MemorySnapshot {
    MemorySnapshot {
        content: item.content.clone(),
        summary: item.summary.clone(),
        tags: item.tags.clone(),
        sentiment_intensity: item.sentiment_intensity,
        retrieval_strength: item.retrieval_strength,
        source_chain: item.source_chain.clone(),
    }
}

fn union(a: &[String], b: &[String]) -> Vec<String> {
    let mut out = a.to_vec();
    for value in b {
        if !out.iter().any(|existing| existing.eq_ignore_ascii_case(value)) {
            out.push(value.clone());
        }
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteDatabase;

    async fn engine(tenant: &str) -> MemoryEngine {
        let db = SqliteDatabase::in_memory(tenant).await.unwrap();
        MemoryEngine::new(Arc::new(db), EngineConfig::default()).unwrap()
    }

    fn input(content: &str) -> IngestInput {
        IngestInput {
            content: content.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_ingest_create_schedules_review() {
        let engine = engine("t1").await;
        let outcome = engine
            .ingest(input("the borrow checker enforces aliasing rules"))
            .await
            .unwrap();
        assert_eq!(outcome.gate.decision, GateDecision::Create);
        let item = outcome.item.unwrap();
        assert!(item.next_review.is_some());
        assert_eq!(item.reps, 0);
    }

    #[tokio::test]
    async fn test_ingest_duplicate_skips() {
        let engine = engine("t1").await;
        let first = engine
            .ingest(input("the mitochondria is the powerhouse of the cell"))
            .await
            .unwrap();
        let second = engine
            .ingest(input("the mitochondria is the powerhouse of the cell"))
            .await
            .unwrap();
        assert!(matches!(second.gate.decision, GateDecision::Skip { .. }));
        // No second item was created
        assert_eq!(engine.stats().await.unwrap().total_items, 1);
        assert_eq!(
            second.item.unwrap().id,
            first.item.unwrap().id
        );
    }

    #[tokio::test]
    async fn test_ingest_contradiction_cross_flags() {
        let engine = engine("t1").await;
        let first = engine
            .ingest(input("the staging cluster is reachable from the office network"))
            .await
            .unwrap()
            .item
            .unwrap();
        let outcome = engine
            .ingest(input(
                "the staging cluster is not reachable from the office network",
            ))
            .await
            .unwrap();
        assert!(matches!(
            outcome.gate.decision,
            GateDecision::FlagContradiction { .. }
        ));
        let created = outcome.item.unwrap();
        assert!(created.is_contradicted);
        assert_eq!(created.contradiction_ids, vec![first.id.clone()]);

        let original = engine.repository().peek(&first.id).await.unwrap().unwrap();
        assert!(original.is_contradicted);
        assert!(original.contradiction_ids.contains(&created.id));

        let related = engine.repository().get_related(&first.id).await.unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].edge_type, EdgeType::Contradiction);
    }

    #[tokio::test]
    async fn test_review_flow_and_ownership() {
        let engine = engine("t1").await;
        let item = engine
            .ingest(input("practice makes permanent"))
            .await
            .unwrap()
            .item
            .unwrap();

        let outcome = engine.review(&item.id, Rating::Good, None).await.unwrap();
        assert_eq!(outcome.state.reps, 1);
        assert!(!outcome.is_lapse);

        let stored = engine.repository().peek(&item.id).await.unwrap().unwrap();
        // Scheduler fields and review timestamps advanced together
        assert_eq!(stored.reps, 1);
        assert!(stored.last_review.is_some());
        assert_eq!(
            stored.next_review.unwrap().timestamp_millis(),
            outcome.next_review.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_review_missing_is_error() {
        let engine = engine("t1").await;
        let err = engine.review("ghost", Rating::Good, None).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_recall_marks_labile_and_bumps_access() {
        let engine = engine("t1").await;
        let item = engine
            .ingest(input("retrieval practice strengthens memory"))
            .await
            .unwrap()
            .item
            .unwrap();

        let results = engine
            .recall("retrieval practice", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(results.items.len(), 1);
        assert!(engine.is_labile(&item.id));

        let stored = engine.repository().peek(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.access_count, 1);
    }

    #[tokio::test]
    async fn test_labile_modification_applied_on_reconsolidation() {
        let engine = engine("t1").await;
        let item = engine
            .ingest(input("original phrasing of the fact"))
            .await
            .unwrap()
            .item
            .unwrap();
        engine.get(&item.id).await.unwrap();

        assert!(engine.modify_labile(
            &item.id,
            Modification::AddTag {
                tag: "verified".into()
            }
        ));
        assert!(engine.modify_labile(&item.id, Modification::BoostRetrieval { boost: 0.0 }));
        assert!(engine.reconsolidate(&item.id).await.unwrap());

        let stored = engine.repository().peek(&item.id).await.unwrap().unwrap();
        assert!(stored.tags.contains(&"verified".to_string()));
        // Idempotent
        assert!(!engine.reconsolidate(&item.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_promote_demote_respect_scheduler_ownership() {
        let engine = engine("t1").await;
        let item = engine
            .ingest(input("a memory to push around"))
            .await
            .unwrap()
            .item
            .unwrap();
        let stability_before = item.stability;

        let promoted = engine.promote_memory(&item.id).await.unwrap();
        assert!(promoted.retention_strength > item.retention_strength);
        assert!(promoted.stability_factor > item.stability_factor);
        // The scheduler's stability is untouched
        assert!((promoted.stability - stability_before).abs() < 1e-9);

        // Demotion clamps to the floor, never below 0.1
        let mut current = promoted;
        for _ in 0..10 {
            current = engine.demote_memory(&current.id).await.unwrap();
        }
        assert!((current.retention_strength - 0.1).abs() < 1e-9);
        assert!((current.stability - stability_before).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_consolidate_tick_dry_run_writes_nothing() {
        let engine = engine("t1").await;
        engine.ingest(input("tick target one")).await.unwrap();
        engine.ingest(input("tick target two")).await.unwrap();

        let before = engine.stats().await.unwrap();
        let report = engine.consolidate_tick(true).await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.processed, 2);
        let after = engine.stats().await.unwrap();
        assert_eq!(before.total_items, after.total_items);
    }

    #[tokio::test]
    async fn test_consolidate_cycle_strengthens_and_records() {
        let engine = engine("t1").await;
        for content in [
            "the scheduler clamps difficulty between one and ten",
            "wal mode keeps readers unblocked during writes",
            "jaccard similarity ignores words shorter than three letters",
            "labile windows expire five minutes after retrieval",
            "connection insights cap at ten per cycle",
        ] {
            engine.ingest(input(content)).await.unwrap();
        }
        let report = engine.consolidate(CyclePhase::Deep).await.unwrap();
        assert!(!report.selected_ids.is_empty());

        // Replayed items gained storage strength
        let strengthened = engine
            .repository()
            .peek(&report.replays[0].item_id)
            .await
            .unwrap()
            .unwrap();
        assert!(strengthened.storage_strength > 1.0);

        // The run left a history record
        let record = engine
            .repository()
            .get_metadata("last_consolidation")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record["phase"], "deep");
    }

    #[tokio::test]
    async fn test_trigger_importance_tags_recent() {
        let engine = engine("t1").await;
        let item = engine
            .ingest(input("something that mattered more than it seemed"))
            .await
            .unwrap()
            .item
            .unwrap();
        engine.get(&item.id).await.unwrap();

        let report = engine
            .trigger_importance(ImportanceEvent::Breakthrough, Some(30))
            .await
            .unwrap();
        assert!(report.tagged_item_ids.contains(&item.id));

        let stored = engine.repository().peek(&item.id).await.unwrap().unwrap();
        assert!(stored.storage_strength > item.storage_strength);
        assert!((stored.stability_factor - 1.5).abs() < 1e-9);
        // Scheduler stability untouched
        assert!((stored.stability - item.stability).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_context_ranking_end_to_end() {
        let engine = engine("t1").await;
        let mut tagged = input("notes about the cache layer design");
        tagged.tags = vec!["caching".into()];
        engine.ingest(tagged).await.unwrap();
        engine.ingest(input("a grocery list for the weekend")).await.unwrap();

        let ranked = engine
            .context(&ContextQuery {
                topics: vec!["caching".into()],
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(ranked.len(), 2);
        assert!(ranked[0].item.tags.contains(&"caching".to_string()));
    }

    #[tokio::test]
    async fn test_intention_lifecycle_via_engine() {
        let engine = engine("t1").await;
        let intention = engine
            .create_intention(
                "revisit the failing test",
                "context",
                serde_json::json!({"file": "scheduler.rs"}),
                Priority::High,
                None,
                vec!["testing".into()],
            )
            .await
            .unwrap();

        engine.complete_intention(&intention.id).await.unwrap();
        let fulfilled = engine
            .list_intentions(Some(IntentionStatus::Fulfilled))
            .await
            .unwrap();
        assert_eq!(fulfilled.len(), 1);

        let err = engine.complete_intention("missing").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_state_stats_percentages() {
        let engine = engine("t1").await;
        engine.ingest(input("state stat member")).await.unwrap();
        let stats = engine.state_stats().await.unwrap();
        assert_eq!(stats.total, 1);
        let sum = stats.active_pct + stats.dormant_pct + stats.silent_pct + stats.unavailable_pct;
        assert!((sum - 100.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_gate_stats_through_engine() {
        let engine = engine("t1").await;
        engine.ingest(input("first unique fact about glaciers")).await.unwrap();
        engine.ingest(input("second unique fact about volcanoes")).await.unwrap();
        let stats = engine.gate_stats();
        assert_eq!(stats.total_decisions, 2);
    }
}
