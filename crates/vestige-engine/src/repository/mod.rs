//! Knowledge Repository
//!
//! The authoritative typed surface over the storage contract. All SQL the
//! engine runs against tenant data is authored here, in the SQLite dialect
//! with `?` placeholders; backends translate and tenant-scope it.
//!
//! Numeric ranges from the data model are enforced by clamping exactly
//! where the scheduler would clamp them, never silently outside range.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::fsrs::{FSRSState, LearningState, MAX_STABILITY, MIN_STABILITY};
use crate::memory::{
    IngestInput, Intention, IntentionStatus, ItemPatch, KnowledgeEdge, KnowledgeItem, MemoryStats,
    Priority, RetentionBucket, SearchOptions, SearchResults,
};
use crate::storage::{Database, Row, SqlValue};

/// Hard cap on search result sets.
const SEARCH_LIMIT_MAX: i64 = 100;

/// Columns selected for full item hydration.
const ITEM_COLUMNS: &str = "id, tenant_id, content, summary, \
     stability, difficulty, state, reps, lapses, last_review, next_review, \
     storage_strength, retrieval_strength, retention_strength, \
     access_count, last_accessed_at, created_at, updated_at, \
     sentiment_intensity, confidence, importance, stability_factor, \
     is_contradicted, contradiction_ids, \
     source_type, source_platform, source_url, source_chain, \
     people, concepts, events, tags, embedding";

/// Typed CRUD over knowledge items, edges, and intentions.
pub struct KnowledgeRepository {
    db: Arc<dyn Database>,
}

impl KnowledgeRepository {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// The tenant every operation is scoped to.
    pub fn tenant_id(&self) -> &str {
        self.db.tenant_id()
    }

    /// Backing database handle (shared with the engine).
    pub fn database(&self) -> &Arc<dyn Database> {
        &self.db
    }

    // ========================================================================
    // ITEMS
    // ========================================================================

    /// Insert a new item. Assigns an id if absent, stamps the tenant, and
    /// clamps every bounded field into its documented range.
    pub async fn insert(&self, mut item: KnowledgeItem) -> Result<KnowledgeItem> {
        if item.content.trim().is_empty() {
            return Err(EngineError::validation("content", "must not be empty"));
        }
        if item.id.is_empty() {
            item.id = Uuid::new_v4().to_string();
        }
        item.tenant_id = self.tenant_id().to_string();
        clamp_item(&mut item);

        self.db
            .execute(
                &format!(
                    "INSERT INTO knowledge_nodes ({}) VALUES \
                     (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, \
                      ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    ITEM_COLUMNS
                ),
                &item_params(&item),
            )
            .await?;

        self.record_people(&item).await?;
        tracing::debug!(id = %item.id, "item inserted");
        Ok(item)
    }

    /// Fetch an item and bump its access tracking atomically.
    pub async fn get(&self, id: &str) -> Result<Option<KnowledgeItem>> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let select = format!("SELECT {} FROM knowledge_nodes WHERE id = ?", ITEM_COLUMNS);
        let found = tx.execute(&select, &[id.into()]).await?.rows.into_iter().next();
        let Some(row) = found else {
            tx.rollback().await?;
            return Ok(None);
        };

        tx.execute(
            "UPDATE knowledge_nodes
             SET access_count = access_count + 1, last_accessed_at = ?
             WHERE id = ?",
            &[now.into(), id.into()],
        )
        .await?;
        tx.commit().await?;

        let mut item = item_from_row(&row)?;
        item.access_count += 1;
        item.last_accessed_at = now;
        Ok(Some(item))
    }

    /// Fetch without touching access tracking (used by internal scans).
    pub async fn peek(&self, id: &str) -> Result<Option<KnowledgeItem>> {
        let sql = format!("SELECT {} FROM knowledge_nodes WHERE id = ?", ITEM_COLUMNS);
        match self.db.query_one(&sql, &[id.into()]).await? {
            Some(row) => Ok(Some(item_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Apply a partial update. Only fields present in the patch are written;
    /// `updated_at` always advances. Errors with NotFound when the item does
    /// not exist.
    pub async fn update(&self, id: &str, patch: &ItemPatch) -> Result<()> {
        let mut sets: Vec<String> = vec!["updated_at = ?".into()];
        let mut params: Vec<SqlValue> = vec![Utc::now().into()];

        let mut push = |column: &str, value: SqlValue| {
            sets.push(format!("{} = ?", column));
            params.push(value);
        };

        if let Some(v) = &patch.content {
            push("content", v.clone().into());
        }
        if let Some(v) = &patch.summary {
            push("summary", v.clone().into());
        }
        if let Some(v) = patch.sentiment_intensity {
            push("sentiment_intensity", v.clamp(0.0, 1.0).into());
        }
        if let Some(v) = patch.confidence {
            push("confidence", v.clamp(0.0, 1.0).into());
        }
        if let Some(v) = patch.importance {
            push("importance", v.clamp(0.0, 1.0).into());
        }
        if let Some(v) = patch.stability_factor {
            push("stability_factor", v.max(0.1).into());
        }
        if let Some(v) = patch.storage_strength {
            push("storage_strength", v.max(0.0).into());
        }
        if let Some(v) = patch.retrieval_strength {
            push("retrieval_strength", v.clamp(0.0, 1.0).into());
        }
        if let Some(v) = patch.retention_strength {
            push("retention_strength", v.clamp(0.0, 1.0).into());
        }
        if let Some(v) = patch.is_contradicted {
            push("is_contradicted", v.into());
        }
        if let Some(v) = &patch.contradiction_ids {
            push("contradiction_ids", string_array_json(v));
        }
        if let Some(v) = &patch.source_url {
            push("source_url", v.clone().into());
        }
        if let Some(v) = &patch.source_chain {
            push("source_chain", string_array_json(v));
        }
        if let Some(v) = &patch.people {
            push("people", string_array_json(v));
        }
        if let Some(v) = &patch.concepts {
            push("concepts", string_array_json(v));
        }
        if let Some(v) = &patch.events {
            push("events", string_array_json(v));
        }
        if let Some(v) = &patch.tags {
            push("tags", string_array_json(v));
        }

        params.push(id.into());
        let sql = format!(
            "UPDATE knowledge_nodes SET {} WHERE id = ?",
            sets.join(", ")
        );
        let result = self.db.execute(&sql, &params).await?;
        if result.rows_affected == 0 {
            return Err(EngineError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Persist a review outcome: scheduler fields plus `last_review` and
    /// `next_review` advance together in one statement.
    pub async fn apply_review(
        &self,
        id: &str,
        state: &FSRSState,
        last_review: DateTime<Utc>,
        next_review: DateTime<Utc>,
    ) -> Result<()> {
        let result = self
            .db
            .execute(
                "UPDATE knowledge_nodes
                 SET stability = ?, difficulty = ?, state = ?, reps = ?, lapses = ?,
                     last_review = ?, next_review = ?, updated_at = ?
                 WHERE id = ?",
                &[
                    state.stability.clamp(MIN_STABILITY, MAX_STABILITY).into(),
                    state.difficulty.clamp(1.0, 10.0).into(),
                    state.state.as_str().into(),
                    state.reps.into(),
                    state.lapses.into(),
                    last_review.into(),
                    next_review.into(),
                    Utc::now().into(),
                    id.into(),
                ],
            )
            .await?;
        if result.rows_affected == 0 {
            return Err(EngineError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Write new strength values (used by the consolidation tick and by
    /// promote/demote). Retention is refused outside [0, 1].
    pub async fn apply_strengths(
        &self,
        id: &str,
        storage_strength: f64,
        retrieval_strength: f64,
        retention_strength: f64,
    ) -> Result<()> {
        let result = self
            .db
            .execute(
                "UPDATE knowledge_nodes
                 SET storage_strength = ?, retrieval_strength = ?,
                     retention_strength = ?, updated_at = ?
                 WHERE id = ?",
                &[
                    storage_strength.max(0.0).into(),
                    retrieval_strength.clamp(0.0, 1.0).into(),
                    retention_strength.clamp(0.0, 1.0).into(),
                    Utc::now().into(),
                    id.into(),
                ],
            )
            .await?;
        if result.rows_affected == 0 {
            return Err(EngineError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Delete an item. Returns whether a row went away; deleting a missing
    /// item is not an error.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = self
            .db
            .execute("DELETE FROM knowledge_nodes WHERE id = ?", &[id.into()])
            .await?;
        Ok(result.rows_affected > 0)
    }

    // ========================================================================
    // SEARCH & LISTING
    // ========================================================================

    /// Hybrid search: full-text MATCH over content+summary first, LIKE
    /// fallback when MATCH fails or the query is empty.
    pub async fn search(&self, query: &str, opts: &SearchOptions) -> Result<SearchResults> {
        let limit = opts.limit.clamp(1, SEARCH_LIMIT_MAX);
        let min_retention = opts.min_retention.clamp(0.0, 1.0);
        let query = query.trim();

        if !query.is_empty() {
            match self.search_fts(query, limit, min_retention).await {
                Ok(results) => return Ok(results),
                Err(err) => {
                    tracing::debug!("fts search failed, falling back to LIKE: {}", err);
                }
            }
        }
        self.search_like(query, limit, min_retention).await
    }

    async fn search_fts(
        &self,
        query: &str,
        limit: i64,
        min_retention: f64,
    ) -> Result<SearchResults> {
        let match_query = sanitize_fts_query(query);
        let sql = format!(
            "SELECT {cols} FROM knowledge_nodes k
             JOIN knowledge_fts ON knowledge_fts.rowid = k.rowid
             WHERE knowledge_fts MATCH ? AND k.retention_strength >= ?
             ORDER BY k.retention_strength DESC
             LIMIT ?",
            cols = qualified_item_columns("k")
        );
        let rows = self
            .db
            .query(&sql, &[match_query.clone().into(), min_retention.into(), limit.into()])
            .await?;

        let count_sql = "SELECT COUNT(*) AS n FROM knowledge_nodes k
             JOIN knowledge_fts ON knowledge_fts.rowid = k.rowid
             WHERE knowledge_fts MATCH ? AND k.retention_strength >= ?";
        let total = self
            .db
            .query_one(count_sql, &[match_query.into(), min_retention.into()])
            .await?
            .map(|row| row.get_i64("n"))
            .transpose()?
            .unwrap_or(0);

        Ok(SearchResults {
            items: rows.iter().map(item_from_row).collect::<Result<_>>()?,
            total,
        })
    }

    async fn search_like(
        &self,
        query: &str,
        limit: i64,
        min_retention: f64,
    ) -> Result<SearchResults> {
        let pattern = format!("%{}%", query);
        let rows = self
            .db
            .query(
                &format!(
                    "SELECT {} FROM knowledge_nodes
                     WHERE (content LIKE ? OR COALESCE(summary, '') LIKE ?)
                       AND retention_strength >= ?
                     ORDER BY retention_strength DESC
                     LIMIT ?",
                    ITEM_COLUMNS
                ),
                &[
                    pattern.clone().into(),
                    pattern.clone().into(),
                    min_retention.into(),
                    limit.into(),
                ],
            )
            .await?;

        let total = self
            .db
            .query_one(
                "SELECT COUNT(*) AS n FROM knowledge_nodes
                 WHERE (content LIKE ? OR COALESCE(summary, '') LIKE ?)
                   AND retention_strength >= ?",
                &[pattern.clone().into(), pattern.into(), min_retention.into()],
            )
            .await?
            .map(|row| row.get_i64("n"))
            .transpose()?
            .unwrap_or(0);

        Ok(SearchResults {
            items: rows.iter().map(item_from_row).collect::<Result<_>>()?,
            total,
        })
    }

    /// Items due for review, soonest first.
    pub async fn due(&self, limit: i64) -> Result<Vec<KnowledgeItem>> {
        let rows = self
            .db
            .query(
                &format!(
                    "SELECT {} FROM knowledge_nodes
                     WHERE next_review IS NOT NULL AND next_review <= ?
                     ORDER BY next_review ASC
                     LIMIT ?",
                    ITEM_COLUMNS
                ),
                &[Utc::now().into(), limit.max(1).into()],
            )
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    /// Page through all items (oldest first) for consolidation scans.
    pub async fn scan(&self, offset: i64, limit: i64) -> Result<Vec<KnowledgeItem>> {
        let rows = self
            .db
            .query(
                &format!(
                    "SELECT {} FROM knowledge_nodes
                     ORDER BY created_at ASC
                     LIMIT ? OFFSET ?",
                    ITEM_COLUMNS
                ),
                &[limit.max(1).into(), offset.max(0).into()],
            )
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    /// Items accessed at or after `since`, most recent first.
    pub async fn accessed_since(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<KnowledgeItem>> {
        let rows = self
            .db
            .query(
                &format!(
                    "SELECT {} FROM knowledge_nodes
                     WHERE last_accessed_at >= ?
                     ORDER BY last_accessed_at DESC
                     LIMIT ?",
                    ITEM_COLUMNS
                ),
                &[since.into(), limit.max(1).into()],
            )
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    /// Bump access tracking for a whole result set in one statement.
    pub async fn touch_batch(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let mut params: Vec<SqlValue> = vec![Utc::now().into()];
        params.extend(ids.iter().map(|id| SqlValue::Text(id.clone())));
        self.db
            .execute(
                &format!(
                    "UPDATE knowledge_nodes
                     SET access_count = access_count + 1, last_accessed_at = ?
                     WHERE id IN ({})",
                    placeholders
                ),
                &params,
            )
            .await?;
        Ok(())
    }

    /// Items in a retention bucket.
    pub async fn list_by_bucket(
        &self,
        bucket: RetentionBucket,
        limit: i64,
    ) -> Result<Vec<KnowledgeItem>> {
        let (lo, hi) = match bucket {
            RetentionBucket::Active => (0.7, 1.01),
            RetentionBucket::Dormant => (0.4, 0.7),
            RetentionBucket::Silent => (0.1, 0.4),
            RetentionBucket::Unavailable => (-0.01, 0.1),
        };
        let rows = self
            .db
            .query(
                &format!(
                    "SELECT {} FROM knowledge_nodes
                     WHERE retention_strength >= ? AND retention_strength < ?
                     ORDER BY retention_strength DESC
                     LIMIT ?",
                    ITEM_COLUMNS
                ),
                &[lo.into(), hi.into(), limit.max(1).into()],
            )
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    /// Items carrying a tag.
    pub async fn find_tagged(&self, tag: &str, limit: i64) -> Result<Vec<KnowledgeItem>> {
        // Tags live in a JSON array column; LIKE on the serialized form is
        // portable across both backends
        let pattern = format!("%\"{}\"%", tag.replace('"', ""));
        let rows = self
            .db
            .query(
                &format!(
                    "SELECT {} FROM knowledge_nodes
                     WHERE tags LIKE ?
                     ORDER BY updated_at DESC
                     LIMIT ?",
                    ITEM_COLUMNS
                ),
                &[pattern.into(), limit.max(1).into()],
            )
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    /// Store-wide statistics: retention buckets, due count, averages.
    pub async fn stats(&self) -> Result<MemoryStats> {
        let row = self
            .db
            .query_one(
                "SELECT COUNT(*) AS total,
                    COALESCE(SUM(CASE WHEN retention_strength >= 0.7 THEN 1 ELSE 0 END), 0) AS active,
                    COALESCE(SUM(CASE WHEN retention_strength >= 0.4 AND retention_strength < 0.7 THEN 1 ELSE 0 END), 0) AS dormant,
                    COALESCE(SUM(CASE WHEN retention_strength >= 0.1 AND retention_strength < 0.4 THEN 1 ELSE 0 END), 0) AS silent,
                    COALESCE(SUM(CASE WHEN retention_strength < 0.1 THEN 1 ELSE 0 END), 0) AS unavailable,
                    COALESCE(SUM(CASE WHEN next_review IS NOT NULL AND next_review <= ? THEN 1 ELSE 0 END), 0) AS due,
                    COALESCE(CAST(AVG(stability) AS DOUBLE PRECISION), 0) AS avg_stability,
                    COALESCE(CAST(AVG(retention_strength) AS DOUBLE PRECISION), 0) AS avg_retention
                 FROM knowledge_nodes",
                &[Utc::now().into()],
            )
            .await?
            .ok_or_else(|| EngineError::SchemaMismatch("stats query returned nothing".into()))?;

        Ok(MemoryStats {
            total_items: row.get_i64("total")?,
            active: row.get_i64("active")?,
            dormant: row.get_i64("dormant")?,
            silent: row.get_i64("silent")?,
            unavailable: row.get_i64("unavailable")?,
            due_for_review: row.get_i64("due")?,
            average_stability: row.get_f64("avg_stability")?,
            average_retention: row.get_f64("avg_retention")?,
        })
    }

    // ========================================================================
    // EDGES
    // ========================================================================

    /// Insert an edge; an existing `(from, to, type)` edge has its weight
    /// replaced instead of erroring.
    pub async fn insert_edge(&self, mut edge: KnowledgeEdge) -> Result<KnowledgeEdge> {
        if edge.id.is_empty() {
            edge.id = Uuid::new_v4().to_string();
        }
        edge.tenant_id = self.tenant_id().to_string();
        edge.weight = edge.weight.clamp(0.0, 1.0);

        self.db
            .execute(
                "INSERT INTO graph_edges
                    (id, tenant_id, from_id, to_id, edge_type, weight, metadata, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (tenant_id, from_id, to_id, edge_type)
                 DO UPDATE SET weight = excluded.weight, metadata = excluded.metadata",
                &[
                    edge.id.clone().into(),
                    edge.tenant_id.clone().into(),
                    edge.from_id.clone().into(),
                    edge.to_id.clone().into(),
                    edge.edge_type.as_str().into(),
                    edge.weight.into(),
                    match &edge.metadata {
                        Some(v) => v.clone().into(),
                        None => SqlValue::Null,
                    },
                    edge.created_at.into(),
                ],
            )
            .await?;
        Ok(edge)
    }

    /// Edges touching an item, excluding self-loops even if stored.
    pub async fn get_related(&self, id: &str) -> Result<Vec<KnowledgeEdge>> {
        let rows = self
            .db
            .query(
                "SELECT id, tenant_id, from_id, to_id, edge_type, weight, metadata, created_at
                 FROM graph_edges
                 WHERE (from_id = ? OR to_id = ?) AND from_id != to_id
                 ORDER BY weight DESC",
                &[id.into(), id.into()],
            )
            .await?;
        rows.iter().map(edge_from_row).collect()
    }

    // ========================================================================
    // INTENTIONS
    // ========================================================================

    /// Store a new intention.
    pub async fn insert_intention(&self, mut intention: Intention) -> Result<Intention> {
        if intention.content.trim().is_empty() {
            return Err(EngineError::validation("content", "must not be empty"));
        }
        if intention.id.is_empty() {
            intention.id = Uuid::new_v4().to_string();
        }
        intention.tenant_id = self.tenant_id().to_string();

        self.db
            .execute(
                "INSERT INTO intentions
                    (id, tenant_id, content, trigger_type, trigger_data, priority, status,
                     created_at, deadline, fulfilled_at, reminder_count, tags, snoozed_until)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                &[
                    intention.id.clone().into(),
                    intention.tenant_id.clone().into(),
                    intention.content.clone().into(),
                    intention.trigger_type.clone().into(),
                    intention.trigger_data.clone().into(),
                    intention.priority.as_str().into(),
                    intention.status.as_str().into(),
                    intention.created_at.into(),
                    SqlValue::from_opt_timestamp(intention.deadline),
                    SqlValue::from_opt_timestamp(intention.fulfilled_at),
                    intention.reminder_count.into(),
                    string_array_json(&intention.tags),
                    SqlValue::from_opt_timestamp(intention.snoozed_until),
                ],
            )
            .await?;
        Ok(intention)
    }

    /// List intentions, optionally filtered by status. Critical first, then
    /// newest.
    pub async fn list_intentions(
        &self,
        status: Option<IntentionStatus>,
    ) -> Result<Vec<Intention>> {
        let rows = match status {
            Some(status) => {
                self.db
                    .query(
                        "SELECT id, tenant_id, content, trigger_type, trigger_data, priority,
                                status, created_at, deadline, fulfilled_at, reminder_count,
                                tags, snoozed_until
                         FROM intentions WHERE status = ?
                         ORDER BY created_at DESC",
                        &[status.as_str().into()],
                    )
                    .await?
            }
            None => {
                self.db
                    .query(
                        "SELECT id, tenant_id, content, trigger_type, trigger_data, priority,
                                status, created_at, deadline, fulfilled_at, reminder_count,
                                tags, snoozed_until
                         FROM intentions
                         ORDER BY created_at DESC",
                        &[],
                    )
                    .await?
            }
        };
        let mut intentions: Vec<Intention> =
            rows.iter().map(intention_from_row).collect::<Result<_>>()?;
        intentions.sort_by(|a, b| b.priority.cmp(&a.priority).then(b.created_at.cmp(&a.created_at)));
        Ok(intentions)
    }

    /// Move an intention to a terminal or snoozed status. Errors with
    /// NotFound when it does not exist.
    pub async fn set_intention_status(
        &self,
        id: &str,
        status: IntentionStatus,
        fulfilled_at: Option<DateTime<Utc>>,
        snoozed_until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let result = self
            .db
            .execute(
                "UPDATE intentions
                 SET status = ?, fulfilled_at = ?, snoozed_until = ?
                 WHERE id = ?",
                &[
                    status.as_str().into(),
                    SqlValue::from_opt_timestamp(fulfilled_at),
                    SqlValue::from_opt_timestamp(snoozed_until),
                    id.into(),
                ],
            )
            .await?;
        if result.rows_affected == 0 {
            return Err(EngineError::NotFound(id.to_string()));
        }
        Ok(())
    }

    // ========================================================================
    // METADATA
    // ========================================================================

    /// Upsert a metadata value (consolidation history, gate snapshots, ...).
    pub async fn set_metadata(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.db
            .execute(
                "INSERT INTO vestige_metadata (tenant_id, key, value, updated_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT (tenant_id, key)
                 DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                &[
                    self.tenant_id().into(),
                    key.into(),
                    value.into(),
                    Utc::now().into(),
                ],
            )
            .await?;
        Ok(())
    }

    /// Read a metadata value.
    pub async fn get_metadata(&self, key: &str) -> Result<Option<serde_json::Value>> {
        match self
            .db
            .query_one(
                "SELECT value FROM vestige_metadata WHERE key = ?",
                &[key.into()],
            )
            .await?
        {
            Some(row) => Ok(Some(row.get_json("value")?)),
            None => Ok(None),
        }
    }

    // ========================================================================
    // PEOPLE
    // ========================================================================

    /// Track people mentioned by an item in the mention registry.
    async fn record_people(&self, item: &KnowledgeItem) -> Result<()> {
        let now = Utc::now();
        for name in &item.people {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            self.db
                .execute(
                    "INSERT INTO people
                        (id, tenant_id, name, mention_count, first_mentioned_at, last_mentioned_at)
                     VALUES (?, ?, ?, 1, ?, ?)
                     ON CONFLICT (tenant_id, name)
                     DO UPDATE SET mention_count = mention_count + 1,
                                   last_mentioned_at = excluded.last_mentioned_at",
                    &[
                        Uuid::new_v4().to_string().into(),
                        self.tenant_id().into(),
                        name.into(),
                        now.into(),
                        now.into(),
                    ],
                )
                .await?;
        }
        Ok(())
    }

    /// Total items for paging decisions.
    pub async fn count(&self) -> Result<i64> {
        self.db
            .query_one("SELECT COUNT(*) AS n FROM knowledge_nodes", &[])
            .await?
            .map(|row| row.get_i64("n"))
            .transpose()
            .map(|n| n.unwrap_or(0))
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn qualified_item_columns(alias: &str) -> String {
    ITEM_COLUMNS
        .split(", ")
        .map(|c| format!("{}.{}", alias, c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn item_params(item: &KnowledgeItem) -> Vec<SqlValue> {
    vec![
        item.id.clone().into(),
        item.tenant_id.clone().into(),
        item.content.clone().into(),
        SqlValue::from_opt_text(item.summary.clone()),
        item.stability.into(),
        item.difficulty.into(),
        item.state.as_str().into(),
        item.reps.into(),
        item.lapses.into(),
        SqlValue::from_opt_timestamp(item.last_review),
        SqlValue::from_opt_timestamp(item.next_review),
        item.storage_strength.into(),
        item.retrieval_strength.into(),
        item.retention_strength.into(),
        item.access_count.into(),
        item.last_accessed_at.into(),
        item.created_at.into(),
        item.updated_at.into(),
        item.sentiment_intensity.into(),
        item.confidence.into(),
        item.importance.into(),
        item.stability_factor.into(),
        item.is_contradicted.into(),
        string_array_json(&item.contradiction_ids),
        item.source_type.clone().into(),
        item.source_platform.clone().into(),
        SqlValue::from_opt_text(item.source_url.clone()),
        string_array_json(&item.source_chain),
        string_array_json(&item.people),
        string_array_json(&item.concepts),
        string_array_json(&item.events),
        string_array_json(&item.tags),
        match &item.embedding {
            Some(v) => serde_json::json!(v).into(),
            None => SqlValue::Null,
        },
    ]
}

fn item_from_row(row: &Row) -> Result<KnowledgeItem> {
    let stability = row.get_f64("stability")?;
    let difficulty = row.get_f64("difficulty")?;
    if !stability.is_finite() || stability <= 0.0 || !difficulty.is_finite() {
        // Scheduler state can never be non-finite or non-positive; a row
        // like this means the store is corrupt, and that is fatal
        return Err(EngineError::InvariantViolation(format!(
            "item {} has impossible scheduler state (stability {}, difficulty {})",
            row.get_str("id").unwrap_or("?"),
            stability,
            difficulty
        )));
    }

    let embedding = match row.get_json("embedding")? {
        serde_json::Value::Null => None,
        serde_json::Value::Array(values) => Some(
            values
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect(),
        ),
        _ => None,
    };

    Ok(KnowledgeItem {
        id: row.get_str("id")?.to_string(),
        tenant_id: row.get_str("tenant_id")?.to_string(),
        content: row.get_str("content")?.to_string(),
        summary: row.opt_str("summary")?.map(String::from),
        stability,
        difficulty,
        state: LearningState::parse_name(row.get_str("state")?),
        reps: row.get_i64("reps")? as i32,
        lapses: row.get_i64("lapses")? as i32,
        last_review: row.opt_datetime("last_review")?,
        next_review: row.opt_datetime("next_review")?,
        storage_strength: row.get_f64("storage_strength")?,
        retrieval_strength: row.get_f64("retrieval_strength")?,
        retention_strength: row.get_f64("retention_strength")?,
        access_count: row.get_i64("access_count")?,
        last_accessed_at: row.get_datetime("last_accessed_at")?,
        created_at: row.get_datetime("created_at")?,
        updated_at: row.get_datetime("updated_at")?,
        sentiment_intensity: row.get_f64("sentiment_intensity")?,
        confidence: row.get_f64("confidence")?,
        importance: row.get_f64("importance")?,
        stability_factor: row.get_f64("stability_factor")?,
        is_contradicted: row.get_bool("is_contradicted")?,
        contradiction_ids: row.get_string_array("contradiction_ids")?,
        source_type: row.get_str("source_type")?.to_string(),
        source_platform: row.get_str("source_platform")?.to_string(),
        source_url: row.opt_str("source_url")?.map(String::from),
        source_chain: row.get_string_array("source_chain")?,
        people: row.get_string_array("people")?,
        concepts: row.get_string_array("concepts")?,
        events: row.get_string_array("events")?,
        tags: row.get_string_array("tags")?,
        embedding,
    })
}

fn edge_from_row(row: &Row) -> Result<KnowledgeEdge> {
    Ok(KnowledgeEdge {
        id: row.get_str("id")?.to_string(),
        tenant_id: row.get_str("tenant_id")?.to_string(),
        from_id: row.get_str("from_id")?.to_string(),
        to_id: row.get_str("to_id")?.to_string(),
        edge_type: row
            .get_str("edge_type")?
            .parse()
            .map_err(EngineError::SchemaMismatch)?,
        weight: row.get_f64("weight")?,
        metadata: match row.get_json("metadata")? {
            serde_json::Value::Null => None,
            value => Some(value),
        },
        created_at: row.get_datetime("created_at")?,
    })
}

fn intention_from_row(row: &Row) -> Result<Intention> {
    Ok(Intention {
        id: row.get_str("id")?.to_string(),
        tenant_id: row.get_str("tenant_id")?.to_string(),
        content: row.get_str("content")?.to_string(),
        trigger_type: row.get_str("trigger_type")?.to_string(),
        trigger_data: row.get_json("trigger_data")?,
        priority: Priority::parse_name(row.get_str("priority")?),
        status: IntentionStatus::parse_name(row.get_str("status")?),
        created_at: row.get_datetime("created_at")?,
        deadline: row.opt_datetime("deadline")?,
        fulfilled_at: row.opt_datetime("fulfilled_at")?,
        reminder_count: row.get_i64("reminder_count")? as i32,
        tags: row.get_string_array("tags")?,
        snoozed_until: row.opt_datetime("snoozed_until")?,
    })
}

fn string_array_json(values: &[String]) -> SqlValue {
    SqlValue::Json(serde_json::json!(values))
}

/// Clamp every bounded field to its documented range.
fn clamp_item(item: &mut KnowledgeItem) {
    item.stability = item.stability.clamp(MIN_STABILITY, MAX_STABILITY);
    item.difficulty = item.difficulty.clamp(1.0, 10.0);
    item.storage_strength = item.storage_strength.max(0.0);
    item.retrieval_strength = item.retrieval_strength.clamp(0.0, 1.0);
    item.retention_strength = item.retention_strength.clamp(0.0, 1.0);
    item.sentiment_intensity = item.sentiment_intensity.clamp(0.0, 1.0);
    item.confidence = item.confidence.clamp(0.0, 1.0);
    item.importance = item.importance.clamp(0.0, 1.0);
    item.stability_factor = item.stability_factor.max(0.1);
    item.reps = item.reps.max(0);
    item.lapses = item.lapses.max(0);
}

/// Strip FTS5 operators so user text can't break the MATCH parser.
fn sanitize_fts_query(query: &str) -> String {
    let cleaned: String = query
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Build a fresh item from ingest input (id and tenant assigned by insert).
pub fn item_from_ingest(input: &IngestInput, now: DateTime<Utc>) -> KnowledgeItem {
    let mut item = KnowledgeItem {
        id: String::new(),
        tenant_id: String::new(),
        content: input.content.clone(),
        summary: input.summary.clone(),
        sentiment_intensity: input.sentiment_intensity,
        confidence: input.confidence,
        importance: input.importance,
        source_type: input.source_type.clone(),
        source_platform: input.source_platform.clone(),
        source_url: input.source_url.clone(),
        people: dedup(&input.people),
        concepts: dedup(&input.concepts),
        events: dedup(&input.events),
        tags: dedup(&input.tags),
        embedding: input.embedding.clone(),
        created_at: now,
        updated_at: now,
        last_accessed_at: now,
        ..Default::default()
    };
    item.storage_strength = 1.0;
    item.retrieval_strength = 1.0;
    item.recompute_retention();
    item
}

fn dedup(values: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values
        .iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && seen.insert(v.to_lowercase()))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteDatabase;

    async fn repo(tenant: &str) -> KnowledgeRepository {
        let db = SqliteDatabase::in_memory(tenant).await.unwrap();
        KnowledgeRepository::new(Arc::new(db))
    }

    fn sample_item(content: &str) -> KnowledgeItem {
        KnowledgeItem {
            content: content.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_tenant() {
        let repo = repo("t1").await;
        let item = repo.insert(sample_item("hello")).await.unwrap();
        assert!(!item.id.is_empty());
        assert_eq!(item.tenant_id, "t1");
    }

    #[tokio::test]
    async fn test_insert_clamps_out_of_range_fields() {
        let repo = repo("t1").await;
        let mut item = sample_item("clamped");
        item.stability = 1e9;
        item.difficulty = 0.0;
        item.retrieval_strength = 7.0;
        item.confidence = -3.0;
        let item = repo.insert(item).await.unwrap();
        assert!((item.stability - MAX_STABILITY).abs() < 1e-9);
        assert!((item.difficulty - 1.0).abs() < 1e-9);
        assert!((item.retrieval_strength - 1.0).abs() < 1e-9);
        assert!(item.confidence.abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_insert_empty_content_rejected() {
        let repo = repo("t1").await;
        let err = repo.insert(sample_item("   ")).await.unwrap_err();
        assert!(matches!(err, EngineError::ValidationFailed { .. }));
    }

    #[tokio::test]
    async fn test_get_bumps_access_tracking() {
        let repo = repo("t1").await;
        let item = repo.insert(sample_item("accessed")).await.unwrap();

        let first = repo.get(&item.id).await.unwrap().unwrap();
        assert_eq!(first.access_count, 1);
        let second = repo.get(&item.id).await.unwrap().unwrap();
        assert_eq!(second.access_count, 2);
        assert!(second.last_accessed_at >= first.last_accessed_at);
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let repo = repo("t1").await;
        assert!(repo.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_patch_semantics() {
        let repo = repo("t1").await;
        let item = repo.insert(sample_item("original")).await.unwrap();

        let patch = ItemPatch {
            summary: Some("a summary".into()),
            tags: Some(vec!["rust".into()]),
            ..Default::default()
        };
        repo.update(&item.id, &patch).await.unwrap();

        let updated = repo.peek(&item.id).await.unwrap().unwrap();
        // Patched fields changed, everything else untouched
        assert_eq!(updated.summary.as_deref(), Some("a summary"));
        assert_eq!(updated.tags, vec!["rust"]);
        assert_eq!(updated.content, "original");
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let repo = repo("t1").await;
        let err = repo
            .update("nope", &ItemPatch {
                content: Some("x".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_returns_bool_not_error() {
        let repo = repo("t1").await;
        let item = repo.insert(sample_item("doomed")).await.unwrap();
        assert!(repo.delete(&item.id).await.unwrap());
        assert!(!repo.delete(&item.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_search_fts_and_fallback() {
        let repo = repo("t1").await;
        repo.insert(sample_item("the rust borrow checker enforces ownership"))
            .await
            .unwrap();
        repo.insert(sample_item("gardening in early spring"))
            .await
            .unwrap();

        let results = repo
            .search("borrow", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(results.total, 1);
        assert!(results.items[0].content.contains("borrow"));

        // Empty query falls back to LIKE-over-everything
        let all = repo.search("", &SearchOptions::default()).await.unwrap();
        assert_eq!(all.total, 2);
    }

    #[tokio::test]
    async fn test_search_min_retention_filter() {
        let repo = repo("t1").await;
        let strong = repo.insert(sample_item("strong memory")).await.unwrap();
        let weak = repo.insert(sample_item("weak memory")).await.unwrap();
        repo.apply_strengths(&weak.id, 0.0, 0.1, 0.07).await.unwrap();

        let results = repo
            .search(
                "memory",
                &SearchOptions {
                    min_retention: 0.5,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(results.items.len(), 1);
        assert_eq!(results.items[0].id, strong.id);
    }

    #[tokio::test]
    async fn test_due_ordering() {
        let repo = repo("t1").await;
        let now = Utc::now();
        for (id, days_ago) in [("later", 1), ("sooner", 3)] {
            let mut item = sample_item(id);
            item.id = id.to_string();
            item.next_review = Some(now - chrono::Duration::days(days_ago));
            repo.insert(item).await.unwrap();
        }
        let due = repo.due(10).await.unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].id, "sooner");
    }

    #[tokio::test]
    async fn test_stats_buckets() {
        let repo = repo("t1").await;
        let a = repo.insert(sample_item("active")).await.unwrap();
        let b = repo.insert(sample_item("silent")).await.unwrap();
        repo.apply_strengths(&a.id, 10.0, 1.0, 1.0).await.unwrap();
        repo.apply_strengths(&b.id, 0.5, 0.2, 0.15).await.unwrap();

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.total_items, 2);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.silent, 1);
        assert!(stats.average_retention > 0.0);
    }

    #[tokio::test]
    async fn test_edges_upsert_and_self_loop_exclusion() {
        let repo = repo("t1").await;
        let a = repo.insert(sample_item("a")).await.unwrap();
        let b = repo.insert(sample_item("b")).await.unwrap();

        let edge = KnowledgeEdge::new("", &a.id, &b.id, crate::memory::EdgeType::Semantic);
        repo.insert_edge(edge.clone()).await.unwrap();

        // Same (from, to, type) replaces weight instead of erroring
        let mut replacement = edge.clone();
        replacement.id = String::new();
        replacement.weight = 0.25;
        repo.insert_edge(replacement).await.unwrap();

        // Stored self-loop is never surfaced
        let self_loop = KnowledgeEdge::new("", &a.id, &a.id, crate::memory::EdgeType::Semantic);
        repo.insert_edge(self_loop).await.unwrap();

        let related = repo.get_related(&a.id).await.unwrap();
        assert_eq!(related.len(), 1);
        assert!((related[0].weight - 0.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_intentions_lifecycle() {
        let repo = repo("t1").await;
        let intention = repo
            .insert_intention(Intention::new(
                "",
                "write the report",
                "time",
                serde_json::json!({"at": "2026-09-01T00:00:00Z"}),
            ))
            .await
            .unwrap();

        let active = repo
            .list_intentions(Some(IntentionStatus::Active))
            .await
            .unwrap();
        assert_eq!(active.len(), 1);

        repo.set_intention_status(
            &intention.id,
            IntentionStatus::Fulfilled,
            Some(Utc::now()),
            None,
        )
        .await
        .unwrap();

        let active = repo
            .list_intentions(Some(IntentionStatus::Active))
            .await
            .unwrap();
        assert!(active.is_empty());
        let fulfilled = repo
            .list_intentions(Some(IntentionStatus::Fulfilled))
            .await
            .unwrap();
        assert_eq!(fulfilled.len(), 1);
        assert!(fulfilled[0].fulfilled_at.is_some());
    }

    #[tokio::test]
    async fn test_metadata_upsert_roundtrip() {
        let repo = repo("t1").await;
        repo.set_metadata("cycle", serde_json::json!({"n": 1}))
            .await
            .unwrap();
        repo.set_metadata("cycle", serde_json::json!({"n": 2}))
            .await
            .unwrap();
        let value = repo.get_metadata("cycle").await.unwrap().unwrap();
        assert_eq!(value["n"], 2);
    }

    #[tokio::test]
    async fn test_people_registry_counts_mentions() {
        let repo = repo("t1").await;
        let mut item = sample_item("met ada");
        item.people = vec!["Ada Lovelace".into()];
        repo.insert(item).await.unwrap();

        let mut item = sample_item("ada again");
        item.people = vec!["Ada Lovelace".into()];
        repo.insert(item).await.unwrap();

        let row = repo
            .db
            .query_one(
                "SELECT mention_count FROM people WHERE name = ?",
                &["Ada Lovelace".into()],
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get_i64("mention_count").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_find_tagged() {
        let repo = repo("t1").await;
        let mut item = sample_item("tagged item");
        item.tags = vec!["projects".into()];
        repo.insert(item).await.unwrap();
        repo.insert(sample_item("untagged item")).await.unwrap();

        let tagged = repo.find_tagged("projects", 10).await.unwrap();
        assert_eq!(tagged.len(), 1);
    }

    #[tokio::test]
    async fn test_item_roundtrip_preserves_everything() {
        let repo = repo("t1").await;
        let now = Utc::now();
        let mut item = sample_item("full roundtrip");
        item.summary = Some("short".into());
        item.tags = vec!["x".into(), "y".into()];
        item.concepts = vec!["ownership".into()];
        item.embedding = Some(vec![0.25, -0.5, 1.0]);
        item.next_review = Some(now + chrono::Duration::days(3));
        item.sentiment_intensity = 0.4;
        let inserted = repo.insert(item).await.unwrap();

        let loaded = repo.peek(&inserted.id).await.unwrap().unwrap();
        assert_eq!(loaded.summary.as_deref(), Some("short"));
        assert_eq!(loaded.tags, vec!["x", "y"]);
        assert_eq!(loaded.concepts, vec!["ownership"]);
        assert_eq!(loaded.embedding.as_deref(), Some(&[0.25f32, -0.5, 1.0][..]));
        assert!((loaded.sentiment_intensity - 0.4).abs() < 1e-9);
        assert_eq!(
            loaded.next_review.unwrap().timestamp_millis(),
            inserted.next_review.unwrap().timestamp_millis()
        );
    }
}
