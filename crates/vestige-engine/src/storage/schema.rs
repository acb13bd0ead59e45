//! Persistence schema for both backends
//!
//! Five logical tables: knowledge, people, edges, intentions, metadata.
//! The embedded backend creates them under the logical SQLite names with an
//! FTS5 virtual table kept in sync by triggers; the hosted backend creates
//! the physical `vestige_*` tables with a generated tsvector column and
//! row-level-security policies bound to `app.tenant_id`.
//!
//! Statement granularity matters: hosted services cap schema batches, so
//! init runs in chunks of at most [`SCHEMA_BATCH_LIMIT`] statements, and
//! "already exists" failures are ignored per statement.

/// Maximum statements per schema-creation batch (hosted-service limit).
pub const SCHEMA_BATCH_LIMIT: usize = 10;

/// Schema statements for the embedded SQLite backend.
pub fn sqlite_schema() -> Vec<&'static str> {
    vec![
        // ==================== knowledge ====================
        "CREATE TABLE IF NOT EXISTS knowledge_nodes (
            id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            content TEXT NOT NULL,
            summary TEXT,
            stability REAL NOT NULL DEFAULT 2.3065,
            difficulty REAL NOT NULL DEFAULT 5.0,
            state TEXT NOT NULL DEFAULT 'new',
            reps INTEGER NOT NULL DEFAULT 0,
            lapses INTEGER NOT NULL DEFAULT 0,
            last_review TEXT,
            next_review TEXT,
            storage_strength REAL NOT NULL DEFAULT 1.0,
            retrieval_strength REAL NOT NULL DEFAULT 1.0,
            retention_strength REAL NOT NULL DEFAULT 1.0,
            access_count INTEGER NOT NULL DEFAULT 0,
            last_accessed_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            sentiment_intensity REAL NOT NULL DEFAULT 0.0,
            confidence REAL NOT NULL DEFAULT 1.0,
            importance REAL NOT NULL DEFAULT 0.5,
            stability_factor REAL NOT NULL DEFAULT 1.0,
            is_contradicted INTEGER NOT NULL DEFAULT 0,
            contradiction_ids TEXT NOT NULL DEFAULT '[]',
            source_type TEXT NOT NULL DEFAULT 'api',
            source_platform TEXT NOT NULL DEFAULT 'unknown',
            source_url TEXT,
            source_chain TEXT NOT NULL DEFAULT '[]',
            people TEXT NOT NULL DEFAULT '[]',
            concepts TEXT NOT NULL DEFAULT '[]',
            events TEXT NOT NULL DEFAULT '[]',
            tags TEXT NOT NULL DEFAULT '[]',
            embedding TEXT,
            PRIMARY KEY (tenant_id, id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_nodes_created
            ON knowledge_nodes(tenant_id, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_nodes_state
            ON knowledge_nodes(tenant_id, state)",
        "CREATE INDEX IF NOT EXISTS idx_nodes_next_review
            ON knowledge_nodes(tenant_id, next_review)",
        "CREATE INDEX IF NOT EXISTS idx_nodes_retention
            ON knowledge_nodes(tenant_id, retention_strength)",
        // ==================== people ====================
        "CREATE TABLE IF NOT EXISTS people (
            id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            name TEXT NOT NULL,
            mention_count INTEGER NOT NULL DEFAULT 1,
            first_mentioned_at TEXT NOT NULL,
            last_mentioned_at TEXT NOT NULL,
            PRIMARY KEY (tenant_id, id),
            UNIQUE (tenant_id, name)
        )",
        // ==================== edges ====================
        "CREATE TABLE IF NOT EXISTS graph_edges (
            id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            from_id TEXT NOT NULL,
            to_id TEXT NOT NULL,
            edge_type TEXT NOT NULL,
            weight REAL NOT NULL DEFAULT 1.0,
            metadata TEXT,
            created_at TEXT NOT NULL,
            PRIMARY KEY (tenant_id, id),
            UNIQUE (tenant_id, from_id, to_id, edge_type)
        )",
        "CREATE INDEX IF NOT EXISTS idx_edges_from
            ON graph_edges(tenant_id, from_id)",
        "CREATE INDEX IF NOT EXISTS idx_edges_to
            ON graph_edges(tenant_id, to_id)",
        // ==================== intentions ====================
        "CREATE TABLE IF NOT EXISTS intentions (
            id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            content TEXT NOT NULL,
            trigger_type TEXT NOT NULL,
            trigger_data TEXT NOT NULL DEFAULT '{}',
            priority TEXT NOT NULL DEFAULT 'normal',
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            deadline TEXT,
            fulfilled_at TEXT,
            reminder_count INTEGER NOT NULL DEFAULT 0,
            tags TEXT NOT NULL DEFAULT '[]',
            snoozed_until TEXT,
            PRIMARY KEY (tenant_id, id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_intentions_status
            ON intentions(tenant_id, status)",
        "CREATE INDEX IF NOT EXISTS idx_intentions_deadline
            ON intentions(tenant_id, deadline)",
        // ==================== metadata ====================
        "CREATE TABLE IF NOT EXISTS vestige_metadata (
            tenant_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (tenant_id, key)
        )",
        // ==================== full-text search ====================
        "CREATE VIRTUAL TABLE IF NOT EXISTS knowledge_fts USING fts5(
            id,
            content,
            summary,
            content='knowledge_nodes',
            content_rowid='rowid',
            tokenize='porter ascii'
        )",
        "CREATE TRIGGER IF NOT EXISTS knowledge_ai AFTER INSERT ON knowledge_nodes BEGIN
            INSERT INTO knowledge_fts(rowid, id, content, summary)
            VALUES (NEW.rowid, NEW.id, NEW.content, COALESCE(NEW.summary, ''));
        END",
        "CREATE TRIGGER IF NOT EXISTS knowledge_ad AFTER DELETE ON knowledge_nodes BEGIN
            INSERT INTO knowledge_fts(knowledge_fts, rowid, id, content, summary)
            VALUES ('delete', OLD.rowid, OLD.id, OLD.content, COALESCE(OLD.summary, ''));
        END",
        "CREATE TRIGGER IF NOT EXISTS knowledge_au AFTER UPDATE ON knowledge_nodes BEGIN
            INSERT INTO knowledge_fts(knowledge_fts, rowid, id, content, summary)
            VALUES ('delete', OLD.rowid, OLD.id, OLD.content, COALESCE(OLD.summary, ''));
            INSERT INTO knowledge_fts(rowid, id, content, summary)
            VALUES (NEW.rowid, NEW.id, NEW.content, COALESCE(NEW.summary, ''));
        END",
    ]
}

/// Schema statements for the hosted Postgres backend.
///
/// Every table defaults `tenant_id` to the session identity and carries a
/// row-access policy constraining both read and write to it. The knowledge
/// table's search vector is a weighted generated column (content weighted A,
/// summary weighted B).
pub fn postgres_schema() -> Vec<&'static str> {
    vec![
        // ==================== knowledge ====================
        "CREATE TABLE IF NOT EXISTS vestige_knowledge (
            id TEXT NOT NULL,
            tenant_id TEXT NOT NULL DEFAULT current_setting('app.tenant_id', true),
            content TEXT NOT NULL,
            summary TEXT,
            stability DOUBLE PRECISION NOT NULL DEFAULT 2.3065,
            difficulty DOUBLE PRECISION NOT NULL DEFAULT 5.0,
            state TEXT NOT NULL DEFAULT 'new',
            reps BIGINT NOT NULL DEFAULT 0,
            lapses BIGINT NOT NULL DEFAULT 0,
            last_review TIMESTAMPTZ,
            next_review TIMESTAMPTZ,
            storage_strength DOUBLE PRECISION NOT NULL DEFAULT 1.0,
            retrieval_strength DOUBLE PRECISION NOT NULL DEFAULT 1.0,
            retention_strength DOUBLE PRECISION NOT NULL DEFAULT 1.0,
            access_count BIGINT NOT NULL DEFAULT 0,
            last_accessed_at TIMESTAMPTZ NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            sentiment_intensity DOUBLE PRECISION NOT NULL DEFAULT 0.0,
            confidence DOUBLE PRECISION NOT NULL DEFAULT 1.0,
            importance DOUBLE PRECISION NOT NULL DEFAULT 0.5,
            stability_factor DOUBLE PRECISION NOT NULL DEFAULT 1.0,
            is_contradicted BOOLEAN NOT NULL DEFAULT FALSE,
            contradiction_ids JSONB NOT NULL DEFAULT '[]',
            source_type TEXT NOT NULL DEFAULT 'api',
            source_platform TEXT NOT NULL DEFAULT 'unknown',
            source_url TEXT,
            source_chain JSONB NOT NULL DEFAULT '[]',
            people JSONB NOT NULL DEFAULT '[]',
            concepts JSONB NOT NULL DEFAULT '[]',
            events JSONB NOT NULL DEFAULT '[]',
            tags JSONB NOT NULL DEFAULT '[]',
            embedding JSONB,
            search_vector tsvector GENERATED ALWAYS AS (
                setweight(to_tsvector('english', coalesce(content, '')), 'A') ||
                setweight(to_tsvector('english', coalesce(summary, '')), 'B')
            ) STORED,
            PRIMARY KEY (tenant_id, id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_vk_created
            ON vestige_knowledge(tenant_id, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_vk_state
            ON vestige_knowledge(tenant_id, state)",
        "CREATE INDEX IF NOT EXISTS idx_vk_next_review
            ON vestige_knowledge(tenant_id, next_review)",
        "CREATE INDEX IF NOT EXISTS idx_vk_retention
            ON vestige_knowledge(tenant_id, retention_strength)",
        "CREATE INDEX IF NOT EXISTS idx_vk_search
            ON vestige_knowledge USING GIN (search_vector)",
        "CREATE INDEX IF NOT EXISTS idx_vk_tags
            ON vestige_knowledge USING GIN (tags)",
        "CREATE INDEX IF NOT EXISTS idx_vk_concepts
            ON vestige_knowledge USING GIN (concepts)",
        "ALTER TABLE vestige_knowledge ENABLE ROW LEVEL SECURITY",
        "ALTER TABLE vestige_knowledge FORCE ROW LEVEL SECURITY",
        "CREATE POLICY vk_tenant_isolation ON vestige_knowledge
            USING (tenant_id = current_setting('app.tenant_id', true))
            WITH CHECK (tenant_id = current_setting('app.tenant_id', true))",
        // ==================== people ====================
        "CREATE TABLE IF NOT EXISTS vestige_people (
            id TEXT NOT NULL,
            tenant_id TEXT NOT NULL DEFAULT current_setting('app.tenant_id', true),
            name TEXT NOT NULL,
            mention_count BIGINT NOT NULL DEFAULT 1,
            first_mentioned_at TIMESTAMPTZ NOT NULL,
            last_mentioned_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (tenant_id, id),
            UNIQUE (tenant_id, name)
        )",
        "ALTER TABLE vestige_people ENABLE ROW LEVEL SECURITY",
        "ALTER TABLE vestige_people FORCE ROW LEVEL SECURITY",
        "CREATE POLICY vp_tenant_isolation ON vestige_people
            USING (tenant_id = current_setting('app.tenant_id', true))
            WITH CHECK (tenant_id = current_setting('app.tenant_id', true))",
        // ==================== edges ====================
        "CREATE TABLE IF NOT EXISTS vestige_edges (
            id TEXT NOT NULL,
            tenant_id TEXT NOT NULL DEFAULT current_setting('app.tenant_id', true),
            from_id TEXT NOT NULL,
            to_id TEXT NOT NULL,
            edge_type TEXT NOT NULL,
            weight DOUBLE PRECISION NOT NULL DEFAULT 1.0,
            metadata JSONB,
            created_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (tenant_id, id),
            UNIQUE (tenant_id, from_id, to_id, edge_type)
        )",
        "CREATE INDEX IF NOT EXISTS idx_ve_from
            ON vestige_edges(tenant_id, from_id)",
        "CREATE INDEX IF NOT EXISTS idx_ve_to
            ON vestige_edges(tenant_id, to_id)",
        "ALTER TABLE vestige_edges ENABLE ROW LEVEL SECURITY",
        "ALTER TABLE vestige_edges FORCE ROW LEVEL SECURITY",
        "CREATE POLICY ve_tenant_isolation ON vestige_edges
            USING (tenant_id = current_setting('app.tenant_id', true))
            WITH CHECK (tenant_id = current_setting('app.tenant_id', true))",
        // ==================== intentions ====================
        "CREATE TABLE IF NOT EXISTS vestige_intentions (
            id TEXT NOT NULL,
            tenant_id TEXT NOT NULL DEFAULT current_setting('app.tenant_id', true),
            content TEXT NOT NULL,
            trigger_type TEXT NOT NULL,
            trigger_data JSONB NOT NULL DEFAULT '{}',
            priority TEXT NOT NULL DEFAULT 'normal',
            status TEXT NOT NULL DEFAULT 'active',
            created_at TIMESTAMPTZ NOT NULL,
            deadline TIMESTAMPTZ,
            fulfilled_at TIMESTAMPTZ,
            reminder_count BIGINT NOT NULL DEFAULT 0,
            tags JSONB NOT NULL DEFAULT '[]',
            snoozed_until TIMESTAMPTZ,
            PRIMARY KEY (tenant_id, id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_vi_status
            ON vestige_intentions(tenant_id, status)",
        "CREATE INDEX IF NOT EXISTS idx_vi_deadline
            ON vestige_intentions(tenant_id, deadline)",
        "ALTER TABLE vestige_intentions ENABLE ROW LEVEL SECURITY",
        "ALTER TABLE vestige_intentions FORCE ROW LEVEL SECURITY",
        "CREATE POLICY vi_tenant_isolation ON vestige_intentions
            USING (tenant_id = current_setting('app.tenant_id', true))
            WITH CHECK (tenant_id = current_setting('app.tenant_id', true))",
        // ==================== metadata ====================
        "CREATE TABLE IF NOT EXISTS vestige_metadata (
            tenant_id TEXT NOT NULL DEFAULT current_setting('app.tenant_id', true),
            key TEXT NOT NULL,
            value JSONB NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (tenant_id, key)
        )",
        "ALTER TABLE vestige_metadata ENABLE ROW LEVEL SECURITY",
        "ALTER TABLE vestige_metadata FORCE ROW LEVEL SECURITY",
        "CREATE POLICY vm_tenant_isolation ON vestige_metadata
            USING (tenant_id = current_setting('app.tenant_id', true))
            WITH CHECK (tenant_id = current_setting('app.tenant_id', true))",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_batches_fit_service_limit() {
        // Both schemas must be splittable into <= 10-statement batches
        for chunk in sqlite_schema().chunks(SCHEMA_BATCH_LIMIT) {
            assert!(chunk.len() <= SCHEMA_BATCH_LIMIT);
        }
        for chunk in postgres_schema().chunks(SCHEMA_BATCH_LIMIT) {
            assert!(chunk.len() <= SCHEMA_BATCH_LIMIT);
        }
    }

    #[test]
    fn test_every_tenant_table_has_policy() {
        let schema = postgres_schema().join("\n");
        for table in [
            "vestige_knowledge",
            "vestige_people",
            "vestige_edges",
            "vestige_intentions",
            "vestige_metadata",
        ] {
            assert!(
                schema.contains(&format!("ON {}", table)),
                "missing RLS policy for {}",
                table
            );
            assert!(schema.contains(&format!("ALTER TABLE {} ENABLE ROW LEVEL SECURITY", table)));
            assert!(schema.contains(&format!("ALTER TABLE {} FORCE ROW LEVEL SECURITY", table)));
        }
    }

    #[test]
    fn test_sqlite_schema_uses_logical_names() {
        let schema = sqlite_schema().join("\n");
        assert!(schema.contains("knowledge_nodes"));
        assert!(schema.contains("graph_edges"));
        assert!(!schema.contains("vestige_knowledge"));
    }

    #[test]
    fn test_postgres_search_vector_weighted() {
        let schema = postgres_schema().join("\n");
        assert!(schema.contains("setweight(to_tsvector('english', coalesce(content, '')), 'A')"));
        assert!(schema.contains("setweight(to_tsvector('english', coalesce(summary, '')), 'B')"));
    }
}
