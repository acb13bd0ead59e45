//! # Vestige Engine
//!
//! Multi-tenant cognitive memory engine for AI agents:
//!
//! - **FSRS-6**: 21-parameter spaced repetition with a power-law forgetting
//!   curve and personalizable decay
//! - **Dual-Strength Model**: Bjork & Bjork (1992) storage/retrieval
//!   strength fused into a single retention score
//! - **Prediction-Error Gating**: ingest decisions (create/update/merge/
//!   skip/contradiction) driven by novelty against existing memories
//! - **Reconsolidation**: retrieved memories become temporarily modifiable
//!   (Nader, Schafe & LeDoux 2000)
//! - **Sleep Consolidation**: cycle-driven replay, pattern extraction, and
//!   connection discovery, plus an independent decay/pruning tick
//! - **Memory Chains**: ordered, typed sequences for reasoning paths
//! - **Storage Abstraction**: one SQL contract over embedded SQLite and
//!   hosted Postgres, with a dialect rewriter and row-level tenancy
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vestige_engine::prelude::*;
//!
//! let db = SqliteDatabase::open("vestige.db".into(), "tenant-1").await?;
//! let engine = MemoryEngine::new(Arc::new(db), EngineConfig::default())?;
//!
//! // Ingest through the prediction-error gate
//! let outcome = engine.ingest(IngestInput {
//!     content: "The mitochondria is the powerhouse of the cell".into(),
//!     ..Default::default()
//! }).await?;
//!
//! // Review with FSRS-6 scheduling
//! let item = outcome.item.unwrap();
//! let review = engine.review(&item.id, Rating::Good, None).await?;
//!
//! // Recall under contextual ranking
//! let results = engine.recall("cellular energy", &SearchOptions::default()).await?;
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod chains;
pub mod compression;
pub mod config;
pub mod consolidation;
pub mod engine;
pub mod error;
pub mod fsrs;
pub mod gate;
pub mod memory;
pub mod reconsolidation;
pub mod repository;
pub mod storage;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Errors
pub use error::{EngineError, Result};

// Configuration
pub use config::{CompressionConfig, ConsolidationConfig, EngineConfig, GateConfig};

// Memory types
pub use memory::{
    fuse_retention, EdgeType, IngestInput, Intention, IntentionStatus, ItemPatch, KnowledgeEdge,
    KnowledgeItem, MemoryStats, Priority, RetentionBucket, SearchOptions, SearchResults,
};

// FSRS-6 algorithm
pub use fsrs::{
    initial_difficulty,
    initial_stability,
    next_interval,
    // Core functions for advanced usage
    retrievability,
    retrievability_with_decay,
    FSRSParameters,
    FSRSScheduler,
    FSRSState,
    LearningState,
    PreviewResults,
    Rating,
    ReviewResult,
};

// Storage layer
pub use storage::{
    rewrite_to_postgres, Database, PostgresDatabase, QueryResult, Row, SqlValue, SqliteDatabase,
    Statement, Transaction,
};

// Repository
pub use repository::KnowledgeRepository;

// Reconsolidation (memories become modifiable on retrieval)
pub use reconsolidation::{
    ChangeSummary, MemorySnapshot, Modification, ReconsolidationManager, ReconsolidationResult,
    ReconsolidationStats,
};

// Prediction-error gating
pub use gate::{
    cosine_similarity, jaccard_similarity, CandidateMemory, ContradictionKind, GateDecision,
    GateResult, GateStats, IncomingMemory, PredictionErrorGate, SuggestedAction,
};

// Consolidation
pub use consolidation::{
    optimal_next_cycle, CycleInsight, CyclePhase, CycleReport, InsightKind, ReplayEvent,
    TickOutcome, TickReport,
};

// Compression
pub use compression::{
    CompressedMemory, CompressionCandidate, CompressionEngine, CompressionLevel,
    CompressionStats, CompressionStrategy,
};

// Memory chains
pub use chains::{
    ChainLink, ChainLinkType, ChainManager, ChainType, MemoryChain, TraverseDirection,
};

// Engine facade
pub use engine::{
    ContextQuery, ContextRankedItem, ContextScore, ImportanceEvent, IngestOutcome, MemoryEngine,
    MemoryStateInfo, ReviewOutcome, StateStats, TagCount, TriggerImportanceReport,
};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// FSRS algorithm version (6 = 21 parameters)
pub const FSRS_VERSION: u8 = 6;

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        ContextQuery, Database, EngineConfig, EngineError, IngestInput, IngestOutcome,
        KnowledgeItem, MemoryEngine, MemoryStats, Rating, Result, ReviewOutcome, SearchOptions,
        SqliteDatabase,
    };

    pub use crate::{
        ChainManager, CompressionEngine, CyclePhase, GateDecision, Modification,
        PostgresDatabase, PredictionErrorGate, ReconsolidationManager, RetentionBucket,
    };
}
