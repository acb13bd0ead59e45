//! Memory module - core types and data structures
//!
//! The data model of the engine:
//! - Knowledge items with FSRS-6 scheduling state and dual-strength retention
//! - Typed, weighted knowledge-graph edges
//! - Prospective-memory intentions
//!
//! Everything here is tenant-scoped: a record belongs to exactly one tenant
//! and the storage layer refuses to surface it to any other.

mod edge;
mod intention;
mod item;

pub use edge::{EdgeType, KnowledgeEdge};
pub use intention::{Intention, IntentionStatus, Priority};
pub use item::{
    fuse_retention, IngestInput, ItemPatch, KnowledgeItem, MemoryStats, RetentionBucket,
    SearchOptions, SearchResults, RETENTION_RETRIEVAL_WEIGHT, RETENTION_STORAGE_WEIGHT,
};
