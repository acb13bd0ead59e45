//! Consolidation tick: decay, promotion, pruning
//!
//! Independent of sleep cycles, the tick sweeps every item and refreshes its
//! retrieval strength from the forgetting curve. Items whose fused retention
//! falls below the pruning threshold are deleted; meaningful movements are
//! classified as promotions or decays. A dry run computes the counts without
//! any writes.
//!
//! Pure per-item math lives here; the engine drives the sweep and applies
//! the outcomes item by item, so a tick never blocks ingest or review with a
//! full-table swap.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::{fuse_retention, KnowledgeItem};

/// Retention movements smaller than this are left alone.
const MIN_RETENTION_DELTA: f64 = 0.01;

/// Floor on recomputed retrieval strength.
const MIN_RETRIEVAL: f64 = 0.1;

/// What the tick decided for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickOutcome {
    /// Retention moved up
    Promoted,
    /// Retention moved down
    Decayed,
    /// Retention fell below the pruning threshold; delete
    Pruned,
    /// Movement too small to bother writing
    Unchanged,
}

/// Per-item tick result.
#[derive(Debug, Clone)]
pub struct TickComputation {
    pub item_id: String,
    pub outcome: TickOutcome,
    pub new_retrieval: f64,
    pub new_retention: f64,
}

/// Whole-sweep counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub processed: usize,
    pub promoted: usize,
    pub decayed: usize,
    pub pruned: usize,
    pub unchanged: usize,
    pub dry_run: bool,
}

impl TickReport {
    /// Fold one computation into the counters.
    pub fn record(&mut self, computation: &TickComputation) {
        self.processed += 1;
        match computation.outcome {
            TickOutcome::Promoted => self.promoted += 1,
            TickOutcome::Decayed => self.decayed += 1,
            TickOutcome::Pruned => self.pruned += 1,
            TickOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

/// Recompute an item's strengths from elapsed time.
///
/// `retrieval' = max(0.1, exp(-days_since_access / stability))`, retention
/// refused below the floor, pruned under `pruning_threshold`.
pub fn compute_tick(
    item: &KnowledgeItem,
    now: DateTime<Utc>,
    pruning_threshold: f64,
) -> TickComputation {
    let days = item.days_since_access(now);
    let stability = item.stability.max(0.1);
    let new_retrieval = (-days / stability).exp().max(MIN_RETRIEVAL);
    let new_retention = fuse_retention(item.storage_strength, new_retrieval);

    let outcome = if new_retention < pruning_threshold {
        TickOutcome::Pruned
    } else if (new_retention - item.retention_strength).abs() > MIN_RETENTION_DELTA {
        if new_retention > item.retention_strength {
            TickOutcome::Promoted
        } else {
            TickOutcome::Decayed
        }
    } else {
        TickOutcome::Unchanged
    };

    TickComputation {
        item_id: item.id.clone(),
        outcome,
        new_retrieval,
        new_retention,
    }
}

// ============================================================================
// TESTS
// ============================================================================
