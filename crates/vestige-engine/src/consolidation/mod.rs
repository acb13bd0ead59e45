//! Consolidation engine
//!
//! Cycle-driven selection, replay, pattern extraction, and connection
//! discovery, plus the independent decay/promotion/pruning tick.

mod cycle;
mod tick;

pub use cycle::{
    access_score, optimal_next_cycle, recency_score, run_cycle, select_candidates,
    selection_score, CycleInsight, CyclePhase, CycleReport, InsightKind, ReplayEvent,
};
pub use tick::{compute_tick, TickComputation, TickOutcome, TickReport};
