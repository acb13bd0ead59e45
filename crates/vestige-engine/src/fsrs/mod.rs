//! FSRS-6 (Free Spaced Repetition Scheduler) Module
//!
//! 21-parameter spaced repetition with a power-law forgetting curve and a
//! personalizable decay (w20).
//!
//! Reference: https://github.com/open-spaced-repetition/fsrs4anki
//!
//! ## Core formulas
//! - Retrievability: `R = (1 + FACTOR * t / S)^(-w20)` where
//!   `FACTOR = 0.9^(-1/w20) - 1`
//! - Interval: `t = S/FACTOR * (R^(-1/w20) - 1)`

mod algorithm;
mod scheduler;

pub use algorithm::{
    apply_sentiment_boost,
    forgetting_factor,
    fuzz_interval,
    initial_difficulty,
    initial_difficulty_with_weights,
    initial_stability,
    initial_stability_with_weights,
    next_difficulty,
    next_difficulty_with_weights,
    next_forget_stability,
    next_forget_stability_with_weights,
    next_interval,
    next_interval_with_decay,
    next_recall_stability,
    next_recall_stability_with_weights,
    // Core functions
    retrievability,
    retrievability_with_decay,
    same_day_stability,
    same_day_stability_with_weights,
    DEFAULT_DECAY,
    DEFAULT_RETENTION,
    // Constants
    FSRS6_WEIGHTS,
    MAX_DIFFICULTY,
    MAX_STABILITY,
    MIN_DIFFICULTY,
    MIN_STABILITY,
};

pub use scheduler::{
    FSRSParameters, FSRSScheduler, FSRSState, LearningState, PreviewResults, Rating, ReviewResult,
};
