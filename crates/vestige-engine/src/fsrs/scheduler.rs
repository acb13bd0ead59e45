//! FSRS-6 scheduler
//!
//! Wraps the pure formulas in `algorithm` with the learning-state machine
//! and the configuration knobs (target retention, fuzz, sentiment boost).
//! The scheduler never mutates items: callers get back a fresh state plus
//! the scheduling outputs and decide what to persist.

use serde::{Deserialize, Serialize};

use super::algorithm::{
    apply_sentiment_boost, forgetting_factor, fuzz_interval, initial_difficulty_with_weights,
    initial_stability_with_weights, next_difficulty_with_weights, next_forget_stability_with_weights,
    next_interval_with_decay, next_recall_stability_with_weights, retrievability_with_decay,
    same_day_stability_with_weights, DEFAULT_RETENTION, FSRS6_WEIGHTS, MAX_STABILITY,
};

// ============================================================================
// RATING & LEARNING STATE
// ============================================================================

/// Review grade (1-4), matching the classic Again/Hard/Good/Easy scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    /// Complete failure to recall
    Again = 1,
    /// Recalled with serious difficulty
    Hard = 2,
    /// Recalled correctly
    Good = 3,
    /// Recalled effortlessly
    Easy = 4,
}

impl Rating {
    /// Numeric grade (1-4)
    pub fn grade(&self) -> u8 {
        *self as u8
    }

    /// Parse from a numeric grade; out-of-range values are clamped.
    pub fn from_grade(grade: u8) -> Self {
        match grade {
            0 | 1 => Rating::Again,
            2 => Rating::Hard,
            3 => Rating::Good,
            _ => Rating::Easy,
        }
    }
}

/// Where a card sits in the learning lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LearningState {
    /// Never reviewed
    #[default]
    New,
    /// In initial acquisition
    Learning,
    /// Graduated, on the long-term schedule
    Review,
    /// Lapsed out of Review, re-acquiring
    Relearning,
}

impl LearningState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LearningState::New => "new",
            LearningState::Learning => "learning",
            LearningState::Review => "review",
            LearningState::Relearning => "relearning",
        }
    }

    /// Parse from the stored string form. Unknown values map to New.
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "learning" => LearningState::Learning,
            "review" => LearningState::Review,
            "relearning" => LearningState::Relearning,
            _ => LearningState::New,
        }
    }
}

impl std::fmt::Display for LearningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// STATE & RESULTS
// ============================================================================

/// Scheduler-owned state for a single item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FSRSState {
    /// Memory stability in days
    pub stability: f64,
    /// Inherent difficulty (1 = easy, 10 = hard)
    pub difficulty: f64,
    /// Learning lifecycle state
    pub state: LearningState,
    /// Total reviews
    pub reps: i32,
    /// Total lapses
    pub lapses: i32,
}

/// Outcome of one review.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResult {
    /// Updated scheduler state
    pub state: FSRSState,
    /// Recall probability at review time, from the pre-review state
    pub retrievability: f64,
    /// Days until the next scheduled review
    pub interval_days: i64,
    /// True when grade 1 arrived while in Review or Relearning
    pub is_lapse: bool,
}

/// Per-grade preview of what a review would do.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResults {
    pub again: ReviewResult,
    pub hard: ReviewResult,
    pub good: ReviewResult,
    pub easy: ReviewResult,
}

// ============================================================================
// PARAMETERS
// ============================================================================

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FSRSParameters {
    /// The 21 FSRS-6 weights
    pub weights: [f64; 21],
    /// Target recall probability when scheduling the next review
    pub desired_retention: f64,
    /// Upper clamp on scheduled days
    pub maximum_interval: i64,
    /// Apply deterministic interval fuzz
    pub enable_fuzz: bool,
    /// Seed for the fuzz generator
    pub fuzz_seed: u32,
    /// Let emotional salience boost stability
    pub enable_sentiment_boost: bool,
    /// Maximum multiplier for the sentiment boost, in [1, 3]
    pub max_sentiment_boost: f64,
}

impl Default for FSRSParameters {
    fn default() -> Self {
        Self {
            weights: FSRS6_WEIGHTS,
            desired_retention: DEFAULT_RETENTION,
            maximum_interval: MAX_STABILITY as i64,
            enable_fuzz: false,
            fuzz_seed: 0x5eed_cafe,
            enable_sentiment_boost: true,
            max_sentiment_boost: 1.5,
        }
    }
}

// ============================================================================
// SCHEDULER
// ============================================================================

/// FSRS-6 scheduler. Pure: all methods take state in and hand state back.
#[derive(Debug, Clone, Default)]
pub struct FSRSScheduler {
    params: FSRSParameters,
}

impl FSRSScheduler {
    pub fn new(params: FSRSParameters) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &FSRSParameters {
        &self.params
    }

    /// Forgetting-curve decay in use (w20).
    pub fn decay(&self) -> f64 {
        self.params.weights[20]
    }

    /// State for a never-reviewed card. Seeded with the Good-grade initial
    /// values so the card has a sensible schedule before its first review.
    pub fn new_card(&self) -> FSRSState {
        FSRSState {
            stability: initial_stability_with_weights(3, &self.params.weights),
            difficulty: initial_difficulty_with_weights(3, &self.params.weights),
            state: LearningState::New,
            reps: 0,
            lapses: 0,
        }
    }

    /// Recall probability for a state after `elapsed_days`.
    pub fn retrievability(&self, state: &FSRSState, elapsed_days: f64) -> f64 {
        retrievability_with_decay(state.stability, elapsed_days, self.decay())
    }

    /// Apply one review.
    ///
    /// `elapsed_days` is the real time since the last review (0 for a brand
    /// new card). `sentiment` is an optional emotional-intensity signal in
    /// [0, 1] that boosts the resulting stability when enabled.
    pub fn review(
        &self,
        state: &FSRSState,
        rating: Rating,
        elapsed_days: f64,
        sentiment: Option<f64>,
    ) -> ReviewResult {
        let w = &self.params.weights;
        let grade = rating.grade();
        let elapsed_days = elapsed_days.max(0.0);

        let retrievability = self.retrievability(state, elapsed_days);

        let is_lapse = grade == 1
            && matches!(
                state.state,
                LearningState::Review | LearningState::Relearning
            );

        let same_day = elapsed_days < 1.0 && state.reps >= 1;

        let (stability, difficulty) = if state.state == LearningState::New {
            // First review establishes the grade-specific initial state
            (
                initial_stability_with_weights(grade, w),
                initial_difficulty_with_weights(grade, w),
            )
        } else if same_day {
            (
                same_day_stability_with_weights(state.stability, grade, w),
                next_difficulty_with_weights(state.difficulty, grade, w),
            )
        } else if grade == 1 {
            (
                next_forget_stability_with_weights(
                    state.difficulty,
                    state.stability,
                    retrievability,
                    w,
                ),
                next_difficulty_with_weights(state.difficulty, grade, w),
            )
        } else {
            (
                next_recall_stability_with_weights(
                    state.difficulty,
                    state.stability,
                    retrievability,
                    grade,
                    w,
                ),
                next_difficulty_with_weights(state.difficulty, grade, w),
            )
        };

        let stability = match sentiment {
            Some(intensity) if self.params.enable_sentiment_boost => {
                apply_sentiment_boost(stability, intensity, self.params.max_sentiment_boost)
            }
            _ => stability,
        };

        let next_state = self.transition(state.state, grade, same_day);

        let new_state = FSRSState {
            stability,
            difficulty,
            state: next_state,
            reps: state.reps + 1,
            lapses: state.lapses + if is_lapse { 1 } else { 0 },
        };

        let interval_days = self.schedule_interval(stability, new_state.reps);

        ReviewResult {
            state: new_state,
            retrievability,
            interval_days,
            is_lapse,
        }
    }

    /// Learning-state transition for one review.
    ///
    /// From New (and Learning), the grade decides between Learning (1-2)
    /// and Review (3-4). Grade 1 knocks a Review card into Relearning; any
    /// passing grade brings a Relearning card back to Review. Same-day
    /// reviews preserve the state, except that a New card always enters
    /// Learning.
    fn transition(&self, state: LearningState, grade: u8, same_day: bool) -> LearningState {
        if same_day {
            return if state == LearningState::New {
                LearningState::Learning
            } else {
                state
            };
        }
        match state {
            LearningState::New | LearningState::Learning => {
                if grade >= 3 {
                    LearningState::Review
                } else {
                    LearningState::Learning
                }
            }
            LearningState::Review => {
                if grade == 1 {
                    LearningState::Relearning
                } else {
                    LearningState::Review
                }
            }
            LearningState::Relearning => {
                if grade >= 2 {
                    LearningState::Review
                } else {
                    LearningState::Relearning
                }
            }
        }
    }

    /// Preview all four grades without committing any of them.
    pub fn preview(&self, state: &FSRSState, elapsed_days: f64) -> PreviewResults {
        PreviewResults {
            again: self.review(state, Rating::Again, elapsed_days, None),
            hard: self.review(state, Rating::Hard, elapsed_days, None),
            good: self.review(state, Rating::Good, elapsed_days, None),
            easy: self.review(state, Rating::Easy, elapsed_days, None),
        }
    }

    /// Days until the next review for a given stability, with the configured
    /// retention target, maximum interval, and optional fuzz applied.
    pub fn schedule_interval(&self, stability: f64, reps: i32) -> i64 {
        let base = next_interval_with_decay(stability, self.params.desired_retention, self.decay())
            .min(self.params.maximum_interval);

        if self.params.enable_fuzz {
            // Mix the review ordinal in so consecutive reviews fuzz
            // independently while staying reproducible per seed.
            let seed = self.params.fuzz_seed.wrapping_add(reps as u32);
            fuzz_interval(base, seed).min(self.params.maximum_interval)
        } else {
            base
        }
    }

    /// The forgetting-curve factor for the configured decay.
    pub fn factor(&self) -> f64 {
        forgetting_factor(self.decay())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> FSRSScheduler {
        FSRSScheduler::default()
    }

    #[test]
    fn test_new_card_defaults() {
        let card = scheduler().new_card();
        assert_eq!(card.state, LearningState::New);
        assert_eq!(card.reps, 0);
        assert_eq!(card.lapses, 0);
        assert!((card.stability - 2.3065).abs() < 1e-9);
    }

    #[test]
    fn test_fresh_item_good_grade() {
        let s = scheduler();
        let card = s.new_card();
        let result = s.review(&card, Rating::Good, 0.0, None);

        assert_eq!(result.state.state, LearningState::Review);
        assert_eq!(result.state.reps, 1);
        assert_eq!(result.state.lapses, 0);
        assert!(!result.is_lapse);
        assert!((result.state.stability - 2.3065).abs() < 1e-6);
        assert_eq!(result.interval_days, 2);
        assert!((result.retrievability - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_fresh_item_again_goes_to_learning() {
        let s = scheduler();
        let result = s.review(&s.new_card(), Rating::Again, 0.0, None);
        assert_eq!(result.state.state, LearningState::Learning);
        // Grade 1 on a New card is not a lapse
        assert!(!result.is_lapse);
        assert_eq!(result.state.lapses, 0);
    }

    #[test]
    fn test_lapse_preserves_memory() {
        let s = scheduler();
        let state = FSRSState {
            stability: 100.0,
            difficulty: 5.0,
            state: LearningState::Review,
            reps: 10,
            lapses: 0,
        };
        let result = s.review(&state, Rating::Again, 100.0, None);

        assert_eq!(result.state.state, LearningState::Relearning);
        assert_eq!(result.state.lapses, 1);
        assert!(result.is_lapse);
        assert!(result.state.stability > 0.1);
        assert!(result.state.stability <= 100.0);
    }

    #[test]
    fn test_relearning_recovers_to_review() {
        let s = scheduler();
        let state = FSRSState {
            stability: 3.0,
            difficulty: 6.0,
            state: LearningState::Relearning,
            reps: 11,
            lapses: 1,
        };
        for rating in [Rating::Hard, Rating::Good, Rating::Easy] {
            let result = s.review(&state, rating, 2.0, None);
            assert_eq!(result.state.state, LearningState::Review);
            assert!(!result.is_lapse);
        }
    }

    #[test]
    fn test_same_day_second_review() {
        let s = scheduler();
        let first = s.review(&s.new_card(), Rating::Good, 0.0, None);
        let second = s.review(&first.state, Rating::Good, 0.5, None);

        assert_eq!(second.state.reps, 2);
        // Same-day formula applied: stability moved
        assert!((second.state.stability - first.state.stability).abs() > 1e-6);
        // Same-day reviews preserve state
        assert_eq!(second.state.state, LearningState::Review);
    }

    #[test]
    fn test_review_bounds_hold() {
        let s = scheduler();
        let mut state = s.new_card();
        // Torture the card with a mixed review history
        let grades = [3, 1, 2, 4, 3, 1, 1, 4, 3, 2];
        for (i, g) in grades.iter().enumerate() {
            let elapsed = (i % 5) as f64 * 3.0;
            let result = s.review(&state, Rating::from_grade(*g), elapsed, None);
            assert!((1.0..=10.0).contains(&result.state.difficulty));
            assert!((0.1..=36500.0).contains(&result.state.stability));
            assert!((0.0..=1.0).contains(&result.retrievability));
            state = result.state;
        }
        assert_eq!(state.reps, grades.len() as i32);
    }

    #[test]
    fn test_reps_increment_every_review() {
        let s = scheduler();
        let mut state = s.new_card();
        for i in 1..=5 {
            state = s.review(&state, Rating::Good, 2.0, None).state;
            assert_eq!(state.reps, i);
        }
    }

    #[test]
    fn test_maximum_interval_clamp() {
        let params = FSRSParameters {
            maximum_interval: 30,
            ..Default::default()
        };
        let s = FSRSScheduler::new(params);
        let state = FSRSState {
            stability: 10_000.0,
            difficulty: 2.0,
            state: LearningState::Review,
            reps: 50,
            lapses: 0,
        };
        let result = s.review(&state, Rating::Easy, 10.0, None);
        assert!(result.interval_days <= 30);
    }

    #[test]
    fn test_sentiment_boost_applied_on_review() {
        let s = scheduler();
        let card = s.new_card();
        let plain = s.review(&card, Rating::Good, 0.0, None);
        let boosted = s.review(&card, Rating::Good, 0.0, Some(1.0));
        assert!(boosted.state.stability > plain.state.stability);

        // Intensity 0 is the identity
        let zero = s.review(&card, Rating::Good, 0.0, Some(0.0));
        assert!((zero.state.stability - plain.state.stability).abs() < 1e-9);
    }

    #[test]
    fn test_fuzz_determinism_across_schedulers() {
        let params = FSRSParameters {
            enable_fuzz: true,
            fuzz_seed: 7,
            ..Default::default()
        };
        let a = FSRSScheduler::new(params.clone());
        let b = FSRSScheduler::new(params);
        let state = FSRSState {
            stability: 50.0,
            difficulty: 5.0,
            state: LearningState::Review,
            reps: 4,
            lapses: 0,
        };
        let ra = a.review(&state, Rating::Good, 40.0, None);
        let rb = b.review(&state, Rating::Good, 40.0, None);
        assert_eq!(ra.interval_days, rb.interval_days);
    }

    #[test]
    fn test_preview_covers_all_grades() {
        let s = scheduler();
        let state = FSRSState {
            stability: 10.0,
            difficulty: 5.0,
            state: LearningState::Review,
            reps: 3,
            lapses: 0,
        };
        let preview = s.preview(&state, 10.0);
        assert!(preview.again.state.stability <= state.stability);
        assert!(preview.easy.interval_days >= preview.good.interval_days);
        assert!(preview.good.interval_days >= preview.hard.interval_days);
    }

    #[test]
    fn test_state_roundtrip_serde() {
        let state = FSRSState {
            stability: 12.34,
            difficulty: 6.7,
            state: LearningState::Relearning,
            reps: 9,
            lapses: 2,
        };
        let json = serde_json::to_string(&state).unwrap();
        let back: FSRSState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
    }
}
