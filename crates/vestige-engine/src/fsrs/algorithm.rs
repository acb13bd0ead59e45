//! FSRS-6 core formulas
//!
//! Pure functions over scheduler state. Nothing in this module performs I/O
//! or reads clocks; every input is an argument and every output is a return
//! value, which is what makes the scheduler testable to tight tolerances.
//!
//! Reference: https://github.com/open-spaced-repetition/fsrs4anki

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default FSRS-6 weights (21 parameters, w0..w20).
///
/// w0..w3 are the initial stabilities for Again/Hard/Good/Easy.
/// w20 is the personalizable forgetting-curve decay.
pub const FSRS6_WEIGHTS: [f64; 21] = [
    0.212, 1.2931, 2.3065, 8.2956, 6.4133, 0.8334, 3.0194, 0.001, 1.8722, 0.1666, 0.796, 1.4835,
    0.0614, 0.2629, 1.6483, 0.6014, 1.8729, 0.5425, 0.0912, 0.0658, 0.1542,
];

/// Default forgetting-curve decay (= w20)
pub const DEFAULT_DECAY: f64 = 0.1542;

/// Default target retention used when computing the next interval
pub const DEFAULT_RETENTION: f64 = 0.9;

/// Lower bound on stability (days)
pub const MIN_STABILITY: f64 = 0.1;

/// Upper bound on stability (100 years, days)
pub const MAX_STABILITY: f64 = 36500.0;

/// Lower bound on difficulty
pub const MIN_DIFFICULTY: f64 = 1.0;

/// Upper bound on difficulty
pub const MAX_DIFFICULTY: f64 = 10.0;

/// Forgetting-curve factor for a given decay: `0.9^(-1/decay) - 1`.
///
/// Chosen so that R(S, S) = 0.9 for any decay.
#[inline]
pub fn forgetting_factor(decay: f64) -> f64 {
    0.9_f64.powf(-1.0 / decay) - 1.0
}

// ============================================================================
// INITIAL STATE
// ============================================================================

/// Initial stability for the first rating of a card: `max(0.1, w[grade-1])`.
pub fn initial_stability_with_weights(grade: u8, weights: &[f64; 21]) -> f64 {
    let idx = (grade.clamp(1, 4) - 1) as usize;
    weights[idx].max(MIN_STABILITY)
}

/// Initial stability with the default weights.
pub fn initial_stability(grade: u8) -> f64 {
    initial_stability_with_weights(grade, &FSRS6_WEIGHTS)
}

/// Initial difficulty for the first rating: `clamp(w4 - e^(w5*(G-1)) + 1, 1, 10)`.
pub fn initial_difficulty_with_weights(grade: u8, weights: &[f64; 21]) -> f64 {
    let g = grade.clamp(1, 4) as f64;
    (weights[4] - (weights[5] * (g - 1.0)).exp() + 1.0).clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
}

/// Initial difficulty with the default weights.
pub fn initial_difficulty(grade: u8) -> f64 {
    initial_difficulty_with_weights(grade, &FSRS6_WEIGHTS)
}

// ============================================================================
// RETRIEVABILITY
// ============================================================================

/// Probability of recall after `elapsed_days` given `stability`, with an
/// explicit decay parameter.
///
/// `R(S, 0) = 1`, `R(S <= 0, t) = 0`, output clamped to [0, 1].
pub fn retrievability_with_decay(stability: f64, elapsed_days: f64, decay: f64) -> f64 {
    if stability <= 0.0 {
        return 0.0;
    }
    if elapsed_days <= 0.0 {
        return 1.0;
    }
    let factor = forgetting_factor(decay);
    (1.0 + factor * elapsed_days / stability)
        .powf(-decay)
        .clamp(0.0, 1.0)
}

/// Probability of recall with the default decay.
pub fn retrievability(stability: f64, elapsed_days: f64) -> f64 {
    retrievability_with_decay(stability, elapsed_days, DEFAULT_DECAY)
}

// ============================================================================
// INTERVALS
// ============================================================================

/// Days until retrievability drops to `desired_retention`, rounded to the
/// nearest whole day.
///
/// Inverse of the forgetting curve: `t = (S/factor) * (R^(-1/decay) - 1)`.
/// `desired >= 1` yields 0 (review immediately), `desired <= 0` yields the
/// maximum representable interval.
pub fn next_interval_with_decay(stability: f64, desired_retention: f64, decay: f64) -> i64 {
    if desired_retention >= 1.0 {
        return 0;
    }
    if desired_retention <= 0.0 {
        return MAX_STABILITY as i64;
    }
    let factor = forgetting_factor(decay);
    let interval = (stability / factor) * (desired_retention.powf(-1.0 / decay) - 1.0);
    (interval.round() as i64).clamp(0, MAX_STABILITY as i64)
}

/// Next interval with the default decay.
pub fn next_interval(stability: f64, desired_retention: f64) -> i64 {
    next_interval_with_decay(stability, desired_retention, DEFAULT_DECAY)
}

// ============================================================================
// DIFFICULTY UPDATE
// ============================================================================

/// Difficulty after a review, with mean reversion toward `D0(Easy)`.
///
/// `delta = -w6*(G-3)`, `D_new = D + delta*(10-D)/9`,
/// `D' = clamp(w7*D0(Easy) + (1-w7)*D_new, 1, 10)`.
pub fn next_difficulty_with_weights(difficulty: f64, grade: u8, weights: &[f64; 21]) -> f64 {
    let g = grade.clamp(1, 4) as f64;
    let delta = -weights[6] * (g - 3.0);
    let d_new = difficulty + delta * (10.0 - difficulty) / 9.0;
    let d0_easy = initial_difficulty_with_weights(4, weights);
    (weights[7] * d0_easy + (1.0 - weights[7]) * d_new).clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
}

/// Difficulty update with the default weights.
pub fn next_difficulty(difficulty: f64, grade: u8) -> f64 {
    next_difficulty_with_weights(difficulty, grade, &FSRS6_WEIGHTS)
}

// ============================================================================
// STABILITY UPDATE
// ============================================================================

/// Stability after a successful review (grades 2-4).
///
/// Hard applies the `w15` penalty, Easy the `w16` bonus.
pub fn next_recall_stability_with_weights(
    difficulty: f64,
    stability: f64,
    retrievability: f64,
    grade: u8,
    weights: &[f64; 21],
) -> f64 {
    let hard_penalty = if grade == 2 { weights[15] } else { 1.0 };
    let easy_bonus = if grade == 4 { weights[16] } else { 1.0 };

    let growth = weights[8].exp()
        * (11.0 - difficulty)
        * stability.powf(-weights[9])
        * ((weights[10] * (1.0 - retrievability)).exp() - 1.0)
        * hard_penalty
        * easy_bonus;

    (stability * (growth + 1.0)).clamp(MIN_STABILITY, MAX_STABILITY)
}

/// Recall stability with the default weights.
pub fn next_recall_stability(difficulty: f64, stability: f64, retrievability: f64, grade: u8) -> f64 {
    next_recall_stability_with_weights(difficulty, stability, retrievability, grade, &FSRS6_WEIGHTS)
}

/// Stability after a lapse (grade 1). Post-lapse stability never exceeds
/// pre-lapse stability.
pub fn next_forget_stability_with_weights(
    difficulty: f64,
    stability: f64,
    retrievability: f64,
    weights: &[f64; 21],
) -> f64 {
    let forget = weights[11]
        * difficulty.powf(-weights[12])
        * ((stability + 1.0).powf(weights[13]) - 1.0)
        * (weights[14] * (1.0 - retrievability)).exp();

    forget.min(stability).clamp(MIN_STABILITY, MAX_STABILITY)
}

/// Forget stability with the default weights.
pub fn next_forget_stability(difficulty: f64, stability: f64, retrievability: f64) -> f64 {
    next_forget_stability_with_weights(difficulty, stability, retrievability, &FSRS6_WEIGHTS)
}

/// Stability after a same-day review (elapsed < 1 day, reps >= 1).
///
/// `S' = S * e^(w17*(G-3+w18)) * S^(-w19)`.
pub fn same_day_stability_with_weights(stability: f64, grade: u8, weights: &[f64; 21]) -> f64 {
    let g = grade.clamp(1, 4) as f64;
    (stability * (weights[17] * (g - 3.0 + weights[18])).exp() * stability.powf(-weights[19]))
        .clamp(MIN_STABILITY, MAX_STABILITY)
}

/// Same-day stability with the default weights.
pub fn same_day_stability(stability: f64, grade: u8) -> f64 {
    same_day_stability_with_weights(stability, grade, &FSRS6_WEIGHTS)
}

// ============================================================================
// MODIFIERS
// ============================================================================

/// Emotional salience boost: `S' = S * (1 + (maxBoost-1) * clamp(intensity, 0, 1))`.
///
/// `max_boost` is clamped to [1, 3]. Identity at intensity 0, monotone
/// non-decreasing in intensity.
pub fn apply_sentiment_boost(stability: f64, intensity: f64, max_boost: f64) -> f64 {
    let max_boost = max_boost.clamp(1.0, 3.0);
    let intensity = intensity.clamp(0.0, 1.0);
    (stability * (1.0 + (max_boost - 1.0) * intensity)).clamp(MIN_STABILITY, MAX_STABILITY)
}

/// Deterministic interval fuzz.
///
/// Intervals of 2 days or less are returned unchanged. Longer intervals get
/// a pseudorandom offset within `±max(1, floor(0.05 * t))`, derived from a
/// 32-bit LCG so the same seed always yields the same offset.
pub fn fuzz_interval(interval: i64, seed: u32) -> i64 {
    if interval <= 2 {
        return interval;
    }
    let range = ((interval as f64 * 0.05).floor() as i64).max(1);
    // Numerical Recipes LCG constants
    let next = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
    let span = (2 * range + 1) as u32;
    let offset = (next % span) as i64 - range;
    (interval + offset).max(1)
}

// ============================================================================
// TESTS
// ============================================================================
