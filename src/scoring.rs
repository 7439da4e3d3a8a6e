//! Point calculation for challenges
//!
//! Step `k` of a sequence is worth `MULTIPLIER^(k-1)`; the cumulative value
//! of a sequence of length `n` is scaled by two, giving `2 * (1.5^n - 1)`.
//!
//! - Gains grow with length and are multiplied by the difficulty bonus.
//! - Losses mirror the length (a short sequence risks what a long one would
//!   win), never drop under 10% of the largest possible gain, and are
//!   divided by the difficulty bonus.
//!
//! The same functions drive the preview shown when a challenge is built and
//! the settlement applied when the device reports an outcome, so both always
//! agree.

use serde::{Deserialize, Serialize};

use crate::model::{MAX_SEQUENCE_LENGTH, MIN_SEQUENCE_LENGTH};

/// Geometric growth factor per step
pub const MULTIPLIER: f64 = 1.5;

/// Floor for losses, as a fraction of the largest possible gain
pub const MIN_LOSS_FRACTION: f64 = 0.10;

/// Bonus added per difficulty level above 1
pub const DIFFICULTY_STEP: f64 = 0.10;

/// Stakes of a challenge before it is played
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PotentialPoints {
    /// Gained by the recipient on a perfect run
    pub points_to_win: i64,
    /// Lost by the recipient when no step is reproduced
    pub points_to_lose: i64,
}

/// Stakes seen from both sides of the duel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuelStakes {
    pub max_win: i64,
    pub max_lose: i64,
    pub challenger_max_win: i64,
    pub challenger_max_lose: i64,
}

impl PotentialPoints {
    /// Mirror the stakes for the challenger, whose gain is the recipient's loss
    pub fn for_both_sides(&self) -> DuelStakes {
        DuelStakes {
            max_win: self.points_to_win,
            max_lose: self.points_to_lose,
            challenger_max_win: self.points_to_lose,
            challenger_max_lose: self.points_to_win,
        }
    }
}

/// Settlement of a played challenge
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalPoints {
    /// Signed points for the recipient
    pub points: i64,
    /// Signed points for the challenger, always `-points`
    pub challenger_points: i64,
    /// Every step was reproduced
    pub success: bool,
    /// Fraction of the sequence reproduced
    pub ratio: f64,
}

/// Cumulative value of a sequence of `length` steps
pub fn calc_win(length: usize) -> f64 {
    2.0 * (MULTIPLIER.powi(length as i32) - 1.0)
}

/// 1.0 at difficulty 1 up to 1.9 at difficulty 10
pub fn difficulty_bonus(difficulty: u8) -> f64 {
    1.0 + (f64::from(difficulty) - 1.0) * DIFFICULTY_STEP
}

/// Round to the nearest integer, halves toward positive infinity
fn round_half_up(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}

/// Points at stake for a sequence of the given length and difficulty
pub fn potential_points(sequence_length: usize, difficulty: u8) -> PotentialPoints {
    let bonus = difficulty_bonus(difficulty);
    let base_win = calc_win(sequence_length);
    let points_to_win = round_half_up(base_win * bonus);

    let base_lose = if sequence_length >= MIN_SEQUENCE_LENGTH {
        let min_loss = calc_win(MAX_SEQUENCE_LENGTH) * MIN_LOSS_FRACTION;
        let mirror_length = (MIN_SEQUENCE_LENGTH + MAX_SEQUENCE_LENGTH).saturating_sub(sequence_length);
        min_loss.max(calc_win(mirror_length))
    } else {
        base_win
    };
    let points_to_lose = round_half_up(base_lose / bonus);

    PotentialPoints {
        points_to_win,
        points_to_lose,
    }
}

/// Linear interpolation between the full loss (nothing reproduced) and the
/// full gain (everything reproduced).
///
/// Callers guarantee `steps_completed <= total_steps`.
pub fn final_points(
    sequence_length: usize,
    difficulty: u8,
    steps_completed: u32,
    total_steps: u32,
) -> FinalPoints {
    let stakes = potential_points(sequence_length, difficulty);
    let ratio = if total_steps > 0 {
        f64::from(steps_completed) / f64::from(total_steps)
    } else {
        0.0
    };

    let span = (stakes.points_to_win + stakes.points_to_lose) as f64;
    let points = round_half_up(-(stakes.points_to_lose as f64) + span * ratio);

    FinalPoints {
        points,
        challenger_points: -points,
        success: steps_completed == total_steps,
        ratio,
    }
}
