//! SM-2 review scheduling.
//!
//! Pure state transitions only; persistence lives in `db`. Quality is the
//! learner's self-rated recall, 0 (forgotten) to 5 (perfect). Out-of-range
//! values are clamped rather than rejected.

use chrono::{Days, NaiveDate};

/// Floor for the easiness factor. Keeps chronically hard verses from
/// collapsing the interval growth entirely.
pub const MIN_EASINESS: f64 = 1.3;

/// Starting easiness for a verse that has never been reviewed.
pub const INITIAL_EASINESS: f64 = 2.5;

/// The scheduling portion of a verse study: everything SM-2 reads and writes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sm2State {
    pub easiness_factor: f64,
    /// Days until the next review.
    pub interval: u32,
    /// Consecutive successful (quality >= 3) reviews.
    pub repetitions: u32,
    /// Display value 1 (very easy) to 5 (very hard), derived from the
    /// latest quality. Not used in the scheduling math.
    pub difficulty: u8,
    pub is_memorized: bool,
}

impl Sm2State {
    /// State for first-time study. This is a distinct "start" operation:
    /// the update formula does not run, and the verse is due immediately.
    pub fn new() -> Self {
        Self {
            easiness_factor: INITIAL_EASINESS,
            interval: 1,
            repetitions: 0,
            difficulty: 3,
            is_memorized: false,
        }
    }

    /// Applies one review with the given quality and returns the updated
    /// state. Quality outside [0, 5] is silently clamped.
    pub fn review(&self, quality: i32) -> Sm2State {
        let q = clamp_quality(quality);

        // EF' = EF + (0.1 - (5 - q) * (0.08 + (5 - q) * 0.02)), floored
        let shortfall = (5 - q) as f64;
        let easiness_factor = (self.easiness_factor + 0.1 - shortfall * (0.08 + shortfall * 0.02))
            .max(MIN_EASINESS);

        let (repetitions, interval) = if q < 3 {
            // Failed recall starts a new learning cycle.
            (0, 1)
        } else {
            let reps = self.repetitions + 1;
            let interval = match reps {
                1 => 1,
                2 => 6,
                _ => (self.interval as f64 * easiness_factor).round() as u32,
            };
            (reps, interval)
        };

        let difficulty = if q > 0 { (6 - q) as u8 } else { 5 };

        // Monotonic: once memorized, later lapses do not clear the flag.
        let is_memorized = self.is_memorized || (q >= 4 && repetitions >= 3);

        Sm2State {
            easiness_factor,
            interval,
            repetitions,
            difficulty,
            is_memorized,
        }
    }

    pub fn next_review_date(&self, today: NaiveDate) -> NaiveDate {
        today
            .checked_add_days(Days::new(self.interval as u64))
            .unwrap_or(today)
    }
}

impl Default for Sm2State {
    fn default() -> Self {
        Self::new()
    }
}

fn clamp_quality(quality: i32) -> i32 {
    quality.clamp(0, 5)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    mod easiness_tests {
        use super::*;

        #[test]
        fn perfect_recall_raises_easiness() {
            let next = Sm2State::new().review(5);
            assert!((next.easiness_factor - 2.6).abs() < 1e-9);
        }

        #[test]
        fn quality_four_keeps_easiness() {
            let next = Sm2State::new().review(4);
            assert!((next.easiness_factor - 2.5).abs() < 1e-9);
        }

        #[test]
        fn quality_three_lowers_easiness() {
            let next = Sm2State::new().review(3);
            assert!((next.easiness_factor - 2.36).abs() < 1e-9);
        }

        #[test]
        fn easiness_never_drops_below_floor() {
            for quality in 0..=5 {
                let mut state = Sm2State::new();
                for _ in 0..50 {
                    state = state.review(quality);
                    assert!(
                        state.easiness_factor >= MIN_EASINESS,
                        "quality {} drove ef to {}",
                        quality,
                        state.easiness_factor
                    );
                }
            }
        }

        #[test]
        fn repeated_failures_converge_to_floor() {
            let mut state = Sm2State::new();
            for _ in 0..10 {
                state = state.review(0);
            }
            assert!((state.easiness_factor - MIN_EASINESS).abs() < 1e-9);
        }
    }

    mod interval_tests {
        use super::*;

        #[test]
        fn first_success_sets_interval_one() {
            let next = Sm2State::new().review(5);
            assert_eq!(next.repetitions, 1);
            assert_eq!(next.interval, 1);
        }

        #[test]
        fn second_success_sets_interval_six() {
            let next = Sm2State::new().review(5).review(5);
            assert_eq!(next.repetitions, 2);
            assert_eq!(next.interval, 6);
        }

        #[test]
        fn third_success_multiplies_by_easiness() {
            let state = Sm2State {
                easiness_factor: 2.5,
                interval: 6,
                repetitions: 2,
                difficulty: 2,
                is_memorized: false,
            };
            let next = state.review(4);
            assert_eq!(next.repetitions, 3);
            // ef stays 2.5 at quality 4; round(6 * 2.5) = 15
            assert_eq!(next.interval, 15);
            assert!(next.is_memorized);
        }

        #[test]
        fn failure_resets_regardless_of_history() {
            let state = Sm2State {
                easiness_factor: 2.8,
                interval: 40,
                repetitions: 5,
                difficulty: 1,
                is_memorized: true,
            };
            for quality in 0..3 {
                let next = state.review(quality);
                assert_eq!(next.repetitions, 0);
                assert_eq!(next.interval, 1);
            }
        }

        #[test]
        fn intervals_grow_geometrically() {
            let mut state = Sm2State::new();
            let mut last_interval = 0;
            for _ in 0..6 {
                state = state.review(4);
                assert!(state.interval >= last_interval);
                last_interval = state.interval;
            }
            // 1, 6, 15, 38, 95, ... at ef 2.5
            assert!(state.interval > 90);
        }
    }

    mod difficulty_tests {
        use super::*;

        #[test]
        fn difficulty_is_inverse_of_quality() {
            assert_eq!(Sm2State::new().review(5).difficulty, 1);
            assert_eq!(Sm2State::new().review(4).difficulty, 2);
            assert_eq!(Sm2State::new().review(3).difficulty, 3);
            assert_eq!(Sm2State::new().review(2).difficulty, 4);
            assert_eq!(Sm2State::new().review(1).difficulty, 5);
        }

        #[test]
        fn zero_quality_maps_to_hardest() {
            assert_eq!(Sm2State::new().review(0).difficulty, 5);
        }
    }

    mod memorized_tests {
        use super::*;

        #[test]
        fn memorized_after_three_high_quality_reviews() {
            let state = Sm2State::new().review(4).review(4);
            assert!(!state.is_memorized);
            let state = state.review(4);
            assert!(state.is_memorized);
        }

        #[test]
        fn three_successes_at_quality_three_do_not_memorize() {
            let state = Sm2State::new().review(3).review(3).review(3).review(3);
            assert!(!state.is_memorized);
        }

        #[test]
        fn memorized_is_monotonic() {
            let mut state = Sm2State::new().review(5).review(5).review(5);
            assert!(state.is_memorized);
            for quality in [0, 1, 2, 3] {
                state = state.review(quality);
                assert!(state.is_memorized);
            }
        }

        #[test]
        fn failure_keeps_memorized_flag() {
            let state = Sm2State {
                easiness_factor: 2.5,
                interval: 40,
                repetitions: 5,
                difficulty: 1,
                is_memorized: true,
            };
            let next = state.review(1);
            assert_eq!(next.repetitions, 0);
            assert_eq!(next.interval, 1);
            assert!(next.is_memorized);
        }
    }

    mod clamp_tests {
        use super::*;

        #[test]
        fn negative_quality_behaves_like_zero() {
            let a = Sm2State::new().review(-7);
            let b = Sm2State::new().review(0);
            assert_eq!(a, b);
        }

        #[test]
        fn oversized_quality_behaves_like_five() {
            let a = Sm2State::new().review(42);
            let b = Sm2State::new().review(5);
            assert_eq!(a, b);
        }
    }

    mod date_tests {
        use super::*;

        #[test]
        fn next_review_adds_interval_days() {
            let state = Sm2State::new().review(5);
            assert_eq!(state.next_review_date(date(2025, 3, 10)), date(2025, 3, 11));
        }

        #[test]
        fn six_day_interval_crosses_month_boundary() {
            let state = Sm2State::new().review(5).review(5);
            assert_eq!(state.next_review_date(date(2025, 1, 28)), date(2025, 2, 3));
        }

        #[test]
        fn fresh_state_quality_five_scenario() {
            let today = date(2025, 6, 1);
            let next = Sm2State::new().review(5);
            assert!((next.easiness_factor - 2.6).abs() < 1e-9);
            assert_eq!(next.repetitions, 1);
            assert_eq!(next.interval, 1);
            assert_eq!(next.next_review_date(today), date(2025, 6, 2));
        }
    }
}
