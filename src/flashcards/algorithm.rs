//! Spaced repetition scheduling
//!
//! A fixed, deliberately small SM-2 style policy with three ratings:
//! - again: lapse, relearn in ten minutes
//! - good: graduate to one day, then grow the interval by ease
//! - easy: graduate to three days, then grow by ease and a bonus
//!
//! Ease always stays within `EASE_MIN..=EASE_MAX`.

use chrono::{DateTime, TimeZone, Utc};

use super::models::{to_millis, Card, CardState, Rating};

pub const AGAIN_MINUTES: i64 = 10;
pub const GOOD_GRADUATION_DAYS: f64 = 1.0;
pub const EASY_GRADUATION_DAYS: f64 = 3.0;
pub const EASE_MIN: f64 = 1.3;
pub const EASE_MAX: f64 = 2.8;
pub const EASY_BONUS: f64 = 1.3;
pub const INITIAL_EASE: f64 = 2.3;
/// Longest interval a review can produce (about a century)
pub const MAX_INTERVAL_DAYS: f64 = 36_500.0;

const AGAIN_EASE_PENALTY: f64 = 0.2;
const GOOD_GRADUATION_EASE_BONUS: f64 = 0.05;
const GOOD_REVIEW_EASE_BONUS: f64 = 0.02;
const EASY_GRADUATION_EASE_BONUS: f64 = 0.15;
const EASY_REVIEW_EASE_BONUS: f64 = 0.10;

const MS_PER_MINUTE: f64 = 60_000.0;
const MS_PER_DAY: f64 = 86_400_000.0;

/// Result of scheduling a single review
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewResult {
    pub state: CardState,
    pub interval_days: f64,
    pub ease: f64,
    pub due_at: DateTime<Utc>,
}

/// `ts + offset_ms`, rounded to the nearest millisecond.
/// Saturates at the latest representable instant.
fn offset_rounded(ts: DateTime<Utc>, offset_ms: f64) -> DateTime<Utc> {
    let exact = ts.timestamp_micros() as f64 / 1000.0 + offset_ms;
    Utc.timestamp_millis_opt(exact.round() as i64)
        .single()
        .unwrap_or_else(latest_due)
}

/// Latest instant with whole-millisecond precision
fn latest_due() -> DateTime<Utc> {
    let max = DateTime::<Utc>::MAX_UTC;
    max - chrono::Duration::nanoseconds((max.timestamp_subsec_nanos() % 1_000_000) as i64)
}

fn raise_ease(ease: f64, delta: f64) -> f64 {
    (ease + delta).min(EASE_MAX)
}

/// Calculate the next review state for a card.
///
/// The review-branch interval uses the ease the card had *before* this
/// review. Out-of-range ease and interval read back from storage are
/// clamped first, and no interval exceeds `MAX_INTERVAL_DAYS`.
pub fn calculate_next_review(card: &Card, rating: Rating, now: DateTime<Utc>) -> ReviewResult {
    let ease = card.ease.clamp(EASE_MIN, EASE_MAX);
    let interval = if card.interval_days.is_nan() {
        0.0
    } else {
        card.interval_days.clamp(0.0, MAX_INTERVAL_DAYS)
    };
    let graduated = card.state == CardState::Review;

    match rating {
        Rating::Again => ReviewResult {
            state: CardState::Learning,
            interval_days: 0.0,
            ease: (ease - AGAIN_EASE_PENALTY).max(EASE_MIN),
            due_at: offset_rounded(now, AGAIN_MINUTES as f64 * MS_PER_MINUTE),
        },
        Rating::Good => {
            let (interval_days, ease) = if graduated {
                (
                    (interval * ease).clamp(1.0, MAX_INTERVAL_DAYS),
                    raise_ease(ease, GOOD_REVIEW_EASE_BONUS),
                )
            } else {
                (GOOD_GRADUATION_DAYS, raise_ease(ease, GOOD_GRADUATION_EASE_BONUS))
            };
            ReviewResult {
                state: CardState::Review,
                interval_days,
                ease,
                due_at: offset_rounded(now, interval_days * MS_PER_DAY),
            }
        }
        Rating::Easy => {
            let (interval_days, ease) = if graduated {
                (
                    (interval * ease * EASY_BONUS).clamp(1.0, MAX_INTERVAL_DAYS),
                    raise_ease(ease, EASY_REVIEW_EASE_BONUS),
                )
            } else {
                (EASY_GRADUATION_DAYS, raise_ease(ease, EASY_GRADUATION_EASE_BONUS))
            };
            ReviewResult {
                state: CardState::Review,
                interval_days,
                ease,
                due_at: offset_rounded(now, interval_days * MS_PER_DAY),
            }
        }
    }
}

/// Apply a rating to a card, returning the updated card
pub fn apply_review(card: &Card, rating: Rating, now: DateTime<Utc>) -> Card {
    let ReviewResult {
        state,
        interval_days,
        ease,
        due_at,
    } = calculate_next_review(card, rating, now);

    let mut next = card.clone();
    next.state = state;
    next.interval_days = interval_days;
    next.ease = ease;
    next.due_at = due_at;
    next.last_reviewed_at = Some(to_millis(now));
    match rating {
        Rating::Again => {
            next.reps = 0;
            next.lapses = card.lapses.saturating_add(1);
        }
        Rating::Good | Rating::Easy => {
            next.reps = card.reps.saturating_add(1);
        }
    }
    next
}

/// Time until due, in days, that each rating would produce.
/// Used to label the rating buttons: again, good, easy.
pub fn preview_intervals(card: &Card, now: DateTime<Utc>) -> [f64; 3] {
    Rating::ALL.map(|rating| {
        let due = calculate_next_review(card, rating, now).due_at;
        (due - now).num_milliseconds() as f64 / MS_PER_DAY
    })
}

/// Format an interval in days to a human-readable string
pub fn format_interval(days: f64) -> String {
    if days <= 0.0 {
        return "now".to_string();
    }
    let minutes = (days * 24.0 * 60.0).round() as i64;
    if minutes < 60 {
        return format!("{}m", minutes.max(1));
    }
    if days < 1.0 {
        return format!("{}h", (minutes as f64 / 60.0).round() as i64);
    }

    let days = days.round() as i64;
    if days < 7 {
        format!("{}d", days)
    } else if days < 30 {
        format!("{}w", days / 7)
    } else if days < 365 {
        format!("{}mo", days / 30)
    } else {
        format!("{}y", days / 365)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flashcards::models::DEFAULT_SUBJECT_ID;
    use std::path::PathBuf;
    use uuid::Uuid;

    const EPS: f64 = 1e-9;

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    fn new_card() -> Card {
        Card::new(Uuid::new_v4(), DEFAULT_SUBJECT_ID, PathBuf::from("card.png"), t0())
    }

    fn review_card(ease: f64, interval_days: f64) -> Card {
        let mut card = new_card();
        card.state = CardState::Review;
        card.ease = ease;
        card.interval_days = interval_days;
        card.reps = 3;
        card
    }

    #[test]
    fn test_new_card_good_graduates_to_one_day() {
        let now = t0();
        let next = apply_review(&new_card(), Rating::Good, now);

        assert_eq!(next.state, CardState::Review);
        assert_eq!(next.interval_days, 1.0);
        assert_eq!(next.due_at.timestamp_millis(), now.timestamp_millis() + 86_400_000);
        assert!((next.ease - 2.35).abs() < EPS);
        assert_eq!(next.reps, 1);
        assert_eq!(next.lapses, 0);
        assert_eq!(next.last_reviewed_at, Some(now));
    }

    #[test]
    fn test_review_card_again_relearns() {
        let now = t0();
        let mut card = review_card(2.3, 5.0);
        card.lapses = 2;

        let next = apply_review(&card, Rating::Again, now);

        assert_eq!(next.state, CardState::Learning);
        assert_eq!(next.interval_days, 0.0);
        assert_eq!(next.due_at.timestamp_millis(), now.timestamp_millis() + 600_000);
        assert!((next.ease - 2.1).abs() < EPS);
        assert_eq!(next.reps, 0);
        assert_eq!(next.lapses, 3);
    }

    #[test]
    fn test_review_card_easy_uses_bonus() {
        let now = t0();
        let next = apply_review(&review_card(2.5, 2.0), Rating::Easy, now);

        assert!((next.interval_days - 6.5).abs() < EPS);
        assert_eq!(
            next.due_at.timestamp_millis(),
            now.timestamp_millis() + (6.5 * 86_400_000.0) as i64
        );
        assert!((next.ease - 2.6).abs() < EPS);
        assert_eq!(next.reps, 4);
    }

    #[test]
    fn test_review_card_good_multiplies_by_ease() {
        let next = apply_review(&review_card(2.0, 4.0), Rating::Good, t0());
        assert!((next.interval_days - 8.0).abs() < EPS);
        assert!((next.ease - 2.02).abs() < EPS);
    }

    #[test]
    fn test_review_interval_never_below_one_day() {
        let next = apply_review(&review_card(1.3, 0.0), Rating::Good, t0());
        assert_eq!(next.interval_days, 1.0);

        let next = apply_review(&review_card(1.3, 0.1), Rating::Easy, t0());
        assert_eq!(next.interval_days, 1.0);
    }

    #[test]
    fn test_learning_card_easy_graduates_to_three_days() {
        let mut card = new_card();
        card.state = CardState::Learning;
        card.ease = 2.1;

        let next = apply_review(&card, Rating::Easy, t0());
        assert_eq!(next.state, CardState::Review);
        assert_eq!(next.interval_days, 3.0);
        assert!((next.ease - 2.25).abs() < EPS);
    }

    #[test]
    fn test_ease_is_clipped_at_max() {
        let next = apply_review(&review_card(2.75, 10.0), Rating::Easy, t0());
        assert_eq!(next.ease, EASE_MAX);

        let next = apply_review(&review_card(EASE_MAX, 10.0), Rating::Good, t0());
        assert_eq!(next.ease, EASE_MAX);
    }

    #[test]
    fn test_ease_bounds_hold_for_any_sequence() {
        let mut card = new_card();
        let mut now = t0();
        // Deterministic pseudo-random walk over ratings
        let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;
        for _ in 0..200 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let rating = Rating::ALL[(seed % 3) as usize];
            let prev_due = card.due_at;

            card = apply_review(&card, rating, now);

            assert!(card.ease >= EASE_MIN - EPS && card.ease <= EASE_MAX + EPS);
            assert!(card.interval_days >= 0.0);
            assert!(card.due_at > now);
            if rating != Rating::Again && now >= prev_due {
                assert!(card.due_at >= prev_due);
            }
            now = card.due_at;
        }
    }

    #[test]
    fn test_huge_interval_is_capped_and_stays_in_the_future() {
        let now = t0();
        let mut card = review_card(EASE_MAX, 1e8);
        card.due_at = now + chrono::Duration::days(100);
        let prev_due = card.due_at;

        for rating in [Rating::Good, Rating::Easy] {
            let next = apply_review(&card, rating, now);
            assert_eq!(next.interval_days, MAX_INTERVAL_DAYS);
            assert!(next.due_at > now);
            assert!(next.due_at >= prev_due);
            assert_eq!(
                next.due_at.timestamp_millis(),
                now.timestamp_millis() + (MAX_INTERVAL_DAYS * 86_400_000.0) as i64
            );
        }

        card.interval_days = f64::INFINITY;
        let next = apply_review(&card, Rating::Easy, now);
        assert_eq!(next.interval_days, MAX_INTERVAL_DAYS);
        assert!(next.due_at > now);
    }

    #[test]
    fn test_due_at_saturates_instead_of_wrapping_to_now() {
        let now = t0();
        let due = offset_rounded(now, f64::MAX);
        assert_eq!(due, latest_due());
        assert!(due > now);
        assert_eq!(due.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn test_repeated_easy_grades_keep_moving_due_forward() {
        let mut card = new_card();
        let mut now = t0();
        for _ in 0..40 {
            let prev_due = card.due_at;
            card = apply_review(&card, Rating::Easy, now);
            assert!(card.due_at > now);
            assert!(card.due_at >= prev_due);
            assert!(card.interval_days <= MAX_INTERVAL_DAYS);
            now = card.due_at;
        }
        assert_eq!(card.interval_days, MAX_INTERVAL_DAYS);
    }

    #[test]
    fn test_last_reviewed_at_is_truncated_to_millis() {
        let now = Utc.timestamp_nanos(1_700_000_000_000_600_000);
        let next = apply_review(&new_card(), Rating::Good, now);
        assert_eq!(
            next.last_reviewed_at.unwrap().timestamp_millis(),
            1_700_000_000_000
        );
        assert_eq!(next.last_reviewed_at.unwrap().timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn test_again_never_drops_ease_below_min() {
        let mut card = review_card(1.4, 10.0);
        for _ in 0..5 {
            card = apply_review(&card, Rating::Again, t0());
            assert!(card.ease >= EASE_MIN);
        }
        assert_eq!(card.ease, EASE_MIN);
        assert_eq!(card.lapses, 5);
    }

    #[test]
    fn test_due_at_rounded_to_nearest_millisecond() {
        let now = Utc.timestamp_nanos(1_700_000_000_000_600_000);
        let next = apply_review(&new_card(), Rating::Again, now);
        assert_eq!(next.due_at.timestamp_millis(), 1_700_000_000_001 + 600_000);
        assert_eq!(next.due_at.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn test_preview_intervals() {
        let [again, good, easy] = preview_intervals(&new_card(), t0());
        assert!((again - 10.0 / 1440.0).abs() < 1e-6);
        assert_eq!(good, 1.0);
        assert_eq!(easy, 3.0);
    }

    #[test]
    fn test_format_interval() {
        assert_eq!(format_interval(0.0), "now");
        assert_eq!(format_interval(10.0 / 1440.0), "10m");
        assert_eq!(format_interval(0.25), "6h");
        assert_eq!(format_interval(1.0), "1d");
        assert_eq!(format_interval(3.0), "3d");
        assert_eq!(format_interval(6.5), "1w");
        assert_eq!(format_interval(14.0), "2w");
        assert_eq!(format_interval(90.0), "3mo");
        assert_eq!(format_interval(730.0), "2y");
    }
}
