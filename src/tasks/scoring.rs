//! Score arithmetic: clamping, derived priority, staleness decay.

use chrono::{DateTime, Utc};

pub const SCORE_MIN: u8 = 0;
pub const SCORE_MAX: u8 = 100;

/// Decay never pushes a priority below this floor. A priority that already
/// starts under it stays where it is, so `decay(p, 0) == p` holds for every `p`.
pub const DECAY_FLOOR: u8 = 10;

/// One decay point per this many whole days since the last update.
pub const DAYS_PER_DECAY_POINT: i64 = 3;

const IMPACT_WEIGHT: f64 = 0.6;
const URGENCY_WEIGHT: f64 = 0.4;

/// Upper bounds of the frequency/corroboration priority bonus.
const MAX_MENTION_BONUS: u32 = 10;
const MAX_EVIDENCE_BONUS: u32 = 5;

/// Clamp `x` into `[min, max]`. Callers must pass `min <= max`.
pub fn clamp<T: PartialOrd>(x: T, min: T, max: T) -> T {
    if x < min {
        min
    } else if x > max {
        max
    } else {
        x
    }
}

/// Round and clamp an untrusted score into `[0, 100]`. NaN maps to 0.
pub fn clamp_score(raw: f64) -> u8 {
    if raw.is_nan() {
        return SCORE_MIN;
    }
    clamp(raw.round(), SCORE_MIN as f64, SCORE_MAX as f64) as u8
}

/// `round(impact*0.6 + urgency*0.4)` on clamped inputs.
pub fn weighted_priority(urgency: u8, impact: u8) -> u8 {
    clamp_score(impact as f64 * IMPACT_WEIGHT + urgency as f64 * URGENCY_WEIGHT)
}

/// Bonus for repeated mentions and corroborating evidence, bounded to 15.
pub fn frequency_bonus(mention_count: u32, evidence_count: usize) -> u8 {
    let mentions = mention_count.saturating_sub(1).saturating_mul(2).min(MAX_MENTION_BONUS);
    let evidence = (evidence_count.saturating_sub(1) as u32).min(MAX_EVIDENCE_BONUS);
    (mentions + evidence) as u8
}

/// Priority for a candidate that did not supply one.
pub fn derived_priority(urgency: u8, impact: u8, mention_count: u32, evidence_count: usize) -> u8 {
    let base = weighted_priority(urgency, impact) as u32;
    let bonus = frequency_bonus(mention_count, evidence_count) as u32;
    clamp(base + bonus, SCORE_MIN as u32, SCORE_MAX as u32) as u8
}

/// Whole days elapsed between `then` and `now`; zero if `then` is in the future.
pub fn days_between(then: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - then).num_days().max(0)
}

/// Staleness decay applied to an incoming priority on update.
///
/// Stores `max(10, priority - floor(days / 3))`. A priority already below the
/// floor is kept as is.
pub fn decay(priority: u8, days_since_update: i64) -> u8 {
    let decay_points = days_since_update.max(0) / DAYS_PER_DECAY_POINT;
    let floor = priority.min(DECAY_FLOOR) as i64;
    (priority as i64 - decay_points).max(floor) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_clamp_is_idempotent_and_bounded() {
        for x in [-50i64, 0, 5, 10, 500, 1000, 5000] {
            let once = clamp(x, 10, 1000);
            assert_eq!(clamp(once, 10, 1000), once);
            assert!((10..=1000).contains(&once));
        }
        assert_eq!(clamp_score(150.4), 100);
        assert_eq!(clamp_score(-3.0), 0);
        assert_eq!(clamp_score(49.5), 50);
        assert_eq!(clamp_score(f64::NAN), 0);
    }

    #[test]
    fn test_weighted_priority() {
        assert_eq!(weighted_priority(50, 100), 80);
        assert_eq!(weighted_priority(0, 0), 0);
        // 0.6*55 + 0.4*72 = 61.8
        assert_eq!(weighted_priority(72, 55), 62);
    }

    #[test]
    fn test_frequency_bonus_is_bounded() {
        assert_eq!(frequency_bonus(1, 1), 0);
        assert_eq!(frequency_bonus(0, 0), 0);
        assert_eq!(frequency_bonus(3, 2), 5);
        assert_eq!(frequency_bonus(100, 100), 15);
        assert_eq!(derived_priority(100, 100, 100, 100), 100);
    }

    #[test]
    fn test_decay_identity_at_zero_days() {
        for p in 0..=100u8 {
            assert_eq!(decay(p, 0), p);
        }
    }

    #[test]
    fn test_decay_matches_formula_and_is_non_increasing() {
        for p in DECAY_FLOOR..=100u8 {
            let mut previous = decay(p, 0);
            for days in 0..400i64 {
                let d = decay(p, days);
                assert_eq!(d as i64, (p as i64 - days / 3).max(10));
                assert!(d <= previous);
                previous = d;
            }
        }
        assert_eq!(decay(5, 30), 5);
    }

    #[test]
    fn test_decay_scenario() {
        let now = Utc::now();
        let days = days_between(now - Duration::days(10), now);
        assert_eq!(days, 10);
        assert_eq!(decay(90, days), 87);
        assert_eq!(decay(12, 300), 10);
    }

    #[test]
    fn test_days_between_truncates() {
        let now = Utc::now();
        assert_eq!(days_between(now - Duration::hours(71), now), 2);
        assert_eq!(days_between(now + Duration::days(2), now), 0);
    }
}
