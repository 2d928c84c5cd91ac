//! Priority scoring for wanted items
//!
//! Three bounded sub-scores (recency ≤ 40, attempts ≤ 30, staleness ≤ 30)
//! are weighted per strategy and normalized to 0-100.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::db::{LibraryItemRecord, SearchStrategy};
use crate::services::media::WantedItem;

const MAX_RECENCY: f64 = 40.0;
const MAX_ATTEMPTS: f64 = 30.0;
const MAX_STALENESS: f64 = 30.0;

/// Hours after which an item counts as fully stale
const STALE_AFTER_HOURS: f64 = 168.0;

pub const REASON_RECENT: &str = "recently released";
pub const REASON_FEW_SEARCHES: &str = "few previous searches";
pub const REASON_STALE: &str = "not searched recently";

/// Score in `0..=100` plus the label of its dominant factor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorityScore {
    pub score: f64,
    pub reason: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Weights {
    recency: f64,
    attempts: f64,
    staleness: f64,
}

fn weights_for(strategy: SearchStrategy) -> Weights {
    match strategy {
        SearchStrategy::Missing => Weights {
            recency: 1.0,
            attempts: 1.5,
            staleness: 1.0,
        },
        SearchStrategy::CutoffUnmet => Weights {
            recency: 0.5,
            attempts: 1.0,
            staleness: 2.0,
        },
        SearchStrategy::Recent => Weights {
            recency: 2.0,
            attempts: 0.5,
            staleness: 0.5,
        },
        SearchStrategy::Custom => Weights {
            recency: 1.0,
            attempts: 1.0,
            staleness: 1.0,
        },
    }
}

pub fn compute_score(
    record: Option<&LibraryItemRecord>,
    item: &WantedItem,
    strategy: SearchStrategy,
) -> PriorityScore {
    compute_score_at(record, item, strategy, Utc::now())
}

/// [`compute_score`] evaluated at a fixed instant
pub fn compute_score_at(
    record: Option<&LibraryItemRecord>,
    item: &WantedItem,
    strategy: SearchStrategy,
    now: DateTime<Utc>,
) -> PriorityScore {
    let w = weights_for(strategy);

    let recency = w.recency * recency_score(item.released_at(), now);
    let attempts = w.attempts * attempts_score(record);
    let staleness = w.staleness * staleness_score(record, now);

    let max = MAX_RECENCY * w.recency + MAX_ATTEMPTS * w.attempts + MAX_STALENESS * w.staleness;
    let raw = (recency + attempts + staleness) / max * 100.0;
    let score = ((raw * 10.0).round() / 10.0).clamp(0.0, 100.0);

    // Ties resolve in declaration order
    let mut reason = REASON_RECENT;
    let mut best = recency;
    if attempts > best {
        reason = REASON_FEW_SEARCHES;
        best = attempts;
    }
    if staleness > best {
        reason = REASON_STALE;
    }

    PriorityScore { score, reason }
}

fn recency_score(released_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(released_at) = released_at else {
        return 20.0;
    };
    if released_at > now {
        return 5.0;
    }

    let age = now - released_at;
    if age <= Duration::days(1) {
        40.0
    } else if age <= Duration::days(7) {
        35.0
    } else if age <= Duration::days(30) {
        28.0
    } else if age <= Duration::days(90) {
        20.0
    } else if age <= Duration::days(365) {
        12.0
    } else {
        5.0
    }
}

fn attempts_score(record: Option<&LibraryItemRecord>) -> f64 {
    match record {
        Some(r) => (MAX_ATTEMPTS - 5.0 * r.search_attempts as f64).clamp(0.0, MAX_ATTEMPTS),
        None => MAX_ATTEMPTS,
    }
}

fn staleness_score(record: Option<&LibraryItemRecord>, now: DateTime<Utc>) -> f64 {
    let Some(last) = record.and_then(|r| r.last_searched_at) else {
        return MAX_STALENESS;
    };
    let hours = ((now - last).num_milliseconds() as f64 / 3_600_000.0).max(0.0);
    MAX_STALENESS * (hours / STALE_AFTER_HOURS).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ContentType;

    fn item(content_date: Option<String>) -> WantedItem {
        WantedItem {
            id: 1,
            external_id: 1,
            content_type: ContentType::Series,
            title: "Show".into(),
            content_date,
            monitored: true,
        }
    }

    fn record(attempts: i64, last_searched_at: Option<DateTime<Utc>>) -> LibraryItemRecord {
        let now = Utc::now();
        LibraryItemRecord {
            id: 1,
            instance_id: 1,
            external_id: "1".into(),
            content_type: "series".into(),
            title: None,
            search_attempts: attempts,
            last_searched_at,
            grabs_confirmed: 0,
            last_grab_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_fresh_unsearched_item_scores_max() {
        let now = Utc::now();
        let it = item(Some((now - Duration::hours(3)).to_rfc3339()));
        for strategy in [
            SearchStrategy::Missing,
            SearchStrategy::CutoffUnmet,
            SearchStrategy::Recent,
            SearchStrategy::Custom,
        ] {
            assert_eq!(compute_score_at(None, &it, strategy, now).score, 100.0);
        }
    }

    #[test]
    fn test_missing_weights() {
        let now = Utc::now();
        // recency 20 (unknown), attempts 30-10=20, staleness 30*(84/168)=15
        let it = item(None);
        let r = record(2, Some(now - Duration::hours(84)));
        let result = compute_score_at(Some(&r), &it, SearchStrategy::Missing, now);
        // (20 + 1.5*20 + 15) / (40 + 45 + 30) * 100 = 65 / 115 * 100 = 56.52...
        assert_eq!(result.score, 56.5);
        assert_eq!(result.reason, REASON_FEW_SEARCHES);
    }

    #[test]
    fn test_sub_score_floors() {
        let now = Utc::now();
        let future = item(Some((now + Duration::days(10)).to_rfc3339()));
        let r = record(50, Some(now));
        let result = compute_score_at(Some(&r), &future, SearchStrategy::Custom, now);
        // 5 + 0 + 0 over 100
        assert_eq!(result.score, 5.0);
        assert_eq!(result.reason, REASON_RECENT);
    }

    #[test]
    fn test_reason_follows_weighting() {
        let now = Utc::now();
        let old = item(Some((now - Duration::days(400)).to_rfc3339()));
        let r = record(6, Some(now - Duration::days(30)));
        let result = compute_score_at(Some(&r), &old, SearchStrategy::CutoffUnmet, now);
        assert_eq!(result.reason, REASON_STALE);
    }

    #[test]
    fn test_ties_prefer_recency() {
        let now = Utc::now();
        // recency 20 (unknown date) vs attempts 20 vs staleness 0, equal weights
        let r = record(2, Some(now));
        let result = compute_score_at(Some(&r), &item(None), SearchStrategy::Custom, now);
        assert_eq!(result.reason, REASON_RECENT);
    }

    #[test]
    fn test_scores_rank_recent_content_higher_for_recent_strategy() {
        let now = Utc::now();
        let fresh = item(Some((now - Duration::days(2)).to_rfc3339()));
        let old = item(Some((now - Duration::days(500)).to_rfc3339()));
        let a = compute_score_at(None, &fresh, SearchStrategy::Recent, now);
        let b = compute_score_at(None, &old, SearchStrategy::Recent, now);
        assert!(a.score > b.score);
    }
}
