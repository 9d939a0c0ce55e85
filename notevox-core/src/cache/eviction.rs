use chrono::{DateTime, Utc};

use crate::media::MediaKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    TtlExpired,
    OverSizeCap,
}

/// Per-entry metadata the planner needs; decoupled from the live index so
/// planning stays a pure function.
#[derive(Debug, Clone)]
pub struct CandidateEntry {
    pub key: MediaKey,
    pub size_bytes: u64,
    pub cached_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PlannedEviction {
    pub key: MediaKey,
    pub size_bytes: u64,
    pub reason: EvictionReason,
}

#[derive(Debug, Default)]
pub struct EvictionPlan {
    pub planned: Vec<PlannedEviction>,
    pub total_bytes_before: u64,
    pub total_bytes_after: u64,
}

/// Decide which entries to drop so that `total + required_bytes` fits under
/// `max_total_bytes`. TTL-expired entries go first; the remainder is evicted
/// in true LRU order (`last_accessed_at` ascending) until the deficit is
/// covered. A payload too large to ever fit still gets a plan that empties
/// the cache: the store is softly bounded and never refuses a write.
pub fn plan_evictions(
    mut entries: Vec<CandidateEntry>,
    now: DateTime<Utc>,
    ttl: chrono::Duration,
    max_total_bytes: u64,
    required_bytes: u64,
) -> EvictionPlan {
    let mut plan = EvictionPlan::default();

    let mut total_bytes: u64 = entries.iter().map(|e| e.size_bytes).sum();
    plan.total_bytes_before = total_bytes;

    // TTL eviction first.
    let mut kept: Vec<CandidateEntry> = Vec::with_capacity(entries.len());
    for e in entries.drain(..) {
        if now - e.cached_at > ttl {
            total_bytes = total_bytes.saturating_sub(e.size_bytes);
            plan.planned.push(PlannedEviction {
                key: e.key,
                size_bytes: e.size_bytes,
                reason: EvictionReason::TtlExpired,
            });
        } else {
            kept.push(e);
        }
    }

    // Size cap eviction next, LRU by last access.
    if total_bytes.saturating_add(required_bytes) > max_total_bytes {
        kept.sort_by_key(|e| e.last_accessed_at);
        for e in kept {
            if total_bytes.saturating_add(required_bytes) <= max_total_bytes {
                break;
            }
            total_bytes = total_bytes.saturating_sub(e.size_bytes);
            plan.planned.push(PlannedEviction {
                key: e.key,
                size_bytes: e.size_bytes,
                reason: EvictionReason::OverSizeCap,
            });
        }
    }

    plan.total_bytes_after = total_bytes;
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(key: i64, size: u64, age_secs: i64, idle_secs: i64, now: DateTime<Utc>) -> CandidateEntry {
        CandidateEntry {
            key: MediaKey(key),
            size_bytes: size,
            cached_at: now - Duration::seconds(age_secs),
            last_accessed_at: now - Duration::seconds(idle_secs),
        }
    }

    #[test]
    fn no_evictions_when_under_cap() {
        let now = Utc::now();
        let plan = plan_evictions(
            vec![entry(1, 100, 10, 10, now), entry(2, 100, 10, 5, now)],
            now,
            Duration::hours(24),
            1000,
            100,
        );
        assert!(plan.planned.is_empty());
        assert_eq!(plan.total_bytes_after, 200);
    }

    #[test]
    fn ttl_expired_entries_go_first() {
        let now = Utc::now();
        let plan = plan_evictions(
            vec![
                entry(1, 100, 90_000, 1, now), // expired despite recent access
                entry(2, 100, 10, 10, now),
            ],
            now,
            Duration::hours(24),
            1000,
            0,
        );
        assert_eq!(plan.planned.len(), 1);
        assert_eq!(plan.planned[0].key, MediaKey(1));
        assert_eq!(plan.planned[0].reason, EvictionReason::TtlExpired);
    }

    #[test]
    fn lru_order_decides_size_victims() {
        let now = Utc::now();
        // Key 3 was touched most recently; 1 is the coldest.
        let plan = plan_evictions(
            vec![
                entry(1, 400, 10, 300, now),
                entry(2, 400, 10, 200, now),
                entry(3, 400, 10, 100, now),
            ],
            now,
            Duration::hours(24),
            1000,
            300,
        );
        let evicted: Vec<_> = plan.planned.iter().map(|p| p.key).collect();
        assert_eq!(evicted, vec![MediaKey(1), MediaKey(2)]);
        assert_eq!(plan.total_bytes_after, 400);
    }

    #[test]
    fn stops_as_soon_as_deficit_is_covered() {
        let now = Utc::now();
        let plan = plan_evictions(
            vec![entry(1, 600, 10, 300, now), entry(2, 600, 10, 100, now)],
            now,
            Duration::hours(24),
            1000,
            100,
        );
        assert_eq!(plan.planned.len(), 1);
        assert_eq!(plan.planned[0].key, MediaKey(1));
    }

    #[test]
    fn oversized_payload_empties_cache_but_is_still_planned_for() {
        let now = Utc::now();
        let plan = plan_evictions(
            vec![entry(1, 100, 10, 10, now)],
            now,
            Duration::hours(24),
            1000,
            5000,
        );
        // Everything goes, even though the payload can never fit.
        assert_eq!(plan.planned.len(), 1);
        assert_eq!(plan.total_bytes_after, 0);
    }
}
