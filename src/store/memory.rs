//! In-process counter store with the same semantics as the Redis adapter.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CounterStore, LogAdmission, StoreError, StoreOp, StoreReply};

struct Counter {
    value: u64,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct State {
    counters: HashMap<String, Counter>,
    /// Sorted sets as (score, member) pairs; BTreeSet ordering gives
    /// score order with member as tiebreaker, matching the store model.
    sets: HashMap<String, BTreeSet<(i64, String)>>,
}

impl State {
    /// Drop `key` if its TTL has passed, so expired counters are never
    /// observed. Expiry is lazy: nothing sweeps in the background.
    fn expire_counter(&mut self, key: &str, now: Instant) {
        if let Some(counter) = self.counters.get(key) {
            if counter.expires_at.is_some_and(|at| at <= now) {
                self.counters.remove(key);
            }
        }
    }

    fn apply(&mut self, op: &StoreOp) -> StoreReply {
        match op {
            StoreOp::RemoveRangeByScore { set, min, max } => {
                let entries = self.sets.entry(set.clone()).or_default();
                let before = entries.len();
                entries.retain(|(score, _)| score < min || score > max);
                StoreReply::Removed((before - entries.len()) as u64)
            }
            StoreOp::AddToSet { set, score, member } => {
                let entries = self.sets.entry(set.clone()).or_default();
                let existing = entries
                    .iter()
                    .find(|(_, m)| m == member)
                    .cloned();
                let added = match existing {
                    Some(old) => {
                        entries.remove(&old);
                        0
                    }
                    None => 1,
                };
                entries.insert((*score, member.clone()));
                StoreReply::Added(added)
            }
            StoreOp::CardinalityOf { set } => {
                StoreReply::Cardinality(self.sets.get(set).map_or(0, |s| s.len() as u64))
            }
        }
    }
}

/// Counter store held entirely in process memory.
///
/// Every trait method takes the single state lock for its whole duration,
/// so each operation is atomic with respect to concurrent in-process
/// callers, mirroring the isolation the Redis adapter gets from the
/// server. Limits enforced through this store are per-process, not
/// distributed; it exists for tests and single-node deployments.
#[derive(Default)]
pub struct MemoryCounterStore {
    state: Mutex<State>,
}

impl MemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.expire_counter(key, now);
        let counter = state.counters.entry(key.to_string()).or_insert(Counter {
            value: 0,
            expires_at: Some(now + ttl),
        });
        counter.value += 1;
        Ok(counter.value)
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.expire_counter(key, now);
        if let Some(counter) = state.counters.get_mut(key) {
            counter.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn get_integer(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.expire_counter(key, now);
        Ok(state.counters.get(key).map(|c| c.value))
    }

    async fn transaction(&self, ops: &[StoreOp]) -> Result<Vec<StoreReply>, StoreError> {
        let mut state = self.state.lock();
        Ok(ops.iter().map(|op| state.apply(op)).collect())
    }

    async fn admit_log_entry(
        &self,
        set: &str,
        cutoff_ns: i64,
        score_ns: i64,
        member: &str,
        limit: u64,
    ) -> Result<LogAdmission, StoreError> {
        let mut state = self.state.lock();
        let entries = state.sets.entry(set.to_string()).or_default();
        entries.retain(|(score, _)| *score > cutoff_ns);
        let count = entries.len() as u64;
        if count < limit {
            entries.insert((score_ns, member.to_string()));
            Ok(LogAdmission {
                admitted: true,
                count: count + 1,
            })
        } else {
            Ok(LogAdmission {
                admitted: false,
                count,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_increment_starts_at_one_per_key() {
        let store = MemoryCounterStore::new();
        let ttl = Duration::from_secs(60);

        assert_eq!(store.increment_with_expiry("a", ttl).await.unwrap(), 1);
        assert_eq!(store.increment_with_expiry("a", ttl).await.unwrap(), 2);
        assert_eq!(store.increment_with_expiry("b", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_counter_expires_after_ttl() {
        let store = MemoryCounterStore::new();
        let ttl = Duration::from_millis(50);

        store.increment_with_expiry("k", ttl).await.unwrap();
        assert_eq!(store.get_integer("k").await.unwrap(), Some(1));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(store.get_integer("k").await.unwrap(), None);

        // A fresh increment starts a new counter
        assert_eq!(store.increment_with_expiry("k", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_set_expiry_refreshes_ttl() {
        let store = MemoryCounterStore::new();

        store
            .increment_with_expiry("k", Duration::from_millis(40))
            .await
            .unwrap();
        store
            .set_expiry("k", Duration::from_millis(200))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(store.get_integer("k").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_transaction_prune_insert_count() {
        let store = MemoryCounterStore::new();

        let seed = [
            StoreOp::AddToSet {
                set: "log".to_string(),
                score: 10,
                member: "10:a".to_string(),
            },
            StoreOp::AddToSet {
                set: "log".to_string(),
                score: 20,
                member: "20:b".to_string(),
            },
            StoreOp::AddToSet {
                set: "log".to_string(),
                score: 30,
                member: "30:c".to_string(),
            },
        ];
        store.transaction(&seed).await.unwrap();

        let batch = [
            StoreOp::RemoveRangeByScore {
                set: "log".to_string(),
                min: 0,
                max: 15,
            },
            StoreOp::CardinalityOf {
                set: "log".to_string(),
            },
        ];
        let replies = store.transaction(&batch).await.unwrap();
        assert_eq!(
            replies,
            vec![StoreReply::Removed(1), StoreReply::Cardinality(2)]
        );
    }

    #[tokio::test]
    async fn test_add_to_set_deduplicates_members() {
        let store = MemoryCounterStore::new();

        let ops = [
            StoreOp::AddToSet {
                set: "log".to_string(),
                score: 10,
                member: "m".to_string(),
            },
            StoreOp::AddToSet {
                set: "log".to_string(),
                score: 20,
                member: "m".to_string(),
            },
            StoreOp::CardinalityOf {
                set: "log".to_string(),
            },
        ];
        let replies = store.transaction(&ops).await.unwrap();
        assert_eq!(
            replies,
            vec![
                StoreReply::Added(1),
                StoreReply::Added(0),
                StoreReply::Cardinality(1)
            ]
        );
    }

    #[tokio::test]
    async fn test_admit_log_entry_respects_limit_and_prunes() {
        let store = MemoryCounterStore::new();

        let first = store.admit_log_entry("log", 0, 100, "100:a", 2).await.unwrap();
        assert!(first.admitted);
        assert_eq!(first.count, 1);

        let second = store.admit_log_entry("log", 0, 200, "200:b", 2).await.unwrap();
        assert!(second.admitted);
        assert_eq!(second.count, 2);

        // Full: rejected entry leaves no trace
        let third = store.admit_log_entry("log", 0, 300, "300:c", 2).await.unwrap();
        assert!(!third.admitted);
        assert_eq!(third.count, 2);

        // Pruning the oldest entry frees a slot
        let fourth = store
            .admit_log_entry("log", 150, 400, "400:d", 2)
            .await
            .unwrap();
        assert!(fourth.admitted);
        assert_eq!(fourth.count, 2);
    }
}
