//! Redis-backed counter store.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use tracing::info;

use super::{CounterStore, LogAdmission, StoreError, StoreOp, StoreReply};
use crate::config::StoreConfig;

/// Counter store backed by a Redis server.
///
/// Atomicity is delegated to the server: single commands and Lua scripts
/// execute without interleaving, and batches run under MULTI/EXEC. The
/// connection manager reconnects transparently; every round-trip is
/// bounded by the configured operation timeout.
pub struct RedisCounterStore {
    conn: ConnectionManager,
    op_timeout: Duration,
    incr_script: Script,
    admit_script: Script,
}

impl RedisCounterStore {
    /// Connect to the store described by `config`.
    pub async fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let conn_manager_fut = ConnectionManager::new(client);
        let conn = tokio::time::timeout(config.connect_timeout(), conn_manager_fut)
            .await
            .map_err(|_| StoreError::Unavailable("connection timed out".to_string()))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        // INCR the key and start its expiry clock when the increment
        // creates it. One script execution, no interleaving.
        let incr_script = Script::new(
            r#"
            local count = redis.call('INCR', KEYS[1])
            if count == 1 then
                redis.call('PEXPIRE', KEYS[1], ARGV[1])
            end
            return count
            "#,
        );

        // Prune the log, then insert only if a slot remains. The branch
        // on the pruned cardinality is why this is a script and not a
        // MULTI/EXEC batch.
        let admit_script = Script::new(
            r#"
            redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
            local count = redis.call('ZCARD', KEYS[1])
            if count < tonumber(ARGV[3]) then
                redis.call('ZADD', KEYS[1], ARGV[2], ARGV[4])
                return {1, count + 1}
            end
            return {0, count}
            "#,
        );

        info!(url = %config.url, "Connected to Redis counter store");

        Ok(Self {
            conn,
            op_timeout: config.op_timeout(),
            incr_script,
            admit_script,
        })
    }

    /// Run one store round-trip under the operation timeout.
    async fn bounded<T>(
        &self,
        fut: impl Future<Output = redis::RedisResult<T>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(classify(e)),
            Err(_) => Err(StoreError::Unavailable(
                "store call timed out".to_string(),
            )),
        }
    }
}

/// Split transport failures (unknown fate, not retryable) from server-side
/// rejections of a command or batch (nothing applied, retryable).
fn classify(e: redis::RedisError) -> StoreError {
    if e.is_io_error()
        || e.is_timeout()
        || e.is_connection_refusal()
        || e.is_connection_dropped()
    {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::TransactionAborted(e.to_string())
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let ttl_ms = ttl.as_millis() as u64;
        let fut = async {
            let mut conn = self.conn.clone();
            self.incr_script
                .key(key)
                .arg(ttl_ms)
                .invoke_async(&mut conn)
                .await
        };
        self.bounded(fut).await
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let ttl_ms = ttl.as_millis() as u64;
        let fut = async {
            let mut conn = self.conn.clone();
            let mut cmd = redis::cmd("PEXPIRE");
            cmd.arg(key).arg(ttl_ms);
            cmd.query_async(&mut conn).await
        };
        let _applied: i64 = self.bounded(fut).await?;
        Ok(())
    }

    async fn get_integer(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let fut = async {
            let mut conn = self.conn.clone();
            let mut cmd = redis::cmd("GET");
            cmd.arg(key);
            cmd.query_async(&mut conn).await
        };
        self.bounded(fut).await
    }

    async fn transaction(&self, ops: &[StoreOp]) -> Result<Vec<StoreReply>, StoreError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            match op {
                StoreOp::RemoveRangeByScore { set, min, max } => {
                    pipe.cmd("ZREMRANGEBYSCORE").arg(set).arg(*min).arg(*max);
                }
                StoreOp::AddToSet { set, score, member } => {
                    pipe.cmd("ZADD").arg(set).arg(*score).arg(member);
                }
                StoreOp::CardinalityOf { set } => {
                    pipe.cmd("ZCARD").arg(set);
                }
            }
        }

        let fut = async {
            let mut conn = self.conn.clone();
            pipe.query_async(&mut conn).await
        };
        let values: Vec<u64> = self.bounded(fut).await?;

        if values.len() != ops.len() {
            return Err(StoreError::Corrupt(format!(
                "expected {} batch replies, got {}",
                ops.len(),
                values.len()
            )));
        }

        Ok(ops
            .iter()
            .zip(values)
            .map(|(op, value)| match op {
                StoreOp::RemoveRangeByScore { .. } => StoreReply::Removed(value),
                StoreOp::AddToSet { .. } => StoreReply::Added(value),
                StoreOp::CardinalityOf { .. } => StoreReply::Cardinality(value),
            })
            .collect())
    }

    async fn admit_log_entry(
        &self,
        set: &str,
        cutoff_ns: i64,
        score_ns: i64,
        member: &str,
        limit: u64,
    ) -> Result<LogAdmission, StoreError> {
        let fut = async {
            let mut conn = self.conn.clone();
            self.admit_script
                .key(set)
                .arg(cutoff_ns)
                .arg(score_ns)
                .arg(limit)
                .arg(member)
                .invoke_async(&mut conn)
                .await
        };
        let reply: Vec<u64> = self.bounded(fut).await?;

        match reply.as_slice() {
            [admitted, count] => Ok(LogAdmission {
                admitted: *admitted == 1,
                count: *count,
            }),
            other => Err(StoreError::Corrupt(format!(
                "admission script returned {} values, expected 2",
                other.len()
            ))),
        }
    }
}
