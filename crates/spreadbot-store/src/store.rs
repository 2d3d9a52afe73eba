//! Expiring key-value store.
//!
//! `MemoryStore` serves single-process runs and tests; `RedisStore` keeps
//! cooldowns and risk markers across restarts.

use crate::error::{StoreError, StoreResult};
use crate::key::StateKey;
use dashmap::DashMap;
use redis::aio::MultiplexedConnection;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Key-value store with per-key expiry.
pub trait StateStore: Send + Sync {
    fn get(&self, key: StateKey) -> BoxFuture<'_, StoreResult<Option<String>>>;

    /// Set `key`; `ttl == None` keeps it until deleted.
    fn set(&self, key: StateKey, value: String, ttl: Option<Duration>) -> BoxFuture<'_, StoreResult<()>>;

    /// Set only if absent. Returns whether this call created the key.
    fn set_nx(&self, key: StateKey, value: String, ttl: Duration) -> BoxFuture<'_, StoreResult<bool>>;

    fn exists(&self, key: StateKey) -> BoxFuture<'_, StoreResult<bool>>;

    /// Increment an integer counter, creating it at 1 with `ttl`.
    fn incr(&self, key: StateKey, ttl: Duration) -> BoxFuture<'_, StoreResult<i64>>;

    /// Delete keys; returns how many existed.
    fn delete(&self, keys: Vec<StateKey>) -> BoxFuture<'_, StoreResult<u64>>;

    /// Delete every key whose rendered form starts with `prefix`.
    fn delete_prefix(&self, prefix: String) -> BoxFuture<'_, StoreResult<u64>>;
}

/// Arc wrapper for StateStore trait objects.
pub type DynStore = Arc<dyn StateStore>;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-process store.
///
/// Expired entries are dropped on access and swept on every write, so keys
/// that are never read again still leave the map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let value = self
            .entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone());
        if value.is_none() {
            self.entries.remove_if(key, |_, e| !e.is_live(now));
        }
        value
    }

    fn sweep(&self, now: Instant) {
        self.entries.retain(|_, e| e.is_live(now));
    }

    /// Entries held, expired ones included.
    pub fn stored_len(&self) -> usize {
        self.entries.len()
    }

    /// Live keys, rendered (test inspection).
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.is_live(now))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Remaining time to live for `key`, if it has one.
    pub fn ttl(&self, key: &StateKey) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(&key.render())
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: StateKey) -> BoxFuture<'_, StoreResult<Option<String>>> {
        Box::pin(async move { Ok(self.live(&key.render())) })
    }

    fn set(&self, key: StateKey, value: String, ttl: Option<Duration>) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.sweep(Instant::now());
            self.entries.insert(key.render(), Entry::new(value, ttl));
            Ok(())
        })
    }

    fn set_nx(&self, key: StateKey, value: String, ttl: Duration) -> BoxFuture<'_, StoreResult<bool>> {
        Box::pin(async move {
            let now = Instant::now();
            self.sweep(now);
            let mut created = false;
            self.entries
                .entry(key.render())
                .and_modify(|e| {
                    if !e.is_live(now) {
                        *e = Entry::new(value.clone(), Some(ttl));
                        created = true;
                    }
                })
                .or_insert_with(|| {
                    created = true;
                    Entry::new(value.clone(), Some(ttl))
                });
            Ok(created)
        })
    }

    fn exists(&self, key: StateKey) -> BoxFuture<'_, StoreResult<bool>> {
        Box::pin(async move { Ok(self.live(&key.render()).is_some()) })
    }

    fn incr(&self, key: StateKey, ttl: Duration) -> BoxFuture<'_, StoreResult<i64>> {
        Box::pin(async move {
            let rendered = key.render();
            let now = Instant::now();
            self.sweep(now);
            let mut entry = self
                .entries
                .entry(rendered.clone())
                .or_insert_with(|| Entry::new("0".to_string(), Some(ttl)));
            if !entry.is_live(now) {
                *entry = Entry::new("0".to_string(), Some(ttl));
            }
            let current: i64 = entry.value.parse().map_err(|_| StoreError::InvalidValue {
                key: rendered,
                value: entry.value.clone(),
            })?;
            let next = current + 1;
            entry.value = next.to_string();
            Ok(next)
        })
    }

    fn delete(&self, keys: Vec<StateKey>) -> BoxFuture<'_, StoreResult<u64>> {
        Box::pin(async move {
            let now = Instant::now();
            let removed = keys
                .iter()
                .filter_map(|k| self.entries.remove(&k.render()))
                .filter(|(_, e)| e.is_live(now))
                .count();
            Ok(removed as u64)
        })
    }

    fn delete_prefix(&self, prefix: String) -> BoxFuture<'_, StoreResult<u64>> {
        Box::pin(async move {
            let now = Instant::now();
            let mut removed = 0u64;
            self.entries.retain(|k, e| {
                if k.starts_with(&prefix) {
                    if e.is_live(now) {
                        removed += 1;
                    }
                    return false;
                }
                e.is_live(now)
            });
            Ok(removed)
        })
    }
}

/// Redis-backed store over a multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        info!("Connected to Redis state store");
        Ok(Self { conn })
    }

    pub fn from_connection(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

fn ttl_ms(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

impl StateStore for RedisStore {
    fn get(&self, key: StateKey) -> BoxFuture<'_, StoreResult<Option<String>>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let value = redis::cmd("GET")
                .arg(key.render())
                .query_async::<_, Option<String>>(&mut conn)
                .await?;
            Ok(value)
        })
    }

    fn set(&self, key: StateKey, value: String, ttl: Option<Duration>) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let mut cmd = redis::cmd("SET");
            cmd.arg(key.render()).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(ttl_ms(ttl));
            }
            cmd.query_async::<_, ()>(&mut conn).await?;
            Ok(())
        })
    }

    fn set_nx(&self, key: StateKey, value: String, ttl: Duration) -> BoxFuture<'_, StoreResult<bool>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let reply = redis::cmd("SET")
                .arg(key.render())
                .arg(value)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms(ttl))
                .query_async::<_, Option<String>>(&mut conn)
                .await?;
            Ok(reply.is_some())
        })
    }

    fn exists(&self, key: StateKey) -> BoxFuture<'_, StoreResult<bool>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let count = redis::cmd("EXISTS")
                .arg(key.render())
                .query_async::<_, i64>(&mut conn)
                .await?;
            Ok(count > 0)
        })
    }

    fn incr(&self, key: StateKey, ttl: Duration) -> BoxFuture<'_, StoreResult<i64>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let rendered = key.render();
            let value = redis::cmd("INCR")
                .arg(&rendered)
                .query_async::<_, i64>(&mut conn)
                .await?;
            if value == 1 {
                redis::cmd("PEXPIRE")
                    .arg(&rendered)
                    .arg(ttl_ms(ttl))
                    .query_async::<_, i64>(&mut conn)
                    .await?;
            }
            Ok(value)
        })
    }

    fn delete(&self, keys: Vec<StateKey>) -> BoxFuture<'_, StoreResult<u64>> {
        Box::pin(async move {
            if keys.is_empty() {
                return Ok(0);
            }
            let mut conn = self.conn.clone();
            let mut cmd = redis::cmd("DEL");
            for key in &keys {
                cmd.arg(key.render());
            }
            let removed = cmd.query_async::<_, u64>(&mut conn).await?;
            Ok(removed)
        })
    }

    fn delete_prefix(&self, prefix: String) -> BoxFuture<'_, StoreResult<u64>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let pattern = format!("{}*", escape_glob(&prefix));
            let mut cursor: u64 = 0;
            let mut removed = 0u64;
            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_COUNT)
                    .query_async(&mut conn)
                    .await?;
                if !keys.is_empty() {
                    removed += redis::cmd("DEL")
                        .arg(&keys)
                        .query_async::<_, u64>(&mut conn)
                        .await?;
                }
                if next == 0 {
                    return Ok(removed);
                }
                cursor = next;
            }
        })
    }
}

const SCAN_COUNT: usize = 200;

/// Escape glob metacharacters for `SCAN MATCH`.
fn escape_glob(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[tokio::test(start_paused = true)]
    async fn test_memory_expiry() {
        let store = MemoryStore::new();
        let key = StateKey::cooldown("ABC_USDT");
        store
            .set(key.clone(), "1".into(), Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert!(store.exists(key.clone()).await.unwrap());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!store.exists(key.clone()).await.unwrap());
        assert!(store.keys().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_nx_only_once_until_expiry() {
        let store = MemoryStore::new();
        let key = StateKey::pyramid_lock(1, 0);
        let ttl = Duration::from_secs(300);
        assert!(store.set_nx(key.clone(), "1".into(), ttl).await.unwrap());
        assert!(!store.set_nx(key.clone(), "1".into(), ttl).await.unwrap());

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(store.set_nx(key, "1".into(), ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_incr_and_delete() {
        let store = MemoryStore::new();
        let key = StateKey::pyramid_entries(9);
        let ttl = key.default_ttl();
        assert_eq!(store.incr(key.clone(), ttl).await.unwrap(), 1);
        assert_eq!(store.incr(key.clone(), ttl).await.unwrap(), 2);
        assert_eq!(store.get(key.clone()).await.unwrap().as_deref(), Some("2"));

        let removed = store
            .delete(vec![key.clone(), StateKey::peak_price(9)])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(key).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_sweep_expired_entries() {
        let store = MemoryStore::new();
        for id in 0..1000 {
            store
                .set(
                    StateKey::initial_spread(id),
                    "1.5".into(),
                    Some(Duration::from_secs(1)),
                )
                .await
                .unwrap();
        }
        assert_eq!(store.stored_len(), 1000);

        tokio::time::advance(Duration::from_secs(10)).await;
        store
            .set(StateKey::cooldown("ABC_USDT"), "1".into(), Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(store.stored_len(), 1);
        assert_eq!(store.keys(), vec!["cooldown:ABC_USDT".to_string()]);

        tokio::time::advance(Duration::from_secs(61)).await;
        let lock = StateKey::pyramid_lock(1, 0);
        assert!(store.set_nx(lock, "1".into(), Duration::from_secs(5)).await.unwrap());
        assert_eq!(store.stored_len(), 1);
    }

    #[tokio::test]
    async fn test_delete_prefix_scoped_to_position() {
        let store = MemoryStore::new();
        for key in [
            StateKey::scale_out_hit(4, Decimal::from(10)),
            StateKey::scale_out_hit(4, Decimal::from(25)),
            StateKey::scale_out_hit(42, Decimal::from(10)),
        ] {
            store.set(key, "1".into(), None).await.unwrap();
        }
        let removed = store.delete_prefix("scale_out_hit:4:".into()).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.keys(), vec!["scale_out_hit:42:10".to_string()]);
    }

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("scale_out_hit:4:"), "scale_out_hit:4:");
        assert_eq!(escape_glob("a*b?[c]"), "a\\*b\\?\\[c\\]");
    }

    #[tokio::test]
    async fn test_incr_rejects_non_integer() {
        let store = MemoryStore::new();
        let key = StateKey::pyramid_entries(9);
        store.set(key.clone(), "abc".into(), None).await.unwrap();
        assert!(store.incr(key, Duration::from_secs(1)).await.is_err());
    }
}
