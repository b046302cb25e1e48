//! Idempotency cache trait with Redis and in-memory implementations.
//!
//! The cache is the fast path for replayed requests; the ledger's
//! unique key is the durable backstop. Records are written only after a
//! fully successful workflow and expire after a TTL, so cache loss is
//! harmless.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use storage::Booking;

/// How long a completed response stays replayable.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors from the idempotency cache.
///
/// The engine treats these as cache misses; they never fail a request.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A cached response to a completed create-booking request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub user_email: String,
    pub path: String,
    pub request: serde_json::Value,
    pub response: Booking,
    pub status: u16,
    pub created_at: DateTime<Utc>,
}

/// Trait for idempotency-record storage.
#[async_trait]
pub trait IdempotencyCache: Send + Sync {
    /// Looks up a record by key. Absence is not an error.
    async fn find_by_key(&self, key: &str) -> Result<Option<IdempotencyRecord>, CacheError>;

    /// Stores a record with the given TTL.
    async fn create(&self, record: IdempotencyRecord, ttl: Duration) -> Result<(), CacheError>;
}

/// Redis-backed cache. Keys are namespaced `idempotency:{key}`.
#[derive(Clone)]
pub struct RedisIdempotencyCache {
    connection: redis::aio::ConnectionManager,
}

impl RedisIdempotencyCache {
    /// Connects to Redis at the given URL.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let connection = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self { connection })
    }

    fn namespaced(key: &str) -> String {
        format!("idempotency:{key}")
    }
}

#[async_trait]
impl IdempotencyCache for RedisIdempotencyCache {
    async fn find_by_key(&self, key: &str) -> Result<Option<IdempotencyRecord>, CacheError> {
        let mut conn = self.connection.clone();
        let cached: Option<String> = conn.get(Self::namespaced(key)).await?;
        match cached {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, record: IdempotencyRecord, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let json = serde_json::to_string(&record)?;
        let () = conn
            .set_ex(Self::namespaced(&record.key), json, ttl.as_secs())
            .await?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryCacheState {
    records: HashMap<String, (IdempotencyRecord, Instant)>,
}

/// In-memory cache for tests and cache-less deployments. Entries expire
/// lazily on read.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIdempotencyCache {
    state: Arc<RwLock<InMemoryCacheState>>,
}

impl InMemoryIdempotencyCache {
    /// Creates a new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every record. Test setup only.
    pub fn clear(&self) {
        self.state.write().unwrap().records.clear();
    }

    /// Returns the number of unexpired records.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.state
            .read()
            .unwrap()
            .records
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }

    /// Returns true when no unexpired records remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl IdempotencyCache for InMemoryIdempotencyCache {
    async fn find_by_key(&self, key: &str) -> Result<Option<IdempotencyRecord>, CacheError> {
        let mut state = self.state.write().unwrap();
        match state.records.get(key) {
            Some((record, expires_at)) if *expires_at > Instant::now() => Ok(Some(record.clone())),
            Some(_) => {
                state.records.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn create(&self, record: IdempotencyRecord, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = Instant::now() + ttl;
        self.state
            .write()
            .unwrap()
            .records
            .insert(record.key.clone(), (record, expires_at));
        Ok(())
    }
}
