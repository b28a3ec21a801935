//! Replay protection for `POST /me/listings` via `Idempotency-Key`.
//!
//! Receipts live in Redis when `REDIS_URL` is set, otherwise in process
//! memory. Keys are scoped per user so two sellers can reuse the same key.
//! Either way a receipt is forgotten after `IDEMPOTENCY_TTL_SECS`.

use crate::catalog::publish::PublishReceipt;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

const DEFAULT_TTL_SECS: u64 = 3600;

pub enum ReceiptCache {
    Redis {
        client: redis::Client,
        ttl_secs: u64,
    },
    Memory {
        entries: Mutex<HashMap<String, (Instant, PublishReceipt)>>,
        ttl_secs: u64,
    },
}

impl ReceiptCache {
    pub fn from_env() -> Self {
        let ttl_secs = std::env::var("IDEMPOTENCY_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_TTL_SECS);
        match std::env::var("REDIS_URL")
            .ok()
            .and_then(|url| redis::Client::open(url).ok())
        {
            Some(client) => Self::Redis { client, ttl_secs },
            None => Self::memory(ttl_secs),
        }
    }

    pub fn memory(ttl_secs: u64) -> Self {
        Self::Memory {
            entries: Mutex::new(HashMap::new()),
            ttl_secs,
        }
    }

    pub async fn get(&self, user_id: Uuid, key: &str) -> Option<PublishReceipt> {
        let key = scoped_key(user_id, key);
        match self {
            Self::Redis { client, .. } => redis_get(client, &key).await,
            Self::Memory { entries, ttl_secs } => {
                let mut entries = entries.lock().await;
                evict_stale(&mut entries, *ttl_secs);
                entries.get(&key).map(|(_, receipt)| receipt.clone())
            }
        }
    }

    pub async fn put(&self, user_id: Uuid, key: &str, receipt: &PublishReceipt) {
        let key = scoped_key(user_id, key);
        match self {
            Self::Redis { client, ttl_secs } => redis_set(client, &key, receipt, *ttl_secs).await,
            Self::Memory { entries, ttl_secs } => {
                let mut entries = entries.lock().await;
                evict_stale(&mut entries, *ttl_secs);
                entries.insert(key, (Instant::now(), receipt.clone()));
            }
        }
    }
}

fn evict_stale(entries: &mut HashMap<String, (Instant, PublishReceipt)>, ttl_secs: u64) {
    let ttl = Duration::from_secs(ttl_secs);
    entries.retain(|_, (stored_at, _)| stored_at.elapsed() < ttl);
}

fn scoped_key(user_id: Uuid, key: &str) -> String {
    format!("bicimarket:publish:{user_id}:{}", key.trim())
}

async fn redis_get(client: &redis::Client, key: &str) -> Option<PublishReceipt> {
    let mut conn = client.get_multiplexed_async_connection().await.ok()?;
    let raw: Option<String> = conn.get(key).await.ok()?;
    raw.and_then(|v| serde_json::from_str(&v).ok())
}

async fn redis_set(client: &redis::Client, key: &str, value: &PublishReceipt, ttl_secs: u64) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await
        && let Ok(json) = serde_json::to_string(value)
    {
        let _: Result<(), _> = conn.set_ex(key, json, ttl_secs).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn receipt() -> PublishReceipt {
        PublishReceipt {
            listing_id: Some(Uuid::from_u128(1)),
            listing: json!({"title": "Trek Marlin 5"}),
            images: vec!["bici-1.jpg".into()],
            stages: vec![],
        }
    }

    #[tokio::test]
    async fn memory_cache_is_scoped_per_user() {
        let cache = ReceiptCache::memory(60);
        let ana = Uuid::from_u128(7);
        cache.put(ana, "abc", &receipt()).await;
        assert_eq!(
            cache.get(ana, " abc ").await.and_then(|r| r.listing_id),
            Some(Uuid::from_u128(1))
        );
        assert!(cache.get(Uuid::from_u128(8), "abc").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn memory_receipts_expire_after_ttl() {
        let cache = ReceiptCache::memory(60);
        let ana = Uuid::from_u128(7);
        cache.put(ana, "abc", &receipt()).await;

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get(ana, "abc").await.is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(ana, "abc").await.is_none());
        if let ReceiptCache::Memory { entries, .. } = &cache {
            assert!(entries.lock().await.is_empty());
        }
    }
}
