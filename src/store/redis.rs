use crate::models::{Position, Subscription, Wallet};
use crate::store::StateStore;
use crate::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

const WALLET_KEY: &str = "wallet";
const POSITIONS_KEY: &str = "positions";
const SUBSCRIPTIONS_KEY: &str = "subscriptions";

/// Redis-backed store.
///
/// Wallet lives at a plain key, positions in a hash keyed by symbol and
/// subscriptions in a hash keyed by id; values are serde_json documents.
/// An operator console may rewrite any of these out-of-band; every read
/// goes back to Redis so overrides surface on the next pass.
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        // Add 5 second timeout to connection attempt
        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| "Redis connection timeout after 5 seconds")??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get_wallet(&self) -> Result<Option<Wallet>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(WALLET_KEY).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put_wallet(&self, wallet: &Wallet) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(wallet)?;
        conn.set::<_, _, ()>(WALLET_KEY, json).await?;
        Ok(())
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<Position>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(POSITIONS_KEY, symbol).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn upsert_position(&self, position: &Position) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(position)?;
        conn.hset::<_, _, _, ()>(POSITIONS_KEY, &position.symbol, json)
            .await?;
        Ok(())
    }

    async fn all_positions(&self) -> Result<Vec<Position>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.hvals(POSITIONS_KEY).await?;

        let mut positions = Vec::with_capacity(raw.len());
        for json in raw {
            positions.push(serde_json::from_str(&json)?);
        }
        Ok(positions)
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(subscription)?;
        conn.hset::<_, _, _, ()>(SUBSCRIPTIONS_KEY, subscription.id.to_string(), json)
            .await?;
        Ok(())
    }

    async fn remove_subscriptions(&self, symbol: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.hvals(SUBSCRIPTIONS_KEY).await?;

        let mut removed = 0;
        for json in raw {
            let subscription: Subscription = serde_json::from_str(&json)?;
            if subscription.symbol == symbol {
                conn.hdel::<_, _, ()>(SUBSCRIPTIONS_KEY, subscription.id.to_string())
                    .await?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!("Removed {} subscriptions for {}", removed, symbol);
        }
        Ok(removed)
    }

    async fn all_subscriptions(&self) -> Result<Vec<Subscription>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.hvals(SUBSCRIPTIONS_KEY).await?;

        let mut subscriptions = Vec::with_capacity(raw.len());
        for json in raw {
            subscriptions.push(serde_json::from_str(&json)?);
        }
        Ok(subscriptions)
    }
}
