// State storage: three independently queryable tables (wallet singleton,
// position set, subscription set). The core assumes read-after-write
// consistency in-process and tolerates out-of-band writes (operator
// overrides) showing up on the next read.

pub mod redis;

pub use self::redis::RedisStore;

use crate::models::{Position, Subscription, Wallet};
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_wallet(&self) -> Result<Option<Wallet>>;
    async fn put_wallet(&self, wallet: &Wallet) -> Result<()>;

    async fn get_position(&self, symbol: &str) -> Result<Option<Position>>;
    async fn upsert_position(&self, position: &Position) -> Result<()>;
    async fn all_positions(&self) -> Result<Vec<Position>>;

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()>;
    /// Remove every subscription for the symbol, returning how many went.
    async fn remove_subscriptions(&self, symbol: &str) -> Result<usize>;
    async fn all_subscriptions(&self) -> Result<Vec<Subscription>>;
}

/// In-process store used for paper trading and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    wallet: RwLock<Option<Wallet>>,
    positions: RwLock<HashMap<String, Position>>,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get_wallet(&self) -> Result<Option<Wallet>> {
        Ok(self.wallet.read().unwrap().clone())
    }

    async fn put_wallet(&self, wallet: &Wallet) -> Result<()> {
        *self.wallet.write().unwrap() = Some(wallet.clone());
        Ok(())
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<Position>> {
        Ok(self.positions.read().unwrap().get(symbol).cloned())
    }

    async fn upsert_position(&self, position: &Position) -> Result<()> {
        self.positions
            .write()
            .unwrap()
            .insert(position.symbol.clone(), position.clone());
        Ok(())
    }

    async fn all_positions(&self) -> Result<Vec<Position>> {
        Ok(self.positions.read().unwrap().values().cloned().collect())
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()> {
        self.subscriptions
            .write()
            .unwrap()
            .push(subscription.clone());
        Ok(())
    }

    async fn remove_subscriptions(&self, symbol: &str) -> Result<usize> {
        let mut subscriptions = self.subscriptions.write().unwrap();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.symbol != symbol);
        Ok(before - subscriptions.len())
    }

    async fn all_subscriptions(&self) -> Result<Vec<Subscription>> {
        Ok(self.subscriptions.read().unwrap().clone())
    }
}
