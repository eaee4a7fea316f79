use crate::models::{FillAggregate, Position, Wallet};
use crate::monitor::PriceFeed;
use crate::store::StateStore;
use crate::Result;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Funds and holdings bookkeeping.
///
/// The wallet singleton and the position table are guarded by independent
/// locks and no operation ever holds both, so there is no lock order to
/// get wrong. Operations are atomic with respect to each other but are not
/// composed into transactions: the decision engine's balance check and the
/// later debit are best-effort, which is acceptable with a single decision
/// thread.
pub struct Ledger {
    store: Arc<dyn StateStore>,
    feed: Arc<PriceFeed>,
    live_trading: bool,
    wallet_lock: Mutex<()>,
    position_lock: Mutex<()>,
}

impl Ledger {
    pub fn new(store: Arc<dyn StateStore>, feed: Arc<PriceFeed>, live_trading: bool) -> Self {
        Self {
            store,
            feed,
            live_trading,
            wallet_lock: Mutex::new(()),
            position_lock: Mutex::new(()),
        }
    }

    /// Seed the wallet with starting capital. Idempotent: a wallet that
    /// already exists is left untouched.
    pub async fn initialize_wallet(&self, initial_balance: f64) -> Result<()> {
        let _guard = self.wallet_lock.lock().await;

        if self.store.get_wallet().await?.is_some() {
            tracing::warn!("Wallet already initialized");
            return Ok(());
        }

        self.store.put_wallet(&Wallet::new(initial_balance)).await?;
        tracing::debug!("Wallet initialized!");
        Ok(())
    }

    /// Spendable balance. Zero when the wallet was never initialized.
    pub async fn balance(&self) -> Result<f64> {
        let _guard = self.wallet_lock.lock().await;
        match self.store.get_wallet().await? {
            Some(wallet) => Ok(wallet.available),
            None => {
                tracing::warn!("Balance requested before wallet initialization");
                Ok(0.0)
            }
        }
    }

    /// Wallet snapshot for logging and ops.
    pub async fn wallet(&self) -> Result<Option<Wallet>> {
        let _guard = self.wallet_lock.lock().await;
        self.store.get_wallet().await
    }

    pub async fn get_position(&self, symbol: &str) -> Result<Option<Position>> {
        let _guard = self.position_lock.lock().await;
        self.store.get_position(symbol).await
    }

    /// Symbols currently tracked in the position table, zeroed rows
    /// included.
    pub async fn tickers(&self) -> Result<Vec<String>> {
        let _guard = self.position_lock.lock().await;
        let positions = self.store.all_positions().await?;
        Ok(positions.into_iter().map(|p| p.symbol).collect())
    }

    /// Return the existing row for the symbol, inserting an empty one if
    /// it has never been traded.
    pub async fn add_position_if_absent(&self, symbol: &str) -> Result<Position> {
        let _guard = self.position_lock.lock().await;

        if let Some(position) = self.store.get_position(symbol).await? {
            return Ok(position);
        }

        let position = Position::new(symbol);
        self.store.upsert_position(&position).await?;
        Ok(position)
    }

    /// How many whole shares the amount buys at the current price. Zero
    /// when no usable price is available.
    pub async fn usd_to_shares(&self, symbol: &str, amount: f64) -> Result<i64> {
        let price = self.feed.get_price(symbol).await?;
        match price {
            Some(p) if p > 0.0 => Ok((amount / p).floor() as i64),
            _ => Ok(0),
        }
    }

    /// Commit a buy against the wallet.
    ///
    /// Rejected without mutation when the cost exceeds the available
    /// balance. In live trading the row's shares and stake stay at zero
    /// until fill reconciliation reports what actually settled; in paper
    /// trading the fill is assumed immediate.
    pub async fn record_buy(&self, symbol: &str, shares: i64, cost: f64) -> Result<bool> {
        let balance = self.balance().await?;
        if cost > balance {
            tracing::error!("Not enough balance to buy shares!");
            return Ok(false);
        }

        let row = self.add_position_if_absent(symbol).await?;
        {
            let _guard = self.position_lock.lock().await;
            let updated = Position {
                symbol: symbol.to_string(),
                shares: if self.live_trading { 0 } else { shares },
                stake: if self.live_trading {
                    0.0
                } else {
                    row.stake + cost
                },
            };
            self.store.upsert_position(&updated).await?;
        }

        {
            let _guard = self.wallet_lock.lock().await;
            if let Some(mut wallet) = self.store.get_wallet().await? {
                wallet.available -= cost;
                self.store.put_wallet(&wallet).await?;
            }
        }

        tracing::info!("Bought {} shares of {}", shares, symbol);
        tracing::info!("Purchasing balance {}", self.balance().await?);
        Ok(true)
    }

    /// Fully liquidate a position: realize the profit into the wallet and
    /// zero the row. Returns the realized profit.
    pub async fn record_full_sale(&self, symbol: &str, position: &Position) -> Result<f64> {
        let price = self.feed.get_price(symbol).await?.unwrap_or(0.0);
        let profit = -position.stake + position.shares as f64 * price;

        let running_total;
        {
            let _guard = self.wallet_lock.lock().await;
            let mut wallet = self
                .store
                .get_wallet()
                .await?
                .unwrap_or_else(|| Wallet::new(0.0));
            wallet.realized_out += profit;
            running_total = wallet.realized_out;
            self.store.put_wallet(&wallet).await?;
        }

        {
            let _guard = self.position_lock.lock().await;
            let zeroed = Position::new(symbol);
            self.store.upsert_position(&zeroed).await?;
        }

        tracing::info!("Running profit estimate: {}", running_total);
        Ok(profit)
    }

    /// Merge a broker fill aggregate into the position table. The
    /// aggregate already carries the full net position per symbol, so the
    /// values overwrite rather than add.
    pub async fn reconcile_fills(&self, aggregate: &FillAggregate) -> Result<()> {
        let _guard = self.position_lock.lock().await;

        for (symbol, net) in aggregate.iter() {
            tracing::debug!("Fills for ticker {}: {:?}", symbol, net);
            let updated = Position {
                symbol: symbol.clone(),
                shares: net.shares,
                stake: net.value,
            };
            self.store.upsert_position(&updated).await?;
        }

        tracing::debug!("Synchronized portfolio");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerApi, FillPage, OrderReceipt, OrderRequest};
    use crate::models::OrderAction;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct FixedPriceBroker {
        prices: HashMap<String, f64>,
    }

    impl FixedPriceBroker {
        fn new(prices: &[(&str, f64)]) -> Self {
            Self {
                prices: prices
                    .iter()
                    .map(|(s, p)| (s.to_string(), *p))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl BrokerApi for FixedPriceBroker {
        async fn get_price(&self, symbol: &str) -> crate::Result<Option<f64>> {
            Ok(self.prices.get(symbol).copied())
        }

        async fn get_filled_orders(&self, _marker: Option<&str>) -> crate::Result<FillPage> {
            Ok(FillPage::default())
        }

        async fn place_order(&self, _request: &OrderRequest) -> crate::Result<OrderReceipt> {
            Ok(OrderReceipt {
                accepted: true,
                order_id: None,
            })
        }
    }

    fn ledger_with_prices(prices: &[(&str, f64)], live_trading: bool) -> Ledger {
        let broker = Arc::new(FixedPriceBroker::new(prices));
        let feed = Arc::new(PriceFeed::new(broker));
        Ledger::new(Arc::new(MemoryStore::new()), feed, live_trading)
    }

    #[tokio::test]
    async fn test_initialize_wallet_is_idempotent() {
        let ledger = ledger_with_prices(&[], false);

        ledger.initialize_wallet(1000.0).await.unwrap();
        ledger.initialize_wallet(5000.0).await.unwrap();

        assert_eq!(ledger.balance().await.unwrap(), 1000.0);
    }

    #[tokio::test]
    async fn test_usd_to_shares_floors() {
        let ledger = ledger_with_prices(&[("ABCD", 0.0015)], false);
        assert_eq!(ledger.usd_to_shares("ABCD", 1000.0).await.unwrap(), 666666);
    }

    #[tokio::test]
    async fn test_usd_to_shares_monotonic_in_amount() {
        let ledger = ledger_with_prices(&[("ABCD", 0.3)], false);

        let mut last = 0;
        for amount in [1.0, 10.0, 100.0, 100.5, 1000.0] {
            let shares = ledger.usd_to_shares("ABCD", amount).await.unwrap();
            assert!(shares >= last);
            last = shares;
        }
    }

    #[tokio::test]
    async fn test_usd_to_shares_zero_without_usable_price() {
        let ledger = ledger_with_prices(&[("NEGP", -2.0)], false);
        assert_eq!(ledger.usd_to_shares("NEGP", 1000.0).await.unwrap(), 0);
        assert_eq!(ledger.usd_to_shares("MISSING", 1000.0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_record_buy_rejects_unaffordable_cost() {
        let ledger = ledger_with_prices(&[("ABCD", 0.5)], false);
        ledger.initialize_wallet(100.0).await.unwrap();

        let committed = ledger.record_buy("ABCD", 300, 150.0).await.unwrap();
        assert!(!committed);

        // wallet and positions untouched
        assert_eq!(ledger.balance().await.unwrap(), 100.0);
        assert!(ledger.get_position("ABCD").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_buy_paper_mode_settles_immediately() {
        let ledger = ledger_with_prices(&[("ABCD", 0.5)], false);
        ledger.initialize_wallet(1000.0).await.unwrap();

        let committed = ledger.record_buy("ABCD", 100, 55.0).await.unwrap();
        assert!(committed);

        let position = ledger.get_position("ABCD").await.unwrap().unwrap();
        assert_eq!(position.shares, 100);
        assert_eq!(position.stake, 55.0);
        assert_eq!(ledger.balance().await.unwrap(), 945.0);
    }

    #[tokio::test]
    async fn test_record_buy_live_mode_defers_to_fills() {
        let ledger = ledger_with_prices(&[("ABCD", 0.5)], true);
        ledger.initialize_wallet(1000.0).await.unwrap();

        let committed = ledger.record_buy("ABCD", 100, 55.0).await.unwrap();
        assert!(committed);

        // shares and stake wait for reconciliation; the debit does not
        let position = ledger.get_position("ABCD").await.unwrap().unwrap();
        assert_eq!(position.shares, 0);
        assert_eq!(position.stake, 0.0);
        assert_eq!(ledger.balance().await.unwrap(), 945.0);
    }

    #[tokio::test]
    async fn test_record_full_sale_realizes_profit_and_zeroes() {
        let ledger = ledger_with_prices(&[("ABCD", 0.6)], false);
        ledger.initialize_wallet(1000.0).await.unwrap();

        let position = Position {
            symbol: "ABCD".to_string(),
            shares: 100,
            stake: 50.0,
        };
        ledger.store.upsert_position(&position).await.unwrap();

        let profit = ledger.record_full_sale("ABCD", &position).await.unwrap();
        assert!((profit - 10.0).abs() < 1e-9);

        let zeroed = ledger.get_position("ABCD").await.unwrap().unwrap();
        assert_eq!(zeroed.shares, 0);
        assert_eq!(zeroed.stake, 0.0);

        let wallet = ledger.wallet().await.unwrap().unwrap();
        assert!((wallet.realized_out - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_reconcile_fills_overwrites_net_values() {
        let ledger = ledger_with_prices(&[], true);

        // an earlier pass left a stale row behind
        let stale = Position {
            symbol: "AAPL".to_string(),
            shares: 2,
            stake: 100.0,
        };
        ledger.store.upsert_position(&stale).await.unwrap();

        let mut aggregate = FillAggregate::new();
        aggregate.apply("AAPL", OrderAction::Buy, 10, 1000.0);
        aggregate.apply("AAPL", OrderAction::Sell, 3, 330.0);
        ledger.reconcile_fills(&aggregate).await.unwrap();

        let position = ledger.get_position("AAPL").await.unwrap().unwrap();
        assert_eq!(position.shares, 7);
        assert_eq!(position.stake, 670.0);
    }

    #[tokio::test]
    async fn test_reconcile_fills_creates_missing_rows() {
        let ledger = ledger_with_prices(&[], true);

        let mut aggregate = FillAggregate::new();
        aggregate.apply("MSFT", OrderAction::Buy, 5, 500.0);
        ledger.reconcile_fills(&aggregate).await.unwrap();

        let position = ledger.get_position("MSFT").await.unwrap().unwrap();
        assert_eq!(position.shares, 5);
        assert_eq!(position.stake, 500.0);
    }
}
