pub mod price_feed;

pub use price_feed::PriceFeed;

use crate::broker::BrokerApi;
use crate::config::Config;
use crate::ledger::Ledger;
use crate::models::{Comparator, FillAggregate, SellTrigger, Subscription};
use crate::store::StateStore;
use crate::Result;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Background watcher over owned positions.
///
/// Every poll interval it reconciles broker fills into the ledger (live
/// mode only) and evaluates the threshold subscriptions against fresh
/// prices, pushing a `SellTrigger` for each one that crossed. Firing is
/// fire-and-forget: the decision engine consumes triggers on its own task
/// and is responsible for removing the subscriptions it acted on.
pub struct PriceMonitor {
    feed: Arc<PriceFeed>,
    store: Arc<dyn StateStore>,
    ledger: Arc<Ledger>,
    broker: Arc<dyn BrokerApi>,
    config: Config,
    triggers: mpsc::Sender<SellTrigger>,
}

impl PriceMonitor {
    pub fn new(
        feed: Arc<PriceFeed>,
        store: Arc<dyn StateStore>,
        ledger: Arc<Ledger>,
        broker: Arc<dyn BrokerApi>,
        config: Config,
        triggers: mpsc::Sender<SellTrigger>,
    ) -> Self {
        Self {
            feed,
            store,
            ledger,
            broker,
            config,
            triggers,
        }
    }

    /// Serialized price lookup, shared with the ledger and the engine.
    pub async fn get_price(&self, symbol: &str) -> Result<Option<f64>> {
        self.feed.get_price(symbol).await
    }

    /// Register a sell trigger for the symbol. Duplicate subscriptions are
    /// allowed: repeated buy events may re-subscribe the same symbol.
    pub async fn subscribe(
        &self,
        symbol: &str,
        threshold: f64,
        comparator: Comparator,
    ) -> Result<Subscription> {
        let subscription = Subscription::new(symbol, threshold, comparator);
        self.store.insert_subscription(&subscription).await?;

        tracing::info!(
            "Subscribed {} to price {} {}",
            symbol,
            comparator,
            threshold
        );
        Ok(subscription)
    }

    /// Kill every subscription associated with the symbol.
    pub async fn unsubscribe_all(&self, symbol: &str) -> Result<usize> {
        self.store.remove_subscriptions(symbol).await
    }

    /// Monitor loop body. Runs until the first unrecoverable error; there
    /// is no internal retry, an operator restarts the process.
    pub async fn run(&self) {
        tracing::info!(
            "Price monitor started (interval {:?}, live: {})",
            self.config.poll_interval,
            self.config.live_trading
        );

        loop {
            tracing::debug!("Pulling latest prices..");

            if let Err(e) = self.check_for_events().await {
                tracing::error!("Monitor iteration failed: {}. Exiting loop..", e);
                break;
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// One monitor pass: fill reconciliation, then threshold evaluation.
    /// Public so a single iteration can be driven directly in tests.
    pub async fn check_for_events(&self) -> Result<()> {
        if self.config.live_trading {
            let fills = self.fetch_filled_orders().await?;
            if !fills.is_empty() {
                self.ledger.reconcile_fills(&fills).await?;
            }
        }

        let owned = self.ledger.tickers().await?;

        // thresholds are re-read every pass so operator overrides to the
        // subscription table take effect on the next iteration
        for subscription in self.store.all_subscriptions().await? {
            if !owned.contains(&subscription.symbol) {
                tracing::warn!(
                    "Skipping over subscribed ticker {} not in portfolio!",
                    subscription.symbol
                );
                continue;
            }

            let Some(price) = self.feed.get_price(&subscription.symbol).await? else {
                tracing::warn!("No quote for {}; skipping evaluation", subscription.symbol);
                continue;
            };

            if subscription.comparator.matches(price, subscription.threshold) {
                self.fire(&subscription)?;
            } else {
                tracing::debug!(
                    "Not triggering event for {}: price: {} operator: {} thresh: {}",
                    subscription.symbol,
                    price,
                    subscription.comparator,
                    subscription.threshold
                );
            }
        }

        Ok(())
    }

    fn fire(&self, subscription: &Subscription) -> Result<()> {
        let trigger = SellTrigger {
            symbol: subscription.symbol.clone(),
        };

        match self.triggers.try_send(trigger) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(t)) => {
                // drop and let the next pass re-fire
                tracing::warn!("Sell trigger queue full; dropping trigger for {}", t.symbol);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err("sell trigger channel closed".into())
            }
        }
    }

    /// Walk the broker's fill pages iteratively, following continuation
    /// markers up to a fixed page bound so a misbehaving collaborator
    /// cannot spin us forever.
    async fn fetch_filled_orders(&self) -> Result<FillAggregate> {
        let mut aggregate = FillAggregate::new();
        let mut marker: Option<String> = None;

        for _ in 0..self.config.max_fill_pages {
            let page = self.broker.get_filled_orders(marker.as_deref()).await?;
            aggregate.merge(page.fills);

            match page.next_marker {
                Some(next) => marker = Some(next),
                None => return Ok(aggregate),
            }
        }

        tracing::warn!(
            "Fill pagination exceeded {} pages; truncating sweep",
            self.config.max_fill_pages
        );
        Ok(aggregate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{FillPage, OrderReceipt, OrderRequest};
    use crate::models::{OrderAction, Position};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted broker: fixed prices plus a queue of fill pages.
    struct ScriptedBroker {
        prices: HashMap<String, f64>,
        fill_pages: Mutex<Vec<FillPage>>,
    }

    impl ScriptedBroker {
        fn new(prices: &[(&str, f64)], fill_pages: Vec<FillPage>) -> Self {
            Self {
                prices: prices.iter().map(|(s, p)| (s.to_string(), *p)).collect(),
                fill_pages: Mutex::new(fill_pages),
            }
        }
    }

    #[async_trait]
    impl BrokerApi for ScriptedBroker {
        async fn get_price(&self, symbol: &str) -> crate::Result<Option<f64>> {
            Ok(self.prices.get(symbol).copied())
        }

        async fn get_filled_orders(&self, _marker: Option<&str>) -> crate::Result<FillPage> {
            let mut pages = self.fill_pages.lock().unwrap();
            if pages.is_empty() {
                Ok(FillPage::default())
            } else {
                Ok(pages.remove(0))
            }
        }

        async fn place_order(&self, _request: &OrderRequest) -> crate::Result<OrderReceipt> {
            Ok(OrderReceipt {
                accepted: true,
                order_id: None,
            })
        }
    }

    struct Harness {
        monitor: PriceMonitor,
        store: Arc<MemoryStore>,
        ledger: Arc<Ledger>,
        trigger_rx: mpsc::Receiver<SellTrigger>,
    }

    fn harness(prices: &[(&str, f64)], fill_pages: Vec<FillPage>, live: bool) -> Harness {
        let broker = Arc::new(ScriptedBroker::new(prices, fill_pages));
        let feed = Arc::new(PriceFeed::new(broker.clone()));
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(Ledger::new(store.clone(), feed.clone(), live));

        let config = Config {
            live_trading: live,
            ..Config::default()
        };
        let (trigger_tx, trigger_rx) = mpsc::channel(16);
        let monitor = PriceMonitor::new(feed, store.clone(), ledger.clone(), broker, config, trigger_tx);

        Harness {
            monitor,
            store,
            ledger,
            trigger_rx,
        }
    }

    async fn track(store: &MemoryStore, symbol: &str, shares: i64, stake: f64) {
        store
            .upsert_position(&Position {
                symbol: symbol.to_string(),
                shares,
                stake,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_threshold_crossing_fires_trigger() {
        let mut h = harness(&[("ABCD", 0.6)], vec![], false);
        track(&h.store, "ABCD", 100, 50.0).await;
        h.monitor
            .subscribe("ABCD", 0.5, Comparator::Above)
            .await
            .unwrap();

        h.monitor.check_for_events().await.unwrap();

        let trigger = h.trigger_rx.try_recv().unwrap();
        assert_eq!(trigger.symbol, "ABCD");
    }

    #[tokio::test]
    async fn test_threshold_not_crossed_fires_nothing() {
        let mut h = harness(&[("ABCD", 0.4)], vec![], false);
        track(&h.store, "ABCD", 100, 50.0).await;
        h.monitor
            .subscribe("ABCD", 0.5, Comparator::Above)
            .await
            .unwrap();

        h.monitor.check_for_events().await.unwrap();
        assert!(h.trigger_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_all_silences_symbol() {
        let mut h = harness(&[("ABCD", 0.6)], vec![], false);
        track(&h.store, "ABCD", 100, 50.0).await;
        h.monitor
            .subscribe("ABCD", 0.5, Comparator::Above)
            .await
            .unwrap();
        h.monitor
            .subscribe("ABCD", 0.55, Comparator::Above)
            .await
            .unwrap();

        let removed = h.monitor.unsubscribe_all("ABCD").await.unwrap();
        assert_eq!(removed, 2);

        h.monitor.check_for_events().await.unwrap();
        assert!(h.trigger_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stale_subscription_is_skipped_not_fired() {
        // subscription outlived its position (closed elsewhere)
        let mut h = harness(&[("GONE", 99.0)], vec![], false);
        h.monitor
            .subscribe("GONE", 0.5, Comparator::Above)
            .await
            .unwrap();

        h.monitor.check_for_events().await.unwrap();

        assert!(h.trigger_rx.try_recv().is_err());
        // still registered; skipping is not unsubscribing
        assert_eq!(h.store.all_subscriptions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_below_comparator() {
        let mut h = harness(&[("ABCD", 0.3)], vec![], false);
        track(&h.store, "ABCD", 100, 50.0).await;
        h.monitor
            .subscribe("ABCD", 0.5, Comparator::Below)
            .await
            .unwrap();

        h.monitor.check_for_events().await.unwrap();
        assert_eq!(h.trigger_rx.try_recv().unwrap().symbol, "ABCD");
    }

    #[tokio::test]
    async fn test_live_pass_reconciles_fill_pages() {
        let mut first = FillAggregate::new();
        first.apply("AAPL", OrderAction::Buy, 10, 1000.0);
        let mut second = FillAggregate::new();
        second.apply("AAPL", OrderAction::Sell, 3, 330.0);

        let pages = vec![
            FillPage {
                fills: first,
                next_marker: Some("page-2".to_string()),
            },
            FillPage {
                fills: second,
                next_marker: None,
            },
        ];

        let h = harness(&[], pages, true);
        h.monitor.check_for_events().await.unwrap();

        let position = h.ledger.get_position("AAPL").await.unwrap().unwrap();
        assert_eq!(position.shares, 7);
        assert_eq!(position.stake, 670.0);
    }

    #[tokio::test]
    async fn test_pagination_is_bounded() {
        // every page points at another page; the sweep must still end
        let endless: Vec<FillPage> = (0..64)
            .map(|i| FillPage {
                fills: FillAggregate::new(),
                next_marker: Some(format!("page-{i}")),
            })
            .collect();

        let h = harness(&[], endless, true);
        // completes rather than spinning past the page bound
        h.monitor.check_for_events().await.unwrap();
    }

    #[tokio::test]
    async fn test_paper_mode_skips_fill_sync() {
        let mut poisoned = FillAggregate::new();
        poisoned.apply("AAPL", OrderAction::Buy, 10, 1000.0);
        let pages = vec![FillPage {
            fills: poisoned,
            next_marker: None,
        }];

        let h = harness(&[], pages, false);
        h.monitor.check_for_events().await.unwrap();

        assert!(h.ledger.get_position("AAPL").await.unwrap().is_none());
    }
}
