use pennybot::broker::{BrokerApi, RestBroker};
use pennybot::config::Config;
use pennybot::engine::{BuyOutcome, DecisionEngine, SellOutcome};
use pennybot::ledger::Ledger;
use pennybot::models::SellTrigger;
use pennybot::monitor::{PriceFeed, PriceMonitor};
use pennybot::signals;
use pennybot::store::{MemoryStore, RedisStore, StateStore};
use pennybot::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Bound on queued sell triggers between monitor and engine.
const SELL_TRIGGER_QUEUE: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let config = Config::from_env()?;
    tracing::info!(
        "pennybot starting (live: {}, budget: {} {}, poll: {:?})",
        config.live_trading,
        config.buy_budget,
        config.currency,
        config.poll_interval
    );

    let store = connect_store().await?;
    let broker: Arc<dyn BrokerApi> = Arc::new(RestBroker::from_env()?);
    let feed = Arc::new(PriceFeed::new(broker.clone()));

    let ledger = Arc::new(Ledger::new(store.clone(), feed.clone(), config.live_trading));
    ledger.initialize_wallet(config.initial_balance).await?;

    let (trigger_tx, mut trigger_rx) = mpsc::channel::<SellTrigger>(SELL_TRIGGER_QUEUE);
    let monitor = Arc::new(PriceMonitor::new(
        feed,
        store,
        ledger.clone(),
        broker.clone(),
        config.clone(),
        trigger_tx,
    ));
    let engine = Arc::new(DecisionEngine::new(
        ledger,
        monitor.clone(),
        broker,
        config,
    ));

    // Background loop: fill reconciliation + threshold evaluation.
    // Fail-stop: the task ends on the first unrecoverable error and an
    // operator restarts the process.
    let monitor_task = tokio::spawn({
        let monitor = monitor.clone();
        async move {
            monitor.run().await;
        }
    });

    // Sell path: triggers fired by the monitor land here, decoupled from
    // the loop that fired them.
    let sell_task = tokio::spawn({
        let engine = engine.clone();
        async move {
            while let Some(trigger) = trigger_rx.recv().await {
                match engine.handle_sell_signal(&trigger.symbol).await {
                    Ok(SellOutcome::Sold { profit }) => {
                        tracing::info!("Sold {} for profit {}", trigger.symbol, profit);
                    }
                    Ok(outcome) => {
                        tracing::info!("Sale of {} resolved as {:?}", trigger.symbol, outcome);
                    }
                    Err(e) => {
                        tracing::error!("Sell handling for {} errored: {}", trigger.symbol, e);
                    }
                }
            }
        }
    });

    // Buy path: stdin lines stand in for the upstream message listener;
    // each line is scanned for candidate symbols.
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    while let Some(line) = lines.next_line().await? {
        for candidate in signals::parse_message(&line) {
            match engine
                .handle_buy_signal(&candidate.symbol, candidate.negative_bias)
                .await
            {
                Ok(BuyOutcome::Placed {
                    shares,
                    limit_price,
                }) => {
                    tracing::info!(
                        "Placed buy: {} x {} limit {}",
                        candidate.symbol,
                        shares,
                        limit_price
                    );
                }
                Ok(BuyOutcome::Rejected(reason)) => {
                    tracing::info!("Buy of {} rejected: {}", candidate.symbol, reason);
                }
                Ok(BuyOutcome::Failed(reason)) => {
                    tracing::error!("Buy of {} failed: {}", candidate.symbol, reason);
                }
                Err(e) => {
                    tracing::error!("Buy handling for {} errored: {}", candidate.symbol, e);
                }
            }
        }
    }

    tracing::info!("Signal input closed; shutting down");
    monitor_task.abort();
    sell_task.abort();
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pennybot=debug,info".into()),
        )
        .init();
}

async fn connect_store() -> Result<Arc<dyn StateStore>> {
    match std::env::var("REDIS_URL") {
        Ok(url) => Ok(Arc::new(RedisStore::new(&url).await?)),
        Err(_) => {
            tracing::warn!("REDIS_URL not set; state will not survive restarts");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
