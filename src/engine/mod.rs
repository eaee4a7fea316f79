use crate::broker::{BrokerApi, OrderReceipt, OrderRequest};
use crate::config::Config;
use crate::ledger::Ledger;
use crate::models::{Comparator, OrderAction, OrderTerm, PriceType};
use crate::monitor::PriceMonitor;
use crate::Result;
use std::sync::Arc;

/// What happened to a buy signal. Policy rejections are values, not
/// errors: the ingesting task logs them and moves on.
#[derive(Debug, Clone, PartialEq)]
pub enum BuyOutcome {
    Placed { shares: i64, limit_price: f64 },
    Rejected(String),
    /// The broker refused or errored; nothing was committed.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SellOutcome {
    Sold { profit: f64 },
    /// A sell trigger with no matching position. Should not happen under
    /// correct wiring.
    NoPosition,
    /// Live order never filled; there is nothing to liquidate.
    Unfilled,
    /// The sell order failed. The subscription is gone regardless, so the
    /// symbol will not be retried automatically.
    Failed(String),
}

/// Buy/sell policy. Mediates between signal ingestion and the
/// ledger/monitor pair; this is the only component that places orders.
pub struct DecisionEngine {
    ledger: Arc<Ledger>,
    monitor: Arc<PriceMonitor>,
    broker: Arc<dyn BrokerApi>,
    config: Config,
}

impl DecisionEngine {
    pub fn new(
        ledger: Arc<Ledger>,
        monitor: Arc<PriceMonitor>,
        broker: Arc<dyn BrokerApi>,
        config: Config,
    ) -> Self {
        Self {
            ledger,
            monitor,
            broker,
            config,
        }
    }

    /// Handle one buy candidate from the signal source.
    ///
    /// `negative_bias` marks candidates whose surrounding message carried
    /// hype language; those get a stricter price ceiling so we do not
    /// chase already-extended moves.
    pub async fn handle_buy_signal(&self, symbol: &str, negative_bias: bool) -> Result<BuyOutcome> {
        if !is_valid_symbol(symbol) {
            tracing::warn!("Rejecting malformed symbol {:?}", symbol);
            return Ok(BuyOutcome::Rejected("malformed symbol".to_string()));
        }

        // no pyramiding: one open position per symbol
        if let Some(position) = self.ledger.get_position(symbol).await? {
            if position.is_open() {
                tracing::info!("Already holding {}; ignoring buy signal", symbol);
                return Ok(BuyOutcome::Rejected("position already open".to_string()));
            }
        }

        let Some(price) = self.monitor.get_price(symbol).await? else {
            tracing::warn!("No quote for {}; ignoring buy signal", symbol);
            return Ok(BuyOutcome::Rejected("no quote".to_string()));
        };
        if price <= 0.0 {
            return Ok(BuyOutcome::Rejected("non-positive price".to_string()));
        }
        if price > self.config.max_ticker_price {
            tracing::info!(
                "{} at {} exceeds max ticker price {}",
                symbol,
                price,
                self.config.max_ticker_price
            );
            return Ok(BuyOutcome::Rejected("price above ceiling".to_string()));
        }
        if negative_bias && price > self.config.max_no_filter_price {
            tracing::info!(
                "{} at {} exceeds no-filter ceiling {} with negative bias",
                symbol,
                price,
                self.config.max_no_filter_price
            );
            return Ok(BuyOutcome::Rejected(
                "negative bias price ceiling".to_string(),
            ));
        }

        let shares = self
            .ledger
            .usd_to_shares(symbol, self.config.buy_budget)
            .await?;
        if shares <= 0 {
            return Ok(BuyOutcome::Rejected("budget buys zero shares".to_string()));
        }

        let limit_price = round4(price * self.config.buy_limit_multiplier);
        let cost = limit_price * shares as f64;

        let balance = self.ledger.balance().await?;
        if cost > balance {
            tracing::info!(
                "Cannot afford {} shares of {} at {} (balance {})",
                shares,
                symbol,
                limit_price,
                balance
            );
            return Ok(BuyOutcome::Rejected("insufficient balance".to_string()));
        }

        self.ledger.add_position_if_absent(symbol).await?;

        if self.config.live_trading {
            let request = OrderRequest {
                price_type: PriceType::Limit,
                term: OrderTerm::GoodForDay,
                limit_price,
                symbol: symbol.to_string(),
                action: OrderAction::Buy,
                quantity: shares,
            };

            match self.broker.place_order(&request).await {
                Ok(OrderReceipt { accepted: true, .. }) => {}
                Ok(OrderReceipt {
                    accepted: false, ..
                }) => {
                    tracing::error!("Buy order for {} was not accepted", symbol);
                    return Ok(BuyOutcome::Failed("order not accepted".to_string()));
                }
                Err(e) => {
                    tracing::error!("Buy order for {} failed: {}", symbol, e);
                    return Ok(BuyOutcome::Failed(e.to_string()));
                }
            }
        }

        if !self.ledger.record_buy(symbol, shares, cost).await? {
            // balance moved between the check and the commit
            return Ok(BuyOutcome::Rejected("insufficient balance".to_string()));
        }

        self.monitor
            .subscribe(
                symbol,
                price * self.config.sell_threshold_multiplier,
                Comparator::Above,
            )
            .await?;

        Ok(BuyOutcome::Placed {
            shares,
            limit_price,
        })
    }

    /// Handle a sell trigger raised by the price monitor.
    pub async fn handle_sell_signal(&self, symbol: &str) -> Result<SellOutcome> {
        let Some(position) = self.ledger.get_position(symbol).await? else {
            tracing::error!("Sell trigger for {} with no matching position!", symbol);
            return Ok(SellOutcome::NoPosition);
        };

        let Some(price) = self.monitor.get_price(symbol).await? else {
            // leave the subscription in place; the monitor will re-fire
            tracing::warn!("No quote for {}; deferring sale", symbol);
            return Ok(SellOutcome::Failed("no quote".to_string()));
        };

        let estimate = -position.stake + position.shares as f64 * price;
        tracing::info!("Profit estimate for selling {}: {}", symbol, estimate);

        let limit_price = round4(price * self.config.sell_limit_multiplier);

        if self.config.live_trading {
            if position.shares == 0 {
                tracing::warn!("{} order never filled; aborting sale", symbol);
                return Ok(SellOutcome::Unfilled);
            }

            let request = OrderRequest {
                price_type: PriceType::Limit,
                term: OrderTerm::GoodForDay,
                limit_price,
                symbol: symbol.to_string(),
                action: OrderAction::Sell,
                quantity: position.shares,
            };

            let placed = match self.broker.place_order(&request).await {
                Ok(receipt) => receipt.accepted,
                Err(e) => {
                    tracing::error!("Sell order for {} failed: {}", symbol, e);
                    false
                }
            };

            if !placed {
                // stop monitoring even though liquidation failed: a
                // re-fire would double-sell, which is the worse failure
                self.monitor.unsubscribe_all(symbol).await?;
                return Ok(SellOutcome::Failed("order not accepted".to_string()));
            }
        }

        self.monitor.unsubscribe_all(symbol).await?;
        let profit = self.ledger.record_full_sale(symbol, &position).await?;

        Ok(SellOutcome::Sold { profit })
    }
}

/// Round a limit price to 4 decimal places for the broker.
fn round4(price: f64) -> f64 {
    (price * 10_000.0).round() / 10_000.0
}

fn is_valid_symbol(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol.len() <= 10
        && symbol.chars().all(|c| c.is_ascii_alphanumeric())
}
