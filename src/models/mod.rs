use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Spendable balance plus accumulated realized profit. Singleton document
/// in the wallet table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub available: f64,
    pub realized_out: f64,
}

impl Wallet {
    pub fn new(available: f64) -> Self {
        Self {
            available,
            realized_out: 0.0,
        }
    }
}

/// Per-symbol holding record. Rows are never deleted, only zeroed on full
/// liquidation, so a symbol's history survives as a `{0, 0.0}` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub shares: i64,
    /// Cumulative cost basis while the position is open.
    pub stake: f64,
}

impl Position {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            shares: 0,
            stake: 0.0,
        }
    }

    /// A position with nonzero shares or stake is considered open and
    /// blocks further buys of the same symbol.
    pub fn is_open(&self) -> bool {
        self.shares != 0 || self.stake != 0.0
    }
}

/// Which side of the threshold fires the trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = ">")]
    Above,
    #[serde(rename = "<")]
    Below,
}

impl Comparator {
    pub fn matches(&self, price: f64, threshold: f64) -> bool {
        match self {
            Comparator::Above => price > threshold,
            Comparator::Below => price < threshold,
        }
    }
}

impl std::fmt::Display for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Comparator::Above => write!(f, ">"),
            Comparator::Below => write!(f, "<"),
        }
    }
}

/// A registered price-threshold trigger tied to a symbol. Owned by the
/// price monitor; duplicates per symbol are permitted and all are removed
/// together on sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub symbol: String,
    pub threshold: f64,
    pub comparator: Comparator,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(symbol: &str, threshold: f64, comparator: Comparator) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            threshold,
            comparator,
            created_at: Utc::now(),
        }
    }
}

/// Order side on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderAction {
    Buy,
    Sell,
}

impl OrderAction {
    pub fn sign(&self) -> i64 {
        match self {
            OrderAction::Buy => 1,
            OrderAction::Sell => -1,
        }
    }
}

impl std::fmt::Display for OrderAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderAction::Buy => write!(f, "BUY"),
            OrderAction::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PriceType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderTerm {
    GoodForDay,
    GoodUntilCancel,
}

/// Net shares and net order value for one symbol within a fill aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NetFill {
    pub shares: i64,
    pub value: f64,
}

/// Transient mapping from symbol to net fills, derived by summing broker
/// fill records. BUY orders add and SELL orders subtract both components.
/// Lives only for a single reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FillAggregate {
    entries: HashMap<String, NetFill>,
}

impl FillAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one fill record into the aggregate.
    pub fn apply(&mut self, symbol: &str, action: OrderAction, shares: i64, value: f64) {
        let entry = self.entries.entry(symbol.to_string()).or_default();
        entry.shares += action.sign() * shares;
        entry.value += action.sign() as f64 * value;
    }

    /// Merge another page of fills into this aggregate.
    pub fn merge(&mut self, other: FillAggregate) {
        for (symbol, fill) in other.entries {
            let entry = self.entries.entry(symbol).or_default();
            entry.shares += fill.shares;
            entry.value += fill.value;
        }
    }

    pub fn get(&self, symbol: &str) -> Option<NetFill> {
        self.entries.get(symbol).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &NetFill)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Sell event sent from the price monitor to the decision engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SellTrigger {
    pub symbol: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_position_is_not_open() {
        let position = Position::new("ABCD");
        assert_eq!(position.shares, 0);
        assert_eq!(position.stake, 0.0);
        assert!(!position.is_open());
    }

    #[test]
    fn test_position_with_stake_only_is_open() {
        // Live-mode buy before any fill lands: shares 0, stake pending
        let position = Position {
            symbol: "ABCD".to_string(),
            shares: 0,
            stake: 100.0,
        };
        assert!(position.is_open());
    }

    #[test]
    fn test_comparator_matches() {
        assert!(Comparator::Above.matches(1.5, 1.0));
        assert!(!Comparator::Above.matches(1.0, 1.0));
        assert!(Comparator::Below.matches(0.5, 1.0));
        assert!(!Comparator::Below.matches(1.0, 1.0));
    }

    #[test]
    fn test_subscription_ids_are_unique() {
        let a = Subscription::new("ABCD", 1.0, Comparator::Above);
        let b = Subscription::new("ABCD", 1.0, Comparator::Above);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_comparator_serializes_as_operator() {
        let sub = Subscription::new("ABCD", 1.0, Comparator::Above);
        let json = serde_json::to_string(&sub).unwrap();
        assert!(json.contains("\">\""));
    }

    #[test]
    fn test_fill_aggregate_buy_and_sell() {
        let mut agg = FillAggregate::new();
        agg.apply("AAPL", OrderAction::Buy, 10, 1000.0);
        agg.apply("AAPL", OrderAction::Sell, 3, 330.0);

        let net = agg.get("AAPL").unwrap();
        assert_eq!(net.shares, 7);
        assert_eq!(net.value, 670.0);
    }

    #[test]
    fn test_fill_aggregate_merge() {
        let mut first = FillAggregate::new();
        first.apply("AAPL", OrderAction::Buy, 10, 1000.0);
        first.apply("MSFT", OrderAction::Buy, 5, 500.0);

        let mut second = FillAggregate::new();
        second.apply("AAPL", OrderAction::Sell, 3, 330.0);

        first.merge(second);
        assert_eq!(first.len(), 2);
        assert_eq!(first.get("AAPL").unwrap().shares, 7);
        assert_eq!(first.get("MSFT").unwrap().shares, 5);
    }
}
