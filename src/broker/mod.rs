pub mod rest;

pub use rest::RestBroker;

use crate::models::{FillAggregate, OrderAction, OrderTerm, PriceType};
use crate::Result;
use async_trait::async_trait;

/// One page of the broker's filled-order history.
#[derive(Debug, Clone, Default)]
pub struct FillPage {
    pub fills: FillAggregate,
    /// Opaque continuation marker; `None` means the last page.
    pub next_marker: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub price_type: PriceType,
    pub term: OrderTerm,
    pub limit_price: f64,
    pub symbol: String,
    pub action: OrderAction,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderReceipt {
    pub accepted: bool,
    pub order_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker returned status {status} from {endpoint}")]
    BadStatus { endpoint: &'static str, status: u16 },
}

/// Contract with the brokerage collaborator. Everything the core needs:
/// quotes, fill history and order placement.
#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// Latest trade price, `Ok(None)` when the broker has no usable quote.
    async fn get_price(&self, symbol: &str) -> Result<Option<f64>>;

    /// Net filled orders since the start of the broker's order history,
    /// one continuation page at a time.
    async fn get_filled_orders(&self, marker: Option<&str>) -> Result<FillPage>;

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderReceipt>;
}
