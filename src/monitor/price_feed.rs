use crate::broker::BrokerApi;
use crate::Result;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Serialized access to the broker's quote endpoint.
///
/// Every price lookup in the process funnels through the one mutex here.
/// That bounds concurrent pressure on the external quote source; it is not
/// needed for correctness of anything downstream.
pub struct PriceFeed {
    broker: Arc<dyn BrokerApi>,
    lock: Mutex<()>,
}

impl PriceFeed {
    pub fn new(broker: Arc<dyn BrokerApi>) -> Self {
        Self {
            broker,
            lock: Mutex::new(()),
        }
    }

    /// Current market price, `None` when the broker has no usable quote.
    pub async fn get_price(&self, symbol: &str) -> Result<Option<f64>> {
        let _guard = self.lock.lock().await;
        self.broker.get_price(symbol).await
    }
}
