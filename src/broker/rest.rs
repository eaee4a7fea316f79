use crate::broker::{BrokerApi, BrokerError, FillPage, OrderReceipt, OrderRequest};
use crate::models::{FillAggregate, OrderAction, OrderTerm, PriceType};
use crate::Result;
use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request timeout on every broker call. The upstream design had none; a
/// hung quote endpoint would stall its caller forever.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// REST client for the brokerage API.
///
/// Orders go through the broker's two-step flow: a preview request first,
/// then the actual placement referencing the preview id. An invalid
/// preview aborts the placement.
pub struct RestBroker {
    client: Client,
    base_url: String,
    account_id: String,
    api_token: String,
}

impl RestBroker {
    pub fn new(base_url: &str, account_id: &str, api_token: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            account_id: account_id.to_string(),
            api_token: api_token.to_string(),
        })
    }

    /// Build a client from `BROKER_BASE_URL`, `BROKER_ACCOUNT_ID` and
    /// `BROKER_API_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("BROKER_BASE_URL")
            .map_err(|_| "BROKER_BASE_URL not found in environment")?;
        let account_id = std::env::var("BROKER_ACCOUNT_ID")
            .map_err(|_| "BROKER_ACCOUNT_ID not found in environment")?;
        let api_token = std::env::var("BROKER_API_TOKEN")
            .map_err(|_| "BROKER_API_TOKEN not found in environment")?;

        Self::new(&base_url, &account_id, &api_token)
    }

    fn account_url(&self, suffix: &str) -> String {
        format!("{}/v1/accounts/{}/{}", self.base_url, self.account_id, suffix)
    }

    async fn preview_order(&self, request: &OrderRequest) -> Result<Option<i64>> {
        let url = self.account_url("orders/preview");
        let payload = PreviewEnvelope {
            preview_order_request: OrderPayload::from_request(request),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::error!(
                "Order preview returned status {} for {}",
                response.status(),
                request.symbol
            );
            return Ok(None);
        }

        let parsed: PreviewRespEnvelope = response.json().await?;
        let preview_id = parsed
            .preview_order_response
            .and_then(|r| r.preview_ids.into_iter().next())
            .and_then(|p| p.preview_id);

        if preview_id.is_none() {
            tracing::error!("No preview ids returned for {}", request.symbol);
        }
        Ok(preview_id)
    }
}

#[async_trait]
impl BrokerApi for RestBroker {
    async fn get_price(&self, symbol: &str) -> Result<Option<f64>> {
        let url = format!("{}/v1/market/quote/{}", self.base_url, symbol);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BrokerError::BadStatus {
                endpoint: "quote",
                status: response.status().as_u16(),
            }
            .into());
        }

        let parsed: QuoteEnvelope = response.json().await?;
        let price = parsed
            .quote_response
            .map(|r| r.quote_data)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|q| q.all)
            .filter_map(|a| a.last_trade)
            .next();

        match price {
            Some(p) if p > 0.0 => Ok(Some(p)),
            _ => {
                tracing::warn!("Could not retrieve a usable price for ticker {}", symbol);
                Ok(None)
            }
        }
    }

    async fn get_filled_orders(&self, marker: Option<&str>) -> Result<FillPage> {
        let url = self.account_url("orders");

        let mut query: Vec<(&str, &str)> = vec![("status", "INDIVIDUAL_FILLS")];
        if let Some(m) = marker {
            tracing::debug!("Retrieving fills for marker {}", m);
            query.push(("marker", m));
        }

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .query(&query)
            .send()
            .await?;

        // 204 means no fill history at all
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(FillPage::default());
        }
        if !response.status().is_success() {
            tracing::warn!(
                "Filled-orders request returned status {}; treating as empty",
                response.status()
            );
            return Ok(FillPage::default());
        }

        let parsed: OrdersEnvelope = response.json().await?;
        let Some(orders_response) = parsed.orders_response else {
            return Ok(FillPage::default());
        };

        let mut fills = FillAggregate::new();
        for order in orders_response.order {
            let Some(detail) = order.order_detail.into_iter().next() else {
                tracing::warn!("Order without detail. Skipping...");
                continue;
            };
            let Some(value) = detail.order_value else {
                tracing::warn!("Malformed order. Skipping...");
                continue;
            };
            let Some(instrument) = detail.instrument.into_iter().next() else {
                tracing::warn!("Less than one instrument in order detail. Skipping...");
                continue;
            };

            match (
                instrument.product.and_then(|p| p.symbol),
                instrument.filled_quantity,
                instrument.order_action,
            ) {
                (Some(symbol), Some(quantity), Some(action)) => {
                    fills.apply(&symbol, action, quantity as i64, value);
                }
                _ => {
                    tracing::warn!("Malformed instrument. Skipping...");
                }
            }
        }

        Ok(FillPage {
            fills,
            next_marker: orders_response.marker,
        })
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderReceipt> {
        let Some(preview_id) = self.preview_order(request).await? else {
            tracing::error!("Order preview was invalid. Not placing order!");
            return Ok(OrderReceipt {
                accepted: false,
                order_id: None,
            });
        };

        let url = self.account_url("orders/place");
        let payload = PlaceEnvelope {
            place_order_request: PlacePayload {
                order_type: "EQ",
                client_order_id: client_order_id(),
                preview_ids: vec![PreviewIdBody {
                    preview_id,
                    cash_margin: "CASH",
                }],
                order: vec![OrderBody::from_request(request)],
            },
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::error!(
                "place_order returned status {} for {}",
                response.status(),
                request.symbol
            );
            return Ok(OrderReceipt {
                accepted: false,
                order_id: None,
            });
        }

        let parsed: PlaceRespEnvelope = response.json().await?;
        let order_id = parsed
            .place_order_response
            .and_then(|r| r.order_ids.into_iter().next())
            .and_then(|o| o.order_id);

        match order_id {
            Some(id) => Ok(OrderReceipt {
                accepted: true,
                order_id: Some(id.to_string()),
            }),
            None => {
                tracing::error!("Did not obtain a place order response!");
                Ok(OrderReceipt {
                    accepted: false,
                    order_id: None,
                })
            }
        }
    }
}

fn client_order_id() -> u64 {
    rand::thread_rng().gen_range(1_000_000_000..10_000_000_000)
}

// ---- wire payloads ----

#[derive(Debug, Serialize)]
struct PreviewEnvelope<'a> {
    #[serde(rename = "PreviewOrderRequest")]
    preview_order_request: OrderPayload<'a>,
}

#[derive(Debug, Serialize)]
struct PlaceEnvelope<'a> {
    #[serde(rename = "PlaceOrderRequest")]
    place_order_request: PlacePayload<'a>,
}

#[derive(Debug, Serialize)]
struct OrderPayload<'a> {
    #[serde(rename = "orderType")]
    order_type: &'static str,
    #[serde(rename = "clientOrderId")]
    client_order_id: u64,
    #[serde(rename = "Order")]
    order: Vec<OrderBody<'a>>,
}

impl<'a> OrderPayload<'a> {
    fn from_request(request: &'a OrderRequest) -> Self {
        Self {
            order_type: "EQ",
            client_order_id: client_order_id(),
            order: vec![OrderBody::from_request(request)],
        }
    }
}

#[derive(Debug, Serialize)]
struct PlacePayload<'a> {
    #[serde(rename = "orderType")]
    order_type: &'static str,
    #[serde(rename = "clientOrderId")]
    client_order_id: u64,
    #[serde(rename = "PreviewIds")]
    preview_ids: Vec<PreviewIdBody>,
    #[serde(rename = "Order")]
    order: Vec<OrderBody<'a>>,
}

#[derive(Debug, Serialize)]
struct PreviewIdBody {
    #[serde(rename = "previewId")]
    preview_id: i64,
    #[serde(rename = "cashMargin")]
    cash_margin: &'static str,
}

#[derive(Debug, Serialize)]
struct OrderBody<'a> {
    #[serde(rename = "allOrNone")]
    all_or_none: bool,
    #[serde(rename = "priceType")]
    price_type: PriceType,
    #[serde(rename = "orderTerm")]
    order_term: OrderTerm,
    #[serde(rename = "marketSession")]
    market_session: &'static str,
    #[serde(rename = "limitPrice")]
    limit_price: f64,
    #[serde(rename = "Instrument")]
    instrument: Vec<InstrumentBody<'a>>,
}

impl<'a> OrderBody<'a> {
    fn from_request(request: &'a OrderRequest) -> Self {
        Self {
            all_or_none: false,
            price_type: request.price_type,
            order_term: request.term,
            market_session: "REGULAR",
            limit_price: request.limit_price,
            instrument: vec![InstrumentBody {
                product: ProductBody {
                    security_type: "EQ",
                    symbol: &request.symbol,
                },
                order_action: request.action,
                quantity_type: "QUANTITY",
                quantity: request.quantity,
            }],
        }
    }
}

#[derive(Debug, Serialize)]
struct InstrumentBody<'a> {
    #[serde(rename = "Product")]
    product: ProductBody<'a>,
    #[serde(rename = "orderAction")]
    order_action: OrderAction,
    #[serde(rename = "quantityType")]
    quantity_type: &'static str,
    quantity: i64,
}

#[derive(Debug, Serialize)]
struct ProductBody<'a> {
    #[serde(rename = "securityType")]
    security_type: &'static str,
    symbol: &'a str,
}

// ---- wire responses ----

#[derive(Debug, Deserialize)]
struct QuoteEnvelope {
    #[serde(rename = "QuoteResponse")]
    quote_response: Option<QuoteResponse>,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(rename = "QuoteData", default)]
    quote_data: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(rename = "All")]
    all: Option<QuoteAll>,
}

#[derive(Debug, Deserialize)]
struct QuoteAll {
    #[serde(rename = "lastTrade")]
    last_trade: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OrdersEnvelope {
    #[serde(rename = "OrdersResponse")]
    orders_response: Option<OrdersResponse>,
}

#[derive(Debug, Deserialize)]
struct OrdersResponse {
    #[serde(default)]
    marker: Option<String>,
    #[serde(rename = "Order", default)]
    order: Vec<BrokerOrder>,
}

#[derive(Debug, Deserialize)]
struct BrokerOrder {
    #[serde(rename = "OrderDetail", default)]
    order_detail: Vec<OrderDetail>,
}

#[derive(Debug, Deserialize)]
struct OrderDetail {
    #[serde(rename = "orderValue")]
    order_value: Option<f64>,
    #[serde(rename = "Instrument", default)]
    instrument: Vec<FilledInstrument>,
}

#[derive(Debug, Deserialize)]
struct FilledInstrument {
    #[serde(rename = "Product")]
    product: Option<ProductRef>,
    #[serde(rename = "filledQuantity")]
    filled_quantity: Option<f64>,
    #[serde(rename = "orderAction")]
    order_action: Option<OrderAction>,
}

#[derive(Debug, Deserialize)]
struct ProductRef {
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PreviewRespEnvelope {
    #[serde(rename = "PreviewOrderResponse")]
    preview_order_response: Option<PreviewOrderResponse>,
}

#[derive(Debug, Deserialize)]
struct PreviewOrderResponse {
    #[serde(rename = "PreviewIds", default)]
    preview_ids: Vec<PreviewId>,
}

#[derive(Debug, Deserialize)]
struct PreviewId {
    #[serde(rename = "previewId")]
    preview_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PlaceRespEnvelope {
    #[serde(rename = "PlaceOrderResponse")]
    place_order_response: Option<PlaceOrderResponse>,
}

#[derive(Debug, Deserialize)]
struct PlaceOrderResponse {
    #[serde(rename = "OrderIds", default)]
    order_ids: Vec<OrderId>,
}

#[derive(Debug, Deserialize)]
struct OrderId {
    #[serde(rename = "orderId")]
    order_id: Option<i64>,
}
