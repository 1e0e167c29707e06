//! Upstox v2 trading client.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::application::ports::{BrokerError, BrokerTradingPort, MarketOrderRequest};
use crate::domain::order::Broker;
use crate::infrastructure::config::UpstoxCredentials;

use super::http::{decode_response, send_error};

/// Upstox response envelope.
///
/// Success: `{"status": "success", "data": ...}`. Errors:
/// `{"status": "error", "errors": [{"errorCode": .., "message": ..}]}`.
#[derive(Debug, Deserialize)]
pub(crate) struct UpstoxEnvelope<T> {
    status: String,
    data: Option<T>,
    #[serde(default)]
    errors: Vec<UpstoxApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpstoxApiError {
    error_code: Option<String>,
    message: Option<String>,
}

impl<T> UpstoxEnvelope<T> {
    /// Unwrap the payload of a successful response.
    pub(crate) fn into_data(self) -> Result<T, BrokerError> {
        if !self.status.eq_ignore_ascii_case("success") {
            return Err(BrokerError::InvalidResponse {
                message: describe_errors(&self.errors)
                    .unwrap_or_else(|| format!("status {}", self.status)),
            });
        }
        self.data.ok_or_else(|| BrokerError::InvalidResponse {
            message: "missing data".to_string(),
        })
    }
}

fn describe_errors(errors: &[UpstoxApiError]) -> Option<String> {
    let first = errors.first()?;
    match (&first.error_code, &first.message) {
        (Some(code), Some(message)) => Some(format!("{code}: {message}")),
        (None, Some(message)) => Some(message.clone()),
        (Some(code), None) => Some(code.clone()),
        (None, None) => None,
    }
}

fn error_message(body: &str) -> Option<String> {
    let parsed: UpstoxEnvelope<serde_json::Value> = serde_json::from_str(body).ok()?;
    describe_errors(&parsed.errors)
}

#[derive(Debug, Serialize)]
struct PlaceOrderBody<'a> {
    quantity: u32,
    product: &'a str,
    validity: &'a str,
    price: u32,
    instrument_token: &'a str,
    order_type: &'a str,
    transaction_type: &'a str,
    disclosed_quantity: u32,
    trigger_price: u32,
    is_amo: bool,
}

#[derive(Debug, Deserialize)]
struct PlacedOrder {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct OrderDetails {
    status: String,
}

#[derive(Debug, Deserialize)]
struct LtpQuote {
    last_price: Decimal,
    instrument_token: Option<String>,
}

/// Upstox REST client.
#[derive(Clone)]
pub struct UpstoxTradingClient {
    client: Client,
    base_url: String,
    credentials: UpstoxCredentials,
}

impl std::fmt::Debug for UpstoxTradingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstoxTradingClient")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl UpstoxTradingClient {
    /// Create a client against `base_url` (e.g. `https://api.upstox.com`).
    #[must_use]
    pub fn new(client: Client, base_url: &str, credentials: UpstoxCredentials) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }
}

#[async_trait]
impl BrokerTradingPort for UpstoxTradingClient {
    fn broker(&self) -> Broker {
        Broker::Upstox
    }

    async fn place_market_order(&self, request: &MarketOrderRequest) -> Result<String, BrokerError> {
        let body = PlaceOrderBody {
            quantity: request.quantity,
            product: request.product.upstox_code(),
            validity: "DAY",
            price: 0,
            instrument_token: &request.instrument_key,
            order_type: "MARKET",
            transaction_type: request.side.as_str(),
            disclosed_quantity: 0,
            trigger_price: 0,
            is_amo: false,
        };

        let response = self
            .client
            .post(format!("{}/v2/order/place", self.base_url))
            .bearer_auth(self.credentials.access_token())
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error(&e))?;

        let envelope: UpstoxEnvelope<PlacedOrder> =
            decode_response(response, &request.instrument_key, error_message).await?;
        Ok(envelope.into_data()?.order_id)
    }

    async fn order_status(&self, broker_order_id: &str) -> Result<String, BrokerError> {
        let response = self
            .client
            .get(format!("{}/v2/order/details", self.base_url))
            .query(&[("order_id", broker_order_id)])
            .bearer_auth(self.credentials.access_token())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| send_error(&e))?;

        let envelope: UpstoxEnvelope<OrderDetails> =
            decode_response(response, broker_order_id, error_message).await?;
        Ok(envelope.into_data()?.status)
    }

    async fn last_price(
        &self,
        _exchange: &str,
        _symbol: &str,
        instrument_key: &str,
    ) -> Result<Decimal, BrokerError> {
        let response = self
            .client
            .get(format!("{}/v2/market-quote/ltp", self.base_url))
            .query(&[("instrument_key", instrument_key)])
            .bearer_auth(self.credentials.access_token())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| send_error(&e))?;

        let envelope: UpstoxEnvelope<HashMap<String, LtpQuote>> =
            decode_response(response, instrument_key, error_message).await?;
        let quotes = envelope.into_data()?;

        // Quotes come back keyed by `EXCHANGE:SYMBOL`, not by the key asked for.
        let quote = match quotes
            .values()
            .find(|q| q.instrument_token.as_deref() == Some(instrument_key))
        {
            Some(quote) => Some(quote),
            None if quotes.len() == 1 => quotes.values().next(),
            None => None,
        };
        quote
            .map(|q| q.last_price)
            .ok_or_else(|| BrokerError::OrderNotFound {
                order_id: instrument_key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{OrderSide, ProductType};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> UpstoxTradingClient {
        UpstoxTradingClient::new(
            Client::new(),
            &server.uri(),
            UpstoxCredentials::new("bearer-xyz".into()),
        )
    }

    fn exit_request(product: ProductType) -> MarketOrderRequest {
        MarketOrderRequest {
            exchange: "NSE".into(),
            symbol: "RELIANCE".into(),
            instrument_key: "NSE_EQ|INE002A01018".into(),
            side: OrderSide::Sell,
            quantity: 5,
            product,
        }
    }

    #[tokio::test]
    async fn places_market_order_with_product_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/order/place"))
            .and(header("Authorization", "Bearer bearer-xyz"))
            .and(body_partial_json(json!({
                "quantity": 5,
                "product": "D",
                "validity": "DAY",
                "instrument_token": "NSE_EQ|INE002A01018",
                "order_type": "MARKET",
                "transaction_type": "SELL",
                "is_amo": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"order_id": "240108010918222"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server)
            .place_market_order(&exit_request(ProductType::Delivery))
            .await
            .unwrap();
        assert_eq!(id, "240108010918222");
    }

    #[tokio::test]
    async fn server_errors_leave_outcome_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server)
            .place_market_order(&exit_request(ProductType::Intraday))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Indeterminate { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn last_price_reads_market_quote() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/market-quote/ltp"))
            .and(query_param("instrument_key", "NSE_EQ|INE002A01018"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"NSE_EQ:RELIANCE": {
                    "last_price": 2873.45,
                    "instrument_token": "NSE_EQ|INE002A01018"
                }}
            })))
            .mount(&server)
            .await;

        let ltp = client(&server)
            .last_price("NSE", "RELIANCE", "NSE_EQ|INE002A01018")
            .await
            .unwrap();
        assert_eq!(ltp, rust_decimal_macros::dec!(2873.45));
    }

    #[tokio::test]
    async fn last_price_without_quote_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/market-quote/ltp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {}
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .last_price("NSE", "RELIANCE", "NSE_EQ|INE002A01018")
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::OrderNotFound { .. }));
    }

    #[tokio::test]
    async fn rejection_uses_error_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "status": "error",
                "errors": [{"errorCode": "UDAPI100060", "message": "Resource not Found."}]
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .place_market_order(&exit_request(ProductType::Intraday))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BrokerError::OrderRejected {
                reason: "UDAPI100060: Resource not Found.".into()
            }
        );
    }

    #[tokio::test]
    async fn order_status_reads_details() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/order/details"))
            .and(query_param("order_id", "240108010918222"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"order_id": "240108010918222", "status": "cancelled"}
            })))
            .mount(&server)
            .await;

        let status = client(&server)
            .order_status("240108010918222")
            .await
            .unwrap();
        assert_eq!(status, "cancelled");
    }

    #[test]
    fn envelope_without_data_is_invalid() {
        let envelope: UpstoxEnvelope<PlacedOrder> =
            serde_json::from_str(r#"{"status":"success"}"#).unwrap();
        assert!(matches!(
            envelope.into_data(),
            Err(BrokerError::InvalidResponse { .. })
        ));
    }
}
