//! Kite Connect trading client (Zerodha).
//!
//! Orders are form-encoded and authenticated with
//! `Authorization: token <api_key>:<access_token>`.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::application::ports::{BrokerError, BrokerTradingPort, MarketOrderRequest};
use crate::domain::order::Broker;
use crate::infrastructure::config::KiteCredentials;

use super::http::{decode_response, send_error};

const API_VERSION: &str = "3";

/// Kite response envelope: `{"status": "success", "data": ...}`.
#[derive(Debug, Deserialize)]
struct KiteEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct KiteErrorBody {
    message: Option<String>,
    error_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlacedOrder {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct OrderHistoryEntry {
    status: String,
}

#[derive(Debug, Deserialize)]
struct LtpQuote {
    last_price: Decimal,
}

fn error_message(body: &str) -> Option<String> {
    let parsed: KiteErrorBody = serde_json::from_str(body).ok()?;
    match (parsed.error_type, parsed.message) {
        (Some(kind), Some(message)) => Some(format!("{kind}: {message}")),
        (None, message) => message,
        (kind, None) => kind,
    }
}

/// Kite Connect REST client.
#[derive(Clone)]
pub struct KiteTradingClient {
    client: Client,
    base_url: String,
    credentials: KiteCredentials,
}

impl std::fmt::Debug for KiteTradingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KiteTradingClient")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl KiteTradingClient {
    /// Create a client against `base_url` (e.g. `https://api.kite.trade`).
    #[must_use]
    pub fn new(client: Client, base_url: &str, credentials: KiteCredentials) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    fn authorization(&self) -> String {
        format!(
            "token {}:{}",
            self.credentials.api_key(),
            self.credentials.access_token()
        )
    }
}

#[async_trait]
impl BrokerTradingPort for KiteTradingClient {
    fn broker(&self) -> Broker {
        Broker::Zerodha
    }

    async fn place_market_order(&self, request: &MarketOrderRequest) -> Result<String, BrokerError> {
        let quantity = request.quantity.to_string();
        let form = [
            ("exchange", request.exchange.as_str()),
            ("tradingsymbol", request.symbol.as_str()),
            ("transaction_type", request.side.as_str()),
            ("quantity", quantity.as_str()),
            ("product", request.product.as_str()),
            ("order_type", "MARKET"),
            ("validity", "DAY"),
        ];

        let response = self
            .client
            .post(format!("{}/orders/regular", self.base_url))
            .header("X-Kite-Version", API_VERSION)
            .header("Authorization", self.authorization())
            .form(&form)
            .send()
            .await
            .map_err(|e| send_error(&e))?;

        let envelope: KiteEnvelope<PlacedOrder> =
            decode_response(response, &request.symbol, error_message).await?;
        Ok(envelope.data.order_id)
    }

    async fn order_status(&self, broker_order_id: &str) -> Result<String, BrokerError> {
        let response = self
            .client
            .get(format!("{}/orders/{broker_order_id}", self.base_url))
            .header("X-Kite-Version", API_VERSION)
            .header("Authorization", self.authorization())
            .send()
            .await
            .map_err(|e| send_error(&e))?;

        let envelope: KiteEnvelope<Vec<OrderHistoryEntry>> =
            decode_response(response, broker_order_id, error_message).await?;

        // History is chronological; the last entry is the current state.
        envelope
            .data
            .into_iter()
            .last()
            .map(|entry| entry.status)
            .ok_or_else(|| BrokerError::OrderNotFound {
                order_id: broker_order_id.to_string(),
            })
    }

    async fn last_price(
        &self,
        exchange: &str,
        symbol: &str,
        _instrument_key: &str,
    ) -> Result<Decimal, BrokerError> {
        let instrument = format!("{exchange}:{symbol}");
        let response = self
            .client
            .get(format!("{}/quote/ltp", self.base_url))
            .query(&[("i", instrument.as_str())])
            .header("X-Kite-Version", API_VERSION)
            .header("Authorization", self.authorization())
            .send()
            .await
            .map_err(|e| send_error(&e))?;

        let envelope: KiteEnvelope<HashMap<String, LtpQuote>> =
            decode_response(response, &instrument, error_message).await?;
        envelope
            .data
            .get(&instrument)
            .map(|quote| quote.last_price)
            .ok_or(BrokerError::OrderNotFound {
                order_id: instrument,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{OrderSide, ProductType};
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> KiteTradingClient {
        KiteTradingClient::new(
            Client::new(),
            &server.uri(),
            KiteCredentials::new("key".into(), "secret-token".into()),
        )
    }

    fn exit_request() -> MarketOrderRequest {
        MarketOrderRequest {
            exchange: "NSE".into(),
            symbol: "INFY".into(),
            instrument_key: "408065".into(),
            side: OrderSide::Sell,
            quantity: 10,
            product: ProductType::Intraday,
        }
    }

    #[tokio::test]
    async fn places_market_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders/regular"))
            .and(header("Authorization", "token key:secret-token"))
            .and(header("X-Kite-Version", "3"))
            .and(body_string_contains("tradingsymbol=INFY"))
            .and(body_string_contains("transaction_type=SELL"))
            .and(body_string_contains("order_type=MARKET"))
            .and(body_string_contains("product=MIS"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"order_id": "151220000000000"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server)
            .place_market_order(&exit_request())
            .await
            .unwrap();
        assert_eq!(id, "151220000000000");
    }

    #[tokio::test]
    async fn rejection_carries_broker_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders/regular"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "status": "error",
                "message": "Insufficient funds",
                "error_type": "InputException"
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .place_market_order(&exit_request())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BrokerError::OrderRejected {
                reason: "InputException: Insufficient funds".into()
            }
        );
    }

    #[tokio::test]
    async fn token_errors_are_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "status": "error",
                "message": "Incorrect api_key or access_token.",
                "error_type": "TokenException"
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .place_market_order(&exit_request())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Unauthorized { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn order_status_uses_latest_history_entry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders/ORD-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": [
                    {"status": "PUT ORDER REQ RECEIVED"},
                    {"status": "OPEN"},
                    {"status": "COMPLETE"}
                ]
            })))
            .mount(&server)
            .await;

        let status = client(&server).order_status("ORD-1").await.unwrap();
        assert_eq!(status, "COMPLETE");
    }

    #[tokio::test]
    async fn empty_history_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders/ORD-2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": "success", "data": []})),
            )
            .mount(&server)
            .await;

        let err = client(&server).order_status("ORD-2").await.unwrap_err();
        assert_eq!(
            err,
            BrokerError::OrderNotFound {
                order_id: "ORD-2".into()
            }
        );
    }

    #[tokio::test]
    async fn last_price_reads_ltp_quote() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote/ltp"))
            .and(query_param("i", "NSE:INFY"))
            .and(header("Authorization", "token key:secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"NSE:INFY": {"instrument_token": 408065, "last_price": 1553.55}}
            })))
            .mount(&server)
            .await;

        let ltp = client(&server)
            .last_price("NSE", "INFY", "408065")
            .await
            .unwrap();
        assert_eq!(ltp, rust_decimal_macros::dec!(1553.55));
    }

    #[tokio::test]
    async fn last_price_for_unknown_symbol_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote/ltp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {}
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .last_price("NSE", "NOPE", "0")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BrokerError::OrderNotFound {
                order_id: "NSE:NOPE".into()
            }
        );
    }

    #[test]
    fn debug_redacts_credentials() {
        let client = KiteTradingClient::new(
            Client::new(),
            "https://api.kite.trade/",
            KiteCredentials::new("key".into(), "secret-token".into()),
        );
        let debug = format!("{client:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("https://api.kite.trade"));
    }
}
