//! Shared HTTP plumbing for broker adapters.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::application::ports::BrokerError;

/// Build a `reqwest` client with the given request timeout.
///
/// # Errors
///
/// Returns [`BrokerError::Connection`] if the TLS backend fails to initialize.
pub fn build_http_client(timeout: Duration) -> Result<Client, BrokerError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BrokerError::Connection {
            message: e.to_string(),
        })
}

/// Map a send failure onto the port error.
///
/// Only connect-phase failures are [`BrokerError::Connection`]. Anything
/// later (timeout after the request was written, broken body) leaves the
/// broker-side outcome unknown.
pub(super) fn send_error(error: &reqwest::Error) -> BrokerError {
    if error.is_connect() || error.is_builder() {
        BrokerError::Connection {
            message: error.to_string(),
        }
    } else {
        BrokerError::Indeterminate {
            message: error.to_string(),
        }
    }
}

/// Read a response body and decode it, or map the HTTP status to an error.
///
/// `message_of` extracts the broker's human-readable message from an error
/// body; `subject` names the order for not-found errors.
pub(super) async fn decode_response<T, F>(
    response: Response,
    subject: &str,
    message_of: F,
) -> Result<T, BrokerError>
where
    T: DeserializeOwned,
    F: Fn(&str) -> Option<String>,
{
    let status = response.status();
    let body = response.text().await.map_err(|e| send_error(&e))?;

    if status.is_success() {
        return serde_json::from_str(&body).map_err(|e| BrokerError::InvalidResponse {
            message: e.to_string(),
        });
    }

    let message = message_of(&body).unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
    tracing::debug!(status = status.as_u16(), %message, "Broker returned error status");
    Err(status_error(status, subject, message))
}

/// Categorize an HTTP error status.
pub(super) fn status_error(status: StatusCode, subject: &str, message: String) -> BrokerError {
    match status.as_u16() {
        401 | 403 => BrokerError::Unauthorized { message },
        404 => BrokerError::OrderNotFound {
            order_id: subject.to_string(),
        },
        429 => BrokerError::RateLimited,
        400 | 422 => BrokerError::OrderRejected { reason: message },
        408 | 500..=599 => BrokerError::Indeterminate { message },
        _ => BrokerError::InvalidResponse { message },
    }
}
