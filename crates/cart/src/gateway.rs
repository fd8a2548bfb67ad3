//! Server cart gateway.
//!
//! A 1:1 mapping of cart operations onto the backend's REST contract:
//!
//! | Operation     | Request                          |
//! |---------------|----------------------------------|
//! | get           | `GET /cart`                      |
//! | add item      | `POST /cart/items`               |
//! | update item   | `PATCH /cart/items/{product_id}` |
//! | remove item   | `DELETE /cart/items/{product_id}`|
//! | clear         | `DELETE /cart`                   |
//! | apply coupon  | `POST /cart/coupon`              |
//! | remove coupon | `DELETE /cart/coupon/{code}`     |
//!
//! No business logic and no retries. Every response is normalized into a
//! [`Cart`]; failures are classified into [`GatewayError`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use duka_core::{CouponCode, CurrencyCode, ProductId};

use crate::model::{AddItemRequest, Cart, OwnerMode, VariantKey};
use crate::normalize::{NormalizeContext, normalize, parse_decimal};

/// Failure classes of the server cart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The session is invalid (HTTP 401).
    #[error("Unauthorized")]
    Unauthorized,

    /// The account has no cart yet (HTTP 404).
    #[error("Cart not found")]
    NotFound,

    /// Any other status, a network failure, or a timeout.
    #[error("Server error ({}): {message}", describe_status(.status))]
    Server {
        status: Option<u16>,
        message: String,
    },
}

impl GatewayError {
    /// HTTP status of the response, if one was received.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized => Some(401),
            Self::NotFound => Some(404),
            Self::Server { status, .. } => *status,
        }
    }
}

fn describe_status(status: &Option<u16>) -> String {
    status.map_or_else(|| "no response".to_string(), |s| s.to_string())
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "request timed out".to_string()
        } else {
            err.to_string()
        };
        Self::Server {
            status: err.status().map(|s| s.as_u16()),
            message,
        }
    }
}

/// Cart returned by a coupon application, with the savings the server
/// reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouponResult {
    pub cart: Cart,
    pub savings: Option<Decimal>,
}

/// The server cart of the current session.
#[async_trait]
pub trait CartGateway: Send + Sync {
    /// Fetch the full cart.
    async fn get_cart(&self) -> Result<Cart, GatewayError>;

    /// Add a line (the server merges matching lines).
    async fn add_item(&self, request: &AddItemRequest) -> Result<Cart, GatewayError>;

    /// Set the quantity of a line.
    async fn update_item(
        &self,
        product_id: &ProductId,
        quantity: u32,
        variant: Option<&VariantKey>,
    ) -> Result<Cart, GatewayError>;

    /// Remove a line.
    async fn remove_item(
        &self,
        product_id: &ProductId,
        variant: Option<&VariantKey>,
    ) -> Result<Cart, GatewayError>;

    /// Remove every line.
    async fn clear(&self) -> Result<Cart, GatewayError>;

    /// Apply a coupon code.
    async fn apply_coupon(&self, code: &CouponCode) -> Result<CouponResult, GatewayError>;

    /// Remove a coupon code.
    async fn remove_coupon(&self, code: &CouponCode) -> Result<Cart, GatewayError>;
}

// =============================================================================
// HttpCartGateway
// =============================================================================

/// Connection settings for [`HttpCartGateway`].
#[derive(Clone)]
pub struct HttpGatewayConfig {
    /// Base URL the cart paths are appended to, e.g. `https://api.duka.shop/v1`.
    pub base_url: Url,
    /// Bearer token of the session.
    pub token: Option<SecretString>,
    pub timeout: Duration,
    /// Currency assumed when a response carries none.
    pub currency: CurrencyCode,
    pub max_quantity: u32,
}

impl std::fmt::Debug for HttpGatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGatewayConfig")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .field("currency", &self.currency)
            .field("max_quantity", &self.max_quantity)
            .finish()
    }
}

/// [`CartGateway`] over HTTP.
#[derive(Clone)]
pub struct HttpCartGateway {
    inner: Arc<HttpCartGatewayInner>,
}

struct HttpCartGatewayInner {
    client: reqwest::Client,
    base_url: Url,
    token: Option<SecretString>,
    context: NormalizeContext,
}

impl HttpCartGateway {
    /// Create a gateway.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn new(config: HttpGatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(HttpCartGatewayInner {
                client,
                base_url: config.base_url,
                token: config.token,
                context: NormalizeContext::new(
                    OwnerMode::Authenticated,
                    config.currency,
                    config.max_quantity,
                ),
            }),
        })
    }

    /// `base_url` with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.inner.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| GatewayError::Server {
                status: None,
                message: format!("invalid base URL: {}", self.inner.base_url),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send a request and return the parsed JSON body.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, GatewayError> {
        let request = match &self.inner.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        if status.is_success() {
            // Some backends report failures in the body with a 200
            if body.get("status").and_then(Value::as_str) == Some("error") {
                return Err(GatewayError::Server {
                    status: Some(status.as_u16()),
                    message: error_message(&body, status),
                });
            }
            return Ok(body);
        }

        debug!(status = status.as_u16(), "Cart backend returned an error");
        Err(match status {
            StatusCode::UNAUTHORIZED => GatewayError::Unauthorized,
            StatusCode::NOT_FOUND => GatewayError::NotFound,
            _ => GatewayError::Server {
                status: Some(status.as_u16()),
                message: error_message(&body, status),
            },
        })
    }

    fn normalize(&self, body: &Value) -> Cart {
        normalize(body, &self.inner.context)
    }
}

fn error_message(body: &Value, status: StatusCode) -> String {
    body.get("message")
        .and_then(Value::as_str)
        .map_or_else(
            || {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            },
            str::to_owned,
        )
}

fn variant_body(variant: Option<&VariantKey>) -> Value {
    variant.map_or_else(|| json!({}), |v| json!({ "variant": v }))
}

/// `savings` from a coupon response, top level or inside `data`.
fn savings(body: &Value) -> Option<Decimal> {
    body.get("savings")
        .or_else(|| body.get("data").and_then(|d| d.get("savings")))
        .and_then(parse_decimal)
}

#[async_trait]
impl CartGateway for HttpCartGateway {
    #[instrument(skip(self))]
    async fn get_cart(&self) -> Result<Cart, GatewayError> {
        let url = self.endpoint(&["cart"])?;
        let body = self.send(self.inner.client.get(url)).await?;
        Ok(self.normalize(&body))
    }

    #[instrument(skip(self, request), fields(product_id = %request.product_id))]
    async fn add_item(&self, request: &AddItemRequest) -> Result<Cart, GatewayError> {
        let url = self.endpoint(&["cart", "items"])?;
        let body = self
            .send(self.inner.client.post(url).json(request))
            .await?;
        Ok(self.normalize(&body))
    }

    #[instrument(skip(self, variant), fields(product_id = %product_id))]
    async fn update_item(
        &self,
        product_id: &ProductId,
        quantity: u32,
        variant: Option<&VariantKey>,
    ) -> Result<Cart, GatewayError> {
        let url = self.endpoint(&["cart", "items", product_id.as_str()])?;
        let mut payload = variant_body(variant);
        payload["quantity"] = json!(quantity);
        let body = self
            .send(self.inner.client.patch(url).json(&payload))
            .await?;
        Ok(self.normalize(&body))
    }

    #[instrument(skip(self, variant), fields(product_id = %product_id))]
    async fn remove_item(
        &self,
        product_id: &ProductId,
        variant: Option<&VariantKey>,
    ) -> Result<Cart, GatewayError> {
        let url = self.endpoint(&["cart", "items", product_id.as_str()])?;
        let body = self
            .send(self.inner.client.delete(url).json(&variant_body(variant)))
            .await?;
        Ok(self.normalize(&body))
    }

    #[instrument(skip(self))]
    async fn clear(&self) -> Result<Cart, GatewayError> {
        let url = self.endpoint(&["cart"])?;
        let body = self.send(self.inner.client.delete(url)).await?;
        Ok(self.normalize(&body))
    }

    #[instrument(skip(self), fields(code = %code))]
    async fn apply_coupon(&self, code: &CouponCode) -> Result<CouponResult, GatewayError> {
        let url = self.endpoint(&["cart", "coupon"])?;
        let body = self
            .send(
                self.inner
                    .client
                    .post(url)
                    .json(&json!({ "code": code.as_str() })),
            )
            .await?;
        Ok(CouponResult {
            cart: self.normalize(&body),
            savings: savings(&body),
        })
    }

    #[instrument(skip(self), fields(code = %code))]
    async fn remove_coupon(&self, code: &CouponCode) -> Result<Cart, GatewayError> {
        let url = self.endpoint(&["cart", "coupon", code.as_str()])?;
        let body = self.send(self.inner.client.delete(url)).await?;
        Ok(self.normalize(&body))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn gateway(base: &str) -> HttpCartGateway {
        HttpCartGateway::new(HttpGatewayConfig {
            base_url: Url::parse(base).unwrap(),
            token: Some(SecretString::from("secret-token".to_string())),
            timeout: Duration::from_secs(5),
            currency: CurrencyCode::KES,
            max_quantity: 99,
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_appends_segments() {
        let gw = gateway("https://api.duka.shop/v1");
        assert_eq!(
            gw.endpoint(&["cart", "items", "p1"]).unwrap().as_str(),
            "https://api.duka.shop/v1/cart/items/p1"
        );

        let gw = gateway("https://api.duka.shop/v1/");
        assert_eq!(
            gw.endpoint(&["cart"]).unwrap().as_str(),
            "https://api.duka.shop/v1/cart"
        );
    }

    #[test]
    fn test_endpoint_encodes_ids() {
        let gw = gateway("http://localhost:8080");
        let url = gw.endpoint(&["cart", "items", "a/b c"]).unwrap();
        assert_eq!(url.path(), "/cart/items/a%2Fb%20c");
    }

    #[test]
    fn test_error_message() {
        let body = json!({"status": "error", "message": "Product is out of stock"});
        assert_eq!(
            error_message(&body, StatusCode::BAD_REQUEST),
            "Product is out of stock"
        );
        assert_eq!(
            error_message(&Value::Null, StatusCode::BAD_GATEWAY),
            "Bad Gateway"
        );
    }

    #[test]
    fn test_savings() {
        assert_eq!(
            savings(&json!({"status": "success", "data": {"cart": {}}, "savings": 100})),
            Some(Decimal::from(100))
        );
        assert_eq!(
            savings(&json!({"data": {"savings": "12.50"}})),
            Some(Decimal::new(1_250, 2))
        );
        assert_eq!(savings(&json!({"data": {}})), None);
    }

    #[test]
    fn test_variant_body() {
        assert_eq!(variant_body(None), json!({}));
        assert_eq!(
            variant_body(Some(&VariantKey::new("red"))),
            json!({"variant": "red"})
        );
    }

    #[test]
    fn test_status() {
        assert_eq!(GatewayError::Unauthorized.status(), Some(401));
        let err = GatewayError::Server {
            status: None,
            message: "connection refused".to_string(),
        };
        assert_eq!(err.status(), None);
        assert_eq!(
            err.to_string(),
            "Server error (no response): connection refused"
        );
    }

    #[test]
    fn test_config_debug_redacts_token() {
        let config = HttpGatewayConfig {
            base_url: Url::parse("http://localhost").unwrap(),
            token: Some(SecretString::from("hunter2".to_string())),
            timeout: Duration::from_secs(1),
            currency: CurrencyCode::KES,
            max_quantity: 99,
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("REDACTED"));
    }
}
