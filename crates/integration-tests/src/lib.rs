//! Integration tests for the Duka cart engine.
//!
//! [`FakeBackend`] is an in-process cart backend speaking the REST contract
//! the [`HttpCartGateway`] consumes. Each test starts its own instance on an
//! ephemeral port, so tests run in parallel without shared state.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p duka-integration-tests
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let backend = FakeBackend::start().await;
//! let gateway = backend.gateway();
//! backend.expire_sessions();
//! assert_eq!(gateway.get_cart().await, Err(GatewayError::Unauthorized));
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use url::Url;

use duka_cart::model::line_id_for;
use duka_cart::{
    CartItem, CouponEngine, HttpCartGateway, HttpGatewayConfig, PricingPolicy, TotalsCalculator,
    VariantKey,
};
use duka_core::{CurrencyCode, ProductId};

/// Bearer token the backend accepts.
pub const TOKEN: &str = "test-session-token";

/// A line as the backend stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub product_id: String,
    pub name: String,
    pub price: Decimal,
    pub quantity: u32,
    pub variant: Option<String>,
}

impl Line {
    fn to_item(&self) -> CartItem {
        let product_id = ProductId::new(self.product_id.as_str());
        let variant = self.variant.as_deref().map(VariantKey::new);
        CartItem {
            id: line_id_for(&product_id, variant.as_ref()),
            product_id,
            name: self.name.clone(),
            sku: String::new(),
            unit_price: self.price,
            quantity: self.quantity,
            variant,
            image_ref: None,
            product: None,
        }
    }
}

#[derive(Debug)]
struct Store {
    lines: Vec<Line>,
    coupon: Option<String>,
    has_cart: bool,
    sessions_expired: bool,
    fail_with: Option<StatusCode>,
    delay: Option<Duration>,
    requests: Vec<String>,
}

impl Default for Store {
    fn default() -> Self {
        Self {
            lines: Vec::new(),
            coupon: None,
            has_cart: true,
            sessions_expired: false,
            fail_with: None,
            delay: None,
            requests: Vec::new(),
        }
    }
}

#[derive(Clone)]
struct AppState {
    store: Arc<Mutex<Store>>,
    calculator: TotalsCalculator,
    coupons: CouponEngine,
}

impl AppState {
    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process cart backend.
pub struct FakeBackend {
    base_url: Url,
    state: AppState,
    task: JoinHandle<()>,
}

impl FakeBackend {
    /// Start a backend with an existing, empty cart and default pricing.
    ///
    /// # Panics
    ///
    /// Panics if no local port can be bound.
    pub async fn start() -> Self {
        let state = AppState {
            store: Arc::new(Mutex::new(Store::default())),
            calculator: TotalsCalculator::new(PricingPolicy::default()),
            coupons: CouponEngine::default(),
        };

        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .expect("Failed to bind fake backend");
        let addr = listener.local_addr().expect("Listener has no address");
        let base_url = Url::parse(&format!("http://{addr}/api")).expect("Invalid base URL");

        let app = routes().with_state(state.clone());
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url,
            state,
            task,
        }
    }

    #[must_use]
    pub fn base_url(&self) -> Url {
        self.base_url.clone()
    }

    /// A gateway holding a valid session token.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client can't be built.
    #[must_use]
    pub fn gateway(&self) -> HttpCartGateway {
        self.gateway_with(Some(TOKEN), Duration::from_secs(5))
    }

    /// A gateway with the given token and timeout.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client can't be built.
    #[must_use]
    pub fn gateway_with(&self, token: Option<&str>, timeout: Duration) -> HttpCartGateway {
        HttpCartGateway::new(HttpGatewayConfig {
            base_url: self.base_url(),
            token: token.map(|t| SecretString::from(t.to_string())),
            timeout,
            currency: CurrencyCode::KES,
            max_quantity: 99,
        })
        .expect("Failed to build gateway")
    }

    /// Answer every request with 401 from now on.
    pub fn expire_sessions(&self) {
        self.state.lock().sessions_expired = true;
    }

    /// Answer every request with `status` until [`Self::recover`].
    pub fn fail_with(&self, status: u16) {
        self.state.lock().fail_with = StatusCode::from_u16(status).ok();
    }

    /// Stop failing and accept sessions again.
    pub fn recover(&self) {
        let mut store = self.state.lock();
        store.fail_with = None;
        store.sessions_expired = false;
    }

    /// Delay every response.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = Some(delay);
    }

    /// The account has no cart until the first add.
    pub fn without_cart(&self) {
        let mut store = self.state.lock();
        store.has_cart = false;
        store.lines.clear();
    }

    /// Put a line in the server cart.
    pub fn seed(&self, product_id: &str, price: Decimal, quantity: u32) {
        let mut store = self.state.lock();
        store.has_cart = true;
        add_line(
            &mut store,
            Line {
                product_id: product_id.to_string(),
                name: product_id.to_string(),
                price,
                quantity,
                variant: None,
            },
        );
    }

    /// Current server lines.
    #[must_use]
    pub fn lines(&self) -> Vec<Line> {
        self.state.lock().lines.clone()
    }

    /// Applied coupon code.
    #[must_use]
    pub fn coupon(&self) -> Option<String> {
        self.state.lock().coupon.clone()
    }

    /// Requests received so far, e.g. `POST /cart/items`.
    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().requests.clone()
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// =============================================================================
// Routes
// =============================================================================

fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/cart", get(get_cart).delete(clear_cart))
        .route("/api/cart/items", post(add_item))
        .route(
            "/api/cart/items/{product_id}",
            patch(update_item).delete(remove_item),
        )
        .route("/api/cart/coupon", post(apply_coupon))
        .route("/api/cart/coupon/{code}", delete(remove_coupon))
}

fn error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({ "status": "error", "message": message })),
    )
        .into_response()
}

/// Record the request, apply the configured delay, and check the session.
async fn admit(state: &AppState, headers: &HeaderMap, request: &str) -> Result<(), Response> {
    let delay = {
        let mut store = state.lock();
        store.requests.push(request.to_string());
        store.delay
    };
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let store = state.lock();
    if let Some(status) = store.fail_with {
        return Err(error(status, "Backend unavailable"));
    }
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"));
    if !authorized || store.sessions_expired {
        return Err(error(StatusCode::UNAUTHORIZED, "Session expired"));
    }
    Ok(())
}

fn cart_json(state: &AppState, store: &mut Store) -> Value {
    let items: Vec<Value> = store
        .lines
        .iter()
        .enumerate()
        .map(|(index, line)| {
            json!({
                "_id": format!("line-{index}"),
                "productId": {
                    "_id": line.product_id,
                    "name": line.name,
                    "price": line.price.to_string(),
                },
                "price": line.price.to_string(),
                "quantity": line.quantity,
                "variant": line.variant,
            })
        })
        .collect();

    let cart_items: Vec<CartItem> = store.lines.iter().map(Line::to_item).collect();
    let base = state.calculator.compute(&cart_items, Decimal::ZERO);

    let coupon = store
        .coupon
        .as_deref()
        .and_then(|code| state.coupons.apply(code, &base).ok());
    if coupon.is_none() {
        store.coupon = None;
    }
    let discount = coupon.as_ref().map_or(Decimal::ZERO, |c| c.computed_discount);
    let totals = state.calculator.compute(&cart_items, discount);

    json!({
        "items": items,
        "totals": {
            "subtotal": totals.subtotal,
            "tax": totals.tax,
            "shipping": totals.shipping,
            "discount": totals.discount,
            "total": totals.total,
            "itemCount": totals.item_count,
            "currency": "KES",
        },
        "appliedCoupons": coupon.map(|c| vec![json!({
            "code": c.code.as_str(),
            "type": c.kind,
            "discount": c.computed_discount,
        })]).unwrap_or_default(),
    })
}

fn envelope(state: &AppState, store: &mut Store) -> Response {
    Json(json!({ "status": "success", "data": { "cart": cart_json(state, store) } }))
        .into_response()
}

fn add_line(store: &mut Store, line: Line) {
    if let Some(existing) = store
        .lines
        .iter_mut()
        .find(|l| l.product_id == line.product_id && l.variant == line.variant)
    {
        existing.quantity = (existing.quantity + line.quantity).min(99);
    } else {
        store.lines.push(line);
    }
}

fn variant_of(body: &Value) -> Option<String> {
    body.get("variant").and_then(Value::as_str).map(str::to_owned)
}

async fn get_cart(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = admit(&state, &headers, "GET /cart").await {
        return response;
    }
    let mut store = state.lock();
    if !store.has_cart {
        return error(StatusCode::NOT_FOUND, "Cart not found");
    }
    envelope(&state, &mut store)
}

async fn add_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = admit(&state, &headers, "POST /cart/items").await {
        return response;
    }
    let Some(product_id) = body.get("productId").and_then(Value::as_str) else {
        return error(StatusCode::BAD_REQUEST, "productId is required");
    };
    let quantity = body
        .get("quantity")
        .and_then(Value::as_u64)
        .and_then(|q| u32::try_from(q).ok())
        .filter(|q| (1..=99).contains(q));
    let Some(quantity) = quantity else {
        return error(StatusCode::BAD_REQUEST, "Quantity must be between 1 and 99");
    };
    let price = body
        .get("price")
        .and_then(|p| p.as_f64().map(|f| f.to_string()).or_else(|| p.as_str().map(str::to_owned)))
        .and_then(|p| p.parse::<Decimal>().ok())
        .unwrap_or_default();

    let mut store = state.lock();
    store.has_cart = true;
    add_line(
        &mut store,
        Line {
            product_id: product_id.to_string(),
            name: body
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(product_id)
                .to_string(),
            price,
            quantity,
            variant: variant_of(&body),
        },
    );
    envelope(&state, &mut store)
}

async fn update_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(product_id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = admit(&state, &headers, "PATCH /cart/items").await {
        return response;
    }
    let variant = variant_of(&body);
    let quantity = body
        .get("quantity")
        .and_then(Value::as_u64)
        .and_then(|q| u32::try_from(q).ok());
    let Some(quantity) = quantity else {
        return error(StatusCode::BAD_REQUEST, "quantity is required");
    };

    let mut store = state.lock();
    if quantity == 0 {
        store
            .lines
            .retain(|l| !(l.product_id == product_id && l.variant == variant));
        return envelope(&state, &mut store);
    }
    let Some(line) = store
        .lines
        .iter_mut()
        .find(|l| l.product_id == product_id && l.variant == variant)
    else {
        return error(StatusCode::NOT_FOUND, "Item not in cart");
    };
    line.quantity = quantity.min(99);
    envelope(&state, &mut store)
}

async fn remove_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(product_id): Path<String>,
    body: Bytes,
) -> Response {
    if let Err(response) = admit(&state, &headers, "DELETE /cart/items").await {
        return response;
    }
    let variant = serde_json::from_slice::<Value>(&body)
        .ok()
        .as_ref()
        .and_then(variant_of);

    let mut store = state.lock();
    store
        .lines
        .retain(|l| !(l.product_id == product_id && l.variant == variant));
    envelope(&state, &mut store)
}

async fn clear_cart(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = admit(&state, &headers, "DELETE /cart").await {
        return response;
    }
    let mut store = state.lock();
    store.lines.clear();
    store.coupon = None;
    envelope(&state, &mut store)
}

async fn apply_coupon(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = admit(&state, &headers, "POST /cart/coupon").await {
        return response;
    }
    let code = body.get("code").and_then(Value::as_str).unwrap_or_default();

    let mut store = state.lock();
    let items: Vec<CartItem> = store.lines.iter().map(Line::to_item).collect();
    let base = state.calculator.compute(&items, Decimal::ZERO);
    let Ok(coupon) = state.coupons.apply(code, &base) else {
        return error(StatusCode::BAD_REQUEST, "Invalid coupon code");
    };
    store.coupon = Some(coupon.code.to_string());

    let cart = cart_json(&state, &mut store);
    Json(json!({
        "status": "success",
        "data": { "cart": cart },
        "savings": coupon.computed_discount,
    }))
    .into_response()
}

async fn remove_coupon(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Response {
    if let Err(response) = admit(&state, &headers, "DELETE /cart/coupon").await {
        return response;
    }
    let mut store = state.lock();
    if store
        .coupon
        .as_deref()
        .is_some_and(|c| c.eq_ignore_ascii_case(&code))
    {
        store.coupon = None;
    }
    envelope(&state, &mut store)
}
