//! Cart service: the single entry point the UI talks to.
//!
//! # State machine
//!
//! - `Guest`: every operation goes to the [`GuestCartStore`].
//! - `Authenticated`: every operation goes to the [`CartGateway`], and each
//!   successful mutation is followed by a full re-read of the server cart.
//!   Totals are never assembled from a single operation's response.
//!
//! `login` moves `Guest -> Authenticated` and drains the guest cart into the
//! server cart ([`SyncCoordinator`]). `logout` moves back and resets the
//! guest cart; the server cart stays on the server.
//!
//! # Consistency
//!
//! Mutations are serialized: a second `add_item` waits for the first one,
//! re-read included. Every mutation and every session transition bumps a
//! generation counter; a response that comes back after the generation
//! moved on is returned to its caller but never committed as the current
//! cart.
//!
//! Failures follow the [`crate::fallback`] decision table.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use moka::future::Cache;
use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument, warn};

use duka_core::{AccountId, CouponCode, ProductId};

use crate::config::CartConfig;
use crate::error::{CartError, ValidationError};
use crate::fallback::{CartOperation, FallbackDecision, decide};
use crate::gateway::{CartGateway, GatewayError};
use crate::guest::{CartEvent, GuestCartStore};
use crate::model::{AddItemRequest, Cart, OwnerMode, VariantKey};
use crate::sync::{SyncCoordinator, SyncReport};
use crate::totals::TotalsCalculator;

/// Upper bound on cached server snapshots (one per account).
const SNAPSHOT_CACHE_CAPACITY: u64 = 1_000;

/// Who the service is acting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Guest,
    Authenticated { account: AccountId },
}

impl SessionState {
    #[must_use]
    pub const fn owner_mode(&self) -> OwnerMode {
        match self {
            Self::Guest => OwnerMode::Guest,
            Self::Authenticated { .. } => OwnerMode::Authenticated,
        }
    }
}

/// Where a returned cart came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartSource {
    /// The guest store.
    Guest,
    /// A full read of the server cart.
    Server,
    /// The server rejected the session; the operation ran on the guest cart.
    DegradedToGuest,
    /// The server was unreachable; the last server cart seen.
    CachedSnapshot,
    /// The server was unreachable and nothing was cached; the guest cart,
    /// shown for display only.
    GuestSnapshot,
}

impl CartSource {
    /// Whether the cart is the system of record for the current session.
    #[must_use]
    pub const fn is_authoritative(self) -> bool {
        matches!(self, Self::Guest | Self::Server | Self::DegradedToGuest)
    }
}

/// A cart plus where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartOutcome {
    pub cart: Cart,
    pub source: CartSource,
}

impl CartOutcome {
    #[must_use]
    pub const fn new(cart: Cart, source: CartSource) -> Self {
        Self { cart, source }
    }

    #[must_use]
    pub const fn is_authoritative(&self) -> bool {
        self.source.is_authoritative()
    }
}

/// One validated mutation, runnable against either store.
#[derive(Debug, Clone, Copy)]
enum Mutation<'a> {
    Add(&'a AddItemRequest),
    Update {
        product_id: &'a ProductId,
        quantity: u32,
        variant: Option<&'a VariantKey>,
    },
    Remove {
        product_id: &'a ProductId,
        variant: Option<&'a VariantKey>,
    },
    Clear,
    ApplyCoupon(&'a CouponCode),
    RemoveCoupon(&'a CouponCode),
}

impl Mutation<'_> {
    const fn operation(self) -> CartOperation {
        match self {
            Self::Add(_) => CartOperation::AddItem,
            Self::Update { .. } => CartOperation::UpdateItem,
            Self::Remove { .. } => CartOperation::RemoveItem,
            Self::Clear => CartOperation::Clear,
            Self::ApplyCoupon(_) => CartOperation::ApplyCoupon,
            Self::RemoveCoupon(_) => CartOperation::RemoveCoupon,
        }
    }

    fn apply_guest(self, guest: &GuestCartStore) -> Result<Cart, CartError> {
        match self {
            Self::Add(request) => guest.add_item(request),
            Self::Update {
                product_id,
                quantity,
                variant,
            } => guest.update_item(product_id, i64::from(quantity), variant),
            Self::Remove {
                product_id,
                variant,
            } => guest.remove_item(product_id, variant),
            Self::Clear => guest.clear(),
            Self::ApplyCoupon(code) => guest.apply_coupon(code.as_str()),
            Self::RemoveCoupon(code) => guest.remove_coupon(code.as_str()),
        }
    }

    /// Run on the server. The response body is discarded: the caller
    /// re-reads the full cart.
    async fn apply_server(self, gateway: &dyn CartGateway) -> Result<(), GatewayError> {
        match self {
            Self::Add(request) => gateway.add_item(request).await.map(drop),
            Self::Update {
                product_id,
                quantity,
                variant,
            } => gateway
                .update_item(product_id, quantity, variant)
                .await
                .map(drop),
            Self::Remove {
                product_id,
                variant,
            } => gateway.remove_item(product_id, variant).await.map(drop),
            Self::Clear => gateway.clear().await.map(drop),
            Self::ApplyCoupon(code) => gateway.apply_coupon(code).await.map(|result| {
                debug!(code = %code, savings = ?result.savings, "Coupon applied on server");
            }),
            Self::RemoveCoupon(code) => gateway.remove_coupon(code).await.map(drop),
        }
    }

    /// Convert a gateway failure into the caller-facing error, matching
    /// what the guest cart reports for the same mistake.
    fn error(self, err: GatewayError) -> CartError {
        match (self, err) {
            (Self::Update { product_id, .. }, GatewayError::NotFound) => {
                ValidationError::ItemNotInCart {
                    product_id: product_id.to_string(),
                }
                .into()
            }
            (Self::ApplyCoupon(code), GatewayError::NotFound) => {
                CartError::InvalidCoupon(code.to_string())
            }
            (
                Self::ApplyCoupon(code) | Self::RemoveCoupon(code),
                GatewayError::Server {
                    status: Some(400 | 422),
                    ..
                },
            ) => CartError::InvalidCoupon(code.to_string()),
            (_, err) => err.into(),
        }
    }
}

struct ServiceInner {
    gateway: Arc<dyn CartGateway>,
    guest: GuestCartStore,
    config: CartConfig,
    calculator: TotalsCalculator,
    session: Mutex<SessionState>,
    /// Serializes mutations and session transitions.
    op_lock: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    /// Last committed cart of the current session.
    current: Mutex<Option<Cart>>,
    /// Last authoritative server cart per account, for display fallback.
    snapshots: Cache<AccountId, Cart>,
}

/// The cart API used by the UI layer.
///
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct CartService {
    inner: Arc<ServiceInner>,
}

impl std::fmt::Debug for CartService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartService")
            .field("session", &self.session())
            .field("guest", &self.inner.guest)
            .finish_non_exhaustive()
    }
}

impl CartService {
    /// Create a service in the `Guest` state.
    #[must_use]
    pub fn new(gateway: Arc<dyn CartGateway>, guest: GuestCartStore, config: CartConfig) -> Self {
        let snapshots = Cache::builder()
            .max_capacity(SNAPSHOT_CACHE_CAPACITY)
            .time_to_live(config.snapshot_ttl)
            .build();

        Self {
            inner: Arc::new(ServiceInner {
                gateway,
                guest,
                calculator: TotalsCalculator::new(config.pricing),
                config,
                session: Mutex::new(SessionState::Guest),
                op_lock: tokio::sync::Mutex::new(()),
                generation: AtomicU64::new(0),
                current: Mutex::new(None),
                snapshots,
            }),
        }
    }

    /// Current session state.
    #[must_use]
    pub fn session(&self) -> SessionState {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self.session(), SessionState::Authenticated { .. })
    }

    /// The guest cart store.
    #[must_use]
    pub fn guest(&self) -> &GuestCartStore {
        &self.inner.guest
    }

    /// Guest cart events.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<CartEvent> {
        self.inner.guest.subscribe()
    }

    /// The last cart committed for the current session, without I/O.
    #[must_use]
    pub fn current(&self) -> Option<Cart> {
        self.inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // =========================================================================
    // Session transitions
    // =========================================================================

    /// Enter `Authenticated` for an existing session (app start with a
    /// stored session). No sync runs.
    #[instrument(skip(self), fields(account = %account))]
    pub async fn restore_session(&self, account: AccountId) {
        let _guard = self.inner.op_lock.lock().await;
        self.transition(SessionState::Authenticated { account });
        info!("Restored authenticated cart session");
    }

    /// Handle a login: enter `Authenticated` and merge the guest cart into
    /// the server cart.
    ///
    /// Logging in again with the account that is already active does
    /// nothing and returns an empty report.
    #[instrument(skip(self), fields(account = %account))]
    pub async fn login(&self, account: AccountId) -> SyncReport {
        {
            let _guard = self.inner.op_lock.lock().await;
            if let SessionState::Authenticated { account: active } = self.session()
                && active == account
            {
                debug!("Already logged in, skipping sync");
                return SyncReport::default();
            }
            self.transition(SessionState::Authenticated { account });
            info!("Logged in");
        }
        SyncCoordinator::new(self.clone()).sync().await
    }

    /// Handle a logout: back to `Guest` with a fresh, empty guest cart.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        let _guard = self.inner.op_lock.lock().await;
        self.reset_to_guest().await;
        info!("Logged out");
    }

    fn transition(&self, next: SessionState) {
        *self
            .inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = next;
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        *self
            .inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Leave `Authenticated` and reset the guest cart. Callers hold the
    /// operation lock.
    async fn reset_to_guest(&self) {
        if let SessionState::Authenticated { account } = self.session() {
            self.inner.snapshots.invalidate(&account).await;
        }
        self.transition(SessionState::Guest);
        match self.inner.guest.clear() {
            Ok(cart) => self.commit(self.generation(), cart),
            Err(e) => warn!(error = %e, "Failed to reset guest cart"),
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read the cart.
    ///
    /// For an authenticated session that can't reach the server, this falls
    /// back to the last cached server cart, then to the guest cart. Check
    /// [`CartOutcome::is_authoritative`] before acting on the result.
    ///
    /// # Errors
    ///
    /// Never fails today: every failure class has a read fallback.
    #[instrument(skip(self))]
    pub async fn get(&self) -> Result<CartOutcome, CartError> {
        let generation = self.generation();

        let SessionState::Authenticated { account } = self.session() else {
            let cart = self.inner.guest.get();
            self.commit(generation, cart.clone());
            return Ok(CartOutcome::new(cart, CartSource::Guest));
        };

        match self.inner.gateway.get_cart().await {
            Ok(cart) => {
                self.record_server_cart(&account, &cart).await;
                self.commit(generation, cart.clone());
                Ok(CartOutcome::new(cart, CartSource::Server))
            }
            Err(err) => match decide(CartOperation::Get, &err) {
                FallbackDecision::TreatAsEmpty => {
                    let cart = self.empty_server_cart();
                    self.commit(generation, cart.clone());
                    Ok(CartOutcome::new(cart, CartSource::Server))
                }
                FallbackDecision::DegradeToGuest => {
                    warn!("Session rejected while reading cart, continuing as guest");
                    let _guard = self.inner.op_lock.lock().await;
                    self.reset_to_guest().await;
                    Ok(CartOutcome::new(
                        self.inner.guest.get(),
                        CartSource::DegradedToGuest,
                    ))
                }
                FallbackDecision::RetryAfterRead
                | FallbackDecision::ServeSnapshot
                | FallbackDecision::Fail => {
                    warn!(error = %err, "Cart server unreachable, serving snapshot");
                    if let Some(cart) = self.inner.snapshots.get(&account).await {
                        return Ok(CartOutcome::new(cart, CartSource::CachedSnapshot));
                    }
                    Ok(CartOutcome::new(
                        self.inner.guest.get(),
                        CartSource::GuestSnapshot,
                    ))
                }
            },
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add a line, merging into an existing `(product_id, variant)` line.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a blank product id, a quantity outside
    /// `1..=max_quantity`, a price outside `0..=max_unit_price`, or a new
    /// line beyond the distinct line limit; otherwise the server failure
    /// class. `CartError::NotFound` means the server still had no cart after
    /// one read-and-retry.
    #[instrument(skip(self, request), fields(product_id = %request.product_id))]
    pub async fn add_item(&self, request: &AddItemRequest) -> Result<CartOutcome, CartError> {
        self.validate_product(&request.product_id)?;
        self.validate_quantity(request.quantity, 1)?;
        self.inner.config.limits.check_price(request.price)?;
        if let Some(err) = self.line_limit_error(&request.product_id, request.variant.as_ref()) {
            return Err(err.into());
        }
        self.mutate(Mutation::Add(request)).await
    }

    /// Set a line's quantity; zero removes the line.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a blank product id or a quantity
    /// outside `0..=max_quantity`, `ValidationError::ItemNotInCart` when the
    /// line doesn't exist (in either mode); otherwise the server failure
    /// class.
    #[instrument(skip(self, variant), fields(product_id = %product_id))]
    pub async fn update_item(
        &self,
        product_id: &ProductId,
        quantity: i64,
        variant: Option<&VariantKey>,
    ) -> Result<CartOutcome, CartError> {
        self.validate_product(product_id)?;
        let quantity = self.validate_quantity(quantity, 0)?;
        if quantity == 0 {
            return self
                .mutate(Mutation::Remove {
                    product_id,
                    variant,
                })
                .await;
        }
        self.mutate(Mutation::Update {
            product_id,
            quantity,
            variant,
        })
        .await
    }

    /// Remove a line.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a blank product id; otherwise the
    /// server failure class.
    #[instrument(skip(self, variant), fields(product_id = %product_id))]
    pub async fn remove_item(
        &self,
        product_id: &ProductId,
        variant: Option<&VariantKey>,
    ) -> Result<CartOutcome, CartError> {
        self.validate_product(product_id)?;
        self.mutate(Mutation::Remove {
            product_id,
            variant,
        })
        .await
    }

    /// Remove every line.
    ///
    /// # Errors
    ///
    /// Returns the server failure class.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<CartOutcome, CartError> {
        self.mutate(Mutation::Clear).await
    }

    /// Apply a coupon, replacing any applied one.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed code,
    /// `CartError::InvalidCoupon` when the code is rejected, otherwise the
    /// server failure class.
    #[instrument(skip(self))]
    pub async fn apply_coupon(&self, code: &str) -> Result<CartOutcome, CartError> {
        let code = CouponCode::parse(code).map_err(ValidationError::from)?;
        self.mutate(Mutation::ApplyCoupon(&code)).await
    }

    /// Remove a coupon.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed code, otherwise the server
    /// failure class.
    #[instrument(skip(self))]
    pub async fn remove_coupon(&self, code: &str) -> Result<CartOutcome, CartError> {
        let code = CouponCode::parse(code).map_err(ValidationError::from)?;
        self.mutate(Mutation::RemoveCoupon(&code)).await
    }

    async fn mutate(&self, mutation: Mutation<'_>) -> Result<CartOutcome, CartError> {
        let _guard = self.inner.op_lock.lock().await;
        let generation = self.next_generation();
        let op = mutation.operation();

        let SessionState::Authenticated { account } = self.session() else {
            debug!(%op, mode = "guest", "Dispatching cart mutation");
            let cart = mutation.apply_guest(&self.inner.guest)?;
            self.commit(generation, cart.clone());
            return Ok(CartOutcome::new(cart, CartSource::Guest));
        };

        debug!(%op, mode = "authenticated", "Dispatching cart mutation");
        let gateway = self.inner.gateway.as_ref();
        let mut result = mutation.apply_server(gateway).await;
        if let Err(err) = &result
            && decide(op, err) == FallbackDecision::RetryAfterRead
        {
            debug!(%op, "Server has no cart yet, reading it and retrying once");
            result = match gateway.get_cart().await {
                Ok(_) | Err(GatewayError::NotFound) => mutation.apply_server(gateway).await,
                Err(err) => Err(err),
            };
        }

        match result {
            Ok(()) => {}
            Err(err) => match decide(op, &err) {
                FallbackDecision::DegradeToGuest => {
                    warn!(%op, "Session rejected, retrying on the guest cart");
                    self.reset_to_guest().await;
                    let generation = self.next_generation();
                    let cart = mutation.apply_guest(&self.inner.guest)?;
                    self.commit(generation, cart.clone());
                    return Ok(CartOutcome::new(cart, CartSource::DegradedToGuest));
                }
                // Removing from a missing cart or line already holds
                FallbackDecision::TreatAsEmpty => {
                    debug!(%op, "Nothing to remove on the server");
                }
                // Still no cart after the retry
                FallbackDecision::RetryAfterRead
                | FallbackDecision::ServeSnapshot
                | FallbackDecision::Fail => {
                    error!(%op, error = %err, "Cart mutation failed");
                    return Err(mutation.error(err));
                }
            },
        }

        let cart = self.reread(&account).await.inspect_err(|e| {
            error!(%op, error = %e, "Re-read after cart mutation failed");
        })?;
        self.commit(generation, cart.clone());
        Ok(CartOutcome::new(cart, CartSource::Server))
    }

    /// Full authoritative read after a mutation.
    async fn reread(&self, account: &AccountId) -> Result<Cart, CartError> {
        match self.inner.gateway.get_cart().await {
            Ok(cart) => {
                self.record_server_cart(account, &cart).await;
                Ok(cart)
            }
            Err(GatewayError::NotFound) => Ok(self.empty_server_cart()),
            Err(err) => Err(err.into()),
        }
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[allow(clippy::unused_self)]
    fn validate_product(&self, product_id: &ProductId) -> Result<(), ValidationError> {
        if product_id.is_blank() {
            return Err(ValidationError::MissingProductId);
        }
        Ok(())
    }

    /// Check `min..=max_quantity` and narrow to `u32`.
    fn validate_quantity(&self, quantity: i64, min: i64) -> Result<u32, ValidationError> {
        let max = self.inner.config.limits.max_quantity;
        if quantity < min || quantity > i64::from(max) {
            return Err(ValidationError::QuantityOutOfRange { quantity, max });
        }
        u32::try_from(quantity).map_err(|_| ValidationError::QuantityOutOfRange { quantity, max })
    }

    /// A new line may not push the cart past `max_unique_items`, judged
    /// against the last known cart of the session.
    ///
    /// An authenticated session with no committed cart yet (right after
    /// `restore_session`, or during the first add of a login sync) has
    /// nothing to judge against, so the add goes to the server and the
    /// server's own limit applies. The re-read after that add makes the
    /// check local again.
    fn line_limit_error(
        &self,
        product_id: &ProductId,
        variant: Option<&VariantKey>,
    ) -> Option<ValidationError> {
        let max = self.inner.config.limits.max_unique_items;
        let known = if self.is_authenticated() {
            self.current()?
        } else {
            self.inner.guest.get()
        };
        (known.find_line(product_id, variant).is_none() && known.items.len() >= max)
            .then_some(ValidationError::TooManyLines { max })
    }

    // =========================================================================
    // Bookkeeping
    // =========================================================================

    fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    fn next_generation(&self) -> u64 {
        self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Make `cart` the current cart unless a newer operation or a session
    /// change happened since `generation` was taken.
    fn commit(&self, generation: u64, cart: Cart) {
        if self.generation() != generation {
            debug!(generation, "Ignoring stale cart response");
            return;
        }
        *self
            .inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(cart);
    }

    fn empty_server_cart(&self) -> Cart {
        Cart::empty(
            OwnerMode::Authenticated,
            self.inner.calculator.policy().currency,
        )
    }

    /// Cache an authoritative server cart and flag totals that disagree with
    /// the local calculation.
    async fn record_server_cart(&self, account: &AccountId, cart: &Cart) {
        let local = self.inner.calculator.compute(&cart.items, cart.totals.discount);
        let server = &cart.totals;
        if local.subtotal != server.subtotal
            || local.tax != server.tax
            || local.shipping != server.shipping
            || local.total != server.total
        {
            warn!(
                server_subtotal = %server.subtotal,
                local_subtotal = %local.subtotal,
                server_tax = %server.tax,
                local_tax = %local.tax,
                server_shipping = %server.shipping,
                local_shipping = %local.shipping,
                server_total = %server.total,
                local_total = %local.total,
                drift = %server.total.saturating_sub(local.total),
                "Server cart totals diverge from local calculation"
            );
        }
        self.inner
            .snapshots
            .insert(account.clone(), cart.clone())
            .await;
    }

    /// Total difference between the server's figures and the local
    /// calculation for `cart`.
    #[must_use]
    pub fn totals_drift(&self, cart: &Cart) -> Decimal {
        let local = self
            .inner
            .calculator
            .compute(&cart.items, cart.totals.discount);
        cart.totals.total.saturating_sub(local.total)
    }
}
