//! Guest-to-account merge after login.

use tracing::{debug, info, instrument, warn};

use duka_core::ProductId;

use crate::model::{AddItemRequest, VariantKey};
use crate::service::{CartService, CartSource};

/// A guest line that didn't reach the server cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub product_id: ProductId,
    pub variant: Option<VariantKey>,
    pub reason: String,
}

/// Summary of one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Guest lines found.
    pub attempted: usize,
    /// Lines added to the server cart.
    pub synced: usize,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    /// Whether every guest line reached the server cart.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Drains the guest cart into the server cart, once per login.
#[derive(Debug, Clone)]
pub struct SyncCoordinator {
    service: CartService,
}

impl SyncCoordinator {
    #[must_use]
    pub const fn new(service: CartService) -> Self {
        Self { service }
    }

    /// Add every guest line to the server cart, one at a time and in
    /// insertion order, then clear the guest cart.
    ///
    /// Failed lines are logged and reported, never retried. If the server
    /// rejects the session part-way through, the service falls back to the
    /// guest cart and the remaining lines stay there instead of being
    /// cleared.
    #[instrument(skip(self))]
    pub async fn sync(&self) -> SyncReport {
        if !self.service.is_authenticated() {
            debug!("Not authenticated, nothing to sync");
            return SyncReport::default();
        }

        let items = self.service.guest().get().items;
        if items.is_empty() {
            debug!("Guest cart is empty, nothing to sync");
            return SyncReport::default();
        }

        let mut report = SyncReport {
            attempted: items.len(),
            ..SyncReport::default()
        };

        for item in &items {
            let request = AddItemRequest::from_item(item);
            match self.service.add_item(&request).await {
                Ok(outcome) if outcome.source == CartSource::Server => report.synced += 1,
                Ok(_) => {
                    // Session rejected: the line went back into the guest cart
                    report.failures.push(SyncFailure {
                        product_id: item.product_id.clone(),
                        variant: item.variant.clone(),
                        reason: "session expired, kept in guest cart".to_string(),
                    });
                }
                Err(e) => {
                    warn!(
                        product_id = %item.product_id,
                        error = %e,
                        "Failed to sync guest cart item"
                    );
                    report.failures.push(SyncFailure {
                        product_id: item.product_id.clone(),
                        variant: item.variant.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if self.service.is_authenticated() {
            if let Err(e) = self.service.guest().clear() {
                warn!(error = %e, "Failed to clear guest cart after sync");
            }
        } else {
            warn!(
                kept = report.failures.len(),
                "Session ended during sync, unsynced items kept in guest cart"
            );
        }

        info!(
            attempted = report.attempted,
            synced = report.synced,
            failed = report.failures.len(),
            "Guest cart synced"
        );
        report
    }
}
