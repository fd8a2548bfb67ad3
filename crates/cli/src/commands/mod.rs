//! Subcommand implementations.

pub mod account;
pub mod cart;
pub mod totals;

use thiserror::Error;
use tracing::warn;

use duka_cart::display::{CartSummary, CartView};
use duka_cart::{CartError, CartOutcome, CartService, SessionState, StorageError};

use crate::config::{CliConfig, ConfigError};
use crate::session::SessionFile;

/// Errors a command can fail with.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{}", .0.user_message())]
    Cart(#[from] CartError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid cart file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything a command needs.
#[derive(Debug)]
pub struct Context {
    pub config: CliConfig,
    pub service: CartService,
    pub session: SessionFile,
}

impl Context {
    /// Bring the session file in line with the service. A forced logout
    /// during the command signs the CLI out too.
    pub fn reconcile_session(&self) {
        let result = match self.service.session() {
            SessionState::Authenticated { account } => {
                if self.session.load().as_ref() == Some(&account) {
                    return;
                }
                self.session.save(&account)
            }
            SessionState::Guest => {
                if self.session.load().is_none() {
                    return;
                }
                warn!("Session ended, signing out");
                self.session.clear()
            }
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to update session file");
        }
    }
}

/// Print a cart to stdout.
#[allow(clippy::print_stdout)]
pub fn print_cart(outcome: &CartOutcome) {
    let view = CartView::from(outcome);
    let summary = CartSummary::from(outcome);

    if let Some(notice) = view.notice {
        println!("! {notice}");
    }
    println!("{summary}");
    if view.items.is_empty() {
        return;
    }
    println!();
    for item in &view.items {
        let variant = item
            .variant
            .as_deref()
            .map_or_else(String::new, |v| format!(" [{v}]"));
        println!(
            "  {:>3} x {}{variant}  @ {}  = {}",
            item.quantity, item.name, item.price, item.line_price
        );
    }
    println!();
    println!("  Subtotal  {}", view.subtotal);
    if let Some(discount) = &view.discount {
        let code = view.coupon.as_deref().unwrap_or_default();
        println!("  Discount  -{discount} {code}");
    }
    println!("  Tax       {}", view.tax);
    println!("  Shipping  {}", view.shipping);
    println!("  Total     {}", view.total);
}
