//! Cart subcommands.

use rust_decimal::Decimal;
use tracing::info;

use duka_cart::{AddItemRequest, VariantKey};
use duka_core::ProductId;

use super::{CliError, Context, print_cart};

/// Show the cart.
pub async fn show(ctx: &Context) -> Result<(), CliError> {
    let outcome = ctx.service.get().await?;
    print_cart(&outcome);
    Ok(())
}

/// Options for `add`.
#[derive(Debug, Clone)]
pub struct AddOptions {
    pub product_id: String,
    pub quantity: i64,
    pub price: Decimal,
    pub name: Option<String>,
    pub variant: Option<String>,
}

/// Add a line.
pub async fn add(ctx: &Context, options: AddOptions) -> Result<(), CliError> {
    let mut request = AddItemRequest::new(options.product_id, options.quantity, options.price);
    if let Some(name) = options.name {
        request = request.with_name(name);
    }
    if let Some(variant) = options.variant {
        request = request.with_variant(variant);
    }

    let outcome = ctx.service.add_item(&request).await?;
    info!(
        product_id = %request.product_id,
        quantity = request.quantity,
        "Added to cart"
    );
    print_cart(&outcome);
    Ok(())
}

/// Set a line's quantity.
pub async fn update(
    ctx: &Context,
    product_id: &str,
    quantity: i64,
    variant: Option<&str>,
) -> Result<(), CliError> {
    let variant = variant.map(VariantKey::new);
    let outcome = ctx
        .service
        .update_item(&ProductId::new(product_id), quantity, variant.as_ref())
        .await?;
    info!(product_id, quantity, "Updated cart item");
    print_cart(&outcome);
    Ok(())
}

/// Remove a line.
pub async fn remove(ctx: &Context, product_id: &str, variant: Option<&str>) -> Result<(), CliError> {
    let variant = variant.map(VariantKey::new);
    let outcome = ctx
        .service
        .remove_item(&ProductId::new(product_id), variant.as_ref())
        .await?;
    info!(product_id, "Removed from cart");
    print_cart(&outcome);
    Ok(())
}

/// Remove every line.
pub async fn clear(ctx: &Context) -> Result<(), CliError> {
    let outcome = ctx.service.clear().await?;
    info!("Cart cleared");
    print_cart(&outcome);
    Ok(())
}

/// Apply a coupon code.
pub async fn apply_coupon(ctx: &Context, code: &str) -> Result<(), CliError> {
    let outcome = ctx.service.apply_coupon(code).await?;
    info!(code, discount = %outcome.cart.totals.discount, "Coupon applied");
    print_cart(&outcome);
    Ok(())
}

/// Remove a coupon code.
pub async fn remove_coupon(ctx: &Context, code: &str) -> Result<(), CliError> {
    let outcome = ctx.service.remove_coupon(code).await?;
    info!(code, "Coupon removed");
    print_cart(&outcome);
    Ok(())
}
