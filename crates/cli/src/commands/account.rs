//! Login and logout.

use tracing::{info, warn};

use duka_core::AccountId;

use super::{CliError, Context};

/// Sign in and move the guest cart into the account's cart.
#[allow(clippy::print_stdout)]
pub async fn login(ctx: &Context, account: Option<String>) -> Result<(), CliError> {
    ctx.config.require_api_url()?;
    let account = AccountId::new(account.unwrap_or_else(|| ctx.config.account.clone()));

    let report = ctx.service.login(account.clone()).await;
    ctx.reconcile_session();

    for failure in &report.failures {
        warn!(
            product_id = %failure.product_id,
            reason = %failure.reason,
            "Guest cart item not synced"
        );
    }
    info!(
        account = %account,
        synced = report.synced,
        failed = report.failures.len(),
        "Login complete"
    );

    if !ctx.service.is_authenticated() {
        println!("Sign-in was rejected; your items are still in the guest cart.");
    } else if report.attempted == 0 {
        println!("Signed in as {account}.");
    } else {
        println!(
            "Signed in as {account}. Moved {} of {} items to your account.",
            report.synced, report.attempted
        );
    }
    Ok(())
}

/// Sign out. The guest cart starts empty.
#[allow(clippy::print_stdout)]
pub async fn logout(ctx: &Context) -> Result<(), CliError> {
    if !ctx.service.is_authenticated() {
        println!("Not signed in.");
        return Ok(());
    }
    ctx.service.logout().await;
    ctx.reconcile_session();
    info!("Logged out");
    println!("Signed out.");
    Ok(())
}
