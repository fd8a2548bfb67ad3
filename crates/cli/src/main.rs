//! Duka CLI - Shopping cart from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Add two of a product to the guest cart
//! duka add p-123 --price 1500 --quantity 2 --name "Maasai Shuka"
//!
//! # Show the cart
//! duka show
//!
//! # Apply a coupon
//! duka coupon apply SAVE10
//!
//! # Sign in and move the guest cart into the account's cart
//! CART_API_URL=https://api.duka.shop/v1 CART_API_TOKEN=... duka login
//!
//! # Price a cart file offline
//! duka totals cart.json --coupon FREESHIP
//! ```
//!
//! # Commands
//!
//! - `show` - Show the cart
//! - `add`, `update`, `remove`, `clear` - Edit lines
//! - `coupon apply|remove` - Manage the coupon
//! - `login`, `logout` - Switch between guest and account cart
//! - `totals` - Preview totals for a JSON cart file

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use duka_cart::{
    CartGateway, CartService, CouponEngine, FileStorage, GuestCartStore, GuestStorage,
    HttpCartGateway, HttpGatewayConfig,
};

mod commands;
mod config;
mod offline;
mod session;

use commands::cart::AddOptions;
use commands::{CliError, Context};
use config::{CliConfig, LogFormat};
use offline::OfflineGateway;
use session::SessionFile;

#[derive(Parser)]
#[command(name = "duka")]
#[command(author, version, about = "Duka shopping cart")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the cart
    Show,
    /// Add a product to the cart
    Add {
        /// Product ID
        product_id: String,

        /// Unit price
        #[arg(short, long)]
        price: Decimal,

        #[arg(short, long, default_value_t = 1, allow_negative_numbers = true)]
        quantity: i64,

        /// Display name
        #[arg(short, long)]
        name: Option<String>,

        /// Variant key (size, colour, ...)
        #[arg(short, long)]
        variant: Option<String>,
    },
    /// Set the quantity of a line (0 removes it)
    Update {
        product_id: String,

        #[arg(allow_negative_numbers = true)]
        quantity: i64,

        #[arg(short, long)]
        variant: Option<String>,
    },
    /// Remove a line
    Remove {
        product_id: String,

        #[arg(short, long)]
        variant: Option<String>,
    },
    /// Remove every line
    Clear,
    /// Manage the coupon
    Coupon {
        #[command(subcommand)]
        action: CouponAction,
    },
    /// Sign in and merge the guest cart into the account cart
    Login {
        /// Account (default: `CART_ACCOUNT`)
        account: Option<String>,
    },
    /// Sign out
    Logout,
    /// Preview totals for a JSON cart file without touching any cart
    Totals {
        file: PathBuf,

        /// Coupon to apply to the preview
        #[arg(short, long)]
        coupon: Option<String>,
    },
}

#[derive(Subcommand)]
enum CouponAction {
    /// Apply a coupon code
    Apply { code: String },
    /// Remove a coupon code
    Remove { code: String },
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &CliConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing(config: &CliConfig) {
    // Defaults to info level for our crates if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "duka_cart=info,duka=info".into());

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter));

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

/// Wire the cart service to the configured backend and the guest cart
/// under `CART_STORAGE_DIR`.
async fn build_context(config: CliConfig) -> Result<Context, CliError> {
    let storage: Arc<dyn GuestStorage> = Arc::new(FileStorage::new(&config.storage_dir));
    let guest = GuestCartStore::new(storage.clone(), &config.cart, CouponEngine::default());
    let session = SessionFile::new(storage, guest.writer_id());

    let gateway: Arc<dyn CartGateway> = match &config.api_url {
        Some(base_url) => Arc::new(
            HttpCartGateway::new(HttpGatewayConfig {
                base_url: base_url.clone(),
                token: config.api_token.clone(),
                timeout: config.http_timeout,
                currency: config.cart.pricing.currency,
                max_quantity: config.cart.limits.max_quantity,
            })
            .map_err(duka_cart::CartError::from)?,
        ),
        None => Arc::new(OfflineGateway),
    };

    let service = CartService::new(gateway, guest, config.cart.clone());
    if config.is_online()
        && let Some(account) = session.load()
    {
        service.restore_session(account).await;
    }

    Ok(Context {
        config,
        service,
        session,
    })
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    #[allow(clippy::print_stderr)]
    let config = CliConfig::from_env().unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(2);
    });

    // Sentry must be initialized before the tracing subscriber
    let _sentry_guard = init_sentry(&config);
    init_tracing(&config);

    if let Err(e) = run(cli, config).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: CliConfig) -> Result<(), CliError> {
    // Pure preview, no storage or backend
    if let Commands::Totals { file, coupon } = &cli.command {
        return commands::totals::preview(&config.cart, file, coupon.as_deref());
    }

    let ctx = build_context(config).await?;
    let result = match cli.command {
        Commands::Show => commands::cart::show(&ctx).await,
        Commands::Add {
            product_id,
            price,
            quantity,
            name,
            variant,
        } => {
            commands::cart::add(
                &ctx,
                AddOptions {
                    product_id,
                    quantity,
                    price,
                    name,
                    variant,
                },
            )
            .await
        }
        Commands::Update {
            product_id,
            quantity,
            variant,
        } => commands::cart::update(&ctx, &product_id, quantity, variant.as_deref()).await,
        Commands::Remove {
            product_id,
            variant,
        } => commands::cart::remove(&ctx, &product_id, variant.as_deref()).await,
        Commands::Clear => commands::cart::clear(&ctx).await,
        Commands::Coupon { action } => match action {
            CouponAction::Apply { code } => commands::cart::apply_coupon(&ctx, &code).await,
            CouponAction::Remove { code } => commands::cart::remove_coupon(&ctx, &code).await,
        },
        Commands::Login { account } => commands::account::login(&ctx, account).await,
        Commands::Logout => commands::account::logout(&ctx).await,
        Commands::Totals { .. } => Ok(()),
    };

    // A 401 during the command signs the CLI out
    ctx.reconcile_session();
    result
}
