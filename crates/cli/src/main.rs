//! shopsync CLI - Drive a storefront session from the terminal.
//!
//! Credentials persist between invocations in the token file, so a session
//! started with `login` is restored by every later command.
//!
//! # Usage
//!
//! ```bash
//! # Sign in (password from --password or SHOPSYNC_PASSWORD)
//! shopsync login -e ada@example.com
//!
//! # Show who is signed in
//! shopsync whoami
//!
//! # Change the display name
//! shopsync profile --first-name Augusta
//!
//! # Put two of product 42 in the cart, then change it to three
//! shopsync cart add 42 -q 2 --price 19.99
//! shopsync cart set 42 3
//!
//! # Save a product for later
//! shopsync wishlist add 7
//!
//! # Sign out
//! shopsync logout
//! ```
//!
//! # Commands
//!
//! - `login`, `register`, `logout`, `whoami`, `profile` - Session management
//! - `cart show|add|set|remove|clear` - Cart
//! - `wishlist show|add|remove` - Wishlist

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use sentry::integrations::tracing as sentry_tracing;
use shopsync_client::api::ProfileUpdate;
use shopsync_client::{Client, ClientConfig, HttpApi, ResourceKind};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod render;

use commands::CliError;

#[derive(Parser)]
#[command(name = "shopsync")]
#[command(author, version, about = "Storefront session, cart and wishlist from the terminal")]
struct Cli {
    /// Where credentials are kept between invocations
    #[arg(
        long,
        global = true,
        env = "SHOPSYNC_TOKEN_FILE",
        default_value = ".shopsync-credentials.json"
    )]
    token_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        #[arg(short, long)]
        email: String,

        #[arg(short, long, env = "SHOPSYNC_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account
    Register {
        #[arg(short, long)]
        username: String,

        #[arg(short, long)]
        email: String,

        #[arg(short, long, env = "SHOPSYNC_PASSWORD", hide_env_values = true)]
        password: String,

        #[arg(long)]
        first_name: String,

        #[arg(long)]
        last_name: String,

        #[arg(long)]
        phone: Option<String>,
    },
    /// Sign out and forget the stored credentials
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Edit the signed-in user's profile
    Profile {
        #[arg(short, long)]
        username: Option<String>,

        #[arg(long)]
        first_name: Option<String>,

        #[arg(long)]
        last_name: Option<String>,

        #[arg(long)]
        phone: Option<String>,

        /// Avatar image URL
        #[arg(long)]
        avatar: Option<String>,
    },
    /// Inspect or change the cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
    /// Inspect or change the wishlist
    Wishlist {
        #[command(subcommand)]
        action: WishlistAction,
    },
}

#[derive(Subcommand)]
enum CartAction {
    /// List the cart
    Show,
    /// Add a product
    Add {
        product: u64,

        #[arg(short, long)]
        variant: Option<u64>,

        #[arg(short, long, default_value_t = 1)]
        quantity: u32,

        /// Unit price shown until the server answers
        #[arg(long, default_value = "0")]
        price: Decimal,
    },
    /// Set the quantity of a line (0 removes it)
    Set {
        product: u64,

        #[arg(allow_negative_numbers = true)]
        quantity: i64,

        #[arg(short, long)]
        variant: Option<u64>,
    },
    /// Remove a line
    Remove {
        product: u64,

        #[arg(short, long)]
        variant: Option<u64>,
    },
    /// Empty the cart
    Clear,
}

#[derive(Subcommand)]
enum WishlistAction {
    /// List the wishlist
    Show,
    /// Save a product
    Add {
        product: u64,

        #[arg(long, default_value = "0")]
        price: Decimal,
    },
    /// Forget a product
    Remove { product: u64 },
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &ClientConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
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

#[tokio::main]
async fn main() {
    // Load .env before clap reads SHOPSYNC_* fallbacks
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match ClientConfig::from_env() {
        Ok(config) => ClientConfig {
            token_file: Some(cli.token_file.clone()),
            ..config
        },
        Err(e) => {
            tracing_subscriber::fmt::init();
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);

    // Defaults to info level for the sync layer if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "shopsync_client=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    if let Err(e) = run(cli.command, &config).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: &ClientConfig) -> Result<(), CliError> {
    let client = commands::connect(config).await?;

    match command {
        Commands::Login { email, password } => {
            commands::session::login(&client, &email, password).await?;
        }
        Commands::Register {
            username,
            email,
            password,
            first_name,
            last_name,
            phone,
        } => {
            commands::session::register(
                &client,
                commands::session::RegisterArgs {
                    username,
                    email,
                    password,
                    first_name,
                    last_name,
                    phone,
                },
            )
            .await?;
        }
        Commands::Logout => commands::session::logout(&client).await,
        Commands::Whoami => commands::session::whoami(&client)?,
        Commands::Profile {
            username,
            first_name,
            last_name,
            phone,
            avatar,
        } => {
            let update = ProfileUpdate {
                username,
                first_name,
                last_name,
                phone,
                avatar,
            };
            commands::session::update_profile(&client, update).await?;
        }
        Commands::Cart { action } => cart(&client, action).await?,
        Commands::Wishlist { action } => wishlist(&client, action).await?,
    }
    Ok(())
}

async fn cart(client: &Client<HttpApi>, action: CartAction) -> Result<(), CliError> {
    use commands::collection;
    let kind = ResourceKind::Cart;

    match action {
        CartAction::Show => collection::show(client, kind).await,
        CartAction::Add {
            product,
            variant,
            quantity,
            price,
        } => collection::add(client, kind, product, variant, quantity, price).await,
        CartAction::Set {
            product,
            quantity,
            variant,
        } => collection::set_quantity(client, kind, product, variant, quantity).await,
        CartAction::Remove { product, variant } => {
            collection::remove(client, kind, product, variant).await
        }
        CartAction::Clear => collection::clear(client, kind).await,
    }
}

async fn wishlist(client: &Client<HttpApi>, action: WishlistAction) -> Result<(), CliError> {
    use commands::collection;
    let kind = ResourceKind::Wishlist;

    match action {
        WishlistAction::Show => collection::show(client, kind).await,
        WishlistAction::Add { product, price } => {
            collection::add(client, kind, product, None, 1, price).await
        }
        WishlistAction::Remove { product } => collection::remove(client, kind, product, None).await,
    }
}
