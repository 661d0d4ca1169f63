//! Userbot Pool - Administrative CLI
//!
//! Inspects and maintains the pool of userbot accounts: listing, releasing,
//! health checks, registration and removal.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use userbot_pool::blob::{BlobStore, FsBlobStore, HttpBlobStore};
use userbot_pool::config::{IdentityConfig, ProvisionSettings, StorageConfig};
use userbot_pool::credentials::CredentialResolver;
use userbot_pool::pool::PoolManager;
use userbot_pool::store::{AccountId, PgStore, Repository};
use userbot_pool::telegram::{GrammersConnector, SpamStatus};
use userbot_pool::userbot::UserbotManager;

/// Administrative tool for the userbot pool.
#[derive(Parser, Debug)]
#[command(name = "userbot_pool")]
#[command(about = "Inspect and maintain the pool of campaign userbots")]
#[command(version)]
struct Args {
    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env", global = true)]
    env_file: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every account with its occupancy.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Return occupied accounts to the pool.
    Reset {
        /// Free every occupied account.
        #[arg(long, conflicts_with = "bot", required_unless_present = "bot")]
        all: bool,

        /// Free a single account.
        #[arg(long)]
        bot: Option<AccountId>,

        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Connect to an account and report its identity and spam status.
    Check {
        id: AccountId,

        #[arg(long)]
        json: bool,
    },

    /// Register a local session file as a pooled account.
    Register {
        /// Administrator the account belongs to.
        #[arg(long)]
        owner: i64,

        file: PathBuf,
    },

    /// Delete an account together with its stored session.
    Remove { id: AccountId },

    /// List the campaigns of one customer.
    Campaigns {
        /// Customer's external id.
        user: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    let storage =
        StorageConfig::from_env().context("Failed to load storage configuration from environment")?;
    let identity =
        IdentityConfig::from_env().context("Failed to load Telegram identity from environment")?;
    let settings = ProvisionSettings::from_env_with_defaults();

    let repo = match connect_store(&storage).await {
        Ok(repo) => repo,
        Err(e) => {
            error!("Store is unreachable: {e:#}");
            std::process::exit(1);
        }
    };

    let blob = blob_store(&storage).context("Failed to configure blob storage")?;
    let resolver = CredentialResolver::new(
        blob.clone(),
        storage.sessions_prefix.clone(),
        storage.local_session_dirs.clone(),
    );
    let userbots = UserbotManager::new(
        Arc::clone(&repo),
        blob,
        resolver,
        Arc::new(GrammersConnector::new(identity.api_id)),
    )
    .with_spam_timeout(settings.spam_check_timeout());
    let pool = PoolManager::new(Arc::clone(&repo));

    if let Err(e) = run(args.command, &repo, &pool, &userbots).await {
        error!("{e:#}");
        eprintln!("✗ {e:#}");
    }

    Ok(())
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn connect_store(storage: &StorageConfig) -> Result<Arc<dyn Repository>> {
    let store = PgStore::connect(&storage.database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    store.ping().await.context("Ping failed")?;
    store.migrate().await.context("Failed to ensure schema")?;
    Ok(Arc::new(store))
}

/// Picks the HTTP endpoint when configured, else a local bucket directory.
fn blob_store(storage: &StorageConfig) -> Result<Option<Arc<dyn BlobStore>>> {
    if let Some(endpoint) = &storage.blob_endpoint {
        let bucket = storage
            .blob_bucket
            .clone()
            .context("BLOB_BUCKET must be set together with BLOB_ENDPOINT")?;
        let store = HttpBlobStore::new(
            reqwest::Client::new(),
            endpoint,
            bucket,
            storage.blob_token.clone(),
        )?;
        info!("Using blob endpoint {endpoint}");
        return Ok(Some(Arc::new(store)));
    }

    Ok(storage.blob_dir.as_ref().map(|dir| {
        info!("Using blob directory {}", dir.display());
        Arc::new(FsBlobStore::new(dir.clone())) as Arc<dyn BlobStore>
    }))
}

async fn run(
    command: Command,
    repo: &Arc<dyn Repository>,
    pool: &PoolManager,
    userbots: &UserbotManager,
) -> Result<()> {
    match command {
        Command::List { json } => list(pool, json).await,
        Command::Reset { all, bot, yes } => reset(pool, all, bot, yes).await,
        Command::Check { id, json } => check(userbots, id, json).await,
        Command::Register { owner, file } => {
            let registration = userbots
                .register_account(owner, &file)
                .await
                .with_context(|| format!("Failed to register {}", file.display()))?;
            let account = registration.account;
            println!(
                "✓ Registered account {} (external id {}) as {}",
                account.id, account.external_account_id, account.credential_reference
            );
            if registration.replaced {
                println!("  Replaced an earlier registration of the same identity");
            }
            Ok(())
        }
        Command::Remove { id } => {
            let report = userbots
                .remove_account(id)
                .await
                .with_context(|| format!("Failed to remove account {id}"))?;
            println!(
                "✓ Removed account {id} (stored session deleted: {}, local copy deleted: {})",
                report.blob_deleted, report.local_deleted
            );
            Ok(())
        }
        Command::Campaigns { user } => {
            let campaigns = repo.campaigns_for(user).await?;
            if campaigns.is_empty() {
                println!("No campaigns for user {user}");
            }
            for summary in campaigns {
                let campaign = &summary.campaign;
                println!(
                    "{:>4}  {:<24}  bot={:<20}  until {}",
                    campaign.id,
                    campaign.name,
                    summary.account_name.as_deref().unwrap_or("-"),
                    campaign.paid_until.format("%Y-%m-%d %H:%M")
                );
            }
            Ok(())
        }
    }
}

async fn list(pool: &PoolManager, json: bool) -> Result<()> {
    let accounts = pool.list().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&accounts)?);
        return Ok(());
    }

    for account in &accounts {
        println!(
            "{:>4}  {:<8}  {:<32}  owner={}",
            account.id,
            if account.occupied { "occupied" } else { "free" },
            account.label(),
            account.owner_id
        );
    }
    let stats = pool.stats().await?;
    println!(
        "\n{} accounts: {} occupied, {} free",
        stats.total, stats.occupied, stats.free
    );
    Ok(())
}

async fn reset(pool: &PoolManager, all: bool, bot: Option<AccountId>, yes: bool) -> Result<()> {
    if let Some(id) = bot {
        pool.reset_one(id).await?;
        println!("✓ Account {id} is free");
        return Ok(());
    }
    if !all {
        return Ok(());
    }

    let stats = pool.stats().await?;
    if stats.occupied == 0 {
        println!("No occupied accounts");
        return Ok(());
    }

    let confirmed = yes
        || Confirm::new()
            .with_prompt(format!("Free all {} occupied accounts?", stats.occupied))
            .default(false)
            .interact()?;
    if !confirmed {
        println!("Aborted");
        return Ok(());
    }

    let freed = pool.reset_all().await?;
    println!("✓ Freed {freed} accounts");
    Ok(())
}

async fn check(userbots: &UserbotManager, id: AccountId, json: bool) -> Result<()> {
    let report = userbots
        .check_session(id)
        .await
        .with_context(|| format!("Session check failed for account {id}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let identity = &report.identity;
    println!("Account {id} ({} session)", report.source);
    println!("  id:       {}", identity.id);
    println!("  name:     {}", identity.first_name);
    println!(
        "  username: {}",
        identity.username.as_deref().map_or_else(|| "-".to_owned(), |u| format!("@{u}"))
    );
    let spam = match &report.spam {
        SpamStatus::Clear => "no restrictions".to_owned(),
        SpamStatus::Limited => "spam-limited".to_owned(),
        SpamStatus::Other(reply) => format!("unrecognized reply: {reply}"),
        SpamStatus::Unknown => "no reply".to_owned(),
    };
    println!("  spam:     {spam}");
    Ok(())
}
