use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use snip::codegen::{decode, recommend_length};
use snip::config::Config;
use snip::storage::open_storage;
use snip::telemetry::init_tracing;
use snip::{cancel_pair, BulkEngine, RedirectOutcome, RedirectResolver};

#[derive(Parser)]
#[command(name = "snip-admin")]
#[command(about = "snip short URL maintenance CLI", long_about = None)]
struct Cli {
    /// TOML config file (defaults and SNIP_* environment variables otherwise)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Delete every short URL expired at the given instant (default: now)
    SweepExpired {
        /// RFC 3339 timestamp
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,
    },
    /// Activate short URLs by id
    Activate { ids: Vec<i64> },
    /// Deactivate short URLs by id
    Deactivate { ids: Vec<i64> },
    /// Delete short URLs by id
    Delete { ids: Vec<i64> },
    /// Assign new codes, given as ID=CODE pairs
    Rename {
        #[arg(value_parser = parse_rename)]
        pairs: Vec<(i64, String)>,
    },
    /// Resolve a code as a visitor would (counts a click on success)
    Resolve {
        code: String,
        #[arg(long)]
        password: Option<String>,
    },
    /// Smallest code length keeping the collision probability under a bound
    RecommendLength {
        #[arg(long)]
        volume: u64,
        #[arg(long, default_value_t = 0.001)]
        probability: f64,
    },
    /// Map a generated code back to the id it was derived from
    Decode { code: String },
}

fn parse_rename(pair: &str) -> Result<(i64, String)> {
    let (id, code) = pair
        .split_once('=')
        .ok_or_else(|| anyhow!("expected ID=CODE, got '{pair}'"))?;
    let id = id
        .trim()
        .parse::<i64>()
        .with_context(|| format!("invalid id in '{pair}'"))?;
    Ok((id, code.trim().to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    init_tracing(&config.logging);

    // Commands that need no database
    match &cli.command {
        Commands::RecommendLength {
            volume,
            probability,
        } => {
            let length = recommend_length(*volume, *probability)?;
            println!(
                "✓ {length} characters keep the collision probability for {volume} codes under {probability}"
            );
            return Ok(());
        }
        Commands::Decode { code } => {
            match decode(code) {
                Some(seed) => println!("✓ '{code}' decodes to {seed}"),
                None => println!("⚠ '{code}' is not a generated code"),
            }
            return Ok(());
        }
        _ => {}
    }

    let storage = open_storage(&config.database, &config.cache).await?;
    let bulk = BulkEngine::new(storage.clone(), &config.codes, &config.bulk);

    let (handle, cancel) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping after the current chunk...");
            handle.cancel();
        }
    });

    match cli.command {
        Commands::SweepExpired { as_of } => {
            let as_of = as_of.unwrap_or_else(Utc::now);
            let outcome = bulk.delete_expired(as_of).await?;
            println!("✓ Removed {} expired short URLs (as of {as_of})", outcome.succeeded);
        }
        Commands::Activate { ids } => {
            let outcome = bulk.bulk_activate(&ids, &cancel).await?;
            println!(
                "✓ Activated {} of {} ({} skipped)",
                outcome.succeeded, outcome.requested, outcome.skipped
            );
        }
        Commands::Deactivate { ids } => {
            let outcome = bulk.bulk_deactivate(&ids, &cancel).await?;
            println!(
                "✓ Deactivated {} of {} ({} skipped)",
                outcome.succeeded, outcome.requested, outcome.skipped
            );
        }
        Commands::Delete { ids } => {
            let outcome = bulk.bulk_delete(&ids, &cancel).await?;
            println!(
                "✓ Deleted {} of {} ({} skipped)",
                outcome.succeeded, outcome.requested, outcome.skipped
            );
        }
        Commands::Rename { pairs } => {
            let outcome = bulk.bulk_rename(&pairs, &cancel).await?;
            println!(
                "✓ Renamed {} of {} ({} skipped)",
                outcome.succeeded, outcome.requested, outcome.skipped
            );
        }
        Commands::Resolve { code, password } => {
            let resolver = RedirectResolver::new(storage.clone());
            match resolver.resolve(&code, password.as_deref()).await? {
                RedirectOutcome::Redirect { url } => println!("✓ {code} -> {url}"),
                other => println!("⚠ {code}: {other:?}"),
            }
        }
        Commands::RecommendLength { .. } | Commands::Decode { .. } => {}
    }

    Ok(())
}
