use std::env;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use archy_backend::{
    auth::{provider::IdentityProvider, roles, supabase::SupabaseAuth},
    config::AppConfig,
    db::{self, PgPool},
    services::users::{reconcile_identity, OrphanOutcome},
};

const PAGE_SIZE: u32 = 100;
const USAGE: &str = "Usage: maintenance reconcile-identities [--dry-run] | reconcile-identity <uuid>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("reconcile-identities") => {
            let dry_run = args.any(|arg| arg == "--dry-run");
            reconcile_all(dry_run).await?
        }
        Some("reconcile-identity") => {
            let raw = args.next().context("reconcile-identity needs an identity id")?;
            let id = Uuid::parse_str(raw.trim()).context("identity id must be a UUID")?;
            reconcile_one(id).await?
        }
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn connect() -> Result<(PgPool, SupabaseAuth)> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        supabase_url = %config.supabase_url,
        "loaded backend configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let identity = SupabaseAuth::from_config(&config)?;
    Ok((pool, identity))
}

async fn reconcile_one(id: Uuid) -> Result<()> {
    let (pool, identity) = connect()?;
    match reconcile_identity(&pool, &identity, id).await {
        Ok(OrphanOutcome::Deleted) => println!("Deleted orphaned identity {id}."),
        Ok(OrphanOutcome::AlreadyGone) => println!("Identity {id} no longer exists."),
        Err(err) => anyhow::bail!("could not reconcile {id}: {err}"),
    }
    Ok(())
}

/// Walks every identity and removes the ones without a profile.
async fn reconcile_all(dry_run: bool) -> Result<()> {
    let (pool, identity) = connect()?;

    let mut orphans = Vec::new();
    let mut page = 1;
    loop {
        let batch = identity
            .list_users(page, PAGE_SIZE)
            .await
            .map_err(|err| anyhow::anyhow!("failed to list identities: {err}"))?;
        let mut conn = pool.get().context("failed to get database connection")?;
        for found in &batch {
            if roles::find_profile(&mut conn, found.id)
                .context("failed to look up profile")?
                .is_none()
            {
                orphans.push((found.id, found.email_or_empty()));
            }
        }
        if (batch.len() as u32) < PAGE_SIZE {
            break;
        }
        page += 1;
    }

    if orphans.is_empty() {
        println!("No orphaned identities found.");
        return Ok(());
    }

    println!("Found {} orphaned identities.", orphans.len());
    let mut failures = 0;
    for (id, email) in &orphans {
        if dry_run {
            println!("would delete {id} <{email}>");
            continue;
        }
        match reconcile_identity(&pool, &identity, *id).await {
            Ok(_) => println!("deleted {id} <{email}>"),
            Err(err) => {
                failures += 1;
                eprintln!("Failed to delete identity {id}: {err}");
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} identities could not be reconciled");
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
