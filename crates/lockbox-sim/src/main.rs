//! lockbox-sim - pair, lose the phone, recover
//!
//! plays the whole social recovery story in one process: an owner pairs
//! with every helper, the lockbox gets split, the owner's phone is wiped
//! and the vault comes back after pairing with a subset of helpers.
//!
//! usage:
//!   lockbox-sim                                # 4 helpers, recover with 2
//!   lockbox-sim --helpers 7 --recover-with 4
//!   lockbox-sim --config lockbox.toml          # min_helpers etc. from toml
//!
//! exits non-zero when the vault does not come back.

mod net;

use std::path::PathBuf;

use anyhow::{bail, ensure, Context, Result};
use clap::Parser;
use lockbox::{Config, KeyPair, MessageType, OperatingMode};
use tracing::{info, warn};

use net::Net;

const OWNER: &str = "Grand Ma";
const OWNER_PHONE: &str = "12345";

/// lockbox-sim - pair, lose the phone, recover
#[derive(Parser)]
#[command(name = "lockbox-sim")]
#[command(about = "simulate lockbox distribution and social recovery")]
#[command(version)]
struct Args {
    /// helpers to pair with before losing the phone
    #[arg(long, default_value = "4")]
    helpers: usize,

    /// helpers to pair with during recovery (default: half, rounded up)
    #[arg(long)]
    recover_with: Option<usize>,

    /// override min_helpers from the config
    #[arg(long)]
    min_helpers: Option<usize>,

    /// toml config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// accounts to put in the vault
    #[arg(long, default_value = "2")]
    accounts: usize,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            Config::from_toml_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => Config::default(),
    };
    if let Some(min) = args.min_helpers {
        config.min_helpers = min;
    }
    config.validate()?;
    Ok(config)
}

fn helper_name(i: usize) -> String {
    format!("Helper-{i}")
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    ensure!(args.helpers > 0, "need at least one helper");
    let recover_with = args.recover_with.unwrap_or(args.helpers.div_ceil(2));
    ensure!(recover_with <= args.helpers, "cannot recover with more helpers than were paired");

    info!("lockbox-sim v{}", env!("CARGO_PKG_VERSION"));
    info!("  helpers: {}", args.helpers);
    info!("  recover with: {}", recover_with);
    info!("  min helpers: {}", config.min_helpers);

    let mut net = Net::new(config.clone(), 1_700_000_000_000);
    net.join(OWNER, OWNER_PHONE).await?;
    for i in 1..=args.helpers {
        net.join(&helper_name(i), &format!("{}", 1000 + i)).await?;
    }

    for i in 1..=args.accounts {
        let key = if i % 2 == 0 {
            KeyPair::generate_ecdsa()
        } else {
            KeyPair::generate_ed25519()
        };
        net.node_mut(OWNER)?
            .add_account(&format!("{OWNER}'s Account-{i}"), &format!("acct-{i}"), "polkadot", key)?;
    }

    for i in 1..=args.helpers {
        net.pair(OWNER, &helper_name(i))?;
    }

    let owner = net.node(OWNER)?;
    let vault = owner.vault().clone();
    let secret = owner.lockbox().secret().clone();
    let splits = net.relay().sent_count(MessageType::LockboxShareInfoUpdate);
    info!(
        "paired {} helpers, protected: {}, shares sent: {}",
        owner.helpers().len(),
        owner.can_protect(),
        splits
    );
    if !owner.can_protect() {
        warn!("fewer than {} helpers in sync, recovery will fail", config.min_helpers);
    }

    info!("--- {} loses the phone ---", OWNER);
    net.lose_device(OWNER).await?;

    for i in 1..=recover_with {
        net.pair(OWNER, &helper_name(i))?;
        if net.node(OWNER)?.operating_mode() == OperatingMode::Normal {
            info!("recovered after pairing with {} helpers", i);
            break;
        }
    }

    let owner = net.node_mut(OWNER)?;
    if owner.operating_mode() != OperatingMode::Normal {
        bail!("still recovering after pairing with {} helpers", recover_with);
    }
    owner.flush_storage().await?;

    let owner = net.node(OWNER)?;
    ensure!(owner.vault() == &vault, "recovered vault differs from the original");
    ensure!(owner.lockbox().secret() == &secret, "recovered lockbox secret differs");
    ensure!(
        owner.helpers().len() == args.helpers,
        "restored {} of {} helpers",
        owner.helpers().len(),
        args.helpers
    );

    for n in owner.notifications() {
        info!(ts = n.ts, "{}: {}", n.title, n.body);
    }
    info!(
        "done: {} accounts, {} helpers, {} envelopes of share traffic",
        owner.vault().len(),
        owner.helpers().len(),
        net.relay().sent_count(MessageType::LockboxShareInfoUpdate)
            + net.relay().sent_count(MessageType::LockboxShareRetrievalResponse)
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    run(Args::parse()).await
}
