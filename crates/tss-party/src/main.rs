//! TSS Party CLI
//!
//! Command-line interface for threshold key operations:
//! - Local distributed key generation (DKG) over an in-memory network
//! - Optional key refresh of the generated shares
//! - Private key recovery from a JSON share file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{info, Level};
use tss_core::{
    config::RecoveryConfig,
    keygen::{derive_session_id, Dkg, DkgConfig, DkgResult, KeyRefresh, KeygenMessage},
    mpc::MemoryNetwork,
    recovery::{recover_private_key, RecoveryPeer},
    types::scalar_to_decimal,
    PartyId,
};

/// TSS Party - threshold key tooling
#[derive(Parser)]
#[command(name = "tss-party")]
#[command(about = "Ranked threshold key generation and recovery")]
#[command(version)]
struct Cli {
    /// Print results as JSON
    #[arg(long, env = "TSS_JSON", global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recover a private key from a share file
    Recover {
        /// Path to the recovery config (JSON)
        #[arg(short, long, env = "TSS_RECOVERY_CONFIG")]
        config: PathBuf,
    },

    /// Run a local DKG among in-process parties
    Dkg {
        /// Number of parties
        #[arg(short = 'n', long, default_value_t = tss_core::DEFAULT_PARTIES)]
        parties: usize,

        /// Threshold (t-of-n)
        #[arg(short, long, default_value_t = tss_core::DEFAULT_THRESHOLD)]
        threshold: usize,

        /// Rank of each party (comma-separated, defaults to all zero)
        #[arg(short, long, value_delimiter = ',')]
        ranks: Vec<u32>,

        /// Abort the session after this many seconds
        #[arg(long, env = "TSS_TIMEOUT_SECS", default_value_t = 30)]
        timeout_secs: u64,

        /// Refresh the shares once after keygen
        #[arg(long)]
        refresh: bool,

        /// Write a recovery config for the generated shares
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct PartySummary {
    id: PartyId,
    share: String,
    bk_x: String,
    bk_rank: u32,
}

#[derive(Serialize)]
struct DkgSummary {
    public_key: String,
    threshold: usize,
    parties: Vec<PartySummary>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Recover { ref config } => {
            run_recover(cli.json, config)?;
        }
        Commands::Dkg {
            parties,
            threshold,
            ref ranks,
            timeout_secs,
            refresh,
            ref out,
        } => {
            let ranks = if ranks.is_empty() {
                vec![0; parties]
            } else {
                ranks.clone()
            };
            let timeout = Duration::from_secs(timeout_secs);
            run_dkg(cli.json, parties, threshold, ranks, timeout, refresh, out.as_deref()).await?;
        }
    }

    Ok(())
}

fn run_recover(json: bool, path: &Path) -> Result<()> {
    let config = RecoveryConfig::load(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    info!(
        peers = config.peers.len(),
        threshold = config.threshold,
        "Recovering private key"
    );

    let key = config.recover()?;

    if json {
        let output = serde_json::json!({
            "curve": key.curve.to_string(),
            "private_key": key.private_key_hex().as_str(),
            "public_key": key.public_key_hex(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Curve: {}", key.curve);
        println!("Private Key: {}", key.private_key_hex().as_str());
        println!("Public Key: {}", key.public_key_hex());
    }

    Ok(())
}

async fn run_dkg(
    json: bool,
    n: usize,
    threshold: usize,
    ranks: Vec<u32>,
    timeout: Duration,
    refresh: bool,
    out: Option<&Path>,
) -> Result<()> {
    anyhow::ensure!(
        ranks.len() == n,
        "Expected {} ranks, got {}",
        n,
        ranks.len()
    );

    let party_ids: Vec<PartyId> = (0..n).map(|i| format!("id-{}", i)).collect();
    let nonce: [u8; 32] = rand::random();
    let session_id = derive_session_id(&party_ids, &nonce);

    info!(
        n_parties = n,
        threshold,
        session_id = hex::encode(session_id),
        "Starting DKG"
    );

    let network = MemoryNetwork::<KeygenMessage>::new();
    let mut sessions = Vec::with_capacity(n);
    for (id, rank) in party_ids.iter().zip(&ranks) {
        let config = DkgConfig::new(session_id, id.clone(), party_ids.clone(), threshold)
            .with_rank(*rank);
        let dkg = Dkg::new(config, Arc::new(network.peer_manager(id.clone(), &party_ids)))?;
        network.register(id.clone(), dkg.sink());
        sessions.push(dkg);
    }

    let mut results = run_sessions(sessions, timeout, |dkg| async move { dkg.run().await }).await?;

    if refresh {
        let session_id = derive_session_id(&party_ids, &rand::random::<[u8; 32]>());
        let network = MemoryNetwork::<KeygenMessage>::new();
        let mut sessions = Vec::with_capacity(n);
        for previous in &results {
            let peers = Arc::new(network.peer_manager(previous.self_id.clone(), &party_ids));
            let session = KeyRefresh::new(previous, session_id, peers)?;
            network.register(previous.self_id.clone(), session.sink());
            sessions.push(session);
        }

        results = run_sessions(sessions, timeout, |session| async move { session.run().await })
            .await?;
        info!("Key refresh completed");
    }

    check_recovery(&results)?;
    print_summary(json, &results)?;

    if let Some(path) = out {
        RecoveryConfig::from_dkg_results(&results)?.save(path)?;
        info!(path = %path.display(), "Recovery config written");
    }

    Ok(())
}

/// Run every party concurrently under one deadline, ordered by party id
async fn run_sessions<S, F, Fut>(sessions: Vec<S>, timeout: Duration, run: F) -> Result<Vec<DkgResult>>
where
    S: Send + 'static,
    F: Fn(Arc<S>) -> Fut,
    Fut: std::future::Future<Output = tss_core::Result<DkgResult>> + Send + 'static,
{
    let mut tasks = JoinSet::new();
    for session in sessions {
        tasks.spawn(run(Arc::new(session)));
    }

    let collect = async {
        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            results.push(joined.context("Party task panicked")??);
        }
        anyhow::Ok(results)
    };

    let mut results = tokio::time::timeout(timeout, collect)
        .await
        .context("Session timed out")??;
    results.sort_by(|a, b| a.self_id.cmp(&b.self_id));
    Ok(results)
}

/// Recover the key from all shares and compare it against the public key
fn check_recovery(results: &[DkgResult]) -> Result<()> {
    let first = results.first().context("No DKG results")?;
    let peers = results
        .iter()
        .map(DkgResult::recovery_peer)
        .collect::<tss_core::Result<Vec<RecoveryPeer<k256::Scalar>>>>()?;

    recover_private_key(first.threshold, &first.public_key, &peers)
        .context("Generated shares do not recover the public key")?;
    Ok(())
}

fn print_summary(json: bool, results: &[DkgResult]) -> Result<()> {
    let first = results.first().context("No DKG results")?;

    let parties = results
        .iter()
        .map(|result| {
            let bk = result.bk()?;
            Ok(PartySummary {
                id: result.self_id.clone(),
                share: scalar_to_decimal::<k256::Secp256k1>(&result.share),
                bk_x: scalar_to_decimal::<k256::Secp256k1>(&bk.x()),
                bk_rank: bk.rank(),
            })
        })
        .collect::<tss_core::Result<Vec<_>>>()?;

    let summary = DkgSummary {
        public_key: first.public_key_hex(),
        threshold: first.threshold,
        parties,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Public Key: {}", summary.public_key);
    println!("Threshold: {}", summary.threshold);
    for party in &summary.parties {
        println!("  {}:", party.id);
        println!("    Share: {}", party.share);
        println!("    BK: x = {}, rank = {}", party.bk_x, party.bk_rank);
    }

    Ok(())
}
