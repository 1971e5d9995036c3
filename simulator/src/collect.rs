use crate::actors::WalletActor;
use crate::desync;
use crate::infra::{RunOptions, COORDINATOR_NAME, NODE_NAME, WALLET_DATA_DIR};
use futures::stream::{self, StreamExt};
use mixsim_client::{coordinator, NodeRpc};
use mixsim_driver::Driver;
use mixsim_types::Scenario;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Upper bound on the random delay before each wallet's collection.
const COLLECT_JITTER: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
enum CollectError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Client(#[from] mixsim_client::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Teardown that runs on every exit path: take every wallet out of the
/// protocol, collect evidence unless disabled, and remove every container
/// the run created. Each step is best-effort; a failure is logged and the
/// remaining steps still run.
pub async fn teardown(
    driver: &dyn Driver,
    chain: Option<(&NodeRpc, u64)>,
    actors: &[Arc<WalletActor>],
    scenario: &Scenario,
    opts: &RunOptions,
    pool: usize,
) {
    stop_all(actors, pool).await;

    if !opts.no_logs {
        if let Err(err) = store_evidence(driver, chain, actors, scenario, pool).await {
            warn!(error = %err, "could not store evidence");
        }
    }

    match driver.cleanup().await {
        Ok(()) => info!("removed containers"),
        Err(err) => warn!(error = %err, "driver cleanup failed"),
    }
}

/// Issue a leave command to every actor, including ones the scheduler
/// already considers inactive, so nothing keeps mixing past the run.
async fn stop_all(actors: &[Arc<WalletActor>], pool: usize) {
    info!(wallets = actors.len(), "stopping all mixing");
    stream::iter(actors.iter().cloned())
        .for_each_concurrent(pool.max(1), |actor| async move {
            match actor.api.stop_coinjoin().await {
                Ok(()) => debug!(wallet = %actor.name, "stopped mixing"),
                Err(err) => warn!(wallet = %actor.name, error = %err, "could not stop mixing"),
            }
        })
        .await;
}

/// Persist the run's evidence bundle: the scenario definition, one record
/// per block mined since start, the coordinator's data directory, and one
/// record set per wallet. Per-wallet failures are isolated.
async fn store_evidence(
    driver: &dyn Driver,
    chain: Option<(&NodeRpc, u64)>,
    actors: &[Arc<WalletActor>],
    scenario: &Scenario,
    pool: usize,
) -> Result<(), CollectError> {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    let run_dir = PathBuf::from("logs").join(format!("{stamp}_{}", scenario.name));
    let data_dir = run_dir.join("data");
    tokio::fs::create_dir_all(&data_dir).await?;
    info!(path = %run_dir.display(), "storing evidence");

    tokio::fs::write(
        run_dir.join("scenario.json"),
        serde_json::to_vec_pretty(scenario)?,
    )
    .await?;
    debug!("stored scenario");

    if let Some((node, start_height)) = chain {
        if let Err(err) = store_blocks(node, &data_dir, start_height).await {
            warn!(error = %err, "could not store chain evidence");
        }
    }

    match driver
        .download(
            COORDINATOR_NAME,
            coordinator::DATA_DIR,
            &data_dir.join(COORDINATOR_NAME),
        )
        .await
    {
        Ok(()) => info!("stored coordinator evidence"),
        Err(err) => warn!(error = %err, "could not store coordinator evidence"),
    }

    let data_dir = &data_dir;
    stream::iter(actors.iter().cloned())
        .for_each_concurrent(pool.max(1), |actor| async move {
            store_wallet(driver, &actor, data_dir).await;
        })
        .await;

    info!(path = %run_dir.display(), "evidence stored");
    Ok(())
}

/// One record per block mined during the run.
async fn store_blocks(
    node: &NodeRpc,
    data_dir: &Path,
    start_height: u64,
) -> Result<(), CollectError> {
    let dir = data_dir.join(NODE_NAME);
    tokio::fs::create_dir_all(&dir).await?;
    let count = node.block_count().await?;
    for height in start_height..count {
        let hash = node.block_hash(height).await?;
        let block = node.block_info(&hash).await?;
        tokio::fs::write(
            dir.join(format!("block_{height}.json")),
            serde_json::to_vec_pretty(&block)?,
        )
        .await?;
    }
    info!(blocks = count.saturating_sub(start_height), "stored chain evidence");
    Ok(())
}

/// Collect one wallet's coin state and runtime evidence. Failures only
/// cost this wallet's records; the rest of the population is unaffected.
async fn store_wallet(driver: &dyn Driver, actor: &WalletActor, data_dir: &Path) {
    desync(COLLECT_JITTER).await;
    let dir = data_dir.join(&actor.name);

    if let Err(err) = store_wallet_records(actor, &dir).await {
        warn!(wallet = %actor.name, error = %err, "could not store wallet records");
    } else {
        debug!(wallet = %actor.name, "stored wallet records");
    }

    match driver.download(&actor.name, WALLET_DATA_DIR, &dir).await {
        Ok(()) => debug!(wallet = %actor.name, "stored wallet logs"),
        Err(err) => warn!(wallet = %actor.name, error = %err, "could not store wallet logs"),
    }
}

async fn store_wallet_records(actor: &WalletActor, dir: &Path) -> Result<(), CollectError> {
    tokio::fs::create_dir_all(dir).await?;
    let records: [(&str, Value); 3] = [
        ("coins.json", actor.api.list_coins().await?),
        ("unspent_coins.json", actor.api.list_unspent_coins().await?),
        ("keys.json", actor.api.list_keys().await?),
    ];
    for (file, record) in records {
        tokio::fs::write(dir.join(file), serde_json::to_vec_pretty(&record)?).await?;
    }
    Ok(())
}
