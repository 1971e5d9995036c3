use crate::actors::{wallet_name, WalletActor};
use crate::desync;
use crate::population::{ProvisionError, ProvisionWallet};
use async_trait::async_trait;
use mixsim_client::{wallet, CoordinatorRpc, NodeRpc, WalletApi};
use mixsim_driver::{Driver, DriverError, RunSpec};
use mixsim_types::{Scenario, Version, WalletSpec, UNITS_PER_COIN};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info};
use uuid::Uuid;

/// Container names, before driver namespacing.
pub const NODE_NAME: &str = "node";
pub const COORDINATOR_NAME: &str = "coordinator";
pub const DISTRIBUTOR_NAME: &str = "wallet-distributor";

/// Image names, extended by [`RunOptions::image_prefix`].
pub const NODE_IMAGE: &str = "chain-node";
pub const COORDINATOR_IMAGE: &str = "mix-coordinator";

const NODE_RPC_PORT: u16 = 18443;
const NODE_P2P_PORT: u16 = 18444;
const COORDINATOR_PORT: u16 = 37127;
const WALLET_RPC_PORT: u16 = 37128;
/// The distributor publishes at 37128; wallet `i` at `37129 + i`.
const DISTRIBUTOR_HOST_PORT: u16 = 37128;
const WALLET_HOST_PORT_BASE: u16 = 37129;

/// Where the orchestrator reaches published container ports.
const CONTROL_HOST: &str = "127.0.0.1";

/// Remote path the merged coordinator configuration is uploaded to.
const COORDINATOR_CONFIG_REMOTE: &str = "/home/coordinator/.coordinator/config.json";

/// Wallet data directory, collected as runtime evidence at teardown.
pub const WALLET_DATA_DIR: &str = "/home/wallet/.wallet/";

/// UTXO count the distributor's working balance is split across.
const DISTRIBUTOR_UTXOS: u64 = 20;

/// Distributor working balance, in base units.
pub const DISTRIBUTOR_FUNDING: u64 = 1_000 * UNITS_PER_COIN;

/// Poll spacing while waiting for funds to reach the distributor.
const BALANCE_POLL: Duration = Duration::from_secs(1);

/// Operator options for one invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Registry prefix for images; when non-empty, images are pulled
    /// instead of built locally.
    pub image_prefix: String,
    pub force_rebuild: bool,
    /// Skip evidence collection at teardown.
    pub no_logs: bool,
    /// Directory holding the image build contexts.
    pub containers_dir: PathBuf,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            image_prefix: String::new(),
            force_rebuild: false,
            no_logs: false,
            containers_dir: PathBuf::from("./containers"),
        }
    }
}

/// Error type for infrastructure bring-up.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Client(#[from] mixsim_client::Error),
    #[error("could not read coordinator config: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse coordinator config: {0}")]
    Config(#[from] serde_json::Error),
    #[error("{0} not ready in time")]
    NotReady(&'static str),
}

fn prefixed(opts: &RunOptions, image: &str) -> String {
    format!("{}{}", opts.image_prefix, image)
}

/// Image name for a wallet client release.
pub fn wallet_image(version: Version) -> String {
    format!("mix-wallet:{version}")
}

/// Make every image the scenario references available: reuse what is
/// present, build from the local context, or pull when a registry prefix
/// is configured.
pub async fn prepare_images(
    driver: &dyn Driver,
    opts: &RunOptions,
    versions: &BTreeSet<Version>,
) -> Result<(), DriverError> {
    info!("preparing images");
    prepare_image(driver, opts, NODE_IMAGE, &opts.containers_dir.join(NODE_IMAGE)).await?;
    prepare_image(
        driver,
        opts,
        COORDINATOR_IMAGE,
        &opts.containers_dir.join(COORDINATOR_IMAGE),
    )
    .await?;
    for version in versions {
        let context = opts
            .containers_dir
            .join("mix-wallet")
            .join(format!("v{}", version.major))
            .join(version.to_string());
        prepare_image(driver, opts, &wallet_image(*version), &context).await?;
    }
    Ok(())
}

async fn prepare_image(
    driver: &dyn Driver,
    opts: &RunOptions,
    image: &str,
    context: &Path,
) -> Result<(), DriverError> {
    let name = prefixed(opts, image);
    if driver.has_image(&name).await? && !opts.force_rebuild {
        info!(image = %name, "image reused");
        return Ok(());
    }
    if opts.image_prefix.is_empty() {
        driver.build(&name, context).await?;
        info!(image = %name, "image built");
    } else {
        driver.pull(&name).await?;
        info!(image = %name, "image pulled");
    }
    Ok(())
}

/// The long-lived actors every run needs before wallets can start.
pub struct Infrastructure {
    pub node: Arc<NodeRpc>,
    /// Internal address wallets use to reach the node.
    pub node_address: String,
    /// Internal address wallets use to reach the coordinator.
    pub coordinator_address: String,
    pub distributor: Arc<dyn WalletApi>,
    /// Chain height observed right after bring-up; the simulation clock
    /// counts blocks relative to it.
    pub start_height: u64,
}

/// Start the chain node, the coordinator (with the scenario's config
/// overrides merged in), and the distributor wallet, waiting for each to
/// become ready before moving on.
pub async fn start_infrastructure(
    driver: &Arc<dyn Driver>,
    scenario: &Scenario,
    opts: &RunOptions,
    ready_timeout: Duration,
) -> Result<Infrastructure, SetupError> {
    info!("starting infrastructure");

    let node_instance = driver
        .run(
            NODE_NAME,
            RunSpec::new(prefixed(opts, NODE_IMAGE))
                .port(NODE_RPC_PORT, NODE_RPC_PORT)
                .port(NODE_P2P_PORT, NODE_P2P_PORT)
                .resources(4.0, 8192),
        )
        .await?;
    let node = Arc::new(NodeRpc::connect(
        CONTROL_HOST,
        node_instance.host_port(NODE_RPC_PORT),
    )?);
    if !node.wait_ready(ready_timeout).await {
        return Err(SetupError::NotReady("chain node"));
    }
    info!("started chain node");

    let coordinator_instance = driver
        .run(
            COORDINATOR_NAME,
            RunSpec::new(prefixed(opts, COORDINATOR_IMAGE))
                .port(COORDINATOR_PORT, COORDINATOR_PORT)
                .env(
                    "COORDINATOR_BIND",
                    format!("http://0.0.0.0:{COORDINATOR_PORT}"),
                )
                .env("NODE_ADDR", node_instance.address.clone())
                .resources(8.0, 8192),
        )
        .await?;
    upload_coordinator_config(driver.as_ref(), scenario, opts).await?;
    let coordinator = CoordinatorRpc::connect(
        CONTROL_HOST,
        coordinator_instance.host_port(COORDINATOR_PORT),
    )?;
    if !coordinator.wait_ready(ready_timeout).await {
        return Err(SetupError::NotReady("coordinator"));
    }
    info!("started coordinator");

    let version = scenario.distributor();
    let distributor_instance = driver
        .run(
            DISTRIBUTOR_NAME,
            wallet_run_spec(
                opts,
                version,
                &node_instance.address,
                &coordinator_instance.address,
                None,
                None,
                DISTRIBUTOR_HOST_PORT,
            ),
        )
        .await?;
    let distributor = wallet::connect(
        version,
        CONTROL_HOST,
        distributor_instance.host_port(WALLET_RPC_PORT),
    )?;
    if !distributor.wait_wallet(ready_timeout).await {
        return Err(SetupError::NotReady("distributor"));
    }
    info!(%version, "started distributor");

    let start_height = node.block_count().await?;
    Ok(Infrastructure {
        node,
        node_address: node_instance.address,
        coordinator_address: coordinator_instance.address,
        distributor,
        start_height,
    })
}

/// Merge the scenario's coordinator overrides into the base configuration
/// and upload the result into the coordinator container.
async fn upload_coordinator_config(
    driver: &dyn Driver,
    scenario: &Scenario,
    opts: &RunOptions,
) -> Result<(), SetupError> {
    let base_path = opts.containers_dir.join(COORDINATOR_IMAGE).join("config.json");
    let raw = tokio::fs::read_to_string(&base_path).await?;
    let mut config: Value = serde_json::from_str(&raw)?;
    if let Value::Object(fields) = &mut config {
        fields.extend(scenario.coordinator.clone());
    }

    let local = std::env::temp_dir().join(format!("mixsim-coordinator-{}.json", Uuid::new_v4()));
    tokio::fs::write(&local, serde_json::to_vec_pretty(&config)?).await?;
    let uploaded = driver
        .upload(COORDINATOR_NAME, &local, COORDINATOR_CONFIG_REMOTE)
        .await;
    let _ = tokio::fs::remove_file(&local).await;
    uploaded?;
    Ok(())
}

/// Split the distributor's working balance across several node-funded
/// UTXOs, then wait until the whole amount is spendable.
pub async fn fund_distributor(
    node: &NodeRpc,
    distributor: &dyn WalletApi,
    total: u64,
) -> Result<(), SetupError> {
    info!(total, "funding distributor");
    let per_utxo = total.div_ceil(DISTRIBUTOR_UTXOS);
    for _ in 0..DISTRIBUTOR_UTXOS {
        let address = distributor.new_address().await?;
        node.fund_address(&address, per_utxo).await?;
    }
    loop {
        let balance = distributor.balance().await?;
        if balance >= total {
            info!(balance, "distributor funded");
            return Ok(());
        }
        sleep(BALANCE_POLL).await;
    }
}

fn wallet_run_spec(
    opts: &RunOptions,
    version: Version,
    node_address: &str,
    coordinator_address: &str,
    anon_target: Option<u32>,
    coin_isolation: Option<bool>,
    host_port: u16,
) -> RunSpec {
    let mut spec = RunSpec::new(prefixed(opts, &wallet_image(version)))
        .port(WALLET_RPC_PORT, host_port)
        .env("NODE_ADDR", node_address)
        .env("COORDINATOR_ADDR", coordinator_address);
    if let Some(target) = anon_target {
        spec = spec.env("WALLET_ANON_TARGET", target.to_string());
    }
    if let Some(isolation) = coin_isolation {
        spec = spec.env("WALLET_COIN_ISOLATION", isolation.to_string());
    }
    // Major-1 clients are heavier than the current generation.
    if version.major < 2 {
        spec.resources(0.3, 1024)
    } else {
        spec.resources(0.1, 768)
    }
}

/// Provisions wallet containers for the population manager.
pub struct ContainerProvisioner {
    driver: Arc<dyn Driver>,
    opts: RunOptions,
    default_version: Version,
    default_anon_target: Option<u32>,
    default_coin_isolation: Option<bool>,
    node_address: String,
    coordinator_address: String,
    ready_timeout: Duration,
    provision_jitter: Duration,
}

impl ContainerProvisioner {
    pub fn new(
        driver: Arc<dyn Driver>,
        scenario: &Scenario,
        opts: &RunOptions,
        infra: &Infrastructure,
        ready_timeout: Duration,
        provision_jitter: Duration,
    ) -> Self {
        Self {
            driver,
            opts: opts.clone(),
            default_version: scenario.default_version,
            default_anon_target: scenario.default_anon_target,
            default_coin_isolation: scenario.default_coin_isolation,
            node_address: infra.node_address.clone(),
            coordinator_address: infra.coordinator_address.clone(),
            ready_timeout,
            provision_jitter,
        }
    }

    /// Resolve the wallet's tuning, dropping settings its release cannot
    /// honor.
    fn tuning(&self, index: usize, version: Version, spec: &WalletSpec) -> (Option<u32>, Option<bool>) {
        let anon_target = spec.anon_target.or(self.default_anon_target);
        let coin_isolation = spec.coin_isolation.or(self.default_coin_isolation);
        if version.supports_tuning() {
            return (anon_target, coin_isolation);
        }
        if anon_target.is_some() || coin_isolation.is_some() {
            info!(wallet = index, %version, "mixing tuning ignored for older client");
        }
        (None, None)
    }
}

#[async_trait]
impl ProvisionWallet for ContainerProvisioner {
    async fn start(&self, index: usize, spec: &WalletSpec) -> Result<WalletActor, ProvisionError> {
        // Spread the cohort's container starts out a little so the runtime
        // is not hit by every request at the same instant.
        desync(self.provision_jitter).await;

        let version = spec.version.unwrap_or(self.default_version);
        let (anon_target, coin_isolation) = self.tuning(index, version, spec);
        let name = wallet_name(index);
        let host_port = WALLET_HOST_PORT_BASE + index as u16;

        let instance = self
            .driver
            .run(
                &name,
                wallet_run_spec(
                    &self.opts,
                    version,
                    &self.node_address,
                    &self.coordinator_address,
                    anon_target,
                    coin_isolation,
                    host_port,
                ),
            )
            .await?;
        let api = wallet::connect(version, CONTROL_HOST, instance.host_port(WALLET_RPC_PORT))?;
        if !api.wait_wallet(self.ready_timeout).await {
            return Err(ProvisionError::ReadyTimeout(self.ready_timeout));
        }

        Ok(WalletActor {
            index,
            name,
            address: instance.address,
            version,
            schedule: spec.schedule(),
            api,
        })
    }

    async fn discard(&self, index: usize) {
        if let Err(err) = self.driver.stop(&wallet_name(index)).await {
            debug!(wallet = index, error = %err, "nothing to discard");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_images_carry_the_version_tag() {
        assert_eq!(wallet_image(Version::new(2, 0, 4)), "mix-wallet:2.0.4");
    }

    #[test]
    fn image_prefix_extends_every_name() {
        let opts = RunOptions {
            image_prefix: "registry.example.com/mix/".to_string(),
            ..RunOptions::default()
        };
        assert_eq!(
            prefixed(&opts, NODE_IMAGE),
            "registry.example.com/mix/chain-node"
        );
    }

    #[test]
    fn wallet_run_spec_scales_resources_by_generation() {
        let opts = RunOptions::default();
        let old = wallet_run_spec(
            &opts,
            Version::new(1, 1, 12),
            "10.0.0.2",
            "10.0.0.3",
            None,
            None,
            37130,
        );
        assert_eq!((old.cpus, old.memory_mb), (0.3, 1024));

        let new = wallet_run_spec(
            &opts,
            Version::new(2, 0, 4),
            "10.0.0.2",
            "10.0.0.3",
            Some(7),
            Some(true),
            37130,
        );
        assert_eq!((new.cpus, new.memory_mb), (0.1, 768));
        assert!(new
            .env
            .contains(&("WALLET_ANON_TARGET".to_string(), "7".to_string())));
        assert!(new
            .env
            .contains(&("WALLET_COIN_ISOLATION".to_string(), "true".to_string())));
        assert!(new.ports.contains(&(WALLET_RPC_PORT, 37130)));
    }
}
