use crate::actors::WalletActor;
use crate::collect;
use crate::engine::{Simulation, Timing};
use crate::infra::{self, RunOptions, SetupError, DISTRIBUTOR_FUNDING};
use crate::invoices::{self, PaymentError};
use crate::population;
use mixsim_client::{NodeRpc, RetryPolicy};
use mixsim_driver::{Driver, DriverError};
use mixsim_types::{Scenario, SimClock};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

/// Terminal state of a simulation run.
#[derive(Debug)]
pub enum Outcome {
    LimitReached,
    Interrupted,
}

/// Error type for a whole scenario run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error(transparent)]
    Client(#[from] mixsim_client::Error),
}

/// Execute a scenario end to end.
///
/// Teardown and evidence collection run no matter how the phases end:
/// limits reached, operator interrupt, or fatal error. An interrupt
/// cancels whatever phase is in flight; any containers it leaves behind
/// are swept by the driver cleanup.
pub async fn execute(
    driver: Arc<dyn Driver>,
    scenario: Scenario,
    opts: RunOptions,
) -> anyhow::Result<()> {
    execute_with(driver, scenario, opts, Timing::default()).await
}

pub async fn execute_with(
    driver: Arc<dyn Driver>,
    scenario: Scenario,
    opts: RunOptions,
    timing: Timing,
) -> anyhow::Result<()> {
    info!(scenario = %scenario.name, "starting scenario");

    let mut registry: Vec<Arc<WalletActor>> = Vec::new();
    let mut chain: Option<(Arc<NodeRpc>, u64)> = None;

    let result = tokio::select! {
        result = run_phases(&driver, &scenario, &opts, &timing, &mut registry, &mut chain) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received");
            Ok(Outcome::Interrupted)
        }
    };

    if let Err(err) = &result {
        error!(error = %err, "simulation failed");
    }

    collect::teardown(
        driver.as_ref(),
        chain
            .as_ref()
            .map(|(node, start_height)| (node.as_ref(), *start_height)),
        &registry,
        &scenario,
        &opts,
        timing.pool,
    )
    .await;

    match result {
        Ok(Outcome::LimitReached) => {
            info!("simulation complete");
            Ok(())
        }
        Ok(Outcome::Interrupted) => {
            info!("simulation interrupted");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// The run itself: images, infrastructure, funding, population, invoices,
/// then the main loop until the configured limits are satisfied.
async fn run_phases(
    driver: &Arc<dyn Driver>,
    scenario: &Scenario,
    opts: &RunOptions,
    timing: &Timing,
    registry: &mut Vec<Arc<WalletActor>>,
    chain: &mut Option<(Arc<NodeRpc>, u64)>,
) -> Result<Outcome, RunError> {
    infra::prepare_images(driver.as_ref(), opts, &scenario.versions()).await?;

    let infrastructure =
        infra::start_infrastructure(driver, scenario, opts, timing.ready_timeout).await?;
    *chain = Some((infrastructure.node.clone(), infrastructure.start_height));
    infra::fund_distributor(
        &infrastructure.node,
        infrastructure.distributor.as_ref(),
        DISTRIBUTOR_FUNDING,
    )
    .await?;

    let provisioner = infra::ContainerProvisioner::new(
        driver.clone(),
        scenario,
        opts,
        &infrastructure,
        timing.ready_timeout,
        timing.provision_jitter,
    );
    let actors = population::provision_cohort(
        &provisioner,
        &scenario.wallets,
        0,
        timing.pool,
        timing.retry_pause,
    )
    .await;
    registry.extend(actors);

    let queue = invoices::prepare(registry, &scenario.wallets).await?;

    let mut simulation = Simulation {
        driver: driver.clone(),
        node: infrastructure.node.clone(),
        distributor: infrastructure.distributor.clone(),
        actors: registry.clone(),
        invoices: queue,
        rounds_limit: scenario.rounds,
        blocks_limit: scenario.blocks,
        start_height: infrastructure.start_height,
        clock: SimClock::new(),
        timing: timing.clone(),
        retry: RetryPolicy::default(),
    };
    info!("running simulation");
    simulation.run().await?;
    Ok(Outcome::LimitReached)
}
