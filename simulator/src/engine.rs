use crate::actors::WalletActor;
use crate::infra::COORDINATOR_NAME;
use crate::invoices::{self, InvoiceQueue, PaymentError};
use crate::participation;
use mixsim_client::{coordinator, NodeRpc, RetryPolicy, WalletApi};
use mixsim_driver::Driver;
use mixsim_types::SimClock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

/// Timing knobs for the engine. The defaults match production cadence;
/// tests shrink them to keep runs fast.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Wall-clock spacing between main-loop ticks.
    pub tick: Duration,
    /// Per-attempt readiness budget for provisioned actors.
    pub ready_timeout: Duration,
    /// Pause between population retry passes.
    pub retry_pause: Duration,
    /// Width of every bounded fan-out pool.
    pub pool: usize,
    /// Upper bound on the random delay before a provisioning request.
    pub provision_jitter: Duration,
    /// Upper bound on the random delay before a join/leave command.
    pub command_jitter: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            ready_timeout: Duration::from_secs(60),
            retry_pause: Duration::from_secs(60),
            pool: 8,
            provision_jitter: Duration::from_secs(3),
            command_jitter: Duration::from_millis(100),
        }
    }
}

/// Whether every configured (nonzero) limit has been reached. A zero limit
/// is unbounded; with no limits at all the simulation runs until the
/// operator interrupts it.
pub fn limits_satisfied(rounds: u64, blocks: u64, clock: &SimClock) -> bool {
    if rounds == 0 && blocks == 0 {
        return false;
    }
    (rounds == 0 || clock.round() >= rounds) && (blocks == 0 || clock.block() >= blocks)
}

/// The main simulation loop and the clock it advances.
pub struct Simulation {
    pub driver: Arc<dyn Driver>,
    pub node: Arc<NodeRpc>,
    pub distributor: Arc<dyn WalletApi>,
    pub actors: Vec<Arc<WalletActor>>,
    pub invoices: InvoiceQueue,
    /// Round limit from the scenario (0 = unbounded).
    pub rounds_limit: u64,
    /// Block limit from the scenario (0 = unbounded).
    pub blocks_limit: u64,
    /// Chain height when the simulation started; the clock counts blocks
    /// relative to it.
    pub start_height: u64,
    pub clock: SimClock,
    pub timing: Timing,
    pub retry: RetryPolicy,
}

impl Simulation {
    /// Tick until every configured limit is satisfied.
    ///
    /// Each tick reads both external time sources, drains the invoices that
    /// came due, and then reconciles participation, so a wallet funded this
    /// tick can join in the same tick. The only fatal condition is an
    /// exhausted payment sub-batch; everything else degrades and continues.
    pub async fn run(&mut self) -> Result<(), PaymentError> {
        let mut ticker = interval(self.timing.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.observe_clock().await;

            let due = self.invoices.drain_due(&self.clock);
            if !due.is_empty() {
                invoices::pay(self.distributor.as_ref(), due, &self.clock, &self.retry).await?;
            }

            participation::tick(
                &self.actors,
                self.clock,
                self.timing.pool,
                self.timing.command_jitter,
            )
            .await;

            info!(
                round = self.clock.round(),
                block = self.clock.block(),
                "simulation progress"
            );
            if limits_satisfied(self.rounds_limit, self.blocks_limit, &self.clock) {
                info!("configured limits reached");
                return Ok(());
            }
        }
    }

    /// Read both time sources, each with local retries. When a read keeps
    /// failing the previous counter value stands; the clock never moves
    /// backwards and a flaky source never aborts the loop.
    async fn observe_clock(&mut self) {
        let driver = &self.driver;
        let rounds = self
            .retry
            .run(
                || async move {
                    let log = driver.peek(COORDINATOR_NAME, coordinator::ROUND_LOG).await?;
                    Ok::<u64, mixsim_driver::DriverError>(coordinator::count_rounds(&log))
                },
                mixsim_driver::DriverError::is_transient,
            )
            .await;
        match rounds {
            Ok(rounds) => self.clock.observe_round(rounds),
            Err(err) => warn!(
                error = %err,
                round = self.clock.round(),
                "could not read completed rounds; keeping last value"
            ),
        }

        let node = &self.node;
        let height = self
            .retry
            .run(|| node.block_count(), mixsim_client::Error::is_transient)
            .await;
        match height {
            Ok(height) => self
                .clock
                .observe_block(height.saturating_sub(self.start_height)),
            Err(err) => warn!(
                error = %err,
                block = self.clock.block(),
                "could not read chain height; keeping last value"
            ),
        }
    }
}
