use crate::actors::WalletActor;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use mixsim_types::WalletSpec;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

/// Cohort-level retry passes after the initial attempt.
const RETRY_PASSES: usize = 3;

/// Why one provisioning attempt was lost. Attempts fail individually; the
/// cohort logic decides what to retry.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Driver(#[from] mixsim_driver::DriverError),
    #[error(transparent)]
    Client(#[from] mixsim_client::Error),
    #[error("wallet not ready within {0:?}")]
    ReadyTimeout(Duration),
}

/// One provisioning attempt: start the container, construct the proxy, and
/// wait for wallet readiness.
#[async_trait]
pub trait ProvisionWallet: Send + Sync {
    async fn start(&self, index: usize, spec: &WalletSpec) -> Result<WalletActor, ProvisionError>;

    /// Clear whatever a failed attempt left behind before it is retried.
    async fn discard(&self, index: usize);
}

/// Provision one actor per spec, in parallel, with bounded cohort retries.
///
/// Indices whose attempts keep failing are stopped, re-provisioned after a
/// pause, and finally dropped once the retry budget is spent: the run then
/// proceeds with a smaller population. Successes are returned in spec
/// order regardless of which pass produced them.
pub async fn provision_cohort<P: ProvisionWallet>(
    provisioner: &P,
    specs: &[WalletSpec],
    offset: usize,
    pool: usize,
    retry_pause: Duration,
) -> Vec<Arc<WalletActor>> {
    info!(wallets = specs.len(), "starting wallets");
    let mut slots: Vec<Option<Arc<WalletActor>>> = (0..specs.len()).map(|_| None).collect();

    let all: Vec<usize> = (0..specs.len()).collect();
    run_pass(provisioner, specs, offset, all, pool, &mut slots).await;

    for _ in 0..RETRY_PASSES {
        let missing: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.is_none().then_some(idx))
            .collect();
        if missing.is_empty() {
            break;
        }
        warn!(failed = missing.len(), "retrying failed wallets");
        for idx in &missing {
            provisioner.discard(offset + idx).await;
        }
        sleep(retry_pause).await;
        run_pass(provisioner, specs, offset, missing, pool, &mut slots).await;
    }

    let dropped = slots.iter().filter(|slot| slot.is_none()).count();
    if dropped > 0 {
        warn!(dropped, "continuing with a reduced wallet population");
    }
    slots.into_iter().flatten().collect()
}

/// Attempt the given indices concurrently and fill their slots on success.
async fn run_pass<P: ProvisionWallet>(
    provisioner: &P,
    specs: &[WalletSpec],
    offset: usize,
    indices: Vec<usize>,
    pool: usize,
    slots: &mut [Option<Arc<WalletActor>>],
) {
    let results: Vec<(usize, Result<WalletActor, ProvisionError>)> = stream::iter(indices)
        .map(|idx| async move {
            let result = provisioner.start(offset + idx, &specs[idx]).await;
            (idx, result)
        })
        .buffer_unordered(pool.max(1))
        .collect()
        .await;

    for (idx, result) in results {
        match result {
            Ok(actor) => {
                info!(wallet = %actor.name, version = %actor.version, "started wallet");
                slots[idx] = Some(Arc::new(actor));
            }
            Err(err) => {
                warn!(wallet = offset + idx, error = %err, "could not start wallet");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::wallet_name;
    use crate::testing::MockWallet;
    use mixsim_types::Version;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Provisioner whose attempts fail a scripted number of times per index
    /// (`usize::MAX` fails forever).
    struct FlakyProvisioner {
        failures: HashMap<usize, usize>,
        attempts: Mutex<HashMap<usize, usize>>,
        discards: Mutex<Vec<usize>>,
        total_attempts: AtomicUsize,
    }

    impl FlakyProvisioner {
        fn new(failures: HashMap<usize, usize>) -> Self {
            Self {
                failures,
                attempts: Mutex::new(HashMap::new()),
                discards: Mutex::new(Vec::new()),
                total_attempts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ProvisionWallet for FlakyProvisioner {
        async fn start(
            &self,
            index: usize,
            _spec: &WalletSpec,
        ) -> Result<WalletActor, ProvisionError> {
            self.total_attempts.fetch_add(1, Ordering::Relaxed);
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                let entry = attempts.entry(index).or_insert(0);
                *entry += 1;
                *entry
            };
            let budget = self.failures.get(&index).copied().unwrap_or(0);
            if attempt <= budget {
                return Err(ProvisionError::ReadyTimeout(Duration::from_millis(1)));
            }
            Ok(WalletActor {
                index,
                name: wallet_name(index),
                address: String::new(),
                version: Version::new(2, 0, 4),
                schedule: Default::default(),
                api: Arc::new(MockWallet::default()),
            })
        }

        async fn discard(&self, index: usize) {
            self.discards.lock().unwrap().push(index);
        }
    }

    #[tokio::test]
    async fn clean_cohort_starts_every_wallet() {
        let provisioner = FlakyProvisioner::new(HashMap::new());
        let specs = vec![WalletSpec::default(); 4];
        let actors = provision_cohort(&provisioner, &specs, 0, 2, Duration::ZERO).await;
        assert_eq!(actors.len(), 4);
        let indices: Vec<usize> = actors.iter().map(|a| a.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert!(provisioner.discards.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn first_pass_failures_recover_on_retry() {
        // Indices 1 and 3 fail once, then succeed on the first retry pass.
        let provisioner = FlakyProvisioner::new(HashMap::from([(1, 1), (3, 1)]));
        let specs = vec![WalletSpec::default(); 5];
        let actors = provision_cohort(&provisioner, &specs, 0, 4, Duration::ZERO).await;

        // Full registry, original index order preserved.
        assert_eq!(actors.len(), 5);
        let indices: Vec<usize> = actors.iter().map(|a| a.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);

        // Failed instances were cleared before the retry.
        let mut discards = provisioner.discards.lock().unwrap().clone();
        discards.sort_unstable();
        assert_eq!(discards, vec![1, 3]);
    }

    #[tokio::test]
    async fn permanent_failures_degrade_the_population() {
        // Indices 0 and 2 never come up; the other three survive.
        let provisioner =
            FlakyProvisioner::new(HashMap::from([(0, usize::MAX), (2, usize::MAX)]));
        let specs = vec![WalletSpec::default(); 5];
        let actors = provision_cohort(&provisioner, &specs, 0, 4, Duration::ZERO).await;

        assert_eq!(actors.len(), 3);
        let indices: Vec<usize> = actors.iter().map(|a| a.index).collect();
        assert_eq!(indices, vec![1, 3, 4]);

        // Initial pass + 3 retry passes for the two permanent failures.
        let attempts = provisioner.attempts.lock().unwrap();
        assert_eq!(attempts[&0], 1 + RETRY_PASSES);
        assert_eq!(attempts[&2], 1 + RETRY_PASSES);
        assert_eq!(attempts[&1], 1);
    }

    #[tokio::test]
    async fn offset_shifts_actor_indices() {
        let provisioner = FlakyProvisioner::new(HashMap::new());
        let specs = vec![WalletSpec::default(); 2];
        let actors = provision_cohort(&provisioner, &specs, 6, 2, Duration::ZERO).await;
        let indices: Vec<usize> = actors.iter().map(|a| a.index).collect();
        assert_eq!(indices, vec![6, 7]);
        assert_eq!(actors[0].name, "wallet-006");
    }
}
