use crate::actors::WalletActor;
use mixsim_client::{Payment, RetryPolicy, SendOutcome, WalletApi};
use mixsim_types::{DueTime, SimClock, WalletSpec};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Invoices per send call. Sub-batching keeps each transaction within the
/// output limits of the backend.
pub const SUB_BATCH: usize = 5;

/// A single funding obligation owed to one wallet address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    pub address: String,
    pub amount: u64,
}

/// Why a single send attempt did not go through.
#[derive(Debug, Error)]
pub enum SendFailure {
    #[error("transaction timed out")]
    Timeout,
    #[error(transparent)]
    Rpc(#[from] mixsim_client::Error),
}

/// A sub-batch exhausted its retry budget. The drained invoices are gone,
/// so the caller must treat this as ending the simulation.
#[derive(Debug, Error)]
#[error("invoice payment failed after {attempts} attempts: {source}")]
pub struct PaymentError {
    pub attempts: usize,
    #[source]
    pub source: SendFailure,
}

/// Funding obligations keyed by the simulation time they come due.
#[derive(Debug, Default)]
pub struct InvoiceQueue {
    pending: BTreeMap<DueTime, Vec<Invoice>>,
}

impl InvoiceQueue {
    pub fn insert(&mut self, due: DueTime, invoice: Invoice) {
        self.pending.entry(due).or_default().push(invoice);
    }

    pub fn remaining(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Remove and return every invoice due at `clock`. A drained bucket is
    /// gone from the queue and will never be revisited.
    pub fn drain_due(&mut self, clock: &SimClock) -> Vec<Invoice> {
        let due: Vec<DueTime> = self
            .pending
            .keys()
            .copied()
            .filter(|key| clock.is_due(*key))
            .collect();
        let mut drained = Vec::new();
        for key in due {
            drained.extend(self.pending.remove(&key).unwrap_or_default());
        }
        drained
    }

    /// Shuffle every bucket so payment order within a batch carries no
    /// wallet-index pattern.
    fn shuffle(&mut self) {
        let mut rng = StdRng::from_entropy();
        for bucket in self.pending.values_mut() {
            bucket.shuffle(&mut rng);
        }
    }
}

/// Ask every actor for a fresh receiving address per funding entry and
/// queue one invoice at the entry's due time.
///
/// `specs` must be the scenario wallet list the actors were provisioned
/// from; each actor's spec is found through its index.
pub async fn prepare(
    actors: &[Arc<WalletActor>],
    specs: &[WalletSpec],
) -> Result<InvoiceQueue, mixsim_client::Error> {
    info!("preparing invoices");
    let mut queue = InvoiceQueue::default();
    for actor in actors {
        for fund in &specs[actor.index].funds {
            let address = actor.api.new_address().await?;
            queue.insert(
                fund.due(),
                Invoice {
                    address,
                    amount: fund.value(),
                },
            );
        }
    }
    queue.shuffle();
    info!(invoices = queue.remaining(), "prepared invoices");
    Ok(queue)
}

/// Pay a drained batch through the distributor, in sequential sub-batches.
///
/// Sub-batches are never sent in parallel: the distributor is a single
/// funding source and concurrent sends would race on its unspent outputs.
/// A `Timeout` outcome is retried like a transient RPC failure; a
/// sub-batch that exhausts the policy fails the whole call.
pub async fn pay(
    distributor: &dyn WalletApi,
    batch: Vec<Invoice>,
    clock: &SimClock,
    policy: &RetryPolicy,
) -> Result<(), PaymentError> {
    info!(
        invoices = batch.len(),
        sub_batch = SUB_BATCH,
        block = clock.block(),
        round = clock.round(),
        "paying invoices"
    );
    for chunk in batch.chunks(SUB_BATCH) {
        let payments: Vec<Payment> = chunk
            .iter()
            .map(|invoice| Payment {
                address: invoice.address.clone(),
                amount: invoice.amount,
            })
            .collect();
        let payments = &payments;

        policy
            .run(
                || async move {
                    match distributor.send(payments).await {
                        Ok(SendOutcome::Accepted { txid }) => {
                            debug!(%txid, outputs = payments.len(), "sub-batch accepted");
                            Ok(())
                        }
                        Ok(SendOutcome::Timeout) => {
                            warn!("transaction timed out");
                            Err(SendFailure::Timeout)
                        }
                        Err(err) => {
                            warn!(error = %err, "transaction failed");
                            Err(SendFailure::Rpc(err))
                        }
                    }
                },
                |_| true,
            )
            .await
            .map_err(|source| PaymentError {
                attempts: policy.max_attempts,
                source,
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mock_actor, MockWallet, ScriptedSend};
    use mixsim_types::{FundEntry, Schedule};

    fn invoice(n: u64) -> Invoice {
        Invoice {
            address: format!("addr-{n}"),
            amount: n,
        }
    }

    fn clock_at(block: u64, round: u64) -> SimClock {
        let mut clock = SimClock::new();
        clock.observe_block(block);
        clock.observe_round(round);
        clock
    }

    #[test]
    fn buckets_drain_exactly_once() {
        let mut queue = InvoiceQueue::default();
        queue.insert(DueTime::immediate(), invoice(1));
        queue.insert(DueTime::new(0, 2), invoice(2));
        assert_eq!(queue.remaining(), 2);

        // Only the immediately-due invoice is payable at (0, 0).
        let drained = queue.drain_due(&clock_at(0, 0));
        assert_eq!(drained, vec![invoice(1)]);
        assert_eq!(queue.remaining(), 1);

        // Still not due at round 1.
        assert!(queue.drain_due(&clock_at(0, 1)).is_empty());

        // Due from round 2 on, and drained only once.
        let drained = queue.drain_due(&clock_at(0, 2));
        assert_eq!(drained, vec![invoice(2)]);
        assert!(queue.drain_due(&clock_at(0, 2)).is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn same_due_time_pools_into_one_bucket() {
        let mut queue = InvoiceQueue::default();
        for n in 0..4 {
            queue.insert(DueTime::new(1, 0), invoice(n));
        }
        assert!(queue.drain_due(&clock_at(0, 0)).is_empty());
        assert_eq!(queue.drain_due(&clock_at(1, 0)).len(), 4);
    }

    #[tokio::test]
    async fn prepare_queues_one_invoice_per_fund_entry() {
        let wallet = Arc::new(MockWallet::default());
        let actors = vec![
            mock_actor(0, Schedule::default(), wallet.clone()),
            mock_actor(1, Schedule::default(), wallet.clone()),
        ];
        let specs = vec![
            WalletSpec {
                funds: vec![
                    FundEntry::Plain(100),
                    FundEntry::Scheduled {
                        value: 200,
                        delay_blocks: 0,
                        delay_rounds: 2,
                    },
                ],
                ..WalletSpec::default()
            },
            WalletSpec {
                funds: vec![FundEntry::Plain(300)],
                ..WalletSpec::default()
            },
        ];

        let mut queue = prepare(&actors, &specs).await.unwrap();
        assert_eq!(queue.remaining(), 3);

        // Immediate bucket holds the two undelayed funds.
        let now = queue.drain_due(&clock_at(0, 0));
        let mut amounts: Vec<u64> = now.iter().map(|i| i.amount).collect();
        amounts.sort_unstable();
        assert_eq!(amounts, vec![100, 300]);

        // Every invoice got its own fresh address.
        let mut addresses: Vec<String> = now.into_iter().map(|i| i.address).collect();
        addresses.sort();
        addresses.dedup();
        assert_eq!(addresses.len(), 2);
    }

    #[tokio::test]
    async fn happy_path_uses_ceil_b_over_s_sends() {
        let distributor = MockWallet::default();
        let batch: Vec<Invoice> = (0..12).map(invoice).collect();
        pay(
            &distributor,
            batch,
            &clock_at(0, 0),
            &RetryPolicy::immediate(3),
        )
        .await
        .unwrap();
        // ceil(12 / 5) = 3 sub-batches.
        assert_eq!(distributor.send_count(), 3);
        let sizes: Vec<usize> = distributor
            .sends
            .lock()
            .unwrap()
            .iter()
            .map(Vec::len)
            .collect();
        assert_eq!(sizes, vec![5, 5, 2]);
    }

    #[tokio::test]
    async fn timeout_is_retried_without_failing_the_batch() {
        let distributor = MockWallet::scripted(vec![ScriptedSend::Timeout, ScriptedSend::Accept]);
        let batch: Vec<Invoice> = (0..3).map(invoice).collect();
        pay(
            &distributor,
            batch,
            &clock_at(0, 0),
            &RetryPolicy::immediate(3),
        )
        .await
        .unwrap();
        assert_eq!(distributor.send_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_sub_batch_fails_the_whole_call() {
        let distributor = MockWallet::scripted(vec![
            ScriptedSend::Fail,
            ScriptedSend::Fail,
            ScriptedSend::Fail,
        ]);
        let batch: Vec<Invoice> = (0..7).map(invoice).collect();
        let err = pay(
            &distributor,
            batch,
            &clock_at(0, 0),
            &RetryPolicy::immediate(3),
        )
        .await
        .unwrap_err();
        assert_eq!(err.attempts, 3);
        // The first sub-batch burned the whole budget; the second was never
        // attempted.
        assert_eq!(distributor.send_count(), 3);
    }
}
