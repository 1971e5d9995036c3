use crate::actors::WalletActor;
use crate::desync;
use futures::stream::{self, StreamExt};
use mixsim_types::SimClock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Drive every wallet to the participation state its schedule demands at
/// `clock`.
///
/// The target state is re-derived from the schedule on every tick; wallets
/// already in the right state receive a redundant command, which the client
/// treats as a no-op. Join commands for this tick are fully drained before
/// the leave fan-out starts, and both fan-outs finish before the tick ends.
/// Command failures are diagnostics, not errors: the next tick will try
/// again.
pub async fn tick(actors: &[Arc<WalletActor>], clock: SimClock, pool: usize, jitter: Duration) {
    let (join, leave): (Vec<_>, Vec<_>) = actors
        .iter()
        .cloned()
        .partition(|actor| actor.schedule.is_active(&clock));
    debug!(
        join = join.len(),
        leave = leave.len(),
        block = clock.block(),
        round = clock.round(),
        "participation tick"
    );

    stream::iter(join)
        .for_each_concurrent(pool.max(1), |actor| async move {
            desync(jitter).await;
            if let Err(err) = actor.api.start_coinjoin().await {
                warn!(wallet = %actor.name, error = %err, "could not start mixing");
            }
        })
        .await;

    stream::iter(leave)
        .for_each_concurrent(pool.max(1), |actor| async move {
            desync(jitter).await;
            if let Err(err) = actor.api.stop_coinjoin().await {
                warn!(wallet = %actor.name, error = %err, "could not stop mixing");
            }
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mock_actor, MockWallet};
    use mixsim_types::Schedule;
    use std::sync::atomic::Ordering;

    fn clock_at(block: u64, round: u64) -> SimClock {
        let mut clock = SimClock::new();
        clock.observe_block(block);
        clock.observe_round(round);
        clock
    }

    #[tokio::test]
    async fn wallet_mixes_until_its_stop_round() {
        // delay (0, 0), stop (0, 2): active at rounds 0 and 1, out from 2.
        let wallet = Arc::new(MockWallet::default());
        let actors = vec![mock_actor(
            0,
            Schedule {
                stop_rounds: 2,
                ..Schedule::default()
            },
            wallet.clone(),
        )];

        tick(&actors, clock_at(0, 0), 4, Duration::ZERO).await;
        assert_eq!(wallet.starts.load(Ordering::Relaxed), 1);
        assert_eq!(wallet.stops.load(Ordering::Relaxed), 0);

        tick(&actors, clock_at(0, 1), 4, Duration::ZERO).await;
        assert_eq!(wallet.starts.load(Ordering::Relaxed), 2);
        assert_eq!(wallet.stops.load(Ordering::Relaxed), 0);

        tick(&actors, clock_at(0, 2), 4, Duration::ZERO).await;
        tick(&actors, clock_at(0, 3), 4, Duration::ZERO).await;
        assert_eq!(wallet.starts.load(Ordering::Relaxed), 2);
        assert_eq!(wallet.stops.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn delayed_wallet_joins_late() {
        let wallet = Arc::new(MockWallet::default());
        let actors = vec![mock_actor(
            0,
            Schedule {
                delay_blocks: 2,
                ..Schedule::default()
            },
            wallet.clone(),
        )];

        tick(&actors, clock_at(0, 0), 4, Duration::ZERO).await;
        tick(&actors, clock_at(1, 0), 4, Duration::ZERO).await;
        assert_eq!(wallet.starts.load(Ordering::Relaxed), 0);
        assert_eq!(wallet.stops.load(Ordering::Relaxed), 2);

        tick(&actors, clock_at(2, 0), 4, Duration::ZERO).await;
        assert_eq!(wallet.starts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn mixed_population_partitions_per_wallet() {
        let active = Arc::new(MockWallet::default());
        let delayed = Arc::new(MockWallet::default());
        let stopped = Arc::new(MockWallet::default());
        let actors = vec![
            mock_actor(0, Schedule::default(), active.clone()),
            mock_actor(
                1,
                Schedule {
                    delay_rounds: 5,
                    ..Schedule::default()
                },
                delayed.clone(),
            ),
            mock_actor(
                2,
                Schedule {
                    stop_blocks: 1,
                    ..Schedule::default()
                },
                stopped.clone(),
            ),
        ];

        tick(&actors, clock_at(1, 1), 4, Duration::ZERO).await;
        assert_eq!(active.starts.load(Ordering::Relaxed), 1);
        assert_eq!(delayed.starts.load(Ordering::Relaxed), 0);
        assert_eq!(delayed.stops.load(Ordering::Relaxed), 1);
        assert_eq!(stopped.starts.load(Ordering::Relaxed), 0);
        assert_eq!(stopped.stops.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn repeated_ticks_reissue_idempotent_commands() {
        // The scheduler tracks no per-wallet state: the same clock yields
        // the same command, and redundancy is absorbed by the client.
        let wallet = Arc::new(MockWallet::default());
        let actors = vec![mock_actor(0, Schedule::default(), wallet.clone())];

        tick(&actors, clock_at(0, 0), 4, Duration::ZERO).await;
        tick(&actors, clock_at(0, 0), 4, Duration::ZERO).await;
        assert_eq!(wallet.starts.load(Ordering::Relaxed), 2);
        assert_eq!(wallet.stops.load(Ordering::Relaxed), 0);
    }
}
