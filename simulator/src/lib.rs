//! Simulation engine for a round-based coinjoin network.
//!
//! The engine provisions a chain node, a coordinator, and a population of
//! wallet containers, funds the wallets through a distributor according to
//! the scenario's invoice plan, and drives every wallet in and out of
//! coinjoin rounds as simulation time (blocks, rounds) advances. Teardown
//! and evidence collection run on every exit path.

pub mod actors;
pub mod collect;
pub mod engine;
pub mod infra;
pub mod invoices;
pub mod participation;
pub mod population;
pub mod run;

#[cfg(test)]
pub(crate) mod testing;

use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

/// Sleep a uniformly random delay up to `max`, so fanned-out actor
/// commands do not land on the collaborators at the same instant.
pub(crate) async fn desync(max: Duration) {
    if max.is_zero() {
        return;
    }
    let fraction: f64 = rand::thread_rng().gen();
    sleep(max.mul_f64(fraction)).await;
}
