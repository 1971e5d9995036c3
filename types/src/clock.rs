use serde::Serialize;

/// Simulation time: completed protocol rounds and blocks mined since start.
///
/// Both counters start at zero and only move forward. External reads feed in
/// through [`SimClock::observe_round`] / [`SimClock::observe_block`], which
/// discard any reading lower than the value already held, so a transient
/// stale read can never move the simulation backwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimClock {
    round: u64,
    block: u64,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn block(&self) -> u64 {
        self.block
    }

    /// Record an observed round count, keeping the counter monotonic.
    pub fn observe_round(&mut self, round: u64) {
        self.round = self.round.max(round);
    }

    /// Record an observed relative block height, keeping the counter monotonic.
    pub fn observe_block(&mut self, block: u64) {
        self.block = self.block.max(block);
    }

    /// Whether an obligation keyed by `due` is payable at this time.
    pub fn is_due(&self, due: DueTime) -> bool {
        self.block >= due.block && self.round >= due.round
    }
}

/// The `(block, round)` key at which an invoice becomes payable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DueTime {
    pub block: u64,
    pub round: u64,
}

impl DueTime {
    pub fn new(block: u64, round: u64) -> Self {
        Self { block, round }
    }

    /// Immediately payable.
    pub fn immediate() -> Self {
        Self::default()
    }
}
