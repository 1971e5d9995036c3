use crate::clock::SimClock;

/// Per-wallet participation window over simulation time.
///
/// `delay_*` gate when the wallet may start mixing; `stop_*` force it out
/// once reached (0 = no limit). The window is fixed when the wallet is
/// provisioned and never changes afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Schedule {
    pub delay_blocks: u64,
    pub delay_rounds: u64,
    pub stop_blocks: u64,
    pub stop_rounds: u64,
}

impl Schedule {
    /// Whether a wallet with this schedule should be mixing at `clock`.
    ///
    /// Pure function of the schedule and the clock; the participation
    /// scheduler re-derives the target state from it on every tick instead
    /// of tracking what it last told each wallet.
    pub fn is_active(&self, clock: &SimClock) -> bool {
        if self.stop_blocks > 0 && clock.block() >= self.stop_blocks {
            return false;
        }
        if self.stop_rounds > 0 && clock.round() >= self.stop_rounds {
            return false;
        }
        clock.block() >= self.delay_blocks && clock.round() >= self.delay_rounds
    }
}
