pub mod clock;
pub mod scenario;
pub mod schedule;
pub mod version;

pub use clock::{DueTime, SimClock};
pub use scenario::{FundEntry, Scenario, ScenarioError, WalletSpec};
pub use schedule::Schedule;
pub use version::Version;

/// Base units per coin; funding amounts are expressed in base units.
pub const UNITS_PER_COIN: u64 = 100_000_000;
