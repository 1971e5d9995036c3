use mixsim_client::WalletApi;
use mixsim_types::{Schedule, Version};
use std::sync::Arc;

/// A provisioned wallet actor.
///
/// Identity fields are fixed when the actor is created and only ever read
/// afterwards; the schedulers share the handle through `Arc`.
pub struct WalletActor {
    /// Position of this actor's spec in the scenario wallet list.
    pub index: usize,
    /// Container name, before driver namespacing.
    pub name: String,
    /// Container-internal network address.
    pub address: String,
    pub version: Version,
    pub schedule: Schedule,
    pub api: Arc<dyn WalletApi>,
}

/// Container name for the wallet at `index`.
pub fn wallet_name(index: usize) -> String {
    format!("wallet-{index:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_names_are_zero_padded() {
        assert_eq!(wallet_name(0), "wallet-000");
        assert_eq!(wallet_name(42), "wallet-042");
        assert_eq!(wallet_name(137), "wallet-137");
    }
}
