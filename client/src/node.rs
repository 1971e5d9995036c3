use crate::rpc::RpcClient;
use crate::Result;
use mixsim_types::UNITS_PER_COIN;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Credentials baked into the chain-node container image.
const RPC_USER: &str = "mixsim";
const RPC_PASSWORD: &str = "mixsim";

/// Spacing between readiness probes.
const READY_POLL: Duration = Duration::from_millis(500);

/// RPC proxy for the regtest chain node.
pub struct NodeRpc {
    rpc: RpcClient,
}

impl NodeRpc {
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let url = format!("http://{host}:{port}/").parse()?;
        let auth = Some((RPC_USER.to_string(), RPC_PASSWORD.to_string()));
        Ok(Self {
            rpc: RpcClient::new(url, auth)?,
        })
    }

    /// Poll until the node answers RPC, or `timeout` elapses.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self
                .rpc
                .call::<_, Value>("getblockchaininfo", json!([]))
                .await
                .is_ok()
            {
                return true;
            }
            sleep(READY_POLL).await;
        }
        false
    }

    /// Send `amount` base units from the node wallet to `address`.
    pub async fn fund_address(&self, address: &str, amount: u64) -> Result<()> {
        let coins = amount as f64 / UNITS_PER_COIN as f64;
        self.rpc
            .call::<_, String>("sendtoaddress", json!([address, coins]))
            .await?;
        Ok(())
    }

    /// Spendable node wallet balance, in base units.
    pub async fn balance(&self) -> Result<u64> {
        let coins: f64 = self.rpc.call("getbalance", json!([])).await?;
        Ok((coins * UNITS_PER_COIN as f64).round() as u64)
    }

    /// Absolute chain height.
    pub async fn block_count(&self) -> Result<u64> {
        self.rpc.call("getblockcount", json!([])).await
    }

    pub async fn block_hash(&self, height: u64) -> Result<String> {
        self.rpc.call("getblockhash", json!([height])).await
    }

    /// Full block record including transactions (verbosity 2).
    pub async fn block_info(&self, hash: &str) -> Result<Value> {
        self.rpc.call("getblock", json!([hash, 2])).await
    }
}
