use crate::rpc::RpcClient;
use crate::{Error, Result};
use async_trait::async_trait;
use mixsim_types::Version;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Name of the single wallet every client container manages.
pub const WALLET_NAME: &str = "sim";

/// Spacing between wallet readiness probes.
const READY_POLL: Duration = Duration::from_millis(200);

/// One output of a distributor payment.
#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    #[serde(rename = "sendto")]
    pub address: String,
    pub amount: u64,
}

/// Outcome of a send call. Slow confirmation surfaces as `Timeout`, which
/// callers treat as retryable rather than as a hard failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted { txid: String },
    Timeout,
}

/// Capability interface of a wallet client, independent of its release.
#[async_trait]
pub trait WalletApi: Send + Sync {
    /// Poll until the wallet is loaded and answering, or `timeout` elapses.
    async fn wait_wallet(&self, timeout: Duration) -> bool;

    /// Fresh receiving address.
    async fn new_address(&self) -> Result<String>;

    /// Confirmed balance in base units.
    async fn balance(&self) -> Result<u64>;

    /// Broadcast one transaction paying every entry of `payments`.
    async fn send(&self, payments: &[Payment]) -> Result<SendOutcome>;

    /// Enroll in coinjoin rounds. A no-op if already enrolled.
    async fn start_coinjoin(&self) -> Result<()>;

    /// Withdraw from coinjoin rounds. A no-op if not enrolled.
    async fn stop_coinjoin(&self) -> Result<()>;

    async fn list_coins(&self) -> Result<Value>;

    async fn list_unspent_coins(&self) -> Result<Value>;

    async fn list_keys(&self) -> Result<Value>;
}

/// Constructor lookup: pick the client flavor for `version`. Major release
/// 1 daemons load their wallet at startup; major release 2 daemons expect
/// the caller to create and select it.
pub fn connect(version: Version, host: &str, port: u16) -> Result<Arc<dyn WalletApi>> {
    let rpc = WalletRpc::connect(host, port)?;
    Ok(match version.major {
        1 => Arc::new(WalletV1 { rpc }),
        _ => Arc::new(WalletV2 { rpc }),
    })
}

/// JSON-RPC plumbing shared by every client flavor.
struct WalletRpc {
    rpc: RpcClient,
}

impl WalletRpc {
    fn connect(host: &str, port: u16) -> Result<Self> {
        let url = format!("http://{host}:{port}/").parse()?;
        Ok(Self {
            rpc: RpcClient::new(url, None)?,
        })
    }

    async fn create_wallet(&self) -> Result<()> {
        self.rpc
            .call::<_, Value>("createwallet", json!([WALLET_NAME, ""]))
            .await?;
        Ok(())
    }

    async fn select_wallet(&self) -> Result<()> {
        self.rpc
            .call::<_, Value>("selectwallet", json!([WALLET_NAME]))
            .await?;
        Ok(())
    }

    async fn new_address(&self) -> Result<String> {
        let result: Value = self.rpc.call("getnewaddress", json!([WALLET_NAME])).await?;
        match result {
            Value::String(address) => Ok(address),
            Value::Object(mut fields) => match fields.remove("address") {
                Some(Value::String(address)) => Ok(address),
                _ => Err(Error::UnexpectedResponse(
                    "getnewaddress returned no address".to_string(),
                )),
            },
            other => Err(Error::UnexpectedResponse(format!(
                "getnewaddress returned {other}"
            ))),
        }
    }

    async fn balance(&self) -> Result<u64> {
        self.rpc.call("getbalance", json!([])).await
    }

    async fn send(&self, payments: &[Payment]) -> Result<SendOutcome> {
        let params = json!({
            "payments": payments,
            "coins": [],
            "feeTarget": 2,
        });
        match self.rpc.call::<_, Value>("send", params).await {
            Ok(result) => {
                let txid = result
                    .get("txid")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok(SendOutcome::Accepted { txid })
            }
            Err(err) if err.is_timeout() => Ok(SendOutcome::Timeout),
            Err(err) => Err(err),
        }
    }

    async fn start_coinjoin(&self) -> Result<()> {
        self.rpc
            .call::<_, Value>("startcoinjoin", json!(["", true, true]))
            .await?;
        Ok(())
    }

    async fn stop_coinjoin(&self) -> Result<()> {
        self.rpc.call::<_, Value>("stopcoinjoin", json!([])).await?;
        Ok(())
    }

    async fn list(&self, method: &str) -> Result<Value> {
        self.rpc.call(method, json!([])).await
    }
}

/// Major release 1: the daemon loads its wallet on startup, so readiness is
/// just the wallet answering balance queries.
struct WalletV1 {
    rpc: WalletRpc,
}

#[async_trait]
impl WalletApi for WalletV1 {
    async fn wait_wallet(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.rpc.balance().await.is_ok() {
                return true;
            }
            sleep(READY_POLL).await;
        }
        false
    }

    async fn new_address(&self) -> Result<String> {
        self.rpc.new_address().await
    }

    async fn balance(&self) -> Result<u64> {
        self.rpc.balance().await
    }

    async fn send(&self, payments: &[Payment]) -> Result<SendOutcome> {
        self.rpc.send(payments).await
    }

    async fn start_coinjoin(&self) -> Result<()> {
        self.rpc.start_coinjoin().await
    }

    async fn stop_coinjoin(&self) -> Result<()> {
        self.rpc.stop_coinjoin().await
    }

    async fn list_coins(&self) -> Result<Value> {
        self.rpc.list("listcoins").await
    }

    async fn list_unspent_coins(&self) -> Result<Value> {
        self.rpc.list("listunspentcoins").await
    }

    async fn list_keys(&self) -> Result<Value> {
        self.rpc.list("listkeys").await
    }
}

/// Major release 2: the wallet must be created and selected first, and both
/// calls race against daemon startup, so readiness keeps trying the full
/// create/select/query sequence until it goes through.
struct WalletV2 {
    rpc: WalletRpc,
}

#[async_trait]
impl WalletApi for WalletV2 {
    async fn wait_wallet(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            // Creation fails once the wallet exists; that is fine as long
            // as selection and a balance query succeed afterwards.
            let _ = self.rpc.create_wallet().await;
            if self.rpc.select_wallet().await.is_ok() && self.rpc.balance().await.is_ok() {
                return true;
            }
            sleep(READY_POLL).await;
        }
        false
    }

    async fn new_address(&self) -> Result<String> {
        self.rpc.new_address().await
    }

    async fn balance(&self) -> Result<u64> {
        self.rpc.balance().await
    }

    async fn send(&self, payments: &[Payment]) -> Result<SendOutcome> {
        self.rpc.send(payments).await
    }

    async fn start_coinjoin(&self) -> Result<()> {
        self.rpc.start_coinjoin().await
    }

    async fn stop_coinjoin(&self) -> Result<()> {
        self.rpc.stop_coinjoin().await
    }

    async fn list_coins(&self) -> Result<Value> {
        self.rpc.list("listcoins").await
    }

    async fn list_unspent_coins(&self) -> Result<Value> {
        self.rpc.list("listunspentcoins").await
    }

    async fn list_keys(&self) -> Result<Value> {
        self.rpc.list("listkeys").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payments_serialize_with_wire_field_names() {
        let payment = Payment {
            address: "bcrt1qexample".to_string(),
            amount: 50_000,
        };
        let encoded = serde_json::to_value(&payment).unwrap();
        assert_eq!(
            encoded,
            json!({"sendto": "bcrt1qexample", "amount": 50_000})
        );
    }
}
