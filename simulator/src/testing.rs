//! Scripted collaborators shared by the scheduler tests.

use crate::actors::WalletActor;
use async_trait::async_trait;
use mixsim_client::{Payment, Result, SendOutcome, WalletApi};
use mixsim_types::{Schedule, Version};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the next scripted `send` call should do.
pub(crate) enum ScriptedSend {
    Accept,
    Timeout,
    Fail,
}

/// In-memory wallet that records every command it receives. With an empty
/// send script, every send is accepted.
#[derive(Default)]
pub(crate) struct MockWallet {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub sends: Mutex<Vec<Vec<Payment>>>,
    pub send_script: Mutex<VecDeque<ScriptedSend>>,
    addresses: AtomicUsize,
}

impl MockWallet {
    pub fn scripted(script: Vec<ScriptedSend>) -> Self {
        Self {
            send_script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub fn send_count(&self) -> usize {
        self.sends.lock().unwrap().len()
    }
}

#[async_trait]
impl WalletApi for MockWallet {
    async fn wait_wallet(&self, _timeout: Duration) -> bool {
        true
    }

    async fn new_address(&self) -> Result<String> {
        let n = self.addresses.fetch_add(1, Ordering::Relaxed);
        Ok(format!("addr-{n}"))
    }

    async fn balance(&self) -> Result<u64> {
        Ok(0)
    }

    async fn send(&self, payments: &[Payment]) -> Result<SendOutcome> {
        self.sends.lock().unwrap().push(payments.to_vec());
        match self.send_script.lock().unwrap().pop_front() {
            None | Some(ScriptedSend::Accept) => Ok(SendOutcome::Accepted {
                txid: "mock-txid".to_string(),
            }),
            Some(ScriptedSend::Timeout) => Ok(SendOutcome::Timeout),
            Some(ScriptedSend::Fail) => Err(mixsim_client::Error::UnexpectedResponse(
                "scripted failure".to_string(),
            )),
        }
    }

    async fn start_coinjoin(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn stop_coinjoin(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn list_coins(&self) -> Result<Value> {
        Ok(json!([]))
    }

    async fn list_unspent_coins(&self) -> Result<Value> {
        Ok(json!([]))
    }

    async fn list_keys(&self) -> Result<Value> {
        Ok(json!([]))
    }
}

/// Actor wrapping a mock wallet, for scheduler tests.
pub(crate) fn mock_actor(
    index: usize,
    schedule: Schedule,
    wallet: Arc<MockWallet>,
) -> Arc<WalletActor> {
    Arc::new(WalletActor {
        index,
        name: crate::actors::wallet_name(index),
        address: format!("10.0.0.{}", index + 2),
        version: Version::new(2, 0, 4),
        schedule,
        api: wallet,
    })
}
