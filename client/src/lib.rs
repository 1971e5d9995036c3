//! Typed RPC proxies for the simulation actors: the chain node, the
//! coordinator, and the versioned wallet clients.

pub mod coordinator;
pub mod node;
pub mod rpc;
pub mod wallet;

pub use coordinator::CoordinatorRpc;
pub use node::NodeRpc;
pub use rpc::RetryPolicy;
pub use wallet::{Payment, SendOutcome, WalletApi};

use thiserror::Error;

/// Error type for proxy operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed: {0}")]
    Failed(reqwest::StatusCode),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl Error {
    /// Whether the failure is plausibly transient (connection trouble,
    /// request timeout, or a server-side 5xx) and worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Reqwest(err) => {
                err.is_connect()
                    || err.is_timeout()
                    || err.status().is_some_and(|s| s.is_server_error())
            }
            Error::Failed(status) => status.is_server_error(),
            _ => false,
        }
    }

    /// Whether the failure is a plain request timeout.
    pub(crate) fn is_timeout(&self) -> bool {
        matches!(self, Error::Reqwest(err) if err.is_timeout())
    }
}

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, Error>;
