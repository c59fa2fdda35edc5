//! Bridge to the host's EIP-1193 wallet provider.
//!
//! Safekit never talks to a node directly. Every chain interaction (reading Safe state,
//! sending transactions, polling receipts) goes through the [`WalletProvider`] the host
//! injects, typically the browser extension or a WalletConnect session.

use std::sync::Arc;
use std::time::Duration;

use alloy::hex::FromHex;
use alloy::primitives::{Address, Bytes, FixedBytes, U256};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};

/// The `accounts → chain` connection workflow.
pub mod connection;

pub use connection::{connect_wallet, ConnectionReport, CONNECTION_STEPS};

/// EIP-1193 error code for a request the user rejected.
pub const USER_REJECTED_CODE: i64 = 4001;
/// EIP-1193 error code for a provider disconnected from all chains.
pub const DISCONNECTED_CODE: i64 = 4900;
/// EIP-1193 error code for a provider disconnected from the requested chain.
pub const CHAIN_DISCONNECTED_CODE: i64 = 4901;

/// EIP-1193 `request` implemented by the host application.
///
/// `params_json` is the JSON array of positional params; the returned string is the JSON
/// encoded `result`. Hosts may also return the full JSON-RPC envelope
/// (`{"jsonrpc":"2.0","id":..,"result":..}` or `{"error":{..}}`); both are understood.
///
/// Provider errors should be mapped to [`ProviderError`]: code 4001 to `UserRejected`,
/// 4900/4901 to `Disconnected`, anything else to `Rpc`.
#[uniffi::export(with_foreign)]
#[async_trait::async_trait]
pub trait WalletProvider: Send + Sync {
    /// Performs a single EIP-1193 request.
    ///
    /// # Errors
    /// See [`ProviderError`].
    async fn request(&self, method: String, params_json: String) -> Result<String, ProviderError>;
}

/// Errors surfaced by a [`WalletProvider`].
#[crate::safekit_error]
pub enum ProviderError {
    /// The user dismissed the wallet prompt.
    #[error("request rejected by user")]
    UserRejected,
    /// The provider is not connected.
    #[error("wallet provider disconnected")]
    Disconnected,
    /// The node or the wallet answered with a JSON-RPC error.
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },
    /// The provider answered with something safekit cannot interpret.
    #[error("invalid response to {method}: {message}")]
    InvalidResponse {
        /// The JSON-RPC method that was called.
        method: String,
        /// What is wrong with the response.
        message: String,
    },
}

impl ProviderError {
    /// Maps a JSON-RPC / EIP-1193 error object onto the matching variant.
    #[must_use]
    pub fn from_rpc_error(code: i64, message: String) -> Self {
        match code {
            USER_REJECTED_CODE => Self::UserRejected,
            DISCONNECTED_CODE | CHAIN_DISCONNECTED_CODE => Self::Disconnected,
            _ => Self::Rpc { code, message },
        }
    }

    fn invalid_response(method: RpcMethod, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            method: method.as_str().to_string(),
            message: message.into(),
        }
    }
}

impl From<uniffi::UnexpectedUniFFICallbackError> for ProviderError {
    fn from(error: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::Generic {
            message: error.reason,
        }
    }
}

/// JSON-RPC methods safekit sends to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcMethod {
    /// Prompts the user to expose accounts.
    RequestAccounts,
    /// Currently selected chain.
    ChainId,
    /// Signs and broadcasts a transaction from a wallet account.
    SendTransaction,
    /// Receipt of a mined transaction, `null` while pending.
    GetTransactionReceipt,
    /// Read-only contract call.
    Call,
    /// Deployed bytecode at an address.
    GetCode,
}

impl RpcMethod {
    /// Get the string representation of the RPC method
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RequestAccounts => "eth_requestAccounts",
            Self::ChainId => "eth_chainId",
            Self::SendTransaction => "eth_sendTransaction",
            Self::GetTransactionReceipt => "eth_getTransactionReceipt",
            Self::Call => "eth_call",
            Self::GetCode => "eth_getCode",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    code: i64,
    message: String,
}

/// Subset of a transaction receipt safekit relies on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    /// Hash of the mined transaction.
    pub transaction_hash: String,
    /// Block the transaction was included in, hex quantity.
    pub block_number: Option<String>,
    /// `0x1` on success, `0x0` on revert. Absent before Byzantium.
    pub status: Option<String>,
}

impl TransactionReceipt {
    /// Whether the transaction did not revert.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        !matches!(self.status.as_deref(), Some("0x0"))
    }
}

/// Why waiting for a receipt did not produce a successful one.
#[derive(Debug)]
pub enum ReceiptError {
    /// No receipt within the confirmation timeout.
    Timeout {
        /// The timeout that elapsed, in milliseconds.
        millis: u64,
    },
    /// The transaction was mined but reverted.
    Reverted {
        /// The reverted transaction.
        tx_hash: String,
    },
    /// Polling itself failed.
    Provider(ProviderError),
}

impl std::fmt::Display for ReceiptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout { millis } => write!(f, "no receipt after {millis} ms"),
            Self::Reverted { tx_hash } => write!(f, "transaction {tx_hash} reverted"),
            Self::Provider(err) => write!(f, "{err}"),
        }
    }
}

/// Typed JSON-RPC calls on top of a [`WalletProvider`].
#[derive(Clone)]
pub struct ProviderClient {
    provider: Arc<dyn WalletProvider>,
}

impl ProviderClient {
    /// Wraps the host provider.
    #[must_use]
    pub fn new(provider: Arc<dyn WalletProvider>) -> Self {
        Self { provider }
    }

    async fn call<R>(&self, method: RpcMethod, params: Value) -> Result<R, ProviderError>
    where
        R: DeserializeOwned,
    {
        crate::trace!("provider.request method={}", method.as_str());

        let response = self
            .provider
            .request(method.as_str().to_string(), params.to_string())
            .await?;

        let json_response: Value = serde_json::from_str(&response)
            .map_err(|err| ProviderError::invalid_response(method, err.to_string()))?;

        // full JSON-RPC envelope
        let result = if json_response.get("jsonrpc").is_some() {
            if let Some(error) = json_response.get("error") {
                let payload: ErrorPayload = serde_json::from_value(error.clone())
                    .map_err(|err| ProviderError::invalid_response(method, err.to_string()))?;
                return Err(ProviderError::from_rpc_error(payload.code, payload.message));
            }
            json_response.get("result").cloned().ok_or_else(|| {
                ProviderError::invalid_response(
                    method,
                    "response missing both 'result' and 'error' fields",
                )
            })?
        } else {
            json_response
        };

        serde_json::from_value(result)
            .map_err(|err| ProviderError::invalid_response(method, err.to_string()))
    }

    /// `eth_requestAccounts`.
    ///
    /// # Errors
    /// Provider failures, or an account that is not an address.
    pub async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError> {
        let accounts: Vec<String> = self.call(RpcMethod::RequestAccounts, json!([])).await?;
        accounts
            .iter()
            .map(|account| {
                account.parse::<Address>().map_err(|err| {
                    ProviderError::invalid_response(RpcMethod::RequestAccounts, err.to_string())
                })
            })
            .collect()
    }

    /// `eth_chainId`.
    ///
    /// # Errors
    /// Provider failures, or a result that is not a chain id.
    pub async fn chain_id(&self) -> Result<u64, ProviderError> {
        let chain_id: String = self.call(RpcMethod::ChainId, json!([])).await?;
        crate::primitives::parse_chain_id(&chain_id)
            .map_err(|err| ProviderError::invalid_response(RpcMethod::ChainId, err.to_string()))
    }

    /// `eth_sendTransaction` from a wallet account. Returns the transaction hash.
    ///
    /// # Errors
    /// Provider failures, including the user rejecting the prompt.
    pub async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        value: U256,
        data: &Bytes,
    ) -> Result<FixedBytes<32>, ProviderError> {
        let params = json!([{
            "from": format!("{from:?}"),
            "to": format!("{to:?}"),
            "value": format!("{value:#x}"),
            "data": format!("0x{}", hex::encode(data)),
        }]);
        let tx_hash: String = self.call(RpcMethod::SendTransaction, params).await?;
        FixedBytes::from_hex(&tx_hash).map_err(|err| {
            ProviderError::invalid_response(
                RpcMethod::SendTransaction,
                format!("invalid transaction hash: {err}"),
            )
        })
    }

    /// `eth_getTransactionReceipt`. `None` while the transaction is pending.
    ///
    /// # Errors
    /// Provider failures.
    pub async fn transaction_receipt(
        &self,
        tx_hash: &FixedBytes<32>,
    ) -> Result<Option<TransactionReceipt>, ProviderError> {
        self.call(RpcMethod::GetTransactionReceipt, json!([tx_hash.to_string()]))
            .await
    }

    /// `eth_call` against the latest block.
    ///
    /// # Errors
    /// Provider failures, or a result that is not hex.
    pub async fn eth_call(&self, to: Address, data: &[u8]) -> Result<Bytes, ProviderError> {
        let params = json!([
            {
                "to": format!("{to:?}"),
                "data": format!("0x{}", hex::encode(data)),
            },
            "latest"
        ]);
        let result: String = self.call(RpcMethod::Call, params).await?;
        Bytes::from_hex(&result)
            .map_err(|err| ProviderError::invalid_response(RpcMethod::Call, err.to_string()))
    }

    /// `eth_getCode` against the latest block.
    ///
    /// # Errors
    /// Provider failures, or a result that is not hex.
    pub async fn get_code(&self, address: Address) -> Result<Bytes, ProviderError> {
        let params = json!([format!("{address:?}"), "latest"]);
        let result: String = self.call(RpcMethod::GetCode, params).await?;
        Bytes::from_hex(&result)
            .map_err(|err| ProviderError::invalid_response(RpcMethod::GetCode, err.to_string()))
    }

    /// Polls `eth_getTransactionReceipt` every `poll_interval` until the receipt shows up
    /// or `timeout` elapses.
    ///
    /// # Errors
    /// - `ReceiptError::Timeout` when no receipt appears in time
    /// - `ReceiptError::Reverted` when the receipt has `status = 0x0`
    /// - `ReceiptError::Provider` when a poll fails
    pub async fn wait_for_receipt(
        &self,
        tx_hash: &FixedBytes<32>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<TransactionReceipt, ReceiptError> {
        let poll = async {
            loop {
                if let Some(receipt) = self.transaction_receipt(tx_hash).await? {
                    return Ok::<_, ProviderError>(receipt);
                }
                tokio::time::sleep(poll_interval).await;
            }
        };

        let receipt = tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| ReceiptError::Timeout {
                millis: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })?
            .map_err(ReceiptError::Provider)?;

        if !receipt.succeeded() {
            return Err(ReceiptError::Reverted {
                tx_hash: tx_hash.to_string(),
            });
        }
        Ok(receipt)
    }
}
