use std::sync::Arc;

use alloy::primitives::Address;
use async_trait::async_trait;

use crate::provider::{ProviderClient, WalletProvider};
use crate::workflow::{StepFailure, StepRunner, Workflow, WorkflowReport};

/// Steps of the connection workflow.
pub const CONNECTION_STEPS: [&str; 2] = ["accounts", "chain"];

/// Result of [`connect_wallet`].
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct ConnectionReport {
    /// First exposed account, checksummed, once `accounts` succeeded.
    pub account: Option<String>,
    /// Chain the wallet reported, once `chain` ran.
    pub chain_id: Option<u64>,
    /// Step-by-step outcome.
    pub workflow: WorkflowReport,
}

struct ConnectionRunner {
    client: ProviderClient,
    expected_chain_id: u64,
    account: Option<Address>,
    chain_id: Option<u64>,
}

#[async_trait]
impl StepRunner for ConnectionRunner {
    async fn run_step(&mut self, step: &str) -> Result<Option<String>, StepFailure> {
        match step {
            "accounts" => {
                let accounts = self.client.request_accounts().await?;
                let account = accounts
                    .first()
                    .copied()
                    .ok_or_else(|| StepFailure::failed("wallet exposed no accounts"))?;
                self.account = Some(account);
                Ok(None)
            }
            "chain" => {
                let chain_id = self.client.chain_id().await?;
                self.chain_id = Some(chain_id);
                if chain_id != self.expected_chain_id {
                    return Err(StepFailure::failed(format!(
                        "wallet is on chain {chain_id}, expected {}",
                        self.expected_chain_id
                    )));
                }
                Ok(None)
            }
            other => Err(StepFailure::failed(format!("unknown step {other}"))),
        }
    }
}

/// Connects the wallet: asks for accounts, then checks the wallet is on `expected_chain_id`.
///
/// A rejected prompt (EIP-1193 code 4001) fails the `accounts` step instead of waiting.
#[uniffi::export(async_runtime = "tokio")]
pub async fn connect_wallet(
    provider: Arc<dyn WalletProvider>,
    expected_chain_id: u64,
) -> ConnectionReport {
    let _safekit_logger_ctx = crate::primitives::logger::LogContext::new("Connection");

    let mut runner = ConnectionRunner {
        client: ProviderClient::new(provider),
        expected_chain_id,
        account: None,
        chain_id: None,
    };
    let report = Workflow::new("connection", &CONNECTION_STEPS)
        .run(&mut runner)
        .await;

    ConnectionReport {
        account: runner.account.map(|account| account.to_checksum(None)),
        chain_id: runner.chain_id,
        workflow: report,
    }
}
