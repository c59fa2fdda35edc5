use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use alloy::primitives::{Address, Bytes, FixedBytes, U256};
use async_trait::async_trait;
use chrono::Utc;

use crate::{
    primitives::SafekitConfig,
    provider::ProviderClient,
    safe::{AccountConfig, AccountKey, TransactionProposal},
    storage::ProposalStore,
    workflow::{StepFailure, StepRunner, Workflow, WorkflowError, WorkflowReport},
};

/// Steps of the execution workflow.
pub const EXECUTION_STEPS: [&str; 4] = ["created", "sent", "confirmed", "finalized"];

/// Sends ready proposals through `execTransaction` and waits for them to be mined.
///
/// At most one run per account is in flight; runs are never retried automatically.
pub struct ExecutionDispatcher {
    client: ProviderClient,
    store: ProposalStore,
    config: SafekitConfig,
    in_flight: Mutex<HashSet<AccountKey>>,
    store_lock: Arc<Mutex<()>>,
}

/// Clears the in-flight flag of an account when the run ends, however it ends.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<AccountKey>>,
    account: AccountKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.account);
    }
}

impl ExecutionDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(client: ProviderClient, store: ProposalStore, config: SafekitConfig) -> Self {
        Self {
            client,
            store,
            config,
            in_flight: Mutex::new(HashSet::new()),
            store_lock: Arc::default(),
        }
    }

    /// Shares `lock` with other writers of the store, so finalizing a run cannot interleave
    /// with their read-modify-write of the same record.
    #[must_use]
    pub fn with_store_lock(mut self, lock: Arc<Mutex<()>>) -> Self {
        self.store_lock = lock;
        self
    }

    /// Whether a run is in flight for `account`.
    #[must_use]
    pub fn is_running(&self, account: &AccountKey) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(account)
    }

    fn claim(&self, account: AccountKey) -> Result<InFlightGuard<'_>, WorkflowError> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(account) {
            return Err(WorkflowError::AlreadyRunning {
                key: account.to_string(),
            });
        }
        Ok(InFlightGuard {
            in_flight: &self.in_flight,
            account,
        })
    }

    /// Runs `created → sent → confirmed → finalized` for `proposal`, sent from `executor`.
    ///
    /// Step failures are reported in the returned [`WorkflowReport`], not as `Err`. On
    /// success `proposal` is marked executed and removed from the store, unless the store
    /// already holds a different proposal for the account.
    ///
    /// # Errors
    /// - `WorkflowError::AlreadyRunning` if a run for the same account is in flight
    pub async fn run(
        &self,
        proposal: &mut TransactionProposal,
        account_config: &AccountConfig,
        executor: Address,
    ) -> Result<WorkflowReport, WorkflowError> {
        let account = *proposal.account();
        let _guard = self.claim(account)?;

        crate::info!(
            "execution.started account={account} nonce={} executor={executor:?} timestamp={}",
            proposal.transaction().nonce,
            Utc::now().to_rfc3339()
        );

        let mut runner = ExecutionRunner {
            dispatcher: self,
            proposal,
            account_config,
            executor,
            calldata: None,
            tx_hash: None,
        };
        let report = Workflow::new("execution", &EXECUTION_STEPS)
            .run(&mut runner)
            .await;

        Ok(report)
    }
}

struct ExecutionRunner<'a> {
    dispatcher: &'a ExecutionDispatcher,
    proposal: &'a mut TransactionProposal,
    account_config: &'a AccountConfig,
    executor: Address,
    calldata: Option<Bytes>,
    tx_hash: Option<FixedBytes<32>>,
}

impl ExecutionRunner<'_> {
    fn created(&mut self) -> Result<Option<String>, StepFailure> {
        if self.proposal.is_executed() {
            return Err(StepFailure::failed("proposal was already executed"));
        }
        let threshold = self.account_config.threshold();
        if !self.proposal.is_ready(threshold) {
            return Err(StepFailure::failed(format!(
                "proposal has {} of {threshold} required signatures",
                self.proposal.signature_count()
            )));
        }
        self.calldata = Some(self.proposal.exec_transaction_calldata().into());
        Ok(None)
    }

    async fn sent(&mut self) -> Result<Option<String>, StepFailure> {
        let calldata = self
            .calldata
            .as_ref()
            .ok_or_else(|| StepFailure::failed("calldata was not created"))?;
        let tx_hash = self
            .dispatcher
            .client
            .send_transaction(
                self.executor,
                self.proposal.account().address,
                U256::ZERO,
                calldata,
            )
            .await?;
        self.tx_hash = Some(tx_hash);
        Ok(Some(tx_hash.to_string()))
    }

    async fn confirmed(&mut self) -> Result<Option<String>, StepFailure> {
        let tx_hash = self
            .tx_hash
            .ok_or_else(|| StepFailure::failed("transaction was not sent"))?;
        let receipt = self
            .dispatcher
            .client
            .wait_for_receipt(
                &tx_hash,
                self.dispatcher.config.confirmation_timeout(),
                self.dispatcher.config.poll_interval(),
            )
            .await?;
        crate::debug!(
            "execution.receipt tx_hash={tx_hash} block={}",
            receipt.block_number.as_deref().unwrap_or("-")
        );
        Ok(Some(tx_hash.to_string()))
    }

    fn finalized(&mut self) -> Result<Option<String>, StepFailure> {
        let account = *self.proposal.account();
        let removed = {
            let _guard = self
                .dispatcher
                .store_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.dispatcher
                .store
                .remove_if(&account, self.proposal.safe_tx_hash())
                .map_err(|e| StepFailure::failed(e.to_string()))?
        };
        self.proposal.mark_executed();
        crate::info!(
            "execution.finalized account={account} removed={removed} tx_hash={} timestamp={}",
            self.tx_hash.map(|hash| hash.to_string()).unwrap_or_default(),
            Utc::now().to_rfc3339()
        );
        Ok(None)
    }
}

#[async_trait]
impl StepRunner for ExecutionRunner<'_> {
    async fn run_step(&mut self, step: &str) -> Result<Option<String>, StepFailure> {
        match step {
            "created" => self.created(),
            "sent" => self.sent().await,
            "confirmed" => self.confirmed().await,
            "finalized" => self.finalized(),
            other => Err(StepFailure::failed(format!("unknown step {other}"))),
        }
    }
}
