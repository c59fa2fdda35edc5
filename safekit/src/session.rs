//! The session object a host creates per opened Safe.
//!
//! A session bundles everything the lifecycle operations need (account, chain, owners and
//! threshold, storage, wallet provider, configuration) so no state is ambient.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use alloy::primitives::{Address, Bytes};
use chrono::Utc;

use crate::{
    primitives::{
        ChainConfig, ChainRegistry, DeviceKeyValueStore, ParseFromForeignBinding, SafekitConfig,
        ValidationError,
    },
    provider::{ProviderClient, ProviderError, WalletProvider},
    safe::{
        build_proposal,
        execution::ExecutionDispatcher,
        onchain::{fetch_account_config, fetch_nonce},
        AccountConfig, AccountKey, DeploymentStatus, DraftCall, LocalOwnerSigner,
        ProposalSnapshot, SafeSignature, SignatureError, TransactionProposal,
        UnparsedAccountConfig,
    },
    safekit_export,
    storage::{ProposalStore, StorageError},
    workflow::{WorkflowError, WorkflowReport},
};

/// Errors from [`SafeSession`] operations.
#[crate::safekit_error]
pub enum SessionError {
    /// Input validation failed.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// A signature was rejected.
    #[error(transparent)]
    Signature(#[from] SignatureError),
    /// Persistence failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The execution workflow could not start.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    /// The wallet provider failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// The account has no active proposal.
    #[error("no active proposal for {account}")]
    NoActiveProposal {
        /// The account.
        account: String,
    },
}

/// Lifecycle of the single active proposal of one Safe.
///
/// Every mutating operation loads the proposal from storage, changes it and writes the
/// full record back under the session lock, so the stored record is the source of truth.
#[derive(uniffi::Object)]
pub struct SafeSession {
    account: AccountKey,
    chain: ChainConfig,
    account_config: RwLock<AccountConfig>,
    store: ProposalStore,
    client: ProviderClient,
    dispatcher: ExecutionDispatcher,
    op_lock: Arc<Mutex<()>>,
}

impl SafeSession {
    /// Builds a session from parsed parts.
    ///
    /// # Errors
    /// - `ValidationError::InvalidInput` if `chain` is not the chain of `account`
    pub fn from_parts(
        account: AccountKey,
        chain: ChainConfig,
        account_config: AccountConfig,
        kv_store: Arc<dyn DeviceKeyValueStore>,
        provider: Arc<dyn WalletProvider>,
        config: SafekitConfig,
    ) -> Result<Self, ValidationError> {
        if chain.chain_id != account.chain_id {
            return Err(ValidationError::invalid_input(
                "chain_id",
                format!(
                    "account is on chain {}, chain config is for {}",
                    account.chain_id, chain.chain_id
                ),
            ));
        }
        let store = ProposalStore::new(kv_store);
        let client = ProviderClient::new(provider);
        let op_lock = Arc::new(Mutex::new(()));
        Ok(Self {
            account,
            chain,
            account_config: RwLock::new(account_config),
            dispatcher: ExecutionDispatcher::new(client.clone(), store.clone(), config)
                .with_store_lock(Arc::clone(&op_lock)),
            store,
            client,
            op_lock,
        })
    }

    /// The Safe of this session.
    #[must_use]
    pub const fn account(&self) -> &AccountKey {
        &self.account
    }

    fn config(&self) -> AccountConfig {
        self.account_config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn no_active_proposal(&self) -> SessionError {
        SessionError::NoActiveProposal {
            account: self.account.to_string(),
        }
    }

    fn active_proposal(&self) -> Result<TransactionProposal, SessionError> {
        self.store
            .load(&self.account)?
            .ok_or_else(|| self.no_active_proposal())
    }

    fn store_new_proposal(
        &self,
        calls: &[DraftCall],
        nonce: u64,
    ) -> Result<ProposalSnapshot, SessionError> {
        let proposal = build_proposal(self.account, &self.chain, calls, nonce)?;

        let _guard = self.op_lock.lock().unwrap_or_else(PoisonError::into_inner);
        // a corrupt previous record is replaced as well
        if let Ok(Some(previous)) = self.store.load(&self.account) {
            crate::warn!(
                "proposal.replaced account={} previous_nonce={} previous_signatures={}",
                self.account,
                previous.transaction().nonce,
                previous.signature_count()
            );
        }
        self.store.save(&self.account, &proposal)?;

        crate::info!(
            "proposal.created account={} nonce={nonce} calls={} safe_tx_hash={} timestamp={}",
            self.account,
            calls.len(),
            proposal.safe_tx_hash(),
            Utc::now().to_rfc3339()
        );
        Ok(proposal.snapshot(&self.config()))
    }

    /// Adds a parsed signature to the active proposal and persists it.
    ///
    /// # Errors
    /// - `SessionError::NoActiveProposal` if there is nothing to sign
    /// - `SessionError::Signature` if the collector rejects the signature
    pub fn add_parsed_signature(
        &self,
        signature: SafeSignature,
    ) -> Result<ProposalSnapshot, SessionError> {
        let config = self.config();
        let _guard = self.op_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut proposal = self.active_proposal()?;

        let signer = signature.signer;
        let status = proposal.add_signature(&config, signature)?;
        self.store.save(&self.account, &proposal)?;

        crate::info!(
            "signature.added account={} signer={signer:?} count={} threshold={} status={status:?}",
            self.account,
            proposal.signature_count(),
            config.threshold()
        );
        Ok(proposal.snapshot(&config))
    }
}

#[safekit_export]
impl SafeSession {
    /// Opens a session for the Safe at `safe_address` on `chain_id`.
    ///
    /// # Errors
    /// - `SessionError::Validation` for an unknown chain, a malformed address or an
    ///   invalid owner configuration
    #[uniffi::constructor]
    pub fn new(
        registry: Arc<ChainRegistry>,
        chain_id: u64,
        safe_address: String,
        account_config: UnparsedAccountConfig,
        kv_store: Arc<dyn DeviceKeyValueStore>,
        provider: Arc<dyn WalletProvider>,
        config: Arc<SafekitConfig>,
    ) -> Result<Self, SessionError> {
        let account = AccountKey::parse(chain_id, &safe_address)?;
        let chain = registry.get(chain_id)?;
        let account_config = AccountConfig::try_from(account_config)?;
        Ok(Self::from_parts(
            account,
            chain,
            account_config,
            kv_store,
            provider,
            (*config).clone(),
        )?)
    }

    /// Checksummed Safe address.
    #[must_use]
    pub fn safe_address(&self) -> String {
        self.account.address.to_checksum(None)
    }

    /// Chain id of the Safe.
    #[must_use]
    pub fn chain_id(&self) -> u64 {
        self.account.chain_id
    }

    /// Owners, threshold and deployment status the session works with.
    #[must_use]
    pub fn account_config(&self) -> UnparsedAccountConfig {
        UnparsedAccountConfig::from(&self.config())
    }

    /// Drafts a proposal from `calls` with an explicit `nonce`, replacing any active one.
    ///
    /// # Errors
    /// - `SessionError::Validation` naming the first malformed call field
    /// - `SessionError::Storage` if it cannot be saved
    pub fn propose(
        &self,
        calls: Vec<DraftCall>,
        nonce: u64,
    ) -> Result<ProposalSnapshot, SessionError> {
        self.store_new_proposal(&calls, nonce)
    }

    /// Drafts a proposal from `calls` using the Safe's current on-chain nonce.
    ///
    /// # Errors
    /// - `SessionError::Provider` if the nonce cannot be read
    /// - see [`SafeSession::propose`]
    pub async fn propose_next(
        &self,
        calls: Vec<DraftCall>,
    ) -> Result<ProposalSnapshot, SessionError> {
        let nonce = if self.config().deployment() == DeploymentStatus::Predicted {
            0
        } else {
            fetch_nonce(&self.client, self.account.address).await?
        };
        self.store_new_proposal(&calls, nonce)
    }

    /// Adds an owner's signature (`0x` hex) to the active proposal.
    ///
    /// # Errors
    /// - `SessionError::Validation` if `signer` or `signature` is malformed
    /// - `SessionError::Signature` for duplicate, unauthorized or invalid signatures
    /// - `SessionError::NoActiveProposal` if there is nothing to sign
    pub fn add_signature(
        &self,
        signer: String,
        signature: String,
        is_contract_signature: bool,
    ) -> Result<ProposalSnapshot, SessionError> {
        let signer = Address::parse_from_ffi(&signer, "signer")?;
        let data = Bytes::parse_from_ffi(&signature, "signature")?;
        self.add_parsed_signature(SafeSignature {
            signer,
            data,
            is_contract_signature,
        })
    }

    /// Signs the active proposal with a local owner key and adds the signature.
    ///
    /// # Errors
    /// - see [`SafeSession::add_signature`]
    pub fn sign_with_local_key(
        &self,
        signer: Arc<LocalOwnerSigner>,
    ) -> Result<ProposalSnapshot, SessionError> {
        let safe_tx_hash = self.active_proposal()?.safe_tx_hash();
        let data = signer.sign_hash(&safe_tx_hash)?;
        self.add_parsed_signature(SafeSignature {
            signer: signer.owner(),
            data,
            is_contract_signature: false,
        })
    }

    /// The active proposal, if any.
    ///
    /// # Errors
    /// - `SessionError::Storage` if the stored record is corrupt
    pub fn current_proposal(&self) -> Result<Option<ProposalSnapshot>, SessionError> {
        let config = self.config();
        Ok(self
            .store
            .load(&self.account)?
            .map(|proposal| proposal.snapshot(&config)))
    }

    /// Whether the active proposal has at least `threshold` signatures.
    ///
    /// # Errors
    /// - `SessionError::NoActiveProposal` if there is no active proposal
    pub fn is_ready(&self) -> Result<bool, SessionError> {
        Ok(self.active_proposal()?.is_ready(self.config().threshold()))
    }

    /// Drops the active proposal, including a corrupt one. Returns whether one existed.
    ///
    /// # Errors
    /// - `SessionError::Storage` if the host store fails
    pub fn discard(&self) -> Result<bool, SessionError> {
        let _guard = self.op_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = self.store.remove(&self.account)?;
        crate::info!(
            "proposal.discarded account={} existed={removed} timestamp={}",
            self.account,
            Utc::now().to_rfc3339()
        );
        Ok(removed)
    }

    /// The active proposal as JSON.
    ///
    /// # Errors
    /// - `SessionError::Storage` with `StorageError::NotFound` if there is none
    pub fn export_json(&self) -> Result<String, SessionError> {
        Ok(self.store.export_json(&self.account)?)
    }

    /// Replaces the active proposal with an exported one.
    ///
    /// Signers must be owners of this Safe. On any error the active proposal is untouched.
    ///
    /// # Errors
    /// - `SessionError::Storage` with `StorageError::ImportParse` if the document is invalid
    pub fn import_json(&self, json: String) -> Result<ProposalSnapshot, SessionError> {
        let config = self.config();
        let proposal = ProposalStore::parse_import(&self.account, &json)?;
        if let Some(stranger) = proposal
            .sorted_signatures()
            .find(|signature| !config.is_owner(&signature.signer))
        {
            return Err(StorageError::ImportParse {
                message: format!(
                    "signer {} is not an owner of the account",
                    stranger.signer.to_checksum(None)
                ),
            }
            .into());
        }

        let _guard = self.op_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.store.save(&self.account, &proposal)?;
        crate::info!(
            "proposal.imported account={} nonce={} signatures={}",
            self.account,
            proposal.transaction().nonce,
            proposal.signature_count()
        );
        Ok(proposal.snapshot(&config))
    }

    /// Executes the active proposal from the `executor` wallet account.
    ///
    /// Step failures are returned in the report. On success the executed proposal is
    /// removed; a proposal stored while the run was pending is kept.
    ///
    /// # Errors
    /// - `SessionError::Workflow` with `WorkflowError::AlreadyRunning` if an execution is in flight
    /// - `SessionError::NoActiveProposal` if there is nothing to execute
    pub async fn execute(&self, executor: String) -> Result<WorkflowReport, SessionError> {
        let executor = Address::parse_from_ffi(&executor, "executor")?;
        let config = self.config();
        let mut proposal = {
            let _guard = self.op_lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.active_proposal()?
        };

        let report = self.dispatcher.run(&mut proposal, &config, executor).await?;
        if let Some(explorer_url) = report
            .tx_hash
            .as_deref()
            .map(|tx_hash| self.chain.explorer_tx_url(tx_hash))
        {
            crate::info!(
                "execution.reported account={} succeeded={} explorer={explorer_url}",
                self.account,
                report.succeeded
            );
        }
        Ok(report)
    }

    /// Reads owners, threshold and version from chain and uses them from now on.
    ///
    /// A Safe without code keeps its owners and is marked `Predicted`.
    ///
    /// # Errors
    /// - `SessionError::Provider` if the chain cannot be read
    pub async fn refresh_account_config(&self) -> Result<UnparsedAccountConfig, SessionError> {
        let fetched = fetch_account_config(&self.client, self.account.address).await?;
        let current = self.config();
        let refreshed = match fetched {
            Some(config) => config,
            None => AccountConfig::new(
                current.owners().to_vec(),
                current.threshold(),
                DeploymentStatus::Predicted,
                current.version(),
            )?,
        };

        *self
            .account_config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = refreshed.clone();
        crate::info!(
            "account_config.refreshed account={} owners={} threshold={} deployment={:?}",
            self.account,
            refreshed.owners().len(),
            refreshed.threshold(),
            refreshed.deployment()
        );
        Ok(UnparsedAccountConfig::from(&refreshed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{InMemoryDeviceKeyValueStore, SafekitEnvironment};
    use crate::safe::{transaction::ISafe, ProposalStatus};
    use crate::test_utils::MockWalletProvider;
    use alloy::primitives::U256;
    use alloy::sol_types::{SolCall, SolValue};
    use serde_json::json;
    use std::time::Duration;

    const SAFE: &str = "0x4564420674ea68fcc61b463c0494807c759d47e6";
    const KEYS: [&str; 3] = [
        "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d",
        "5de4111afa1a4b94908f83103eb1f1706367c2e68ca870fc3fb9a804cdab365a",
    ];

    fn owners() -> Vec<Arc<LocalOwnerSigner>> {
        KEYS.iter()
            .map(|key| Arc::new(LocalOwnerSigner::new((*key).to_string()).unwrap()))
            .collect()
    }

    fn session(provider: Arc<MockWalletProvider>, threshold: u64) -> SafeSession {
        session_with_config(provider, threshold, SafekitConfig::default())
    }

    fn session_with_config(
        provider: Arc<MockWalletProvider>,
        threshold: u64,
        config: SafekitConfig,
    ) -> SafeSession {
        SafeSession::new(
            Arc::new(ChainRegistry::new(SafekitEnvironment::Production)),
            10,
            SAFE.to_string(),
            UnparsedAccountConfig {
                owners: owners().iter().map(|owner| owner.address()).collect(),
                threshold,
                deployment: DeploymentStatus::Deployed,
                version: "1.4.1".to_string(),
            },
            Arc::new(InMemoryDeviceKeyValueStore::new()),
            provider,
            Arc::new(config),
        )
        .unwrap()
    }

    fn transfer() -> Vec<DraftCall> {
        vec![DraftCall {
            to: "0x1000000000000000000000000000000000000001".to_string(),
            value: "1000".to_string(),
            data: "0x".to_string(),
        }]
    }

    #[test]
    fn test_propose_and_collect_signatures() {
        let session = session(Arc::new(MockWalletProvider::new()), 2);
        let owners = owners();

        let snapshot = session.propose(transfer(), 0).unwrap();
        assert_eq!(snapshot.status, ProposalStatus::Unsigned);
        assert!(!session.is_ready().unwrap());

        let snapshot = session.sign_with_local_key(owners[2].clone()).unwrap();
        assert_eq!(snapshot.status, ProposalStatus::PartiallySigned);

        let err = session.sign_with_local_key(owners[2].clone()).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Signature(SignatureError::DuplicateSigner { .. })
        ));

        let snapshot = session.sign_with_local_key(owners[0].clone()).unwrap();
        assert_eq!(snapshot.status, ProposalStatus::Ready);
        assert!(session.is_ready().unwrap());
        assert_eq!(snapshot.missing_owners, vec![owners[1].address()]);
    }

    #[test]
    fn test_external_signature_is_verified() {
        let session = session(Arc::new(MockWalletProvider::new()), 1);
        let owners = owners();
        let snapshot = session.propose(transfer(), 0).unwrap();

        let signature = owners[1]
            .sign_safe_tx_hash(&snapshot.safe_tx_hash)
            .unwrap()
            .to_hex_string();

        assert!(matches!(
            session.add_signature(owners[0].address(), signature.clone(), false),
            Err(SessionError::Signature(SignatureError::InvalidSignature { .. }))
        ));
        assert!(matches!(
            session.add_signature(owners[1].address(), "0xzz".to_string(), false),
            Err(SessionError::Validation(_))
        ));
        let snapshot = session
            .add_signature(owners[1].address(), signature, false)
            .unwrap();
        assert_eq!(snapshot.confirmations, 1);
    }

    #[test]
    fn test_operations_without_proposal() {
        let session = session(Arc::new(MockWalletProvider::new()), 1);

        assert!(session.current_proposal().unwrap().is_none());
        assert!(matches!(
            session.is_ready(),
            Err(SessionError::NoActiveProposal { .. })
        ));
        assert!(matches!(
            session.add_signature(owners()[0].address(), "0x00".to_string(), true),
            Err(SessionError::NoActiveProposal { .. })
        ));
        assert!(!session.discard().unwrap());
    }

    #[test]
    fn test_propose_replaces_active_proposal() {
        let session = session(Arc::new(MockWalletProvider::new()), 2);
        session.propose(transfer(), 0).unwrap();
        session.sign_with_local_key(owners()[0].clone()).unwrap();

        let snapshot = session.propose(transfer(), 1).unwrap();

        assert_eq!(snapshot.confirmations, 0);
        assert_eq!(
            session.current_proposal().unwrap().unwrap().transaction.nonce,
            1
        );
    }

    #[test]
    fn test_import_rejects_signers_that_are_not_owners() {
        let provider = Arc::new(MockWalletProvider::new());
        let wide = session(provider.clone(), 1);
        wide.propose(transfer(), 0).unwrap();
        wide.sign_with_local_key(owners()[2].clone()).unwrap();
        let exported = wide.export_json().unwrap();

        let narrow = SafeSession::new(
            Arc::new(ChainRegistry::new(SafekitEnvironment::Production)),
            10,
            SAFE.to_string(),
            UnparsedAccountConfig {
                owners: vec![owners()[0].address()],
                threshold: 1,
                deployment: DeploymentStatus::Deployed,
                version: "1.4.1".to_string(),
            },
            Arc::new(InMemoryDeviceKeyValueStore::new()),
            provider,
            Arc::new(SafekitConfig::default()),
        )
        .unwrap();

        assert!(matches!(
            narrow.import_json(exported),
            Err(SessionError::Storage(StorageError::ImportParse { .. }))
        ));
        assert!(narrow.current_proposal().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_propose_next_uses_onchain_nonce() {
        let provider = Arc::new(MockWalletProvider::new());
        provider.push_call_result(ISafe::nonceCall::SELECTOR, &U256::from(17).abi_encode());
        let session = session(provider, 1);

        let snapshot = session.propose_next(transfer()).await.unwrap();

        assert_eq!(snapshot.transaction.nonce, 17);
    }

    #[tokio::test]
    async fn test_refresh_account_config() {
        let provider = Arc::new(MockWalletProvider::new());
        provider.push_result("eth_getCode", json!("0x6080"));
        let new_owner: Address = "0x1000000000000000000000000000000000000001".parse().unwrap();
        provider.push_call_result(ISafe::getOwnersCall::SELECTOR, &vec![new_owner].abi_encode());
        provider.push_call_result(ISafe::getThresholdCall::SELECTOR, &U256::from(1).abi_encode());
        provider.push_call_result(ISafe::VERSIONCall::SELECTOR, &"1.3.0".to_string().abi_encode());
        let session = session(provider, 2);

        let refreshed = session.refresh_account_config().await.unwrap();

        assert_eq!(refreshed.owners, vec![new_owner.to_checksum(None)]);
        assert_eq!(session.account_config().threshold, 1);
        assert_eq!(session.account_config().version, "1.3.0");
    }

    #[tokio::test]
    async fn test_execute_without_proposal() {
        let session = session(Arc::new(MockWalletProvider::new()), 1);
        assert!(matches!(
            session.execute(owners()[0].address()).await,
            Err(SessionError::NoActiveProposal { .. })
        ));
    }

    #[tokio::test]
    async fn test_proposal_created_during_execution_survives_finalization() {
        const TX_HASH: &str = "0xabababababababababababababababababababababababababababababababab";
        let provider = Arc::new(MockWalletProvider::new());
        provider.push_result("eth_sendTransaction", json!(TX_HASH));
        for _ in 0..5 {
            provider.push_result("eth_getTransactionReceipt", serde_json::Value::Null);
        }
        provider.push_result(
            "eth_getTransactionReceipt",
            json!({ "transactionHash": TX_HASH, "blockNumber": "0x10", "status": "0x1" }),
        );
        let session = session_with_config(
            provider,
            1,
            SafekitConfig::with_timeouts(
                SafekitEnvironment::Production,
                Duration::from_secs(5),
                Duration::from_millis(50),
            ),
        );
        session.propose(transfer(), 0).unwrap();
        session.sign_with_local_key(owners()[0].clone()).unwrap();

        let (report, newer) = tokio::join!(session.execute(owners()[1].address()), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            session.propose(transfer(), 1).unwrap()
        });

        assert!(report.unwrap().succeeded);
        let current = session.current_proposal().unwrap().unwrap();
        assert_eq!(current.transaction.nonce, 1);
        assert_eq!(current.safe_tx_hash, newer.safe_tx_hash);
    }

    #[tokio::test]
    async fn test_successful_execution_removes_the_executed_proposal() {
        const TX_HASH: &str = "0xcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcd";
        let provider = Arc::new(MockWalletProvider::new());
        provider.push_result("eth_sendTransaction", json!(TX_HASH));
        provider.push_result(
            "eth_getTransactionReceipt",
            json!({ "transactionHash": TX_HASH, "blockNumber": "0x10", "status": "0x1" }),
        );
        let session = session(provider, 1);
        session.propose(transfer(), 0).unwrap();
        session.sign_with_local_key(owners()[0].clone()).unwrap();

        let report = session.execute(owners()[1].address()).await.unwrap();

        assert!(report.succeeded);
        assert!(session.current_proposal().unwrap().is_none());
    }
}
