use std::sync::Arc;

use alloy::primitives::{Address, Bytes, FixedBytes, U256};
use async_trait::async_trait;
use chrono::Utc;

use crate::{
    primitives::{
        ChainConfig, ChainRegistry, ParseFromForeignBinding, SafekitConfig, ValidationError,
    },
    provider::{ProviderClient, WalletProvider},
    safe::{predict::predict_safe_address, AccountKey, SafeSetup},
    safekit_export,
    storage::{StorageError, WalletStore},
    workflow::{StepFailure, StepRunner, Workflow, WorkflowReport},
};

/// Steps of the deployment workflow.
pub const DEPLOYMENT_STEPS: [&str; 4] = ["predicted", "sent", "confirmed", "registered"];

/// Errors raised before a deployment workflow starts.
#[crate::safekit_error]
pub enum DeploymentError {
    /// The Safe is not among the undeployed Safes of the wallet data record.
    #[error("{address} is not an undeployed Safe on chain {chain_id}")]
    NotUndeployed {
        /// Chain id.
        chain_id: u64,
        /// Requested Safe.
        address: String,
    },
    /// The stored setup predicts a different address.
    #[error("stored setup predicts {predicted}, not {address}")]
    AddressMismatch {
        /// Requested Safe.
        address: String,
        /// Address the stored setup deploys to.
        predicted: String,
    },
    /// Input validation failed.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Reading the wallet data record failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct DeploymentReport {
    /// Checksummed address of the Safe.
    pub safe_address: String,
    /// Step-by-step outcome.
    pub workflow: WorkflowReport,
}

/// Deploys predicted Safes through the proxy factory.
#[derive(uniffi::Object)]
pub struct SafeDeployer {
    client: ProviderClient,
    wallet_store: Arc<WalletStore>,
    registry: Arc<ChainRegistry>,
    config: SafekitConfig,
}

impl SafeDeployer {
    /// Runs `predicted → sent → confirmed → registered` for `setup`, sent from `deployer`.
    pub async fn run(
        &self,
        chain: &ChainConfig,
        setup: &SafeSetup,
        salt_nonce: U256,
        deployer: Address,
    ) -> DeploymentReport {
        let safe = predict_safe_address(chain, setup, salt_nonce);
        crate::info!(
            "deployment.started chain_id={} safe={safe:?} deployer={deployer:?} timestamp={}",
            chain.chain_id,
            Utc::now().to_rfc3339()
        );

        let mut runner = DeploymentRunner {
            deployer: self,
            chain,
            setup,
            salt_nonce,
            from: deployer,
            account: AccountKey::new(chain.chain_id, safe),
            tx_hash: None,
        };
        let workflow = Workflow::new("deployment", &DEPLOYMENT_STEPS)
            .run(&mut runner)
            .await;

        DeploymentReport {
            safe_address: safe.to_checksum(None),
            workflow,
        }
    }
}

#[safekit_export]
impl SafeDeployer {
    /// Creates a deployer.
    #[uniffi::constructor]
    pub fn new(
        provider: Arc<dyn WalletProvider>,
        wallet_store: Arc<WalletStore>,
        registry: Arc<ChainRegistry>,
        config: Arc<SafekitConfig>,
    ) -> Self {
        Self {
            client: ProviderClient::new(provider),
            wallet_store,
            registry,
            config: (*config).clone(),
        }
    }

    /// Deploys an undeployed Safe of the wallet data record from the `deployer` account.
    ///
    /// # Errors
    /// - `DeploymentError::NotUndeployed` if the Safe is not stored as undeployed
    /// - `DeploymentError::AddressMismatch` if its stored setup predicts another address
    /// - `DeploymentError::Validation` for malformed addresses or unknown chains
    pub async fn deploy(
        &self,
        chain_id: u64,
        safe_address: String,
        deployer: String,
    ) -> Result<DeploymentReport, DeploymentError> {
        let account = AccountKey::parse(chain_id, &safe_address)?;
        let deployer = Address::parse_from_ffi(&deployer, "deployer")?;
        let chain = self.registry.get(chain_id)?;

        let (setup, salt_nonce) = self.wallet_store.undeployed_safe(&account)?.ok_or_else(|| {
            DeploymentError::NotUndeployed {
                chain_id,
                address: account.address.to_checksum(None),
            }
        })?;
        let predicted = predict_safe_address(&chain, &setup, salt_nonce);
        if predicted != account.address {
            return Err(DeploymentError::AddressMismatch {
                address: account.address.to_checksum(None),
                predicted: predicted.to_checksum(None),
            });
        }

        Ok(self.run(&chain, &setup, salt_nonce, deployer).await)
    }
}

struct DeploymentRunner<'a> {
    deployer: &'a SafeDeployer,
    chain: &'a ChainConfig,
    setup: &'a SafeSetup,
    salt_nonce: U256,
    from: Address,
    account: AccountKey,
    tx_hash: Option<FixedBytes<32>>,
}

#[async_trait]
impl StepRunner for DeploymentRunner<'_> {
    async fn run_step(&mut self, step: &str) -> Result<Option<String>, StepFailure> {
        let client = &self.deployer.client;
        match step {
            "predicted" => {
                let code = client.get_code(self.account.address).await?;
                if !code.is_empty() {
                    return Err(StepFailure::failed(format!(
                        "a contract is already deployed at {}",
                        self.account.address.to_checksum(None)
                    )));
                }
                Ok(None)
            }
            "sent" => {
                let calldata = self.setup.create_proxy_calldata(self.chain, self.salt_nonce);
                let tx_hash = client
                    .send_transaction(
                        self.from,
                        self.chain.contracts.proxy_factory,
                        U256::ZERO,
                        &Bytes::from(calldata),
                    )
                    .await?;
                self.tx_hash = Some(tx_hash);
                Ok(Some(tx_hash.to_string()))
            }
            "confirmed" => {
                let tx_hash = self
                    .tx_hash
                    .ok_or_else(|| StepFailure::failed("transaction was not sent"))?;
                let config = &self.deployer.config;
                client
                    .wait_for_receipt(
                        &tx_hash,
                        config.confirmation_timeout(),
                        config.poll_interval(),
                    )
                    .await?;
                Ok(Some(tx_hash.to_string()))
            }
            "registered" => {
                let store = &self.deployer.wallet_store;
                let was_undeployed = store
                    .complete_deployment(&self.account)
                    .map_err(|e| StepFailure::failed(e.to_string()))?;
                if !was_undeployed {
                    store
                        .add_safe(
                            self.account.chain_id,
                            self.account.address.to_checksum(None),
                            self.setup
                                .owners
                                .iter()
                                .map(|owner| owner.to_checksum(None))
                                .collect(),
                            self.setup.threshold,
                        )
                        .map_err(|e| StepFailure::failed(e.to_string()))?;
                }
                Ok(None)
            }
            other => Err(StepFailure::failed(format!("unknown step {other}"))),
        }
    }
}
