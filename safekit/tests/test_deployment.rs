use std::sync::Arc;

use safekit::{
    primitives::{ChainRegistry, InMemoryDeviceKeyValueStore, SafekitConfig, SafekitEnvironment},
    safe::{deployment::SafeDeployer, predict::predict_safe_address_for_setup, SafeSetupRecord},
    storage::WalletStore,
    workflow::StepStatus,
};
use serde_json::json;

mod common;
use common::{owners, ScriptedProvider};

const SEPOLIA: u64 = 11_155_111;
const TX_HASH: &str = "0x9a7a8d3e4e4b2c0f39d4bc37c9a1f2e0d8b6a5c4e3f2a1b0c9d8e7f6a5b4c3d2";

fn setup_record(registry: &ChainRegistry) -> anyhow::Result<SafeSetupRecord> {
    let chain = registry.get(SEPOLIA)?;
    Ok(SafeSetupRecord {
        owners: owners().iter().map(|owner| owner.address()).collect(),
        threshold: 2,
        to: None,
        data: None,
        fallback_handler: chain.contracts.fallback_handler.to_checksum(None),
        payment_token: None,
        payment: None,
        payment_receiver: None,
    })
}

#[tokio::test]
async fn test_predicted_safe_is_deployed_and_moved_to_added_safes() -> anyhow::Result<()> {
    let registry = Arc::new(ChainRegistry::new(SafekitEnvironment::Staging));
    let wallet_store = Arc::new(WalletStore::new(Arc::new(InMemoryDeviceKeyValueStore::new())));
    let provider = Arc::new(ScriptedProvider::default());

    let setup = setup_record(&registry)?;
    let safe = predict_safe_address_for_setup(
        registry.clone(),
        SEPOLIA,
        setup.clone(),
        "42".to_string(),
    )?;
    wallet_store.add_undeployed_safe(SEPOLIA, safe.clone(), setup, "42".to_string())?;
    assert_eq!(wallet_store.undeployed_safes(SEPOLIA)?, vec![safe.clone()]);

    provider.respond("eth_getCode", json!("0x"));
    provider.respond("eth_sendTransaction", json!(TX_HASH));
    provider.respond(
        "eth_getTransactionReceipt",
        json!({ "transactionHash": TX_HASH, "blockNumber": "0x10", "status": "0x1" }),
    );

    let deployer = SafeDeployer::new(
        provider.clone(),
        wallet_store.clone(),
        registry,
        Arc::new(SafekitConfig::new(SafekitEnvironment::Staging, 5, 10)),
    );
    let owner = owners()[0].address();
    let report = deployer.deploy(SEPOLIA, safe.clone(), owner.clone()).await?;

    assert_eq!(report.safe_address, safe);
    assert!(report.workflow.succeeded);
    assert!(report
        .workflow
        .steps
        .iter()
        .all(|step| step.status == StepStatus::Success));
    assert!(wallet_store.undeployed_safes(SEPOLIA)?.is_empty());
    assert_eq!(wallet_store.added_safes(SEPOLIA)?, vec![safe]);

    let sent = &provider.requests("eth_sendTransaction")[0][0];
    assert_eq!(
        sent["from"].as_str().map(str::to_lowercase),
        Some(owner.to_lowercase())
    );
    Ok(())
}

#[tokio::test]
async fn test_failed_deployment_keeps_the_safe_undeployed() -> anyhow::Result<()> {
    let registry = Arc::new(ChainRegistry::new(SafekitEnvironment::Staging));
    let wallet_store = Arc::new(WalletStore::new(Arc::new(InMemoryDeviceKeyValueStore::new())));
    let provider = Arc::new(ScriptedProvider::default());

    let setup = setup_record(&registry)?;
    let safe = predict_safe_address_for_setup(
        registry.clone(),
        SEPOLIA,
        setup.clone(),
        "7".to_string(),
    )?;
    wallet_store.add_undeployed_safe(SEPOLIA, safe.clone(), setup, "7".to_string())?;

    provider.respond("eth_getCode", json!("0x"));
    provider.respond("eth_sendTransaction", json!(TX_HASH));
    provider.respond(
        "eth_getTransactionReceipt",
        json!({ "transactionHash": TX_HASH, "blockNumber": "0x10", "status": "0x0" }),
    );

    let deployer = SafeDeployer::new(
        provider,
        wallet_store.clone(),
        registry,
        Arc::new(SafekitConfig::new(SafekitEnvironment::Staging, 5, 10)),
    );
    let report = deployer
        .deploy(SEPOLIA, safe.clone(), owners()[0].address())
        .await?;

    assert!(!report.workflow.succeeded);
    assert_eq!(report.workflow.failed_step.as_deref(), Some("confirmed"));
    assert_eq!(report.workflow.steps[3].status, StepStatus::Idle);
    assert_eq!(wallet_store.undeployed_safes(SEPOLIA)?, vec![safe]);
    assert!(wallet_store.added_safes(SEPOLIA)?.is_empty());
    Ok(())
}
