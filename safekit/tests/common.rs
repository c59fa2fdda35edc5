#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use alloy::sol;
use safekit::{
    primitives::{ChainRegistry, InMemoryDeviceKeyValueStore, SafekitConfig, SafekitEnvironment},
    provider::{ProviderError, WalletProvider},
    safe::{DeploymentStatus, LocalOwnerSigner, UnparsedAccountConfig},
    session::SafeSession,
};
use serde_json::Value;

sol!(
    #[allow(missing_docs)]
    interface ISafe {
        function execTransaction(
            address to,
            uint256 value,
            bytes calldata data,
            uint8 operation,
            uint256 safeTxGas,
            uint256 baseGas,
            uint256 gasPrice,
            address gasToken,
            address payable refundReceiver,
            bytes memory signatures
        ) external payable returns (bool success);
    }
);

/// anvil's default accounts #0 to #2
pub const OWNER_KEYS: [&str; 3] = [
    "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
    "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d",
    "5de4111afa1a4b94908f83103eb1f1706367c2e68ca870fc3fb9a804cdab365a",
];

pub const SAFE_ADDRESS: &str = "0x4564420674ea68fcc61b463c0494807c759d47e6";

pub fn owners() -> Vec<Arc<LocalOwnerSigner>> {
    OWNER_KEYS
        .iter()
        .map(|key| Arc::new(LocalOwnerSigner::new((*key).to_string()).unwrap()))
        .collect()
}

/// Wallet provider answering from per-method queues. The last answer of a method repeats.
#[derive(Default)]
pub struct ScriptedProvider {
    responses: Mutex<HashMap<String, VecDeque<Result<String, i64>>>>,
    requests: Mutex<Vec<(String, String)>>,
}

impl ScriptedProvider {
    pub fn respond(&self, method: &str, result: Value) {
        self.responses
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(Ok(result.to_string()));
    }

    pub fn fail(&self, method: &str, code: i64) {
        self.responses
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(Err(code));
    }

    pub fn requests(&self, method: &str) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(requested, _)| requested == method)
            .map(|(_, params)| serde_json::from_str(params).unwrap())
            .collect()
    }
}

#[async_trait::async_trait]
impl WalletProvider for ScriptedProvider {
    async fn request(&self, method: String, params_json: String) -> Result<String, ProviderError> {
        self.requests
            .lock()
            .unwrap()
            .push((method.clone(), params_json));

        let mut responses = self.responses.lock().unwrap();
        let queue = responses
            .get_mut(&method)
            .ok_or_else(|| ProviderError::Generic {
                message: format!("unexpected request {method}"),
            })?;
        let response = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match response {
            Some(Ok(result)) => Ok(result),
            Some(Err(code)) => Err(ProviderError::from_rpc_error(code, "scripted".to_string())),
            None => Err(ProviderError::Generic {
                message: format!("no response for {method}"),
            }),
        }
    }
}

pub fn session_with(
    provider: Arc<ScriptedProvider>,
    kv_store: Arc<InMemoryDeviceKeyValueStore>,
    threshold: u64,
) -> SafeSession {
    SafeSession::new(
        Arc::new(ChainRegistry::new(SafekitEnvironment::Production)),
        10,
        SAFE_ADDRESS.to_string(),
        UnparsedAccountConfig {
            owners: owners().iter().map(|owner| owner.address()).collect(),
            threshold,
            deployment: DeploymentStatus::Deployed,
            version: "1.4.1".to_string(),
        },
        kv_store,
        provider,
        Arc::new(SafekitConfig::new(SafekitEnvironment::Production, 5, 10)),
    )
    .unwrap()
}
