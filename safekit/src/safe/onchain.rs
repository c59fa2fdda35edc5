use alloy::{
    primitives::{Address, U256},
    sol_types::{SolCall, SolValue},
};

use crate::{
    provider::{ProviderClient, ProviderError, RpcMethod},
    safe::{transaction::ISafe, AccountConfig, DeploymentStatus},
};

fn invalid_call_result(function: &str, message: impl std::fmt::Display) -> ProviderError {
    ProviderError::InvalidResponse {
        method: RpcMethod::Call.as_str().to_string(),
        message: format!("{function}: {message}"),
    }
}

/// Whether a contract is deployed at `safe`.
///
/// # Errors
/// Provider failures.
pub async fn fetch_deployment_status(
    client: &ProviderClient,
    safe: Address,
) -> Result<DeploymentStatus, ProviderError> {
    let code = client.get_code(safe).await?;
    Ok(if code.is_empty() {
        DeploymentStatus::Predicted
    } else {
        DeploymentStatus::Deployed
    })
}

/// Reads owners, threshold and version of the Safe at `safe`.
///
/// Returns `None` without further calls when nothing is deployed at `safe` yet; the
/// configuration of a predicted Safe lives in the wallet data record.
///
/// # Errors
/// Provider failures, or return data that does not describe a valid Safe.
pub async fn fetch_account_config(
    client: &ProviderClient,
    safe: Address,
) -> Result<Option<AccountConfig>, ProviderError> {
    if fetch_deployment_status(client, safe).await? == DeploymentStatus::Predicted {
        crate::debug!("onchain.not_deployed safe={safe:?}");
        return Ok(None);
    }

    let owners_data = client
        .eth_call(safe, &ISafe::getOwnersCall {}.abi_encode())
        .await?;
    let owners = <Vec<Address>>::abi_decode(&owners_data)
        .map_err(|e| invalid_call_result("getOwners", e))?;

    let threshold_data = client
        .eth_call(safe, &ISafe::getThresholdCall {}.abi_encode())
        .await?;
    let threshold = U256::abi_decode(&threshold_data)
        .map_err(|e| invalid_call_result("getThreshold", e))?;
    let threshold =
        u64::try_from(threshold).map_err(|e| invalid_call_result("getThreshold", e))?;

    let version_data = client
        .eth_call(safe, &ISafe::VERSIONCall {}.abi_encode())
        .await?;
    let version =
        String::abi_decode(&version_data).map_err(|e| invalid_call_result("VERSION", e))?;

    crate::debug!(
        "onchain.account_config safe={safe:?} owners={} threshold={threshold} version={version}",
        owners.len()
    );

    AccountConfig::new(owners, threshold, DeploymentStatus::Deployed, version)
        .map(Some)
        .map_err(|e| invalid_call_result("getOwners", e))
}

/// Reads the current nonce of the Safe at `safe`.
///
/// # Errors
/// Provider failures, or a nonce that does not fit in 64 bits.
pub async fn fetch_nonce(client: &ProviderClient, safe: Address) -> Result<u64, ProviderError> {
    let data = client
        .eth_call(safe, &ISafe::nonceCall {}.abi_encode())
        .await?;
    let nonce = U256::abi_decode(&data).map_err(|e| invalid_call_result("nonce", e))?;
    u64::try_from(nonce).map_err(|e| invalid_call_result("nonce", e))
}
