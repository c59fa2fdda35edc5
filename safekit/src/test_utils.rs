//! Test utilities for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde_json::Value;

use crate::provider::{ProviderError, WalletProvider};

#[derive(Debug, Clone)]
enum Scripted {
    Raw(String),
    UserRejected,
    Rpc(i64, String),
}

/// Scripted [`WalletProvider`].
///
/// Responses are queued per method and consumed in order; the last queued response of a
/// method is repeated forever (handy for pending receipts). `eth_call` responses can be keyed
/// by function selector with [`MockWalletProvider::push_call_result`].
#[derive(Default)]
pub struct MockWalletProvider {
    responses: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockWalletProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, key: String, response: Scripted) {
        self.responses
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .push_back(response);
    }

    /// Queues a JSON result for `method`.
    pub fn push_result(&self, method: &str, result: Value) {
        self.push(method.to_string(), Scripted::Raw(result.to_string()));
    }

    /// Queues a raw response string for `method`.
    pub fn push_raw(&self, method: &str, raw: &str) {
        self.push(method.to_string(), Scripted::Raw(raw.to_string()));
    }

    /// Queues a user rejection (EIP-1193 code 4001) for `method`.
    pub fn push_rejection(&self, method: &str) {
        self.push(method.to_string(), Scripted::UserRejected);
    }

    /// Queues a JSON-RPC error for `method`.
    pub fn push_rpc_error(&self, method: &str, code: i64, message: &str) {
        self.push(method.to_string(), Scripted::Rpc(code, message.to_string()));
    }

    /// Queues the hex result of an `eth_call` whose calldata starts with `selector`.
    pub fn push_call_result(&self, selector: [u8; 4], result: &[u8]) {
        self.push(
            format!("eth_call:0x{}", hex::encode(selector)),
            Scripted::Raw(Value::String(format!("0x{}", hex::encode(result))).to_string()),
        );
    }

    /// Params of every request made for `method`, in order.
    pub fn calls_for(&self, method: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(called, _)| called == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    /// Methods requested so far, in order.
    pub fn methods(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(method, _)| method.clone())
            .collect()
    }

    fn next_response(&self, key: &str) -> Option<Scripted> {
        let mut responses = self.responses.lock().unwrap();
        let queue = responses.get_mut(key)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

fn call_selector(params_json: &str) -> Option<String> {
    let params: Value = serde_json::from_str(params_json).ok()?;
    let data = params.get(0)?.get("data")?.as_str()?;
    data.get(..10).map(str::to_lowercase)
}

#[async_trait::async_trait]
impl WalletProvider for MockWalletProvider {
    async fn request(&self, method: String, params_json: String) -> Result<String, ProviderError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.clone(), params_json.clone()));

        let by_selector = if method == "eth_call" {
            call_selector(&params_json)
                .and_then(|selector| self.next_response(&format!("eth_call:{selector}")))
        } else {
            None
        };

        match by_selector.or_else(|| self.next_response(&method)) {
            Some(Scripted::Raw(raw)) => Ok(raw),
            Some(Scripted::UserRejected) => Err(ProviderError::UserRejected),
            Some(Scripted::Rpc(code, message)) => Err(ProviderError::Rpc { code, message }),
            None => Err(ProviderError::Generic {
                message: format!("no scripted response for {method}"),
            }),
        }
    }
}
