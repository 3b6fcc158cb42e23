//! JSON-RPC [`NetworkAdapter`] for Ethereum-compatible nodes.
//!
//! Transactions are signed by the node (`eth_sendTransaction`) on behalf of an
//! unlocked account. Every submission pins an explicit nonce so that retrying
//! a transient failure can at worst replace the original transaction, never
//! deploy a second program.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use alloy_core::primitives::{Address, B256, Bytes};
use anyhow::Context;
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use thiserror::Error;
use url::Url;

use crate::{
    Confirmation, ConstructorArg, DeployError, MigrateConfig, NetworkAdapter, NetworkConfig,
    ProgramArtifact, SubmittedDeployment,
};

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between receipt polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// JSON-RPC error code some providers use for throttling.
const RATE_LIMIT_CODE: i64 = -32005;

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Failure of a single JSON-RPC exchange.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("failed to reach node: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("node returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("RPC error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("{0}")]
    Protocol(String),
}

impl From<RpcError> for DeployError {
    fn from(err: RpcError) -> Self {
        match err {
            // Only failures to connect prove the request never reached the node.
            RpcError::Transport(e) if e.is_connect() => Self::Unreachable(e.to_string()),
            RpcError::Transport(e) => Self::Interrupted(e.to_string()),
            RpcError::Status(status) if status == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                Self::RateLimited(status.to_string())
            }
            // A gateway may fail after the node behind it accepted the request.
            RpcError::Status(status) if status.is_server_error() => {
                Self::Interrupted(status.to_string())
            }
            RpcError::Status(status) => Self::Protocol(status.to_string()),
            RpcError::Node { code, message } => classify_node_error(code, message),
            RpcError::Protocol(message) => Self::Protocol(message),
        }
    }
}

/// Map a node error response onto the deploy error taxonomy.
pub fn classify_node_error(code: i64, message: String) -> DeployError {
    let lower = message.to_lowercase();
    if code == RATE_LIMIT_CODE || lower.contains("rate limit") || lower.contains("too many requests")
    {
        DeployError::RateLimited(message)
    } else if lower.contains("underpriced") || lower.contains("fee too low") {
        DeployError::Underpriced(message)
    } else if lower.contains("revert") {
        DeployError::Reverted(message)
    } else {
        DeployError::Rejected(message)
    }
}

/// Make a JSON-RPC call and deserialize the result.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, RpcError> {
    let response = client
        .post(url)
        .json(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .map_err(RpcError::Transport)?;

    let status = response.status();
    if !status.is_success() {
        return Err(RpcError::Status(status));
    }

    let result: Value = response.json().await.map_err(RpcError::Transport)?;

    if let Some(error) = result.get("error") {
        return Err(RpcError::Node {
            code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
        });
    }

    let result_value = result
        .get("result")
        .cloned()
        .ok_or_else(|| RpcError::Protocol(format!("no result in {method} response")))?;

    serde_json::from_value(result_value)
        .map_err(|e| RpcError::Protocol(format!("failed to deserialize {method} result: {e}")))
}

/// Parse a hex-encoded JSON-RPC quantity such as `0x1b4`.
pub fn parse_quantity(value: &str) -> Result<u64, DeployError> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| DeployError::Protocol(format!("quantity `{value}` lacks 0x prefix")))?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| DeployError::Protocol(format!("invalid quantity `{value}`: {e}")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Receipt {
    block_number: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    contract_address: Option<Address>,
}

impl Receipt {
    fn into_confirmation(self) -> Result<Confirmation, DeployError> {
        let block_number = parse_quantity(&self.block_number)?;
        match self.status.as_deref() {
            Some("0x0") => Ok(Confirmation::Reverted {
                reason: format!("transaction failed in block {block_number}"),
            }),
            _ => Ok(Confirmation::Confirmed {
                block_number,
                contract_address: self.contract_address,
            }),
        }
    }
}

/// [`NetworkAdapter`] talking to a node over HTTP JSON-RPC.
#[derive(Debug, Clone)]
pub struct RpcNetworkAdapter {
    client: reqwest::Client,
    url: Url,
    from: Address,
    gas_limit: Option<u64>,
    poll_interval: Duration,
    max_retries: usize,
}

impl RpcNetworkAdapter {
    pub fn new(url: Url, from: Address) -> Result<Self, anyhow::Error> {
        Ok(Self {
            client: create_client()?,
            url,
            from,
            gas_limit: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_retries: 3,
        })
    }

    /// Build an adapter for one configured network.
    pub fn from_config(network: &NetworkConfig, config: &MigrateConfig) -> Result<Self, anyhow::Error> {
        Ok(Self::new(network.rpc_url.clone(), network.from)?
            .with_gas_limit(network.gas_limit)
            .with_poll_interval(config.poll_interval())
            .with_max_retries(config.max_submit_retries))
    }

    pub fn with_gas_limit(mut self, gas_limit: Option<u64>) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn chain_id(&self) -> Result<u64, DeployError> {
        let id: String = self.request("eth_chainId", vec![]).await?;
        parse_quantity(&id)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, DeployError> {
        json_rpc_call(&self.client, self.url.as_str(), method, params)
            .await
            .map_err(DeployError::from)
    }

    async fn pending_nonce(&self) -> Result<u64, DeployError> {
        let nonce: String = self
            .request(
                "eth_getTransactionCount",
                vec![json!(self.from), json!("pending")],
            )
            .await?;
        parse_quantity(&nonce)
    }

    fn transaction(&self, to: Option<Address>, data: &Bytes, nonce: u64) -> Value {
        let mut tx = json!({
            "from": self.from,
            "data": data,
            "nonce": format!("{nonce:#x}"),
        });
        if let Some(to) = to {
            tx["to"] = json!(to);
        }
        if let Some(gas) = self.gas_limit {
            tx["gas"] = json!(format!("{gas:#x}"));
        }
        tx
    }

    /// Submit with the same nonce on every attempt, retrying only transient failures.
    ///
    /// Once an attempt was interrupted after reaching the node, a final failure
    /// is reported as [`DeployError::MaybeSubmitted`]: the node may hold the
    /// transaction and answer the retry with "already known" or "nonce too low".
    async fn submit(&self, tx: Value) -> Result<B256, DeployError> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(250))
            .with_max_times(self.max_retries);
        let interrupted = AtomicBool::new(false);

        let result = (|| {
            let tx = tx.clone();
            async move { self.request::<B256>("eth_sendTransaction", vec![tx]).await }
        })
        .retry(backoff)
        .when(DeployError::is_transient)
        .notify(|err, delay| {
            if matches!(err, DeployError::Interrupted(_)) {
                interrupted.store(true, Ordering::Relaxed);
            }
            tracing::warn!(error = %err, ?delay, "Transient submission failure, retrying");
        })
        .await;

        match result {
            Err(err)
                if interrupted.load(Ordering::Relaxed)
                    || matches!(err, DeployError::Interrupted(_)) =>
            {
                Err(DeployError::MaybeSubmitted(err.to_string()))
            }
            other => other,
        }
    }
}

impl NetworkAdapter for RpcNetworkAdapter {
    async fn deploy(
        &self,
        artifact: &ProgramArtifact,
        args: &[ConstructorArg],
    ) -> Result<SubmittedDeployment, DeployError> {
        let nonce = self.pending_nonce().await?;
        let address = self.from.create(nonce);
        let data = artifact.deploy_data(args);

        let transaction_id = self.submit(self.transaction(None, &data, nonce)).await?;

        tracing::debug!(
            program = %artifact.contract_name,
            nonce,
            predicted = %address,
            tx = %transaction_id,
            "Deployment transaction submitted"
        );

        Ok(SubmittedDeployment {
            address,
            transaction_id,
        })
    }

    async fn wait_for_confirmation(
        &self,
        transaction_id: B256,
        timeout: Duration,
    ) -> Result<Confirmation, DeployError> {
        let poll = async {
            loop {
                match self
                    .request::<Option<Receipt>>(
                        "eth_getTransactionReceipt",
                        vec![json!(transaction_id)],
                    )
                    .await
                {
                    Ok(Some(receipt)) => return receipt.into_confirmation(),
                    Ok(None) => {}
                    // Reading a receipt has no side effects, keep trying until the deadline.
                    Err(e) => {
                        tracing::debug!(error = %e, tx = %transaction_id, "Receipt poll failed, retrying...");
                    }
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(outcome) => outcome,
            Err(_) => Ok(Confirmation::TimedOut),
        }
    }

    async fn send(&self, to: Address, data: Bytes) -> Result<B256, DeployError> {
        let nonce = self.pending_nonce().await?;
        self.submit(self.transaction(Some(to), &data, nonce)).await
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, DeployError> {
        self.request(
            "eth_call",
            vec![
                json!({ "from": self.from, "to": to, "data": data }),
                json!("latest"),
            ],
        )
        .await
    }

    fn sender(&self) -> Option<Address> {
        Some(self.from)
    }
}
