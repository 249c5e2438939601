//! Contract deployment to an EVM chain.
//!
//! - `tx`: RLP encoding, EIP-155 signing, address derivation
//! - `rpc`: JSON-RPC client for the handful of methods deployment needs
//!
//! Deployment signs locally with the configured key and submits a raw
//! transaction, so the node never holds the account.

pub mod rpc;
pub mod tx;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::compiler::CompiledContract;
use rpc::{Receipt, RpcClient, RpcError};
use tx::{LegacyTx, Signer};

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("invalid deployer key: {0}")]
    Key(String),
    #[error("constructor takes {0} argument(s); only zero-argument constructors can be deployed")]
    ConstructorArgs(usize),
    #[error("invalid bytecode: {0}")]
    Bytecode(String),
    #[error("transaction signing failed: {0}")]
    Signing(String),
    #[error("transaction submission failed: {0}")]
    Submission(RpcError),
    #[error("confirmation of {tx_hash} failed: {source}")]
    Confirmation { tx_hash: String, source: RpcError },
    #[error("transaction {tx_hash} not confirmed within {timeout:?}")]
    Timeout { tx_hash: String, timeout: Duration },
    #[error("transaction {0} reverted")]
    Reverted(String),
    #[error("receipt for {0} has no contract address")]
    MissingAddress(String),
}

/// Something that puts a compiled contract on chain and returns its address.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, contract: &CompiledContract) -> Result<String, DeployError>;
}

/// Number of constructor parameters declared in an ABI (0 if none).
pub fn constructor_inputs(abi: &Value) -> usize {
    abi.as_array()
        .into_iter()
        .flatten()
        .find(|item| item["type"] == "constructor")
        .and_then(|ctor| ctor["inputs"].as_array())
        .map_or(0, Vec::len)
}

/// Deployment settings other than the key.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub rpc_url: String,
    /// Skip `eth_chainId` and sign for this chain.
    pub chain_id: Option<u64>,
    pub confirm_timeout: Duration,
    pub poll_interval: Duration,
}

/// Deploys through a JSON-RPC node with a locally held key.
pub struct EvmDeployer {
    rpc: RpcClient,
    signer: Signer,
    config: ChainConfig,
    /// Nonce after our last accepted submission. Locked from nonce lookup
    /// until the node accepts the transaction.
    next_nonce: Mutex<Option<u64>>,
}

impl EvmDeployer {
    pub fn new(config: ChainConfig, signer: Signer) -> Self {
        Self {
            rpc: RpcClient::new(config.rpc_url.clone()),
            signer,
            config,
            next_nonce: Mutex::new(None),
        }
    }

    /// The deploying account, `0x`-prefixed.
    pub fn sender(&self) -> String {
        tx::address_hex(&self.signer.address())
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<Receipt, DeployError> {
        let poll = async {
            loop {
                match self.rpc.transaction_receipt(tx_hash).await {
                    Ok(Some(receipt)) => return Ok(receipt),
                    Ok(None) => tokio::time::sleep(self.config.poll_interval).await,
                    Err(source) => {
                        return Err(DeployError::Confirmation {
                            tx_hash: tx_hash.to_string(),
                            source,
                        });
                    }
                }
            }
        };
        tokio::time::timeout(self.config.confirm_timeout, poll)
            .await
            .map_err(|_| DeployError::Timeout {
                tx_hash: tx_hash.to_string(),
                timeout: self.config.confirm_timeout,
            })?
    }
}

#[async_trait]
impl Deployer for EvmDeployer {
    async fn deploy(&self, contract: &CompiledContract) -> Result<String, DeployError> {
        let args = constructor_inputs(&contract.abi);
        if args > 0 {
            return Err(DeployError::ConstructorArgs(args));
        }
        let bytecode = contract.bytecode.trim();
        let code = hex::decode(bytecode.strip_prefix("0x").unwrap_or(bytecode))
            .map_err(|e| DeployError::Bytecode(e.to_string()))?;
        if code.is_empty() {
            return Err(DeployError::Bytecode(format!(
                "{} has no creation code (abstract contract or interface?)",
                contract.name
            )));
        }

        let from = self.sender();
        let chain_id = match self.config.chain_id {
            Some(id) => id,
            None => self.rpc.chain_id().await.map_err(DeployError::Submission)?,
        };
        let data_hex = format!("0x{}", hex::encode(&code));

        let mut next_nonce = self.next_nonce.lock().await;
        let pending = self
            .rpc
            .pending_nonce(&from)
            .await
            .map_err(DeployError::Submission)?;
        // a node may not count our last submission as pending yet
        let nonce = next_nonce.map_or(pending, |local| local.max(pending));
        let gas_price = self.rpc.gas_price().await.map_err(DeployError::Submission)?;
        let estimate = self
            .rpc
            .estimate_creation_gas(&from, &data_hex)
            .await
            .map_err(DeployError::Submission)?;

        let tx = LegacyTx {
            nonce,
            gas_price,
            // 20% headroom over the node's estimate
            gas_limit: estimate.saturating_add(estimate / 5),
            to: None,
            value: 0,
            data: code,
            chain_id,
        };
        let raw = self.signer.sign(&tx)?;
        let tx_hash = self
            .rpc
            .send_raw_transaction(&raw)
            .await
            .map_err(DeployError::Submission)?;
        *next_nonce = Some(nonce + 1);
        drop(next_nonce);

        let expected = tx::address_hex(&tx::create_address(&self.signer.address(), nonce));
        tracing::info!(
            contract = %contract.name,
            %tx_hash,
            %expected,
            chain_id,
            nonce,
            "Deployment submitted, waiting for confirmation"
        );

        let receipt = self.wait_for_receipt(&tx_hash).await?;
        if receipt.reverted() {
            return Err(DeployError::Reverted(tx_hash));
        }
        let address = receipt
            .contract_address
            .filter(|a| !a.is_empty())
            .ok_or_else(|| DeployError::MissingAddress(tx_hash.clone()))?;
        if !address.eq_ignore_ascii_case(&expected) {
            tracing::warn!(%address, %expected, "Deployed address differs from derived address");
        }
        tracing::info!(
            contract = %contract.name,
            %address,
            block = receipt.block_number.as_deref().unwrap_or("?"),
            "Contract deployed"
        );
        Ok(address)
    }
}
