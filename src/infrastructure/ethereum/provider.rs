//! Chain client abstraction and the Alloy implementation
//!
//! Transactions are fetched as raw JSON so the watcher works on any EVM
//! chain, including L2s with non-standard transaction types.

use std::path::PathBuf;
use std::time::Duration;

use alloy::eips::BlockId;
use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::infrastructure::ethereum::types::{
    parse_pending_transaction, BlockTag, PendingTransaction, WithdrawalRequest,
};

/// Capacity of the channel between the node subscription and the watcher
const PENDING_CHANNEL_CAPACITY: usize = 1024;

/// Provider configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderConfig {
    /// WebSocket endpoint
    WebSocket(String),
    /// IPC socket path (Unix only)
    #[cfg(unix)]
    Ipc(PathBuf),
}

impl ProviderConfig {
    /// Infura mainnet WebSocket endpoint for a project id
    pub fn infura(project_id: &str) -> Self {
        ProviderConfig::WebSocket(format!("wss://mainnet.infura.io/ws/v3/{}", project_id))
    }

    /// Get display name for this endpoint
    pub fn display(&self) -> String {
        match self {
            ProviderConfig::WebSocket(url) => redact_url(url),
            #[cfg(unix)]
            ProviderConfig::Ipc(path) => path.display().to_string(),
        }
    }
}

/// Everything the watcher and withdrawer need from a node.
///
/// The signing key lives behind `send_transaction`; callers never see it.
#[async_trait::async_trait]
pub trait ChainClient: Send + Sync + 'static {
    /// Subscribe to hashes of transactions entering the mempool.
    ///
    /// The receiver closes when the node subscription ends; it is not restarted.
    async fn subscribe_pending_transactions(&self) -> Result<mpsc::Receiver<B256>>;

    /// Look up a transaction, `None` if the node no longer knows it
    async fn get_transaction(&self, hash: B256) -> Result<Option<PendingTransaction>>;

    /// Get account balance at a block tag
    async fn get_balance(&self, address: Address, block: BlockTag) -> Result<U256>;

    /// Current legacy gas price in wei
    async fn get_gas_price(&self) -> Result<u128>;

    /// Number of transactions sent from `address` (next nonce)
    async fn get_transaction_count(&self, address: Address) -> Result<u64>;

    /// Sign with the deposit key and broadcast
    async fn send_transaction(&self, request: WithdrawalRequest) -> Result<B256>;

    /// Get the current block number
    async fn block_number(&self) -> Result<u64>;

    /// Block the transaction was mined in, `None` while it is pending
    async fn get_receipt_block(&self, hash: B256) -> Result<Option<u64>>;

    /// Suspend until `hash` has at least `confirmations` confirmations.
    ///
    /// A transaction mined in the head block has one confirmation. Zero
    /// confirmations returns immediately.
    async fn wait_for_confirmations(
        &self,
        hash: B256,
        confirmations: u64,
        poll_interval: Duration,
    ) -> Result<()> {
        if confirmations == 0 {
            return Ok(());
        }

        loop {
            if let Some(mined_at) = self.get_receipt_block(hash).await? {
                let head = self.block_number().await?;
                let confirmed = if head >= mined_at { head - mined_at + 1 } else { 0 };
                debug!(%hash, mined_at, head, confirmed, "confirmation progress");
                if confirmed >= confirmations {
                    return Ok(());
                }
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Get endpoint display name
    fn endpoint_name(&self) -> String;
}

/// Alloy-backed client with the deposit wallet attached
pub struct AlloyChainClient {
    provider: DynProvider,
    endpoint: String,
}

/// Create a client from configuration, signing with `signer`
pub async fn create_client(
    config: ProviderConfig,
    signer: PrivateKeySigner,
) -> Result<Box<dyn ChainClient>> {
    let wallet = EthereumWallet::from(signer);
    let endpoint = config.display();

    let provider = match config {
        ProviderConfig::WebSocket(url) => ProviderBuilder::new()
            .wallet(wallet)
            .connect(&url)
            .await
            .context("Failed to create WebSocket provider")?
            .erased(),
        #[cfg(unix)]
        ProviderConfig::Ipc(path) => {
            use alloy::providers::IpcConnect;
            let ipc = IpcConnect::new(path.to_string_lossy().to_string());
            ProviderBuilder::new()
                .wallet(wallet)
                .connect_ipc(ipc)
                .await
                .context("Failed to create IPC provider")?
                .erased()
        }
    };

    Ok(Box::new(AlloyChainClient { provider, endpoint }))
}

#[async_trait::async_trait]
impl ChainClient for AlloyChainClient {
    async fn subscribe_pending_transactions(&self) -> Result<mpsc::Receiver<B256>> {
        let sub = self
            .provider
            .subscribe_pending_transactions()
            .await
            .context("Failed to subscribe to pending transactions")?;
        let (tx, rx) = mpsc::channel(PENDING_CHANNEL_CAPACITY);
        let endpoint = self.endpoint.clone();

        tokio::spawn(async move {
            let mut stream = sub.into_stream();
            while let Some(hash) = stream.next().await {
                if tx.send(hash).await.is_err() {
                    return;
                }
            }
            warn!(%endpoint, "pending transaction subscription closed by node");
        });

        Ok(rx)
    }

    async fn get_transaction(&self, hash: B256) -> Result<Option<PendingTransaction>> {
        let json: serde_json::Value = self
            .provider
            .raw_request("eth_getTransactionByHash".into(), (hash,))
            .await?;
        parse_pending_transaction(&json)
    }

    async fn get_balance(&self, address: Address, block: BlockTag) -> Result<U256> {
        let block = match block {
            BlockTag::Latest => BlockId::latest(),
            BlockTag::Pending => BlockId::pending(),
        };
        Ok(self.provider.get_balance(address).block_id(block).await?)
    }

    async fn get_gas_price(&self) -> Result<u128> {
        Ok(self.provider.get_gas_price().await?)
    }

    async fn get_transaction_count(&self, address: Address) -> Result<u64> {
        Ok(self.provider.get_transaction_count(address).await?)
    }

    async fn send_transaction(&self, request: WithdrawalRequest) -> Result<B256> {
        let request: TransactionRequest = request.into();
        let pending = self.provider.send_transaction(request).await?;
        Ok(*pending.tx_hash())
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn get_receipt_block(&self, hash: B256) -> Result<Option<u64>> {
        let receipt = self.provider.get_transaction_receipt(hash).await?;
        Ok(receipt.and_then(|r| r.block_number))
    }

    fn endpoint_name(&self) -> String {
        self.endpoint.clone()
    }
}

/// Hide the path of an endpoint URL, which carries the node credential for
/// hosted providers (e.g. `wss://mainnet.infura.io/ws/v3/<id>`)
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.split_once('/') {
        Some((host, path)) if !path.is_empty() => format!("{}://{}/…", scheme, host),
        _ => url.to_string(),
    }
}
