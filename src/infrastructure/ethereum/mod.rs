//! Ethereum infrastructure - Alloy chain client

mod provider;
pub(crate) mod types;

pub use provider::{create_client, AlloyChainClient, ChainClient, ProviderConfig};
pub use types::{format_eth, BlockTag, PendingTransaction, WithdrawalRequest};
