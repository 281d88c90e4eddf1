//! Infrastructure layer - External service integrations
//!
//! This layer contains the Alloy-based chain client used by the watcher
//! and the withdrawer.

pub mod ethereum;

pub use ethereum::{
    create_client, BlockTag, ChainClient, PendingTransaction, ProviderConfig, WithdrawalRequest,
};
