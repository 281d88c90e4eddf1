//! Shared context passed to the watcher and the withdrawer

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use serde::Deserialize;

use crate::core::backoff::RetryPolicy;
use crate::infrastructure::ChainClient;

/// Gas limit of a plain value transfer
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

pub const MAINNET_CHAIN_ID: u64 = 1;

pub const DEFAULT_CONFIRMATION_POLL: Duration = Duration::from_secs(4);

/// Whether withdrawal sequences for separate deposits may overlap.
///
/// Overlapping sequences can read the same balance and nonce, so one of
/// them fails or both forward the same funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyPolicy {
    /// Every deposit withdraws on its own as soon as it is confirmed
    #[default]
    Concurrent,
    /// One withdrawal sequence at a time
    Serialized,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown withdrawal policy `{0}` (expected `concurrent` or `serialized`)")]
pub struct UnknownPolicy(String);

impl FromStr for ConcurrencyPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "concurrent" => Ok(ConcurrencyPolicy::Concurrent),
            "serialized" | "serial" => Ok(ConcurrencyPolicy::Serialized),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for ConcurrencyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConcurrencyPolicy::Concurrent => f.write_str("concurrent"),
            ConcurrencyPolicy::Serialized => f.write_str("serialized"),
        }
    }
}

/// Everything one deposit-handling task needs, built once at startup
#[derive(Clone)]
pub struct Context {
    /// Node connection holding the deposit signing key
    pub client: Arc<dyn ChainClient>,

    /// Address being watched, controlled by the client's key
    pub deposit_address: Address,

    /// Destination of forwarded funds
    pub vault_address: Address,

    /// Confirmations required before withdrawing
    pub confirmations: u64,

    /// How often to poll for confirmation progress
    pub confirmation_poll: Duration,

    pub gas_limit: u64,
    pub chain_id: u64,
    pub retry: RetryPolicy,
    pub policy: ConcurrencyPolicy,
}

impl Context {
    pub fn new(
        client: Arc<dyn ChainClient>,
        deposit_address: Address,
        vault_address: Address,
        confirmations: u64,
    ) -> Self {
        Self {
            client,
            deposit_address,
            vault_address,
            confirmations,
            confirmation_poll: DEFAULT_CONFIRMATION_POLL,
            gas_limit: TRANSFER_GAS_LIMIT,
            chain_id: MAINNET_CHAIN_ID,
            retry: RetryPolicy::default(),
            policy: ConcurrencyPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_policy(mut self, policy: ConcurrencyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub fn with_confirmation_poll(mut self, interval: Duration) -> Self {
        self.confirmation_poll = interval;
        self
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("endpoint", &self.client.endpoint_name())
            .field("deposit_address", &self.deposit_address)
            .field("vault_address", &self.vault_address)
            .field("confirmations", &self.confirmations)
            .field("confirmation_poll", &self.confirmation_poll)
            .field("gas_limit", &self.gas_limit)
            .field("chain_id", &self.chain_id)
            .field("retry", &self.retry)
            .field("policy", &self.policy)
            .finish()
    }
}
