//! Chain-agnostic transaction types shared between the client and the core

use std::str::FromStr;

use alloy::network::TransactionBuilder;
use alloy::primitives::utils::format_ether;
use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::TransactionRequest;
use anyhow::{Context, Result};

/// A transaction observed in the mempool, reduced to what the watcher needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    pub hash: B256,
    pub from: Address,
    /// `None` for contract creations
    pub to: Option<Address>,
    pub value: U256,
}

impl PendingTransaction {
    /// Whether this transaction pays into `address`
    pub fn is_sent_to(&self, address: Address) -> bool {
        self.to == Some(address)
    }

    /// Value in ETH for log output
    pub fn value_eth(&self) -> String {
        format_eth(self.value)
    }
}

/// Fully specified legacy transfer built by the withdrawer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalRequest {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub chain_id: u64,
}

impl From<WithdrawalRequest> for TransactionRequest {
    fn from(request: WithdrawalRequest) -> Self {
        TransactionRequest::default()
            .with_from(request.from)
            .with_to(request.to)
            .with_value(request.value)
            .with_nonce(request.nonce)
            .with_gas_price(request.gas_price)
            .with_gas_limit(request.gas_limit)
            .with_chain_id(request.chain_id)
    }
}

/// Block tag for balance queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockTag {
    #[default]
    Latest,
    Pending,
}

/// Wei to a decimal ETH string (e.g. "1.49895")
pub fn format_eth(wei: U256) -> String {
    let formatted = format_ether(wei);
    match formatted.split_once('.') {
        Some((whole, frac)) => {
            let frac = frac.trim_end_matches('0');
            if frac.is_empty() {
                whole.to_string()
            } else {
                format!("{}.{}", whole, frac)
            }
        }
        None => formatted,
    }
}

/// Parse an `eth_getTransactionByHash` JSON response.
///
/// Only the fields every EVM chain agrees on are read, so L2 transaction
/// types with extra fields decode fine. Returns `Ok(None)` for a null result.
pub fn parse_pending_transaction(json: &serde_json::Value) -> Result<Option<PendingTransaction>> {
    if json.is_null() {
        return Ok(None);
    }

    let hash = json
        .get("hash")
        .and_then(|v| v.as_str())
        .context("transaction is missing `hash`")?;
    let hash = B256::from_str(hash).context("invalid transaction hash")?;

    let from = json
        .get("from")
        .and_then(|v| v.as_str())
        .context("transaction is missing `from`")?;
    let from = Address::from_str(from).context("invalid `from` address")?;

    let to = match json.get("to").and_then(|v| v.as_str()) {
        Some(to) => Some(Address::from_str(to).context("invalid `to` address")?),
        None => None,
    };

    let value = parse_quantity(json.get("value").and_then(|v| v.as_str()).unwrap_or("0x0"))?;

    Ok(Some(PendingTransaction {
        hash,
        from,
        to,
        value,
    }))
}

/// Parse a hex quantity ("0x1bc16d674ec80000") to U256
fn parse_quantity(s: &str) -> Result<U256> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16)
        .map_err(|err| anyhow::anyhow!("invalid quantity `{}`: {}", s, err))
}
