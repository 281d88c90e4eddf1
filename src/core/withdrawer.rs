//! Forward the deposit account's balance to the vault

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use tracing::{error, info, warn};

use crate::core::context::Context;
use crate::infrastructure::ethereum::format_eth;
use crate::infrastructure::{BlockTag, WithdrawalRequest};

/// Why a single withdrawal attempt failed
#[derive(Debug, thiserror::Error)]
pub enum WithdrawError {
    #[error("balance {balance} wei does not cover the {fee} wei fee")]
    InsufficientFunds { balance: U256, fee: U256 },

    #[error(transparent)]
    Client(#[from] anyhow::Error),
}

/// Terminal state of one withdrawal sequence
#[derive(Debug)]
pub enum WithdrawalOutcome {
    /// The transfer was broadcast
    Success { tx_hash: B256, attempts: u32 },
    /// Every attempt failed; carries the error of the last one
    Exhausted {
        attempts: u32,
        last_error: WithdrawError,
    },
}

impl WithdrawalOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, WithdrawalOutcome::Success { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            WithdrawalOutcome::Success { attempts, .. } => *attempts,
            WithdrawalOutcome::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// The sequence gave up because the account was already empty, e.g. an
    /// earlier withdrawal swept this deposit along with its own
    pub fn nothing_to_forward(&self) -> bool {
        matches!(
            self,
            WithdrawalOutcome::Exhausted {
                last_error: WithdrawError::InsufficientFunds { balance, .. },
                ..
            } if balance.is_zero()
        )
    }
}

/// Amount left after paying `gas_limit * gas_price` out of `balance`.
///
/// Errors when nothing would be left to forward.
pub fn spendable(balance: U256, gas_limit: u64, gas_price: u128) -> Result<U256, WithdrawError> {
    let fee = U256::from(gas_limit).saturating_mul(U256::from(gas_price));
    if fee >= balance {
        return Err(WithdrawError::InsufficientFunds { balance, fee });
    }
    Ok(balance - fee)
}

/// Builds and submits vault transfers, retrying with backoff
#[derive(Debug, Clone)]
pub struct Withdrawer {
    ctx: Arc<Context>,
}

impl Withdrawer {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Run one withdrawal sequence to completion.
    ///
    /// Attempts are numbered from 1. After a failed attempt `n` the task
    /// sleeps `min(2^n * base_delay, max_delay)` unless `n` is the last
    /// allowed attempt.
    pub async fn withdraw(&self) -> WithdrawalOutcome {
        let retry = self.ctx.retry;
        let retry_config = tryhard::RetryFutureConfig::new(retry.retries())
            .exponential_backoff(retry.initial_backoff())
            .max_delay(retry.max_delay)
            .on_retry(
                |attempt: u32, next_delay: Option<Duration>, error: &WithdrawError| {
                    let wait_ms = next_delay.map(|delay| delay.as_millis() as u64);
                    warn!(
                        attempt,
                        wait_ms,
                        error = %error,
                        "withdrawal attempt failed; retrying after backoff",
                    );
                    futures::future::ready(())
                },
            );

        let mut attempts = 0u32;
        let result = tryhard::retry_fn(|| {
            attempts += 1;
            self.attempt()
        })
        .with_config(retry_config)
        .await;

        match result {
            Ok(tx_hash) => {
                info!(%tx_hash, attempts, vault = %self.ctx.vault_address, "withdrawal broadcast");
                WithdrawalOutcome::Success { tx_hash, attempts }
            }
            Err(last_error) => {
                error!(attempts, error = %last_error, "max retry attempts reached, giving up");
                WithdrawalOutcome::Exhausted {
                    attempts,
                    last_error,
                }
            }
        }
    }

    /// Read account state and build the transfer to the vault
    pub async fn prepare(&self) -> Result<WithdrawalRequest, WithdrawError> {
        let ctx = &self.ctx;
        let from: Address = ctx.deposit_address;

        let balance = ctx.client.get_balance(from, BlockTag::Latest).await?;
        let gas_price = ctx.client.get_gas_price().await?;
        let value = spendable(balance, ctx.gas_limit, gas_price)?;
        let nonce = ctx.client.get_transaction_count(from).await?;

        Ok(WithdrawalRequest {
            from,
            to: ctx.vault_address,
            value,
            nonce,
            gas_price,
            gas_limit: ctx.gas_limit,
            chain_id: ctx.chain_id,
        })
    }

    async fn attempt(&self) -> Result<B256, WithdrawError> {
        let request = self.prepare().await?;
        info!(
            value = %format_eth(request.value),
            nonce = request.nonce,
            gas_price = request.gas_price,
            "submitting withdrawal"
        );
        Ok(self.ctx.client.send_transaction(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ETH: u128 = 1_000_000_000_000_000_000;
    const GWEI: u128 = 1_000_000_000;

    #[test]
    fn subtracts_transfer_fee() {
        let balance = U256::from(3 * ETH / 2);
        let value = spendable(balance, 21_000, 50 * GWEI).unwrap();
        assert_eq!(value, U256::from(1_498_950_000_000_000_000u128));
        assert_eq!(format_eth(balance - value), "0.00105");
    }

    #[test]
    fn never_exceeds_balance() {
        for gas_price in [1u128, GWEI, 200 * GWEI] {
            let balance = U256::from(ETH);
            let value = spendable(balance, 21_000, gas_price).unwrap();
            assert!(value < balance);
        }
    }

    #[test]
    fn zero_gas_price_forwards_everything() {
        let balance = U256::from(ETH);
        assert_eq!(spendable(balance, 21_000, 0).unwrap(), balance);
    }

    #[test]
    fn fee_at_or_above_balance_is_rejected() {
        let fee = 21_000u128 * 50 * GWEI;
        for balance in [0, fee - 1, fee] {
            let err = spendable(U256::from(balance), 21_000, 50 * GWEI).unwrap_err();
            assert!(matches!(err, WithdrawError::InsufficientFunds { .. }));
        }
    }

    #[test]
    fn empty_account_means_nothing_to_forward() {
        let exhausted = |balance: u128| WithdrawalOutcome::Exhausted {
            attempts: 5,
            last_error: spendable(U256::from(balance), 21_000, 50 * GWEI).unwrap_err(),
        };
        assert!(exhausted(0).nothing_to_forward());
        assert!(!exhausted(GWEI).nothing_to_forward());

        let failed = WithdrawalOutcome::Exhausted {
            attempts: 5,
            last_error: WithdrawError::Client(anyhow::anyhow!("connection reset")),
        };
        assert!(!failed.nothing_to_forward());

        let sent = WithdrawalOutcome::Success {
            tx_hash: B256::ZERO,
            attempts: 1,
        };
        assert!(!sent.nothing_to_forward());
    }

    #[test]
    fn fee_does_not_overflow() {
        let err = spendable(U256::from(ETH), u64::MAX, u128::MAX).unwrap_err();
        assert!(matches!(err, WithdrawError::InsufficientFunds { .. }));
    }
}
