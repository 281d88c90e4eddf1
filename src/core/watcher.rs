//! Mempool watcher - one task per pending transaction
//!
//! Every hash from the node subscription is handled in its own task:
//! look the transaction up, skip it unless it pays the deposit address,
//! wait for confirmations, then run a withdrawal sequence. Failures are
//! logged inside the task and never stop the watch loop.

use std::sync::Arc;

use alloy::primitives::B256;
use anyhow::{Context as _, Result};
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::core::context::{ConcurrencyPolicy, Context};
use crate::core::withdrawer::{WithdrawalOutcome, Withdrawer};

/// What happened to one pending transaction
#[derive(Debug)]
pub enum Disposition {
    /// The node no longer knows the transaction
    NotFound,
    /// Not addressed to the deposit account
    Ignored,
    /// Lookup failed; the event is dropped
    LookupFailed,
    /// Confirmation wait failed; the deposit is not forwarded
    ConfirmationFailed,
    /// A withdrawal sequence ran to completion
    Withdrawn(WithdrawalOutcome),
}

#[derive(Debug, Clone)]
pub struct Watcher {
    ctx: Arc<Context>,
    withdrawer: Withdrawer,
    /// Held for a whole withdrawal sequence under `ConcurrencyPolicy::Serialized`,
    /// until the broadcast transfer is mined
    serial: Option<Arc<Mutex<()>>>,
}

impl Watcher {
    pub fn new(ctx: Arc<Context>) -> Self {
        let serial = match ctx.policy {
            ConcurrencyPolicy::Concurrent => None,
            ConcurrencyPolicy::Serialized => Some(Arc::new(Mutex::new(()))),
        };
        Self {
            withdrawer: Withdrawer::new(ctx.clone()),
            ctx,
            serial,
        }
    }

    /// Watch until the subscription ends.
    ///
    /// In-flight tasks are awaited before returning. The subscription is
    /// not restarted, so the end of the stream is reported as an error.
    pub async fn run(&self) -> Result<()> {
        let mut pending = self
            .ctx
            .client
            .subscribe_pending_transactions()
            .await
            .context("Failed to start watching")?;
        info!(
            deposit = %self.ctx.deposit_address,
            confirmations = self.ctx.confirmations,
            policy = %self.ctx.policy,
            "watching for incoming transactions"
        );

        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                next = pending.recv() => {
                    let Some(hash) = next else { break };
                    let watcher = self.clone();
                    tasks.spawn(async move { watcher.handle(hash).await });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => reap(joined),
            }
        }

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "subscription ended, waiting for in-flight deposits");
        }
        while let Some(joined) = tasks.join_next().await {
            reap(joined);
        }

        anyhow::bail!("pending transaction subscription ended")
    }

    /// Process one pending transaction hash to its final disposition
    pub async fn handle(&self, hash: B256) -> Disposition {
        let ctx = &self.ctx;

        let tx = match ctx.client.get_transaction(hash).await {
            Ok(Some(tx)) => tx,
            Ok(None) => {
                debug!(%hash, "pending transaction not found");
                return Disposition::NotFound;
            }
            Err(err) => {
                let err = format!("{:#}", err);
                warn!(%hash, error = %err, "pending transaction lookup failed");
                return Disposition::LookupFailed;
            }
        };

        if !tx.is_sent_to(ctx.deposit_address) {
            return Disposition::Ignored;
        }

        info!(%hash, from = %tx.from, "Receiving {} ETH from {}…", tx.value_eth(), tx.from);
        info!(%hash, "Waiting for {} confirmations…", ctx.confirmations);

        if let Err(err) = ctx
            .client
            .wait_for_confirmations(hash, ctx.confirmations, ctx.confirmation_poll)
            .await
        {
            let err = format!("{:#}", err);
            error!(%hash, error = %err, "waiting for confirmations failed");
            return Disposition::ConfirmationFailed;
        }
        info!(%hash, "deposit confirmed, withdrawing to vault");

        let outcome = match &self.serial {
            Some(lock) => {
                let _guard = lock.lock().await;
                let outcome = self.withdrawer.withdraw().await;
                if let WithdrawalOutcome::Success { tx_hash, .. } = &outcome {
                    self.wait_until_mined(*tx_hash).await;
                }
                outcome
            }
            None => self.withdrawer.withdraw().await,
        };

        match &outcome {
            WithdrawalOutcome::Success { tx_hash, attempts } => {
                info!(deposit = %hash, withdrawal = %tx_hash, attempts, "Transaction withdrawn to vault ✅");
            }
            WithdrawalOutcome::Exhausted { attempts, .. } if outcome.nothing_to_forward() => {
                info!(deposit = %hash, attempts, "nothing left to forward, account already swept");
            }
            WithdrawalOutcome::Exhausted { attempts, .. } => {
                error!(deposit = %hash, attempts, "deposit left in account, withdrawal exhausted");
            }
        }
        Disposition::Withdrawn(outcome)
    }

    /// Block the next serialized sequence until our transfer is mined, so it
    /// reads the balance and nonce that follow it
    async fn wait_until_mined(&self, tx_hash: B256) {
        debug!(withdrawal = %tx_hash, "holding withdrawal lock until mined");
        if let Err(err) = self
            .ctx
            .client
            .wait_for_confirmations(tx_hash, 1, self.ctx.confirmation_poll)
            .await
        {
            let err = format!("{:#}", err);
            warn!(withdrawal = %tx_hash, error = %err, "waiting for withdrawal receipt failed");
        }
    }
}

fn reap(joined: std::result::Result<Disposition, JoinError>) {
    if let Err(err) = joined {
        error!(error = %err, "deposit task panicked");
    }
}
