//! In-memory chain client for exercising the watcher and withdrawer
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use anyhow::{anyhow, bail, Result};
use sweep::core::{Context, RetryPolicy};
use sweep::infrastructure::{BlockTag, ChainClient, PendingTransaction, WithdrawalRequest};
use tokio::sync::mpsc;
use tokio::time::Instant;

pub const ETH: u128 = 1_000_000_000_000_000_000;
pub const GWEI: u128 = 1_000_000_000;

pub fn deposit_address() -> Address {
    Address::repeat_byte(0xaa)
}

pub fn vault_address() -> Address {
    Address::repeat_byte(0xbb)
}

pub fn stranger() -> Address {
    Address::repeat_byte(0xcc)
}

pub fn hash(n: u8) -> B256 {
    B256::repeat_byte(n)
}

#[derive(Default)]
pub struct State {
    pub transactions: HashMap<B256, PendingTransaction>,
    pub lookup_failures: HashSet<B256>,
    pub balance: U256,
    pub gas_price: u128,
    pub nonce: u64,
    /// Outcome of each submission in order; `false` = rejected. Missing = accepted.
    pub send_script: Vec<bool>,
    pub send_delay: Duration,
    pub send_attempts: Vec<Instant>,
    pub sent: Vec<WithdrawalRequest>,
    pub head: u64,
    /// Every `block_number` call mines a block
    pub auto_mine: bool,
    pub receipts: HashMap<B256, u64>,
    /// Broadcasts wait in a mempool instead of applying at once. Each is
    /// mined on the second receipt poll for it, which also debits the
    /// balance and advances the nonce.
    pub mempool_mode: bool,
    /// Broadcast transfers and the receipt polls seen for each
    pub mempool: HashMap<B256, (WithdrawalRequest, u32)>,
    /// Head observed when the first balance was read
    pub head_at_first_balance: Option<u64>,
    pub balance_reads: usize,
    pub active_withdrawals: usize,
    pub max_active_withdrawals: usize,
}

pub struct MockChain {
    pub state: Mutex<State>,
    pending: Mutex<Option<mpsc::Receiver<B256>>>,
}

impl MockChain {
    pub fn new() -> (Arc<Self>, mpsc::Sender<B256>) {
        let (tx, rx) = mpsc::channel(64);
        let chain = Arc::new(Self {
            state: Mutex::new(State {
                balance: U256::from(3 * ETH / 2),
                gas_price: 50 * GWEI,
                nonce: 7,
                ..Default::default()
            }),
            pending: Mutex::new(Some(rx)),
        });
        (chain, tx)
    }

    pub fn with_state(&self, f: impl FnOnce(&mut State)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn read<T>(&self, f: impl FnOnce(&State) -> T) -> T {
        f(&self.state.lock().unwrap())
    }

    /// A mined transaction paying `to`
    pub fn add_transaction(&self, n: u8, to: Option<Address>, value: U256, mined_at: u64) -> B256 {
        let hash = hash(n);
        self.with_state(|state| {
            state.transactions.insert(
                hash,
                PendingTransaction {
                    hash,
                    from: stranger(),
                    to,
                    value,
                },
            );
            state.receipts.insert(hash, mined_at);
        });
        hash
    }
}

/// Context with fast confirmation polling and default retry policy
pub fn context(chain: Arc<MockChain>, confirmations: u64) -> Context {
    Context::new(chain, deposit_address(), vault_address(), confirmations)
        .with_confirmation_poll(Duration::from_millis(100))
        .with_retry(RetryPolicy::default())
}

#[async_trait::async_trait]
impl ChainClient for MockChain {
    async fn subscribe_pending_transactions(&self) -> Result<mpsc::Receiver<B256>> {
        self.pending
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow!("already subscribed"))
    }

    async fn get_transaction(&self, hash: B256) -> Result<Option<PendingTransaction>> {
        let state = self.state.lock().unwrap();
        if state.lookup_failures.contains(&hash) {
            bail!("connection reset");
        }
        Ok(state.transactions.get(&hash).cloned())
    }

    async fn get_balance(&self, address: Address, block: BlockTag) -> Result<U256> {
        assert_eq!(address, deposit_address());
        assert_eq!(block, BlockTag::Latest);
        let mut state = self.state.lock().unwrap();
        if state.head_at_first_balance.is_none() {
            state.head_at_first_balance = Some(state.head);
        }
        state.balance_reads += 1;
        state.active_withdrawals += 1;
        state.max_active_withdrawals = state.max_active_withdrawals.max(state.active_withdrawals);
        Ok(state.balance)
    }

    async fn get_gas_price(&self) -> Result<u128> {
        Ok(self.state.lock().unwrap().gas_price)
    }

    async fn get_transaction_count(&self, address: Address) -> Result<u64> {
        assert_eq!(address, deposit_address());
        Ok(self.state.lock().unwrap().nonce)
    }

    async fn send_transaction(&self, request: WithdrawalRequest) -> Result<B256> {
        let delay = self.state.lock().unwrap().send_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.active_withdrawals -= 1;
        let attempt = state.send_attempts.len();
        state.send_attempts.push(Instant::now());
        let accepted = state.send_script.get(attempt).copied().unwrap_or(true);
        if !accepted {
            bail!("nonce too low");
        }
        state.sent.push(request.clone());
        let tx_hash = B256::repeat_byte(0xf0 + state.sent.len() as u8);
        if state.mempool_mode {
            state.mempool.insert(tx_hash, (request, 0));
        } else {
            state.nonce += 1;
            let head = state.head;
            state.receipts.insert(tx_hash, head);
        }
        Ok(tx_hash)
    }

    async fn block_number(&self) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        if state.auto_mine {
            state.head += 1;
        }
        Ok(state.head)
    }

    async fn get_receipt_block(&self, hash: B256) -> Result<Option<u64>> {
        let mut state = self.state.lock().unwrap();
        let mined = match state.mempool.get_mut(&hash) {
            Some((_, polls)) => {
                *polls += 1;
                *polls >= 2
            }
            None => false,
        };
        if mined {
            if let Some((request, _)) = state.mempool.remove(&hash) {
                let fee = U256::from(request.gas_limit) * U256::from(request.gas_price);
                state.balance = state.balance.saturating_sub(request.value + fee);
                state.nonce += 1;
                state.head += 1;
                let head = state.head;
                state.receipts.insert(hash, head);
            }
        }
        Ok(state.receipts.get(&hash).copied())
    }

    fn endpoint_name(&self) -> String {
        "mock".to_string()
    }
}
