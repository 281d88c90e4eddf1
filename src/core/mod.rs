pub mod backoff;
pub mod context;
pub mod watcher;
pub mod withdrawer;

pub use backoff::RetryPolicy;
pub use context::{ConcurrencyPolicy, Context};
pub use watcher::{Disposition, Watcher};
pub use withdrawer::{spendable, WithdrawError, WithdrawalOutcome, Withdrawer};
