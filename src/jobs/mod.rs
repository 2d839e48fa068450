//! Background work that runs outside the caller's request.

pub mod retry;
pub mod usage_stock;

pub use retry::{with_retry, LedgerRetryPolicy, RetryConfig, RetryFailure, RetryPolicy};
pub use usage_stock::UsageStockJob;
