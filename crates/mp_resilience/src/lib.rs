//! mp_resilience: retry and timeout policies shared by the network adapters.
//!
//! Errors opt into retrying through [`Retryable`]; everything else is
//! returned to the caller on the first failure.

pub mod retry;
pub mod timeout;

pub use retry::{with_retry, RetryConfig, Retryable};
pub use timeout::{with_timeout, TimeoutError};
