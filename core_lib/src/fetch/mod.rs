pub mod client;
pub mod retry;

pub use client::{user_agent, FetchError, FetchOptions, Fetcher};
pub use retry::{retry, RetryConfig, RetryableError};
