//! Outbound HTTP with per-kind rate limits, concurrency caps and retries.

mod client;
mod limiter;
mod retry;

pub use client::{
    FetchError, FetchResponse, Fetcher, RequestKind, MAX_ENRICHMENT_BODY_BYTES, USER_AGENT,
};
pub use limiter::RateLimiter;
pub use retry::RetryPolicy;
