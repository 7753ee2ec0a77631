//! Harness: the rate-limited, retrying client used to call a remote
//! generative-model endpoint.
//!
//! This crate sits between the evaluation pipeline and the model endpoint:
//! - [`rate_limiter`]: sliding-window admission with failure-scaled spacing
//! - [`provider`]: the [`provider::ModelClient`] trait, its HTTP implementation
//!   and a scripted mock for tests
//! - [`invoker`]: payload/response size enforcement, throttling recovery and
//!   bounded exponential backoff

pub mod invoker;
pub mod provider;
pub mod rate_limiter;
