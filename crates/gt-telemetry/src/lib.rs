//! Observability setup for groundtruth-eval.
//!
//! Wraps `tracing-subscriber` initialisation (human-readable or JSON output,
//! `RUST_LOG`-aware) and provides trace-id generation so every evaluation run
//! and every sample inside it can be correlated in the logs.

pub mod logging;
pub mod tracing_setup;
