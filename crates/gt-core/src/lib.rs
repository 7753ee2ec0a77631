//! Shared configuration and record types for groundtruth-eval.

pub mod config;
pub mod types;
