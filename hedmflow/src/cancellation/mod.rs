//! Cooperative cancellation and fan-out task grouping.
//!
//! This module provides:
//! - `CancellationToken` for cooperative, idempotent cancellation
//! - `NodeTaskGroup` for running per-node invocations with fail-fast abort

mod task_group;
mod token;

pub use task_group::NodeTaskGroup;
pub use token::CancellationToken;
