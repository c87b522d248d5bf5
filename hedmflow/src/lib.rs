//! # Hedmflow
//!
//! A workload orchestrator for far-field HEDM layer analysis.
//!
//! Hedmflow sequences the four external stages of a layer analysis
//! (`peaks`, `postPeaks`, `indexRefine`, `processGrains`) across a fixed
//! number of dataset partitions ("nodes"), capturing each invocation's
//! stdout to a mapped file and threading data dependencies between stages:
//!
//! - **Fan-out stages**: one independent invocation per node, run
//!   concurrently with fail-fast abort on the first failure
//! - **Join stages**: a single invocation gated on the existence of every
//!   predecessor output file
//! - **Cancellation handling**: cooperative token-based cancellation that
//!   stops launching new invocations and awaits in-flight ones
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hedmflow::prelude::*;
//! use std::sync::Arc;
//!
//! let config = LayerConfig::new("/data/layer1", "ps.txt");
//! let pipeline = LayerPipeline::new(config, Arc::new(ProcessExecutor::new()));
//! let outputs = pipeline.run().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod errors;
pub mod executor;
pub mod identity;
pub mod pipeline;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{CancellationToken, NodeTaskGroup};
    pub use crate::config::LayerConfig;
    pub use crate::errors::HedmflowError;
    pub use crate::executor::{CommandExecutor, Invocation, ProcessExecutor};
    pub use crate::identity::RunIdentity;
    pub use crate::pipeline::{LayerOutputs, LayerPipeline};
    pub use crate::stages::{StageKind, StageResult, WorkItem};
}
