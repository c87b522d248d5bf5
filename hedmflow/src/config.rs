//! Layer run configuration.
//!
//! Parameters are fixed at construction time and immutable for the run.

use crate::errors::HedmflowError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default number of dataset partitions ("nodes").
pub const DEFAULT_NR_NODES: u32 = 11;

/// Default number of detector frames in the layer.
pub const DEFAULT_N_FRAMES: u32 = 1440;

/// Default number of processor cores handed to each invocation.
pub const DEFAULT_NUM_PROCS: u32 = 32;

/// Configuration for one layer analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerConfig {
    /// Folder holding the layer dataset; outputs land under `<folder>/output`.
    pub folder: PathBuf,

    /// Parameter file name passed to the external binaries.
    pub paramfn: String,

    /// Number of partitions for the fan-out stages.
    #[serde(default = "default_nr_nodes")]
    pub nr_nodes: u32,

    /// Number of frames in the dataset.
    #[serde(default = "default_n_frames")]
    pub n_frames: u32,

    /// Processor cores per invocation.
    #[serde(default = "default_num_procs")]
    pub num_procs: u32,
}

fn default_nr_nodes() -> u32 {
    DEFAULT_NR_NODES
}

fn default_n_frames() -> u32 {
    DEFAULT_N_FRAMES
}

fn default_num_procs() -> u32 {
    DEFAULT_NUM_PROCS
}

impl LayerConfig {
    /// Creates a configuration with default partition and core counts.
    #[must_use]
    pub fn new(folder: impl Into<PathBuf>, paramfn: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            paramfn: paramfn.into(),
            nr_nodes: DEFAULT_NR_NODES,
            n_frames: DEFAULT_N_FRAMES,
            num_procs: DEFAULT_NUM_PROCS,
        }
    }

    /// Sets the number of nodes.
    #[must_use]
    pub fn with_nr_nodes(mut self, nr_nodes: u32) -> Self {
        self.nr_nodes = nr_nodes;
        self
    }

    /// Sets the number of frames.
    #[must_use]
    pub fn with_n_frames(mut self, n_frames: u32) -> Self {
        self.n_frames = n_frames;
        self
    }

    /// Sets the number of processor cores per invocation.
    #[must_use]
    pub fn with_num_procs(mut self, num_procs: u32) -> Self {
        self.num_procs = num_procs;
        self
    }

    /// Validates required parameters.
    ///
    /// `folder` and `paramfn` have no defaults and must be non-empty;
    /// `nr_nodes` must be at least 1.
    pub fn validate(&self) -> Result<(), HedmflowError> {
        if self.folder.as_os_str().is_empty() {
            return Err(HedmflowError::missing_parameter("folder"));
        }
        if self.paramfn.is_empty() {
            return Err(HedmflowError::missing_parameter("paramfn"));
        }
        if self.nr_nodes == 0 {
            return Err(HedmflowError::missing_parameter("nrNodes"));
        }
        Ok(())
    }

    /// Returns the directory mapped output files are written to.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.folder.join("output")
    }

    /// Returns the dataset folder.
    #[must_use]
    pub fn folder(&self) -> &Path {
        &self.folder
    }
}
