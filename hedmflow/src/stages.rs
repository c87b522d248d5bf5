//! Stage kinds, work items, and output file mapping.
//!
//! The pipeline shape is fixed: two fan-out stages (`peaks`, `indexRefine`)
//! each followed by a join stage (`postPeaks`, `processGrains`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// The four stages of a layer analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    /// Peak search over one dataset partition (fan-out).
    Peaks,
    /// Merge and post-process peak results (join).
    PostPeaks,
    /// Indexing and refinement over one partition (fan-out).
    IndexRefine,
    /// Grain processing over the refined results (join).
    ProcessGrains,
}

impl StageKind {
    /// Returns the external executable name for this stage.
    #[must_use]
    pub fn binary(self) -> &'static str {
        match self {
            Self::Peaks => "peaks",
            Self::PostPeaks => "postPeaks",
            Self::IndexRefine => "indexRefine",
            Self::ProcessGrains => "processGrains",
        }
    }

    /// Returns the output file prefix for this stage.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Peaks => "Peaks",
            Self::PostPeaks => "PostPeaks",
            Self::IndexRefine => "IndexRefine",
            Self::ProcessGrains => "ProcessGrains",
        }
    }

    /// Returns whether this stage launches one invocation per node.
    #[must_use]
    pub fn is_fan_out(self) -> bool {
        matches!(self, Self::Peaks | Self::IndexRefine)
    }

    /// Maps a stage (and node index, for fan-out stages) to its stdout file.
    ///
    /// Fan-out stages map to `<output_dir>/<Prefix>_<node>_.out`, join
    /// stages to `<output_dir>/<Prefix>.out`.
    #[must_use]
    pub fn output_path(self, output_dir: &Path, node: Option<u32>) -> PathBuf {
        match node {
            Some(n) => output_dir.join(format!("{}_{n}_.out", self.prefix())),
            None => output_dir.join(format!("{}.out", self.prefix())),
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

/// One unit of work in a fan-out stage.
///
/// Created per partition, consumed once the join barrier has observed its
/// output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// The stage this item belongs to.
    pub stage: StageKind,
    /// The partition index in `[0, nr_nodes)`.
    pub node_index: u32,
    /// The mapped stdout file for the invocation.
    pub output_path: PathBuf,
}

impl WorkItem {
    /// Creates a work item for one partition of a fan-out stage.
    #[must_use]
    pub fn new(stage: StageKind, node_index: u32, output_dir: &Path) -> Self {
        Self {
            stage,
            node_index,
            output_path: stage.output_path(output_dir, Some(node_index)),
        }
    }
}

/// Handle to a completed invocation's stdout file.
///
/// Ownership passes from the producing stage to the consuming join stage as
/// a read-only dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageResult {
    /// The stage that produced the output.
    pub stage: StageKind,
    /// The node index, for fan-out stages.
    pub node_index: Option<u32>,
    /// The stdout file written by the invocation.
    pub output_path: PathBuf,
}

impl StageResult {
    /// Creates a result handle for a completed invocation.
    #[must_use]
    pub fn new(stage: StageKind, node_index: Option<u32>, output_path: PathBuf) -> Self {
        Self {
            stage,
            node_index,
            output_path,
        }
    }

    /// Returns whether the output file has been materialized.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.output_path.exists()
    }
}

impl From<WorkItem> for StageResult {
    fn from(item: WorkItem) -> Self {
        Self::new(item.stage, Some(item.node_index), item.output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_names() {
        assert_eq!(StageKind::Peaks.binary(), "peaks");
        assert_eq!(StageKind::PostPeaks.binary(), "postPeaks");
        assert_eq!(StageKind::IndexRefine.binary(), "indexRefine");
        assert_eq!(StageKind::ProcessGrains.binary(), "processGrains");
    }

    #[test]
    fn test_fan_out_classification() {
        assert!(StageKind::Peaks.is_fan_out());
        assert!(StageKind::IndexRefine.is_fan_out());
        assert!(!StageKind::PostPeaks.is_fan_out());
        assert!(!StageKind::ProcessGrains.is_fan_out());
    }

    #[test]
    fn test_fan_out_output_path() {
        let path = StageKind::Peaks.output_path(Path::new("/data/output"), Some(3));
        assert_eq!(path, PathBuf::from("/data/output/Peaks_3_.out"));
    }

    #[test]
    fn test_join_output_path() {
        let path = StageKind::PostPeaks.output_path(Path::new("/data/output"), None);
        assert_eq!(path, PathBuf::from("/data/output/PostPeaks.out"));
    }

    #[test]
    fn test_work_item_maps_output() {
        let item = WorkItem::new(StageKind::IndexRefine, 7, Path::new("/data/output"));
        assert_eq!(
            item.output_path,
            PathBuf::from("/data/output/IndexRefine_7_.out")
        );
    }

    #[test]
    fn test_work_item_into_result() {
        let item = WorkItem::new(StageKind::Peaks, 2, Path::new("/data/output"));
        let result: StageResult = item.clone().into();
        assert_eq!(result.stage, StageKind::Peaks);
        assert_eq!(result.node_index, Some(2));
        assert_eq!(result.output_path, item.output_path);
    }
}
