//! External process execution.
//!
//! `CommandExecutor` is the seam between stage orchestration and the
//! external binaries; tests substitute a recording mock from
//! [`crate::testing`].

use crate::errors::{HedmflowError, StageExecutionError};
use crate::stages::StageKind;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Maximum bytes of stderr tail carried into a failure detail.
const STDERR_TAIL_BYTES: usize = 512;

/// One external invocation: executable, positional args, and mapped stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// The stage being invoked.
    pub stage: StageKind,
    /// The node index, for fan-out stages.
    pub node: Option<u32>,
    /// Positional arguments, exactly as the external binary expects them.
    pub args: Vec<String>,
    /// File the invocation's stdout is redirected to.
    pub stdout_path: PathBuf,
}

impl Invocation {
    /// Creates a new invocation.
    #[must_use]
    pub fn new(
        stage: StageKind,
        node: Option<u32>,
        args: Vec<String>,
        stdout_path: PathBuf,
    ) -> Self {
        Self {
            stage,
            node,
            args,
            stdout_path,
        }
    }

    /// Returns the executable name.
    #[must_use]
    pub fn program(&self) -> &'static str {
        self.stage.binary()
    }

    /// Returns the sibling file the invocation's stderr is captured to.
    #[must_use]
    pub fn stderr_path(&self) -> PathBuf {
        self.stdout_path.with_extension("err")
    }
}

/// Runs external stage invocations.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Runs one invocation to completion.
    ///
    /// On success the mapped stdout file exists and the process exited
    /// zero. Non-zero exit or launch failure surfaces as
    /// [`HedmflowError::StageExecution`].
    async fn run(&self, invocation: &Invocation) -> Result<(), HedmflowError>;
}

/// Executor that spawns the real external binaries.
///
/// stdout is redirected to the mapped file; stderr is captured to the
/// `.err` sibling, and its tail is included in failure details.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    /// Working directory for spawned processes, if overridden.
    cwd: Option<PathBuf>,
}

impl ProcessExecutor {
    /// Creates a new process executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the working directory for spawned processes.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn run(&self, invocation: &Invocation) -> Result<(), HedmflowError> {
        if let Some(parent) = invocation.stdout_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let stdout_file = std::fs::File::create(&invocation.stdout_path)?;

        let mut cmd = Command::new(invocation.program());
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::piped());
        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }

        debug!(
            stage = %invocation.stage,
            node = ?invocation.node,
            args = ?invocation.args,
            "spawning external invocation"
        );

        let child = cmd.spawn().map_err(|e| {
            StageExecutionError::new(
                invocation.stage,
                invocation.node,
                format!("failed to launch '{}': {e}", invocation.program()),
            )
        })?;

        let output = child.wait_with_output().await?;

        // Keep the full stderr next to the stdout file for later inspection.
        tokio::fs::write(invocation.stderr_path(), &output.stderr).await?;

        if output.status.success() {
            Ok(())
        } else {
            let detail = format!(
                "{}{}",
                exit_status_string(output.status),
                stderr_tail(&output.stderr),
            );
            Err(StageExecutionError::new(invocation.stage, invocation.node, detail).into())
        }
    }
}

fn exit_status_string(status: std::process::ExitStatus) -> String {
    status.code().map_or_else(
        || "terminated by signal".to_string(),
        |code| format!("exit status {code}"),
    )
}

fn stderr_tail(stderr: &[u8]) -> String {
    if stderr.is_empty() {
        return String::new();
    }
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim_end();
    let start = trimmed
        .char_indices()
        .rev()
        .take_while(|(i, _)| trimmed.len() - i <= STDERR_TAIL_BYTES)
        .last()
        .map_or(0, |(i, _)| i);
    format!("; stderr: {}", &trimmed[start..])
}

/// Builds the invocation for one node of the `peaks` fan-out.
#[must_use]
pub fn peaks_invocation(
    folder: &Path,
    paramfn: &str,
    node: u32,
    nr_nodes: u32,
    n_frames: u32,
    num_procs: u32,
    output_dir: &Path,
) -> Invocation {
    Invocation::new(
        StageKind::Peaks,
        Some(node),
        vec![
            folder.display().to_string(),
            paramfn.to_string(),
            node.to_string(),
            nr_nodes.to_string(),
            n_frames.to_string(),
            num_procs.to_string(),
        ],
        StageKind::Peaks.output_path(output_dir, Some(node)),
    )
}

/// Builds the invocation for the `postPeaks` join.
#[must_use]
pub fn post_peaks_invocation(folder: &Path, paramfn: &str, output_dir: &Path) -> Invocation {
    Invocation::new(
        StageKind::PostPeaks,
        None,
        vec![folder.display().to_string(), paramfn.to_string()],
        StageKind::PostPeaks.output_path(output_dir, None),
    )
}

/// Builds the invocation for one node of the `indexRefine` fan-out.
#[must_use]
pub fn index_refine_invocation(
    folder: &Path,
    node: u32,
    nr_nodes: u32,
    num_procs: u32,
    output_dir: &Path,
) -> Invocation {
    Invocation::new(
        StageKind::IndexRefine,
        Some(node),
        vec![
            folder.display().to_string(),
            node.to_string(),
            nr_nodes.to_string(),
            num_procs.to_string(),
        ],
        StageKind::IndexRefine.output_path(output_dir, Some(node)),
    )
}

/// Builds the invocation for the `processGrains` join.
#[must_use]
pub fn process_grains_invocation(folder: &Path, paramfn: &str, output_dir: &Path) -> Invocation {
    Invocation::new(
        StageKind::ProcessGrains,
        None,
        vec![folder.display().to_string(), paramfn.to_string()],
        StageKind::ProcessGrains.output_path(output_dir, None),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peaks_invocation_args_positional_order() {
        let inv = peaks_invocation(
            Path::new("/data/layer1"),
            "ps.txt",
            4,
            11,
            1440,
            32,
            Path::new("/data/layer1/output"),
        );
        assert_eq!(inv.program(), "peaks");
        assert_eq!(
            inv.args,
            vec!["/data/layer1", "ps.txt", "4", "11", "1440", "32"]
        );
        assert_eq!(
            inv.stdout_path,
            PathBuf::from("/data/layer1/output/Peaks_4_.out")
        );
    }

    #[test]
    fn test_post_peaks_invocation_args() {
        let inv = post_peaks_invocation(
            Path::new("/data/layer1"),
            "ps.txt",
            Path::new("/data/layer1/output"),
        );
        assert_eq!(inv.program(), "postPeaks");
        assert_eq!(inv.args, vec!["/data/layer1", "ps.txt"]);
        assert_eq!(
            inv.stdout_path,
            PathBuf::from("/data/layer1/output/PostPeaks.out")
        );
    }

    #[test]
    fn test_index_refine_invocation_omits_paramfn() {
        let inv = index_refine_invocation(
            Path::new("/data/layer1"),
            0,
            3,
            8,
            Path::new("/data/layer1/output"),
        );
        assert_eq!(inv.program(), "indexRefine");
        assert_eq!(inv.args, vec!["/data/layer1", "0", "3", "8"]);
    }

    #[test]
    fn test_stderr_path_sibling() {
        let inv = process_grains_invocation(
            Path::new("/data/layer1"),
            "ps.txt",
            Path::new("/data/layer1/output"),
        );
        assert_eq!(
            inv.stderr_path(),
            PathBuf::from("/data/layer1/output/ProcessGrains.err")
        );
    }

    #[test]
    fn test_stderr_tail_truncates_long_output() {
        let long = "x".repeat(2000);
        let tail = stderr_tail(long.as_bytes());
        assert!(tail.len() <= STDERR_TAIL_BYTES + "; stderr: ".len());
    }

    #[test]
    fn test_stderr_tail_empty() {
        assert_eq!(stderr_tail(b""), "");
    }

    #[tokio::test]
    async fn test_process_executor_missing_binary_is_stage_execution() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inv = Invocation::new(
            StageKind::Peaks,
            Some(0),
            vec!["arg".to_string()],
            dir.path().join("Peaks_0_.out"),
        );
        let executor = ProcessExecutor::new();
        let err = executor.run(&inv).await.unwrap_err();
        assert!(matches!(err, HedmflowError::StageExecution(_)));
    }
}
