//! The four-stage layer pipeline.
//!
//! Stage shape is fixed: `peaks` fans out over `nr_nodes` partitions, joins
//! into `postPeaks`, `indexRefine` fans out again, and `processGrains`
//! joins. Stages run strictly sequentially; a join stage is gated on the
//! materialized outputs of its predecessor fan-out.


use crate::cancellation::{CancellationToken, NodeTaskGroup};
use crate::config::LayerConfig;
use crate::errors::HedmflowError;
use crate::executor::{
    index_refine_invocation, peaks_invocation, post_peaks_invocation, process_grains_invocation,
    CommandExecutor, Invocation,
};
use crate::identity::RunIdentity;
use crate::stages::{StageKind, StageResult, WorkItem};
use std::sync::Arc;
use tracing::{error, info};

/// All output handles produced by one layer run.
#[derive(Debug, Clone)]
pub struct LayerOutputs {
    /// Per-node peak search outputs.
    pub peaks: Vec<StageResult>,
    /// The merged peaks output.
    pub post_peaks: StageResult,
    /// Per-node indexing/refinement outputs.
    pub index_refine: Vec<StageResult>,
    /// The grain processing output.
    pub process_grains: StageResult,
}

/// Orchestrates one layer analysis over an external executor.
pub struct LayerPipeline {
    config: LayerConfig,
    executor: Arc<dyn CommandExecutor>,
    identity: RunIdentity,
    cancel_token: Arc<CancellationToken>,
}

impl LayerPipeline {
    /// Creates a pipeline over the given configuration and executor.
    #[must_use]
    pub fn new(config: LayerConfig, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            config,
            executor,
            identity: RunIdentity::new(),
            cancel_token: Arc::new(CancellationToken::new()),
        }
    }

    /// Sets the run identity.
    #[must_use]
    pub fn with_identity(mut self, identity: RunIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Returns the pipeline's cancellation token.
    ///
    /// Cancelling it stops launching new invocations; in-flight invocations
    /// are awaited.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel_token
    }

    /// Returns the run configuration.
    #[must_use]
    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    /// Runs the full pipeline: peaks, postPeaks, indexRefine, processGrains.
    ///
    /// Stages run in order; each stage's outputs are threaded into the
    /// next. Any stage failure aborts the run.
    pub async fn run(&self) -> Result<LayerOutputs, HedmflowError> {
        self.config.validate()?;
        tokio::fs::create_dir_all(self.config.output_dir()).await?;

        info!(
            run_id = %self.identity.run_id,
            folder = %self.config.folder.display(),
            nr_nodes = self.config.nr_nodes,
            "starting layer pipeline"
        );

        let peaks = self.run_peaks_stage().await?;
        let post_peaks = self.run_post_peaks_stage(&peaks).await?;
        let index_refine = self.run_index_refine_stage(&post_peaks).await?;
        let process_grains = self.run_process_grains_stage(&index_refine).await?;

        info!(run_id = %self.identity.run_id, "layer pipeline complete");

        Ok(LayerOutputs {
            peaks,
            post_peaks,
            index_refine,
            process_grains,
        })
    }

    /// Runs the `peaks` fan-out: one invocation per node in `[0, nr_nodes)`.
    ///
    /// Returns exactly `nr_nodes` results ordered by node index. The first
    /// failing invocation aborts the stage.
    pub async fn run_peaks_stage(&self) -> Result<Vec<StageResult>, HedmflowError> {
        let config = self.config.clone();
        let output_dir = config.output_dir();
        self.run_fan_out(StageKind::Peaks, move |node| {
            peaks_invocation(
                &config.folder,
                &config.paramfn,
                node,
                config.nr_nodes,
                config.n_frames,
                config.num_procs,
                &output_dir,
            )
        })
        .await
    }

    /// Runs the `postPeaks` join over the peak outputs.
    ///
    /// All `nr_nodes` peak outputs must exist before the invocation starts.
    pub async fn run_post_peaks_stage(
        &self,
        peak_outputs: &[StageResult],
    ) -> Result<StageResult, HedmflowError> {
        self.ensure_fan_out_complete(StageKind::PostPeaks, StageKind::Peaks, peak_outputs)?;
        self.run_join(post_peaks_invocation(
            &self.config.folder,
            &self.config.paramfn,
            &self.config.output_dir(),
        ))
        .await
    }

    /// Runs the `indexRefine` fan-out, gated on the `postPeaks` output.
    pub async fn run_index_refine_stage(
        &self,
        post_peak_output: &StageResult,
    ) -> Result<Vec<StageResult>, HedmflowError> {
        self.ensure_outputs_exist(
            StageKind::IndexRefine,
            std::slice::from_ref(post_peak_output),
        )?;

        let config = self.config.clone();
        let output_dir = config.output_dir();
        self.run_fan_out(StageKind::IndexRefine, move |node| {
            index_refine_invocation(
                &config.folder,
                node,
                config.nr_nodes,
                config.num_procs,
                &output_dir,
            )
        })
        .await
    }

    /// Runs the `processGrains` join over the indexRefine outputs.
    pub async fn run_process_grains_stage(
        &self,
        index_refine_outputs: &[StageResult],
    ) -> Result<StageResult, HedmflowError> {
        self.ensure_fan_out_complete(
            StageKind::ProcessGrains,
            StageKind::IndexRefine,
            index_refine_outputs,
        )?;
        self.run_join(process_grains_invocation(
            &self.config.folder,
            &self.config.paramfn,
            &self.config.output_dir(),
        ))
        .await
    }

    /// Cancels the run.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.cancel_token.cancel(reason);
    }

    async fn run_fan_out<F>(
        &self,
        stage: StageKind,
        make_invocation: F,
    ) -> Result<Vec<StageResult>, HedmflowError>
    where
        F: Fn(u32) -> Invocation,
    {
        if self.cancel_token.is_cancelled() {
            return Err(self.cancel_token.as_error());
        }

        info!(
            run_id = %self.identity.run_id,
            stage = %stage,
            nr_nodes = self.config.nr_nodes,
            "starting fan-out stage"
        );

        let output_dir = self.config.output_dir();
        let group = NodeTaskGroup::new(self.cancel_token.clone());
        for node in 0..self.config.nr_nodes {
            if self.cancel_token.is_cancelled() {
                break;
            }
            let item = WorkItem::new(stage, node, &output_dir);
            let invocation = make_invocation(node);
            let executor = self.executor.clone();
            group.spawn(move |_token| async move {
                executor.run(&invocation).await?;
                Ok(item.into())
            });
        }

        let results = group.wait().await.map_err(|e| {
            error!(run_id = %self.identity.run_id, stage = %stage, "fan-out stage failed: {e}");
            e
        })?;

        info!(
            run_id = %self.identity.run_id,
            stage = %stage,
            outputs = results.len(),
            "fan-out stage complete"
        );
        Ok(results)
    }

    async fn run_join(&self, invocation: Invocation) -> Result<StageResult, HedmflowError> {
        if self.cancel_token.is_cancelled() {
            return Err(self.cancel_token.as_error());
        }

        let stage = invocation.stage;
        info!(run_id = %self.identity.run_id, stage = %stage, "starting join stage");

        self.executor.run(&invocation).await.map_err(|e| {
            error!(run_id = %self.identity.run_id, stage = %stage, "join stage failed: {e}");
            e
        })?;

        info!(run_id = %self.identity.run_id, stage = %stage, "join stage complete");
        Ok(StageResult::new(stage, None, invocation.stdout_path))
    }

    /// Barrier for a join stage: its predecessor fan-out must have produced
    /// one materialized output per node in `[0, nr_nodes)`.
    fn ensure_fan_out_complete(
        &self,
        join_stage: StageKind,
        producer_stage: StageKind,
        outputs: &[StageResult],
    ) -> Result<(), HedmflowError> {
        let output_dir = self.config.output_dir();
        for node in 0..self.config.nr_nodes {
            let found = outputs
                .iter()
                .find(|r| r.stage == producer_stage && r.node_index == Some(node));
            match found {
                Some(result) if result.exists() => {}
                Some(result) => {
                    return Err(HedmflowError::DependencyNotReady {
                        stage: join_stage,
                        path: result.output_path.clone(),
                    });
                }
                None => {
                    return Err(HedmflowError::DependencyNotReady {
                        stage: join_stage,
                        path: producer_stage.output_path(&output_dir, Some(node)),
                    });
                }
            }
        }
        Ok(())
    }

    /// Barrier over an explicit dependency list.
    fn ensure_outputs_exist(
        &self,
        stage: StageKind,
        dependencies: &[StageResult],
    ) -> Result<(), HedmflowError> {
        for dep in dependencies {
            if !dep.exists() {
                return Err(HedmflowError::DependencyNotReady {
                    stage,
                    path: dep.output_path.clone(),
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for LayerPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerPipeline")
            .field("config", &self.config)
            .field("run_id", &self.identity.run_id)
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish_non_exhaustive()
    }
}
