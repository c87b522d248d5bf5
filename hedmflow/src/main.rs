//! Command-line entry point for running one layer analysis.

use anyhow::{Context, Result};
use clap::Parser;
use hedmflow::config::{DEFAULT_NR_NODES, DEFAULT_NUM_PROCS, DEFAULT_N_FRAMES};
use hedmflow::executor::ProcessExecutor;
use hedmflow::pipeline::LayerPipeline;
use hedmflow::prelude::LayerConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "hedmflow",
    version,
    about = "Run one far-field HEDM layer analysis: peaks, postPeaks, indexRefine, processGrains"
)]
struct Cli {
    /// Folder holding the layer dataset; outputs land under <folder>/output
    #[arg(long)]
    folder: PathBuf,

    /// Parameter file name passed to the external binaries
    #[arg(long)]
    paramfn: String,

    /// Number of dataset partitions for the fan-out stages
    #[arg(long, default_value_t = DEFAULT_NR_NODES)]
    nr_nodes: u32,

    /// Number of detector frames in the layer
    #[arg(long, default_value_t = DEFAULT_N_FRAMES)]
    n_frames: u32,

    /// Processor cores handed to each invocation
    #[arg(long, default_value_t = DEFAULT_NUM_PROCS)]
    num_procs: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = LayerConfig::new(cli.folder, cli.paramfn)
        .with_nr_nodes(cli.nr_nodes)
        .with_n_frames(cli.n_frames)
        .with_num_procs(cli.num_procs);
    config.validate().context("invalid parameters")?;

    let executor = Arc::new(ProcessExecutor::new().with_cwd(config.folder()));
    let pipeline = LayerPipeline::new(config, executor);

    // Ctrl-C stops launching new invocations; in-flight ones are awaited.
    let cancel_token = pipeline.cancel_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            cancel_token.cancel("interrupted by operator");
        }
    });

    let outputs = pipeline.run().await.context("layer pipeline failed")?;

    info!(
        grains_output = %outputs.process_grains.output_path.display(),
        "layer analysis finished"
    );
    Ok(())
}
