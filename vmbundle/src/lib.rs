mod cli;
pub mod collision;
pub mod config;
pub mod devices;
pub mod host;
pub mod inputs;
pub mod pipeline;
pub mod progress;
pub mod prompt;
pub mod sanitize;
pub mod space;
pub mod state;
pub mod volume;
pub mod workflow;

#[cfg(test)]
mod testing;

use indicatif::MultiProgress;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use vmbundle_cloud::{EucaClient, MetadataClient, VolumePoll};
use vmbundle_cmd::{Executor, SystemExecutor};

pub use crate::cli::Cli;
use crate::config::{ACCESS_KEY_VAR, Config};
use crate::host::LocalHost;
use crate::progress::SpinnerExecutor;
use crate::prompt::StdioPrompter;
use crate::state::{WorkflowState, cleanup};
pub use crate::workflow::{RegisteredImages, Workflow, WorkflowError, WorkflowOutcome};

/// Run one bundling session against this machine. Command spinners are
/// drawn through `progress`. Cleanup runs before this returns, whether the
/// workflow finished, failed or was interrupted with Ctrl-C.
pub async fn run(cli: Cli, progress: MultiProgress) -> Result<WorkflowOutcome, WorkflowError> {
    let config = Config::load(cli.config.as_deref()).await?;

    let executor: Arc<dyn Executor> = Arc::new(SpinnerExecutor::new(SystemExecutor, progress));
    let cloud = EucaClient::new(
        executor.clone(),
        MetadataClient::from_url(&config.cloud.metadata_url)?,
        VolumePoll {
            interval: Duration::from_secs(config.cloud.volume_poll_interval_secs),
            timeout: Duration::from_secs(config.cloud.volume_poll_timeout_secs),
        },
    );
    let host = LocalHost;
    let mut prompter = StdioPrompter::new();

    let workflow = Workflow {
        config: &config,
        cloud_mode: !cli.nocloud,
        executor: executor.as_ref(),
        cloud: &cloud,
        host: &host,
        prompter: &mut prompter,
        access_key: std::env::var(ACCESS_KEY_VAR).ok(),
    };
    run_until_shutdown(workflow, ctrl_c()).await
}

/// Drive `workflow` until it finishes or `shutdown` resolves, then release
/// everything it acquired through the workflow's own executor and cloud.
pub async fn run_until_shutdown(
    mut workflow: Workflow<'_>,
    shutdown: impl Future<Output = ()>,
) -> Result<WorkflowOutcome, WorkflowError> {
    let executor = workflow.executor;
    let cloud = workflow.cloud;

    let mut state = WorkflowState::new();
    let result = tokio::select! {
        result = workflow.run(&mut state) => result,
        () = shutdown => {
            warn!("interrupted");
            Ok(WorkflowOutcome::Interrupted)
        }
    };

    let report = cleanup(state, executor, cloud).await;
    if !report.is_clean() {
        warn!(failed = report.failed.len(), "cleanup was incomplete");
    }

    if let Ok(WorkflowOutcome::Completed(images)) = &result {
        info!(image = %images.filesystem_id, "bundle registered");
    }
    result
}

/// Resolves on the first Ctrl-C. Never resolves if the handler cannot be
/// installed.
async fn ctrl_c() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for Ctrl-C: {error}");
        std::future::pending::<()>().await;
    }
}

/// Process exit status for a finished run. Ctrl-C gives 130, as in a shell.
pub fn exit_code(result: &Result<WorkflowOutcome, WorkflowError>) -> i32 {
    match result {
        Ok(WorkflowOutcome::Completed(_) | WorkflowOutcome::Declined) => 0,
        Ok(WorkflowOutcome::Interrupted) => 130,
        Err(_) => 1,
    }
}
