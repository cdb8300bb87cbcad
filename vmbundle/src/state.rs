use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use vmbundle_cloud::{CloudClient, Volume};
use vmbundle_cmd::{Command, Executor};

/// Resources the workflow has acquired and cleanup must release.
///
/// Each field is set only after the matching action succeeded, in the order
/// mount point, volume, mount.
#[derive(Debug, Default)]
pub struct WorkflowState {
    mount_point: Option<PathBuf>,
    volume: Option<Volume>,
    volume_mounted: bool,
}

impl WorkflowState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mount_point_created(&mut self, path: PathBuf) {
        self.mount_point = Some(path);
    }

    pub fn volume_created(&mut self, volume: Volume) {
        self.volume = Some(volume);
    }

    pub fn volume_mounted(&mut self) {
        self.volume_mounted = true;
    }

    pub fn mount_point(&self) -> Option<&Path> {
        self.mount_point.as_deref()
    }

    pub fn volume(&self) -> Option<&Volume> {
        self.volume.as_ref()
    }

    pub fn is_volume_mounted(&self) -> bool {
        self.volume_mounted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStep {
    Unmount,
    DeleteVolume,
    RemoveMountPoint,
}

impl fmt::Display for CleanupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupStep::Unmount => write!(f, "unmount volume"),
            CleanupStep::DeleteVolume => write!(f, "detach and delete volume"),
            CleanupStep::RemoveMountPoint => write!(f, "remove mount point"),
        }
    }
}

#[derive(Debug, Default)]
pub struct CleanupReport {
    pub attempted: Vec<CleanupStep>,
    pub failed: Vec<(CleanupStep, String)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn record<E: fmt::Display>(&mut self, step: CleanupStep, result: Result<(), E>) {
        self.attempted.push(step);
        if let Err(error) = result {
            warn!("cleanup: failed to {step}: {error}");
            self.failed.push((step, error.to_string()));
        }
    }
}

/// Release everything `state` holds, newest first. Every step is attempted
/// even when an earlier one fails; failures are logged and reported, never
/// returned as errors. Taking `state` by value makes a second run impossible.
pub async fn cleanup(
    state: WorkflowState,
    executor: &dyn Executor,
    cloud: &dyn CloudClient,
) -> CleanupReport {
    let WorkflowState {
        mount_point,
        volume,
        volume_mounted,
    } = state;
    let mut report = CleanupReport::default();

    if mount_point.is_none() && volume.is_none() {
        return report;
    }
    info!("cleaning up");

    if volume_mounted {
        if let Some(mount_point) = &mount_point {
            let result = Command::new("umount")
                .arg(mount_point)
                .run(executor)
                .await
                .map(drop);
            report.record(CleanupStep::Unmount, result);
        }
    }

    if let Some(volume) = &volume {
        let result = cloud.detach_and_delete_volume(volume).await;
        report.record(CleanupStep::DeleteVolume, result);
    }

    if let Some(mount_point) = &mount_point {
        let result = Command::new("rm")
            .arg("-rf")
            .arg(mount_point)
            .run(executor)
            .await
            .map(drop);
        report.record(CleanupStep::RemoveMountPoint, result);
    }

    report
}
