use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;
use vmbundle_cloud::{CloudClient, CloudError, Instance};
use vmbundle_cmd::{Command, CommandError, Executor};
use vmbundle_fs::FsError;

use crate::devices::{DeviceError, new_device};
use crate::host::Host;
use crate::state::WorkflowState;

#[derive(Error, Debug)]
pub enum VolumeError {
    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// First of `prefix`, `prefix0`, `prefix1`, ... that does not exist yet.
pub async fn choose_mount_point(host: &dyn Host, prefix: &Path) -> Result<PathBuf, FsError> {
    let mut candidate = prefix.to_path_buf();
    let mut index: u32 = 0;
    while host.path_exists(&candidate).await? {
        let mut name = OsString::from(prefix.as_os_str());
        name.push(index.to_string());
        candidate = PathBuf::from(name);
        index += 1;
    }
    Ok(candidate)
}

pub async fn create_mount_point(
    executor: &dyn Executor,
    state: &mut WorkflowState,
    path: &Path,
) -> Result<(), CommandError> {
    info!(mount_point = %path.display(), "creating mount point");
    Command::new("mkdir").arg("-p").arg(path).run(executor).await?;
    state.mount_point_created(path.to_path_buf());
    Ok(())
}

pub struct ScratchVolume<'a> {
    pub size_gb: u64,
    pub instance: &'a Instance,
    /// Device name to request at attach time.
    pub requested_device: &'a str,
    pub filesystem_type: &'a str,
    pub mount_point: &'a Path,
}

/// Create, attach, format and mount a scratch volume, recording each
/// acquisition in `state` as soon as it happens.
pub async fn provision_scratch_volume(
    executor: &dyn Executor,
    cloud: &dyn CloudClient,
    host: &dyn Host,
    state: &mut WorkflowState,
    options: ScratchVolume<'_>,
) -> Result<PathBuf, VolumeError> {
    let ScratchVolume {
        size_gb,
        instance,
        requested_device,
        filesystem_type,
        mount_point,
    } = options;

    let devices_before = host.block_devices().await?;

    info!(size_gb, instance = %instance.id, "creating and attaching volume");
    let volume = cloud
        .create_and_attach_volume(size_gb, instance, requested_device)
        .await?;
    state.volume_created(volume.clone());

    let devices_after = host.block_devices().await?;
    let device = PathBuf::from("/dev").join(new_device(&devices_before, &devices_after)?);
    info!(
        volume = %volume.id,
        requested_device = %volume.requested_device,
        device = %device.display(),
        "volume attached"
    );

    info!(device = %device.display(), filesystem_type, "making filesystem on volume");
    Command::new("mkfs")
        .args(["-t", filesystem_type])
        .arg(&device)
        .run(executor)
        .await?;

    info!(device = %device.display(), mount_point = %mount_point.display(), "mounting volume");
    Command::new("mount")
        .arg(&device)
        .arg(mount_point)
        .run(executor)
        .await?;
    state.volume_mounted();

    Ok(device)
}
