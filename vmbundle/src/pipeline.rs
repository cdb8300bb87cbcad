//! Bundle, upload and register: the same three stages for a kernel, a
//! ramdisk or the root filesystem, each one an external euca2ools command.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};
use vmbundle_cloud::{CloudClient, CloudError};
use vmbundle_cmd::{Command, CommandError, Executor};

use crate::config::PollConfig;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error("could not find an image id in euca-register output: {output:?}")]
    UnparseableRegistration { output: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleKind {
    Kernel,
    Ramdisk,
    Filesystem,
}

impl fmt::Display for BundleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BundleKind::Kernel => write!(f, "kernel"),
            BundleKind::Ramdisk => write!(f, "ramdisk"),
            BundleKind::Filesystem => write!(f, "filesystem"),
        }
    }
}

/// Something to bundle and the image name it is registered under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleTarget {
    pub kind: BundleKind,
    pub source: PathBuf,
    pub name: String,
}

impl BundleTarget {
    pub fn new(kind: BundleKind, source: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
            name: name.into(),
        }
    }

    /// The root filesystem always bundles `/`.
    pub fn filesystem(name: impl Into<String>) -> Self {
        Self::new(BundleKind::Filesystem, "/", name)
    }
}

pub fn manifest_name(name: &str) -> String {
    format!("{name}.manifest.xml")
}

/// Where a manifest ends up once uploaded: `bucket/name.manifest.xml`.
pub fn manifest_location(bucket: &str, name: &str) -> String {
    format!("{bucket}/{}", manifest_name(name))
}

/// Options only the filesystem bundle takes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBundleOptions<'a> {
    pub kernel_id: Option<&'a str>,
    pub ramdisk_id: Option<&'a str>,
    pub arch: &'a str,
    pub size_mb: u64,
    pub exclude: &'a [String],
}

pub fn bundle_image_command(target: &BundleTarget, destination: &Path) -> Command {
    let mut cmd = Command::new("euca-bundle-image");
    cmd.arg("-i").arg(&target.source).arg("-d").arg(destination);
    match target.kind {
        BundleKind::Kernel => {
            cmd.args(["--kernel", "true"]);
        }
        BundleKind::Ramdisk => {
            cmd.args(["--ramdisk", "true"]);
        }
        BundleKind::Filesystem => {}
    }
    cmd.args(["-p", target.name.as_str()]);
    cmd
}

pub fn bundle_volume_command(
    name: &str,
    destination: &Path,
    options: &VolumeBundleOptions<'_>,
) -> Command {
    let mut cmd = Command::new("euca-bundle-vol");
    cmd.arg("--no-inherit");
    if let Some(kernel_id) = options.kernel_id.filter(|id| !id.is_empty()) {
        cmd.args(["--kernel", kernel_id]);
    }
    if let Some(ramdisk_id) = options.ramdisk_id.filter(|id| !id.is_empty()) {
        cmd.args(["--ramdisk", ramdisk_id]);
    }
    cmd.arg("-d")
        .arg(destination)
        .args(["-r", options.arch])
        .args(["-p", name])
        .args(["-s", options.size_mb.to_string().as_str()])
        .args(["-e", options.exclude.join(",").as_str()]);
    cmd
}

pub fn upload_command(bucket: &str, destination: &Path, name: &str) -> Command {
    let mut cmd = Command::new("euca-upload-bundle");
    cmd.args(["-b", bucket])
        .arg("-m")
        .arg(destination.join(manifest_name(name)));
    cmd
}

pub fn register_command(bucket: &str, name: &str) -> Command {
    let mut cmd = Command::new("euca-register");
    cmd.arg(manifest_location(bucket, name));
    cmd
}

pub fn make_private_command(image_id: &str) -> Command {
    let mut cmd = Command::new("euca-modify-image-attribute");
    cmd.args(["-l", "-r", "all", image_id]);
    cmd
}

/// The image id `euca-register` prints: the second whitespace-separated
/// token of its first line, as in `IMAGE\temi-4A9E1618`.
pub fn parse_registration_id(output: &str) -> Option<&str> {
    output.lines().next()?.split_whitespace().nth(1)
}

/// Runs the stages for one bucket and destination directory.
pub struct Pipeline<'a> {
    pub executor: &'a dyn Executor,
    pub cloud: &'a dyn CloudClient,
    pub bucket: &'a str,
    pub destination: &'a Path,
    pub poll: &'a PollConfig,
}

impl Pipeline<'_> {
    /// Bundle a kernel or ramdisk image, then upload and register it.
    pub async fn bundle_image(&self, target: &BundleTarget) -> Result<String, PipelineError> {
        info!(kind = %target.kind, source = %target.source.display(), "bundling");
        bundle_image_command(target, self.destination)
            .run(self.executor)
            .await?;
        self.upload_and_register(target).await
    }

    /// Bundle the running root filesystem, then upload and register it.
    pub async fn bundle_volume(
        &self,
        target: &BundleTarget,
        options: &VolumeBundleOptions<'_>,
    ) -> Result<String, PipelineError> {
        info!(kind = %target.kind, excludes = %options.exclude.join(","), "bundling");
        bundle_volume_command(&target.name, self.destination, options)
            .run(self.executor)
            .await?;
        self.upload_and_register(target).await
    }

    async fn upload_and_register(&self, target: &BundleTarget) -> Result<String, PipelineError> {
        info!(kind = %target.kind, bucket = self.bucket, "uploading");
        upload_command(self.bucket, self.destination, &target.name)
            .run(self.executor)
            .await?;

        info!(kind = %target.kind, "registering");
        let output = register_command(self.bucket, &target.name)
            .run(self.executor)
            .await?;
        let image_id = parse_registration_id(&output.stdout)
            .ok_or_else(|| PipelineError::UnparseableRegistration {
                output: output.stdout.clone(),
            })?
            .to_owned();
        info!(kind = %target.kind, image = %image_id, "registered");

        Ok(image_id)
    }

    /// Poll until the image is available. `Ok(false)` once the poll ceiling
    /// is passed.
    pub async fn wait_for_available(&self, image_id: &str) -> Result<bool, PipelineError> {
        info!(image = image_id, "waiting for image to become available");
        let interval = self.poll.interval();
        let timeout = self.poll.timeout();
        let mut waited = std::time::Duration::ZERO;

        let mut image = self.cloud.get_image(image_id).await?;
        while !image.is_available() {
            sleep(interval).await;
            waited += interval;
            image = self.cloud.get_image(image_id).await?;
            if waited > timeout {
                warn!(image = image_id, ?waited, "timed out waiting for image to become available");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Restrict launch permission to the owning project. If the image never
    /// becomes available this only logs how to do it by hand.
    pub async fn make_private(&self, image_id: &str) -> Result<(), PipelineError> {
        if !self.wait_for_available(image_id).await? {
            warn!(
                "use '{}' to make the image private manually",
                make_private_command(image_id)
            );
            return Ok(());
        }
        make_private_command(image_id).run(self.executor).await?;
        info!(image = image_id, "made image private");
        Ok(())
    }
}
