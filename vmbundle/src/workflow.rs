use thiserror::Error;
use tracing::{info, warn};
use vmbundle_cloud::{CloudClient, CloudError};
use vmbundle_cmd::{CommandError, Executor};
use vmbundle_fs::FsError;

use crate::collision::{CollisionError, CollisionOutcome, resolve_collisions};
use crate::config::{Config, ConfigError};
use crate::host::Host;
use crate::inputs::{BundleInputs, InputDefaults, collect_inputs};
use crate::pipeline::{
    BundleKind, BundleTarget, Pipeline, PipelineError, VolumeBundleOptions, manifest_location,
};
use crate::prompt::{PromptError, Prompter};
use crate::sanitize::{rewrite_fstab, scrub_ssh_artifacts_best_effort};
use crate::space::{DiskSpaceReport, SpaceDecision, decide};
use crate::state::WorkflowState;
use crate::volume::{
    ScratchVolume, VolumeError, choose_mount_point, create_mount_point, provision_scratch_volume,
};

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("vmbundle must be run as root")]
    NotRoot,

    #[error(
        "not enough free disk space to bundle locally ({free_blocks} of {total_blocks} blocks free), and no scratch volume can be attached with --nocloud"
    )]
    InsufficientSpace { free_blocks: u64, total_blocks: u64 },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Collision(#[from] CollisionError),

    #[error(transparent)]
    Volume(#[from] VolumeError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredImages {
    pub kernel_id: Option<String>,
    pub ramdisk_id: Option<String>,
    pub filesystem_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOutcome {
    Completed(RegisteredImages),
    /// The operator kept an already-registered image.
    Declined,
    /// Stopped by Ctrl-C.
    Interrupted,
}

/// One bundling run, from the privilege check to the registered filesystem
/// image. Every acquired resource is recorded in the `WorkflowState` passed
/// to [`Workflow::run`]; releasing them is left to [`crate::state::cleanup`].
pub struct Workflow<'a> {
    pub config: &'a Config,
    /// Whether the instance metadata service and volumes are available.
    pub cloud_mode: bool,
    pub executor: &'a dyn Executor,
    pub cloud: &'a dyn CloudClient,
    pub host: &'a dyn Host,
    pub prompter: &'a mut dyn Prompter,
    /// Value of `EC2_ACCESS_KEY`, if set.
    pub access_key: Option<String>,
}

impl Workflow<'_> {
    pub async fn run(
        &mut self,
        state: &mut WorkflowState,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        if !self.host.is_root() {
            return Err(WorkflowError::NotRoot);
        }

        let config = self.config;
        let default_bucket = config
            .variant
            .bucket_source
            .default_bucket(self.access_key.as_deref());
        let inputs = collect_inputs(
            &mut *self.prompter,
            self.host,
            &InputDefaults {
                bucket: &default_bucket,
                image_name: &config.bundle.default_image_name,
                privacy_prompt: config.variant.privacy_prompt,
            },
        )
        .await?;

        if config.variant.collision_check {
            if self.cloud_mode {
                let locations = candidate_locations(&inputs);
                let outcome =
                    resolve_collisions(self.cloud, &mut *self.prompter, &locations).await?;
                if outcome == CollisionOutcome::Declined {
                    return Ok(WorkflowOutcome::Declined);
                }
            } else {
                warn!("not checking for already-registered images with --nocloud");
            }
        }

        let report = DiskSpaceReport::from(self.host.root_stats()?);
        info!(
            disk_size_gb = report.disk_size_gb(),
            free_blocks = report.free_blocks,
            total_blocks = report.total_blocks,
            "checked root filesystem"
        );

        let metadata = if self.cloud_mode {
            Some(self.cloud.instance_metadata().await?)
        } else {
            None
        };

        let mount_point = choose_mount_point(self.host, &config.bundle.mount_point_prefix).await?;
        create_mount_point(self.executor, state, &mount_point).await?;

        match decide(&report, self.cloud_mode) {
            SpaceDecision::Sufficient => {}
            SpaceDecision::ProvisionVolume { size_gb } => {
                let metadata = metadata.as_ref().ok_or(CloudError::MissingMetadata("instance-id"))?;
                let mut instance = self.cloud.get_instance(&metadata.instance_id).await?;
                if instance.availability_zone.is_none() {
                    instance.availability_zone = metadata.availability_zone.clone();
                }
                info!(
                    size_gb,
                    instance = %instance.id,
                    state = %instance.state,
                    "not enough free space, bundling onto a scratch volume"
                );
                provision_scratch_volume(
                    self.executor,
                    self.cloud,
                    self.host,
                    state,
                    ScratchVolume {
                        size_gb,
                        instance: &instance,
                        requested_device: &config.bundle.scratch_device,
                        filesystem_type: &config.bundle.filesystem_type,
                        mount_point: &mount_point,
                    },
                )
                .await?;
            }
            SpaceDecision::Insufficient => {
                return Err(WorkflowError::InsufficientSpace {
                    free_blocks: report.free_blocks,
                    total_blocks: report.total_blocks,
                });
            }
        }

        let pipeline = Pipeline {
            executor: self.executor,
            cloud: self.cloud,
            bucket: &inputs.bucket,
            destination: &mount_point,
            poll: &config.poll,
        };

        let mut kernel_id = None;
        let mut ramdisk_id = None;
        for (kind, artifact) in [
            (BundleKind::Kernel, &inputs.kernel),
            (BundleKind::Ramdisk, &inputs.ramdisk),
        ] {
            let Some(artifact) = artifact else {
                continue;
            };
            let target = BundleTarget::new(kind, &artifact.path, &artifact.name);
            let image_id = pipeline.bundle_image(&target).await?;
            if inputs.private {
                pipeline.make_private(&image_id).await?;
            }
            match kind {
                BundleKind::Kernel => kernel_id = Some(image_id),
                BundleKind::Ramdisk => ramdisk_id = Some(image_id),
                BundleKind::Filesystem => {}
            }
        }

        scrub_ssh_artifacts_best_effort(self.host).await;
        rewrite_fstab(self.host, &config.bundle.fstab_path, &config.bundle.root_device).await?;

        let options = VolumeBundleOptions {
            kernel_id: kernel_id
                .as_deref()
                .or_else(|| metadata.as_ref().and_then(|m| m.kernel_id.as_deref())),
            ramdisk_id: ramdisk_id
                .as_deref()
                .or_else(|| metadata.as_ref().and_then(|m| m.ramdisk_id.as_deref())),
            arch: &config.bundle.arch,
            size_mb: report.disk_size_mb(),
            exclude: &config.bundle.exclude,
        };
        let target = BundleTarget::filesystem(&inputs.image_name);
        let filesystem_id = pipeline.bundle_volume(&target, &options).await?;

        if inputs.private {
            pipeline.make_private(&filesystem_id).await?;
        } else {
            pipeline.wait_for_available(&filesystem_id).await?;
        }

        Ok(WorkflowOutcome::Completed(RegisteredImages {
            kernel_id,
            ramdisk_id,
            filesystem_id,
        }))
    }
}

/// Manifest locations this run is going to register.
fn candidate_locations(inputs: &BundleInputs) -> Vec<String> {
    std::iter::once(inputs.image_name.as_str())
        .chain(inputs.kernel.iter().map(|kernel| kernel.name.as_str()))
        .chain(inputs.ramdisk.iter().map(|ramdisk| ramdisk.name.as_str()))
        .map(|name| manifest_location(&inputs.bucket, name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::cleanup;
    use crate::testing::{FakeCloud, FakeHost, ScriptedPrompter, TOTAL_BLOCKS};
    use vmbundle_cloud::Image;
    use vmbundle_cmd::CommandOutput;
    use vmbundle_cmd::fake::FakeExecutor;

    const FSTAB: &str = "UUID=1d3c-88ab / ext3 errors=remount-ro 0 1\n";
    const EXCLUDES: &str =
        "/mnt,/tmp,/root/.ssh,/home/ubuntu/.ssh,/etc/udev/rules.d,/var/lib/dhclient,/var/lib/dhcp3";

    fn registering(ids: &[&str]) -> FakeExecutor {
        let executor = FakeExecutor::new();
        for id in ids {
            executor.respond_stdout("euca-register", &format!("IMAGE\t{id}\n"));
        }
        executor
    }

    async fn run(
        config: &Config,
        cloud_mode: bool,
        executor: &FakeExecutor,
        cloud: &FakeCloud,
        host: &FakeHost,
        prompter: &mut ScriptedPrompter,
        state: &mut WorkflowState,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        Workflow {
            config,
            cloud_mode,
            executor,
            cloud,
            host,
            prompter,
            access_key: None,
        }
        .run(state)
        .await
    }

    #[tokio::test]
    async fn local_bundle_with_defaults() {
        let config = Config::default();
        let executor = registering(&["emi-4A9E1618"]);
        let cloud = FakeCloud::new();
        let host = FakeHost::new().with_file("/etc/fstab", FSTAB);
        let mut prompter = ScriptedPrompter::new(["", "", "", "", ""]);
        let mut state = WorkflowState::new();

        let outcome = run(
            &config,
            false,
            &executor,
            &cloud,
            &host,
            &mut prompter,
            &mut state,
        )
        .await
        .unwrap();

        assert_eq!(
            outcome,
            WorkflowOutcome::Completed(RegisteredImages {
                kernel_id: None,
                ramdisk_id: None,
                filesystem_id: "emi-4A9E1618".into(),
            })
        );
        assert_eq!(
            executor.call_lines(),
            [
                "mkdir -p /mnt/vmbundle".to_owned(),
                format!(
                    "euca-bundle-vol --no-inherit -d /mnt/vmbundle -r x86_64 -p filesystem -s 10240 -e {EXCLUDES}"
                ),
                "euca-upload-bundle -b vmbundle -m /mnt/vmbundle/filesystem.manifest.xml".to_owned(),
                "euca-register vmbundle/filesystem.manifest.xml".to_owned(),
                "euca-modify-image-attribute -l -r all emi-4A9E1618".to_owned(),
            ]
        );
        assert_eq!(cloud.calls(), ["get_image emi-4A9E1618"]);
        assert_eq!(
            host.file("/etc/fstab").as_deref(),
            Some("/dev/vda / ext3 errors=remount-ro 0 1\n")
        );
        assert!(state.volume().is_none());

        let report = cleanup(state, &executor, &cloud).await;
        assert!(report.is_clean());
        assert_eq!(executor.call_lines().last().unwrap(), "rm -rf /mnt/vmbundle");
    }

    #[tokio::test]
    async fn cloud_bundle_onto_scratch_volume() {
        let config = Config::default();
        let executor = registering(&["emi-4A9E1618"]);
        let cloud = FakeCloud::new();
        let host = FakeHost::new()
            .with_free_blocks(TOTAL_BLOCKS / 2)
            .with_device_snapshots(&[&["vda"], &["vda", "vdb"]])
            .with_file("/etc/fstab", FSTAB);
        let mut prompter = ScriptedPrompter::new(["research", "", "", "", "n"]);
        let mut state = WorkflowState::new();

        run(
            &config,
            true,
            &executor,
            &cloud,
            &host,
            &mut prompter,
            &mut state,
        )
        .await
        .unwrap();

        assert_eq!(
            cloud.calls(),
            [
                "instance_metadata",
                "get_instance i-4E2B0812",
                "create_and_attach_volume 20 i-4E2B0812 /dev/vdzz",
                "get_image emi-4A9E1618",
            ]
        );
        let lines = executor.call_lines();
        assert_eq!(
            lines[..3],
            [
                "mkdir -p /mnt/vmbundle",
                "mkfs -t ext3 /dev/vdb",
                "mount /dev/vdb /mnt/vmbundle"
            ]
        );
        assert!(lines[3].starts_with(
            "euca-bundle-vol --no-inherit --kernel eki-7A1B3C5D --ramdisk eri-2F4E6A8C -d /mnt/vmbundle"
        ));
        assert!(!lines.iter().any(|line| line.starts_with("euca-modify-image-attribute")));
        assert!(state.is_volume_mounted());

        let report = cleanup(state, &executor, &cloud).await;
        assert!(report.is_clean());
        assert_eq!(
            executor.call_lines()[lines.len()..],
            ["umount /mnt/vmbundle", "rm -rf /mnt/vmbundle"]
        );
        assert_eq!(
            cloud.calls().last().unwrap(),
            "detach_and_delete_volume vol-3A0B4F2C"
        );
    }

    #[tokio::test]
    async fn local_bundle_without_room_fails_after_creating_mount_point() {
        let config = Config::default();
        let executor = FakeExecutor::new();
        let cloud = FakeCloud::new();
        let host = FakeHost::new()
            .with_free_blocks(TOTAL_BLOCKS / 2)
            .with_path("/mnt/vmbundle");
        let mut prompter = ScriptedPrompter::new(["", "", "", "", ""]);
        let mut state = WorkflowState::new();

        let err = run(
            &config,
            false,
            &executor,
            &cloud,
            &host,
            &mut prompter,
            &mut state,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            WorkflowError::InsufficientSpace {
                total_blocks: TOTAL_BLOCKS,
                ..
            }
        ));
        assert_eq!(executor.call_lines(), ["mkdir -p /mnt/vmbundle0"]);
        assert!(cloud.calls().is_empty());

        cleanup(state, &executor, &cloud).await;
        assert_eq!(executor.call_lines().last().unwrap(), "rm -rf /mnt/vmbundle0");
    }

    #[tokio::test]
    async fn refuses_to_run_unprivileged() {
        let config = Config::default();
        let executor = FakeExecutor::new();
        let cloud = FakeCloud::new();
        let host = FakeHost::new().not_root();
        let mut prompter = ScriptedPrompter::new::<[&str; 0]>([]);
        let mut state = WorkflowState::new();

        let err = run(
            &config,
            true,
            &executor,
            &cloud,
            &host,
            &mut prompter,
            &mut state,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, WorkflowError::NotRoot));
        assert!(prompter.questions().is_empty());
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn declined_overwrite_stops_before_any_work() {
        let mut config = Config::default();
        config.variant.collision_check = true;
        let executor = FakeExecutor::new();
        let cloud = FakeCloud::new().with_images(vec![Image {
            id: "emi-0C9D2A31".into(),
            location: "vmbundle/filesystem.manifest.xml".into(),
            state: "available".into(),
        }]);
        let host = FakeHost::new();
        let mut prompter = ScriptedPrompter::new(["", "", "", "", "", ""]);
        let mut state = WorkflowState::new();

        let outcome = run(
            &config,
            true,
            &executor,
            &cloud,
            &host,
            &mut prompter,
            &mut state,
        )
        .await
        .unwrap();

        assert_eq!(outcome, WorkflowOutcome::Declined);
        assert_eq!(cloud.calls(), ["list_images"]);
        assert!(executor.calls().is_empty());
        assert!(state.mount_point().is_none());
    }

    #[tokio::test]
    async fn custom_kernel_is_registered_and_used() {
        let config = Config::default();
        let executor = registering(&["eki-B2D0139E", "emi-4A9E1618"]);
        let cloud = FakeCloud::new();
        let host = FakeHost::new()
            .with_path("/boot/vmlinuz-custom")
            .with_file("/etc/fstab", FSTAB);
        let mut prompter =
            ScriptedPrompter::new(["research", "lucid", "/boot/vmlinuz-custom", "", "", "y"]);
        let mut state = WorkflowState::new();

        let outcome = run(
            &config,
            false,
            &executor,
            &cloud,
            &host,
            &mut prompter,
            &mut state,
        )
        .await
        .unwrap();

        assert_eq!(
            outcome,
            WorkflowOutcome::Completed(RegisteredImages {
                kernel_id: Some("eki-B2D0139E".into()),
                ramdisk_id: None,
                filesystem_id: "emi-4A9E1618".into(),
            })
        );
        let lines = executor.call_lines();
        assert_eq!(
            lines[1],
            "euca-bundle-image -i /boot/vmlinuz-custom -d /mnt/vmbundle --kernel true -p vmlinuz-custom"
        );
        assert!(lines.contains(&"euca-modify-image-attribute -l -r all eki-B2D0139E".to_owned()));
        assert!(lines.iter().any(|line| {
            line.starts_with("euca-bundle-vol --no-inherit --kernel eki-B2D0139E -d")
        }));
        assert_eq!(
            lines.last().unwrap(),
            "euca-modify-image-attribute -l -r all emi-4A9E1618"
        );
    }

    #[tokio::test]
    async fn failed_bundle_is_fatal() {
        let config = Config::default();
        let executor = FakeExecutor::new();
        executor.respond("euca-bundle-vol", CommandOutput::failed(1, "no space left"));
        let cloud = FakeCloud::new();
        let host = FakeHost::new().with_file("/etc/fstab", FSTAB);
        let mut prompter = ScriptedPrompter::new(["", "", "", "", ""]);
        let mut state = WorkflowState::new();

        let err = run(
            &config,
            false,
            &executor,
            &cloud,
            &host,
            &mut prompter,
            &mut state,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            WorkflowError::Pipeline(PipelineError::Command(CommandError::Failure { .. }))
        ));
        assert_eq!(state.mount_point(), Some(std::path::Path::new("/mnt/vmbundle")));
    }

    #[tokio::test]
    async fn cloud_bundle_without_metadata_images() {
        let config = Config::default();
        let executor = registering(&["emi-4A9E1618"]);
        let cloud = FakeCloud::new().with_metadata(vmbundle_cloud::InstanceMetadata {
            instance_id: "i-4E2B0812".into(),
            ..Default::default()
        });
        let host = FakeHost::new().with_file("/etc/fstab", FSTAB);
        let mut prompter = ScriptedPrompter::new(["", "", "", "", "n"]);
        let mut state = WorkflowState::new();

        run(
            &config,
            true,
            &executor,
            &cloud,
            &host,
            &mut prompter,
            &mut state,
        )
        .await
        .unwrap();

        assert_eq!(cloud.calls(), ["instance_metadata", "get_image emi-4A9E1618"]);
        assert!(
            executor.call_lines()[1].starts_with("euca-bundle-vol --no-inherit -d /mnt/vmbundle")
        );
    }

    #[test]
    fn candidate_locations_cover_custom_images() {
        let inputs = BundleInputs {
            bucket: "research".into(),
            image_name: "lucid".into(),
            kernel: Some(crate::inputs::Artifact {
                path: "/boot/vmlinuz".into(),
                name: "vmlinuz".into(),
            }),
            ramdisk: None,
            private: false,
        };
        assert_eq!(
            candidate_locations(&inputs),
            ["research/lucid.manifest.xml", "research/vmlinuz.manifest.xml"]
        );
    }
}
