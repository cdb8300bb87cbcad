mod parse;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};
use vmbundle_cmd::{Command, Executor};

use crate::{
    CloudClient, CloudError, Image, Instance, InstanceMetadata, MetadataClient, Volume,
};

use self::parse::{parse_images, parse_instances, parse_volumes};

/// How volume status changes are waited for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumePoll {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for VolumePoll {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(600),
        }
    }
}

/// [`CloudClient`] backed by the euca2ools command line tools, with instance
/// metadata read over HTTP.
pub struct EucaClient {
    executor: Arc<dyn Executor>,
    metadata: MetadataClient,
    poll: VolumePoll,
}

impl EucaClient {
    pub fn new(executor: Arc<dyn Executor>, metadata: MetadataClient, poll: VolumePoll) -> Self {
        Self {
            executor,
            metadata,
            poll,
        }
    }

    async fn volume_status(&self, volume_id: &str) -> Result<String, CloudError> {
        let mut cmd = Command::new("euca-describe-volumes");
        cmd.arg(volume_id);
        let output = cmd.run(self.executor.as_ref()).await?;
        parse_volumes(&output.stdout)
            .into_iter()
            .find(|(id, _)| id == volume_id)
            .map(|(_, status)| status)
            .ok_or_else(|| CloudError::NotFound {
                kind: "volume",
                id: volume_id.to_owned(),
            })
    }

    async fn wait_for_volume(
        &self,
        volume_id: &str,
        status: &'static str,
    ) -> Result<(), CloudError> {
        let start = Instant::now();
        loop {
            let current = self.volume_status(volume_id).await?;
            debug!(volume = volume_id, %current, wanted = status, "volume status");
            if current == status {
                return Ok(());
            }

            let waited = start.elapsed();
            if waited >= self.poll.timeout {
                return Err(CloudError::VolumeTimeout {
                    id: volume_id.to_owned(),
                    status,
                    waited,
                });
            }
            sleep(self.poll.interval).await;
        }
    }

    async fn attach_volume(
        &self,
        volume_id: &str,
        instance_id: &str,
        device: &str,
    ) -> Result<(), CloudError> {
        self.wait_for_volume(volume_id, "available").await?;

        let mut cmd = Command::new("euca-attach-volume");
        cmd.args(["-i", instance_id])
            .args(["-d", device])
            .arg(volume_id);
        cmd.run(self.executor.as_ref()).await?;

        self.wait_for_volume(volume_id, "in-use").await
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<(), CloudError> {
        let mut cmd = Command::new("euca-delete-volume");
        cmd.arg(volume_id);
        cmd.run(self.executor.as_ref()).await?;
        Ok(())
    }

    async fn describe_images(&self, image_id: Option<&str>) -> Result<Vec<Image>, CloudError> {
        let mut cmd = Command::new("euca-describe-images");
        if let Some(id) = image_id {
            cmd.arg(id);
        }
        let output = cmd.run(self.executor.as_ref()).await?;
        Ok(parse_images(&output.stdout))
    }
}

#[async_trait]
impl CloudClient for EucaClient {
    async fn instance_metadata(&self) -> Result<InstanceMetadata, CloudError> {
        self.metadata.fetch().await
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Instance, CloudError> {
        let mut cmd = Command::new("euca-describe-instances");
        cmd.arg(instance_id);
        let output = cmd.run(self.executor.as_ref()).await?;
        parse_instances(&output.stdout)
            .into_iter()
            .find(|instance| instance.id == instance_id)
            .ok_or_else(|| CloudError::NotFound {
                kind: "instance",
                id: instance_id.to_owned(),
            })
    }

    async fn create_and_attach_volume(
        &self,
        size_gb: u64,
        instance: &Instance,
        device: &str,
    ) -> Result<Volume, CloudError> {
        let zone = instance
            .availability_zone
            .as_deref()
            .ok_or_else(|| CloudError::NoAvailabilityZone(instance.id.clone()))?;

        let mut cmd = Command::new("euca-create-volume");
        cmd.args(["-s", size_gb.to_string().as_str()]).args(["-z", zone]);
        let output = cmd.run(self.executor.as_ref()).await?;
        let volume_id = parse_volumes(&output.stdout)
            .into_iter()
            .next()
            .map(|(id, _)| id)
            .ok_or_else(|| CloudError::UnexpectedOutput {
                command: cmd.to_string(),
                output: output.stdout.clone(),
            })?;
        info!(volume = %volume_id, size_gb, zone, "created volume");

        if let Err(error) = self.attach_volume(&volume_id, &instance.id, device).await {
            warn!(volume = %volume_id, "attach failed, deleting volume");
            if let Err(delete_error) = self.delete_volume(&volume_id).await {
                warn!(volume = %volume_id, "failed to delete volume: {delete_error}");
            }
            return Err(error);
        }
        info!(volume = %volume_id, instance = %instance.id, device, "attached volume");

        Ok(Volume {
            id: volume_id,
            size_gb,
            requested_device: device.to_owned(),
        })
    }

    async fn detach_and_delete_volume(&self, volume: &Volume) -> Result<(), CloudError> {
        let mut cmd = Command::new("euca-detach-volume");
        cmd.arg(&volume.id);
        cmd.run(self.executor.as_ref()).await?;

        self.wait_for_volume(&volume.id, "available").await?;
        self.delete_volume(&volume.id).await?;
        info!(volume = %volume.id, size_gb = volume.size_gb, "deleted volume");
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<Image>, CloudError> {
        self.describe_images(None).await
    }

    async fn get_image(&self, image_id: &str) -> Result<Image, CloudError> {
        self.describe_images(Some(image_id))
            .await?
            .into_iter()
            .find(|image| image.id == image_id)
            .ok_or_else(|| CloudError::NotFound {
                kind: "image",
                id: image_id.to_owned(),
            })
    }

    async fn deregister_image(&self, image_id: &str) -> Result<(), CloudError> {
        let mut cmd = Command::new("euca-deregister");
        cmd.arg(image_id);
        cmd.run(self.executor.as_ref()).await?;
        info!(image = image_id, "deregistered image");
        Ok(())
    }
}
