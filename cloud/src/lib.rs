mod euca;
mod metadata;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use vmbundle_cmd::CommandError;
use vmbundle_http::HttpError;

pub use crate::euca::{EucaClient, VolumePoll};
pub use crate::metadata::{MetadataClient, DEFAULT_METADATA_URL};

#[derive(Error, Debug)]
pub enum CloudError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("instance metadata is missing '{0}'")]
    MissingMetadata(&'static str),

    #[error("unexpected output from `{command}`: {output:?}")]
    UnexpectedOutput { command: String, output: String },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("instance {0} has no availability zone")]
    NoAvailabilityZone(String),

    #[error("timed out after {waited:?} waiting for volume {id} to become {status}")]
    VolumeTimeout {
        id: String,
        status: &'static str,
        waited: Duration,
    },
}

/// What the instance metadata service says about the machine we run on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceMetadata {
    pub instance_id: String,
    pub kernel_id: Option<String>,
    pub ramdisk_id: Option<String>,
    pub availability_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: String,
    pub state: String,
    pub availability_zone: Option<String>,
}

/// A block volume this process created and attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub id: String,
    pub size_gb: u64,
    /// Device name requested at attach time. The guest may expose the volume
    /// under a different name.
    pub requested_device: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub id: String,
    /// `bucket/name.manifest.xml`
    pub location: String,
    pub state: String,
}

impl Image {
    pub fn is_available(&self) -> bool {
        self.state == "available"
    }
}

/// The cloud control plane, as far as bundling needs it.
#[async_trait]
pub trait CloudClient: Send + Sync {
    async fn instance_metadata(&self) -> Result<InstanceMetadata, CloudError>;

    async fn get_instance(&self, instance_id: &str) -> Result<Instance, CloudError>;

    /// Create a volume in the instance's zone and attach it. Returns once the
    /// volume is attached; on failure after creation the volume is deleted
    /// again before the error is returned.
    async fn create_and_attach_volume(
        &self,
        size_gb: u64,
        instance: &Instance,
        device: &str,
    ) -> Result<Volume, CloudError>;

    async fn detach_and_delete_volume(&self, volume: &Volume) -> Result<(), CloudError>;

    async fn list_images(&self) -> Result<Vec<Image>, CloudError>;

    async fn get_image(&self, image_id: &str) -> Result<Image, CloudError>;

    async fn deregister_image(&self, image_id: &str) -> Result<(), CloudError>;
}
