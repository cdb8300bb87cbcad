use url::Url;
use vmbundle_http::{HttpClient, HttpError, join_url};

use crate::{CloudError, InstanceMetadata};

pub const DEFAULT_METADATA_URL: &str = "http://169.254.169.254/latest/meta-data/";

/// Reads the EC2-style instance metadata service.
#[derive(Debug, Clone)]
pub struct MetadataClient {
    http: HttpClient,
    base: Url,
}

impl MetadataClient {
    pub fn new(http: HttpClient, base: Url) -> Self {
        Self { http, base }
    }

    /// Client for the metadata service rooted at `base`, such as
    /// [`DEFAULT_METADATA_URL`].
    pub fn from_url(base: &str) -> Result<Self, CloudError> {
        let http = HttpClient::new()?;
        let base = Url::parse(base).map_err(|source| HttpError::Url {
            base: base.to_owned(),
            path: String::new(),
            source,
        })?;
        Ok(Self::new(http, base))
    }

    pub async fn fetch(&self) -> Result<InstanceMetadata, CloudError> {
        let instance_id = self
            .get("instance-id")
            .await?
            .ok_or(CloudError::MissingMetadata("instance-id"))?;

        Ok(InstanceMetadata {
            instance_id,
            kernel_id: self.get("kernel-id").await?,
            ramdisk_id: self.get("ramdisk-id").await?,
            availability_zone: self.get("placement/availability-zone").await?,
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CloudError> {
        let url = join_url(&self.base, key)?;
        let value = self.http.get_text(&url).await?;
        Ok(value
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty()))
    }
}
