use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs::read_to_string;

pub const DEFAULT_BUCKET_NAME: &str = "vmbundle";
pub const DEFAULT_IMAGE_NAME: &str = "filesystem";
pub const DEFAULT_MOUNT_POINT_PREFIX: &str = "/mnt/vmbundle";
pub const ACCESS_KEY_VAR: &str = "EC2_ACCESS_KEY";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub variant: VariantConfig,
    pub bundle: BundleConfig,
    pub poll: PollConfig,
    pub cloud: CloudConfig,
}

/// The behaviors that differ between bundling setups.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VariantConfig {
    /// Look for already-registered images under the same manifest locations.
    pub collision_check: bool,
    /// Ask whether registered images should be private.
    pub privacy_prompt: bool,
    pub bucket_source: BucketSource,
}

impl Default for VariantConfig {
    fn default() -> Self {
        Self {
            collision_check: false,
            privacy_prompt: true,
            bucket_source: BucketSource::AccessKey,
        }
    }
}

/// Where the default bucket name comes from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BucketSource {
    /// The project part of `EC2_ACCESS_KEY` (`<key>:<project>`).
    AccessKey,
    Fixed(String),
}

impl BucketSource {
    pub fn default_bucket(&self, access_key: Option<&str>) -> String {
        match self {
            BucketSource::Fixed(name) => name.clone(),
            BucketSource::AccessKey => access_key
                .and_then(|key| key.split(':').nth(1))
                .map(str::trim)
                .filter(|project| !project.is_empty())
                .unwrap_or(DEFAULT_BUCKET_NAME)
                .to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BundleConfig {
    pub mount_point_prefix: PathBuf,
    pub default_image_name: String,
    pub arch: String,
    pub filesystem_type: String,
    /// Device the bundled image boots its root filesystem from.
    pub root_device: String,
    /// Device name requested when attaching the scratch volume.
    pub scratch_device: String,
    pub fstab_path: PathBuf,
    pub exclude: Vec<String>,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            mount_point_prefix: PathBuf::from(DEFAULT_MOUNT_POINT_PREFIX),
            default_image_name: DEFAULT_IMAGE_NAME.to_owned(),
            arch: "x86_64".to_owned(),
            filesystem_type: "ext3".to_owned(),
            root_device: "/dev/vda".to_owned(),
            scratch_device: "/dev/vdzz".to_owned(),
            fstab_path: PathBuf::from("/etc/fstab"),
            exclude: [
                "/mnt",
                "/tmp",
                "/root/.ssh",
                "/home/ubuntu/.ssh",
                "/etc/udev/rules.d",
                "/var/lib/dhclient",
                "/var/lib/dhcp3",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

/// Waiting for a registered image to become available.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollConfig {
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            timeout_secs: 1800,
        }
    }
}

impl PollConfig {
    /// Never zero, so a poll always makes progress towards the timeout.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CloudConfig {
    pub metadata_url: String,
    pub volume_poll_interval_secs: u64,
    pub volume_poll_timeout_secs: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            metadata_url: vmbundle_cloud::DEFAULT_METADATA_URL.to_owned(),
            volume_poll_interval_secs: 5,
            volume_poll_timeout_secs: 600,
        }
    }
}

impl Config {
    /// Load from `path`, or the built-in defaults when no path is given.
    pub async fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Config::default());
        };
        let string = read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_owned(),
                source,
            })?;
        Self::parse(&string).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    pub fn parse(string: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(string)
    }
}
