use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::Path;
use vmbundle_fs::{self as fs, FilesystemStats, FsError};

use crate::devices::is_disk_name;

/// The machine being bundled: privileges, local files and block devices.
#[async_trait]
pub trait Host: Send + Sync {
    fn is_root(&self) -> bool;

    fn root_stats(&self) -> Result<FilesystemStats, FsError>;

    async fn path_exists(&self, path: &Path) -> Result<bool, FsError>;

    /// Names of the whole-disk virtio devices under `/dev`.
    async fn block_devices(&self) -> Result<BTreeSet<String>, FsError>;

    async fn read_file(&self, path: &Path) -> Result<String, FsError>;

    async fn write_file(&self, path: &Path, data: &[u8]) -> Result<(), FsError>;

    /// Succeeds when `path` does not exist.
    async fn remove_file_if_exists(&self, path: &Path) -> Result<(), FsError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalHost;

#[async_trait]
impl Host for LocalHost {
    fn is_root(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }

    fn root_stats(&self) -> Result<FilesystemStats, FsError> {
        fs::filesystem_stats("/")
    }

    async fn path_exists(&self, path: &Path) -> Result<bool, FsError> {
        fs::path_exists(path).await
    }

    async fn block_devices(&self) -> Result<BTreeSet<String>, FsError> {
        Ok(fs::read_dir_names("/dev")
            .await?
            .into_iter()
            .filter(|name| is_disk_name(name))
            .collect())
    }

    async fn read_file(&self, path: &Path) -> Result<String, FsError> {
        fs::read_file_to_string(path).await
    }

    async fn write_file(&self, path: &Path, data: &[u8]) -> Result<(), FsError> {
        fs::write_file(path, data).await
    }

    async fn remove_file_if_exists(&self, path: &Path) -> Result<(), FsError> {
        fs::remove_file_if_exists(path).await
    }
}
