//! In-memory stand-ins for the cloud, the host machine and the operator.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use vmbundle_cloud::{CloudClient, CloudError, Image, Instance, InstanceMetadata, Volume};
use vmbundle_fs::{FilesystemStats, FsError};

use crate::prompt::{PromptError, Prompter};

pub const BLOCK_SIZE: u64 = 4096;
/// 10 GiB of 4 KiB blocks.
pub const TOTAL_BLOCKS: u64 = 2_621_440;

#[derive(Debug)]
pub struct FakeHost {
    root: bool,
    stats: FilesystemStats,
    paths: BTreeSet<PathBuf>,
    files: Mutex<BTreeMap<PathBuf, String>>,
    read_only: BTreeSet<PathBuf>,
    device_snapshots: Mutex<VecDeque<BTreeSet<String>>>,
}

impl FakeHost {
    /// Root, with a 10 GiB root filesystem that is 80% free and one disk.
    pub fn new() -> Self {
        Self {
            root: true,
            stats: FilesystemStats {
                total_blocks: TOTAL_BLOCKS,
                free_blocks: TOTAL_BLOCKS / 10 * 8,
                fragment_size: BLOCK_SIZE,
            },
            paths: BTreeSet::new(),
            files: Mutex::new(BTreeMap::new()),
            read_only: BTreeSet::new(),
            device_snapshots: Mutex::new(VecDeque::from([set(&["vda"])])),
        }
    }

    pub fn not_root(mut self) -> Self {
        self.root = false;
        self
    }

    pub fn with_free_blocks(mut self, free_blocks: u64) -> Self {
        self.stats.free_blocks = free_blocks;
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.insert(path.into());
        self
    }

    pub fn with_file(self, path: impl Into<PathBuf>, contents: &str) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(path.into(), contents.to_owned());
        self
    }

    /// Writes to `path` fail with permission denied.
    pub fn with_read_only(mut self, path: impl Into<PathBuf>) -> Self {
        self.read_only.insert(path.into());
        self
    }

    /// Successive answers to `block_devices`; the last one repeats.
    pub fn with_device_snapshots(self, snapshots: &[&[&str]]) -> Self {
        *self.device_snapshots.lock().unwrap() =
            snapshots.iter().map(|names| set(names)).collect();
        self
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files.lock().unwrap().get(path.as_ref()).cloned()
    }
}

fn set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn not_found() -> io::Error {
    io::Error::from(io::ErrorKind::NotFound)
}

#[async_trait]
impl crate::host::Host for FakeHost {
    fn is_root(&self) -> bool {
        self.root
    }

    fn root_stats(&self) -> Result<FilesystemStats, FsError> {
        Ok(self.stats)
    }

    async fn path_exists(&self, path: &Path) -> Result<bool, FsError> {
        Ok(self.paths.contains(path) || self.files.lock().unwrap().contains_key(path))
    }

    async fn block_devices(&self) -> Result<BTreeSet<String>, FsError> {
        let mut snapshots = self.device_snapshots.lock().unwrap();
        let devices = if snapshots.len() > 1 {
            snapshots.pop_front()
        } else {
            snapshots.front().cloned()
        };
        Ok(devices.unwrap_or_default())
    }

    async fn read_file(&self, path: &Path) -> Result<String, FsError> {
        self.file(path).ok_or_else(|| FsError::ReadFile {
            path: path.to_path_buf(),
            source: not_found(),
        })
    }

    async fn write_file(&self, path: &Path, data: &[u8]) -> Result<(), FsError> {
        if self.read_only.contains(path) {
            return Err(FsError::WriteFile {
                path: path.to_path_buf(),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            });
        }
        self.files.lock().unwrap().insert(
            path.to_path_buf(),
            String::from_utf8_lossy(data).into_owned(),
        );
        Ok(())
    }

    async fn remove_file_if_exists(&self, path: &Path) -> Result<(), FsError> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }
}

/// Records every call as a line such as `get_image emi-4A9E1618`.
#[derive(Debug)]
pub struct FakeCloud {
    calls: Mutex<Vec<String>>,
    metadata: InstanceMetadata,
    images: Vec<Image>,
    image_states: Mutex<HashMap<String, VecDeque<String>>>,
    fail_volume_delete: bool,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            metadata: InstanceMetadata {
                instance_id: "i-4E2B0812".into(),
                kernel_id: Some("eki-7A1B3C5D".into()),
                ramdisk_id: Some("eri-2F4E6A8C".into()),
                availability_zone: Some("cluster01".into()),
            },
            images: Vec::new(),
            image_states: Mutex::new(HashMap::new()),
            fail_volume_delete: false,
        }
    }

    pub fn instance() -> Instance {
        Instance {
            id: "i-4E2B0812".into(),
            state: "running".into(),
            availability_zone: Some("cluster01".into()),
        }
    }

    pub fn with_metadata(mut self, metadata: InstanceMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_images(mut self, images: Vec<Image>) -> Self {
        self.images = images;
        self
    }

    /// Successive states `get_image` reports for `image_id`; the last one
    /// repeats. Unscripted images are available straight away.
    pub fn with_image_states(self, image_id: &str, states: &[&str]) -> Self {
        self.image_states.lock().unwrap().insert(
            image_id.to_owned(),
            states.iter().map(|state| state.to_string()).collect(),
        );
        self
    }

    pub fn failing_volume_delete(mut self) -> Self {
        self.fail_volume_delete = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl CloudClient for FakeCloud {
    async fn instance_metadata(&self) -> Result<InstanceMetadata, CloudError> {
        self.record("instance_metadata".into());
        Ok(self.metadata.clone())
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Instance, CloudError> {
        self.record(format!("get_instance {instance_id}"));
        Ok(Instance {
            id: instance_id.to_owned(),
            ..Self::instance()
        })
    }

    async fn create_and_attach_volume(
        &self,
        size_gb: u64,
        instance: &Instance,
        device: &str,
    ) -> Result<Volume, CloudError> {
        self.record(format!(
            "create_and_attach_volume {size_gb} {} {device}",
            instance.id
        ));
        Ok(Volume {
            id: "vol-3A0B4F2C".into(),
            size_gb,
            requested_device: device.to_owned(),
        })
    }

    async fn detach_and_delete_volume(&self, volume: &Volume) -> Result<(), CloudError> {
        self.record(format!("detach_and_delete_volume {}", volume.id));
        if self.fail_volume_delete {
            return Err(CloudError::VolumeTimeout {
                id: volume.id.clone(),
                status: "available",
                waited: std::time::Duration::from_secs(600),
            });
        }
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<Image>, CloudError> {
        self.record("list_images".into());
        Ok(self.images.clone())
    }

    async fn get_image(&self, image_id: &str) -> Result<Image, CloudError> {
        self.record(format!("get_image {image_id}"));
        let mut states = self.image_states.lock().unwrap();
        let state = match states.get_mut(image_id) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        Ok(Image {
            id: image_id.to_owned(),
            location: String::new(),
            state: state.unwrap_or_else(|| "available".into()),
        })
    }

    async fn deregister_image(&self, image_id: &str) -> Result<(), CloudError> {
        self.record(format!("deregister_image {image_id}"));
        Ok(())
    }
}

/// Answers questions from a fixed script; running out of answers behaves
/// like closed input.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
    questions: Vec<String>,
    told: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new<I>(answers: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn questions(&self) -> &[String] {
        &self.questions
    }

    pub fn told(&self) -> &[String] {
        &self.told
    }
}

#[async_trait]
impl Prompter for ScriptedPrompter {
    async fn ask(&mut self, question: &str) -> Result<String, PromptError> {
        self.questions.push(question.to_owned());
        self.answers
            .pop_front()
            .map(|answer| answer.trim().to_owned())
            .ok_or_else(|| PromptError::EndOfInput {
                question: question.to_owned(),
            })
    }

    async fn tell(&mut self, message: &str) -> Result<(), PromptError> {
        self.told.push(message.to_owned());
        Ok(())
    }
}
