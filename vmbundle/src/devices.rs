use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DeviceError {
    #[error("error attaching volume: expected exactly one new block device, found {found:?}")]
    AmbiguousAttachment { found: Vec<String> },
}

/// Whole virtio disks: `vd` followed by one or two lowercase letters.
/// Partitions (`vda1`) do not count.
pub fn is_disk_name(name: &str) -> bool {
    let Some(suffix) = name.strip_prefix("vd") else {
        return false;
    };
    (1..=2).contains(&suffix.len()) && suffix.bytes().all(|b| b.is_ascii_lowercase())
}

/// The one device name present in `after` but not in `before`.
pub fn new_device(
    before: &BTreeSet<String>,
    after: &BTreeSet<String>,
) -> Result<String, DeviceError> {
    let mut found: Vec<String> = after.difference(before).cloned().collect();
    if found.len() != 1 {
        return Err(DeviceError::AmbiguousAttachment { found });
    }
    Ok(found.remove(0))
}
