use vmbundle_fs::FilesystemStats;

const GIB: u64 = 1024 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;

/// Size and free space of the root filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSpaceReport {
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub block_size: u64,
}

impl From<FilesystemStats> for DiskSpaceReport {
    fn from(stats: FilesystemStats) -> Self {
        Self {
            total_blocks: stats.total_blocks,
            free_blocks: stats.free_blocks,
            block_size: stats.fragment_size,
        }
    }
}

impl DiskSpaceReport {
    pub fn size_bytes(&self) -> u64 {
        self.total_blocks.saturating_mul(self.block_size)
    }

    /// Disk size in whole GiB, rounded to nearest.
    pub fn disk_size_gb(&self) -> u64 {
        round_div(self.size_bytes(), GIB)
    }

    /// Disk size in whole MiB, rounded to nearest.
    pub fn disk_size_mb(&self) -> u64 {
        round_div(self.size_bytes(), MIB)
    }

    /// A bundle can go to local disk only while more than two thirds of it
    /// are free.
    pub fn has_room_to_bundle(&self) -> bool {
        u128::from(self.free_blocks) * 3 > u128::from(self.total_blocks) * 2
    }
}

fn round_div(value: u64, unit: u64) -> u64 {
    value.saturating_add(unit / 2) / unit
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceDecision {
    Sufficient,
    /// Attach a scratch volume of this many GiB.
    ProvisionVolume { size_gb: u64 },
    Insufficient,
}

pub fn decide(report: &DiskSpaceReport, cloud: bool) -> SpaceDecision {
    if report.has_room_to_bundle() {
        SpaceDecision::Sufficient
    } else if cloud {
        SpaceDecision::ProvisionVolume {
            size_gb: report.disk_size_gb() * 2,
        }
    } else {
        SpaceDecision::Insufficient
    }
}
