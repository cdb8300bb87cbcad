use std::path::Path;
use tracing::{debug, info};
use vmbundle_fs::FsError;

use crate::host::Host;

pub const NX_KNOWN_HOSTS: &str = "/usr/NX/home/nx/.ssh/known_hosts";
pub const NX_DEFAULT_PUBLIC_KEY: &str = "/usr/NX/home/nx/.ssh/default.id_dsa.pub";
pub const NX_AUTHORIZED_KEYS: &str = "/usr/NX/home/nx/.ssh/authorized_keys2";

/// Drop the NX server's SSH host and key files so the image does not carry
/// them. A missing `known_hosts` is fine. Stops at the first failure;
/// callers treat that as non-fatal.
pub async fn scrub_ssh_artifacts(host: &dyn Host) -> Result<(), FsError> {
    host.remove_file_if_exists(Path::new(NX_KNOWN_HOSTS)).await?;
    host.write_file(Path::new(NX_DEFAULT_PUBLIC_KEY), b"").await?;
    host.write_file(Path::new(NX_AUTHORIZED_KEYS), b"").await?;
    Ok(())
}

/// Like [`scrub_ssh_artifacts`], logging instead of returning the failure.
pub async fn scrub_ssh_artifacts_best_effort(host: &dyn Host) {
    if let Err(error) = scrub_ssh_artifacts(host).await {
        debug!("skipping ssh artifact scrub: {error}");
    }
}

/// Point the `/` entry of an fstab at `device`.
pub fn rewrite_root_entry(fstab: &str, device: &str) -> String {
    let mut rewritten = String::with_capacity(fstab.len());
    for line in fstab.split_inclusive('\n') {
        rewritten.push_str(&rewrite_line(line, device));
    }
    rewritten
}

fn rewrite_line(line: &str, device: &str) -> String {
    if line.trim_start().starts_with('#') {
        return line.to_owned();
    }
    let mut fields = line.split_whitespace();
    let (Some(source), Some("/")) = (fields.next(), fields.next()) else {
        return line.to_owned();
    };
    let start = line.len() - line.trim_start().len();
    format!("{}{device}{}", &line[..start], &line[start + source.len()..])
}

pub async fn rewrite_fstab(host: &dyn Host, path: &Path, device: &str) -> Result<(), FsError> {
    info!(fstab = %path.display(), device, "pointing root filesystem at boot device");
    let fstab = host.read_file(path).await?;
    host.write_file(path, rewrite_root_entry(&fstab, device).as_bytes())
        .await
}
