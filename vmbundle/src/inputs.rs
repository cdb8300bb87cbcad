use std::path::{Path, PathBuf};

use crate::host::Host;
use crate::prompt::{PromptError, Prompter, ask_existing_path, ask_with_default, ask_yes_no};

/// A custom kernel or ramdisk supplied by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleInputs {
    pub bucket: String,
    pub image_name: String,
    pub kernel: Option<Artifact>,
    pub ramdisk: Option<Artifact>,
    pub private: bool,
}

pub struct InputDefaults<'a> {
    pub bucket: &'a str,
    pub image_name: &'a str,
    pub privacy_prompt: bool,
}

pub async fn collect_inputs(
    prompter: &mut dyn Prompter,
    host: &dyn Host,
    defaults: &InputDefaults<'_>,
) -> Result<BundleInputs, PromptError> {
    let bucket = ask_with_default(prompter, "Bucket name", defaults.bucket).await?;
    let image_name = ask_with_default(prompter, "Image name", defaults.image_name).await?;

    let kernel = ask_artifact(prompter, host, "Kernel", "kernel").await?;
    let ramdisk = ask_artifact(prompter, host, "Ramdisk", "ramdisk").await?;

    let private = if defaults.privacy_prompt {
        ask_yes_no(
            prompter,
            "Make image(s) private so they're only visible to your project? (Y/n): ",
            true,
        )
        .await?
    } else {
        false
    };

    Ok(BundleInputs {
        bucket,
        image_name,
        kernel,
        ramdisk,
        private,
    })
}

async fn ask_artifact(
    prompter: &mut dyn Prompter,
    host: &dyn Host,
    label: &str,
    noun: &str,
) -> Result<Option<Artifact>, PromptError> {
    let question = format!("{label} path (leave blank unless you have a custom {noun}): ");
    let Some(path) = ask_existing_path(prompter, host, &question).await? else {
        return Ok(None);
    };

    let default_name = file_name(&path);
    let name = ask_with_default(prompter, &format!("{label} name"), &default_name).await?;
    Ok(Some(Artifact { path, name }))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
