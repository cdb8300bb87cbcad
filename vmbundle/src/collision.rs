use thiserror::Error;
use tracing::info;
use vmbundle_cloud::{CloudClient, CloudError};

use crate::prompt::{PromptError, Prompter, ask_yes_no};

#[derive(Error, Debug)]
pub enum CollisionError {
    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Prompt(#[from] PromptError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionOutcome {
    /// Nothing registered at any candidate location, or the operator agreed
    /// to replace what was.
    Clear,
    /// The operator chose to keep an existing image.
    Declined,
}

/// Look for registered images whose manifest location is one of
/// `locations`. Each match is offered for overwrite; accepting deregisters
/// it, refusing stops the check.
pub async fn resolve_collisions(
    cloud: &dyn CloudClient,
    prompter: &mut dyn Prompter,
    locations: &[String],
) -> Result<CollisionOutcome, CollisionError> {
    let images = cloud.list_images().await?;

    for image in images
        .iter()
        .filter(|image| locations.contains(&image.location))
    {
        let question = format!(
            "Image {} is already registered as {}. Overwrite? (y/N): ",
            image.location, image.id
        );
        if !ask_yes_no(prompter, &question, false).await? {
            info!(image = %image.id, "keeping existing image");
            return Ok(CollisionOutcome::Declined);
        }
        cloud.deregister_image(&image.id).await?;
    }

    Ok(CollisionOutcome::Clear)
}
