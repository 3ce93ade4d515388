//! Error type covering the whole copy workflow.

use thiserror::Error;

use crate::devices::TranslateError;
use crate::gateway::wait::WaitError;
use crate::kernels::KernelError;
use crate::request::RequestError;
use crate::secret::SecretError;

/// Failure anywhere in the copy workflow, generic over the gateway's own
/// error type. Temporary resources created before the failure are still
/// drained before this surfaces to the caller.
#[derive(Debug, Error)]
pub enum CopyError<E>
where
    E: std::error::Error + 'static,
{
    /// The request failed its own validation.
    #[error(transparent)]
    Request(#[from] RequestError),
    /// The image to copy does not exist in the source region.
    #[error("image {image_id} not found in the source region")]
    ImageNotFound {
        /// Image that could not be found.
        image_id: String,
    },
    /// The destination region already holds an image carrying the source
    /// image's name, which the copy would need for itself.
    #[error("an image named {name} already exists in the destination region")]
    NameTaken {
        /// Conflicting name.
        name: String,
    },
    /// A Windows image was requested without a reconstruction template.
    #[error("copying a Windows image needs a Windows template image in the destination region")]
    MissingWindowsTemplate,
    /// The supplied template image exists but is not Windows.
    #[error("template image {image_id} is not a Windows image")]
    TemplateNotWindows {
        /// Offending template image.
        image_id: String,
    },
    /// The template image does not exist in the destination region.
    #[error("template image {image_id} not found in the destination region")]
    TemplateNotFound {
        /// Missing template image.
        image_id: String,
    },
    /// The destination kernel id could not be determined.
    #[error(transparent)]
    Kernel(#[from] KernelError),
    /// The image needs more transfer devices than the pool provides.
    #[error(transparent)]
    Devices(#[from] TranslateError),
    /// The transfer secret could not be generated.
    #[error(transparent)]
    Secret(#[from] SecretError),
    /// A state wait failed or timed out.
    #[error(transparent)]
    Wait(#[from] WaitError<E>),
    /// A raw gateway call failed.
    #[error("provider call failed while {action}")]
    Gateway {
        /// Step that was in progress.
        action: &'static str,
        /// Underlying gateway error.
        #[source]
        source: E,
    },
    /// A transfer instance came up without a public address.
    #[error("instance {instance_id} has no public address to transfer over")]
    MissingAddress {
        /// Instance lacking an address.
        instance_id: String,
    },
    /// An expected transfer volume was not attached where it should be.
    #[error("no volume attached at {device} on instance {instance_id}")]
    MissingVolume {
        /// Device path with no attachment.
        device: String,
        /// Instance that should carry the volume.
        instance_id: String,
    },
}
