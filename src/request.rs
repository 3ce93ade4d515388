//! Validated description of one image copy.
//!
//! A [`CopyRequest`] is assembled by the command-line layer and consumed by
//! the orchestrator. Validation happens up front so a bad request never
//! creates any cloud resource.

use camino::Utf8PathBuf;
use chrono::Utc;
use thiserror::Error;

/// Instance type used for the transient transfer instances.
pub const DEFAULT_INSTANCE_TYPE: &str = "m1.large";

/// Size of the generated transfer secret, in bits.
pub const DEFAULT_KEY_SIZE_BITS: u32 = 2048;

/// Prefix shared by the generated run name and every resource tag.
pub const NAME_PREFIX: &str = "amiferry";

/// Returns the default run name, unique per second of wall time.
#[must_use]
pub fn default_run_name() -> String {
    format!("{NAME_PREFIX}{}", Utc::now().format("%Y%m%d%H%M%S"))
}

/// Problems detected before any provider call is made.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RequestError {
    /// Raised when a required field is empty.
    #[error("{field} must not be empty")]
    EmptyField {
        /// Name of the offending field.
        field: &'static str,
    },
    /// Raised when source and destination name the same region.
    #[error("source and destination region are both {region}; nothing to copy")]
    SameRegion {
        /// Region named twice.
        region: String,
    },
    /// Raised when the secret size is zero or not a whole number of bytes.
    #[error("key size of {bits} bits is not a positive multiple of 8")]
    BadKeySize {
        /// Rejected bit count.
        bits: u32,
    },
}

/// Everything the orchestrator needs to copy one image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CopyRequest {
    /// Image to copy.
    pub image_id: String,
    /// Region the image lives in.
    pub source_region: String,
    /// Region to copy the image to.
    pub destination_region: String,
    /// Name for the run and every tagged temporary resource. The new image
    /// keeps the source image's own name.
    pub name: String,
    /// Instance type for both transfer instances.
    pub instance_type: String,
    /// Size of the generated transfer secret, in bits.
    pub key_size_bits: u32,
    /// Explicit kernel id for the new image, overriding table lookup.
    pub kernel_id: Option<String>,
    /// Overrides the destination region's transfer base image.
    pub destination_transfer_image: Option<String>,
    /// Windows base image in the destination region, required when the
    /// copied image is Windows. Its instance donates the reconstruction
    /// chassis.
    pub windows_template_image: Option<String>,
    /// Existing key pair to attach to the source transfer instance.
    pub source_keypair: Option<String>,
    /// Existing key pair to attach to the destination transfer instance.
    pub destination_keypair: Option<String>,
    /// Local path of the transfer server tool uploaded for the source
    /// instance.
    pub server_tool: Utf8PathBuf,
    /// Local path of the transfer client tool uploaded for the destination
    /// instance.
    pub client_tool: Utf8PathBuf,
    /// Boot-script template for the source transfer instance.
    pub source_boot_template: String,
    /// Boot-script template for the destination transfer instance.
    pub destination_boot_template: String,
}

impl CopyRequest {
    /// Builds a request with defaulted name, instance type, and key size.
    #[must_use]
    pub fn new(
        image_id: impl Into<String>,
        source_region: impl Into<String>,
        destination_region: impl Into<String>,
    ) -> Self {
        Self {
            image_id: image_id.into(),
            source_region: source_region.into(),
            destination_region: destination_region.into(),
            name: default_run_name(),
            instance_type: String::from(DEFAULT_INSTANCE_TYPE),
            key_size_bits: DEFAULT_KEY_SIZE_BITS,
            kernel_id: None,
            destination_transfer_image: None,
            windows_template_image: None,
            source_keypair: None,
            destination_keypair: None,
            server_tool: Utf8PathBuf::new(),
            client_tool: Utf8PathBuf::new(),
            source_boot_template: String::new(),
            destination_boot_template: String::new(),
        }
    }

    /// Checks the request for problems detectable without provider access.
    ///
    /// # Errors
    ///
    /// Returns the first [`RequestError`] found.
    pub fn validate(&self) -> Result<(), RequestError> {
        for (field, value) in [
            ("image id", &self.image_id),
            ("source region", &self.source_region),
            ("destination region", &self.destination_region),
            ("name", &self.name),
            ("instance type", &self.instance_type),
        ] {
            if value.trim().is_empty() {
                return Err(RequestError::EmptyField { field });
            }
        }
        if self.source_region == self.destination_region {
            return Err(RequestError::SameRegion {
                region: self.source_region.clone(),
            });
        }
        if self.key_size_bits == 0 || self.key_size_bits % 8 != 0 {
            return Err(RequestError::BadKeySize {
                bits: self.key_size_bits,
            });
        }
        Ok(())
    }
}
