//! Command-line interface definitions for the `amiferry` binary.
//!
//! This module centralises the clap parser structure so both the main binary
//! and the build script can reuse it when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `amiferry` binary.
#[derive(Debug, Parser)]
#[command(
    name = "amiferry",
    about = "Copy a machine image to another region through transient transfer instances",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Image to copy (for example `ami-12345678`).
    pub(crate) image_id: String,
    /// Region the image lives in.
    pub(crate) source_region: String,
    /// Region to copy the image to.
    pub(crate) destination_region: String,
    /// Name for the run and every tagged temporary resource.
    ///
    /// Defaults to `amiferry` followed by a wall-clock timestamp. Names the
    /// staging bucket and the temporary security groups; the new image
    /// keeps the source image's own name.
    #[arg(long, value_name = "NAME")]
    pub(crate) name: Option<String>,
    /// Instance type for both transfer instances.
    #[arg(long, value_name = "TYPE")]
    pub(crate) instance_type: Option<String>,
    /// Size of the generated transfer secret, in bits (multiple of 8).
    #[arg(long, value_name = "BITS")]
    pub(crate) key_size: Option<u32>,
    /// Kernel id for the new image, overriding the per-region table lookup.
    #[arg(long, value_name = "AKI")]
    pub(crate) kernel_id: Option<String>,
    /// Override the destination region's transfer base image.
    #[arg(long = "dst-ami", value_name = "AMI")]
    pub(crate) destination_transfer_image: Option<String>,
    /// Windows base image in the destination region, required when copying
    /// a Windows image.
    #[arg(long = "windows-template", value_name = "AMI")]
    pub(crate) windows_template_image: Option<String>,
    /// Existing key pair name attached to the source transfer instance.
    #[arg(long = "src-keypair", value_name = "NAME")]
    pub(crate) source_keypair: Option<String>,
    /// Existing key pair name attached to the destination transfer instance.
    #[arg(long = "dst-keypair", value_name = "NAME")]
    pub(crate) destination_keypair: Option<String>,
    /// Local path of the transfer server tool staged for the source
    /// instance.
    #[arg(long = "server-tool", value_name = "PATH")]
    pub(crate) server_tool: String,
    /// Local path of the transfer client tool staged for the destination
    /// instance.
    #[arg(long = "client-tool", value_name = "PATH")]
    pub(crate) client_tool: String,
    /// Boot-script template file for the source transfer instance.
    #[arg(long = "server-boot", value_name = "PATH")]
    pub(crate) server_boot: String,
    /// Boot-script template file for the destination transfer instance.
    #[arg(long = "client-boot", value_name = "PATH")]
    pub(crate) client_boot: String,
    /// Increase log verbosity (repeat for debug output).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,
}
