//! Core library for the amiferry image-copy tool.
//!
//! The crate copies a machine image between provider regions by launching a
//! transient transfer instance on each side, streaming the raw block
//! devices across, and reassembling an equivalent image in the destination
//! region. Every temporary resource is tracked in a teardown ledger that is
//! drained whether the copy succeeds or fails.

pub mod aws;
pub mod bootstrap;
pub mod config;
pub mod devices;
pub mod gateway;
pub mod kernels;
pub mod ledger;
pub mod orchestrator;
pub mod request;
pub mod runner;
pub mod secret;
pub mod test_support;

pub use aws::{AwsCliGateway, AwsError};
pub use bootstrap::BootstrapParams;
pub use config::{ConfigError, FerryConfig};
pub use devices::{translate, DeviceMapping, DevicePool, TranslateError, TranslatedMappings};
pub use gateway::wait::{PollPolicy, PollSettings, WaitError};
pub use gateway::CloudGateway;
pub use kernels::{resolve_kernel_id, transfer_base_image, KernelError};
pub use ledger::{DrainReport, Ledger, Side, TeardownAction};
pub use orchestrator::{CopyError, CopyOrchestrator, CopyOutcome};
pub use request::{CopyRequest, RequestError};
pub use runner::{CommandOutput, CommandRunner, ProcessCommandRunner};
pub use secret::TransferSecret;
