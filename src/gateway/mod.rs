//! Gateway abstraction over one region's compute and storage endpoint.
//!
//! The orchestrator drives two gateways (source and destination) through
//! this trait. Each method maps to a single raw provider call; blocking
//! "wait until state X" composites live in [`wait`] and are layered on top
//! of the describe calls so polled state is always re-fetched, never assumed
//! from a prior read.

pub mod wait;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use crate::devices::DeviceMapping;

/// Lifecycle states of a compute instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstanceState {
    /// Create accepted, not yet running.
    Pending,
    /// Instance is up.
    Running,
    /// Instance is shutting down towards termination.
    ShuttingDown,
    /// Instance is stopping.
    Stopping,
    /// Instance is stopped but still exists.
    Stopped,
    /// Instance is gone.
    Terminated,
}

/// Lifecycle states of a block-storage volume.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VolumeState {
    /// Volume is being created.
    Creating,
    /// Volume exists and is unattached.
    Available,
    /// Volume is attached to an instance.
    InUse,
    /// Volume is detaching from an instance.
    Detaching,
    /// Volume is being deleted.
    Deleting,
    /// Volume is gone.
    Deleted,
}

/// Lifecycle states of a snapshot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SnapshotState {
    /// Snapshot is being taken.
    Pending,
    /// Snapshot is durable.
    Completed,
    /// Snapshot failed; terminal.
    Error,
}

/// Lifecycle states of a machine image.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImageState {
    /// Image registration in progress.
    Pending,
    /// Image is launchable.
    Available,
    /// Image registration failed; terminal.
    Failed,
}

/// Guest platform of a machine image.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Platform {
    /// Linux or any platform without special reconstruction handling.
    #[default]
    Linux,
    /// Windows images require an instance-based reconstruction path.
    Windows,
}

/// A registered machine image as described by the provider.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ImageRecord {
    /// Provider identifier (`ami-…`).
    pub id: String,
    /// Unique-per-region image name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Current lifecycle state.
    pub state: ImageState,
    /// Guest platform.
    pub platform: Platform,
    /// CPU architecture (for example `x86_64`).
    pub architecture: String,
    /// Boot-loader kernel id, when the image is paravirtual.
    pub kernel_id: Option<String>,
    /// Device path the guest boots from.
    pub root_device_name: Option<String>,
    /// Block-device layout backing the image.
    pub block_device_mapping: DeviceMapping,
}

impl Default for ImageState {
    fn default() -> Self {
        Self::Pending
    }
}

/// A compute instance as described by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceRecord {
    /// Provider identifier (`i-…`).
    pub id: String,
    /// Current lifecycle state.
    pub state: InstanceState,
    /// Public DNS name, once assigned.
    pub public_dns: Option<String>,
    /// Public IPv4 address, once assigned.
    pub public_ip: Option<String>,
    /// Availability zone the instance landed in.
    pub availability_zone: Option<String>,
    /// Attached volumes keyed by device path.
    pub attached_volumes: BTreeMap<String, String>,
}

/// A block-storage volume as described by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeRecord {
    /// Provider identifier (`vol-…`).
    pub id: String,
    /// Current lifecycle state.
    pub state: VolumeState,
}

/// A snapshot as described by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SnapshotRecord {
    /// Provider identifier (`snap-…`).
    pub id: String,
    /// Current lifecycle state.
    pub state: SnapshotState,
}

/// Parameters for launching one transient instance.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LaunchSpec {
    /// Image to boot from.
    pub image_id: String,
    /// Commercial instance type.
    pub instance_type: String,
    /// Keypair name for operator access, when configured.
    pub key_name: Option<String>,
    /// Security groups applied to the instance.
    pub security_groups: Vec<String>,
    /// Rendered boot script injected as user data.
    pub user_data: Option<String>,
    /// Extra block devices attached at launch.
    pub block_device_mapping: DeviceMapping,
    /// Whether a guest-initiated shutdown terminates the instance.
    pub terminate_on_shutdown: bool,
    /// Pins the instance to an availability zone.
    pub availability_zone: Option<String>,
}

/// Parameters for registering a machine image from a device mapping.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RegisterImageSpec {
    /// Image name, unique per region.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// CPU architecture.
    pub architecture: String,
    /// Boot-loader kernel id, when paravirtual.
    pub kernel_id: Option<String>,
    /// Device path the guest boots from.
    pub root_device_name: Option<String>,
    /// Block-device layout of the new image.
    pub block_device_mapping: DeviceMapping,
}

/// Transport protocol of an ingress rule.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Protocol {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
}

impl Protocol {
    /// Lower-case protocol name as used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

/// One firewall ingress rule.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IngressRule {
    /// Transport protocol.
    pub protocol: Protocol,
    /// First port of the allowed range.
    pub from_port: u16,
    /// Last port of the allowed range.
    pub to_port: u16,
    /// Source CIDR allowed in.
    pub cidr: String,
}

impl IngressRule {
    /// Builds a single-port rule.
    #[must_use]
    pub fn single_port(protocol: Protocol, port: u16, cidr: impl Into<String>) -> Self {
        Self {
            protocol,
            from_port: port,
            to_port: port,
            cidr: cidr.into(),
        }
    }
}

/// Future returned by gateway operations.
pub type GatewayFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Raw provider operations for one region, one call per method.
///
/// Create and delete operations are invoked at most once per logical
/// resource; describe operations may be re-issued freely by the polling
/// helpers in [`wait`].
pub trait CloudGateway {
    /// Provider specific error type returned by the gateway.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetches an image by id, `None` when it does not exist.
    fn describe_image(&self, image_id: &str)
    -> GatewayFuture<'_, Option<ImageRecord>, Self::Error>;

    /// Lists images whose name matches exactly.
    fn images_by_name(&self, name: &str) -> GatewayFuture<'_, Vec<ImageRecord>, Self::Error>;

    /// Launches one instance and returns its initial record.
    fn run_instance<'a>(
        &'a self,
        spec: &'a LaunchSpec,
    ) -> GatewayFuture<'a, InstanceRecord, Self::Error>;

    /// Re-fetches an instance's record.
    fn describe_instance(&self, instance_id: &str)
    -> GatewayFuture<'_, InstanceRecord, Self::Error>;

    /// Requests termination of an instance.
    fn terminate_instance(&self, instance_id: &str) -> GatewayFuture<'_, (), Self::Error>;

    /// Requests a forced stop of an instance.
    fn stop_instance(&self, instance_id: &str) -> GatewayFuture<'_, (), Self::Error>;

    /// Applies a `Name` tag to a resource.
    fn tag_resource<'a>(
        &'a self,
        resource_id: &'a str,
        name: &'a str,
    ) -> GatewayFuture<'a, (), Self::Error>;

    /// Re-fetches a volume's record.
    fn describe_volume(&self, volume_id: &str) -> GatewayFuture<'_, VolumeRecord, Self::Error>;

    /// Requests a forced detach of a volume.
    fn detach_volume(&self, volume_id: &str) -> GatewayFuture<'_, (), Self::Error>;

    /// Deletes an unattached volume.
    fn delete_volume(&self, volume_id: &str) -> GatewayFuture<'_, (), Self::Error>;

    /// Attaches a volume to an instance at the given device path.
    fn attach_volume<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
        device: &'a str,
    ) -> GatewayFuture<'a, (), Self::Error>;

    /// Starts a snapshot of a volume and returns its initial record.
    fn create_snapshot<'a>(
        &'a self,
        volume_id: &'a str,
        description: &'a str,
    ) -> GatewayFuture<'a, SnapshotRecord, Self::Error>;

    /// Re-fetches a snapshot's record.
    fn describe_snapshot(&self, snapshot_id: &str)
    -> GatewayFuture<'_, SnapshotRecord, Self::Error>;

    /// Creates an image from a (stopped) instance's attached volumes and
    /// returns the new image id.
    fn create_image_from_instance<'a>(
        &'a self,
        instance_id: &'a str,
        name: &'a str,
        description: Option<&'a str>,
    ) -> GatewayFuture<'a, String, Self::Error>;

    /// Registers an image from an explicit device mapping and returns the
    /// new image id.
    fn register_image<'a>(
        &'a self,
        spec: &'a RegisterImageSpec,
    ) -> GatewayFuture<'a, String, Self::Error>;

    /// Creates a named security group.
    fn create_security_group<'a>(
        &'a self,
        name: &'a str,
        description: &'a str,
    ) -> GatewayFuture<'a, (), Self::Error>;

    /// Adds an ingress rule to a security group.
    fn authorize_ingress<'a>(
        &'a self,
        group: &'a str,
        rule: &'a IngressRule,
    ) -> GatewayFuture<'a, (), Self::Error>;

    /// Deletes a security group.
    fn delete_security_group(&self, name: &str) -> GatewayFuture<'_, (), Self::Error>;

    /// Creates an object-storage bucket.
    fn create_bucket(&self, bucket: &str) -> GatewayFuture<'_, (), Self::Error>;

    /// Uploads a local file as an object.
    fn put_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        body: &'a camino::Utf8Path,
    ) -> GatewayFuture<'a, (), Self::Error>;

    /// Generates a time-limited download URL for an object.
    fn presign_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        expires_secs: u64,
    ) -> GatewayFuture<'a, String, Self::Error>;

    /// Deletes an object.
    fn delete_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> GatewayFuture<'a, (), Self::Error>;

    /// Deletes an empty bucket.
    fn delete_bucket(&self, bucket: &str) -> GatewayFuture<'_, (), Self::Error>;
}
