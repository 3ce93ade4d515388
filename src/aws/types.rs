//! Serde shapes for the `aws` CLI's JSON output and request payloads.
//!
//! Only the fields this tool reads are modelled; the CLI emits many more.
//! Conversions into the gateway's records live here so the gateway itself
//! stays a thin command dispatcher.

use serde::{Deserialize, Serialize};

use crate::devices::{BlockDeviceDescriptor, DeviceMapping};
use crate::gateway::{
    ImageRecord, ImageState, InstanceRecord, InstanceState, Platform, SnapshotRecord,
    SnapshotState, VolumeRecord, VolumeState,
};

use super::error::AwsError;

/// `describe-images` / implicit single-image wrapper.
#[derive(Debug, Deserialize)]
pub(super) struct DescribeImages {
    #[serde(rename = "Images", default)]
    pub images: Vec<ApiImage>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ApiImage {
    #[serde(rename = "ImageId")]
    pub image_id: String,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "Description", default)]
    pub description: Option<String>,
    #[serde(rename = "State")]
    pub state: String,
    #[serde(rename = "Platform", default)]
    pub platform: Option<String>,
    #[serde(rename = "Architecture", default)]
    pub architecture: Option<String>,
    #[serde(rename = "KernelId", default)]
    pub kernel_id: Option<String>,
    #[serde(rename = "RootDeviceName", default)]
    pub root_device_name: Option<String>,
    #[serde(rename = "BlockDeviceMappings", default)]
    pub block_device_mappings: Vec<ApiBlockDevice>,
}

#[derive(Debug, Deserialize, Serialize)]
pub(super) struct ApiBlockDevice {
    #[serde(rename = "DeviceName")]
    pub device_name: String,
    #[serde(rename = "Ebs", default, skip_serializing_if = "Option::is_none")]
    pub ebs: Option<ApiEbs>,
    #[serde(rename = "VirtualName", default, skip_serializing_if = "Option::is_none")]
    pub virtual_name: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub(super) struct ApiEbs {
    #[serde(rename = "SnapshotId", default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    #[serde(rename = "VolumeSize", default, skip_serializing_if = "Option::is_none")]
    pub volume_size: Option<u32>,
    #[serde(rename = "VolumeType", default, skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,
    #[serde(rename = "Iops", default, skip_serializing_if = "Option::is_none")]
    pub iops: Option<u32>,
    #[serde(rename = "VolumeId", default, skip_serializing_if = "Option::is_none")]
    pub volume_id: Option<String>,
    #[serde(rename = "DeleteOnTermination", default)]
    pub delete_on_termination: Option<bool>,
}

/// `describe-instances` wrapper.
#[derive(Debug, Deserialize)]
pub(super) struct DescribeInstances {
    #[serde(rename = "Reservations", default)]
    pub reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Reservation {
    #[serde(rename = "Instances", default)]
    pub instances: Vec<ApiInstance>,
}

/// `run-instances` emits the instance list at the top level.
#[derive(Debug, Deserialize)]
pub(super) struct RunInstances {
    #[serde(rename = "Instances", default)]
    pub instances: Vec<ApiInstance>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ApiInstance {
    #[serde(rename = "InstanceId")]
    pub instance_id: String,
    #[serde(rename = "State")]
    pub state: ApiInstanceState,
    #[serde(rename = "PublicDnsName", default)]
    pub public_dns_name: Option<String>,
    #[serde(rename = "PublicIpAddress", default)]
    pub public_ip_address: Option<String>,
    #[serde(rename = "Placement", default)]
    pub placement: Option<ApiPlacement>,
    #[serde(rename = "BlockDeviceMappings", default)]
    pub block_device_mappings: Vec<ApiBlockDevice>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ApiInstanceState {
    #[serde(rename = "Name")]
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ApiPlacement {
    #[serde(rename = "AvailabilityZone", default)]
    pub availability_zone: Option<String>,
}

/// `describe-volumes` wrapper.
#[derive(Debug, Deserialize)]
pub(super) struct DescribeVolumes {
    #[serde(rename = "Volumes", default)]
    pub volumes: Vec<ApiVolume>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ApiVolume {
    #[serde(rename = "VolumeId")]
    pub volume_id: String,
    #[serde(rename = "State")]
    pub state: String,
}

/// `create-snapshot` emits a bare snapshot object; `describe-snapshots`
/// wraps a list.
#[derive(Debug, Deserialize)]
pub(super) struct ApiSnapshot {
    #[serde(rename = "SnapshotId")]
    pub snapshot_id: String,
    #[serde(rename = "State")]
    pub state: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct DescribeSnapshots {
    #[serde(rename = "Snapshots", default)]
    pub snapshots: Vec<ApiSnapshot>,
}

/// `create-image` / `register-image` response.
#[derive(Debug, Deserialize)]
pub(super) struct ImageIdResponse {
    #[serde(rename = "ImageId")]
    pub image_id: String,
}

pub(super) fn parse_instance_state(value: &str) -> Result<InstanceState, AwsError> {
    match value {
        "pending" => Ok(InstanceState::Pending),
        "running" => Ok(InstanceState::Running),
        "shutting-down" => Ok(InstanceState::ShuttingDown),
        "stopping" => Ok(InstanceState::Stopping),
        "stopped" => Ok(InstanceState::Stopped),
        "terminated" => Ok(InstanceState::Terminated),
        other => Err(AwsError::UnknownState {
            kind: "instance",
            value: other.to_owned(),
        }),
    }
}

pub(super) fn parse_volume_state(value: &str) -> Result<VolumeState, AwsError> {
    match value {
        "creating" => Ok(VolumeState::Creating),
        "available" => Ok(VolumeState::Available),
        "in-use" => Ok(VolumeState::InUse),
        "detaching" => Ok(VolumeState::Detaching),
        "deleting" => Ok(VolumeState::Deleting),
        "deleted" => Ok(VolumeState::Deleted),
        other => Err(AwsError::UnknownState {
            kind: "volume",
            value: other.to_owned(),
        }),
    }
}

pub(super) fn parse_snapshot_state(value: &str) -> Result<SnapshotState, AwsError> {
    match value {
        "pending" => Ok(SnapshotState::Pending),
        "completed" => Ok(SnapshotState::Completed),
        "error" => Ok(SnapshotState::Error),
        other => Err(AwsError::UnknownState {
            kind: "snapshot",
            value: other.to_owned(),
        }),
    }
}

pub(super) fn parse_image_state(value: &str) -> Result<ImageState, AwsError> {
    match value {
        "pending" => Ok(ImageState::Pending),
        "available" => Ok(ImageState::Available),
        "failed" | "invalid" | "deregistered" | "error" => Ok(ImageState::Failed),
        other => Err(AwsError::UnknownState {
            kind: "image",
            value: other.to_owned(),
        }),
    }
}

impl ApiImage {
    pub(super) fn into_record(self) -> Result<ImageRecord, AwsError> {
        let state = parse_image_state(&self.state)?;
        let platform = match self.platform.as_deref() {
            Some("windows") => Platform::Windows,
            _ => Platform::Linux,
        };
        Ok(ImageRecord {
            id: self.image_id,
            name: self.name.unwrap_or_default(),
            description: self.description,
            state,
            platform,
            architecture: self.architecture.unwrap_or_default(),
            kernel_id: self.kernel_id,
            root_device_name: self.root_device_name,
            block_device_mapping: mapping_from_api(self.block_device_mappings),
        })
    }
}

impl ApiInstance {
    pub(super) fn into_record(self) -> Result<InstanceRecord, AwsError> {
        let state = parse_instance_state(&self.state.name)?;
        let attached_volumes = self
            .block_device_mappings
            .into_iter()
            .filter_map(|device| {
                device
                    .ebs
                    .and_then(|ebs| ebs.volume_id)
                    .map(|volume_id| (device.device_name, volume_id))
            })
            .collect();
        Ok(InstanceRecord {
            id: self.instance_id,
            state,
            public_dns: self.public_dns_name.filter(|dns| !dns.is_empty()),
            public_ip: self.public_ip_address.filter(|ip| !ip.is_empty()),
            availability_zone: self
                .placement
                .and_then(|placement| placement.availability_zone),
            attached_volumes,
        })
    }
}

impl ApiVolume {
    pub(super) fn into_record(self) -> Result<VolumeRecord, AwsError> {
        Ok(VolumeRecord {
            state: parse_volume_state(&self.state)?,
            id: self.volume_id,
        })
    }
}

impl ApiSnapshot {
    pub(super) fn into_record(self) -> Result<SnapshotRecord, AwsError> {
        Ok(SnapshotRecord {
            state: parse_snapshot_state(&self.state)?,
            id: self.snapshot_id,
        })
    }
}

fn mapping_from_api(devices: Vec<ApiBlockDevice>) -> DeviceMapping {
    devices
        .into_iter()
        .map(|device| {
            let ebs = device.ebs.unwrap_or_default();
            (
                device.device_name,
                BlockDeviceDescriptor {
                    snapshot_id: ebs.snapshot_id,
                    size_gib: ebs.volume_size,
                    volume_type: ebs.volume_type,
                    iops: ebs.iops,
                    delete_on_termination: ebs.delete_on_termination.unwrap_or(true),
                    ephemeral_name: device.virtual_name,
                },
            )
        })
        .collect()
}

/// Renders a device mapping as the JSON the CLI expects for
/// `--block-device-mappings`.
pub(super) fn mapping_to_cli_json(mapping: &DeviceMapping) -> Result<String, serde_json::Error> {
    let devices: Vec<ApiBlockDevice> = mapping
        .iter()
        .map(|(device_name, descriptor)| {
            if let Some(virtual_name) = &descriptor.ephemeral_name {
                ApiBlockDevice {
                    device_name: device_name.clone(),
                    ebs: None,
                    virtual_name: Some(virtual_name.clone()),
                }
            } else {
                ApiBlockDevice {
                    device_name: device_name.clone(),
                    ebs: Some(ApiEbs {
                        snapshot_id: descriptor.snapshot_id.clone(),
                        volume_size: descriptor.size_gib,
                        volume_type: descriptor.volume_type.clone(),
                        iops: descriptor.iops,
                        volume_id: None,
                        delete_on_termination: Some(descriptor.delete_on_termination),
                    }),
                    virtual_name: None,
                }
            }
        })
        .collect();
    serde_json::to_string(&devices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn image_json_round_trips_into_a_record() {
        let json = r#"{
            "Images": [{
                "ImageId": "ami-12345678",
                "Name": "base",
                "State": "available",
                "Platform": "windows",
                "Architecture": "x86_64",
                "RootDeviceName": "/dev/sda1",
                "BlockDeviceMappings": [
                    {"DeviceName": "/dev/sda1",
                     "Ebs": {"SnapshotId": "snap-1", "VolumeSize": 8,
                             "DeleteOnTermination": true}},
                    {"DeviceName": "/dev/sdb", "VirtualName": "ephemeral0"}
                ]
            }]
        }"#;
        let parsed: DescribeImages = serde_json::from_str(json).expect("valid payload");
        let record = parsed
            .images
            .into_iter()
            .next()
            .expect("one image")
            .into_record()
            .expect("known states");
        assert_eq!(record.id, "ami-12345678");
        assert_eq!(record.state, ImageState::Available);
        assert_eq!(record.platform, Platform::Windows);
        assert_eq!(record.block_device_mapping.len(), 2);
        let root = &record.block_device_mapping["/dev/sda1"];
        assert_eq!(root.snapshot_id.as_deref(), Some("snap-1"));
        assert_eq!(root.size_gib, Some(8));
    }

    #[rstest]
    fn instance_json_includes_attachments_and_zone() {
        let json = r#"{
            "Reservations": [{"Instances": [{
                "InstanceId": "i-abc",
                "State": {"Name": "running"},
                "PublicDnsName": "ec2-1-2-3-4.compute.test",
                "PublicIpAddress": "1.2.3.4",
                "Placement": {"AvailabilityZone": "eu-west-1a"},
                "BlockDeviceMappings": [
                    {"DeviceName": "/dev/sda1", "Ebs": {"VolumeId": "vol-9"}}
                ]
            }]}]
        }"#;
        let parsed: DescribeInstances = serde_json::from_str(json).expect("valid payload");
        let record = parsed
            .reservations
            .into_iter()
            .next()
            .expect("one reservation")
            .instances
            .into_iter()
            .next()
            .expect("one instance")
            .into_record()
            .expect("known states");
        assert_eq!(record.state, InstanceState::Running);
        assert_eq!(record.availability_zone.as_deref(), Some("eu-west-1a"));
        assert_eq!(record.attached_volumes["/dev/sda1"], "vol-9");
    }

    #[rstest]
    fn cli_mapping_json_keeps_snapshot_and_ephemeral_shapes() {
        let mut mapping = DeviceMapping::new();
        mapping.insert(
            String::from("/dev/sdf"),
            BlockDeviceDescriptor {
                snapshot_id: Some(String::from("snap-7")),
                size_gib: Some(100),
                volume_type: None,
                iops: None,
                delete_on_termination: false,
                ephemeral_name: None,
            },
        );
        mapping.insert(
            String::from("/dev/sdb"),
            BlockDeviceDescriptor {
                snapshot_id: None,
                size_gib: None,
                volume_type: None,
                iops: None,
                delete_on_termination: true,
                ephemeral_name: Some(String::from("ephemeral0")),
            },
        );

        let rendered = mapping_to_cli_json(&mapping).expect("serializable");
        let value: serde_json::Value =
            serde_json::from_str(&rendered).expect("valid JSON out");
        let devices = value.as_array().expect("array payload");
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0]["DeviceName"], "/dev/sdb");
        assert_eq!(devices[0]["VirtualName"], "ephemeral0");
        assert!(devices[0].get("Ebs").is_none());
        assert_eq!(devices[1]["Ebs"]["SnapshotId"], "snap-7");
        assert_eq!(devices[1]["Ebs"]["DeleteOnTermination"], false);
    }

    #[rstest]
    #[case("running", InstanceState::Running)]
    #[case("shutting-down", InstanceState::ShuttingDown)]
    fn instance_states_parse(#[case] wire: &str, #[case] expected: InstanceState) {
        assert_eq!(parse_instance_state(wire).expect("known state"), expected);
    }

    #[rstest]
    fn unknown_states_are_surfaced() {
        let err = parse_volume_state("melted").expect_err("unknown state");
        assert_eq!(
            err,
            AwsError::UnknownState {
                kind: "volume",
                value: String::from("melted")
            }
        );
    }
}
