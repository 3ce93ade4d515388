//! [`CloudGateway`] implementation that drives the `aws` CLI.
//!
//! The gateway shells out instead of linking a provider SDK. Each method
//! assembles one CLI invocation, runs it through the injected
//! [`CommandRunner`], and decodes the JSON output. Credentials are passed as
//! environment overrides on the child process only, never as arguments, so
//! they cannot leak into error messages or process listings.

mod error;
mod types;

use std::ffi::OsString;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::gateway::{
    CloudGateway, GatewayFuture, ImageRecord, IngressRule, InstanceRecord, LaunchSpec,
    RegisterImageSpec, SnapshotRecord, VolumeRecord,
};
use crate::runner::{CommandOutput, CommandRunner};

pub use error::AwsError;

use types::{
    mapping_to_cli_json, ApiSnapshot, DescribeImages, DescribeInstances, DescribeSnapshots,
    DescribeVolumes, ImageIdResponse, RunInstances,
};

/// One region's endpoint, reached through the provider CLI.
#[derive(Clone, Debug)]
pub struct AwsCliGateway<R> {
    bin: String,
    region: String,
    credentials: Vec<(String, String)>,
    runner: R,
}

impl<R> AwsCliGateway<R>
where
    R: CommandRunner + Send + Sync,
{
    /// Creates a gateway for one region.
    ///
    /// `credentials` are `(variable, value)` pairs set on every child
    /// process; an empty list lets the CLI use its ambient chain.
    pub fn new(
        bin: impl Into<String>,
        region: impl Into<String>,
        credentials: Vec<(String, String)>,
        runner: R,
    ) -> Self {
        Self {
            bin: bin.into(),
            region: region.into(),
            credentials,
            runner,
        }
    }

    /// Region this gateway talks to.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    fn ec2_args(&self, subcommand: &str) -> Vec<OsString> {
        vec![
            OsString::from("ec2"),
            OsString::from(subcommand),
            OsString::from("--region"),
            OsString::from(&self.region),
            OsString::from("--output"),
            OsString::from("json"),
        ]
    }

    fn s3api_args(&self, subcommand: &str) -> Vec<OsString> {
        vec![
            OsString::from("s3api"),
            OsString::from(subcommand),
            OsString::from("--region"),
            OsString::from(&self.region),
        ]
    }

    fn command_line(&self, args: &[OsString]) -> String {
        let mut parts = Vec::with_capacity(args.len() + 1);
        parts.push(self.bin.clone());
        parts.extend(args.iter().map(|arg| arg.to_string_lossy().into_owned()));
        parts.join(" ")
    }

    fn invoke(&self, args: &[OsString]) -> Result<CommandOutput, AwsError> {
        let command = self.command_line(args);
        debug!(%command, "running provider CLI");
        let output = self.runner.run(&self.bin, args, &self.credentials)?;
        if output.is_success() {
            Ok(output)
        } else {
            Err(AwsError::Command {
                command,
                code: output.code,
                stderr: output.stderr.trim().to_owned(),
            })
        }
    }

    fn invoke_json<T: DeserializeOwned>(&self, args: &[OsString]) -> Result<T, AwsError> {
        let output = self.invoke(args)?;
        serde_json::from_str(&output.stdout).map_err(|err| AwsError::Parse {
            command: self.command_line(args),
            message: err.to_string(),
        })
    }

    fn rendered_mapping(&self, spec_mapping: &crate::devices::DeviceMapping) -> Result<String, AwsError> {
        mapping_to_cli_json(spec_mapping).map_err(|err| AwsError::Parse {
            command: String::from("render block device mapping"),
            message: err.to_string(),
        })
    }
}

fn push(args: &mut Vec<OsString>, flag: &str, value: impl Into<OsString>) {
    args.push(OsString::from(flag));
    args.push(value.into());
}

/// `NotFound` style failures from describe calls mean "no such resource",
/// not an operational error.
fn is_not_found(err: &AwsError) -> bool {
    matches!(err, AwsError::Command { stderr, .. } if stderr.contains("NotFound"))
}

impl<R> CloudGateway for AwsCliGateway<R>
where
    R: CommandRunner + Send + Sync,
{
    type Error = AwsError;

    fn describe_image(
        &self,
        image_id: &str,
    ) -> GatewayFuture<'_, Option<ImageRecord>, Self::Error> {
        let image_id = image_id.to_owned();
        Box::pin(async move {
            let mut args = self.ec2_args("describe-images");
            push(&mut args, "--image-ids", &image_id);
            let parsed: DescribeImages = match self.invoke_json(&args) {
                Ok(parsed) => parsed,
                Err(err) if is_not_found(&err) => return Ok(None),
                Err(err) => return Err(err),
            };
            parsed
                .images
                .into_iter()
                .next()
                .map(types::ApiImage::into_record)
                .transpose()
        })
    }

    fn images_by_name(&self, name: &str) -> GatewayFuture<'_, Vec<ImageRecord>, Self::Error> {
        let name = name.to_owned();
        Box::pin(async move {
            let mut args = self.ec2_args("describe-images");
            push(&mut args, "--owners", "self");
            push(&mut args, "--filters", format!("Name=name,Values={name}"));
            let parsed: DescribeImages = self.invoke_json(&args)?;
            parsed
                .images
                .into_iter()
                .map(types::ApiImage::into_record)
                .collect()
        })
    }

    fn run_instance<'a>(
        &'a self,
        spec: &'a LaunchSpec,
    ) -> GatewayFuture<'a, InstanceRecord, Self::Error> {
        Box::pin(async move {
            let mut args = self.ec2_args("run-instances");
            push(&mut args, "--image-id", &spec.image_id);
            push(&mut args, "--instance-type", &spec.instance_type);
            push(&mut args, "--count", "1");
            if let Some(key_name) = &spec.key_name {
                push(&mut args, "--key-name", key_name);
            }
            if !spec.security_groups.is_empty() {
                args.push(OsString::from("--security-groups"));
                args.extend(spec.security_groups.iter().map(OsString::from));
            }
            if let Some(user_data) = &spec.user_data {
                push(&mut args, "--user-data", user_data);
            }
            if !spec.block_device_mapping.is_empty() {
                let rendered = self.rendered_mapping(&spec.block_device_mapping)?;
                push(&mut args, "--block-device-mappings", rendered);
            }
            if spec.terminate_on_shutdown {
                push(
                    &mut args,
                    "--instance-initiated-shutdown-behavior",
                    "terminate",
                );
            }
            if let Some(zone) = &spec.availability_zone {
                push(&mut args, "--placement", format!("AvailabilityZone={zone}"));
            }

            let parsed: RunInstances = self.invoke_json(&args)?;
            let instance = parsed.instances.into_iter().next().ok_or_else(|| {
                AwsError::Parse {
                    command: self.command_line(&args),
                    message: String::from("run-instances returned no instances"),
                }
            })?;
            instance.into_record()
        })
    }

    fn describe_instance(
        &self,
        instance_id: &str,
    ) -> GatewayFuture<'_, InstanceRecord, Self::Error> {
        let instance_id = instance_id.to_owned();
        Box::pin(async move {
            let mut args = self.ec2_args("describe-instances");
            push(&mut args, "--instance-ids", &instance_id);
            let parsed: DescribeInstances = self.invoke_json(&args)?;
            let instance = parsed
                .reservations
                .into_iter()
                .flat_map(|reservation| reservation.instances)
                .next()
                .ok_or_else(|| AwsError::Parse {
                    command: self.command_line(&args),
                    message: format!("no reservation contains {instance_id}"),
                })?;
            instance.into_record()
        })
    }

    fn terminate_instance(&self, instance_id: &str) -> GatewayFuture<'_, (), Self::Error> {
        let instance_id = instance_id.to_owned();
        Box::pin(async move {
            let mut args = self.ec2_args("terminate-instances");
            push(&mut args, "--instance-ids", &instance_id);
            self.invoke(&args).map(|_| ())
        })
    }

    fn stop_instance(&self, instance_id: &str) -> GatewayFuture<'_, (), Self::Error> {
        let instance_id = instance_id.to_owned();
        Box::pin(async move {
            let mut args = self.ec2_args("stop-instances");
            push(&mut args, "--instance-ids", &instance_id);
            args.push(OsString::from("--force"));
            self.invoke(&args).map(|_| ())
        })
    }

    fn tag_resource<'a>(
        &'a self,
        resource_id: &'a str,
        name: &'a str,
    ) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut args = self.ec2_args("create-tags");
            push(&mut args, "--resources", resource_id);
            push(&mut args, "--tags", format!("Key=Name,Value={name}"));
            self.invoke(&args).map(|_| ())
        })
    }

    fn describe_volume(&self, volume_id: &str) -> GatewayFuture<'_, VolumeRecord, Self::Error> {
        let volume_id = volume_id.to_owned();
        Box::pin(async move {
            let mut args = self.ec2_args("describe-volumes");
            push(&mut args, "--volume-ids", &volume_id);
            let parsed: DescribeVolumes = self.invoke_json(&args)?;
            let volume = parsed.volumes.into_iter().next().ok_or_else(|| {
                AwsError::Parse {
                    command: self.command_line(&args),
                    message: format!("no volume record for {volume_id}"),
                }
            })?;
            volume.into_record()
        })
    }

    fn detach_volume(&self, volume_id: &str) -> GatewayFuture<'_, (), Self::Error> {
        let volume_id = volume_id.to_owned();
        Box::pin(async move {
            let mut args = self.ec2_args("detach-volume");
            push(&mut args, "--volume-id", &volume_id);
            args.push(OsString::from("--force"));
            self.invoke(&args).map(|_| ())
        })
    }

    fn delete_volume(&self, volume_id: &str) -> GatewayFuture<'_, (), Self::Error> {
        let volume_id = volume_id.to_owned();
        Box::pin(async move {
            let mut args = self.ec2_args("delete-volume");
            push(&mut args, "--volume-id", &volume_id);
            self.invoke(&args).map(|_| ())
        })
    }

    fn attach_volume<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
        device: &'a str,
    ) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut args = self.ec2_args("attach-volume");
            push(&mut args, "--volume-id", volume_id);
            push(&mut args, "--instance-id", instance_id);
            push(&mut args, "--device", device);
            self.invoke(&args).map(|_| ())
        })
    }

    fn create_snapshot<'a>(
        &'a self,
        volume_id: &'a str,
        description: &'a str,
    ) -> GatewayFuture<'a, SnapshotRecord, Self::Error> {
        Box::pin(async move {
            let mut args = self.ec2_args("create-snapshot");
            push(&mut args, "--volume-id", volume_id);
            push(&mut args, "--description", description);
            let parsed: ApiSnapshot = self.invoke_json(&args)?;
            parsed.into_record()
        })
    }

    fn describe_snapshot(
        &self,
        snapshot_id: &str,
    ) -> GatewayFuture<'_, SnapshotRecord, Self::Error> {
        let snapshot_id = snapshot_id.to_owned();
        Box::pin(async move {
            let mut args = self.ec2_args("describe-snapshots");
            push(&mut args, "--snapshot-ids", &snapshot_id);
            let parsed: DescribeSnapshots = self.invoke_json(&args)?;
            let snapshot = parsed.snapshots.into_iter().next().ok_or_else(|| {
                AwsError::Parse {
                    command: self.command_line(&args),
                    message: format!("no snapshot record for {snapshot_id}"),
                }
            })?;
            snapshot.into_record()
        })
    }

    fn create_image_from_instance<'a>(
        &'a self,
        instance_id: &'a str,
        name: &'a str,
        description: Option<&'a str>,
    ) -> GatewayFuture<'a, String, Self::Error> {
        Box::pin(async move {
            let mut args = self.ec2_args("create-image");
            push(&mut args, "--instance-id", instance_id);
            push(&mut args, "--name", name);
            if let Some(description) = description {
                push(&mut args, "--description", description);
            }
            args.push(OsString::from("--no-reboot"));
            let parsed: ImageIdResponse = self.invoke_json(&args)?;
            Ok(parsed.image_id)
        })
    }

    fn register_image<'a>(
        &'a self,
        spec: &'a RegisterImageSpec,
    ) -> GatewayFuture<'a, String, Self::Error> {
        Box::pin(async move {
            let mut args = self.ec2_args("register-image");
            push(&mut args, "--name", &spec.name);
            if let Some(description) = &spec.description {
                push(&mut args, "--description", description);
            }
            push(&mut args, "--architecture", &spec.architecture);
            if let Some(kernel_id) = &spec.kernel_id {
                push(&mut args, "--kernel-id", kernel_id);
            }
            if let Some(root_device_name) = &spec.root_device_name {
                push(&mut args, "--root-device-name", root_device_name);
            }
            let rendered = self.rendered_mapping(&spec.block_device_mapping)?;
            push(&mut args, "--block-device-mappings", rendered);
            let parsed: ImageIdResponse = self.invoke_json(&args)?;
            Ok(parsed.image_id)
        })
    }

    fn create_security_group<'a>(
        &'a self,
        name: &'a str,
        description: &'a str,
    ) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut args = self.ec2_args("create-security-group");
            push(&mut args, "--group-name", name);
            push(&mut args, "--description", description);
            self.invoke(&args).map(|_| ())
        })
    }

    fn authorize_ingress<'a>(
        &'a self,
        group: &'a str,
        rule: &'a IngressRule,
    ) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut args = self.ec2_args("authorize-security-group-ingress");
            push(&mut args, "--group-name", group);
            push(&mut args, "--protocol", rule.protocol.as_str());
            let port = if rule.from_port == rule.to_port {
                rule.from_port.to_string()
            } else {
                format!("{}-{}", rule.from_port, rule.to_port)
            };
            push(&mut args, "--port", port);
            push(&mut args, "--cidr", &rule.cidr);
            self.invoke(&args).map(|_| ())
        })
    }

    fn delete_security_group(&self, name: &str) -> GatewayFuture<'_, (), Self::Error> {
        let name = name.to_owned();
        Box::pin(async move {
            let mut args = self.ec2_args("delete-security-group");
            push(&mut args, "--group-name", &name);
            self.invoke(&args).map(|_| ())
        })
    }

    fn create_bucket(&self, bucket: &str) -> GatewayFuture<'_, (), Self::Error> {
        let bucket = bucket.to_owned();
        Box::pin(async move {
            let mut args = self.s3api_args("create-bucket");
            push(&mut args, "--bucket", &bucket);
            // us-east-1 rejects an explicit location constraint.
            if self.region != "us-east-1" {
                push(
                    &mut args,
                    "--create-bucket-configuration",
                    format!("LocationConstraint={}", self.region),
                );
            }
            self.invoke(&args).map(|_| ())
        })
    }

    fn put_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        body: &'a camino::Utf8Path,
    ) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut args = self.s3api_args("put-object");
            push(&mut args, "--bucket", bucket);
            push(&mut args, "--key", key);
            push(&mut args, "--body", body.as_str());
            self.invoke(&args).map(|_| ())
        })
    }

    fn presign_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        expires_secs: u64,
    ) -> GatewayFuture<'a, String, Self::Error> {
        Box::pin(async move {
            let args = vec![
                OsString::from("s3"),
                OsString::from("presign"),
                OsString::from(format!("s3://{bucket}/{key}")),
                OsString::from("--expires-in"),
                OsString::from(expires_secs.to_string()),
                OsString::from("--region"),
                OsString::from(&self.region),
            ];
            let output = self.invoke(&args)?;
            let url = output.stdout.trim();
            if url.is_empty() {
                return Err(AwsError::Parse {
                    command: self.command_line(&args),
                    message: String::from("presign produced no URL"),
                });
            }
            Ok(url.to_owned())
        })
    }

    fn delete_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut args = self.s3api_args("delete-object");
            push(&mut args, "--bucket", bucket);
            push(&mut args, "--key", key);
            self.invoke(&args).map(|_| ())
        })
    }

    fn delete_bucket(&self, bucket: &str) -> GatewayFuture<'_, (), Self::Error> {
        let bucket = bucket.to_owned();
        Box::pin(async move {
            let mut args = self.s3api_args("delete-bucket");
            push(&mut args, "--bucket", &bucket);
            self.invoke(&args).map(|_| ())
        })
    }
}

#[cfg(test)]
mod tests;
