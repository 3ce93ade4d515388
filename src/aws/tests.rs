use rstest::rstest;

use crate::devices::{BlockDeviceDescriptor, DeviceMapping};
use crate::gateway::{
    CloudGateway, ImageState, IngressRule, InstanceState, LaunchSpec, Platform, Protocol,
    RegisterImageSpec,
};
use crate::test_support::ScriptedRunner;

use super::{AwsCliGateway, AwsError};

fn gateway(runner: &ScriptedRunner) -> AwsCliGateway<ScriptedRunner> {
    AwsCliGateway::new(
        "aws",
        "us-east-1",
        vec![(
            String::from("AWS_ACCESS_KEY_ID"),
            String::from("AKIATEST"),
        )],
        runner.clone(),
    )
}

#[rstest]
#[tokio::test]
async fn describe_image_parses_the_cli_payload() {
    let runner = ScriptedRunner::new();
    runner.push_json(
        r#"{"Images":[{"ImageId":"ami-1","Name":"base","State":"available",
            "Architecture":"x86_64","RootDeviceName":"/dev/sda1"}]}"#,
    );
    let gateway = gateway(&runner);

    let image = gateway
        .describe_image("ami-1")
        .await
        .expect("call should succeed")
        .expect("image should exist");

    assert_eq!(image.id, "ami-1");
    assert_eq!(image.state, ImageState::Available);
    assert_eq!(image.platform, Platform::Linux);

    let invocation = &runner.invocations()[0];
    assert_eq!(
        invocation.command_string(),
        "aws ec2 describe-images --region us-east-1 --output json --image-ids ami-1"
    );
    assert_eq!(invocation.envs[0].0, "AWS_ACCESS_KEY_ID");
}

#[rstest]
#[tokio::test]
async fn a_missing_image_maps_to_none() {
    let runner = ScriptedRunner::new();
    runner.push_failure(
        255,
        "An error occurred (InvalidAMIID.NotFound) when calling DescribeImages",
    );
    let gateway = gateway(&runner);

    let image = gateway
        .describe_image("ami-gone")
        .await
        .expect("not-found is not an error");
    assert!(image.is_none());
}

#[rstest]
#[tokio::test]
async fn other_cli_failures_surface_with_the_command_line() {
    let runner = ScriptedRunner::new();
    runner.push_failure(255, "AuthFailure: not authorized");
    let gateway = gateway(&runner);

    let err = gateway
        .describe_image("ami-1")
        .await
        .expect_err("auth failure should propagate");
    match err {
        AwsError::Command { command, stderr, .. } => {
            assert!(command.contains("describe-images"));
            assert!(stderr.contains("AuthFailure"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[rstest]
#[tokio::test]
async fn run_instance_renders_every_launch_option() {
    let runner = ScriptedRunner::new();
    runner.push_json(
        r#"{"Instances":[{"InstanceId":"i-1","State":{"Name":"pending"},
            "Placement":{"AvailabilityZone":"us-east-1a"}}]}"#,
    );
    let gateway = gateway(&runner);

    let mut mapping = DeviceMapping::new();
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
    let spec = LaunchSpec {
        image_id: String::from("ami-base"),
        instance_type: String::from("m1.large"),
        key_name: Some(String::from("ops")),
        security_groups: vec![String::from("xfer-sg")],
        user_data: Some(String::from("#!/bin/sh\n")),
        block_device_mapping: mapping,
        terminate_on_shutdown: true,
        availability_zone: Some(String::from("us-east-1a")),
    };

    let instance = gateway
        .run_instance(&spec)
        .await
        .expect("launch should succeed");
    assert_eq!(instance.id, "i-1");
    assert_eq!(instance.state, InstanceState::Pending);
    assert_eq!(instance.availability_zone.as_deref(), Some("us-east-1a"));

    let command = runner.invocations()[0].command_string();
    assert!(command.contains("run-instances"));
    assert!(command.contains("--image-id ami-base"));
    assert!(command.contains("--key-name ops"));
    assert!(command.contains("--security-groups xfer-sg"));
    assert!(command.contains("--instance-initiated-shutdown-behavior terminate"));
    assert!(command.contains("--placement AvailabilityZone=us-east-1a"));
    assert!(command.contains("ephemeral0"));
}

#[rstest]
#[tokio::test]
async fn register_image_carries_kernel_and_mapping() {
    let runner = ScriptedRunner::new();
    runner.push_json(r#"{"ImageId":"ami-new"}"#);
    let gateway = gateway(&runner);

    let mut mapping = DeviceMapping::new();
    mapping.insert(
        String::from("/dev/sda1"),
        BlockDeviceDescriptor {
            snapshot_id: Some(String::from("snap-1")),
            size_gib: Some(8),
            volume_type: None,
            iops: None,
            delete_on_termination: true,
            ephemeral_name: None,
        },
    );
    let spec = RegisterImageSpec {
        name: String::from("copied"),
        description: Some(String::from("copied image")),
        architecture: String::from("x86_64"),
        kernel_id: Some(String::from("aki-71665e05")),
        root_device_name: Some(String::from("/dev/sda1")),
        block_device_mapping: mapping,
    };

    let image_id = gateway
        .register_image(&spec)
        .await
        .expect("registration should succeed");
    assert_eq!(image_id, "ami-new");

    let command = runner.invocations()[0].command_string();
    assert!(command.contains("register-image"));
    assert!(command.contains("--kernel-id aki-71665e05"));
    assert!(command.contains("--root-device-name /dev/sda1"));
    assert!(command.contains("snap-1"));
}

#[rstest]
#[tokio::test]
async fn ingress_rules_render_protocol_port_and_cidr() {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let gateway = gateway(&runner);

    let rule = IngressRule::single_port(Protocol::Udp, 46224, "10.0.0.9/32");
    gateway
        .authorize_ingress("xfer-sg", &rule)
        .await
        .expect("authorization should succeed");

    let command = runner.invocations()[0].command_string();
    assert!(command.contains("authorize-security-group-ingress"));
    assert!(command.contains("--protocol udp"));
    assert!(command.contains("--port 46224"));
    assert!(command.contains("--cidr 10.0.0.9/32"));
}

#[rstest]
#[tokio::test]
async fn presign_returns_the_trimmed_url() {
    let runner = ScriptedRunner::new();
    runner.push_json("https://bucket.s3.test/key?sig=abc\n");
    let gateway = gateway(&runner);

    let url = gateway
        .presign_object("bucket", "key", 3600)
        .await
        .expect("presign should succeed");
    assert_eq!(url, "https://bucket.s3.test/key?sig=abc");

    let command = runner.invocations()[0].command_string();
    assert!(command.contains("s3 presign s3://bucket/key --expires-in 3600"));
}

#[rstest]
#[tokio::test]
async fn bucket_creation_pins_the_location_outside_us_east_1() {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let gateway = AwsCliGateway::new("aws", "eu-west-1", Vec::new(), runner.clone());

    gateway
        .create_bucket("staging")
        .await
        .expect("bucket creation should succeed");

    let command = runner.invocations()[0].command_string();
    assert!(command.contains("--create-bucket-configuration LocationConstraint=eu-west-1"));
}

#[rstest]
#[tokio::test]
async fn bucket_creation_omits_the_location_in_us_east_1() {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let gateway = gateway(&runner);

    gateway
        .create_bucket("staging")
        .await
        .expect("bucket creation should succeed");

    let command = runner.invocations()[0].command_string();
    assert!(!command.contains("LocationConstraint"));
}
