//! End-to-end copy scenarios driven through the public API against the
//! in-memory cloud double.

use std::time::Duration;

use rstest::rstest;

use amiferry::devices::{BlockDeviceDescriptor, DeviceMapping};
use amiferry::gateway::{ImageRecord, ImageState, Platform};
use amiferry::test_support::FakeCloud;
use amiferry::{CopyError, CopyOrchestrator, CopyRequest, PollSettings};

fn fast_polls() -> PollSettings {
    PollSettings::uniform(Duration::from_millis(1))
}

fn source_image(platform: Platform) -> ImageRecord {
    let mut mapping = DeviceMapping::new();
    mapping.insert(
        String::from("/dev/sda1"),
        BlockDeviceDescriptor {
            snapshot_id: Some(String::from("snap-root")),
            size_gib: Some(10),
            volume_type: None,
            iops: None,
            delete_on_termination: true,
            ephemeral_name: None,
        },
    );
    ImageRecord {
        id: String::from("ami-src"),
        name: String::from("app-base"),
        description: None,
        state: ImageState::Available,
        platform,
        architecture: String::from("x86_64"),
        kernel_id: None,
        root_device_name: Some(String::from("/dev/sda1")),
        block_device_mapping: mapping,
    }
}

fn request() -> CopyRequest {
    let mut request = CopyRequest::new("ami-src", "us-west-2", "ap-northeast-1");
    request.name = String::from("behaviour-run");
    request.server_tool = camino::Utf8PathBuf::from("/tools/server");
    request.client_tool = camino::Utf8PathBuf::from("/tools/client");
    request.source_boot_template = String::from("start server with @secret@");
    request.destination_boot_template = String::from("pull from @peer@ with @secret@");
    request
}

#[rstest]
#[tokio::test]
async fn a_linux_copy_leaves_only_the_image_and_its_snapshots() {
    let source = FakeCloud::new();
    let destination = FakeCloud::new();
    source.insert_image(source_image(Platform::Linux));

    let outcome =
        CopyOrchestrator::new(source.clone(), destination.clone(), request(), fast_polls())
            .execute()
            .await
            .expect("copy should succeed");

    assert!(outcome.drain.is_clean());
    assert!(outcome.image_id.starts_with("ami-"));

    // The registered image survives the drain under the source image's
    // name; the transfer plumbing does not.
    assert_eq!(destination.registered_images().len(), 1);
    assert_eq!(destination.registered_images()[0].name, "app-base");
    assert!(source.live_instances().is_empty());
    assert!(destination.live_instances().is_empty());
    assert!(source.live_groups().is_empty());
    assert!(destination.live_groups().is_empty());
    let (buckets, objects) = source.live_storage();
    assert!(buckets.is_empty());
    assert!(objects.is_empty());
}

#[rstest]
#[tokio::test]
async fn a_mid_transfer_failure_tears_down_both_regions() {
    let source = FakeCloud::new();
    let destination = FakeCloud::new();
    source.insert_image(source_image(Platform::Linux));
    destination.fail_on("run_instance");

    let err =
        CopyOrchestrator::new(source.clone(), destination.clone(), request(), fast_polls())
            .execute()
            .await
            .expect_err("destination launch failure must propagate");
    assert!(matches!(err, CopyError::Gateway { .. }));

    // The source instance had already launched and was cleaned up again.
    assert_eq!(source.launch_specs().len(), 1);
    assert!(source.live_instances().is_empty());
    assert!(source.live_groups().is_empty());
    assert!(destination.live_groups().is_empty());
    let (buckets, objects) = source.live_storage();
    assert!(buckets.is_empty());
    assert!(objects.is_empty());
}

#[rstest]
#[tokio::test]
async fn a_windows_copy_needs_its_template_up_front() {
    let source = FakeCloud::new();
    let destination = FakeCloud::new();
    source.insert_image(source_image(Platform::Windows));

    let err =
        CopyOrchestrator::new(source.clone(), destination.clone(), request(), fast_polls())
            .execute()
            .await
            .expect_err("missing template must fail");
    assert!(matches!(err, CopyError::MissingWindowsTemplate));
    assert!(source.launch_specs().is_empty());
}
