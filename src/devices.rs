//! Block-device mapping translation between the source image and the
//! transfer instances.
//!
//! Every snapshot-backed device in the source image's mapping is assigned a
//! free device slot on the transfer instances: the source-side copy is
//! disposable (`delete_on_termination`), the destination-side copy must
//! outlive its instance so the written data can be snapshotted or attached
//! afterwards. The correspondence map links the source image's device paths
//! to the transfer slots and is reversed later to locate the transferred
//! volumes during reconstruction.

use std::collections::{BTreeMap, VecDeque};

use thiserror::Error;

/// Device paths usable for attaching copied volumes to a transfer instance.
pub const FREE_DEVICE_PATHS: [&str; 11] = [
    "/dev/sdf", "/dev/sdg", "/dev/sdh", "/dev/sdi", "/dev/sdj", "/dev/sdk", "/dev/sdl",
    "/dev/sdm", "/dev/sdn", "/dev/sdo", "/dev/sdp",
];

/// Device path of the ephemeral scratch disk used as working space during
/// the transfer. Never part of the final image.
pub const SCRATCH_DEVICE_PATH: &str = "/dev/sdb";

/// Root device path of the transfer instances' own base image, excluded
/// from volume discovery and reconstruction.
pub const ROOT_DEVICE_PATH: &str = "/dev/sda1";

/// A device mapping keyed by device path.
pub type DeviceMapping = BTreeMap<String, BlockDeviceDescriptor>;

/// One entry of a block-device mapping.
///
/// A non-root descriptor is either snapshot-backed (persistent) or ephemeral,
/// never both.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BlockDeviceDescriptor {
    /// Backing snapshot, when the device is persistent.
    pub snapshot_id: Option<String>,
    /// Volume size in GiB. `None` inherits the snapshot's size.
    pub size_gib: Option<u32>,
    /// Volume class (for example `standard` or `io1`).
    pub volume_type: Option<String>,
    /// Provisioned IOPS for `io1`-class volumes.
    pub iops: Option<u32>,
    /// Whether the provider deletes the volume with its instance.
    pub delete_on_termination: bool,
    /// Instance-store name (for example `ephemeral0`) for scratch devices.
    pub ephemeral_name: Option<String>,
}

impl BlockDeviceDescriptor {
    /// Returns `true` when the descriptor references a persistent snapshot.
    #[must_use]
    pub const fn is_snapshot_backed(&self) -> bool {
        self.snapshot_id.is_some()
    }
}

/// Ordered pool of unused device-path tokens, consumed front to back.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DevicePool {
    tokens: VecDeque<String>,
}

impl Default for DevicePool {
    fn default() -> Self {
        Self {
            tokens: FREE_DEVICE_PATHS.iter().map(|path| (*path).to_owned()).collect(),
        }
    }
}

impl DevicePool {
    /// Creates a pool from an explicit token sequence.
    #[must_use]
    pub fn new(tokens: impl IntoIterator<Item = String>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
        }
    }

    /// Number of tokens remaining in the pool.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.tokens.len()
    }

    fn pop(&mut self) -> Result<String, TranslateError> {
        self.tokens.pop_front().ok_or(TranslateError::DevicePoolExhausted)
    }
}

/// Errors raised while translating a device mapping.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum TranslateError {
    /// Raised when the source image holds more persistent devices than the
    /// pool has slots.
    #[error("no free device paths left for transfer volumes")]
    DevicePoolExhausted,
}

/// Output of [`translate`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TranslatedMappings {
    /// Mapping for the source-side transfer instance: snapshot-backed copies
    /// of the source image's devices, disposable with the instance.
    pub transfer_source: DeviceMapping,
    /// Mapping for the destination-side transfer instance: blank volumes of
    /// matching size and class that survive instance termination.
    pub transfer_destination: DeviceMapping,
    /// Source image device path → transfer-instance device path, for every
    /// snapshot-backed source device.
    pub correspondence: BTreeMap<String, String>,
}

impl TranslatedMappings {
    /// Returns the correspondence map inverted (transfer path → source path).
    #[must_use]
    pub fn reversed_correspondence(&self) -> BTreeMap<String, String> {
        self.correspondence
            .iter()
            .map(|(source, transfer)| (transfer.clone(), source.clone()))
            .collect()
    }
}

/// Builds the transfer-instance device mappings for a source image.
///
/// Entries without a snapshot id are skipped; they belong to the transfer
/// instance's own base image, not to the machine image being copied. After
/// all persistent devices are assigned, one ephemeral scratch device is
/// appended to both mappings at [`SCRATCH_DEVICE_PATH`].
///
/// # Errors
///
/// Returns [`TranslateError::DevicePoolExhausted`] when the pool runs out of
/// tokens before every persistent device is assigned.
pub fn translate(
    source_mapping: &DeviceMapping,
    pool: &mut DevicePool,
) -> Result<TranslatedMappings, TranslateError> {
    let mut out = TranslatedMappings::default();

    for (path, descriptor) in source_mapping {
        let Some(snapshot_id) = descriptor.snapshot_id.as_ref() else {
            continue;
        };
        let slot = pool.pop()?;

        out.transfer_source.insert(
            slot.clone(),
            BlockDeviceDescriptor {
                snapshot_id: Some(snapshot_id.clone()),
                size_gib: descriptor.size_gib,
                volume_type: descriptor.volume_type.clone(),
                iops: descriptor.iops,
                delete_on_termination: true,
                ephemeral_name: None,
            },
        );
        out.transfer_destination.insert(
            slot.clone(),
            BlockDeviceDescriptor {
                snapshot_id: None,
                size_gib: descriptor.size_gib,
                volume_type: descriptor.volume_type.clone(),
                iops: descriptor.iops,
                delete_on_termination: false,
                ephemeral_name: None,
            },
        );
        out.correspondence.insert(path.clone(), slot);
    }

    let scratch = BlockDeviceDescriptor {
        ephemeral_name: Some(String::from("ephemeral0")),
        ..BlockDeviceDescriptor::default()
    };
    out.transfer_source
        .insert(String::from(SCRATCH_DEVICE_PATH), scratch.clone());
    out.transfer_destination
        .insert(String::from(SCRATCH_DEVICE_PATH), scratch);

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn snapshot_device(snapshot_id: &str, size_gib: u32) -> BlockDeviceDescriptor {
        BlockDeviceDescriptor {
            snapshot_id: Some(snapshot_id.to_owned()),
            size_gib: Some(size_gib),
            volume_type: Some(String::from("standard")),
            delete_on_termination: true,
            ..BlockDeviceDescriptor::default()
        }
    }

    #[rstest]
    fn translates_each_snapshot_backed_device_once() {
        let mut mapping = DeviceMapping::new();
        mapping.insert(String::from("/dev/sda1"), snapshot_device("snap-root", 8));
        mapping.insert(String::from("/dev/sdc"), snapshot_device("snap-data", 100));
        mapping.insert(
            String::from("/dev/sde"),
            BlockDeviceDescriptor {
                ephemeral_name: Some(String::from("ephemeral1")),
                ..BlockDeviceDescriptor::default()
            },
        );

        let mut pool = DevicePool::default();
        let translated = translate(&mapping, &mut pool).expect("translation should succeed");

        assert_eq!(translated.correspondence.len(), 2);
        // Two persistent devices plus the scratch disk.
        assert_eq!(translated.transfer_source.len(), 3);
        assert_eq!(translated.transfer_destination.len(), 3);
        assert_eq!(pool.remaining(), FREE_DEVICE_PATHS.len() - 2);

        let slot = translated
            .correspondence
            .get("/dev/sdc")
            .expect("data device should be mapped");
        let source_side = translated
            .transfer_source
            .get(slot)
            .expect("source descriptor");
        let dest_side = translated
            .transfer_destination
            .get(slot)
            .expect("destination descriptor");

        assert_eq!(source_side.snapshot_id.as_deref(), Some("snap-data"));
        assert!(source_side.delete_on_termination);
        assert_eq!(dest_side.snapshot_id, None);
        assert!(!dest_side.delete_on_termination);
        assert_eq!(dest_side.size_gib, Some(100));
    }

    #[rstest]
    fn pool_tokens_are_never_reused() {
        let mut mapping = DeviceMapping::new();
        for index in 0..4 {
            mapping.insert(
                format!("/dev/sd{}", char::from(b'c' + index)),
                snapshot_device(&format!("snap-{index}"), 10),
            );
        }

        let mut pool = DevicePool::default();
        let translated = translate(&mapping, &mut pool).expect("translation should succeed");

        let mut slots: Vec<_> = translated.correspondence.values().collect();
        slots.sort();
        slots.dedup();
        assert_eq!(slots.len(), 4, "each device must receive a distinct slot");
    }

    #[rstest]
    fn fails_when_pool_is_exhausted() {
        let mut mapping = DeviceMapping::new();
        mapping.insert(String::from("/dev/sdc"), snapshot_device("snap-1", 10));
        mapping.insert(String::from("/dev/sdd"), snapshot_device("snap-2", 10));

        let mut pool = DevicePool::new([String::from("/dev/sdf")]);
        let err = translate(&mapping, &mut pool).expect_err("pool should be exhausted");
        assert_eq!(err, TranslateError::DevicePoolExhausted);
    }

    #[rstest]
    fn scratch_device_is_appended_to_both_mappings() {
        let mapping = DeviceMapping::new();
        let mut pool = DevicePool::default();
        let translated = translate(&mapping, &mut pool).expect("translation should succeed");

        for side in [&translated.transfer_source, &translated.transfer_destination] {
            let scratch = side
                .get(SCRATCH_DEVICE_PATH)
                .expect("scratch device present");
            assert_eq!(scratch.ephemeral_name.as_deref(), Some("ephemeral0"));
            assert_eq!(scratch.snapshot_id, None);
        }
    }

    #[rstest]
    fn reversed_correspondence_is_a_bijection() {
        let mut mapping = DeviceMapping::new();
        mapping.insert(String::from("/dev/sda1"), snapshot_device("snap-a", 8));
        mapping.insert(String::from("/dev/sdc"), snapshot_device("snap-b", 20));

        let mut pool = DevicePool::default();
        let translated = translate(&mapping, &mut pool).expect("translation should succeed");
        let reversed = translated.reversed_correspondence();

        assert_eq!(reversed.len(), translated.correspondence.len());
        for (source, transfer) in &translated.correspondence {
            assert_eq!(reversed.get(transfer), Some(source));
        }
    }
}
