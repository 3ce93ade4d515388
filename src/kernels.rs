//! Static per-region lookup tables for boot-loader kernels and transfer
//! base images.
//!
//! Paravirtual images reference a region-scoped PV-GRUB kernel id. When the
//! source image uses its region's stock PV-GRUB kernel, the copy can
//! substitute the destination region's equivalent automatically; anything
//! else needs an explicit override from the operator.

use thiserror::Error;

/// Stock PV-GRUB kernel id per region (64-bit, `hd0`).
const PVGRUB_KERNEL_IDS: [(&str, &str); 7] = [
    ("us-east-1", "aki-88aa75e1"),
    ("us-west-1", "aki-f77e26b2"),
    ("us-west-2", "aki-fc37bacc"),
    ("eu-west-1", "aki-71665e05"),
    ("ap-southeast-1", "aki-fe1354ac"),
    ("ap-northeast-1", "aki-44992845"),
    ("sa-east-1", "aki-c48f51d9"),
];

/// EBS-backed 64-bit base image per region used to boot the transfer
/// instances.
const TRANSFER_BASE_IMAGES: [(&str, &str); 7] = [
    ("us-east-1", "ami-1624987f"),
    ("us-west-1", "ami-1bf9de5e"),
    ("us-west-2", "ami-2a31bf1a"),
    ("eu-west-1", "ami-c37474b7"),
    ("ap-southeast-1", "ami-a6a7e7f4"),
    ("ap-northeast-1", "ami-4e6cd34f"),
    ("sa-east-1", "ami-1e08d103"),
];

/// Errors raised while resolving per-region identifiers.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum KernelError {
    /// Raised when the destination kernel id cannot be determined from the
    /// table and no override was supplied.
    #[error(
        "could not determine destination kernel id for {region}; specify it with --kernel-id"
    )]
    Unresolved {
        /// Region whose table entry did not match.
        region: String,
    },
    /// Raised when a region has no transfer base image entry.
    #[error("no transfer base image known for region {region}")]
    UnknownRegion {
        /// Region missing from the table.
        region: String,
    },
}

fn table_lookup(table: &[(&str, &'static str)], region: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(key, _)| *key == region)
        .map(|(_, value)| *value)
}

/// Resolves the kernel id the new image should register with.
///
/// Images without a kernel id (HVM) resolve to `None`. An explicit override
/// always wins. Otherwise the source kernel must equal the source region's
/// stock PV-GRUB id, in which case the destination region's stock id is
/// used.
///
/// # Errors
///
/// Returns [`KernelError::Unresolved`] when the source kernel does not
/// match the table and no override was supplied.
pub fn resolve_kernel_id(
    source_region: &str,
    destination_region: &str,
    source_kernel_id: Option<&str>,
    override_kernel_id: Option<&str>,
) -> Result<Option<String>, KernelError> {
    let Some(source_kernel) = source_kernel_id else {
        return Ok(None);
    };
    if let Some(explicit) = override_kernel_id {
        return Ok(Some(explicit.to_owned()));
    }

    let expected = table_lookup(&PVGRUB_KERNEL_IDS, source_region);
    let replacement = table_lookup(&PVGRUB_KERNEL_IDS, destination_region);
    match (expected, replacement) {
        (Some(expected), Some(replacement)) if expected == source_kernel => {
            Ok(Some(replacement.to_owned()))
        }
        _ => Err(KernelError::Unresolved {
            region: destination_region.to_owned(),
        }),
    }
}

/// Returns the transfer base image for a region.
///
/// # Errors
///
/// Returns [`KernelError::UnknownRegion`] when the region has no entry.
pub fn transfer_base_image(region: &str) -> Result<&'static str, KernelError> {
    table_lookup(&TRANSFER_BASE_IMAGES, region).ok_or_else(|| KernelError::UnknownRegion {
        region: region.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn hvm_images_resolve_to_no_kernel() {
        let resolved = resolve_kernel_id("us-east-1", "eu-west-1", None, None)
            .expect("resolution should succeed");
        assert_eq!(resolved, None);
    }

    #[rstest]
    fn explicit_override_wins() {
        let resolved =
            resolve_kernel_id("us-east-1", "eu-west-1", Some("aki-custom"), Some("aki-forced"))
                .expect("resolution should succeed");
        assert_eq!(resolved.as_deref(), Some("aki-forced"));
    }

    #[rstest]
    fn stock_kernel_maps_to_destination_entry() {
        let resolved =
            resolve_kernel_id("us-east-1", "eu-west-1", Some("aki-88aa75e1"), None)
                .expect("resolution should succeed");
        assert_eq!(resolved.as_deref(), Some("aki-71665e05"));
    }

    #[rstest]
    fn non_stock_kernel_without_override_is_unresolved() {
        let err = resolve_kernel_id("us-east-1", "eu-west-1", Some("aki-custom"), None)
            .expect_err("resolution should fail");
        assert_eq!(
            err,
            KernelError::Unresolved {
                region: String::from("eu-west-1")
            }
        );
    }

    #[rstest]
    fn unknown_region_has_no_transfer_image() {
        let err = transfer_base_image("mars-north-1").expect_err("lookup should fail");
        assert_eq!(
            err,
            KernelError::UnknownRegion {
                region: String::from("mars-north-1")
            }
        );
    }

    #[rstest]
    fn known_region_has_a_transfer_image() {
        let image = transfer_base_image("us-west-2").expect("lookup should succeed");
        assert_eq!(image, "ami-2a31bf1a");
    }
}
