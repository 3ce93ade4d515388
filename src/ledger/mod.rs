//! Reverse-order teardown registry for temporary cloud resources.
//!
//! Every resource-creating call in the copy workflow registers its teardown
//! here immediately after the create returns, before any further step runs,
//! so no resource can be created and then lost between creation and
//! registration. Draining consumes entries most-recent-first because later
//! resources depend on earlier ones (an instance must be gone before its
//! security group can be deleted). A failing entry is recorded and skipped;
//! every registered entry gets exactly one teardown attempt.
//!
//! The ledger holds temporary objects only. The new image and the snapshots
//! backing it are never registered.

use tracing::{info, warn};

use crate::gateway::wait::{
    PollSettings, detach_and_await_available, terminate_and_await_terminated,
};
use crate::gateway::CloudGateway;


/// Which regional endpoint a teardown targets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Side {
    /// The region the image is copied from.
    Source,
    /// The region the image is copied to.
    Destination,
}

/// One teardown operation, paired with the handle it applies to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TeardownAction {
    /// Terminate an instance and wait until it reports `terminated`.
    TerminateInstance {
        /// Endpoint holding the instance.
        side: Side,
        /// Instance to terminate.
        instance_id: String,
    },
    /// Force-detach a volume and wait until it reports `available`.
    DetachVolume {
        /// Endpoint holding the volume.
        side: Side,
        /// Volume to detach.
        volume_id: String,
    },
    /// Delete an unattached volume.
    DeleteVolume {
        /// Endpoint holding the volume.
        side: Side,
        /// Volume to delete.
        volume_id: String,
    },
    /// Delete a security group.
    DeleteSecurityGroup {
        /// Endpoint holding the group.
        side: Side,
        /// Group name to delete.
        name: String,
    },
    /// Delete one object from the staging bucket.
    DeleteObject {
        /// Bucket holding the object.
        bucket: String,
        /// Object key to delete.
        key: String,
    },
    /// Delete the (empty) staging bucket.
    DeleteBucket {
        /// Bucket to delete.
        bucket: String,
    },
}

/// One registered resource awaiting teardown.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LedgerEntry {
    /// Human-readable line logged before the teardown runs.
    pub description: String,
    /// Operation that releases the resource.
    pub action: TeardownAction,
}

/// A teardown attempt that failed during the drain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DrainFailure {
    /// Description of the entry that failed.
    pub description: String,
    /// Rendered error from the failed attempt.
    pub message: String,
}

/// Outcome of a full drain.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DrainReport {
    /// Number of entries attempted (always equals the registered count).
    pub attempted: usize,
    /// Entries whose teardown failed.
    pub failures: Vec<DrainFailure>,
}

impl DrainReport {
    /// Returns `true` when every attempted teardown succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Insertion-ordered record of temporary resources and their teardowns.
///
/// Not safe for concurrent registration; the copy workflow is a single
/// logical flow of control.
#[derive(Debug, Default)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
}

impl Ledger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a teardown entry. No side effects beyond the append.
    pub fn register(&mut self, action: TeardownAction, description: impl Into<String>) {
        self.entries.push(LedgerEntry {
            description: description.into(),
            action,
        });
    }

    /// Number of entries currently registered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the registered entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Tears down every registered entry in reverse insertion order.
    ///
    /// Each entry's description is logged before its teardown runs. A
    /// failure is recorded in the report and never prevents the remaining
    /// attempts. The ledger is empty afterwards.
    pub async fn drain_all<G: CloudGateway>(
        &mut self,
        source: &G,
        destination: &G,
        polls: &PollSettings,
    ) -> DrainReport {
        info!("cleaning up temporary cloud resources");
        let mut report = DrainReport::default();

        while let Some(entry) = self.entries.pop() {
            info!("{}", entry.description);
            report.attempted += 1;
            if let Err(message) =
                execute_action(&entry.action, source, destination, polls).await
            {
                warn!(error = %message, "teardown failed: {}", entry.description);
                report.failures.push(DrainFailure {
                    description: entry.description,
                    message,
                });
            }
        }

        report
    }
}

fn pick<'a, G>(side: Side, source: &'a G, destination: &'a G) -> &'a G {
    match side {
        Side::Source => source,
        Side::Destination => destination,
    }
}

async fn execute_action<G: CloudGateway>(
    action: &TeardownAction,
    source: &G,
    destination: &G,
    polls: &PollSettings,
) -> Result<(), String> {
    match action {
        TeardownAction::TerminateInstance { side, instance_id } => {
            let gateway = pick(*side, source, destination);
            terminate_and_await_terminated(gateway, instance_id, &polls.launch)
                .await
                .map_err(|err| err.to_string())
        }
        TeardownAction::DetachVolume { side, volume_id } => {
            let gateway = pick(*side, source, destination);
            detach_and_await_available(gateway, volume_id, &polls.teardown)
                .await
                .map_err(|err| err.to_string())
        }
        TeardownAction::DeleteVolume { side, volume_id } => {
            let gateway = pick(*side, source, destination);
            gateway
                .delete_volume(volume_id)
                .await
                .map_err(|err| err.to_string())
        }
        TeardownAction::DeleteSecurityGroup { side, name } => {
            let gateway = pick(*side, source, destination);
            gateway
                .delete_security_group(name)
                .await
                .map_err(|err| err.to_string())
        }
        TeardownAction::DeleteObject { bucket, key } => source
            .delete_object(bucket, key)
            .await
            .map_err(|err| err.to_string()),
        TeardownAction::DeleteBucket { bucket } => source
            .delete_bucket(bucket)
            .await
            .map_err(|err| err.to_string()),
    }
}
