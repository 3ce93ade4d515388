//! Blocking state-transition waits layered over the raw gateway calls.
//!
//! Every wait re-fetches the record on a fixed interval; there is no
//! exponential back-off or jitter because call volume is low and the wall
//! time is dominated by the provider's own latency. A wait is unbounded
//! unless its [`PollPolicy`] carries a deadline, in which case expiry
//! surfaces as [`WaitError::Timeout`].

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::sleep;
use tracing::debug;

use super::{CloudGateway, ImageState, InstanceRecord, InstanceState, SnapshotState, VolumeState};

/// Interval used for instance launch, snapshot, and image waits.
pub const LAUNCH_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Interval used for detach- and delete-style waits.
pub const TEARDOWN_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Fixed-interval polling parameters for one wait.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Sleep between successive describe calls.
    pub interval: Duration,
    /// Overall budget for the wait. `None` waits indefinitely.
    pub deadline: Option<Duration>,
}

impl PollPolicy {
    /// Policy with the given interval and no deadline.
    #[must_use]
    pub const fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    /// Returns a copy of the policy with an overall deadline applied.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    fn expiry(&self) -> Option<Instant> {
        self.deadline.map(|budget| Instant::now() + budget)
    }
}

/// The two interval families used across the workflow.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollSettings {
    /// Policy for launch-, snapshot-, and image-style waits.
    pub launch: PollPolicy,
    /// Policy for detach- and delete-style waits.
    pub teardown: PollPolicy,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            launch: PollPolicy::unbounded(LAUNCH_POLL_INTERVAL),
            teardown: PollPolicy::unbounded(TEARDOWN_POLL_INTERVAL),
        }
    }
}

impl PollSettings {
    /// Uniform settings, primarily for keeping tests fast.
    #[must_use]
    pub const fn uniform(interval: Duration) -> Self {
        Self {
            launch: PollPolicy::unbounded(interval),
            teardown: PollPolicy::unbounded(interval),
        }
    }
}

/// Errors raised by the polling helpers.
#[derive(Debug, Error)]
pub enum WaitError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the underlying gateway call fails.
    #[error("provider call failed while waiting for {action}")]
    Gateway {
        /// Wait that was in progress.
        action: &'static str,
        /// Underlying gateway error.
        #[source]
        source: E,
    },
    /// Raised when a deadline-bearing policy expires.
    #[error("timed out waiting for {action} on {resource}")]
    Timeout {
        /// Wait that was in progress.
        action: &'static str,
        /// Resource being waited on.
        resource: String,
    },
    /// Raised when a polled resource reaches an unexpected terminal state.
    #[error("{resource} reached unexpected state {state}")]
    UnexpectedState {
        /// Resource being waited on.
        resource: String,
        /// State the resource reported.
        state: String,
    },
}

fn expired(expiry: Option<Instant>) -> bool {
    expiry.is_some_and(|at| Instant::now() > at)
}

/// Polls an already-launched instance until it reports `running` and
/// returns its final record, which carries the public address and volume
/// attachments the workflow needs next.
///
/// # Errors
///
/// Returns [`WaitError::Gateway`] when a describe call fails and
/// [`WaitError::Timeout`] when the policy deadline expires first.
pub async fn await_instance_running<G: CloudGateway>(
    gateway: &G,
    instance_id: &str,
    policy: &PollPolicy,
) -> Result<InstanceRecord, WaitError<G::Error>> {
    let instance =
        await_instance_state(gateway, instance_id, InstanceState::Running, "instance launch", policy)
            .await?;
    debug!(instance = %instance.id, "instance running");
    Ok(instance)
}

/// Terminates an instance and polls until it reports `terminated`.
///
/// # Errors
///
/// Returns [`WaitError::Gateway`] on provider failure and
/// [`WaitError::Timeout`] when the policy deadline expires first.
pub async fn terminate_and_await_terminated<G: CloudGateway>(
    gateway: &G,
    instance_id: &str,
    policy: &PollPolicy,
) -> Result<(), WaitError<G::Error>> {
    let action = "instance termination";
    gateway
        .terminate_instance(instance_id)
        .await
        .map_err(|source| WaitError::Gateway { action, source })?;

    await_instance_state(gateway, instance_id, InstanceState::Terminated, action, policy)
        .await
        .map(|_| ())
}

/// Force-stops an instance and polls until it reports `stopped`.
///
/// # Errors
///
/// Returns [`WaitError::Gateway`] on provider failure and
/// [`WaitError::Timeout`] when the policy deadline expires first.
pub async fn stop_and_await_stopped<G: CloudGateway>(
    gateway: &G,
    instance_id: &str,
    policy: &PollPolicy,
) -> Result<(), WaitError<G::Error>> {
    let action = "instance stop";
    gateway
        .stop_instance(instance_id)
        .await
        .map_err(|source| WaitError::Gateway { action, source })?;

    await_instance_state(gateway, instance_id, InstanceState::Stopped, action, policy)
        .await
        .map(|_| ())
}

/// Polls an instance until it leaves the `running` state.
///
/// The transfer workflow uses this as its sole completion signal: the
/// destination transfer instance shuts itself down when the copy finishes.
///
/// # Errors
///
/// Returns [`WaitError::Gateway`] on provider failure and
/// [`WaitError::Timeout`] when the policy deadline expires first.
pub async fn await_instance_stopped_running<G: CloudGateway>(
    gateway: &G,
    instance_id: &str,
    policy: &PollPolicy,
) -> Result<(), WaitError<G::Error>> {
    let action = "transfer completion";
    let expiry = policy.expiry();
    loop {
        let instance = gateway
            .describe_instance(instance_id)
            .await
            .map_err(|source| WaitError::Gateway { action, source })?;
        if instance.state != InstanceState::Running {
            return Ok(());
        }
        if expired(expiry) {
            return Err(WaitError::Timeout {
                action,
                resource: instance_id.to_owned(),
            });
        }
        sleep(policy.interval).await;
    }
}

async fn await_instance_state<G: CloudGateway>(
    gateway: &G,
    instance_id: &str,
    target: InstanceState,
    action: &'static str,
    policy: &PollPolicy,
) -> Result<InstanceRecord, WaitError<G::Error>> {
    let expiry = policy.expiry();
    loop {
        let instance = gateway
            .describe_instance(instance_id)
            .await
            .map_err(|source| WaitError::Gateway { action, source })?;
        if instance.state == target {
            return Ok(instance);
        }
        if expired(expiry) {
            return Err(WaitError::Timeout {
                action,
                resource: instance_id.to_owned(),
            });
        }
        sleep(policy.interval).await;
    }
}

/// Force-detaches a volume and polls until it reports `available`.
///
/// # Errors
///
/// Returns [`WaitError::Gateway`] on provider failure and
/// [`WaitError::Timeout`] when the policy deadline expires first.
pub async fn detach_and_await_available<G: CloudGateway>(
    gateway: &G,
    volume_id: &str,
    policy: &PollPolicy,
) -> Result<(), WaitError<G::Error>> {
    let action = "volume detach";
    gateway
        .detach_volume(volume_id)
        .await
        .map_err(|source| WaitError::Gateway { action, source })?;

    let expiry = policy.expiry();
    loop {
        let volume = gateway
            .describe_volume(volume_id)
            .await
            .map_err(|source| WaitError::Gateway { action, source })?;
        if volume.state == VolumeState::Available {
            return Ok(());
        }
        if expired(expiry) {
            return Err(WaitError::Timeout {
                action,
                resource: volume_id.to_owned(),
            });
        }
        sleep(policy.interval).await;
    }
}

/// Polls a batch of snapshots until every one reports `completed`.
///
/// # Errors
///
/// Returns [`WaitError::UnexpectedState`] as soon as any snapshot reports
/// `error`, [`WaitError::Gateway`] on provider failure, and
/// [`WaitError::Timeout`] when the policy deadline expires first.
pub async fn await_snapshots_completed<G: CloudGateway>(
    gateway: &G,
    snapshot_ids: &[String],
    policy: &PollPolicy,
) -> Result<(), WaitError<G::Error>> {
    let action = "snapshot completion";
    let expiry = policy.expiry();
    loop {
        let mut all_completed = true;
        for snapshot_id in snapshot_ids {
            let snapshot = gateway
                .describe_snapshot(snapshot_id)
                .await
                .map_err(|source| WaitError::Gateway { action, source })?;
            match snapshot.state {
                SnapshotState::Completed => {}
                SnapshotState::Error => {
                    return Err(WaitError::UnexpectedState {
                        resource: format!("snapshot {snapshot_id}"),
                        state: String::from("error"),
                    });
                }
                SnapshotState::Pending => all_completed = false,
            }
        }
        if all_completed {
            return Ok(());
        }
        if expired(expiry) {
            return Err(WaitError::Timeout {
                action,
                resource: format!("{} snapshots", snapshot_ids.len()),
            });
        }
        sleep(policy.interval).await;
    }
}

/// Polls an image until it reports `available`.
///
/// # Errors
///
/// Returns [`WaitError::UnexpectedState`] when the image reaches `failed`
/// or disappears, [`WaitError::Gateway`] on provider failure, and
/// [`WaitError::Timeout`] when the policy deadline expires first.
pub async fn await_image_available<G: CloudGateway>(
    gateway: &G,
    image_id: &str,
    policy: &PollPolicy,
) -> Result<(), WaitError<G::Error>> {
    let action = "image availability";
    let expiry = policy.expiry();
    loop {
        let image = gateway
            .describe_image(image_id)
            .await
            .map_err(|source| WaitError::Gateway { action, source })?
            .ok_or_else(|| WaitError::UnexpectedState {
                resource: format!("image {image_id}"),
                state: String::from("missing"),
            })?;
        match image.state {
            ImageState::Available => return Ok(()),
            ImageState::Failed => {
                return Err(WaitError::UnexpectedState {
                    resource: format!("image {image_id}"),
                    state: String::from("failed"),
                });
            }
            ImageState::Pending => {}
        }
        if expired(expiry) {
            return Err(WaitError::Timeout {
                action,
                resource: image_id.to_owned(),
            });
        }
        sleep(policy.interval).await;
    }
}
