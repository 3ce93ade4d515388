//! Test support utilities shared across unit and integration tests.
//!
//! [`FakeCloud`] is an in-memory stand-in for one regional endpoint. It
//! hands out deterministic identifiers, advances instance and snapshot
//! states the way the provider would, records every call, and supports
//! injected failures so tests can abort the workflow at any phase boundary.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use crate::devices::ROOT_DEVICE_PATH;
use crate::gateway::{
    CloudGateway, GatewayFuture, ImageRecord, ImageState, IngressRule, InstanceRecord,
    InstanceState, LaunchSpec, RegisterImageSpec, SnapshotRecord, SnapshotState, VolumeRecord,
    VolumeState,
};
use crate::runner::{CommandOutput, CommandRunner, RunnerError};

/// Error type returned by [`FakeCloud`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("fake cloud rejected {op}: {message}")]
pub struct FakeCloudError {
    /// Operation that failed.
    pub op: String,
    /// Scripted failure message.
    pub message: String,
}

#[derive(Debug)]
struct FakeInstance {
    record: InstanceRecord,
    planned_states: VecDeque<InstanceState>,
}

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<String>,
    fail_ops: BTreeSet<String>,
    images: BTreeMap<String, ImageRecord>,
    instances: BTreeMap<String, FakeInstance>,
    volumes: BTreeMap<String, VolumeRecord>,
    snapshots: BTreeMap<String, SnapshotRecord>,
    snapshots_fail: bool,
    launch_specs: Vec<LaunchSpec>,
    registered_images: Vec<RegisterImageSpec>,
    buckets: BTreeSet<String>,
    objects: BTreeSet<(String, String)>,
    groups: BTreeSet<String>,
    rules: Vec<(String, IngressRule)>,
    next_id: u32,
}

impl FakeState {
    fn allocate(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn check(&mut self, op: &str, detail: &str) -> Result<(), FakeCloudError> {
        self.calls.push(if detail.is_empty() {
            op.to_owned()
        } else {
            format!("{op} {detail}")
        });
        if self.fail_ops.contains(op) {
            return Err(FakeCloudError {
                op: op.to_owned(),
                message: String::from("injected failure"),
            });
        }
        Ok(())
    }
}

/// In-memory gateway double for one region.
#[derive(Clone, Debug, Default)]
pub struct FakeCloud {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCloud {
    /// Creates an empty fake endpoint.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Seeds an image so describe and name lookups can find it.
    pub fn insert_image(&self, image: ImageRecord) {
        self.lock().images.insert(image.id.clone(), image);
    }

    /// Makes the named operation fail on every call.
    pub fn fail_on(&self, op: &str) {
        self.lock().fail_ops.insert(op.to_owned());
    }

    /// Makes every snapshot report `error` instead of completing.
    pub fn fail_snapshots(&self) {
        self.lock().snapshots_fail = true;
    }

    /// Snapshot of every call made so far, in order, as `"op detail"` lines.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Launch specs received by `run_instance`, in order.
    #[must_use]
    pub fn launch_specs(&self) -> Vec<LaunchSpec> {
        self.lock().launch_specs.clone()
    }

    /// Register-image specs received, in order.
    #[must_use]
    pub fn registered_images(&self) -> Vec<RegisterImageSpec> {
        self.lock().registered_images.clone()
    }

    /// Ingress rules granted so far as `(group, rule)` pairs.
    #[must_use]
    pub fn ingress_rules(&self) -> Vec<(String, IngressRule)> {
        self.lock().rules.clone()
    }

    /// Ids of volumes still present on this endpoint.
    #[must_use]
    pub fn live_volumes(&self) -> Vec<String> {
        self.lock().volumes.keys().cloned().collect()
    }

    /// Ids of instances not yet terminated.
    #[must_use]
    pub fn live_instances(&self) -> Vec<String> {
        self.lock()
            .instances
            .values()
            .filter(|inst| inst.record.state != InstanceState::Terminated)
            .map(|inst| inst.record.id.clone())
            .collect()
    }

    /// Security groups still present on this endpoint.
    #[must_use]
    pub fn live_groups(&self) -> Vec<String> {
        self.lock().groups.iter().cloned().collect()
    }

    /// Buckets and objects still present on this endpoint.
    #[must_use]
    pub fn live_storage(&self) -> (Vec<String>, Vec<(String, String)>) {
        let state = self.lock();
        (
            state.buckets.iter().cloned().collect(),
            state.objects.iter().cloned().collect(),
        )
    }

    fn fake_launch(state: &mut FakeState, spec: &LaunchSpec) -> InstanceRecord {
        let id = state.allocate("i");
        let ordinal = state.next_id;

        let mut attached = BTreeMap::new();
        let root_volume = state.allocate("vol");
        state.volumes.insert(
            root_volume.clone(),
            VolumeRecord {
                id: root_volume.clone(),
                state: VolumeState::InUse,
            },
        );
        attached.insert(String::from(ROOT_DEVICE_PATH), root_volume);
        for (device, descriptor) in &spec.block_device_mapping {
            if descriptor.ephemeral_name.is_some() {
                continue;
            }
            let volume_id = state.allocate("vol");
            state.volumes.insert(
                volume_id.clone(),
                VolumeRecord {
                    id: volume_id.clone(),
                    state: VolumeState::InUse,
                },
            );
            attached.insert(device.clone(), volume_id);
        }

        let record = InstanceRecord {
            id: id.clone(),
            state: InstanceState::Pending,
            public_dns: Some(format!("{id}.compute.fake")),
            public_ip: Some(format!("10.1.0.{ordinal}")),
            availability_zone: Some(String::from("fake-zone-1a")),
            attached_volumes: attached,
        };
        state.instances.insert(
            id,
            FakeInstance {
                record: record.clone(),
                planned_states: VecDeque::from([InstanceState::Running, InstanceState::Stopped]),
            },
        );
        record
    }

    fn describe_instance_inner(state: &mut FakeState, instance_id: &str) -> InstanceRecord {
        let Some(instance) = state.instances.get_mut(instance_id) else {
            return InstanceRecord {
                id: instance_id.to_owned(),
                state: InstanceState::Terminated,
                public_dns: None,
                public_ip: None,
                availability_zone: None,
                attached_volumes: BTreeMap::new(),
            };
        };
        if let Some(next) = instance.planned_states.pop_front() {
            instance.record.state = next;
        }
        instance.record.clone()
    }
}

impl CloudGateway for FakeCloud {
    type Error = FakeCloudError;

    fn describe_image(
        &self,
        image_id: &str,
    ) -> GatewayFuture<'_, Option<ImageRecord>, Self::Error> {
        let image_id = image_id.to_owned();
        Box::pin(async move {
            let mut state = self.lock();
            state.check("describe_image", &image_id)?;
            let image = state.images.get_mut(&image_id).map(|image| {
                // Pending images become available on the next look.
                if image.state == ImageState::Pending {
                    image.state = ImageState::Available;
                    let mut shown = image.clone();
                    shown.state = ImageState::Pending;
                    shown
                } else {
                    image.clone()
                }
            });
            Ok(image)
        })
    }

    fn images_by_name(&self, name: &str) -> GatewayFuture<'_, Vec<ImageRecord>, Self::Error> {
        let name = name.to_owned();
        Box::pin(async move {
            let mut state = self.lock();
            state.check("images_by_name", &name)?;
            Ok(state
                .images
                .values()
                .filter(|image| image.name == name)
                .cloned()
                .collect())
        })
    }

    fn run_instance<'a>(
        &'a self,
        spec: &'a LaunchSpec,
    ) -> GatewayFuture<'a, InstanceRecord, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.check("run_instance", &spec.image_id)?;
            state.launch_specs.push(spec.clone());
            Ok(Self::fake_launch(&mut state, spec))
        })
    }

    fn describe_instance(
        &self,
        instance_id: &str,
    ) -> GatewayFuture<'_, InstanceRecord, Self::Error> {
        let instance_id = instance_id.to_owned();
        Box::pin(async move {
            let mut state = self.lock();
            state.check("describe_instance", &instance_id)?;
            Ok(Self::describe_instance_inner(&mut state, &instance_id))
        })
    }

    fn terminate_instance(&self, instance_id: &str) -> GatewayFuture<'_, (), Self::Error> {
        let instance_id = instance_id.to_owned();
        Box::pin(async move {
            let mut state = self.lock();
            state.check("terminate_instance", &instance_id)?;
            if let Some(instance) = state.instances.get_mut(&instance_id) {
                instance.planned_states.clear();
                instance.record.state = InstanceState::Terminated;
            }
            Ok(())
        })
    }

    fn stop_instance(&self, instance_id: &str) -> GatewayFuture<'_, (), Self::Error> {
        let instance_id = instance_id.to_owned();
        Box::pin(async move {
            let mut state = self.lock();
            state.check("stop_instance", &instance_id)?;
            if let Some(instance) = state.instances.get_mut(&instance_id) {
                instance.planned_states.clear();
                instance.record.state = InstanceState::Stopped;
            }
            Ok(())
        })
    }

    fn tag_resource<'a>(
        &'a self,
        resource_id: &'a str,
        name: &'a str,
    ) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let detail = format!("{resource_id} {name}");
            self.lock().check("tag_resource", &detail)?;
            Ok(())
        })
    }

    fn describe_volume(&self, volume_id: &str) -> GatewayFuture<'_, VolumeRecord, Self::Error> {
        let volume_id = volume_id.to_owned();
        Box::pin(async move {
            let mut state = self.lock();
            state.check("describe_volume", &volume_id)?;
            Ok(state
                .volumes
                .get(&volume_id)
                .cloned()
                .unwrap_or(VolumeRecord {
                    id: volume_id,
                    state: VolumeState::Deleted,
                }))
        })
    }

    fn detach_volume(&self, volume_id: &str) -> GatewayFuture<'_, (), Self::Error> {
        let volume_id = volume_id.to_owned();
        Box::pin(async move {
            let mut state = self.lock();
            state.check("detach_volume", &volume_id)?;
            if let Some(volume) = state.volumes.get_mut(&volume_id) {
                volume.state = VolumeState::Available;
            }
            for instance in state.instances.values_mut() {
                instance
                    .record
                    .attached_volumes
                    .retain(|_, attached| attached != &volume_id);
            }
            Ok(())
        })
    }

    fn delete_volume(&self, volume_id: &str) -> GatewayFuture<'_, (), Self::Error> {
        let volume_id = volume_id.to_owned();
        Box::pin(async move {
            let mut state = self.lock();
            state.check("delete_volume", &volume_id)?;
            state.volumes.remove(&volume_id);
            Ok(())
        })
    }

    fn attach_volume<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
        device: &'a str,
    ) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            let detail = format!("{volume_id} {instance_id} {device}");
            state.check("attach_volume", &detail)?;
            if let Some(volume) = state.volumes.get_mut(volume_id) {
                volume.state = VolumeState::InUse;
            }
            if let Some(instance) = state.instances.get_mut(instance_id) {
                instance
                    .record
                    .attached_volumes
                    .insert(device.to_owned(), volume_id.to_owned());
            }
            Ok(())
        })
    }

    fn create_snapshot<'a>(
        &'a self,
        volume_id: &'a str,
        description: &'a str,
    ) -> GatewayFuture<'a, SnapshotRecord, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            let detail = format!("{volume_id} {description}");
            state.check("create_snapshot", &detail)?;
            let id = state.allocate("snap");
            let record = SnapshotRecord {
                id: id.clone(),
                state: SnapshotState::Pending,
            };
            state.snapshots.insert(id, record.clone());
            Ok(record)
        })
    }

    fn describe_snapshot(
        &self,
        snapshot_id: &str,
    ) -> GatewayFuture<'_, SnapshotRecord, Self::Error> {
        let snapshot_id = snapshot_id.to_owned();
        Box::pin(async move {
            let mut state = self.lock();
            state.check("describe_snapshot", &snapshot_id)?;
            let target = if state.snapshots_fail {
                SnapshotState::Error
            } else {
                SnapshotState::Completed
            };
            let record = state
                .snapshots
                .get_mut(&snapshot_id)
                .map(|snapshot| {
                    snapshot.state = target;
                    snapshot.clone()
                })
                .unwrap_or(SnapshotRecord {
                    id: snapshot_id,
                    state: target,
                });
            Ok(record)
        })
    }

    fn create_image_from_instance<'a>(
        &'a self,
        instance_id: &'a str,
        name: &'a str,
        description: Option<&'a str>,
    ) -> GatewayFuture<'a, String, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            let detail = format!("{instance_id} {name}");
            state.check("create_image_from_instance", &detail)?;
            let id = state.allocate("ami");
            state.images.insert(
                id.clone(),
                ImageRecord {
                    id: id.clone(),
                    name: name.to_owned(),
                    description: description.map(str::to_owned),
                    state: ImageState::Pending,
                    ..ImageRecord::default()
                },
            );
            Ok(id)
        })
    }

    fn register_image<'a>(
        &'a self,
        spec: &'a RegisterImageSpec,
    ) -> GatewayFuture<'a, String, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.check("register_image", &spec.name)?;
            state.registered_images.push(spec.clone());
            let id = state.allocate("ami");
            state.images.insert(
                id.clone(),
                ImageRecord {
                    id: id.clone(),
                    name: spec.name.clone(),
                    description: spec.description.clone(),
                    state: ImageState::Pending,
                    architecture: spec.architecture.clone(),
                    kernel_id: spec.kernel_id.clone(),
                    root_device_name: spec.root_device_name.clone(),
                    block_device_mapping: spec.block_device_mapping.clone(),
                    ..ImageRecord::default()
                },
            );
            Ok(id)
        })
    }

    fn create_security_group<'a>(
        &'a self,
        name: &'a str,
        description: &'a str,
    ) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            let detail = format!("{name} {description}");
            state.check("create_security_group", &detail)?;
            state.groups.insert(name.to_owned());
            Ok(())
        })
    }

    fn authorize_ingress<'a>(
        &'a self,
        group: &'a str,
        rule: &'a IngressRule,
    ) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            let detail = format!(
                "{group} {}:{}-{} {}",
                rule.protocol.as_str(),
                rule.from_port,
                rule.to_port,
                rule.cidr
            );
            state.check("authorize_ingress", &detail)?;
            state.rules.push((group.to_owned(), rule.clone()));
            Ok(())
        })
    }

    fn delete_security_group(&self, name: &str) -> GatewayFuture<'_, (), Self::Error> {
        let name = name.to_owned();
        Box::pin(async move {
            let mut state = self.lock();
            state.check("delete_security_group", &name)?;
            state.groups.remove(&name);
            Ok(())
        })
    }

    fn create_bucket(&self, bucket: &str) -> GatewayFuture<'_, (), Self::Error> {
        let bucket = bucket.to_owned();
        Box::pin(async move {
            let mut state = self.lock();
            state.check("create_bucket", &bucket)?;
            state.buckets.insert(bucket);
            Ok(())
        })
    }

    fn put_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        body: &'a camino::Utf8Path,
    ) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            let detail = format!("{bucket}/{key} {body}");
            state.check("put_object", &detail)?;
            state.objects.insert((bucket.to_owned(), key.to_owned()));
            Ok(())
        })
    }

    fn presign_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        expires_secs: u64,
    ) -> GatewayFuture<'a, String, Self::Error> {
        Box::pin(async move {
            let detail = format!("{bucket}/{key}");
            self.lock().check("presign_object", &detail)?;
            Ok(format!("https://{bucket}.fake/{key}?expires={expires_secs}"))
        })
    }

    fn delete_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            let detail = format!("{bucket}/{key}");
            state.check("delete_object", &detail)?;
            state.objects.remove(&(bucket.to_owned(), key.to_owned()));
            Ok(())
        })
    }

    fn delete_bucket(&self, bucket: &str) -> GatewayFuture<'_, (), Self::Error> {
        let bucket = bucket.to_owned();
        Box::pin(async move {
            let mut state = self.lock();
            state.check("delete_bucket", &bucket)?;
            state.buckets.remove(&bucket);
            Ok(())
        })
    }
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic CLI-gateway outcomes without spawning
/// processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<RecordedInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordedInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Environment overrides passed to the runner.
    pub envs: Vec<(String, String)>,
}

impl RecordedInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(self.args.iter().map(|arg| arg.to_string_lossy().into_owned()));
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<RecordedInvocation> {
        self.invocations
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(CommandOutput {
                code,
                stdout: stdout.into(),
                stderr: stderr.into(),
            });
    }

    /// Pushes a successful exit with the given stdout payload.
    pub fn push_json(&self, stdout: impl Into<String>) {
        self.push_output(Some(0), stdout, "");
    }

    /// Pushes a successful exit with empty output.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32, stderr: impl Into<String>) {
        self.push_output(Some(code), "", stderr);
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        envs: &[(String, String)],
    ) -> Result<CommandOutput, RunnerError> {
        self.invocations
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(RecordedInvocation {
                program: program.to_owned(),
                args: args.to_vec(),
                envs: envs.to_vec(),
            });
        self.responses
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| RunnerError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}
