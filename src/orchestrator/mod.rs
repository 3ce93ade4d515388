//! The copy workflow: stage, transfer, reconstruct, finalize.
//!
//! One [`CopyOrchestrator`] owns a gateway per region and walks the image
//! through four phases. Validation runs before anything is created, every
//! created resource registers its teardown in the [`Ledger`] immediately
//! after the create returns, and the ledger is drained after the workflow
//! ends whether it succeeded or failed.

mod error;


use std::collections::BTreeMap;

use tracing::info;

use crate::bootstrap::{BootstrapParams, PARAM_CLIENT_URL, PARAM_PEER, PARAM_SERVER_URL};
use crate::devices::{translate, DeviceMapping, DevicePool, TranslatedMappings};
use crate::gateway::wait::{
    await_image_available, await_instance_running, await_instance_stopped_running,
    await_snapshots_completed, detach_and_await_available, stop_and_await_stopped, PollSettings,
};
use crate::gateway::{
    CloudGateway, ImageRecord, IngressRule, InstanceRecord, LaunchSpec, Platform, Protocol,
    RegisterImageSpec,
};
use crate::kernels::{resolve_kernel_id, transfer_base_image};
use crate::ledger::{DrainReport, Ledger, Side, TeardownAction};
use crate::request::CopyRequest;
use crate::secret::TransferSecret;

pub use error::CopyError;

/// TCP control and UDP data port used by the transfer tool.
pub const TRANSFER_PORT: u16 = 46224;

/// SSH port opened on both transfer instances during staging.
pub const SSH_PORT: u16 = 22;

/// Lifetime of the presigned tool-download URLs.
pub const PRESIGN_TTL_SECS: u64 = 3600;

const OPEN_CIDR: &str = "0.0.0.0/0";
const SERVER_OBJECT_KEY: &str = "transfer-server";
const CLIENT_OBJECT_KEY: &str = "transfer-client";

/// Successful result of a copy run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CopyOutcome {
    /// Identifier of the new image in the destination region.
    pub image_id: String,
    /// Report from the teardown drain.
    pub drain: DrainReport,
}

struct Validated {
    image: ImageRecord,
    kernel_id: Option<String>,
    template_image: Option<String>,
}

struct Staging {
    params: BootstrapParams,
}

struct Transferred {
    translated: TranslatedMappings,
    destination_instance: InstanceRecord,
}

fn provider_err<E>(action: &'static str) -> impl FnOnce(E) -> CopyError<E>
where
    E: std::error::Error + 'static,
{
    move |source| CopyError::Gateway { action, source }
}

/// Drives one image copy across two regional gateways.
pub struct CopyOrchestrator<G> {
    source: G,
    destination: G,
    request: CopyRequest,
    polls: PollSettings,
}

impl<G: CloudGateway> CopyOrchestrator<G> {
    /// Builds an orchestrator over the two regional endpoints.
    pub fn new(source: G, destination: G, request: CopyRequest, polls: PollSettings) -> Self {
        Self {
            source,
            destination,
            request,
            polls,
        }
    }

    /// Runs the copy to completion.
    ///
    /// Validation happens before any resource is created; a validation
    /// failure leaves both regions untouched. After validation, every
    /// temporary resource is registered for teardown as soon as it exists
    /// and drained once the workflow finishes, on success and on failure
    /// alike.
    ///
    /// # Errors
    ///
    /// Returns the first [`CopyError`] hit; temporary resources created
    /// before the failure have already been drained when it surfaces.
    pub async fn execute(&self) -> Result<CopyOutcome, CopyError<G::Error>> {
        let validated = self.validate().await?;

        let mut ledger = Ledger::new();
        let result = self.run(&mut ledger, &validated).await;
        let drain = ledger
            .drain_all(&self.source, &self.destination, &self.polls)
            .await;

        let image_id = result?;
        info!(image = %image_id, "copy complete");
        Ok(CopyOutcome { image_id, drain })
    }

    async fn run(
        &self,
        ledger: &mut Ledger,
        validated: &Validated,
    ) -> Result<String, CopyError<G::Error>> {
        let staging = self.stage(ledger).await?;
        let transferred = self.transfer(ledger, &validated.image, staging).await?;

        let image_id = match validated.image.platform {
            Platform::Linux => self.reconstruct_linux(validated, &transferred).await?,
            Platform::Windows => {
                let template = validated
                    .template_image
                    .as_deref()
                    .ok_or(CopyError::MissingWindowsTemplate)?;
                self.reconstruct_windows(ledger, validated, &transferred, template)
                    .await?
            }
        };

        info!(image = %image_id, "waiting for the new image to become available");
        await_image_available(&self.destination, &image_id, &self.polls.launch).await?;
        Ok(image_id)
    }

    async fn validate(&self) -> Result<Validated, CopyError<G::Error>> {
        self.request.validate()?;

        let image = self
            .source
            .describe_image(&self.request.image_id)
            .await
            .map_err(provider_err("describing the source image"))?
            .ok_or_else(|| CopyError::ImageNotFound {
                image_id: self.request.image_id.clone(),
            })?;

        // The copy keeps the source image's identity, so it is the source
        // image's name that must be free in the destination region.
        let conflicts = self
            .destination
            .images_by_name(&image.name)
            .await
            .map_err(provider_err("checking the destination image name"))?;
        if !conflicts.is_empty() {
            return Err(CopyError::NameTaken {
                name: image.name.clone(),
            });
        }

        let mut kernel_id = None;
        let mut template_image = None;
        match image.platform {
            Platform::Linux => {
                kernel_id = resolve_kernel_id(
                    &self.request.source_region,
                    &self.request.destination_region,
                    image.kernel_id.as_deref(),
                    self.request.kernel_id.as_deref(),
                )?;
            }
            Platform::Windows => {
                let template = self
                    .request
                    .windows_template_image
                    .clone()
                    .ok_or(CopyError::MissingWindowsTemplate)?;
                let record = self
                    .destination
                    .describe_image(&template)
                    .await
                    .map_err(provider_err("describing the template image"))?
                    .ok_or_else(|| CopyError::TemplateNotFound {
                        image_id: template.clone(),
                    })?;
                if record.platform != Platform::Windows {
                    return Err(CopyError::TemplateNotWindows {
                        image_id: template,
                    });
                }
                template_image = Some(template);
            }
        }

        Ok(Validated {
            image,
            kernel_id,
            template_image,
        })
    }

    /// Creates the staging bucket, uploads and presigns the transfer tools,
    /// generates the shared secret, and opens SSH on a fresh security group
    /// in each region.
    async fn stage(&self, ledger: &mut Ledger) -> Result<Staging, CopyError<G::Error>> {
        let name = &self.request.name;
        let bucket = name.to_lowercase();
        info!(%bucket, "staging transfer tools");

        self.source
            .create_bucket(&bucket)
            .await
            .map_err(provider_err("creating the staging bucket"))?;
        ledger.register(
            TeardownAction::DeleteBucket {
                bucket: bucket.clone(),
            },
            format!("delete staging bucket {bucket}"),
        );

        for (key, body) in [
            (SERVER_OBJECT_KEY, &self.request.server_tool),
            (CLIENT_OBJECT_KEY, &self.request.client_tool),
        ] {
            self.source
                .put_object(&bucket, key, body)
                .await
                .map_err(provider_err("uploading a transfer tool"))?;
            ledger.register(
                TeardownAction::DeleteObject {
                    bucket: bucket.clone(),
                    key: key.to_owned(),
                },
                format!("delete staged object {bucket}/{key}"),
            );
        }

        let server_url = self
            .source
            .presign_object(&bucket, SERVER_OBJECT_KEY, PRESIGN_TTL_SECS)
            .await
            .map_err(provider_err("presigning the server tool"))?;
        let client_url = self
            .source
            .presign_object(&bucket, CLIENT_OBJECT_KEY, PRESIGN_TTL_SECS)
            .await
            .map_err(provider_err("presigning the client tool"))?;

        let secret = TransferSecret::generate(self.request.key_size_bits)?;
        let mut params = BootstrapParams::new(&secret);
        params.set(PARAM_SERVER_URL, server_url);
        params.set(PARAM_CLIENT_URL, client_url);

        for (side, gateway) in [
            (Side::Source, &self.source),
            (Side::Destination, &self.destination),
        ] {
            gateway
                .create_security_group(name, "temporary image transfer group")
                .await
                .map_err(provider_err("creating a security group"))?;
            ledger.register(
                TeardownAction::DeleteSecurityGroup {
                    side,
                    name: name.clone(),
                },
                format!("delete security group {name} ({side:?})"),
            );
            gateway
                .authorize_ingress(name, &IngressRule::single_port(Protocol::Tcp, SSH_PORT, OPEN_CIDR))
                .await
                .map_err(provider_err("opening SSH on a security group"))?;
        }

        Ok(Staging { params })
    }

    /// Launches the transfer pair and waits for the destination instance to
    /// shut itself down, which signals that the block copy finished.
    async fn transfer(
        &self,
        ledger: &mut Ledger,
        image: &ImageRecord,
        mut staging: Staging,
    ) -> Result<Transferred, CopyError<G::Error>> {
        let name = &self.request.name;
        let mut pool = DevicePool::default();
        let translated = translate(&image.block_device_mapping, &mut pool)?;

        info!("launching the source transfer instance");
        let source_image = transfer_base_image(&self.request.source_region)?;
        let source_spec = LaunchSpec {
            image_id: source_image.to_owned(),
            instance_type: self.request.instance_type.clone(),
            key_name: self.request.source_keypair.clone(),
            security_groups: vec![name.clone()],
            user_data: Some(staging.params.render(&self.request.source_boot_template)),
            block_device_mapping: translated.transfer_source.clone(),
            terminate_on_shutdown: true,
            availability_zone: None,
        };
        let created = self
            .source
            .run_instance(&source_spec)
            .await
            .map_err(provider_err("launching the source transfer instance"))?;
        ledger.register(
            TeardownAction::TerminateInstance {
                side: Side::Source,
                instance_id: created.id.clone(),
            },
            format!("terminate source transfer instance {}", created.id),
        );
        let source_instance =
            await_instance_running(&self.source, &created.id, &self.polls.launch).await?;
        self.source
            .tag_resource(&source_instance.id, name)
            .await
            .map_err(provider_err("tagging the source transfer instance"))?;

        let peer = source_instance
            .public_dns
            .clone()
            .or_else(|| source_instance.public_ip.clone())
            .ok_or_else(|| CopyError::MissingAddress {
                instance_id: source_instance.id.clone(),
            })?;
        staging.params.set(PARAM_PEER, peer);

        info!("launching the destination transfer instance");
        let destination_image = match &self.request.destination_transfer_image {
            Some(image_id) => image_id.clone(),
            None => transfer_base_image(&self.request.destination_region)?.to_owned(),
        };
        let destination_spec = LaunchSpec {
            image_id: destination_image,
            instance_type: self.request.instance_type.clone(),
            key_name: self.request.destination_keypair.clone(),
            security_groups: vec![name.clone()],
            user_data: Some(
                staging
                    .params
                    .render(&self.request.destination_boot_template),
            ),
            block_device_mapping: translated.transfer_destination.clone(),
            terminate_on_shutdown: true,
            availability_zone: None,
        };
        let created = self
            .destination
            .run_instance(&destination_spec)
            .await
            .map_err(provider_err("launching the destination transfer instance"))?;
        let destination_instance =
            await_instance_running(&self.destination, &created.id, &self.polls.launch).await?;

        // The transferred volumes outlive their instance, so their delete
        // entries go in first; the terminate entry lands on top and drains
        // before them.
        for dst_device in translated.correspondence.values() {
            let volume_id = destination_instance
                .attached_volumes
                .get(dst_device)
                .ok_or_else(|| CopyError::MissingVolume {
                    device: dst_device.clone(),
                    instance_id: destination_instance.id.clone(),
                })?;
            ledger.register(
                TeardownAction::DeleteVolume {
                    side: Side::Destination,
                    volume_id: volume_id.clone(),
                },
                format!("delete transferred volume {volume_id}"),
            );
        }
        ledger.register(
            TeardownAction::TerminateInstance {
                side: Side::Destination,
                instance_id: destination_instance.id.clone(),
            },
            format!(
                "terminate destination transfer instance {}",
                destination_instance.id
            ),
        );
        self.destination
            .tag_resource(&destination_instance.id, name)
            .await
            .map_err(provider_err("tagging the destination transfer instance"))?;

        let source_ip = source_instance
            .public_ip
            .clone()
            .ok_or_else(|| CopyError::MissingAddress {
                instance_id: source_instance.id.clone(),
            })?;
        let destination_ip = destination_instance
            .public_ip
            .clone()
            .ok_or_else(|| CopyError::MissingAddress {
                instance_id: destination_instance.id.clone(),
            })?;
        // The sending side accepts the control connection over TCP; the
        // receiving side takes the data stream over UDP.
        self.source
            .authorize_ingress(
                name,
                &IngressRule::single_port(Protocol::Tcp, TRANSFER_PORT, format!("{destination_ip}/32")),
            )
            .await
            .map_err(provider_err("opening the transfer port to the destination"))?;
        self.destination
            .authorize_ingress(
                name,
                &IngressRule::single_port(Protocol::Udp, TRANSFER_PORT, format!("{source_ip}/32")),
            )
            .await
            .map_err(provider_err("opening the transfer port to the source"))?;

        info!("waiting for the block transfer to finish");
        await_instance_stopped_running(
            &self.destination,
            &destination_instance.id,
            &self.polls.launch,
        )
        .await?;

        Ok(Transferred {
            translated,
            destination_instance,
        })
    }

    /// Snapshots the transferred volumes and registers a new image whose
    /// mapping mirrors the source image with the snapshots substituted.
    async fn reconstruct_linux(
        &self,
        validated: &Validated,
        transferred: &Transferred,
    ) -> Result<String, CopyError<G::Error>> {
        info!("snapshotting transferred volumes");
        let description = format!("Created by amiferry ({})", self.request.name);
        let mut snapshot_by_source_device = BTreeMap::new();
        let mut snapshot_ids = Vec::new();
        for (src_device, dst_device) in &transferred.translated.correspondence {
            let volume_id = transferred
                .destination_instance
                .attached_volumes
                .get(dst_device)
                .ok_or_else(|| CopyError::MissingVolume {
                    device: dst_device.clone(),
                    instance_id: transferred.destination_instance.id.clone(),
                })?;
            let snapshot = self
                .destination
                .create_snapshot(volume_id, &description)
                .await
                .map_err(provider_err("snapshotting a transferred volume"))?;
            snapshot_ids.push(snapshot.id.clone());
            snapshot_by_source_device.insert(src_device.clone(), snapshot.id);
        }
        await_snapshots_completed(&self.destination, &snapshot_ids, &self.polls.launch).await?;

        let mut mapping = validated.image.block_device_mapping.clone();
        for (device, descriptor) in &mut mapping {
            if let Some(snapshot_id) = snapshot_by_source_device.get(device) {
                descriptor.snapshot_id = Some(snapshot_id.clone());
            }
        }

        let spec = RegisterImageSpec {
            name: validated.image.name.clone(),
            description: validated.image.description.clone(),
            architecture: validated.image.architecture.clone(),
            kernel_id: validated.kernel_id.clone(),
            root_device_name: validated.image.root_device_name.clone(),
            block_device_mapping: mapping,
        };
        self.destination
            .register_image(&spec)
            .await
            .map_err(provider_err("registering the new image"))
    }

    /// Rebuilds a Windows image by swapping the transferred volumes onto a
    /// stopped template instance and imaging it in place.
    async fn reconstruct_windows(
        &self,
        ledger: &mut Ledger,
        validated: &Validated,
        transferred: &Transferred,
        template_image: &str,
    ) -> Result<String, CopyError<G::Error>> {
        info!(template = %template_image, "launching the Windows template instance");
        let spec = LaunchSpec {
            image_id: template_image.to_owned(),
            instance_type: self.request.instance_type.clone(),
            key_name: self.request.destination_keypair.clone(),
            security_groups: vec![self.request.name.clone()],
            user_data: None,
            block_device_mapping: DeviceMapping::new(),
            terminate_on_shutdown: false,
            availability_zone: transferred
                .destination_instance
                .availability_zone
                .clone(),
        };
        let created = self
            .destination
            .run_instance(&spec)
            .await
            .map_err(provider_err("launching the template instance"))?;
        ledger.register(
            TeardownAction::TerminateInstance {
                side: Side::Destination,
                instance_id: created.id.clone(),
            },
            format!("terminate template instance {}", created.id),
        );
        let template =
            await_instance_running(&self.destination, &created.id, &self.polls.launch).await?;
        self.destination
            .tag_resource(&template.id, &format!("windows{}", self.request.name))
            .await
            .map_err(provider_err("tagging the template instance"))?;

        stop_and_await_stopped(&self.destination, &template.id, &self.polls.launch).await?;

        info!("swapping transferred volumes onto the template instance");
        for volume_id in template.attached_volumes.values() {
            detach_and_await_available(&self.destination, volume_id, &self.polls.teardown).await?;
            self.destination
                .delete_volume(volume_id)
                .await
                .map_err(provider_err("deleting a template volume"))?;
        }

        for (dst_device, src_device) in transferred.translated.reversed_correspondence() {
            let volume_id = transferred
                .destination_instance
                .attached_volumes
                .get(&dst_device)
                .ok_or_else(|| CopyError::MissingVolume {
                    device: dst_device.clone(),
                    instance_id: transferred.destination_instance.id.clone(),
                })?;
            detach_and_await_available(&self.destination, volume_id, &self.polls.teardown).await?;
            self.destination
                .attach_volume(volume_id, &template.id, &src_device)
                .await
                .map_err(provider_err("attaching a transferred volume"))?;
        }

        self.destination
            .create_image_from_instance(
                &template.id,
                &validated.image.name,
                validated.image.description.as_deref(),
            )
            .await
            .map_err(provider_err("imaging the template instance"))
    }
}
