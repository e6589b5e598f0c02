use crate::boot_source::BootSource;
use crate::poll::{converge, PollConfig, PollOutcome};
use crate::request::ProvisioningIntent;
use crate::store::{NewVolumeRecord, RecordStore};
use convect_common::{ProvisionError, ResourceKind, VolumeStatus};
use convect_providers::{
    CloudApi, DeviceMappingEntry, MappingDestination, MappingSource, VolumeSpec,
};
use tokio::sync::watch;

/// Create every requested volume remotely, recording each locally the moment
/// its create call returns. Not idempotent: every call is a genuine create
/// and a repeat produces new volumes and new records.
///
/// A failed create aborts the remaining requests; volumes already created
/// stay recorded and are not rolled back here.
pub async fn precreate_volumes(
    cloud: &dyn CloudApi,
    store: &dyn RecordStore,
    intent: &ProvisioningIntent,
) -> Result<Vec<DeviceMappingEntry>, ProvisionError> {
    let mut entries = Vec::with_capacity(intent.volumes.len());

    for request in &intent.volumes {
        // A bootable volume is seeded from the source image; templates
        // bring their own backing device.
        let image_ref = match (&intent.source, request.bootable) {
            (BootSource::Image { image_ref }, true) => Some(image_ref.clone()),
            _ => None,
        };
        let spec = VolumeSpec {
            name: request.name.clone(),
            size_gb: request.size_gb,
            bootable: request.bootable,
            image_ref,
            availability_zone: intent.availability_zone.clone(),
        };

        let remote_ref = cloud
            .create_volume(&spec)
            .await
            .map_err(|err| ProvisionError::remote_call("create_volume", err))?;
        println!(
            "✅ [Precreate] Volume '{}' created ({})",
            request.name, remote_ref
        );

        // Recorded before the next create so a later failure cannot hide it.
        store
            .insert_volume(&NewVolumeRecord {
                remote_ref: remote_ref.clone(),
                name: request.name.clone(),
                size_gb: request.size_gb,
                bootable: request.bootable,
                owner_id: intent.owner_id.clone(),
                status: VolumeStatus::InUse,
            })
            .await
            .map_err(ProvisionError::storage)?;

        entries.push(DeviceMappingEntry {
            uuid: remote_ref,
            source_type: MappingSource::Volume,
            destination_type: MappingDestination::Volume,
            boot_index: None,
            size_gb: Some(request.size_gb),
            delete_on_termination: request.delete_on_termination,
            selected: true,
            bootable: request.bootable,
            name: Some(request.name.clone()),
            owner_id: intent.owner_id.clone(),
        });
    }

    Ok(entries)
}

/// Poll every volume-backed mapping entry until the remote side reports
/// `available`. A volume reaching `error` fails the whole step, naming the
/// offending volume.
pub async fn check_volumes_ready(
    cloud: &dyn CloudApi,
    cfg: &PollConfig,
    cancel: &watch::Receiver<bool>,
    entries: &[DeviceMappingEntry],
) -> Result<(), ProvisionError> {
    for entry in entries
        .iter()
        .filter(|e| e.source_type == MappingSource::Volume)
    {
        let label = entry.name.clone().unwrap_or_else(|| entry.uuid.clone());
        converge(ResourceKind::Volume, cfg, cancel, || {
            let volume_ref = entry.uuid.clone();
            let label = label.clone();
            async move {
                let status = cloud
                    .get_volume_status(&volume_ref)
                    .await
                    .map_err(|err| ProvisionError::remote_call("get_volume_status", err))?;
                Ok(match status.as_str() {
                    "available" => PollOutcome::Ready,
                    "error" => PollOutcome::Faulted(format!(
                        "An error occurred while creating Volume {label}"
                    )),
                    other => PollOutcome::Pending(other.to_string()),
                })
            }
        })
        .await?;
    }
    Ok(())
}
