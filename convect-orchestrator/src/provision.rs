use crate::audit::AuditSink;
use crate::boot_source::{plan_boot, BootSource};
use crate::poll::{converge, PollConfig, PollOutcome};
use crate::precreate::{check_volumes_ready, precreate_volumes};
use crate::request::{compose, composed_audit_metadata, ProvisioningIntent};
use crate::store::{NewInstanceRecord, RecordStore};
use convect_common::{InstanceStatus, ProvisionError, ResourceKind};
use convect_providers::{BootRequest, CloudApi, InstanceProbe, MappingSource};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

/// Collaborators shared by every provisioning run.
pub struct ProvisionCtx {
    pub cloud: Arc<dyn CloudApi>,
    pub store: Arc<dyn RecordStore>,
    pub audit: Arc<dyn AuditSink>,
    pub poll: PollConfig,
    pub cancel: watch::Receiver<bool>,
}

#[derive(Debug, Clone)]
pub struct ProvisionOutcome {
    pub instance_ref: String,
    pub final_status: InstanceStatus,
}

/// End-to-end provisioning: pre-create volumes, resolve the boot source,
/// submit the composite request and converge on ACTIVE.
///
/// Remote resources created before a failure stay behind, recorded, for
/// caller-driven cleanup. Nothing is rolled back automatically.
pub async fn provision(
    ctx: &ProvisionCtx,
    intent: &ProvisioningIntent,
) -> Result<ProvisionOutcome, ProvisionError> {
    validate_intent(intent)?;

    let run_entry = match ctx.audit.begin("INSTANCE_PROVISION", None, None).await {
        Ok(id) => Some(id),
        Err(err) => {
            println!("⚠️ [Provision] Audit begin failed: {err}");
            None
        }
    };
    let started = Instant::now();

    let result = run_pipeline(ctx, intent).await;

    if let Some(entry_id) = run_entry {
        let (status, error) = match &result {
            Ok(_) => ("success", None),
            Err(err) => ("failed", Some(err.to_string())),
        };
        ctx.audit
            .complete(
                entry_id,
                status,
                started.elapsed().as_millis() as i64,
                error.as_deref(),
            )
            .await
            .ok();
    }

    result
}

async fn run_pipeline(
    ctx: &ProvisionCtx,
    intent: &ProvisioningIntent,
) -> Result<ProvisionOutcome, ProvisionError> {
    // Pre-create requested volumes; each is recorded as it lands.
    let entries = precreate_volumes(ctx.cloud.as_ref(), ctx.store.as_ref(), intent).await?;

    // Verify them available before any promotion side effect runs.
    check_volumes_ready(ctx.cloud.as_ref(), &ctx.poll, &ctx.cancel, &entries).await?;

    // Resolve the boot source and perform the deferred mark-bootable call.
    let plan = plan_boot(&intent.source, &entries);
    if let Some(volume_ref) = &plan.mark_bootable {
        ctx.cloud
            .mark_volume_bootable(volume_ref, true)
            .await
            .map_err(|err| ProvisionError::remote_call("mark_volume_bootable", err))?;
        println!("✅ [Provision] Volume {volume_ref} promoted to boot device");
    }

    // Freeze the composite request. The audit event fires only now, after
    // full assembly, so it reflects the real request.
    let request = compose(intent, &plan)?;
    if let Err(err) = ctx
        .audit
        .event(
            "instance_record_create_initiated",
            None,
            Some(composed_audit_metadata(&request)),
        )
        .await
    {
        println!("⚠️ [Provision] Audit emit failed: {err}");
    }

    let instance_ref = ctx
        .cloud
        .create_instance(&request)
        .await
        .map_err(|err| ProvisionError::remote_call("create_instance", err))?;
    println!(
        "🚀 [Provision] Instance '{}' submitted ({})",
        request.name, instance_ref
    );

    converge(ResourceKind::Instance, &ctx.poll, &ctx.cancel, || {
        let cloud = ctx.cloud.clone();
        let instance_ref = instance_ref.clone();
        async move {
            let probe = cloud
                .get_instance_status(&instance_ref)
                .await
                .map_err(|err| ProvisionError::remote_call("get_instance_status", err))?;
            Ok(classify_instance_probe(&probe))
        }
    })
    .await?;

    // Only a converged instance gets a local record.
    record_active_instance(ctx.store.as_ref(), &request, &instance_ref).await?;
    println!(
        "✅ [Provision] Instance '{}' is ACTIVE ({})",
        request.name, instance_ref
    );

    // Best effort; a missing backup registration never fails the run.
    if let Err(err) = ctx
        .cloud
        .register_backup(&instance_ref, &request.name, request.owner_id.as_deref())
        .await
    {
        println!("⚠️ [Provision] Backup registration failed: {err}");
    }

    Ok(ProvisionOutcome {
        instance_ref,
        final_status: InstanceStatus::Active,
    })
}

fn validate_intent(intent: &ProvisioningIntent) -> Result<(), ProvisionError> {
    if intent.name.trim().is_empty() {
        return Err(ProvisionError::Validation(
            "instance name is required".to_string(),
        ));
    }
    if intent.flavor_ref.trim().is_empty() {
        return Err(ProvisionError::Validation(
            "flavor ref is required".to_string(),
        ));
    }
    let backing_ref = match &intent.source {
        BootSource::Image { image_ref } => image_ref,
        BootSource::VolumeTemplate { volume_ref } => volume_ref,
        BootSource::SnapshotTemplate { snapshot_ref } => snapshot_ref,
    };
    if backing_ref.trim().is_empty() {
        return Err(ProvisionError::Validation(
            "boot source reference is required".to_string(),
        ));
    }
    for request in &intent.volumes {
        if request.size_gb <= 0 {
            return Err(ProvisionError::Validation(format!(
                "volume '{}' must have a positive size",
                request.name
            )));
        }
    }
    Ok(())
}

fn classify_instance_probe(probe: &InstanceProbe) -> PollOutcome {
    match probe.status.as_str() {
        "ACTIVE" => PollOutcome::Ready,
        "ERROR" => PollOutcome::Faulted(
            probe
                .fault_message
                .clone()
                .unwrap_or_else(|| "instance entered ERROR state".to_string()),
        ),
        other => PollOutcome::Pending(other.to_string()),
    }
}

async fn record_active_instance(
    store: &dyn RecordStore,
    request: &BootRequest,
    instance_ref: &str,
) -> Result<(), ProvisionError> {
    store
        .insert_instance(&NewInstanceRecord {
            remote_ref: instance_ref.to_string(),
            name: request.name.clone(),
            owner_id: request.owner_id.clone(),
            availability_zone: request.availability_zone.clone(),
            status: InstanceStatus::Active,
        })
        .await
        .map_err(ProvisionError::storage)?;

    // The boot attached every volume-backed device; link them now.
    for entry in request
        .device_mappings
        .iter()
        .filter(|e| e.source_type == MappingSource::Volume)
    {
        store
            .insert_disk(instance_ref, &entry.uuid, None)
            .await
            .map_err(ProvisionError::storage)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::GuestOs;

    fn intent() -> ProvisioningIntent {
        ProvisioningIntent {
            name: "web-1".to_string(),
            flavor_ref: "flavor-small".to_string(),
            source: BootSource::Image {
                image_ref: "img-1".to_string(),
            },
            availability_zone: None,
            networks: vec![],
            security_groups: vec![],
            volumes: vec![],
            owner_id: None,
            guest_os: GuestOs::Linux,
            admin_password: None,
        }
    }

    #[test]
    fn blank_names_and_refs_are_rejected_before_any_remote_call() {
        let mut no_name = intent();
        no_name.name = "  ".to_string();
        assert!(matches!(
            validate_intent(&no_name),
            Err(ProvisionError::Validation(_))
        ));

        let mut no_flavor = intent();
        no_flavor.flavor_ref = String::new();
        assert!(matches!(
            validate_intent(&no_flavor),
            Err(ProvisionError::Validation(_))
        ));

        let mut no_backing = intent();
        no_backing.source = BootSource::VolumeTemplate {
            volume_ref: String::new(),
        };
        assert!(matches!(
            validate_intent(&no_backing),
            Err(ProvisionError::Validation(_))
        ));
    }

    #[test]
    fn nonpositive_volume_sizes_are_rejected() {
        let mut bad_size = intent();
        bad_size.volumes.push(crate::request::VolumeRequest {
            name: "data".to_string(),
            size_gb: 0,
            bootable: false,
            delete_on_termination: false,
        });
        assert!(matches!(
            validate_intent(&bad_size),
            Err(ProvisionError::Validation(_))
        ));
    }

    #[test]
    fn probe_classification_maps_terminal_states() {
        let active = InstanceProbe {
            status: "ACTIVE".to_string(),
            fault_message: None,
        };
        assert_eq!(classify_instance_probe(&active), PollOutcome::Ready);

        let error = InstanceProbe {
            status: "ERROR".to_string(),
            fault_message: Some("No valid host was found".to_string()),
        };
        assert_eq!(
            classify_instance_probe(&error),
            PollOutcome::Faulted("No valid host was found".to_string())
        );

        let building = InstanceProbe {
            status: "BUILD".to_string(),
            fault_message: None,
        };
        assert_eq!(
            classify_instance_probe(&building),
            PollOutcome::Pending("BUILD".to_string())
        );
    }
}
