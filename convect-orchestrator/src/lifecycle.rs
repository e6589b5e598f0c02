use crate::audit::AuditSink;
use crate::store::RecordStore;
use convect_common::{InstanceStatus, ProvisionError, VolumeStatus};
use convect_providers::CloudApi;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Day-2 operations on already-provisioned resources. Remote first, local
/// second: a record only changes after the remote call succeeded.
pub struct Lifecycle {
    cloud: Arc<dyn CloudApi>,
    store: Arc<dyn RecordStore>,
    audit: Arc<dyn AuditSink>,
}

impl Lifecycle {
    pub fn new(
        cloud: Arc<dyn CloudApi>,
        store: Arc<dyn RecordStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            cloud,
            store,
            audit,
        }
    }

    pub async fn attach_volume(
        &self,
        instance_ref: &str,
        volume_ref: &str,
        device: Option<&str>,
    ) -> Result<(), ProvisionError> {
        let entry = self.open_entry("VOLUME_ATTACH", instance_ref, volume_ref).await;
        let started = Instant::now();
        let result = self.do_attach(instance_ref, volume_ref, device).await;
        self.close_entry(entry, started, &result).await;
        result
    }

    async fn do_attach(
        &self,
        instance_ref: &str,
        volume_ref: &str,
        device: Option<&str>,
    ) -> Result<(), ProvisionError> {
        self.cloud
            .attach_volume(instance_ref, volume_ref, device)
            .await
            .map_err(|err| ProvisionError::remote_call("attach_volume", err))?;

        self.store
            .insert_disk(instance_ref, volume_ref, device)
            .await
            .map_err(ProvisionError::storage)?;
        self.store
            .set_volume_status(volume_ref, VolumeStatus::InUse, &[VolumeStatus::Available])
            .await
            .map_err(ProvisionError::storage)?;

        println!("✅ [Lifecycle] Volume {volume_ref} attached to {instance_ref}");
        Ok(())
    }

    pub async fn detach_volume(
        &self,
        instance_ref: &str,
        volume_ref: &str,
    ) -> Result<(), ProvisionError> {
        let entry = self.open_entry("VOLUME_DETACH", instance_ref, volume_ref).await;
        let started = Instant::now();
        let result = self.do_detach(instance_ref, volume_ref).await;
        self.close_entry(entry, started, &result).await;
        result
    }

    async fn do_detach(&self, instance_ref: &str, volume_ref: &str) -> Result<(), ProvisionError> {
        self.cloud
            .detach_volume(instance_ref, volume_ref)
            .await
            .map_err(|err| ProvisionError::remote_call("detach_volume", err))?;

        self.store
            .delete_disk(instance_ref, volume_ref)
            .await
            .map_err(ProvisionError::storage)?;
        self.store
            .set_volume_status(volume_ref, VolumeStatus::Available, &[VolumeStatus::InUse])
            .await
            .map_err(ProvisionError::storage)?;

        println!("✅ [Lifecycle] Volume {volume_ref} detached from {instance_ref}");
        Ok(())
    }

    pub async fn rename_volume(
        &self,
        volume_ref: &str,
        new_name: &str,
    ) -> Result<(), ProvisionError> {
        self.cloud
            .update_volume(volume_ref, new_name)
            .await
            .map_err(|err| ProvisionError::remote_call("update_volume", err))?;
        self.store
            .rename_volume(volume_ref, new_name)
            .await
            .map_err(ProvisionError::storage)?;
        Ok(())
    }

    /// Refuses while the volume is attached; detach first.
    pub async fn delete_volume(&self, volume_ref: &str) -> Result<(), ProvisionError> {
        let attached = self
            .store
            .volume_is_attached(volume_ref)
            .await
            .map_err(ProvisionError::storage)?;
        if attached {
            return Err(ProvisionError::Validation(format!(
                "volume {volume_ref} is attached; detach it before deleting"
            )));
        }

        self.cloud
            .delete_volume(volume_ref)
            .await
            .map_err(|err| ProvisionError::remote_call("delete_volume", err))?;
        self.store
            .delete_volume(volume_ref)
            .await
            .map_err(ProvisionError::storage)?;

        println!("✅ [Lifecycle] Volume {volume_ref} deleted");
        Ok(())
    }

    /// Tears the instance down. Boot volumes go with the instance; data
    /// volumes revert to `available`.
    pub async fn destroy_instance(&self, instance_ref: &str) -> Result<(), ProvisionError> {
        let entry = match self
            .audit
            .begin("INSTANCE_DESTROY", Some(instance_ref), None)
            .await
        {
            Ok(id) => Some(id),
            Err(err) => {
                println!("⚠️ [Lifecycle] Audit begin failed: {err}");
                None
            }
        };
        let started = Instant::now();
        let result = self.do_destroy(instance_ref).await;
        self.close_entry(entry, started, &result).await;
        result
    }

    async fn do_destroy(&self, instance_ref: &str) -> Result<(), ProvisionError> {
        let disks = self
            .store
            .disks_for_instance(instance_ref)
            .await
            .map_err(ProvisionError::storage)?;

        self.cloud
            .delete_instance(instance_ref)
            .await
            .map_err(|err| ProvisionError::remote_call("delete_instance", err))?;

        for disk in &disks {
            self.store
                .delete_disk(instance_ref, &disk.volume_ref)
                .await
                .map_err(ProvisionError::storage)?;

            let volume = self
                .store
                .find_volume(&disk.volume_ref)
                .await
                .map_err(ProvisionError::storage)?;
            match volume {
                Some(record) if record.bootable => {
                    self.store
                        .delete_volume(&disk.volume_ref)
                        .await
                        .map_err(ProvisionError::storage)?;
                }
                Some(_) => {
                    self.store
                        .set_volume_status(
                            &disk.volume_ref,
                            VolumeStatus::Available,
                            &[VolumeStatus::InUse],
                        )
                        .await
                        .map_err(ProvisionError::storage)?;
                }
                None => {}
            }
        }

        self.store
            .set_instance_status(
                instance_ref,
                InstanceStatus::Terminated,
                &[
                    InstanceStatus::Provisioning,
                    InstanceStatus::Active,
                    InstanceStatus::Failed,
                ],
            )
            .await
            .map_err(ProvisionError::storage)?;

        println!("✅ [Lifecycle] Instance {instance_ref} destroyed");
        Ok(())
    }

    /// Allowed only while the remote instance is ACTIVE or SHUTOFF.
    pub async fn change_admin_password(
        &self,
        instance_ref: &str,
        new_password: &str,
    ) -> Result<(), ProvisionError> {
        let probe = self
            .cloud
            .get_instance_status(instance_ref)
            .await
            .map_err(|err| ProvisionError::remote_call("get_instance_status", err))?;
        match probe.status.as_str() {
            "ACTIVE" | "SHUTOFF" => {}
            other => {
                return Err(ProvisionError::Validation(format!(
                    "password change requires an ACTIVE or SHUTOFF instance, found {other}"
                )));
            }
        }

        self.cloud
            .change_admin_password(instance_ref, new_password)
            .await
            .map_err(|err| ProvisionError::remote_call("change_admin_password", err))?;

        println!("✅ [Lifecycle] Password changed for {instance_ref}");
        Ok(())
    }

    pub async fn create_network_port(
        &self,
        name: &str,
        net_ref: &str,
    ) -> Result<String, ProvisionError> {
        let port_ref = self
            .cloud
            .create_network_port(name, net_ref)
            .await
            .map_err(|err| ProvisionError::remote_call("create_network_port", err))?;
        println!("✅ [Lifecycle] Port '{name}' created ({port_ref})");
        Ok(port_ref)
    }

    async fn open_entry(
        &self,
        action_type: &str,
        instance_ref: &str,
        volume_ref: &str,
    ) -> Option<Uuid> {
        match self
            .audit
            .begin(
                action_type,
                Some(instance_ref),
                Some(json!({ "volume_ref": volume_ref })),
            )
            .await
        {
            Ok(id) => Some(id),
            Err(err) => {
                println!("⚠️ [Lifecycle] Audit begin failed: {err}");
                None
            }
        }
    }

    async fn close_entry(
        &self,
        entry: Option<Uuid>,
        started: Instant,
        result: &Result<(), ProvisionError>,
    ) {
        let Some(entry_id) = entry else { return };
        let (status, error) = match result {
            Ok(()) => ("success", None),
            Err(err) => ("failed", Some(err.to_string())),
        };
        self.audit
            .complete(
                entry_id,
                status,
                started.elapsed().as_millis() as i64,
                error.as_deref(),
            )
            .await
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::store::MemoryRecordStore;
    use convect_providers::mock::ScriptedCloud;

    fn lifecycle_with(cloud: Arc<ScriptedCloud>) -> (Lifecycle, Arc<MemoryRecordStore>) {
        let store = Arc::new(MemoryRecordStore::new());
        let lifecycle = Lifecycle::new(
            cloud,
            store.clone(),
            Arc::new(MemoryAuditSink::new()),
        );
        (lifecycle, store)
    }

    #[tokio::test]
    async fn password_change_requires_a_settled_instance() {
        let cloud = Arc::new(ScriptedCloud::new());
        cloud.script_instance_probe("BUILD", None);
        let (lifecycle, _store) = lifecycle_with(cloud.clone());

        let err = lifecycle
            .change_admin_password("srv-1", "s3cret")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Validation(_)));
        assert!(cloud.password_changes().is_empty());
    }

    #[tokio::test]
    async fn password_change_accepts_shutoff() {
        let cloud = Arc::new(ScriptedCloud::new());
        cloud.script_instance_probe("SHUTOFF", None);
        let (lifecycle, _store) = lifecycle_with(cloud.clone());

        lifecycle
            .change_admin_password("srv-1", "s3cret")
            .await
            .unwrap();
        assert_eq!(
            cloud.password_changes(),
            vec![("srv-1".to_string(), "s3cret".to_string())]
        );
    }

    #[tokio::test]
    async fn delete_refuses_while_the_volume_is_attached() {
        let cloud = Arc::new(ScriptedCloud::new());
        let (lifecycle, store) = lifecycle_with(cloud.clone());
        store
            .insert_disk("srv-1", "vol-1", None)
            .await
            .unwrap();

        let err = lifecycle.delete_volume("vol-1").await.unwrap_err();
        assert!(matches!(err, ProvisionError::Validation(_)));
        assert!(cloud.deleted_volumes().is_empty());
    }
}
