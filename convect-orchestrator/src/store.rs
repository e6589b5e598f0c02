use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use convect_common::{DiskRecord, InstanceRecord, InstanceStatus, VolumeRecord, VolumeStatus};
use sqlx::{Pool, Postgres};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewVolumeRecord {
    pub remote_ref: String,
    pub name: String,
    pub size_gb: i32,
    pub bootable: bool,
    pub owner_id: Option<String>,
    pub status: VolumeStatus,
}

#[derive(Debug, Clone)]
pub struct NewInstanceRecord {
    pub remote_ref: String,
    pub name: String,
    pub owner_id: Option<String>,
    pub availability_zone: Option<String>,
    pub status: InstanceStatus,
}

/// Local record persistence. Records mirror remote state and are written
/// only after the corresponding remote call returned success.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_volume(&self, new: &NewVolumeRecord) -> Result<Uuid>;
    /// Guarded transition; returns whether a row actually moved.
    async fn set_volume_status(
        &self,
        remote_ref: &str,
        to: VolumeStatus,
        allowed_from: &[VolumeStatus],
    ) -> Result<bool>;
    async fn rename_volume(&self, remote_ref: &str, new_name: &str) -> Result<bool>;
    async fn delete_volume(&self, remote_ref: &str) -> Result<bool>;
    async fn find_volume(&self, remote_ref: &str) -> Result<Option<VolumeRecord>>;
    async fn list_volumes(&self) -> Result<Vec<VolumeRecord>>;

    /// At-most-once on `remote_ref`: a replay returns the existing id.
    async fn insert_instance(&self, new: &NewInstanceRecord) -> Result<Uuid>;
    async fn set_instance_status(
        &self,
        remote_ref: &str,
        to: InstanceStatus,
        allowed_from: &[InstanceStatus],
    ) -> Result<bool>;
    async fn find_instance(&self, remote_ref: &str) -> Result<Option<InstanceRecord>>;
    async fn list_instances(&self) -> Result<Vec<InstanceRecord>>;

    async fn insert_disk(
        &self,
        instance_ref: &str,
        volume_ref: &str,
        device: Option<&str>,
    ) -> Result<Uuid>;
    async fn delete_disk(&self, instance_ref: &str, volume_ref: &str) -> Result<bool>;
    async fn disks_for_instance(&self, instance_ref: &str) -> Result<Vec<DiskRecord>>;
    async fn volume_is_attached(&self, volume_ref: &str) -> Result<bool>;
}

// --- Postgres ---

pub struct PgRecordStore {
    pool: Pool<Postgres>,
}

impl PgRecordStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn volume_statuses_as_text(statuses: &[VolumeStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

fn instance_statuses_as_text(statuses: &[InstanceStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn insert_volume(&self, new: &NewVolumeRecord) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO volumes (id, remote_ref, name, size_gb, bootable, owner_id, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())",
        )
        .bind(id)
        .bind(&new.remote_ref)
        .bind(&new.name)
        .bind(new.size_gb)
        .bind(new.bootable)
        .bind(&new.owner_id)
        .bind(new.status)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn set_volume_status(
        &self,
        remote_ref: &str,
        to: VolumeStatus,
        allowed_from: &[VolumeStatus],
    ) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE volumes SET status = $2
             WHERE remote_ref = $1 AND status::text = ANY($3)",
        )
        .bind(remote_ref)
        .bind(to)
        .bind(volume_statuses_as_text(allowed_from))
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn rename_volume(&self, remote_ref: &str, new_name: &str) -> Result<bool> {
        let res = sqlx::query("UPDATE volumes SET name = $2 WHERE remote_ref = $1")
            .bind(remote_ref)
            .bind(new_name)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn delete_volume(&self, remote_ref: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM volumes WHERE remote_ref = $1")
            .bind(remote_ref)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn find_volume(&self, remote_ref: &str) -> Result<Option<VolumeRecord>> {
        let volume = sqlx::query_as::<_, VolumeRecord>(
            "SELECT id, remote_ref, name, size_gb, bootable, owner_id, status, created_at
             FROM volumes WHERE remote_ref = $1",
        )
        .bind(remote_ref)
        .fetch_optional(&self.pool)
        .await?;
        Ok(volume)
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeRecord>> {
        let volumes = sqlx::query_as::<_, VolumeRecord>(
            "SELECT id, remote_ref, name, size_gb, bootable, owner_id, status, created_at
             FROM volumes ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(volumes)
    }

    async fn insert_instance(&self, new: &NewInstanceRecord) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let res = sqlx::query(
            "INSERT INTO instances (id, remote_ref, name, owner_id, availability_zone, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, NOW())
             ON CONFLICT (remote_ref) DO NOTHING",
        )
        .bind(id)
        .bind(&new.remote_ref)
        .bind(&new.name)
        .bind(&new.owner_id)
        .bind(&new.availability_zone)
        .bind(new.status)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            let existing: Uuid =
                sqlx::query_scalar("SELECT id FROM instances WHERE remote_ref = $1")
                    .bind(&new.remote_ref)
                    .fetch_one(&self.pool)
                    .await?;
            return Ok(existing);
        }
        Ok(id)
    }

    async fn set_instance_status(
        &self,
        remote_ref: &str,
        to: InstanceStatus,
        allowed_from: &[InstanceStatus],
    ) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE instances
             SET status = $2,
                 terminated_at = CASE WHEN $2::text = 'terminated' THEN NOW() ELSE terminated_at END
             WHERE remote_ref = $1 AND status::text = ANY($3)",
        )
        .bind(remote_ref)
        .bind(to)
        .bind(instance_statuses_as_text(allowed_from))
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn find_instance(&self, remote_ref: &str) -> Result<Option<InstanceRecord>> {
        let instance = sqlx::query_as::<_, InstanceRecord>(
            "SELECT id, remote_ref, name, owner_id, availability_zone, status, created_at, terminated_at
             FROM instances WHERE remote_ref = $1",
        )
        .bind(remote_ref)
        .fetch_optional(&self.pool)
        .await?;
        Ok(instance)
    }

    async fn list_instances(&self) -> Result<Vec<InstanceRecord>> {
        let instances = sqlx::query_as::<_, InstanceRecord>(
            "SELECT id, remote_ref, name, owner_id, availability_zone, status, created_at, terminated_at
             FROM instances ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(instances)
    }

    async fn insert_disk(
        &self,
        instance_ref: &str,
        volume_ref: &str,
        device: Option<&str>,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO disks (id, instance_ref, volume_ref, device, created_at)
             VALUES ($1, $2, $3, $4, NOW())",
        )
        .bind(id)
        .bind(instance_ref)
        .bind(volume_ref)
        .bind(device)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn delete_disk(&self, instance_ref: &str, volume_ref: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM disks WHERE instance_ref = $1 AND volume_ref = $2")
            .bind(instance_ref)
            .bind(volume_ref)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn disks_for_instance(&self, instance_ref: &str) -> Result<Vec<DiskRecord>> {
        let disks = sqlx::query_as::<_, DiskRecord>(
            "SELECT id, instance_ref, volume_ref, device, created_at
             FROM disks WHERE instance_ref = $1 ORDER BY created_at",
        )
        .bind(instance_ref)
        .fetch_all(&self.pool)
        .await?;
        Ok(disks)
    }

    async fn volume_is_attached(&self, volume_ref: &str) -> Result<bool> {
        let attached: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM disks WHERE volume_ref = $1)")
                .bind(volume_ref)
                .fetch_one(&self.pool)
                .await?;
        Ok(attached)
    }
}

// --- In-memory (tests and local bringup) ---

#[derive(Default)]
struct MemoryState {
    volumes: Vec<VolumeRecord>,
    instances: Vec<InstanceRecord>,
    disks: Vec<DiskRecord>,
}

#[derive(Default)]
pub struct MemoryRecordStore {
    inner: Mutex<MemoryState>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert_volume(&self, new: &NewVolumeRecord) -> Result<Uuid> {
        let mut state = self.inner.lock().unwrap();
        let id = Uuid::new_v4();
        state.volumes.push(VolumeRecord {
            id,
            remote_ref: new.remote_ref.clone(),
            name: new.name.clone(),
            size_gb: new.size_gb,
            bootable: new.bootable,
            owner_id: new.owner_id.clone(),
            status: new.status,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn set_volume_status(
        &self,
        remote_ref: &str,
        to: VolumeStatus,
        allowed_from: &[VolumeStatus],
    ) -> Result<bool> {
        let mut state = self.inner.lock().unwrap();
        for volume in state.volumes.iter_mut() {
            if volume.remote_ref == remote_ref && allowed_from.contains(&volume.status) {
                volume.status = to;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn rename_volume(&self, remote_ref: &str, new_name: &str) -> Result<bool> {
        let mut state = self.inner.lock().unwrap();
        for volume in state.volumes.iter_mut() {
            if volume.remote_ref == remote_ref {
                volume.name = new_name.to_string();
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn delete_volume(&self, remote_ref: &str) -> Result<bool> {
        let mut state = self.inner.lock().unwrap();
        let before = state.volumes.len();
        state.volumes.retain(|v| v.remote_ref != remote_ref);
        Ok(state.volumes.len() < before)
    }

    async fn find_volume(&self, remote_ref: &str) -> Result<Option<VolumeRecord>> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .volumes
            .iter()
            .find(|v| v.remote_ref == remote_ref)
            .cloned())
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeRecord>> {
        Ok(self.inner.lock().unwrap().volumes.clone())
    }

    async fn insert_instance(&self, new: &NewInstanceRecord) -> Result<Uuid> {
        let mut state = self.inner.lock().unwrap();
        if let Some(existing) = state
            .instances
            .iter()
            .find(|i| i.remote_ref == new.remote_ref)
        {
            return Ok(existing.id);
        }
        let id = Uuid::new_v4();
        state.instances.push(InstanceRecord {
            id,
            remote_ref: new.remote_ref.clone(),
            name: new.name.clone(),
            owner_id: new.owner_id.clone(),
            availability_zone: new.availability_zone.clone(),
            status: new.status,
            created_at: Utc::now(),
            terminated_at: None,
        });
        Ok(id)
    }

    async fn set_instance_status(
        &self,
        remote_ref: &str,
        to: InstanceStatus,
        allowed_from: &[InstanceStatus],
    ) -> Result<bool> {
        let mut state = self.inner.lock().unwrap();
        for instance in state.instances.iter_mut() {
            if instance.remote_ref == remote_ref && allowed_from.contains(&instance.status) {
                instance.status = to;
                if to == InstanceStatus::Terminated {
                    instance.terminated_at = Some(Utc::now());
                }
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn find_instance(&self, remote_ref: &str) -> Result<Option<InstanceRecord>> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .instances
            .iter()
            .find(|i| i.remote_ref == remote_ref)
            .cloned())
    }

    async fn list_instances(&self) -> Result<Vec<InstanceRecord>> {
        Ok(self.inner.lock().unwrap().instances.clone())
    }

    async fn insert_disk(
        &self,
        instance_ref: &str,
        volume_ref: &str,
        device: Option<&str>,
    ) -> Result<Uuid> {
        let mut state = self.inner.lock().unwrap();
        if state
            .disks
            .iter()
            .any(|d| d.instance_ref == instance_ref && d.volume_ref == volume_ref)
        {
            return Err(anyhow::anyhow!(
                "disk already recorded for instance {} and volume {}",
                instance_ref,
                volume_ref
            ));
        }
        let id = Uuid::new_v4();
        state.disks.push(DiskRecord {
            id,
            instance_ref: instance_ref.to_string(),
            volume_ref: volume_ref.to_string(),
            device: device.map(|d| d.to_string()),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn delete_disk(&self, instance_ref: &str, volume_ref: &str) -> Result<bool> {
        let mut state = self.inner.lock().unwrap();
        let before = state.disks.len();
        state
            .disks
            .retain(|d| !(d.instance_ref == instance_ref && d.volume_ref == volume_ref));
        Ok(state.disks.len() < before)
    }

    async fn disks_for_instance(&self, instance_ref: &str) -> Result<Vec<DiskRecord>> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .disks
            .iter()
            .filter(|d| d.instance_ref == instance_ref)
            .cloned()
            .collect())
    }

    async fn volume_is_attached(&self, volume_ref: &str) -> Result<bool> {
        let state = self.inner.lock().unwrap();
        Ok(state.disks.iter().any(|d| d.volume_ref == volume_ref))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume(remote_ref: &str) -> NewVolumeRecord {
        NewVolumeRecord {
            remote_ref: remote_ref.to_string(),
            name: "data".to_string(),
            size_gb: 20,
            bootable: false,
            owner_id: None,
            status: VolumeStatus::InUse,
        }
    }

    #[tokio::test]
    async fn guarded_volume_transition_is_idempotent() {
        let store = MemoryRecordStore::new();
        store.insert_volume(&volume("vol-1")).await.unwrap();

        let moved = store
            .set_volume_status("vol-1", VolumeStatus::Available, &[VolumeStatus::InUse])
            .await
            .unwrap();
        assert!(moved);

        // Replay: already 'available', nothing to move.
        let moved = store
            .set_volume_status("vol-1", VolumeStatus::Available, &[VolumeStatus::InUse])
            .await
            .unwrap();
        assert!(!moved);
    }

    #[tokio::test]
    async fn instance_insert_is_at_most_once_per_remote_ref() {
        let store = MemoryRecordStore::new();
        let new = NewInstanceRecord {
            remote_ref: "srv-1".to_string(),
            name: "web-1".to_string(),
            owner_id: None,
            availability_zone: None,
            status: InstanceStatus::Active,
        };
        let first = store.insert_instance(&new).await.unwrap();
        let second = store.insert_instance(&new).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.list_instances().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn terminating_sets_terminated_at() {
        let store = MemoryRecordStore::new();
        store
            .insert_instance(&NewInstanceRecord {
                remote_ref: "srv-1".to_string(),
                name: "web-1".to_string(),
                owner_id: None,
                availability_zone: None,
                status: InstanceStatus::Active,
            })
            .await
            .unwrap();

        let moved = store
            .set_instance_status(
                "srv-1",
                InstanceStatus::Terminated,
                &[InstanceStatus::Active, InstanceStatus::Failed],
            )
            .await
            .unwrap();
        assert!(moved);
        let record = store.find_instance("srv-1").await.unwrap().unwrap();
        assert!(record.terminated_at.is_some());
    }
}
