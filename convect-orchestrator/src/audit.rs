use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use convect_common::AuditRecord;
use sqlx::{Pool, Postgres};
use std::sync::Mutex;
use uuid::Uuid;

/// Action audit trail. Entries are advisory: callers swallow sink errors
/// so a logging failure never aborts a provisioning run.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Open a long-running entry with status 'started'.
    async fn begin(
        &self,
        action_type: &str,
        instance_ref: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Uuid>;

    /// Close an entry opened by `begin`.
    async fn complete(
        &self,
        entry_id: Uuid,
        status: &str,
        duration_ms: i64,
        error_message: Option<&str>,
    ) -> Result<()>;

    /// One-shot entry for point-in-time events.
    async fn event(
        &self,
        action_type: &str,
        instance_ref: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Uuid>;

    async fn recent(&self, limit: i64) -> Result<Vec<AuditRecord>>;
}

// --- Postgres ---

pub struct PgAuditSink {
    pool: Pool<Postgres>,
}

impl PgAuditSink {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn insert(
        &self,
        action_type: &str,
        status: &str,
        instance_ref: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Uuid> {
        let entry_id = Uuid::new_v4();

        sqlx::query(
            "INSERT INTO action_logs
             (id, action_type, component, status, instance_ref, metadata, created_at)
             VALUES ($1, $2, 'orchestrator', $3, $4, $5, NOW())",
        )
        .bind(entry_id)
        .bind(action_type)
        .bind(status)
        .bind(instance_ref)
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        println!("📝 [Audit] {} - {} ({})", action_type, status, entry_id);
        Ok(entry_id)
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn begin(
        &self,
        action_type: &str,
        instance_ref: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Uuid> {
        self.insert(action_type, "started", instance_ref, metadata)
            .await
    }

    async fn complete(
        &self,
        entry_id: Uuid,
        status: &str,
        duration_ms: i64,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE action_logs
             SET status = $2, duration_ms = $3, error_message = $4, completed_at = NOW()
             WHERE id = $1",
        )
        .bind(entry_id)
        .bind(status)
        .bind(duration_ms)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn event(
        &self,
        action_type: &str,
        instance_ref: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Uuid> {
        self.insert(action_type, "success", instance_ref, metadata)
            .await
    }

    async fn recent(&self, limit: i64) -> Result<Vec<AuditRecord>> {
        let entries = sqlx::query_as::<_, AuditRecord>(
            "SELECT id, action_type, status, instance_ref, error_message, metadata,
                    created_at, completed_at, duration_ms
             FROM action_logs ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}

// --- In-memory (tests) ---

#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<AuditRecord> {
        self.entries.lock().unwrap().clone()
    }

    fn push(
        &self,
        action_type: &str,
        status: &str,
        instance_ref: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.entries.lock().unwrap().push(AuditRecord {
            id,
            action_type: action_type.to_string(),
            status: status.to_string(),
            instance_ref: instance_ref.map(|r| r.to_string()),
            error_message: None,
            metadata,
            created_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
        });
        id
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn begin(
        &self,
        action_type: &str,
        instance_ref: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Uuid> {
        Ok(self.push(action_type, "started", instance_ref, metadata))
    }

    async fn complete(
        &self,
        entry_id: Uuid,
        status: &str,
        duration_ms: i64,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| e.id == entry_id) {
            entry.status = status.to_string();
            entry.duration_ms = Some(duration_ms);
            entry.error_message = error_message.map(|m| m.to_string());
            entry.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn event(
        &self,
        action_type: &str,
        instance_ref: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Uuid> {
        Ok(self.push(action_type, "success", instance_ref, metadata))
    }

    async fn recent(&self, limit: i64) -> Result<Vec<AuditRecord>> {
        let entries = self.entries.lock().unwrap();
        let mut recent: Vec<AuditRecord> = entries.clone();
        recent.reverse();
        recent.truncate(limit as usize);
        Ok(recent)
    }
}
