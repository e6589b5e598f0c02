use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Enums ---

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, sqlx::Type)]
#[sqlx(type_name = "instance_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Provisioning, // Request submitted, converging
    Active,       // Remote reported ACTIVE
    Failed,       // Remote fault or convergence timeout
    Terminated,   // Destroyed
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, sqlx::Type)]
#[sqlx(type_name = "volume_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum VolumeStatus {
    Creating,
    Available,
    #[sqlx(rename = "in-use")]
    #[serde(rename = "in-use")]
    InUse, // Attached, or reserved for an attachment in flight
    Error,
    Deleting,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Provisioning => "provisioning",
            InstanceStatus::Active => "active",
            InstanceStatus::Failed => "failed",
            InstanceStatus::Terminated => "terminated",
        }
    }
}

impl VolumeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeStatus::Creating => "creating",
            VolumeStatus::Available => "available",
            VolumeStatus::InUse => "in-use",
            VolumeStatus::Error => "error",
            VolumeStatus::Deleting => "deleting",
        }
    }
}

/// Which remote resource a convergence loop is watching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Instance,
    Volume,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Instance => write!(f, "instance"),
            ResourceKind::Volume => write!(f, "volume"),
        }
    }
}

// --- Entities (SQLx Mapped) ---

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct VolumeRecord {
    pub id: Uuid,
    pub remote_ref: String,
    pub name: String,
    pub size_gb: i32,
    pub bootable: bool,
    pub owner_id: Option<String>,
    pub status: VolumeStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct InstanceRecord {
    pub id: Uuid,
    pub remote_ref: String,
    pub name: String,
    pub owner_id: Option<String>,
    pub availability_zone: Option<String>,
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
    pub terminated_at: Option<DateTime<Utc>>,
}

/// Links an instance to an attached volume. Removed at detach/destroy time.
#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct DiskRecord {
    pub id: Uuid,
    pub instance_ref: String,
    pub volume_ref: String,
    pub device: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct AuditRecord {
    pub id: Uuid,
    pub action_type: String,
    pub status: String,
    pub instance_ref: Option<String>,
    pub error_message: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

// --- Errors ---

/// Terminal failures of a provisioning or day-2 operation.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// A remote API call failed outright. `message` carries the remote
    /// response verbatim.
    #[error("remote call {op} failed: {message}")]
    RemoteCall { op: &'static str, message: String },

    #[error("{kind} did not converge after {attempts} attempts (last status: {last_status})")]
    ConvergenceTimeout {
        kind: ResourceKind,
        last_status: String,
        attempts: u32,
    },

    /// The remote resource converged to its error state. `message` carries
    /// the remote fault message verbatim.
    #[error("{kind} entered error state: {message}")]
    RemoteFault { kind: ResourceKind, message: String },

    #[error("{kind} convergence cancelled")]
    Cancelled { kind: ResourceKind },

    #[error("record store failure: {0}")]
    Storage(String),
}

impl ProvisionError {
    pub fn remote_call(op: &'static str, err: impl std::fmt::Display) -> Self {
        ProvisionError::RemoteCall {
            op,
            message: err.to_string(),
        }
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        ProvisionError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_fault_keeps_message_verbatim() {
        let err = ProvisionError::RemoteFault {
            kind: ResourceKind::Instance,
            message: "No valid host was found. There are not enough hosts available.".into(),
        };
        assert_eq!(
            err.to_string(),
            "instance entered error state: No valid host was found. There are not enough hosts available."
        );
    }

    #[test]
    fn timeout_names_kind_status_and_attempts() {
        let err = ProvisionError::ConvergenceTimeout {
            kind: ResourceKind::Volume,
            last_status: "creating".into(),
            attempts: 5,
        };
        assert_eq!(
            err.to_string(),
            "volume did not converge after 5 attempts (last status: creating)"
        );
    }

    #[test]
    fn volume_status_serializes_like_the_remote_api() {
        assert_eq!(
            serde_json::to_string(&VolumeStatus::InUse).unwrap(),
            "\"in-use\""
        );
        assert_eq!(
            serde_json::to_string(&VolumeStatus::Available).unwrap(),
            "\"available\""
        );
    }
}
