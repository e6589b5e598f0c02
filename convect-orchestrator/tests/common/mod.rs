// Shared fixtures: scripted provider plus in-memory store and audit sink,
// so the suites run without Postgres, Redis, or network access.

use convect_orchestrator::audit::MemoryAuditSink;
use convect_orchestrator::boot_source::BootSource;
use convect_orchestrator::poll::PollConfig;
use convect_orchestrator::provision::ProvisionCtx;
use convect_orchestrator::request::{GuestOs, ProvisioningIntent, VolumeRequest};
use convect_orchestrator::store::MemoryRecordStore;
use convect_providers::mock::ScriptedCloud;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub struct Harness {
    pub cloud: Arc<ScriptedCloud>,
    pub store: Arc<MemoryRecordStore>,
    pub audit: Arc<MemoryAuditSink>,
    pub cancel: watch::Sender<bool>,
    pub ctx: ProvisionCtx,
}

pub fn harness() -> Harness {
    let cloud = Arc::new(ScriptedCloud::new());
    let store = Arc::new(MemoryRecordStore::new());
    let audit = Arc::new(MemoryAuditSink::new());
    let (cancel, cancel_rx) = watch::channel(false);
    let ctx = ProvisionCtx {
        cloud: cloud.clone(),
        store: store.clone(),
        audit: audit.clone(),
        poll: PollConfig {
            max_attempts: 5,
            base_interval: Duration::ZERO,
        },
        cancel: cancel_rx,
    };
    Harness {
        cloud,
        store,
        audit,
        cancel,
        ctx,
    }
}

pub fn image_intent(name: &str) -> ProvisioningIntent {
    ProvisioningIntent {
        name: name.to_string(),
        flavor_ref: "flavor-small".to_string(),
        source: BootSource::Image {
            image_ref: "img-ubuntu".to_string(),
        },
        availability_zone: Some("zone-a".to_string()),
        networks: vec![],
        security_groups: vec!["default".to_string()],
        volumes: vec![],
        owner_id: Some("user-1".to_string()),
        guest_os: GuestOs::Linux,
        admin_password: None,
    }
}

pub fn volume_request(name: &str, size_gb: i32, bootable: bool) -> VolumeRequest {
    VolumeRequest {
        name: name.to_string(),
        size_gb,
        bootable,
        delete_on_termination: bootable,
    }
}
