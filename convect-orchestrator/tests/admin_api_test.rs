// Admin surface tests, served from the in-memory store.

use axum_test::TestServer;
use convect_common::{InstanceStatus, VolumeStatus};
use convect_orchestrator::api::{admin_router, AppState};
use convect_orchestrator::audit::{AuditSink, MemoryAuditSink};
use convect_orchestrator::store::{
    MemoryRecordStore, NewInstanceRecord, NewVolumeRecord, RecordStore,
};
use std::sync::Arc;

fn test_state() -> (AppState, Arc<MemoryRecordStore>, Arc<MemoryAuditSink>) {
    let store = Arc::new(MemoryRecordStore::new());
    let audit = Arc::new(MemoryAuditSink::new());
    let state = AppState {
        store: store.clone(),
        audit: audit.clone(),
    };
    (state, store, audit)
}

fn instance(remote_ref: &str, status: InstanceStatus) -> NewInstanceRecord {
    NewInstanceRecord {
        remote_ref: remote_ref.to_string(),
        name: "web".to_string(),
        owner_id: Some("user-1".to_string()),
        availability_zone: Some("zone-a".to_string()),
        status,
    }
}

#[tokio::test]
async fn root_announces_the_service() {
    let (state, _store, _audit) = test_state();
    let server = TestServer::new(admin_router(state)).unwrap();

    let response = server.get("/").await;

    assert_eq!(response.status_code(), 200);
    assert_eq!(response.text(), "Convect Orchestrator Online (Postgres Backed)");
}

#[tokio::test]
async fn health_counts_only_live_instances() {
    let (state, store, _audit) = test_state();
    store.insert_instance(&instance("srv-1", InstanceStatus::Active)).await.unwrap();
    store.insert_instance(&instance("srv-2", InstanceStatus::Provisioning)).await.unwrap();
    store.insert_instance(&instance("srv-3", InstanceStatus::Terminated)).await.unwrap();
    let server = TestServer::new(admin_router(state)).unwrap();

    let response = server.get("/health").await;

    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_instances"], 2);
}

#[tokio::test]
async fn instances_listing_returns_records() {
    let (state, store, _audit) = test_state();
    store.insert_instance(&instance("srv-1", InstanceStatus::Active)).await.unwrap();
    let server = TestServer::new(admin_router(state)).unwrap();

    let response = server.get("/instances").await;

    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["remote_ref"], "srv-1");
    assert_eq!(body[0]["status"], "active");
}

#[tokio::test]
async fn volumes_listing_keeps_remote_status_spelling() {
    let (state, store, _audit) = test_state();
    store
        .insert_volume(&NewVolumeRecord {
            remote_ref: "vol-1".to_string(),
            name: "data".to_string(),
            size_gb: 20,
            bootable: false,
            owner_id: None,
            status: VolumeStatus::InUse,
        })
        .await
        .unwrap();
    let server = TestServer::new(admin_router(state)).unwrap();

    let response = server.get("/volumes").await;

    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body[0]["remote_ref"], "vol-1");
    assert_eq!(body[0]["status"], "in-use");
}

#[tokio::test]
async fn audit_listing_returns_newest_first() {
    let (state, _store, audit) = test_state();
    audit.event("INSTANCE_PROVISION", None, None).await.unwrap();
    audit.event("VOLUME_ATTACH", Some("srv-1"), None).await.unwrap();
    let server = TestServer::new(admin_router(state)).unwrap();

    let response = server.get("/audit").await;

    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body.as_array().unwrap().len(), 2);
    assert_eq!(body[0]["action_type"], "VOLUME_ATTACH");
    assert_eq!(body[1]["action_type"], "INSTANCE_PROVISION");
}
