use crate::{BootRequest, CloudApi, InstanceProbe, VolumeSpec};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Default)]
struct ScriptState {
    volume_statuses: HashMap<String, VecDeque<String>>,
    instance_probes: VecDeque<InstanceProbe>,
    fail_create_volume_at: Option<usize>,
    fail_create_instance: Option<String>,
    fail_mark_bootable: Option<String>,
    create_volume_calls: usize,
    volume_seq: usize,
    instance_seq: usize,
    port_seq: usize,
    created_volumes: Vec<VolumeSpec>,
    boot_requests: Vec<BootRequest>,
    bootable_marks: Vec<(String, bool)>,
    attachments: Vec<(String, String)>,
    detachments: Vec<(String, String)>,
    renamed_volumes: Vec<(String, String)>,
    deleted_volumes: Vec<String>,
    deleted_instances: Vec<String>,
    password_changes: Vec<(String, String)>,
    created_ports: Vec<(String, String)>,
    backup_registrations: Vec<(String, String)>,
    calls: Vec<String>,
}

/// Scripted in-memory stand-in for the remote control plane. Unscripted
/// status probes answer with the success value, so a bare `ScriptedCloud`
/// provisions cleanly; tests queue statuses and failures to exercise the
/// other paths.
#[derive(Default)]
pub struct ScriptedCloud {
    state: Mutex<ScriptState>,
}

impl ScriptedCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one status answer for a volume ref. Queued answers are consumed
    /// in order; an empty queue answers `available`.
    pub fn script_volume_status(&self, volume_ref: &str, status: &str) {
        self.state
            .lock()
            .unwrap()
            .volume_statuses
            .entry(volume_ref.to_string())
            .or_default()
            .push_back(status.to_string());
    }

    /// Queue one instance probe answer. An empty queue answers ACTIVE.
    pub fn script_instance_probe(&self, status: &str, fault_message: Option<&str>) {
        self.state
            .lock()
            .unwrap()
            .instance_probes
            .push_back(InstanceProbe {
                status: status.to_string(),
                fault_message: fault_message.map(|s| s.to_string()),
            });
    }

    /// Make the n-th create_volume call (1-based) fail.
    pub fn fail_create_volume_at(&self, call: usize) {
        self.state.lock().unwrap().fail_create_volume_at = Some(call);
    }

    pub fn fail_create_instance(&self, message: &str) {
        self.state.lock().unwrap().fail_create_instance = Some(message.to_string());
    }

    pub fn fail_mark_bootable(&self, message: &str) {
        self.state.lock().unwrap().fail_mark_bootable = Some(message.to_string());
    }

    pub fn created_volumes(&self) -> Vec<VolumeSpec> {
        self.state.lock().unwrap().created_volumes.clone()
    }

    pub fn boot_requests(&self) -> Vec<BootRequest> {
        self.state.lock().unwrap().boot_requests.clone()
    }

    pub fn bootable_marks(&self) -> Vec<(String, bool)> {
        self.state.lock().unwrap().bootable_marks.clone()
    }

    pub fn attachments(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().attachments.clone()
    }

    pub fn detachments(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().detachments.clone()
    }

    pub fn renamed_volumes(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().renamed_volumes.clone()
    }

    pub fn deleted_volumes(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_volumes.clone()
    }

    pub fn deleted_instances(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_instances.clone()
    }

    pub fn password_changes(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().password_changes.clone()
    }

    pub fn created_ports(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().created_ports.clone()
    }

    pub fn backup_registrations(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().backup_registrations.clone()
    }

    /// Ordered journal of every call, as `method:argument` lines.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        let prefix = format!("{}:", method);
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }
}

#[async_trait]
impl CloudApi for ScriptedCloud {
    async fn create_volume(&self, spec: &VolumeSpec) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.create_volume_calls += 1;
        state.calls.push(format!("create_volume:{}", spec.name));
        if state.fail_create_volume_at == Some(state.create_volume_calls) {
            return Err(anyhow::anyhow!(
                "Failed to create volume: 500 - simulated storage backend failure"
            ));
        }
        state.volume_seq += 1;
        let volume_ref = format!("vol-{}", state.volume_seq);
        state.created_volumes.push(spec.clone());
        Ok(volume_ref)
    }

    async fn get_volume_status(&self, volume_ref: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("get_volume_status:{}", volume_ref));
        let status = state
            .volume_statuses
            .get_mut(volume_ref)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| "available".to_string());
        Ok(status)
    }

    async fn mark_volume_bootable(&self, volume_ref: &str, bootable: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("mark_volume_bootable:{}", volume_ref));
        if let Some(message) = &state.fail_mark_bootable {
            return Err(anyhow::anyhow!("{}", message));
        }
        state
            .bootable_marks
            .push((volume_ref.to_string(), bootable));
        Ok(())
    }

    async fn update_volume(&self, volume_ref: &str, new_name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("update_volume:{}", volume_ref));
        state
            .renamed_volumes
            .push((volume_ref.to_string(), new_name.to_string()));
        Ok(())
    }

    async fn delete_volume(&self, volume_ref: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete_volume:{}", volume_ref));
        state.deleted_volumes.push(volume_ref.to_string());
        Ok(())
    }

    async fn attach_volume(
        &self,
        instance_ref: &str,
        volume_ref: &str,
        _device: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("attach_volume:{}", volume_ref));
        state
            .attachments
            .push((instance_ref.to_string(), volume_ref.to_string()));
        Ok(())
    }

    async fn detach_volume(&self, instance_ref: &str, volume_ref: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("detach_volume:{}", volume_ref));
        state
            .detachments
            .push((instance_ref.to_string(), volume_ref.to_string()));
        Ok(())
    }

    async fn create_instance(&self, request: &BootRequest) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_instance:{}", request.name));
        if let Some(message) = &state.fail_create_instance {
            return Err(anyhow::anyhow!("{}", message));
        }
        state.instance_seq += 1;
        let instance_ref = format!("srv-{}", state.instance_seq);
        state.boot_requests.push(request.clone());
        Ok(instance_ref)
    }

    async fn get_instance_status(&self, instance_ref: &str) -> Result<InstanceProbe> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("get_instance_status:{}", instance_ref));
        let probe = state
            .instance_probes
            .pop_front()
            .unwrap_or_else(|| InstanceProbe {
                status: "ACTIVE".to_string(),
                fault_message: None,
            });
        Ok(probe)
    }

    async fn delete_instance(&self, instance_ref: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete_instance:{}", instance_ref));
        state.deleted_instances.push(instance_ref.to_string());
        Ok(())
    }

    async fn change_admin_password(&self, instance_ref: &str, password: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("change_admin_password:{}", instance_ref));
        state
            .password_changes
            .push((instance_ref.to_string(), password.to_string()));
        Ok(())
    }

    async fn create_network_port(&self, name: &str, net_ref: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_network_port:{}", name));
        state.port_seq += 1;
        let port_ref = format!("port-{}", state.port_seq);
        state
            .created_ports
            .push((name.to_string(), net_ref.to_string()));
        Ok(port_ref)
    }

    async fn register_backup(
        &self,
        instance_ref: &str,
        name: &str,
        _owner_id: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("register_backup:{}", instance_ref));
        state
            .backup_registrations
            .push((instance_ref.to_string(), name.to_string()));
        Ok(())
    }
}
