use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(feature = "mock")]
pub mod mock;
pub mod openstack;

// --- Wire types ---

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MappingSource {
    Image,
    Volume,
    Snapshot,
    Blank,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MappingDestination {
    Local,
    Volume,
}

/// One entry of the composite request's device-mapping list. Carries the
/// request metadata (name, owner, flags) alongside the wire fields; the wire
/// projection happens in [`wire_device_mappings`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DeviceMappingEntry {
    pub uuid: String,
    pub source_type: MappingSource,
    pub destination_type: MappingDestination,
    pub boot_index: Option<i32>,
    pub size_gb: Option<i32>,
    pub delete_on_termination: bool,
    pub selected: bool,
    pub bootable: bool,
    pub name: Option<String>,
    pub owner_id: Option<String>,
}

/// Network attachment in request form. `public` marks externally routed
/// networks; it never reaches the remote API.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Nic {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public: Option<bool>,
}

impl Nic {
    pub fn private(net_id: impl Into<String>) -> Self {
        Nic {
            net_id: Some(net_id.into()),
            port_id: None,
            public: None,
        }
    }

    pub fn public(net_id: impl Into<String>) -> Self {
        Nic {
            net_id: Some(net_id.into()),
            port_id: None,
            public: Some(true),
        }
    }

    pub fn port(port_id: impl Into<String>) -> Self {
        Nic {
            net_id: None,
            port_id: Some(port_id.into()),
            public: None,
        }
    }
}

/// The composite boot request. Immutable once built; construct it through
/// [`BootRequestBuilder`].
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct BootRequest {
    pub name: String,
    pub flavor_ref: String,
    pub image_ref: Option<String>,
    pub availability_zone: Option<String>,
    pub security_groups: Vec<String>,
    pub nics: Vec<Nic>,
    pub device_mappings: Vec<DeviceMappingEntry>,
    pub user_data: Option<String>,
    pub owner_id: Option<String>,
}

impl BootRequest {
    pub fn builder() -> BootRequestBuilder {
        BootRequestBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct BootRequestBuilder {
    name: String,
    flavor_ref: String,
    image_ref: Option<String>,
    availability_zone: Option<String>,
    security_groups: Vec<String>,
    nics: Vec<Nic>,
    device_mappings: Vec<DeviceMappingEntry>,
    user_data: Option<String>,
    owner_id: Option<String>,
}

impl BootRequestBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn flavor_ref(mut self, flavor_ref: impl Into<String>) -> Self {
        self.flavor_ref = flavor_ref.into();
        self
    }

    pub fn image_ref(mut self, image_ref: Option<String>) -> Self {
        self.image_ref = image_ref;
        self
    }

    pub fn availability_zone(mut self, zone: Option<String>) -> Self {
        self.availability_zone = zone;
        self
    }

    pub fn security_groups(mut self, groups: Vec<String>) -> Self {
        self.security_groups = groups;
        self
    }

    pub fn nics(mut self, nics: Vec<Nic>) -> Self {
        self.nics = nics;
        self
    }

    pub fn device_mappings(mut self, mappings: Vec<DeviceMappingEntry>) -> Self {
        self.device_mappings = mappings;
        self
    }

    pub fn user_data(mut self, user_data: Option<String>) -> Self {
        self.user_data = user_data;
        self
    }

    pub fn owner_id(mut self, owner_id: Option<String>) -> Self {
        self.owner_id = owner_id;
        self
    }

    /// Validates and freezes the request. A request with no boot source, two
    /// boot entries, or both an image ref and a volume boot entry never
    /// leaves this function.
    pub fn build(self) -> Result<BootRequest> {
        if self.name.trim().is_empty() {
            return Err(anyhow::anyhow!("boot request requires a name"));
        }
        if self.flavor_ref.trim().is_empty() {
            return Err(anyhow::anyhow!("boot request requires a flavor ref"));
        }

        let boot_entries: Vec<&DeviceMappingEntry> = self
            .device_mappings
            .iter()
            .filter(|m| m.boot_index == Some(0))
            .collect();
        if boot_entries.len() > 1 {
            return Err(anyhow::anyhow!(
                "boot request carries {} boot entries, at most one is allowed",
                boot_entries.len()
            ));
        }
        let volume_boot = boot_entries.iter().any(|m| {
            matches!(
                m.source_type,
                MappingSource::Volume | MappingSource::Snapshot
            )
        });
        if self.image_ref.is_some() && volume_boot {
            return Err(anyhow::anyhow!(
                "boot request carries both an image ref and a volume boot entry"
            ));
        }
        if self.image_ref.is_none() && !volume_boot {
            return Err(anyhow::anyhow!("boot request carries no boot source"));
        }

        Ok(BootRequest {
            name: self.name,
            flavor_ref: self.flavor_ref,
            image_ref: self.image_ref,
            availability_zone: self.availability_zone,
            security_groups: self.security_groups,
            nics: self.nics,
            device_mappings: self.device_mappings,
            user_data: self.user_data,
            owner_id: self.owner_id,
        })
    }
}

/// Projects device mappings onto the remote API's `block_device_mapping_v2`
/// shape. Entries sourced from an existing volume never emit a size; the
/// remote API reads a size on those as "create a new volume".
pub fn wire_device_mappings(entries: &[DeviceMappingEntry]) -> Vec<serde_json::Value> {
    entries
        .iter()
        .map(|entry| {
            let mut wire = serde_json::json!({
                "uuid": entry.uuid,
                "source_type": entry.source_type,
                "destination_type": entry.destination_type,
                "delete_on_termination": entry.delete_on_termination,
            });
            if let Some(boot_index) = entry.boot_index {
                wire["boot_index"] = serde_json::json!(boot_index);
            }
            if entry.source_type != MappingSource::Volume {
                if let Some(size_gb) = entry.size_gb {
                    wire["volume_size"] = serde_json::json!(size_gb);
                }
            }
            wire
        })
        .collect()
}

// --- Remote status probes ---

/// Remote volume create parameters. A bootable volume seeded from an image
/// carries that image's ref.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeSpec {
    pub name: String,
    pub size_gb: i32,
    pub bootable: bool,
    pub image_ref: Option<String>,
    pub availability_zone: Option<String>,
}

/// Instance status snapshot. `fault_message` is set when the remote reports
/// the error state.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceProbe {
    pub status: String,
    pub fault_message: Option<String>,
}

// --- Provider trait ---

#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn create_volume(&self, spec: &VolumeSpec) -> Result<String>;
    async fn get_volume_status(&self, volume_ref: &str) -> Result<String>;
    async fn mark_volume_bootable(&self, volume_ref: &str, bootable: bool) -> Result<()>;
    async fn update_volume(&self, volume_ref: &str, new_name: &str) -> Result<()>;
    async fn delete_volume(&self, volume_ref: &str) -> Result<()>;

    async fn attach_volume(
        &self,
        instance_ref: &str,
        volume_ref: &str,
        device: Option<&str>,
    ) -> Result<()>;
    async fn detach_volume(&self, instance_ref: &str, volume_ref: &str) -> Result<()>;

    async fn create_instance(&self, request: &BootRequest) -> Result<String>;
    async fn get_instance_status(&self, instance_ref: &str) -> Result<InstanceProbe>;
    async fn delete_instance(&self, instance_ref: &str) -> Result<()>;
    async fn change_admin_password(&self, instance_ref: &str, password: &str) -> Result<()>;

    async fn create_network_port(&self, name: &str, net_ref: &str) -> Result<String>;

    // Optional backup-service registration. Providers without a backup
    // service keep the default no-op.
    async fn register_backup(
        &self,
        _instance_ref: &str,
        _name: &str,
        _owner_id: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }
}

// --- Client configuration ---

/// Explicit connection settings for the HTTP client. Built once at the
/// composition root; nothing inside the client reads the environment.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    pub token: String,
    pub backup_endpoint: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        ClientConfig {
            endpoint: endpoint.into(),
            token: token.into(),
            backup_endpoint: None,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(20),
        }
    }

    /// Reads `CLOUD_API_ENDPOINT` and `CLOUD_API_TOKEN`. Secrets prefer the
    /// `*_FILE` variant (Docker/K8s friendly), falling back to the env var.
    pub fn from_env() -> Result<Self> {
        let endpoint = std::env::var("CLOUD_API_ENDPOINT")
            .map_err(|_| anyhow::anyhow!("CLOUD_API_ENDPOINT must be set"))?
            .trim()
            .to_string();
        let token = env_or_file("CLOUD_API_TOKEN")
            .ok_or_else(|| anyhow::anyhow!("CLOUD_API_TOKEN or CLOUD_API_TOKEN_FILE must be set"))?;
        let backup_endpoint = std::env::var("BACKUP_API_ENDPOINT")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let mut config = ClientConfig::new(endpoint, token);
        config.backup_endpoint = backup_endpoint;
        Ok(config)
    }
}

fn env_or_file(name: &str) -> Option<String> {
    let file_var = format!("{}_FILE", name);
    std::env::var(&file_var)
        .ok()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .or_else(|| std::env::var(name).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
