use crate::boot_source::{BootPlan, BootSource};
use base64::engine::general_purpose;
use base64::Engine as _;
use convect_common::ProvisionError;
use convect_providers::{BootRequest, Nic};
use serde::{Deserialize, Serialize};

/// Declarative provisioning ask. Frozen into a validated [`BootRequest`]
/// only once pre-creation and boot-source resolution have run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningIntent {
    pub name: String,
    pub flavor_ref: String,
    pub source: BootSource,
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub networks: Vec<NetworkAttachment>,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<VolumeRequest>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub guest_os: GuestOs,
    #[serde(default)]
    pub admin_password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NetworkAttachment {
    Private { net_ref: String },
    Public { net_ref: String },
    Port { port_ref: String },
}

/// A volume to create remotely before the instance request is submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeRequest {
    pub name: String,
    pub size_gb: i32,
    #[serde(default)]
    pub bootable: bool,
    #[serde(default)]
    pub delete_on_termination: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GuestOs {
    #[default]
    Linux,
    Windows,
}

impl GuestOs {
    /// Fallback inference from an image name, for callers without explicit
    /// guest metadata.
    pub fn infer(image_name: &str) -> Self {
        if image_name.contains("Window") {
            GuestOs::Windows
        } else {
            GuestOs::Linux
        }
    }
}

/// Resolve network attachments to wire form. Blank references are dropped;
/// order is preserved since it determines guest NIC ordering.
pub fn resolve_nics(attachments: &[NetworkAttachment]) -> Vec<Nic> {
    attachments
        .iter()
        .filter_map(|attachment| match attachment {
            NetworkAttachment::Private { net_ref } if !net_ref.is_empty() => {
                Some(Nic::private(net_ref))
            }
            NetworkAttachment::Public { net_ref } if !net_ref.is_empty() => {
                Some(Nic::public(net_ref))
            }
            NetworkAttachment::Port { port_ref } if !port_ref.is_empty() => {
                Some(Nic::port(port_ref))
            }
            _ => None,
        })
        .collect()
}

/// Guest bootstrap payload, base64 encoded for the wire. Without an admin
/// password there is nothing to bootstrap and no payload is sent.
pub fn render_user_data(guest_os: GuestOs, admin_password: Option<&str>) -> Option<String> {
    let password = admin_password?;
    let script = match guest_os {
        GuestOs::Linux => format!(
            "#cloud-config\n\
             disable_root: false\n\
             ssh_pwauth: True\n\
             ssh_deletekeys: False\n\
             chpasswd:\n  list: |\n    root:{password}\n  expire: False\n"
        ),
        GuestOs::Windows => format!(
            "#ps1\n\
             net user Administrator {password}\n\
             net user administrator /active:yes\n"
        ),
    };
    Some(general_purpose::STANDARD.encode(script))
}

/// Assemble the composite request from a resolved boot plan. Pure; all
/// remote side effects have already happened by the time this runs.
pub fn compose(
    intent: &ProvisioningIntent,
    plan: &BootPlan,
) -> Result<BootRequest, ProvisionError> {
    BootRequest::builder()
        .name(&intent.name)
        .flavor_ref(&intent.flavor_ref)
        .image_ref(plan.image_ref.clone())
        .availability_zone(intent.availability_zone.clone())
        .security_groups(intent.security_groups.clone())
        .nics(resolve_nics(&intent.networks))
        .device_mappings(plan.entries.clone())
        .user_data(render_user_data(
            intent.guest_os,
            intent.admin_password.as_deref(),
        ))
        .owner_id(intent.owner_id.clone())
        .build()
        .map_err(|err| ProvisionError::Validation(err.to_string()))
}

/// Audit summary of a fully assembled request. Owner falls back from the
/// first device mapping to the intent owner, matching how attached storage
/// is attributed.
pub fn composed_audit_metadata(request: &BootRequest) -> serde_json::Value {
    let owner = request
        .device_mappings
        .first()
        .and_then(|entry| entry.owner_id.clone())
        .or_else(|| request.owner_id.clone());
    let total_size_gb: i64 = request
        .device_mappings
        .iter()
        .filter_map(|entry| entry.size_gb)
        .map(i64::from)
        .sum();

    serde_json::json!({
        "name": request.name,
        "flavor_ref": request.flavor_ref,
        "owner": owner,
        "total_size_gb": total_size_gb,
        "nic_count": request.nics.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot_source::plan_boot;
    use convect_providers::{DeviceMappingEntry, MappingDestination, MappingSource};

    fn data_entry(uuid: &str, size_gb: i32, owner_id: Option<&str>) -> DeviceMappingEntry {
        DeviceMappingEntry {
            uuid: uuid.to_string(),
            source_type: MappingSource::Volume,
            destination_type: MappingDestination::Volume,
            boot_index: None,
            size_gb: Some(size_gb),
            delete_on_termination: false,
            selected: false,
            bootable: false,
            name: None,
            owner_id: owner_id.map(|o| o.to_string()),
        }
    }

    fn intent() -> ProvisioningIntent {
        ProvisioningIntent {
            name: "web-1".to_string(),
            flavor_ref: "flavor-small".to_string(),
            source: BootSource::Image {
                image_ref: "img-1".to_string(),
            },
            availability_zone: Some("zone-a".to_string()),
            networks: vec![NetworkAttachment::Private {
                net_ref: "net-1".to_string(),
            }],
            security_groups: vec!["default".to_string()],
            volumes: vec![],
            owner_id: Some("user-1".to_string()),
            guest_os: GuestOs::Linux,
            admin_password: None,
        }
    }

    #[test]
    fn nic_resolution_preserves_order_and_drops_blanks() {
        let nics = resolve_nics(&[
            NetworkAttachment::Private {
                net_ref: "net-1".to_string(),
            },
            NetworkAttachment::Port {
                port_ref: String::new(),
            },
            NetworkAttachment::Public {
                net_ref: "net-ext".to_string(),
            },
            NetworkAttachment::Port {
                port_ref: "port-1".to_string(),
            },
        ]);

        assert_eq!(nics.len(), 3);
        assert_eq!(nics[0], Nic::private("net-1"));
        assert_eq!(nics[1], Nic::public("net-ext"));
        assert_eq!(nics[2], Nic::port("port-1"));
    }

    #[test]
    fn linux_user_data_sets_the_root_password() {
        let encoded = render_user_data(GuestOs::Linux, Some("s3cret")).unwrap();
        let decoded = String::from_utf8(general_purpose::STANDARD.decode(encoded).unwrap()).unwrap();

        assert!(decoded.starts_with("#cloud-config"));
        assert!(decoded.contains("root:s3cret"));
        assert!(decoded.contains("disable_root: false"));
    }

    #[test]
    fn windows_user_data_activates_the_administrator_account() {
        let encoded = render_user_data(GuestOs::Windows, Some("s3cret")).unwrap();
        let decoded = String::from_utf8(general_purpose::STANDARD.decode(encoded).unwrap()).unwrap();

        assert!(decoded.starts_with("#ps1"));
        assert!(decoded.contains("net user Administrator s3cret"));
        assert!(decoded.contains("net user administrator /active:yes"));
    }

    #[test]
    fn no_admin_password_means_no_user_data() {
        assert!(render_user_data(GuestOs::Linux, None).is_none());
        assert!(render_user_data(GuestOs::Windows, None).is_none());
    }

    #[test]
    fn guest_os_can_be_inferred_from_an_image_name() {
        assert_eq!(GuestOs::infer("Windows Server 2022"), GuestOs::Windows);
        assert_eq!(GuestOs::infer("ubuntu-22.04-lts"), GuestOs::Linux);
    }

    #[test]
    fn compose_builds_a_plain_image_request() {
        let intent = intent();
        let plan = plan_boot(&intent.source, &[]);
        let request = compose(&intent, &plan).unwrap();

        assert_eq!(request.name, "web-1");
        assert_eq!(request.image_ref.as_deref(), Some("img-1"));
        assert_eq!(request.availability_zone.as_deref(), Some("zone-a"));
        assert!(request.device_mappings.is_empty());
        assert_eq!(request.nics.len(), 1);
        assert!(request.user_data.is_none());
    }

    #[test]
    fn compose_surfaces_builder_rejections_as_validation_errors() {
        let mut intent = intent();
        intent.name = String::new();
        let plan = plan_boot(&intent.source, &[]);

        let err = compose(&intent, &plan).unwrap_err();
        assert!(matches!(err, ProvisionError::Validation(_)));
    }

    #[test]
    fn audit_metadata_sums_sizes_and_attributes_the_owner() {
        let intent = intent();
        let plan = plan_boot(
            &intent.source,
            &[
                data_entry("vol-1", 30, Some("vol-owner")),
                data_entry("vol-2", 20, None),
            ],
        );

        let request = compose(&intent, &plan).unwrap();
        let metadata = composed_audit_metadata(&request);

        assert_eq!(metadata["name"], "web-1");
        assert_eq!(metadata["flavor_ref"], "flavor-small");
        assert_eq!(metadata["owner"], "vol-owner");
        assert_eq!(metadata["total_size_gb"], 50);
        assert_eq!(metadata["nic_count"], 1);
    }
}
