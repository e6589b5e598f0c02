use crate::{
    wire_device_mappings, BootRequest, ClientConfig, CloudApi, InstanceProbe, VolumeSpec,
};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

/// HTTP client for an OpenStack-compatible control plane. Compute, volume
/// and network services are reached under one base endpoint.
pub struct OpenStackClient {
    client: Client,
    config: ClientConfig,
}

impl OpenStackClient {
    pub fn new(config: ClientConfig) -> Self {
        // Default reqwest client has no overall timeout. A stalled control
        // plane would otherwise hang a provisioning run forever.
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .unwrap();
        Self { client, config }
    }

    fn headers(&self) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("X-Auth-Token", self.config.token.parse().unwrap());
        headers.insert("Content-Type", "application/json".parse().unwrap());
        headers
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.endpoint.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl CloudApi for OpenStackClient {
    async fn create_volume(&self, spec: &VolumeSpec) -> Result<String> {
        let url = self.url("volume/v3/volumes");
        let mut volume = json!({
            "name": spec.name,
            "size": spec.size_gb,
        });
        if let Some(zone) = &spec.availability_zone {
            volume["availability_zone"] = json!(zone);
        }
        if let Some(image_ref) = &spec.image_ref {
            volume["imageRef"] = json!(image_ref);
        }

        let resp = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(&json!({ "volume": volume }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await?;
            return Err(anyhow::anyhow!(
                "Failed to create volume: {} - {}",
                status,
                text
            ));
        }

        let json: serde_json::Value = resp.json().await?;
        let volume_id = json["volume"]["id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Volume create response carried no id"))?;
        Ok(volume_id.to_string())
    }

    async fn get_volume_status(&self, volume_ref: &str) -> Result<String> {
        let url = self.url(&format!("volume/v3/volumes/{}", volume_ref));
        let resp = self.client.get(&url).headers(self.headers()).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await?;
            return Err(anyhow::anyhow!(
                "Failed to get volume {}: {} - {}",
                volume_ref,
                status,
                text
            ));
        }

        let json: serde_json::Value = resp.json().await?;
        let volume_status = json["volume"]["status"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Volume response carried no status"))?;
        Ok(volume_status.to_string())
    }

    async fn mark_volume_bootable(&self, volume_ref: &str, bootable: bool) -> Result<()> {
        let url = self.url(&format!("volume/v3/volumes/{}/action", volume_ref));
        let resp = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(&json!({ "os-set_bootable": { "bootable": bootable } }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await?;
            return Err(anyhow::anyhow!(
                "Failed to mark volume {} bootable: {} - {}",
                volume_ref,
                status,
                text
            ));
        }
        Ok(())
    }

    async fn update_volume(&self, volume_ref: &str, new_name: &str) -> Result<()> {
        let url = self.url(&format!("volume/v3/volumes/{}", volume_ref));
        let resp = self
            .client
            .put(&url)
            .headers(self.headers())
            .json(&json!({ "volume": { "name": new_name } }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await?;
            return Err(anyhow::anyhow!(
                "Failed to update volume {}: {} - {}",
                volume_ref,
                status,
                text
            ));
        }
        Ok(())
    }

    async fn delete_volume(&self, volume_ref: &str) -> Result<()> {
        let url = self.url(&format!("volume/v3/volumes/{}", volume_ref));
        let resp = self
            .client
            .delete(&url)
            .headers(self.headers())
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await?;
            return Err(anyhow::anyhow!(
                "Failed to delete volume {}: {} - {}",
                volume_ref,
                status,
                text
            ));
        }
        Ok(())
    }

    async fn attach_volume(
        &self,
        instance_ref: &str,
        volume_ref: &str,
        device: Option<&str>,
    ) -> Result<()> {
        let url = self.url(&format!(
            "compute/v2.1/servers/{}/os-volume_attachments",
            instance_ref
        ));
        let mut attachment = json!({ "volumeId": volume_ref });
        if let Some(device) = device {
            attachment["device"] = json!(device);
        }

        let resp = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(&json!({ "volumeAttachment": attachment }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await?;
            return Err(anyhow::anyhow!(
                "Failed to attach volume {} to {}: {} - {}",
                volume_ref,
                instance_ref,
                status,
                text
            ));
        }
        Ok(())
    }

    async fn detach_volume(&self, instance_ref: &str, volume_ref: &str) -> Result<()> {
        let url = self.url(&format!(
            "compute/v2.1/servers/{}/os-volume_attachments/{}",
            instance_ref, volume_ref
        ));
        let resp = self
            .client
            .delete(&url)
            .headers(self.headers())
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await?;
            return Err(anyhow::anyhow!(
                "Failed to detach volume {} from {}: {} - {}",
                volume_ref,
                instance_ref,
                status,
                text
            ));
        }
        Ok(())
    }

    async fn create_instance(&self, request: &BootRequest) -> Result<String> {
        let url = self.url("compute/v2.1/servers");
        let mut server = json!({
            "name": request.name,
            "flavorRef": request.flavor_ref,
        });
        if let Some(image_ref) = &request.image_ref {
            server["imageRef"] = json!(image_ref);
        }
        if let Some(zone) = &request.availability_zone {
            server["availability_zone"] = json!(zone);
        }
        if !request.security_groups.is_empty() {
            let groups: Vec<serde_json::Value> = request
                .security_groups
                .iter()
                .map(|g| json!({ "name": g }))
                .collect();
            server["security_groups"] = json!(groups);
        }
        if !request.nics.is_empty() {
            // The compute API addresses networks by uuid and ports by port id.
            let networks: Vec<serde_json::Value> = request
                .nics
                .iter()
                .map(|nic| match (&nic.port_id, &nic.net_id) {
                    (Some(port_id), _) => json!({ "port": port_id }),
                    (None, Some(net_id)) => json!({ "uuid": net_id }),
                    (None, None) => json!({}),
                })
                .collect();
            server["networks"] = json!(networks);
        }
        if !request.device_mappings.is_empty() {
            server["block_device_mapping_v2"] = json!(wire_device_mappings(&request.device_mappings));
        }
        if let Some(user_data) = &request.user_data {
            server["user_data"] = json!(user_data);
        }

        let resp = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(&json!({ "server": server }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await?;
            return Err(anyhow::anyhow!(
                "Failed to create instance: {} - {}",
                status,
                text
            ));
        }

        let json: serde_json::Value = resp.json().await?;
        let server_id = json["server"]["id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Server create response carried no id"))?;
        Ok(server_id.to_string())
    }

    async fn get_instance_status(&self, instance_ref: &str) -> Result<InstanceProbe> {
        let url = self.url(&format!("compute/v2.1/servers/{}", instance_ref));
        let resp = self.client.get(&url).headers(self.headers()).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await?;
            return Err(anyhow::anyhow!(
                "Failed to get instance {}: {} - {}",
                instance_ref,
                status,
                text
            ));
        }

        let json: serde_json::Value = resp.json().await?;
        let instance_status = json["server"]["status"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Server response carried no status"))?;
        let fault_message = json["server"]["fault"]["message"]
            .as_str()
            .map(|s| s.to_string());
        Ok(InstanceProbe {
            status: instance_status.to_string(),
            fault_message,
        })
    }

    async fn delete_instance(&self, instance_ref: &str) -> Result<()> {
        let url = self.url(&format!("compute/v2.1/servers/{}", instance_ref));
        let resp = self
            .client
            .delete(&url)
            .headers(self.headers())
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await?;
            return Err(anyhow::anyhow!(
                "Failed to delete instance {}: {} - {}",
                instance_ref,
                status,
                text
            ));
        }
        Ok(())
    }

    async fn change_admin_password(&self, instance_ref: &str, password: &str) -> Result<()> {
        let url = self.url(&format!("compute/v2.1/servers/{}/action", instance_ref));
        let resp = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(&json!({ "changePassword": { "adminPass": password } }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await?;
            return Err(anyhow::anyhow!(
                "Failed to change admin password on {}: {} - {}",
                instance_ref,
                status,
                text
            ));
        }
        Ok(())
    }

    async fn create_network_port(&self, name: &str, net_ref: &str) -> Result<String> {
        let url = self.url("network/v2.0/ports");
        let resp = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(&json!({ "port": { "name": name, "network_id": net_ref } }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await?;
            return Err(anyhow::anyhow!(
                "Failed to create network port: {} - {}",
                status,
                text
            ));
        }

        let json: serde_json::Value = resp.json().await?;
        let port_id = json["port"]["id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Port create response carried no id"))?;
        Ok(port_id.to_string())
    }

    async fn register_backup(
        &self,
        instance_ref: &str,
        name: &str,
        owner_id: Option<&str>,
    ) -> Result<()> {
        // Backup service is optional; without an endpoint this is a no-op.
        let Some(backup_endpoint) = &self.config.backup_endpoint else {
            return Ok(());
        };
        let url = format!("{}/vms", backup_endpoint.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(&json!({
                "name": name,
                "ems_ref": instance_ref,
                "user_id": owner_id,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await?;
            return Err(anyhow::anyhow!(
                "Failed to register backup for {}: {} - {}",
                instance_ref,
                status,
                text
            ));
        }
        Ok(())
    }
}
