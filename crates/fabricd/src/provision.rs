//! ProvisionMgr - network and port records
//!
//! Networks and ports are created by the cloud controller ahead of any
//! VLAN assignment; the allocation path only reads them.

use fabric_common::tables::{mapping_fields, network_fields, port_fields};
use fabric_common::{
    field_values, FabricError, FabricResult, Network, Port, PortVlanMapping, Repository,
};
use tracing::{info, instrument};

pub struct ProvisionMgr {
    repo: Repository,
}

impl ProvisionMgr {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    #[instrument(skip(self, network), fields(network = %network.id))]
    pub async fn create_network(&self, network: Network) -> FabricResult<Network> {
        if network.id.is_empty() {
            return Err(FabricError::bad_input("network id is required"));
        }
        if self.repo.exists::<Network>(&network.id).await? {
            return Err(FabricError::bad_input(format!(
                "network '{}' already exists",
                network.id
            )));
        }
        self.repo.insert(&network).await?;
        info!(shared = network.shared, "Network created");
        Ok(network)
    }

    pub async fn get_network(&self, id: &str) -> FabricResult<Network> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| FabricError::not_found("network", id))
    }

    /// Replaces network `id`. The sharing class of a network with live
    /// mappings cannot change.
    #[instrument(skip(self, network))]
    pub async fn update_network(&self, id: &str, mut network: Network) -> FabricResult<Network> {
        let current = self.get_network(id).await?;
        network.id = id.to_string();
        if (current.shared != network.shared || current.segmentation_id != network.segmentation_id)
            && self.network_in_use(id).await?
        {
            return Err(FabricError::bad_input(format!(
                "network '{}' has mapped ports; sharing and segmentation are fixed",
                id
            )));
        }
        self.repo.insert(&network).await?;
        info!("Network updated");
        Ok(network)
    }

    #[instrument(skip(self))]
    pub async fn delete_network(&self, id: &str) -> FabricResult<()> {
        self.get_network(id).await?;
        if self.network_in_use(id).await? {
            return Err(FabricError::bad_input(format!(
                "network '{}' still has mapped ports",
                id
            )));
        }
        self.repo
            .delete::<Network>(&field_values! { network_fields::ID => id })
            .await?;
        info!("Network deleted");
        Ok(())
    }

    async fn network_in_use(&self, id: &str) -> FabricResult<bool> {
        Ok(self
            .repo
            .count::<PortVlanMapping>(&field_values! { mapping_fields::NETWORK_ID => id })
            .await?
            > 0)
    }

    #[instrument(skip(self, port), fields(port = %port.id))]
    pub async fn create_port(&self, port: Port) -> FabricResult<Port> {
        if port.id.is_empty() {
            return Err(FabricError::bad_input("port id is required"));
        }
        if self.repo.exists::<Port>(&port.id).await? {
            return Err(FabricError::bad_input(format!("port '{}' already exists", port.id)));
        }
        self.repo.insert(&port).await?;
        info!(network = %port.network_id, "Port created");
        Ok(port)
    }

    pub async fn get_port(&self, id: &str) -> FabricResult<Port> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| FabricError::not_found("port", id))
    }

    #[instrument(skip(self, port))]
    pub async fn update_port(&self, id: &str, mut port: Port) -> FabricResult<Port> {
        self.get_port(id).await?;
        port.id = id.to_string();
        self.repo.insert(&port).await?;
        info!("Port updated");
        Ok(port)
    }

    /// Deletes port `id`. A port still holding a VLAN mapping must be
    /// released first.
    #[instrument(skip(self))]
    pub async fn delete_port(&self, id: &str) -> FabricResult<()> {
        self.get_port(id).await?;
        let mapped = self
            .repo
            .count::<PortVlanMapping>(&field_values! { mapping_fields::PORT_ID => id })
            .await?;
        if mapped > 0 {
            return Err(FabricError::bad_input(format!(
                "port '{}' is still mapped to a local VLAN",
                id
            )));
        }
        self.repo
            .delete::<Port>(&field_values! { port_fields::ID => id })
            .await?;
        info!("Port deleted");
        Ok(())
    }
}
