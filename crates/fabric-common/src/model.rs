//! Persisted entities and their row encoding.

use fabric_types::{SharingClass, VlanId, Vni};
use serde::{Deserialize, Serialize};

use crate::error::FabricResult;
use crate::fields::{FieldValues, FieldValuesExt};
use crate::tables::*;

/// A record type stored in one table of the entity store.
pub trait Entity: Sized + Send + Sync + 'static {
    /// Table the entity lives in.
    const TABLE: &'static str;

    /// Natural key, or `None` when rows are keyed by a surrogate id.
    fn key(&self) -> Option<String>;

    /// Encodes the entity as a row.
    fn to_fields(&self) -> FieldValues;

    /// Decodes a row.
    fn from_fields(fields: &FieldValues) -> FabricResult<Self>;
}

/// Registered top-of-rack switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Switch {
    pub mgmt_ip: String,
    pub tunnel_src_ip: String,
    pub device_type: String,
}

impl Entity for Switch {
    const TABLE: &'static str = SWITCH_TABLE;

    fn key(&self) -> Option<String> {
        Some(self.mgmt_ip.clone())
    }

    fn to_fields(&self) -> FieldValues {
        crate::field_values! {
            switch_fields::MGMT_IP => self.mgmt_ip,
            switch_fields::TUNNEL_SRC_IP => self.tunnel_src_ip,
            switch_fields::DEVICE_TYPE => self.device_type,
        }
    }

    fn from_fields(fields: &FieldValues) -> FabricResult<Self> {
        Ok(Self {
            mgmt_ip: fields.require_field(Self::TABLE, switch_fields::MGMT_IP)?.to_string(),
            tunnel_src_ip: fields
                .require_field(Self::TABLE, switch_fields::TUNNEL_SRC_IP)?
                .to_string(),
            device_type: fields.get_field_or(switch_fields::DEVICE_TYPE, "").to_string(),
        })
    }
}

/// One direction of a VXLAN tunnel, created on `switch` towards `dst_addr`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchTunnel {
    pub switch: String,
    pub tunnel_id: u32,
    pub dst_addr: String,
}

impl Entity for SwitchTunnel {
    const TABLE: &'static str = SWITCH_TUNNEL_TABLE;

    fn key(&self) -> Option<String> {
        None
    }

    fn to_fields(&self) -> FieldValues {
        crate::field_values! {
            tunnel_fields::SWITCH => self.switch,
            tunnel_fields::TUNNEL_ID => self.tunnel_id,
            tunnel_fields::DST_ADDR => self.dst_addr,
        }
    }

    fn from_fields(fields: &FieldValues) -> FabricResult<Self> {
        Ok(Self {
            switch: fields.require_field(Self::TABLE, tunnel_fields::SWITCH)?.to_string(),
            tunnel_id: fields.parse_field(Self::TABLE, tunnel_fields::TUNNEL_ID)?,
            dst_addr: fields.require_field(Self::TABLE, tunnel_fields::DST_ADDR)?.to_string(),
        })
    }
}

/// A VNI that must be configured on a switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchVsi {
    pub switch: String,
    pub vxlan: Vni,
}

impl Entity for SwitchVsi {
    const TABLE: &'static str = SWITCH_VSI_TABLE;

    fn key(&self) -> Option<String> {
        None
    }

    fn to_fields(&self) -> FieldValues {
        crate::field_values! {
            vsi_fields::SWITCH => self.switch,
            vsi_fields::VXLAN => self.vxlan,
        }
    }

    fn from_fields(fields: &FieldValues) -> FabricResult<Self> {
        Ok(Self {
            switch: fields.require_field(Self::TABLE, vsi_fields::SWITCH)?.to_string(),
            vxlan: fields.parse_field(Self::TABLE, vsi_fields::VXLAN)?,
        })
    }
}

/// Local VLAN held by a network on a switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanAllocation {
    pub network_id: String,
    pub switch: String,
    pub sharing: SharingClass,
    pub vlan_id: VlanId,
    pub allocated: bool,
}

impl Entity for VlanAllocation {
    const TABLE: &'static str = VLAN_ALLOCATION_TABLE;

    fn key(&self) -> Option<String> {
        None
    }

    fn to_fields(&self) -> FieldValues {
        crate::field_values! {
            allocation_fields::NETWORK_ID => self.network_id,
            allocation_fields::SWITCH => self.switch,
            allocation_fields::SHARING => self.sharing,
            allocation_fields::VLAN_ID => self.vlan_id,
            allocation_fields::ALLOCATED => self.allocated,
        }
    }

    fn from_fields(fields: &FieldValues) -> FabricResult<Self> {
        Ok(Self {
            network_id: fields
                .require_field(Self::TABLE, allocation_fields::NETWORK_ID)?
                .to_string(),
            switch: fields.require_field(Self::TABLE, allocation_fields::SWITCH)?.to_string(),
            sharing: fields.parse_field(Self::TABLE, allocation_fields::SHARING)?,
            vlan_id: fields.parse_field(Self::TABLE, allocation_fields::VLAN_ID)?,
            allocated: fields.get_field_or(allocation_fields::ALLOCATED, "true") == "true",
        })
    }
}

/// Binding of a port to the local VLAN of its network on the uplink switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortVlanMapping {
    pub port_id: String,
    pub network_id: String,
    pub switch: String,
    pub vlan_id: VlanId,
    pub if_index: u32,
}

impl Entity for PortVlanMapping {
    const TABLE: &'static str = PORT_VLAN_MAPPING_TABLE;

    fn key(&self) -> Option<String> {
        None
    }

    fn to_fields(&self) -> FieldValues {
        crate::field_values! {
            mapping_fields::PORT_ID => self.port_id,
            mapping_fields::NETWORK_ID => self.network_id,
            mapping_fields::SWITCH => self.switch,
            mapping_fields::VLAN_ID => self.vlan_id,
            mapping_fields::IF_INDEX => self.if_index,
        }
    }

    fn from_fields(fields: &FieldValues) -> FabricResult<Self> {
        Ok(Self {
            port_id: fields.require_field(Self::TABLE, mapping_fields::PORT_ID)?.to_string(),
            network_id: fields
                .require_field(Self::TABLE, mapping_fields::NETWORK_ID)?
                .to_string(),
            switch: fields.require_field(Self::TABLE, mapping_fields::SWITCH)?.to_string(),
            vlan_id: fields.parse_field(Self::TABLE, mapping_fields::VLAN_ID)?,
            if_index: fields.parse_field(Self::TABLE, mapping_fields::IF_INDEX)?,
        })
    }
}

/// Provisioned overlay network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(rename = "provider:network_type", default)]
    pub segmentation_type: String,
    #[serde(rename = "provider:segmentation_id", default)]
    pub segmentation_id: Option<Vni>,
    #[serde(default = "default_true")]
    pub admin_state_up: bool,
    #[serde(default)]
    pub shared: bool,
}

fn default_true() -> bool {
    true
}

impl Network {
    pub fn sharing(&self) -> SharingClass {
        SharingClass::from_shared(self.shared)
    }
}

impl Entity for Network {
    const TABLE: &'static str = NETWORK_TABLE;

    fn key(&self) -> Option<String> {
        Some(self.id.clone())
    }

    fn to_fields(&self) -> FieldValues {
        let mut fields = crate::field_values! {
            network_fields::ID => self.id,
            network_fields::TENANT_ID => self.tenant_id,
            network_fields::SEGMENTATION_TYPE => self.segmentation_type,
            network_fields::ADMIN_STATE_UP => self.admin_state_up,
            network_fields::SHARED => self.shared,
        };
        if let Some(vni) = self.segmentation_id {
            fields.set_field(network_fields::SEGMENTATION_ID, vni.to_string());
        }
        fields
    }

    fn from_fields(fields: &FieldValues) -> FabricResult<Self> {
        let segmentation_id = if fields.has_field(network_fields::SEGMENTATION_ID) {
            Some(fields.parse_field(Self::TABLE, network_fields::SEGMENTATION_ID)?)
        } else {
            None
        };
        Ok(Self {
            id: fields.require_field(Self::TABLE, network_fields::ID)?.to_string(),
            tenant_id: fields.get_field_or(network_fields::TENANT_ID, "").to_string(),
            segmentation_type: fields
                .get_field_or(network_fields::SEGMENTATION_TYPE, "")
                .to_string(),
            segmentation_id,
            admin_state_up: fields.get_field_or(network_fields::ADMIN_STATE_UP, "true") == "true",
            shared: fields.get_field_or(network_fields::SHARED, "false") == "true",
        })
    }
}

/// Provisioned tenant port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Port {
    pub id: String,
    pub tenant_id: String,
    pub network_id: String,
    pub subnet_id: String,
    pub device_id: String,
    pub device_owner: String,
    pub status: String,
    pub admin_state_up: bool,
    #[serde(rename = "binding:host_id")]
    pub binding_host_id: String,
    pub ip_address: String,
    pub mac_address: String,
}

impl Entity for Port {
    const TABLE: &'static str = PORT_TABLE;

    fn key(&self) -> Option<String> {
        Some(self.id.clone())
    }

    fn to_fields(&self) -> FieldValues {
        crate::field_values! {
            port_fields::ID => self.id,
            port_fields::TENANT_ID => self.tenant_id,
            port_fields::NETWORK_ID => self.network_id,
            port_fields::SUBNET_ID => self.subnet_id,
            port_fields::DEVICE_ID => self.device_id,
            port_fields::DEVICE_OWNER => self.device_owner,
            port_fields::STATUS => self.status,
            port_fields::ADMIN_STATE_UP => self.admin_state_up,
            port_fields::BINDING_HOST_ID => self.binding_host_id,
            port_fields::IP_ADDRESS => self.ip_address,
            port_fields::MAC_ADDRESS => self.mac_address,
        }
    }

    fn from_fields(fields: &FieldValues) -> FabricResult<Self> {
        let text = |field: &str| fields.get_field_or(field, "").to_string();
        Ok(Self {
            id: fields.require_field(Self::TABLE, port_fields::ID)?.to_string(),
            tenant_id: text(port_fields::TENANT_ID),
            network_id: text(port_fields::NETWORK_ID),
            subnet_id: text(port_fields::SUBNET_ID),
            device_id: text(port_fields::DEVICE_ID),
            device_owner: text(port_fields::DEVICE_OWNER),
            status: text(port_fields::STATUS),
            admin_state_up: fields.get_field_or(port_fields::ADMIN_STATE_UP, "false") == "true",
            binding_host_id: text(port_fields::BINDING_HOST_ID),
            ip_address: text(port_fields::IP_ADDRESS),
            mac_address: text(port_fields::MAC_ADDRESS),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_allocation_row_encoding() {
        let alloc = VlanAllocation {
            network_id: "net1".to_string(),
            switch: "10.0.0.1".to_string(),
            sharing: SharingClass::Shared,
            vlan_id: VlanId::new(4002).unwrap(),
            allocated: true,
        };
        let fields = alloc.to_fields();
        assert_eq!(fields.get_field(allocation_fields::SHARING), Some("shared"));
        assert_eq!(fields.get_field(allocation_fields::VLAN_ID), Some("4002"));
        assert_eq!(VlanAllocation::from_fields(&fields).unwrap(), alloc);
    }

    #[test]
    fn test_network_without_segmentation_id() {
        let net = Network {
            id: "net1".to_string(),
            tenant_id: "t1".to_string(),
            segmentation_type: "vxlan".to_string(),
            segmentation_id: None,
            admin_state_up: true,
            shared: false,
        };
        let fields = net.to_fields();
        assert!(!fields.has_field(network_fields::SEGMENTATION_ID));
        assert_eq!(Network::from_fields(&fields).unwrap(), net);
        assert_eq!(net.sharing(), SharingClass::Unshared);
    }

    #[test]
    fn test_network_json_uses_provider_attributes() {
        let net: Network = serde_json::from_str(
            r#"{"id":"net2","provider:network_type":"vxlan","provider:segmentation_id":5002,"shared":true}"#,
        )
        .unwrap();
        assert_eq!(net.segmentation_id, Some(Vni::new(5002).unwrap()));
        assert!(net.admin_state_up);
        assert_eq!(net.sharing(), SharingClass::Shared);
    }

    #[test]
    fn test_mapping_decode_rejects_bad_vlan() {
        let mut fields = PortVlanMapping {
            port_id: "p1".to_string(),
            network_id: "net1".to_string(),
            switch: "tor1".to_string(),
            vlan_id: VlanId::new(2).unwrap(),
            if_index: 1,
        }
        .to_fields();
        fields.set_field(mapping_fields::VLAN_ID, "0");
        assert!(PortVlanMapping::from_fields(&fields).is_err());
    }
}
