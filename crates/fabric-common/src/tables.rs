//! Table and field name constants for the entity store

// Fabric state tables
pub const SWITCH_TABLE: &str = "SWITCH";
pub const SWITCH_TUNNEL_TABLE: &str = "SWITCH_TUNNEL";
pub const SWITCH_VSI_TABLE: &str = "SWITCH_VSI";
pub const VLAN_ALLOCATION_TABLE: &str = "VLAN_ALLOCATION";
pub const PORT_VLAN_MAPPING_TABLE: &str = "PORT_VLAN_MAPPING";

// Provisioning tables
pub const NETWORK_TABLE: &str = "NETWORK";
pub const PORT_TABLE: &str = "PORT";

/// Separator between table name and row key in store keys.
pub const TABLE_KEY_SEPARATOR: char = '|';

/// SWITCH table fields
pub mod switch_fields {
    pub const MGMT_IP: &str = "mgmt_ip";
    pub const TUNNEL_SRC_IP: &str = "tunnel_src_ip";
    pub const DEVICE_TYPE: &str = "device_type";
}

/// SWITCH_TUNNEL table fields
pub mod tunnel_fields {
    pub const SWITCH: &str = "switch";
    pub const TUNNEL_ID: &str = "tunnel_id";
    pub const DST_ADDR: &str = "dst_addr";
}

/// SWITCH_VSI table fields
pub mod vsi_fields {
    pub const SWITCH: &str = "switch";
    pub const VXLAN: &str = "vxlan";
}

/// VLAN_ALLOCATION table fields
pub mod allocation_fields {
    pub const NETWORK_ID: &str = "network_id";
    pub const SWITCH: &str = "switch";
    pub const SHARING: &str = "sharing";
    pub const VLAN_ID: &str = "vlan_id";
    pub const ALLOCATED: &str = "allocated";
}

/// PORT_VLAN_MAPPING table fields
pub mod mapping_fields {
    pub const PORT_ID: &str = "port_id";
    pub const NETWORK_ID: &str = "network_id";
    pub const SWITCH: &str = "switch";
    pub const VLAN_ID: &str = "vlan_id";
    pub const IF_INDEX: &str = "if_index";
}

/// NETWORK table fields
pub mod network_fields {
    pub const ID: &str = "id";
    pub const TENANT_ID: &str = "tenant_id";
    pub const SEGMENTATION_TYPE: &str = "segmentation_type";
    pub const SEGMENTATION_ID: &str = "segmentation_id";
    pub const ADMIN_STATE_UP: &str = "admin_state_up";
    pub const SHARED: &str = "shared";
}

/// PORT table fields
pub mod port_fields {
    pub const ID: &str = "id";
    pub const TENANT_ID: &str = "tenant_id";
    pub const NETWORK_ID: &str = "network_id";
    pub const SUBNET_ID: &str = "subnet_id";
    pub const DEVICE_ID: &str = "device_id";
    pub const DEVICE_OWNER: &str = "device_owner";
    pub const STATUS: &str = "status";
    pub const ADMIN_STATE_UP: &str = "admin_state_up";
    pub const BINDING_HOST_ID: &str = "binding_host_id";
    pub const IP_ADDRESS: &str = "ip_address";
    pub const MAC_ADDRESS: &str = "mac_address";
}
