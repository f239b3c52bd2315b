//! Device agent command builders
//!
//! Each builder returns the [`DeviceCommand`] for one agent operation.
//! Reply parsers are lenient: agents are third-party software and the
//! orchestrators treat malformed replies as "nothing learned".

use fabric_common::DeviceCommand;
use fabric_types::{VlanId, Vni};
use serde_json::{json, Value};

/// Agent path for tunnel creation
pub const TUNNEL_PATH: &str = "/tunnel";

/// Agent path for the tunnel sync query
pub const TUNNEL_SYNC_PATH: &str = "/tsync";

/// Agent path for VLAN to VXLAN mapping
pub const VLAN_VXLAN_PATH: &str = "/vlan2vxlan";

/// Agent path for the full ensure push
pub const ENSURE_PATH: &str = "/ensure";

/// Tunnel type requested in sync queries
pub const TUNNEL_TYPE_VXLAN: &str = "vxlan";

/// Build tunnel sync query
///
/// Asks the agent of `mgr` which tunnel peers already exist for `src`.
pub fn build_tunnel_sync(mgr: &str, src: &str) -> DeviceCommand {
    DeviceCommand::post(
        TUNNEL_SYNC_PATH,
        mgr,
        json!({
            "src": src,
            "tunnel_type": TUNNEL_TYPE_VXLAN,
        }),
    )
}

/// Build tunnel creation command from `src` to `dst` on switch `mgr`
pub fn build_create_tunnel(device_type: &str, mgr: &str, src: &str, dst: &str) -> DeviceCommand {
    DeviceCommand::post(
        TUNNEL_PATH,
        mgr,
        json!({
            "type": device_type,
            "mgr": mgr,
            "src": src,
            "dst": dst,
        }),
    )
}

/// Build VLAN to VXLAN mapping command
///
/// `index` is the switch interface the host hangs off; `tunnel_ids` are the
/// tunnels the VXLAN must be bound to.
pub fn build_map_vlan(
    device_type: &str,
    mgr: &str,
    vlan: VlanId,
    vni: Vni,
    tunnel_ids: &[u32],
    index: u32,
) -> DeviceCommand {
    DeviceCommand::post(
        VLAN_VXLAN_PATH,
        mgr,
        json!({
            "type": device_type,
            "vlan": vlan.as_u16(),
            "vxlan": vni.as_u32(),
            "tunnel_ids": tunnel_ids,
            "mgr": mgr,
            "index": index,
        }),
    )
}

/// Build VLAN to VXLAN unmap command
///
/// With `delete_on_index` set only the interface binding goes away; otherwise
/// the VLAN is torn down on the switch.
pub fn build_unmap_vlan(
    device_type: &str,
    mgr: &str,
    vlan: VlanId,
    vni: Vni,
    index: u32,
    delete_on_index: bool,
) -> DeviceCommand {
    DeviceCommand::delete(
        VLAN_VXLAN_PATH,
        mgr,
        json!({
            "type": device_type,
            "vlan": vlan.as_u16(),
            "vxlan": vni.as_u32(),
            "mgr": mgr,
            "index": index,
            "delete_on_index": delete_on_index,
        }),
    )
}

/// Build ensure command carrying the complete VXLAN and tunnel sets of `mgr`
pub fn build_ensure(device_type: &str, mgr: &str, vxlans: &[u32], tunnels: &[u32]) -> DeviceCommand {
    DeviceCommand::post(
        ENSURE_PATH,
        mgr,
        json!({
            "type": device_type,
            "mgr": mgr,
            "vxlans": vxlans,
            "tunnels": tunnels,
        }),
    )
}

/// Extract the tunnel id from a tunnel creation reply.
///
/// Accepts a number or a numeric string; zero is not a valid id.
pub fn parse_tunnel_id(reply: &Value) -> Option<u32> {
    let raw = reply.get("tunnel_id")?;
    let id = match raw {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    (id != 0).then_some(id)
}

/// Extract peer addresses from a tunnel sync reply.
pub fn parse_tunnel_peers(reply: &Value) -> Vec<String> {
    reply
        .get("tunnels")
        .and_then(Value::as_array)
        .map(|tunnels| {
            tunnels
                .iter()
                .filter_map(|t| t.get("ip_address").and_then(Value::as_str))
                .filter(|ip| !ip.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
