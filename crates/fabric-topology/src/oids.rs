//! LLDP-MIB object identifiers (IEEE 802.1AB)

/// lldpLocalSystemData
pub const LLDP_LOCAL_ROOT: &str = "1.0.8802.1.1.2.1.3";
/// lldpRemoteSystemsData
pub const LLDP_REMOTE_ROOT: &str = "1.0.8802.1.1.2.1.4";

/// Local system scalars and tables
pub mod local {
    pub const CHASSIS_ID_SUBTYPE: &str = "1.0.8802.1.1.2.1.3.1.0";
    pub const CHASSIS_ID: &str = "1.0.8802.1.1.2.1.3.2.0";
    pub const SYS_NAME: &str = "1.0.8802.1.1.2.1.3.3.0";
    pub const SYS_DESC: &str = "1.0.8802.1.1.2.1.3.4.0";
    /// lldpLocPortId, indexed by local port number
    pub const PORT_ID: &str = "1.0.8802.1.1.2.1.3.7.1.3";
    /// lldpLocManAddrIfId, indexed by address; value is the interface index
    pub const MAN_ADDR_IF_ID: &str = "1.0.8802.1.1.2.1.3.8.1.5";
}

/// Remote table columns, indexed by timeMark.localPortNum.remIndex
pub mod remote {
    pub const CHASSIS_ID_SUBTYPE: &str = "1.0.8802.1.1.2.1.4.1.1.4";
    pub const CHASSIS_ID: &str = "1.0.8802.1.1.2.1.4.1.1.5";
    pub const PORT_DESC: &str = "1.0.8802.1.1.2.1.4.1.1.8";
    pub const SYS_NAME: &str = "1.0.8802.1.1.2.1.4.1.1.9";
    pub const SYS_DESC: &str = "1.0.8802.1.1.2.1.4.1.1.10";
    /// lldpRemManAddrIfSubtype, indexed by timeMark.localPortNum.remIndex.subtype.len.addr
    pub const MAN_ADDR: &str = "1.0.8802.1.1.2.1.4.2.1.3";
}
