//! SNMP subtree walker.
//!
//! A walk opens a UDP session, issues GETBULK requests until the agent
//! leaves the requested subtree, and closes the session. Nothing is pooled
//! between calls; [`WalkConfig`] carries everything a call needs.

use std::time::Duration;

use async_trait::async_trait;
use fabric_common::{FabricError, FabricResult};
use serde::{Deserialize, Serialize};
use ::snmp::{ObjIdBuf, SnmpError, SyncSession, Value};
use tracing::debug;

/// Protocol version used for a walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnmpVersion {
    #[default]
    V2c,
}

/// Settings for one walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkConfig {
    pub version: SnmpVersion,
    pub community: String,
    pub port: u16,
    /// Per-request timeout.
    pub timeout: Duration,
    pub max_repetitions: u32,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            version: SnmpVersion::V2c,
            community: "public".to_string(),
            port: 161,
            timeout: Duration::from_secs(10),
            max_repetitions: 10,
        }
    }
}

/// A typed SNMP value, detached from the response buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnmpValue {
    OctetString(Vec<u8>),
    Integer(i64),
    Unsigned(u64),
    IpAddress([u8; 4]),
    ObjectId(String),
    Null,
    Other,
}

impl SnmpValue {
    pub fn kind(&self) -> &'static str {
        match self {
            SnmpValue::OctetString(_) => "octet-string",
            SnmpValue::Integer(_) => "integer",
            SnmpValue::Unsigned(_) => "unsigned",
            SnmpValue::IpAddress(_) => "ip-address",
            SnmpValue::ObjectId(_) => "object-id",
            SnmpValue::Null => "null",
            SnmpValue::Other => "other",
        }
    }
}

/// One `(oid, value)` pair returned by a walk. OIDs are rendered with a
/// leading dot, e.g. `.1.0.8802.1.1.2.1.3.3.0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarBind {
    pub oid: String,
    pub value: SnmpValue,
}

impl VarBind {
    pub fn new(oid: impl Into<String>, value: SnmpValue) -> Self {
        Self {
            oid: oid.into(),
            value,
        }
    }
}

/// Walks an OID subtree on a device.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnmpWalker: Send + Sync {
    async fn walk(&self, device: &str, root: &str, config: &WalkConfig)
        -> FabricResult<Vec<VarBind>>;
}

/// Parses a dotted OID, with or without a leading dot.
pub fn parse_oid(oid: &str) -> FabricResult<Vec<u32>> {
    let trimmed = oid.trim_start_matches('.');
    if trimmed.is_empty() {
        return Err(FabricError::bad_input("empty OID"));
    }
    trimmed
        .split('.')
        .map(|part| {
            part.parse::<u32>()
                .map_err(|_| FabricError::bad_input(format!("invalid OID '{}'", oid)))
        })
        .collect()
}

/// Renders an OID with a leading dot.
pub fn format_oid(ids: &[u32]) -> String {
    ids.iter().fold(String::new(), |mut out, id| {
        out.push('.');
        out.push_str(&id.to_string());
        out
    })
}

/// Walker over UDP using the `snmp` crate's blocking session.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpSnmpWalker;

impl UdpSnmpWalker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SnmpWalker for UdpSnmpWalker {
    async fn walk(
        &self,
        device: &str,
        root: &str,
        config: &WalkConfig,
    ) -> FabricResult<Vec<VarBind>> {
        let root_ids = parse_oid(root)?;
        let device = device.to_string();
        let config = config.clone();
        let target = format!("{}:{}", device, config.port);

        let records = tokio::task::spawn_blocking(move || blocking_walk(&device, &root_ids, &config))
            .await
            .map_err(|e| FabricError::connect(&target, format!("walk task failed: {}", e)))??;

        debug!(agent = %target, root, records = records.len(), "SNMP walk finished");
        Ok(records)
    }
}

fn map_snmp_error(target: &str, timeout: Duration, err: SnmpError) -> FabricError {
    match err {
        SnmpError::ReceiveError => FabricError::timeout(target, timeout),
        other => FabricError::connect(target, format!("{:?}", other)),
    }
}

fn convert_value(value: Value<'_>) -> SnmpValue {
    match value {
        Value::OctetString(bytes) | Value::Opaque(bytes) => SnmpValue::OctetString(bytes.to_vec()),
        Value::Integer(n) => SnmpValue::Integer(n),
        Value::Counter32(n) | Value::Unsigned32(n) | Value::Timeticks(n) => {
            SnmpValue::Unsigned(u64::from(n))
        }
        Value::Counter64(n) => SnmpValue::Unsigned(n),
        Value::IpAddress(addr) => SnmpValue::IpAddress(addr),
        Value::ObjectIdentifier(oid) => {
            let mut buf: ObjIdBuf = [0; 128];
            match oid.read_name(&mut buf) {
                Ok(ids) => SnmpValue::ObjectId(format_oid(ids)),
                Err(_) => SnmpValue::Other,
            }
        }
        Value::Null => SnmpValue::Null,
        _ => SnmpValue::Other,
    }
}

/// Whether a returned OID still belongs to the walk of `root`.
///
/// Agents must return strictly increasing OIDs inside the subtree. The
/// v2c exception values (noSuchObject, noSuchInstance, endOfMibView) do
/// not decode as varbind values and end the response's varbind list, so
/// the walk stops on the next request that makes no progress.
fn continues_walk(ids: &[u32], root: &[u32], cursor: &[u32]) -> bool {
    ids.starts_with(root) && ids > cursor
}

fn blocking_walk(device: &str, root: &[u32], config: &WalkConfig) -> FabricResult<Vec<VarBind>> {
    let target = format!("{}:{}", device, config.port);
    let mut session = SyncSession::new(
        (device, config.port),
        config.community.as_bytes(),
        Some(config.timeout),
        0,
    )
    .map_err(|e| FabricError::connect(&target, e.to_string()))?;

    let mut records = Vec::new();
    let mut cursor = root.to_vec();

    loop {
        let response = session
            .getbulk(&[cursor.as_slice()], 0, config.max_repetitions)
            .map_err(|e| map_snmp_error(&target, config.timeout, e))?;

        let mut advanced = false;
        let mut finished = false;
        for (name, value) in response.varbinds {
            let mut buf: ObjIdBuf = [0; 128];
            let ids = name
                .read_name(&mut buf)
                .map_err(|e| map_snmp_error(&target, config.timeout, e))?;

            if !continues_walk(ids, root, &cursor) {
                finished = true;
                break;
            }

            records.push(VarBind::new(format_oid(ids), convert_value(value)));
            cursor = ids.to_vec();
            advanced = true;
        }

        if finished || !advanced {
            break;
        }
    }

    Ok(records)
}
