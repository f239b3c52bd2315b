//! Shared infrastructure for the ToR fabric control plane.
//!
//! - [`error`]: the [`FabricError`] taxonomy used by every crate
//! - [`bitmap`]: [`BitRange`], the per-switch VLAN id allocator
//! - [`model`] and [`store`]: persisted entities, the [`EntityStore`]
//!   contract and its backends
//! - [`device`]: the [`DeviceTransport`] used to push configuration to switch agents

pub mod bitmap;
pub mod device;
pub mod error;
pub mod fields;
pub mod model;
pub mod store;
pub mod tables;

pub use bitmap::BitRange;
pub use device::{
    DeviceClientConfig, DeviceCommand, DeviceMethod, DeviceTransport, HttpDeviceClient,
};
pub use error::{FabricError, FabricResult};
pub use fields::{FieldValue, FieldValues, FieldValuesExt, Filter};
pub use model::{
    Entity, Network, Port, PortVlanMapping, Switch, SwitchTunnel, SwitchVsi, VlanAllocation,
};
pub use store::{EntityStore, MemoryStore, Repository};
#[cfg(feature = "redis")]
pub use store::{RedisConfig, RedisStore};
