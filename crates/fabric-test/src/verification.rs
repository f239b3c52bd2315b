//! Verification helpers for testing orchestrator state
//!
//! Assertion helpers over the persisted tables.

use fabric_common::tables::{allocation_fields, mapping_fields, tunnel_fields, vsi_fields};
use fabric_common::{
    field_values, FabricError, PortVlanMapping, Repository, SwitchTunnel, SwitchVsi,
    VlanAllocation,
};
use thiserror::Error;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Store error: {0}")]
    Store(#[from] FabricError),

    #[error("Expected {expected} {what}, found {actual}")]
    CountMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    #[error("Value mismatch for {what}: expected '{expected}', got '{actual}'")]
    ValueMismatch {
        what: String,
        expected: String,
        actual: String,
    },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

fn expect_count(what: String, expected: usize, actual: usize) -> VerifyResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(VerificationError::CountMismatch {
            what,
            expected,
            actual,
        })
    }
}

/// Store verification helper
pub struct StoreVerifier<'a> {
    repo: &'a Repository,
}

impl<'a> StoreVerifier<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Self { repo }
    }

    /// Verify the VLAN held by `network` on `switch`
    pub async fn assert_allocation(&self, switch: &str, network: &str, vlan: u16) -> VerifyResult<()> {
        let rows: Vec<VlanAllocation> = self
            .repo
            .find(&field_values! {
                allocation_fields::SWITCH => switch,
                allocation_fields::NETWORK_ID => network,
            })
            .await?;
        expect_count(format!("allocations of {} on {}", network, switch), 1, rows.len())?;
        let actual = rows[0].vlan_id.as_u16();
        if actual != vlan {
            return Err(VerificationError::ValueMismatch {
                what: format!("VLAN of {} on {}", network, switch),
                expected: vlan.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    /// Verify `network` holds no VLAN on `switch`
    pub async fn assert_no_allocation(&self, switch: &str, network: &str) -> VerifyResult<()> {
        let count = self
            .repo
            .count::<VlanAllocation>(&field_values! {
                allocation_fields::SWITCH => switch,
                allocation_fields::NETWORK_ID => network,
            })
            .await?;
        expect_count(format!("allocations of {} on {}", network, switch), 0, count)
    }

    /// Verify the number of port mappings of `network` on `switch`
    pub async fn assert_mapping_count(
        &self,
        switch: &str,
        network: &str,
        expected: usize,
    ) -> VerifyResult<()> {
        let count = self
            .repo
            .count::<PortVlanMapping>(&field_values! {
                mapping_fields::SWITCH => switch,
                mapping_fields::NETWORK_ID => network,
            })
            .await?;
        expect_count(format!("mappings of {} on {}", network, switch), expected, count)
    }

    /// Verify whether `switch` carries VNI `vni`
    pub async fn assert_vsi(&self, switch: &str, vni: u32, present: bool) -> VerifyResult<()> {
        let count = self
            .repo
            .count::<SwitchVsi>(&field_values! {
                vsi_fields::SWITCH => switch,
                vsi_fields::VXLAN => vni,
            })
            .await?;
        expect_count(
            format!("VSI {} rows on {}", vni, switch),
            usize::from(present),
            count,
        )
    }

    /// Verify a tunnel from `switch` towards `dst` exists
    pub async fn assert_tunnel(&self, switch: &str, dst: &str) -> VerifyResult<()> {
        let count = self
            .repo
            .count::<SwitchTunnel>(&field_values! {
                tunnel_fields::SWITCH => switch,
                tunnel_fields::DST_ADDR => dst,
            })
            .await?;
        expect_count(format!("tunnels {} -> {}", switch, dst), 1, count)
    }

    /// Verify the total number of tunnels
    pub async fn assert_tunnel_count(&self, expected: usize) -> VerifyResult<()> {
        let tunnels: Vec<SwitchTunnel> = self.repo.all().await?;
        expect_count("tunnels".to_string(), expected, tunnels.len())
    }
}
