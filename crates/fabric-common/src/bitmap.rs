//! Fixed-range bit vector used to hand out switch-local VLAN ids.
//!
//! Indices are 1-based and packed eight to a byte, most significant bit
//! first: index 1 is bit 7 of byte 0, index 8 is bit 0 of byte 0, index 9
//! is bit 7 of byte 1.

use crate::error::{FabricError, FabricResult};

/// A bounded allocation bitmap covering `[min, max]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitRange {
    min: u32,
    max: u32,
    bits: Vec<u8>,
}

impl BitRange {
    /// Creates an empty range. `min` is clamped to 1.
    pub fn new(min: u32, max: u32) -> Self {
        let min = min.max(1);
        let len = (max as usize + 8) / 8;
        Self {
            min,
            max,
            bits: vec![0; len],
        }
    }

    pub fn min(&self) -> u32 {
        self.min
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Returns true if `id` lies within the range bounds.
    pub fn contains(&self, id: u32) -> bool {
        id >= self.min && id <= self.max
    }

    fn check(&self, id: u32) -> FabricResult<()> {
        if self.contains(id) {
            Ok(())
        } else {
            Err(FabricError::Range {
                id,
                min: self.min,
                max: self.max,
            })
        }
    }

    fn locate(id: u32) -> (usize, u8) {
        let byte = ((id - 1) / 8) as usize;
        let offset = match id % 8 {
            0 => 8,
            n => n,
        };
        (byte, 1u8 << (8 - offset))
    }

    /// Returns true if `id` is allocated. Out-of-range ids are never set.
    pub fn is_set(&self, id: u32) -> bool {
        if !self.contains(id) {
            return false;
        }
        let (byte, mask) = Self::locate(id);
        self.bits[byte] & mask != 0
    }

    /// Marks `id` as used. Used to replay persisted allocations.
    pub fn set(&mut self, id: u32) -> FabricResult<()> {
        self.check(id)?;
        let (byte, mask) = Self::locate(id);
        self.bits[byte] |= mask;
        Ok(())
    }

    /// Clears `id`.
    pub fn release(&mut self, id: u32) -> FabricResult<()> {
        self.check(id)?;
        let (byte, mask) = Self::locate(id);
        self.bits[byte] &= !mask;
        Ok(())
    }

    /// Sets and returns the lowest free index, or `None` when exhausted.
    pub fn allocate_first_free(&mut self) -> Option<u32> {
        self.allocate_first_free_where(|_| true)
    }

    /// Like [`allocate_first_free`](Self::allocate_first_free), skipping
    /// indices rejected by `usable`.
    pub fn allocate_first_free_where(&mut self, usable: impl Fn(u32) -> bool) -> Option<u32> {
        let id = (self.min..=self.max).find(|&id| !self.is_set(id) && usable(id))?;
        let (byte, mask) = Self::locate(id);
        self.bits[byte] |= mask;
        Some(id)
    }

    /// Clears every bit.
    pub fn clear(&mut self) {
        self.bits.iter_mut().for_each(|b| *b = 0);
    }

    /// Number of allocated indices.
    pub fn count_set(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }
}
