// Copyright (c) 2024 Huawei Technologies Co.,Ltd. All rights reserved.
//
// HbaVirt is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan
// PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//         http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY
// KIND, EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO
// NON-INFRINGEMENT, MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

use std::cmp::{Ord, PartialEq, PartialOrd};
use std::ops::BitAnd;

/// Represent the address in given address space.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct GuestAddress(pub u64);

impl GuestAddress {
    /// Get the raw value of `GuestAddress`.
    pub fn raw_value(self) -> u64 {
        self.0
    }

    /// Get the offset of this address from the given address.
    /// The caller has to guarantee no underflow occurs.
    ///
    /// # Arguments
    ///
    /// * `other` -Other `GuestAddress`.
    pub fn offset_from(self, other: Self) -> u64 {
        self.raw_value() - other.raw_value()
    }

    /// Return address of this address plus the given offset, return None if overflows.
    ///
    /// # Arguments
    ///
    /// * `offset` - Offset address.
    pub fn checked_add(self, offset: u64) -> Option<Self> {
        self.0.checked_add(offset).map(Self)
    }

    /// Return address of this address plus the given offset.
    /// The caller has to guarantee no overflow occurs.
    ///
    /// # Arguments
    ///
    /// * `offset` - Offset address.
    pub fn unchecked_add(self, offset: u64) -> Self {
        Self(self.0 + offset)
    }

    /// Return address of this address minus the given offset.
    /// The caller has to guarantee no underflow occurs.
    pub fn unchecked_sub(self, offset: u64) -> Self {
        Self(self.0 - offset)
    }
}

impl BitAnd<u64> for GuestAddress {
    type Output = GuestAddress;
    fn bitand(self, other: u64) -> GuestAddress {
        GuestAddress(self.0 & other)
    }
}

impl From<u32> for GuestAddress {
    fn from(addr: u32) -> GuestAddress {
        GuestAddress(u64::from(addr))
    }
}

/// Represent an address range.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct AddressRange {
    /// Base address.
    pub base: GuestAddress,
    /// Size of memory segment.
    pub size: u64,
}

impl From<(u64, u64)> for AddressRange {
    fn from(range: (u64, u64)) -> AddressRange {
        AddressRange {
            base: GuestAddress(range.0),
            size: range.1,
        }
    }
}

impl AddressRange {
    /// Create a new `AddressRange`.
    ///
    /// # Arguments
    ///
    /// * `base` - The base address of a AddressRange.
    /// * `size` - The size of a AddressRange.
    pub fn new(base: GuestAddress, size: u64) -> AddressRange {
        AddressRange { base, size }
    }

    /// Find the intersection with other `AddressRange`.
    /// Return None if not overlaps.
    pub fn find_intersection(&self, other: AddressRange) -> Option<AddressRange> {
        let begin = self.base.raw_value() as u128;
        let end = self.size as u128 + begin;
        let other_begin = other.base.raw_value() as u128;
        let other_end = other.size as u128 + other_begin;

        if end <= other_begin || other_end <= begin {
            return None;
        }
        let start = std::cmp::max(self.base, other.base);
        let size_inter = (std::cmp::min(end, other_end) - start.0 as u128) as u64;

        Some(AddressRange {
            base: start,
            size: size_inter,
        })
    }

    /// Whether `addr` falls inside this range.
    pub fn contains(&self, addr: GuestAddress) -> bool {
        addr >= self.base && (addr.0 as u128) < self.base.0 as u128 + self.size as u128
    }

    /// Return the end address of this address range.
    #[inline]
    pub fn end_addr(&self) -> GuestAddress {
        self.base.unchecked_add(self.size)
    }
}
