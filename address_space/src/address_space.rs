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

use std::io::{Read, Write};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use arc_swap::ArcSwap;
use log::debug;

use crate::{AddressRange, AddressSpaceError, GuestAddress, HostMemMapping};
use util::byte_code::ByteCode;

/// RAM mappings sorted by guest address.
#[derive(Default, Clone)]
struct FlatView(Vec<Arc<HostMemMapping>>);

impl FlatView {
    fn find_mapping(&self, addr: GuestAddress) -> Option<&Arc<HostMemMapping>> {
        match self.0.binary_search_by_key(&addr, |x| x.start_address()) {
            Ok(x) => Some(&self.0[x]),
            Err(x) if x > 0 && self.0[x - 1].address_range().contains(addr) => Some(&self.0[x - 1]),
            _ => None,
        }
    }

    /// Walk `[addr, addr + count)` mapping by mapping.
    fn access<F>(&self, addr: GuestAddress, count: u64, mut f: F) -> Result<()>
    where
        F: FnMut(&mut [u8]) -> std::io::Result<()>,
    {
        if addr.checked_add(count).is_none() {
            return Err(anyhow!(AddressSpaceError::Overflow(addr.raw_value())));
        }

        let mut start = addr;
        let mut len = count;
        while len > 0 {
            let mapping = self
                .find_mapping(start)
                .ok_or_else(|| anyhow!(AddressSpaceError::RegionNotFound(start.raw_value())))?;
            let offset = start.offset_from(mapping.start_address());
            let l = std::cmp::min(len, mapping.size() - offset);
            // SAFETY: range is checked against the mapping and the slice is
            // dropped before returning.
            let slice = unsafe { mapping.slice(offset, l)? };
            f(slice).map_err(|e| anyhow!(AddressSpaceError::Io { source: e }))?;
            len -= l;
            start = start.unchecked_add(l);
        }
        Ok(())
    }
}

/// Guest physical memory as seen by a bus-master device.
///
/// The view is swapped atomically when RAM is added, so device threads read
/// and write without taking a lock.
pub struct AddressSpace {
    name: String,
    flat_view: ArcSwap<FlatView>,
}

impl AddressSpace {
    /// Create an empty address space.
    pub fn new(name: &str) -> Arc<AddressSpace> {
        Arc::new(AddressSpace {
            name: name.to_string(),
            flat_view: ArcSwap::new(Arc::new(FlatView::default())),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Back `[base, base + size)` with anonymous RAM.
    ///
    /// # Errors
    ///
    /// Return Error if the range overlaps existing RAM or mmap fails.
    pub fn add_ram(&self, base: GuestAddress, size: u64) -> Result<()> {
        let range = AddressRange::new(base, size);
        let old_view = self.flat_view.load();
        if old_view
            .0
            .iter()
            .any(|m| m.address_range().find_intersection(range).is_some())
        {
            return Err(anyhow!(AddressSpaceError::RegionOverlap(
                base.raw_value(),
                size
            )));
        }

        let mapping = Arc::new(
            HostMemMapping::new(base, size)
                .with_context(|| format!("Failed to map ram for {}", self.name))?,
        );
        let mut new_view = FlatView::clone(&old_view);
        let pos = new_view
            .0
            .partition_point(|m| m.start_address() < mapping.start_address());
        new_view.0.insert(pos, mapping);
        self.flat_view.store(Arc::new(new_view));
        debug!(
            "{}: add ram 0x{:x}+0x{:x}",
            self.name,
            base.raw_value(),
            size
        );
        Ok(())
    }

    /// Check if the whole range `[addr, addr + size)` is backed by RAM.
    pub fn address_in_memory(&self, addr: GuestAddress, size: u64) -> bool {
        self.flat_view.load().access(addr, size, |_| Ok(())).is_ok()
    }

    /// Read memory segment to `dst`.
    ///
    /// # Arguments
    ///
    /// * `dst` - Destination the data would be written to.
    /// * `addr` - Start address.
    /// * `count` - Size of data.
    ///
    /// # Errors
    ///
    /// Return Error if the `addr` is not mapped.
    pub fn read(&self, dst: &mut dyn Write, addr: GuestAddress, count: u64) -> Result<()> {
        self.flat_view
            .load()
            .access(addr, count, |slice| dst.write_all(slice))
    }

    /// Write data to specified guest address.
    ///
    /// # Arguments
    ///
    /// * `src` - Data buffer to write.
    /// * `addr` - Start address.
    /// * `count` - Size of data.
    ///
    /// # Errors
    ///
    /// Return Error if the `addr` is not mapped.
    pub fn write(&self, src: &mut dyn Read, addr: GuestAddress, count: u64) -> Result<()> {
        self.flat_view
            .load()
            .access(addr, count, |slice| src.read_exact(slice))
    }

    /// Write an object to memory.
    ///
    /// # Note
    /// To use this method, it is necessary to implement `ByteCode` trait for your object.
    pub fn write_object<T: ByteCode>(&self, data: &T, addr: GuestAddress) -> Result<()> {
        self.write(&mut data.as_bytes(), addr, std::mem::size_of::<T>() as u64)
            .with_context(|| "Failed to write object")
    }

    /// Read some data from memory to form an object.
    ///
    /// # Note
    /// To use this method, it is necessary to implement `ByteCode` trait for your object.
    pub fn read_object<T: ByteCode>(&self, addr: GuestAddress) -> Result<T> {
        let mut obj = T::default();
        self.read(
            &mut obj.as_mut_bytes(),
            addr,
            std::mem::size_of::<T>() as u64,
        )
        .with_context(|| "Failed to read object")?;
        Ok(obj)
    }
}
