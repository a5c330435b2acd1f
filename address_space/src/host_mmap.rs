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

use anyhow::{anyhow, Result};

use crate::{AddressRange, AddressSpaceError, GuestAddress};

/// Anonymous host memory backing one guest RAM range.
pub struct HostMemMapping {
    /// Address range in guest physical space.
    address_range: AddressRange,
    /// Host virtual address of the mapping.
    host_addr: *mut u8,
}

// Send and Sync is not auto-implemented for raw pointer type
// implementing them is safe because field of HostMemMapping won't change once initialized,
// only access(r/w) is permitted
unsafe impl Send for HostMemMapping {}
unsafe impl Sync for HostMemMapping {}

impl HostMemMapping {
    /// Map `size` bytes of zeroed anonymous memory for guest address `guest_addr`.
    ///
    /// # Errors
    ///
    /// Return Error if fail to map memory.
    pub fn new(guest_addr: GuestAddress, size: u64) -> Result<Self> {
        if size == 0 || guest_addr.checked_add(size).is_none() {
            return Err(anyhow!(AddressSpaceError::Overflow(guest_addr.raw_value())));
        }

        // SAFETY: anonymous private mapping, no existing memory is touched.
        let hva = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size as libc::size_t,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_ANONYMOUS | libc::MAP_PRIVATE | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if hva == libc::MAP_FAILED {
            return Err(anyhow!(std::io::Error::last_os_error()).context(AddressSpaceError::Mmap));
        }

        Ok(Self {
            address_range: AddressRange::new(guest_addr, size),
            host_addr: hva as *mut u8,
        })
    }

    /// Get size of mapped memory.
    pub fn size(&self) -> u64 {
        self.address_range.size
    }

    /// Get start address of mapped memory.
    pub fn start_address(&self) -> GuestAddress {
        self.address_range.base
    }

    pub fn address_range(&self) -> AddressRange {
        self.address_range
    }

    /// Get start `HVA` (host virtual address) of mapped memory.
    #[inline]
    pub fn host_address(&self) -> u64 {
        self.host_addr as u64
    }

    /// Borrow `count` bytes at `offset` inside the mapping.
    ///
    /// # Safety
    ///
    /// The guest may modify the memory concurrently; callers copy out
    /// immediately and never keep the slice.
    pub(crate) unsafe fn slice(&self, offset: u64, count: u64) -> Result<&mut [u8]> {
        if offset.checked_add(count).map_or(true, |end| end > self.size()) {
            return Err(anyhow!(AddressSpaceError::InvalidOffset(
                offset,
                count,
                self.size()
            )));
        }
        Ok(std::slice::from_raw_parts_mut(
            self.host_addr.add(offset as usize),
            count as usize,
        ))
    }
}

impl Drop for HostMemMapping {
    /// Release the memory mapping.
    fn drop(&mut self) {
        // SAFETY: host_addr and size come from the successful mmap in `new`.
        unsafe {
            libc::munmap(
                self.host_addr as *mut libc::c_void,
                self.size() as libc::size_t,
            );
        }
    }
}
