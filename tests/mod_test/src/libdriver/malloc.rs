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

use std::collections::BTreeMap;

use util::num_ops::round_up;

/// First fit allocator for guest RAM handed out to driver structures.
/// Free space is kept by start address so released neighbours merge.
pub struct GuestAllocator {
    start: u64,
    end: u64,
    align: u64,
    free: BTreeMap<u64, u64>,
    used: BTreeMap<u64, u64>,
}

impl GuestAllocator {
    pub fn new(start: u64, size: u64, align: u64) -> Self {
        let mut free = BTreeMap::new();
        free.insert(start, size);
        GuestAllocator {
            start,
            end: start + size,
            align,
            free,
            used: BTreeMap::new(),
        }
    }

    pub fn alloc(&mut self, size: u64) -> u64 {
        let size = round_up(size.max(1), self.align).unwrap();
        let (&addr, &len) = self
            .free
            .iter()
            .find(|(_, &len)| len >= size)
            .unwrap_or_else(|| panic!("guest allocator cannot fit {:#x} bytes", size));
        self.free.remove(&addr);
        if len > size {
            self.free.insert(addr + size, len - size);
        }
        self.used.insert(addr, size);
        addr
    }

    /// Allocate and zero `size` bytes through `zero`.
    pub fn alloc_zeroed<F: FnOnce(u64, &[u8])>(&mut self, size: u64, zero: F) -> u64 {
        let addr = self.alloc(size);
        zero(addr, &vec![0_u8; size as usize]);
        addr
    }

    pub fn free(&mut self, addr: u64) {
        assert!(self.start <= addr && addr < self.end);
        let Some(mut size) = self.used.remove(&addr) else {
            return;
        };
        let mut start = addr;
        if let Some(next) = self.free.remove(&(addr + size)) {
            size += next;
        }
        if let Some((&prev, &len)) = self.free.range(..addr).next_back() {
            if prev + len == addr {
                self.free.remove(&prev);
                start = prev;
                size += len;
            }
        }
        self.free.insert(start, size);
    }
}

#[cfg(test)]
mod test {
    use super::GuestAllocator;

    const ALIGN_4K: u64 = 1 << 12;
    const ADDRESS_BASE: u64 = 0x10_0000;
    const ADDRESS_SIZE: u64 = 0x10_0000;

    #[test]
    fn test_guest_allocator() {
        let mut allocator = GuestAllocator::new(ADDRESS_BASE, ADDRESS_SIZE, ALIGN_4K);

        let first = allocator.alloc(4096 + 1);
        assert_eq!(first, ADDRESS_BASE);
        let second = allocator.alloc(16);
        assert_eq!(second, ADDRESS_BASE + 2 * 4096);

        // The hole left by the first block is reused once it fits.
        allocator.free(first);
        assert_eq!(allocator.alloc(4096 * 3), ADDRESS_BASE + 3 * 4096);
        assert_eq!(allocator.alloc(4096), ADDRESS_BASE);
    }

    #[test]
    fn test_guest_allocator_merges_neighbours() {
        let mut allocator = GuestAllocator::new(ADDRESS_BASE, 4 * ALIGN_4K, ALIGN_4K);
        let a = allocator.alloc(ALIGN_4K);
        let b = allocator.alloc(ALIGN_4K);
        let c = allocator.alloc(2 * ALIGN_4K);
        allocator.free(a);
        allocator.free(c);
        allocator.free(b);
        assert_eq!(allocator.alloc(4 * ALIGN_4K), ADDRESS_BASE);
    }
}
