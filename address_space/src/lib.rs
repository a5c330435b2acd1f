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

//! Guest physical memory for emulated DMA-capable devices.
//!
//! # Examples
//!
//! ```rust
//! extern crate address_space;
//! use address_space::{AddressSpace, GuestAddress};
//!
//! let space = AddressSpace::new("sys_mem");
//! space.add_ram(GuestAddress(0), 0x10000).unwrap();
//! space.write_object(&0x11u64, GuestAddress(0x100)).unwrap();
//! assert_eq!(space.read_object::<u64>(GuestAddress(0x100)).unwrap(), 0x11);
//! ```

mod address;
mod address_space;
pub mod error;
mod host_mmap;

pub use crate::address_space::AddressSpace;
pub use address::{AddressRange, GuestAddress};
pub use error::AddressSpaceError;
pub use host_mmap::HostMemMapping;
