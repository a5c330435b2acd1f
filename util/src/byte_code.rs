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

use std::mem::size_of;
use std::slice::{from_raw_parts, from_raw_parts_mut};

/// Plain-old-data types that can be viewed as raw bytes and rebuilt from them.
///
/// Guest-visible structures (mailbox entries, CCBs, message frames) implement
/// this trait so they can be moved between guest memory and the device model
/// without manual field packing. Implementors must be `#[repr(C)]` or
/// `#[repr(C, packed)]` and contain no padding that carries meaning.
pub trait ByteCode: Default + Copy + Send + Sync {
    /// Return the contents of an object as a slice of bytes.
    fn as_bytes(&self) -> &[u8] {
        // SAFETY: The object is guaranteed been initialized already.
        unsafe { from_raw_parts(self as *const Self as *const u8, size_of::<Self>()) }
    }

    /// Return the contents of a mutable object as a mutable slice of bytes.
    fn as_mut_bytes(&mut self) -> &mut [u8] {
        // SAFETY: The object is guaranteed been initialized already.
        unsafe { from_raw_parts_mut(self as *mut Self as *mut u8, size_of::<Self>()) }
    }

    /// Borrow an object from a slice of bytes of exactly the object's size.
    ///
    /// Only valid for types whose alignment is satisfied by `data`; packed
    /// wire structures should use `read_from` instead.
    fn from_bytes(data: &[u8]) -> Option<&Self> {
        if data.len() != size_of::<Self>() {
            return None;
        }

        // SAFETY: The pointer is properly aligned and point to an initialized instance of T.
        unsafe { data.as_ptr().cast::<Self>().as_ref() }
    }

    /// Copy an object out of the head of `data`.
    ///
    /// Unlike `from_bytes`, `data` may be longer than the object and carries
    /// no alignment requirement. Returns `None` if `data` is too short.
    ///
    /// # Arguments
    ///
    /// * `data` - bytes to decode, at least `size_of::<Self>()` long.
    fn read_from(data: &[u8]) -> Option<Self> {
        if data.len() < size_of::<Self>() {
            return None;
        }

        let mut obj = Self::default();
        obj.as_mut_bytes()
            .copy_from_slice(&data[..size_of::<Self>()]);
        Some(obj)
    }
}

// Integer types of Rust satisfy the requirements of `trait ByteCode`
impl ByteCode for u8 {}
impl ByteCode for u16 {}
impl ByteCode for u32 {}
impl ByteCode for u64 {}
impl<const N: usize> ByteCode for [u8; N] where [u8; N]: Default {}
