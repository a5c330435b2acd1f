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

use anyhow::Result;
use byteorder::{BigEndian, ByteOrder};

use crate::UtilError;

// This module implements some operations of Rust primitive types.

/// Calculate the aligned-up u64 value.
///
/// # Arguments
///
/// * `origin` - the origin value.
/// * `align` - the alignment.
///
/// # Examples
///
/// ```rust
/// extern crate util;
/// use util::num_ops::round_up;
///
/// let value = round_up(1003 as u64, 4 as u64);
/// assert!(value == Some(1004));
/// ```
pub fn round_up(origin: u64, align: u64) -> Option<u64> {
    match origin % align {
        0 => Some(origin),
        diff => origin.checked_add(align - diff),
    }
}

/// Read a 24-bit big-endian value, the address/length encoding used by
/// ISA-era bus masters.
///
/// # Examples
///
/// ```rust
/// extern crate util;
/// use util::num_ops::read_u24_be;
///
/// assert_eq!(read_u24_be(&[0x01, 0x00, 0x00]), 0x10000);
/// ```
pub fn read_u24_be(data: &[u8]) -> u32 {
    BigEndian::read_u24(data)
}

/// Write the low 24 bits of `value` as big-endian into `data`.
///
/// # Examples
///
/// ```rust
/// extern crate util;
/// use util::num_ops::write_u24_be;
///
/// let mut data = [0_u8; 3];
/// write_u24_be(&mut data, 0x0012_3456);
/// assert_eq!(data, [0x12, 0x34, 0x56]);
/// ```
pub fn write_u24_be(data: &mut [u8], value: u32) {
    BigEndian::write_u24(data, value & 0x00ff_ffff);
}

///  Parse a string to a number, decimal and heximal numbers supported now.
///
/// # Arguments
///
/// * `string_in` - The string that means a number, eg. "18", "0x1c".
///
/// # Examples
///
/// ```rust
/// extern crate util;
/// use util::num_ops::str_to_num;
///
/// let value: u16 = str_to_num("0x330").unwrap();
/// assert!(value == 0x330);
/// let value: u32 = str_to_num("11").unwrap();
/// assert!(value == 11);
/// ```
pub fn str_to_num<T: FromStrRadix>(string_in: &str) -> Result<T> {
    let trimmed = string_in.trim();
    let (digits, base) = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => (hex, 16),
        None => (trimmed, 10),
    };
    T::from_str_radix(digits, base)
        .ok_or_else(|| UtilError::InvalidNum(string_in.to_string()).into())
}

/// Unsigned integers that can be parsed by `str_to_num`.
pub trait FromStrRadix: Sized {
    fn from_str_radix(src: &str, radix: u32) -> Option<Self>;
}

macro_rules! impl_from_str_radix {
    ($($t:ty),*) => {
        $(impl FromStrRadix for $t {
            fn from_str_radix(src: &str, radix: u32) -> Option<Self> {
                <$t>::from_str_radix(src, radix).ok()
            }
        })*
    };
}

impl_from_str_radix!(u8, u16, u32, u64, usize);
