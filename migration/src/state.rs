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

use anyhow::{anyhow, Result};

use crate::MigrationError;
use util::byte_code::ByteCode;

/// Trait to acquire device state bytes from a device and recover the
/// device's state from such bytes.
///
/// # Notes
/// The fixed part of a device state is usually a `#[repr(C)]` structure
/// implementing `ByteCode`; variable-length tails are appended with
/// `StateWriter` and parsed back with `StateReader`.
pub trait StateTransfer {
    /// Get the device's state as bytes vector.
    fn get_state_vec(&self) -> Result<Vec<u8>>;

    /// Set the device's state in mutable device structure from bytes slice.
    fn set_state_mut(&mut self, state: &[u8]) -> Result<()>;

    /// Get the alias identifying this device type in a snapshot.
    fn get_device_alias(&self) -> u64;
}

/// Append-only encoder for device state.
#[derive(Default)]
pub struct StateWriter {
    buf: Vec<u8>,
}

impl StateWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<T: ByteCode>(&mut self, value: &T) -> &mut Self {
        self.buf.extend_from_slice(value.as_bytes());
        self
    }

    pub fn put_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor decoding a byte stream produced by `StateWriter`.
pub struct StateReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> StateReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        StateReader { data, pos: 0 }
    }

    /// Decode the next value, `name` is used in the error message.
    pub fn get<T: ByteCode>(&mut self, name: &'static str) -> Result<T> {
        let value = T::read_from(&self.data[self.pos..])
            .ok_or_else(|| anyhow!(MigrationError::FromBytesError(name)))?;
        self.pos += size_of::<T>();
        Ok(value)
    }

    pub fn get_bytes(&mut self, dst: &mut [u8], name: &'static str) -> Result<()> {
        if self.remaining() < dst.len() {
            return Err(anyhow!(MigrationError::FromBytesError(name)));
        }
        dst.copy_from_slice(&self.data[self.pos..self.pos + dst.len()]);
        self.pos += dst.len();
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}
