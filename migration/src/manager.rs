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

use std::io::Write;

use anyhow::{anyhow, Context, Result};

use crate::{MigrationError, StateReader, StateTransfer};
use util::byte_code::ByteCode;

/// Header written in front of every device state in a snapshot.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InstanceId {
    /// Device type alias.
    pub object_type: u64,
    /// Unique id of the device instance.
    pub object_id: u64,
    /// Length of the following device state.
    pub state_len: u64,
}

impl ByteCode for InstanceId {}

/// Save/restore entry points driven by the machine for a device.
pub trait MigrationHook: StateTransfer {
    /// Write the device state with its `InstanceId` header.
    ///
    /// # Arguments
    ///
    /// * `id` - Unique id of this device instance.
    /// * `writer` - The `Write` trait object to store data.
    fn save_device(&self, id: u64, writer: &mut dyn Write) -> Result<()> {
        let state_data = self
            .get_state_vec()
            .with_context(|| "Failed to get device state")?;

        let instance_id = InstanceId {
            object_type: self.get_device_alias(),
            object_id: id,
            state_len: state_data.len() as u64,
        };
        writer
            .write_all(instance_id.as_bytes())
            .with_context(|| "Failed to write instance id.")?;
        writer
            .write_all(&state_data)
            .with_context(|| "Failed to write device state")?;
        Ok(())
    }

    /// Restore the device from data produced by `save_device`.
    fn restore_device(&mut self, data: &[u8]) -> Result<()> {
        let mut reader = StateReader::new(data);
        let instance_id = reader.get::<InstanceId>("InstanceId")?;
        if instance_id.object_type != self.get_device_alias() {
            return Err(anyhow!(MigrationError::AliasMismatch(
                instance_id.object_type,
                self.get_device_alias()
            )));
        }
        if instance_id.state_len as usize != reader.remaining() {
            return Err(anyhow!(MigrationError::HeaderItemNotFit(
                "state length".to_string()
            )));
        }

        let header_len = std::mem::size_of::<InstanceId>();
        self.set_state_mut(&data[header_len..])
            .with_context(|| "Failed to set device state")
    }

    /// Called after all devices are restored, before the guest runs again.
    fn resume(&mut self) -> Result<()> {
        Ok(())
    }
}
