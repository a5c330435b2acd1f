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

//! Interfaces for simulating SCSI host bus adapters.
//!
//! This crate simulates:
//! - a port I/O system bus with level triggered interrupt lines
//! - a SCSI bus connecting the adapters to backend media
//! - BusLogic BT-958D / BT-545C and Adaptec AHA-1540B mailbox adapters
//! - LSI Logic LSI53C1030 Fusion-MPT adapter

pub mod interrupt_controller;
pub mod scsi;
pub mod sysbus;

pub use interrupt_controller::{IrqState, LineIrqManager, TriggerMode};
pub use scsi::bus as ScsiBus;
pub use scsi::buslogic::{BusLogic, BusLogicConfig, BusLogicModel};
pub use scsi::error::ScsiError;
pub use scsi::lsilogic::{LsiLogic, LsiLogicConfig};

#[derive(Clone, Default)]
pub struct DeviceBase {
    /// Name of this device
    pub id: String,
    /// Whether it supports hot-plug/hot-unplug.
    pub hotpluggable: bool,
}

impl DeviceBase {
    pub fn new(id: String, hotpluggable: bool) -> Self {
        DeviceBase { id, hotpluggable }
    }
}

pub trait Device {
    fn device_base(&self) -> &DeviceBase;

    fn device_base_mut(&mut self) -> &mut DeviceBase;

    /// Get device name.
    fn name(&self) -> String {
        self.device_base().id.clone()
    }

    /// Query whether it supports hot-plug/hot-unplug.
    fn hotpluggable(&self) -> bool {
        self.device_base().hotpluggable
    }
}
