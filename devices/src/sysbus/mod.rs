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

pub mod error;

pub use error::SysBusError;

use std::fmt;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use log::{debug, error, warn};

use crate::{Device, DeviceBase, IrqState, LineIrqManager, TriggerMode};
use address_space::{AddressRange, GuestAddress};
use util::AsAny;

// ISA interrupt lines left free once the legacy devices took theirs.
pub const IRQ_BASE: i32 = 5;
pub const IRQ_MAX: i32 = 15;

/// A port I/O window claimed by a device. A window without base is known to
/// the bus but currently unmapped.
struct PioRegion {
    name: String,
    base: Option<u64>,
    size: u64,
    dev: Arc<Mutex<dyn SysBusDevOps>>,
}

impl PioRegion {
    fn range(&self) -> Option<AddressRange> {
        self.base
            .map(|base| AddressRange::new(GuestAddress(base), self.size))
    }
}

pub struct SysBus {
    pub name: String,
    regions: Vec<PioRegion>,
    pub free_irqs: (i32, i32),
    pub min_free_irq: i32,
    pub irq_manager: Option<Arc<dyn LineIrqManager>>,
}

impl fmt::Debug for SysBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let regions: Vec<(&str, Option<u64>, u64)> = self
            .regions
            .iter()
            .map(|r| (r.name.as_str(), r.base, r.size))
            .collect();
        f.debug_struct("SysBus")
            .field("name", &self.name)
            .field("regions", &regions)
            .field("free_irqs", &self.free_irqs)
            .field("min_free_irq", &self.min_free_irq)
            .finish()
    }
}

impl SysBus {
    pub fn new(free_irqs: (i32, i32), irq_manager: Option<Arc<dyn LineIrqManager>>) -> Self {
        Self {
            name: "sysbus".to_string(),
            regions: Vec::new(),
            free_irqs,
            min_free_irq: free_irqs.0,
            irq_manager,
        }
    }

    /// Register the device's primary window as described by its `SysRes`.
    pub fn attach_device<T: 'static + SysBusDevOps>(&mut self, dev: &Arc<Mutex<T>>) -> Result<()> {
        let res = dev.lock().unwrap().get_sys_resource().clone();

        // region_base/region_size are both 0 means this device doesn't have its own port window.
        if res.region_base != 0 && res.region_size != 0 {
            self.add_region(&res.region_name, Some(res.region_base), res.region_size, dev.clone())
                .with_context(|| {
                    SysBusError::AddRegionErr("I/O", res.region_base, res.region_size)
                })?;
        }
        Ok(())
    }

    /// Add a named window. `None` as base keeps the window unmapped.
    pub fn add_region(
        &mut self,
        name: &str,
        base: Option<u64>,
        size: u64,
        dev: Arc<Mutex<dyn SysBusDevOps>>,
    ) -> Result<()> {
        if self.regions.iter().any(|r| r.name == name) {
            return Err(anyhow!(SysBusError::RegionOverlap(
                name.to_string(),
                name.to_string()
            )));
        }
        if let Some(base) = base {
            self.check_overlap(name, base, size)?;
        }
        self.regions.push(PioRegion {
            name: name.to_string(),
            base,
            size,
            dev,
        });
        debug!("{}: add region {} at {:x?}+{:#x}", self.name, name, base, size);
        Ok(())
    }

    /// Remap, or with `None` unmap, a window registered earlier.
    pub fn move_region(&mut self, name: &str, new_base: Option<u64>) -> Result<()> {
        let idx = self
            .regions
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| anyhow!(SysBusError::RegionNotFound(name.to_string())))?;
        if let Some(base) = new_base {
            self.check_overlap(name, base, self.regions[idx].size)?;
        }
        self.regions[idx].base = new_base;
        debug!("{}: move region {} to {:x?}", self.name, name, new_base);
        Ok(())
    }

    pub fn remove_region(&mut self, name: &str) -> Result<()> {
        let idx = self
            .regions
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| anyhow!(SysBusError::RegionNotFound(name.to_string())))?;
        self.regions.remove(idx);
        Ok(())
    }

    pub fn region_base(&self, name: &str) -> Option<u64> {
        self.regions
            .iter()
            .find(|r| r.name == name)
            .and_then(|r| r.base)
    }

    fn check_overlap(&self, name: &str, base: u64, size: u64) -> Result<()> {
        let range = AddressRange::new(GuestAddress(base), size);
        for r in self.regions.iter().filter(|r| r.name != name) {
            if let Some(other) = r.range() {
                if other.find_intersection(range).is_some() {
                    return Err(anyhow!(SysBusError::RegionOverlap(
                        name.to_string(),
                        r.name.clone()
                    )));
                }
            }
        }
        Ok(())
    }

    fn find_region(
        &self,
        addr: u64,
        len: usize,
    ) -> Option<(Arc<Mutex<dyn SysBusDevOps>>, GuestAddress, u64)> {
        let access = AddressRange::new(GuestAddress(addr), len as u64);
        self.regions.iter().find_map(|r| {
            let range = r.range()?;
            if range.contains(GuestAddress(addr))
                && access.end_addr().raw_value() <= range.end_addr().raw_value()
            {
                Some((r.dev.clone(), range.base, addr - range.base.raw_value()))
            } else {
                None
            }
        })
    }

    /// Dispatch a guest port read. The bus lock is released before the
    /// device lock is taken, so a device may remap itself from its handler.
    pub fn pio_read(bus: &Arc<Mutex<SysBus>>, addr: u64, data: &mut [u8]) -> bool {
        let found = bus.lock().unwrap().find_region(addr, data.len());
        match found {
            Some((dev, base, offset)) => dev.lock().unwrap().read(data, base, offset),
            None => {
                warn!("Port read at {:#x} hits no device", addr);
                data.fill(0xff);
                false
            }
        }
    }

    pub fn pio_write(bus: &Arc<Mutex<SysBus>>, addr: u64, data: &[u8]) -> bool {
        let found = bus.lock().unwrap().find_region(addr, data.len());
        match found {
            Some((dev, base, offset)) => dev.lock().unwrap().write(data, base, offset),
            None => {
                warn!("Port write at {:#x} hits no device", addr);
                false
            }
        }
    }
}

#[derive(Clone)]
pub struct SysRes {
    // Note: region_base/region_size are both 0 means that this device doesn't have its own window.
    pub region_base: u64,
    pub region_size: u64,
    pub region_name: String,
    pub irq: i32,
}

impl Default for SysRes {
    fn default() -> Self {
        Self {
            region_base: 0,
            region_size: 0,
            region_name: "".to_string(),
            irq: -1,
        }
    }
}

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum SysBusDevType {
    ScsiHost,
    Others,
}

#[derive(Clone)]
pub struct SysBusDevBase {
    pub base: DeviceBase,
    /// System bus device type.
    pub dev_type: SysBusDevType,
    /// System resource.
    pub res: SysRes,
    /// Interrupt state.
    pub irq_state: IrqState,
}

impl Default for SysBusDevBase {
    fn default() -> Self {
        SysBusDevBase {
            base: DeviceBase::default(),
            dev_type: SysBusDevType::Others,
            res: SysRes::default(),
            irq_state: IrqState::default(),
        }
    }
}

impl SysBusDevBase {
    pub fn new(dev_type: SysBusDevType) -> SysBusDevBase {
        Self {
            dev_type,
            ..Default::default()
        }
    }

    pub fn set_sys(&mut self, irq: i32, region_base: u64, region_size: u64, region_name: &str) {
        self.res.irq = irq;
        self.res.region_base = region_base;
        self.res.region_size = region_size;
        self.res.region_name = region_name.to_string();
    }
}

/// Operations for sysbus devices.
pub trait SysBusDevOps: Device + Send + AsAny {
    fn sysbusdev_base(&self) -> &SysBusDevBase;

    fn sysbusdev_base_mut(&mut self) -> &mut SysBusDevBase;

    /// Read function of device.
    ///
    /// # Arguments
    ///
    /// * `data` - A u8-type array.
    /// * `base` - Base address of this device.
    /// * `offset` - Offset from base address.
    fn read(&mut self, data: &mut [u8], base: GuestAddress, offset: u64) -> bool;

    /// Write function of device.
    ///
    /// # Arguments
    ///
    /// * `data` - A u8-type array.
    /// * `base` - Base address of this device.
    /// * `offset` - Offset from base address.
    fn write(&mut self, data: &[u8], base: GuestAddress, offset: u64) -> bool;

    fn get_irq(&self, sysbus: &mut SysBus) -> Result<i32> {
        let irq = sysbus.min_free_irq;
        if irq > sysbus.free_irqs.1 {
            return Err(anyhow!(SysBusError::IrqExhausted));
        }

        sysbus.min_free_irq = irq + 1;
        Ok(irq)
    }

    fn get_sys_resource(&mut self) -> &mut SysRes {
        &mut self.sysbusdev_base_mut().res
    }

    fn set_sys_resource(
        &mut self,
        sysbus: &mut SysBus,
        region_base: u64,
        region_size: u64,
        region_name: &str,
    ) -> Result<()> {
        let irq = self.get_irq(sysbus)?;
        let irq_manager = sysbus.irq_manager.clone();

        self.sysbusdev_base_mut().irq_state =
            IrqState::new(irq as u32, irq_manager, TriggerMode::Level);
        self.sysbusdev_base_mut()
            .set_sys(irq, region_base, region_size, region_name);
        Ok(())
    }

    fn inject_interrupt(&self) {
        let irq_state = &self.sysbusdev_base().irq_state;
        irq_state.trigger_irq().unwrap_or_else(|e| {
            error!(
                "Device {:?} failed to inject interrupt: {:?}",
                self.sysbusdev_base().dev_type,
                e
            )
        });
    }

    fn reset(&mut self) -> Result<()> {
        Ok(())
    }
}
