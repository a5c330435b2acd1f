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

//! # HbaVirt
//!
//! Emulated SCSI host bus adapters for a virtual machine monitor.
//!
//! ## Design
//!
//! The adapters live in `devices`; guest memory, configuration parsing and
//! snapshot plumbing come from the sibling crates re-exported here. A
//! monitor wires a controller up with [`add_scsi_controller`] and talks to
//! it through the returned [`ScsiController`].

pub use address_space;
pub use devices;
pub use machine_manager;
pub use migration;
pub use util;

use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;

use address_space::AddressSpace;
use devices::scsi::bus::{ScsiBus, ScsiMedium, SCSI_MAX_TARGETS};
use devices::sysbus::SysBus;
use devices::{BusLogic, BusLogicConfig, LsiLogic, LsiLogicConfig};
use machine_manager::config::{str_slip_to_clap, ConfigError};
use migration::{MigrationHook, StateTransfer};

/// A realized controller of either family.
#[derive(Clone)]
pub enum ScsiController {
    BusLogic(Arc<Mutex<BusLogic>>),
    LsiLogic(Arc<Mutex<LsiLogic>>),
}

impl ScsiController {
    pub fn scsi_bus(&self) -> Arc<ScsiBus> {
        match self {
            ScsiController::BusLogic(dev) => dev.lock().unwrap().scsi_bus().clone(),
            ScsiController::LsiLogic(dev) => dev.lock().unwrap().scsi_bus().clone(),
        }
    }

    pub fn attach(&self, target: u8, medium: Arc<dyn ScsiMedium>) -> Result<()> {
        match self {
            ScsiController::BusLogic(dev) => dev.lock().unwrap().attach(target, medium),
            ScsiController::LsiLogic(dev) => dev.lock().unwrap().attach(target, medium),
        }
    }

    pub fn detach(&self, target: u8) -> Result<Arc<dyn ScsiMedium>> {
        match self {
            ScsiController::BusLogic(dev) => dev.lock().unwrap().detach(target),
            ScsiController::LsiLogic(dev) => dev.lock().unwrap().detach(target),
        }
    }

    /// Wait for in-flight requests before the VM stops.
    pub fn suspend(&self) {
        match self {
            ScsiController::BusLogic(dev) => dev.lock().unwrap().suspend(),
            ScsiController::LsiLogic(dev) => dev.lock().unwrap().suspend(),
        }
    }

    pub fn power_off(&self) {
        match self {
            ScsiController::BusLogic(dev) => dev.lock().unwrap().power_off(),
            ScsiController::LsiLogic(dev) => dev.lock().unwrap().power_off(),
        }
    }

    pub fn save_state(&self) -> Result<Vec<u8>> {
        match self {
            ScsiController::BusLogic(dev) => dev.lock().unwrap().get_state_vec(),
            ScsiController::LsiLogic(dev) => dev.lock().unwrap().get_state_vec(),
        }
    }

    /// Load a snapshot taken by [`ScsiController::save_state`] and restart
    /// the requests it carries.
    pub fn restore_state(&self, state: &[u8]) -> Result<()> {
        match self {
            ScsiController::BusLogic(dev) => {
                let mut locked_dev = dev.lock().unwrap();
                locked_dev.set_state_mut(state)?;
                locked_dev.resume()
            }
            ScsiController::LsiLogic(dev) => {
                let mut locked_dev = dev.lock().unwrap();
                locked_dev.set_state_mut(state)?;
                locked_dev.resume()
            }
        }
    }
}

/// Parse `args` (`buslogic,...` or `lsilogic,...`), create a controller
/// with an empty bus of 16 targets and realize it at `region_base`.
pub fn add_scsi_controller(
    args: &str,
    mem: &Arc<AddressSpace>,
    sysbus: &Arc<Mutex<SysBus>>,
    region_base: u64,
) -> Result<ScsiController> {
    let class = args.split(',').next().unwrap_or_default();
    let clap_args = str_slip_to_clap(args, true, false);
    let controller = match class {
        "buslogic" => {
            let config = BusLogicConfig::try_parse_from(clap_args)?;
            let bus = Arc::new(ScsiBus::new(format!("{}.0", config.id), SCSI_MAX_TARGETS));
            let dev = BusLogic::new(&config, mem, &bus)?
                .realize(sysbus, region_base)
                .with_context(|| format!("Failed to realize {}", config.id))?;
            ScsiController::BusLogic(dev)
        }
        "lsilogic" => {
            let config = LsiLogicConfig::try_parse_from(clap_args)?;
            let bus = Arc::new(ScsiBus::new(format!("{}.0", config.id), SCSI_MAX_TARGETS));
            let dev = LsiLogic::new(&config, mem, &bus)?
                .realize(sysbus, region_base)
                .with_context(|| format!("Failed to realize {}", config.id))?;
            ScsiController::LsiLogic(dev)
        }
        other => bail!(ConfigError::InvalidParam(
            other.to_string(),
            "device".to_string()
        )),
    };
    info!("SCSI controller {} added at {:#x}", class, region_base);
    Ok(controller)
}
