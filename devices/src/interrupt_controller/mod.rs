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

//! # Interrupt Controller
//!
//! Interrupt line plumbing between emulated adapters and the platform
//! interrupt controller.
//!
//! ## Design
//!
//! This module offers support for:
//! 1. A `LineIrqManager` trait implemented by whatever owns the interrupt
//!    controller (a hypervisor, or a test harness).
//! 2. An `IrqState` held by each device that forwards line changes to the
//!    manager according to its trigger mode.

use std::sync::Arc;

use anyhow::{bail, Result};
use log::error;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    Level,
    #[default]
    Edge,
}

pub trait LineIrqManager: Send + Sync {
    fn set_level_irq(&self, _gsi: u32, _level: bool) -> Result<()> {
        Ok(())
    }

    fn set_edge_irq(&self, _gsi: u32) -> Result<()> {
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct IrqState {
    pub irq: u32,
    irq_handler: Option<Arc<dyn LineIrqManager>>,
    trigger_mode: TriggerMode,
}

impl IrqState {
    pub fn new(
        irq: u32,
        irq_handler: Option<Arc<dyn LineIrqManager>>,
        trigger_mode: TriggerMode,
    ) -> Self {
        IrqState {
            irq,
            irq_handler,
            trigger_mode,
        }
    }

    pub fn trigger_mode(&self) -> TriggerMode {
        self.trigger_mode
    }

    /// Raise or lower a level triggered line. Edge lines only fire on raise.
    pub fn set_irq_line(&self, level: bool) -> Result<()> {
        let handler = match &self.irq_handler {
            Some(h) => h,
            None => return Ok(()),
        };

        match self.trigger_mode {
            TriggerMode::Level => handler.set_level_irq(self.irq, level),
            TriggerMode::Edge if level => handler.set_edge_irq(self.irq),
            TriggerMode::Edge => Ok(()),
        }
    }

    pub fn trigger_irq(&self) -> Result<()> {
        if self.irq_handler.is_none() {
            bail!("No interrupt handler registered for irq {}", self.irq);
        }
        self.set_irq_line(true)
    }

    /// Same as `set_irq_line` but failures only get logged.
    pub fn update_irq_line(&self, level: bool) {
        if let Err(e) = self.set_irq_line(level) {
            error!("Failed to set irq {} to {}: {:?}", self.irq, level, e);
        }
    }
}
