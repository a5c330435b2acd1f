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

//! LSI Logic LSI53C1030 Fusion-MPT SCSI adapter.
//!
//! Control messages travel through the doorbell handshake or the request
//! FIFO, replies come back through the doorbell or the reply FIFOs. SCSI I/O
//! requests are read from guest frames by one worker thread per adapter.

mod doorbell;
pub mod message;
mod request;
mod sg;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use log::{debug, error, info, warn};

use crate::scsi::worker::{ScsiWorker, WorkerHandler, WorkerKick};
use crate::sysbus::{SysBus, SysBusDevBase, SysBusDevOps, SysBusDevType, SysBusError, SysRes};
use crate::ScsiBus::{ScsiBus, ScsiMedium, SCSI_MAX_TARGETS};
use crate::{Device, DeviceBase, IrqState, ScsiError};
use address_space::{AddressSpace, GuestAddress};
use machine_manager::config::valid_id;
use message::MPT_REPLY_MAX;
use migration::{MigrationHook, StateReader, StateTransfer, StateWriter};

/// Register offsets inside the port window.
pub const LSI_REG_DOORBELL: u64 = 0x00;
pub const LSI_REG_WRITE_SEQUENCE: u64 = 0x04;
pub const LSI_REG_HOST_DIAGNOSTIC: u64 = 0x08;
pub const LSI_REG_TEST_BASE_ADDRESS: u64 = 0x0c;
pub const LSI_REG_DIAG_RW_DATA: u64 = 0x10;
pub const LSI_REG_DIAG_RW_ADDRESS: u64 = 0x14;
pub const LSI_REG_HOST_INTR_STATUS: u64 = 0x30;
pub const LSI_REG_HOST_INTR_MASK: u64 = 0x34;
pub const LSI_REG_REQUEST_QUEUE: u64 = 0x40;
pub const LSI_REG_REPLY_QUEUE: u64 = 0x44;

pub const LSI_IO_PORT_COUNT: u64 = 256;

/// HOST_INTR_STATUS bits.
pub const LSI_INTR_DOORBELL_STS: u32 = 1 << 31;
pub const LSI_INTR_REPLY: u32 = 1 << 3;
pub const LSI_INTR_SYSTEM_DOORBELL: u32 = 1 << 0;

/// HOST_INTR_MASK bits.
pub const LSI_MASK_DOORBELL: u32 = 1 << 0;
pub const LSI_MASK_REPLY: u32 = 1 << 3;
pub const LSI_MASK_IRQ_ROUTING: u32 = 0x3 << 8;
const LSI_MASK_WRITABLE: u32 = LSI_MASK_DOORBELL | LSI_MASK_REPLY | LSI_MASK_IRQ_ROUTING;

/// HOST_DIAGNOSTIC bits.
pub const LSI_DIAG_MEM_ENABLE: u32 = 1 << 0;
pub const LSI_DIAG_RESET_ADAPTER: u32 = 1 << 2;
pub const LSI_DIAG_RW_ENABLE: u32 = 1 << 4;
pub const LSI_DIAG_DRWE: u32 = 1 << 7;

/// Key unlocking HOST_DIAGNOSTIC, one nibble per WRITE_SEQUENCE write.
pub const LSI_DIAG_UNLOCK_KEY: [u32; 5] = [0x04, 0x0b, 0x02, 0x07, 0x0d];
/// Diagnostic memory in dwords.
const LSI_DIAG_MEM_DWORDS: usize = 256 * 1024;

/// Doorbell functions, bits 31-24 of a DOORBELL write.
pub const LSI_DB_FN_IOC_MSG_UNIT_RESET: u8 = 0x40;
pub const LSI_DB_FN_IO_UNIT_RESET: u8 = 0x41;
pub const LSI_DB_FN_HANDSHAKE: u8 = 0x42;
pub const LSI_DB_FN_REPLY_FRAME_REMOVAL: u8 = 0x43;

/// Handshake message buffer in dwords.
pub const LSI_MSG_MAX_DWORDS: usize = 40;

pub const LSI_QUEUE_DEPTH_MIN: u32 = 8;
pub const LSI_QUEUE_DEPTH_MAX: u32 = 1024;
pub const LSI_MAX_CHAIN_DEPTH: u8 = 3;
pub const LSI_DEVICES_PER_BUS: u8 = SCSI_MAX_TARGETS as u8;
pub const LSI_REPLY_FRAME_SIZE_DEFAULT: u16 = 128;

/// Fault codes.
pub const LSI_FAULT_INVALID_FUNCTION: u16 = 0x0001;
pub const LSI_FAULT_INSUFFICIENT_RESOURCES: u16 = 0x0006;

/// Alias of the adapter state in a snapshot, "LSIC".
const LSILOGIC_STATE_ALIAS: u64 = 0x4c53_4943;
const SAVED_STATE_END: u32 = 0xffff_ffff;

#[derive(Parser, Clone, Debug)]
#[command(no_binary_name(true))]
pub struct LsiLogicConfig {
    #[arg(long, value_parser = ["lsilogic"])]
    pub classtype: String,
    #[arg(long, value_parser = valid_id)]
    pub id: String,
    /// Entries of the request FIFO.
    #[arg(long = "request-queue", default_value = "256", value_parser = clap::value_parser!(u32).range(8..=1024))]
    pub request_queue: u32,
    /// Entries of the reply free and reply post FIFOs.
    #[arg(long = "reply-queue", default_value = "256", value_parser = clap::value_parser!(u32).range(8..=1024))]
    pub reply_queue: u32,
    #[arg(long)]
    pub irq: Option<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IocState {
    Reset,
    Ready,
    Operational,
    Fault,
}

impl IocState {
    pub fn code(&self) -> u32 {
        match self {
            IocState::Reset => 0,
            IocState::Ready => 1,
            IocState::Operational => 2,
            IocState::Fault => 4,
        }
    }

    fn from_code(code: u32) -> Result<Self> {
        match code {
            0 => Ok(IocState::Reset),
            1 => Ok(IocState::Ready),
            2 => Ok(IocState::Operational),
            4 => Ok(IocState::Fault),
            _ => Err(anyhow!(ScsiError::InvalidConfig("IOC state", code.to_string()))),
        }
    }
}

/// Function currently owning the doorbell register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DoorbellState {
    Idle,
    Handshake,
    /// Reply frame removal: count, then each frame low/high half.
    FrameCountLow,
    FrameCountHigh,
    NextFrameLow,
    NextFrameHigh,
}

impl DoorbellState {
    fn code(&self) -> u8 {
        match self {
            DoorbellState::Idle => 0,
            DoorbellState::Handshake => 1,
            DoorbellState::FrameCountLow => 2,
            DoorbellState::FrameCountHigh => 3,
            DoorbellState::NextFrameLow => 4,
            DoorbellState::NextFrameHigh => 5,
        }
    }

    fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(DoorbellState::Idle),
            1 => Ok(DoorbellState::Handshake),
            2 => Ok(DoorbellState::FrameCountLow),
            3 => Ok(DoorbellState::FrameCountHigh),
            4 => Ok(DoorbellState::NextFrameLow),
            5 => Ok(DoorbellState::NextFrameHigh),
            _ => Err(anyhow!(ScsiError::InvalidConfig("doorbell state", code.to_string()))),
        }
    }
}

/// Circular FIFO of 32-bit frame descriptors. One slot always stays free.
#[derive(Clone, Debug)]
pub(crate) struct FrameRing {
    slots: Vec<u32>,
    next_write: u32,
    next_read: u32,
}

impl FrameRing {
    pub fn new(entries: u32) -> Self {
        FrameRing {
            slots: vec![0; entries as usize],
            next_write: 0,
            next_read: 0,
        }
    }

    pub fn entries(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn clear(&mut self) {
        self.next_write = 0;
        self.next_read = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.next_read == self.next_write
    }

    pub fn len(&self) -> u32 {
        let n = self.entries();
        (self.next_write + n - self.next_read) % n
    }

    pub fn is_full(&self) -> bool {
        (self.next_write + 1) % self.entries() == self.next_read
    }

    /// Append `value`, false if the ring is full.
    pub fn push(&mut self, value: u32) -> bool {
        if self.is_full() {
            return false;
        }
        self.slots[self.next_write as usize] = value;
        self.next_write = (self.next_write + 1) % self.entries();
        true
    }

    pub fn peek(&self) -> Option<u32> {
        if self.is_empty() {
            return None;
        }
        Some(self.slots[self.next_read as usize])
    }

    pub fn pop(&mut self) -> Option<u32> {
        let value = self.peek()?;
        self.next_read = (self.next_read + 1) % self.entries();
        Some(value)
    }

    fn save(&self, writer: &mut StateWriter) {
        writer
            .put(&self.entries())
            .put(&self.next_write)
            .put(&self.next_read);
        for slot in self.slots.iter() {
            writer.put(slot);
        }
    }

    fn restore(&mut self, reader: &mut StateReader, what: &str) -> Result<()> {
        let entries = reader.get::<u32>("ring entries")?;
        if entries != self.entries() {
            bail!(
                "{} holds {} entries in the snapshot, {} configured",
                what,
                entries,
                self.entries()
            );
        }
        self.next_write = reader.get("ring write index")?;
        self.next_read = reader.get("ring read index")?;
        if self.next_write >= entries || self.next_read >= entries {
            bail!("{} index out of range in snapshot", what);
        }
        for slot in self.slots.iter_mut() {
            *slot = reader.get("ring slot")?;
        }
        Ok(())
    }
}

/// Guest visible adapter state, guarded by the adapter critical section.
pub(crate) struct LsiLogicState {
    pub ioc_state: IocState,
    pub fault_code: u16,
    pub who_init: u8,
    pub doorbell: DoorbellState,
    pub intr_status: u32,
    pub intr_mask: u32,
    pub msg: [u32; LSI_MSG_MAX_DWORDS],
    pub msg_len: usize,
    pub msg_idx: usize,
    pub reply: [u8; MPT_REPLY_MAX],
    /// Reply length in 16-bit words for the handshake read back.
    pub reply_words: usize,
    pub reply_idx: usize,
    pub max_devices: u8,
    pub max_buses: u8,
    pub reply_frame_size: u16,
    pub host_mfa_high: u32,
    pub sense_high: u32,
    pub reply_free: FrameRing,
    pub reply_post: FrameRing,
    pub request: FrameRing,
    pub diag_seq_idx: usize,
    pub diag_enabled: bool,
    pub diag_rw_enabled: bool,
    pub diag_addr: u32,
    /// Sparse diagnostic memory keyed by dword aligned address.
    pub diag_mem: BTreeMap<u32, u32>,
    pub event_notification: bool,
}

impl LsiLogicState {
    fn new(request_entries: u32, reply_entries: u32) -> Self {
        LsiLogicState {
            ioc_state: IocState::Reset,
            fault_code: 0,
            who_init: 0,
            doorbell: DoorbellState::Idle,
            intr_status: 0,
            intr_mask: 0,
            msg: [0; LSI_MSG_MAX_DWORDS],
            msg_len: 0,
            msg_idx: 0,
            reply: [0; MPT_REPLY_MAX],
            reply_words: 0,
            reply_idx: 0,
            max_devices: LSI_DEVICES_PER_BUS,
            max_buses: 1,
            reply_frame_size: LSI_REPLY_FRAME_SIZE_DEFAULT,
            host_mfa_high: 0,
            sense_high: 0,
            reply_free: FrameRing::new(reply_entries),
            reply_post: FrameRing::new(reply_entries),
            request: FrameRing::new(request_entries),
            diag_seq_idx: 0,
            diag_enabled: false,
            diag_rw_enabled: false,
            diag_addr: 0,
            diag_mem: BTreeMap::new(),
            event_notification: false,
        }
    }

    /// Full address of a guest frame whose low half is `low`.
    pub fn frame_addr(&self, low: u32) -> u64 {
        (self.host_mfa_high as u64) << 32 | low as u64
    }

    pub fn sense_addr(&self, low: u32) -> u64 {
        (self.sense_high as u64) << 32 | low as u64
    }

    fn diag_read(&self, addr: u32) -> u32 {
        self.diag_mem.get(&(addr & !3)).copied().unwrap_or(0)
    }

    fn diag_write(&mut self, addr: u32, value: u32) -> bool {
        let addr = addr & !3;
        if !self.diag_mem.contains_key(&addr) && self.diag_mem.len() >= LSI_DIAG_MEM_DWORDS {
            return false;
        }
        self.diag_mem.insert(addr, value);
        true
    }
}

/// State shared between the register handlers, the worker thread and the
/// completion callbacks of the media.
pub(crate) struct LsiLogicCore {
    pub id: String,
    pub state: Mutex<LsiLogicState>,
    pub mem: Arc<AddressSpace>,
    pub bus: Arc<ScsiBus>,
    pub kick: Arc<WorkerKick>,
    signal_idle: AtomicBool,
    idle_lock: Mutex<()>,
    idle_cond: Condvar,
    irq: Mutex<IrqState>,
}

impl LsiLogicCore {
    pub fn irq_line(&self) -> u32 {
        self.irq.lock().unwrap().irq
    }

    pub fn set_irq(&self, level: bool) {
        self.irq.lock().unwrap().update_irq_line(level);
    }

    pub fn check_idle(&self) {
        if self.signal_idle.load(Ordering::SeqCst) && self.bus.all_idle() {
            let _guard = self.idle_lock.lock().unwrap();
            self.idle_cond.notify_all();
        }
    }

    fn wait_for_idle(&self) {
        self.signal_idle.store(true, Ordering::SeqCst);
        let mut guard = self.idle_lock.lock().unwrap();
        while !self.bus.all_idle() {
            guard = match self.idle_cond.wait_timeout(guard, Duration::from_millis(100)) {
                Ok((g, _)) => g,
                Err(e) => {
                    error!("{}: idle wait poisoned: {:?}", self.id, e);
                    break;
                }
            };
        }
        self.signal_idle.store(false, Ordering::SeqCst);
    }

    pub fn read_guest(&self, addr: u64, buf: &mut [u8]) -> bool {
        let len = buf.len() as u64;
        let mut dst: &mut [u8] = buf;
        match self.mem.read(&mut dst, GuestAddress(addr), len) {
            Ok(()) => true,
            Err(e) => {
                error!("{}: guest read at {:#x}+{} failed: {:?}", self.id, addr, len, e);
                false
            }
        }
    }

    pub fn write_guest(&self, addr: u64, data: &[u8]) -> bool {
        let mut src: &[u8] = data;
        match self.mem.write(&mut src, GuestAddress(addr), data.len() as u64) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "{}: guest write at {:#x}+{} failed: {:?}",
                    self.id,
                    addr,
                    data.len(),
                    e
                );
                false
            }
        }
    }
}

struct LsiLogicWorker {
    core: Arc<LsiLogicCore>,
}

impl WorkerHandler for LsiLogicWorker {
    fn process(&self) {
        self.core.process_request_queue();
    }
}

pub struct LsiLogic {
    base: SysBusDevBase,
    config: LsiLogicConfig,
    core: Arc<LsiLogicCore>,
    worker: Option<ScsiWorker>,
}

impl LsiLogic {
    pub fn new(
        config: &LsiLogicConfig,
        mem: &Arc<AddressSpace>,
        bus: &Arc<ScsiBus>,
    ) -> Result<Self> {
        if bus.max_targets() > SCSI_MAX_TARGETS {
            bail!(ScsiError::InvalidConfig(
                "bus size",
                bus.max_targets().to_string()
            ));
        }
        for (what, depth) in [
            ("request-queue", config.request_queue),
            ("reply-queue", config.reply_queue),
        ] {
            if !(LSI_QUEUE_DEPTH_MIN..=LSI_QUEUE_DEPTH_MAX).contains(&depth) {
                bail!(ScsiError::InvalidConfig(what, depth.to_string()));
            }
        }
        let core = LsiLogicCore {
            id: config.id.clone(),
            state: Mutex::new(LsiLogicState::new(config.request_queue, config.reply_queue)),
            mem: mem.clone(),
            bus: bus.clone(),
            kick: Arc::new(WorkerKick::new()?),
            signal_idle: AtomicBool::new(false),
            idle_lock: Mutex::new(()),
            idle_cond: Condvar::new(),
            irq: Mutex::new(IrqState::default()),
        };
        let mut base = SysBusDevBase::new(SysBusDevType::ScsiHost);
        base.base = DeviceBase::new(config.id.clone(), false);
        Ok(LsiLogic {
            base,
            config: config.clone(),
            core: Arc::new(core),
            worker: None,
        })
    }

    /// Claim the port window at `region_base` and an interrupt line, start
    /// the worker and bring the IOC to Ready.
    pub fn realize(
        mut self,
        sysbus: &Arc<Mutex<SysBus>>,
        region_base: u64,
    ) -> Result<Arc<Mutex<LsiLogic>>> {
        let id = self.config.id.clone();
        {
            let mut locked_bus = sysbus.lock().unwrap();
            self.set_sys_resource(
                &mut locked_bus,
                region_base,
                LSI_IO_PORT_COUNT,
                &format!("{}-io", id),
            )?;
        }
        *self.core.irq.lock().unwrap() = self.base.irq_state.clone();

        let handler = Arc::new(LsiLogicWorker {
            core: self.core.clone(),
        });
        self.worker = Some(
            ScsiWorker::spawn(&format!("{}-worker", id), self.core.kick.clone(), handler)
                .with_context(|| format!("Failed to start worker of {}", id))?,
        );

        let core = self.core.clone();
        let dev = Arc::new(Mutex::new(self));
        sysbus.lock().unwrap().attach_device(&dev)?;

        core.hard_reset(&mut core.state.lock().unwrap());
        info!(
            "{}: LSI53C1030 realized, irq {}, ports {:#x}",
            id,
            core.irq_line(),
            region_base
        );
        Ok(dev)
    }

    pub fn scsi_bus(&self) -> &Arc<ScsiBus> {
        &self.core.bus
    }

    pub fn ioc_state(&self) -> IocState {
        self.core.state.lock().unwrap().ioc_state
    }

    pub fn suspend(&self) {
        self.quiesce();
    }

    pub fn power_off(&self) {
        self.quiesce();
    }

    fn quiesce(&self) {
        self.core.wait_for_idle();
        for (_, medium) in self.core.bus.attached() {
            medium.notify_suspend();
        }
    }

    pub fn attach(&self, target: u8, medium: Arc<dyn ScsiMedium>) -> Result<()> {
        self.core.bus.attach(target, medium)?;
        info!("{}: target {} attached", self.config.id, target);
        Ok(())
    }

    pub fn detach(&self, target: u8) -> Result<Arc<dyn ScsiMedium>> {
        if self.core.bus.outstanding(target) != 0 {
            warn!(
                "{}: detaching target {} with requests in flight",
                self.config.id, target
            );
        }
        self.core.bus.detach(target)
    }

    /// A medium parked (`suspended`) or restarted one of its requests.
    pub fn request_state_changed(&self, target: u8, suspended: bool) {
        if suspended {
            if self.core.bus.dec_outstanding(target) == 0 {
                self.core.check_idle();
            }
        } else {
            self.core.bus.inc_outstanding(target);
        }
    }
}

impl Device for LsiLogic {
    fn device_base(&self) -> &DeviceBase {
        &self.base.base
    }

    fn device_base_mut(&mut self) -> &mut DeviceBase {
        &mut self.base.base
    }
}

impl SysBusDevOps for LsiLogic {
    fn sysbusdev_base(&self) -> &SysBusDevBase {
        &self.base
    }

    fn sysbusdev_base_mut(&mut self) -> &mut SysBusDevBase {
        &mut self.base
    }

    /// Registers are 32 bits wide, narrower reads return part of the
    /// register covering `offset`.
    fn read(&mut self, data: &mut [u8], _base: GuestAddress, offset: u64) -> bool {
        let value = self.core.register_read(offset & !3).to_le_bytes();
        let start = (offset & 3) as usize;
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = value.get(start + i).copied().unwrap_or(0);
        }
        true
    }

    /// Misaligned writes are dropped.
    fn write(&mut self, data: &[u8], _base: GuestAddress, offset: u64) -> bool {
        if offset & 3 != 0 {
            debug!("{}: misaligned write at {:#x} ignored", self.config.id, offset);
            return true;
        }
        let mut raw = [0_u8; 4];
        let n = data.len().min(4);
        raw[..n].copy_from_slice(&data[..n]);
        self.core.register_write(offset, u32::from_le_bytes(raw));
        true
    }

    fn get_irq(&self, sysbus: &mut SysBus) -> Result<i32> {
        if let Some(irq) = self.config.irq {
            return Ok(irq as i32);
        }
        let irq = sysbus.min_free_irq;
        if irq > sysbus.free_irqs.1 {
            return Err(anyhow!(SysBusError::IrqExhausted));
        }
        sysbus.min_free_irq = irq + 1;
        Ok(irq)
    }

    fn get_sys_resource(&mut self) -> &mut SysRes {
        &mut self.base.res
    }

    fn reset(&mut self) -> Result<()> {
        self.core.wait_for_idle();
        self.core.hard_reset(&mut self.core.state.lock().unwrap());
        debug!("{}: reset", self.config.id);
        Ok(())
    }
}

impl StateTransfer for LsiLogic {
    fn get_state_vec(&self) -> Result<Vec<u8>> {
        let core = &self.core;
        let s = core.state.lock().unwrap();
        let mut writer = StateWriter::new();
        for target in 0..SCSI_MAX_TARGETS as u8 {
            writer
                .put(&(core.bus.is_present(target) as u8))
                .put(&core.bus.outstanding(target));
        }
        writer
            .put(&s.ioc_state.code())
            .put(&s.fault_code)
            .put(&s.who_init)
            .put(&s.doorbell.code())
            .put(&s.intr_status)
            .put(&s.intr_mask);
        for dword in s.msg.iter() {
            writer.put(dword);
        }
        writer
            .put(&(s.msg_len as u32))
            .put(&(s.msg_idx as u32))
            .put_bytes(&s.reply)
            .put(&(s.reply_words as u32))
            .put(&(s.reply_idx as u32))
            .put(&s.max_devices)
            .put(&s.max_buses)
            .put(&s.reply_frame_size)
            .put(&s.host_mfa_high)
            .put(&s.sense_high)
            .put(&(s.event_notification as u8))
            .put(&(s.diag_seq_idx as u32))
            .put(&(s.diag_enabled as u8))
            .put(&(s.diag_rw_enabled as u8))
            .put(&s.diag_addr)
            .put(&(s.diag_mem.len() as u32));
        for (addr, value) in s.diag_mem.iter() {
            writer.put(addr).put(value);
        }
        s.reply_free.save(&mut writer);
        s.reply_post.save(&mut writer);

        // Requests parked on a medium are redone from the request FIFO.
        let mut request = s.request.clone();
        for (_, medium) in core.bus.attached() {
            for tag in medium.suspended_tags() {
                if !request.push(tag as u32) {
                    bail!("{}: request FIFO overflow while saving", self.config.id);
                }
            }
        }
        request.save(&mut writer);
        writer
            .put(&(core.kick.notification() as u8))
            .put(&SAVED_STATE_END);
        Ok(writer.into_vec())
    }

    fn set_state_mut(&mut self, state: &[u8]) -> Result<()> {
        let core = &self.core;
        let mut reader = StateReader::new(state);
        let mut outstanding = [0_u32; SCSI_MAX_TARGETS];
        for (target, count) in outstanding.iter_mut().enumerate() {
            let present = reader.get::<u8>("target present")? != 0;
            *count = reader.get::<u32>("target outstanding")?;
            if present != core.bus.is_present(target as u8) {
                bail!(
                    "{}: target {} is {} in the snapshot but {} now",
                    self.config.id,
                    target,
                    if present { "present" } else { "absent" },
                    if present { "absent" } else { "present" }
                );
            }
        }

        let mut s = core.state.lock().unwrap();
        s.ioc_state = IocState::from_code(reader.get("IOC state")?)?;
        s.fault_code = reader.get("fault code")?;
        s.who_init = reader.get("who init")?;
        s.doorbell = DoorbellState::from_code(reader.get("doorbell state")?)?;
        s.intr_status = reader.get("interrupt status")?;
        s.intr_mask = reader.get("interrupt mask")?;
        for dword in s.msg.iter_mut() {
            *dword = reader.get("message dword")?;
        }
        s.msg_len = reader.get::<u32>("message length")? as usize;
        s.msg_idx = reader.get::<u32>("message index")? as usize;
        reader.get_bytes(&mut s.reply, "reply buffer")?;
        s.reply_words = reader.get::<u32>("reply words")? as usize;
        s.reply_idx = reader.get::<u32>("reply index")? as usize;
        s.max_devices = reader.get("max devices")?;
        s.max_buses = reader.get("max buses")?;
        s.reply_frame_size = reader.get("reply frame size")?;
        s.host_mfa_high = reader.get("host MFA high")?;
        s.sense_high = reader.get("sense high")?;
        s.event_notification = reader.get::<u8>("event notification")? != 0;
        s.diag_seq_idx = reader.get::<u32>("diag sequence index")? as usize;
        s.diag_enabled = reader.get::<u8>("diag enabled")? != 0;
        s.diag_rw_enabled = reader.get::<u8>("diag rw enabled")? != 0;
        s.diag_addr = reader.get("diag address")?;
        let count = reader.get::<u32>("diag memory count")?;
        if count as usize > LSI_DIAG_MEM_DWORDS {
            bail!("{}: diagnostic memory overflow in snapshot", self.config.id);
        }
        s.diag_mem.clear();
        for _ in 0..count {
            let addr = reader.get::<u32>("diag memory address")?;
            let value = reader.get::<u32>("diag memory value")?;
            s.diag_mem.insert(addr & !3, value);
        }
        let id = self.config.id.clone();
        s.reply_free
            .restore(&mut reader, "reply free FIFO")
            .with_context(|| id.clone())?;
        s.reply_post
            .restore(&mut reader, "reply post FIFO")
            .with_context(|| id.clone())?;
        s.request
            .restore(&mut reader, "request FIFO")
            .with_context(|| id.clone())?;
        core.kick
            .set_notification(reader.get::<u8>("notification")? != 0);
        if reader.get::<u32>("end marker")? != SAVED_STATE_END {
            bail!("{}: snapshot end marker missing", id);
        }

        if s.msg_idx > s.msg_len || s.msg_len > LSI_MSG_MAX_DWORDS {
            bail!("{}: handshake message overflow in snapshot", id);
        }
        if s.reply_idx > s.reply_words || s.reply_words > MPT_REPLY_MAX / 2 {
            bail!("{}: handshake reply overflow in snapshot", id);
        }
        if s.diag_seq_idx > LSI_DIAG_UNLOCK_KEY.len() {
            bail!("{}: diagnostic sequence out of range in snapshot", id);
        }
        drop(s);

        for (target, count) in outstanding.iter().enumerate() {
            core.bus.set_outstanding(target as u8, *count);
        }
        Ok(())
    }

    fn get_device_alias(&self) -> u64 {
        LSILOGIC_STATE_ALIAS
    }
}

impl MigrationHook for LsiLogic {
    fn resume(&mut self) -> Result<()> {
        let core = &self.core;
        {
            let s = core.state.lock().unwrap();
            core.update_irq(&s);
        }
        let pending = !core.state.lock().unwrap().request.is_empty();
        if pending || core.kick.notification() {
            debug!("{}: resuming request FIFO", self.config.id);
            core.kick.set_notification(false);
            core.kick.notify();
        }
        Ok(())
    }
}
