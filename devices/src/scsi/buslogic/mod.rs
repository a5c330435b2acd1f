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

//! BusLogic BT-958D / BT-545C and Adaptec AHA-1540B host adapters.
//!
//! The guest talks to the adapter through four byte wide registers. Commands
//! are collected byte by byte on the vCPU thread; SCSI work is queued through
//! guest memory mailboxes and drained by one worker thread per adapter.

pub mod ccb;
pub mod command;
mod mailbox;
mod request;
mod sg;

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser};
use log::{debug, error, info, warn};

use crate::scsi::worker::{ScsiWorker, WorkerHandler, WorkerKick};
use crate::sysbus::{SysBus, SysBusDevBase, SysBusDevOps, SysBusDevType, SysBusError, SysRes};
use crate::ScsiBus::{ScsiBus, ScsiMedium, SCSI_MAX_TARGETS};
use crate::{Device, DeviceBase, IrqState, ScsiError};
use address_space::{AddressSpace, GuestAddress};
use machine_manager::config::{parse_bool, valid_id};
use migration::{MigrationHook, StateReader, StateTransfer, StateWriter};
use util::num_ops::str_to_num;

/// Register offsets inside the 4 port window.
pub const BL_CONTROL_STATUS: u64 = 0;
pub const BL_COMMAND_DATA: u64 = 1;
pub const BL_INTERRUPT: u64 = 2;
pub const BL_GEOMETRY: u64 = 3;

/// Status register bits.
pub const BL_STAT_CMDINV: u8 = 0x01;
pub const BL_STAT_DIRRDY: u8 = 0x04;
pub const BL_STAT_CPRBSY: u8 = 0x08;
pub const BL_STAT_HARDY: u8 = 0x10;
pub const BL_STAT_INREQ: u8 = 0x20;
pub const BL_STAT_DFAIL: u8 = 0x40;
pub const BL_STAT_DACT: u8 = 0x80;

/// Interrupt register bits.
pub const BL_INTR_IMBL: u8 = 0x01;
pub const BL_INTR_OMBR: u8 = 0x02;
pub const BL_INTR_CMDC: u8 = 0x04;
pub const BL_INTR_RSTS: u8 = 0x08;
pub const BL_INTR_INTV: u8 = 0x80;

/// Control register bits.
pub const BL_CTRL_RSBUS: u8 = 0x10;
pub const BL_CTRL_RINT: u8 = 0x20;
pub const BL_CTRL_RSOFT: u8 = 0x40;
pub const BL_CTRL_RHARD: u8 = 0x80;

pub const BL_GEOM_XLATEN: u8 = 0x80;

/// No command in progress.
pub const BL_OPCODE_IDLE: u8 = 0xff;

pub const BL_CMD_BUF_SIZE: usize = 53;
pub const BL_REPLY_BUF_SIZE: usize = 64;
pub const BL_LOCAL_RAM_SIZE: usize = 256;
/// AutoSCSI block inside the local RAM.
pub const BL_AUTOSCSI_OFFSET: usize = 64;
pub const BL_HOST_SCSI_ID: u8 = 7;

/// A guest hard reset keeps the adapter in diagnostic state this long.
const BL_RESET_DURATION: Duration = Duration::from_millis(50);

/// ISA base port per I/O port code. Codes 6 and 7 leave the window unmapped.
pub const ISA_BASES: [u64; 8] = [0x330, 0x334, 0x230, 0x234, 0x130, 0x134, 0, 0];
pub const ISA_CODE_DISABLED: u8 = 6;
const ISA_PORT_COUNT: u64 = 4;
const PCI_PORT_COUNT: u64 = 32;
const ISA_DEFAULT_IRQ: i32 = 11;

/// Alias of the adapter state in a snapshot, "BLSC".
const BUSLOGIC_STATE_ALIAS: u64 = 0x424c_5343;
const SAVED_STATE_END: u32 = 0xffff_ffff;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BusLogicModel {
    /// PCI, wide, ultra, firmware 5.07B.
    #[default]
    Bt958d,
    /// ISA BusLogic.
    Bt545c,
    /// ISA Adaptec.
    Aha1540b,
}

impl BusLogicModel {
    pub fn is_aha(&self) -> bool {
        *self == BusLogicModel::Aha1540b
    }

    pub fn is_isa(&self) -> bool {
        *self != BusLogicModel::Bt958d
    }
}

impl FromStr for BusLogicModel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bt958d" => Ok(BusLogicModel::Bt958d),
            "bt545c" => Ok(BusLogicModel::Bt545c),
            "aha1540b" => Ok(BusLogicModel::Aha1540b),
            _ => Err(anyhow!(ScsiError::InvalidConfig("adapter", s.to_string()))),
        }
    }
}

fn parse_model(s: &str) -> Result<BusLogicModel> {
    BusLogicModel::from_str(s)
}

/// Accept a compatible ISA base port and turn it into its port code.
fn parse_isa_port(s: &str) -> Result<u8> {
    if s == "disabled" {
        return Ok(ISA_CODE_DISABLED);
    }
    let port = str_to_num::<u64>(s)?;
    if port == 0 {
        return Ok(ISA_CODE_DISABLED);
    }
    ISA_BASES[..ISA_CODE_DISABLED as usize]
        .iter()
        .position(|&base| base == port)
        .map(|code| code as u8)
        .ok_or_else(|| anyhow!(ScsiError::InvalidConfig("isa-port", s.to_string())))
}

#[derive(Parser, Clone, Debug)]
#[command(no_binary_name(true))]
pub struct BusLogicConfig {
    #[arg(long, value_parser = ["buslogic"])]
    pub classtype: String,
    #[arg(long, value_parser = valid_id)]
    pub id: String,
    #[arg(long, default_value = "bt958d", value_parser = parse_model)]
    pub adapter: BusLogicModel,
    /// Kept for command line compatibility, the adapter carries no option ROM.
    #[arg(long, default_value = "on", value_parser = parse_bool, action = ArgAction::Append)]
    pub bios: bool,
    /// Port code of the ISA compatible window.
    #[arg(long = "isa-port", default_value = "0x334", value_parser = parse_isa_port)]
    pub isa_port: u8,
    #[arg(long)]
    pub irq: Option<u8>,
    #[arg(long, default_value = "6", value_parser = clap::value_parser!(u8).range(5..=7))]
    pub dma: u8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct MailboxState {
    pub count: u32,
    /// 24-bit mailboxes set up by INIT_MBX rather than INIT_EXTENDED_MBX.
    pub legacy: bool,
    pub out_base: u64,
    pub out_cursor: u32,
    pub in_base: u64,
    pub in_cursor: u32,
}

impl MailboxState {
    pub fn entry_size(&self) -> u64 {
        if self.legacy {
            ccb::MAILBOX24_SIZE
        } else {
            ccb::MAILBOX32_SIZE
        }
    }
}

/// Guest visible adapter state, guarded by the adapter critical section.
pub(crate) struct BusLogicState {
    pub status: u8,
    pub interrupt: u8,
    /// Causes deferred while a command completion is latched.
    pub pending: u8,
    pub geometry: u8,
    pub local_ram: [u8; BL_LOCAL_RAM_SIZE],
    pub opcode: u8,
    pub cmd_buf: [u8; BL_CMD_BUF_SIZE],
    pub param_idx: u8,
    pub params_left: u8,
    /// DATA-IN reads come from local RAM (FETCH_HOST_ADAPTER_LOCAL_RAM).
    pub use_local_ram: bool,
    pub reply: [u8; BL_REPLY_BUF_SIZE],
    pub reply_idx: u8,
    pub reply_left: u8,
    pub irq_enabled: bool,
    pub isa_code: u8,
    pub strict_round_robin: bool,
    pub extended_lun: bool,
    pub mbx: MailboxState,
    pub aha_sig_idx: u8,
    pub reset_time: Option<Instant>,
}

impl BusLogicState {
    fn new(isa_code: u8) -> Self {
        BusLogicState {
            status: 0,
            interrupt: 0,
            pending: 0,
            geometry: 0,
            local_ram: [0; BL_LOCAL_RAM_SIZE],
            opcode: BL_OPCODE_IDLE,
            cmd_buf: [0; BL_CMD_BUF_SIZE],
            param_idx: 0,
            params_left: 0,
            use_local_ram: false,
            reply: [0; BL_REPLY_BUF_SIZE],
            reply_idx: 0,
            reply_left: 0,
            irq_enabled: true,
            isa_code,
            strict_round_robin: false,
            extended_lun: false,
            mbx: MailboxState::default(),
            aha_sig_idx: 0,
            reset_time: None,
        }
    }
}

/// The ISA window as registered on the system bus.
struct IsaWindow {
    sysbus: Weak<Mutex<SysBus>>,
    name: String,
}

/// State shared between the register handlers, the worker thread and the
/// completion callbacks of the media.
pub(crate) struct BusLogicCore {
    pub id: String,
    pub model: BusLogicModel,
    pub dma: u8,
    pub default_isa_code: u8,
    pub state: Mutex<BusLogicState>,
    pub mem: Arc<AddressSpace>,
    pub bus: Arc<ScsiBus>,
    pub kick: Arc<WorkerKick>,
    /// EXECUTE_MBX doorbells not yet served.
    pub mailboxes_ready: AtomicU32,
    pub bios_pending: AtomicBool,
    signal_idle: AtomicBool,
    idle_lock: Mutex<()>,
    idle_cond: Condvar,
    irq: Mutex<IrqState>,
    isa: Mutex<Option<IsaWindow>>,
    /// CCBs to restart after a snapshot is loaded.
    redo: Mutex<Vec<u32>>,
}

impl BusLogicCore {
    pub fn irq_line(&self) -> u32 {
        self.irq.lock().unwrap().irq
    }

    pub fn set_irq(&self, level: bool) {
        self.irq.lock().unwrap().update_irq_line(level);
    }

    /// Map the ISA window at the base belonging to `code`.
    pub fn register_isa_range(&self, s: &mut BusLogicState, code: u8) {
        let code = code & 0x7;
        let new_base = ISA_BASES[code as usize];
        let isa = self.isa.lock().unwrap();
        if let Some(window) = isa.as_ref() {
            if let Some(sysbus) = window.sysbus.upgrade() {
                let mut sysbus = sysbus.lock().unwrap();
                let cur_base = sysbus.region_base(&window.name).unwrap_or(0);
                if cur_base != new_base {
                    let target = if new_base == 0 { None } else { Some(new_base) };
                    if let Err(e) = sysbus.move_region(&window.name, target) {
                        error!("{}: failed to move ISA ports to {:#x}: {:?}", self.id, new_base, e);
                        return;
                    }
                    info!("{}: ISA ports moved to {:#x}", self.id, new_base);
                }
            }
        }
        s.isa_code = code;
    }

    /// Outstanding request bookkeeping finished, wake a quiescing thread.
    pub fn check_idle(&self) {
        if self.signal_idle.load(Ordering::SeqCst) && self.bus.all_idle() {
            let _guard = self.idle_lock.lock().unwrap();
            self.idle_cond.notify_all();
        }
    }

    /// Block until no target has a request in flight.
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

    /// Read guest memory, a failed access leaves the buffer untouched.
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

struct BusLogicWorker {
    core: Arc<BusLogicCore>,
}

impl WorkerHandler for BusLogicWorker {
    fn process(&self) {
        if self.core.bios_pending.swap(false, Ordering::SeqCst) {
            self.core.process_bios_request();
        }
        if self.core.mailboxes_ready.swap(0, Ordering::SeqCst) != 0 {
            while self.core.process_mailbox_next() {}
        }
    }
}

pub struct BusLogic {
    base: SysBusDevBase,
    config: BusLogicConfig,
    core: Arc<BusLogicCore>,
    worker: Option<ScsiWorker>,
}

impl BusLogic {
    pub fn new(
        config: &BusLogicConfig,
        mem: &Arc<AddressSpace>,
        bus: &Arc<ScsiBus>,
    ) -> Result<Self> {
        if bus.max_targets() > SCSI_MAX_TARGETS {
            bail!(ScsiError::InvalidConfig(
                "bus size",
                bus.max_targets().to_string()
            ));
        }
        if !config.bios {
            info!("{}: bios=off has no effect", config.id);
        }
        let model = config.adapter;
        let core = BusLogicCore {
            id: config.id.clone(),
            model,
            dma: config.dma,
            default_isa_code: config.isa_port,
            state: Mutex::new(BusLogicState::new(config.isa_port)),
            mem: mem.clone(),
            bus: bus.clone(),
            kick: Arc::new(WorkerKick::new()?),
            mailboxes_ready: AtomicU32::new(0),
            bios_pending: AtomicBool::new(false),
            signal_idle: AtomicBool::new(false),
            idle_lock: Mutex::new(()),
            idle_cond: Condvar::new(),
            irq: Mutex::new(IrqState::default()),
            isa: Mutex::new(None),
            redo: Mutex::new(Vec::new()),
        };
        let mut base = SysBusDevBase::new(SysBusDevType::ScsiHost);
        base.base = DeviceBase::new(config.id.clone(), false);
        Ok(BusLogic {
            base,
            config: config.clone(),
            core: Arc::new(core),
            worker: None,
        })
    }

    /// Claim ports and an interrupt line, start the worker and reset the
    /// adapter. The PCI model decodes a 32 port window at `region_base`;
    /// every model also answers at its ISA compatible base.
    pub fn realize(
        mut self,
        sysbus: &Arc<Mutex<SysBus>>,
        region_base: u64,
    ) -> Result<Arc<Mutex<BusLogic>>> {
        let id = self.config.id.clone();
        let isa_name = format!("{}-isa", id);
        {
            let mut locked_bus = sysbus.lock().unwrap();
            if self.config.adapter.is_isa() {
                self.set_sys_resource(&mut locked_bus, 0, 0, &isa_name)?;
            } else {
                self.set_sys_resource(
                    &mut locked_bus,
                    region_base,
                    PCI_PORT_COUNT,
                    &format!("{}-pci", id),
                )?;
            }
        }
        *self.core.irq.lock().unwrap() = self.base.irq_state.clone();

        let handler = Arc::new(BusLogicWorker {
            core: self.core.clone(),
        });
        self.worker = Some(
            ScsiWorker::spawn(&format!("{}-worker", id), self.core.kick.clone(), handler)
                .with_context(|| format!("Failed to start worker of {}", id))?,
        );

        let core = self.core.clone();
        let dev = Arc::new(Mutex::new(self));
        {
            let mut locked_bus = sysbus.lock().unwrap();
            locked_bus.attach_device(&dev)?;
            locked_bus.add_region(&isa_name, None, ISA_PORT_COUNT, dev.clone())?;
        }
        *core.isa.lock().unwrap() = Some(IsaWindow {
            sysbus: Arc::downgrade(sysbus),
            name: isa_name,
        });

        let mut locked_state = core.state.lock().unwrap();
        core.hw_reset(&mut locked_state, true);
        info!(
            "{}: {:?} realized, irq {}, isa base {:#x}",
            id,
            core.model,
            core.irq_line(),
            ISA_BASES[locked_state.isa_code as usize]
        );
        drop(locked_state);
        Ok(dev)
    }

    pub fn model(&self) -> BusLogicModel {
        self.core.model
    }

    pub fn scsi_bus(&self) -> &Arc<ScsiBus> {
        &self.core.bus
    }

    /// VM suspend: wait for in-flight requests, then tell the media.
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

impl Device for BusLogic {
    fn device_base(&self) -> &DeviceBase {
        &self.base.base
    }

    fn device_base_mut(&mut self) -> &mut DeviceBase {
        &mut self.base.base
    }
}

impl SysBusDevOps for BusLogic {
    fn sysbusdev_base(&self) -> &SysBusDevBase {
        &self.base
    }

    fn sysbusdev_base_mut(&mut self) -> &mut SysBusDevBase {
        &mut self.base
    }

    fn read(&mut self, data: &mut [u8], _base: GuestAddress, offset: u64) -> bool {
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = self.core.register_read((offset + i as u64) % 4);
        }
        true
    }

    fn write(&mut self, data: &[u8], _base: GuestAddress, offset: u64) -> bool {
        for (i, byte) in data.iter().enumerate() {
            self.core.register_write((offset + i as u64) % 4, *byte);
        }
        true
    }

    fn get_irq(&self, sysbus: &mut SysBus) -> Result<i32> {
        if let Some(irq) = self.config.irq {
            return Ok(irq as i32);
        }
        if self.config.adapter.is_isa() {
            return Ok(ISA_DEFAULT_IRQ);
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

    /// Machine reset: wait for the media to go idle, then reset the adapter
    /// including its ISA window.
    fn reset(&mut self) -> Result<()> {
        self.core.wait_for_idle();
        let mut locked_state = self.core.state.lock().unwrap();
        self.core.hw_reset(&mut locked_state, true);
        debug!("{}: reset", self.config.id);
        Ok(())
    }
}

impl StateTransfer for BusLogic {
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
            .put(&s.status)
            .put(&s.interrupt)
            .put(&s.geometry)
            .put_bytes(&s.local_ram)
            .put(&s.opcode)
            .put_bytes(&s.cmd_buf)
            .put(&s.param_idx)
            .put(&s.params_left)
            .put(&(s.use_local_ram as u8))
            .put_bytes(&s.reply)
            .put(&s.reply_idx)
            .put(&s.reply_left)
            .put(&(s.irq_enabled as u8))
            .put(&s.isa_code)
            .put(&s.mbx.count)
            .put(&(s.mbx.legacy as u8))
            .put(&s.mbx.out_base)
            .put(&s.mbx.out_cursor)
            .put(&core.mailboxes_ready.load(Ordering::SeqCst))
            .put(&(core.kick.notification() as u8))
            .put(&s.mbx.in_base)
            .put(&s.mbx.in_cursor)
            .put(&(s.strict_round_robin as u8))
            .put(&(s.extended_lun as u8));

        let mut tags: Vec<u32> = Vec::new();
        for (_, medium) in core.bus.attached() {
            tags.extend(medium.suspended_tags().iter().map(|&t| t as u32));
        }
        writer.put(&(tags.len() as u32));
        for tag in tags.iter() {
            writer.put(tag);
        }
        writer.put(&SAVED_STATE_END);
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
        s.status = reader.get("status")?;
        s.interrupt = reader.get("interrupt")?;
        s.geometry = reader.get("geometry")?;
        reader.get_bytes(&mut s.local_ram, "local ram")?;
        s.opcode = reader.get("opcode")?;
        reader.get_bytes(&mut s.cmd_buf, "command buffer")?;
        s.param_idx = reader.get("parameter index")?;
        s.params_left = reader.get("parameters left")?;
        s.use_local_ram = reader.get::<u8>("use local ram")? != 0;
        reader.get_bytes(&mut s.reply, "reply buffer")?;
        s.reply_idx = reader.get("reply index")?;
        s.reply_left = reader.get("reply left")?;
        s.irq_enabled = reader.get::<u8>("irq enabled")? != 0;
        s.isa_code = reader.get("isa code")?;
        s.mbx.count = reader.get("mailbox count")?;
        s.mbx.legacy = reader.get::<u8>("mailbox 24-bit")? != 0;
        s.mbx.out_base = reader.get("outgoing base")?;
        s.mbx.out_cursor = reader.get("outgoing cursor")?;
        core.mailboxes_ready
            .store(reader.get("mailboxes ready")?, Ordering::SeqCst);
        core.kick
            .set_notification(reader.get::<u8>("notification")? != 0);
        s.mbx.in_base = reader.get("incoming base")?;
        s.mbx.in_cursor = reader.get("incoming cursor")?;
        s.strict_round_robin = reader.get::<u8>("strict round robin")? != 0;
        s.extended_lun = reader.get::<u8>("extended lun")? != 0;
        s.pending = 0;
        s.reset_time = None;

        if s.mbx.count != 0 && (s.mbx.out_cursor >= s.mbx.count || s.mbx.in_cursor >= s.mbx.count)
        {
            bail!("{}: mailbox cursor out of range in snapshot", self.config.id);
        }
        if s.param_idx as usize + s.params_left as usize > BL_CMD_BUF_SIZE {
            bail!("{}: command buffer overflow in snapshot", self.config.id);
        }

        let count = reader.get::<u32>("suspended count")?;
        let mut redo = Vec::with_capacity(count as usize);
        for _ in 0..count {
            redo.push(reader.get::<u32>("suspended ccb")?);
        }
        if reader.get::<u32>("end marker")? != SAVED_STATE_END {
            bail!("{}: snapshot end marker missing", self.config.id);
        }
        drop(s);

        for (target, count) in outstanding.iter().enumerate() {
            core.bus.set_outstanding(target as u8, *count);
        }
        *core.redo.lock().unwrap() = redo;
        Ok(())
    }

    fn get_device_alias(&self) -> u64 {
        BUSLOGIC_STATE_ALIAS
    }
}

impl MigrationHook for BusLogic {
    fn resume(&mut self) -> Result<()> {
        let core = self.core.clone();
        {
            let mut s = core.state.lock().unwrap();
            let code = s.isa_code;
            core.register_isa_range(&mut s, code);
        }

        let redo = std::mem::take(&mut *core.redo.lock().unwrap());
        for ccb_addr in redo {
            debug!("{}: restarting CCB at {:#x}", self.config.id, ccb_addr);
            core.setup_request(ccb_addr as u64);
        }

        if core.mailboxes_ready.load(Ordering::SeqCst) != 0 || core.kick.notification() {
            core.kick.set_notification(false);
            core.kick.notify();
        }
        Ok(())
    }
}
