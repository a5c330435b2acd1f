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

use std::sync::atomic::Ordering;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, warn};

use super::{
    BusLogicCore, BusLogicState, BL_AUTOSCSI_OFFSET, BL_CMD_BUF_SIZE,
    BL_COMMAND_DATA, BL_CONTROL_STATUS, BL_CTRL_RHARD, BL_CTRL_RINT, BL_CTRL_RSBUS,
    BL_CTRL_RSOFT, BL_GEOMETRY, BL_GEOM_XLATEN, BL_HOST_SCSI_ID, BL_INTERRUPT, BL_INTR_CMDC,
    BL_INTR_IMBL, BL_INTR_INTV, BL_INTR_OMBR, BL_OPCODE_IDLE, BL_REPLY_BUF_SIZE,
    BL_RESET_DURATION, BL_STAT_CMDINV, BL_STAT_DACT, BL_STAT_DIRRDY, BL_STAT_HARDY,
    BL_STAT_INREQ, ISA_CODE_DISABLED,
};
use crate::scsi::bus::SCSI_MAX_TARGETS;
use util::clock::get_current_time;
use util::num_ops::{read_u24_be, write_u24_be};

pub const CMD_TEST_CMDC_INTERRUPT: u8 = 0x00;
pub const CMD_INIT_MBX: u8 = 0x01;
pub const CMD_EXECUTE_MBX: u8 = 0x02;
pub const CMD_EXECUTE_BIOS: u8 = 0x03;
pub const CMD_INQUIRE_BOARD_ID: u8 = 0x04;
pub const CMD_ENABLE_OMBR_INT: u8 = 0x05;
pub const CMD_SET_SELECTION_TIMEOUT: u8 = 0x06;
pub const CMD_SET_PREEMPT_TIME_ON_BUS: u8 = 0x07;
pub const CMD_SET_TIME_OFF_BUS: u8 = 0x08;
pub const CMD_SET_BUS_TRANSFER_RATE: u8 = 0x09;
pub const CMD_INQUIRE_DEVICES_0_7: u8 = 0x0a;
pub const CMD_INQUIRE_CONFIGURATION: u8 = 0x0b;
pub const CMD_INQUIRE_SETUP_INFO: u8 = 0x0d;
pub const CMD_WRITE_BUSMASTER_FIFO: u8 = 0x1c;
pub const CMD_READ_BUSMASTER_FIFO: u8 = 0x1d;
pub const CMD_ECHO: u8 = 0x1f;
pub const CMD_SET_ADAPTER_OPTIONS: u8 = 0x21;
pub const CMD_INQUIRE_DEVICES_8_15: u8 = 0x23;
pub const CMD_INQUIRE_TARGET_DEVICES: u8 = 0x24;
pub const CMD_DISABLE_INTERRUPT: u8 = 0x25;
pub const CMD_EXT_BIOS_INFO: u8 = 0x28;
pub const CMD_UNLOCK_MAILBOX: u8 = 0x29;
pub const CMD_INIT_EXTENDED_MBX: u8 = 0x81;
pub const CMD_EXECUTE_SCSI: u8 = 0x83;
pub const CMD_INQUIRE_FW_3RD_LETTER: u8 = 0x84;
pub const CMD_INQUIRE_FW_LETTER: u8 = 0x85;
pub const CMD_INQUIRE_PCI_INFO: u8 = 0x86;
pub const CMD_INQUIRE_MODEL_NUMBER: u8 = 0x8b;
pub const CMD_INQUIRE_SYNC_PERIOD: u8 = 0x8c;
pub const CMD_INQUIRE_EXT_SETUP_INFO: u8 = 0x8d;
pub const CMD_ENABLE_STRICT_ROUND_ROBIN: u8 = 0x8f;
pub const CMD_FETCH_LOCAL_RAM: u8 = 0x91;
pub const CMD_MODIFY_IO_ADDRESS: u8 = 0x95;
pub const CMD_SET_CCB_FORMAT: u8 = 0x96;

/// Fixed part of the EXECUTE_SCSI parameters, the CDB length is its last byte.
const ESCMD_FIXED_PARAMS: u8 = 12;

/// AutoSCSI fields inside the local RAM, relative to `BL_AUTOSCSI_OFFSET`.
const AUTOSCSI_INTR_FLAGS: usize = 10;
const AUTOSCSI_DMA_RATE: usize = 13;
const AUTOSCSI_SCSI_ID: usize = 14;
const AUTOSCSI_PARITY: usize = 15;
const AUTOSCSI_BUS_ON_DELAY: usize = 16;
const AUTOSCSI_BUS_OFF_DELAY: usize = 17;
const AUTOSCSI_TRANSLATION: usize = 18;
const AUTOSCSI_MASKS: [usize; 6] = [19, 21, 23, 25, 27, 34];
const AUTOSCSI_PORT_FLAGS: usize = 33;
const AUTOSCSI_OMBR_ENABLE: usize = 40;

/// Chip FIFO window copied by the busmaster FIFO commands.
const FIFO_LEN: usize = 64;

const AHA_SIGNATURE: &[u8; 4] = b"ADAP";
const MODEL_NAME: &[u8] = b"958D \0";

impl BusLogicCore {
    fn param_count(&self, opcode: u8) -> u8 {
        let aha = self.model.is_aha();
        match opcode {
            CMD_TEST_CMDC_INTERRUPT
            | CMD_INQUIRE_FW_LETTER
            | CMD_INQUIRE_BOARD_ID
            | CMD_INQUIRE_FW_3RD_LETTER
            | CMD_INQUIRE_PCI_INFO
            | CMD_INQUIRE_CONFIGURATION
            | CMD_INQUIRE_DEVICES_0_7
            | CMD_INQUIRE_DEVICES_8_15
            | CMD_INQUIRE_TARGET_DEVICES => 0,
            CMD_MODIFY_IO_ADDRESS
            | CMD_INQUIRE_EXT_SETUP_INFO
            | CMD_DISABLE_INTERRUPT
            | CMD_INQUIRE_MODEL_NUMBER => {
                if aha {
                    0
                } else {
                    1
                }
            }
            CMD_INQUIRE_SETUP_INFO
            | CMD_ENABLE_STRICT_ROUND_ROBIN
            | CMD_SET_CCB_FORMAT
            | CMD_INQUIRE_SYNC_PERIOD
            | CMD_ECHO
            | CMD_ENABLE_OMBR_INT
            | CMD_SET_PREEMPT_TIME_ON_BUS
            | CMD_SET_TIME_OFF_BUS
            | CMD_SET_BUS_TRANSFER_RATE => 1,
            CMD_FETCH_LOCAL_RAM => 2,
            CMD_WRITE_BUSMASTER_FIFO | CMD_READ_BUSMASTER_FIFO => 3,
            CMD_SET_SELECTION_TIMEOUT | CMD_INIT_MBX => 4,
            CMD_INIT_EXTENDED_MBX => {
                if aha {
                    0
                } else {
                    5
                }
            }
            // Length byte first, the rest is asked for once it is known.
            CMD_SET_ADAPTER_OPTIONS => 1,
            CMD_EXECUTE_SCSI => ESCMD_FIXED_PARAMS,
            _ => 0,
        }
    }

    pub(super) fn register_read(&self, reg: u64) -> u8 {
        let mut s = self.state.lock().unwrap();
        match reg {
            BL_CONTROL_STATUS => {
                let mut value = s.status;
                // A guest hard reset ends once the status has been polled.
                if s.status & BL_STAT_DACT != 0 {
                    s.status &= !BL_STAT_DACT;
                    s.status |= BL_STAT_HARDY;
                    let now = get_current_time();
                    let expired = s
                        .reset_time
                        .map_or(true, |t| now.saturating_duration_since(t) > BL_RESET_DURATION);
                    if expired {
                        value = s.status;
                        s.reset_time = None;
                    }
                }
                value
            }
            BL_COMMAND_DATA => {
                let value = if s.use_local_ram {
                    s.local_ram[s.reply_idx as usize]
                } else if (s.reply_idx as usize) < BL_REPLY_BUF_SIZE {
                    s.reply[s.reply_idx as usize]
                } else {
                    // Real adapters pad short replies with zeroes.
                    0
                };
                if s.reply_left != 0 {
                    s.reply_idx = s.reply_idx.wrapping_add(1);
                    s.reply_left -= 1;
                    if s.reply_left == 0 {
                        let quiet = s.opcode == CMD_FETCH_LOCAL_RAM;
                        self.command_complete(&mut s, quiet, quiet);
                    }
                }
                value
            }
            BL_INTERRUPT => s.interrupt,
            BL_GEOMETRY => {
                if self.model.is_aha() {
                    let off = s.aha_sig_idx & 3;
                    s.aha_sig_idx = (off + 1) & 3;
                    AHA_SIGNATURE[off as usize]
                } else {
                    s.geometry
                }
            }
            _ => 0xff,
        }
    }

    pub(super) fn register_write(&self, reg: u64, value: u8) {
        match reg {
            BL_CONTROL_STATUS => {
                let mut s = self.state.lock().unwrap();
                if value & (BL_CTRL_RHARD | BL_CTRL_RSOFT) != 0 {
                    let hard = value & BL_CTRL_RHARD != 0;
                    info!("{}: {} reset", self.id, if hard { "hard" } else { "soft" });
                    self.initiate_reset(&mut s, hard);
                    return;
                }
                if value & BL_CTRL_RINT != 0 {
                    self.clear_interrupt(&mut s);
                }
                if value & BL_CTRL_RSBUS != 0 {
                    drop(s);
                    debug!("{}: SCSI bus reset", self.id);
                    self.bus.notify_reset();
                }
            }
            BL_COMMAND_DATA => self.command_write(value),
            BL_INTERRUPT => {
                if !self.model.is_aha() {
                    self.state.lock().unwrap().interrupt = value;
                }
            }
            BL_GEOMETRY => {
                if !self.model.is_aha() {
                    self.state.lock().unwrap().geometry = value;
                }
            }
            _ => {}
        }
    }

    fn command_write(&self, value: u8) {
        let mut s = self.state.lock().unwrap();
        if value == CMD_EXECUTE_MBX && s.opcode == BL_OPCODE_IDLE {
            // Without mailboxes there is nothing to execute.
            if s.mbx.count != 0 {
                self.mailboxes_ready.fetch_add(1, Ordering::SeqCst);
                self.kick.notify();
            }
            return;
        }

        if s.opcode == BL_OPCODE_IDLE {
            s.opcode = value;
            s.param_idx = 0;
            s.status &= !(BL_STAT_HARDY | BL_STAT_CMDINV);
            s.params_left = self.param_count(value);
            debug!("{}: command {:#x}, {} parameter bytes", self.id, value, s.params_left);
        } else if s.params_left != 0 {
            let idx = s.param_idx as usize;
            s.cmd_buf[idx] = value;
            s.param_idx += 1;
            s.params_left -= 1;
        }

        if s.params_left == 0 {
            self.process_command(&mut s);
        }
    }

    fn set_reply(s: &mut BusLogicState, data: &[u8]) {
        s.reply[..data.len()].copy_from_slice(data);
        s.reply_left = data.len() as u8;
    }

    fn command_invalid(&self, s: &mut BusLogicState) {
        debug!("{}: command {:#x} rejected", self.id, s.opcode);
        s.reply_left = 0;
        s.status |= BL_STAT_CMDINV;
    }

    fn process_command(&self, s: &mut BusLogicState) {
        let mut suppress_irq = false;
        let mut suppress_cmdc = false;
        let mut complete = true;
        let aha = self.model.is_aha();

        s.reply_left = 0;
        match s.opcode {
            CMD_TEST_CMDC_INTERRUPT | CMD_SET_SELECTION_TIMEOUT => {}
            CMD_INQUIRE_PCI_INFO => {
                let isa = if s.isa_code < ISA_CODE_DISABLED {
                    s.isa_code
                } else {
                    0xff
                };
                // Both bytes terminated, JP1 closed, information valid.
                let reply = [isa, self.irq_line() as u8, 0x93, 0];
                Self::set_reply(s, &reply);
            }
            CMD_MODIFY_IO_ADDRESS => {
                let code = s.cmd_buf[0];
                if code < 8 {
                    self.register_isa_range(s, code);
                    suppress_irq = true;
                    suppress_cmdc = true;
                } else {
                    warn!("{}: ISA port code {:#x} is invalid", self.id, code);
                    self.command_invalid(s);
                }
            }
            CMD_INQUIRE_BOARD_ID => {
                // '0' as special option byte lets Adaptec drivers claim the adapter.
                let special = if aha { b'0' } else { b'A' };
                Self::set_reply(s, &[b'A', special, b'5', b'0']);
            }
            CMD_INQUIRE_FW_3RD_LETTER => {
                if aha {
                    self.command_invalid(s);
                } else {
                    Self::set_reply(s, b"7");
                }
            }
            CMD_INQUIRE_FW_LETTER => Self::set_reply(s, b"B"),
            CMD_SET_ADAPTER_OPTIONS => {
                if s.param_idx == 1 {
                    s.params_left = s.cmd_buf[0].min(BL_CMD_BUF_SIZE as u8 - 1);
                }
            }
            CMD_EXECUTE_SCSI => {
                if s.param_idx == ESCMD_FIXED_PARAMS {
                    s.params_left = s.cmd_buf[11].min(BL_CMD_BUF_SIZE as u8 - ESCMD_FIXED_PARAMS);
                } else {
                    if !self.bios_pending.swap(true, Ordering::SeqCst) {
                        self.kick.notify();
                    }
                    complete = false;
                }
            }
            CMD_INQUIRE_MODEL_NUMBER => {
                let len = s.cmd_buf[0] as usize;
                if aha || len > BL_REPLY_BUF_SIZE {
                    self.command_invalid(s);
                } else {
                    let mut reply = [0_u8; BL_REPLY_BUF_SIZE];
                    let n = len.min(MODEL_NAME.len());
                    reply[..n].copy_from_slice(&MODEL_NAME[..n]);
                    Self::set_reply(s, &reply[..len]);
                }
            }
            CMD_INQUIRE_CONFIGURATION => {
                let dma = match self.dma {
                    5 => 1 << 5,
                    7 => 1 << 7,
                    _ => 1 << 6,
                };
                let irq = match self.irq_line() {
                    9 => 1 << 0,
                    10 => 1 << 1,
                    11 => 1 << 2,
                    12 => 1 << 3,
                    14 => 1 << 5,
                    15 => 1 << 6,
                    other => {
                        warn!("{}: irq {} cannot be represented as ISA", self.id, other);
                        0
                    }
                };
                Self::set_reply(s, &[dma, irq, BL_HOST_SCSI_ID]);
            }
            CMD_INQUIRE_EXT_SETUP_INFO => {
                if aha {
                    self.command_invalid(s);
                } else {
                    let mut info = [0_u8; 14];
                    // EISA style bus.
                    info[0] = b'E';
                    LittleEndian::write_u16(&mut info[2..4], 8192);
                    info[4] = s.mbx.count as u8;
                    LittleEndian::write_u32(&mut info[5..9], s.mbx.out_base as u32);
                    info[9] = 1 << 6;
                    info[10..13].copy_from_slice(b"07B");
                    // Wide and ultra SCSI.
                    info[13] = 1 | 1 << 3;
                    let len = s.cmd_buf[0];
                    Self::set_padded_reply(s, &info, len);
                }
            }
            CMD_INQUIRE_SETUP_INFO => {
                let mut info = [0_u8; 34];
                // Synchronous initiation and parity checking.
                info[0] = 0x03;
                info[4] = s.mbx.count as u8;
                write_u24_be(&mut info[5..8], s.mbx.out_base as u32);
                if !aha {
                    info[17] = b'B';
                    info[18] = b'D';
                }
                info[19] = b'F';
                let len = s.cmd_buf[0];
                Self::set_padded_reply(s, &info, len);
            }
            CMD_FETCH_LOCAL_RAM => {
                s.reply_idx = s.cmd_buf[0];
                s.reply_left = s.cmd_buf[1];
                s.use_local_ram = true;
            }
            CMD_INIT_MBX => {
                let count = s.cmd_buf[0] as u32;
                if count == 0 {
                    self.command_invalid(s);
                } else {
                    let base = read_u24_be(&s.cmd_buf[1..4]) as u64;
                    self.init_mailboxes(s, count, base, true);
                }
            }
            CMD_INIT_EXTENDED_MBX => {
                let count = s.cmd_buf[0] as u32;
                if aha || count == 0 {
                    self.command_invalid(s);
                } else {
                    let base = LittleEndian::read_u32(&s.cmd_buf[1..5]) as u64;
                    self.init_mailboxes(s, count, base, false);
                }
            }
            CMD_ENABLE_STRICT_ROUND_ROBIN => match s.cmd_buf[0] {
                0 => s.strict_round_robin = false,
                1 => s.strict_round_robin = true,
                _ => self.command_invalid(s),
            },
            CMD_SET_CCB_FORMAT => match s.cmd_buf[0] {
                0 => s.extended_lun = false,
                1 => s.extended_lun = true,
                _ => self.command_invalid(s),
            },
            CMD_INQUIRE_DEVICES_0_7 | CMD_INQUIRE_DEVICES_8_15 => {
                let first = if s.opcode == CMD_INQUIRE_DEVICES_0_7 { 0 } else { 8 };
                let mut reply = [0_u8; 8];
                for (i, byte) in reply.iter_mut().enumerate() {
                    *byte = self.bus.is_present((first + i) as u8) as u8;
                }
                if first == 0 {
                    // The adapter itself sits at id 7.
                    reply[BL_HOST_SCSI_ID as usize] = 0;
                }
                Self::set_reply(s, &reply);
            }
            CMD_INQUIRE_TARGET_DEVICES => {
                let mask = (self.bus.presence_mask() & ((1 << SCSI_MAX_TARGETS) - 1)) as u16;
                Self::set_reply(s, &mask.to_le_bytes());
            }
            CMD_INQUIRE_SYNC_PERIOD => {
                let len = s.cmd_buf[0] as usize;
                if len > BL_REPLY_BUF_SIZE {
                    self.command_invalid(s);
                } else {
                    Self::set_reply(s, &[0_u8; BL_REPLY_BUF_SIZE][..len]);
                }
            }
            CMD_DISABLE_INTERRUPT => {
                if aha {
                    self.command_invalid(s);
                } else {
                    s.irq_enabled = s.cmd_buf[0] != 0;
                    // CMDC is still latched, the line just stays quiet.
                    suppress_irq = true;
                }
            }
            CMD_ECHO => {
                let byte = s.cmd_buf[0];
                Self::set_reply(s, &[byte]);
            }
            CMD_ENABLE_OMBR_INT => {
                let enable = s.cmd_buf[0];
                if enable > 1 {
                    self.command_invalid(s);
                } else {
                    s.local_ram[BL_AUTOSCSI_OFFSET + AUTOSCSI_OMBR_ENABLE] = enable;
                    suppress_irq = true;
                    suppress_cmdc = true;
                }
            }
            CMD_SET_PREEMPT_TIME_ON_BUS => {
                s.local_ram[BL_AUTOSCSI_OFFSET + AUTOSCSI_BUS_ON_DELAY] = s.cmd_buf[0];
            }
            CMD_SET_TIME_OFF_BUS => {
                s.local_ram[BL_AUTOSCSI_OFFSET + AUTOSCSI_BUS_OFF_DELAY] = s.cmd_buf[0];
            }
            CMD_SET_BUS_TRANSFER_RATE => {
                s.local_ram[BL_AUTOSCSI_OFFSET + AUTOSCSI_DMA_RATE] = s.cmd_buf[0];
            }
            CMD_WRITE_BUSMASTER_FIFO => {
                let addr = read_u24_be(&s.cmd_buf[0..3]) as u64;
                let mut fifo = [0_u8; FIFO_LEN];
                if self.read_guest(addr, &mut fifo) {
                    s.local_ram[BL_AUTOSCSI_OFFSET..BL_AUTOSCSI_OFFSET + FIFO_LEN]
                        .copy_from_slice(&fifo);
                }
            }
            CMD_READ_BUSMASTER_FIFO => {
                let addr = read_u24_be(&s.cmd_buf[0..3]) as u64;
                self.write_guest(
                    addr,
                    &s.local_ram[BL_AUTOSCSI_OFFSET..BL_AUTOSCSI_OFFSET + FIFO_LEN],
                );
            }
            // Adaptec 154xC extensions, not offered by a 154xB.
            CMD_EXT_BIOS_INFO | CMD_UNLOCK_MAILBOX => self.command_invalid(s),
            other => {
                warn!("{}: unknown command {:#x}", self.id, other);
                self.command_invalid(s);
            }
        }

        if s.params_left as usize + s.param_idx as usize > BL_CMD_BUF_SIZE {
            warn!("{}: parameter length {} too large", self.id, s.params_left);
            s.reply_left = 0;
            s.params_left = 0;
            s.status |= BL_STAT_CMDINV;
        }

        if complete {
            if s.reply_left != 0 {
                s.status |= BL_STAT_DIRRDY;
            } else if s.params_left == 0 {
                self.command_complete(s, suppress_irq, suppress_cmdc);
            }
        }
    }

    /// Reply with `len` bytes of `info`, zero padded up to the reply buffer.
    fn set_padded_reply(s: &mut BusLogicState, info: &[u8], len: u8) {
        s.reply.fill(0);
        s.reply[..info.len()].copy_from_slice(info);
        s.reply_left = len;
    }

    fn init_mailboxes(&self, s: &mut BusLogicState, count: u32, base: u64, legacy: bool) {
        s.mbx.legacy = legacy;
        s.mbx.count = count;
        s.mbx.out_cursor = 0;
        s.mbx.in_cursor = 0;
        s.mbx.out_base = base;
        // Incoming entries follow the last outgoing one.
        s.mbx.in_base = base + count as u64 * s.mbx.entry_size();
        s.status &= !BL_STAT_INREQ;
        info!(
            "{}: {} {}-bit mailboxes at {:#x}",
            self.id,
            count,
            if legacy { 24 } else { 32 },
            base
        );
    }

    pub(super) fn command_complete(&self, s: &mut BusLogicState, suppress_irq: bool, suppress_cmdc: bool) {
        s.use_local_ram = false;
        s.status |= BL_STAT_HARDY;
        s.status &= !BL_STAT_DIRRDY;
        s.reply_idx = 0;
        if !suppress_cmdc {
            self.set_interrupt(s, suppress_irq, BL_INTR_CMDC);
        }
        s.opcode = BL_OPCODE_IDLE;
        s.param_idx = 0;
    }

    /// Latch `cause`. A command completion replaces a latched mailbox cause,
    /// anything arriving behind a latched completion waits in `pending`.
    pub(super) fn set_interrupt(&self, s: &mut BusLogicState, suppress_irq: bool, cause: u8) {
        let cmdc_latched = s.interrupt & BL_INTR_CMDC != 0;
        if cause & BL_INTR_CMDC != 0 {
            if cmdc_latched {
                s.pending |= cause;
            } else {
                if s.interrupt & BL_INTR_INTV != 0 {
                    debug!("{}: CMDC overrides interrupt {:#x}", self.id, s.interrupt);
                }
                s.interrupt = cause | BL_INTR_INTV;
            }
        } else if cause & (BL_INTR_IMBL | BL_INTR_OMBR) != 0 {
            if cmdc_latched {
                s.pending |= cause;
            } else {
                s.interrupt |= cause | BL_INTR_INTV;
            }
        } else {
            warn!("{}: unexpected interrupt cause {:#x}", self.id, cause);
            return;
        }

        if s.irq_enabled && !suppress_irq {
            self.set_irq(true);
        }
    }

    pub(super) fn clear_interrupt(&self, s: &mut BusLogicState) {
        s.interrupt = 0;
        s.status &= !BL_STAT_CMDINV;
        self.set_irq(false);
        if s.pending != 0 {
            let pending = s.pending;
            s.pending = 0;
            self.set_interrupt(s, false, pending);
        }
    }

    fn initiate_reset(&self, s: &mut BusLogicState, hard: bool) {
        self.hw_reset(s, false);
        if hard {
            s.status |= BL_STAT_DACT;
            s.status &= !BL_STAT_HARDY;
            s.reset_time = Some(get_current_time());
        }
    }

    /// Put the registers in power-on state. Requests already handed to the
    /// media are left alone.
    pub(super) fn hw_reset(&self, s: &mut BusLogicState, reset_io: bool) {
        s.status = BL_STAT_HARDY | BL_STAT_INREQ;
        s.geometry = BL_GEOM_XLATEN;
        s.opcode = BL_OPCODE_IDLE;
        s.param_idx = 0;
        s.params_left = 0;
        s.reply_idx = 0;
        s.reply_left = 0;
        s.use_local_ram = false;
        s.irq_enabled = true;
        s.strict_round_robin = false;
        s.extended_lun = false;
        s.mbx = Default::default();
        s.aha_sig_idx = 0;

        s.pending = 0;
        self.clear_interrupt(s);

        if reset_io {
            self.register_isa_range(s, self.default_isa_code);
        }
        self.init_local_ram(s);
    }

    fn init_local_ram(&self, s: &mut BusLogicState) {
        let strict = s.strict_round_robin;
        s.local_ram.fill(0);
        let auto = &mut s.local_ram[BL_AUTOSCSI_OFFSET..];
        // Level sensitive interrupt.
        auto[AUTOSCSI_INTR_FLAGS] |= 1 << 2;
        auto[AUTOSCSI_PARITY] |= 1 << 1;
        auto[AUTOSCSI_TRANSLATION] |= 1 << 2;
        for off in AUTOSCSI_MASKS {
            LittleEndian::write_u16(&mut auto[off..off + 2], u16::MAX);
        }
        if strict {
            auto[AUTOSCSI_PORT_FLAGS] |= 1 << 4;
        }
        let port_code = if self.default_isa_code == ISA_CODE_DISABLED {
            2
        } else {
            self.default_isa_code
        };
        auto[AUTOSCSI_PORT_FLAGS] |= (port_code & 0x3) << 2;
        auto[AUTOSCSI_SCSI_ID] = BL_HOST_SCSI_ID;
    }
}
