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

use log::{debug, info, warn};

use super::message::MptReply;
use super::{
    DoorbellState, IocState, LsiLogicCore, LsiLogicState, LSI_DB_FN_HANDSHAKE,
    LSI_DB_FN_IOC_MSG_UNIT_RESET, LSI_DB_FN_IO_UNIT_RESET, LSI_DB_FN_REPLY_FRAME_REMOVAL,
    LSI_DEVICES_PER_BUS, LSI_DIAG_DRWE, LSI_DIAG_RESET_ADAPTER, LSI_DIAG_RW_ENABLE,
    LSI_DIAG_UNLOCK_KEY, LSI_FAULT_INSUFFICIENT_RESOURCES, LSI_INTR_DOORBELL_STS,
    LSI_INTR_REPLY, LSI_INTR_SYSTEM_DOORBELL, LSI_MASK_DOORBELL, LSI_MASK_IRQ_ROUTING,
    LSI_MASK_REPLY, LSI_MASK_WRITABLE, LSI_MSG_MAX_DWORDS, LSI_REG_DIAG_RW_ADDRESS,
    LSI_REG_DIAG_RW_DATA, LSI_REG_DOORBELL, LSI_REG_HOST_DIAGNOSTIC, LSI_REG_HOST_INTR_MASK,
    LSI_REG_HOST_INTR_STATUS, LSI_REG_REPLY_QUEUE, LSI_REG_REQUEST_QUEUE,
    LSI_REG_WRITE_SEQUENCE, LSI_REPLY_FRAME_SIZE_DEFAULT,
};

/// Reply frames are posted as `bit31 | address >> 1`.
const ADDRESS_REPLY_FLAG: u32 = 1 << 31;
const REPLY_QUEUE_EMPTY: u32 = 0xffff_ffff;

impl LsiLogicCore {
    /// Recompute the interrupt line from status and mask.
    pub(super) fn update_irq(&self, s: &LsiLogicState) {
        let pending = s.intr_status & !LSI_INTR_DOORBELL_STS;
        let masked = s.intr_mask & !LSI_MASK_IRQ_ROUTING;
        self.set_irq(pending & !masked != 0);
    }

    pub(super) fn set_intr(&self, s: &mut LsiLogicState, bits: u32) {
        s.intr_status |= bits;
        self.update_irq(s);
    }

    pub(super) fn clear_intr(&self, s: &mut LsiLogicState, bits: u32) {
        s.intr_status &= !bits;
        self.update_irq(s);
    }

    /// Enter the fault state. The first fault code sticks.
    pub(super) fn set_fault(&self, s: &mut LsiLogicState, code: u16) {
        if s.ioc_state == IocState::Fault {
            warn!("{}: fault {:#x} while already faulted", self.id, code);
            return;
        }
        warn!("{}: IOC fault {:#x}", self.id, code);
        s.fault_code = code;
        s.ioc_state = IocState::Fault;
    }

    fn reset_queues(&self, s: &mut LsiLogicState) {
        s.reply_free.clear();
        s.reply_post.clear();
        s.request.clear();
    }

    /// Power-on state of the IOC. Requests already handed to the media are
    /// left alone.
    pub(super) fn hard_reset(&self, s: &mut LsiLogicState) {
        s.ioc_state = IocState::Reset;
        s.doorbell = DoorbellState::Idle;
        s.intr_mask |= LSI_MASK_DOORBELL | LSI_MASK_REPLY;
        s.intr_status = 0;
        self.update_irq(s);
        self.reset_queues(s);

        s.fault_code = 0;
        s.msg_len = 0;
        s.msg_idx = 0;
        s.reply_words = 0;
        s.reply_idx = 0;
        s.diag_seq_idx = 0;
        s.diag_enabled = false;
        s.diag_rw_enabled = false;
        s.diag_addr = 0;
        s.max_devices = LSI_DEVICES_PER_BUS;
        s.max_buses = 1;
        s.reply_frame_size = LSI_REPLY_FRAME_SIZE_DEFAULT;
        s.host_mfa_high = 0;
        s.sense_high = 0;
        s.ioc_state = IocState::Ready;
    }

    /// Post a context reply carrying `context`.
    pub(super) fn finish_context_reply(&self, s: &mut LsiLogicState, context: u32) {
        if !s.reply_post.push(context) {
            self.set_fault(s, LSI_FAULT_INSUFFICIENT_RESOURCES);
            return;
        }
        self.set_intr(s, LSI_INTR_REPLY);
    }

    /// Return `reply` through the doorbell when a handshake is running,
    /// otherwise through a free reply frame. `force_fifo` takes the frame
    /// path even during a handshake and ends it.
    pub(super) fn finish_address_reply(&self, s: &mut LsiLogicState, reply: &MptReply, force_fifo: bool) {
        if s.doorbell != DoorbellState::Idle && !force_fifo {
            s.reply = reply.buf;
            s.reply_words = reply.msg_len() as usize * 2;
            s.reply_idx = 0;
            self.set_intr(s, LSI_INTR_SYSTEM_DOORBELL);
            return;
        }

        let Some(frame_low) = s.reply_free.pop() else {
            self.set_fault(s, LSI_FAULT_INSUFFICIENT_RESOURCES);
            return;
        };
        let frame = s.frame_addr(frame_low);
        let len = (s.reply_frame_size as usize).min(reply.buf.len());
        self.write_guest(frame, &reply.buf[..len]);

        if !s.reply_post.push(ADDRESS_REPLY_FLAG | (frame_low >> 1)) {
            self.set_fault(s, LSI_FAULT_INSUFFICIENT_RESOURCES);
            return;
        }
        if force_fifo {
            s.doorbell = DoorbellState::Idle;
            self.set_intr(s, LSI_INTR_SYSTEM_DOORBELL);
        }
        self.set_intr(s, LSI_INTR_REPLY);
    }

    fn doorbell_read(&self, s: &mut LsiLogicState) -> u32 {
        let mut value = s.ioc_state.code() << 28
            | ((s.doorbell != DoorbellState::Idle) as u32) << 27
            | (s.who_init as u32 & 0x7) << 24;
        match s.doorbell {
            DoorbellState::Idle => value |= s.fault_code as u32,
            DoorbellState::Handshake => {
                if s.reply_idx < s.reply_words {
                    value |= MptReply::word_of(&s.reply, s.reply_idx) as u32;
                    s.reply_idx += 1;
                }
                // Reads past the reply still ring the doorbell.
                self.set_intr(s, LSI_INTR_SYSTEM_DOORBELL);
            }
            DoorbellState::FrameCountLow => {
                value |= s.reply_free.len() & 0xffff;
                s.doorbell = DoorbellState::FrameCountHigh;
                self.set_intr(s, LSI_INTR_SYSTEM_DOORBELL);
            }
            DoorbellState::FrameCountHigh => {
                value |= s.reply_free.len() >> 16;
                s.doorbell = DoorbellState::NextFrameLow;
                self.set_intr(s, LSI_INTR_SYSTEM_DOORBELL);
            }
            DoorbellState::NextFrameLow => {
                if let Some(frame) = s.reply_free.peek() {
                    value |= frame & 0xffff;
                    s.doorbell = DoorbellState::NextFrameHigh;
                    self.set_intr(s, LSI_INTR_SYSTEM_DOORBELL);
                }
            }
            DoorbellState::NextFrameHigh => {
                if let Some(frame) = s.reply_free.pop() {
                    value |= frame >> 16;
                }
                s.doorbell = DoorbellState::NextFrameLow;
                self.set_intr(s, LSI_INTR_SYSTEM_DOORBELL);
            }
        }
        value
    }

    fn doorbell_write(&self, s: &mut LsiLogicState, value: u32) {
        match s.doorbell {
            DoorbellState::Idle => {
                let function = (value >> 24) as u8;
                match function {
                    LSI_DB_FN_IOC_MSG_UNIT_RESET | LSI_DB_FN_IO_UNIT_RESET => {
                        s.ioc_state = IocState::Reset;
                        s.intr_status = 0;
                        self.update_irq(s);
                        self.reset_queues(s);
                        if function == LSI_DB_FN_IOC_MSG_UNIT_RESET {
                            s.ioc_state = IocState::Ready;
                        }
                        info!("{}: doorbell reset {:#x}", self.id, function);
                    }
                    LSI_DB_FN_HANDSHAKE => {
                        let len = ((value >> 16) & 0xff) as usize;
                        if len > LSI_MSG_MAX_DWORDS {
                            warn!("{}: handshake of {} dwords does not fit", self.id, len);
                            return;
                        }
                        s.msg_len = len;
                        s.msg_idx = 0;
                        s.reply_words = 0;
                        s.reply_idx = 0;
                        s.doorbell = DoorbellState::Handshake;
                        self.set_intr(s, LSI_INTR_SYSTEM_DOORBELL);
                    }
                    LSI_DB_FN_REPLY_FRAME_REMOVAL => {
                        s.doorbell = DoorbellState::FrameCountLow;
                        self.set_intr(s, LSI_INTR_SYSTEM_DOORBELL);
                    }
                    other => warn!("{}: unknown doorbell function {:#x}", self.id, other),
                }
            }
            DoorbellState::Handshake => {
                if s.msg_idx >= s.msg_len {
                    warn!("{}: handshake dword beyond message length", self.id);
                    return;
                }
                let idx = s.msg_idx;
                s.msg[idx] = value;
                s.msg_idx += 1;
                if s.msg_idx == s.msg_len {
                    let frame: Vec<u8> = s.msg[..s.msg_len]
                        .iter()
                        .flat_map(|d| d.to_le_bytes())
                        .collect();
                    self.process_message(s, &frame);
                }
            }
            _ => debug!("{}: doorbell write {:#x} during frame removal", self.id, value),
        }
    }

    /// Acknowledge SYSTEM_DOORBELL and step the doorbell function.
    fn intr_status_write(&self, s: &mut LsiLogicState) {
        s.intr_status &= !LSI_INTR_SYSTEM_DOORBELL;
        match s.doorbell {
            DoorbellState::Handshake if s.msg_idx == s.msg_len => {
                if s.reply_idx == s.reply_words {
                    s.doorbell = DoorbellState::Idle;
                }
                s.intr_status |= LSI_INTR_SYSTEM_DOORBELL;
            }
            DoorbellState::Idle | DoorbellState::Handshake => {}
            state => {
                if s.reply_free.is_empty() && state == DoorbellState::NextFrameLow {
                    s.doorbell = DoorbellState::Idle;
                }
                s.intr_status |= LSI_INTR_SYSTEM_DOORBELL;
            }
        }
        self.update_irq(s);
    }

    fn write_sequence(&self, s: &mut LsiLogicState, value: u32) {
        if s.diag_enabled {
            s.diag_enabled = false;
            s.diag_rw_enabled = false;
            s.diag_seq_idx = 0;
        } else if s.diag_seq_idx < LSI_DIAG_UNLOCK_KEY.len()
            && value & 0xf == LSI_DIAG_UNLOCK_KEY[s.diag_seq_idx]
        {
            s.diag_seq_idx += 1;
            if s.diag_seq_idx == LSI_DIAG_UNLOCK_KEY.len() {
                s.diag_enabled = true;
                debug!("{}: diagnostic access unlocked", self.id);
            }
        } else {
            s.diag_seq_idx = 0;
        }
    }

    pub(super) fn register_read(&self, offset: u64) -> u32 {
        let mut s = self.state.lock().unwrap();
        match offset {
            LSI_REG_DOORBELL => self.doorbell_read(&mut s),
            LSI_REG_REPLY_QUEUE => match s.reply_post.pop() {
                Some(entry) => entry,
                None => {
                    self.clear_intr(&mut s, LSI_INTR_REPLY);
                    REPLY_QUEUE_EMPTY
                }
            },
            LSI_REG_HOST_INTR_STATUS => s.intr_status,
            LSI_REG_HOST_INTR_MASK => s.intr_mask,
            LSI_REG_HOST_DIAGNOSTIC => {
                let mut value = 0;
                if s.diag_enabled {
                    value |= LSI_DIAG_DRWE;
                }
                if s.diag_rw_enabled {
                    value |= LSI_DIAG_RW_ENABLE;
                }
                value
            }
            LSI_REG_DIAG_RW_DATA if s.diag_rw_enabled => {
                let value = s.diag_read(s.diag_addr);
                s.diag_addr = s.diag_addr.wrapping_add(4);
                value
            }
            LSI_REG_DIAG_RW_ADDRESS if s.diag_rw_enabled => s.diag_addr,
            _ => 0,
        }
    }

    pub(super) fn register_write(&self, offset: u64, value: u32) {
        let mut s = self.state.lock().unwrap();
        match offset {
            LSI_REG_REPLY_QUEUE => {
                if !s.reply_free.push(value) {
                    warn!("{}: reply free FIFO full, frame {:#x} dropped", self.id, value);
                }
            }
            LSI_REG_REQUEST_QUEUE => {
                if !s.request.push(value) {
                    warn!("{}: request FIFO full, frame {:#x} dropped", self.id, value);
                    return;
                }
                drop(s);
                self.kick.notify();
            }
            LSI_REG_DOORBELL => self.doorbell_write(&mut s, value),
            LSI_REG_HOST_INTR_STATUS => self.intr_status_write(&mut s),
            LSI_REG_HOST_INTR_MASK => {
                s.intr_mask = value & LSI_MASK_WRITABLE;
                self.update_irq(&s);
            }
            LSI_REG_WRITE_SEQUENCE => self.write_sequence(&mut s, value),
            LSI_REG_HOST_DIAGNOSTIC if s.diag_enabled => {
                if value & LSI_DIAG_RESET_ADAPTER != 0 {
                    info!("{}: adapter reset through HOST_DIAGNOSTIC", self.id);
                    self.hard_reset(&mut s);
                } else if value & LSI_DIAG_RW_ENABLE != 0 {
                    s.diag_rw_enabled = true;
                }
            }
            LSI_REG_DIAG_RW_DATA if s.diag_rw_enabled => {
                let addr = s.diag_addr;
                if !s.diag_write(addr, value) {
                    warn!("{}: diagnostic memory exhausted at {:#x}", self.id, addr);
                }
                s.diag_addr = addr.wrapping_add(4);
            }
            LSI_REG_DIAG_RW_ADDRESS if s.diag_rw_enabled => s.diag_addr = value & !3,
            _ => debug!("{}: write {:#x} to register {:#x} ignored", self.id, value, offset),
        }
    }
}
