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

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use byteorder::{ByteOrder, LittleEndian};
use clap::Parser;

use crate::libdriver::malloc::GuestAllocator;
use crate::libtest::{wait_until, TestState, TIMEOUT_US};
use devices::scsi::bus::{ScsiBus, SCSI_MAX_TARGETS};
use devices::scsi::buslogic::ccb::{
    MailboxIn, ACTION_ABORT, ACTION_START, CCB_FETCH_SIZE, COMPLETION_FREE, MAILBOX24_SIZE,
    MAILBOX32_SIZE,
};
use devices::scsi::buslogic::command::{CMD_EXECUTE_MBX, CMD_INIT_EXTENDED_MBX, CMD_INIT_MBX};
use devices::scsi::buslogic::{
    BL_COMMAND_DATA, BL_CONTROL_STATUS, BL_CTRL_RHARD, BL_CTRL_RINT, BL_GEOMETRY, BL_INTERRUPT,
    BL_STAT_HARDY, ISA_BASES,
};
use devices::sysbus::SysBusDevOps;
use devices::{BusLogic, BusLogicConfig};
use machine_manager::config::str_slip_to_clap;
use util::num_ops::write_u24_be;

/// Where the PCI models decode their 32 ports.
pub const BL_PCI_IO_BASE: u64 = 0xc000;
pub const TEST_CCB_SIZE: u64 = 64;

/// Outgoing request of the extended (32-bit) CCB layout.
#[derive(Clone, Debug, Default)]
pub struct TestCcb {
    pub opcode: u8,
    pub direction: u8,
    pub target: u8,
    pub lun: u8,
    pub cdb: Vec<u8>,
    pub data_len: u32,
    pub data_ptr: u32,
    pub sense_len: u8,
    pub sense_ptr: u32,
}

impl TestCcb {
    pub fn encode(&self) -> [u8; CCB_FETCH_SIZE] {
        let mut raw = [0_u8; CCB_FETCH_SIZE];
        raw[0] = self.opcode;
        raw[1] = self.direction << 3;
        raw[2] = self.cdb.len() as u8;
        raw[3] = self.sense_len;
        LittleEndian::write_u32(&mut raw[4..8], self.data_len);
        LittleEndian::write_u32(&mut raw[8..12], self.data_ptr);
        raw[16] = self.target;
        raw[17] = self.lun;
        raw[18..18 + self.cdb.len()].copy_from_slice(&self.cdb);
        LittleEndian::write_u32(&mut raw[36..40], self.sense_ptr);
        raw
    }

    /// 24-bit layout, sense data lands right behind the CDB.
    pub fn encode_legacy(&self) -> [u8; CCB_FETCH_SIZE] {
        let mut raw = [0_u8; CCB_FETCH_SIZE];
        raw[0] = self.opcode;
        raw[1] = self.target << 5 | self.direction << 3 | (self.lun & 0x7);
        raw[2] = self.cdb.len() as u8;
        raw[3] = self.sense_len;
        write_u24_be(&mut raw[4..7], self.data_len);
        write_u24_be(&mut raw[7..10], self.data_ptr);
        raw[18..18 + self.cdb.len()].copy_from_slice(&self.cdb);
        raw
    }
}

/// Guest side driver of a BusLogic adapter: register access, the command
/// protocol and the mailbox rings.
pub struct TestBusLogic {
    pub state: Rc<RefCell<TestState>>,
    pub alloc: Rc<RefCell<GuestAllocator>>,
    pub dev: Arc<Mutex<BusLogic>>,
    pub bus: Arc<ScsiBus>,
    pub base: u64,
    pub irq: u32,
    mbx_base: u64,
    mbx_count: u32,
    legacy: bool,
    out_slot: u32,
    in_slot: u32,
}

impl TestBusLogic {
    /// Realize an adapter from a `-device` style argument string.
    pub fn new(
        state: Rc<RefCell<TestState>>,
        alloc: Rc<RefCell<GuestAllocator>>,
        args: &str,
    ) -> Self {
        let config = BusLogicConfig::try_parse_from(str_slip_to_clap(args, true, false)).unwrap();
        let bus = Arc::new(ScsiBus::new(format!("{}.0", config.id), SCSI_MAX_TARGETS));
        let dev = {
            let locked_state = state.borrow();
            BusLogic::new(&config, &locked_state.mem, &bus)
                .unwrap()
                .realize(&locked_state.sysbus, BL_PCI_IO_BASE)
                .unwrap()
        };
        let irq = dev.lock().unwrap().get_sys_resource().irq as u32;
        let base = if config.adapter.is_isa() {
            ISA_BASES[config.isa_port as usize]
        } else {
            BL_PCI_IO_BASE
        };
        TestBusLogic {
            state,
            alloc,
            dev,
            bus,
            base,
            irq,
            mbx_base: 0,
            mbx_count: 0,
            legacy: false,
            out_slot: 0,
            in_slot: 0,
        }
    }

    pub fn status(&self) -> u8 {
        self.state.borrow().inb(self.base + BL_CONTROL_STATUS)
    }

    pub fn interrupt(&self) -> u8 {
        self.state.borrow().inb(self.base + BL_INTERRUPT)
    }

    pub fn geometry(&self) -> u8 {
        self.state.borrow().inb(self.base + BL_GEOMETRY)
    }

    pub fn control(&self, value: u8) {
        self.state.borrow().outb(self.base + BL_CONTROL_STATUS, value);
    }

    pub fn data_out(&self, value: u8) {
        self.state.borrow().outb(self.base + BL_COMMAND_DATA, value);
    }

    pub fn data_in(&self) -> u8 {
        self.state.borrow().inb(self.base + BL_COMMAND_DATA)
    }

    pub fn ack_irq(&self) {
        self.control(BL_CTRL_RINT);
    }

    pub fn irq_level(&self) -> bool {
        self.state.borrow().query_irq(self.irq)
    }

    /// Hard reset, then poll until the adapter reports ready.
    pub fn hard_reset(&mut self) -> bool {
        self.control(BL_CTRL_RHARD);
        self.mbx_count = 0;
        wait_until(TIMEOUT_US, || self.status() & BL_STAT_HARDY != 0)
    }

    /// Send `opcode` with its parameter bytes and collect `reply_len` reply
    /// bytes. The completion interrupt is left for the caller.
    pub fn command(&self, opcode: u8, params: &[u8], reply_len: usize) -> Vec<u8> {
        self.data_out(opcode);
        for p in params {
            self.data_out(*p);
        }
        (0..reply_len).map(|_| self.data_in()).collect()
    }

    fn entry_size(&self) -> u64 {
        if self.legacy {
            MAILBOX24_SIZE
        } else {
            MAILBOX32_SIZE
        }
    }

    /// Allocate both rings and hand them to the adapter.
    pub fn init_mailboxes(&mut self, count: u32, legacy: bool) {
        self.legacy = legacy;
        let size = count as u64 * self.entry_size() * 2;
        let base = {
            let locked_state = self.state.borrow();
            self.alloc
                .borrow_mut()
                .alloc_zeroed(size, |addr, zero| locked_state.memwrite(addr, zero))
        };
        if legacy {
            let mut params = [count as u8, 0, 0, 0];
            write_u24_be(&mut params[1..4], base as u32);
            self.command(CMD_INIT_MBX, &params, 0);
        } else {
            let mut params = [count as u8, 0, 0, 0, 0];
            LittleEndian::write_u32(&mut params[1..5], base as u32);
            self.command(CMD_INIT_EXTENDED_MBX, &params, 0);
        }
        self.ack_irq();
        self.mbx_base = base;
        self.mbx_count = count;
        self.out_slot = 0;
        self.in_slot = 0;
    }

    pub fn alloc_ccb(&self, ccb: &TestCcb) -> u64 {
        let addr = self.alloc.borrow_mut().alloc(TEST_CCB_SIZE);
        let raw = if self.legacy {
            ccb.encode_legacy()
        } else {
            ccb.encode()
        };
        self.state.borrow().memwrite(addr, &raw);
        addr
    }

    /// Continue with the rings `other` set up, e.g. after a migration.
    pub fn adopt_mailboxes(&mut self, other: &TestBusLogic) {
        self.mbx_base = other.mbx_base;
        self.mbx_count = other.mbx_count;
        self.legacy = other.legacy;
        self.out_slot = other.out_slot;
        self.in_slot = other.in_slot;
    }

    fn post_outgoing(&mut self, ccb_addr: u64, action: u8) {
        let slot = self.mbx_base + self.out_slot as u64 * self.entry_size();
        let mut raw = [0_u8; MAILBOX32_SIZE as usize];
        let entry = if self.legacy {
            raw[0] = action;
            write_u24_be(&mut raw[1..4], ccb_addr as u32);
            &raw[..MAILBOX24_SIZE as usize]
        } else {
            LittleEndian::write_u32(&mut raw[0..4], ccb_addr as u32);
            raw[7] = action;
            &raw[..]
        };
        self.state.borrow().memwrite(slot, entry);
        self.out_slot = (self.out_slot + 1) % self.mbx_count;
        self.data_out(CMD_EXECUTE_MBX);
    }

    pub fn start_ccb(&mut self, ccb_addr: u64) {
        self.post_outgoing(ccb_addr, ACTION_START);
    }

    pub fn abort_ccb(&mut self, ccb_addr: u64) {
        self.post_outgoing(ccb_addr, ACTION_ABORT);
    }

    /// Wait for the next incoming mailbox and give the slot back.
    pub fn wait_incoming(&mut self) -> Option<MailboxIn> {
        let slot = self.mbx_base
            + (self.mbx_count as u64 + self.in_slot as u64) * self.entry_size();
        let len = self.entry_size();
        let code_off = if self.legacy { 0 } else { 7 };
        let posted = wait_until(TIMEOUT_US, || {
            self.state.borrow().readb(slot + code_off) != COMPLETION_FREE
        });
        if !posted {
            return None;
        }
        let raw = self.state.borrow().memread(slot, len);
        self.state.borrow().writeb(slot + code_off, COMPLETION_FREE);
        self.in_slot = (self.in_slot + 1) % self.mbx_count;
        Some(MailboxIn::decode(&raw, self.legacy))
    }

    /// Host and device status bytes written back into the CCB.
    pub fn ccb_status(&self, ccb_addr: u64) -> (u8, u8) {
        let raw = self.state.borrow().memread(ccb_addr + 14, 2);
        (raw[0], raw[1])
    }

    pub fn ccb_data_len(&self, ccb_addr: u64) -> u32 {
        self.state.borrow().readl(ccb_addr + 4)
    }
}
