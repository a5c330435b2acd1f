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
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use devices::scsi::bus::{CHECK_CONDITION, ILLEGAL_REQUEST, READ_10, TEST_UNIT_READY, WRITE_10};
use devices::scsi::buslogic::ccb::{
    CCB_DIRECTION_IN, CCB_DIRECTION_NO_DATA, CCB_DIRECTION_OUT, CCB_OPCODE_INITIATOR,
    CCB_OPCODE_INITIATOR_RESIDUAL_DATA, CCB_OPCODE_INITIATOR_SG, COMPLETION_ABORTED_NOT_FOUND,
    COMPLETION_WITHOUT_ERROR, COMPLETION_WITH_ERROR, HA_ABORT_QUEUE_GENERATED, HA_CMD_COMPLETED,
    HA_SELECTION_TIMEOUT,
};
use devices::scsi::buslogic::command::{
    CMD_INQUIRE_BOARD_ID, CMD_INQUIRE_FW_3RD_LETTER, CMD_INQUIRE_FW_LETTER,
    CMD_INQUIRE_SETUP_INFO, CMD_INQUIRE_TARGET_DEVICES, CMD_MODIFY_IO_ADDRESS,
    CMD_UNLOCK_MAILBOX,
};
use devices::scsi::buslogic::{
    BL_CONTROL_STATUS, BL_GEOM_XLATEN, BL_INTR_CMDC, BL_INTR_IMBL, BL_INTR_INTV, BL_STAT_CMDINV,
    BL_STAT_HARDY, BL_STAT_INREQ,
};
use migration::{MigrationHook, StateTransfer};
use mod_test::libdriver::buslogic::{TestBusLogic, TestCcb};
use mod_test::libdriver::malloc::GuestAllocator;
use mod_test::libdriver::medium::{TestMedium, TEST_BLOCK_SIZE};
use mod_test::libtest::{test_init, test_log_path, wait_until, TestState, TIMEOUT_US};
use util::logger::LOG_LEVEL_ENV;
use util::num_ops::read_u24_be;

const PAGE_SIZE_4K: u64 = 1 << 12;
const ALLOC_BASE: u64 = 0x10_0000;
const ALLOC_SIZE: u64 = 0x40_0000;
const TEST_BLOCKS: usize = 64;
const TEST_TARGET: u8 = 2;

fn rw10(opcode: u8, lba: u32, blocks: u16) -> Vec<u8> {
    let mut cdb = vec![0_u8; 10];
    cdb[0] = opcode;
    cdb[2..6].copy_from_slice(&lba.to_be_bytes());
    cdb[7..9].copy_from_slice(&blocks.to_be_bytes());
    cdb
}

fn set_up_with(args: &str, medium: TestMedium) -> (TestBusLogic, Arc<TestMedium>) {
    let state = Rc::new(RefCell::new(test_init()));
    let alloc = Rc::new(RefCell::new(GuestAllocator::new(
        ALLOC_BASE,
        ALLOC_SIZE,
        PAGE_SIZE_4K,
    )));
    let bl = TestBusLogic::new(state, alloc, args);
    let medium = Arc::new(medium);
    bl.dev
        .lock()
        .unwrap()
        .attach(TEST_TARGET, medium.clone())
        .unwrap();
    (bl, medium)
}

fn set_up() -> (TestBusLogic, Arc<TestMedium>) {
    set_up_with("buslogic,id=bl0", TestMedium::new(TEST_BLOCKS))
}

fn data_buffer(bl: &TestBusLogic, len: u64) -> u64 {
    let addr = bl.alloc.borrow_mut().alloc(len);
    bl.state.borrow().memwrite(addr, &vec![0_u8; len as usize]);
    addr
}

/// Adapter powers on ready for commands and identifies itself.
#[test]
fn buslogic_identify() {
    let (mut bl, _) = set_up();
    assert_eq!(bl.status() & (BL_STAT_HARDY | BL_STAT_INREQ), BL_STAT_HARDY | BL_STAT_INREQ);
    assert_eq!(bl.geometry(), BL_GEOM_XLATEN);
    assert!(bl.hard_reset());

    let board = bl.command(CMD_INQUIRE_BOARD_ID, &[], 4);
    assert_eq!(board, b"AA50".to_vec());
    assert_eq!(bl.interrupt(), BL_INTR_CMDC | BL_INTR_INTV);
    assert!(bl.irq_level());
    bl.ack_irq();
    assert_eq!(bl.interrupt(), 0);
    assert!(!bl.irq_level());

    assert_eq!(bl.command(CMD_INQUIRE_FW_LETTER, &[], 1), b"B".to_vec());
    bl.ack_irq();
    assert_eq!(bl.command(CMD_INQUIRE_FW_3RD_LETTER, &[], 1), b"7".to_vec());
    bl.ack_irq();

    let mask = bl.command(CMD_INQUIRE_TARGET_DEVICES, &[], 2);
    assert_eq!(u16::from_le_bytes([mask[0], mask[1]]), 1 << TEST_TARGET);
    bl.ack_irq();
}

/// Rejected commands flag CMDINV until the interrupt is acknowledged.
/// Lifecycle events land in the process log file.
#[test]
fn buslogic_log_records_mailbox_setup() {
    let (mut bl, _medium) = set_up_with("buslogic,id=bl-log", TestMedium::new(TEST_BLOCKS));
    bl.init_mailboxes(4, false);
    if std::env::var(LOG_LEVEL_ENV).is_ok() {
        return;
    }
    let log = std::fs::read_to_string(test_log_path()).unwrap();
    assert!(log.contains("bl-log: 4 32-bit mailboxes at"));
}

#[test]
fn buslogic_invalid_command() {
    let (bl, _) = set_up();
    bl.command(CMD_UNLOCK_MAILBOX, &[], 0);
    assert_ne!(bl.status() & BL_STAT_CMDINV, 0);
    bl.ack_irq();
    assert_eq!(bl.status() & BL_STAT_CMDINV, 0);
    assert_ne!(bl.status() & BL_STAT_HARDY, 0);
}

/// Mailbox setup is reflected by INQUIRE_SETUP_INFO.
#[test]
fn buslogic_mailbox_setup() {
    let (mut bl, _) = set_up();
    bl.init_mailboxes(4, false);
    assert_eq!(bl.status() & BL_STAT_INREQ, 0);

    let info = bl.command(CMD_INQUIRE_SETUP_INFO, &[16], 16);
    bl.ack_irq();
    assert_eq!(info[4], 4);
    assert_eq!(read_u24_be(&info[5..8]) as u64, ALLOC_BASE);
}

/// READ(10) into a flat buffer, then WRITE(10) from a scatter/gather list.
#[test]
fn buslogic_read_write() {
    let (mut bl, medium) = set_up();
    bl.init_mailboxes(4, false);

    let mut rng = rand::thread_rng();
    let pattern: Vec<u8> = (0..2 * TEST_BLOCK_SIZE).map(|_| rng.gen::<u8>()).collect();
    medium.fill(4, &pattern);

    let buf = data_buffer(&bl, 2 * TEST_BLOCK_SIZE as u64);
    let ccb = bl.alloc_ccb(&TestCcb {
        opcode: CCB_OPCODE_INITIATOR,
        direction: CCB_DIRECTION_IN,
        target: TEST_TARGET,
        cdb: rw10(READ_10, 4, 2),
        data_len: 2 * TEST_BLOCK_SIZE as u32,
        data_ptr: buf as u32,
        sense_len: 18,
        ..Default::default()
    });
    bl.start_ccb(ccb);
    let done = bl.wait_incoming().unwrap();
    assert_eq!(done.ccb_addr as u64, ccb);
    assert_eq!(done.completion, COMPLETION_WITHOUT_ERROR);
    assert_eq!(bl.ccb_status(ccb), (HA_CMD_COMPLETED, 0));
    assert_eq!(bl.state.borrow().memread(buf, pattern.len() as u64), pattern);
    assert_ne!(bl.interrupt() & BL_INTR_IMBL, 0);
    assert!(bl.irq_level());
    bl.ack_irq();

    // Two half-block segments written to block 10.
    let seg_a = data_buffer(&bl, 256);
    let seg_b = data_buffer(&bl, 256);
    let payload: Vec<u8> = (0..TEST_BLOCK_SIZE).map(|i| (i * 7) as u8).collect();
    bl.state.borrow().memwrite(seg_a, &payload[..256]);
    bl.state.borrow().memwrite(seg_b, &payload[256..]);
    let list = data_buffer(&bl, 16);
    let mut sgl = Vec::new();
    for seg in [seg_a, seg_b] {
        sgl.extend_from_slice(&256_u32.to_le_bytes());
        sgl.extend_from_slice(&(seg as u32).to_le_bytes());
    }
    bl.state.borrow().memwrite(list, &sgl);

    let ccb = bl.alloc_ccb(&TestCcb {
        opcode: CCB_OPCODE_INITIATOR_SG,
        direction: CCB_DIRECTION_OUT,
        target: TEST_TARGET,
        cdb: rw10(WRITE_10, 10, 1),
        data_len: sgl.len() as u32,
        data_ptr: list as u32,
        sense_len: 18,
        ..Default::default()
    });
    bl.start_ccb(ccb);
    let done = bl.wait_incoming().unwrap();
    assert_eq!(done.completion, COMPLETION_WITHOUT_ERROR);
    assert_eq!(medium.contents(10, TEST_BLOCK_SIZE), payload);
    assert_eq!(medium.live_requests(), 0);
    bl.ack_irq();
}

/// A failing command reports CHECK CONDITION and fills the sense buffer.
#[test]
fn buslogic_check_condition() {
    let (mut bl, _) = set_up();
    bl.init_mailboxes(2, false);

    let buf = data_buffer(&bl, TEST_BLOCK_SIZE as u64);
    let sense = data_buffer(&bl, 32);
    let ccb = bl.alloc_ccb(&TestCcb {
        opcode: CCB_OPCODE_INITIATOR,
        direction: CCB_DIRECTION_IN,
        target: TEST_TARGET,
        cdb: rw10(READ_10, TEST_BLOCKS as u32, 1),
        data_len: TEST_BLOCK_SIZE as u32,
        data_ptr: buf as u32,
        sense_len: 18,
        sense_ptr: sense as u32,
        ..Default::default()
    });
    bl.start_ccb(ccb);
    let done = bl.wait_incoming().unwrap();
    assert_eq!(done.completion, COMPLETION_WITH_ERROR);
    assert_eq!(done.device_status, CHECK_CONDITION);
    assert_eq!(bl.ccb_status(ccb), (HA_CMD_COMPLETED, CHECK_CONDITION));

    let data = bl.state.borrow().memread(sense, 18);
    assert_eq!(data[0], 0x70);
    assert_eq!(data[2], ILLEGAL_REQUEST);
    assert_eq!(data[12], 0x21);
}

/// Residual opcodes report the untransferred byte count in the CCB.
#[test]
fn buslogic_residual_length() {
    let (mut bl, _) = set_up();
    bl.init_mailboxes(2, false);

    let buf = data_buffer(&bl, 4 * TEST_BLOCK_SIZE as u64);
    let ccb = bl.alloc_ccb(&TestCcb {
        opcode: CCB_OPCODE_INITIATOR_RESIDUAL_DATA,
        direction: CCB_DIRECTION_IN,
        target: TEST_TARGET,
        cdb: rw10(READ_10, 0, 1),
        data_len: 4 * TEST_BLOCK_SIZE as u32,
        data_ptr: buf as u32,
        sense_len: 1,
        ..Default::default()
    });
    bl.start_ccb(ccb);
    assert_eq!(bl.wait_incoming().unwrap().completion, COMPLETION_WITHOUT_ERROR);
    assert_eq!(bl.ccb_data_len(ccb), 3 * TEST_BLOCK_SIZE as u32);
}

/// Nothing answers at an empty target id.
#[test]
fn buslogic_selection_timeout() {
    let (mut bl, medium) = set_up();
    bl.init_mailboxes(2, false);

    let ccb = bl.alloc_ccb(&TestCcb {
        opcode: CCB_OPCODE_INITIATOR,
        direction: CCB_DIRECTION_NO_DATA,
        target: TEST_TARGET + 1,
        cdb: vec![TEST_UNIT_READY, 0, 0, 0, 0, 0],
        ..Default::default()
    });
    bl.start_ccb(ccb);
    let done = bl.wait_incoming().unwrap();
    assert_eq!(done.completion, COMPLETION_WITH_ERROR);
    assert_eq!(done.host_status, HA_SELECTION_TIMEOUT);

    // An allocation failure looks the same to the guest.
    medium.set_fail_alloc(true);
    let ccb = bl.alloc_ccb(&TestCcb {
        opcode: CCB_OPCODE_INITIATOR,
        direction: CCB_DIRECTION_NO_DATA,
        target: TEST_TARGET,
        cdb: vec![TEST_UNIT_READY, 0, 0, 0, 0, 0],
        ..Default::default()
    });
    bl.start_ccb(ccb);
    assert_eq!(bl.wait_incoming().unwrap().host_status, HA_SELECTION_TIMEOUT);
}

/// Aborting a CCB the adapter never saw is answered as not found.
#[test]
fn buslogic_abort_unknown_ccb() {
    let (mut bl, _) = set_up();
    bl.init_mailboxes(2, false);

    let ccb = bl.alloc_ccb(&TestCcb {
        opcode: CCB_OPCODE_INITIATOR,
        target: TEST_TARGET,
        cdb: vec![TEST_UNIT_READY, 0, 0, 0, 0, 0],
        ..Default::default()
    });
    bl.abort_ccb(ccb);
    let done = bl.wait_incoming().unwrap();
    assert_eq!(done.completion, COMPLETION_ABORTED_NOT_FOUND);
    assert_eq!(done.host_status, HA_ABORT_QUEUE_GENERATED);
}

/// 24-bit mailboxes and CCBs set up by INIT_MBX.
#[test]
fn buslogic_legacy_mailboxes() {
    let (mut bl, medium) = set_up_with("buslogic,id=bl0,adapter=aha1540b", TestMedium::new(TEST_BLOCKS));
    bl.init_mailboxes(2, true);
    medium.fill(1, &[0xa5; TEST_BLOCK_SIZE]);

    let buf = data_buffer(&bl, TEST_BLOCK_SIZE as u64);
    for _ in 0..3 {
        let ccb = bl.alloc_ccb(&TestCcb {
            opcode: CCB_OPCODE_INITIATOR,
            direction: CCB_DIRECTION_IN,
            target: TEST_TARGET,
            cdb: rw10(READ_10, 1, 1),
            data_len: TEST_BLOCK_SIZE as u32,
            data_ptr: buf as u32,
            ..Default::default()
        });
        bl.start_ccb(ccb);
        let done = bl.wait_incoming().unwrap();
        assert_eq!(done.ccb_addr as u64, ccb);
        assert_eq!(done.completion, COMPLETION_WITHOUT_ERROR);
        bl.ack_irq();
    }
    assert_eq!(bl.state.borrow().memread(buf, 4), vec![0xa5; 4]);
}

/// The Adaptec model answers with its signature on the geometry port.
#[test]
fn buslogic_adaptec_signature() {
    let (bl, _) = set_up_with("buslogic,id=bl0,adapter=aha1540b", TestMedium::new(TEST_BLOCKS));
    assert_eq!(bl.base, 0x334);
    let sig: Vec<u8> = (0..4).map(|_| bl.geometry()).collect();
    assert_eq!(sig, b"ADAP".to_vec());
}

/// MODIFY_IO_ADDRESS moves the ISA compatible window.
#[test]
fn buslogic_move_isa_window() {
    let (bl, _) = set_up();
    let state = bl.state.clone();
    assert_ne!(state.borrow().inb(0x334 + BL_CONTROL_STATUS), 0xff);
    bl.command(CMD_MODIFY_IO_ADDRESS, &[0], 0);
    assert_eq!(state.borrow().inb(0x334 + BL_CONTROL_STATUS), 0xff);
    assert_ne!(state.borrow().inb(0x330 + BL_CONTROL_STATUS) & BL_STAT_HARDY, 0);
    // No completion interrupt for this one.
    assert_eq!(bl.interrupt(), 0);
}

/// Suspend waits for requests completing from another thread.
#[test]
fn buslogic_suspend_waits_for_requests() {
    let (mut bl, medium) = set_up_with(
        "buslogic,id=bl0",
        TestMedium::new(TEST_BLOCKS).with_delay(Duration::from_millis(50)),
    );
    bl.init_mailboxes(2, false);

    let ccb = bl.alloc_ccb(&TestCcb {
        opcode: CCB_OPCODE_INITIATOR,
        direction: CCB_DIRECTION_NO_DATA,
        target: TEST_TARGET,
        cdb: vec![TEST_UNIT_READY, 0, 0, 0, 0, 0],
        ..Default::default()
    });
    bl.start_ccb(ccb);
    assert!(wait_until(TIMEOUT_US, || bl.bus.outstanding(TEST_TARGET) == 1));
    bl.dev.lock().unwrap().suspend();
    assert_eq!(bl.bus.outstanding(TEST_TARGET), 0);
    assert_eq!(medium.suspends(), 1);
    assert_eq!(bl.wait_incoming().unwrap().completion, COMPLETION_WITHOUT_ERROR);
}

fn copy_guest_memory(from: &TestState, to: &TestState) {
    let data = from.memread(ALLOC_BASE, ALLOC_SIZE);
    to.memwrite(ALLOC_BASE, &data);
}

/// A request parked on the source runs again on the destination.
#[test]
fn buslogic_migrate_parked_request() {
    let (mut src, medium) = set_up();
    src.init_mailboxes(4, false);
    medium.set_hold(true);

    let ccb = src.alloc_ccb(&TestCcb {
        opcode: CCB_OPCODE_INITIATOR,
        direction: CCB_DIRECTION_NO_DATA,
        target: TEST_TARGET,
        cdb: vec![TEST_UNIT_READY, 0, 0, 0, 0, 0],
        ..Default::default()
    });
    src.start_ccb(ccb);
    assert!(wait_until(TIMEOUT_US, || medium.held_count() == 1));
    src.dev
        .lock()
        .unwrap()
        .request_state_changed(TEST_TARGET, true);
    src.dev.lock().unwrap().suspend();
    let snapshot = src.dev.lock().unwrap().get_state_vec().unwrap();

    let (mut dst, dst_medium) = set_up();
    copy_guest_memory(&src.state.borrow(), &dst.state.borrow());
    dst.adopt_mailboxes(&src);
    {
        let mut locked_dev = dst.dev.lock().unwrap();
        locked_dev.set_state_mut(&snapshot).unwrap();
        locked_dev.resume().unwrap();
    }

    let done = dst.wait_incoming().unwrap();
    assert_eq!(done.ccb_addr as u64, ccb);
    assert_eq!(done.completion, COMPLETION_WITHOUT_ERROR);
    assert_eq!(dst_medium.live_requests(), 0);
}

/// A snapshot only loads where the same targets are attached.
#[test]
fn buslogic_migrate_target_mismatch() {
    let (src, _) = set_up();
    let snapshot = src.dev.lock().unwrap().get_state_vec().unwrap();

    let (dst, _) = set_up();
    dst.dev.lock().unwrap().detach(TEST_TARGET).unwrap();
    assert!(dst.dev.lock().unwrap().set_state_mut(&snapshot).is_err());
}
