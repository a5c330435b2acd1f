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

use byteorder::{ByteOrder, LittleEndian};
use rand::Rng;

use devices::scsi::bus::{CHECK_CONDITION, GOOD, ILLEGAL_REQUEST, READ_10, WRITE_10};
use devices::scsi::lsilogic::message::{
    MPT_FUNC_IOC_FACTS, MPT_FUNC_IOC_INIT, MPT_IOCSTATUS_SCSI_DEVICE_NOT_THERE,
    MPT_IOCSTATUS_SCSI_INVALID_BUS, MPT_IOCSTATUS_SCSI_INVALID_TARGETID,
    MPT_SCSI_STATE_AUTOSENSE_VALID, MPT_SCSI_STATE_TERMINATED,
};
use devices::scsi::lsilogic::{
    IocState, LSI_DB_FN_IOC_MSG_UNIT_RESET, LSI_DIAG_DRWE, LSI_DIAG_UNLOCK_KEY,
    LSI_INTR_REPLY, LSI_MASK_DOORBELL, LSI_MASK_REPLY, LSI_REG_HOST_DIAGNOSTIC,
    LSI_REG_REPLY_QUEUE, LSI_REG_WRITE_SEQUENCE,
};
use migration::{MigrationHook, StateTransfer};
use mod_test::libdriver::lsilogic::{
    TestLsiLogic, ADDRESS_REPLY, REPLY_QUEUE_EMPTY, SCSI_IO_CONTROL_READ, SCSI_IO_CONTROL_WRITE,
};
use mod_test::libdriver::malloc::GuestAllocator;
use mod_test::libdriver::medium::{TestMedium, TEST_BLOCK_SIZE};
use mod_test::libtest::{test_init, wait_until, TIMEOUT_US};

const PAGE_SIZE_4K: u64 = 1 << 12;
const ALLOC_BASE: u64 = 0x10_0000;
const ALLOC_SIZE: u64 = 0x40_0000;
const TEST_BLOCKS: usize = 64;
const TEST_TARGET: u8 = 1;

fn rw10(opcode: u8, lba: u32, blocks: u16) -> Vec<u8> {
    let mut cdb = vec![0_u8; 10];
    cdb[0] = opcode;
    cdb[2..6].copy_from_slice(&lba.to_be_bytes());
    cdb[7..9].copy_from_slice(&blocks.to_be_bytes());
    cdb
}

/// Adapter with one disk attached, still in the Ready state.
fn set_up() -> (TestLsiLogic, Arc<TestMedium>) {
    let state = Rc::new(RefCell::new(test_init()));
    let alloc = Rc::new(RefCell::new(GuestAllocator::new(
        ALLOC_BASE,
        ALLOC_SIZE,
        PAGE_SIZE_4K,
    )));
    let lsi = TestLsiLogic::new(state, alloc, "lsilogic,id=lsi0");
    let medium = Arc::new(TestMedium::new(TEST_BLOCKS));
    lsi.dev
        .lock()
        .unwrap()
        .attach(TEST_TARGET, medium.clone())
        .unwrap();
    (lsi, medium)
}

/// Operational adapter with interrupts unmasked and reply frames posted.
fn set_up_operational() -> (TestLsiLogic, Arc<TestMedium>) {
    let (lsi, medium) = set_up();
    lsi.ioc_init();
    lsi.ack_doorbell();
    lsi.set_intr_mask(0);
    lsi.post_reply_frames(8);
    (lsi, medium)
}

fn buffer(lsi: &TestLsiLogic, len: u64) -> u64 {
    let addr = lsi.alloc.borrow_mut().alloc(len);
    lsi.state.borrow().memwrite(addr, &vec![0_u8; len as usize]);
    addr
}

#[test]
fn lsilogic_ioc_facts() {
    let (lsi, _) = set_up();
    assert_eq!(lsi.ioc_state(), IocState::Ready.code());

    let reply = lsi.handshake(&[(MPT_FUNC_IOC_FACTS as u32) << 24, 0, 0xabcd]);
    assert_eq!(reply.len(), 60);
    assert_eq!(reply[3], MPT_FUNC_IOC_FACTS);
    assert_eq!(LittleEndian::read_u32(&reply[8..12]), 0xabcd);
    assert_eq!(reply[20], 3);
    assert_eq!(reply[22], 12);
    // Default depth of 256, one slot always stays free.
    assert_eq!(LittleEndian::read_u16(&reply[24..26]), 255);
    assert_eq!(LittleEndian::read_u16(&reply[36..38]), 255);
    assert_eq!(reply[46], 16);
}

#[test]
fn lsilogic_ioc_init() {
    let (lsi, _) = set_up();
    let reply = lsi.ioc_init();
    assert_eq!(reply.len(), 20);
    assert_eq!(reply[2], 5);
    assert_eq!(reply[3], MPT_FUNC_IOC_INIT);
    assert_eq!(lsi.ioc_state(), IocState::Operational.code());

    lsi.doorbell_function(LSI_DB_FN_IOC_MSG_UNIT_RESET);
    assert_eq!(lsi.ioc_state(), IocState::Ready.code());
}

/// Successful requests come back as context replies.
#[test]
fn lsilogic_read_write() {
    let (mut lsi, medium) = set_up_operational();

    let mut rng = rand::thread_rng();
    let pattern: Vec<u8> = (0..TEST_BLOCK_SIZE).map(|_| rng.gen::<u8>()).collect();
    medium.fill(3, &pattern);

    let data = buffer(&lsi, TEST_BLOCK_SIZE as u64);
    let sense = buffer(&lsi, 32);
    let (frame, context) = lsi.build_scsi_io(
        TEST_TARGET,
        &rw10(READ_10, 3, 1),
        SCSI_IO_CONTROL_READ,
        &[(data, TEST_BLOCK_SIZE as u32)],
        sense,
    );
    lsi.post_request(frame);
    assert_eq!(lsi.wait_reply(), Some(context));
    assert_eq!(lsi.state.borrow().memread(data, pattern.len() as u64), pattern);

    // Two segments written to block 7.
    let seg_a = buffer(&lsi, 128);
    let seg_b = buffer(&lsi, 384);
    let payload: Vec<u8> = (0..TEST_BLOCK_SIZE).map(|i| (i * 3) as u8).collect();
    lsi.state.borrow().memwrite(seg_a, &payload[..128]);
    lsi.state.borrow().memwrite(seg_b, &payload[128..]);
    let (frame, context) = lsi.build_scsi_io(
        TEST_TARGET,
        &rw10(WRITE_10, 7, 1),
        SCSI_IO_CONTROL_WRITE,
        &[(seg_a, 128), (seg_b, 384)],
        sense,
    );
    lsi.post_request(frame);
    assert_eq!(lsi.wait_reply(), Some(context));
    assert_eq!(medium.contents(7, TEST_BLOCK_SIZE), payload);
    assert_eq!(medium.live_requests(), 0);

    // Reading the drained reply FIFO drops the interrupt.
    assert!(lsi.irq_level());
    assert_eq!(lsi.readl(LSI_REG_REPLY_QUEUE), REPLY_QUEUE_EMPTY);
    assert_eq!(lsi.intr_status() & LSI_INTR_REPLY, 0);
    assert!(!lsi.irq_level());
}

/// Failed requests use a reply frame and carry autosense data.
#[test]
fn lsilogic_check_condition() {
    let (mut lsi, _) = set_up_operational();

    let data = buffer(&lsi, TEST_BLOCK_SIZE as u64);
    let sense = buffer(&lsi, 32);
    let (frame, context) = lsi.build_scsi_io(
        TEST_TARGET,
        &rw10(READ_10, TEST_BLOCKS as u32 + 1, 1),
        SCSI_IO_CONTROL_READ,
        &[(data, TEST_BLOCK_SIZE as u32)],
        sense,
    );
    lsi.post_request(frame);
    let entry = lsi.wait_reply().unwrap();
    assert_ne!(entry & ADDRESS_REPLY, 0);

    let reply = lsi.address_reply(entry);
    assert_eq!(LittleEndian::read_u32(&reply[8..12]), context);
    assert_eq!(reply[12], CHECK_CONDITION);
    assert_eq!(reply[13], MPT_SCSI_STATE_AUTOSENSE_VALID);
    assert_eq!(LittleEndian::read_u32(&reply[20..24]), 0);
    assert_eq!(LittleEndian::read_u32(&reply[24..28]), 18);

    let sense_data = lsi.state.borrow().memread(sense, 18);
    assert_eq!(sense_data[0], 0x70);
    assert_eq!(sense_data[2], ILLEGAL_REQUEST);
    assert_eq!(sense_data[12], 0x21);
    lsi.recycle_reply(entry);
}

/// Requests for a missing bus, target or device never reach a medium.
#[test]
fn lsilogic_rejected_requests() {
    let (mut lsi, medium) = set_up_operational();
    let sense = buffer(&lsi, 32);
    let tur = [0_u8; 6];

    let cases = [
        (TEST_TARGET + 1, 0_u8, MPT_IOCSTATUS_SCSI_DEVICE_NOT_THERE),
        (20, 0, MPT_IOCSTATUS_SCSI_INVALID_TARGETID),
        (TEST_TARGET, 1, MPT_IOCSTATUS_SCSI_INVALID_BUS),
    ];
    for (target, bus, status) in cases {
        let (frame, context) = lsi.build_scsi_io(target, &tur, 0, &[], sense);
        lsi.state.borrow().writeb(frame + 1, bus);
        lsi.post_request(frame);
        let entry = lsi.wait_reply().unwrap();
        let reply = lsi.address_reply(entry);
        assert_eq!(LittleEndian::read_u32(&reply[8..12]), context);
        assert_eq!(reply[12], GOOD);
        assert_eq!(reply[13], MPT_SCSI_STATE_TERMINATED);
        assert_eq!(LittleEndian::read_u16(&reply[14..16]), status);
        lsi.recycle_reply(entry);
    }
    assert_eq!(medium.live_requests(), 0);
}

/// Masked causes stay latched in the status register without an interrupt.
#[test]
fn lsilogic_interrupt_mask() {
    let (mut lsi, _) = set_up_operational();
    lsi.set_intr_mask(LSI_MASK_REPLY | LSI_MASK_DOORBELL);

    let sense = buffer(&lsi, 32);
    let (frame, _) = lsi.build_scsi_io(TEST_TARGET, &[0_u8; 6], 0, &[], sense);
    lsi.post_request(frame);
    assert!(wait_until(TIMEOUT_US, || lsi.intr_status() & LSI_INTR_REPLY != 0));
    assert!(!lsi.irq_level());

    lsi.set_intr_mask(0);
    assert!(lsi.irq_level());
}

#[test]
fn lsilogic_diagnostic_unlock() {
    let (lsi, _) = set_up();
    assert_eq!(lsi.readl(LSI_REG_HOST_DIAGNOSTIC) & LSI_DIAG_DRWE, 0);
    for key in LSI_DIAG_UNLOCK_KEY {
        lsi.writel(LSI_REG_WRITE_SEQUENCE, key);
    }
    assert_ne!(lsi.readl(LSI_REG_HOST_DIAGNOSTIC) & LSI_DIAG_DRWE, 0);

    // Any further write locks it again.
    lsi.writel(LSI_REG_WRITE_SEQUENCE, 0);
    assert_eq!(lsi.readl(LSI_REG_HOST_DIAGNOSTIC) & LSI_DIAG_DRWE, 0);
}

/// A request parked on the source is replayed from the snapshot.
#[test]
fn lsilogic_migrate_parked_request() {
    let (mut src, medium) = set_up_operational();
    medium.set_hold(true);

    let sense = buffer(&src, 32);
    let (frame, context) = src.build_scsi_io(TEST_TARGET, &[0_u8; 6], 0, &[], sense);
    src.post_request(frame);
    assert!(wait_until(TIMEOUT_US, || medium.held_count() == 1));
    src.dev
        .lock()
        .unwrap()
        .request_state_changed(TEST_TARGET, true);
    src.dev.lock().unwrap().suspend();
    assert_eq!(medium.suspends(), 1);
    let snapshot = src.dev.lock().unwrap().get_state_vec().unwrap();

    let (dst, dst_medium) = set_up();
    {
        let data = src.state.borrow().memread(ALLOC_BASE, ALLOC_SIZE);
        dst.state.borrow().memwrite(ALLOC_BASE, &data);
    }
    {
        let mut locked_dev = dst.dev.lock().unwrap();
        locked_dev.set_state_mut(&snapshot).unwrap();
        assert_eq!(locked_dev.ioc_state(), IocState::Operational);
        locked_dev.resume().unwrap();
    }
    assert_eq!(dst.wait_reply(), Some(context));
    assert_eq!(dst_medium.live_requests(), 0);
}
