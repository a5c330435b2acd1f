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

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use byteorder::{BigEndian, ByteOrder};

use devices::scsi::bus::{
    ScsiMedium, ScsiRequest, ScsiSense, CHECK_CONDITION, GOOD, INQUIRY, READ_10,
    READ_CAPACITY_10, REQUEST_SENSE, SCSI_SENSE_INVALID_OPCODE, SCSI_SENSE_LBA_OUT_OF_RANGE,
    SCSI_SENSE_NO_SENSE, TEST_UNIT_READY, WRITE_10,
};

pub const TEST_BLOCK_SIZE: usize = 512;
pub const TEST_INQUIRY_LEN: usize = 36;

/// RAM backed disk answering the handful of commands a driver needs to
/// probe and use a target.
pub struct TestMedium {
    data: Arc<Mutex<Vec<u8>>>,
    delay: Option<Duration>,
    hold: AtomicBool,
    held: Mutex<Vec<ScsiRequest>>,
    fail_alloc: AtomicBool,
    next_handle: AtomicU64,
    live: AtomicU32,
    suspends: AtomicU32,
    resets: AtomicU32,
}

impl TestMedium {
    pub fn new(blocks: usize) -> Self {
        TestMedium {
            data: Arc::new(Mutex::new(vec![0; blocks * TEST_BLOCK_SIZE])),
            delay: None,
            hold: AtomicBool::new(false),
            held: Mutex::new(Vec::new()),
            fail_alloc: AtomicBool::new(false),
            next_handle: AtomicU64::new(1),
            live: AtomicU32::new(0),
            suspends: AtomicU32::new(0),
            resets: AtomicU32::new(0),
        }
    }

    /// Complete every request from a helper thread after `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fill(&self, lba: usize, data: &[u8]) {
        let off = lba * TEST_BLOCK_SIZE;
        self.data.lock().unwrap()[off..off + data.len()].copy_from_slice(data);
    }

    pub fn contents(&self, lba: usize, len: usize) -> Vec<u8> {
        let off = lba * TEST_BLOCK_SIZE;
        self.data.lock().unwrap()[off..off + len].to_vec()
    }

    /// Park new requests instead of running them.
    pub fn set_hold(&self, hold: bool) {
        self.hold.store(hold, Ordering::SeqCst);
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().unwrap().len()
    }

    /// Run the parked requests.
    pub fn release(&self) {
        let held: Vec<ScsiRequest> = self.held.lock().unwrap().drain(..).collect();
        for req in held {
            serve(&self.data, req).unwrap();
        }
    }

    pub fn set_fail_alloc(&self, fail: bool) {
        self.fail_alloc.store(fail, Ordering::SeqCst);
    }

    /// Requests allocated and not yet freed.
    pub fn live_requests(&self) -> u32 {
        self.live.load(Ordering::SeqCst)
    }

    pub fn suspends(&self) -> u32 {
        self.suspends.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> u32 {
        self.resets.load(Ordering::SeqCst)
    }
}

fn lba_range(blocks: u64, cdb: &[u8]) -> Option<(usize, usize)> {
    let lba = BigEndian::read_u32(&cdb[2..6]) as u64;
    let count = BigEndian::read_u16(&cdb[7..9]) as u64;
    if lba + count > blocks {
        return None;
    }
    Some((
        lba as usize * TEST_BLOCK_SIZE,
        count as usize * TEST_BLOCK_SIZE,
    ))
}

fn serve(data: &Mutex<Vec<u8>>, req: ScsiRequest) -> Result<()> {
    let xfer = req.xfer_len as usize;
    let cdb = req.cdb;
    let blocks = (data.lock().unwrap().len() / TEST_BLOCK_SIZE) as u64;
    let (status, sense, moved): (u8, Option<ScsiSense>, usize) = match req.opcode() {
        TEST_UNIT_READY => (GOOD, None, 0),
        INQUIRY => {
            let mut inq = [b' '; TEST_INQUIRY_LEN];
            inq[..5].copy_from_slice(&[0, 0, 5, 2, (TEST_INQUIRY_LEN - 5) as u8]);
            inq[5..8].fill(0);
            inq[8..16].copy_from_slice(b"HBAVIRT ");
            inq[16..25].copy_from_slice(b"TEST DISK");
            inq[32..35].copy_from_slice(b"1.0");
            let alloc = BigEndian::read_u16(&cdb[3..5]) as usize;
            let len = alloc.min(TEST_INQUIRY_LEN).min(xfer);
            (GOOD, None, req.copy_from_buf(0, &inq[..len]))
        }
        READ_CAPACITY_10 => {
            let mut cap = [0_u8; 8];
            BigEndian::write_u32(&mut cap[0..4], (blocks - 1) as u32);
            BigEndian::write_u32(&mut cap[4..8], TEST_BLOCK_SIZE as u32);
            let len = cap.len().min(xfer);
            (GOOD, None, req.copy_from_buf(0, &cap[..len]))
        }
        REQUEST_SENSE => {
            let sense = SCSI_SENSE_NO_SENSE.to_fixed_format();
            let len = sense.len().min(xfer);
            (GOOD, None, req.copy_from_buf(0, &sense[..len]))
        }
        READ_10 => match lba_range(blocks, &cdb) {
            Some((off, len)) => {
                let data = data.lock().unwrap()[off..off + len.min(xfer)].to_vec();
                (GOOD, None, req.copy_from_buf(0, &data))
            }
            None => (CHECK_CONDITION, Some(SCSI_SENSE_LBA_OUT_OF_RANGE), 0),
        },
        WRITE_10 => match lba_range(blocks, &cdb) {
            Some((off, len)) => {
                let mut buf = vec![0_u8; len.min(xfer)];
                let n = req.copy_to_buf(0, &mut buf);
                data.lock().unwrap()[off..off + n].copy_from_slice(&buf[..n]);
                (GOOD, None, n)
            }
            None => (CHECK_CONDITION, Some(SCSI_SENSE_LBA_OUT_OF_RANGE), 0),
        },
        _ => (CHECK_CONDITION, Some(SCSI_SENSE_INVALID_OPCODE), 0),
    };
    req.complete(status, sense, xfer.saturating_sub(moved) as u64)
}

impl ScsiMedium for TestMedium {
    fn alloc_request(&self, _lun: u16) -> Result<u64> {
        if self.fail_alloc.load(Ordering::SeqCst) {
            bail!("test medium refuses requests");
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(self.next_handle.fetch_add(1, Ordering::SeqCst))
    }

    fn free_request(&self, _handle: u64) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    fn execute(&self, req: ScsiRequest) -> Result<()> {
        if self.hold.load(Ordering::SeqCst) {
            self.held.lock().unwrap().push(req);
            return Ok(());
        }
        match self.delay {
            Some(delay) => {
                // Completion from a foreign thread, like an AIO backend.
                let data = self.data.clone();
                thread::spawn(move || {
                    thread::sleep(delay);
                    serve(&data, req).unwrap();
                });
                Ok(())
            }
            None => serve(&self.data, req),
        }
    }

    fn suspended_tags(&self) -> Vec<u64> {
        self.held.lock().unwrap().iter().map(|r| r.tag).collect()
    }

    fn notify_suspend(&self) {
        self.suspends.fetch_add(1, Ordering::SeqCst);
    }

    fn notify_reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}
