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

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use log::{debug, info};

use crate::ScsiError;
use address_space::GuestAddress;
use util::AsAny;

/// SCSI operation codes used by the adapters and test media.
pub const TEST_UNIT_READY: u8 = 0x00;
pub const REQUEST_SENSE: u8 = 0x03;
pub const READ_6: u8 = 0x08;
pub const WRITE_6: u8 = 0x0a;
pub const INQUIRY: u8 = 0x12;
pub const READ_CAPACITY_10: u8 = 0x25;
pub const READ_10: u8 = 0x28;
pub const WRITE_10: u8 = 0x2a;
pub const REPORT_LUNS: u8 = 0xa0;

/// SAM Status codes.
pub const GOOD: u8 = 0x00;
pub const CHECK_CONDITION: u8 = 0x02;
pub const CONDITION_GOOD: u8 = 0x04;
pub const BUSY: u8 = 0x08;
pub const RESERVATION_CONFLICT: u8 = 0x18;
pub const TASK_SET_FULL: u8 = 0x28;
pub const TASK_ABORTED: u8 = 0x40;

/// Scsi cdb length will be 6/10/12/16 bytes.
pub const SCSI_CMD_BUF_SIZE: usize = 16;
/// Length of a fixed format sense buffer.
pub const SCSI_SENSE_FIXED_LEN: usize = 18;
/// Targets reachable on one narrow/wide bus.
pub const SCSI_MAX_TARGETS: usize = 16;
/// Deadline handed to the medium with every request.
pub const SCSI_REQ_TIMEOUT_MS: u32 = 30 * 1000;

/// Sense Keys.
pub const NO_SENSE: u8 = 0x00;
pub const NOT_READY: u8 = 0x02;
pub const MEDIUM_ERROR: u8 = 0x03;
pub const HARDWARE_ERROR: u8 = 0x04;
pub const ILLEGAL_REQUEST: u8 = 0x05;
pub const UNIT_ATTENTION: u8 = 0x06;
pub const ABORTED_COMMAND: u8 = 0x0b;

macro_rules! scsisense {
    ( $key:expr, $asc: expr, $ascq:expr) => {
        ScsiSense {
            key: $key,
            asc: $asc,
            ascq: $ascq,
        }
    };
}

/// Sense Code.
pub const SCSI_SENSE_NO_SENSE: ScsiSense = scsisense!(NO_SENSE, 0x00, 0x00);
pub const SCSI_SENSE_NOT_READY: ScsiSense = scsisense!(NOT_READY, 0x04, 0x00);
pub const SCSI_SENSE_READ_ERROR: ScsiSense = scsisense!(MEDIUM_ERROR, 0x11, 0x00);
pub const SCSI_SENSE_TARGET_FAILURE: ScsiSense = scsisense!(HARDWARE_ERROR, 0x44, 0x00);
pub const SCSI_SENSE_INVALID_OPCODE: ScsiSense = scsisense!(ILLEGAL_REQUEST, 0x20, 0x00);
pub const SCSI_SENSE_LBA_OUT_OF_RANGE: ScsiSense = scsisense!(ILLEGAL_REQUEST, 0x21, 0x00);
pub const SCSI_SENSE_INVALID_FIELD: ScsiSense = scsisense!(ILLEGAL_REQUEST, 0x24, 0x00);
pub const SCSI_SENSE_LUN_NOT_SUPPORTED: ScsiSense = scsisense!(ILLEGAL_REQUEST, 0x25, 0x00);
pub const SCSI_SENSE_IO_ERROR: ScsiSense = scsisense!(ABORTED_COMMAND, 0x00, 0x06);
pub const SCSI_SENSE_COMMAND_ABORTED: ScsiSense = scsisense!(ABORTED_COMMAND, 0x2f, 0x02);
pub const SCSI_SENSE_RESET: ScsiSense = scsisense!(UNIT_ATTENTION, 0x29, 0x00);
pub const SCSI_SENSE_SCSI_BUS_RESET: ScsiSense = scsisense!(UNIT_ATTENTION, 0x29, 0x02);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScsiSense {
    /// Sense key.
    pub key: u8,
    /// Additional sense code.
    pub asc: u8,
    /// Additional sense code qualifier.
    pub ascq: u8,
}

impl ScsiSense {
    /// Build fixed format sense data (response code 0x70).
    pub fn to_fixed_format(&self) -> [u8; SCSI_SENSE_FIXED_LEN] {
        let mut buf = [0_u8; SCSI_SENSE_FIXED_LEN];
        buf[0] = 0x70;
        buf[2] = self.key;
        // Additional sense length.
        buf[7] = (SCSI_SENSE_FIXED_LEN - 8) as u8;
        buf[12] = self.asc;
        buf[13] = self.ascq;
        buf
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScsiXferMode {
    /// TEST_UNIT_READY, ...
    None,
    /// READ, INQUIRY, MODE_SENSE, ...
    FromDev,
    /// WRITE, MODE_SELECT, ...
    ToDev,
    /// The initiator didn't tell, the medium decides from the CDB.
    Unknown,
}

/// Position inside the host side buffer while an adapter walks a guest
/// scatter/gather list.
pub(crate) struct HostCursor {
    pub skip: usize,
    pub copied: usize,
}

impl HostCursor {
    pub fn new(skip: usize) -> Self {
        HostCursor { skip, copied: 0 }
    }

    /// Feed one guest chunk, dropping the leading bytes still to be skipped.
    pub fn feed<F>(&mut self, guest: u64, len: usize, copy: &mut F) -> Result<()>
    where
        F: FnMut(GuestAddress, usize, usize) -> Result<()>,
    {
        let skipped = len.min(self.skip);
        self.skip -= skipped;
        let left = len - skipped;
        if left > 0 {
            copy(GuestAddress(guest + skipped as u64), self.copied, left)?;
            self.copied += left;
        }
        Ok(())
    }
}

/// Callbacks into the adapter that owns a request.
pub trait ScsiRequestOps: Send + Sync + AsAny {
    /// Copy data produced by the device into guest memory. `offset` is the
    /// position inside the logical transfer. Returns bytes copied.
    fn copy_from_buf(&self, offset: usize, data: &[u8]) -> usize;

    /// Fill `data` from guest memory for a device bound transfer.
    fn copy_to_buf(&self, offset: usize, data: &mut [u8]) -> usize;

    // Will be called in the end of this scsi instruction execution.
    fn scsi_request_complete_cb(
        &mut self,
        status: u8,
        scsisense: Option<ScsiSense>,
        residual: u64,
    ) -> Result<()>;
}

pub struct ScsiRequest {
    pub lun: u16,
    pub cdb: [u8; SCSI_CMD_BUF_SIZE],
    pub cdb_len: usize,
    pub mode: ScsiXferMode,
    // Size of the guest buffer described by the initiator.
    pub xfer_len: u64,
    // Sense bytes the initiator accepts, 0 means no autosense.
    pub sense_len: usize,
    pub timeout_ms: u32,
    // Adapter specific identity, e.g. the CCB guest address.
    pub tag: u64,
    // Handle returned by `ScsiMedium::alloc_request`.
    pub handle: u64,
    // Upper level request which contains this ScsiRequest.
    pub upper_req: Box<dyn ScsiRequestOps>,
}

impl ScsiRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lun: u16,
        cdb: &[u8],
        mode: ScsiXferMode,
        xfer_len: u64,
        sense_len: usize,
        tag: u64,
        handle: u64,
        upper_req: Box<dyn ScsiRequestOps>,
    ) -> Result<Self> {
        if cdb.len() > SCSI_CMD_BUF_SIZE {
            bail!("Invalid cdb length {}", cdb.len());
        }
        let mut buf = [0_u8; SCSI_CMD_BUF_SIZE];
        buf[..cdb.len()].copy_from_slice(cdb);
        Ok(ScsiRequest {
            lun,
            cdb: buf,
            cdb_len: cdb.len(),
            mode,
            xfer_len,
            sense_len,
            timeout_ms: SCSI_REQ_TIMEOUT_MS,
            tag,
            handle,
            upper_req,
        })
    }

    pub fn opcode(&self) -> u8 {
        self.cdb[0]
    }

    pub fn copy_from_buf(&self, offset: usize, data: &[u8]) -> usize {
        self.upper_req.copy_from_buf(offset, data)
    }

    pub fn copy_to_buf(&self, offset: usize, data: &mut [u8]) -> usize {
        self.upper_req.copy_to_buf(offset, data)
    }

    /// Terminate the request, handing status and sense back to the adapter.
    pub fn complete(mut self, status: u8, sense: Option<ScsiSense>, residual: u64) -> Result<()> {
        self.upper_req
            .as_mut()
            .scsi_request_complete_cb(status, sense, residual)
    }
}

/// Backend device sitting on a target id of the bus.
pub trait ScsiMedium: Send + Sync {
    /// Reserve room for one request, returning its handle.
    fn alloc_request(&self, lun: u16) -> Result<u64>;

    fn free_request(&self, handle: u64);

    /// Start a request. Ownership passes to the medium, which calls
    /// `ScsiRequest::complete` exactly once, possibly from another thread.
    /// An `Err` means the request was dropped without completion.
    fn execute(&self, req: ScsiRequest) -> Result<()>;

    /// Tags of requests parked by a VM suspend, to be restarted on resume.
    fn suspended_tags(&self) -> Vec<u64> {
        Vec::new()
    }

    fn notify_suspend(&self) {}

    /// SCSI bus reset seen on the wire.
    fn notify_reset(&self) {}
}

pub struct ScsiBus {
    /// Bus name.
    pub name: String,
    targets: Mutex<Vec<Option<Arc<dyn ScsiMedium>>>>,
    outstanding: Vec<AtomicU32>,
}

impl ScsiBus {
    pub fn new(bus_name: String, max_targets: usize) -> ScsiBus {
        ScsiBus {
            name: bus_name,
            targets: Mutex::new(vec![None; max_targets]),
            outstanding: (0..max_targets).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    pub fn max_targets(&self) -> usize {
        self.outstanding.len()
    }

    pub fn attach(&self, target: u8, medium: Arc<dyn ScsiMedium>) -> Result<()> {
        let mut targets = self.targets.lock().unwrap();
        let max = targets.len();
        let slot = targets
            .get_mut(target as usize)
            .ok_or_else(|| anyhow!(ScsiError::InvalidTarget(target, max)))?;
        if slot.is_some() {
            return Err(anyhow!(ScsiError::TargetBusy(target)));
        }
        *slot = Some(medium);
        info!("{}: attach target {}", self.name, target);
        Ok(())
    }

    pub fn detach(&self, target: u8) -> Result<Arc<dyn ScsiMedium>> {
        let mut targets = self.targets.lock().unwrap();
        let medium = targets
            .get_mut(target as usize)
            .and_then(|slot| slot.take())
            .ok_or_else(|| anyhow!(ScsiError::TargetAbsent(target)))?;
        info!("{}: detach target {}", self.name, target);
        Ok(medium)
    }

    /// Get the medium attached at `target`.
    pub fn get_device(&self, target: u8) -> Option<Arc<dyn ScsiMedium>> {
        self.targets
            .lock()
            .unwrap()
            .get(target as usize)
            .and_then(|slot| slot.clone())
    }

    pub fn is_present(&self, target: u8) -> bool {
        self.get_device(target).is_some()
    }

    /// Bit n set when target n is present.
    pub fn presence_mask(&self) -> u32 {
        self.targets
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .fold(0, |mask, (id, _)| mask | (1 << id))
    }

    pub fn attached(&self) -> Vec<(u8, Arc<dyn ScsiMedium>)> {
        self.targets
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.clone().map(|m| (id as u8, m)))
            .collect()
    }

    pub fn inc_outstanding(&self, target: u8) {
        if let Some(cnt) = self.outstanding.get(target as usize) {
            cnt.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Returns the remaining count of the target.
    pub fn dec_outstanding(&self, target: u8) -> u32 {
        match self.outstanding.get(target as usize) {
            Some(cnt) => {
                let prev = cnt
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
                    .unwrap_or(0);
                prev.saturating_sub(1)
            }
            None => 0,
        }
    }

    pub fn outstanding(&self, target: u8) -> u32 {
        self.outstanding
            .get(target as usize)
            .map_or(0, |cnt| cnt.load(Ordering::SeqCst))
    }

    pub fn set_outstanding(&self, target: u8, value: u32) {
        if let Some(cnt) = self.outstanding.get(target as usize) {
            cnt.store(value, Ordering::SeqCst);
        }
    }

    pub fn all_idle(&self) -> bool {
        self.outstanding
            .iter()
            .all(|cnt| cnt.load(Ordering::SeqCst) == 0)
    }

    pub fn notify_suspend(&self) {
        for (_, medium) in self.attached() {
            medium.notify_suspend();
        }
    }

    pub fn notify_reset(&self) {
        debug!("{}: bus reset", self.name);
        for (_, medium) in self.attached() {
            medium.notify_reset();
        }
    }
}
