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

use std::cmp::min;
use std::sync::Arc;

use anyhow::Result;
use log::{debug, error, warn};

use super::ccb::{
    Ccb, Escmd, CCB_DIRECTION_IN, CCB_DIRECTION_NO_DATA, CCB_DIRECTION_OUT, CCB_FETCH_SIZE,
    COMPLETION_ABORTED_NOT_FOUND, COMPLETION_WITHOUT_ERROR, COMPLETION_WITH_ERROR,
    DEV_CHECK_CONDITION, DEV_OPERATION_GOOD, HA_ABORT_QUEUE_GENERATED, HA_CMD_COMPLETED,
    HA_INVALID_COMMAND_PARAMETER, HA_SELECTION_TIMEOUT,
};
use super::sg::{query_data_buffer_size, sg_walk};
use super::{BusLogicCore, BusLogicState, BL_STAT_DIRRDY};
use crate::ScsiBus::{
    ScsiMedium, ScsiRequest, ScsiRequestOps, ScsiSense, ScsiXferMode, CHECK_CONDITION, GOOD,
    SCSI_CMD_BUF_SIZE, SCSI_MAX_TARGETS, SCSI_SENSE_TARGET_FAILURE,
};

#[derive(Clone)]
enum TaskKind {
    /// Guest CCB fetched through a mailbox.
    Mailbox {
        ccb: Ccb,
        raw: [u8; CCB_FETCH_SIZE],
    },
    /// EXECUTE_SCSI_COMMAND issued by the BIOS.
    Bios(Escmd),
}

/// Adapter side of one request in flight on a medium.
#[derive(Clone)]
struct BusLogicTask {
    core: Arc<BusLogicCore>,
    medium: Arc<dyn ScsiMedium>,
    target: u8,
    handle: u64,
    ccb_addr: u32,
    kind: TaskKind,
}

impl BusLogicTask {
    fn copy_bios(&self, escmd: &Escmd, offset: usize, len: usize) -> Option<(u64, usize)> {
        let n = min(len, (escmd.data_len as usize).saturating_sub(offset));
        if n == 0 {
            return None;
        }
        Some((escmd.data_ptr as u64 + offset as u64, n))
    }

    fn write_sense(&self, ccb: &Ccb, sense: Option<ScsiSense>) {
        let len = ccb.sense_buffer_len();
        if len == 0 {
            return;
        }
        let fixed = sense.unwrap_or_default().to_fixed_format();
        let mut buf = vec![0_u8; len];
        let n = min(len, fixed.len());
        buf[..n].copy_from_slice(&fixed[..n]);
        self.core.write_guest(ccb.sense_addr(self.ccb_addr as u64), &buf);
    }
}

impl ScsiRequestOps for BusLogicTask {
    fn copy_from_buf(&self, offset: usize, data: &[u8]) -> usize {
        let mem = &self.core.mem;
        match &self.kind {
            TaskKind::Mailbox { ccb, .. } => {
                sg_walk(mem, ccb, offset, data.len(), |addr, off, len| {
                    let mut src = &data[off..off + len];
                    mem.write(&mut src, addr, len as u64)
                })
            }
            TaskKind::Bios(escmd) => match self.copy_bios(escmd, offset, data.len()) {
                Some((addr, n)) if self.core.write_guest(addr, &data[..n]) => n,
                _ => 0,
            },
        }
    }

    fn copy_to_buf(&self, offset: usize, data: &mut [u8]) -> usize {
        let mem = &self.core.mem;
        match &self.kind {
            TaskKind::Mailbox { ccb, .. } => {
                sg_walk(mem, ccb, offset, data.len(), |addr, off, len| {
                    let mut dst = &mut data[off..off + len];
                    mem.read(&mut dst, addr, len as u64)
                })
            }
            TaskKind::Bios(escmd) => match self.copy_bios(escmd, offset, data.len()) {
                Some((addr, n)) if self.core.read_guest(addr, &mut data[..n]) => n,
                _ => 0,
            },
        }
    }

    fn scsi_request_complete_cb(
        &mut self,
        status: u8,
        scsisense: Option<ScsiSense>,
        residual: u64,
    ) -> Result<()> {
        let core = self.core.clone();
        core.bus.dec_outstanding(self.target);

        match &self.kind {
            TaskKind::Bios(_) => {
                self.medium.free_request(self.handle);
                let mut s = core.state.lock().unwrap();
                core.complete_bios(&mut s, status);
            }
            TaskKind::Mailbox { ccb, raw } => {
                let mut ccb = *ccb;
                if status != GOOD {
                    self.write_sense(&ccb, scsisense);
                }
                if ccb.wants_residual() && !ccb.zero_length_quirk() {
                    ccb.data_len = residual as u32;
                }
                self.medium.free_request(self.handle);

                let (host, dev, code) = match status {
                    GOOD => (HA_CMD_COMPLETED, DEV_OPERATION_GOOD, COMPLETION_WITHOUT_ERROR),
                    CHECK_CONDITION => {
                        (HA_CMD_COMPLETED, DEV_CHECK_CONDITION, COMPLETION_WITH_ERROR)
                    }
                    other => (HA_CMD_COMPLETED, other, COMPLETION_WITH_ERROR),
                };
                core.send_incoming_mailbox(self.ccb_addr, Some((&ccb, raw)), host, dev, code);
            }
        }

        core.check_idle();
        Ok(())
    }
}

fn xfer_mode(direction: u8) -> ScsiXferMode {
    match direction {
        CCB_DIRECTION_NO_DATA => ScsiXferMode::None,
        CCB_DIRECTION_OUT => ScsiXferMode::ToDev,
        CCB_DIRECTION_IN => ScsiXferMode::FromDev,
        _ => ScsiXferMode::Unknown,
    }
}

impl BusLogicCore {
    /// Hand `req` to the medium. A medium refusing it still completes the
    /// request so the guest sees an answer.
    fn dispatch(&self, medium: &Arc<dyn ScsiMedium>, req: ScsiRequest, mut task: BusLogicTask) {
        if let Err(e) = medium.execute(req) {
            error!(
                "{}: target {} failed to start request {:#x}: {:?}",
                self.id, task.target, task.ccb_addr, e
            );
            if let Err(e) = task.scsi_request_complete_cb(
                CHECK_CONDITION,
                Some(SCSI_SENSE_TARGET_FAILURE),
                0,
            ) {
                error!("{}: failed to complete request: {:?}", self.id, e);
            }
        }
    }

    fn fetch_ccb(&self, ccb_addr: u64) -> Option<(Ccb, [u8; CCB_FETCH_SIZE])> {
        let legacy = self.state.lock().unwrap().mbx.legacy;
        let mut raw = [0_u8; CCB_FETCH_SIZE];
        if !self.read_guest(ccb_addr, &mut raw) {
            return None;
        }
        Some((Ccb::decode(&raw, legacy), raw))
    }

    /// The slot is already free again, so the guest still needs an answer.
    /// Nothing is written back to the unreadable CCB.
    fn reject_unreadable_ccb(&self, ccb_addr: u64) {
        warn!("{}: CCB at {:#x} is outside guest memory", self.id, ccb_addr);
        self.send_incoming_mailbox(
            ccb_addr as u32,
            None,
            HA_INVALID_COMMAND_PARAMETER,
            DEV_OPERATION_GOOD,
            COMPLETION_WITH_ERROR,
        );
    }

    /// Start the CCB at `ccb_addr` on its target.
    pub(super) fn setup_request(self: &Arc<Self>, ccb_addr: u64) {
        let Some((ccb, raw)) = self.fetch_ccb(ccb_addr) else {
            self.reject_unreadable_ccb(ccb_addr);
            return;
        };
        let addr = ccb_addr as u32;
        debug!(
            "{}: CCB {:#x} opcode {:#x} target {} lun {} cdb {:02x?}",
            self.id,
            ccb_addr,
            ccb.opcode,
            ccb.target,
            ccb.lun,
            ccb.cdb()
        );

        if ccb.target as usize >= SCSI_MAX_TARGETS {
            warn!("{}: CCB {:#x} addresses target {}", self.id, ccb_addr, ccb.target);
            self.send_incoming_mailbox(
                addr,
                Some((&ccb, &raw)),
                HA_INVALID_COMMAND_PARAMETER,
                DEV_OPERATION_GOOD,
                COMPLETION_WITH_ERROR,
            );
            return;
        }

        let lun = ccb.lun as u16;
        let claimed = self
            .bus
            .get_device(ccb.target)
            .and_then(|medium| medium.alloc_request(lun).ok().map(|h| (medium, h)));
        let Some((medium, handle)) = claimed else {
            debug!("{}: no device behind target {}", self.id, ccb.target);
            self.send_incoming_mailbox(
                addr,
                Some((&ccb, &raw)),
                HA_SELECTION_TIMEOUT,
                DEV_OPERATION_GOOD,
                COMPLETION_WITH_ERROR,
            );
            return;
        };

        let task = BusLogicTask {
            core: self.clone(),
            medium: medium.clone(),
            target: ccb.target,
            handle,
            ccb_addr: addr,
            kind: TaskKind::Mailbox { ccb, raw },
        };
        let xfer = query_data_buffer_size(&self.mem, &ccb);
        let req = match ScsiRequest::new(
            lun,
            ccb.cdb(),
            xfer_mode(ccb.direction),
            xfer,
            ccb.sense_buffer_len(),
            ccb_addr,
            handle,
            Box::new(task.clone()),
        ) {
            Ok(req) => req,
            Err(e) => {
                error!("{}: bad CCB {:#x}: {:?}", self.id, ccb_addr, e);
                medium.free_request(handle);
                self.send_incoming_mailbox(
                    addr,
                    Some((&ccb, &raw)),
                    HA_INVALID_COMMAND_PARAMETER,
                    DEV_OPERATION_GOOD,
                    COMPLETION_WITH_ERROR,
                );
                return;
            }
        };
        self.bus.inc_outstanding(ccb.target);
        self.dispatch(&medium, req, task);
    }

    /// Answer an ABORT mailbox. Requests already on a medium run to the end.
    pub(super) fn abort_request(&self, ccb_addr: u64) {
        let Some((ccb, raw)) = self.fetch_ccb(ccb_addr) else {
            self.reject_unreadable_ccb(ccb_addr);
            return;
        };
        let (host, code) = if (ccb.target as usize) < SCSI_MAX_TARGETS {
            (HA_ABORT_QUEUE_GENERATED, COMPLETION_ABORTED_NOT_FOUND)
        } else {
            (HA_INVALID_COMMAND_PARAMETER, COMPLETION_WITH_ERROR)
        };
        debug!("{}: abort of CCB {:#x}", self.id, ccb_addr);
        self.send_incoming_mailbox(ccb_addr as u32, Some((&ccb, &raw)), host, DEV_OPERATION_GOOD, code);
    }

    /// Run the ESCMD sitting in the command buffer.
    pub(super) fn process_bios_request(self: &Arc<Self>) {
        let escmd = Escmd::decode(&self.state.lock().unwrap().cmd_buf);
        debug!(
            "{}: BIOS request target {} lun {} cdb {:02x?}",
            self.id,
            escmd.target,
            escmd.lun,
            escmd.cdb()
        );

        let claimed = if escmd.target as usize >= SCSI_MAX_TARGETS
            || escmd.cdb_len as usize > SCSI_CMD_BUF_SIZE
        {
            None
        } else {
            self.bus.get_device(escmd.target).and_then(|medium| {
                medium
                    .alloc_request(escmd.lun as u16)
                    .ok()
                    .map(|h| (medium, h))
            })
        };
        let Some((medium, handle)) = claimed else {
            let mut s = self.state.lock().unwrap();
            self.complete_bios(&mut s, CHECK_CONDITION);
            return;
        };

        let mode = match escmd.direction {
            2 => ScsiXferMode::ToDev,
            1 => ScsiXferMode::FromDev,
            _ => ScsiXferMode::Unknown,
        };
        let task = BusLogicTask {
            core: self.clone(),
            medium: medium.clone(),
            target: escmd.target,
            handle,
            ccb_addr: 0,
            kind: TaskKind::Bios(escmd),
        };
        let req = match ScsiRequest::new(
            escmd.lun as u16,
            escmd.cdb(),
            mode,
            escmd.data_len as u64,
            0,
            0,
            handle,
            Box::new(task.clone()),
        ) {
            Ok(req) => req,
            Err(e) => {
                error!("{}: bad BIOS request: {:?}", self.id, e);
                medium.free_request(handle);
                let mut s = self.state.lock().unwrap();
                self.complete_bios(&mut s, CHECK_CONDITION);
                return;
            }
        };
        self.bus.inc_outstanding(escmd.target);
        self.dispatch(&medium, req, task);
    }

    /// Post the 4 byte status reply of EXECUTE_SCSI_COMMAND. The command
    /// stays current until the guest drained the reply.
    pub(super) fn complete_bios(&self, s: &mut BusLogicState, status: u8) {
        s.reply[..4].copy_from_slice(&[0, 0, status, 0]);
        s.reply_idx = 0;
        s.reply_left = 4;
        s.status |= BL_STAT_DIRRDY;
    }
}
