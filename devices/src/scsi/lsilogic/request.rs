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

use std::sync::Arc;

use anyhow::Result;
use log::{debug, error, warn};

use super::message::{
    request_frame_size, MptReply, ScsiIoRequest, MPT_FUNC_SCSI_IO_REQUEST,
    MPT_IOCSTATUS_INVALID_FIELD, MPT_IOCSTATUS_SCSI_DEVICE_NOT_THERE,
    MPT_IOCSTATUS_SCSI_INVALID_BUS, MPT_IOCSTATUS_SCSI_INVALID_TARGETID,
    MPT_IOCSTATUS_SUCCESS, MPT_SCSI_IO_DIR_NONE, MPT_SCSI_IO_DIR_READ, MPT_SCSI_IO_DIR_WRITE,
    MPT_SCSI_IO_REQUEST_SIZE, MPT_SCSI_STATE_AUTOSENSE_VALID, MPT_SCSI_STATE_TERMINATED,
};
use super::sg::{sg_walk, MptSgList};
use super::{IocState, LsiLogicCore, LSI_FAULT_INVALID_FUNCTION};
use crate::ScsiBus::{
    ScsiMedium, ScsiRequest, ScsiRequestOps, ScsiSense, ScsiXferMode, CHECK_CONDITION, GOOD,
    SCSI_SENSE_FIXED_LEN, SCSI_SENSE_TARGET_FAILURE,
};

/// Header part every request frame starts with.
const FRAME_HEADER_SIZE: usize = 12;

/// Adapter side of one SCSI IO request in flight on a medium.
#[derive(Clone)]
struct LsiLogicTask {
    core: Arc<LsiLogicCore>,
    medium: Arc<dyn ScsiMedium>,
    handle: u64,
    frame: u64,
    req: ScsiIoRequest,
    sg: MptSgList,
}

impl LsiLogicTask {
    fn write_sense(&self, sense_addr: u64, sense: Option<ScsiSense>) {
        let fixed = sense.unwrap_or_default().to_fixed_format();
        let len = (self.req.sense_len as usize).min(SCSI_SENSE_FIXED_LEN);
        self.core.write_guest(sense_addr, &fixed[..len]);
    }
}

impl ScsiRequestOps for LsiLogicTask {
    fn copy_from_buf(&self, offset: usize, data: &[u8]) -> usize {
        let mem = &self.core.mem;
        sg_walk(mem, &self.sg, offset, data.len(), |addr, off, len| {
            let mut src = &data[off..off + len];
            mem.write(&mut src, addr, len as u64)
        })
    }

    fn copy_to_buf(&self, offset: usize, data: &mut [u8]) -> usize {
        let mem = &self.core.mem;
        sg_walk(mem, &self.sg, offset, data.len(), |addr, off, len| {
            let mut dst = &mut data[off..off + len];
            mem.read(&mut dst, addr, len as u64)
        })
    }

    fn scsi_request_complete_cb(
        &mut self,
        status: u8,
        scsisense: Option<ScsiSense>,
        residual: u64,
    ) -> Result<()> {
        let core = self.core.clone();
        core.bus.dec_outstanding(self.req.target);

        let mut s = core.state.lock().unwrap();
        if status != GOOD && self.req.sense_len > 0 {
            self.write_sense(s.sense_addr(self.req.sense_low), scsisense);
        }
        self.medium.free_request(self.handle);

        if status == GOOD {
            core.finish_context_reply(&mut s, self.req.context);
        } else {
            debug!(
                "{}: frame {:#x} target {} finished with status {:#x}",
                core.id, self.frame, self.req.target, status
            );
            let transferred = (self.req.data_len as u64).saturating_sub(residual) as u32;
            let mut reply = MptReply::scsi_io_error(
                &self.req,
                status,
                MPT_SCSI_STATE_AUTOSENSE_VALID,
                MPT_IOCSTATUS_SUCCESS,
            );
            reply
                .put_u32(20, transferred)
                .put_u32(24, SCSI_SENSE_FIXED_LEN as u32);
            core.finish_address_reply(&mut s, &reply, false);
        }
        drop(s);

        core.check_idle();
        Ok(())
    }
}

fn xfer_mode(req: &ScsiIoRequest) -> ScsiXferMode {
    match req.direction() {
        MPT_SCSI_IO_DIR_NONE if req.data_len == 0 => ScsiXferMode::None,
        MPT_SCSI_IO_DIR_WRITE => ScsiXferMode::ToDev,
        MPT_SCSI_IO_DIR_READ => ScsiXferMode::FromDev,
        _ => ScsiXferMode::Unknown,
    }
}

impl LsiLogicCore {
    /// Answer a SCSI IO request that never reached a medium.
    fn reject_scsi_io(&self, req: &ScsiIoRequest, ioc_status: u16) {
        let reply = MptReply::scsi_io_error(req, GOOD, MPT_SCSI_STATE_TERMINATED, ioc_status);
        let mut s = self.state.lock().unwrap();
        self.finish_address_reply(&mut s, &reply, false);
    }

    fn dispatch(&self, req: ScsiRequest, mut task: LsiLogicTask) {
        let medium = task.medium.clone();
        if let Err(e) = medium.execute(req) {
            error!(
                "{}: target {} failed to start request {:#x}: {:?}",
                self.id, task.req.target, task.frame, e
            );
            if let Err(e) = task.scsi_request_complete_cb(
                CHECK_CONDITION,
                Some(SCSI_SENSE_TARGET_FAILURE),
                task.req.data_len as u64,
            ) {
                error!("{}: failed to complete request: {:?}", self.id, e);
            }
        }
    }

    /// Start the SCSI IO request read from `frame`.
    fn setup_scsi_io(self: &Arc<Self>, frame: u64, raw: &[u8]) {
        let req = ScsiIoRequest::decode(raw);
        debug!(
            "{}: SCSI IO frame {:#x} target {} lun {} cdb {:02x?} len {}",
            self.id,
            frame,
            req.target,
            req.lun(),
            req.cdb(),
            req.data_len
        );

        if req.bus != 0 {
            self.reject_scsi_io(&req, MPT_IOCSTATUS_SCSI_INVALID_BUS);
            return;
        }
        if req.target as usize >= self.bus.max_targets() {
            self.reject_scsi_io(&req, MPT_IOCSTATUS_SCSI_INVALID_TARGETID);
            return;
        }

        let claimed = self
            .bus
            .get_device(req.target)
            .and_then(|medium| medium.alloc_request(req.lun()).ok().map(|h| (medium, h)));
        let Some((medium, handle)) = claimed else {
            debug!("{}: no device behind target {}", self.id, req.target);
            self.reject_scsi_io(&req, MPT_IOCSTATUS_SCSI_DEVICE_NOT_THERE);
            return;
        };

        let chain_offset = match req.chain_offset as u64 * 4 {
            0 => 0,
            off if off >= MPT_SCSI_IO_REQUEST_SIZE as u64 => off - MPT_SCSI_IO_REQUEST_SIZE as u64,
            off => {
                warn!("{}: chain offset {} points into the request", self.id, off);
                0
            }
        };
        let max_chains = self.state.lock().unwrap().request.entries();
        let task = LsiLogicTask {
            core: self.clone(),
            medium: medium.clone(),
            handle,
            frame,
            req,
            sg: MptSgList {
                start: frame + MPT_SCSI_IO_REQUEST_SIZE as u64,
                chain_offset,
                max_chains,
            },
        };
        let scsi_req = match ScsiRequest::new(
            req.lun(),
            req.cdb(),
            xfer_mode(&req),
            req.data_len as u64,
            SCSI_SENSE_FIXED_LEN,
            frame,
            handle,
            Box::new(task.clone()),
        ) {
            Ok(scsi_req) => scsi_req,
            Err(e) => {
                error!("{}: bad SCSI IO frame {:#x}: {:?}", self.id, frame, e);
                medium.free_request(handle);
                self.reject_scsi_io(&req, MPT_IOCSTATUS_INVALID_FIELD);
                return;
            }
        };
        self.bus.inc_outstanding(req.target);
        self.dispatch(scsi_req, task);
    }

    /// Read and run the frame behind one request FIFO descriptor.
    fn process_request_frame(self: &Arc<Self>, frame: u64) {
        let mut header = [0_u8; FRAME_HEADER_SIZE];
        if !self.read_guest(frame, &mut header) {
            return;
        }
        let function = header[3];
        let Some(size) = request_frame_size(function) else {
            warn!("{}: frame {:#x} has invalid function {:#x}", self.id, frame, function);
            let mut s = self.state.lock().unwrap();
            self.set_fault(&mut s, LSI_FAULT_INVALID_FUNCTION);
            return;
        };
        let mut raw = vec![0_u8; size];
        if !self.read_guest(frame, &mut raw) {
            return;
        }

        if function == MPT_FUNC_SCSI_IO_REQUEST {
            self.setup_scsi_io(frame, &raw);
        } else {
            let mut s = self.state.lock().unwrap();
            self.process_message(&mut s, &raw);
        }
    }

    /// Drain the request FIFO while the IOC is operational.
    pub(super) fn process_request_queue(self: &Arc<Self>) {
        loop {
            let frame = {
                let mut s = self.state.lock().unwrap();
                if s.ioc_state != IocState::Operational {
                    break;
                }
                match s.request.pop() {
                    Some(desc) => s.frame_addr(desc & !0x7),
                    None => break,
                }
            };
            self.process_request_frame(frame);
        }
    }
}
