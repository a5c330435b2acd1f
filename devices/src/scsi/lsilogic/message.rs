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

//! Fusion-MPT message frames and the control message handlers.

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};

use super::{
    IocState, LsiLogicCore, LsiLogicState, LSI_DEVICES_PER_BUS, LSI_MAX_CHAIN_DEPTH,
    LSI_MSG_MAX_DWORDS,
};

/// Message functions, byte 3 of every frame.
pub const MPT_FUNC_SCSI_IO_REQUEST: u8 = 0x00;
pub const MPT_FUNC_SCSI_TASK_MGMT: u8 = 0x01;
pub const MPT_FUNC_IOC_INIT: u8 = 0x02;
pub const MPT_FUNC_IOC_FACTS: u8 = 0x03;
pub const MPT_FUNC_CONFIG: u8 = 0x04;
pub const MPT_FUNC_PORT_FACTS: u8 = 0x05;
pub const MPT_FUNC_PORT_ENABLE: u8 = 0x06;
pub const MPT_FUNC_EVENT_NOTIFICATION: u8 = 0x07;
pub const MPT_FUNC_EVENT_ACK: u8 = 0x08;
pub const MPT_FUNC_FW_DOWNLOAD: u8 = 0x09;
pub const MPT_FUNC_FW_UPLOAD: u8 = 0x12;

/// IOCStatus values.
pub const MPT_IOCSTATUS_SUCCESS: u16 = 0x0000;
pub const MPT_IOCSTATUS_INVALID_FUNCTION: u16 = 0x0001;
pub const MPT_IOCSTATUS_INVALID_FIELD: u16 = 0x0007;
pub const MPT_IOCSTATUS_CONFIG_INVALID_PAGE: u16 = 0x0022;
pub const MPT_IOCSTATUS_SCSI_INVALID_BUS: u16 = 0x0041;
pub const MPT_IOCSTATUS_SCSI_INVALID_TARGETID: u16 = 0x0042;
pub const MPT_IOCSTATUS_SCSI_DEVICE_NOT_THERE: u16 = 0x0043;

/// SCSIState bits of a SCSI IO error reply.
pub const MPT_SCSI_STATE_AUTOSENSE_VALID: u8 = 0x01;
pub const MPT_SCSI_STATE_TERMINATED: u8 = 0x08;

pub const MPT_EVENT_EVENT_CHANGE: u32 = 0x0a;

/// Largest reply, IOC_FACTS.
pub const MPT_REPLY_MAX: usize = 60;
pub const MPT_SCSI_IO_REQUEST_SIZE: usize = 48;
const MPT_TASK_MGMT_REQUEST_SIZE: usize = 52;
const MPT_IOC_INIT_REQUEST_SIZE: usize = 24;
const MPT_CONFIG_REQUEST_SIZE: usize = 40;
const MPT_EVENT_ACK_REQUEST_SIZE: usize = 20;
const MPT_HEADER_SIZE: usize = 12;
const MPT_REQUEST_MAX: usize = LSI_MSG_MAX_DWORDS * 4;

const MPT_MSG_VERSION: u16 = 0x0102;
const MPT_PRODUCT_ID: u16 = 0xcafe;
const MPT_REQUEST_FRAME_SIZE: u16 = 128;
const MPT_NUMBER_OF_PORTS: u8 = 1;
const MPT_PORT_TYPE_SCSI: u8 = 0x01;
const MPT_PORT_SCSI_ID: u16 = 7;
/// SCSI initiator, LUNs supported.
const MPT_PORT_PROTOCOL_FLAGS: u16 = 1 << 3 | 1 << 0;

/// Firmware image header the guest may place in diagnostic memory.
const FW_IMAGE_LOAD_ADDRESS: u32 = 0x21ff_5e00;
const FW_IMAGE_SIGNATURES: [u32; 3] = [0x5aea_a55a, 0xa55a_eaa5, 0x5aa5_5aea];

/// Frame size the request FIFO reads for `function`, None if unknown.
pub fn request_frame_size(function: u8) -> Option<usize> {
    match function {
        MPT_FUNC_SCSI_IO_REQUEST => Some(MPT_SCSI_IO_REQUEST_SIZE),
        MPT_FUNC_SCSI_TASK_MGMT => Some(MPT_TASK_MGMT_REQUEST_SIZE),
        MPT_FUNC_IOC_INIT => Some(MPT_IOC_INIT_REQUEST_SIZE),
        MPT_FUNC_CONFIG => Some(MPT_CONFIG_REQUEST_SIZE),
        MPT_FUNC_EVENT_ACK => Some(MPT_EVENT_ACK_REQUEST_SIZE),
        MPT_FUNC_IOC_FACTS
        | MPT_FUNC_PORT_FACTS
        | MPT_FUNC_PORT_ENABLE
        | MPT_FUNC_EVENT_NOTIFICATION
        | MPT_FUNC_FW_DOWNLOAD
        | MPT_FUNC_FW_UPLOAD => Some(MPT_HEADER_SIZE),
        _ => None,
    }
}

/// Fields shared by every request frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MptHeader {
    pub chain_offset: u8,
    pub function: u8,
    pub flags: u8,
    pub context: u32,
}

impl MptHeader {
    pub fn decode(buf: &[u8]) -> Self {
        MptHeader {
            chain_offset: buf[2],
            function: buf[3],
            flags: buf[7],
            context: LittleEndian::read_u32(&buf[8..12]),
        }
    }
}

/// SCSI_IO_REQUEST frame, the S/G list follows at offset 48.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScsiIoRequest {
    pub target: u8,
    pub bus: u8,
    pub chain_offset: u8,
    pub cdb_len: u8,
    pub sense_len: u8,
    pub flags: u8,
    pub context: u32,
    pub lun: [u8; 8],
    pub control: u32,
    pub cdb: [u8; 16],
    pub data_len: u32,
    pub sense_low: u32,
}

pub const MPT_SCSI_IO_DIR_NONE: u32 = 0;
pub const MPT_SCSI_IO_DIR_WRITE: u32 = 1;
pub const MPT_SCSI_IO_DIR_READ: u32 = 2;

impl ScsiIoRequest {
    pub fn decode(buf: &[u8]) -> Self {
        let mut req = ScsiIoRequest {
            target: buf[0],
            bus: buf[1],
            chain_offset: buf[2],
            cdb_len: buf[4],
            sense_len: buf[5],
            flags: buf[7],
            context: LittleEndian::read_u32(&buf[8..12]),
            control: LittleEndian::read_u32(&buf[20..24]),
            data_len: LittleEndian::read_u32(&buf[40..44]),
            sense_low: LittleEndian::read_u32(&buf[44..48]),
            ..Default::default()
        };
        req.lun.copy_from_slice(&buf[12..20]);
        req.cdb.copy_from_slice(&buf[24..40]);
        req
    }

    pub fn direction(&self) -> u32 {
        (self.control >> 24) & 0x3
    }

    /// Single level LUN addressing.
    pub fn lun(&self) -> u16 {
        self.lun[1] as u16
    }

    pub fn cdb(&self) -> &[u8] {
        let len = (self.cdb_len as usize).min(self.cdb.len());
        &self.cdb[..len]
    }
}

/// Reply frame under construction.
#[derive(Clone, Copy)]
pub struct MptReply {
    pub buf: [u8; MPT_REPLY_MAX],
}

impl MptReply {
    /// Reply of `dwords` length to a request with `function` and `context`.
    pub fn new(function: u8, dwords: u8, context: u32) -> Self {
        let mut reply = MptReply {
            buf: [0; MPT_REPLY_MAX],
        };
        reply.buf[2] = dwords;
        reply.buf[3] = function;
        LittleEndian::write_u32(&mut reply.buf[8..12], context);
        reply
    }

    pub fn msg_len(&self) -> u8 {
        self.buf[2]
    }

    pub fn put_u8(&mut self, offset: usize, value: u8) -> &mut Self {
        self.buf[offset] = value;
        self
    }

    pub fn put_u16(&mut self, offset: usize, value: u16) -> &mut Self {
        LittleEndian::write_u16(&mut self.buf[offset..offset + 2], value);
        self
    }

    pub fn put_u32(&mut self, offset: usize, value: u32) -> &mut Self {
        LittleEndian::write_u32(&mut self.buf[offset..offset + 4], value);
        self
    }

    pub fn set_ioc_status(&mut self, status: u16) -> &mut Self {
        self.put_u16(14, status)
    }

    pub fn ioc_status(&self) -> u16 {
        LittleEndian::read_u16(&self.buf[14..16])
    }

    /// 16-bit word `idx` of a reply held in `buf`.
    pub fn word_of(buf: &[u8; MPT_REPLY_MAX], idx: usize) -> u16 {
        LittleEndian::read_u16(&buf[idx * 2..idx * 2 + 2])
    }

    /// Error reply of a SCSI IO request.
    pub fn scsi_io_error(req: &ScsiIoRequest, scsi_status: u8, scsi_state: u8, ioc_status: u16) -> Self {
        let mut reply = MptReply::new(MPT_FUNC_SCSI_IO_REQUEST, 8, req.context);
        reply
            .put_u8(0, req.target)
            .put_u8(1, req.bus)
            .put_u8(4, req.cdb_len)
            .put_u8(5, req.sense_len)
            .put_u8(7, req.flags)
            .put_u8(12, scsi_status)
            .put_u8(13, scsi_state)
            .set_ioc_status(ioc_status);
        reply
    }
}

impl LsiLogicCore {
    /// Firmware version, image size and product id of a valid image header
    /// in diagnostic memory.
    fn firmware_image(&self, s: &LsiLogicState) -> Option<(u32, u32, u16)> {
        let base = FW_IMAGE_LOAD_ADDRESS;
        for (i, signature) in FW_IMAGE_SIGNATURES.iter().enumerate() {
            if s.diag_read(base + 4 * (i as u32 + 1)) != *signature {
                return None;
            }
        }
        let product = (s.diag_read(base + 32) >> 16) as u16;
        Some((s.diag_read(base + 36), s.diag_read(base + 44), product))
    }

    fn ioc_facts(&self, s: &LsiLogicState, reply: &mut MptReply) {
        let (fw_version, fw_size, product) = self
            .firmware_image(s)
            .unwrap_or((0, 0, MPT_PRODUCT_ID));
        reply.put_u8(2, 15);
        reply
            .put_u16(0, MPT_MSG_VERSION)
            .put_u8(6, 0)
            .put_u8(20, LSI_MAX_CHAIN_DEPTH)
            .put_u8(21, s.who_init)
            .put_u8(22, (MPT_SCSI_IO_REQUEST_SIZE / 4) as u8)
            .put_u8(23, 0)
            .put_u16(24, (s.reply_post.entries() - 1) as u16)
            .put_u16(26, MPT_REQUEST_FRAME_SIZE)
            .put_u16(30, product)
            .put_u32(32, s.host_mfa_high)
            .put_u16(36, (s.request.entries() - 1) as u16)
            .put_u8(38, MPT_NUMBER_OF_PORTS)
            .put_u8(39, 0)
            .put_u32(40, s.sense_high)
            .put_u16(44, s.reply_frame_size)
            .put_u8(46, s.max_devices)
            .put_u8(47, s.max_buses)
            .put_u32(48, fw_size)
            .put_u32(56, fw_version);
    }

    fn ioc_init(&self, s: &mut LsiLogicState, req: &[u8], reply: &mut MptReply) {
        s.who_init = req[0];
        s.max_devices = req[5];
        s.max_buses = req[6];
        s.reply_frame_size = LittleEndian::read_u16(&req[12..14]);
        s.host_mfa_high = LittleEndian::read_u32(&req[16..20]);
        s.sense_high = LittleEndian::read_u32(&req[20..24]);
        if s.ioc_state == IocState::Ready {
            s.ioc_state = IocState::Operational;
        }
        debug!(
            "{}: IOC_INIT who {} devices {} buses {} frame {} mfa high {:#x}",
            self.id, s.who_init, s.max_devices, s.max_buses, s.reply_frame_size, s.host_mfa_high
        );
        reply
            .put_u8(0, s.who_init)
            .put_u8(5, s.max_devices)
            .put_u8(6, s.max_buses);
    }

    fn port_facts(&self, req: &[u8], reply: &mut MptReply) {
        let port = req[6];
        reply.put_u8(2, 10).put_u8(6, port);
        if port < MPT_NUMBER_OF_PORTS {
            reply
                .put_u8(21, MPT_PORT_TYPE_SCSI)
                .put_u16(22, LSI_DEVICES_PER_BUS as u16)
                .put_u16(24, MPT_PORT_SCSI_ID)
                .put_u16(26, MPT_PORT_PROTOCOL_FLAGS);
        }
    }

    /// No configuration pages are implemented, every request gets the page
    /// header echoed with CONFIG_INVALID_PAGE.
    fn config_request(&self, req: &[u8], reply: &mut MptReply) {
        reply.put_u8(2, 6).put_u8(0, req[0]);
        reply.buf[4..8].copy_from_slice(&req[4..8]);
        reply.buf[20..24].copy_from_slice(&req[20..24]);
        debug!(
            "{}: CONFIG action {} page type {:#x} number {}",
            self.id, req[0], req[23], req[22]
        );
        reply.set_ioc_status(MPT_IOCSTATUS_CONFIG_INVALID_PAGE);
    }

    /// Handle a control message received through the doorbell or the
    /// request FIFO and post its reply.
    pub(super) fn process_message(&self, s: &mut LsiLogicState, frame: &[u8]) {
        let mut req = [0_u8; MPT_REQUEST_MAX];
        let n = frame.len().min(MPT_REQUEST_MAX);
        req[..n].copy_from_slice(&frame[..n]);
        let hdr = MptHeader::decode(&req);
        let mut reply = MptReply::new(hdr.function, 5, hdr.context);
        let mut force_fifo = false;
        debug!("{}: message function {:#x}", self.id, hdr.function);

        match hdr.function {
            MPT_FUNC_SCSI_TASK_MGMT => {
                reply.put_u8(2, 6).put_u8(5, req[5]).put_u32(20, 0);
                force_fifo = true;
            }
            MPT_FUNC_IOC_INIT => self.ioc_init(s, &req, &mut reply),
            MPT_FUNC_IOC_FACTS => self.ioc_facts(s, &mut reply),
            MPT_FUNC_PORT_FACTS => self.port_facts(&req, &mut reply),
            MPT_FUNC_PORT_ENABLE => {
                reply.put_u8(6, req[6]);
            }
            MPT_FUNC_EVENT_NOTIFICATION => {
                s.event_notification = req[0] != 0;
                reply
                    .put_u8(2, 8)
                    .put_u16(0, 1)
                    .put_u8(6, 0)
                    .put_u8(7, 0x80)
                    .put_u32(20, MPT_EVENT_EVENT_CHANGE)
                    .put_u32(24, 0)
                    .put_u32(28, s.event_notification as u32);
            }
            MPT_FUNC_EVENT_ACK | MPT_FUNC_FW_DOWNLOAD => {}
            MPT_FUNC_CONFIG => self.config_request(&req, &mut reply),
            MPT_FUNC_FW_UPLOAD => {
                reply.put_u8(2, 6).put_u8(0, req[0]).put_u32(20, 0);
            }
            other => {
                warn!("{}: invalid message function {:#x}", self.id, other);
                reply.set_ioc_status(MPT_IOCSTATUS_INVALID_FUNCTION);
            }
        }
        self.finish_address_reply(s, &reply, force_fifo);
    }
}
