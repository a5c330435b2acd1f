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

//! Guest memory layouts used by the BusLogic/Adaptec mailbox protocol.
//!
//! Legacy (24-bit) and extended (32-bit) structures share byte offsets for
//! the fields the adapter rewrites, but are decoded into one canonical form
//! here so nothing else needs to know which variant the guest picked.

use byteorder::{ByteOrder, LittleEndian};

use crate::ScsiBus::{CHECK_CONDITION, GOOD, SCSI_CMD_BUF_SIZE};
use util::num_ops::{read_u24_be, write_u24_be};

/// Outgoing mailbox action codes.
pub const ACTION_FREE: u8 = 0x00;
pub const ACTION_START: u8 = 0x01;
pub const ACTION_ABORT: u8 = 0x02;

/// Incoming mailbox completion codes.
pub const COMPLETION_FREE: u8 = 0x00;
pub const COMPLETION_WITHOUT_ERROR: u8 = 0x01;
pub const COMPLETION_ABORTED: u8 = 0x02;
pub const COMPLETION_ABORTED_NOT_FOUND: u8 = 0x03;
pub const COMPLETION_WITH_ERROR: u8 = 0x04;
pub const COMPLETION_INVALID_CCB: u8 = 0x05;

/// Host adapter status codes.
pub const HA_CMD_COMPLETED: u8 = 0x00;
pub const HA_LINKED_CMD_COMPLETED: u8 = 0x0a;
pub const HA_LINKED_CMD_COMPLETED_WITH_FLAG: u8 = 0x0b;
pub const HA_DATA_UNDERRUN: u8 = 0x0c;
pub const HA_SELECTION_TIMEOUT: u8 = 0x11;
pub const HA_DATA_OVERRUN: u8 = 0x12;
pub const HA_UNEXPECTED_BUS_FREE: u8 = 0x13;
pub const HA_INVALID_BUS_PHASE_REQUESTED: u8 = 0x14;
pub const HA_INVALID_OUTGOING_MAILBOX_ACTION_CODE: u8 = 0x15;
pub const HA_INVALID_COMMAND_OPERATION_CODE: u8 = 0x16;
pub const HA_LINKED_CCB_HAS_INVALID_LUN: u8 = 0x17;
pub const HA_INVALID_COMMAND_PARAMETER: u8 = 0x1a;
pub const HA_AUTO_REQUEST_SENSE_FAILED: u8 = 0x1b;
pub const HA_HARDWARE_FAILED: u8 = 0x20;
pub const HA_ABORT_QUEUE_GENERATED: u8 = 0x26;
pub const HA_SOFTWARE_ERROR: u8 = 0x27;

/// Device status as reported in the incoming mailbox.
pub const DEV_OPERATION_GOOD: u8 = GOOD;
pub const DEV_CHECK_CONDITION: u8 = CHECK_CONDITION;
pub const DEV_BUSY: u8 = 0x08;

/// CCB operation codes.
pub const CCB_OPCODE_INITIATOR: u8 = 0x00;
pub const CCB_OPCODE_TARGET: u8 = 0x01;
pub const CCB_OPCODE_INITIATOR_SG: u8 = 0x02;
pub const CCB_OPCODE_INITIATOR_RESIDUAL_DATA: u8 = 0x03;
pub const CCB_OPCODE_INITIATOR_RESIDUAL_SG: u8 = 0x04;
pub const CCB_OPCODE_BUS_DEVICE_RESET: u8 = 0x81;

/// CCB data direction.
pub const CCB_DIRECTION_UNKNOWN: u8 = 0x00;
pub const CCB_DIRECTION_IN: u8 = 0x01;
pub const CCB_DIRECTION_OUT: u8 = 0x02;
pub const CCB_DIRECTION_NO_DATA: u8 = 0x03;

pub const MAILBOX24_SIZE: u64 = 4;
pub const MAILBOX32_SIZE: u64 = 8;
/// Bytes fetched for any CCB, the size of the extended layout.
pub const CCB_FETCH_SIZE: usize = 40;
/// Leading CCB bytes rewritten on completion, up to and including the status.
pub const CCB_WRITEBACK_SIZE: usize = 18;
/// Offset of the CDB, identical in both layouts.
pub const CCB_CDB_OFFSET: u64 = 18;
pub const SGE24_SIZE: usize = 6;
pub const SGE32_SIZE: usize = 8;

/// Size of the ESCMD block built by EXECUTE_SCSI_COMMAND.
pub const ESCMD_HEADER_SIZE: usize = 12;

/// Canonical outgoing mailbox entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MailboxOut {
    pub ccb_addr: u32,
    pub action: u8,
}

impl MailboxOut {
    pub fn decode(raw: &[u8], legacy: bool) -> Self {
        if legacy {
            MailboxOut {
                action: raw[0],
                ccb_addr: read_u24_be(&raw[1..4]),
            }
        } else {
            MailboxOut {
                ccb_addr: LittleEndian::read_u32(&raw[0..4]),
                action: raw[7],
            }
        }
    }

    /// Offset of the action code inside an entry.
    pub fn action_offset(legacy: bool) -> u64 {
        if legacy {
            0
        } else {
            7
        }
    }
}

/// Canonical incoming mailbox entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MailboxIn {
    pub ccb_addr: u32,
    pub host_status: u8,
    pub device_status: u8,
    pub completion: u8,
}

impl MailboxIn {
    pub fn encode(&self, legacy: bool) -> Vec<u8> {
        if legacy {
            let mut raw = vec![0_u8; MAILBOX24_SIZE as usize];
            raw[0] = self.completion;
            write_u24_be(&mut raw[1..4], self.ccb_addr);
            raw
        } else {
            let mut raw = vec![0_u8; MAILBOX32_SIZE as usize];
            LittleEndian::write_u32(&mut raw[0..4], self.ccb_addr);
            raw[4] = self.host_status;
            raw[5] = self.device_status;
            raw[7] = self.completion;
            raw
        }
    }

    pub fn decode(raw: &[u8], legacy: bool) -> Self {
        if legacy {
            MailboxIn {
                completion: raw[0],
                ccb_addr: read_u24_be(&raw[1..4]),
                ..Default::default()
            }
        } else {
            MailboxIn {
                ccb_addr: LittleEndian::read_u32(&raw[0..4]),
                host_status: raw[4],
                device_status: raw[5],
                completion: raw[7],
            }
        }
    }
}

/// Command control block decoded from either layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ccb {
    pub legacy: bool,
    pub opcode: u8,
    pub direction: u8,
    pub cdb_len: u8,
    pub sense_len: u8,
    pub data_len: u32,
    pub data_ptr: u32,
    pub host_status: u8,
    pub device_status: u8,
    pub target: u8,
    pub lun: u8,
    pub cdb: [u8; SCSI_CMD_BUF_SIZE],
    /// Only meaningful for the extended layout.
    pub sense_ptr: u32,
}

impl Ccb {
    pub fn decode(raw: &[u8; CCB_FETCH_SIZE], legacy: bool) -> Self {
        let mut cdb = [0_u8; SCSI_CMD_BUF_SIZE];
        cdb.copy_from_slice(&raw[18..18 + SCSI_CMD_BUF_SIZE]);
        let mut ccb = Ccb {
            legacy,
            opcode: raw[0],
            direction: (raw[1] >> 3) & 0x3,
            cdb_len: raw[2],
            sense_len: raw[3],
            host_status: raw[14],
            device_status: raw[15],
            cdb,
            ..Default::default()
        };
        if legacy {
            ccb.lun = raw[1] & 0x7;
            ccb.target = raw[1] >> 5;
            ccb.data_len = read_u24_be(&raw[4..7]);
            ccb.data_ptr = read_u24_be(&raw[7..10]);
        } else {
            ccb.data_len = LittleEndian::read_u32(&raw[4..8]);
            ccb.data_ptr = LittleEndian::read_u32(&raw[8..12]);
            ccb.target = raw[16];
            ccb.lun = raw[17] & 0x1f;
            ccb.sense_ptr = LittleEndian::read_u32(&raw[36..40]);
        }
        ccb
    }

    /// Encode the fields the adapter may modify, merged over the guest's
    /// original bytes so reserved and link fields survive.
    pub fn encode_head(&self, orig: &[u8; CCB_FETCH_SIZE]) -> [u8; CCB_WRITEBACK_SIZE] {
        let mut raw = [0_u8; CCB_WRITEBACK_SIZE];
        raw.copy_from_slice(&orig[..CCB_WRITEBACK_SIZE]);
        if self.legacy {
            write_u24_be(&mut raw[4..7], self.data_len);
        } else {
            LittleEndian::write_u32(&mut raw[4..8], self.data_len);
        }
        raw[14] = self.host_status;
        raw[15] = self.device_status;
        raw
    }

    /// CDB bytes handed to the medium.
    pub fn cdb(&self) -> &[u8] {
        let len = (self.cdb_len as usize).min(SCSI_CMD_BUF_SIZE);
        &self.cdb[..len]
    }

    pub fn is_sg(&self) -> bool {
        self.opcode == CCB_OPCODE_INITIATOR_SG || self.opcode == CCB_OPCODE_INITIATOR_RESIDUAL_SG
    }

    pub fn is_direct(&self) -> bool {
        self.opcode == CCB_OPCODE_INITIATOR || self.opcode == CCB_OPCODE_INITIATOR_RESIDUAL_DATA
    }

    pub fn wants_residual(&self) -> bool {
        self.opcode == CCB_OPCODE_INITIATOR_RESIDUAL_DATA
            || self.opcode == CCB_OPCODE_INITIATOR_RESIDUAL_SG
    }

    /// TEST UNIT READY style CCBs move no data whatever length they claim.
    pub fn zero_length_quirk(&self) -> bool {
        self.cdb[0] == 0
    }

    /// Data length with the zero-opcode quirk applied.
    pub fn effective_data_len(&self) -> u32 {
        if self.zero_length_quirk() {
            0
        } else {
            self.data_len
        }
    }

    /// Sense bytes the guest accepts: 0 means 14 bytes, 1 means none.
    pub fn sense_buffer_len(&self) -> usize {
        match self.sense_len {
            0 => 14,
            1 => 0,
            n => n as usize,
        }
    }

    /// Guest address the sense data is copied to.
    pub fn sense_addr(&self, ccb_addr: u64) -> u64 {
        if self.legacy {
            ccb_addr + self.cdb_len as u64 + CCB_CDB_OFFSET
        } else {
            self.sense_ptr as u64
        }
    }
}

/// Scatter/gather entry, normalized to 32 bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SgEntry {
    pub len: u32,
    pub addr: u32,
}

impl SgEntry {
    pub fn entry_size(legacy: bool) -> usize {
        if legacy {
            SGE24_SIZE
        } else {
            SGE32_SIZE
        }
    }

    pub fn decode(raw: &[u8], legacy: bool) -> Self {
        if legacy {
            SgEntry {
                len: read_u24_be(&raw[0..3]),
                addr: read_u24_be(&raw[3..6]),
            }
        } else {
            SgEntry {
                len: LittleEndian::read_u32(&raw[0..4]),
                addr: LittleEndian::read_u32(&raw[4..8]),
            }
        }
    }
}

/// EXECUTE_SCSI_COMMAND parameter block as collected in the command buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Escmd {
    pub data_len: u32,
    pub data_ptr: u32,
    pub target: u8,
    pub lun: u8,
    pub direction: u8,
    pub cdb_len: u8,
    pub cdb: [u8; SCSI_CMD_BUF_SIZE],
}

impl Escmd {
    pub fn decode(buf: &[u8]) -> Self {
        let mut cdb = [0_u8; SCSI_CMD_BUF_SIZE];
        let avail = buf.len().saturating_sub(ESCMD_HEADER_SIZE).min(SCSI_CMD_BUF_SIZE);
        cdb[..avail].copy_from_slice(&buf[ESCMD_HEADER_SIZE..ESCMD_HEADER_SIZE + avail]);
        Escmd {
            data_len: LittleEndian::read_u32(&buf[0..4]),
            data_ptr: LittleEndian::read_u32(&buf[4..8]),
            target: buf[8],
            lun: buf[9],
            direction: (buf[10] >> 3) & 0x3,
            cdb_len: buf[11],
            cdb,
        }
    }

    pub fn cdb(&self) -> &[u8] {
        let len = (self.cdb_len as usize).min(SCSI_CMD_BUF_SIZE);
        &self.cdb[..len]
    }
}
