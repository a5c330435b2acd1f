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

use log::{debug, warn};

use super::ccb::{
    Ccb, MailboxIn, MailboxOut, ACTION_ABORT, ACTION_FREE, ACTION_START, CCB_FETCH_SIZE,
    COMPLETION_ABORTED_NOT_FOUND, COMPLETION_WITH_ERROR, DEV_OPERATION_GOOD,
    HA_INVALID_OUTGOING_MAILBOX_ACTION_CODE, MAILBOX32_SIZE,
};
use super::{BusLogicCore, BusLogicState, BL_INTR_IMBL};

impl BusLogicCore {
    fn read_outgoing(&self, s: &BusLogicState) -> (u64, MailboxOut) {
        let addr = s.mbx.out_base + s.mbx.out_cursor as u64 * s.mbx.entry_size();
        let mut raw = [0_u8; MAILBOX32_SIZE as usize];
        let len = s.mbx.entry_size() as usize;
        if !self.read_guest(addr, &mut raw[..len]) {
            // Unreadable slots look free.
            return (addr, MailboxOut::default());
        }
        (addr, MailboxOut::decode(&raw[..len], s.mbx.legacy))
    }

    fn advance_outgoing(s: &mut BusLogicState) {
        if s.mbx.count != 0 {
            s.mbx.out_cursor = (s.mbx.out_cursor + 1) % s.mbx.count;
        }
    }

    /// Serve the next loaded outgoing mailbox. Returns false once no loaded
    /// mailbox is left.
    pub(super) fn process_mailbox_next(self: &Arc<Self>) -> bool {
        let (slot, entry, legacy, strict) = {
            let mut s = self.state.lock().unwrap();
            if s.mbx.count == 0 {
                return false;
            }
            let (slot, entry) = if s.strict_round_robin {
                self.read_outgoing(&s)
            } else {
                // Look for a loaded slot, giving up after one lap.
                let start = s.mbx.out_cursor;
                loop {
                    let (slot, entry) = self.read_outgoing(&s);
                    Self::advance_outgoing(&mut s);
                    if entry.action != ACTION_FREE || s.mbx.out_cursor == start {
                        break (slot, entry);
                    }
                }
            };
            (slot, entry, s.mbx.legacy, s.strict_round_robin)
        };

        if entry.action == ACTION_FREE {
            debug!("{}: no loaded mailbox left", self.id);
            return false;
        }

        // Hand the slot back to the guest before looking at the CCB.
        self.write_guest(slot + MailboxOut::action_offset(legacy), &[ACTION_FREE]);

        match entry.action {
            ACTION_START => self.setup_request(entry.ccb_addr as u64),
            ACTION_ABORT => self.abort_request(entry.ccb_addr as u64),
            other => {
                warn!(
                    "{}: invalid action {:#x} for CCB at {:#x}",
                    self.id, other, entry.ccb_addr
                );
                self.send_incoming_mailbox(
                    entry.ccb_addr,
                    None,
                    HA_INVALID_OUTGOING_MAILBOX_ACTION_CODE,
                    DEV_OPERATION_GOOD,
                    COMPLETION_WITH_ERROR,
                );
            }
        }

        if strict {
            Self::advance_outgoing(&mut self.state.lock().unwrap());
        }
        true
    }

    /// Post a completion for the CCB at `ccb_addr` and raise IMBL. The CCB
    /// status bytes are written back first unless the abort found nothing.
    pub(super) fn send_incoming_mailbox(
        &self,
        ccb_addr: u32,
        ccb: Option<(&Ccb, &[u8; CCB_FETCH_SIZE])>,
        host_status: u8,
        device_status: u8,
        completion: u8,
    ) {
        let mut s = self.state.lock().unwrap();
        if s.mbx.count == 0 {
            warn!(
                "{}: completion for CCB at {:#x} dropped, no mailboxes",
                self.id, ccb_addr
            );
            return;
        }

        if completion != COMPLETION_ABORTED_NOT_FOUND {
            if let Some((ccb, raw)) = ccb {
                let mut done = *ccb;
                done.host_status = host_status;
                done.device_status = device_status;
                self.write_guest(ccb_addr as u64, &done.encode_head(raw));
            }
        }

        let addr = s.mbx.in_base + s.mbx.in_cursor as u64 * s.mbx.entry_size();
        let entry = MailboxIn {
            ccb_addr,
            host_status,
            device_status,
            completion,
        };
        debug!(
            "{}: CCB at {:#x} done, hstat {:#x} dstat {:#x} code {}, slot {}",
            self.id, ccb_addr, host_status, device_status, completion, s.mbx.in_cursor
        );
        self.write_guest(addr, &entry.encode(s.mbx.legacy));
        s.mbx.in_cursor = (s.mbx.in_cursor + 1) % s.mbx.count;
        self.set_interrupt(&mut s, false, BL_INTR_IMBL);
    }
}
