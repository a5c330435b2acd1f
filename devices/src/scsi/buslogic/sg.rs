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

use anyhow::{Context, Result};
use log::error;

use super::ccb::{Ccb, SgEntry, CCB_DIRECTION_NO_DATA};
use crate::scsi::bus::HostCursor;
use address_space::{AddressSpace, GuestAddress};

/// Entries fetched from the guest list per read.
const SG_BATCH: usize = 32;

fn read_sg_entries(
    mem: &AddressSpace,
    addr: u64,
    count: usize,
    legacy: bool,
) -> Result<Vec<SgEntry>> {
    let size = SgEntry::entry_size(legacy);
    let total = count * size;
    let mut raw = vec![0_u8; total];
    let mut dst: &mut [u8] = &mut raw;
    mem.read(&mut dst, GuestAddress(addr), total as u64)
        .with_context(|| format!("Failed to read s/g list at 0x{:x}", addr))?;
    Ok(raw.chunks(size).map(|c| SgEntry::decode(c, legacy)).collect())
}

fn walk<F>(mem: &AddressSpace, ccb: &Ccb, cursor: &mut HostCursor, len: usize, copy: &mut F) -> Result<()>
where
    F: FnMut(GuestAddress, usize, usize) -> Result<()>,
{
    let data_len = ccb.effective_data_len() as usize;
    if data_len == 0 || ccb.direction == CCB_DIRECTION_NO_DATA {
        return Ok(());
    }
    let mut remaining = len + cursor.skip;

    if ccb.is_sg() {
        let entry_size = SgEntry::entry_size(ccb.legacy);
        let mut entries_left = data_len / entry_size;
        let mut list_addr = ccb.data_ptr as u64;
        while entries_left > 0 && remaining > 0 {
            let batch = min(entries_left, SG_BATCH);
            entries_left -= batch;
            for entry in read_sg_entries(mem, list_addr, batch, ccb.legacy)? {
                if remaining == 0 {
                    break;
                }
                let chunk = min(remaining, entry.len as usize);
                cursor.feed(entry.addr as u64, chunk, copy)?;
                remaining -= chunk;
            }
            list_addr += (batch * entry_size) as u64;
        }
    } else if ccb.is_direct() {
        let chunk = min(data_len, remaining);
        cursor.feed(ccb.data_ptr as u64, chunk, copy)?;
    }
    Ok(())
}

/// Walk the data area described by `ccb`, skipping the first `skip` bytes of
/// the logical transfer and handing at most `len` bytes to `copy` as
/// (guest address, host offset, length) triples. Returns the bytes handed
/// over; a guest memory failure ends the walk early.
pub fn sg_walk<F>(mem: &AddressSpace, ccb: &Ccb, skip: usize, len: usize, mut copy: F) -> usize
where
    F: FnMut(GuestAddress, usize, usize) -> Result<()>,
{
    let mut cursor = HostCursor::new(skip);
    if let Err(e) = walk(mem, ccb, &mut cursor, len, &mut copy) {
        error!("BusLogic data transfer stopped short: {:?}", e);
    }
    cursor.copied
}

/// Size of the guest buffer a CCB describes.
pub fn query_data_buffer_size(mem: &AddressSpace, ccb: &Ccb) -> u64 {
    let data_len = ccb.effective_data_len() as usize;
    if data_len == 0 || ccb.direction == CCB_DIRECTION_NO_DATA {
        return 0;
    }
    if ccb.is_direct() {
        return data_len as u64;
    }
    if !ccb.is_sg() {
        return 0;
    }

    let entry_size = SgEntry::entry_size(ccb.legacy);
    let mut entries_left = data_len / entry_size;
    let mut list_addr = ccb.data_ptr as u64;
    let mut total = 0_u64;
    while entries_left > 0 {
        let batch = min(entries_left, SG_BATCH);
        entries_left -= batch;
        match read_sg_entries(mem, list_addr, batch, ccb.legacy) {
            Ok(entries) => total += entries.iter().map(|e| e.len as u64).sum::<u64>(),
            Err(e) => {
                error!("{:?}", e);
                break;
            }
        }
        list_addr += (batch * entry_size) as u64;
    }
    total
}
