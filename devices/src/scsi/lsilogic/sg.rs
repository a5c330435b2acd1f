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

use anyhow::{bail, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use log::error;

use crate::scsi::bus::HostCursor;
use address_space::{AddressSpace, GuestAddress};

/// Flag bits in the top byte of an element's first dword.
const SGE_END_OF_LIST: u32 = 0x01 << 24;
const SGE_64BIT_ADDRESS: u32 = 0x02 << 24;
const SGE_END_OF_BUFFER: u32 = 0x40 << 24;
const SGE_LAST_ELEMENT: u32 = 0x80 << 24;
const SGE_TYPE_SHIFT: u32 = 28;
const SGE_TYPE_CHAIN: u32 = 3;

const SGE_SIMPLE32_SIZE: u64 = 8;
const SGE_SIMPLE64_SIZE: u64 = 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SgElement {
    Simple {
        addr: u64,
        len: u32,
        end_of_list: bool,
        end_of_buffer: bool,
        last: bool,
    },
    Chain {
        addr: u64,
        /// Offset of the next chain element inside the new segment, in bytes.
        next_offset: u64,
    },
}

fn read_element(mem: &AddressSpace, addr: u64) -> Result<(SgElement, u64)> {
    let mut raw = [0_u8; SGE_SIMPLE64_SIZE as usize];
    let mut dst: &mut [u8] = &mut raw[..SGE_SIMPLE32_SIZE as usize];
    mem.read(&mut dst, GuestAddress(addr), SGE_SIMPLE32_SIZE)
        .with_context(|| format!("Failed to read s/g element at 0x{:x}", addr))?;
    let flags = LittleEndian::read_u32(&raw[0..4]);
    let mut elem_addr = LittleEndian::read_u32(&raw[4..8]) as u64;
    let mut size = SGE_SIMPLE32_SIZE;
    if flags & SGE_64BIT_ADDRESS != 0 {
        let mut dst: &mut [u8] = &mut raw[8..];
        mem.read(&mut dst, GuestAddress(addr + SGE_SIMPLE32_SIZE), 4)
            .with_context(|| format!("Failed to read s/g element at 0x{:x}", addr))?;
        elem_addr |= (LittleEndian::read_u32(&raw[8..12]) as u64) << 32;
        size = SGE_SIMPLE64_SIZE;
    }

    let elem = if (flags >> SGE_TYPE_SHIFT) & 0x3 == SGE_TYPE_CHAIN {
        SgElement::Chain {
            addr: elem_addr,
            next_offset: ((flags >> 16) & 0xff) as u64 * 4,
        }
    } else {
        SgElement::Simple {
            addr: elem_addr,
            len: flags & 0x00ff_ffff,
            end_of_list: flags & SGE_END_OF_LIST != 0,
            end_of_buffer: flags & SGE_END_OF_BUFFER != 0,
            last: flags & SGE_LAST_ELEMENT != 0,
        }
    };
    Ok((elem, size))
}

/// Where the S/G list of one SCSI IO request lives.
#[derive(Clone, Copy, Debug, Default)]
pub struct MptSgList {
    /// First element, right behind the request frame.
    pub start: u64,
    /// Offset of the first chain element from `start`, 0 if none.
    pub chain_offset: u64,
    /// Chain elements followed before the list counts as looping.
    pub max_chains: u32,
}

struct Position {
    next: u64,
    segment_start: u64,
    chain_offset: u64,
    chains: u32,
}

impl Position {
    fn follow(&mut self, list: &MptSgList, addr: u64, next_offset: u64) -> Result<()> {
        self.chains += 1;
        if self.chains > list.max_chains {
            bail!("s/g list at 0x{:x} chains more than {} times", list.start, list.max_chains);
        }
        self.next = addr;
        self.segment_start = addr;
        self.chain_offset = next_offset;
        Ok(())
    }
}

fn walk<F>(
    mem: &AddressSpace,
    list: &MptSgList,
    cursor: &mut HostCursor,
    len: usize,
    copy: &mut F,
) -> Result<()>
where
    F: FnMut(GuestAddress, usize, usize) -> Result<()>,
{
    let mut remaining = len + cursor.skip;
    let mut pos = Position {
        next: list.start,
        segment_start: list.start,
        chain_offset: list.chain_offset,
        chains: 0,
    };

    'list: while remaining > 0 {
        // Walk one segment.
        let mut rebased = false;
        while remaining > 0 {
            let (elem, size) = read_element(mem, pos.next)?;
            match elem {
                SgElement::Chain { addr, next_offset } => {
                    pos.follow(list, addr, next_offset)?;
                    rebased = true;
                    break;
                }
                SgElement::Simple {
                    addr,
                    len,
                    end_of_list,
                    end_of_buffer,
                    last,
                } => {
                    if len == 0 && end_of_list && end_of_buffer {
                        break 'list;
                    }
                    let chunk = min(remaining, len as usize);
                    cursor.feed(addr, chunk, copy)?;
                    remaining -= chunk;
                    pos.next += size;
                    if end_of_list {
                        break 'list;
                    }
                    if last {
                        break;
                    }
                }
            }
        }

        if rebased || remaining == 0 {
            continue;
        }
        if pos.chain_offset == 0 {
            break;
        }
        match read_element(mem, pos.segment_start + pos.chain_offset)?.0 {
            SgElement::Chain { addr, next_offset } => pos.follow(list, addr, next_offset)?,
            SgElement::Simple { .. } => bail!(
                "no chain element at 0x{:x}",
                pos.segment_start + pos.chain_offset
            ),
        }
    }
    Ok(())
}

/// Walk the guest buffers of `list`, skipping the first `skip` bytes of the
/// transfer and handing at most `len` bytes to `copy` as (guest address,
/// host offset, length). Returns the bytes handed over.
pub fn sg_walk<F>(mem: &AddressSpace, list: &MptSgList, skip: usize, len: usize, mut copy: F) -> usize
where
    F: FnMut(GuestAddress, usize, usize) -> Result<()>,
{
    let mut cursor = HostCursor::new(skip);
    if let Err(e) = walk(mem, list, &mut cursor, len, &mut copy) {
        error!("LSI Logic data transfer stopped short: {:?}", e);
    }
    cursor.copied
}
