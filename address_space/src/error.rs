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

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AddressSpaceError {
    #[error("Util")]
    Util {
        #[from]
        source: util::error::UtilError,
    },
    #[error("Io")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("Failed to find matched region, addr 0x{0:X}")]
    RegionNotFound(u64),
    #[error("Address overflows, addr is 0x{0:X}")]
    Overflow(u64),
    #[error("Failed to mmap")]
    Mmap,
    #[error("Ram region 0x{0:X}+0x{1:X} overlaps an existing one")]
    RegionOverlap(u64, u64),
    #[error("Invalid offset: offset 0x{0:X}, data length 0x{1:X}, region size 0x{2:X}")]
    InvalidOffset(u64, u64, u64),
}
