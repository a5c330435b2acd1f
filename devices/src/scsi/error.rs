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
pub enum ScsiError {
    #[error("AddressSpace")]
    AddressSpace {
        #[from]
        source: address_space::AddressSpaceError,
    },
    #[error("Io")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("Target {0} is out of range (max {1})")]
    InvalidTarget(u8, usize),
    #[error("Target {0} has already been attached")]
    TargetBusy(u8),
    #[error("No medium attached at target {0}")]
    TargetAbsent(u8),
    #[error("Failed to allocate a request on target {0}")]
    AllocFailed(u8),
    #[error("Invalid {0} value {1}")]
    InvalidConfig(&'static str, String),
    #[error("Failed to spawn worker thread {0}")]
    WorkerSpawn(String),
    #[error("Guest memory access at 0x{0:x} length {1} failed")]
    GuestMemory(u64, u64),
}
