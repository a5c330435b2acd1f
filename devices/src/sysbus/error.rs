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
pub enum SysBusError {
    #[error("Failed to register region in {0} space: offset={1:#x},size={2:#x}")]
    AddRegionErr(&'static str, u64, u64),
    #[error("Region {0} overlaps with region {1}")]
    RegionOverlap(String, String),
    #[error("Region {0} is not registered on the bus")]
    RegionNotFound(String),
    #[error("IRQ number exhausted")]
    IrqExhausted,
}
