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

use anyhow::Result;
use nix::time::{clock_gettime, ClockId};

use crate::UtilError;

pub const NANOSECONDS_PER_SECOND: u64 = 1_000_000_000;
pub const NANOSECONDS_PER_MILLISECOND: u64 = 1_000_000;

/// Get the wall clock time as (seconds, nanoseconds) since the epoch.
pub fn gettime() -> Result<(i64, u32)> {
    let ts = clock_gettime(ClockId::CLOCK_REALTIME)
        .map_err(|e| UtilError::GetTime(e.to_string()))?;
    Ok((ts.tv_sec(), ts.tv_nsec() as u32))
}

/// Break `sec` since the epoch into local [year, month, day, hour, minute, second].
pub fn get_format_time(sec: i64) -> [i32; 6] {
    // SAFETY: `tm` is plain data and is fully written by localtime_r.
    let mut ti: libc::tm = unsafe { std::mem::zeroed() };
    // SAFETY: both pointers reference valid local variables.
    unsafe {
        libc::localtime_r(&sec, &mut ti);
    }

    [
        ti.tm_year + 1900,
        ti.tm_mon + 1,
        ti.tm_mday,
        ti.tm_hour,
        ti.tm_min,
        ti.tm_sec,
    ]
}
