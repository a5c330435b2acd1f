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

use std::sync::RwLock;
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;

static TEST_ENABLED: OnceCell<bool> = OnceCell::new();
static TEST_BASE_TIME: OnceCell<Instant> = OnceCell::new();
static TEST_CLOCK: RwLock<u64> = RwLock::new(0);

/// Switch the process into test mode, where time comes from a virtual clock.
pub fn set_test_enabled() {
    let _ = TEST_ENABLED.set(true);
    let _ = TEST_BASE_TIME.set(Instant::now());
}

pub fn is_test_enabled() -> bool {
    *TEST_ENABLED.get_or_init(|| false)
}

/// Move the virtual clock forward to `value` nanoseconds. It never goes back.
pub fn set_test_clock(value: u64) {
    let mut test_clock = TEST_CLOCK.write().unwrap();
    if value > *test_clock {
        *test_clock = value;
    }
}

pub fn get_test_clock() -> u64 {
    *TEST_CLOCK.read().unwrap()
}

pub fn get_test_time() -> Instant {
    let base = *TEST_BASE_TIME.get_or_init(Instant::now);
    base + Duration::from_nanos(get_test_clock())
}
