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

use std::time::Instant;

use crate::test_helper::{get_test_time, is_test_enabled};

/// Monotonic time used by device models for guest-visible delays.
///
/// Under the test harness this follows the virtual clock so timing-dependent
/// register behavior can be stepped deterministically.
pub fn get_current_time() -> Instant {
    if is_test_enabled() {
        get_test_time()
    } else {
        Instant::now()
    }
}
