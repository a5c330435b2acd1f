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

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use byteorder::{ByteOrder, LittleEndian};

use address_space::{AddressSpace, GuestAddress};
use devices::sysbus::{SysBus, IRQ_BASE, IRQ_MAX};
use devices::LineIrqManager;
use util::logger::init_log;

pub const TEST_RAM_SIZE: u64 = 0x100_0000;
pub const TIMEOUT_US: u64 = 5 * 1000 * 1000;
const POLL_INTERVAL_US: u64 = 100;

/// Interrupt controller stand-in recording what the devices drive.
#[derive(Default)]
pub struct TestIrqManager {
    levels: Mutex<HashMap<u32, bool>>,
    raises: Mutex<HashMap<u32, u32>>,
}

impl TestIrqManager {
    fn raise(&self, gsi: u32) {
        *self.raises.lock().unwrap().entry(gsi).or_insert(0) += 1;
    }
}

impl LineIrqManager for TestIrqManager {
    fn set_level_irq(&self, gsi: u32, level: bool) -> Result<()> {
        let prev = self.levels.lock().unwrap().insert(gsi, level);
        if level && prev != Some(true) {
            self.raise(gsi);
        }
        Ok(())
    }

    fn set_edge_irq(&self, gsi: u32) -> Result<()> {
        self.raise(gsi);
        Ok(())
    }
}

/// A machine reduced to guest RAM, a port I/O bus and an interrupt
/// controller, with the adapters living in the test process.
pub struct TestState {
    pub mem: Arc<AddressSpace>,
    pub sysbus: Arc<Mutex<SysBus>>,
    irq: Arc<TestIrqManager>,
}

impl TestState {
    pub fn new(ram_size: u64) -> Self {
        let mem = AddressSpace::new("test-ram");
        mem.add_ram(GuestAddress(0), ram_size).unwrap();
        let irq = Arc::new(TestIrqManager::default());
        let manager: Arc<dyn LineIrqManager> = irq.clone();
        let sysbus = Arc::new(Mutex::new(SysBus::new((IRQ_BASE, IRQ_MAX), Some(manager))));
        TestState { mem, sysbus, irq }
    }

    pub fn inb(&self, port: u64) -> u8 {
        let mut data = [0_u8; 1];
        SysBus::pio_read(&self.sysbus, port, &mut data);
        data[0]
    }

    pub fn inl(&self, port: u64) -> u32 {
        let mut data = [0_u8; 4];
        SysBus::pio_read(&self.sysbus, port, &mut data);
        LittleEndian::read_u32(&data)
    }

    pub fn outb(&self, port: u64, value: u8) {
        SysBus::pio_write(&self.sysbus, port, &[value]);
    }

    pub fn outl(&self, port: u64, value: u32) {
        SysBus::pio_write(&self.sysbus, port, &value.to_le_bytes());
    }

    pub fn memread(&self, addr: u64, size: u64) -> Vec<u8> {
        let mut buf = vec![0_u8; size as usize];
        let mut dst: &mut [u8] = &mut buf;
        self.mem.read(&mut dst, GuestAddress(addr), size).unwrap();
        buf
    }

    pub fn memwrite(&self, addr: u64, data: &[u8]) {
        let mut src = data;
        self.mem
            .write(&mut src, GuestAddress(addr), data.len() as u64)
            .unwrap();
    }

    pub fn readb(&self, addr: u64) -> u8 {
        self.memread(addr, 1)[0]
    }

    pub fn readl(&self, addr: u64) -> u32 {
        LittleEndian::read_u32(&self.memread(addr, 4))
    }

    pub fn writeb(&self, addr: u64, value: u8) {
        self.memwrite(addr, &[value]);
    }

    pub fn writel(&self, addr: u64, value: u32) {
        self.memwrite(addr, &value.to_le_bytes());
    }

    /// Current level of interrupt line `irq`.
    pub fn query_irq(&self, irq: u32) -> bool {
        self.irq
            .levels
            .lock()
            .unwrap()
            .get(&irq)
            .copied()
            .unwrap_or(false)
    }

    /// Number of times line `irq` went from low to high.
    pub fn irq_raises(&self, irq: u32) -> u32 {
        self.irq
            .raises
            .lock()
            .unwrap()
            .get(&irq)
            .copied()
            .unwrap_or(0)
    }
}

static LOG_INIT: Once = Once::new();

/// Log file shared by every test of this process.
pub fn test_log_path() -> PathBuf {
    std::env::temp_dir().join(format!("hbavirt_mod_test_{}.log", std::process::id()))
}

pub fn test_init() -> TestState {
    LOG_INIT.call_once(|| {
        if let Err(e) = init_log(test_log_path().to_string_lossy().into_owned()) {
            eprintln!("Failed to init test log: {:?}", e);
        }
    });
    TestState::new(TEST_RAM_SIZE)
}

/// Poll `cond` until it holds or `timeout_us` runs out.
pub fn wait_until<F: FnMut() -> bool>(timeout_us: u64, mut cond: F) -> bool {
    let deadline = Instant::now() + Duration::from_micros(timeout_us);
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_micros(POLL_INTERVAL_US));
    }
}
