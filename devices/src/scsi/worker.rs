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

//! One worker thread per adapter draining queued guest work.
//!
//! The vCPU side only flips the notification flag and signals the event on a
//! 0 -> 1 transition, so a burst of doorbell writes costs one wakeup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use log::{debug, error};
use vmm_sys_util::eventfd::EventFd;

use crate::ScsiError;

pub struct WorkerKick {
    event: EventFd,
    notification: AtomicBool,
    sleeping: AtomicBool,
    stop: AtomicBool,
}

impl WorkerKick {
    pub fn new() -> Result<Self> {
        Ok(WorkerKick {
            event: EventFd::new(libc::EFD_CLOEXEC).with_context(|| "Failed to create worker event")?,
            notification: AtomicBool::new(false),
            sleeping: AtomicBool::new(false),
            stop: AtomicBool::new(false),
        })
    }

    /// Wake the worker unless a wakeup is already on its way.
    pub fn notify(&self) {
        if !self.notification.swap(true, Ordering::SeqCst) {
            if let Err(e) = self.event.write(1) {
                error!("Failed to signal worker: {:?}", e);
            }
        }
    }

    pub fn notification(&self) -> bool {
        self.notification.load(Ordering::SeqCst)
    }

    pub fn set_notification(&self, value: bool) {
        self.notification.store(value, Ordering::SeqCst);
    }

    pub fn is_sleeping(&self) -> bool {
        self.sleeping.load(Ordering::SeqCst)
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Block until there is something to do. Returns false once stopped.
    fn wait(&self) -> bool {
        self.sleeping.store(true, Ordering::SeqCst);
        if !self.notification.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.event.read() {
                error!("Failed to wait for worker event: {:?}", e);
                return false;
            }
            if self.stopped() {
                return false;
            }
            self.notification.store(false, Ordering::SeqCst);
        }
        self.sleeping.store(false, Ordering::SeqCst);
        !self.stopped()
    }
}

/// Work run on the adapter thread after each wakeup.
pub trait WorkerHandler: Send + Sync {
    fn process(&self);
}

pub struct ScsiWorker {
    name: String,
    kick: Arc<WorkerKick>,
    handle: Option<JoinHandle<()>>,
}

impl ScsiWorker {
    pub fn spawn(
        name: &str,
        kick: Arc<WorkerKick>,
        handler: Arc<dyn WorkerHandler>,
    ) -> Result<Self> {
        let thread_kick = kick.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while thread_kick.wait() {
                    handler.process();
                }
                debug!("worker {:?} exits", thread::current().name());
            })
            .map_err(|_| anyhow!(ScsiError::WorkerSpawn(name.to_string())))?;

        Ok(ScsiWorker {
            name: name.to_string(),
            kick,
            handle: Some(handle),
        })
    }

    pub fn kick(&self) -> &Arc<WorkerKick> {
        &self.kick
    }

    pub fn stop(&mut self) {
        let handle = match self.handle.take() {
            Some(h) => h,
            None => return,
        };
        self.kick.stop.store(true, Ordering::SeqCst);
        if let Err(e) = self.kick.event.write(1) {
            error!("Failed to stop worker {}: {:?}", self.name, e);
            return;
        }
        if handle.join().is_err() {
            error!("Worker {} panicked", self.name);
        }
    }
}

impl Drop for ScsiWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
