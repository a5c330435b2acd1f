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

use std::fs::File;
use std::io::Write;
use std::num::Wrapping;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use log::{Level, LevelFilter, Log, Metadata, Record};
use nix::unistd::{getpid, gettid};

use crate::time::{get_format_time, gettime};
use crate::UtilError;

/// Environment variable selecting the log level.
pub const LOG_LEVEL_ENV: &str = "HBAVIRT_LOG_LEVEL";
// Max size of the log file is 100MB.
const LOG_ROTATE_SIZE_MAX: usize = 100 * 1024 * 1024;
// At most seven rotated files are kept.
const LOG_ROTATE_COUNT_MAX: u32 = 7;

fn format_now() -> String {
    let (sec, nsec) = gettime().unwrap_or_else(|e| {
        eprintln!("{:?}", e);
        (0, 0)
    });
    let t = get_format_time(sec);

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:09}",
        t[0], t[1], t[2], t[3], t[4], t[5], nsec
    )
}

struct FileRotate {
    handler: Box<dyn Write + Send>,
    path: String,
    current_size: Wrapping<usize>,
}

impl FileRotate {
    fn rotate_file(&mut self, size_inc: usize) -> Result<()> {
        if self.path.is_empty() {
            return Ok(());
        }

        self.current_size += Wrapping(size_inc);
        if self.current_size < Wrapping(LOG_ROTATE_SIZE_MAX) {
            return Ok(());
        }

        // Drop the oldest file, then shift "log", "log1".. one slot up.
        let mut rotate_count = LOG_ROTATE_COUNT_MAX - 1;
        let oldest = format!("{}{}", self.path, rotate_count);
        if Path::new(&oldest).exists() {
            std::fs::remove_file(&oldest)
                .with_context(|| format!("Failed to remove log file {}", oldest))?;
        }

        let mut path_to = oldest;
        while rotate_count != 0 {
            rotate_count -= 1;
            let mut path_from = self.path.clone();
            if rotate_count != 0 {
                path_from += &rotate_count.to_string();
            }
            if Path::new(&path_from).exists() {
                std::fs::rename(&path_from, &path_to).with_context(|| {
                    format!("Failed to rename log file from {} to {}", path_from, path_to)
                })?;
            }
            path_to = path_from;
        }

        self.handler = Box::new(open_log_file(&self.path)?);
        self.current_size = Wrapping(0);
        Ok(())
    }
}

/// Lines look like "%year-%mon-%dayT%hour:%min:%sec.%nsec [pid][tid][file: line]:LEVEL: msg".
struct HbaLogger {
    rotate: Mutex<FileRotate>,
    level: Level,
}

impl Log for HbaLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let formatmsg = format!(
            "{:<5}: [{}][{}][{}: {}]:{}: {}\n",
            format_now(),
            getpid().as_raw(),
            gettid().as_raw(),
            record.file().unwrap_or(""),
            record.line().unwrap_or(0),
            record.level(),
            record.args()
        );

        let mut rotate = self.rotate.lock().unwrap();
        if let Err(e) = rotate.handler.write_all(formatmsg.as_bytes()) {
            eprintln!("Failed to log message {:?}", e);
            return;
        }
        if let Err(e) = rotate.rotate_file(formatmsg.len()) {
            eprintln!("Failed to rotate log files {:?}", e);
        }
    }

    fn flush(&self) {
        let _ = self.rotate.lock().unwrap().handler.flush();
    }
}

/// Parse a level name as accepted in `HBAVIRT_LOG_LEVEL`.
pub fn parse_log_level(name: &str) -> Result<Level> {
    let level = match name.to_lowercase().as_str() {
        "error" => Level::Error,
        "warn" => Level::Warn,
        "info" => Level::Info,
        "debug" => Level::Debug,
        "trace" => Level::Trace,
        _ => return Err(UtilError::InvalidLogLevel(name.to_string()).into()),
    };
    Ok(level)
}

fn level_from_env() -> Level {
    match std::env::var(LOG_LEVEL_ENV) {
        Ok(l) => parse_log_level(&l).unwrap_or_else(|e| {
            eprintln!("{}, fall back to info", e);
            Level::Info
        }),
        _ => Level::Info,
    }
}

fn open_log_file(path: &str) -> Result<File> {
    std::fs::OpenOptions::new()
        .read(false)
        .write(true)
        .append(true)
        .create(true)
        .mode(0o640)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path))
}

/// Install the process logger. An empty `path` logs to stderr.
pub fn init_log(path: String) -> Result<()> {
    let (handler, current_size): (Box<dyn Write + Send>, usize) = if path.is_empty() {
        (Box::new(std::io::stderr()), 0)
    } else {
        let file = open_log_file(&path)?;
        let size = file.metadata()?.len() as usize;
        (Box::new(file), size)
    };

    let logger = HbaLogger {
        rotate: Mutex::new(FileRotate {
            handler,
            path: path.clone(),
            current_size: Wrapping(current_size),
        }),
        level: level_from_env(),
    };
    log::set_boxed_logger(Box::new(logger))
        .map(|()| log::set_max_level(LevelFilter::Trace))
        .with_context(|| format!("Failed to init logger: {}", path))
}
