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

pub mod error;

pub use error::ConfigError;

use anyhow::{anyhow, bail, Result};

/// Max length of identifiers given on the command line.
pub const MAX_STRING_LENGTH: usize = 255;

/// Split a `type,key=value,...` device option string into clap arguments.
///
/// # Arguments
///
/// * `args` - The option string, eg. "buslogic,id=hba0,irq=11".
/// * `first_pos_is_type` - The first item is the device type without a key.
/// * `first_pos_is_id` - The first item is the id without a key.
///
/// # Examples
///
/// ```rust
/// extern crate machine_manager;
/// use machine_manager::config::str_slip_to_clap;
///
/// let args = str_slip_to_clap("lsilogic,id=scsi0", true, false);
/// assert_eq!(args, vec!["--classtype", "lsilogic", "--id", "scsi0"]);
/// ```
pub fn str_slip_to_clap(args: &str, first_pos_is_type: bool, first_pos_is_id: bool) -> Vec<String> {
    let mut subargs = args.split(',');
    let mut itr: Vec<String> = Vec::new();

    if first_pos_is_type {
        if let Some(ty) = subargs.next() {
            itr.push("--classtype".to_string());
            itr.push(ty.to_string());
        }
    } else if first_pos_is_id {
        if let Some(id) = subargs.next() {
            itr.push("--id".to_string());
            itr.push(id.to_string());
        }
    }

    for subarg in subargs.filter(|s| !s.is_empty()) {
        match subarg.split_once('=') {
            Some((key, value)) => {
                itr.push(format!("--{}", key));
                itr.push(value.to_string());
            }
            // A bare key is a switch, eg. "bios" means "bios=on".
            None => {
                itr.push(format!("--{}", subarg));
                itr.push("on".to_string());
            }
        }
    }

    itr
}

/// Value parser for device ids.
pub fn valid_id(id: &str) -> Result<String> {
    if id.is_empty() {
        return Err(anyhow!(ConfigError::FieldIsMissing(
            "id".to_string(),
            "device".to_string()
        )));
    }
    if id.len() > MAX_STRING_LENGTH {
        return Err(anyhow!(ConfigError::StringLengthTooLong(
            "id".to_string(),
            MAX_STRING_LENGTH
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        bail!(ConfigError::InvalidParam(id.to_string(), "id".to_string()));
    }
    Ok(id.to_string())
}

/// Value parser for on/off switches.
pub fn parse_bool(s: &str) -> Result<bool> {
    match s {
        "on" | "true" => Ok(true),
        "off" | "false" => Ok(false),
        _ => Err(anyhow!(ConfigError::ConvertValueFailed(
            s.to_string(),
            "bool".to_string()
        ))),
    }
}

/// Check `value` lies in `[min, max]`, naming `name` in the error.
pub fn check_range(name: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if value < min || value > max {
        return Err(anyhow!(ConfigError::IllegalValue(
            name.to_string(),
            min,
            true,
            max,
            true
        )));
    }
    Ok(())
}
