//! Build-date and toolchain thresholds.
//!
//! # Where these come from
//!
//! None of these values are derived from first principles. Each marks the
//! first (or last) client build where some compiler setting, string table or
//! feature was observed to change. They must stay exact: moving a boundary
//! by a day silently misclassifies real clients.
//!
//! ```text
//!   2008-11 ── sakray clientinfo (sclientinfo.xml) appears
//!   2010    ── 'sdata.grf' → 'data.grf'
//!   2010-08-03 ─┐
//!   2011-08-17  │ packet keys present from here on
//!               │ hidden login window
//!   2017-10-18 ─┤ (non-Zero clients keep it until 2018-11-14)
//!   2018-11-14 ─┘
//!   2022       ── code section gains ~0x3000 bytes of leading stubs
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::image::LinkerVersion;

/// Clients built after this date use 'data.grf' instead of 'sdata.grf'.
pub const POST_2010: u32 = 20100000;

/// Clients built after this date have extra code before the first regular function.
pub const CODE_SHIFT_AFTER: u32 = 20220000;

/// Size of that extra code.
pub const CODE_SHIFT: u32 = 0x3000;

/// Length of the window searched for a frame-pointer prologue.
pub const PROLOGUE_WINDOW: u32 = 0x500;

/// Hidden login window: present after this date...
pub const HIDDEN_LOGIN_FROM: u32 = 20100803;

/// ...and before this one,
pub const HIDDEN_LOGIN_UNTIL: u32 = 20171018;

/// ...or before this one for non-Zero clients.
pub const HIDDEN_LOGIN_UNTIL_NON_ZERO: u32 = 20181114;

/// First build with packet obfuscation keys.
pub const PACKET_KEYS_FROM: u32 = 20110817;

/// Builds before this date only know 'clientinfo.xml'.
pub const SAKRAY_CLIENT_INFO_FROM: u32 = 20081100;

/// First linker major version of the VC14 toolchain.
pub const VC14_MAJOR: u8 = 14;

/// VC14.29 builds compare some strings piecewise instead of pushing them.
pub const SPLIT_COMPARE_LINKER: LinkerVersion = LinkerVersion::new(14, 29);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub post_2010: u32,
    pub code_shift_after: u32,
    pub code_shift: u32,
    pub prologue_window: u32,
    pub hidden_login_from: u32,
    pub hidden_login_until: u32,
    pub hidden_login_until_non_zero: u32,
    pub packet_keys_from: u32,
    pub sakray_client_info_from: u32,
    pub vc14_major: u8,
    pub split_compare_linker: LinkerVersion,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            post_2010: POST_2010,
            code_shift_after: CODE_SHIFT_AFTER,
            code_shift: CODE_SHIFT,
            prologue_window: PROLOGUE_WINDOW,
            hidden_login_from: HIDDEN_LOGIN_FROM,
            hidden_login_until: HIDDEN_LOGIN_UNTIL,
            hidden_login_until_non_zero: HIDDEN_LOGIN_UNTIL_NON_ZERO,
            packet_keys_from: PACKET_KEYS_FROM,
            sakray_client_info_from: SAKRAY_CLIENT_INFO_FROM,
            vc14_major: VC14_MAJOR,
            split_compare_linker: SPLIT_COMPARE_LINKER,
        }
    }
}

pub fn load_thresholds<P: AsRef<Path>>(path: P) -> Result<Thresholds> {
    let content = fs::read_to_string(&path)?;
    let data = serde_json::from_str(&content)?;
    Ok(data)
}

pub fn save_thresholds<P: AsRef<Path>>(path: P, thresholds: &Thresholds) -> Result<()> {
    let content = serde_json::to_string_pretty(thresholds)?;
    fs::write(path, content)?;
    Ok(())
}
