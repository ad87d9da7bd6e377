//! Client-wide facts computed once per session.
//!
//! Every resolver needs some of these (is this a renewal client, does the
//! code use a frame pointer, which name does the data archive have), and all
//! of them are pure functions of the image. [`Facts::compute`] runs the scans
//! in one go; the session caches the result.

mod thresholds;

use std::path::Path;

use strum::Display;
use tracing::debug;

use crate::image::{Address, BuildDate, LinkerVersion, ReadImage, TextOptions};
use crate::pattern::x86::{self, Reg};
use crate::resolver::{Describe, Field};

pub use thresholds::*;

const RENEWAL_MARKER: &str = "rdata.grf";
const ZERO_MARKER: &str = "Software\\Gravity Soft\\RenewSetup Zero";
const CASH_SHOP: &str = "NC_CashShop";
const ROULETTE_ICON: &str = "유저인터페이스\\basic_interface\\roullette\\RoulletteIcon.bmp";
const ADVENTURER_AGENCY: &str = "adventurerAgency";
const KERNEL32: &str = "KERNEL32.dll";
const CLIENT_INFO: &str = "clientinfo.xml";
const SAKRAY_CLIENT_INFO: &str = "sclientinfo.xml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ClientVariant {
    Main,
    Renewal,
    Zero,
}

/// The default client info XML and where its name is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub name: &'static str,
    /// VIRTUAL address of the name, absent for clients that predate the lookup
    pub address: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Facts {
    pub build_date: BuildDate,
    pub linker: LinkerVersion,
    pub base_name: String,
    /// `major.minor` of the linker
    pub full_version: String,

    /// PHYSICAL address of 'rdata.grf'
    pub rdata_grf: Option<Address>,
    pub is_renewal: bool,
    pub is_zero: bool,
    /// Neither renewal nor zero
    pub is_main: bool,

    pub post_2010: bool,
    pub has_frame_pointer: bool,
    /// Register used for stack-relative accesses: EBP with a frame pointer, else ESP
    pub stack_reg: Reg,
    pub has_hidden_login: bool,
    pub has_packet_keys: bool,

    // VIRTUAL addresses of commonly used strings
    pub cash_shop: Option<Address>,
    pub roulette: Option<Address>,
    pub adventurer_agency: Option<Address>,
    pub kernel32: Option<Address>,
    pub client_info: ClientInfo,

    thresholds: Thresholds,
}

impl Facts {
    pub fn compute<I: ReadImage + ?Sized>(image: &I, thresholds: &Thresholds) -> Self {
        let meta = image.meta();
        let build_date = meta.build_date;
        let date = build_date.value();
        debug!("Computing client facts (built {}, linker {})...", build_date, meta.linker);

        debug!("Phase 1: Classifying client variant...");
        let rdata_grf = image
            .find_text(RENEWAL_MARKER.as_bytes(), TextOptions::default().physical())
            .map(Address::phys);
        let is_renewal = rdata_grf.is_some();
        let is_zero = image
            .find_text(
                ZERO_MARKER.as_bytes(),
                TextOptions::default().physical().unbounded(),
            )
            .is_some();
        let is_main = !is_renewal && !is_zero;
        debug!("  renewal={}, zero={}, main={}", is_renewal, is_zero, is_main);

        debug!("Phase 2: Checking for frame pointers...");
        let has_frame_pointer = detect_frame_pointer(image, date, thresholds);
        let stack_reg = if has_frame_pointer { Reg::Ebp } else { Reg::Esp };
        debug!("  frame pointer={}, stack register={}", has_frame_pointer, stack_reg);

        let post_2010 = date > thresholds.post_2010;
        let has_hidden_login = date > thresholds.hidden_login_from
            && (date < thresholds.hidden_login_until
                || (date < thresholds.hidden_login_until_non_zero && !is_zero));
        let has_packet_keys = date >= thresholds.packet_keys_from;

        debug!("Phase 3: Locating common strings...");
        let find_virtual =
            |text: &[u8], opts: TextOptions| image.find_text(text, opts).map(Address::virt);
        let cash_shop = find_virtual(CASH_SHOP.as_bytes(), TextOptions::default());
        let roulette = find_virtual(
            encode_euc_kr(ROULETTE_ICON).as_slice(),
            TextOptions::default().case_insensitive(),
        );
        let adventurer_agency = find_virtual(ADVENTURER_AGENCY.as_bytes(), TextOptions::default());

        // newer clients store it in lowercase, not always after a NUL
        let kernel32 = find_virtual(KERNEL32.as_bytes(), TextOptions::default().case_insensitive())
            .or_else(|| {
                find_virtual(
                    KERNEL32.as_bytes(),
                    TextOptions::default().case_insensitive().unbounded(),
                )
            });

        let client_info = if date < thresholds.sakray_client_info_from {
            ClientInfo {
                name: CLIENT_INFO,
                address: None,
            }
        } else {
            let opts = TextOptions::default().case_insensitive();
            match find_virtual(SAKRAY_CLIENT_INFO.as_bytes(), opts) {
                Some(address) => ClientInfo {
                    name: SAKRAY_CLIENT_INFO,
                    address: Some(address),
                },
                None => ClientInfo {
                    name: CLIENT_INFO,
                    address: find_virtual(CLIENT_INFO.as_bytes(), opts),
                },
            }
        };
        debug!("  client info: {} at {:?}", client_info.name, client_info.address);

        let base_name = Path::new(&meta.file_name)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            build_date,
            linker: meta.linker,
            base_name,
            full_version: meta.linker.full(),
            rdata_grf,
            is_renewal,
            is_zero,
            is_main,
            post_2010,
            has_frame_pointer,
            stack_reg,
            has_hidden_login,
            has_packet_keys,
            cash_shop,
            roulette,
            adventurer_agency,
            kernel32,
            client_info,
            thresholds: thresholds.clone(),
        }
    }

    /// Zero takes precedence over renewal.
    pub fn variant(&self) -> ClientVariant {
        if self.is_zero {
            ClientVariant::Zero
        } else if self.is_renewal {
            ClientVariant::Renewal
        } else {
            ClientVariant::Main
        }
    }

    pub fn is_vc14(&self) -> bool {
        self.linker.major >= self.thresholds.vc14_major
    }

    /// Whether short string literals are compared piecewise instead of pushed.
    pub fn uses_split_string_compare(&self) -> bool {
        self.linker == self.thresholds.split_compare_linker
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }
}

/// Look for `PUSH EBP ; MOV EBP, ESP` right after a run of padding near the
/// start of the code. Padding is INT3 in most builds and NOP in some.
fn detect_frame_pointer<I: ReadImage + ?Sized>(image: &I, date: u32, t: &Thresholds) -> bool {
    let (code_start, _) = image.code_range();
    let shift = if date > t.code_shift_after { t.code_shift } else { 0 };
    let from = code_start.saturating_add(shift);
    let to = from.saturating_add(t.prologue_window);

    [x86::int3(), x86::nop()].iter().any(|padding| {
        let pattern = padding.repeat(5) + x86::frame_prologue();
        image.find_pattern_in(&pattern, from, to).is_some()
    })
}

/// Encode text the way the client's Korean resource paths are stored.
pub fn encode_euc_kr(text: &str) -> Vec<u8> {
    let (bytes, _, _) = encoding_rs::EUC_KR.encode(text);
    bytes.into_owned()
}

impl Describe for Facts {
    fn fields(&self) -> Vec<Field> {
        vec![
            Field::text("base_name", self.base_name.as_str()),
            Field::text("full_version", self.full_version.as_str()),
            Field::text("build_date", self.build_date.to_string()),
            Field::text("variant", self.variant().to_string()),
            Field::optional_address("rdata_grf", self.rdata_grf),
            Field::flag("is_renewal", self.is_renewal),
            Field::flag("is_zero", self.is_zero),
            Field::flag("is_main", self.is_main),
            Field::flag("post_2010", self.post_2010),
            Field::flag("has_frame_pointer", self.has_frame_pointer),
            Field::text("stack_reg", self.stack_reg.to_string()),
            Field::flag("has_hidden_login", self.has_hidden_login),
            Field::flag("has_packet_keys", self.has_packet_keys),
            Field::optional_address("cash_shop", self.cash_shop),
            Field::optional_address("roulette", self.roulette),
            Field::optional_address("adventurer_agency", self.adventurer_agency),
            Field::optional_address("kernel32", self.kernel32),
            Field::text("client_info", self.client_info.name),
            Field::optional_address("client_info_addr", self.client_info.address),
        ]
    }
}
