use tracing::debug;

use super::{GlobalVar, find_flag_assignment};
use crate::error::{Error, Result};
use crate::image::{Address, ReadImage, TextOptions};
use crate::pattern::x86::{self, Operand};
use crate::resolver::{Resolver, Session};

const SERVICE_TYPE: &str = "g_serviceType";

/// The client's service (language) type global.
///
/// The string 'america' is handled right before `g_serviceType` gets set to 1.
pub struct LangType;

impl Resolver for LangType {
    const NAME: &'static str = "LANGTYPE";
    type Value = GlobalVar;

    fn resolve<I: ReadImage + ?Sized>(cx: &Session<'_, I>) -> Result<GlobalVar> {
        let image = cx.image();

        debug!("Phase 1: Searching 'america'...");
        let next = match image.find_text(b"america", TextOptions::default()) {
            Some(anchor) => find_after_push(cx, Address::virt(anchor))?,
            None if cx.facts().uses_split_string_compare() => find_after_split_compare(image)?,
            None => return Err(Error::AnchorNotFound("'america' not found".to_string())),
        };

        debug!("Phase 2: Searching assignment to {}...", SERVICE_TYPE);
        find_flag_assignment(image, next, SERVICE_TYPE)
    }
}

/// PHYSICAL address to continue from once the string has been located.
fn find_after_push<I: ReadImage + ?Sized>(cx: &Session<'_, I>, anchor: Address) -> Result<u32> {
    let image = cx.image();
    let not_used = || Error::PatternNotFound("'america' not used".to_string());

    let push = x86::push_imm32(anchor.into());
    if let Some(m) = image.find_pattern(&push) {
        return Ok(m.end(&push));
    }

    if !cx.facts().uses_split_string_compare() {
        return Err(not_used());
    }

    // VC14.29 copies the string into a local buffer instead of pushing it
    debug!("  PUSH not found, trying register copy...");
    let copy = x86::mov_any_reg_mem(anchor.into())
        + x86::mov_byte_ebp_disp(Operand::Negative { free: 2 }, 0);
    let copied = image.find_pattern(&copy).ok_or_else(not_used)?;

    let call = x86::push_imm8(7)
        + x86::push_any_reg()
        + x86::push_any_reg()
        + x86::push_any_reg()
        + x86::call_rel(Operand::Any);
    let m = image
        .find_pattern_in(&call, copied.offset + 0x40, copied.offset + 0x100)
        .ok_or_else(not_used)?;
    Ok(m.offset)
}

/// VC14.29 may compare against 'america' in parts instead of storing the string.
fn find_after_split_compare<I: ReadImage + ?Sized>(image: &I) -> Result<u32> {
    debug!("  'america' missing, trying split comparison...");
    let code = x86::cmp_any_reg_mem_imm32(u32::from_le_bytes(*b"amer"))
        + x86::jne_short()
        + x86::cmp_word_any_reg_disp8(4, u16::from_le_bytes(*b"ic"))
        + x86::jne_short()
        + x86::cmp_byte_any_reg_disp8(6, b'a');

    image
        .find_pattern(&code)
        .map(|m| m.end(&code))
        .ok_or_else(|| Error::AnchorNotFound("'america' not found in parts".to_string()))
}
