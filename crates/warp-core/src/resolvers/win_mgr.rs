use tracing::debug;

use crate::error::{Error, Result};
use crate::image::{Address, ReadImage, TextOptions};
use crate::pattern::x86::{self, Operand, Reg};
use crate::resolver::{AsAddress, Describe, Field, Resolver, Session};

const WINDOW_MGR: &str = "g_windowMgr";

/// The UI window manager, found where the account count window gets created.
pub struct WinMgr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowMgr {
    /// VIRTUAL address of `g_windowMgr`
    pub address: Address,
    /// VIRTUAL address of `UIWindowMgr::MakeWindow`
    pub make_window: Address,
    /// `MOV ECX, g_windowMgr`
    pub mov_ecx: Vec<u8>,
}

impl AsAddress for WindowMgr {
    fn as_address(&self) -> Address {
        self.address
    }
}

impl Describe for WindowMgr {
    fn fields(&self) -> Vec<Field> {
        vec![
            Field::address("value", self.address),
            Field::address("make_window", self.make_window),
            Field::bytes("mov_ecx", &self.mov_ecx),
        ]
    }
}

impl Resolver for WinMgr {
    const NAME: &'static str = "WINMGR";
    type Value = WindowMgr;

    fn resolve<I: ReadImage + ?Sized>(cx: &Session<'_, I>) -> Result<WindowMgr> {
        let image = cx.image();

        debug!("Phase 1: Searching 'NUMACCOUNT'...");
        let anchor = image
            .find_text(b"NUMACCOUNT", TextOptions::default())
            .ok_or_else(|| Error::AnchorNotFound("'NUMACCOUNT' not found".to_string()))?;

        debug!("Phase 2: Searching MakeWindow call...");
        // MOV ECX, g_windowMgr ; CALL UIWindowMgr::MakeWindow ; PUSH 0 ; PUSH 0 ; PUSH anchor
        let head = x86::mov_reg_imm(Reg::Ecx, Operand::Capture(WINDOW_MGR))
            + x86::call_rel(Operand::Negative { free: 3 })
            + x86::push_imm8(0);
        let tail = x86::push_imm8(0) + x86::push_imm32(Operand::Value(anchor));

        let code = head.clone() + tail.clone();
        let m = match image.find_pattern(&code) {
            Some(m) => m,
            None => {
                debug!("  trying with a register copy after the first PUSH 0...");
                let code = head + x86::mov_any_reg_any_reg() + tail;
                image
                    .find_pattern(&code)
                    .ok_or_else(|| Error::PatternNotFound("'NUMACCOUNT' not used".to_string()))?
            }
        };

        let value = m
            .capture(WINDOW_MGR)
            .ok_or_else(|| Error::PatternNotFound("'NUMACCOUNT' not used".to_string()))?;
        let make_window = image.call_target(m.offset + 5)?;
        debug!("  {}: 0x{:X}, MakeWindow: 0x{:X}", WINDOW_MGR, value, make_window);

        Ok(WindowMgr {
            address: Address::virt(value),
            make_window: Address::virt(make_window),
            mov_ecx: x86::encode_mov_imm(Reg::Ecx, value),
        })
    }
}
