//! IA-32 instruction templates.
//!
//! This is not an assembler. It covers exactly the encodings the resolvers
//! search for: register-direct, memory-direct with a 32-bit displacement,
//! register-indirect with an 8-bit displacement, and 8/32-bit immediates.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::{Pattern, Width};
use crate::image::Address;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "UPPERCASE")]
#[repr(u8)]
pub enum Reg {
    Eax = 0,
    Ecx = 1,
    Edx = 2,
    Ebx = 3,
    Esp = 4,
    Ebp = 5,
    Esi = 6,
    Edi = 7,
}

impl Reg {
    /// The 3-bit register number used in opcodes and ModRM bytes.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// A 32-bit operand slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Value(u32),
    /// Any four bytes
    Any,
    /// A negative value: `free` low bytes are wildcards, the rest are `FF`
    Negative { free: usize },
    /// An unknown value to read out of the match
    Capture(&'static str),
}

impl From<u32> for Operand {
    fn from(value: u32) -> Self {
        Operand::Value(value)
    }
}

impl From<Address> for Operand {
    fn from(addr: Address) -> Self {
        Operand::Value(addr.value())
    }
}

fn imm32(op: Operand) -> Pattern {
    match op {
        Operand::Value(value) => Pattern::literal(&value.to_le_bytes()),
        Operand::Any => Pattern::any(4),
        Operand::Negative { free } => {
            let free = free.min(4);
            Pattern::any(free) + Pattern::literal(&[0xFF; 4][..4 - free])
        }
        Operand::Capture(name) => Pattern::capture(name, Width::Dword),
    }
}

/// `MOV reg, imm32`
pub fn mov_reg_imm(reg: Reg, op: Operand) -> Pattern {
    Pattern::literal(&[0xB8 + reg.code()]) + imm32(op)
}

/// `MOV r32, dword ptr [disp32]` for any destination register
pub fn mov_any_reg_mem(op: Operand) -> Pattern {
    Pattern::literal(&[0x8B]) + Pattern::masked(0x05, 0xC7) + imm32(op)
}

/// `MOV r32, r32` for any register pair
pub fn mov_any_reg_any_reg() -> Pattern {
    Pattern::literal(&[0x8B]) + Pattern::masked(0xC0, 0xC0)
}

/// `MOV dword ptr [disp32], imm32`
pub fn mov_mem_imm(addr: Operand, value: Operand) -> Pattern {
    Pattern::literal(&[0xC7, 0x05]) + imm32(addr) + imm32(value)
}

/// `MOV byte ptr [EBP + disp32], imm8`
pub fn mov_byte_ebp_disp(disp: Operand, value: u8) -> Pattern {
    Pattern::literal(&[0xC6, 0x85]) + imm32(disp) + Pattern::literal(&[value])
}

/// `TEST rm, reg`
pub fn test_reg_reg(rm: Reg, reg: Reg) -> Pattern {
    Pattern::literal(&[0x85, 0xC0 | (reg.code() << 3) | rm.code()])
}

/// `SETNE byte ptr [disp32]`
pub fn setne_mem(op: Operand) -> Pattern {
    Pattern::literal(&[0x0F, 0x95, 0x05]) + imm32(op)
}

/// `PUSH imm32`
pub fn push_imm32(op: Operand) -> Pattern {
    Pattern::literal(&[0x68]) + imm32(op)
}

/// `PUSH imm8` (sign-extended)
pub fn push_imm8(value: u8) -> Pattern {
    Pattern::literal(&[0x6A, value])
}

/// `PUSH r32` for any register
pub fn push_any_reg() -> Pattern {
    Pattern::masked(0x50, 0xF8)
}

/// `CALL rel32`
pub fn call_rel(op: Operand) -> Pattern {
    Pattern::literal(&[0xE8]) + imm32(op)
}

/// ModRM bytes addressing `[r32]` (`mode` 0) or `[r32 + disp8]` (`mode` 1)
/// with `ext` in the reg field. Forms that take a SIB byte, and the
/// absolute `[disp32]` form, are left out.
fn register_indirect(mode: u8, ext: u8) -> Pattern {
    let values: Vec<u8> = (0..8u8)
        .filter(|&rm| rm != 0b100 && !(mode == 0 && rm == 0b101))
        .map(|rm| (mode << 6) | (ext << 3) | rm)
        .collect();
    Pattern::one_of(&values)
}

/// `CMP dword ptr [r32], imm32`
pub fn cmp_any_reg_mem_imm32(value: u32) -> Pattern {
    Pattern::literal(&[0x81]) + register_indirect(0, 7) + Pattern::literal(&value.to_le_bytes())
}

/// `CMP word ptr [r32 + disp8], imm16`
pub fn cmp_word_any_reg_disp8(disp: u8, value: u16) -> Pattern {
    Pattern::literal(&[0x66, 0x81])
        + register_indirect(1, 7)
        + Pattern::literal(&[disp])
        + Pattern::literal(&value.to_le_bytes())
}

/// `CMP byte ptr [r32 + disp8], imm8`
pub fn cmp_byte_any_reg_disp8(disp: u8, value: u8) -> Pattern {
    Pattern::literal(&[0x80]) + register_indirect(1, 7) + Pattern::literal(&[disp, value])
}

/// `JNE rel8`
pub fn jne_short() -> Pattern {
    Pattern::literal(&[0x75]) + Pattern::any(1)
}

pub fn int3() -> Pattern {
    Pattern::literal(&[0xCC])
}

pub fn nop() -> Pattern {
    Pattern::literal(&[0x90])
}

/// `PUSH EBP ; MOV EBP, ESP`
pub fn frame_prologue() -> Pattern {
    Pattern::literal(&[0x55, 0x8B, 0xEC])
}

/// Encode `MOV reg, imm32` for a known value.
pub fn encode_mov_imm(reg: Reg, value: u32) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(5);
    bytes.push(0xB8 + reg.code());
    bytes.extend_from_slice(&value.to_le_bytes());
    bytes
}
