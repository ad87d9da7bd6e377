//! Byte patterns with wildcards and captures.
//!
//! A [`Pattern`] is an ordered list of [`Segment`]s. Its byte length is known
//! before any search runs, which is what resolvers rely on when they compute
//! "the address just past this sequence" from a match offset.
//!
//! Patterns are usually assembled from the instruction templates in [`x86`]
//! and concatenated with `+`:
//!
//! ```ignore
//! use warp_core::pattern::x86::{self, Operand, Reg};
//!
//! let code = x86::mov_reg_imm(Reg::Ecx, Operand::Capture("g_windowMgr"))
//!     + x86::call_rel(Operand::Negative { free: 3 })
//!     + x86::push_imm8(0);
//! assert_eq!(code.len(), 12);
//! ```

pub mod x86;

use std::fmt;
use std::ops::Add;

use crate::error::{Error, Result};

/// Width of a capture segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    Byte = 1,
    Word = 2,
    Dword = 4,
}

impl Width {
    pub fn bytes(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Exact bytes
    Literal(Vec<u8>),
    /// N bytes of any value, not captured
    Wildcard(usize),
    /// One byte where only the bits in `mask` are compared
    Masked { value: u8, mask: u8 },
    /// One byte equal to any of the listed values
    OneOf(Vec<u8>),
    /// Little-endian value that is either bound before the search (then it
    /// matches like a literal) or read out of the match afterwards
    Capture {
        name: &'static str,
        width: Width,
        bound: Option<u32>,
    },
}

impl Segment {
    pub fn len(&self) -> usize {
        match self {
            Segment::Literal(bytes) => bytes.len(),
            Segment::Wildcard(n) => *n,
            Segment::Masked { .. } | Segment::OneOf(_) => 1,
            Segment::Capture { width, .. } => width.bytes(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pattern {
    segments: Vec<Segment>,
}

impl Pattern {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn literal(bytes: &[u8]) -> Self {
        Self::new().with(Segment::Literal(bytes.to_vec()))
    }

    pub fn any(count: usize) -> Self {
        Self::new().with(Segment::Wildcard(count))
    }

    pub fn masked(value: u8, mask: u8) -> Self {
        Self::new().with(Segment::Masked { value, mask })
    }

    pub fn one_of(values: &[u8]) -> Self {
        Self::new().with(Segment::OneOf(values.to_vec()))
    }

    pub fn capture(name: &'static str, width: Width) -> Self {
        Self::new().with(Segment::Capture {
            name,
            width,
            bound: None,
        })
    }

    /// Append a segment, merging adjacent literals and wildcards.
    pub fn with(mut self, segment: Segment) -> Self {
        if segment.is_empty() {
            return self;
        }
        let merged = match (self.segments.last_mut(), &segment) {
            (Some(Segment::Literal(prev)), Segment::Literal(next)) => {
                prev.extend_from_slice(next);
                true
            }
            (Some(Segment::Wildcard(prev)), Segment::Wildcard(next)) => {
                *prev += *next;
                true
            }
            _ => false,
        };
        if !merged {
            self.segments.push(segment);
        }
        self
    }

    pub fn then(self, other: Pattern) -> Self {
        other.segments.into_iter().fold(self, Pattern::with)
    }

    pub fn repeat(&self, count: usize) -> Self {
        (0..count).map(|_| self.clone()).collect()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Total byte length; the sum of every segment's width.
    pub fn len(&self) -> usize {
        self.segments.iter().map(Segment::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Bind a capture to a concrete value so it matches as literal bytes.
    pub fn bind(mut self, name: &str, value: u32) -> Self {
        for segment in &mut self.segments {
            if let Segment::Capture {
                name: seg_name,
                bound,
                ..
            } = segment
                && *seg_name == name
            {
                *bound = Some(value);
            }
        }
        self
    }

    /// Byte offset of the first capture called `name`.
    pub fn offset_of(&self, name: &str) -> Option<usize> {
        let mut offset = 0;
        for segment in &self.segments {
            if let Segment::Capture { name: seg_name, .. } = segment
                && *seg_name == name
            {
                return Some(offset);
            }
            offset += segment.len();
        }
        None
    }

    /// Parse the textual signature form, e.g. `"B9 ?? ?? ?? ?? 5? E8"`.
    ///
    /// Each token is two hex digits; either digit may be `?` to leave that
    /// nibble free. A lone `?` is a whole wildcard byte. `50/F8` compares
    /// only the mask bits and `38|39|3E` accepts any of the listed bytes.
    pub fn parse(text: &str) -> Result<Self> {
        let mut pattern = Pattern::new();
        for token in text.split_whitespace() {
            pattern = pattern.with(parse_token(token)?);
        }

        if pattern.is_empty() {
            return Err(Error::InvalidPattern("pattern is empty".to_string()));
        }
        Ok(pattern)
    }

    /// `(value, mask)` for every byte; unbound captures are all-zero masks.
    pub(crate) fn compile(&self) -> Vec<(u8, u8)> {
        let mut compiled = Vec::with_capacity(self.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(bytes) => compiled.extend(bytes.iter().map(|&b| (b, 0xFF))),
                Segment::Wildcard(n) => compiled.extend(std::iter::repeat_n((0, 0), *n)),
                Segment::Masked { value, mask } => compiled.push((*value & *mask, *mask)),
                Segment::OneOf(values) => compiled.push(common_bits(values)),
                Segment::Capture {
                    width,
                    bound: Some(value),
                    ..
                } => compiled.extend(
                    value.to_le_bytes()[..width.bytes()]
                        .iter()
                        .map(|&b| (b, 0xFF)),
                ),
                Segment::Capture { width, .. } => {
                    compiled.extend(std::iter::repeat_n((0, 0), width.bytes()))
                }
            }
        }
        compiled
    }

    /// Check the constraints `compile` can only approximate against `bytes`,
    /// which start at a candidate offset.
    pub(crate) fn accepts(&self, bytes: &[u8]) -> bool {
        let mut pos = 0;
        for segment in &self.segments {
            if let Segment::OneOf(values) = segment
                && !bytes.get(pos).is_some_and(|b| values.contains(b))
            {
                return false;
            }
            pos += segment.len();
        }
        true
    }

    /// Read every capture out of `bytes`, which start at the match offset.
    pub(crate) fn extract(&self, offset: u32, bytes: &[u8]) -> Match {
        let mut captures = Vec::new();
        let mut pos = 0;
        for segment in &self.segments {
            if let Segment::Capture { name, width, .. } = segment {
                let mut raw = [0u8; 4];
                let n = width.bytes();
                if let Some(src) = bytes.get(pos..pos + n) {
                    raw[..n].copy_from_slice(src);
                    captures.push((*name, u32::from_le_bytes(raw)));
                }
            }
            pos += segment.len();
        }
        Match { offset, captures }
    }
}

/// `(value, mask)` keeping only the bits every value agrees on.
fn common_bits(values: &[u8]) -> (u8, u8) {
    let Some(&first) = values.first() else {
        return (0, 0);
    };
    let differ = values.iter().fold(0u8, |acc, &b| acc | (b ^ first));
    (first & !differ, !differ)
}

fn parse_hex_byte(text: &str) -> Option<u8> {
    if text.len() != 2 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(text, 16).ok()
}

fn parse_token(token: &str) -> Result<Segment> {
    if token == "?" || token == "??" {
        return Ok(Segment::Wildcard(1));
    }

    let invalid = || Error::InvalidPattern(format!("Invalid signature token '{}'", token));

    if token.contains('|') {
        let values = token
            .split('|')
            .map(parse_hex_byte)
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(invalid)?;
        return Ok(Segment::OneOf(values));
    }

    if let Some((value, mask)) = token.split_once('/') {
        let value = parse_hex_byte(value).ok_or_else(invalid)?;
        let mask = parse_hex_byte(mask).ok_or_else(invalid)?;
        return Ok(match mask {
            0xFF => Segment::Literal(vec![value]),
            0x00 => Segment::Wildcard(1),
            _ => Segment::Masked {
                value: value & mask,
                mask,
            },
        });
    }

    let chars: Vec<char> = token.chars().collect();
    if chars.len() != 2 {
        return Err(invalid());
    }

    let mut value = 0u8;
    let mut mask = 0u8;
    for ch in chars {
        value <<= 4;
        mask <<= 4;
        if ch != '?' {
            value |= ch.to_digit(16).ok_or_else(invalid)? as u8;
            mask |= 0xF;
        }
    }

    Ok(if mask == 0xFF {
        Segment::Literal(vec![value])
    } else {
        Segment::Masked { value, mask }
    })
}

impl Add for Pattern {
    type Output = Pattern;

    fn add(self, rhs: Pattern) -> Pattern {
        self.then(rhs)
    }
}

impl FromIterator<Pattern> for Pattern {
    fn from_iter<T: IntoIterator<Item = Pattern>>(iter: T) -> Self {
        iter.into_iter().fold(Pattern::new(), Pattern::then)
    }
}

fn masked_token(value: u8, mask: u8) -> String {
    match mask {
        0xFF => format!("{:02X}", value),
        0xF0 => format!("{:X}?", value >> 4),
        0x0F => format!("?{:X}", value & 0xF),
        0x00 => "??".to_string(),
        _ => format!("{:02X}/{:02X}", value & mask, mask),
    }
}

/// Unbound captures are written as wildcards, so parsing the text back
/// yields an equivalent pattern without capture names.
impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tokens: Vec<String> = Vec::with_capacity(self.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(bytes) => {
                    tokens.extend(bytes.iter().map(|b| format!("{:02X}", b)))
                }
                Segment::Wildcard(n) => {
                    tokens.extend(std::iter::repeat_n("??".to_string(), *n))
                }
                Segment::Masked { value, mask } => tokens.push(masked_token(*value, *mask)),
                Segment::OneOf(values) => tokens.push(
                    values
                        .iter()
                        .map(|b| format!("{:02X}", b))
                        .collect::<Vec<_>>()
                        .join("|"),
                ),
                Segment::Capture {
                    width,
                    bound: Some(value),
                    ..
                } => tokens.extend(
                    value.to_le_bytes()[..width.bytes()]
                        .iter()
                        .map(|b| format!("{:02X}", b)),
                ),
                Segment::Capture { width, .. } => {
                    tokens.extend(std::iter::repeat_n("??".to_string(), width.bytes()))
                }
            }
        }
        write!(f, "{}", tokens.join(" "))
    }
}

/// A successful pattern search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// PHYSICAL offset of the first matched byte
    pub offset: u32,
    captures: Vec<(&'static str, u32)>,
}

impl Match {
    pub fn capture(&self, name: &str) -> Option<u32> {
        self.captures
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(_, value)| value)
    }

    pub fn captures(&self) -> &[(&'static str, u32)] {
        &self.captures
    }

    /// Offset of the byte just past the matched sequence.
    pub fn end(&self, pattern: &Pattern) -> u32 {
        self.offset + pattern.len() as u32
    }
}
