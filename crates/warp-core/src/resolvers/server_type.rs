use tracing::debug;

use super::{GlobalVar, find_flag_assignment};
use crate::error::{Error, Result};
use crate::image::{ReadImage, TextOptions};
use crate::pattern::x86::{self, Operand};
use crate::resolver::{Resolver, Session};

const SERVER_TYPE: &str = "g_serverType";

/// The server type global, set to 1 right after 'sakray' is handled.
pub struct ServerType;

impl Resolver for ServerType {
    const NAME: &'static str = "SRVRTYPE";
    type Value = GlobalVar;

    fn resolve<I: ReadImage + ?Sized>(cx: &Session<'_, I>) -> Result<GlobalVar> {
        let image = cx.image();

        debug!("Phase 1: Searching 'sakray'...");
        let next = match image.find_text(b"sakray", TextOptions::default()) {
            Some(anchor) => {
                let push = x86::push_imm32(Operand::Value(anchor));
                image
                    .find_pattern(&push)
                    .map(|m| m.end(&push))
                    .ok_or_else(|| Error::PatternNotFound("'sakray' not used".to_string()))?
            }
            None if cx.facts().uses_split_string_compare() => {
                debug!("  'sakray' missing, trying split comparison...");
                let code = x86::cmp_any_reg_mem_imm32(u32::from_le_bytes(*b"sakr"))
                    + x86::jne_short()
                    + x86::cmp_word_any_reg_disp8(4, u16::from_le_bytes(*b"ay"))
                    + x86::jne_short();
                image
                    .find_pattern(&code)
                    .map(|m| m.end(&code))
                    .ok_or_else(|| {
                        Error::AnchorNotFound("'sakray' not found in parts".to_string())
                    })?
            }
            None => return Err(Error::AnchorNotFound("'sakray' not found".to_string())),
        };

        debug!("Phase 2: Searching assignment to {}...", SERVER_TYPE);
        find_flag_assignment(image, next, SERVER_TYPE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::image::Address;
    use crate::image::mock::{MockImageBuilder, RDATA_RAW, va};
    use crate::resolver::StateKind;

    const SAKRAY_AT: u32 = RDATA_RAW + 0x40;
    const ASSIGN: [u8; 10] = [0xC7, 0x05, 0x20, 0x40, 0x40, 0x00, 0x01, 0x00, 0x00, 0x00];

    #[test]
    fn test_push_then_assignment() {
        let mut push = vec![0x68];
        push.extend_from_slice(&va(SAKRAY_AT).to_le_bytes());

        let image = MockImageBuilder::new()
            .string(SAKRAY_AT, "sakray")
            .code(0x180, &push)
            .code(0x190, &ASSIGN)
            .build();
        let session = Session::new(&image);

        let server = session.load::<ServerType>().unwrap();
        assert_eq!(server.address, Address::virt(0x40_4020));
        assert_eq!(server.name, "g_serverType");
        assert_eq!(session.state::<ServerType>(), StateKind::Resolved);
    }

    #[test]
    fn test_split_compare() {
        let compare = [
            0x81, 0x38, b's', b'a', b'k', b'r', // cmp dword ptr [eax], 'sakr'
            0x75, 0x10, // jne
            0x66, 0x81, 0x78, 0x04, b'a', b'y', // cmp word ptr [eax+4], 'ay'
            0x75, 0x08, // jne
        ];
        let image = MockImageBuilder::new()
            .linker(14, 29)
            .code(0x400, &compare)
            .code(0x410, &ASSIGN)
            .build();
        let session = Session::new(&image);

        assert_eq!(
            session.load::<ServerType>().unwrap().address,
            Address::virt(0x40_4020)
        );
    }

    #[test]
    fn test_split_compare_needs_register_operand() {
        // cmp dword ptr [disp32], imm32 with 'sakr' as its displacement
        let compare = [
            0x81, 0x3D, b's', b'a', b'k', b'r', 0x75, 0x10, 0x66, 0x81, 0x78, 0x04, b'a', b'y',
            0x75, 0x08,
        ];
        let image = MockImageBuilder::new()
            .linker(14, 29)
            .code(0x400, &compare)
            .code(0x410, &ASSIGN)
            .build();

        let err = Session::new(&image).load::<ServerType>().unwrap_err();
        assert_eq!(err.kind(), FailureKind::AnchorNotFound);
        assert_eq!(err.to_string(), "SRVRTYPE - 'sakray' not found in parts");
    }

    #[test]
    fn test_no_alternate_when_string_present() {
        // split comparison exists, but the present string takes the PUSH path only
        let compare = [
            0x81, 0x38, b's', b'a', b'k', b'r', 0x75, 0x10, 0x66, 0x81, 0x78, 0x04, b'a', b'y',
            0x75, 0x08,
        ];
        let image = MockImageBuilder::new()
            .linker(14, 29)
            .string(SAKRAY_AT, "sakray")
            .code(0x400, &compare)
            .code(0x410, &ASSIGN)
            .build();
        let session = Session::new(&image);

        let err = session.load::<ServerType>().unwrap_err();
        assert_eq!(err.kind(), FailureKind::PatternNotFound);
        assert_eq!(err.to_string(), "SRVRTYPE - 'sakray' not used");
    }

    #[test]
    fn test_missing_anchor() {
        let image = MockImageBuilder::new().build();
        let err = Session::new(&image).load::<ServerType>().unwrap_err();
        assert_eq!(err.kind(), FailureKind::AnchorNotFound);
        assert_eq!(err.to_string(), "SRVRTYPE - 'sakray' not found");
    }
}
