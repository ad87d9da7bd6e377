use tracing::debug;

use crate::error::{Error, Result};
use crate::image::{Address, ReadImage, TextOptions};
use crate::pattern::x86::{self, Operand, Reg};
use crate::resolver::{AsAddress, Describe, Field, Resolver, Session};

const FILE_MGR: &str = "g_fileMgr";

/// The data archive name and the file manager that opens it.
pub struct DataGrf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataArchive {
    /// `data.grf`, or `sdata.grf` for clients from before 2010
    pub name: &'static str,
    /// VIRTUAL address of the name
    pub address: Address,
    /// PHYSICAL address where the code handling the name starts: the `PUSH`,
    /// or the `MOV ECX` when that comes first
    pub reference: Address,
    /// VIRTUAL address of `g_fileMgr`
    pub file_mgr: Address,
    /// `MOV ECX, g_fileMgr`
    pub mov_file_mgr: Vec<u8>,
}

impl AsAddress for DataArchive {
    fn as_address(&self) -> Address {
        self.address
    }
}

impl Describe for DataArchive {
    fn fields(&self) -> Vec<Field> {
        vec![
            Field::text("name", self.name),
            Field::address("address", self.address),
            Field::address("reference", self.reference),
            Field::address("file_mgr", self.file_mgr),
            Field::bytes("mov_file_mgr", &self.mov_file_mgr),
        ]
    }
}

impl Resolver for DataGrf {
    const NAME: &'static str = "DGRF";
    type Value = DataArchive;

    fn resolve<I: ReadImage + ?Sized>(cx: &Session<'_, I>) -> Result<DataArchive> {
        let image = cx.image();
        let facts = cx.facts();

        debug!("Phase 1: Searching archive name...");
        let name = if facts.post_2010 { "data.grf" } else { "sdata.grf" };
        let address = image
            .find_text(name.as_bytes(), TextOptions::default())
            .map(Address::virt)
            .ok_or_else(|| Error::AnchorNotFound("'data.grf' not found".to_string()))?;
        debug!("  {}: {}", name, address);

        debug!("Phase 2: Searching the PUSH of the name...");
        let vc14 = if facts.is_vc14() {
            find_vc14(image, address)
        } else {
            None
        };
        let (reference, file_mgr) = vc14
            .or_else(|| find_legacy(image, address))
            .ok_or_else(|| Error::PatternNotFound("'data.grf' not used".to_string()))?;
        debug!("  reference: 0x{:X}, {}: 0x{:X}", reference, FILE_MGR, file_mgr);

        Ok(DataArchive {
            name,
            address,
            reference: Address::phys(reference),
            file_mgr: Address::virt(file_mgr),
            mov_file_mgr: x86::encode_mov_imm(Reg::Ecx, file_mgr),
        })
    }
}

/// VC14: `MOV ECX, g_fileMgr ; TEST EAX, EAX ; SETNE [mem] ; PUSH name`
fn find_vc14<I: ReadImage + ?Sized>(image: &I, name: Address) -> Option<(u32, u32)> {
    let push = x86::push_imm32(name.into());
    let code = x86::mov_reg_imm(Reg::Ecx, Operand::Capture(FILE_MGR))
        + x86::test_reg_reg(Reg::Eax, Reg::Eax)
        + x86::setne_mem(Operand::Any)
        + push.clone();

    let m = image.find_pattern(&code)?;
    Some((m.end(&code) - push.len() as u32, m.capture(FILE_MGR)?))
}

/// Older toolchains: the `PUSH` sits right before or right after `MOV ECX, g_fileMgr`.
fn find_legacy<I: ReadImage + ?Sized>(image: &I, name: Address) -> Option<(u32, u32)> {
    let push = x86::push_imm32(name.into());
    let mov = x86::mov_reg_imm(Reg::Ecx, Operand::Capture(FILE_MGR));

    if let Some(m) = image.find_pattern(&(push.clone() + mov.clone())) {
        return Some((m.offset, m.capture(FILE_MGR)?));
    }

    let m = image.find_pattern(&(mov + push))?;
    Some((m.offset, m.capture(FILE_MGR)?))
}
