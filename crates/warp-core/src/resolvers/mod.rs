//! Built-in resolvers.
//!
//! | Resolver       | Name       | Finds                                   |
//! |----------------|------------|-----------------------------------------|
//! | [`DataGrf`]    | `DGRF`     | the data archive name and `g_fileMgr`   |
//! | [`LangType`]   | `LANGTYPE` | `g_serviceType`                         |
//! | [`ServerType`] | `SRVRTYPE` | `g_serverType`                          |
//! | [`WinMgr`]     | `WINMGR`   | `g_windowMgr` and `UIWindowMgr::MakeWindow` |
//! | [`Imports`]    | `IMPORTS`  | import slots used by injected code      |

mod data_grf;
mod imports;
mod lang_type;
mod server_type;
mod win_mgr;

use tracing::debug;

use crate::error::{Error, Result};
use crate::image::{Address, ReadImage};
use crate::pattern::x86::{self, Operand};
use crate::resolver::{AsAddress, Describe, Field, Report, Session};

pub use data_grf::{DataArchive, DataGrf};
pub use imports::{ImportTable, Imports};
pub use lang_type::LangType;
pub use server_type::ServerType;
pub use win_mgr::{WinMgr, WindowMgr};

/// A global variable located through the code that writes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalVar {
    pub name: &'static str,
    /// VIRTUAL address of the variable
    pub address: Address,
}

impl AsAddress for GlobalVar {
    fn as_address(&self) -> Address {
        self.address
    }
}

impl Describe for GlobalVar {
    fn fields(&self) -> Vec<Field> {
        vec![
            Field::text("name", self.name),
            Field::address("value", self.address),
        ]
    }
}

/// Find `MOV dword ptr [global], 1` at or after PHYSICAL `from`.
fn find_flag_assignment<I: ReadImage + ?Sized>(
    image: &I,
    from: u32,
    global: &'static str,
) -> Result<GlobalVar> {
    let code = x86::mov_mem_imm(Operand::Capture(global), Operand::Value(1));
    let (_, code_end) = image.code_range();

    let address = image
        .find_pattern_in(&code, from, code_end)
        .and_then(|m| m.capture(global))
        .ok_or_else(|| Error::PostconditionMissing(format!("{} not assigned", global)))?;
    debug!("  {}: 0x{:X}", global, address);

    Ok(GlobalVar {
        name: global,
        address: Address::virt(address),
    })
}

impl<I: ReadImage + ?Sized> Session<'_, I> {
    /// Facts followed by every built-in resolver, each forced if needed.
    pub fn describe_all(&self) -> Vec<Report> {
        vec![
            self.describe_facts(),
            self.describe::<DataGrf>(),
            self.describe::<LangType>(),
            self.describe::<ServerType>(),
            self.describe::<WinMgr>(),
            self.describe::<Imports>(),
        ]
    }
}
