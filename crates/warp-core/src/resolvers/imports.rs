use tracing::debug;

use crate::error::{Error, Result};
use crate::image::{Address, ReadImage};
use crate::resolver::{Describe, Field, Resolver, Session};

const KERNEL32: &str = "KERNEL32.dll";
const USER32: &str = "USER32.dll";

/// Import slots that injected code calls through.
///
/// Walking the import table is only worth it when a patch needs one of these,
/// so nothing here runs until the resolver is loaded.
pub struct Imports;

/// VIRTUAL addresses of the import slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportTable {
    pub get_module_handle: Address,
    pub get_proc_address: Address,
    pub output_debug_string: Address,
    pub message_box: Address,
    /// `sprintf`, or `wsprintfA` when the CRT one is not imported
    pub sprintf: Address,
    pub create_window: Address,
}

impl Describe for ImportTable {
    fn fields(&self) -> Vec<Field> {
        vec![
            Field::address("GetModuleHandleA", self.get_module_handle),
            Field::address("GetProcAddress", self.get_proc_address),
            Field::address("OutputDebugStringA", self.output_debug_string),
            Field::address("MessageBoxA", self.message_box),
            Field::address("sprintf", self.sprintf),
            Field::address("CreateWindowExA", self.create_window),
        ]
    }
}

fn require<I: ReadImage + ?Sized>(
    image: &I,
    function: &str,
    module: Option<&str>,
    missing: &str,
) -> Result<Address> {
    let address = image
        .find_import(function, module)
        .ok_or_else(|| Error::AnchorNotFound(missing.to_string()))?;
    debug!("  {}: 0x{:X}", function, address);
    Ok(Address::virt(address))
}

impl Resolver for Imports {
    const NAME: &'static str = "IMPORTS";
    type Value = ImportTable;

    fn resolve<I: ReadImage + ?Sized>(cx: &Session<'_, I>) -> Result<ImportTable> {
        let image = cx.image();
        debug!("Searching imported functions...");

        let get_module_handle = require(
            image,
            "GetModuleHandleA",
            Some(KERNEL32),
            "GetModuleHandleA not found",
        )?;
        let get_proc_address = require(
            image,
            "GetProcAddress",
            Some(KERNEL32),
            "GetProcAddress not found",
        )?;
        let output_debug_string = require(
            image,
            "OutputDebugStringA",
            None,
            "'OutputDebugStringA' function missing",
        )?;
        let message_box = require(
            image,
            "MessageBoxA",
            Some(USER32),
            "'MessageBoxA' function missing",
        )?;
        let sprintf = match image.find_import("sprintf", None) {
            Some(address) => Address::virt(address),
            None => require(image, "wsprintfA", Some(USER32), "No print functions found")?,
        };
        let create_window = require(
            image,
            "CreateWindowExA",
            Some(USER32),
            "'CreateWindowExA' function missing",
        )?;

        Ok(ImportTable {
            get_module_handle,
            get_proc_address,
            output_debug_string,
            message_box,
            sprintf,
            create_window,
        })
    }
}
