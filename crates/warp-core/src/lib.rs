//! # warp-core
//!
//! Discovery core for patching 32-bit game client executables.
//!
//! This crate provides:
//! - A read-only view of a loaded image with text, pattern and import search
//! - A pattern DSL with IA-32 instruction templates
//! - Client facts (variant, toolchain, build-date flags) computed once per session
//! - Memoized resolvers that locate globals and functions the patches need
//!
//! Loading the executable, building patches and presenting results are left
//! to the embedding program.
//!
//! ## Example
//!
//! ```ignore
//! use warp_core::{BinaryImage, Session, resolvers::WinMgr};
//!
//! let image: BinaryImage = load_client()?;
//! let session = Session::new(&image);
//!
//! let mgr = session.load::<WinMgr>()?;
//! println!("g_windowMgr at {}", mgr.address);
//!
//! for report in session.describe_all() {
//!     println!("{}", report);
//! }
//! ```

pub mod error;
pub mod facts;
pub mod image;
pub mod pattern;
pub mod resolver;
pub mod resolvers;
pub mod resource;

pub use error::{Error, FailureKind, ResolveError, Result};
pub use facts::{ClientVariant, Facts, Thresholds, load_thresholds, save_thresholds};
pub use image::{
    AddrSpace, Address, BinaryImage, BuildDate, ImageBuilder, ImageMeta, Import, LinkerVersion,
    ReadImage, Section, TextOptions, decode_le_hex, encode_hex,
};
pub use pattern::{Match, Pattern, Segment, Width};
pub use resolver::{
    AsAddress, Describe, Field, FieldValue, Outcome, Registry, Report, Resolver, ResolverState,
    Session, SessionConfig, SessionConfigBuilder, StateKind, load_reports, save_reports,
};
pub use resource::{ResourceData, ResourceEntry, ResourceId, ResourceNode, ResourceTree};
