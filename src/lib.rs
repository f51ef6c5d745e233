//! Read-only parser for x64 PE32+ images.
//!
//! Construct a [`Pe`] from a file path or an in-memory buffer; everything
//! else is a query over the validated, cached headers.
//!
//! ```no_run
//! # fn main() -> pe64::Result<()> {
//! let pe = pe64::Pe::from_path("example.exe")?;
//! for section in pe.executable_sections()? {
//!     println!("{} @ {:#x}", section.name, section.virtual_address_abs);
//! }
//! # Ok(())
//! # }
//! ```

pub mod debug;
pub mod error;
pub mod exceptions;
pub mod exports;
pub mod headers;
pub mod imports;
mod pe;
pub mod reader;
pub mod relocations;
pub mod sections;
pub mod tls;

pub use error::{Error, Result};
pub use pe::Pe;
