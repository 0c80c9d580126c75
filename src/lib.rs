//! # ragescript - RAGE Script Decompiler
//!
//! Decompiles compiled RAGE engine scripts (`.xsc` for Xbox 360, `.ysc` for
//! PC) into readable pseudo-C.
//!
//! ## Overview
//!
//! - [`resource`] unpacks the resource container and selects the byte order
//! - [`script::decoder`] lifts raw bytecode into typed instructions
//! - [`script::machine`] abstractly interprets each function over a
//!   persistent operand stack and builds an AST
//! - [`script::ScriptFile`] renders the result
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ragescript::resource::Container;
//! use ragescript::script::{DecompileOptions, Decoder, Machine};
//!
//! # fn main() -> ragescript::Result<()> {
//! let container = Container::open("main.ysc")?;
//! let code = Decoder::new(container.arch, None).decode_all(container.region())?;
//! let file = Machine::new(container.name.as_str(), code, DecompileOptions::default()).decompile()?;
//! println!("{}", file);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Everything fallible returns [`Result`]. Problems the pipeline can work
//! around (stack underflow, join mismatches, unnamed natives) are logged with
//! `tracing` and collected in [`script::ScriptFile::warnings`] instead.

pub mod error;
pub mod resource;
pub mod script;

pub use error::{Error, ErrorSeverity, Result};
pub use resource::{Arch, Container};
pub use script::{DecompileOptions, Decoder, Machine, NativeDb, ScriptFile};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
