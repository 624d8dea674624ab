//! Wasmtime-backed runtime glue.
//!
//! The guest ABI (names, signatures, event strings) is defined in `crate::abi`; this module
//! turns it into an engine, a linker populated with host imports, and an instance.

pub mod imports;
pub mod runtime;

pub use runtime::{WasmtimeRuntime, engine};
