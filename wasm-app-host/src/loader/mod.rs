//! Module loading.
//!
//! - Detect whether the provided bytes are a `.wasm` binary or `.wat` text.
//! - If it looks like WAT, convert it to WASM bytes (via the `wat` crate).
//! - Compile a Wasmtime `Module` from the resulting WASM bytes.
//!
//! Extension sniffing is unreliable when modules arrive through a fetcher, so we sniff the
//! bytes themselves. Leading whitespace and a UTF-8 BOM are accepted before WAT.

use wasmtime::{Engine, Module};

use crate::error::BridgeError;

/// Error returned by loader helpers.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("unrecognized module format (expected wasm or wat)")]
    UnrecognizedFormat,
    #[error("failed to parse WAT: {0}")]
    WatParseFailed(#[from] wat::Error),
    #[error("failed to compile WASM module: {0}")]
    CompileFailed(String),
}

impl From<LoadError> for BridgeError {
    fn from(err: LoadError) -> Self {
        BridgeError::load(err.to_string())
    }
}

/// What kind of module the loader inferred from the bytes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DetectedFormat {
    Wasm,
    Wat,
}

/// Load: detect -> (optional) wat->wasm -> compile.
pub fn compile_module(engine: &Engine, bytes: &[u8]) -> Result<Module, LoadError> {
    let Detected { format, wasm_bytes } = normalize_to_wasm(bytes)?;
    tracing::debug!(?format, len = wasm_bytes.len(), "compiling module");
    Module::new(engine, wasm_bytes.as_slice()).map_err(|e| LoadError::CompileFailed(format!("{e:#}")))
}

/// Detect format and normalize to valid WASM bytes.
pub fn normalize_to_wasm(bytes: &[u8]) -> Result<Detected, LoadError> {
    let format = detect_format(bytes).ok_or(LoadError::UnrecognizedFormat)?;

    let wasm_bytes = match format {
        DetectedFormat::Wasm => bytes.to_vec(),
        DetectedFormat::Wat => wat::parse_bytes(bytes)?.into_owned(),
    };
    Ok(Detected { format, wasm_bytes })
}

/// Result of normalizing (detecting + possibly converting) the input.
#[derive(Clone, Debug)]
pub struct Detected {
    pub format: DetectedFormat,
    /// Always valid WASM bytes (for WASM/WAT inputs).
    pub wasm_bytes: Vec<u8>,
}

/// Best-effort detection.
///
/// - First 4 bytes `\0asm`: WASM.
/// - First byte after BOM/whitespace is `(`: WAT.
pub fn detect_format(bytes: &[u8]) -> Option<DetectedFormat> {
    if bytes.starts_with(b"\0asm") {
        return Some(DetectedFormat::Wasm);
    }

    let i = skip_bom_and_leading_ws(bytes);
    if bytes.get(i) == Some(&b'(') {
        return Some(DetectedFormat::Wat);
    }

    None
}

fn skip_bom_and_leading_ws(bytes: &[u8]) -> usize {
    let start = if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) { 3 } else { 0 };
    start
        + bytes[start..]
            .iter()
            .take_while(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
            .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_wasm_magic() {
        assert_eq!(
            detect_format(b"\0asm\x01\x00\x00\x00"),
            Some(DetectedFormat::Wasm)
        );
    }

    #[test]
    fn detects_wat_with_whitespace() {
        assert_eq!(detect_format(b"   \n\t(module)"), Some(DetectedFormat::Wat));
    }

    #[test]
    fn detects_wat_with_bom() {
        assert_eq!(
            detect_format(b"\xEF\xBB\xBF(module)"),
            Some(DetectedFormat::Wat)
        );
    }

    #[test]
    fn unrecognized_returns_none() {
        assert_eq!(detect_format(b"not wasm"), None);
        assert_eq!(detect_format(b""), None);
    }

    #[test]
    fn wat_is_converted_to_binary() {
        let detected = normalize_to_wasm(b"(module)").unwrap();
        assert_eq!(detected.format, DetectedFormat::Wat);
        assert!(detected.wasm_bytes.starts_with(b"\0asm"));
    }

    #[test]
    fn malformed_wat_is_a_parse_error() {
        assert!(matches!(
            normalize_to_wasm(b"(module (func"),
            Err(LoadError::WatParseFailed(_))
        ));
    }

    #[test]
    fn truncated_wasm_fails_to_compile() {
        let engine = Engine::default();
        assert!(matches!(
            compile_module(&engine, b"\0asm\x01\x00"),
            Err(LoadError::CompileFailed(_))
        ));
    }
}
