use std::path::PathBuf;
use std::time::Duration;

use crate::abi::WASM_PAGE_SIZE;
use crate::audio::AudioConfig;
use crate::error::{BridgeError, BridgeResult};

/// Default module path, relative to the asset root.
pub const DEFAULT_MODULE_PATH: &str = "bin/wasm_app.wasm";

/// Shared memory bounds in wasm pages: 128 KiB ..= 64 MiB.
pub const MIN_MEMORY_PAGES: u32 = 2;
pub const MAX_MEMORY_PAGES: u32 = 1024;

pub const DEFAULT_TICK_RATE_HZ: f64 = 60.0;

/// Reject shared block sizes outside `MIN_MEMORY_PAGES..=MAX_MEMORY_PAGES`.
pub fn check_memory_pages(pages: u32) -> BridgeResult<()> {
    if (MIN_MEMORY_PAGES..=MAX_MEMORY_PAGES).contains(&pages) {
        Ok(())
    } else {
        Err(BridgeError::config(format!(
            "memory must be {MIN_MEMORY_PAGES}..={MAX_MEMORY_PAGES} pages, got {pages}"
        )))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BridgeConfig {
    /// Module name resolved through the resource fetcher.
    pub module_path: String,
    /// Directory that module and resource names are resolved against.
    pub asset_root: PathBuf,
    /// Size of the shared block in wasm pages; the block never grows.
    pub memory_pages: u32,
    pub tick_rate_hz: f64,
    pub audio: AudioConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            module_path: DEFAULT_MODULE_PATH.to_string(),
            asset_root: PathBuf::from("."),
            memory_pages: MIN_MEMORY_PAGES,
            tick_rate_hz: DEFAULT_TICK_RATE_HZ,
            audio: AudioConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> BridgeResult<()> {
        check_memory_pages(self.memory_pages)?;
        if !(self.tick_rate_hz.is_finite() && self.tick_rate_hz > 0.0) {
            return Err(BridgeError::config(format!(
                "tick rate must be a positive number, got {}",
                self.tick_rate_hz
            )));
        }
        if self.module_path.is_empty() {
            return Err(BridgeError::config("module path is empty"));
        }
        self.audio.validate()
    }

    pub fn memory_bytes(&self) -> u64 {
        self.memory_pages as u64 * WASM_PAGE_SIZE
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BridgeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.memory_bytes(), 128 * 1024);
        assert_eq!(config.module_path, "bin/wasm_app.wasm");
    }

    #[test]
    fn tick_period_is_one_sixtieth_of_a_second() {
        let period = BridgeConfig::default().tick_period();
        assert!((period.as_secs_f64() - 1.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn memory_bounds_are_enforced() {
        let at = |memory_pages| BridgeConfig {
            memory_pages,
            ..BridgeConfig::default()
        };
        assert!(at(1).validate().is_err());
        assert!(at(2).validate().is_ok());
        assert!(at(1024).validate().is_ok());
        assert_eq!(at(1024).memory_bytes(), 64 * 1024 * 1024);
        assert!(at(1025).validate().is_err());
    }

    #[test]
    fn tick_rate_must_be_positive() {
        for rate in [0.0, -60.0, f64::NAN, f64::INFINITY] {
            let config = BridgeConfig {
                tick_rate_hz: rate,
                ..BridgeConfig::default()
            };
            assert!(config.validate().is_err(), "{rate} accepted");
        }
    }
}
