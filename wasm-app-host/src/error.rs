use thiserror::Error;

use crate::fetch::FetchError;

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to load module: {0}")]
    ModuleLoad(String),

    #[error("resource fetch failed: {0}")]
    ResourceFetch(#[from] FetchError),

    #[error("region {offset:#x}+{len} exceeds shared memory of {capacity} bytes")]
    OutOfBounds { offset: u64, len: u64, capacity: u64 },

    #[error("module does not export `{0}`")]
    MissingExport(&'static str),

    #[error("invalid canvas size {width}x{height}")]
    InvalidCanvas { width: u32, height: u32 },

    #[error("invalid bridge state: {0}")]
    InvalidState(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("call into `{export}` failed: {source}")]
    Guest {
        export: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl BridgeError {
    pub fn load(msg: impl Into<String>) -> Self {
        BridgeError::ModuleLoad(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        BridgeError::InvalidConfig(msg.into())
    }

    /// Wrap a wasmtime error raised while calling `export`.
    pub fn guest(export: &'static str, err: impl Into<anyhow::Error>) -> Self {
        BridgeError::Guest {
            export,
            source: err.into().into(),
        }
    }
}
