//! Wasmtime engine, store and linker for one hosted module.
//!
//! - Create a Wasmtime `Engine`/`Store` with the feature flags guests rely on.
//! - Create the fixed-size shared memory and provide it as `env.memory`.
//! - Define host imports under module `"env"`.
//! - Instantiate a compiled `wasmtime::Module` and resolve its exports.

use wasmtime::{Engine, Instance, Linker, Memory, MemoryType, Module, Store};

use crate::abi::{self, GuestExports, IMPORT_MODULE};
use crate::config::check_memory_pages;
use crate::error::{BridgeError, BridgeResult};
use crate::memory::SharedMemory;
use crate::state::HostState;

/// Build the engine shared by compilation and instantiation.
pub fn engine() -> BridgeResult<Engine> {
    let mut cfg = wasmtime::Config::new();

    // Broadly supported features for modules produced by current toolchains.
    cfg.wasm_multi_value(true);
    cfg.wasm_bulk_memory(true);
    cfg.wasm_reference_types(true);
    cfg.wasm_simd(true);
    cfg.wasm_relaxed_simd(true);
    cfg.wasm_multi_memory(true);
    cfg.wasm_tail_call(true);

    Engine::new(&cfg).map_err(|e| BridgeError::load(format!("failed to create engine: {e:#}")))
}

/// Host-side runtime container.
pub struct WasmtimeRuntime {
    pub engine: Engine,
    pub store: Store<HostState>,
    pub linker: Linker<HostState>,
}

impl WasmtimeRuntime {
    pub fn new(engine: Engine, state: HostState) -> Self {
        let store = Store::new(&engine, state);
        let linker = Linker::new(&engine);
        Self {
            engine,
            store,
            linker,
        }
    }

    /// Create the shared block with `initial == maximum`, so it can never grow, and provide it
    /// as `env.memory`. `pages` must be within the configured bounds.
    pub fn define_shared_memory(&mut self, pages: u32) -> BridgeResult<SharedMemory> {
        check_memory_pages(pages)?;
        let memory = Memory::new(&mut self.store, MemoryType::new(pages, Some(pages)))
            .map_err(|e| BridgeError::load(format!("failed to allocate {pages} pages: {e:#}")))?;
        self.linker
            .define(&self.store, IMPORT_MODULE, abi::host_imports::MEMORY, memory)
            .map_err(|e| BridgeError::load(format!("{e:#}")))?;

        let shared = SharedMemory::new(memory);
        self.store.data_mut().memory = Some(shared);
        Ok(shared)
    }

    /// Define all host imports expected by guests under module `"env"`.
    ///
    /// Must be called before `instantiate`.
    pub fn define_imports(&mut self) -> BridgeResult<()> {
        super::imports::define_imports(&mut self.linker)
            .map_err(|e| BridgeError::load(format!("failed to define host imports: {e:#}")))
    }

    /// Instantiate a module and resolve its exports.
    ///
    /// A guest that exports its own `memory` (instead of importing ours) has that memory
    /// registered as the shared block.
    pub fn instantiate(&mut self, module: &Module) -> BridgeResult<(Instance, GuestExports)> {
        let instance = self
            .linker
            .instantiate(&mut self.store, module)
            .map_err(|e| BridgeError::load(format!("failed to instantiate module: {e:#}")))?;

        if let Some(exported) = instance.get_memory(&mut self.store, abi::guest_exports::MEMORY) {
            self.store.data_mut().memory = Some(SharedMemory::new(exported));
        }

        let exports = GuestExports::resolve(&instance, &mut self.store)?;
        Ok((instance, exports))
    }
}
