//! Host-side state owned by the Wasmtime `Store`.
//!
//! Host imports reach it through `Caller::data_mut`, the bridge through `Store::data_mut`.
//! There is no process-wide state: everything a host import needs is here.

use std::sync::Arc;

use crate::callbacks::CallbackRegistry;
use crate::fetch::{FetchQueue, ResourceFetcher};
use crate::memory::SharedMemory;

/// Everything the host hands to a module at instantiation, besides the memory.
pub struct HostFunctions {
    pub fetcher: Arc<dyn ResourceFetcher>,
    pub callbacks: CallbackRegistry,
}

impl HostFunctions {
    pub fn new(fetcher: impl ResourceFetcher + 'static) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            callbacks: CallbackRegistry::new(),
        }
    }

    pub fn register_inlined_call(mut self, index: i32, call: impl FnMut() + Send + 'static) -> Self {
        self.callbacks.register(index, call);
        self
    }
}

pub struct HostState {
    /// Shared block. Set before instantiation when the host provides the memory, or right
    /// after when the guest exports its own.
    pub memory: Option<SharedMemory>,
    pub fetcher: Arc<dyn ResourceFetcher>,
    pub callbacks: CallbackRegistry,
    pub fetches: FetchQueue,
}

impl HostState {
    pub fn new(host: HostFunctions) -> Self {
        Self {
            memory: None,
            fetcher: host.fetcher,
            callbacks: host.callbacks,
            fetches: FetchQueue::default(),
        }
    }

    /// Start an asynchronous fetch of `name`.
    pub fn fetch_async(&mut self, name: String) {
        tracing::debug!(%name, "starting async fetch");
        self.fetches.spawn(self.fetcher.clone(), name);
    }
}
