//! Host closures the guest can trigger by index through `dispatchInlinedCall`.
//!
//! The table is populated explicitly before instantiation; nothing is evaluated from fetched
//! resources.

use std::collections::BTreeMap;

pub type InlinedCall = Box<dyn FnMut() + Send>;

#[derive(Default)]
pub struct CallbackRegistry {
    calls: BTreeMap<i32, InlinedCall>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `call` under `index`, returning the closure it replaced.
    pub fn register(&mut self, index: i32, call: impl FnMut() + Send + 'static) -> Option<InlinedCall> {
        self.calls.insert(index, Box::new(call))
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Invoke the closure at `index`. Returns `false` if none is registered.
    pub fn dispatch(&mut self, index: i32) -> bool {
        match self.calls.get_mut(&index) {
            Some(call) => {
                call();
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("indices", &self.calls.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispatch_runs_the_registered_closure() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = CallbackRegistry::new();
        let counter = hits.clone();
        registry.register(7, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(registry.dispatch(7));
        assert!(registry.dispatch(7));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unknown_index_is_reported() {
        let mut registry = CallbackRegistry::new();
        assert!(!registry.dispatch(0));
    }

    #[test]
    fn registering_twice_replaces() {
        let mut registry = CallbackRegistry::new();
        assert!(registry.register(1, || {}).is_none());
        assert!(registry.register(1, || {}).is_some());
        assert_eq!(registry.len(), 1);
    }
}
