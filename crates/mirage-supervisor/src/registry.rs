//! Thread-local binding of the active session.
//!
//! The worker installs its context on entry; callbacks invoked without an
//! explicit context argument read it back through [`current_context`].
//! Threads that are not a supervisor worker observe `None`. The binding is
//! dropped with the worker's stack, so the slot never outlives the session.

use std::cell::RefCell;
use std::sync::Arc;

use crate::context::{ContextHandle, SupervisorShared};

thread_local! {
    static CURRENT: RefCell<Option<Arc<SupervisorShared>>> = const { RefCell::new(None) };
}

/// The session bound to the calling thread, when that thread is a
/// supervisor worker.
pub fn current_context() -> Option<ContextHandle> {
    CURRENT.with(|slot| slot.borrow().clone().map(ContextHandle::new))
}

/// Clears the calling thread's binding on drop.
pub(crate) struct Binding {
    _private: (),
}

impl Drop for Binding {
    fn drop(&mut self) {
        CURRENT.with(|slot| slot.borrow_mut().take());
    }
}

pub(crate) fn bind(shared: Arc<SupervisorShared>) -> Binding {
    CURRENT.with(|slot| *slot.borrow_mut() = Some(shared));
    Binding { _private: () }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::context::SupervisorShared;

    #[test]
    fn unbound_threads_observe_no_context() {
        assert!(super::current_context().is_none());
    }

    #[test]
    fn binding_is_scoped_to_the_guard() {
        let shared = Arc::new(SupervisorShared::new(false, false));
        {
            let _binding = super::bind(Arc::clone(&shared));
            let handle = super::current_context().expect("context bound");
            assert!(!handle.is_active());
        }
        assert!(super::current_context().is_none());
    }
}
