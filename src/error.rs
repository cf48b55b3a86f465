//! Error sinks consumed by the rest of the crate.
//!
//! There are exactly two error *events* this runtime core recognizes
//! (out-of-memory and finalizer failure) and two non-events that merely look
//! like errors at a glance (a CAS mismatch on Used-Length, which just means
//! "not the tail owner", and an invalid argument, which is a programmer bug
//! asserted away in debug builds). Neither event is recovered locally; both
//! are reported to a host-visible sink and, in the OOM case, never return.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Raised by any allocation failure or detected multiplication overflow.
/// Does not return, matching `onOutOfMemoryError` in the source runtime.
#[cold]
#[inline(never)]
pub fn out_of_memory() -> ! {
    log::error!("gcarray: out of memory");
    std::process::abort();
}

/// Reported when a destructor raises during the finalizer chain walk.
/// Finalization continues after this call: monitor cleanup and vtable-slot
/// clearing still have to happen.
#[cold]
pub fn report_finalize_error(class_name: &str, detail: &dyn std::fmt::Debug) {
    log::error!("gcarray: finalizer for {} failed: {:?}", class_name, detail);
}

/// Signature of the optional, process-wide collect handler: given whether
/// this is a deterministic delete, returns whether the destructor chain
/// should run.
pub type CollectHandlerFn = fn(deterministic: bool) -> bool;

/// Process-wide collect handler cell. Modeled as an atomic pointer cell:
/// null at process start, last writer wins, readers see a consistent value
/// without needing a lock.
static COLLECT_HANDLER: AtomicUsize = AtomicUsize::new(0);

/// Install (or clear, with `None`) the global collect handler. Last writer
/// wins; there is no ordering guarantee between concurrent setters beyond
/// that.
pub fn rt_set_collect_handler(handler: Option<CollectHandlerFn>) {
    let bits = match handler {
        Some(f) => f as usize,
        None => 0,
    };
    COLLECT_HANDLER.store(bits, Ordering::SeqCst);
}

/// Read the current global collect handler, if any is installed.
pub fn rt_get_collect_handler() -> Option<CollectHandlerFn> {
    let bits = COLLECT_HANDLER.load(Ordering::SeqCst);
    if bits == 0 {
        None
    } else {
        // SAFETY: the only values ever stored are `0` or a `CollectHandlerFn`
        // cast to `usize` by `rt_set_collect_handler`.
        Some(unsafe { std::mem::transmute::<usize, CollectHandlerFn>(bits) })
    }
}

/// `COLLECT_HANDLER` is process-global; every test (in this module or
/// elsewhere) that pokes it must hold this lock first, so they don't
/// interleave when `cargo test` runs them concurrently.
#[cfg(test)]
pub(crate) static COLLECT_HANDLER_TEST_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());

#[cfg(test)]
mod tests {
    use super::*;

    static TEST_LOCK: &parking_lot::Mutex<()> = &COLLECT_HANDLER_TEST_LOCK;

    fn always_run(_det: bool) -> bool {
        true
    }

    fn veto_unless_deterministic(det: bool) -> bool {
        det
    }

    #[test]
    fn collect_handler_round_trips() {
        let _guard = TEST_LOCK.lock();
        rt_set_collect_handler(None);
        assert!(rt_get_collect_handler().is_none());
        rt_set_collect_handler(Some(always_run));
        assert_eq!(rt_get_collect_handler().unwrap()(false), true);
        rt_set_collect_handler(Some(veto_unless_deterministic));
        assert_eq!(rt_get_collect_handler().unwrap()(false), false);
        assert_eq!(rt_get_collect_handler().unwrap()(true), true);
        rt_set_collect_handler(None);
        assert!(rt_get_collect_handler().is_none());
    }
}
