//! Backtraces for recovered panics.
//!
//! `catch_unwind` only hands back the payload; the stack is gone by the
//! time the catch site runs. A chained panic hook records the panicking
//! thread's backtrace so the catch site can log it.

use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::sync::Once;

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static INSTALL: Once = Once::new();

/// Chain a hook that records the panicking thread's backtrace. Idempotent.
pub(crate) fn install_hook() {
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            LAST_BACKTRACE.with(|slot| {
                *slot.borrow_mut() = Some(Backtrace::force_capture());
            });
            previous(info);
        }));
    });
}

/// The backtrace recorded for the most recent panic on this thread. Falls
/// back to capturing here if the hook never saw one.
pub(crate) fn take_backtrace() -> String {
    LAST_BACKTRACE
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_else(Backtrace::force_capture)
        .to_string()
}
