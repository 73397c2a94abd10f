//! Unix signal handling (SIGINT).
//!
//! The first SIGINT only sets a flag; the engine notices it, terminates
//! running tools, and still writes out the cache.  A second SIGINT gets the
//! default behaviour.

use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

fn sigint_action(handler: libc::sighandler_t) {
    // Safety: registering a signal handler is libc unsafe code.
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = handler;
        libc::sigaction(libc::SIGINT, &sa, std::ptr::null_mut());
    }
}

extern "C" fn sigint_handler(_sig: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
    sigint_action(libc::SIG_DFL);
}

pub fn register_sigint() {
    sigint_action(sigint_handler as libc::sighandler_t);
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}
