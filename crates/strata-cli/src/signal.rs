use std::sync::atomic::{AtomicBool, Ordering};

/// Raised by SIGINT or SIGTERM. Long-running work polls it between steps.
pub static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Route SIGINT and SIGTERM to [`SHUTDOWN`].
///
/// Only the first signal is caught; it puts the default disposition back,
/// so sending another one kills the process outright.
pub fn install_signal_handlers() {
    #[cfg(unix)]
    {
        let handler = on_signal as *const () as libc::sighandler_t;
        // Safety: `on_signal` is async-signal-safe (an atomic store and a
        // `signal` call).
        unsafe {
            libc::signal(libc::SIGINT, handler);
            libc::signal(libc::SIGTERM, handler);
        }
    }
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

#[cfg(unix)]
extern "C" fn on_signal(sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
    unsafe {
        libc::signal(sig, libc::SIG_DFL);
    }
}
