//! Per-thread signal masking around worker spawn.
//!
//! Interactive signals must land on the controller thread, not the worker:
//! the controller blocks them before spawning, and the worker clears its
//! inherited mask on entry.

#[cfg(unix)]
pub(crate) fn block_controller_signals() {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGINT);
        libc::sigaddset(&mut set, libc::SIGTRAP);
        libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
    }
}

#[cfg(not(unix))]
pub(crate) fn block_controller_signals() {}

#[cfg(unix)]
pub(crate) fn clear_worker_signal_mask() {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::pthread_sigmask(libc::SIG_SETMASK, &set, std::ptr::null_mut());
    }
}

#[cfg(not(unix))]
pub(crate) fn clear_worker_signal_mask() {}
