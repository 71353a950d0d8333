//! Cooperative cancellation for streaming commands.
//!
//! A single process-wide flag set by the Ctrl-C handler. Streaming loops
//! (`cat` chunk copies, the stdin→remote bridge, `tailf` polling) check it
//! between chunks and return exit 130. The flag is reset before each
//! top-level statement so an old interrupt cannot cancel the next command.

use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Install the SIGINT handler. Call once at startup; returns `false` if a
/// handler could not be installed (the shell still works, minus Ctrl-C
/// cancellation).
pub fn install() -> bool {
    ctrlc::set_handler(|| {
        INTERRUPTED.store(true, Ordering::SeqCst);
    })
    .is_ok()
}

/// Whether an interrupt arrived since the last [`reset`].
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Clear the flag. The engine calls this before each top-level statement.
pub fn reset() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}

/// Exit code for a user-cancelled command.
pub const EXIT_INTERRUPTED: i32 = 130;
