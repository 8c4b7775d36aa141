//! SIGINT-driven clean shutdown, shared by every daemon binary.
//!
//! Mirrors the original `coordinatord`/`runtime_locking_shardd` pattern: a
//! shared atomic flag is flipped by a signal handler, and the main thread
//! polls it in a sleep loop instead of blocking in an event loop.

use signal_hook::consts::SIGINT;
use signal_hook::flag;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

/// A flag flipped to `true` once SIGINT arrives.
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    /// Register a SIGINT handler that flips the returned token's flag.
    /// Fails only if the process cannot install a signal handler at all.
    pub fn install() -> std::io::Result<Self> {
        let flag = Arc::new(AtomicBool::new(false));
        flag::register(SIGINT, Arc::clone(&flag))?;
        Ok(StopToken(flag))
    }

    /// Block the calling thread until SIGINT arrives, polling every
    /// `poll_interval`.
    pub fn wait(&self, poll_interval: Duration) {
        while !self.0.load(std::sync::atomic::Ordering::Relaxed) {
            std::thread::sleep(poll_interval);
        }
    }
}
