// Copyright 2025-2026 CEMAXECUTER LLC

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use signal_hook::consts::SIGINT;
use signal_hook::iterator::{Handle, Signals};

/// Session-wide cooperative cancellation. Goes false -> true at most once;
/// clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal. Returns true only for the call that set it.
    pub fn trigger(&self) -> bool {
        self.flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// SIGINT listener that triggers a StopSignal. Unregisters and joins its
/// thread on drop.
pub struct InterruptListener {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl InterruptListener {
    pub fn install(stop: StopSignal) -> io::Result<Self> {
        let mut signals = Signals::new([SIGINT])?;
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name("interrupt".to_string())
            .spawn(move || {
                for sig in signals.forever() {
                    if stop.trigger() {
                        log::info!("signal {} received, stopping", sig);
                    }
                }
            })?;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }
}

impl Drop for InterruptListener {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
