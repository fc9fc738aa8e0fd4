use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use codeupdate_core::UpdateError;
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use tracing::debug;

const SLEEP_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    raised: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install() -> Result<Self> {
        let interrupt = Self::new();
        for signal in [SIGINT, SIGTERM, SIGHUP] {
            signal_hook::flag::register(signal, Arc::clone(&interrupt.raised))
                .with_context(|| format!("failed to register interrupt flag for signal {signal}"))?;
        }
        debug!("interrupt handlers installed");
        Ok(interrupt)
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), UpdateError> {
        if self.is_raised() {
            return Err(UpdateError::Interrupted);
        }
        Ok(())
    }

    pub fn sleep(&self, duration: Duration) -> Result<(), UpdateError> {
        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}
