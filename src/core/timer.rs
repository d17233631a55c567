//! Session stopwatch with one-second resolution.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::debug;

const TICK: Duration = Duration::from_secs(1);

/// `HH:MM:SS`, hours not capped at 24.
pub fn format_elapsed(seconds: u64) -> String {
    format!("{:02}:{:02}:{:02}", seconds / 3600, (seconds % 3600) / 60, seconds % 60)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stopwatch {
    elapsed: u64,
    running: bool,
}

impl Stopwatch {
    pub fn start(&mut self) {
        self.running = true;
    }

    /// Stops counting, keeping the elapsed time.
    pub fn pause(&mut self) {
        self.running = false;
    }

    pub fn reset(&mut self) {
        self.elapsed = 0;
        self.running = false;
    }

    /// One second passed. Ignored while stopped.
    pub fn tick(&mut self) {
        if self.running {
            self.elapsed += 1;
        }
    }

    pub fn elapsed(&self) -> u64 {
        self.elapsed
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn display(&self) -> String {
        format_elapsed(self.elapsed)
    }
}

/// Drives a [`Stopwatch`] from a background interval while running.
pub struct SessionTimer {
    state: Arc<watch::Sender<Stopwatch>>,
    ticker: Option<JoinHandle<()>>,
}

impl Default for SessionTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTimer {
    pub fn new() -> Self {
        let (state, _) = watch::channel(Stopwatch::default());
        Self {
            state: Arc::new(state),
            ticker: None,
        }
    }

    /// Starts or resumes counting. Must be called inside a tokio runtime.
    pub fn start(&mut self) {
        if self.ticker.is_some() {
            return;
        }

        self.state.send_modify(Stopwatch::start);
        let state = Arc::clone(&self.state);

        self.ticker = Some(tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + TICK, TICK);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                state.send_modify(Stopwatch::tick);
            }
        }));
        debug!("Timer started");
    }

    pub fn pause(&mut self) {
        self.stop_ticker();
        self.state.send_modify(Stopwatch::pause);
    }

    pub fn reset(&mut self) {
        self.stop_ticker();
        self.state.send_modify(Stopwatch::reset);
    }

    pub fn snapshot(&self) -> Stopwatch {
        *self.state.borrow()
    }

    pub fn display(&self) -> String {
        self.snapshot().display()
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// Receiver updated on every tick and state change.
    pub fn subscribe(&self) -> watch::Receiver<Stopwatch> {
        self.state.subscribe()
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
            debug!("Timer stopped at {}", self.display());
        }
    }
}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}
