//! The host tick loop.
//!
//! Runs on its own thread at a fixed rate, feeding the tick-rate calculator
//! on every tick and starting a collection cycle once per interval. The
//! cycle's sync phase therefore runs on this thread, between two ticks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tickscope_sdk::{MonitoringManager, TickRateCalculator};
use tracing::{debug, info};

pub struct TickLoop {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TickLoop {
    /// Start ticking `tick_rate` times per second.
    pub fn spawn(
        tick_rate: f64,
        interval: Duration,
        calculator: Arc<TickRateCalculator>,
        manager: MonitoringManager,
    ) -> Result<Self> {
        let period = tick_period(tick_rate)?;
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();

        let handle = std::thread::Builder::new()
            .name("tick-loop".to_string())
            .spawn(move || run(period, interval, &calculator, &manager, &flag))
            .context("Failed to start tick loop thread")?;

        info!(tick_rate, interval_ms = interval.as_millis() as u64, "Tick loop started");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop ticking and wait for the thread to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Tick loop thread panicked");
            }
        }
    }
}

impl Drop for TickLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Time between two ticks at `tick_rate` ticks per second.
pub fn tick_period(tick_rate: f64) -> Result<Duration> {
    if !(tick_rate.is_finite() && tick_rate > 0.0) {
        bail!("tick_rate must be a positive number, got {tick_rate}");
    }
    Duration::try_from_secs_f64(1.0 / tick_rate)
        .with_context(|| format!("tick_rate {tick_rate} is too small"))
}

fn run(
    period: Duration,
    interval: Duration,
    calculator: &TickRateCalculator,
    manager: &MonitoringManager,
    stop: &AtomicBool,
) {
    let mut next_tick = Instant::now();
    let mut next_cycle = next_tick + interval;

    while !stop.load(Ordering::Relaxed) {
        calculator.on_tick();

        let now = Instant::now();
        if now >= next_cycle {
            // Nobody waits on the cycle here; listeners get the result.
            drop(manager.tick());
            next_cycle += interval;
            if next_cycle < now {
                next_cycle = now + interval;
            }
        }

        next_tick += period;
        let now = Instant::now();
        if next_tick > now {
            std::thread::sleep(next_tick - now);
        } else {
            // Fell behind; don't try to catch up with a burst of ticks.
            next_tick = now;
        }
    }

    debug!(ticks = calculator.ticks(), "Tick loop stopped");
}
