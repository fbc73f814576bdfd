//! Windowed rate averages and the tick-rate calculator built on them.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{Map, Value};

/// Ticks per second a healthy host loop runs at.
pub const TARGET_TICK_RATE: f64 = 20.0;

/// A rate sample is taken once every this many ticks.
pub const SAMPLE_INTERVAL: u64 = 20;

/// The standard windows: 5s, 10s, 1m, 5m and 15m.
pub const STANDARD_WINDOWS: [(&str, Duration); 5] = [
    ("5s", Duration::from_secs(5)),
    ("10s", Duration::from_secs(10)),
    ("1m", Duration::from_secs(60)),
    ("5m", Duration::from_secs(5 * 60)),
    ("15m", Duration::from_secs(15 * 60)),
];

#[derive(Debug, Clone)]
struct Window {
    label: String,
    length: Duration,
    accumulator: f64,
    weight: f64,
    samples: u64,
}

impl Window {
    fn record(&mut self, rate: f64, elapsed: Duration) {
        let decay = (-elapsed.as_secs_f64() / self.length.as_secs_f64()).exp();
        self.accumulator = decay * self.accumulator + (1.0 - decay) * rate;
        self.weight = decay * self.weight + (1.0 - decay);
        self.samples += 1;
    }

    fn average(&self) -> f64 {
        if self.weight > 0.0 {
            self.accumulator / self.weight
        } else {
            0.0
        }
    }
}

/// Exponentially decaying averages of a rate over several windows.
///
/// Each sample moves every window toward the sampled rate by
/// `1 - exp(-elapsed / window)`. The accumulated weight is tracked alongside
/// the average so early readings are not biased toward zero: a constant rate
/// reads back exactly, and a run of zero samples decays monotonically.
#[derive(Debug, Clone)]
pub struct RollingWindowAverage {
    windows: Vec<Window>,
}

impl RollingWindowAverage {
    /// Create averages for the given `(label, window length)` pairs.
    pub fn new<L: Into<String>>(windows: impl IntoIterator<Item = (L, Duration)>) -> Self {
        Self {
            windows: windows
                .into_iter()
                .map(|(label, length)| Window {
                    label: label.into(),
                    length,
                    accumulator: 0.0,
                    weight: 0.0,
                    samples: 0,
                })
                .collect(),
        }
    }

    /// 5s, 10s, 1m, 5m and 15m windows.
    pub fn standard() -> Self {
        Self::new(STANDARD_WINDOWS)
    }

    /// Feed one rate sample covering `elapsed` time into every window.
    pub fn record(&mut self, rate: f64, elapsed: Duration) {
        if elapsed.is_zero() {
            return;
        }
        for window in &mut self.windows {
            window.record(rate, elapsed);
        }
    }

    /// Current average for a window, by label.
    pub fn average(&self, label: &str) -> Option<f64> {
        self.windows
            .iter()
            .find(|w| w.label == label)
            .map(Window::average)
    }

    /// Current averages in window order.
    pub fn averages(&self) -> Vec<(String, f64)> {
        self.windows
            .iter()
            .map(|w| (w.label.clone(), w.average()))
            .collect()
    }

    /// Number of samples recorded so far.
    pub fn samples(&self) -> u64 {
        self.windows.first().map(|w| w.samples).unwrap_or(0)
    }

    /// `{"5s": 20.0, "10s": 19.95, ...}` with two decimal places.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for window in &self.windows {
            map.insert(window.label.clone(), Value::from(round2(window.average())));
        }
        Value::Object(map)
    }

    /// `"20.00, 19.95, ..."` in window order.
    pub fn formatted(&self) -> String {
        self.windows
            .iter()
            .map(|w| format!("{:.2}", w.average()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug)]
struct TickState {
    ticks: u64,
    last_sample: Option<Instant>,
    averages: RollingWindowAverage,
}

/// Turns host-loop ticks into tick-rate averages.
///
/// [`on_tick`](TickRateCalculator::on_tick) is called once per host tick; every
/// [`SAMPLE_INTERVAL`] ticks the measured ticks-per-second is fed into the
/// standard windows. Reads take the same short lock as a tick does.
#[derive(Debug)]
pub struct TickRateCalculator {
    state: Mutex<TickState>,
}

impl TickRateCalculator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TickState {
                ticks: 0,
                last_sample: None,
                averages: RollingWindowAverage::standard(),
            }),
        }
    }

    /// Record a tick at the current instant.
    pub fn on_tick(&self) {
        self.on_tick_at(Instant::now());
    }

    /// Record a tick at `now`.
    pub fn on_tick_at(&self, now: Instant) {
        let mut state = self.state.lock();
        state.ticks += 1;
        if state.ticks % SAMPLE_INTERVAL != 0 {
            return;
        }

        // The first sample only establishes a baseline.
        if let Some(last) = state.last_sample.replace(now) {
            let elapsed = now.saturating_duration_since(last);
            if !elapsed.is_zero() {
                let rate = SAMPLE_INTERVAL as f64 / elapsed.as_secs_f64();
                state.averages.record(rate, elapsed);
            }
        }
    }

    /// Total ticks observed.
    pub fn ticks(&self) -> u64 {
        self.state.lock().ticks
    }

    /// Copy of the current averages.
    pub fn averages(&self) -> RollingWindowAverage {
        self.state.lock().averages.clone()
    }

    pub fn to_json(&self) -> Value {
        self.state.lock().averages.to_json()
    }

    pub fn formatted(&self) -> String {
        self.state.lock().averages.formatted()
    }
}

impl Default for TickRateCalculator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    #[test]
    fn empty_average_reads_zero() {
        let avg = RollingWindowAverage::standard();
        assert_eq!(avg.average("5s"), Some(0.0));
        assert_eq!(avg.samples(), 0);
        assert_eq!(avg.average("1h"), None);
    }

    #[test]
    fn constant_rate_converges_in_every_window() {
        let mut avg = RollingWindowAverage::standard();
        // One full 15m window of one-second samples.
        for _ in 0..(15 * 60) {
            avg.record(19.5, SECOND);
        }

        for (label, value) in avg.averages() {
            assert!((value - 19.5).abs() < 1e-9, "{label} = {value}");
        }
    }

    #[test]
    fn converges_to_new_rate_after_one_window() {
        let mut avg = RollingWindowAverage::new([("5s", Duration::from_secs(5))]);
        for _ in 0..60 {
            avg.record(20.0, SECOND);
        }
        for _ in 0..30 {
            avg.record(10.0, SECOND);
        }

        let value = avg.average("5s").unwrap();
        assert!((value - 10.0).abs() < 0.05, "5s = {value}");
    }

    #[test]
    fn zero_input_decays_monotonically() {
        let mut avg = RollingWindowAverage::standard();
        for _ in 0..30 {
            avg.record(20.0, SECOND);
        }

        let mut previous = avg.averages();
        for _ in 0..120 {
            avg.record(0.0, SECOND);
            let current = avg.averages();
            for ((label, before), (_, after)) in previous.iter().zip(current.iter()) {
                assert!(after <= before, "{label} rose from {before} to {after}");
                assert!(*after >= 0.0);
            }
            previous = current;
        }

        assert!(avg.average("5s").unwrap() < 0.01);
    }

    #[test]
    fn shorter_windows_react_faster() {
        let mut avg = RollingWindowAverage::standard();
        for _ in 0..600 {
            avg.record(20.0, SECOND);
        }
        for _ in 0..10 {
            avg.record(5.0, SECOND);
        }

        let short = avg.average("5s").unwrap();
        let long = avg.average("15m").unwrap();
        assert!(short < long);
    }

    #[test]
    fn zero_elapsed_sample_is_ignored() {
        let mut avg = RollingWindowAverage::standard();
        avg.record(20.0, Duration::ZERO);
        assert_eq!(avg.samples(), 0);
    }

    #[test]
    fn json_and_formatted_output() {
        let mut avg = RollingWindowAverage::standard();
        avg.record(19.987, SECOND);

        let json = avg.to_json();
        assert_eq!(json["5s"], 19.99);
        assert_eq!(json.as_object().unwrap().len(), 5);
        assert_eq!(avg.formatted(), "19.99, 19.99, 19.99, 19.99, 19.99");
    }

    #[test]
    fn tick_calculator_measures_tick_rate() {
        let calc = TickRateCalculator::new();
        let start = Instant::now();

        // 20 ticks per simulated second for a minute.
        for tick in 1..=(20 * 60u64) {
            calc.on_tick_at(start + Duration::from_millis(tick * 50));
        }

        assert_eq!(calc.ticks(), 1200);
        let avg = calc.averages();
        assert!(avg.samples() > 50);
        let value = avg.average("1m").unwrap();
        assert!((value - TARGET_TICK_RATE).abs() < 1e-6, "1m = {value}");
    }

    #[test]
    fn tick_calculator_sees_slow_ticks() {
        let calc = TickRateCalculator::new();
        let start = Instant::now();

        // 10 ticks per simulated second.
        for tick in 1..=400u64 {
            calc.on_tick_at(start + Duration::from_millis(tick * 100));
        }

        let value = calc.averages().average("5s").unwrap();
        assert!((value - 10.0).abs() < 1e-6, "5s = {value}");
        assert!(calc.formatted().starts_with("10.00"));
    }
}
