//! Inference latency statistics. Diagnostics only.

/// Last-call latency plus a running average.
///
/// The average weights sample `n` by `1 / min(n, window)`: a plain mean until
/// the window is full, an exponential moving average afterwards.
#[derive(Debug, Clone)]
pub struct InferenceTimer {
    enabled: bool,
    window: u32,
    accumulated: u32,
    last_ms: f64,
    average_ms: f64,
}

/// Copy of the timer state handed to hosts.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimingSnapshot {
    pub last_ms: f64,
    pub average_ms: f64,
    pub accumulated_frames: u32,
}

impl Default for InferenceTimer {
    fn default() -> Self {
        Self::new(64)
    }
}

impl InferenceTimer {
    pub fn new(window: u32) -> Self {
        Self {
            enabled: true,
            window: window.max(1),
            accumulated: 0,
            last_ms: 0.0,
            average_ms: 0.0,
        }
    }

    pub fn record(&mut self, ms: f64) {
        if !self.enabled {
            return;
        }
        self.last_ms = ms;
        self.accumulated = self.accumulated.saturating_add(1);
        let n = self.accumulated.min(self.window) as f64;
        self.average_ms += (ms - self.average_ms) / n;
    }

    pub fn reset(&mut self) {
        self.accumulated = 0;
        self.last_ms = 0.0;
        self.average_ms = 0.0;
    }

    pub fn set_window(&mut self, window: u32) {
        self.window = window.max(1);
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn last_ms(&self) -> f64 {
        self.last_ms
    }

    pub fn average_ms(&self) -> f64 {
        self.average_ms
    }

    pub fn accumulated_frames(&self) -> u32 {
        self.accumulated
    }

    pub fn snapshot(&self) -> TimingSnapshot {
        TimingSnapshot {
            last_ms: self.last_ms,
            average_ms: self.average_ms,
            accumulated_frames: self.accumulated,
        }
    }
}
