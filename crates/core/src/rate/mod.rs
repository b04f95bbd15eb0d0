use std::{
    fmt,
    time::{Duration, Instant},
};

/// How a [`FrameRateCounter`] turns ticks into a rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateMode {
    /// Reciprocal of the time since the previous tick, reported on every tick.
    Instant,
    /// Ticks counted over a window, reported once the window has elapsed.
    Windowed(Duration),
}

type RateCallback = Box<dyn FnMut(f64) + Send>;

/// Counts events and reports their rate (events per second) to a callback.
pub struct FrameRateCounter {
    mode: RateMode,
    callback: RateCallback,
    last_tick: Option<Instant>,
    window_start: Option<Instant>,
    window_ticks: u64,
    rate: Option<f64>,
}

impl FrameRateCounter {
    pub fn new(mode: RateMode, callback: impl FnMut(f64) + Send + 'static) -> Self {
        Self {
            mode,
            callback: Box::new(callback),
            last_tick: None,
            window_start: None,
            window_ticks: 0,
            rate: None,
        }
    }

    /// Instant-mode counter.
    pub fn instant(callback: impl FnMut(f64) + Send + 'static) -> Self {
        Self::new(RateMode::Instant, callback)
    }

    /// Windowed counter averaging over `interval`.
    pub fn windowed(interval: Duration, callback: impl FnMut(f64) + Send + 'static) -> Self {
        Self::new(RateMode::Windowed(interval), callback)
    }

    /// The most recently reported rate, if any.
    pub fn rate(&self) -> Option<f64> {
        self.rate
    }

    /// Records one event now.
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Records one event at `now`. Timestamps must not go backwards.
    pub fn tick_at(&mut self, now: Instant) {
        match self.mode {
            RateMode::Instant => {
                if let Some(last) = self.last_tick {
                    let elapsed = now.saturating_duration_since(last).as_secs_f64();
                    if elapsed > 0.0 {
                        self.report(1.0 / elapsed);
                    }
                }
            }
            RateMode::Windowed(interval) => match self.window_start {
                None => {
                    self.window_start = Some(now);
                    self.window_ticks = 0;
                }
                Some(start) => {
                    self.window_ticks += 1;
                    let elapsed = now.saturating_duration_since(start);
                    if elapsed >= interval && !elapsed.is_zero() {
                        let rate = self.window_ticks as f64 / elapsed.as_secs_f64();
                        self.window_start = Some(now);
                        self.window_ticks = 0;
                        self.report(rate);
                    }
                }
            },
        }
        self.last_tick = Some(now);
    }

    fn report(&mut self, rate: f64) {
        self.rate = Some(rate);
        (self.callback)(rate);
    }
}

impl fmt::Debug for FrameRateCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameRateCounter")
            .field("mode", &self.mode)
            .field("rate", &self.rate)
            .field("window_ticks", &self.window_ticks)
            .finish()
    }
}
