//! Aperiodic ("random") producer with burst mode.
//!
//! Inter-arrival times are sampled uniformly from the configured interval
//! range. When burst mode is enabled, the producer switches into a fixed
//! five-second burst window once `burst_period_ms` has elapsed since the
//! last mode transition; inside the window every inter-arrival equals
//! `burst_interval_ms`. Leaving the window resets the burst timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use rand::random_range;
use spin_sleep::{SpinSleeper, SpinStrategy};

use crate::clock::Clock;
use crate::scheduler::context::{RandomConfig, SchedulerContext};
use crate::scheduler::producer::synth_payload;
use crate::wire::ClassId;

/// Length of one burst window.
pub const BURST_WINDOW_MS: u64 = 5_000;

/// Poll granularity of the task loop; fine enough for burst intervals.
const POLL_TICK_MS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    Burst,
}

pub struct RandomProducer {
    ctx: Arc<SchedulerContext>,
    clock: Arc<dyn Clock>,
    config: RandomConfig,
    mode: Mode,
    mode_entered_ms: u64,
    next_fire_ms: u64,
}

impl RandomProducer {
    pub fn new(ctx: Arc<SchedulerContext>, clock: Arc<dyn Clock>, config: RandomConfig) -> Self {
        let config = config.validated();
        let now = clock.now_ms();
        let first = now + sample_interval(&config);
        Self {
            ctx,
            clock,
            config,
            mode: Mode::Normal,
            mode_entered_ms: now,
            next_fire_ms: first,
        }
    }

    pub fn config(&self) -> &RandomConfig {
        &self.config
    }

    /// Advance the mode state machine and fire if due. Returns whether a
    /// packet was produced this poll.
    pub fn poll(&mut self) -> bool {
        if !self.config.enabled {
            return false;
        }
        let now = self.clock.now_ms();

        match self.mode {
            Mode::Normal => {
                if self.config.burst_enabled
                    && now.saturating_sub(self.mode_entered_ms) >= self.config.burst_period_ms
                {
                    info!("[random] entering burst window at {}", now);
                    self.mode = Mode::Burst;
                    self.mode_entered_ms = now;
                    self.next_fire_ms = now;
                }
            }
            Mode::Burst => {
                if now.saturating_sub(self.mode_entered_ms) >= BURST_WINDOW_MS {
                    info!("[random] leaving burst window at {}", now);
                    self.mode = Mode::Normal;
                    self.mode_entered_ms = now;
                    self.next_fire_ms = now + sample_interval(&self.config);
                }
            }
        }

        if now < self.next_fire_ms {
            return false;
        }

        let payload = synth_payload(self.config.data_type, self.config.count);
        match self.ctx.submit_packet(
            ClassId::Random,
            self.config.data_type,
            self.config.count,
            payload,
            now,
        ) {
            Ok(()) => debug!("[random] fired at {} ({:?})", now, self.mode),
            Err(e) => warn!("[random] event dropped: {}", e),
        }

        self.next_fire_ms = now
            + match self.mode {
                Mode::Burst => self.config.burst_interval_ms,
                Mode::Normal => sample_interval(&self.config),
            };
        true
    }

    /// Task loop: fine-grained polling so burst cadence stays accurate.
    pub fn run(&mut self, running: &AtomicBool) {
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        while running.load(Ordering::Acquire) {
            self.poll();
            sleeper.sleep(Duration::from_millis(POLL_TICK_MS));
        }
        debug!("[random] stopped");
    }
}

fn sample_interval(config: &RandomConfig) -> u64 {
    random_range(config.min_interval_ms..=config.max_interval_ms)
}
