//! Adaptive transmit-power control.
//!
//! A periodic feedback loop reads the observed RSSI and maps it through a
//! fixed partition into one of four power levels, writing to the radio only
//! when the bin changes. The `>=` comparisons and coarse bins keep small
//! RSSI fluctuations from oscillating the setting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use spin_sleep::{SpinSleeper, SpinStrategy};

use crate::radio::{PowerLevel, Radio};
use crate::util::trace::{EventRecorder, TraceEvent};

/// Signal at or above this needs only minimum power.
pub const RSSI_EXCELLENT: i8 = -15;
pub const RSSI_GOOD: i8 = -25;
pub const RSSI_FAIR: i8 = -45;

pub const DEFAULT_AUTO_TX_INTERVAL_MS: u64 = 5_000;

/// The RSSI → power partition. Stronger signal, lower output.
pub fn level_for_rssi(rssi: i8) -> PowerLevel {
    if rssi >= RSSI_EXCELLENT {
        PowerLevel::Min
    } else if rssi >= RSSI_GOOD {
        PowerLevel::Low
    } else if rssi >= RSSI_FAIR {
        PowerLevel::Medium
    } else {
        PowerLevel::High
    }
}

pub struct TxPowerController {
    radio: Arc<dyn Radio>,
    interval_ms: u64,
    enabled: bool,
    applied: Option<PowerLevel>,
    recorder: EventRecorder,
}

impl TxPowerController {
    pub fn new(
        radio: Arc<dyn Radio>,
        interval_ms: u64,
        enabled: bool,
        recorder: EventRecorder,
    ) -> Self {
        Self {
            radio,
            interval_ms,
            enabled,
            applied: None,
            recorder,
        }
    }

    pub fn applied(&self) -> Option<PowerLevel> {
        self.applied
    }

    /// One control step. Returns the newly applied level when the bin
    /// changed, `None` otherwise.
    pub fn poll(&mut self) -> Option<PowerLevel> {
        if !self.enabled {
            return None;
        }
        let rssi = match self.radio.query_rssi() {
            Some(rssi) => rssi,
            None => {
                debug!("[txpower] link quality unavailable");
                return None;
            }
        };

        let level = level_for_rssi(rssi);
        if self.applied == Some(level) {
            return None;
        }

        self.radio.set_power(level);
        info!("[txpower] rssi {} dBm -> {} ({})", rssi, level.name(), level.raw());
        self.recorder.record(TraceEvent::PowerChange {
            level: level.raw(),
            rssi,
        });
        self.applied = Some(level);
        Some(level)
    }

    /// Task loop at the configured interval.
    pub fn run(&mut self, running: &AtomicBool) {
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        while running.load(Ordering::Acquire) {
            self.poll();
            sleeper.sleep(Duration::from_millis(self.interval_ms));
        }
        debug!("[txpower] stopped");
    }
}
