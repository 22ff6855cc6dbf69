//! Periodic producer: synthesizes typed sample arrays for every periodic
//! class on its configured period and enqueues them.
//!
//! A single task serves all periodic classes. It wakes every 100 ms, checks
//! each class against its `last_fired` timestamp, and fires the ones that
//! are due. The first eligible tick fires every class immediately so the
//! pipeline carries traffic from startup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};

use crate::clock::Clock;
use crate::scheduler::context::SchedulerContext;
use crate::wire::{ClassId, DataType, MAX_CLASSES};

pub const PRODUCER_TICK_MS: u64 = 100;

/// Fill a sample array with the per-type test pattern.
pub fn synth_payload(data_type: DataType, count: u16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(count as usize * data_type.width());
    for i in 0..count as i64 {
        match data_type {
            DataType::Int8 => payload.push(i as u8),
            DataType::Int16 => payload.extend_from_slice(&((i * 10) as i16).to_le_bytes()),
            DataType::Int32 => payload.extend_from_slice(&(i as i32).to_le_bytes()),
            DataType::Float => payload.extend_from_slice(&(i as f32 * 0.1).to_le_bytes()),
            DataType::Double => payload.extend_from_slice(&(i as f64 * 0.01).to_le_bytes()),
        }
    }
    payload
}

pub struct PeriodicProducer {
    ctx: Arc<SchedulerContext>,
    clock: Arc<dyn Clock>,
    last_fired: [Option<u64>; MAX_CLASSES],
}

impl PeriodicProducer {
    pub fn new(ctx: Arc<SchedulerContext>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ctx,
            clock,
            last_fired: [None; MAX_CLASSES],
        }
    }

    /// Fire every periodic class that is due. Returns how many fired.
    pub fn poll(&mut self) -> usize {
        let now = self.clock.now_ms();
        let mut fired = 0;

        for class in ClassId::ALL {
            let cfg = self.ctx.class_config(class);
            if cfg.period_ms == 0 || cfg.count == 0 {
                continue;
            }
            let due = match self.last_fired[class.index()] {
                None => true,
                Some(last) => now.saturating_sub(last) >= cfg.period_ms,
            };
            if !due {
                continue;
            }

            let payload = synth_payload(cfg.data_type, cfg.count);
            match self
                .ctx
                .submit_packet(class, cfg.data_type, cfg.count, payload, now)
            {
                Ok(()) => {
                    debug!("[producer] fired {} at {}", class.name(), now);
                    fired += 1;
                }
                Err(e) => warn!("[producer] {} event dropped: {}", class.name(), e),
            }
            self.last_fired[class.index()] = Some(now);
        }

        fired
    }

    /// Task loop: 100 ms tick until the run flag clears.
    pub fn run(&mut self, running: &AtomicBool) {
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        while running.load(Ordering::Acquire) {
            self.poll();
            sleeper.sleep(Duration::from_millis(PRODUCER_TICK_MS));
        }
        debug!("[producer] stopped");
    }
}
