//! Scheduler context: queues, class configuration, counters.
//!
//! One mutex covers everything the producers, the batcher, and the status
//! surface touch. The lock is never held across radio transmission or the
//! TX-buffer allocation; the batcher takes it once per tick phase.

use std::fmt;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::{Mutex, MutexGuard};

use crate::radio::RadioSettings;
use crate::scheduler::queue::{PacketQueue, QueuedPacket, QueueFull};
use crate::util::trace::{EventRecorder, TraceEvent};
use crate::wire::{ClassId, DataType, MAX_CLASSES, MAX_PACKET_SIZE};

pub const MIN_PERIOD_MS: u64 = 100;
pub const MAX_PERIOD_MS: u64 = 10_000;
pub const MIN_PACKET_COUNT: u16 = 1;
pub const MAX_PACKET_COUNT: u16 = 200;
pub const MIN_THRESHOLD_MS: u64 = 50;
pub const MAX_THRESHOLD_MS: u64 = 15_000;
pub const MIN_DEADLINE_FACTOR: f64 = 0.8;
pub const MAX_DEADLINE_FACTOR: f64 = 4.0;

pub const DEFAULT_THRESHOLD_MS: u64 = 1_000;

/// Per-class settings: sample type, production cadence, relative deadline,
/// and how many elements each production event carries.
#[derive(Debug, Clone, Copy)]
pub struct ClassConfig {
    pub data_type: DataType,
    /// Production period in ms; 0 marks the class aperiodic.
    pub period_ms: u64,
    /// Relative deadline added to the enqueue time.
    pub deadline_ms: u64,
    /// Target element count per production event.
    pub count: u16,
}

/// Aperiodic producer settings.
#[derive(Debug, Clone, Copy)]
pub struct RandomConfig {
    pub enabled: bool,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    pub burst_period_ms: u64,
    pub burst_interval_ms: u64,
    pub burst_enabled: bool,
    pub count: u16,
    pub data_type: DataType,
}

impl RandomConfig {
    /// Coerce an inverted interval range the way the console does.
    pub fn validated(mut self) -> Self {
        if self.min_interval_ms >= self.max_interval_ms {
            warn!(
                "random interval min {} >= max {}, coercing max to min + 1000",
                self.min_interval_ms, self.max_interval_ms
            );
            self.max_interval_ms = self.min_interval_ms + 1000;
        }
        self
    }
}

impl Default for RandomConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_interval_ms: 500,
            max_interval_ms: 3_000,
            burst_period_ms: 10_000,
            burst_interval_ms: 50,
            burst_enabled: true,
            count: 10,
            data_type: DataType::Int32,
        }
    }
}

/// Everything the console configures before the scheduler starts.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub classes: [ClassConfig; MAX_CLASSES],
    pub threshold_ms: u64,
    pub random: RandomConfig,
    pub radio: RadioSettings,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            classes: [
                ClassConfig {
                    data_type: DataType::Int32,
                    period_ms: 3_000,
                    deadline_ms: 3_000,
                    count: 5,
                },
                ClassConfig {
                    data_type: DataType::Float,
                    period_ms: 5_000,
                    deadline_ms: 5_000,
                    count: 4,
                },
                ClassConfig {
                    data_type: DataType::Int16,
                    period_ms: 6_000,
                    deadline_ms: 6_000,
                    count: 6,
                },
                // Aperiodic class: no period, cadence owned by the random
                // producer; only the deadline and type matter here.
                ClassConfig {
                    data_type: DataType::Int32,
                    period_ms: 0,
                    deadline_ms: 2_000,
                    count: 0,
                },
            ],
            threshold_ms: DEFAULT_THRESHOLD_MS,
            random: RandomConfig::default(),
            radio: RadioSettings::default(),
        }
    }
}

/// Cumulative scheduler counters, read-only from outside.
#[derive(Debug, Default, Clone, Copy)]
pub struct Counters {
    pub packets_processed: u64,
    pub packets_transmitted: u64,
    pub deadline_misses: u64,
    pub queue_drops: u64,
    pub current_time_ms: u64,
}

/// Why a submission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// `count * width` exceeds `MAX_PACKET_SIZE`.
    TooLarge { size: usize },
    /// The class type changed between synthesis and enqueue.
    TypeMismatch { expected: DataType, got: DataType },
    QueueFull,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::TooLarge { size } => {
                write!(f, "payload of {} bytes exceeds {}", size, MAX_PACKET_SIZE)
            }
            SubmitError::TypeMismatch { expected, got } => {
                write!(f, "type {} does not match class type {}", got.name(), expected.name())
            }
            SubmitError::QueueFull => write!(f, "class queue full"),
        }
    }
}

pub(crate) struct SchedulerState {
    pub(crate) queues: [PacketQueue; MAX_CLASSES],
    pub(crate) classes: [ClassConfig; MAX_CLASSES],
    pub(crate) threshold_ms: u64,
    pub(crate) counters: Counters,
}

/// Shared scheduler state. Constructed once at startup; every task holds an
/// `Arc` to it.
pub struct SchedulerContext {
    inner: Mutex<SchedulerState>,
    recorder: EventRecorder,
}

impl SchedulerContext {
    pub fn new(config: &SchedulerConfig, recorder: EventRecorder) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(SchedulerState {
                queues: Default::default(),
                classes: config.classes,
                threshold_ms: config.threshold_ms,
                counters: Counters::default(),
            }),
            recorder,
        })
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.inner.lock()
    }

    pub(crate) fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    /// Validate and enqueue one typed sample array for `class_id`, stamping
    /// its deadline from the class's relative deadline.
    pub fn submit_packet(
        &self,
        class_id: ClassId,
        data_type: DataType,
        count: u16,
        payload: Vec<u8>,
        now_ms: u64,
    ) -> Result<(), SubmitError> {
        let size = count as usize * data_type.width();
        debug_assert_eq!(payload.len(), size);
        if size > MAX_PACKET_SIZE {
            warn!(
                "[{}] payload too large: {} bytes (max {})",
                class_id.name(),
                size,
                MAX_PACKET_SIZE
            );
            return Err(SubmitError::TooLarge { size });
        }

        let mut state = self.inner.lock();
        let cfg = state.classes[class_id.index()];
        if cfg.data_type != data_type {
            warn!(
                "[{}] dropping packet: class type is {}, packet is {}",
                class_id.name(),
                cfg.data_type.name(),
                data_type.name()
            );
            return Err(SubmitError::TypeMismatch {
                expected: cfg.data_type,
                got: data_type,
            });
        }

        let deadline_ms = now_ms + cfg.deadline_ms;
        let packet = QueuedPacket {
            class_id,
            data_type,
            data_count: count,
            size: size as u16,
            deadline_ms,
            payload,
        };

        match state.queues[class_id.index()].enqueue_back(packet) {
            Ok(()) => {
                debug!(
                    "[{}] queued {} x {} ({} bytes), deadline {}",
                    class_id.name(),
                    count,
                    data_type.name(),
                    size,
                    deadline_ms
                );
                self.recorder.record(TraceEvent::Enqueued {
                    class: class_id.index() as u8,
                    count,
                    size: size as u16,
                    deadline_ms,
                });
                Ok(())
            }
            Err(QueueFull) => {
                state.counters.queue_drops += 1;
                warn!("[{}] queue full, dropping packet", class_id.name());
                self.recorder.record(TraceEvent::QueueDrop {
                    class: class_id.index() as u8,
                });
                Err(SubmitError::QueueFull)
            }
        }
    }

    pub fn class_config(&self, class_id: ClassId) -> ClassConfig {
        self.inner.lock().classes[class_id.index()]
    }

    pub fn set_class_config(&self, class_id: ClassId, config: ClassConfig) {
        self.inner.lock().classes[class_id.index()] = config;
    }

    pub fn threshold_ms(&self) -> u64 {
        self.inner.lock().threshold_ms
    }

    pub fn set_threshold_ms(&self, threshold_ms: u64) {
        self.inner.lock().threshold_ms =
            threshold_ms.clamp(MIN_THRESHOLD_MS, MAX_THRESHOLD_MS);
    }

    pub fn counters(&self) -> Counters {
        self.inner.lock().counters
    }

    pub fn queue_lens(&self) -> [usize; MAX_CLASSES] {
        let state = self.inner.lock();
        let mut lens = [0usize; MAX_CLASSES];
        for (len, queue) in lens.iter_mut().zip(state.queues.iter()) {
            *len = queue.len();
        }
        lens
    }
}
