//! Deadline-triggered batching: decide when to transmit, pack the frame.
//!
//! The batcher wakes every 50 ms and looks at the earliest deadline across
//! all queue heads. When that deadline falls inside the processing
//! threshold, it drains the queues in ascending class-ordinal order into a
//! single bounded TX buffer and emits one frame. There is no state between
//! ticks beyond the queues themselves.
//!
//! Lock discipline: the trigger scan and the pack loop each take the
//! scheduler mutex once; the TX buffer is allocated before the pack lock
//! and the radio send happens after it is released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};

use crate::clock::Clock;
use crate::radio::Radio;
use crate::scheduler::context::SchedulerContext;
use crate::util::trace::TraceEvent;
use crate::wire::frame::{build_frame, EndpointRole, FrameHeader, LinkAddresses};
use crate::wire::{ClassId, DataType, MAX_CLASSES, MAX_TX_SIZE};

/// Batcher wake period.
pub const SCHEDULER_TICK_MS: u64 = 50;

/// Packing stops for the whole tick once less than this many bytes remain.
pub const LOW_SPACE_WATERMARK: usize = 100;

/// What one tick did; returned for observability and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No queue had a head packet.
    Idle,
    /// The earliest deadline was still outside the threshold.
    NotUrgent,
    /// Every dequeued packet had expired; nothing reached the wire.
    AllMissed,
    /// A frame was handed to the radio (or lost in it).
    Emitted { sent: bool, total_size: u16 },
}

pub struct Batcher {
    ctx: Arc<SchedulerContext>,
    clock: Arc<dyn Clock>,
    radio: Arc<dyn Radio>,
    role: EndpointRole,
    link: LinkAddresses,
}

impl Batcher {
    pub fn new(
        ctx: Arc<SchedulerContext>,
        clock: Arc<dyn Clock>,
        radio: Arc<dyn Radio>,
        role: EndpointRole,
        link: LinkAddresses,
    ) -> Self {
        Self {
            ctx,
            clock,
            radio,
            role,
            link,
        }
    }

    /// One scheduling pass: trigger check, pack, emit.
    pub fn run_tick(&self) -> TickOutcome {
        let now = self.clock.now_ms();

        // Trigger selection: earliest deadline across all queue heads.
        let (earliest, threshold_ms) = {
            let mut state = self.ctx.state();
            state.counters.current_time_ms = now;
            let earliest = state
                .queues
                .iter()
                .filter_map(|q| q.peek_front().map(|p| p.deadline_ms))
                .min();
            (earliest, state.threshold_ms)
        };

        let earliest = match earliest {
            Some(deadline) => deadline,
            None => return TickOutcome::Idle,
        };
        if earliest > now + threshold_ms {
            return TickOutcome::NotUrgent;
        }

        // TX buffer allocated outside the lock.
        let mut buf = Vec::with_capacity(MAX_TX_SIZE);
        let mut counts = [0u16; MAX_CLASSES];
        let types: [DataType; MAX_CLASSES];

        {
            let mut state = self.ctx.state();
            let mut remaining = MAX_TX_SIZE;

            'classes: for class in ClassId::ALL {
                let idx = class.index();
                loop {
                    // The fit check gates the dequeue: an oversized head is
                    // left in place for the next pass, when the buffer
                    // resets.
                    let head_size = match state.queues[idx].peek_front() {
                        Some(head) => head.size as usize,
                        None => break,
                    };
                    if head_size > remaining {
                        debug!(
                            "[batcher] {} head of {} bytes does not fit {} remaining",
                            class.name(),
                            head_size,
                            remaining
                        );
                        break;
                    }
                    let packet = match state.queues[idx].dequeue_front() {
                        Some(packet) => packet,
                        None => break,
                    };

                    if now > packet.deadline_ms {
                        warn!(
                            "[batcher] {} packet missed deadline {} at {}",
                            class.name(),
                            packet.deadline_ms,
                            now
                        );
                        state.counters.deadline_misses += 1;
                        state.counters.packets_processed += 1;
                        self.ctx.recorder().record(TraceEvent::DeadlineMiss {
                            class: idx as u8,
                            deadline_ms: packet.deadline_ms,
                            now_ms: now,
                        });
                        continue;
                    }

                    buf.extend_from_slice(&packet.payload);
                    remaining -= packet.size as usize;
                    counts[idx] += packet.data_count;
                    state.counters.packets_processed += 1;

                    if remaining < LOW_SPACE_WATERMARK {
                        break 'classes;
                    }
                }
            }

            types = [
                state.classes[0].data_type,
                state.classes[1].data_type,
                state.classes[2].data_type,
                state.classes[3].data_type,
            ];
        }

        if buf.is_empty() {
            return TickOutcome::AllMissed;
        }

        let total_size = buf.len() as u16;
        let header = FrameHeader {
            counts,
            types,
            total_size,
            timestamp: now as u32,
        };
        let frame = build_frame(self.role, &self.link, &header, &buf);

        match self.radio.send(&frame) {
            Ok(()) => {
                let groups = counts.iter().filter(|&&c| c > 0).count() as u64;
                let mut state = self.ctx.state();
                state.counters.packets_transmitted += groups;
                drop(state);
                debug!(
                    "[batcher] sent frame: counts {:?}, {} bytes at {}",
                    counts, total_size, now
                );
                self.ctx.recorder().record(TraceEvent::FrameSent {
                    total_size,
                    class_groups: groups as u8,
                    timestamp_ms: now,
                });
                TickOutcome::Emitted {
                    sent: true,
                    total_size,
                }
            }
            Err(e) => {
                // Frame lost; no transmitted count, next tick proceeds.
                error!("[batcher] {}", e);
                self.ctx.recorder().record(TraceEvent::TransmitFailed);
                TickOutcome::Emitted {
                    sent: false,
                    total_size,
                }
            }
        }
    }

    /// Task loop: 50 ms tick until the run flag clears.
    pub fn run(&self, running: &AtomicBool) {
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        while running.load(Ordering::Acquire) {
            self.run_tick();
            sleeper.sleep(Duration::from_millis(SCHEDULER_TICK_MS));
        }
        debug!("[batcher] stopped");
    }
}
