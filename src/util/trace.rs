//! Event tracing and bounded stat buffers.
//!
//! Two pieces:
//! - `EventRecorder`: a lock-free bounded queue the real-time tasks push
//!   trace events into, drained by a background thread that writes CSV.
//!   Pushing never blocks; events are dropped silently when the queue is
//!   full.
//! - Capped history buffers with min/max/mean summaries, used for latency
//!   diagnostics.

use std::collections::VecDeque;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;
use log::{debug, error};
use serde::Serialize;

const TRACE_QUEUE_CAPACITY: usize = 8_192;
const CONSUMER_POLL_MS: u64 = 5;
const FLUSH_BATCHES: usize = 8;

/// Scheduler lifecycle events worth a CSV row.
#[derive(Debug, Clone, Copy)]
pub enum TraceEvent {
    Enqueued {
        class: u8,
        count: u16,
        size: u16,
        deadline_ms: u64,
    },
    QueueDrop {
        class: u8,
    },
    DeadlineMiss {
        class: u8,
        deadline_ms: u64,
        now_ms: u64,
    },
    FrameSent {
        total_size: u16,
        class_groups: u8,
        timestamp_ms: u64,
    },
    TransmitFailed,
    FrameReceived {
        total_size: u16,
        latency_ms: u64,
    },
    PowerChange {
        level: i8,
        rssi: i8,
    },
}

impl TraceEvent {
    fn name(&self) -> &'static str {
        match self {
            TraceEvent::Enqueued { .. } => "enqueued",
            TraceEvent::QueueDrop { .. } => "queue_drop",
            TraceEvent::DeadlineMiss { .. } => "deadline_miss",
            TraceEvent::FrameSent { .. } => "frame_sent",
            TraceEvent::TransmitFailed => "tx_failed",
            TraceEvent::FrameReceived { .. } => "frame_received",
            TraceEvent::PowerChange { .. } => "power_change",
        }
    }

    /// (detail, value) pair for the CSV columns.
    fn fields(&self) -> (String, i64) {
        match *self {
            TraceEvent::Enqueued {
                class,
                count,
                size,
                deadline_ms,
            } => (
                format!("class:{} count:{} deadline:{}", class, count, deadline_ms),
                size as i64,
            ),
            TraceEvent::QueueDrop { class } => (format!("class:{}", class), 0),
            TraceEvent::DeadlineMiss {
                class,
                deadline_ms,
                now_ms,
            } => (
                format!("class:{} deadline:{}", class, deadline_ms),
                (now_ms - deadline_ms) as i64,
            ),
            TraceEvent::FrameSent {
                total_size,
                class_groups,
                timestamp_ms,
            } => (
                format!("groups:{} ts:{}", class_groups, timestamp_ms),
                total_size as i64,
            ),
            TraceEvent::TransmitFailed => (String::new(), 0),
            TraceEvent::FrameReceived {
                total_size,
                latency_ms,
            } => (format!("latency_ms:{}", latency_ms), total_size as i64),
            TraceEvent::PowerChange { level, rssi } => {
                (format!("rssi:{}", rssi), level as i64)
            }
        }
    }
}

struct RawTrace {
    seq: u64,
    ts: Instant,
    event: TraceEvent,
}

#[derive(Serialize)]
struct CsvRow {
    seq: u64,
    age_us: u64,
    event: &'static str,
    detail: String,
    value: i64,
}

/// Non-blocking trace recorder shared by all scheduler tasks.
pub struct EventRecorder {
    queue: Arc<ArrayQueue<RawTrace>>,
    seq: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    exporting: Arc<AtomicBool>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(TRACE_QUEUE_CAPACITY)),
            seq: Arc::new(AtomicU64::new(1)),
            dropped: Arc::new(AtomicU64::new(0)),
            exporting: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Push one event; drops silently when the queue is full.
    #[inline]
    pub fn record(&self, event: TraceEvent) {
        let raw = RawTrace {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            ts: Instant::now(),
            event,
        };
        if self.queue.push(raw).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Spawn the CSV exporter thread. Runs until `stop_exporter`, then
    /// drains whatever is left.
    pub fn start_exporter(&self, output_csv: PathBuf) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let running = self.exporting.clone();
        let dropped = self.dropped.clone();
        running.store(true, Ordering::SeqCst);

        thread::spawn(move || {
            let file = match File::create(&output_csv) {
                Ok(f) => f,
                Err(e) => {
                    error!("failed to create trace csv {:?}: {}", output_csv, e);
                    return;
                }
            };
            let mut wtr = csv::Writer::from_writer(BufWriter::new(file));
            wtr.serialize(("seq", "age_us", "event", "detail", "value"))
                .ok();
            let mut flush_counter = 0usize;

            let write_row = |wtr: &mut csv::Writer<BufWriter<File>>, raw: RawTrace| {
                let (detail, value) = raw.event.fields();
                let row = CsvRow {
                    seq: raw.seq,
                    age_us: raw.ts.elapsed().as_micros() as u64,
                    event: raw.event.name(),
                    detail,
                    value,
                };
                wtr.serialize(&row).ok();
            };

            while running.load(Ordering::SeqCst) {
                let mut any = false;
                for _ in 0..256 {
                    match queue.pop() {
                        Some(raw) => {
                            any = true;
                            write_row(&mut wtr, raw);
                        }
                        None => break,
                    }
                }
                if any {
                    flush_counter += 1;
                    if flush_counter >= FLUSH_BATCHES {
                        wtr.flush().ok();
                        flush_counter = 0;
                    }
                } else {
                    thread::sleep(Duration::from_millis(CONSUMER_POLL_MS));
                }
            }

            while let Some(raw) = queue.pop() {
                write_row(&mut wtr, raw);
            }
            wtr.flush().ok();
            debug!(
                "[trace] exporter exiting, dropped={}",
                dropped.load(Ordering::Relaxed)
            );
        })
    }

    pub fn stop_exporter(&self) {
        self.exporting.store(false, Ordering::SeqCst);
    }
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventRecorder {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            seq: self.seq.clone(),
            dropped: self.dropped.clone(),
            exporting: self.exporting.clone(),
        }
    }
}

pub const MAX_POINTS: usize = 1_000;

/// Append to a bounded history buffer, evicting the oldest entry.
#[inline]
pub fn push_capped(buf: &mut VecDeque<u64>, val: u64) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

/// Min/max/mean summary of a history buffer.
#[derive(Debug, Clone)]
pub struct Stats {
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub count: usize,
}

pub fn calculate_stats(data: &VecDeque<u64>) -> Option<Stats> {
    if data.is_empty() {
        return None;
    }
    let count = data.len();
    let min = *data.iter().min().unwrap_or(&0);
    let max = *data.iter().max().unwrap_or(&0);
    let mean = data.iter().sum::<u64>() as f64 / count as f64;
    Some(Stats {
        min,
        max,
        mean,
        count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_capped_evicts_oldest() {
        let mut buf = VecDeque::new();
        for i in 0..(MAX_POINTS as u64 + 5) {
            push_capped(&mut buf, i);
        }
        assert_eq!(buf.len(), MAX_POINTS);
        assert_eq!(*buf.front().unwrap(), 5);
    }

    #[test]
    fn stats_summary() {
        let mut buf = VecDeque::new();
        for v in [2u64, 4, 6] {
            push_capped(&mut buf, v);
        }
        let stats = calculate_stats(&buf).unwrap();
        assert_eq!(stats.min, 2);
        assert_eq!(stats.max, 6);
        assert!((stats.mean - 4.0).abs() < f64::EPSILON);
    }
}
