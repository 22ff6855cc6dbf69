//! Receive pipeline: filter, validate, account, decode.
//!
//! Frames arrive from the radio callback context. Every frame the parser
//! rejects, for any reason, counts as an `error_packets` and is discarded.
//! Valid frames update the receive statistics and are decoded class run by
//! class run in ordinal order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{Receiver as ChannelReceiver, RecvTimeoutError};
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::util::trace::{push_capped, EventRecorder, TraceEvent};
use crate::wire::frame::{parse_frame, EndpointRole, ParseError};
use crate::wire::{ClassId, DataType, MAX_CLASSES};

/// Latency larger than this means the sender restarted or clocks are
/// mismatched; it is reported as zero.
const MAX_PLAUSIBLE_LATENCY_MS: u64 = 30_000;

/// One decoded class run.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedRun {
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl DecodedRun {
    pub fn len(&self) -> usize {
        match self {
            DecodedRun::Int8(v) => v.len(),
            DecodedRun::Int16(v) => v.len(),
            DecodedRun::Int32(v) => v.len(),
            DecodedRun::Float(v) => v.len(),
            DecodedRun::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receive-side statistics and the last observed sender configuration.
#[derive(Debug, Clone)]
pub struct ReceiverStats {
    pub packets_received: u64,
    pub data_packets: u64,
    pub error_packets: u64,
    pub last_counts: [u16; MAX_CLASSES],
    pub last_types: [DataType; MAX_CLASSES],
    pub latency_ms: VecDeque<u64>,
    pub current_time_ms: u64,
}

impl Default for ReceiverStats {
    fn default() -> Self {
        Self {
            packets_received: 0,
            data_packets: 0,
            error_packets: 0,
            last_counts: [0; MAX_CLASSES],
            last_types: [DataType::Int32; MAX_CLASSES],
            latency_ms: VecDeque::new(),
            current_time_ms: 0,
        }
    }
}

type RunSink = Box<dyn Fn(ClassId, DecodedRun, u32) + Send + Sync>;

pub struct Receiver {
    role: EndpointRole,
    own_mac: [u8; 6],
    clock: Arc<dyn Clock>,
    stats: Mutex<ReceiverStats>,
    sink: RunSink,
    recorder: EventRecorder,
}

impl Receiver {
    pub fn new(
        role: EndpointRole,
        own_mac: [u8; 6],
        clock: Arc<dyn Clock>,
        recorder: EventRecorder,
    ) -> Self {
        Self::with_sink(role, own_mac, clock, recorder, Box::new(log_run))
    }

    /// Install a custom per-class decoder hook instead of the logging one.
    pub fn with_sink(
        role: EndpointRole,
        own_mac: [u8; 6],
        clock: Arc<dyn Clock>,
        recorder: EventRecorder,
        sink: RunSink,
    ) -> Self {
        Self {
            role,
            own_mac,
            clock,
            stats: Mutex::new(ReceiverStats::default()),
            sink,
            recorder,
        }
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats.lock().clone()
    }

    /// Process one raw frame from the radio.
    pub fn handle_frame(&self, raw: &[u8]) -> Result<(), ParseError> {
        let now = self.clock.now_ms();

        let parsed = match parse_frame(self.role, self.own_mac, raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("[receiver] dropping frame: {}", e);
                let mut stats = self.stats.lock();
                stats.error_packets += 1;
                stats.current_time_ms = now;
                return Err(e);
            }
        };

        let header = &parsed.header;
        let latency = sanitize_latency(now, header.timestamp);

        {
            let mut stats = self.stats.lock();
            stats.packets_received += 1;
            stats.data_packets += 1;
            stats.last_counts = header.counts;
            stats.last_types = header.types;
            stats.current_time_ms = now;
            push_capped(&mut stats.latency_ms, latency);
        }

        debug!(
            "[receiver] frame: counts {:?}, {} bytes, latency {} ms",
            header.counts, header.total_size, latency
        );

        // Decode runs in ordinal order; a truncated payload is decoded as
        // far as the bytes allow.
        let mut offset = 0usize;
        for class in ClassId::ALL {
            let idx = class.index();
            let count = header.counts[idx] as usize;
            if count == 0 {
                continue;
            }
            let width = header.types[idx].width();
            let run_len = count * width;
            let available = parsed.payload.len().saturating_sub(offset);
            let take = run_len.min(available - available % width);
            if take > 0 {
                let run = decode_run(header.types[idx], &parsed.payload[offset..offset + take]);
                (self.sink)(class, run, header.timestamp);
            }
            if take < run_len {
                warn!(
                    "[receiver] {} run cut short: {} of {} bytes",
                    class.name(),
                    take,
                    run_len
                );
                break;
            }
            offset += run_len;
        }

        self.recorder.record(TraceEvent::FrameReceived {
            total_size: header.total_size,
            latency_ms: latency,
        });
        Ok(())
    }

    /// Drain loop for the in-process loopback channel.
    pub fn run(&self, frames: ChannelReceiver<Vec<u8>>, running: &AtomicBool) {
        while running.load(Ordering::Acquire) {
            match frames.recv_timeout(Duration::from_millis(200)) {
                Ok(frame) => {
                    let _ = self.handle_frame(&frame);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("[receiver] stopped");
    }
}

/// `now - timestamp`, zeroed when implausible.
fn sanitize_latency(now_ms: u64, timestamp: u32) -> u64 {
    let sent = timestamp as u64;
    if sent > now_ms {
        warn!("[receiver] timestamp {} ahead of clock {}", sent, now_ms);
        return 0;
    }
    let latency = now_ms - sent;
    if latency > MAX_PLAUSIBLE_LATENCY_MS {
        warn!("[receiver] implausible latency {} ms, using 0", latency);
        return 0;
    }
    latency
}

fn decode_run(data_type: DataType, bytes: &[u8]) -> DecodedRun {
    match data_type {
        DataType::Int8 => DecodedRun::Int8(bytes.iter().map(|&b| b as i8).collect()),
        DataType::Int16 => DecodedRun::Int16(
            bytes
                .chunks_exact(2)
                .map(|c| i16::from_le_bytes([c[0], c[1]]))
                .collect(),
        ),
        DataType::Int32 => DecodedRun::Int32(
            bytes
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        DataType::Float => DecodedRun::Float(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        DataType::Double => DecodedRun::Double(
            bytes
                .chunks_exact(8)
                .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
        ),
    }
}

/// Default sink: log the first few elements of each run.
fn log_run(class: ClassId, run: DecodedRun, _timestamp: u32) {
    const SHOW: usize = 5;
    let total = run.len();
    let preview = match &run {
        DecodedRun::Int8(v) => format!("{:?}", &v[..v.len().min(SHOW)]),
        DecodedRun::Int16(v) => format!("{:?}", &v[..v.len().min(SHOW)]),
        DecodedRun::Int32(v) => format!("{:?}", &v[..v.len().min(SHOW)]),
        DecodedRun::Float(v) => format!("{:?}", &v[..v.len().min(SHOW)]),
        DecodedRun::Double(v) => format!("{:?}", &v[..v.len().min(SHOW)]),
    };
    if total > SHOW {
        info!("[{}] {} elements: {} ...", class.name(), total, preview);
    } else {
        info!("[{}] {} elements: {}", class.name(), total, preview);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_sanitation() {
        assert_eq!(sanitize_latency(1_000, 400), 600);
        assert_eq!(sanitize_latency(1_000, 2_000), 0); // sender ahead
        assert_eq!(sanitize_latency(60_000, 1_000), 0); // beyond plausible
    }

    #[test]
    fn decode_typed_runs() {
        let bytes = 7i32.to_le_bytes();
        assert_eq!(
            decode_run(DataType::Int32, &bytes),
            DecodedRun::Int32(vec![7])
        );
        let bytes = 2.5f64.to_le_bytes();
        assert_eq!(
            decode_run(DataType::Double, &bytes),
            DecodedRun::Double(vec![2.5])
        );
    }
}
