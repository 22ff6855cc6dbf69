//! Radio capability surface.
//!
//! The scheduler only needs three things from the radio: inject a raw frame,
//! read the current link quality, and set the transmit power. Keeping that
//! surface behind a trait lets every scheduler component run against a mock
//! that captures frames for assertions.

pub mod txpower;

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicI8, Ordering};
use std::sync::Arc;

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitError(pub &'static str);

impl fmt::Display for TransmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transmit failed: {}", self.0)
    }
}

/// Discrete transmit power levels, coarsest first. Raw values are the
/// radio's quarter-dBm units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerLevel {
    Min,
    Low,
    Medium,
    High,
}

impl PowerLevel {
    pub fn raw(self) -> i8 {
        match self {
            PowerLevel::Min => 8,
            PowerLevel::Low => 44,
            PowerLevel::Medium => 60,
            PowerLevel::High => 80,
        }
    }

    /// Closest level at or below a raw quarter-dBm setting.
    pub fn from_raw(raw: i8) -> PowerLevel {
        if raw >= PowerLevel::High.raw() {
            PowerLevel::High
        } else if raw >= PowerLevel::Medium.raw() {
            PowerLevel::Medium
        } else if raw >= PowerLevel::Low.raw() {
            PowerLevel::Low
        } else {
            PowerLevel::Min
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PowerLevel::Min => "MIN",
            PowerLevel::Low => "LOW",
            PowerLevel::Medium => "MEDIUM",
            PowerLevel::High => "HIGH",
        }
    }
}

/// Modem power-save mode, part of the radio settings surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsMode {
    None,
    MinModem,
    MaxModem,
}

impl PsMode {
    pub fn parse(name: &str) -> Option<PsMode> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Some(PsMode::None),
            "min" => Some(PsMode::MinModem),
            "max" => Some(PsMode::MaxModem),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PsMode::None => "none",
            PsMode::MinModem => "min",
            PsMode::MaxModem => "max",
        }
    }
}

/// 802.11 protocol bitmap selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    B,
    Bg,
    G,
    Bgn,
    Gn,
}

impl Protocol {
    pub fn parse(name: &str) -> Option<Protocol> {
        match name.to_ascii_lowercase().as_str() {
            "b" => Some(Protocol::B),
            "bg" => Some(Protocol::Bg),
            "g" => Some(Protocol::G),
            "bgn" => Some(Protocol::Bgn),
            "gn" => Some(Protocol::Gn),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Protocol::B => "b",
            Protocol::Bg => "bg",
            Protocol::G => "g",
            Protocol::Bgn => "bgn",
            Protocol::Gn => "gn",
        }
    }
}

/// Console-configurable radio parameters.
#[derive(Debug, Clone, Copy)]
pub struct RadioSettings {
    /// Raw transmit power in quarter dBm, 8..=84.
    pub tx_power: i8,
    pub ps_mode: PsMode,
    pub protocol: Protocol,
    pub auto_tx: bool,
    pub auto_tx_interval_ms: u64,
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self {
            tx_power: 80,
            ps_mode: PsMode::MinModem,
            protocol: Protocol::Bgn,
            auto_tx: true,
            auto_tx_interval_ms: 5_000,
        }
    }
}

pub trait Radio: Send + Sync {
    /// Hand one assembled frame to the radio for injection. May block; no
    /// scheduler lock is ever held across this call.
    fn send(&self, frame: &[u8]) -> Result<(), TransmitError>;

    /// Current link quality in dBm, if the radio can report it.
    fn query_rssi(&self) -> Option<i8>;

    fn set_power(&self, level: PowerLevel);
}

struct MockRadioInner {
    frames: Vec<Vec<u8>>,
    rssi_script: VecDeque<i8>,
    power_writes: Vec<PowerLevel>,
    fail_sends: bool,
}

/// Test radio: records every frame and power write, replays a scripted RSSI
/// sequence.
#[derive(Clone)]
pub struct MockRadio {
    inner: Arc<Mutex<MockRadioInner>>,
}

impl MockRadio {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockRadioInner {
                frames: Vec::new(),
                rssi_script: VecDeque::new(),
                power_writes: Vec::new(),
                fail_sends: false,
            })),
        }
    }

    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.inner.lock().frames.clone()
    }

    pub fn script_rssi(&self, samples: &[i8]) {
        self.inner.lock().rssi_script.extend(samples);
    }

    pub fn power_writes(&self) -> Vec<PowerLevel> {
        self.inner.lock().power_writes.clone()
    }

    pub fn set_send_failure(&self, fail: bool) {
        self.inner.lock().fail_sends = fail;
    }
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl Radio for MockRadio {
    fn send(&self, frame: &[u8]) -> Result<(), TransmitError> {
        let mut inner = self.inner.lock();
        if inner.fail_sends {
            return Err(TransmitError("mock failure"));
        }
        inner.frames.push(frame.to_vec());
        Ok(())
    }

    fn query_rssi(&self) -> Option<i8> {
        self.inner.lock().rssi_script.pop_front()
    }

    fn set_power(&self, level: PowerLevel) {
        self.inner.lock().power_writes.push(level);
    }
}

/// In-process radio delivering frames over a channel to a receive pipeline,
/// used by the simulation binary to wire station and AP sides together.
pub struct LoopbackRadio {
    tx: Sender<Vec<u8>>,
    rssi: AtomicI8,
}

impl LoopbackRadio {
    pub fn channel(capacity: usize) -> (Arc<LoopbackRadio>, Receiver<Vec<u8>>) {
        let (tx, rx) = bounded(capacity);
        (
            Arc::new(LoopbackRadio {
                tx,
                rssi: AtomicI8::new(-30),
            }),
            rx,
        )
    }

    pub fn set_rssi(&self, rssi: i8) {
        self.rssi.store(rssi, Ordering::Relaxed);
    }
}

impl Radio for LoopbackRadio {
    fn send(&self, frame: &[u8]) -> Result<(), TransmitError> {
        match self.tx.try_send(frame.to_vec()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(TransmitError("loopback channel full")),
            Err(TrySendError::Disconnected(_)) => Err(TransmitError("receiver gone")),
        }
    }

    fn query_rssi(&self) -> Option<i8> {
        Some(self.rssi.load(Ordering::Relaxed))
    }

    fn set_power(&self, _level: PowerLevel) {}
}
