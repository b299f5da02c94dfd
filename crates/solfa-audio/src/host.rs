//! Audio host abstraction.
//!
//! The playback engine never talks to an audio device directly. It drives an
//! [`AudioHost`], which bundles the host's monotonic clock with a small voice
//! graph: each [`VoiceNode`] is a sound source chained through a pan control
//! and a volume control. Two hosts ship with the crate:
//!
//! - [`NullHost`] - real clock, discards all audio (headless operation)
//! - [`ManualHost`] - hand-advanced clock that records every trigger and
//!   control change, used to drive the engine deterministically in tests

use crate::error::AudioError;
use crate::samples::SampleBank;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

/// Sound source of a voice.
#[derive(Clone)]
pub enum Timbre {
    /// Playback of decoded sample data, resampled to the trigger pitch.
    Sampled(Arc<SampleBank>),
    /// Plain synthesized tone (continuous pitch).
    Synth,
}

/// A playing voice: source -> pan -> volume, owned by one instrument
/// instance for the lifetime of one playback session.
///
/// Disposal disconnects the chain. After [`VoiceNode::dispose`] every other
/// call is a no-op or an error; the owning instrument guarantees it never
/// triggers a disposed voice.
pub trait VoiceNode {
    /// Set the volume control, in dB.
    fn set_gain_db(&mut self, db: f32);

    /// Set the pan control, -1 (left) to 1 (right).
    fn set_pan(&mut self, pan: f32);

    /// Arrange for the voice to sound at `at` (host-clock seconds) for
    /// `duration` seconds.
    fn trigger(&mut self, frequency_hz: f64, at: f64, duration: f64) -> Result<(), AudioError>;

    /// Disconnect the voice from the graph.
    fn dispose(&mut self);
}

/// The host audio context: monotonic clock plus voice factory.
pub trait AudioHost {
    /// Current host-clock time in seconds. Monotonic.
    fn now(&self) -> f64;

    /// Output latency of the host in seconds (0 when unknown).
    fn output_latency(&self) -> f64;

    /// Whether the host is ready to produce sound. Hosts that need an
    /// asynchronous startup report false until startup completes.
    fn is_ready(&self) -> bool;

    /// Create a fresh voice. `label` identifies the voice in logs and
    /// capture records.
    fn create_voice(&self, timbre: Timbre, label: &str) -> Box<dyn VoiceNode>;
}

/// Host with a real clock that discards all audio.
pub struct NullHost {
    start: Instant,
}

impl NullHost {
    /// Create a null host. Ready immediately.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for NullHost {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioHost for NullHost {
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    fn output_latency(&self) -> f64 {
        0.0
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn create_voice(&self, _timbre: Timbre, _label: &str) -> Box<dyn VoiceNode> {
        Box::new(NullVoice)
    }
}

struct NullVoice;

impl VoiceNode for NullVoice {
    fn set_gain_db(&mut self, _db: f32) {}
    fn set_pan(&mut self, _pan: f32) {}
    fn trigger(&mut self, _frequency_hz: f64, _at: f64, _duration: f64) -> Result<(), AudioError> {
        Ok(())
    }
    fn dispose(&mut self) {}
}

/// One recorded trigger call.
#[derive(Clone, Debug)]
pub struct TriggerRecord {
    /// Label of the voice that was triggered.
    pub label: String,
    /// Frequency passed to the voice, in Hz.
    pub frequency_hz: f64,
    /// Absolute host-clock instant the sound was scheduled for.
    pub at: f64,
    /// Duration in seconds.
    pub duration: f64,
}

/// Last observed control state of one capture voice.
#[derive(Clone, Debug)]
pub struct VoiceRecord {
    /// Label the voice was created with.
    pub label: String,
    /// Last gain value set, in dB.
    pub gain_db: f32,
    /// Last pan value set.
    pub pan: f32,
    /// Whether the voice has been disposed.
    pub disposed: bool,
}

/// Everything a [`ManualHost`] observed.
#[derive(Default)]
pub struct CaptureLog {
    /// All trigger calls, in call order.
    pub triggers: Vec<TriggerRecord>,
    /// One record per created voice, in creation order.
    pub voices: Vec<VoiceRecord>,
}

impl CaptureLog {
    /// Records of voices matching `label`.
    pub fn voices_labeled(&self, label: &str) -> Vec<VoiceRecord> {
        self.voices
            .iter()
            .filter(|v| v.label == label)
            .cloned()
            .collect()
    }

    /// Trigger records for voices matching `label`.
    pub fn triggers_labeled(&self, label: &str) -> Vec<TriggerRecord> {
        self.triggers
            .iter()
            .filter(|t| t.label == label)
            .cloned()
            .collect()
    }
}

/// Hand-driven host for deterministic tests.
///
/// Time only advances when the test says so, readiness is settable (to
/// exercise the engine's readiness gate), and every voice records its
/// triggers and control changes into a shared [`CaptureLog`].
pub struct ManualHost {
    now: Cell<f64>,
    ready: Cell<bool>,
    latency: Cell<f64>,
    log: Rc<RefCell<CaptureLog>>,
}

impl ManualHost {
    /// Create a manual host at t=0, ready, zero latency.
    pub fn new() -> Self {
        Self {
            now: Cell::new(0.0),
            ready: Cell::new(true),
            latency: Cell::new(0.0),
            log: Rc::new(RefCell::new(CaptureLog::default())),
        }
    }

    /// Advance the clock by `seconds`.
    pub fn advance(&self, seconds: f64) {
        self.now.set(self.now.get() + seconds);
    }

    /// Set readiness.
    pub fn set_ready(&self, ready: bool) {
        self.ready.set(ready);
    }

    /// Set the reported output latency in seconds.
    pub fn set_latency(&self, seconds: f64) {
        self.latency.set(seconds);
    }

    /// Shared handle to the capture log.
    pub fn log(&self) -> Rc<RefCell<CaptureLog>> {
        Rc::clone(&self.log)
    }
}

impl Default for ManualHost {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioHost for ManualHost {
    fn now(&self) -> f64 {
        self.now.get()
    }

    fn output_latency(&self) -> f64 {
        self.latency.get()
    }

    fn is_ready(&self) -> bool {
        self.ready.get()
    }

    fn create_voice(&self, _timbre: Timbre, label: &str) -> Box<dyn VoiceNode> {
        let mut log = self.log.borrow_mut();
        let index = log.voices.len();
        log.voices.push(VoiceRecord {
            label: label.to_string(),
            gain_db: 0.0,
            pan: 0.0,
            disposed: false,
        });
        Box::new(CaptureVoice {
            index,
            label: label.to_string(),
            log: Rc::clone(&self.log),
            disposed: false,
        })
    }
}

struct CaptureVoice {
    index: usize,
    label: String,
    log: Rc<RefCell<CaptureLog>>,
    disposed: bool,
}

impl VoiceNode for CaptureVoice {
    fn set_gain_db(&mut self, db: f32) {
        self.log.borrow_mut().voices[self.index].gain_db = db;
    }

    fn set_pan(&mut self, pan: f32) {
        self.log.borrow_mut().voices[self.index].pan = pan;
    }

    fn trigger(&mut self, frequency_hz: f64, at: f64, duration: f64) -> Result<(), AudioError> {
        if self.disposed {
            return Err(AudioError::VoiceUnavailable(self.label.clone()));
        }
        self.log.borrow_mut().triggers.push(TriggerRecord {
            label: self.label.clone(),
            frequency_hz,
            at,
            duration,
        });
        Ok(())
    }

    fn dispose(&mut self) {
        self.disposed = true;
        self.log.borrow_mut().voices[self.index].disposed = true;
    }
}
