//! Instrument classes and playing instances.
//!
//! Instruments form a closed set of tagged variants: tonic kinds play
//! pitched scale degrees, drum kinds play the percussive symbols X/Y/Z.
//! Each variant carries a fixed reference-pitch table and a pitch
//! transform; the tables also drive the sample registry (one WAV per
//! reference pitch, see [`crate::samples`]).
//!
//! An [`Instrument`] is the per-session playing instance: one voice chained
//! through pan and volume controls, created fresh on play and disposed on
//! every exit path.

use crate::host::{AudioHost, Timbre, VoiceNode};
use crate::samples::SampleBank;
use std::fmt;
use std::sync::Arc;

/// Gain floor standing in for silence, in dB. Keeps the volume curve total
/// without resorting to -infinity.
pub const FLOOR_DB: f32 = -1000.0;

/// Semitone offset of the A4 reference within the engine's pitch space
/// (pitch 0 = degree 1 at octave 0, i.e. middle C).
pub const A4_PITCH: f64 = 9.0;

/// Convert an engine pitch (semitones above middle C) to Hz.
pub fn pitch_to_hz(pitch: f64) -> f64 {
    440.0 * 2f64.powf((pitch - A4_PITCH) / 12.0)
}

/// Convert a frequency in Hz to an engine pitch.
pub fn hz_to_pitch(hz: f64) -> f64 {
    A4_PITCH + 12.0 * (hz / 440.0).log2()
}

/// Map a linear energy fraction to the voice's gain control in dB.
///
/// `max(FLOOR_DB, 20*log10(f))`; zero and negative fractions hit the floor.
pub fn fraction_to_db(fraction: f64) -> f32 {
    if fraction <= 0.0 {
        return FLOOR_DB;
    }
    ((20.0 * fraction.log10()) as f32).max(FLOOR_DB)
}

/// A percussive note symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DrumSymbol {
    X,
    Y,
    Z,
}

impl DrumSymbol {
    /// Parse a symbol character (case-insensitive).
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'X' => Some(DrumSymbol::X),
            'Y' => Some(DrumSymbol::Y),
            'Z' => Some(DrumSymbol::Z),
            _ => None,
        }
    }

    /// The symbol character.
    pub fn as_char(&self) -> char {
        match self {
            DrumSymbol::X => 'X',
            DrumSymbol::Y => 'Y',
            DrumSymbol::Z => 'Z',
        }
    }
}

/// Pitched instrument kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TonicKind {
    Piano,
    MusicBox,
    Organ,
}

impl TonicKind {
    /// All tonic kinds, in UI order.
    pub const ALL: [TonicKind; 3] = [TonicKind::Piano, TonicKind::MusicBox, TonicKind::Organ];

    /// Stable name used in persisted control data.
    pub fn name(&self) -> &'static str {
        match self {
            TonicKind::Piano => "piano",
            TonicKind::MusicBox => "musicbox",
            TonicKind::Organ => "organ",
        }
    }

    /// Parse a persisted name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Base semitone offset the kind sounds at relative to written pitch.
    pub fn base_offset(&self) -> i32 {
        match self {
            TonicKind::MusicBox => 12,
            TonicKind::Piano | TonicKind::Organ => 0,
        }
    }

    /// Engine pitches the kind has reference samples for. Empty for
    /// synthesized kinds.
    pub fn sampled_pitches(&self) -> &'static [i32] {
        match self {
            TonicKind::Piano => &[-15, -3, 9, 21],
            TonicKind::MusicBox => &[9, 21],
            TonicKind::Organ => &[],
        }
    }

    /// Map a requested frequency to the nearest realizable voice pitch.
    ///
    /// Sample-based kinds snap to the nearest sampled reference note (a
    /// fixed mapping, not continuous pitch-shifting); synthesized kinds
    /// realize any pitch.
    pub fn transform_pitch(&self, hz: f64) -> f64 {
        let refs = self.sampled_pitches();
        if refs.is_empty() {
            return hz;
        }
        let pitch = hz_to_pitch(hz);
        let nearest = refs
            .iter()
            .copied()
            .min_by(|a, b| {
                let da = (*a as f64 - pitch).abs();
                let db = (*b as f64 - pitch).abs();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(0);
        pitch_to_hz(nearest as f64)
    }
}

/// Percussive instrument kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DrumKind {
    Snare,
    Beat1,
    Beat2,
}

impl DrumKind {
    /// All drum kinds, in UI order.
    pub const ALL: [DrumKind; 3] = [DrumKind::Snare, DrumKind::Beat1, DrumKind::Beat2];

    /// Stable name used in persisted control data.
    pub fn name(&self) -> &'static str {
        match self {
            DrumKind::Snare => "snare",
            DrumKind::Beat1 => "beat1",
            DrumKind::Beat2 => "beat2",
        }
    }

    /// Parse a persisted name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Fixed trigger pitch for a symbol.
    ///
    /// Kinds with fewer than three timbres fall back to the nearest
    /// defined one.
    pub fn trigger_pitch(&self, symbol: DrumSymbol) -> i32 {
        match self {
            DrumKind::Snare => match symbol {
                DrumSymbol::X => -10,
                DrumSymbol::Y => -5,
                DrumSymbol::Z => 0,
            },
            DrumKind::Beat1 => match symbol {
                DrumSymbol::X => -12,
                DrumSymbol::Y => -7,
                DrumSymbol::Z => -2,
            },
            // Two timbres only; Z shares the Y trigger.
            DrumKind::Beat2 => match symbol {
                DrumSymbol::X => -8,
                DrumSymbol::Y | DrumSymbol::Z => -3,
            },
        }
    }
}

/// Registry key: one sample cache per class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InstrumentClass {
    Tonic(TonicKind),
    Drum(DrumKind),
}

impl InstrumentClass {
    /// Directory name under the resource base the class loads from.
    pub fn dir_name(&self) -> &'static str {
        match self {
            InstrumentClass::Tonic(k) => k.name(),
            InstrumentClass::Drum(k) => k.name(),
        }
    }

    /// Reference samples of the class: (file stem, engine pitch).
    pub fn sample_refs(&self) -> &'static [(&'static str, i32)] {
        match self {
            InstrumentClass::Tonic(TonicKind::Piano) => {
                &[("a2", -15), ("a3", -3), ("a4", 9), ("a5", 21)]
            }
            InstrumentClass::Tonic(TonicKind::MusicBox) => &[("a4", 9), ("a5", 21)],
            InstrumentClass::Tonic(TonicKind::Organ) => &[],
            InstrumentClass::Drum(DrumKind::Snare) => &[("x", -10), ("y", -5), ("z", 0)],
            InstrumentClass::Drum(DrumKind::Beat1) => &[("x", -12), ("y", -7), ("z", -2)],
            InstrumentClass::Drum(DrumKind::Beat2) => &[("x", -8), ("y", -3)],
        }
    }
}

impl fmt::Display for InstrumentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// A live playing instance: voice -> pan -> volume.
///
/// Created per session, disposed at session end. Trigger failures are
/// caught and dropped here so a single missed note cannot abort playback.
pub struct Instrument {
    class: InstrumentClass,
    label: String,
    voice: Box<dyn VoiceNode>,
    disposed: bool,
}

impl Instrument {
    /// Create an instance of `class` backed by `bank`.
    pub fn create(
        host: &dyn AudioHost,
        class: InstrumentClass,
        bank: Arc<SampleBank>,
        label: &str,
    ) -> Self {
        let timbre = if bank.is_empty() {
            Timbre::Synth
        } else {
            Timbre::Sampled(bank)
        };
        Self {
            class,
            label: label.to_string(),
            voice: host.create_voice(timbre, label),
            disposed: false,
        }
    }

    /// The class this instance plays.
    pub fn class(&self) -> InstrumentClass {
        self.class
    }

    /// Set volume from a linear energy fraction (see [`fraction_to_db`]).
    pub fn set_volume(&mut self, fraction: f64) {
        if !self.disposed {
            self.voice.set_gain_db(fraction_to_db(fraction));
        }
    }

    /// Set pan, -1 to 1.
    pub fn set_pan(&mut self, pan: f64) {
        if !self.disposed {
            self.voice.set_pan(pan as f32);
        }
    }

    /// Schedule a pitched note at `at` (host-clock seconds).
    ///
    /// Only meaningful on tonic classes; the frequency is first mapped
    /// through the kind's pitch transform.
    pub fn schedule_tone(&mut self, frequency_hz: f64, at: f64, duration: f64) {
        let kind = match self.class {
            InstrumentClass::Tonic(k) => k,
            InstrumentClass::Drum(_) => {
                log::debug!("[{}] tone on drum voice ignored", self.label);
                return;
            }
        };
        if self.disposed {
            return;
        }
        let realizable = kind.transform_pitch(frequency_hz);
        if let Err(e) = self.voice.trigger(realizable, at, duration) {
            log::debug!("[{}] dropped tone trigger: {}", self.label, e);
        }
    }

    /// Schedule a percussive strike at `at` (host-clock seconds).
    pub fn schedule_strike(&mut self, symbol: DrumSymbol, at: f64, duration: f64) {
        let kind = match self.class {
            InstrumentClass::Drum(k) => k,
            InstrumentClass::Tonic(_) => {
                log::debug!("[{}] strike on tonic voice ignored", self.label);
                return;
            }
        };
        if self.disposed {
            return;
        }
        let hz = pitch_to_hz(kind.trigger_pitch(symbol) as f64);
        if let Err(e) = self.voice.trigger(hz, at, duration) {
            log::debug!("[{}] dropped strike trigger: {}", self.label, e);
        }
    }

    /// Disconnect the voice. Idempotent; also run on drop.
    pub fn dispose(&mut self) {
        if !self.disposed {
            self.voice.dispose();
            self.disposed = true;
        }
    }
}

impl Drop for Instrument {
    fn drop(&mut self) {
        self.dispose();
    }
}
