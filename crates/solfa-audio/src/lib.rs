//! solfa-audio - audio host abstraction and instrument voices for the
//! solfa playback engine.
//!
//! This crate provides the audio-facing building blocks:
//!
//! - **Host** - the [`AudioHost`] trait (monotonic clock + voice graph),
//!   with a discard-everything [`NullHost`] and a deterministic
//!   [`ManualHost`] for tests
//! - **Clock timer** - one-shot typed-event scheduling over the host
//!   clock, with bulk cancellation via dispose
//! - **Instruments** - the closed set of tonic and drum instrument kinds,
//!   their pitch transforms, and per-session playing instances
//! - **Samples** - the process-wide, load-once registry of decoded
//!   reference sample banks
//!
//! The playback state machine that drives all of this lives in
//! `solfa-core`.

pub mod clock;
pub mod error;
pub mod host;
pub mod instrument;
pub mod samples;

pub use clock::{ClockTimer, Fired};
pub use error::AudioError;
pub use host::{AudioHost, CaptureLog, ManualHost, NullHost, Timbre, TriggerRecord, VoiceNode, VoiceRecord};
pub use instrument::{
    fraction_to_db, hz_to_pitch, pitch_to_hz, DrumKind, DrumSymbol, Instrument, InstrumentClass,
    TonicKind, FLOOR_DB,
};
pub use samples::{ensure_loaded, is_loaded, LoadState, SampleBank, SampleData, RETRY_BACKOFF};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degree_one_reference_is_middle_c() {
        // Engine pitch 0 (degree 1, octave 0) sits nine semitones below A4.
        let hz = pitch_to_hz(0.0);
        assert!((hz - 261.625).abs() < 0.01);
    }

    #[test]
    fn test_floor_db_stands_in_for_silence() {
        assert_eq!(fraction_to_db(0.0), FLOOR_DB);
        assert!(fraction_to_db(1e-40) >= FLOOR_DB);
    }
}
