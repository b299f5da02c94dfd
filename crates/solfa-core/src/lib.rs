//! solfa-core - playback scheduling and mixing engine for sequenced
//! solfa scores.
//!
//! The crate turns an already-parsed, already-sequenced score into
//! precisely timed audio-trigger calls:
//!
//! - **Score** - the read-only data model produced by the external
//!   parser/sequencer (articles, iterations, sections, notes, part
//!   signatures)
//! - **Controls** - the per-part mixing store (volume/pan/mute/solo,
//!   instrument choice, octave/modulo), reconciled across re-sequencing
//!   and persisted as compact JSON lines
//! - **Schedule** - pure per-section event planning (metronome grid,
//!   note triggers, highlights, the chain point)
//! - **Engine** - the cooperative playback state machine: readiness
//!   gates, token cancellation, section chaining, live mixing updates
//!
//! # Architecture
//!
//! The engine is single-threaded and callback-driven. Calls like
//! [`PlaybackEngine::play`] return immediately; the host pumps
//! [`PlaybackEngine::tick`] and the state machine advances through
//! scheduled events on the audio host's monotonic clock. UI
//! notifications flow through a [`crossbeam_channel`] subscription.

pub mod controls;
pub mod engine;
pub mod schedule;
pub mod score;

pub use controls::{
    ControlData, ControlEntry, ControlKind, MixControl, BEAT_MODULO_RANGE, OCTAVE_RANGE,
    PAN_RANGE, VOLUME_RANGE,
};
pub use engine::{
    EngineEvent, PlaybackEngine, PlaybackError, PlaybackState, SectionLocator, PITCH_RANGE,
    SPEED_RANGE,
};
pub use schedule::{plan_section, AudioTrigger, PlanParams, SectionPlan, TimedEvent, TriggerVoice};
pub use score::{
    Iteration, Meter, Note, NoteGlyph, PartSection, PartSignature, Rational, SequenceArticle,
    SequenceSection, BEAT_MACHINE_LABEL, DEGREE_SEMITONES,
};

// Re-export the audio layer so hosts need a single dependency.
pub use solfa_audio as audio;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reexports_compose() {
        let section = SequenceSection::new(0, 120.0, Meter::default(), Rational::whole(4));
        let article = SequenceArticle::new(
            vec![Iteration::new(vec![section])],
            std::collections::HashMap::new(),
        );
        let controls = ControlData::reconcile(&article, &ControlData::default());
        assert_eq!(controls.len(), 1); // the beat machine alone
        assert!(controls
            .get(PartSignature::beat_machine().hash())
            .is_some());
    }
}
