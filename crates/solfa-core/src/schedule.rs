//! Per-section event planning.
//!
//! [`plan_section`] turns one section into the events the engine places
//! for it: audio triggers (clicks, tones, strikes) with millisecond
//! offsets from the section start, and timed visual/logic events
//! (highlights, the end-of-section chain point) for the clock timer.
//! Planning is pure; everything observable about a section's timing is
//! unit-tested here.

use crate::controls::{ControlData, ControlKind};
use crate::score::{NoteGlyph, SequenceArticle, SequenceSection};
use solfa_audio::{pitch_to_hz, DrumSymbol};

/// Events routed through the clock timer.
#[derive(Clone, Debug, PartialEq)]
pub enum TimedEvent {
    /// Light up a note on the visual surface.
    HighlightOn { uuid: String },
    /// Clear one note's highlight.
    HighlightOff { uuid: String },
    /// The precount bar finished; real playback of the section begins.
    PrecountEnd,
    /// The section finished; advance to the next one.
    SectionEnd,
}

impl TimedEvent {
    /// Visual events are scheduled with look-ahead compensation.
    pub fn is_visual(&self) -> bool {
        matches!(
            self,
            TimedEvent::HighlightOn { .. } | TimedEvent::HighlightOff { .. }
        )
    }
}

/// An audio trigger placed directly on an instrument at schedule time.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioTrigger {
    /// Offset from section start in milliseconds (speed-adjusted).
    pub offset_ms: f64,
    /// Sounding length in milliseconds (speed-adjusted).
    pub duration_ms: f64,
    pub voice: TriggerVoice,
}

/// Which voice a trigger drives.
#[derive(Clone, Debug, PartialEq)]
pub enum TriggerVoice {
    /// Metronome click (beat machine drum voice).
    Click,
    /// Pitched note on a part's tonic voice.
    Tone { part: String, frequency_hz: f64 },
    /// Percussive note on a part's drum voice.
    Strike { part: String, symbol: DrumSymbol },
}

/// Everything one scheduling pass places for a section.
#[derive(Debug, Default)]
pub struct SectionPlan {
    pub triggers: Vec<AudioTrigger>,
    /// (offset_ms, event), offsets speed-adjusted.
    pub timed: Vec<(f64, TimedEvent)>,
    /// Speed-adjusted section length; the chain point sits here.
    pub length_ms: f64,
}

/// Inputs of a planning pass, snapshotted at schedule time.
pub struct PlanParams<'a> {
    pub controls: &'a ControlData,
    pub speed_modifier: f64,
    /// Global pitch shift in semitones.
    pub pitch_modifier: f64,
    /// Precount pass: clicks only, beat machine audible.
    pub precount: bool,
}

/// Plan one section.
pub fn plan_section(
    section: &SequenceSection,
    article: &SequenceArticle,
    params: &PlanParams<'_>,
) -> SectionPlan {
    let mut plan = SectionPlan::default();
    let speed = params.speed_modifier;
    let quarter_ms = section.quarter_ms();

    plan_clicks(section, params, quarter_ms, &mut plan);

    if !params.precount {
        // Deterministic part order keeps event order stable.
        let mut part_ids: Vec<&String> = section.parts.keys().collect();
        part_ids.sort();
        for part_id in part_ids {
            plan_part(section, article, params, part_id, quarter_ms, &mut plan);
        }
    }

    plan.length_ms = section.length_quarters.to_f64() * quarter_ms / speed;
    let end = if params.precount {
        TimedEvent::PrecountEnd
    } else {
        TimedEvent::SectionEnd
    };
    plan.timed.push((plan.length_ms, end));
    plan
}

fn plan_clicks(
    section: &SequenceSection,
    params: &PlanParams<'_>,
    quarter_ms: f64,
    plan: &mut SectionPlan,
) {
    let meter = section.beats;
    let beat_ms = quarter_ms * 4.0 / meter.denominator as f64;
    // Bound clicks to the section's actual length so irregular or
    // free-meter sections never over-click.
    let max_beat_points =
        (section.length_quarters.to_f64() * meter.denominator as f64 / 4.0).floor() as u32;
    let count = if meter.numerator > 0 {
        meter.numerator.min(max_beat_points)
    } else {
        max_beat_points
    };

    let beat_modulo = beat_modulo_snapshot(params.controls);
    for i in 0..count {
        // Click filtering applies in compound meters only; a modulo of
        // zero passes no click at all.
        if meter.denominator > 4 && (beat_modulo == 0 || i % beat_modulo != 0) {
            continue;
        }
        plan.triggers.push(AudioTrigger {
            offset_ms: i as f64 * beat_ms / params.speed_modifier,
            duration_ms: beat_ms / params.speed_modifier,
            voice: TriggerVoice::Click,
        });
    }
}

fn beat_modulo_snapshot(controls: &ControlData) -> u32 {
    match controls.get(crate::score::PartSignature::beat_machine().hash()) {
        Some(entry) => match entry.control.kind {
            ControlKind::BeatMachine { beat_modulo, .. } => beat_modulo,
            ControlKind::Part { .. } => 1,
        },
        None => 1,
    }
}

fn plan_part(
    section: &SequenceSection,
    article: &SequenceArticle,
    params: &PlanParams<'_>,
    part_id: &str,
    quarter_ms: f64,
    plan: &mut SectionPlan,
) {
    let speed = params.speed_modifier;
    let control = article
        .signature_for(part_id)
        .and_then(|sig| params.controls.get(sig.hash()))
        .map(|entry| &entry.control);
    let octave_control = control.map(|c| c.octave()).unwrap_or(0);
    let base_offset = control
        .and_then(|c| c.tonic())
        .map(|tonic| tonic.base_offset())
        .unwrap_or(0);

    for note in section.parts[part_id].notes() {
        let start_ms = note.start.to_f64() * quarter_ms / speed;
        let duration_ms = note.length.to_f64() * quarter_ms / speed;
        // Voided notes keep their timing and highlight.
        plan.timed.push((
            start_ms,
            TimedEvent::HighlightOn {
                uuid: note.uuid.clone(),
            },
        ));
        plan.timed.push((
            start_ms + duration_ms,
            TimedEvent::HighlightOff {
                uuid: note.uuid.clone(),
            },
        ));
        if note.voided {
            continue;
        }
        match note.glyph {
            Some(NoteGlyph::Degree(_)) => {
                let semitone = note.glyph.and_then(|g| g.semitone()).unwrap_or(0);
                let pitch = params.pitch_modifier
                    + octave_control as f64 * 12.0
                    + semitone as f64
                    + note.octave as f64 * 12.0
                    + note.accidental as f64
                    + base_offset as f64;
                plan.triggers.push(AudioTrigger {
                    offset_ms: start_ms,
                    duration_ms,
                    voice: TriggerVoice::Tone {
                        part: part_id.to_string(),
                        frequency_hz: pitch_to_hz(pitch),
                    },
                });
            }
            Some(NoteGlyph::Strike(symbol)) => {
                plan.triggers.push(AudioTrigger {
                    offset_ms: start_ms,
                    duration_ms,
                    voice: TriggerVoice::Strike {
                        part: part_id.to_string(),
                        symbol,
                    },
                });
            }
            None => {}
        }
    }
}
