//! Per-part mixing control store.
//!
//! [`ControlData`] maps a part's signature hash to its live mixing
//! configuration. The store is reconciled against every freshly sequenced
//! score so user edits survive re-sequencing for parts whose identity is
//! unchanged, and it serializes to one compact JSON line per part for
//! embedding in the source document by an external writer.

use crate::score::{PartSignature, SequenceArticle};
use serde::{Deserialize, Serialize};
use solfa_audio::{DrumKind, InstrumentClass, TonicKind};
use std::collections::HashMap;

/// Valid volume range.
pub const VOLUME_RANGE: (f64, f64) = (0.0, 150.0);
/// Valid pan range.
pub const PAN_RANGE: (f64, f64) = (-1.0, 1.0);
/// Valid octave-control range.
pub const OCTAVE_RANGE: (i8, i8) = (-6, 6);
/// Valid beat-modulo range.
pub const BEAT_MODULO_RANGE: (u32, u32) = (0, 18);

/// Variant-specific control fields.
#[derive(Clone, Debug, PartialEq)]
pub enum ControlKind {
    /// A notated part.
    Part {
        /// Octave shift applied to every pitched note of the part.
        octave: i8,
        /// Instrument for pitched notes.
        tonic: TonicKind,
        /// Instrument for percussive notes.
        drum: DrumKind,
    },
    /// The synthetic metronome part.
    BeatMachine {
        /// Click instrument.
        drum: DrumKind,
        /// Keep every beat-modulo-th click in compound meters
        /// (0 passes no click at all).
        beat_modulo: u32,
    },
}

/// Live mixing configuration of one part.
#[derive(Clone, Debug, PartialEq)]
pub struct MixControl {
    pub mute: bool,
    pub solo: bool,
    /// Volume, 0-150 (100 = unity).
    pub volume: f64,
    /// Pan, -1 to 1.
    pub pan: f64,
    pub kind: ControlKind,
}

impl MixControl {
    /// Default configuration for a notated part.
    pub fn default_part() -> Self {
        Self {
            mute: false,
            solo: false,
            volume: 100.0,
            pan: 0.0,
            kind: ControlKind::Part {
                octave: 0,
                tonic: TonicKind::Piano,
                drum: DrumKind::Snare,
            },
        }
    }

    /// Default configuration for the beat machine.
    pub fn default_beat_machine() -> Self {
        Self {
            mute: false,
            solo: false,
            volume: 100.0,
            pan: 0.0,
            kind: ControlKind::BeatMachine {
                drum: DrumKind::Beat2,
                beat_modulo: 1,
            },
        }
    }

    /// Volume as a linear energy fraction (unity at 100).
    pub fn volume_fraction(&self) -> f64 {
        self.volume / 100.0
    }

    /// Octave control for pitched notes (0 on the beat machine).
    pub fn octave(&self) -> i8 {
        match self.kind {
            ControlKind::Part { octave, .. } => octave,
            ControlKind::BeatMachine { .. } => 0,
        }
    }

    /// The tonic instrument, if the variant has one.
    pub fn tonic(&self) -> Option<TonicKind> {
        match self.kind {
            ControlKind::Part { tonic, .. } => Some(tonic),
            ControlKind::BeatMachine { .. } => None,
        }
    }

    /// The drumline instrument of either variant.
    pub fn drum(&self) -> DrumKind {
        match self.kind {
            ControlKind::Part { drum, .. } | ControlKind::BeatMachine { drum, .. } => drum,
        }
    }

    /// Clamp every numeric field to its documented range.
    pub fn clamp(&mut self) {
        self.volume = self.volume.clamp(VOLUME_RANGE.0, VOLUME_RANGE.1);
        self.pan = self.pan.clamp(PAN_RANGE.0, PAN_RANGE.1);
        match &mut self.kind {
            ControlKind::Part { octave, .. } => {
                *octave = (*octave).clamp(OCTAVE_RANGE.0, OCTAVE_RANGE.1);
            }
            ControlKind::BeatMachine { beat_modulo, .. } => {
                *beat_modulo = (*beat_modulo).clamp(BEAT_MODULO_RANGE.0, BEAT_MODULO_RANGE.1);
            }
        }
    }
}

/// A stored control plus the signature it currently belongs to.
#[derive(Clone, Debug, PartialEq)]
pub struct ControlEntry {
    pub control: MixControl,
    pub signature: PartSignature,
}

/// The control store: one entry per distinct signature hash in the
/// current score, plus always one for the beat machine.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ControlData {
    entries: HashMap<u64, ControlEntry>,
}

/// Persisted line record (abbreviated field names).
#[derive(Serialize, Deserialize)]
struct LineRecord {
    id: u64,
    c: LineControl,
}

#[derive(Serialize, Deserialize)]
struct LineControl {
    m: bool,
    s: bool,
    p: f64,
    v: f64,
    nx: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    o: Option<i8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bm: Option<u32>,
}

impl ControlData {
    /// Entry for a signature hash.
    pub fn get(&self, hash: u64) -> Option<&ControlEntry> {
        self.entries.get(&hash)
    }

    /// Mutable entry for a signature hash.
    pub fn get_mut(&mut self, hash: u64) -> Option<&mut ControlEntry> {
        self.entries.get_mut(&hash)
    }

    /// All entries, unordered.
    pub fn entries(&self) -> impl Iterator<Item = &ControlEntry> {
        self.entries.values()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any part is soloed.
    pub fn any_solo(&self) -> bool {
        self.entries.values().any(|e| e.control.solo)
    }

    /// Every distinct instrument class referenced by the store.
    pub fn instrument_classes(&self) -> Vec<InstrumentClass> {
        let mut classes = Vec::new();
        for entry in self.entries.values() {
            let mut push = |class: InstrumentClass| {
                if !classes.contains(&class) {
                    classes.push(class);
                }
            };
            if let Some(tonic) = entry.control.tonic() {
                push(InstrumentClass::Tonic(tonic));
            }
            push(InstrumentClass::Drum(entry.control.drum()));
        }
        classes
    }

    /// Rebuild the store against a freshly sequenced score.
    ///
    /// Pure in its two inputs: known hashes keep their stored control
    /// (with the signature refreshed so relabeling tracks renamed parts),
    /// unknown hashes get defaults, hashes no longer present are dropped.
    /// The beat machine is always included.
    pub fn reconcile(article: &SequenceArticle, previous: &ControlData) -> ControlData {
        let mut entries = HashMap::new();
        let beat_machine = PartSignature::beat_machine();
        let signatures = article
            .signatures()
            .values()
            .chain(std::iter::once(&beat_machine));
        for signature in signatures {
            let control = match previous.get(signature.hash()) {
                Some(existing) => existing.control.clone(),
                None if signature.is_beat_machine() => MixControl::default_beat_machine(),
                None => MixControl::default_part(),
            };
            entries.insert(
                signature.hash(),
                ControlEntry {
                    control,
                    signature: signature.clone(),
                },
            );
        }
        ControlData { entries }
    }

    /// Serialize to ordered compact line records, one JSON object per
    /// part.
    pub fn dehydrate(&self) -> Vec<String> {
        let mut entries: Vec<&ControlEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| {
            (a.signature.label(), a.signature.hash())
                .cmp(&(b.signature.label(), b.signature.hash()))
        });
        entries
            .iter()
            .map(|entry| {
                let c = &entry.control;
                let line = LineRecord {
                    id: entry.signature.hash(),
                    c: match c.kind {
                        ControlKind::Part { octave, tonic, drum } => LineControl {
                            m: c.mute,
                            s: c.solo,
                            p: c.pan,
                            v: c.volume,
                            nx: drum.name().to_string(),
                            nn: Some(tonic.name().to_string()),
                            o: Some(octave),
                            bm: None,
                        },
                        ControlKind::BeatMachine { drum, beat_modulo } => LineControl {
                            m: c.mute,
                            s: c.solo,
                            p: c.pan,
                            v: c.volume,
                            nx: drum.name().to_string(),
                            nn: None,
                            o: None,
                            bm: Some(beat_modulo),
                        },
                    },
                };
                // LineRecord contains no map with non-string keys, so
                // serialization cannot fail.
                serde_json::to_string(&line).unwrap_or_default()
            })
            .collect()
    }

    /// Restore persisted lines into a copy of `current`.
    ///
    /// Defensive: malformed lines are skipped with a warning, numeric
    /// fields are clamped, unknown instrument names are ignored, and only
    /// hashes present in `current` are overwritten - reviving never
    /// introduces parts the current score does not have, and never
    /// changes an entry's variant shape.
    pub fn revive(current: &ControlData, lines: &[String]) -> ControlData {
        let mut revived = current.clone();
        for line in lines {
            let record: LineRecord = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(e) => {
                    log::warn!("skipping malformed control line: {e}");
                    continue;
                }
            };
            let Some(entry) = revived.entries.get_mut(&record.id) else {
                continue;
            };
            let c = &record.c;
            entry.control.mute = c.m;
            entry.control.solo = c.s;
            entry.control.pan = c.p;
            entry.control.volume = c.v;
            let drum = c.nx.as_str();
            match &mut entry.control.kind {
                ControlKind::Part { octave, tonic, drum: part_drum } => {
                    if let Some(name) = &c.nn {
                        match TonicKind::from_name(name) {
                            Some(kind) => *tonic = kind,
                            None => log::warn!("unknown tonic instrument '{name}'"),
                        }
                    }
                    match DrumKind::from_name(drum) {
                        Some(kind) => *part_drum = kind,
                        None => log::warn!("unknown drumline instrument '{drum}'"),
                    }
                    if let Some(o) = c.o {
                        *octave = o;
                    }
                }
                ControlKind::BeatMachine { drum: bm_drum, beat_modulo } => {
                    match DrumKind::from_name(drum) {
                        Some(kind) => *bm_drum = kind,
                        None => log::warn!("unknown drumline instrument '{drum}'"),
                    }
                    if let Some(bm) = c.bm {
                        *beat_modulo = bm;
                    }
                }
            }
            entry.control.clamp();
        }
        revived
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::{Iteration, Meter, Rational, SequenceSection};

    fn article(part_titles: &[&str]) -> SequenceArticle {
        let mut signatures = HashMap::new();
        for title in part_titles {
            signatures.insert(title.to_string(), PartSignature::from_title(title));
        }
        let section = SequenceSection::new(0, 120.0, Meter::default(), Rational::whole(4));
        SequenceArticle::new(vec![Iteration::new(vec![section])], signatures)
    }

    #[test]
    fn test_reconcile_synthesizes_defaults() {
        let data = ControlData::reconcile(&article(&["Melody"]), &ControlData::default());
        // One part plus the beat machine.
        assert_eq!(data.len(), 2);

        let hash = PartSignature::from_title("Melody").hash();
        let entry = data.get(hash).unwrap();
        assert_eq!(entry.control, MixControl::default_part());

        let bm = data.get(PartSignature::beat_machine().hash()).unwrap();
        assert_eq!(bm.control, MixControl::default_beat_machine());
    }

    #[test]
    fn test_reconcile_preserves_known_parts_and_drops_stale() {
        let first = ControlData::reconcile(&article(&["Melody", "Bass"]), &ControlData::default());
        let mut edited = first.clone();
        let hash = PartSignature::from_title("Melody").hash();
        edited.get_mut(hash).unwrap().control.volume = 42.0;

        let second = ControlData::reconcile(&article(&["Melody"]), &edited);
        assert!((second.get(hash).unwrap().control.volume - 42.0).abs() < 1e-9);
        assert!(second
            .get(PartSignature::from_title("Bass").hash())
            .is_none());
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let score = article(&["Melody", "Bass"]);
        let mut prev = ControlData::reconcile(&score, &ControlData::default());
        prev.get_mut(PartSignature::from_title("Bass").hash())
            .unwrap()
            .control
            .solo = true;
        let once = ControlData::reconcile(&score, &prev);
        let twice = ControlData::reconcile(&score, &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_dehydrate_revive_roundtrip() {
        let mut data = ControlData::reconcile(&article(&["Melody", "Bass"]), &ControlData::default());
        let hash = PartSignature::from_title("Melody").hash();
        {
            let control = &mut data.get_mut(hash).unwrap().control;
            control.mute = false;
            control.solo = true;
            control.volume = 80.0;
            control.pan = -0.5;
            control.kind = ControlKind::Part {
                octave: 2,
                tonic: TonicKind::Piano,
                drum: DrumKind::Snare,
            };
        }
        let bm_hash = PartSignature::beat_machine().hash();
        {
            let control = &mut data.get_mut(bm_hash).unwrap().control;
            control.kind = ControlKind::BeatMachine {
                drum: DrumKind::Beat1,
                beat_modulo: 3,
            };
        }

        let lines = data.dehydrate();
        assert_eq!(lines.len(), 3);
        // Ordered by label: Bass < Melody < beat machine.
        assert!(lines[0].contains(&format!(
            "\"id\":{}",
            PartSignature::from_title("Bass").hash()
        )));

        let revived = ControlData::revive(&data, &lines);
        assert_eq!(revived, data);
    }

    #[test]
    fn test_revive_clamps_out_of_range_values() {
        let data = ControlData::reconcile(&article(&["Melody"]), &ControlData::default());
        let hash = PartSignature::from_title("Melody").hash();
        let line = format!(
            "{{\"id\":{hash},\"c\":{{\"m\":false,\"s\":false,\"p\":-7.5,\"v\":9000,\"nx\":\"snare\",\"nn\":\"piano\",\"o\":99}}}}"
        );
        let revived = ControlData::revive(&data, &[line]);
        let control = &revived.get(hash).unwrap().control;
        assert!((control.volume - 150.0).abs() < 1e-9);
        assert!((control.pan + 1.0).abs() < 1e-9);
        assert_eq!(control.octave(), 6);
    }

    #[test]
    fn test_revive_skips_malformed_and_unknown() {
        let data = ControlData::reconcile(&article(&["Melody"]), &ControlData::default());
        let stranger = PartSignature::from_title("Stranger").hash();
        let lines = vec![
            "not json at all".to_string(),
            "{\"id\":1}".to_string(),
            format!(
                "{{\"id\":{stranger},\"c\":{{\"m\":true,\"s\":false,\"p\":0,\"v\":10,\"nx\":\"snare\"}}}}"
            ),
        ];
        let revived = ControlData::revive(&data, &lines);
        // Nothing changed, nothing introduced.
        assert_eq!(revived, data);
    }

    #[test]
    fn test_revive_keeps_variant_shape_and_known_instruments() {
        let data = ControlData::reconcile(&article(&["Melody"]), &ControlData::default());
        let hash = PartSignature::from_title("Melody").hash();
        // Unknown instrument names are ignored; the entry stays a Part.
        let line = format!(
            "{{\"id\":{hash},\"c\":{{\"m\":true,\"s\":false,\"p\":0.25,\"v\":60,\"nx\":\"kazoo\",\"nn\":\"theremin\",\"bm\":4}}}}"
        );
        let revived = ControlData::revive(&data, &[line]);
        let control = &revived.get(hash).unwrap().control;
        assert!(control.mute);
        assert_eq!(control.tonic(), Some(TonicKind::Piano));
        assert_eq!(control.drum(), DrumKind::Snare);
        assert!(matches!(control.kind, ControlKind::Part { .. }));
    }

    #[test]
    fn test_instrument_classes_are_distinct() {
        let mut data = ControlData::reconcile(&article(&["Melody", "Bass"]), &ControlData::default());
        let hash = PartSignature::from_title("Bass").hash();
        if let ControlKind::Part { tonic, .. } = &mut data.get_mut(hash).unwrap().control.kind {
            *tonic = TonicKind::Organ;
        }
        let classes = data.instrument_classes();
        assert!(classes.contains(&InstrumentClass::Tonic(TonicKind::Piano)));
        assert!(classes.contains(&InstrumentClass::Tonic(TonicKind::Organ)));
        assert!(classes.contains(&InstrumentClass::Drum(DrumKind::Snare)));
        assert!(classes.contains(&InstrumentClass::Drum(DrumKind::Beat2)));
        assert_eq!(classes.len(), 4);
    }
}
