//! Sequenced score data model.
//!
//! These types are produced by the external parser/sequencer and consumed
//! read-only by the playback engine:
//!
//! - [`SequenceArticle`] - one playable piece, as ordered iterations
//! - [`Iteration`] - one fully expanded repeat pass (iteration 0 is the
//!   "repeats ignored" view)
//! - [`SequenceSection`] - one measure-equivalent unit with its own tempo
//!   and meter
//! - [`Note`] - a timed note with a stable uuid for highlighting/seeking
//! - [`PartSignature`] - stable part identity, hashed for use as the
//!   mixing-control key

use solfa_audio::DrumSymbol;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Label of the synthetic metronome part, always present regardless of
/// score content.
pub const BEAT_MACHINE_LABEL: &str = "beat machine";

/// Exact fraction of quarter notes.
///
/// Note positions and lengths stay rational all the way to scheduling so
/// repeated sequencer passes cannot drift. Fixed denominator-positive,
/// reduced representation; arithmetic saturates rather than wraps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rational {
    num: i64,
    den: i64,
}

impl Rational {
    /// Zero quarters.
    pub const ZERO: Rational = Rational { num: 0, den: 1 };

    /// Create a reduced fraction. A zero or negative denominator is
    /// normalized (zero becomes one, signs move to the numerator).
    pub fn new(num: i64, den: i64) -> Self {
        let den = if den == 0 { 1 } else { den };
        let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
        let g = gcd(num.unsigned_abs(), den.unsigned_abs()).max(1) as i64;
        Self {
            num: num / g,
            den: den / g,
        }
    }

    /// A whole number of quarters.
    pub fn whole(n: i64) -> Self {
        Self { num: n, den: 1 }
    }

    /// Numerator of the reduced fraction.
    pub fn num(&self) -> i64 {
        self.num
    }

    /// Denominator of the reduced fraction (always positive).
    pub fn den(&self) -> i64 {
        self.den
    }

    /// Convert to a float.
    pub fn to_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl std::ops::Add for Rational {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(
            self.num.saturating_mul(rhs.den).saturating_add(rhs.num.saturating_mul(self.den)),
            self.den.saturating_mul(rhs.den),
        )
    }
}

impl std::ops::Sub for Rational {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(
            self.num.saturating_mul(rhs.den).saturating_sub(rhs.num.saturating_mul(self.den)),
            self.den.saturating_mul(rhs.den),
        )
    }
}

impl std::ops::Mul for Rational {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.num.saturating_mul(rhs.num),
            self.den.saturating_mul(rhs.den),
        )
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.num as i128 * other.den as i128).cmp(&(other.num as i128 * self.den as i128))
    }
}

/// Musical meter (time-signature numerator/denominator).
///
/// A zero numerator marks free meter; the denominator is clamped to at
/// least 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Meter {
    pub numerator: u32,
    pub denominator: u32,
}

impl Meter {
    /// Create a meter.
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator: denominator.max(1),
        }
    }
}

impl Default for Meter {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

/// Semitone offsets of the seven scale degrees within one octave.
pub const DEGREE_SEMITONES: [i32; 7] = [0, 2, 4, 5, 7, 9, 11];

/// What a note's character descriptor resolved to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoteGlyph {
    /// A pitched scale degree, 1-7.
    Degree(u8),
    /// A percussive symbol.
    Strike(DrumSymbol),
}

impl NoteGlyph {
    /// Parse a note character: digit 1-7 or one of X/Y/Z.
    pub fn from_char(c: char) -> Option<Self> {
        if let Some(d) = c.to_digit(10) {
            if (1..=7).contains(&d) {
                return Some(NoteGlyph::Degree(d as u8));
            }
            return None;
        }
        DrumSymbol::from_char(c).map(NoteGlyph::Strike)
    }

    /// Semitone offset for a degree glyph.
    pub fn semitone(&self) -> Option<i32> {
        match self {
            NoteGlyph::Degree(d) => (*d as usize)
                .checked_sub(1)
                .and_then(|i| DEGREE_SEMITONES.get(i))
                .copied(),
            NoteGlyph::Strike(_) => None,
        }
    }
}

/// One timed note inside a part's slice of a section.
#[derive(Clone, Debug)]
pub struct Note {
    /// Stable identity for highlighting and pick-to-seek.
    pub uuid: String,
    /// Offset from section start, in quarters.
    pub start: Rational,
    /// Length in quarters.
    pub length: Rational,
    /// Resolved character descriptor; `None` for timing-only marks.
    pub glyph: Option<NoteGlyph>,
    /// Octave delta notated on the note.
    pub octave: i8,
    /// Accidental delta in semitones.
    pub accidental: i8,
    /// Silenced but keeps its timing and highlight.
    pub voided: bool,
}

impl Note {
    /// Create a note with zero deltas.
    pub fn new(uuid: impl Into<String>, start: Rational, length: Rational, glyph: Option<NoteGlyph>) -> Self {
        Self {
            uuid: uuid.into(),
            start,
            length,
            glyph,
            octave: 0,
            accidental: 0,
            voided: false,
        }
    }

    /// Set the octave delta.
    pub fn with_octave(mut self, octave: i8) -> Self {
        self.octave = octave;
        self
    }

    /// Set the accidental delta.
    pub fn with_accidental(mut self, accidental: i8) -> Self {
        self.accidental = accidental;
        self
    }

    /// Mark the note voided.
    pub fn voided(mut self) -> Self {
        self.voided = true;
        self
    }
}

/// A part's slice of one section.
#[derive(Clone, Debug)]
pub enum PartSection {
    /// The part plays these notes.
    Notes(Vec<Note>),
    /// The part rests or is absent this section.
    Rest,
}

impl PartSection {
    /// The notes, empty when resting.
    pub fn notes(&self) -> &[Note] {
        match self {
            PartSection::Notes(notes) => notes,
            PartSection::Rest => &[],
        }
    }
}

/// One measure-equivalent unit with its own tempo and meter.
#[derive(Clone, Debug)]
pub struct SequenceSection {
    /// Stable section index, shared across iterations for seeking.
    pub index: u32,
    /// Quarter notes per minute.
    pub qpm: f64,
    /// Time signature.
    pub beats: Meter,
    /// Section length in quarters.
    pub length_quarters: Rational,
    /// Per-part content.
    pub parts: HashMap<String, PartSection>,
    /// Milliseconds from iteration start to the end of this section.
    /// Filled by the sequencer ([`Iteration::new`] recomputes it).
    pub cumulative_length_ms: f64,
}

impl SequenceSection {
    /// Create an empty section. Tempo is clamped to at least 1 qpm.
    pub fn new(index: u32, qpm: f64, beats: Meter, length_quarters: Rational) -> Self {
        Self {
            index,
            qpm: qpm.max(1.0),
            beats,
            length_quarters,
            parts: HashMap::new(),
            cumulative_length_ms: 0.0,
        }
    }

    /// Add a part's slice.
    pub fn with_part(mut self, id: impl Into<String>, part: PartSection) -> Self {
        self.parts.insert(id.into(), part);
        self
    }

    /// Length of one quarter note in milliseconds.
    pub fn quarter_ms(&self) -> f64 {
        60_000.0 / self.qpm
    }

    /// Section length in milliseconds at unmodified speed.
    pub fn length_ms(&self) -> f64 {
        self.length_quarters.to_f64() * self.quarter_ms()
    }
}

/// One fully expanded repeat pass through the piece.
#[derive(Clone, Debug)]
pub struct Iteration {
    /// Sections in play order.
    pub sections: Vec<SequenceSection>,
}

impl Iteration {
    /// Build an iteration, recomputing the cumulative length of every
    /// section.
    pub fn new(mut sections: Vec<SequenceSection>) -> Self {
        let mut elapsed = 0.0;
        for section in &mut sections {
            elapsed += section.length_ms();
            section.cumulative_length_ms = elapsed;
        }
        Self { sections }
    }

    /// Position of the first section with the given index.
    pub fn position_of(&self, index: u32) -> Option<usize> {
        self.sections.iter().position(|s| s.index == index)
    }

    /// The first section with the given index.
    pub fn section(&self, index: u32) -> Option<&SequenceSection> {
        self.position_of(index).map(|p| &self.sections[p])
    }
}

/// Stable identity for a part, derived from its title text or positional
/// index (or the beat-machine constant). Signatures with the same hash
/// denote the same logical part across re-sequencing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartSignature {
    label: String,
    hash: u64,
}

impl PartSignature {
    /// Identity from a part title.
    pub fn from_title(title: &str) -> Self {
        let label = title.trim();
        Self {
            label: label.to_string(),
            hash: hash_of(("title", label)),
        }
    }

    /// Identity from a positional index, for untitled parts.
    pub fn from_index(index: usize) -> Self {
        Self {
            label: format!("Part {}", index + 1),
            hash: hash_of(("index", index)),
        }
    }

    /// The beat-machine pseudo-part.
    pub fn beat_machine() -> Self {
        Self {
            label: BEAT_MACHINE_LABEL.to_string(),
            hash: hash_of("beat-machine"),
        }
    }

    /// Display label (tracks renames of identical parts).
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Control-store key.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Whether this is the beat-machine pseudo-part.
    pub fn is_beat_machine(&self) -> bool {
        self.hash == Self::beat_machine().hash
    }
}

fn hash_of<T: Hash>(value: T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// One playable piece after parsing and sequencing.
///
/// Immutable once produced; the engine's view is replaced wholesale when
/// the source document changes.
#[derive(Clone, Debug)]
pub struct SequenceArticle {
    iterations: Vec<Iteration>,
    signatures: HashMap<String, PartSignature>,
}

impl SequenceArticle {
    /// Assemble an article from its iterations and per-part signatures.
    pub fn new(iterations: Vec<Iteration>, signatures: HashMap<String, PartSignature>) -> Self {
        Self {
            iterations,
            signatures,
        }
    }

    /// Iterations in play order.
    pub fn iterations(&self) -> &[Iteration] {
        &self.iterations
    }

    /// Signature of every part appearing in the score.
    pub fn signatures(&self) -> &HashMap<String, PartSignature> {
        &self.signatures
    }

    /// Signature for one part id.
    pub fn signature_for(&self, part_id: &str) -> Option<&PartSignature> {
        self.signatures.get(part_id)
    }

    /// Resolve a navigation position to its section.
    pub fn section_at(&self, iteration: usize, index: u32) -> Option<&SequenceSection> {
        self.iterations.get(iteration)?.section(index)
    }

    /// Default navigation position: the first expanded pass when repeats
    /// were expanded, otherwise the ignore-repeats view.
    pub fn start_position(&self) -> (usize, u32) {
        for (j, it) in self.iterations.iter().enumerate() {
            if j == 0 && self.iterations.len() > 1 {
                continue;
            }
            if let Some(first) = it.sections.first() {
                return (j, first.index);
            }
        }
        (0, 0)
    }

    /// Find the section following `(iteration, index)` in navigation
    /// order.
    ///
    /// Within the current iteration the next entry in play order wins.
    /// When the iteration is exhausted, later iterations contribute their
    /// first section - except from iteration 0, the ignore-repeats view,
    /// which is terminal by design. An unresolvable position (stale
    /// pointer after re-sequencing) yields `None`.
    pub fn next_position(&self, iteration: usize, index: u32) -> Option<(usize, u32)> {
        let it = self.iterations.get(iteration)?;
        let pos = it.position_of(index)?;
        if let Some(next) = it.sections.get(pos + 1) {
            return Some((iteration, next.index));
        }
        if iteration == 0 {
            return None;
        }
        self.iterations
            .iter()
            .enumerate()
            .skip(iteration + 1)
            .find_map(|(j, it)| it.sections.first().map(|s| (j, s.index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(index: u32) -> SequenceSection {
        SequenceSection::new(index, 120.0, Meter::default(), Rational::whole(4))
    }

    #[test]
    fn test_rational_arithmetic() {
        let a = Rational::new(1, 2);
        let b = Rational::new(1, 3);
        assert_eq!(a + b, Rational::new(5, 6));
        assert_eq!(a - b, Rational::new(1, 6));
        assert_eq!(a * b, Rational::new(1, 6));
        assert_eq!(Rational::new(2, 4), Rational::new(1, 2));
        assert_eq!(Rational::new(3, -6), Rational::new(-1, 2));
        assert!(Rational::new(1, 3) < Rational::new(1, 2));
        assert!((Rational::new(3, 2).to_f64() - 1.5).abs() < 1e-12);
        assert_eq!(Rational::new(2, 4).num(), 1);
        assert_eq!(Rational::new(2, 4).den(), 2);
    }

    #[test]
    fn test_resting_part_has_no_notes() {
        assert!(PartSection::Rest.notes().is_empty());
        let notes = PartSection::Notes(vec![Note::new(
            "n",
            Rational::ZERO,
            Rational::whole(1),
            NoteGlyph::from_char('1'),
        )]);
        assert_eq!(notes.notes().len(), 1);
    }

    #[test]
    fn test_glyph_parsing() {
        assert_eq!(NoteGlyph::from_char('1'), Some(NoteGlyph::Degree(1)));
        assert_eq!(NoteGlyph::from_char('7'), Some(NoteGlyph::Degree(7)));
        assert_eq!(NoteGlyph::from_char('0'), None);
        assert_eq!(NoteGlyph::from_char('8'), None);
        assert_eq!(
            NoteGlyph::from_char('x'),
            Some(NoteGlyph::Strike(DrumSymbol::X))
        );
        assert_eq!(NoteGlyph::from_char('q'), None);
    }

    #[test]
    fn test_degree_semitones() {
        // Degree 3 sits four semitones above the degree-1 reference.
        assert_eq!(NoteGlyph::Degree(3).semitone(), Some(4));
        assert_eq!(NoteGlyph::Degree(1).semitone(), Some(0));
        assert_eq!(NoteGlyph::Degree(7).semitone(), Some(11));
    }

    #[test]
    fn test_signature_identity() {
        assert_eq!(
            PartSignature::from_title("Melody").hash(),
            PartSignature::from_title("  Melody  ").hash()
        );
        assert_ne!(
            PartSignature::from_title("Melody").hash(),
            PartSignature::from_title("Bass").hash()
        );
        assert_ne!(
            PartSignature::from_index(0).hash(),
            PartSignature::from_index(1).hash()
        );
        assert!(PartSignature::beat_machine().is_beat_machine());
        assert!(!PartSignature::from_index(0).is_beat_machine());
    }

    #[test]
    fn test_iteration_cumulative_lengths() {
        // 4 quarters at 120 qpm = 2000 ms per section.
        let it = Iteration::new(vec![section(0), section(1), section(2)]);
        let cumulative: Vec<f64> = it.sections.iter().map(|s| s.cumulative_length_ms).collect();
        assert_eq!(cumulative, vec![2000.0, 4000.0, 6000.0]);
    }

    #[test]
    fn test_next_position_within_iteration() {
        let article = SequenceArticle::new(
            vec![
                Iteration::new(vec![section(0), section(1)]),
                Iteration::new(vec![section(0), section(1)]),
            ],
            HashMap::new(),
        );
        assert_eq!(article.next_position(1, 0), Some((1, 1)));
    }

    #[test]
    fn test_iteration_zero_is_terminal() {
        let article = SequenceArticle::new(
            vec![
                Iteration::new(vec![section(0), section(1)]),
                Iteration::new(vec![section(0), section(1)]),
            ],
            HashMap::new(),
        );
        assert_eq!(article.next_position(0, 0), Some((0, 1)));
        // End of the ignore-repeats view never chains into iteration 1.
        assert_eq!(article.next_position(0, 1), None);
    }

    #[test]
    fn test_advance_walks_forward_and_never_revisits_iteration_zero() {
        let article = SequenceArticle::new(
            vec![
                Iteration::new(vec![section(0), section(1), section(2)]),
                Iteration::new(vec![section(0), section(1)]),
                Iteration::new(vec![section(1), section(2)]),
            ],
            HashMap::new(),
        );
        let mut position = (1, 0);
        let mut visited = vec![position];
        while let Some(next) = article.next_position(position.0, position.1) {
            assert!(next.0 >= 1, "advance returned to iteration {}", next.0);
            assert!(next.0 >= position.0);
            position = next;
            visited.push(position);
            assert!(visited.len() < 16, "advance does not terminate");
        }
        // Walked through iteration 1 then reached a different iteration.
        assert_eq!(visited, vec![(1, 0), (1, 1), (2, 1), (2, 2)]);
    }

    #[test]
    fn test_stale_position_yields_none() {
        let article = SequenceArticle::new(
            vec![
                Iteration::new(vec![section(0)]),
                Iteration::new(vec![section(0), section(1)]),
            ],
            HashMap::new(),
        );
        assert_eq!(article.next_position(1, 9), None);
        assert_eq!(article.next_position(5, 0), None);
    }

    #[test]
    fn test_start_position_prefers_expanded_passes() {
        let expanded = SequenceArticle::new(
            vec![
                Iteration::new(vec![section(0)]),
                Iteration::new(vec![section(0), section(1)]),
            ],
            HashMap::new(),
        );
        assert_eq!(expanded.start_position(), (1, 0));

        let single = SequenceArticle::new(vec![Iteration::new(vec![section(3)])], HashMap::new());
        assert_eq!(single.start_position(), (0, 3));
    }
}
