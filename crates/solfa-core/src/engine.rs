//! Playback engine state machine.
//!
//! [`PlaybackEngine`] owns the navigation position, drives the clock timer
//! for the current section, chains to the next section automatically, and
//! applies live per-part mixing. The engine is single-threaded and
//! cooperative: playback-initiating calls return immediately and the
//! state machine advances when the host pumps [`PlaybackEngine::tick`].
//!
//! Cancellation is token-based. Every `play` mints a fresh token; the
//! asynchronous continuations (host ready, resources loaded) compare
//! their token against the engine's current one and silently abort when
//! they differ. A disposed clock timer never fires, so `stop` needs no
//! per-event cancellation.

use crate::controls::{ControlData, ControlKind, MixControl};
use crate::schedule::{plan_section, PlanParams, TimedEvent, TriggerVoice};
use crate::score::{PartSignature, SequenceArticle, BEAT_MACHINE_LABEL};
use crossbeam_channel::{unbounded, Receiver, Sender};
use solfa_audio::{
    ensure_loaded, AudioHost, ClockTimer, DrumKind, DrumSymbol, Instrument, InstrumentClass,
    LoadState, TonicKind,
};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;

/// Valid speed-modifier range.
pub const SPEED_RANGE: (f64, f64) = (0.1, 4.0);
/// Valid pitch-modifier range, in semitones.
pub const PITCH_RANGE: (f64, f64) = (-48.0, 48.0);

/// Auto-scroll requests are suppressed this long after a score change,
/// in host-clock seconds.
const SCROLL_THROTTLE_S: f64 = 0.5;

/// Maps a note picked on the visual surface back to a navigation
/// position. Implemented by the layout collaborator, consumed here.
pub trait SectionLocator {
    /// Resolve `note_uuid` to `(iteration, section_index)`.
    fn locate(
        &self,
        article: &SequenceArticle,
        iteration_hint: usize,
        note_uuid: &str,
    ) -> Option<(usize, u32)>;
}

/// Engine state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    /// Pickup bar: metronome audible, notes silent.
    PlayingPrecount,
    PlayingSection,
}

/// Notifications surfaced to the UI layer.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// The set of highlighted note uuids changed.
    HighlightsChanged(Vec<String>),
    /// Scroll the visual surface to a note.
    ScrollTo { uuid: String },
    /// The engine began playing a section.
    PositionChanged {
        iteration: usize,
        section: u32,
        /// Milliseconds from iteration start to the section start.
        at_ms: f64,
    },
    /// Playback stopped (explicitly, at score end, or forced).
    Stopped,
}

/// Errors surfaced by the engine's setter API.
#[derive(Error, Debug)]
pub enum PlaybackError {
    /// Swapping the underlying voice mid-flight is unsupported.
    #[error("instrument selection cannot change while playing")]
    InstrumentSwapWhilePlaying,

    /// No control entry for the given signature hash.
    #[error("no part with signature hash {0}")]
    UnknownPart(u64),
}

struct PartVoices {
    tonic: Option<Instrument>,
    drum: Option<Instrument>,
}

impl PartVoices {
    fn dispose(&mut self) {
        if let Some(tonic) = &mut self.tonic {
            tonic.dispose();
        }
        if let Some(drum) = &mut self.drum {
            drum.dispose();
        }
    }
}

/// Ephemeral per-play state: one timer, the live instruments, and the
/// running offset of the section being played. Rebuilt on every play.
struct Session {
    article_revision: u64,
    precount: bool,
    /// Timer offset at which the current section was scheduled.
    base_offset_ms: f64,
    /// Speed-adjusted length of the current section.
    section_length_ms: f64,
    timer: ClockTimer<TimedEvent>,
    voices: HashMap<String, PartVoices>,
}

impl Session {
    fn dispose(&mut self) {
        self.timer.dispose();
        for voices in self.voices.values_mut() {
            voices.dispose();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A play request waiting on the readiness gates.
struct PendingStart {
    token: u64,
    with_precount: bool,
    /// First gate: the host must report ready before resources are
    /// polled.
    waiting_ready: bool,
}

/// The playback scheduling and mixing engine.
pub struct PlaybackEngine {
    host: Rc<dyn AudioHost>,
    locator: Option<Box<dyn SectionLocator>>,
    article: Option<Rc<SequenceArticle>>,
    article_revision: u64,
    controls: ControlData,
    resource_base: Option<PathBuf>,
    speed_modifier: f64,
    pitch_modifier: f64,
    position: (usize, u32),
    state: PlaybackState,
    session: Option<Session>,
    pending: Option<PendingStart>,
    token_counter: u64,
    highlights: BTreeSet<String>,
    last_score_change: Option<f64>,
    events_tx: Sender<EngineEvent>,
    events_rx: Receiver<EngineEvent>,
}

impl PlaybackEngine {
    /// Create an engine over the given host. No score, no resource base;
    /// `can_play` starts out false.
    pub fn new(host: Rc<dyn AudioHost>) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            host,
            locator: None,
            article: None,
            article_revision: 0,
            controls: ControlData::default(),
            resource_base: None,
            speed_modifier: 1.0,
            pitch_modifier: 0.0,
            position: (0, 0),
            state: PlaybackState::Stopped,
            session: None,
            pending: None,
            token_counter: 0,
            highlights: BTreeSet::new(),
            last_score_change: None,
            events_tx,
            events_rx,
        }
    }

    /// Install the visual pick-to-seek collaborator.
    pub fn set_locator(&mut self, locator: Box<dyn SectionLocator>) {
        self.locator = Some(locator);
    }

    /// Set the instrument resource base directory. An absent base
    /// disables playback (and stops any active session).
    pub fn set_resource_base(&mut self, base: Option<PathBuf>) {
        if base.is_none() && self.is_active() {
            self.stop();
        }
        self.resource_base = base;
    }

    /// Whether playback can start at all.
    pub fn can_play(&self) -> bool {
        self.article.is_some() && self.resource_base.is_some()
    }

    /// Current engine state.
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Current navigation position.
    pub fn position(&self) -> (usize, u32) {
        self.position
    }

    /// Snapshot of the mixing control store.
    pub fn controls(&self) -> &ControlData {
        &self.controls
    }

    /// Subscribe to engine notifications.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.events_rx.clone()
    }

    /// Replace the engine's score wholesale.
    ///
    /// A live session referencing the old score is torn down first - a
    /// content change never silently continues on stale data. The control
    /// store is reconciled against the new score and the navigation
    /// position resets to its start.
    pub fn set_article(&mut self, article: SequenceArticle) {
        self.stop();
        self.article_revision += 1;
        self.controls = ControlData::reconcile(&article, &self.controls);
        self.position = article.start_position();
        self.last_score_change = Some(self.host.now());
        self.article = Some(Rc::new(article));
    }

    /// Drop the current score (document closed).
    pub fn clear_article(&mut self) {
        self.stop();
        self.article_revision += 1;
        self.article = None;
    }

    /// Start playback from the current position.
    ///
    /// Returns immediately; the session is built from `tick` once the
    /// host reports ready and every referenced instrument class has
    /// loaded. A fresh token invalidates any in-flight start.
    pub fn play(&mut self, with_precount: bool) {
        if !self.can_play() {
            log::debug!("play ignored: no score or resource base");
            return;
        }
        self.stop();
        self.token_counter += 1;
        if let Some(base) = self.resource_base.clone() {
            for class in self.controls.instrument_classes() {
                let _ = ensure_loaded(class, &base);
            }
        }
        self.pending = Some(PendingStart {
            token: self.token_counter,
            with_precount,
            waiting_ready: true,
        });
    }

    /// Stop playback, invalidating any in-flight start.
    pub fn stop(&mut self) {
        self.token_counter += 1;
        self.teardown_session();
    }

    /// Move the navigation position.
    ///
    /// Permitted in any state. While playing this is an implicit
    /// stop-and-play-from-the-new-position, never a live jump
    /// mid-section.
    pub fn seek(&mut self, iteration: usize, section: u32) {
        if self.article.is_none() {
            return;
        }
        let was_active = self.is_active();
        self.stop();
        self.position = (iteration, section);
        if was_active {
            self.play(false);
        }
    }

    /// Seek to the section containing a note picked on the visual
    /// surface.
    pub fn seek_to_note(&mut self, uuid: &str) {
        let target = match (&self.locator, &self.article) {
            (Some(locator), Some(article)) => locator.locate(article, self.position.0, uuid),
            _ => None,
        };
        if let Some((iteration, section)) = target {
            self.seek(iteration, section);
        }
    }

    /// Set the speed modifier, clamped to [0.1, 4]. Takes effect from
    /// the next scheduled section.
    pub fn set_speed_modifier(&mut self, speed: f64) {
        self.speed_modifier = speed.clamp(SPEED_RANGE.0, SPEED_RANGE.1);
    }

    /// Current speed modifier.
    pub fn speed_modifier(&self) -> f64 {
        self.speed_modifier
    }

    /// Set the pitch modifier in semitones, clamped to [-48, 48] and
    /// quantized to half-semitone steps.
    pub fn set_pitch_modifier(&mut self, semitones: f64) {
        let clamped = semitones.clamp(PITCH_RANGE.0, PITCH_RANGE.1);
        self.pitch_modifier = (clamped * 2.0).round() / 2.0;
    }

    /// Current pitch modifier.
    pub fn pitch_modifier(&self) -> f64 {
        self.pitch_modifier
    }

    /// Serialize the control store (see [`ControlData::dehydrate`]).
    pub fn dehydrate_controls(&self) -> Vec<String> {
        self.controls.dehydrate()
    }

    /// Restore persisted control lines into the current store.
    pub fn load_controls(&mut self, lines: &[String]) {
        self.controls = ControlData::revive(&self.controls, lines);
        self.apply_mixing();
    }

    /// Set a part's volume (clamped to [0, 150]).
    pub fn set_part_volume(&mut self, hash: u64, volume: f64) -> Result<(), PlaybackError> {
        self.with_control(hash, |c| c.volume = volume)
    }

    /// Set a part's pan (clamped to [-1, 1]).
    pub fn set_part_pan(&mut self, hash: u64, pan: f64) -> Result<(), PlaybackError> {
        self.with_control(hash, |c| c.pan = pan)
    }

    /// Mute or unmute a part.
    pub fn set_part_mute(&mut self, hash: u64, mute: bool) -> Result<(), PlaybackError> {
        self.with_control(hash, |c| c.mute = mute)
    }

    /// Solo or unsolo a part.
    pub fn set_part_solo(&mut self, hash: u64, solo: bool) -> Result<(), PlaybackError> {
        self.with_control(hash, |c| c.solo = solo)
    }

    /// Set a part's octave control (clamped to [-6, 6]).
    pub fn set_part_octave(&mut self, hash: u64, octave: i8) -> Result<(), PlaybackError> {
        self.with_control(hash, |c| {
            if let ControlKind::Part { octave: o, .. } = &mut c.kind {
                *o = octave;
            }
        })
    }

    /// Set the beat machine's click modulo (clamped to [0, 18]).
    pub fn set_beat_modulo(&mut self, hash: u64, modulo: u32) -> Result<(), PlaybackError> {
        self.with_control(hash, |c| {
            if let ControlKind::BeatMachine { beat_modulo, .. } = &mut c.kind {
                *beat_modulo = modulo;
            }
        })
    }

    /// Choose a part's tonic instrument. Rejected while playing.
    pub fn set_part_tonic_instrument(
        &mut self,
        hash: u64,
        kind: TonicKind,
    ) -> Result<(), PlaybackError> {
        if self.is_active() {
            return Err(PlaybackError::InstrumentSwapWhilePlaying);
        }
        self.with_control(hash, |c| {
            if let ControlKind::Part { tonic, .. } = &mut c.kind {
                *tonic = kind;
            }
        })
    }

    /// Choose a part's drumline instrument. Rejected while playing.
    pub fn set_part_drum_instrument(
        &mut self,
        hash: u64,
        kind: DrumKind,
    ) -> Result<(), PlaybackError> {
        if self.is_active() {
            return Err(PlaybackError::InstrumentSwapWhilePlaying);
        }
        self.with_control(hash, |c| match &mut c.kind {
            ControlKind::Part { drum, .. } | ControlKind::BeatMachine { drum, .. } => *drum = kind,
        })
    }

    /// Advance the state machine: poll the readiness gates of a pending
    /// start and fire every due timer event. The host calls this from
    /// its idle loop; nothing here blocks.
    pub fn tick(&mut self) {
        self.poll_pending();
        self.drain_timer();
    }

    fn is_active(&self) -> bool {
        self.session.is_some() || self.pending.is_some()
    }

    fn with_control<F>(&mut self, hash: u64, edit: F) -> Result<(), PlaybackError>
    where
        F: FnOnce(&mut MixControl),
    {
        let entry = self
            .controls
            .get_mut(hash)
            .ok_or(PlaybackError::UnknownPart(hash))?;
        edit(&mut entry.control);
        entry.control.clamp();
        self.apply_mixing();
        Ok(())
    }

    fn teardown_session(&mut self) {
        let was_active = self.is_active();
        self.pending = None;
        if let Some(mut session) = self.session.take() {
            session.dispose();
        }
        self.state = PlaybackState::Stopped;
        if !self.highlights.is_empty() {
            self.highlights.clear();
            self.emit_highlights();
        }
        if was_active {
            self.emit(EngineEvent::Stopped);
        }
    }

    fn poll_pending(&mut self) {
        let Some(pending) = &mut self.pending else {
            return;
        };
        if pending.token != self.token_counter {
            self.pending = None;
            return;
        }
        if pending.waiting_ready {
            if !self.host.is_ready() {
                return;
            }
            pending.waiting_ready = false;
        }
        let with_precount = pending.with_precount;
        let Some(base) = self.resource_base.clone() else {
            self.pending = None;
            return;
        };
        let all_loaded = self
            .controls
            .instrument_classes()
            .into_iter()
            .all(|class| ensure_loaded(class, &base).is_ready());
        if !all_loaded {
            return;
        }
        self.pending = None;
        self.start_session(with_precount, &base);
    }

    fn start_session(&mut self, with_precount: bool, base: &Path) {
        let Some(article) = self.article.clone() else {
            return;
        };
        if article.section_at(self.position.0, self.position.1).is_none() {
            log::debug!("play ignored: position {:?} unresolvable", self.position);
            return;
        }

        let mut voices = HashMap::new();
        for (part_id, signature) in article.signatures() {
            let Some(entry) = self.controls.get(signature.hash()) else {
                continue;
            };
            let tonic_kind = entry.control.tonic().unwrap_or(TonicKind::Piano);
            let drum_kind = entry.control.drum();
            voices.insert(
                part_id.clone(),
                PartVoices {
                    tonic: self.create_instrument(
                        InstrumentClass::Tonic(tonic_kind),
                        base,
                        &format!("{part_id}/tonic"),
                    ),
                    drum: self.create_instrument(
                        InstrumentClass::Drum(drum_kind),
                        base,
                        &format!("{part_id}/drum"),
                    ),
                },
            );
        }
        let beat_drum = self
            .controls
            .get(PartSignature::beat_machine().hash())
            .map(|entry| entry.control.drum())
            .unwrap_or(DrumKind::Beat2);
        voices.insert(
            BEAT_MACHINE_LABEL.to_string(),
            PartVoices {
                tonic: None,
                drum: self.create_instrument(
                    InstrumentClass::Drum(beat_drum),
                    base,
                    &format!("{BEAT_MACHINE_LABEL}/drum"),
                ),
            },
        );

        self.session = Some(Session {
            article_revision: self.article_revision,
            precount: with_precount,
            base_offset_ms: 0.0,
            section_length_ms: 0.0,
            timer: ClockTimer::new(self.host.as_ref()),
            voices,
        });
        self.state = if with_precount {
            PlaybackState::PlayingPrecount
        } else {
            PlaybackState::PlayingSection
        };
        self.apply_mixing();
        self.schedule_current_section(with_precount);
    }

    fn create_instrument(
        &self,
        class: InstrumentClass,
        base: &Path,
        label: &str,
    ) -> Option<Instrument> {
        match ensure_loaded(class, base) {
            LoadState::Ready(bank) => {
                Some(Instrument::create(self.host.as_ref(), class, bank, label))
            }
            LoadState::Pending => {
                log::warn!("instrument '{class}' not loaded at session start");
                None
            }
        }
    }

    /// Enqueue everything the current section needs: audio triggers are
    /// placed on instruments at absolute resolved instants, highlight and
    /// chain events go through the timer. All of it synchronously, before
    /// control returns.
    fn schedule_current_section(&mut self, precount: bool) {
        let Some(article) = self.article.clone() else {
            self.stop();
            return;
        };
        let Some(section) = article.section_at(self.position.0, self.position.1) else {
            self.stop();
            return;
        };
        let plan = plan_section(
            section,
            &article,
            &PlanParams {
                controls: &self.controls,
                speed_modifier: self.speed_modifier,
                pitch_modifier: self.pitch_modifier,
                precount,
            },
        );
        let at_ms = section.cumulative_length_ms - section.length_ms();
        let Some(session) = &mut self.session else {
            return;
        };
        session.section_length_ms = plan.length_ms;
        let base = session.base_offset_ms;

        for trigger in &plan.triggers {
            let at = session.timer.resolve(base + trigger.offset_ms);
            let duration = trigger.duration_ms / 1000.0;
            match &trigger.voice {
                TriggerVoice::Click => {
                    if let Some(drum) = session
                        .voices
                        .get_mut(BEAT_MACHINE_LABEL)
                        .and_then(|pv| pv.drum.as_mut())
                    {
                        drum.schedule_strike(DrumSymbol::X, at, duration);
                    }
                }
                TriggerVoice::Tone { part, frequency_hz } => {
                    if let Some(tonic) = session
                        .voices
                        .get_mut(part)
                        .and_then(|pv| pv.tonic.as_mut())
                    {
                        tonic.schedule_tone(*frequency_hz, at, duration);
                    }
                }
                TriggerVoice::Strike { part, symbol } => {
                    if let Some(drum) = session
                        .voices
                        .get_mut(part)
                        .and_then(|pv| pv.drum.as_mut())
                    {
                        drum.schedule_strike(*symbol, at, duration);
                    }
                }
            }
        }
        for (offset, event) in plan.timed {
            let visual = event.is_visual();
            session.timer.schedule(event, base + offset, visual);
        }
        self.emit(EngineEvent::PositionChanged {
            iteration: self.position.0,
            section: self.position.1,
            at_ms,
        });
    }

    fn drain_timer(&mut self) {
        let Some(session) = &mut self.session else {
            return;
        };
        // A live session must never outlast its score.
        if session.article_revision != self.article_revision {
            self.stop();
            return;
        }
        let fired = session.timer.take_due(self.host.now());
        for fired in fired {
            match fired.event {
                TimedEvent::HighlightOn { uuid } => {
                    self.highlights.insert(uuid.clone());
                    self.emit_highlights();
                    self.maybe_scroll(uuid);
                }
                TimedEvent::HighlightOff { uuid } => {
                    if self.highlights.remove(&uuid) {
                        self.emit_highlights();
                    }
                }
                TimedEvent::PrecountEnd => self.finish_precount(),
                TimedEvent::SectionEnd => self.advance_section(),
            }
            if self.session.is_none() {
                break;
            }
        }
    }

    fn finish_precount(&mut self) {
        if !self.highlights.is_empty() {
            self.highlights.clear();
            self.emit_highlights();
        }
        self.state = PlaybackState::PlayingSection;
        if let Some(session) = &mut self.session {
            session.precount = false;
            session.base_offset_ms += session.section_length_ms;
        }
        self.apply_mixing();
        self.schedule_current_section(false);
    }

    fn advance_section(&mut self) {
        let Some(article) = self.article.clone() else {
            self.stop();
            return;
        };
        match article.next_position(self.position.0, self.position.1) {
            Some(next) => {
                self.position = next;
                if let Some(session) = &mut self.session {
                    session.base_offset_ms += session.section_length_ms;
                }
                self.schedule_current_section(false);
            }
            None => self.stop(),
        }
    }

    /// Recompute and apply the mixing policy to every live instrument.
    ///
    /// Muted parts and parts muted out by the solo policy go to the gain
    /// floor; the beat machine is audible during precount and
    /// silent-unless-soloed afterward.
    fn apply_mixing(&mut self) {
        let Some(session) = &mut self.session else {
            return;
        };
        let any_solo = self.controls.any_solo();
        let precount = session.precount;
        for (part_id, voices) in &mut session.voices {
            let entry = if part_id == BEAT_MACHINE_LABEL {
                self.controls.get(PartSignature::beat_machine().hash())
            } else {
                self.article
                    .as_ref()
                    .and_then(|a| a.signature_for(part_id))
                    .and_then(|sig| self.controls.get(sig.hash()))
            };
            let Some(entry) = entry else {
                continue;
            };
            let control = &entry.control;
            let fraction = if part_id == BEAT_MACHINE_LABEL {
                if precount || (control.solo && !control.mute) {
                    control.volume_fraction()
                } else {
                    0.0
                }
            } else if control.mute || (any_solo && !control.solo) {
                0.0
            } else {
                control.volume_fraction()
            };
            if let Some(tonic) = &mut voices.tonic {
                tonic.set_volume(fraction);
                tonic.set_pan(control.pan);
            }
            if let Some(drum) = &mut voices.drum {
                drum.set_volume(fraction);
                drum.set_pan(control.pan);
            }
        }
    }

    fn maybe_scroll(&mut self, uuid: String) {
        if let Some(changed_at) = self.last_score_change {
            if self.host.now() - changed_at < SCROLL_THROTTLE_S {
                return;
            }
        }
        self.emit(EngineEvent::ScrollTo { uuid });
    }

    fn emit_highlights(&self) {
        self.emit(EngineEvent::HighlightsChanged(
            self.highlights.iter().cloned().collect(),
        ));
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events_tx.send(event);
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.teardown_session();
    }
}
