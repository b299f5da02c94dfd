//! Process-wide instrument sample registry.
//!
//! Each instrument class owns one lazily-loaded bank of decoded reference
//! samples, keyed by engine pitch. Banks are loaded at most once per class
//! per process from a supplied resource base path and handed out as
//! immutable shared handles; a second load of an already-loaded class is a
//! no-op. A failed load is retried on the next poll, with a fixed
//! one-second backoff between attempts.

use crate::error::AudioError;
use crate::instrument::InstrumentClass;
use anyhow::Context;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

/// Minimum delay between load attempts for a failing class.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Decoded mono sample data for one reference pitch.
#[derive(Clone)]
pub struct SampleData {
    /// Mono frames, -1..1.
    pub frames: Arc<Vec<f32>>,
    /// Source sample rate in Hz.
    pub sample_rate: u32,
}

/// The per-class cache of decoded reference samples.
pub struct SampleBank {
    class: InstrumentClass,
    samples: HashMap<i32, SampleData>,
}

impl SampleBank {
    /// An empty bank (synthesized classes have no samples).
    pub fn empty(class: InstrumentClass) -> Self {
        Self {
            class,
            samples: HashMap::new(),
        }
    }

    /// The class this bank belongs to.
    pub fn class(&self) -> InstrumentClass {
        self.class
    }

    /// Sample data for an engine pitch, if that pitch is a reference.
    pub fn get(&self, pitch: i32) -> Option<&SampleData> {
        self.samples.get(&pitch)
    }

    /// Whether the bank holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of reference samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Outcome of a load poll.
pub enum LoadState {
    /// The class is loaded; here is the shared handle.
    Ready(Arc<SampleBank>),
    /// Not loaded yet (first attempt pending, or backing off after a
    /// failure). Poll again.
    Pending,
}

impl LoadState {
    /// Whether the state is [`LoadState::Ready`].
    pub fn is_ready(&self) -> bool {
        matches!(self, LoadState::Ready(_))
    }
}

enum Slot {
    Loaded(Arc<SampleBank>),
    Failed(Instant),
}

fn registry() -> &'static Mutex<HashMap<InstrumentClass, Slot>> {
    static REGISTRY: OnceLock<Mutex<HashMap<InstrumentClass, Slot>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Poll the registry for `class`, attempting a load if due.
///
/// Loading is idempotent: once a class is loaded the stored handle is
/// returned forever, regardless of `base`. Failures are logged and retried
/// no sooner than [`RETRY_BACKOFF`] after the previous attempt.
pub fn ensure_loaded(class: InstrumentClass, base: &Path) -> LoadState {
    let mut slots = registry().lock().unwrap_or_else(|e| e.into_inner());
    match slots.get(&class) {
        Some(Slot::Loaded(bank)) => return LoadState::Ready(Arc::clone(bank)),
        Some(Slot::Failed(at)) if at.elapsed() < RETRY_BACKOFF => return LoadState::Pending,
        _ => {}
    }
    match load_bank(class, base) {
        Ok(bank) => {
            log::debug!("loaded {} samples for '{}'", bank.len(), class);
            let bank = Arc::new(bank);
            slots.insert(class, Slot::Loaded(Arc::clone(&bank)));
            LoadState::Ready(bank)
        }
        Err(e) => {
            log::warn!("failed to load samples for '{}': {:#}", class, e);
            slots.insert(class, Slot::Failed(Instant::now()));
            LoadState::Pending
        }
    }
}

/// Whether a class has finished loading.
pub fn is_loaded(class: InstrumentClass) -> bool {
    let slots = registry().lock().unwrap_or_else(|e| e.into_inner());
    matches!(slots.get(&class), Some(Slot::Loaded(_)))
}

fn load_bank(class: InstrumentClass, base: &Path) -> anyhow::Result<SampleBank> {
    let mut samples = HashMap::new();
    for (stem, pitch) in class.sample_refs() {
        let path = base.join(class.dir_name()).join(format!("{stem}.wav"));
        if !path.exists() {
            return Err(AudioError::MissingSample(path).into());
        }
        let data = decode_wav(&path)
            .with_context(|| format!("failed to decode sample {}", path.display()))?;
        samples.insert(*pitch, data);
    }
    Ok(SampleBank { class, samples })
}

fn decode_wav(path: &Path) -> Result<SampleData, AudioError> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let raw: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };
    let channels = spec.channels.max(1) as usize;
    let frames = if channels == 1 {
        raw
    } else {
        raw.chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };
    Ok(SampleData {
        frames: Arc::new(frames),
        sample_rate: spec.sample_rate,
    })
}
