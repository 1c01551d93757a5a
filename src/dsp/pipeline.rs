//! Dome pipeline: runs one block through every stage.
//!
//! Per block, strictly in order:
//! 1. every input sample becomes a [`SoundField`] on the dome's equator ring,
//!    with frequency spread linearly over 20 Hz to 20 kHz;
//! 2. the fields join the primary [`InterferenceField`], whose source states
//!    then advance by one sample period;
//! 3. the working buffer is boosted once per eigenfrequency whose
//!    reverberation time exceeds 0.5 s;
//! 4. the [`CoherenceFeedbackCorrector`] corrects the buffer;
//! 5. the buffer is normalized to a 0.95 peak.
//!
//! The pipeline takes `&mut self` for a pass, so one pass never interleaves
//! with another on the same instance. The sub-components lock internally and
//! can be inspected from other threads through shared references.

use std::collections::BTreeMap;
use std::f64::consts::{FRAC_PI_2, TAU};

use num_complex::Complex64;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::config::PipelineConfig;
use crate::coord::{CoordKey, SphericalCoordinate};
use crate::dsp::coherence::{CoherenceFeedbackCorrector, CoherenceLevel, CoherenceTransition};
use crate::dsp::interference::InterferenceField;
use crate::dsp::mixer::Mixer;
use crate::dsp::resonance::{AUDIBLE_MAX, AUDIBLE_MIN, DomeResonanceModel};
use crate::error::{DomeError, DomeResult};
use crate::field::{SoundField, SourceState};

/// Eigenmodes ringing longer than this get a resonance boost.
const BOOST_REVERB_SECONDS: f64 = 0.5;

/// Read-only snapshot for logging and telemetry consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub eigenfrequencies: Vec<f64>,
    pub coherence_factor: f64,
    pub coherence_level: CoherenceLevel,
    pub active_sources: usize,
}

/// Aggregate counters over the pipeline's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatistics {
    /// Interference fields owned, including the primary one once created.
    pub active_fields: usize,
    pub active_sources: usize,
    pub entangled_pairs: usize,
    /// Share of sources currently in the coherent state (1.0 with none).
    pub coherence_ratio: f64,
    /// Output energy over input energy for the last block.
    pub energy_efficiency: f64,
    pub blocks_processed: u64,
}

/// Owns the resonance model, interference fields and corrector, and
/// sequences a full processing pass per audio block.
#[derive(Debug)]
pub struct DomePipeline {
    config: PipelineConfig,
    resonance: DomeResonanceModel,
    /// Receives the per-sample fields; created on first use.
    primary: Option<InterferenceField>,
    fields: Vec<InterferenceField>,
    corrector: CoherenceFeedbackCorrector,
    rng: ChaCha8Rng,
    mixer: Mixer,
    output_fields: BTreeMap<CoordKey, SoundField>,
    /// Samples consumed so far; drives field timestamps.
    samples_processed: u64,
    blocks_processed: u64,
    last_efficiency: f64,
}

impl DomePipeline {
    pub fn new(config: PipelineConfig) -> DomeResult<Self> {
        config.validate()?;

        let resonance =
            DomeResonanceModel::with_max_order(config.radius, config.height, config.max_mode_order)?;
        resonance.set_absorption_table(config.absorption.iter().copied())?;

        let corrector = CoherenceFeedbackCorrector::new(
            config.history_capacity,
            config.coherence_threshold,
            config.entanglement_strength,
            config.sample_rate,
        )?;

        info!(
            radius = config.radius,
            height = config.height,
            sample_rate = config.sample_rate,
            modes = resonance.eigenfrequencies().len(),
            "dome pipeline ready"
        );

        Ok(DomePipeline {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
            resonance,
            primary: None,
            fields: Vec::new(),
            corrector,
            mixer: Mixer::new(),
            output_fields: BTreeMap::new(),
            samples_processed: 0,
            blocks_processed: 0,
            last_efficiency: 1.0,
        })
    }

    /// Default configuration with the given geometry.
    pub fn with_geometry(radius: f64, height: f64, sample_rate: f64) -> DomeResult<Self> {
        Self::new(PipelineConfig::with_geometry(radius, height, sample_rate))
    }

    /// Run one block through all five stages. Output length equals input length.
    ///
    /// Non-finite samples are treated as silence.
    pub fn process_block(&mut self, input: &[f64]) -> Vec<f64> {
        if input.is_empty() {
            trace!("empty block, nothing to process");
            return Vec::new();
        }

        let bad = input.iter().filter(|s| !s.is_finite()).count();
        let sanitized;
        let input = if bad > 0 {
            warn!(bad, "non-finite samples zeroed");
            sanitized = input
                .iter()
                .map(|&s| if s.is_finite() { s } else { 0.0 })
                .collect::<Vec<f64>>();
            &sanitized[..]
        } else {
            input
        };

        // 1 + 2: per-sample fields into the primary interference field
        let fields = self.block_fields(input);
        let dt = 1.0 / self.config.sample_rate;
        let capacity = self.config.source_capacity;
        let primary = ensure_primary(&mut self.primary, &self.config);
        primary.extend_sources(fields);
        let dropped = primary.retain_latest(capacity);
        let changed = primary.advance_state(dt, &mut self.rng);
        trace!(sources = primary.source_count(), dropped, changed, "interference stage");

        // 3: resonance boost
        self.mixer.load(input);
        let gain = self.resonance_gain();
        self.mixer.scale(gain);
        trace!(gain, "resonance stage");

        // 4: coherence feedback
        let corrected = self.corrector.apply_feedback(self.mixer.buffer());
        self.mixer.replace(corrected);

        // 5: normalization
        let output = self.mixer.normalized_output();

        let input_energy: f64 = input.iter().map(|s| s * s).sum();
        let output_energy: f64 = output.iter().map(|s| s * s).sum();
        self.last_efficiency = if input_energy > 0.0 {
            output_energy / input_energy
        } else {
            1.0
        };
        self.samples_processed += input.len() as u64;
        self.blocks_processed += 1;
        trace!(
            block = self.blocks_processed,
            samples = output.len(),
            coherence = self.corrector.coherence_factor(),
            "block processed"
        );

        output
    }

    /// `f32` convenience over [`process_block`](Self::process_block).
    pub fn process_block_f32(&mut self, input: &[f32]) -> Vec<f32> {
        let wide: Vec<f64> = input.iter().map(|&s| s as f64).collect();
        self.process_block(&wide).into_iter().map(|s| s as f32).collect()
    }

    /// Product of `1 + 0.1·e^(−f/1000)` over every eigenfrequency `f` whose
    /// reverberation time exceeds 0.5 s.
    pub fn resonance_gain(&self) -> f64 {
        let mut boosted = 0;
        let gain = self
            .resonance
            .eigenfrequencies()
            .into_iter()
            .filter(|&f| self.resonance.reverb_time(f) > BOOST_REVERB_SECONDS)
            .inspect(|_| boosted += 1)
            .fold(1.0, |g, f| g * (1.0 + 0.1 * (-f / 1000.0).exp()));
        debug!(boosted, gain, "resonance boost");
        gain
    }

    /// Seconds of audio consumed so far.
    pub fn stream_time(&self) -> f64 {
        self.samples_processed as f64 / self.config.sample_rate
    }

    /// One field per sample: amplitude is the sample, frequency spreads
    /// linearly across the audible band, azimuth steps evenly around the
    /// dome's equator ring. Each field is stamped with its sample's stream time.
    fn block_fields(&self, input: &[f64]) -> Vec<SoundField> {
        let n = input.len();
        let span = AUDIBLE_MAX - AUDIBLE_MIN;
        let start = self.samples_processed;
        input
            .iter()
            .enumerate()
            .map(|(i, &sample)| {
                let frequency = if n > 1 {
                    AUDIBLE_MIN + span * i as f64 / (n - 1) as f64
                } else {
                    AUDIBLE_MIN
                };
                let position = SphericalCoordinate::new(
                    self.config.radius,
                    FRAC_PI_2,
                    TAU * i as f64 / n as f64,
                    0.0,
                );
                SoundField::new(
                    Complex64::new(sample, 0.0),
                    frequency,
                    position,
                    SourceState::Coherent,
                )
                .at_time((start + i as u64) as f64 / self.config.sample_rate)
            })
            .collect()
    }

    /// Build a unit-amplitude field at `position`, stamped with the current
    /// stream time.
    pub fn create_sound_field(
        &self,
        frequency: f64,
        position: SphericalCoordinate,
        state: SourceState,
    ) -> DomeResult<SoundField> {
        if !(frequency.is_finite() && frequency > 0.0) {
            return Err(DomeError::InvalidParameter(format!(
                "frequency must be finite and > 0, got {frequency}"
            )));
        }
        Ok(SoundField::new(
            Complex64::new(1.0, 0.0),
            frequency,
            position.normalized(),
            state,
        )
        .at_time(self.stream_time()))
    }

    /// Feed a single field: it becomes the output field for its position
    /// and a source of the primary interference field.
    ///
    /// At most `source_capacity` positions are tracked; a new position evicts
    /// the one with the oldest timestamp.
    pub fn process_sound_field(&mut self, field: SoundField) {
        let capacity = self.config.source_capacity;
        let key = field.position.key();
        if !self.output_fields.contains_key(&key) && self.output_fields.len() >= capacity {
            let oldest = self
                .output_fields
                .iter()
                .min_by(|a, b| a.1.timestamp.total_cmp(&b.1.timestamp))
                .map(|(k, _)| *k);
            if let Some(oldest) = oldest {
                self.output_fields.remove(&oldest);
            }
        }
        self.output_fields.insert(key, field.clone());
        let primary = ensure_primary(&mut self.primary, &self.config);
        primary.add_source(field);
        primary.retain_latest(capacity);
    }

    /// Latest field per position, ordered by position.
    pub fn output_fields(&self) -> Vec<SoundField> {
        self.output_fields.values().cloned().collect()
    }

    /// Forget every output field. Returns how many were dropped.
    pub fn clear_output_fields(&mut self) -> usize {
        let dropped = self.output_fields.len();
        self.output_fields.clear();
        dropped
    }

    /// Combined amplitude of every owned field at `position`.
    pub fn interference_at(&self, position: &SphericalCoordinate, time: f64) -> Complex64 {
        self.all_fields()
            .map(|f| f.interference_at(position, time))
            .sum()
    }

    /// Advance source states of every field outside a block pass.
    pub fn update(&mut self, dt: f64) -> usize {
        let rng = &mut self.rng;
        self.primary
            .iter()
            .chain(self.fields.iter())
            .map(|f| f.advance_state(dt, rng))
            .sum()
    }

    /// Entangle two sources of the primary field.
    pub fn entangle_sources(&self, a: usize, b: usize) -> bool {
        self.primary.as_ref().is_some_and(|p| p.entangle(a, b))
    }

    pub fn add_interference_field(&mut self, field: InterferenceField) {
        self.fields.push(field);
    }

    /// Remove an added field; out of range is a no-op.
    pub fn remove_interference_field(&mut self, index: usize) -> Option<InterferenceField> {
        if index < self.fields.len() {
            Some(self.fields.remove(index))
        } else {
            None
        }
    }

    /// Fields added with [`add_interference_field`](Self::add_interference_field).
    pub fn interference_fields(&self) -> &[InterferenceField] {
        &self.fields
    }

    pub fn primary(&self) -> Option<&InterferenceField> {
        self.primary.as_ref()
    }

    fn all_fields(&self) -> impl Iterator<Item = &InterferenceField> {
        self.primary.iter().chain(self.fields.iter())
    }

    /// Change dome geometry; on failure nothing changes.
    ///
    /// The primary field's zone and the ring new sources are placed on follow
    /// the new radius.
    pub fn update_geometry(&mut self, radius: f64, height: f64) -> DomeResult<()> {
        self.resonance.update_geometry(radius, height)?;
        self.config.radius = radius;
        self.config.height = height;
        if let Some(primary) = self.primary.as_mut() {
            primary.set_radius(radius);
        }
        debug!(radius, height, "dome geometry updated");
        Ok(())
    }

    pub fn set_absorption(&self, frequency: f64, coefficient: f64) -> DomeResult<()> {
        self.resonance.set_absorption(frequency, coefficient)
    }

    pub fn eigenfrequencies(&self) -> Vec<f64> {
        self.resonance.eigenfrequencies()
    }

    pub fn reverb_time(&self, frequency: f64) -> f64 {
        self.resonance.reverb_time(frequency)
    }

    pub fn coherence_factor(&self) -> f64 {
        self.corrector.coherence_factor()
    }

    pub fn coherence_level(&self) -> CoherenceLevel {
        self.corrector.level()
    }

    pub fn active_source_count(&self) -> usize {
        self.all_fields().map(|f| f.source_count()).sum()
    }

    /// Coherence level changes since the last call.
    pub fn drain_transitions(&self) -> Vec<CoherenceTransition> {
        self.corrector.drain_transitions()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            eigenfrequencies: self.eigenfrequencies(),
            coherence_factor: self.coherence_factor(),
            coherence_level: self.coherence_level(),
            active_sources: self.active_source_count(),
        }
    }

    pub fn statistics(&self) -> PipelineStatistics {
        let active_sources = self.active_source_count();
        let coherent: usize = self
            .all_fields()
            .map(|f| f.state_count(SourceState::Coherent))
            .sum();
        let entangled: usize = self.all_fields().map(|f| f.entangled_count()).sum();
        PipelineStatistics {
            active_fields: self.all_fields().count(),
            active_sources,
            entangled_pairs: entangled / 2,
            coherence_ratio: if active_sources > 0 {
                coherent as f64 / active_sources as f64
            } else {
                1.0
            },
            energy_efficiency: self.last_efficiency,
            blocks_processed: self.blocks_processed,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn corrector(&self) -> &CoherenceFeedbackCorrector {
        &self.corrector
    }
}

/// The primary field, created from `config` on first use.
fn ensure_primary<'a>(
    slot: &'a mut Option<InterferenceField>,
    config: &PipelineConfig,
) -> &'a InterferenceField {
    slot.get_or_insert_with(|| {
        debug!(field_type = ?config.field_type, "primary interference field created");
        InterferenceField::new(config.field_type, SphericalCoordinate::origin(), config.radius)
            .with_transitions(config.transitions)
    })
}
