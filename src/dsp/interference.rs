//! Interference field: phase-delay superposition of point sources.
//!
//! Each source contributes `amplitude · e^{i·2πf(t − d/c)} / (1 + 0.1·d)` at
//! an observation point `d` metres away. The summed signal is then shaped by
//! the field's [`FieldType`].

use std::f64::consts::TAU;

use num_complex::Complex64;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::coord::{SphericalCoordinate, wrap_azimuth};
use crate::dsp::resonance::SPEED_OF_SOUND;
use crate::error::{DomeError, DomeResult};
use crate::field::{SoundField, SourceState};

/// How the summed signal is shaped. Fixed for the lifetime of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    Constructive,
    Destructive,
    PhaseModulated,
    AmplitudeModulated,
    QuantumEntangled,
}

impl FieldType {
    /// Shape a summed signal; `φ` below is the signal's own phase.
    pub fn apply(self, signal: Complex64) -> Complex64 {
        let phase = signal.arg();
        match self {
            FieldType::Constructive => signal,
            FieldType::Destructive => -signal,
            // rotate by sin(2φ)
            FieldType::PhaseModulated => signal * Complex64::from_polar(1.0, (2.0 * phase).sin()),
            // scale by (1 + sin φ) / 2
            FieldType::AmplitudeModulated => signal * ((1.0 + phase.sin()) / 2.0),
            // scale by |s|·cos φ
            FieldType::QuantumEntangled => signal * (signal.norm() * phase.cos()),
        }
    }
}

/// Per-call probabilities of the source state walk.
///
/// Coherent sources never change on their own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionProbabilities {
    /// Superposition → Collapsed.
    pub superposition_collapse: f64,
    /// Entangled → Coherent.
    pub entangled_release: f64,
    /// Collapsed → Coherent.
    pub collapsed_recovery: f64,
}

impl Default for TransitionProbabilities {
    fn default() -> Self {
        TransitionProbabilities {
            superposition_collapse: 0.05,
            entangled_release: 0.02,
            collapsed_recovery: 0.10,
        }
    }
}

impl TransitionProbabilities {
    pub fn validate(&self) -> DomeResult<()> {
        for (name, p) in [
            ("superposition_collapse", self.superposition_collapse),
            ("entangled_release", self.entangled_release),
            ("collapsed_recovery", self.collapsed_recovery),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(DomeError::InvalidParameter(format!(
                    "{name} must be in [0, 1], got {p}"
                )));
            }
        }
        Ok(())
    }

    /// Probability of leaving `state` in one step.
    fn leave(&self, state: SourceState) -> Option<(f64, SourceState)> {
        match state {
            SourceState::Coherent => None,
            SourceState::Superposition => {
                Some((self.superposition_collapse, SourceState::Collapsed))
            }
            SourceState::Entangled => Some((self.entangled_release, SourceState::Coherent)),
            SourceState::Collapsed => Some((self.collapsed_recovery, SourceState::Coherent)),
        }
    }
}

/// A zone of influence combining any number of point sources.
#[derive(Debug)]
pub struct InterferenceField {
    field_type: FieldType,
    center: SphericalCoordinate,
    radius: f64,
    transitions: TransitionProbabilities,
    sources: Mutex<Vec<SoundField>>,
}

impl InterferenceField {
    pub fn new(field_type: FieldType, center: SphericalCoordinate, radius: f64) -> Self {
        InterferenceField {
            field_type,
            center,
            radius,
            transitions: TransitionProbabilities::default(),
            sources: Mutex::new(Vec::new()),
        }
    }

    /// Use custom state-walk probabilities; each is clamped to [0, 1].
    pub fn with_transitions(mut self, transitions: TransitionProbabilities) -> Self {
        let clamp = |p: f64| if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
        self.transitions = TransitionProbabilities {
            superposition_collapse: clamp(transitions.superposition_collapse),
            entangled_release: clamp(transitions.entangled_release),
            collapsed_recovery: clamp(transitions.collapsed_recovery),
        };
        self
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn center(&self) -> SphericalCoordinate {
        self.center
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Resize the zone of influence around the same center.
    pub fn set_radius(&mut self, radius: f64) {
        self.radius = radius;
    }

    /// Whether `position` lies inside the zone of influence.
    pub fn contains(&self, position: &SphericalCoordinate) -> bool {
        self.center.distance_to(position) <= self.radius
    }

    /// Append a source. No deduplication.
    pub fn add_source(&self, field: SoundField) {
        self.sources.lock().push(field);
    }

    /// Append many sources under a single lock.
    pub fn extend_sources<I>(&self, fields: I)
    where
        I: IntoIterator<Item = SoundField>,
    {
        self.sources.lock().extend(fields);
    }

    /// Remove the source at `index`. Out of range is a no-op returning `None`.
    pub fn remove_source(&self, index: usize) -> Option<SoundField> {
        let mut sources = self.sources.lock();
        if index < sources.len() {
            Some(sources.remove(index))
        } else {
            None
        }
    }

    pub fn clear_sources(&self) {
        self.sources.lock().clear();
    }

    /// Keep only the newest `keep` sources.
    pub fn retain_latest(&self, keep: usize) -> usize {
        let mut sources = self.sources.lock();
        let excess = sources.len().saturating_sub(keep);
        sources.drain(..excess);
        excess
    }

    pub fn source_count(&self) -> usize {
        self.sources.lock().len()
    }

    pub fn source(&self, index: usize) -> Option<SoundField> {
        self.sources.lock().get(index).cloned()
    }

    /// Snapshot of all sources.
    pub fn sources(&self) -> Vec<SoundField> {
        self.sources.lock().clone()
    }

    pub fn state_count(&self, state: SourceState) -> usize {
        self.sources.lock().iter().filter(|s| s.state == state).count()
    }

    pub fn entangled_count(&self) -> usize {
        self.state_count(SourceState::Entangled)
    }

    /// Combined complex amplitude at `position` and `time` (seconds).
    ///
    /// Zero when the field has no sources.
    pub fn interference_at(&self, position: &SphericalCoordinate, time: f64) -> Complex64 {
        let sources = self.sources.lock();
        if sources.is_empty() {
            return Complex64::new(0.0, 0.0);
        }

        let mut total = Complex64::new(0.0, 0.0);
        for source in sources.iter() {
            let distance = source.position.distance_to(position);
            let phase = TAU * source.frequency * (time - distance / SPEED_OF_SOUND);
            let attenuation = 1.0 / (1.0 + 0.1 * distance);
            total += source.amplitude * Complex64::from_polar(attenuation, phase);
        }

        self.field_type.apply(total)
    }

    /// Superpose this field's own sources.
    pub fn superposition(&self) -> Option<SoundField> {
        let sources = self.sources.lock();
        Self::superpose(&sources)
    }

    /// Collapse several fields into one synthetic source.
    ///
    /// Amplitude and frequency are arithmetic means; the position is the
    /// amplitude-weighted mean (uniform weights if every amplitude is zero,
    /// circular mean for the azimuth). Returns `None` for an empty slice.
    pub fn superpose(fields: &[SoundField]) -> Option<SoundField> {
        if fields.is_empty() {
            return None;
        }
        let n = fields.len() as f64;

        let amplitude = fields.iter().map(|f| f.amplitude).sum::<Complex64>() / n;
        let frequency = fields.iter().map(|f| f.frequency).sum::<f64>() / n;

        let total_weight: f64 = fields.iter().map(|f| f.amplitude.norm()).sum();
        let weight = |f: &SoundField| {
            if total_weight > 0.0 {
                f.amplitude.norm() / total_weight
            } else {
                1.0 / n
            }
        };

        let mut position = SphericalCoordinate::origin();
        let (mut sin_sum, mut cos_sum) = (0.0, 0.0);
        for f in fields {
            let w = weight(f);
            position.radius += w * f.position.radius;
            position.theta += w * f.position.theta;
            position.height += w * f.position.height;
            let (s, c) = f.position.phi.sin_cos();
            sin_sum += w * s;
            cos_sum += w * c;
        }
        position.phi = wrap_azimuth(sin_sum.atan2(cos_sum));

        Some(SoundField::new(
            amplitude,
            frequency,
            position,
            SourceState::Superposition,
        ))
    }

    /// Random walk of every source's state.
    ///
    /// Any positive `dt` uses the same per-call probabilities; a non-positive
    /// or non-finite `dt` leaves all states untouched. Returns how many
    /// sources changed state.
    pub fn advance_state<R: Rng + ?Sized>(&self, dt: f64, rng: &mut R) -> usize {
        if !(dt.is_finite() && dt > 0.0) {
            return 0;
        }
        let mut sources = self.sources.lock();
        let mut changed = 0;
        for source in sources.iter_mut() {
            if let Some((p, next)) = self.transitions.leave(source.state) {
                if rng.gen_bool(p) {
                    *source = source.with_state(next);
                    changed += 1;
                }
            }
        }
        trace!(dt, changed, sources = sources.len(), "advanced source states");
        changed
    }

    /// Couple two sources: both become entangled and share the mean of
    /// their phases. Equal or out-of-range indices are a no-op.
    pub fn entangle(&self, a: usize, b: usize) -> bool {
        let mut sources = self.sources.lock();
        if a == b || a >= sources.len() || b >= sources.len() {
            return false;
        }
        let phase = (sources[a].phase + sources[b].phase) / 2.0;
        for i in [a, b] {
            let mut next = sources[i].with_state(SourceState::Entangled);
            next.phase = phase;
            sources[i] = next;
        }
        true
    }
}
