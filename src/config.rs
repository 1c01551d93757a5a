use serde::{Deserialize, Serialize};

use crate::dsp::interference::{FieldType, TransitionProbabilities};
use crate::dsp::resonance::DEFAULT_MAX_ORDER;
use crate::error::{DomeError, DomeResult, check_geometry};

/// Runtime configuration for a [`DomePipeline`](crate::dsp::pipeline::DomePipeline).
///
/// Every field has a default, so a JSON document only needs to name what
/// it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Dome radius in metres.
    pub radius: f64,
    /// Dome height in metres.
    pub height: f64,
    /// Audio sample rate in Hz.
    pub sample_rate: f64,
    /// Highest spherical-harmonic order used for eigenfrequencies.
    pub max_mode_order: u32,
    /// Coherence above this is classified coherent. Clamped to [0, 1].
    pub coherence_threshold: f64,
    /// Weight of the sinusoidal coherence correction. Clamped to [0, 1].
    pub entanglement_strength: f64,
    /// Samples kept in the coherence history ring.
    pub history_capacity: usize,
    /// Shaping of the primary interference field.
    pub field_type: FieldType,
    /// Sources kept in the primary interference field across blocks.
    pub source_capacity: usize,
    /// Seed for the source state walk.
    pub seed: u64,
    pub transitions: TransitionProbabilities,
    /// Initial absorption table as (frequency Hz, coefficient) pairs.
    pub absorption: Vec<(f64, f64)>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            radius: 10.0,
            height: 5.0,
            sample_rate: 44_100.0,
            max_mode_order: DEFAULT_MAX_ORDER,
            coherence_threshold: 0.7,
            entanglement_strength: 0.5,
            history_capacity: 1024,
            field_type: FieldType::Constructive,
            source_capacity: 4096,
            seed: 0x5EED,
            transitions: TransitionProbabilities::default(),
            absorption: vec![(20.0, 0.1), (200.0, 0.3), (2_000.0, 0.5), (20_000.0, 0.7)],
        }
    }
}

impl PipelineConfig {
    /// Default configuration with the given geometry and sample rate.
    pub fn with_geometry(radius: f64, height: f64, sample_rate: f64) -> Self {
        PipelineConfig {
            radius,
            height,
            sample_rate,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> DomeResult<()> {
        check_geometry(self.radius, self.height)?;
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(DomeError::Config(format!(
                "sample_rate must be finite and > 0, got {}",
                self.sample_rate
            )));
        }
        if self.history_capacity == 0 {
            return Err(DomeError::Config(
                "history_capacity must be > 0".to_string(),
            ));
        }
        if self.source_capacity == 0 {
            return Err(DomeError::Config("source_capacity must be > 0".to_string()));
        }
        self.transitions
            .validate()
            .map_err(|e| DomeError::Config(format!("transitions: {e}")))?;
        for &(frequency, coefficient) in &self.absorption {
            if !(frequency.is_finite() && frequency > 0.0) || coefficient.is_nan() {
                return Err(DomeError::Config(format!(
                    "bad absorption entry ({frequency}, {coefficient})"
                )));
            }
        }
        Ok(())
    }

    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> DomeResult<Self> {
        let config: PipelineConfig = serde_json::from_str(json)
            .map_err(|e| DomeError::Config(format!("JSON parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> DomeResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| DomeError::Config(format!("JSON encode error: {e}")))
    }
}
