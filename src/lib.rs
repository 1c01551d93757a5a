pub mod config;
pub mod coord;
pub mod dsp;
pub mod error;
pub mod field;
pub mod telemetry;

use crate::config::PipelineConfig;
use crate::dsp::pipeline::DomePipeline;
use crate::dsp::resonance::DomeResonanceModel;
use crate::error::DomeError;
use wasm_bindgen::prelude::*;

pub use crate::coord::SphericalCoordinate;
pub use crate::dsp::coherence::{CoherenceFeedbackCorrector, CoherenceLevel};
pub use crate::dsp::interference::{FieldType, InterferenceField};
pub use crate::error::DomeResult;
pub use crate::field::{SoundField, SourceState};

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

fn to_js(e: DomeError) -> JsValue {
    JsValue::from_str(&format!("{e}"))
}

/// WASM-exposed: return the domefield-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// WASM-exposed: run a single block through a fresh pipeline.
/// Returns the normalized block for AudioWorklet playback.
#[wasm_bindgen]
pub fn process_block(
    samples: Vec<f32>,
    radius: f64,
    height: f64,
    sample_rate: f64,
) -> Result<Vec<f32>, JsValue> {
    let mut pipeline = DomePipeline::with_geometry(radius, height, sample_rate).map_err(to_js)?;
    Ok(pipeline.process_block_f32(&samples))
}

/// WASM-exposed: eigenfrequencies of a dome with the given geometry.
#[wasm_bindgen]
pub fn dome_eigenfrequencies(radius: f64, height: f64) -> Result<Vec<f64>, JsValue> {
    let model = DomeResonanceModel::new(radius, height).map_err(to_js)?;
    Ok(model.eigenfrequencies())
}

/// WASM-exposed: a long-lived pipeline that keeps its interference sources
/// and coherence history between blocks.
#[wasm_bindgen]
pub struct DomeProcessor {
    inner: DomePipeline,
}

#[wasm_bindgen]
impl DomeProcessor {
    #[wasm_bindgen(constructor)]
    pub fn new(radius: f64, height: f64, sample_rate: f64) -> Result<DomeProcessor, JsValue> {
        let inner = DomePipeline::with_geometry(radius, height, sample_rate).map_err(to_js)?;
        Ok(DomeProcessor { inner })
    }

    /// Build from a JSON `PipelineConfig`; omitted fields take defaults.
    #[wasm_bindgen(js_name = fromConfig)]
    pub fn from_config(json: &str) -> Result<DomeProcessor, JsValue> {
        let config = PipelineConfig::from_json(json).map_err(to_js)?;
        let inner = DomePipeline::new(config).map_err(to_js)?;
        Ok(DomeProcessor { inner })
    }

    pub fn process(&mut self, samples: Vec<f32>) -> Vec<f32> {
        self.inner.process_block_f32(&samples)
    }

    #[wasm_bindgen(js_name = updateGeometry)]
    pub fn update_geometry(&mut self, radius: f64, height: f64) -> Result<(), JsValue> {
        self.inner.update_geometry(radius, height).map_err(to_js)
    }

    #[wasm_bindgen(js_name = setAbsorption)]
    pub fn set_absorption(&self, frequency: f64, coefficient: f64) -> Result<(), JsValue> {
        self.inner.set_absorption(frequency, coefficient).map_err(to_js)
    }

    /// Eigenfrequencies, coherence and source count as a plain JS object.
    pub fn diagnostics(&self) -> Result<JsValue, JsValue> {
        serde_wasm_bindgen::to_value(&self.inner.diagnostics())
            .map_err(|e| JsValue::from_str(&format!("{e}")))
    }

    /// Lifetime counters as a plain JS object.
    pub fn statistics(&self) -> Result<JsValue, JsValue> {
        serde_wasm_bindgen::to_value(&self.inner.statistics())
            .map_err(|e| JsValue::from_str(&format!("{e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_matches_manifest() {
        assert_eq!(core_version(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn one_shot_block_is_normalized() {
        let out = process_block(vec![2.0; 1024], 10.0, 5.0, 44_100.0).unwrap();
        assert_eq!(out.len(), 1024);
        assert!(out.iter().all(|s| s.abs() <= 0.95));
    }

    #[test]
    fn eigenfrequencies_exposed() {
        let modes = dome_eigenfrequencies(5.0, 3.0).unwrap();
        assert!(!modes.is_empty());
    }

    #[test]
    fn processor_keeps_state_between_blocks() {
        let mut p = DomeProcessor::new(10.0, 5.0, 44_100.0).unwrap();
        p.process(vec![0.5; 32]);
        p.process(vec![0.5; 32]);
        assert_eq!(p.inner.active_source_count(), 64);
    }
}
