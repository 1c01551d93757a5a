//! Mixer: the pipeline's working buffer and its peak-normalized output.

/// Peak level of a normalized block.
pub const TARGET_PEAK: f64 = 0.95;

/// Working buffer for one processing pass.
///
/// Cleared at the start of every block; stages scale or replace it in place
/// and the final stage reads it back peak-normalized.
#[derive(Debug, Clone, Default)]
pub struct Mixer {
    buffer: Vec<f64>,
}

impl Mixer {
    pub fn new() -> Self {
        Mixer { buffer: Vec::new() }
    }

    /// Reset the buffer and fill it from `input`.
    pub fn load(&mut self, input: &[f64]) {
        self.buffer.clear();
        self.buffer.extend_from_slice(input);
    }

    /// Multiply every sample by `gain`.
    pub fn scale(&mut self, gain: f64) {
        for s in &mut self.buffer {
            *s *= gain;
        }
    }

    /// Swap in a processed block of the same length.
    pub fn replace(&mut self, block: Vec<f64>) {
        debug_assert_eq!(block.len(), self.buffer.len());
        self.buffer = block;
    }

    pub fn buffer(&self) -> &[f64] {
        &self.buffer
    }

    /// Largest absolute sample.
    pub fn peak(&self) -> f64 {
        peak(&self.buffer)
    }

    /// Buffer scaled so its peak is [`TARGET_PEAK`]. A silent buffer is
    /// returned unchanged.
    pub fn normalized_output(&self) -> Vec<f64> {
        normalize(&self.buffer, TARGET_PEAK)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

fn peak(samples: &[f64]) -> f64 {
    samples.iter().fold(0.0_f64, |m, &s| m.max(s.abs()))
}

/// Scale `samples` to peak at `target`; rounding never pushes a sample past it.
///
/// Non-finite samples are zeroed and ignored when finding the peak. A block
/// with no finite non-zero sample comes back as silence.
pub fn normalize(samples: &[f64], target: f64) -> Vec<f64> {
    let finite: Vec<f64> = samples
        .iter()
        .map(|&s| if s.is_finite() { s } else { 0.0 })
        .collect();
    let max = peak(&finite);
    if max == 0.0 {
        return finite;
    }
    let scale = target / max;
    finite
        .into_iter()
        .map(|s| (s * scale).clamp(-target, target))
        .collect()
}
