//! Sound field snapshots, one point source at one instant.

use std::f64::consts::TAU;
use std::fmt;
use std::sync::Arc;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::coord::SphericalCoordinate;

/// Per-source coherence state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Coherent,
    Superposition,
    Entangled,
    Collapsed,
}

/// Continuous waveform over (radius, θ, φ, time).
pub type Waveform = Arc<dyn Fn(f64, f64, f64, f64) -> Complex64 + Send + Sync>;

/// An immutable point-source snapshot.
///
/// Containers replace stored copies rather than mutating them in place.
#[derive(Clone)]
pub struct SoundField {
    pub amplitude: Complex64,
    /// Phase in radians.
    pub phase: f64,
    /// Frequency in Hz, > 0.
    pub frequency: f64,
    pub state: SourceState,
    pub position: SphericalCoordinate,
    /// Capture time in seconds on the owning stream's sample clock.
    pub timestamp: f64,
    pub waveform: Option<Waveform>,
}

impl SoundField {
    /// Create a field at stream time zero; the phase starts at `arg(amplitude)`.
    pub fn new(
        amplitude: Complex64,
        frequency: f64,
        position: SphericalCoordinate,
        state: SourceState,
    ) -> Self {
        SoundField {
            amplitude,
            phase: amplitude.arg(),
            frequency,
            state,
            position,
            timestamp: 0.0,
            waveform: None,
        }
    }

    /// Stamp the capture time, in seconds of stream time.
    pub fn at_time(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Attach a continuous waveform.
    pub fn with_waveform<F>(mut self, waveform: F) -> Self
    where
        F: Fn(f64, f64, f64, f64) -> Complex64 + Send + Sync + 'static,
    {
        self.waveform = Some(Arc::new(waveform));
        self
    }

    /// Copy with a different state.
    pub fn with_state(&self, state: SourceState) -> Self {
        SoundField {
            state,
            ..self.clone()
        }
    }

    /// Evaluate the field at its own position.
    ///
    /// Without a waveform this is a plain rotating phasor:
    /// `|amplitude| · e^{i(2πft + phase)}`.
    pub fn sample_waveform(&self, time: f64) -> Complex64 {
        match &self.waveform {
            Some(w) => w(
                self.position.radius,
                self.position.theta,
                self.position.phi,
                time,
            ),
            None => Complex64::from_polar(
                self.amplitude.norm(),
                TAU * self.frequency * time + self.phase,
            ),
        }
    }

    /// |amplitude|²
    pub fn energy(&self) -> f64 {
        self.amplitude.norm_sqr()
    }
}

impl fmt::Debug for SoundField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoundField")
            .field("amplitude", &self.amplitude)
            .field("phase", &self.phase)
            .field("frequency", &self.frequency)
            .field("state", &self.state)
            .field("position", &self.position)
            .field("timestamp", &self.timestamp)
            .field("waveform", &self.waveform.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn phase_follows_amplitude() {
        let f = SoundField::new(
            Complex64::new(0.0, 2.0),
            440.0,
            SphericalCoordinate::origin(),
            SourceState::Coherent,
        );
        assert!((f.phase - FRAC_PI_2).abs() < 1e-12);
        assert!((f.energy() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn default_waveform_is_phasor() {
        let f = SoundField::new(
            Complex64::new(1.0, 0.0),
            1.0,
            SphericalCoordinate::origin(),
            SourceState::Coherent,
        );
        // quarter period of a 1 Hz phasor
        let v = f.sample_waveform(0.25);
        assert!(v.re.abs() < 1e-12);
        assert!((v.im - 1.0).abs() < 1e-12);
    }

    #[test]
    fn custom_waveform_sees_position() {
        let pos = SphericalCoordinate::new(2.0, 0.5, 1.0, 0.0);
        let f = SoundField::new(Complex64::new(1.0, 0.0), 100.0, pos, SourceState::Coherent)
            .with_waveform(|r, _theta, phi, t| Complex64::new(r * t, phi));
        let v = f.sample_waveform(3.0);
        assert_eq!(v, Complex64::new(6.0, 1.0));
        assert!(format!("{f:?}").contains("waveform: true"));
    }

    #[test]
    fn with_state_keeps_everything_else() {
        let f = SoundField::new(
            Complex64::new(0.5, 0.5),
            220.0,
            SphericalCoordinate::new(1.0, 1.0, 1.0, 1.0),
            SourceState::Coherent,
        );
        let g = f.with_state(SourceState::Collapsed);
        assert_eq!(g.state, SourceState::Collapsed);
        assert_eq!(g.amplitude, f.amplitude);
        assert_eq!(g.position, f.position);
        assert_eq!(g.timestamp, f.timestamp);
    }

    #[test]
    fn timestamp_is_stream_time() {
        let f = SoundField::new(
            Complex64::new(1.0, 0.0),
            440.0,
            SphericalCoordinate::origin(),
            SourceState::Coherent,
        );
        assert_eq!(f.timestamp, 0.0);
        let g = f.at_time(1.5).with_state(SourceState::Entangled);
        assert_eq!(g.timestamp, 1.5);
    }
}
