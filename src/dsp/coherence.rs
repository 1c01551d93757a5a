//! Coherence feedback: rolling coherence estimate and bounded gain correction.
//!
//! The corrector keeps a ring of recently seen samples, measures their lag-1
//! autocorrelation, classifies the result against a threshold and scales the
//! next block accordingly. Level changes are queued as [`CoherenceTransition`]
//! records for whoever polls [`CoherenceFeedbackCorrector::drain_transitions`].

use std::collections::VecDeque;
use std::f64::consts::TAU;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{DomeError, DomeResult};

/// Pending transitions beyond this are dropped oldest-first.
const MAX_PENDING_TRANSITIONS: usize = 256;

/// Coherence classification of the recent signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoherenceLevel {
    Coherent,
    PartiallyCoherent,
    Incoherent,
}

impl CoherenceLevel {
    /// `> threshold` coherent, `> threshold/2` partial, otherwise incoherent.
    pub fn classify(coherence: f64, threshold: f64) -> Self {
        if coherence > threshold {
            CoherenceLevel::Coherent
        } else if coherence > 0.5 * threshold {
            CoherenceLevel::PartiallyCoherent
        } else {
            CoherenceLevel::Incoherent
        }
    }

    /// Per-sample gain for a given coherence.
    pub fn gain(self, coherence: f64) -> f64 {
        match self {
            CoherenceLevel::Coherent => 1.0 + coherence * 0.1,
            CoherenceLevel::PartiallyCoherent => 1.0 + coherence * 0.05,
            CoherenceLevel::Incoherent => 0.8 + coherence * 0.2,
        }
    }
}

/// A recorded change of coherence level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoherenceTransition {
    pub from: CoherenceLevel,
    pub to: CoherenceLevel,
    /// Coherence value that triggered the change.
    pub coherence: f64,
}

/// Coherence of a real signal in [0, 1].
///
/// Lag-1 autocovariance normalized by the variance, as a magnitude. Signals
/// shorter than two samples, constant signals and signals with non-positive
/// variance are fully coherent. The result stays in [0, 1] for any input.
pub fn coherence(signal: &[f64]) -> f64 {
    let n = signal.len();
    if n < 2 || signal.iter().all(|&x| x == signal[0]) {
        return 1.0;
    }

    let mean = signal.iter().sum::<f64>() / n as f64;
    let variance = signal.iter().map(|&x| (x - mean) * (x - mean)).sum::<f64>() / n as f64;
    if !(variance > 0.0) {
        return 1.0;
    }

    let lag1 = signal
        .windows(2)
        .map(|w| (w[0] - mean) * (w[1] - mean))
        .sum::<f64>()
        / (n - 1) as f64;

    clamp_unit((lag1 / variance).abs())
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}

#[derive(Debug)]
struct CorrectorState {
    history: VecDeque<f64>,
    capacity: usize,
    threshold: f64,
    entanglement_strength: f64,
    sample_rate: f64,
    coherence: f64,
    level: CoherenceLevel,
    transitions: VecDeque<CoherenceTransition>,
}

impl CorrectorState {
    fn push_history(&mut self, samples: &[f64]) {
        for &s in samples {
            if self.history.len() == self.capacity {
                self.history.pop_front();
            }
            self.history.push_back(s);
        }
    }

    fn set_level(&mut self, coherence: f64) {
        self.coherence = coherence;
        let level = CoherenceLevel::classify(coherence, self.threshold);
        if level != self.level {
            debug!(from = ?self.level, to = ?level, coherence, "coherence level changed");
            if self.transitions.len() == MAX_PENDING_TRANSITIONS {
                self.transitions.pop_front();
            }
            self.transitions.push_back(CoherenceTransition {
                from: self.level,
                to: level,
                coherence,
            });
            self.level = level;
        }
    }
}

/// Rolling coherence estimator and corrector.
#[derive(Debug)]
pub struct CoherenceFeedbackCorrector {
    state: Mutex<CorrectorState>,
}

impl CoherenceFeedbackCorrector {
    /// Create a corrector with a history ring of `capacity` samples.
    ///
    /// `threshold` and `entanglement_strength` are clamped to [0, 1].
    pub fn new(
        capacity: usize,
        threshold: f64,
        entanglement_strength: f64,
        sample_rate: f64,
    ) -> DomeResult<Self> {
        if capacity == 0 {
            return Err(DomeError::InvalidParameter(
                "history capacity must be > 0".to_string(),
            ));
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(DomeError::InvalidParameter(format!(
                "sample rate must be finite and > 0, got {sample_rate}"
            )));
        }
        Ok(CoherenceFeedbackCorrector {
            state: Mutex::new(CorrectorState {
                history: VecDeque::with_capacity(capacity),
                capacity,
                threshold: clamp_unit(threshold),
                entanglement_strength: clamp_unit(entanglement_strength),
                sample_rate,
                coherence: 1.0,
                level: CoherenceLevel::Coherent,
                transitions: VecDeque::new(),
            }),
        })
    }

    /// Record `signal` into the history, update the coherence level and
    /// return the corrected block.
    ///
    /// Each sample becomes `x·gain(level) + sin(2π·i/sr·coherence)·0.01·strength`.
    /// Empty input yields an empty block. An all-zero block is returned as is:
    /// silence carries nothing to correct.
    pub fn apply_feedback(&self, signal: &[f64]) -> Vec<f64> {
        if signal.is_empty() {
            return Vec::new();
        }

        let mut state = self.state.lock();
        state.push_history(signal);
        let measured = coherence(state.history.make_contiguous());
        state.set_level(measured);

        if signal.iter().all(|&x| x == 0.0) {
            return signal.to_vec();
        }

        let gain = state.level.gain(measured);
        let step = TAU / state.sample_rate * measured;
        let strength = 0.01 * state.entanglement_strength;
        trace!(coherence = measured, level = ?state.level, gain, "coherence feedback applied");

        signal
            .iter()
            .enumerate()
            .map(|(i, &x)| x * gain + (step * i as f64).sin() * strength)
            .collect()
    }

    /// Most recent coherence value.
    pub fn coherence_factor(&self) -> f64 {
        self.state.lock().coherence
    }

    pub fn level(&self) -> CoherenceLevel {
        self.state.lock().level
    }

    pub fn is_coherent(&self) -> bool {
        self.level() == CoherenceLevel::Coherent
    }

    pub fn threshold(&self) -> f64 {
        self.state.lock().threshold
    }

    /// Set the threshold, clamped to [0, 1]. The level is reclassified
    /// against the current coherence.
    pub fn set_threshold(&self, threshold: f64) {
        let mut state = self.state.lock();
        state.threshold = clamp_unit(threshold);
        let current = state.coherence;
        state.set_level(current);
    }

    pub fn entanglement_strength(&self) -> f64 {
        self.state.lock().entanglement_strength
    }

    pub fn set_entanglement_strength(&self, strength: f64) {
        self.state.lock().entanglement_strength = clamp_unit(strength);
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }

    /// Snapshot of the history ring, oldest first.
    pub fn history(&self) -> Vec<f64> {
        self.state.lock().history.iter().copied().collect()
    }

    /// Take all queued level changes, oldest first.
    pub fn drain_transitions(&self) -> Vec<CoherenceTransition> {
        self.state.lock().transitions.drain(..).collect()
    }

    /// Forget the history; coherence returns to 1.0.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.history.clear();
        state.set_level(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corrector() -> CoherenceFeedbackCorrector {
        CoherenceFeedbackCorrector::new(64, 0.7, 0.5, 44_100.0).unwrap()
    }

    /// Period-4 square wave: lag-1 products cancel, so coherence is near 0.
    fn quadrature(len: usize) -> Vec<f64> {
        (0..len).map(|i| if i % 4 < 2 { 1.0 } else { -1.0 }).collect()
    }

    #[test]
    fn short_signals_fully_coherent() {
        assert_eq!(coherence(&[]), 1.0);
        assert_eq!(coherence(&[0.3]), 1.0);
    }

    #[test]
    fn constant_signal_exactly_one() {
        assert_eq!(coherence(&[0.1; 1000]), 1.0);
        assert_eq!(coherence(&[2.0; 3]), 1.0);
        assert_eq!(coherence(&[0.0; 16]), 1.0);
    }

    #[test]
    fn coherence_stays_in_unit_range() {
        let alternating: Vec<f64> = (0..100).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let c = coherence(&alternating);
        assert!(c > 0.95 && c <= 1.0, "got {c}");

        let slow_sine: Vec<f64> = (0..1000).map(|i| (i as f64 * 0.01).sin()).collect();
        let c = coherence(&slow_sine);
        assert!(c > 0.9 && c <= 1.0, "got {c}");

        let c = coherence(&quadrature(4096));
        assert!((0.0..0.2).contains(&c), "got {c}");
    }

    #[test]
    fn non_finite_input_stays_in_unit_range() {
        for signal in [
            vec![1.0, f64::INFINITY, 2.0, -1.0],
            vec![0.5, f64::NAN, -0.5],
            vec![f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY],
        ] {
            let c = coherence(&signal);
            assert!((0.0..=1.0).contains(&c), "got {c} for {signal:?}");
        }
    }

    #[test]
    fn level_classification() {
        assert_eq!(CoherenceLevel::classify(0.8, 0.7), CoherenceLevel::Coherent);
        assert_eq!(CoherenceLevel::classify(0.7, 0.7), CoherenceLevel::PartiallyCoherent);
        assert_eq!(CoherenceLevel::classify(0.4, 0.7), CoherenceLevel::PartiallyCoherent);
        assert_eq!(CoherenceLevel::classify(0.35, 0.7), CoherenceLevel::Incoherent);
    }

    #[test]
    fn gains_per_level() {
        assert!((CoherenceLevel::Coherent.gain(1.0) - 1.1).abs() < 1e-12);
        assert!((CoherenceLevel::PartiallyCoherent.gain(0.5) - 1.025).abs() < 1e-12);
        assert!((CoherenceLevel::Incoherent.gain(0.0) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn empty_block_round_trips() {
        let c = corrector();
        assert!(c.apply_feedback(&[]).is_empty());
        assert_eq!(c.history_len(), 0);
        assert!(c.drain_transitions().is_empty());
    }

    #[test]
    fn silent_block_passes_through() {
        let c = corrector();
        let out = c.apply_feedback(&[0.0; 32]);
        assert_eq!(out, vec![0.0; 32]);
        assert_eq!(c.history_len(), 32);
    }

    #[test]
    fn coherent_block_gets_gain_and_correction() {
        let c = corrector();
        let out = c.apply_feedback(&[0.5; 8]);
        assert_eq!(c.level(), CoherenceLevel::Coherent);
        assert_eq!(c.coherence_factor(), 1.0);
        // sample 0 has no sinusoidal correction
        assert!((out[0] - 0.55).abs() < 1e-12);
        let step = TAU / 44_100.0;
        for (i, &y) in out.iter().enumerate() {
            let expected = 0.5 * 1.1 + (step * i as f64).sin() * 0.005;
            assert!((y - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn incoherent_block_is_attenuated_and_reported() {
        let c = corrector();
        let input = quadrature(64);
        let out = c.apply_feedback(&input);
        assert_eq!(c.level(), CoherenceLevel::Incoherent);
        let coh = c.coherence_factor();
        let gain = 0.8 + coh * 0.2;
        assert!((out[0] - input[0] * gain).abs() < 1e-12);

        let transitions = c.drain_transitions();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].from, CoherenceLevel::Coherent);
        assert_eq!(transitions[0].to, CoherenceLevel::Incoherent);
        assert!(c.drain_transitions().is_empty());
    }

    #[test]
    fn no_transition_when_level_holds() {
        let c = corrector();
        c.apply_feedback(&[1.0; 16]);
        c.apply_feedback(&[1.0; 16]);
        assert!(c.drain_transitions().is_empty());
    }

    #[test]
    fn history_is_a_bounded_ring() {
        let c = CoherenceFeedbackCorrector::new(4, 0.7, 0.0, 44_100.0).unwrap();
        c.apply_feedback(&[1.0, 2.0, 3.0]);
        c.apply_feedback(&[4.0, 5.0, 6.0]);
        assert_eq!(c.history(), vec![3.0, 4.0, 5.0, 6.0]);
        assert_eq!(c.capacity(), 4);
    }

    #[test]
    fn parameters_clamped() {
        let c = CoherenceFeedbackCorrector::new(8, 1.8, -0.2, 48_000.0).unwrap();
        assert_eq!(c.threshold(), 1.0);
        assert_eq!(c.entanglement_strength(), 0.0);
        c.set_threshold(-3.0);
        assert_eq!(c.threshold(), 0.0);
        c.set_entanglement_strength(2.0);
        assert_eq!(c.entanglement_strength(), 1.0);
    }

    #[test]
    fn constructor_validates() {
        assert!(CoherenceFeedbackCorrector::new(0, 0.7, 0.5, 44_100.0).is_err());
        assert!(CoherenceFeedbackCorrector::new(8, 0.7, 0.5, 0.0).is_err());
        assert!(CoherenceFeedbackCorrector::new(8, 0.7, 0.5, f64::NAN).is_err());
    }

    #[test]
    fn threshold_change_reclassifies() {
        let c = corrector();
        c.apply_feedback(&quadrature(64));
        assert_eq!(c.level(), CoherenceLevel::Incoherent);
        c.drain_transitions();
        c.set_threshold(0.0);
        assert_eq!(c.level(), CoherenceLevel::Coherent);
        assert_eq!(c.drain_transitions().len(), 1);
    }

    #[test]
    fn reset_restores_full_coherence() {
        let c = corrector();
        c.apply_feedback(&quadrature(64));
        c.reset();
        assert_eq!(c.history_len(), 0);
        assert_eq!(c.coherence_factor(), 1.0);
        assert!(c.is_coherent());
    }

    #[test]
    fn corrector_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CoherenceFeedbackCorrector>();
    }

    #[test]
    fn feedback_and_control_calls_interleave() {
        let c = corrector();
        let block = quadrature(32);
        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..500 {
                    let out = c.apply_feedback(&block);
                    assert_eq!(out.len(), block.len());
                    assert!(out.iter().all(|x| x.is_finite()));
                }
            });
            s.spawn(|| {
                for i in 0..500 {
                    c.set_threshold(if i % 2 == 0 { 0.2 } else { 0.9 });
                    c.set_entanglement_strength((i % 10) as f64 / 10.0);
                    let factor = c.coherence_factor();
                    assert!((0.0..=1.0).contains(&factor));
                    assert!(c.history_len() <= c.capacity());
                }
            });
        });
        assert_eq!(c.history_len(), c.capacity());
    }
}
