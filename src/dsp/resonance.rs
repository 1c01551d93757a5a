//! Dome resonance: eigenmodes and reverberation of a spherical-cap cavity.
//!
//! Modes follow a spherical-harmonic approximation
//! `f(n) = c/2π · sqrt(n(n+1)) / r`, scaled by a height correction
//! `1 + 0.1·h/r`. Reverberation uses a Sabine estimate over the cap's volume
//! and surface area, with absorption linearly interpolated from a table of
//! measured coefficients.

use std::collections::BTreeMap;
use std::f64::consts::{PI, TAU};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{DomeError, DomeResult, check_geometry};

/// Speed of sound in air, m/s.
pub const SPEED_OF_SOUND: f64 = 343.0;
/// Lower edge of the audible band, Hz.
pub const AUDIBLE_MIN: f64 = 20.0;
/// Upper edge of the audible band, Hz.
pub const AUDIBLE_MAX: f64 = 20_000.0;
/// Default highest harmonic order `n` considered.
pub const DEFAULT_MAX_ORDER: u32 = 12;

/// Absorption used when no coefficients have been set.
const DEFAULT_ABSORPTION: f64 = 0.1;
/// Absorption floor for the Sabine denominator.
const ABSORPTION_EPSILON: f64 = 1e-6;
/// Relative tolerance for merging near-identical modes.
const MODE_TOLERANCE: f64 = 1e-9;
/// Targets closer than this to an existing mode are already covered.
const OPTIMIZE_TOLERANCE_HZ: f64 = 1.0;
/// Absorption table keys are stored in milli-Hz.
const FREQ_KEY_SCALE: f64 = 1000.0;

#[derive(Debug)]
struct ResonanceState {
    radius: f64,
    height: f64,
    max_order: u32,
    eigenfrequencies: Vec<f64>,
    /// Modes added by `optimize_frequency_response`; kept across geometry updates.
    extra_modes: Vec<f64>,
    absorption: BTreeMap<u64, f64>,
}

impl ResonanceState {
    fn recompute(&mut self) {
        self.eigenfrequencies =
            compute_modes(self.radius, self.height, self.max_order, &self.extra_modes);
        debug!(
            radius = self.radius,
            height = self.height,
            modes = self.eigenfrequencies.len(),
            "dome eigenfrequencies recomputed"
        );
    }
}

/// Acoustic model of the dome cavity.
///
/// All state sits behind one lock so geometry and absorption can be changed
/// from a control thread while the audio thread queries it.
#[derive(Debug)]
pub struct DomeResonanceModel {
    state: Mutex<ResonanceState>,
}

impl DomeResonanceModel {
    /// Create a model; fails on non-positive or non-finite geometry.
    pub fn new(radius: f64, height: f64) -> DomeResult<Self> {
        Self::with_max_order(radius, height, DEFAULT_MAX_ORDER)
    }

    /// Create a model considering harmonic orders `0..=max_order`.
    pub fn with_max_order(radius: f64, height: f64, max_order: u32) -> DomeResult<Self> {
        if let Err(e) = check_geometry(radius, height) {
            warn!(radius, height, "rejected dome geometry");
            return Err(e);
        }
        let mut state = ResonanceState {
            radius,
            height,
            max_order,
            eigenfrequencies: Vec::new(),
            extra_modes: Vec::new(),
            absorption: BTreeMap::new(),
        };
        state.recompute();
        Ok(DomeResonanceModel {
            state: Mutex::new(state),
        })
    }

    pub fn radius(&self) -> f64 {
        self.state.lock().radius
    }

    pub fn height(&self) -> f64 {
        self.state.lock().height
    }

    /// Cached eigenfrequencies, ascending and deduplicated, all within
    /// [20 Hz, 20 kHz].
    pub fn eigenfrequencies(&self) -> Vec<f64> {
        self.state.lock().eigenfrequencies.clone()
    }

    /// Change geometry and recompute the modes.
    ///
    /// On failure the previous geometry and modes are kept.
    pub fn update_geometry(&self, radius: f64, height: f64) -> DomeResult<()> {
        if let Err(e) = check_geometry(radius, height) {
            warn!(radius, height, "rejected dome geometry update");
            return Err(e);
        }
        let mut state = self.state.lock();
        state.radius = radius;
        state.height = height;
        state.recompute();
        Ok(())
    }

    /// Store an absorption coefficient (clamped to [0, 1]) at a frequency.
    pub fn set_absorption(&self, frequency: f64, coefficient: f64) -> DomeResult<()> {
        let key = freq_key(frequency)?;
        let coefficient = clamp_coefficient(coefficient)?;
        self.state.lock().absorption.insert(key, coefficient);
        Ok(())
    }

    /// Replace the whole absorption table.
    ///
    /// The table is validated up front; nothing changes if any entry is bad.
    pub fn set_absorption_table<I>(&self, table: I) -> DomeResult<()>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut fresh = BTreeMap::new();
        for (frequency, coefficient) in table {
            fresh.insert(freq_key(frequency)?, clamp_coefficient(coefficient)?);
        }
        self.state.lock().absorption = fresh;
        Ok(())
    }

    /// Absorption at `frequency`, linearly interpolated between the two
    /// bracketing table entries and clamped to the nearest endpoint outside
    /// the table.
    pub fn absorption_at(&self, frequency: f64) -> f64 {
        let state = self.state.lock();
        interpolate_absorption(&state.absorption, frequency)
    }

    /// Enclosed air volume, m³.
    pub fn volume(&self) -> f64 {
        let state = self.state.lock();
        cap_volume(state.radius, state.height)
    }

    /// Interior surface area, m².
    pub fn surface_area(&self) -> f64 {
        let state = self.state.lock();
        cap_surface(state.radius, state.height)
    }

    /// Sabine reverberation time `0.161·V / (S·α(f))`, seconds.
    pub fn reverb_time(&self, frequency: f64) -> f64 {
        let state = self.state.lock();
        let alpha = interpolate_absorption(&state.absorption, frequency).max(ABSORPTION_EPSILON);
        0.161 * cap_volume(state.radius, state.height)
            / (cap_surface(state.radius, state.height) * alpha)
    }

    /// Add audible target frequencies that no current mode covers (within
    /// 1 Hz). Returns how many were added.
    pub fn optimize_frequency_response(&self, targets: &[f64]) -> usize {
        let mut state = self.state.lock();
        let mut added = 0;
        for &target in targets {
            if !(AUDIBLE_MIN..=AUDIBLE_MAX).contains(&target) {
                continue;
            }
            let covered = state
                .eigenfrequencies
                .iter()
                .chain(state.extra_modes.iter())
                .any(|&f| (f - target).abs() < OPTIMIZE_TOLERANCE_HZ);
            if !covered {
                state.extra_modes.push(target);
                added += 1;
            }
        }
        if added > 0 {
            state.recompute();
        }
        added
    }
}

fn freq_key(frequency: f64) -> DomeResult<u64> {
    if !frequency.is_finite() || frequency <= 0.0 {
        return Err(DomeError::InvalidParameter(format!(
            "absorption frequency must be finite and > 0, got {frequency}"
        )));
    }
    Ok((frequency * FREQ_KEY_SCALE).round() as u64)
}

fn clamp_coefficient(coefficient: f64) -> DomeResult<f64> {
    if coefficient.is_nan() {
        return Err(DomeError::InvalidParameter(
            "absorption coefficient is NaN".to_string(),
        ));
    }
    Ok(coefficient.clamp(0.0, 1.0))
}

fn interpolate_absorption(table: &BTreeMap<u64, f64>, frequency: f64) -> f64 {
    if table.is_empty() {
        return DEFAULT_ABSORPTION;
    }
    let key = if frequency.is_finite() && frequency > 0.0 {
        (frequency * FREQ_KEY_SCALE).round() as u64
    } else {
        0
    };

    let below = table.range(..=key).next_back();
    let above = table.range(key..).next();
    match (below, above) {
        (Some((&k0, &a0)), Some((&k1, &a1))) => {
            if k1 == k0 {
                return a0;
            }
            let t = (key - k0) as f64 / (k1 - k0) as f64;
            a0 + (a1 - a0) * t
        }
        (Some((_, &a)), None) | (None, Some((_, &a))) => a,
        (None, None) => DEFAULT_ABSORPTION,
    }
}

/// Spherical-harmonic modes for orders `0..=max_order`, height-corrected,
/// restricted to the audible band, merged with `extra`, sorted and deduplicated.
///
/// `f(n)` does not depend on the azimuthal index `m`, so the `n+1`
/// degenerate modes of each order collapse into one entry.
fn compute_modes(radius: f64, height: f64, max_order: u32, extra: &[f64]) -> Vec<f64> {
    let correction = 1.0 + 0.1 * (height / radius);
    // f(n) grows with n, so stop at the first order above the band
    let mut modes: Vec<f64> = (0..=max_order)
        .map(|n| {
            let n = n as f64;
            SPEED_OF_SOUND / TAU * (n * (n + 1.0)).sqrt() / radius * correction
        })
        .take_while(|&f| f <= AUDIBLE_MAX)
        .chain(extra.iter().copied())
        .filter(|f| (AUDIBLE_MIN..=AUDIBLE_MAX).contains(f))
        .collect();

    modes.sort_by(|a, b| a.total_cmp(b));
    modes.dedup_by(|a, b| (*a - *b).abs() <= MODE_TOLERANCE * b.abs().max(1.0));
    modes
}

/// Hemisphere when `h >= r`, spherical segment otherwise.
fn cap_volume(radius: f64, height: f64) -> f64 {
    if height >= radius {
        2.0 / 3.0 * PI * radius.powi(3)
    } else {
        PI * height * height * (3.0 * radius - height) / 3.0
    }
}

fn cap_surface(radius: f64, height: f64) -> f64 {
    if height >= radius {
        TAU * radius * radius
    } else {
        TAU * radius * height
    }
}
