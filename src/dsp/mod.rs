//! DSP core: the dome signal path.
//!
//! All processing runs in Rust over `f64` blocks. The same code serves the
//! WASM bindings and native hosts.

pub mod coherence;
pub mod interference;
pub mod mixer;
pub mod pipeline;
pub mod resonance;
