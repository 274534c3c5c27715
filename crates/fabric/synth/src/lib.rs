//! Fabric Metric Synthesis
//!
//! Metric synthesis is an injected strategy. The fabric never bakes a
//! particular generator in:
//!
//! - [`BoundedRandomSynthesizer`]: production strategy, bounded randomness
//!   (optionally seeded)
//! - [`DeterministicSynthesizer`]: fixed band position and drift factor, for
//!   tests and reproducible runs
//!
//! Every strategy call made by the fabric goes through [`synthesize_guarded`],
//! which turns panics and out-of-catalog output into [`SynthesisError`]s so the
//! caller can route them to recovery.

#![deny(unsafe_code)]

pub mod deterministic;
pub mod guard;
pub mod random;
pub mod strategy;

pub use deterministic::DeterministicSynthesizer;
pub use guard::synthesize_guarded;
pub use random::BoundedRandomSynthesizer;
pub use strategy::{perturb, SynthesisError, SynthesisPhase, Synthesizer};
