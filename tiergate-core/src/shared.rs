//! Process-wide default quality gate.
//!
//! Prefer passing an `Arc<QualityGate>` explicitly. This handle exists for
//! callers that need one shared gate without threading it through: initialise
//! it once at startup, then read it anywhere. It cannot be replaced.

use std::sync::{Arc, OnceLock};

use crate::error::{Error, Result};
use crate::quality::{Evaluator, GateConfig, QualityGate};

static DEFAULT_GATE: OnceLock<Arc<QualityGate>> = OnceLock::new();

/// Initialise the default gate over the physics rubric.
pub fn init_default_gate(config: GateConfig) -> Result<Arc<QualityGate>> {
    install_default_gate(QualityGate::new(config, Evaluator::physics()?)?)
}

/// Install a caller-built gate as the default.
pub fn install_default_gate(gate: QualityGate) -> Result<Arc<QualityGate>> {
    let gate = Arc::new(gate);
    DEFAULT_GATE
        .set(Arc::clone(&gate))
        .map_err(|_| Error::config("default quality gate is already initialised"))?;
    Ok(gate)
}

/// The default gate, if initialised.
pub fn default_gate() -> Result<Arc<QualityGate>> {
    DEFAULT_GATE
        .get()
        .cloned()
        .ok_or_else(|| Error::config("default quality gate has not been initialised"))
}
