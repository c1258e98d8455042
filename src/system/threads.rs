//! Startup thread caps for native numeric backends.
//!
//! BLAS/OpenMP style libraries read their thread counts once, when they
//! initialise. [`ThreadCaps::apply`] must therefore run before any inference
//! library is loaded; later calls have no effect on already-initialised
//! backends.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::KnobError;

/// Environment variables read by the common numeric backends.
pub const BACKEND_THREAD_VARS: [&str; 5] = [
    "OMP_NUM_THREADS",
    "OPENBLAS_NUM_THREADS",
    "MKL_NUM_THREADS",
    "VECLIB_MAXIMUM_THREADS",
    "NUMEXPR_NUM_THREADS",
];

/// One backend's intra-process parallelism setting.
pub trait ThreadKnob: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, cap: usize) -> Result<(), KnobError>;
}

/// Sets an environment variable unless the operator already did.
#[derive(Clone, Debug)]
pub struct EnvKnob {
    var: String,
}

impl EnvKnob {
    pub fn new(var: impl Into<String>) -> Self {
        EnvKnob { var: var.into() }
    }
}

impl ThreadKnob for EnvKnob {
    fn name(&self) -> &str {
        &self.var
    }

    fn apply(&self, cap: usize) -> Result<(), KnobError> {
        if self.var.is_empty() || self.var.contains(['=', '\0']) {
            return Err(KnobError::InvalidName(self.var.clone()));
        }
        if std::env::var_os(&self.var).is_some() {
            return Ok(());
        }
        // SAFETY: thread caps are applied during boot, before the service
        // spawns worker threads or loads any library that reads the
        // environment concurrently.
        unsafe { std::env::set_var(&self.var, cap.to_string()) };
        Ok(())
    }
}

/// Adapter for setter-style knobs such as an ONNX runtime intra-op setting.
pub struct FnKnob<F> {
    name: String,
    set: F,
}

impl<F> FnKnob<F>
where
    F: Fn(usize) -> Result<(), KnobError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, set: F) -> Self {
        FnKnob {
            name: name.into(),
            set,
        }
    }
}

impl<F> ThreadKnob for FnKnob<F>
where
    F: Fn(usize) -> Result<(), KnobError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, cap: usize) -> Result<(), KnobError> {
        (self.set)(cap)
    }
}

#[derive(Debug)]
pub struct KnobFailure {
    pub knob: String,
    pub error: KnobError,
}

pub struct ThreadCaps {
    cap: usize,
    knobs: Vec<Arc<dyn ThreadKnob>>,
}

impl ThreadCaps {
    /// The standard backend environment variables, capped at `cap`.
    pub fn new(cap: usize) -> Self {
        ThreadCaps {
            cap: cap.max(1),
            knobs: BACKEND_THREAD_VARS
                .iter()
                .map(|var| Arc::new(EnvKnob::new(*var)) as Arc<dyn ThreadKnob>)
                .collect(),
        }
    }

    /// No knobs registered; used when the caller wants full control.
    pub fn empty(cap: usize) -> Self {
        ThreadCaps {
            cap: cap.max(1),
            knobs: Vec::new(),
        }
    }

    pub fn with_knob(mut self, knob: Arc<dyn ThreadKnob>) -> Self {
        self.knobs.push(knob);
        self
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Apply every knob in order. A failing knob is logged and skipped; the
    /// rest still run. Returns the failures for callers that care.
    pub fn apply(&self) -> Vec<KnobFailure> {
        let mut failures = Vec::new();
        for knob in &self.knobs {
            if let Err(error) = knob.apply(self.cap) {
                warn!(knob = knob.name(), %error, "thread cap not applied");
                failures.push(KnobFailure {
                    knob: knob.name().to_string(),
                    error,
                });
            }
        }
        info!(
            cap = self.cap,
            knobs = self.knobs.len(),
            failed = failures.len(),
            "thread limits applied"
        );
        failures
    }
}
