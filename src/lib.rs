//! Resource guard and observability layer for visual-parsing inference.
//!
//! The layer sits between a request handler and the inference pipeline:
//! [`hooks::GuardLayer`] decides per request whether memory pressure calls
//! for a lighter OCR engine and smaller caption batches, wraps every stage
//! with resource logging, and cleans up after each request. A background
//! [`monitor::ResourceMonitor`] logs resource usage independently.

pub mod cleanup;
pub mod config;
pub mod error;
pub mod format;
pub mod guard;
pub mod hooks;
pub mod logging;
pub mod monitor;
pub mod pipeline;
pub mod system;

pub use config::{Config, GuardThresholds};
pub use guard::{GuardDecision, MemoryGuard, OcrEngine, Pressure};
pub use hooks::{GuardLayer, RequestScope};
pub use system::snapshot::ResourceSnapshot;
