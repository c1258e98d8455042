//! Per-request memory pressure policy.
//!
//! Pure: a decision depends only on the thresholds, the configured defaults,
//! the engine the caller asked for and one snapshot. Callers read a fresh
//! snapshot right before deciding and never reuse a decision for another
//! request.

use std::fmt;

use serde::Serialize;

use crate::config::{GuardThresholds, PipelineConfig};
use crate::system::snapshot::ResourceSnapshot;

/// Text recognition backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrEngine {
    /// Higher fidelity, heavier batches.
    #[default]
    Paddle,
    /// Lighter engine substituted under memory pressure.
    EasyOcr,
}

impl OcrEngine {
    pub const FALLBACK: OcrEngine = OcrEngine::EasyOcr;

    pub fn label(self) -> &'static str {
        match self {
            OcrEngine::Paddle => "paddle",
            OcrEngine::EasyOcr => "easyocr",
        }
    }

    pub fn from_str_config(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "paddle" | "paddleocr" => Some(OcrEngine::Paddle),
            "easyocr" | "easy" => Some(OcrEngine::EasyOcr),
            _ => None,
        }
    }
}

impl fmt::Display for OcrEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureCause {
    LowSystemMemory,
    HighProcessRss,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum Pressure {
    #[default]
    Normal,
    High { causes: Vec<PressureCause> },
}

impl Pressure {
    pub fn is_high(&self) -> bool {
        matches!(self, Pressure::High { .. })
    }
}

/// Batch limits handed to the primary OCR engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PaddleLimits {
    pub max_batch_size: usize,
    pub rec_batch_num: usize,
}

/// Outcome of one guard evaluation. Lives for a single request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GuardDecision {
    pub pressure: Pressure,
    pub requested_engine: OcrEngine,
    pub ocr_engine: OcrEngine,
    pub caption_batch_size: usize,
    /// Set when the primary engine was selected.
    pub paddle: Option<PaddleLimits>,
}

impl GuardDecision {
    pub fn is_degraded(&self) -> bool {
        self.ocr_engine != self.requested_engine || self.pressure.is_high()
    }
}

/// Classify a snapshot against the thresholds.
pub fn assess(thresholds: &GuardThresholds, snapshot: &ResourceSnapshot) -> Pressure {
    let mut causes = Vec::new();
    if snapshot.system_available_mb < thresholds.sys_avail_min_mb as f64 {
        causes.push(PressureCause::LowSystemMemory);
    }
    if snapshot.process_rss_mb > thresholds.proc_rss_max_mb as f64 {
        causes.push(PressureCause::HighProcessRss);
    }
    if causes.is_empty() {
        Pressure::Normal
    } else {
        Pressure::High { causes }
    }
}

/// Caption batch size under high pressure: half the default, never below 1.
pub fn reduced_batch_size(default: usize) -> usize {
    (default / 2).max(1)
}

pub fn decide(
    thresholds: &GuardThresholds,
    pipeline: &PipelineConfig,
    requested: OcrEngine,
    snapshot: &ResourceSnapshot,
) -> GuardDecision {
    let pressure = if thresholds.enabled {
        assess(thresholds, snapshot)
    } else {
        Pressure::Normal
    };

    let (ocr_engine, caption_batch_size) = if pressure.is_high() {
        (OcrEngine::FALLBACK, reduced_batch_size(pipeline.caption_batch_size))
    } else {
        (requested, pipeline.caption_batch_size)
    };

    let paddle = (ocr_engine == OcrEngine::Paddle).then_some(PaddleLimits {
        max_batch_size: pipeline.paddle_max_batch_size,
        rec_batch_num: pipeline.paddle_rec_batch_num,
    });

    GuardDecision {
        pressure,
        requested_engine: requested,
        ocr_engine,
        caption_batch_size,
        paddle,
    }
}

/// Thresholds and defaults bound together, as the request hooks use them.
#[derive(Clone, Debug)]
pub struct MemoryGuard {
    thresholds: GuardThresholds,
    pipeline: PipelineConfig,
}

impl MemoryGuard {
    pub fn new(thresholds: GuardThresholds, pipeline: PipelineConfig) -> Self {
        MemoryGuard {
            thresholds,
            pipeline,
        }
    }

    pub fn thresholds(&self) -> &GuardThresholds {
        &self.thresholds
    }

    pub fn decide(&self, requested: OcrEngine, snapshot: &ResourceSnapshot) -> GuardDecision {
        decide(&self.thresholds, &self.pipeline, requested, snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> MemoryGuard {
        MemoryGuard::new(GuardThresholds::default(), PipelineConfig::default())
    }

    #[test]
    fn low_available_memory_degrades() {
        let decision = guard().decide(
            OcrEngine::Paddle,
            &ResourceSnapshot::with_memory(500.0, 1_000.0),
        );
        assert_eq!(
            decision.pressure,
            Pressure::High {
                causes: vec![PressureCause::LowSystemMemory]
            }
        );
        assert_eq!(decision.ocr_engine, OcrEngine::EasyOcr);
        assert_eq!(decision.caption_batch_size, 8);
        assert_eq!(decision.paddle, None);
        assert!(decision.is_degraded());
    }

    #[test]
    fn normal_pressure_is_unmodified() {
        let decision = guard().decide(
            OcrEngine::Paddle,
            &ResourceSnapshot::with_memory(2_000.0, 10_000.0),
        );
        assert_eq!(decision.pressure, Pressure::Normal);
        assert_eq!(decision.ocr_engine, OcrEngine::Paddle);
        assert_eq!(decision.caption_batch_size, 16);
        assert_eq!(
            decision.paddle,
            Some(PaddleLimits {
                max_batch_size: 128,
                rec_batch_num: 128
            })
        );
        assert!(!decision.is_degraded());
    }

    #[test]
    fn high_rss_degrades() {
        let decision = guard().decide(
            OcrEngine::Paddle,
            &ResourceSnapshot::with_memory(50_000.0, 30_001.0),
        );
        assert_eq!(
            decision.pressure,
            Pressure::High {
                causes: vec![PressureCause::HighProcessRss]
            }
        );
        assert_eq!(decision.ocr_engine, OcrEngine::EasyOcr);
    }

    #[test]
    fn thresholds_are_exclusive_at_the_boundary() {
        let decision = guard().decide(
            OcrEngine::Paddle,
            &ResourceSnapshot::with_memory(800.0, 30_000.0),
        );
        assert_eq!(decision.pressure, Pressure::Normal);
    }

    #[test]
    fn both_causes_reported() {
        let pressure = assess(
            &GuardThresholds::default(),
            &ResourceSnapshot::with_memory(10.0, 40_000.0),
        );
        assert_eq!(
            pressure,
            Pressure::High {
                causes: vec![PressureCause::LowSystemMemory, PressureCause::HighProcessRss]
            }
        );
    }

    #[test]
    fn disabled_guard_ignores_pressure() {
        let thresholds = GuardThresholds {
            enabled: false,
            ..GuardThresholds::default()
        };
        let guard = MemoryGuard::new(thresholds, PipelineConfig::default());
        let decision = guard.decide(OcrEngine::EasyOcr, &ResourceSnapshot::with_memory(1.0, 1e9));
        assert_eq!(decision.pressure, Pressure::Normal);
        assert_eq!(decision.ocr_engine, OcrEngine::EasyOcr);
        assert_eq!(decision.caption_batch_size, 16);
    }

    #[test]
    fn batch_reduction_floor() {
        assert_eq!(reduced_batch_size(16), 8);
        assert_eq!(reduced_batch_size(3), 1);
        assert_eq!(reduced_batch_size(1), 1);
    }

    #[test]
    fn engine_parsing() {
        assert_eq!(OcrEngine::from_str_config("PaddleOCR"), Some(OcrEngine::Paddle));
        assert_eq!(OcrEngine::from_str_config("easyocr"), Some(OcrEngine::EasyOcr));
        assert_eq!(OcrEngine::from_str_config("tesseract"), None);
    }
}
