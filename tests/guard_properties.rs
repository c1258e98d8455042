use parseguard::config::{GuardThresholds, PipelineConfig};
use parseguard::guard::{OcrEngine, Pressure, decide, reduced_batch_size};
use parseguard::system::snapshot::ResourceSnapshot;
use proptest::prelude::*;

fn thresholds(sys_avail_min_mb: u64, proc_rss_max_mb: u64) -> GuardThresholds {
    GuardThresholds {
        enabled: true,
        sys_avail_min_mb,
        proc_rss_max_mb,
    }
}

fn pipeline(caption_batch_size: usize) -> PipelineConfig {
    PipelineConfig {
        caption_batch_size,
        ..PipelineConfig::default()
    }
}

fn engine() -> impl Strategy<Value = OcrEngine> {
    prop_oneof![Just(OcrEngine::Paddle), Just(OcrEngine::EasyOcr)]
}

#[test]
fn documented_scenarios() {
    let t = GuardThresholds::default();
    let p = PipelineConfig::default();

    let low = decide(&t, &p, OcrEngine::Paddle, &ResourceSnapshot::with_memory(500.0, 1_000.0));
    assert!(low.pressure.is_high());
    assert_eq!(low.ocr_engine, OcrEngine::EasyOcr);
    assert_eq!(low.caption_batch_size, 8);

    let fine = decide(&t, &p, OcrEngine::Paddle, &ResourceSnapshot::with_memory(2_000.0, 10_000.0));
    assert_eq!(fine.pressure, Pressure::Normal);
    assert_eq!(fine.ocr_engine, OcrEngine::Paddle);
    assert_eq!(fine.caption_batch_size, 16);
}

proptest! {
    #[test]
    fn within_thresholds_keeps_request(
        min_avail in 1u64..100_000,
        max_rss in 1u64..100_000,
        headroom in 0.0f64..50_000.0,
        rss_frac in 0.0f64..=1.0,
        batch in 1usize..512,
        requested in engine(),
    ) {
        let snapshot = ResourceSnapshot::with_memory(
            min_avail as f64 + headroom,
            max_rss as f64 * rss_frac,
        );
        let d = decide(&thresholds(min_avail, max_rss), &pipeline(batch), requested, &snapshot);
        prop_assert_eq!(d.pressure, Pressure::Normal);
        prop_assert_eq!(d.ocr_engine, requested);
        prop_assert_eq!(d.caption_batch_size, batch);
        prop_assert_eq!(d.paddle.is_some(), requested == OcrEngine::Paddle);
    }

    #[test]
    fn low_memory_always_falls_back(
        min_avail in 1u64..100_000,
        deficit in 0.001f64..=1.0,
        rss in 0.0f64..1e6,
        batch in 1usize..512,
        requested in engine(),
    ) {
        let snapshot = ResourceSnapshot::with_memory(min_avail as f64 * (1.0 - deficit), rss);
        let d = decide(&thresholds(min_avail, u64::MAX), &pipeline(batch), requested, &snapshot);
        prop_assert!(d.pressure.is_high());
        prop_assert_eq!(d.ocr_engine, OcrEngine::FALLBACK);
        prop_assert_eq!(d.caption_batch_size, (batch / 2).max(1));
        prop_assert!(d.caption_batch_size >= 1);
        prop_assert!(d.caption_batch_size <= batch);
        prop_assert!(d.paddle.is_none());
    }

    #[test]
    fn high_rss_always_falls_back(
        max_rss in 0u64..100_000,
        excess in 0.5f64..10_000.0,
        batch in 1usize..512,
    ) {
        let snapshot = ResourceSnapshot::with_memory(f64::INFINITY, max_rss as f64 + excess);
        let d = decide(&thresholds(0, max_rss), &pipeline(batch), OcrEngine::Paddle, &snapshot);
        prop_assert!(d.pressure.is_high());
        prop_assert_eq!(d.ocr_engine, OcrEngine::EasyOcr);
    }

    #[test]
    fn disabled_guard_never_degrades(
        avail in 0.0f64..1e6,
        rss in 0.0f64..1e6,
        batch in 1usize..512,
        requested in engine(),
    ) {
        let t = GuardThresholds { enabled: false, ..GuardThresholds::default() };
        let d = decide(&t, &pipeline(batch), requested, &ResourceSnapshot::with_memory(avail, rss));
        prop_assert_eq!(d.pressure, Pressure::Normal);
        prop_assert_eq!(d.ocr_engine, requested);
        prop_assert_eq!(d.caption_batch_size, batch);
    }

    #[test]
    fn less_memory_never_relieves_pressure(
        avail in 0.0f64..5_000.0,
        drop_by in 0.0f64..5_000.0,
        rss in 0.0f64..60_000.0,
    ) {
        let t = GuardThresholds::default();
        let p = PipelineConfig::default();
        let before = decide(&t, &p, OcrEngine::Paddle, &ResourceSnapshot::with_memory(avail, rss));
        let after = decide(
            &t,
            &p,
            OcrEngine::Paddle,
            &ResourceSnapshot::with_memory(avail - drop_by, rss),
        );
        prop_assert!(!before.pressure.is_high() || after.pressure.is_high());
    }

    #[test]
    fn reduction_is_half_with_floor(batch in 1usize..100_000) {
        let reduced = reduced_batch_size(batch);
        prop_assert!(reduced >= 1);
        prop_assert!(reduced <= batch);
        prop_assert_eq!(reduced, (batch / 2).max(1));
    }
}
