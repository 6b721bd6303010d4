use nightstack_core::frame::FrameType;
use nightstack_core::pipeline::config::PipelineConfig;
use nightstack_core::stack::combine::CombineMethod;

#[test]
fn defaults_are_sensible() {
    let config = PipelineConfig::default();
    assert_eq!(config.stacking.method, CombineMethod::Average);
    assert_eq!(config.masters.min_batch, 3);
    assert_eq!(config.masters.method_for(FrameType::Flat), CombineMethod::Median);
    assert_eq!(config.masters.method_for(FrameType::Offset), CombineMethod::Median);
    assert!(matches!(
        config.masters.method_for(FrameType::Dark),
        CombineMethod::KappaSigma { .. }
    ));
    assert!(config.workers.registration_threads >= 1);
    assert!(config.thresholds.max_fwhm > 0.0);
}

#[test]
fn config_roundtrips_through_json() {
    let mut config = PipelineConfig::default();
    config.stacking.method = CombineMethod::MedianKappaSigma {
        kappa: 2.5,
        iterations: 3,
    };
    config.thresholds.min_star_count = 12;
    config.workers.registration_threads = 4;

    let text = serde_json::to_string(&config).unwrap();
    let parsed: PipelineConfig = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed.stacking.method, config.stacking.method);
    assert_eq!(parsed.thresholds.min_star_count, 12);
    assert_eq!(parsed.workers.registration_threads, 4);
}

#[test]
fn missing_sections_take_defaults() {
    let parsed: PipelineConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(parsed.masters.min_batch, 3);
    assert_eq!(parsed.stacking.method, CombineMethod::Average);
}
