use super::*;

#[test]
fn test_default_is_valid() {
    let config = StitchingConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.phase_correlation.min_r, DEFAULT_MIN_R);
    assert_eq!(config.optimizer.mean_factor, 2.5);
    assert_eq!(config.features.ratio, 1.5);
}

#[test]
fn test_percent_overlap_out_of_range() {
    let config = StitchingConfig {
        percent_overlap: 0.0,
        ..Default::default()
    };
    let err = config.validate().unwrap_err();
    assert!(matches!(
        err,
        ConfigurationError::InvalidParameter {
            name: "percent_overlap",
            ..
        }
    ));
}

#[test]
fn test_scale_above_one_rejected() {
    let config = StitchingConfig {
        scale: 1.5,
        ..Default::default()
    };
    let err = config.validate().unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid parameter `scale`: must be in (0, 1], got 1.5"
    );
}

#[test]
fn test_zero_peaks_rejected() {
    let mut config = StitchingConfig::default();
    config.phase_correlation.n_peaks = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_epsilon_order_checked() {
    let mut config = StitchingConfig::default();
    config.features.min_epsilon = 10.0;
    config.features.max_epsilon = 5.0;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("min_epsilon"));
}

#[test]
fn test_yaml_partial_fields_take_defaults() {
    let yaml = "
percent_overlap: 0.15
scale: 0.5
rule: free
optimizer:
  mean_factor: 3.0
";
    let config = StitchingConfig::from_yaml_str(yaml).unwrap();
    assert_eq!(config.percent_overlap, 0.15);
    assert_eq!(config.scale, 0.5);
    assert_eq!(config.rule, PairingRule::Free);
    assert_eq!(config.optimizer.mean_factor, 3.0);
    assert_eq!(config.optimizer.max_iterations, 2000);
    assert_eq!(config.phase_correlation, PhaseCorrelationConfig::default());
}

#[test]
fn test_yaml_round_trip() {
    let mut config = StitchingConfig::default();
    config.features.seed = Some(7);
    config.default_overlap_x = 12.0;
    let yaml = config.to_yaml_string().unwrap();
    let parsed = StitchingConfig::from_yaml_str(&yaml).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn test_yaml_invalid_value_rejected() {
    let err = StitchingConfig::from_yaml_str("scale: -1.0").unwrap_err();
    assert!(matches!(
        err,
        ConfigurationError::InvalidParameter { name: "scale", .. }
    ));
}

#[test]
fn test_yaml_syntax_error() {
    let err = StitchingConfig::from_yaml_str("scale: [1.0").unwrap_err();
    assert!(matches!(err, ConfigurationError::Parse(_)));
}

#[test]
fn test_missing_file_reports_path() {
    let err = StitchingConfig::from_yaml_file(Path::new("/nonexistent/montage.yaml")).unwrap_err();
    assert!(err.to_string().contains("/nonexistent/montage.yaml"));
}
