use super::*;
use pretty_assertions::assert_eq;

#[test]
fn missing_fields_use_defaults() {
    let config: Config = serde_json::from_str(r#"{ "max_depth": 3 }"#).unwrap();
    assert_eq!(
        config,
        Config {
            max_depth: 3,
            ..Config::default()
        }
    );
    assert!(config.validate().is_ok());
}

#[test]
fn zero_limits_are_rejected() {
    let config = Config {
        max_depth: 0,
        ..Config::default()
    };
    assert!(config.validate().is_err());

    let config = Config {
        max_update_passes: 0,
        ..Config::default()
    };
    assert!(config.validate().is_err());
}
