use bucketstore::config::{self, Profile};
use bucketstore::credentials::Env;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn write_config(dir: &TempDir, yaml: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.yaml");
    fs::write(&path, yaml).unwrap();
    path
}

/// Test loading configuration from YAML file
#[test]
fn test_load_yaml_config() {
    let yaml = r#"
profiles:
  test:
    endpoint: https://minio.example.com:9000/
    access_key: AKIATEST
    secret_key: secrettest
    region: us-west-2
    bucket: test-bucket
    insecure_tls: true

default_profile: test

transfer:
  page_size: 250
  multipart_threshold: 104857600
  multipart_part_size: 16777216
  request_timeout: 120
"#;

    let temp_dir = TempDir::new().unwrap();
    let config_path = write_config(&temp_dir, yaml);

    let config = config::load_from_yaml(&config_path).unwrap();

    assert_eq!(config.profiles.len(), 1);
    let profile = config.profiles.get("test").unwrap();
    assert_eq!(profile.endpoint_url(), "https://minio.example.com:9000");
    assert_eq!(profile.access_key.as_deref(), Some("AKIATEST"));
    assert_eq!(profile.secret_key.as_deref(), Some("secrettest"));
    assert_eq!(profile.region, "us-west-2");
    assert_eq!(profile.bucket.as_deref(), Some("test-bucket"));
    assert!(profile.insecure_tls);

    assert_eq!(config.default_profile.as_deref(), Some("test"));
    assert_eq!(config.transfer.page_size, Some(250));
    assert_eq!(config.transfer.request_timeout(), Duration::from_secs(120));

    let multipart = config.transfer.multipart();
    assert_eq!(multipart.threshold, 100 * 1024 * 1024);
    assert_eq!(multipart.part_size, 16 * 1024 * 1024);

    config.validate().unwrap();
}

/// Omitted fields fall back to their defaults
#[test]
fn test_yaml_defaults() {
    let yaml = r#"
profiles:
  aws: {}
"#;

    let temp_dir = TempDir::new().unwrap();
    let config = config::load_from_yaml(write_config(&temp_dir, yaml)).unwrap();

    let profile = config.profiles.get("aws").unwrap();
    assert_eq!(profile.region, "us-east-1");
    assert_eq!(profile.endpoint_url(), "https://s3.us-east-1.amazonaws.com");
    assert!(profile.access_key.is_none());
    assert!(!profile.insecure_tls);

    assert_eq!(config.transfer.page_size, None);
    assert_eq!(config.transfer.request_timeout, 300);

    // A single profile is selected even without default_profile
    let (name, _) = config.get_profile(None).unwrap();
    assert_eq!(name, "aws");
}

#[test]
fn test_malformed_yaml_fails() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(&temp_dir, "profiles: [not, a, map");
    assert!(config::load_from_yaml(path).is_err());
}

#[test]
fn test_missing_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    let err = config::load_from_yaml(temp_dir.path().join("absent.yaml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

/// Environment variables build a single `default` profile
#[test]
fn test_load_env_config() {
    let env = Env::from_pairs([
        ("S3_ENDPOINT", "http://localhost:9000"),
        ("AWS_REGION", "eu-west-1"),
        ("S3_BUCKET", "test-bucket"),
        ("S3_INSECURE_TLS", "true"),
        ("S3_PREFIX_PAGE_SIZE", "100"),
        ("S3_REQUEST_TIMEOUT", "30"),
    ]);

    let config = config::load_from_env_with(&env).unwrap();

    assert_eq!(config.profiles.len(), 1);
    assert_eq!(config.default_profile.as_deref(), Some("default"));

    let profile = config.profiles.get("default").unwrap();
    assert_eq!(profile.endpoint.as_deref(), Some("http://localhost:9000"));
    assert_eq!(profile.region, "eu-west-1");
    assert_eq!(profile.bucket.as_deref(), Some("test-bucket"));
    assert!(profile.insecure_tls);
    assert!(profile.access_key.is_none());

    assert_eq!(config.transfer.page_size, Some(100));
    assert_eq!(config.transfer.request_timeout(), Duration::from_secs(30));
    config.validate().unwrap();
}

#[test]
fn test_env_region_fallback() {
    let env = Env::from_pairs([("AWS_DEFAULT_REGION", "ap-south-1")]);
    let config = config::load_from_env_with(&env).unwrap();
    assert_eq!(config.profiles["default"].region, "ap-south-1");
    assert_eq!(
        config.profiles["default"].endpoint_url(),
        "https://s3.ap-south-1.amazonaws.com"
    );
}

#[test]
fn test_env_invalid_number() {
    let env = Env::from_pairs([("S3_PREFIX_PAGE_SIZE", "lots")]);
    let err = config::load_from_env_with(&env).unwrap_err();
    assert!(err.to_string().contains("S3_PREFIX_PAGE_SIZE"));
}

#[test]
fn test_load_config_unknown_profile() {
    let yaml = r#"
profiles:
  prod:
    bucket: data
"#;

    let temp_dir = TempDir::new().unwrap();
    let path = write_config(&temp_dir, yaml);
    let path = path.to_str().unwrap();

    let err = config::load_config(Some(path), Some("staging")).unwrap_err();
    assert!(err.to_string().contains("staging"));

    let config = config::load_config(Some(path), Some("prod")).unwrap();
    assert_eq!(config.default_profile.as_deref(), Some("prod"));
}

#[test]
fn test_load_config_validates() {
    let yaml = r#"
profiles:
  bad:
    endpoint: ftp://example.com
"#;

    let temp_dir = TempDir::new().unwrap();
    let path = write_config(&temp_dir, yaml);
    assert!(config::load_config(path.to_str(), None).is_err());
}

#[test]
fn test_validate_transfer_limits() {
    let mut config = config::Config::new();
    config.profiles.insert("p".to_string(), Profile::default());
    config.validate().unwrap();

    config.transfer.page_size = Some(0);
    assert!(config.validate().is_err());
    config.transfer.page_size = Some(1001);
    assert!(config.validate().is_err());
    config.transfer.page_size = Some(1000);
    config.validate().unwrap();

    config.transfer.multipart_part_size = 1024;
    assert!(config.validate().is_err());
    config.transfer.multipart_part_size = 5 * 1024 * 1024;

    config.transfer.multipart_threshold = 0;
    assert!(config.validate().is_err());
    config.transfer.multipart_threshold = 1;
    config.validate().unwrap();

    config.transfer.request_timeout = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_rejects_empty_config() {
    assert!(config::Config::new().validate().is_err());
}
