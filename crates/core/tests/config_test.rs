use jobsched_core::config::*;
use std::env;
use std::fs;
use tempfile::NamedTempFile;

#[test]
fn test_default_config() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());

    // 验证默认值
    assert_eq!(config.database.max_connections, 10);
    assert!(config.scheduler.enabled);
    assert_eq!(config.scheduler.poll_interval_ms, 1_000);
    assert_eq!(config.worker.pool_size, 8);
    assert_eq!(config.observability.log_format, "pretty");
}

#[test]
fn test_config_from_toml() {
    let toml_content = r#"
[database]
url = "sqlite::memory:"
max_connections = 4

[scheduler]
node_id = "node-a"
poll_interval_ms = 500
lease_duration_ms = 5000

[worker]
pool_size = 2

[observability]
log_level = "debug"
log_format = "json"
"#;

    let config = AppConfig::from_toml(toml_content).unwrap();

    assert_eq!(config.database.url, "sqlite::memory:");
    assert_eq!(config.database.max_connections, 4);
    assert_eq!(config.scheduler.resolve_node_id(), "node-a");
    assert_eq!(config.scheduler.poll_interval_ms, 500);
    assert_eq!(config.worker.pool_size, 2);
    // 未出现的字段使用默认值
    assert_eq!(config.worker.retry_queue_capacity, 1024);
    assert_eq!(config.observability.log_format, "json");
}

#[test]
fn test_config_validation_database() {
    let mut config = AppConfig::default();
    config.database.url = "postgresql://localhost/jobs".to_string();
    assert!(config.validate().is_err());

    config.database.url = "memory".to_string();
    assert!(config.validate().is_ok());

    config.database.min_connections = 20;
    assert!(config.validate().is_err());
}

#[test]
fn test_lease_must_exceed_poll_interval() {
    let mut config = AppConfig::default();
    config.scheduler.poll_interval_ms = 1_000;
    config.scheduler.lease_duration_ms = 1_500;
    assert!(config.validate().is_err());

    config.scheduler.lease_duration_ms = 2_000;
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_validation_worker() {
    let mut config = AppConfig::default();
    config.worker.pool_size = 0;
    assert!(config.validate().is_err());

    config.worker.pool_size = 1;
    config.worker.retry_jitter_factor = 1.5;
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_observability() {
    let mut config = AppConfig::default();
    config.observability.log_level = "verbose".to_string();
    assert!(config.validate().is_err());

    config.observability.log_level = "WARN".to_string();
    assert!(config.validate().is_ok());

    config.observability.log_format = "xml".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_load_from_file() {
    let toml_content = r#"
[database]
url = "memory"

[scheduler]
poll_interval_ms = 250
lease_duration_ms = 1000
"#;

    let temp_file = NamedTempFile::new().unwrap();
    fs::write(temp_file.path(), toml_content).unwrap();

    let config = AppConfig::load(temp_file.path().to_str()).unwrap();
    assert!(config.database.is_in_memory());
    assert_eq!(config.scheduler.poll_interval_ms, 250);
    assert_eq!(config.scheduler.lease_duration_ms, 1000);
}

#[test]
fn test_config_load_nonexistent_file() {
    let result = AppConfig::load(Some("/nonexistent/jobsched.toml"));
    assert!(result.is_err());
}

#[test]
fn test_config_environment_override() {
    env::set_var("JOBSCHED_WORKER__POOL_SIZE", "16");
    env::set_var("JOBSCHED_SCHEDULER__NODE_ID", "env-node");

    let config = AppConfig::load(None).unwrap();
    assert_eq!(config.worker.pool_size, 16);
    assert_eq!(config.scheduler.resolve_node_id(), "env-node");

    env::remove_var("JOBSCHED_WORKER__POOL_SIZE");
    env::remove_var("JOBSCHED_SCHEDULER__NODE_ID");
}

#[test]
fn test_config_to_toml() {
    let config = AppConfig::default();
    let toml_str = config.to_toml().unwrap();
    assert!(toml_str.contains("[scheduler]"));

    let parsed = AppConfig::from_toml(&toml_str).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn test_invalid_toml_format() {
    let result = AppConfig::from_toml("[scheduler\npoll_interval_ms = ");
    assert!(result.is_err());
}

#[test]
fn test_generated_node_id_uses_hostname_prefix() {
    let config = SchedulerConfig::default();
    let first = config.resolve_node_id();
    let second = config.resolve_node_id();
    assert_ne!(first, second);
    assert!(first.len() > 9);
}
