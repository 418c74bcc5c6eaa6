mod common;

use common::Calls;
use service_fixtures::{Error, LifecycleCoordinator, Parser, Role};
use std::fs;
use std::time::Duration;

#[test]
fn load_config_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("service-fixtures.yaml");
    fs::write(
        &path,
        r#"
settings:
  poll_interval: 20ms
  startup_timeout: 10s

services:
  redis:
    command: redis-server --port {port} --save ''
  search:
    env_var: TEST_SEARCH_DETAILS
    command: search-engine --http {http_port} --transport {transport_port}
    ports: [http_port, transport_port]
    ready_port: http_port
    extra:
      cluster: test
"#,
    )
    .unwrap();

    let config = Parser::new().load_config(&path).unwrap();
    let coordinator = config.coordinator_config();
    assert_eq!(coordinator.poll_interval, Duration::from_millis(20));
    assert_eq!(coordinator.startup_timeout, Duration::from_secs(10));

    // Configured descriptors override built-ins of the same kind.
    let redis = config.descriptor("redis").unwrap();
    assert_eq!(redis.command, "redis-server --port {port} --save ''");
    assert!(redis.env_var.is_none());

    let search = config.descriptor("search").unwrap();
    assert_eq!(search.ready_port_name(), "http_port");
    let request = search.start_request(coordinator.startup_timeout).unwrap();
    assert_eq!(request.port as u64, request.fields["http_port"].as_u64().unwrap());
    assert_eq!(request.fields["cluster"], "test");

    // Untouched built-ins are still available.
    assert_eq!(config.descriptor("vault").unwrap().kind, "vault");
    assert_eq!(config.descriptor("cockroach").unwrap().kind, "cockroachdb");
}

#[test]
fn missing_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = Parser::new().load_config(dir.path().join("nope.yaml"));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn malformed_yaml_is_yaml_error() {
    let result = Parser::new().parse_config("services: [unterminated");
    assert!(matches!(result, Err(Error::Yaml(_))));
}

#[test]
fn reserved_field_in_config_is_rejected() {
    let yaml = r#"
services:
  queue:
    command: queue --port {port}
    extra:
      sessions: []
"#;
    let err = Parser::new().parse_config(yaml).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(err.suggestion().is_some());
}

#[tokio::test]
async fn configured_service_runs_through_coordinator() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = format!(
        r#"
settings:
  shared_dir: {}
  poll_interval: 10ms
services:
  queue:
    command: queue --port {{port}}
"#,
        dir.path().join("shared").display()
    );
    let config = Parser::new().parse_config(&yaml).unwrap();
    let calls = Calls::default();

    let mut gw0 = LifecycleCoordinator::new(
        config.coordinator_config(),
        config.descriptor("queue").unwrap(),
        "gw0",
        calls.supervisor(),
    )
    .unwrap();
    let record = gw0.join().await.unwrap();
    assert_eq!(gw0.role(), Some(Role::Manager));
    assert!(record.get_port("port").is_some());
    assert!(dir.path().join("shared").join("queue.json").exists());

    gw0.leave().await.unwrap();
    assert!(!dir.path().join("shared").join("queue.json").exists());
    assert_eq!((calls.starts(), calls.stops()), (1, 1));
}
