use std::process::Command;

fn binary() -> String {
    env!("CARGO_BIN_EXE_run-test-services").to_string()
}

#[test]
fn help_lists_options() {
    let output = Command::new(binary())
        .arg("--help")
        .output()
        .expect("Failed to run binary");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--details-dir"));
    assert!(stdout.contains("--verbose"));
    assert!(stdout.contains("--config"));
}

#[test]
fn unknown_service_fails_without_starting_anything() {
    let dir = tempfile::tempdir().unwrap();
    let output = Command::new(binary())
        .args(["no-such-service", "--details-dir"])
        .arg(dir.path())
        .current_dir(dir.path())
        .output()
        .expect("Failed to run binary");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknown service 'no-such-service'"));
    assert!(stderr.contains("Known services: moto, redis, cockroachdb, vault, asgi\n\nHint:"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn invalid_config_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("service-fixtures.yaml");
    std::fs::write(&config, "services:\n  x:\n    command: ''\n").unwrap();

    let output = Command::new(binary())
        .args(["x", "--config"])
        .arg(&config)
        .current_dir(dir.path())
        .output()
        .expect("Failed to run binary");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("empty command"));
}
