//! Real-process tests for `TcpProcessSupervisor`.
use service_fixtures::port::{find_free_port, is_listening};
use service_fixtures::supervisor::{OutputMode, ProcessSupervisor, StartRequest, TcpProcessSupervisor};
use service_fixtures::{ConnectionFields, Error};
use std::net::TcpListener;
use std::time::{Duration, Instant};

fn is_python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

macro_rules! require_python {
    () => {
        if !is_python_available() {
            eprintln!("⏭️  Skipping test: python3 not available");
            return;
        }
    };
}

fn request(command: &str, port: u16, timeout: Duration) -> StartRequest {
    let mut fields = ConnectionFields::new();
    fields.insert("hostname".to_string(), "127.0.0.1".into());
    fields.insert("port".to_string(), port.into());
    StartRequest {
        kind: "test-service".to_string(),
        command: command.to_string(),
        host: "127.0.0.1".to_string(),
        port,
        timeout,
        work_dir: std::env::temp_dir(),
        fields,
    }
}

fn supervisor() -> TcpProcessSupervisor {
    TcpProcessSupervisor::new(OutputMode::Null).with_grace_period(Duration::from_secs(1))
}

#[tokio::test]
async fn port_already_in_use_counts_as_started() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut supervisor = supervisor();
    let fields = supervisor
        .start(&request("sleep 30", port, Duration::from_secs(2)))
        .await
        .unwrap();

    assert_eq!(fields["port"], port);
    assert!(supervisor.pid().is_none(), "nothing should be spawned");
    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn early_exit_is_a_startup_failure() {
    let port = find_free_port().unwrap();
    let mut supervisor = supervisor();

    let started = Instant::now();
    let err = supervisor
        .start(&request("exit 3", port, Duration::from_secs(10)))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::StartupFailure { .. }));
    assert!(err.to_string().contains("exited"));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(supervisor.pid().is_none());
}

#[tokio::test]
async fn missing_readiness_times_out_and_kills_the_process() {
    let port = find_free_port().unwrap();
    let mut supervisor = supervisor();

    let err = supervisor
        .start(&request("sleep 30", port, Duration::from_millis(500)))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::StartupFailure { .. }));
    assert!(err.to_string().contains("timed out"));
    assert!(supervisor.pid().is_none());

    // Stopping after a failed start is a no-op.
    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn stop_without_start_is_a_no_op() {
    let mut supervisor = supervisor();
    supervisor.stop().await.unwrap();
    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn serves_until_stopped() {
    require_python!();

    let port = find_free_port().unwrap();
    let mut supervisor = supervisor();
    let command = format!("python3 -m http.server {} --bind 127.0.0.1", port);

    supervisor
        .start(&request(&command, port, Duration::from_secs(15)))
        .await
        .unwrap();
    assert!(supervisor.pid().is_some());
    assert!(is_listening("127.0.0.1", port).await);

    // A second start on the same supervisor is refused.
    assert!(matches!(
        supervisor
            .start(&request(&command, port, Duration::from_secs(1)))
            .await,
        Err(Error::Process(_))
    ));

    supervisor.stop().await.unwrap();
    assert!(supervisor.pid().is_none());
    assert!(!is_listening("127.0.0.1", port).await);

    supervisor.stop().await.unwrap();
}
